use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::codec::decode;
use crate::logger::{MessageLogMode, MessageLogger};
use crate::protocol::{DEFAULT_PORT, STATUS_PATH, base_url, control_path};
use crate::types::StatusSnapshot;
use crate::{Error, Result};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// The two operations a heater controller supports.
///
/// [`DeviceClient`] is the HTTP implementation; the coordinator accepts any
/// implementor.
pub trait DeviceApi: Send + Sync + 'static {
    fn fetch_status(&self) -> impl Future<Output = Result<StatusSnapshot>> + Send;

    /// `true` when the device acknowledged the command. Failures are reported
    /// as `false`, never as an error.
    fn set_parameter(&self, act_id: u16, value: i64) -> impl Future<Output = bool> + Send;
}

pub struct DeviceClientBuilder {
    host: String,
    port: u16,
    http: Option<reqwest::Client>,
    timeout: Duration,
    log_mode: Option<MessageLogMode>,
    log_path: Option<String>,
}

impl DeviceClientBuilder {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            http: None,
            timeout: DEFAULT_TIMEOUT,
            log_mode: None,
            log_path: None,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Share an existing connection pool instead of creating one.
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<String>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<DeviceClient> {
        let http = match self.http {
            Some(http) => http,
            None => reqwest::Client::builder()
                .build()
                .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {e}")))?,
        };

        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(Mutex::new(MessageLogger::new(mode, &path)?)),
            _ => None,
        };

        Ok(DeviceClient {
            http,
            base_url: base_url(&self.host, self.port),
            timeout: self.timeout,
            write_gate: tokio::sync::Mutex::new(()),
            logger,
        })
    }
}

pub struct DeviceClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
    write_gate: tokio::sync::Mutex<()>,
    logger: Option<Mutex<MessageLogger>>,
}

impl DeviceClient {
    pub fn builder(host: impl Into<String>) -> DeviceClientBuilder {
        DeviceClientBuilder::new(host)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn fetch_status(&self) -> Result<StatusSnapshot> {
        self.with_logger(|l| l.log_request(STATUS_PATH));

        let result = self.fetch_status_inner().await;
        if let Err(ref e) = result {
            self.with_logger(|l| l.log_error(STATUS_PATH, &e.to_string()));
        }
        result
    }

    async fn fetch_status_inner(&self) -> Result<StatusSnapshot> {
        let url = format!("{}{STATUS_PATH}", self.base_url);
        trace!(url = %url, "fetching status");

        let resp = self
            .http
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| connection_error(&url, &e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Protocol {
                status: status.as_u16(),
                path: STATUS_PATH.to_string(),
            });
        }

        let body = resp.text().await.map_err(|e| connection_error(&url, &e))?;
        let snapshot = decode(&body)?;
        debug!(fields = snapshot.len(), "status decoded");

        self.with_logger(|l| l.log_poll(status.as_u16(), &snapshot));
        Ok(snapshot)
    }

    /// Send one control command. Concurrent calls are serialized.
    pub async fn set_parameter(&self, act_id: u16, value: i64) -> bool {
        let _gate = self.write_gate.lock().await;

        let path = control_path(act_id, value);
        let url = format!("{}{path}", self.base_url);
        debug!(act = act_id, val = value, "sending command");

        let ok = match self.http.get(&url).timeout(self.timeout).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!(act = act_id, val = value, status = resp.status().as_u16(), "command rejected");
                false
            }
            Err(e) => {
                warn!(act = act_id, val = value, error = %connection_error(&url, &e), "command failed");
                false
            }
        };

        self.with_logger(|l| l.log_command(act_id, value, ok));
        ok
    }

    /// Whether a status document can currently be fetched and decoded.
    pub async fn test_connection(&self) -> bool {
        self.fetch_status().await.is_ok()
    }

    fn with_logger(&self, f: impl FnOnce(&mut MessageLogger)) {
        if let Some(ref logger) = self.logger
            && let Ok(mut guard) = logger.lock()
        {
            f(&mut guard);
        }
    }
}

impl DeviceApi for DeviceClient {
    async fn fetch_status(&self) -> Result<StatusSnapshot> {
        DeviceClient::fetch_status(self).await
    }

    async fn set_parameter(&self, act_id: u16, value: i64) -> bool {
        DeviceClient::set_parameter(self, act_id, value).await
    }
}

fn connection_error(url: &str, e: &reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Connection(format!("timeout talking to {url}"))
    } else {
        Error::Connection(format!("error talking to {url}: {e}"))
    }
}
