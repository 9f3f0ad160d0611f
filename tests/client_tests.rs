use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rixens::{
    Availability, DeviceClient, DeviceConfig, DeviceRegistry, Error, Event, FieldValue,
    MessageLogConfig, MessageLogMode, UpdateCoordinator,
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const STATUS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<status>
  <version>MCS7 2.1.4</version>
  <currenttemp>185</currenttemp>
  <currenthumidity>41</currenthumidity>
  <setpoint>680</setpoint>
  <fanspeed>999</fanspeed>
  <systemheat>1</systemheat>
  <heaterstate>20</heaterstate>
  <heater1>
    <battv>136</battv>
    <heaton>1</heaton>
    <flametemp>2310</flametemp>
  </heater1>
  <heater1-faults>
    <fault><name>AF</name><value>0</value></fault>
    <fault><name>CF</name><value>1</value></fault>
  </heater1-faults>
  <network>
    <ssid>camper</ssid>
    <dhcp></dhcp>
  </network>
</status>"#;

fn host_port(server: &MockServer) -> (String, u16) {
    let addr = server.address();
    (addr.ip().to_string(), addr.port())
}

fn client_for(server: &MockServer) -> DeviceClient {
    let (host, port) = host_port(server);
    DeviceClient::builder(host)
        .port(port)
        .build()
        .expect("client should build")
}

/// A local port with nothing listening on it.
fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn config_for(server: &MockServer) -> DeviceConfig {
    let (host, port) = host_port(server);
    let mut config = DeviceConfig::new(host);
    config.port = port;
    config
}

async fn mount_status(server: &MockServer, body: &str) {
    Mock::given(method("GET"))
        .and(path("/status.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn fetch_status_decodes_document() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(STATUS_XML))
        .expect(1)
        .mount(&server)
        .await;

    let snapshot = client_for(&server).fetch_status().await.unwrap();

    assert_eq!(snapshot.version(), Some("MCS7 2.1.4"));
    assert_eq!(snapshot.get_i64("currenttemp"), Some(185));
    assert_eq!(snapshot.get_i64("heater1_battv"), Some(136));
    assert_eq!(snapshot.get_i64("fault_AF"), Some(0));
    assert_eq!(snapshot.get_i64("fault_CF"), Some(1));
    assert_eq!(snapshot.get("network_dhcp"), Some(&FieldValue::Null));
    assert_eq!(snapshot.active_faults(), vec!["CF"]);
}

#[tokio::test]
async fn fetch_status_non_2xx_is_protocol_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status.xml"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = client_for(&server).fetch_status().await.unwrap_err();
    match &err {
        Error::Protocol { status, path } => {
            assert_eq!(*status, 500);
            assert_eq!(path, "/status.xml");
        }
        other => panic!("expected protocol error, got {other:?}"),
    }
    assert!(err.is_retryable());
}

#[tokio::test]
async fn fetch_status_malformed_body_is_decode_error() {
    let server = MockServer::start().await;
    mount_status(&server, "<status><currenttemp>185</status>").await;

    let err = client_for(&server).fetch_status().await.unwrap_err();
    assert!(matches!(err, Error::Decode(_)), "got {err:?}");
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn fetch_status_timeout_is_connection_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(STATUS_XML)
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let (host, port) = host_port(&server);
    let client = DeviceClient::builder(host)
        .port(port)
        .timeout(Duration::from_millis(200))
        .build()
        .unwrap();

    let err = client.fetch_status().await.unwrap_err();
    assert!(matches!(err, Error::Connection(_)), "got {err:?}");
}

#[tokio::test]
async fn unreachable_device_is_connection_error() {
    let client = DeviceClient::builder("127.0.0.1")
        .port(closed_port())
        .build()
        .unwrap();

    let err = client.fetch_status().await.unwrap_err();
    assert!(matches!(err, Error::Connection(_)), "got {err:?}");
    assert!(!client.test_connection().await);
}

#[tokio::test]
async fn set_parameter_sends_act_and_val() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/interface.cgi"))
        .and(query_param("act", "101"))
        .and(query_param("val", "725"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    assert!(client_for(&server).set_parameter(101, 725).await);
}

#[tokio::test]
async fn set_parameter_failure_is_false() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/interface.cgi"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    assert!(!client_for(&server).set_parameter(102, 50).await);

    let offline = DeviceClient::builder("127.0.0.1")
        .port(closed_port())
        .build()
        .unwrap();
    assert!(!offline.set_parameter(102, 50).await);
}

#[tokio::test]
async fn concurrent_writes_are_serialized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/interface.cgi"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(200)))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let started = Instant::now();
    let (a, b) = tokio::join!(client.set_parameter(101, 700), client.set_parameter(102, 40));

    assert!(a && b);
    assert!(
        started.elapsed() >= Duration::from_millis(400),
        "writes overlapped: {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn message_log_records_wire_traffic() {
    let server = MockServer::start().await;
    mount_status(&server, STATUS_XML).await;
    Mock::given(method("GET"))
        .and(path("/interface.cgi"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let tmp = tempfile::NamedTempFile::new().unwrap();
    let (host, port) = host_port(&server);
    let client = DeviceClient::builder(host)
        .port(port)
        .message_log(MessageLogMode::Full, tmp.path().to_str().unwrap())
        .build()
        .unwrap();

    client.fetch_status().await.unwrap();
    client.set_parameter(101, 700).await;

    let lines: Vec<serde_json::Value> = std::fs::read_to_string(tmp.path())
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    let dirs: Vec<&str> = lines.iter().map(|l| l["dir"].as_str().unwrap()).collect();
    assert_eq!(dirs, vec!["req", "poll", "cmd"]);
    assert_eq!(lines[1]["body"]["setpoint"], 680);
    assert_eq!(lines[2]["act"], 101);
}

#[tokio::test]
async fn coordinator_setup_reads_scaled_values() {
    let server = MockServer::start().await;
    mount_status(&server, STATUS_XML).await;

    let coordinator = UpdateCoordinator::setup(&config_for(&server), reqwest::Client::new())
        .await
        .unwrap();

    assert_eq!(coordinator.availability(), Availability::Available);
    assert_eq!(coordinator.value("setpoint"), Some(FieldValue::Float(68.0)));
    assert_eq!(coordinator.value("currenttemp"), Some(FieldValue::Float(18.5)));
    assert_eq!(coordinator.value("battv"), Some(FieldValue::Float(13.6)));
    assert_eq!(
        coordinator.value("fanspeed"),
        Some(FieldValue::Text("auto".into()))
    );
    assert_eq!(coordinator.diagnostics()["data"]["network_ssid"], "**REDACTED**");
}

#[tokio::test]
async fn coordinator_setup_failure_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status.xml"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let result = UpdateCoordinator::setup(&config_for(&server), reqwest::Client::new()).await;
    assert!(matches!(result, Err(Error::Protocol { status: 500, .. })));
}

#[tokio::test]
async fn coordinator_write_scales_then_refreshes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(STATUS_XML))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/interface.cgi"))
        .and(query_param("act", "101"))
        .and(query_param("val", "725"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let coordinator = UpdateCoordinator::setup(&config_for(&server), reqwest::Client::new())
        .await
        .unwrap();
    let events: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(vec![]));
    let sink = events.clone();
    let _sub = coordinator.subscribe(move |e| sink.lock().unwrap().push(e.clone()));

    assert!(coordinator.set_parameter("setpoint", 72.5).await.unwrap());
    assert_eq!(events.lock().unwrap().len(), 1);
    assert_eq!(coordinator.current_interval(), Duration::from_secs(2));
}

#[tokio::test]
async fn coordinator_legacy_preset_uses_legacy_ids() {
    let server = MockServer::start().await;
    mount_status(&server, STATUS_XML).await;
    Mock::given(method("GET"))
        .and(path("/interface.cgi"))
        .and(query_param("act", "1"))
        .and(query_param("val", "650"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(&server);
    let json = format!(
        r#"{{"host": "{}", "port": {}, "command_preset": "legacy"}}"#,
        config.host, config.port
    );
    let config = DeviceConfig::from_json_str(&json).unwrap();
    let coordinator = UpdateCoordinator::setup(&config, reqwest::Client::new())
        .await
        .unwrap();

    assert!(coordinator.set_parameter("setpoint", 65.0).await.unwrap());
}

#[tokio::test]
async fn coordinator_degrades_then_goes_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(STATUS_XML))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/status.xml"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let mut config = config_for(&server);
    config.max_failures = 2;
    let coordinator = UpdateCoordinator::setup(&config, reqwest::Client::new())
        .await
        .unwrap();
    let first = coordinator.latest_snapshot().unwrap();

    coordinator.request_refresh().await;
    coordinator.request_refresh().await;
    assert_eq!(coordinator.availability(), Availability::Degraded);
    assert_eq!(coordinator.latest_snapshot().unwrap(), first);

    coordinator.request_refresh().await;
    assert!(!coordinator.is_available());
    assert_eq!(coordinator.consecutive_failures(), 3);
}

#[tokio::test]
async fn registry_add_and_remove() {
    let server = MockServer::start().await;
    mount_status(&server, STATUS_XML).await;

    let mut registry = DeviceRegistry::new(reqwest::Client::new());
    let id = registry.add(&config_for(&server)).await.unwrap();

    assert_eq!(registry.len(), 1);
    assert_eq!(registry.ids().collect::<Vec<_>>(), vec![id]);
    assert!(registry.get(id).unwrap().is_available());

    assert!(registry.remove(id).await);
    assert!(!registry.remove(id).await);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn registry_rejects_unreachable_device() {
    let mut config = DeviceConfig::new("127.0.0.1");
    config.port = closed_port();

    let mut registry = DeviceRegistry::default();
    assert!(registry.add(&config).await.is_err());
    assert!(registry.is_empty());
}

#[tokio::test]
async fn config_message_log_is_wired_to_client() {
    let server = MockServer::start().await;
    mount_status(&server, STATUS_XML).await;

    let tmp = tempfile::NamedTempFile::new().unwrap();
    let mut config = config_for(&server);
    config.message_log = Some(MessageLogConfig {
        path: tmp.path().to_str().unwrap().to_string(),
        mode: MessageLogMode::Diffed,
    });

    let coordinator = UpdateCoordinator::setup(&config, reqwest::Client::new())
        .await
        .unwrap();
    coordinator.request_refresh().await;

    let text = std::fs::read_to_string(tmp.path()).unwrap();
    let polls: Vec<serde_json::Value> = text
        .lines()
        .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap())
        .filter(|l| l["dir"] == "poll")
        .collect();
    assert_eq!(polls.len(), 2);
    assert_eq!(polls[0]["full"], true);
    assert_eq!(polls[1]["changes"].as_array().unwrap().len(), 0);
}
