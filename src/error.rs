use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The status document was not well-formed XML.
    #[error("malformed status document: {0}")]
    Decode(String),

    /// Timeout or transport failure talking to the device.
    #[error("connection error: {0}")]
    Connection(String),

    /// The device answered with a non-2xx HTTP status.
    #[error("device returned HTTP {status} for {path}")]
    Protocol { status: u16, path: String },

    /// Bad configuration or an unknown command key. Never sent over the wire.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a later attempt against the same device may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Protocol { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(Error::Connection("timeout".into()).is_retryable());
        assert!(
            Error::Protocol {
                status: 500,
                path: "/status.xml".into()
            }
            .is_retryable()
        );
        assert!(!Error::Decode("eof".into()).is_retryable());
        assert!(!Error::Configuration("unknown key".into()).is_retryable());
    }

    #[test]
    fn protocol_error_display() {
        let err = Error::Protocol {
            status: 503,
            path: "/status.xml".into(),
        };
        assert_eq!(err.to_string(), "device returned HTTP 503 for /status.xml");
    }
}
