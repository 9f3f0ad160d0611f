pub const STATUS_PATH: &str = "/status.xml";
pub const CONTROL_PATH: &str = "/interface.cgi";

pub const DEFAULT_PORT: u16 = 80;

/// Trim whitespace, a leading `http://` and trailing slashes from a configured host.
pub fn normalize_host(host: &str) -> String {
    let trimmed = host.trim();
    let without_scheme = trimmed.strip_prefix("http://").unwrap_or(trimmed);
    without_scheme.trim_end_matches('/').to_string()
}

pub fn base_url(host: &str, port: u16) -> String {
    let host = normalize_host(host);
    if port == DEFAULT_PORT {
        format!("http://{host}")
    } else {
        format!("http://{host}:{port}")
    }
}

pub fn control_path(act_id: u16, value: i64) -> String {
    format!("{CONTROL_PATH}?act={act_id}&val={value}")
}
