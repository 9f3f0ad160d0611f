use std::fs::{File, OpenOptions};
use std::io::Write;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

use crate::diff::diff_snapshots;
use crate::types::StatusSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLogMode {
    /// Every decoded snapshot in full.
    Full,
    /// The first snapshot in full, then only changed fields.
    #[default]
    Diffed,
}

pub(crate) struct MessageLogger {
    mode: MessageLogMode,
    file: File,
    previous: Option<StatusSnapshot>,
}

impl MessageLogger {
    pub fn new(mode: MessageLogMode, path: &str) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            mode,
            file,
            previous: None,
        })
    }

    pub fn log_request(&mut self, path: &str) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "req",
            "method": "GET",
            "path": path,
        });
        self.write_line(&entry);
    }

    pub fn log_command(&mut self, act_id: u16, value: i64, ok: bool) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "cmd",
            "act": act_id,
            "val": value,
            "ok": ok,
        });
        self.write_line(&entry);
    }

    pub fn log_error(&mut self, path: &str, error: &str) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "err",
            "path": path,
            "error": error,
        });
        self.write_line(&entry);
    }

    pub fn log_poll(&mut self, status: u16, snapshot: &StatusSnapshot) {
        let entry = match (self.mode, self.previous.as_ref()) {
            (MessageLogMode::Full, _) => json!({
                "ts": Utc::now().to_rfc3339(),
                "dir": "poll",
                "status": status,
                "body": snapshot,
            }),
            (MessageLogMode::Diffed, None) => json!({
                "ts": Utc::now().to_rfc3339(),
                "dir": "poll",
                "status": status,
                "full": true,
                "body": snapshot,
            }),
            (MessageLogMode::Diffed, Some(prev)) => {
                let changes = diff_snapshots(Some(prev), snapshot);
                json!({
                    "ts": Utc::now().to_rfc3339(),
                    "dir": "poll",
                    "status": status,
                    "changes": changes,
                })
            }
        };
        self.write_line(&entry);

        if self.mode == MessageLogMode::Diffed {
            self.previous = Some(snapshot.clone());
        }
    }

    fn write_line(&mut self, entry: &Value) {
        if let Ok(line) = serde_json::to_string(entry)
            && let Err(e) = writeln!(self.file, "{line}")
        {
            warn!("failed to write log entry: {e}");
        }
    }
}
