use serde::Serialize;
use std::path::PathBuf;

/// JSON output mode for machine-readable sync events
/// Uses NDJSON format (newline-delimited JSON)
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    Start {
        source: PathBuf,
        destination: PathBuf,
        watch: bool,
    },
    Copy {
        source: PathBuf,
        destination: PathBuf,
    },
    Delete {
        path: PathBuf,
        tree: bool,
    },
    Ignore {
        path: PathBuf,
        reason: String,
    },
    Error {
        error: String,
    },
    Summary {
        files_copied: usize,
        files_deleted: usize,
        trees_deleted: usize,
        events_handled: usize,
        events_ignored: usize,
        duration_secs: f64,
    },
}

impl SyncEvent {
    /// Emit this event as JSON to stdout
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            println!("{}", json);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_start_event() {
        let event = SyncEvent::Start {
            source: PathBuf::from("/src"),
            destination: PathBuf::from("/dst"),
            watch: true,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"start"#));
        assert!(json.contains(r#""watch":true"#));
    }

    #[test]
    fn test_serialize_delete_event() {
        let event = SyncEvent::Delete {
            path: PathBuf::from("/dst/dir"),
            tree: true,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"delete"#));
        assert!(json.contains(r#""tree":true"#));
    }

    #[test]
    fn test_serialize_ignore_event() {
        let event = SyncEvent::Ignore {
            path: PathBuf::from("/dst/gone.txt"),
            reason: "already gone".to_string(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"ignore"#));
        assert!(json.contains(r#""reason":"already gone""#));
    }

    #[test]
    fn test_serialize_summary_event() {
        let event = SyncEvent::Summary {
            files_copied: 10,
            files_deleted: 2,
            trees_deleted: 1,
            events_handled: 7,
            events_ignored: 3,
            duration_secs: 12.5,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"summary"#));
        assert!(json.contains(r#""files_copied":10"#));
        assert!(json.contains(r#""duration_secs":12.5"#));
    }
}
