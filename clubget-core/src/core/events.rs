use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum EntryStatus {
    Pending,
    Resolving,
    Acquiring { strategy: String },
    Assembling,
    Complete { skipped: bool },
    Error { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryProgress {
    pub index: usize,
    pub title: String,
    pub status: EntryStatus,
    pub percent: f64,
    pub file_path: Option<String>,
}

impl EntryProgress {
    pub fn new(index: usize, title: impl Into<String>, status: EntryStatus) -> Self {
        Self {
            index,
            title: title.into(),
            status,
            percent: 0.0,
            file_path: None,
        }
    }

    pub fn with_percent(mut self, percent: f64) -> Self {
        self.percent = percent.clamp(0.0, 100.0);
        self
    }

    pub fn with_file(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }
}

pub trait EventEmitter: Send + Sync + 'static {
    fn emit_entry_state(&self, progress: &EntryProgress);
}

pub struct NoopEmitter;

impl EventEmitter for NoopEmitter {
    fn emit_entry_state(&self, _progress: &EntryProgress) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_tagged() {
        let status = EntryStatus::Acquiring {
            strategy: "helper_fetch".into(),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["type"], "Acquiring");
        assert_eq!(json["data"]["strategy"], "helper_fetch");
    }

    #[test]
    fn percent_is_clamped() {
        let p = EntryProgress::new(1, "Aula", EntryStatus::Pending).with_percent(130.0);
        assert_eq!(p.percent, 100.0);
    }
}
