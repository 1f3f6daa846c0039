use std::path::PathBuf;

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::warn;

pub const FAILED_TASKS_FILE: &str = "failed_tasks.log";

/// Append-only record of tasks that exhausted their retries.
///
/// Recording is best effort: a failure to write the record is logged and
/// otherwise ignored, since the task itself has already failed.
#[derive(Debug, Clone, Default)]
pub struct FailureLog {
    path: Option<PathBuf>,
}

impl FailureLog {
    /// Records into `<log_dir>/failed_tasks.log`.
    pub fn in_dir(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(log_dir.into().join(FAILED_TASKS_FILE)),
        }
    }

    /// Only logs through `tracing`.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    pub async fn record(&self, source: &str, label: &str) {
        let Some(path) = &self.path else {
            return;
        };
        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent).await {
                warn!("Cannot create {}: {e}", parent.display());
                return;
            }
        }

        let line = format!("{source}: {label}\n");
        let written = async {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?;
            file.write_all(line.as_bytes()).await
        }
        .await;

        if let Err(e) = written {
            warn!("Failed to record failed task in {}: {e}", path.display());
        }
    }
}
