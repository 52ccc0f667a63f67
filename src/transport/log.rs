//! Append-only JSONL run logs
//!
//! Every event of a run is appended to `<state dir>/logs/<run id>.jsonl`, so a
//! transport that was offline can replay a run it missed.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::domain::{ProgressEvent, RunId};
use crate::error::{BridgeError, Result};
use crate::state::LOGS_DIR;

#[derive(Debug, Clone)]
pub struct LogSink {
    dir: PathBuf,
}

impl LogSink {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            dir: state_dir.join(LOGS_DIR),
        }
    }

    pub fn path(&self, run_id: RunId) -> PathBuf {
        self.dir.join(format!("{}.jsonl", run_id))
    }

    pub fn append(&self, event: &ProgressEvent) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| BridgeError::io(&self.dir, e))?;
        let path = self.path(event.run_id);
        let line = serde_json::to_string(event).map_err(|e| BridgeError::Store {
            path: path.clone(),
            message: e.to_string(),
        })?;

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| BridgeError::io(&path, e))?;
        writeln!(file, "{}", line).map_err(|e| BridgeError::io(&path, e))?;
        Ok(())
    }

    /// Events logged for a run, in order. Unparseable lines are skipped.
    pub fn replay(&self, run_id: RunId) -> Result<Vec<ProgressEvent>> {
        let path = self.path(run_id);
        let file = match std::fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BridgeError::not_found("run log", run_id.to_string()));
            }
            Err(e) => return Err(BridgeError::io(&path, e)),
        };

        let mut events = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| BridgeError::io(&path, e))?;
            match serde_json::from_str(&line) {
                Ok(event) => events.push(event),
                Err(e) => tracing::warn!(run_id, error = %e, "skipping corrupt run log line"),
            }
        }
        Ok(events)
    }
}
