//! Persisted run journal
//!
//! The scheduler writes every run's snapshot to `runs.json` on each transition. On
//! startup, runs that were still queued or running belong to a bridge process that
//! no longer exists: they are marked `Failed(SupervisorRestart)` and never resumed.
//!
//! Writes go through a [`JournalWriter`]: the scheduler stages the latest snapshot
//! list while holding its own lock and the file is written afterwards on the blocking
//! pool. A staged list that has not been written yet is replaced by the next one.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::domain::{FailureReason, RunSnapshot, RunState};
use crate::error::Result;
use crate::state::{JsonFile, RUNS_FILE};

/// Terminal runs kept in the journal
pub const HISTORY_LIMIT: usize = 200;

#[derive(Debug, Clone)]
pub struct RunJournal {
    file: JsonFile,
}

impl RunJournal {
    pub fn open(state_dir: &Path) -> Self {
        Self {
            file: JsonFile::in_dir(state_dir, RUNS_FILE),
        }
    }

    /// Load the journal, failing every run that was in flight, and write it back.
    pub fn load_and_reconcile(&self) -> Result<Vec<RunSnapshot>> {
        let mut runs: Vec<RunSnapshot> = self.file.load_or_default()?;
        let now = Utc::now();
        let mut reconciled = 0usize;

        for run in runs.iter_mut().filter(|r| !r.state.is_terminal()) {
            run.state = RunState::Failed(FailureReason::SupervisorRestart);
            run.finished_at = Some(now);
            reconciled += 1;
        }

        let runs = retain_recent(runs);
        if reconciled > 0 {
            tracing::warn!(reconciled, "marked interrupted runs as failed");
            self.file.save(&runs)?;
        }
        Ok(runs)
    }

    pub fn save(&self, runs: &[RunSnapshot]) -> Result<()> {
        self.file.save(&runs)
    }
}

/// Coalescing, off-lock writer for a [`RunJournal`]
#[derive(Debug)]
pub struct JournalWriter {
    journal: RunJournal,
    staged: Mutex<Option<Vec<RunSnapshot>>>,
    /// Serializes file writes; never taken while `staged` is held
    pub(super) file: Mutex<()>,
}

impl JournalWriter {
    pub fn new(journal: RunJournal) -> Arc<Self> {
        Arc::new(Self {
            journal,
            staged: Mutex::new(None),
            file: Mutex::new(()),
        })
    }

    /// Replace the staged list. Returns `true` if nothing was staged before, in
    /// which case the caller must schedule a [`write_staged`](Self::write_staged).
    pub fn stage(&self, runs: Vec<RunSnapshot>) -> bool {
        self.staged
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(runs)
            .is_none()
    }

    /// Write the staged list on the blocking pool, or inline outside a runtime.
    pub fn schedule(self: &Arc<Self>) {
        let writer = self.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(move || writer.write_staged());
            }
            Err(_) => writer.write_staged(),
        }
    }

    /// Write whatever is staged. Taking the list under the file lock keeps a later
    /// list from being overwritten by an earlier one.
    pub fn write_staged(&self) {
        let _file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        let staged = self.staged.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(runs) = staged else {
            return;
        };
        if let Err(e) = self.journal.save(&runs) {
            tracing::warn!(error = %e, runs = runs.len(), "failed to write run journal");
        }
    }
}

impl Drop for JournalWriter {
    fn drop(&mut self) {
        self.write_staged();
    }
}

/// Keep every live run and the most recent `HISTORY_LIMIT` terminal runs, by id.
pub fn retain_recent(mut runs: Vec<RunSnapshot>) -> Vec<RunSnapshot> {
    runs.sort_by_key(|r| r.id);
    let terminal = runs.iter().filter(|r| r.state.is_terminal()).count();
    let mut to_drop = terminal.saturating_sub(HISTORY_LIMIT);

    runs.retain(|r| {
        if to_drop > 0 && r.state.is_terminal() {
            to_drop -= 1;
            false
        } else {
            true
        }
    });
    runs
}
