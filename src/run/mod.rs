//! Run scheduling and agent process supervision
//!
//! - [`Scheduler`]: per-worktree FIFO queues, at most one running run per key
//! - [`ProcessSupervisor`]: spawns and watches one engine process per run
//! - [`RunJournal`]: persisted run history, reconciled on startup

mod journal;
mod scheduler;
mod signal;
mod supervisor;

pub use journal::{HISTORY_LIMIT, RunJournal};
pub use scheduler::{CancelOutcome, RunExecutor, RunHandle, Scheduler};
pub use supervisor::ProcessSupervisor;
