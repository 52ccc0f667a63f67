//! Per-run progress event bus
//!
//! Each run owns one [`EventBus`]: a single producer (the run's supervisor task)
//! and any number of subscribers. Publishing never blocks; events live in a bounded
//! broadcast ring and a subscriber that falls behind by more than the capacity skips
//! the overwritten events, with the skip count exposed through
//! [`Subscription::missed`].
//!
//! The bus closes exactly once, right after the terminal `Result` event. Later
//! publishes are dropped and return `None`. A subscriber that joins after the close
//! receives only the terminal event.

use std::sync::Mutex;

use chrono::Utc;
use futures::Stream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::domain::{ProgressEvent, ProgressKind, RunId};

pub const DEFAULT_BUS_CAPACITY: usize = 1024;

#[derive(Debug)]
pub struct EventBus {
    run_id: RunId,
    inner: Mutex<BusInner>,
}

#[derive(Debug)]
struct BusInner {
    sender: Option<broadcast::Sender<ProgressEvent>>,
    next_seq: u64,
    terminal: Option<ProgressEvent>,
}

impl EventBus {
    pub fn new(run_id: RunId, capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Self {
            run_id,
            inner: Mutex::new(BusInner {
                sender: Some(sender),
                next_seq: 0,
                terminal: None,
            }),
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Publish an event, assigning the next sequence number.
    ///
    /// Returns `None` once the bus is closed.
    pub fn publish(&self, kind: ProgressKind) -> Option<ProgressEvent> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let sender = inner.sender.as_ref()?;

        let terminal = kind.is_terminal();
        let event = ProgressEvent {
            run_id: self.run_id,
            seq: inner.next_seq + 1,
            timestamp: Utc::now(),
            kind,
        };
        // No receivers is fine; the event is simply not observed
        let _ = sender.send(event.clone());
        inner.next_seq += 1;

        if terminal {
            inner.sender = None;
            inner.terminal = Some(event.clone());
            tracing::debug!(run_id = self.run_id, seq = event.seq, "event bus closed");
        }

        Some(event)
    }

    pub fn subscribe(&self) -> Subscription {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match &inner.sender {
            Some(sender) => Subscription::live(self.run_id, sender.subscribe()),
            None => Subscription::finished(self.run_id, inner.terminal.clone()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .sender
            .is_none()
    }

    /// Terminal event, once published
    pub fn terminal(&self) -> Option<ProgressEvent> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .terminal
            .clone()
    }
}

/// A finite, non-restartable view of one run's events
#[derive(Debug)]
pub struct Subscription {
    run_id: RunId,
    receiver: Option<broadcast::Receiver<ProgressEvent>>,
    pending: Option<ProgressEvent>,
    missed: u64,
    done: bool,
}

impl Subscription {
    fn live(run_id: RunId, receiver: broadcast::Receiver<ProgressEvent>) -> Self {
        Self {
            run_id,
            receiver: Some(receiver),
            pending: None,
            missed: 0,
            done: false,
        }
    }

    fn finished(run_id: RunId, terminal: Option<ProgressEvent>) -> Self {
        Self {
            run_id,
            receiver: None,
            pending: terminal,
            missed: 0,
            done: false,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Next event, or `None` after the terminal event has been delivered.
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        if self.done {
            return None;
        }
        if let Some(event) = self.pending.take() {
            self.done = true;
            return Some(event);
        }

        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if event.is_terminal() {
                        self.done = true;
                    }
                    return Some(event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    self.missed += skipped;
                    tracing::warn!(run_id = self.run_id, skipped, "subscriber lagged behind");
                }
                Err(RecvError::Closed) => {
                    self.done = true;
                    return None;
                }
            }
        }
    }

    /// Number of events this subscriber skipped because it fell behind
    pub fn missed(&self) -> u64 {
        self.missed
    }

    pub fn into_stream(self) -> impl Stream<Item = ProgressEvent> + Send {
        futures::stream::unfold(self, |mut sub| async move {
            sub.next().await.map(|event| (event, sub))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RunResult, RunState};
    use futures::StreamExt;

    fn result() -> ProgressKind {
        ProgressKind::Result(RunResult {
            state: RunState::Completed,
            answer: Some("done".to_string()),
            conversation: None,
            resume_token: None,
        })
    }

    #[tokio::test]
    async fn subscriber_sees_gapless_sequence_and_terminal() {
        let bus = EventBus::new(1, 16);
        let sub = bus.subscribe();

        bus.publish(ProgressKind::status("one"));
        bus.publish(ProgressKind::tool("Bash", "ls"));
        bus.publish(result());

        let events: Vec<ProgressEvent> = sub.into_stream().collect().await;
        let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert!(events.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn publish_after_terminal_is_dropped() {
        let bus = EventBus::new(7, 16);
        assert!(bus.publish(result()).is_some());
        assert!(bus.is_closed());
        assert!(bus.publish(ProgressKind::status("late")).is_none());
        assert!(bus.publish(result()).is_none());
    }

    #[tokio::test]
    async fn late_joiner_only_sees_from_join_point() {
        let bus = EventBus::new(1, 16);
        bus.publish(ProgressKind::status("before"));

        let mut sub = bus.subscribe();
        bus.publish(ProgressKind::status("after"));
        bus.publish(result());

        assert_eq!(sub.next().await.unwrap().seq, 2);
        assert_eq!(sub.next().await.unwrap().seq, 3);
        assert!(sub.next().await.is_none());

        let mut after_close = bus.subscribe();
        assert!(after_close.next().await.unwrap().is_terminal());
        assert!(after_close.next().await.is_none());
    }

    #[tokio::test]
    async fn slow_subscriber_skips_and_counts_missed_events() {
        let bus = EventBus::new(1, 4);
        let mut sub = bus.subscribe();

        for i in 0..10 {
            bus.publish(ProgressKind::status(format!("line {}", i)));
        }
        bus.publish(result());

        let mut received = Vec::new();
        while let Some(event) = sub.next().await {
            received.push(event.seq);
        }

        assert_eq!(*received.last().unwrap(), 11);
        assert_eq!(sub.missed() as usize + received.len(), 11);
        assert!(received.windows(2).all(|w| w[0] < w[1]));
    }
}
