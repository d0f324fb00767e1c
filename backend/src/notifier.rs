use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Pending,
    Success,
    Error,
}

/// What observers see of the orchestrator's current operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationStatus {
    pub visible: bool,
    pub phase: Phase,
    pub message: String,
}

impl OperationStatus {
    pub fn idle() -> Self {
        Self {
            visible: false,
            phase: Phase::Idle,
            message: String::new(),
        }
    }
}

/// How long terminal statuses stay visible.
#[derive(Debug, Clone, Copy)]
pub struct StatusTimings {
    pub success: Duration,
    pub error: Duration,
}

impl Default for StatusTimings {
    fn default() -> Self {
        Self {
            success: Duration::from_millis(2000),
            error: Duration::from_millis(3000),
        }
    }
}

/// The watched value. `generation` counts publishes so expiry timers can tell
/// whether their status is still the one showing.
#[derive(Debug, Clone)]
struct Slot {
    generation: u64,
    status: OperationStatus,
}

/// Single-slot status channel. The latest write wins; nothing is queued.
#[derive(Clone)]
pub struct StatusNotifier {
    tx: Arc<watch::Sender<Slot>>,
    timings: StatusTimings,
}

impl StatusNotifier {
    pub fn new(timings: StatusTimings) -> Self {
        let (tx, _rx) = watch::channel(Slot {
            generation: 0,
            status: OperationStatus::idle(),
        });
        Self { tx: Arc::new(tx), timings }
    }

    pub fn current(&self) -> OperationStatus {
        self.tx.borrow().status.clone()
    }

    #[cfg(test)]
    fn generation(&self) -> u64 {
        self.tx.borrow().generation
    }

    pub fn pending(&self, message: impl Into<String>) {
        self.publish(Phase::Pending, message.into());
    }

    pub fn success(&self, message: impl Into<String>) {
        let generation = self.publish(Phase::Success, message.into());
        self.expire_after(generation, self.timings.success);
    }

    pub fn error(&self, message: impl Into<String>) {
        let generation = self.publish(Phase::Error, message.into());
        self.expire_after(generation, self.timings.error);
    }

    /// Bump the generation and swap the status under one write lock.
    fn publish(&self, phase: Phase, message: String) -> u64 {
        let mut generation = 0;
        self.tx.send_modify(|slot| {
            slot.generation += 1;
            slot.status = OperationStatus {
                visible: true,
                phase,
                message,
            };
            generation = slot.generation;
        });
        generation
    }

    /// Hide the status after `delay`, unless something newer was published meanwhile.
    fn expire_after(&self, generation: u64, delay: Duration) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tx.send_if_modified(|slot| {
                if slot.generation != generation {
                    return false;
                }
                slot.status = OperationStatus::idle();
                true
            });
        });
    }
}

impl Default for StatusNotifier {
    fn default() -> Self {
        Self::new(StatusTimings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn settle(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        tokio::task::yield_now().await;
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_statuses_expire() {
        let n = StatusNotifier::default();
        n.pending("working");
        assert_eq!(n.current().phase, Phase::Pending);

        n.success("done");
        settle(1900).await;
        assert_eq!(n.current().phase, Phase::Success);
        settle(200).await;
        assert_eq!(n.current(), OperationStatus::idle());

        n.error("boom");
        settle(2500).await;
        assert_eq!(n.current().phase, Phase::Error);
        settle(600).await;
        assert!(!n.current().visible);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_stays_until_an_outcome() {
        let n = StatusNotifier::default();
        n.pending("waiting for confirmation");
        settle(60_000).await;
        assert_eq!(n.current().phase, Phase::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn newer_status_survives_older_timer() {
        let n = StatusNotifier::default();
        n.success("first");
        settle(1500).await;
        n.pending("second operation");
        settle(1000).await;

        let s = n.current();
        assert_eq!(s.phase, Phase::Pending);
        assert_eq!(s.message, "second operation");
    }

    #[tokio::test]
    async fn later_writes_overwrite_earlier_ones() {
        let n = StatusNotifier::default();
        n.pending("a");
        n.pending("b");
        assert_eq!(n.current().message, "b");
        assert_eq!(n.generation(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_publishes_each_get_their_own_generation() {
        let n = StatusNotifier::default();
        let tasks: Vec<_> = (0..8)
            .map(|t| {
                let n = n.clone();
                tokio::spawn(async move {
                    let mut seen = Vec::with_capacity(50);
                    for i in 0..50 {
                        seen.push(n.publish(Phase::Pending, format!("task {t} step {i}")));
                    }
                    seen
                })
            })
            .collect();

        let mut generations = Vec::new();
        for task in tasks {
            generations.extend(task.await.unwrap());
        }
        generations.sort_unstable();
        generations.dedup();

        assert_eq!(generations, (1..=400).collect::<Vec<u64>>());
        assert_eq!(n.generation(), 400);
        assert!(n.current().message.starts_with("task "));
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_only_clears_its_own_generation() {
        let n = StatusNotifier::default();
        n.error("boom");
        n.pending("retrying");
        settle(5000).await;

        assert_eq!(n.current().phase, Phase::Pending);
        assert_eq!(n.generation(), 2);
    }
}
