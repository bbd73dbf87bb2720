//! Leadership state machine gating the ingestion workload.
//!
//! ```text
//! Acquiring/Follower --StartedLeading--> Leader
//! Leader --StoppedLeading | Shutdown--> Relinquishing
//! Relinquishing --StartedLeading--> Leader            (pending stop cancelled)
//! Relinquishing --SafetyWindowElapsed--> Acquiring    (or exit after Shutdown)
//! ```
//!
//! The workload is stopped only after one full lease duration in
//! `Relinquishing`, so a successor is already running before this
//! instance stops. The delay is a timer event on the same queue, never a
//! sleep inside a handler.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use herald_ingest::Pipeline;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::elector::LeaseEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadershipState {
    Follower,
    Acquiring,
    Leader,
    Relinquishing,
}

impl fmt::Display for LeadershipState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Follower => "follower",
            Self::Acquiring => "acquiring",
            Self::Leader => "leader",
            Self::Relinquishing => "relinquishing",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorEvent {
    Lease(LeaseEvent),
    Shutdown,
    /// Fired by the coordinator's own timer. Stale epochs are ignored.
    SafetyWindowElapsed(u64),
}

/// Something that runs only while this instance leads.
#[async_trait]
pub trait Workload: Send + Sync {
    async fn start(&self);
    async fn stop(&self);
}

#[async_trait]
impl Workload for Pipeline {
    async fn start(&self) {
        Pipeline::start(self);
    }

    async fn stop(&self) {
        Pipeline::stop(self).await;
    }
}

/// Sending half of the coordinator queue.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::UnboundedSender<CoordinatorEvent>,
}

impl CoordinatorHandle {
    pub fn lease(&self, event: LeaseEvent) {
        let _ = self.tx.send(CoordinatorEvent::Lease(event));
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(CoordinatorEvent::Shutdown);
    }

    /// Forward every elector event until the elector's channel closes.
    pub async fn forward(&self, mut events: mpsc::UnboundedReceiver<LeaseEvent>) {
        while let Some(event) = events.recv().await {
            self.lease(event);
        }
    }
}

pub struct Coordinator {
    identity: String,
    state: LeadershipState,
    workload: Arc<dyn Workload>,
    safety_window: Duration,
    epoch: u64,
    shutting_down: bool,
    tx: mpsc::UnboundedSender<CoordinatorEvent>,
    rx: mpsc::UnboundedReceiver<CoordinatorEvent>,
}

impl Coordinator {
    /// `safety_window` is the configured lease duration.
    pub fn new(
        identity: impl Into<String>,
        workload: Arc<dyn Workload>,
        safety_window: Duration,
    ) -> (Self, CoordinatorHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = CoordinatorHandle { tx: tx.clone() };
        let coordinator = Self {
            identity: identity.into(),
            state: LeadershipState::Acquiring,
            workload,
            safety_window,
            epoch: 0,
            shutting_down: false,
            tx,
            rx,
        };
        (coordinator, handle)
    }

    pub fn state(&self) -> LeadershipState {
        self.state
    }

    /// Process events until shutdown completes. Returns the final state.
    pub async fn run(mut self) -> LeadershipState {
        while let Some(event) = self.rx.recv().await {
            if self.handle(event).await {
                break;
            }
        }
        info!(state = %self.state, "leader coordinator finished");
        self.state
    }

    /// Apply one event. Returns `true` once the coordinator should exit.
    async fn handle(&mut self, event: CoordinatorEvent) -> bool {
        use CoordinatorEvent as E;
        use LeadershipState as S;

        match (self.state, event) {
            (S::Follower | S::Acquiring, E::Lease(LeaseEvent::StartedLeading)) => {
                self.transition(S::Leader);
                self.workload.start().await;
            }
            (S::Relinquishing, E::Lease(LeaseEvent::StartedLeading)) => {
                if self.shutting_down {
                    debug!("ignoring re-acquired lease during shutdown");
                } else {
                    // Invalidate the pending timer. The workload never stopped.
                    self.epoch += 1;
                    self.transition(S::Leader);
                }
            }
            (S::Leader, E::Lease(LeaseEvent::StoppedLeading)) => {
                self.relinquish();
            }
            (S::Leader, E::Shutdown) => {
                self.shutting_down = true;
                self.relinquish();
            }
            (S::Relinquishing, E::Shutdown) => {
                self.shutting_down = true;
            }
            (S::Follower | S::Acquiring, E::Shutdown) => {
                return true;
            }
            (S::Relinquishing, E::SafetyWindowElapsed(epoch)) if epoch == self.epoch => {
                self.workload.stop().await;
                if self.shutting_down {
                    self.transition(S::Follower);
                    return true;
                }
                self.transition(S::Acquiring);
            }
            (S::Acquiring | S::Follower, E::Lease(LeaseEvent::NewLeader(leader))) => {
                if leader != self.identity {
                    self.transition(S::Follower);
                }
            }
            (state, event) => {
                debug!(state = %state, event = ?event, "ignoring coordinator event");
            }
        }
        false
    }

    fn relinquish(&mut self) {
        self.transition(LeadershipState::Relinquishing);
        self.epoch += 1;
        let epoch = self.epoch;
        let tx = self.tx.clone();
        let window = self.safety_window;
        info!(window_secs = window.as_secs(), "delaying pipeline stop by one lease duration");
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let _ = tx.send(CoordinatorEvent::SafetyWindowElapsed(epoch));
        });
    }

    fn transition(&mut self, next: LeadershipState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "leadership state changed");
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[derive(Default)]
    struct MockWorkload {
        starts: AtomicUsize,
        stops: AtomicUsize,
        stopped_at: Mutex<Option<Instant>>,
    }

    #[async_trait]
    impl Workload for MockWorkload {
        async fn start(&self) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        async fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
            *self.stopped_at.lock().unwrap() = Some(Instant::now());
        }
    }

    const WINDOW: Duration = Duration::from_secs(15);

    fn setup() -> (
        tokio::task::JoinHandle<LeadershipState>,
        CoordinatorHandle,
        Arc<MockWorkload>,
    ) {
        let workload = Arc::new(MockWorkload::default());
        let (coordinator, handle) = Coordinator::new("me", workload.clone(), WINDOW);
        (tokio::spawn(coordinator.run()), handle, workload)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn lease_loss_delays_stop_by_full_window() {
        let (_task, handle, workload) = setup();
        handle.lease(LeaseEvent::StartedLeading);
        settle().await;
        assert_eq!(workload.starts.load(Ordering::SeqCst), 1);

        let lost_at = Instant::now();
        handle.lease(LeaseEvent::StoppedLeading);

        tokio::time::sleep(WINDOW - Duration::from_secs(1)).await;
        assert_eq!(workload.stops.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(workload.stops.load(Ordering::SeqCst), 1);
        let stopped_at = workload.stopped_at.lock().unwrap().unwrap();
        assert!(stopped_at - lost_at >= WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn reacquiring_cancels_pending_stop() {
        let (_task, handle, workload) = setup();
        handle.lease(LeaseEvent::StartedLeading);
        handle.lease(LeaseEvent::StoppedLeading);
        tokio::time::sleep(Duration::from_secs(5)).await;
        handle.lease(LeaseEvent::StartedLeading);

        tokio::time::sleep(WINDOW * 2).await;
        assert_eq!(workload.starts.load(Ordering::SeqCst), 1);
        assert_eq!(workload.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_as_leader_waits_for_window_then_exits() {
        let (task, handle, workload) = setup();
        handle.lease(LeaseEvent::StartedLeading);
        settle().await;

        let asked_at = Instant::now();
        handle.shutdown();
        let final_state = task.await.unwrap();

        assert_eq!(final_state, LeadershipState::Follower);
        assert_eq!(workload.stops.load(Ordering::SeqCst), 1);
        assert!(Instant::now() - asked_at >= WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_as_follower_exits_immediately() {
        let (task, handle, workload) = setup();
        handle.lease(LeaseEvent::NewLeader("other".into()));
        handle.shutdown();

        let started = Instant::now();
        assert_eq!(task.await.unwrap(), LeadershipState::Follower);
        assert_eq!(Instant::now(), started);
        assert_eq!(workload.starts.load(Ordering::SeqCst), 0);
        assert_eq!(workload.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn lease_loss_then_shutdown_keeps_original_deadline() {
        let (task, handle, workload) = setup();
        handle.lease(LeaseEvent::StartedLeading);
        handle.lease(LeaseEvent::StoppedLeading);
        settle().await;
        let lost_at = Instant::now();

        tokio::time::sleep(Duration::from_secs(3)).await;
        handle.shutdown();
        task.await.unwrap();

        let stopped_at = workload.stopped_at.lock().unwrap().unwrap();
        assert!(stopped_at - lost_at >= WINDOW);
        assert!(stopped_at - lost_at < WINDOW + Duration::from_secs(1));
    }
}
