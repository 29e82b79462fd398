//! Single-flight queue for reconciliation passes
//!
//! At most one pass runs per engine. A request arriving while a pass is in
//! flight schedules one follow-up pass; every request arriving during the
//! same in-flight pass shares that follow-up.
//!
//! A pass holds the queue only while it applies its changes. Teardowns it
//! starts are tracked by the engine and do not keep the queue busy.

use parking_lot::Mutex;
use tokio::sync::watch;

/// What a caller of `update()` must do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Ticket {
    /// No pass was running: drive pass `pass` (and any follow-ups)
    Lead { pass: u64, skip_fading: bool },
    /// A pass is running: wait until pass `pass` has completed
    Follow { pass: u64 },
}

#[derive(Debug, Default)]
struct QueueState {
    running: bool,
    /// Number of passes started so far
    started: u64,
    /// Skip-fading flag of the queued follow-up, if one is queued
    follow_up: Option<bool>,
}

pub(crate) struct PassQueue {
    state: Mutex<QueueState>,
    completed: watch::Sender<u64>,
}

impl PassQueue {
    pub(crate) fn new() -> Self {
        let (completed, _) = watch::channel(0);
        Self {
            state: Mutex::new(QueueState::default()),
            completed,
        }
    }

    /// Request a pass
    pub(crate) fn enter(&self, skip_fading: bool) -> Ticket {
        let mut state = self.state.lock();
        if !state.running {
            state.running = true;
            state.started += 1;
            return Ticket::Lead {
                pass: state.started,
                skip_fading,
            };
        }

        // Coalesced requests skip fading if any of them asked to
        let skip = state.follow_up.unwrap_or(false) || skip_fading;
        state.follow_up = Some(skip);
        Ticket::Follow {
            pass: state.started + 1,
        }
    }

    /// Start driving `pass`. Dropping the driver before it runs out of
    /// follow-ups releases the queue.
    pub(crate) fn driver(&self, pass: u64) -> Driver<'_> {
        Driver {
            queue: self,
            pass: Some(pass),
        }
    }

    /// Mark `pass` complete and return the follow-up to run next, if any
    pub(crate) fn finish(&self, pass: u64) -> Option<(u64, bool)> {
        let mut state = self.state.lock();
        self.completed.send_replace(pass);
        match state.follow_up.take() {
            Some(skip_fading) => {
                state.started += 1;
                Some((state.started, skip_fading))
            }
            None => {
                state.running = false;
                None
            }
        }
    }

    /// Give up on `pass` and any queued follow-up, waking everyone waiting
    fn abandon(&self, pass: u64) {
        let mut state = self.state.lock();
        if state.follow_up.take().is_some() {
            state.started += 1;
        }
        state.running = false;
        self.completed.send_replace(state.started);
        tracing::error!(pass, "Reconciliation pass aborted");
    }

    /// Wait until pass number `pass` has completed
    pub(crate) async fn wait_for(&self, pass: u64) {
        let mut completed = self.completed.subscribe();
        // The sender lives as long as the queue, so this only ends by reaching `pass`
        let _ = completed.wait_for(|done| *done >= pass).await;
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state.lock().running
    }

    #[cfg(test)]
    pub(crate) fn passes_started(&self) -> u64 {
        self.state.lock().started
    }
}

/// Drives one pass and its follow-ups
pub(crate) struct Driver<'a> {
    queue: &'a PassQueue,
    pass: Option<u64>,
}

impl Driver<'_> {
    /// Pass currently being driven
    pub(crate) fn pass(&self) -> Option<u64> {
        self.pass
    }

    /// Complete the current pass; returns the skip-fading flag of the
    /// follow-up that is now current, if one was queued
    pub(crate) fn finish(&mut self) -> Option<bool> {
        let pass = self.pass.take()?;
        let (next, skip_fading) = self.queue.finish(pass)?;
        self.pass = Some(next);
        Some(skip_fading)
    }
}

impl Drop for Driver<'_> {
    fn drop(&mut self) {
        if let Some(pass) = self.pass.take() {
            self.queue.abandon(pass);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_queue_leads() {
        let queue = PassQueue::new();
        assert_eq!(
            queue.enter(true),
            Ticket::Lead {
                pass: 1,
                skip_fading: true
            }
        );
        assert!(queue.is_running());
        assert_eq!(queue.finish(1), None);
        assert!(!queue.is_running());
    }

    #[test]
    fn test_requests_during_pass_coalesce() {
        let queue = PassQueue::new();
        assert!(matches!(queue.enter(false), Ticket::Lead { pass: 1, .. }));

        assert_eq!(queue.enter(false), Ticket::Follow { pass: 2 });
        assert_eq!(queue.enter(true), Ticket::Follow { pass: 2 });
        assert_eq!(queue.enter(false), Ticket::Follow { pass: 2 });

        // Exactly one follow-up, skipping fading because one request asked for it
        assert_eq!(queue.finish(1), Some((2, true)));
        assert_eq!(queue.finish(2), None);
        assert_eq!(queue.passes_started(), 2);
    }

    #[tokio::test]
    async fn test_wait_for_completed_pass() {
        let queue = PassQueue::new();
        let Ticket::Lead { pass, .. } = queue.enter(false) else {
            panic!("expected to lead");
        };
        queue.finish(pass);
        // Already completed: returns immediately
        queue.wait_for(pass).await;
    }

    #[tokio::test]
    async fn test_dropped_driver_releases_queue() {
        let queue = PassQueue::new();
        let Ticket::Lead { pass, .. } = queue.enter(false) else {
            panic!("expected to lead");
        };
        let driver = queue.driver(pass);
        assert_eq!(queue.enter(false), Ticket::Follow { pass: 2 });

        drop(driver);
        assert!(!queue.is_running());
        // Followers of the dropped follow-up are woken too
        queue.wait_for(2).await;
        assert!(matches!(queue.enter(false), Ticket::Lead { pass: 3, .. }));
    }

    #[test]
    fn test_driver_runs_follow_ups() {
        let queue = PassQueue::new();
        assert!(matches!(queue.enter(false), Ticket::Lead { pass: 1, .. }));
        let mut driver = queue.driver(1);
        queue.enter(true);

        assert_eq!(driver.finish(), Some(true));
        assert_eq!(driver.pass(), Some(2));
        assert_eq!(driver.finish(), None);
        assert_eq!(driver.pass(), None);
        drop(driver);
        assert_eq!(queue.passes_started(), 2);
        assert!(!queue.is_running());
    }
}
