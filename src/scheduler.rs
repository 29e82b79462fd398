//! Frame clock and animation scheduler
//!
//! `FrameClock` is the per-session timer source: the render loop (or
//! [`FrameClock::run`]) calls `tick()` once per frame and every registered
//! callback receives the frame timing. `AnimationScheduler` is the engine's
//! single registration on that clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;

use crate::effects::FrameParams;

/// Callback invoked once per frame
pub type TickCallback = Box<dyn FnMut(&FrameParams) + Send>;

type SharedCallback = Arc<Mutex<TickCallback>>;

struct Timing {
    start: Instant,
    last_frame: Instant,
    /// Accumulated time for fixed-step ticks
    time: f32,
    frame: u64,
}

struct ClockInner {
    callbacks: Mutex<Vec<(u64, SharedCallback)>>,
    next_id: AtomicU64,
    timing: Mutex<Timing>,
}

impl ClockInner {
    fn remove(&self, id: u64) {
        self.callbacks.lock().retain(|(cb_id, _)| *cb_id != id);
    }
}

/// Per-session frame timer source
#[derive(Clone)]
pub struct FrameClock {
    inner: Arc<ClockInner>,
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameClock {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            inner: Arc::new(ClockInner {
                callbacks: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                timing: Mutex::new(Timing {
                    start: now,
                    last_frame: now,
                    time: 0.0,
                    frame: 0,
                }),
            }),
        }
    }

    /// Register a per-frame callback. Dropping the registration removes it.
    pub fn add(&self, callback: TickCallback) -> TickRegistration {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .callbacks
            .lock()
            .push((id, Arc::new(Mutex::new(callback))));
        TickRegistration {
            id,
            clock: Arc::downgrade(&self.inner),
        }
    }

    /// Number of registered callbacks
    pub fn listener_count(&self) -> usize {
        self.inner.callbacks.lock().len()
    }

    /// Advance one frame using wall-clock timing
    pub fn tick(&self) -> FrameParams {
        let frame = {
            let mut timing = self.inner.timing.lock();
            let now = Instant::now();
            timing.frame += 1;
            timing.time = now.duration_since(timing.start).as_secs_f32();
            let delta = now.duration_since(timing.last_frame).as_secs_f32();
            timing.last_frame = now;
            FrameParams::new(timing.time, delta, timing.frame)
        };
        self.dispatch(&frame);
        frame
    }

    /// Advance one frame by a fixed delta (seconds)
    pub fn tick_with(&self, delta_time: f32) -> FrameParams {
        let frame = {
            let mut timing = self.inner.timing.lock();
            timing.frame += 1;
            timing.time += delta_time;
            timing.last_frame = Instant::now();
            FrameParams::new(timing.time, delta_time, timing.frame)
        };
        self.dispatch(&frame);
        frame
    }

    /// Tick at `target_fps` until the returned future is dropped
    pub async fn run(&self, target_fps: u32) {
        let period = Duration::from_secs_f64(1.0 / f64::from(target_fps.max(1)));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            self.tick();
        }
    }

    fn dispatch(&self, frame: &FrameParams) {
        // Snapshot so callbacks may add or drop registrations while running
        let callbacks: Vec<SharedCallback> = self
            .inner
            .callbacks
            .lock()
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in callbacks {
            (callback.lock())(frame);
        }
    }
}

/// Handle for a registered tick callback
pub struct TickRegistration {
    id: u64,
    clock: Weak<ClockInner>,
}

impl Drop for TickRegistration {
    fn drop(&mut self) {
        if let Some(clock) = self.clock.upgrade() {
            clock.remove(self.id);
        }
    }
}

/// The engine's once-per-lifetime registration on a frame clock
pub struct AnimationScheduler {
    clock: FrameClock,
    registration: Mutex<Option<TickRegistration>>,
}

impl AnimationScheduler {
    pub fn new(clock: FrameClock) -> Self {
        Self {
            clock,
            registration: Mutex::new(None),
        }
    }

    /// Register the per-frame callback unless already registered.
    ///
    /// Returns `true` when this call performed the registration.
    pub fn ensure_registered(&self, make_callback: impl FnOnce() -> TickCallback) -> bool {
        let mut registration = self.registration.lock();
        if registration.is_some() {
            return false;
        }
        *registration = Some(self.clock.add(make_callback()));
        true
    }

    pub fn is_registered(&self) -> bool {
        self.registration.lock().is_some()
    }

    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }
}
