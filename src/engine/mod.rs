//! Filter reconciliation engine
//!
//! `FilterEngine` keeps the live effect instances of one session in step with
//! the desired state persisted in the config store:
//!
//! - `update()` diffs desired against live state, creates and reconfigures
//!   instances synchronously, then awaits the teardown of removed instances
//!   concurrently. Teardowns run on their own tasks, so a pending one never
//!   holds up later passes
//! - Producers (`add_filter`, `remove_filter`, `switch`, `set_filters`,
//!   `remove_all`) only write the desired state; the next `update()` converges
//! - The animation scheduler steps every live instance once per frame
//!
//! The surface's attachment list is always rebuilt as its external entries
//! followed by one managed entry per live instance.

mod passes;


use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use indexmap::IndexMap;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;

use crate::effects::{
    DesiredState, EffectOptions, EffectRecord, EffectRegistry, FrameParams, Teardown, TeardownError,
};
use crate::scheduler::{AnimationScheduler, FrameClock, TickCallback};
use crate::session::Session;
use crate::store::{ConfigStore, DesiredStateStore, StoreError};
use crate::surface::{splice_managed, EffectHandle, RenderSurface, SurfaceFilter};

use passes::{PassQueue, Ticket};

/// Default config store key holding the desired state
pub const DEFAULT_STORE_KEY: &str = "effects";

/// Errors returned by the desired-state producers
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to persist desired state: {0}")]
    Store(#[from] StoreError),
}

/// Runtime engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Config store key holding the desired state
    pub store_key: String,
    /// Force-remove instances whose teardown has not finished after this long
    pub teardown_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_key: DEFAULT_STORE_KEY.to_string(),
            teardown_timeout: None,
        }
    }
}

struct LiveEntry {
    handle: EffectHandle,
    generation: u64,
    effect_type: &'static str,
    /// `stop()` was called; waiting for teardown to finish
    stopping: bool,
}

#[derive(Default)]
struct LiveState {
    /// Live instances in creation order
    entries: IndexMap<String, LiveEntry>,
    /// Stopping instances whose id was recreated before their teardown
    /// finished. They stay attached and animated until it does.
    retiring: Vec<(String, LiveEntry)>,
    /// Last generation handed out per id. Never reset, so a stale teardown
    /// can always tell it is stale.
    generations: HashMap<String, u64>,
}

impl LiveState {
    fn instances(&self) -> impl Iterator<Item = (&String, &LiveEntry)> {
        self.retiring
            .iter()
            .map(|(id, entry)| (id, entry))
            .chain(self.entries.iter())
    }

    fn managed_filters(&self) -> Vec<SurfaceFilter> {
        self.instances()
            .map(|(id, entry)| SurfaceFilter::Managed {
                id: id.clone(),
                generation: entry.generation,
                effect: entry.handle.clone(),
            })
            .collect()
    }
}

/// A teardown started by a pass
struct PendingTeardown {
    id: String,
    generation: u64,
    teardown: Teardown,
    /// Changes when `clear()` discards the surface
    epoch: watch::Receiver<u64>,
}

enum TeardownOutcome {
    Completed,
    Failed(TeardownError),
    TimedOut(Duration),
    Discarded,
}

/// Counts of what one pass did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub dropped: usize,
}

struct EngineInner {
    session: Session,
    registry: Arc<EffectRegistry>,
    store: DesiredStateStore,
    config: EngineConfig,
    live: Mutex<LiveState>,
    passes: PassQueue,
    /// Passes whose teardowns have not all settled
    unsettled: watch::Sender<BTreeSet<u64>>,
    epoch: watch::Sender<u64>,
    scheduler: AnimationScheduler,
}

impl EngineInner {
    /// Step every live instance once. Entries added or removed while
    /// stepping are picked up on the next frame.
    fn step_all(&self, frame: &FrameParams) {
        let handles: Vec<EffectHandle> = self
            .live
            .lock()
            .instances()
            .map(|(_, entry)| entry.handle.clone())
            .collect();
        for handle in handles {
            handle.lock().step(frame);
        }
    }
}

/// Reconciliation engine for one rendering session
#[derive(Clone)]
pub struct FilterEngine {
    inner: Arc<EngineInner>,
}

impl FilterEngine {
    pub fn new(
        session: Session,
        registry: Arc<EffectRegistry>,
        store: Arc<dyn ConfigStore>,
        clock: FrameClock,
        config: EngineConfig,
    ) -> Self {
        let (epoch, _) = watch::channel(0);
        let (unsettled, _) = watch::channel(BTreeSet::new());
        Self {
            inner: Arc::new(EngineInner {
                session,
                registry,
                store: DesiredStateStore::new(store, config.store_key.clone()),
                config,
                live: Mutex::new(LiveState::default()),
                passes: PassQueue::new(),
                unsettled,
                epoch,
                scheduler: AnimationScheduler::new(clock),
            }),
        }
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<EffectRegistry> {
        &self.inner.registry
    }

    // ---- Entry points ------------------------------------------------------

    /// Session became ready: reconcile without fade-in and start animating
    pub async fn on_session_ready(&self) {
        self.activate().await;
    }

    /// Session is being torn down
    pub fn on_session_reset(&self) {
        self.clear();
    }

    /// The desired state in the config store changed
    pub async fn on_desired_state_changed(&self) {
        self.update(false).await;
    }

    /// Reconcile with fade-in suppressed and make sure the animation
    /// scheduler is registered. Safe to call repeatedly.
    pub async fn activate(&self) {
        self.register_scheduler();
        self.update(true).await;
    }

    /// Like [`activate`](Self::activate) without waiting for the pass
    pub fn request_activate(&self) {
        self.register_scheduler();
        self.request_update(true);
    }

    // Registered before the pass so teardowns started by it can progress
    fn register_scheduler(&self) {
        let weak = Arc::downgrade(&self.inner);
        let registered = self.inner.scheduler.ensure_registered(move || -> TickCallback {
            Box::new(move |frame: &FrameParams| {
                if let Some(inner) = weak.upgrade() {
                    inner.step_all(frame);
                }
            })
        });
        if registered {
            tracing::info!(session = %self.inner.session.id(), "Animation scheduler registered");
        }
    }

    /// Run a reconciliation pass and wait for it, including the teardown of
    /// every instance it removes.
    ///
    /// Passes are serialized per engine. Calls made while a pass is applying
    /// its changes share a single follow-up pass. Teardowns started by earlier
    /// passes are not waited for.
    pub async fn update(&self, skip_fading: bool) {
        let pass = self.request_update(skip_fading);
        self.inner.passes.wait_for(pass).await;
        let mut unsettled = self.inner.unsettled.subscribe();
        // The sender lives as long as the engine
        let _ = unsettled.wait_for(|passes| !passes.contains(&pass)).await;
    }

    /// Schedule a reconciliation pass without waiting for it.
    ///
    /// Returns the number of the pass that will pick up the current desired
    /// state.
    pub fn request_update(&self, skip_fading: bool) -> u64 {
        match self.inner.passes.enter(skip_fading) {
            Ticket::Lead { pass, skip_fading } => {
                let engine = self.clone();
                tokio::spawn(async move { engine.drive(pass, skip_fading) });
                pass
            }
            Ticket::Follow { pass } => {
                tracing::trace!(session = %self.inner.session.id(), pass, "Pass in flight, queued follow-up");
                pass
            }
        }
    }

    fn drive(&self, pass: u64, mut skip_fading: bool) {
        // Releases the queue if an effect panics mid-pass
        let mut driver = self.inner.passes.driver(pass);
        while let Some(pass) = driver.pass() {
            let summary = self.run_pass(pass, skip_fading);
            tracing::debug!(
                session = %self.inner.session.id(),
                pass,
                created = summary.created,
                updated = summary.updated,
                deleted = summary.deleted,
                dropped = summary.dropped,
                "Reconciliation pass applied"
            );
            match driver.finish() {
                Some(skip) => skip_fading = skip,
                None => break,
            }
        }
    }

    /// Apply one pass. Teardowns it starts are handed to
    /// [`track_teardowns`](Self::track_teardowns).
    fn run_pass(&self, pass: u64, skip_fading: bool) -> PassSummary {
        let inner = &self.inner;
        let session_id = inner.session.id();
        let mut summary = PassSummary::default();

        let Some(surface) = inner.session.surface().cloned() else {
            tracing::debug!(session = %session_id, "No render surface, skipping pass");
            return summary;
        };

        let desired = self.recognized(inner.store.load(session_id), &mut summary);

        let pending = {
            let mut live = inner.live.lock();

            // toDelete = live - desired
            let doomed: Vec<String> = live
                .entries
                .iter()
                .filter(|(id, entry)| !entry.stopping && !desired.contains_key(*id))
                .map(|(id, _)| id.clone())
                .collect();

            let mut pending = Vec::with_capacity(doomed.len());
            for id in doomed {
                let Some(entry) = live.entries.get_mut(&id) else {
                    continue;
                };
                entry.stopping = true;
                tracing::debug!(session = %session_id, id = %id, generation = entry.generation, "Stopping effect");
                let teardown = entry.handle.lock().stop();
                pending.push(PendingTeardown {
                    id,
                    generation: entry.generation,
                    teardown,
                    epoch: inner.epoch.subscribe(),
                });
            }
            summary.deleted = pending.len();

            for (id, record) in &desired {
                let existing = live
                    .entries
                    .get(id)
                    .filter(|entry| !entry.stopping)
                    .map(|entry| (entry.handle.clone(), entry.effect_type, entry.generation));

                match existing {
                    // toUpdate = desired & live: reconfigure the same instance
                    Some((handle, live_type, generation)) => {
                        if live_type != record.effect_type {
                            tracing::debug!(
                                session = %session_id,
                                id = %id,
                                from = live_type,
                                to = %record.effect_type,
                                "Effect type changed, reconfiguring existing instance"
                            );
                        }
                        tracing::debug!(session = %session_id, id = %id, generation, "Configuring effect");
                        let mut effect = handle.lock();
                        effect.configure(&record.options);
                        effect.play();
                        summary.updated += 1;
                    }
                    // toCreate = desired - live
                    None => {
                        let Some(mut effect) = inner.registry.create(&record.effect_type, &record.options, id) else {
                            continue;
                        };
                        let generation = {
                            let counter = live.generations.entry(id.clone()).or_insert(0);
                            *counter += 1;
                            *counter
                        };
                        effect.set_skip_fading(skip_fading);
                        effect.play();
                        tracing::debug!(
                            session = %session_id,
                            id = %id,
                            effect_type = %record.effect_type,
                            generation,
                            skip_fading,
                            "Created effect"
                        );

                        let effect_type = effect.effect_type();
                        // A stopping instance under the same id stays attached until its teardown settles
                        if let Some(previous) = live.entries.shift_remove(id) {
                            tracing::debug!(session = %session_id, id = %id, generation = previous.generation, "Retiring superseded effect");
                            live.retiring.push((id.clone(), previous));
                        }
                        live.entries.insert(
                            id.clone(),
                            LiveEntry {
                                handle: EffectHandle::new(effect),
                                generation,
                                effect_type,
                                stopping: false,
                            },
                        );
                        summary.created += 1;
                    }
                }
            }

            surface.set_filters(splice_managed(surface.filters(), live.managed_filters()));
            pending
        };

        if !pending.is_empty() {
            self.track_teardowns(pass, surface, pending);
        }
        summary
    }

    /// Await the teardowns started by `pass` on their own task. `update()`
    /// callers of that pass wait until the pass leaves the unsettled set.
    fn track_teardowns(&self, pass: u64, surface: Arc<dyn RenderSurface>, pending: Vec<PendingTeardown>) {
        self.inner.unsettled.send_modify(|passes| {
            passes.insert(pass);
        });
        let engine = self.clone();
        tokio::spawn(async move {
            join_all(
                pending
                    .into_iter()
                    .map(|teardown| engine.finish_teardown(surface.as_ref(), teardown)),
            )
            .await;
            engine.inner.unsettled.send_modify(|passes| {
                passes.remove(&pass);
            });
        });
    }

    /// Drop records whose type is not registered
    fn recognized(&self, desired: DesiredState, summary: &mut PassSummary) -> DesiredState {
        desired
            .into_iter()
            .filter(|(id, record)| {
                let known = self.inner.registry.contains(&record.effect_type);
                if !known {
                    tracing::warn!(
                        session = %self.inner.session.id(),
                        id = %id,
                        effect_type = %record.effect_type,
                        "Unrecognized effect type, ignoring record"
                    );
                    summary.dropped += 1;
                }
                known
            })
            .collect()
    }

    async fn finish_teardown(&self, surface: &dyn RenderSurface, pending: PendingTeardown) {
        let PendingTeardown {
            id,
            generation,
            teardown,
            mut epoch,
        } = pending;
        let session_id = self.inner.session.id();

        let outcome = tokio::select! {
            outcome = self.await_teardown(teardown) => outcome,
            _ = epoch.changed() => TeardownOutcome::Discarded,
        };

        match outcome {
            TeardownOutcome::Completed => {
                tracing::debug!(session = %session_id, id = %id, generation, "Effect stopped");
            }
            TeardownOutcome::Failed(e) => {
                tracing::warn!(session = %session_id, id = %id, generation, "Teardown failed, removing effect anyway: {}", e);
            }
            TeardownOutcome::TimedOut(after) => {
                tracing::warn!(
                    session = %session_id,
                    id = %id,
                    generation,
                    timeout_ms = after.as_millis() as u64,
                    "Teardown timed out, removing effect"
                );
            }
            TeardownOutcome::Discarded => {
                tracing::debug!(session = %session_id, id = %id, generation, "Surface cleared, teardown discarded");
                return;
            }
        }

        self.remove_instance(surface, &id, generation);
    }

    async fn await_teardown(&self, teardown: Teardown) -> TeardownOutcome {
        let result = match self.inner.config.teardown_timeout {
            Some(limit) => match tokio::time::timeout(limit, teardown).await {
                Ok(result) => result,
                Err(_) => return TeardownOutcome::TimedOut(limit),
            },
            None => teardown.await,
        };
        match result {
            Ok(()) => TeardownOutcome::Completed,
            Err(e) => TeardownOutcome::Failed(e),
        }
    }

    /// Remove the instance (`id`, `generation`) from live state and the
    /// attachment list. A newer instance under the same id is left alone.
    fn remove_instance(&self, surface: &dyn RenderSurface, id: &str, generation: u64) {
        let mut live = self.inner.live.lock();
        if live.entries.get(id).is_some_and(|entry| entry.generation == generation) {
            live.entries.shift_remove(id);
        } else if let Some(index) = live
            .retiring
            .iter()
            .position(|(retired, entry)| retired == id && entry.generation == generation)
        {
            live.retiring.remove(index);
        } else {
            tracing::debug!(session = %self.inner.session.id(), id = %id, generation, "Stale teardown, newer instance kept");
        }

        let filters: Vec<SurfaceFilter> = surface
            .filters()
            .into_iter()
            .filter(|filter| !filter.is_instance(id, generation))
            .collect();
        surface.set_filters(filters);
    }

    /// Stop every live instance and empty live state. Desired state and the
    /// attachment list are left untouched.
    pub fn clear(&self) {
        let drained: Vec<(String, LiveEntry)> = {
            let mut live = self.inner.live.lock();
            live.retiring.clear();
            live.entries.drain(..).collect()
        };
        for (id, entry) in drained {
            if entry.stopping {
                continue;
            }
            tracing::debug!(session = %self.inner.session.id(), id = %id, generation = entry.generation, "Stopping effect on clear");
            // Nobody waits for these; the surface is going away
            drop(entry.handle.lock().stop());
        }
        self.inner.epoch.send_modify(|epoch| *epoch += 1);
    }

    // ---- Desired-state producers --------------------------------------------

    /// Add an effect to the desired state, generating an id when none is given.
    ///
    /// Returns the id written, or `None` when the session has no surface.
    pub async fn add_filter(
        &self,
        id: Option<String>,
        effect_type: &str,
        options: EffectOptions,
    ) -> Result<Option<String>, EngineError> {
        if !self.has_surface() {
            return Ok(None);
        }
        let id = id.unwrap_or_else(new_effect_id);
        let record = EffectRecord::new(effect_type, options);
        self.inner.store.upsert(self.inner.session.id(), &id, &record).await?;
        tracing::debug!(session = %self.inner.session.id(), id = %id, effect_type, "Added filter to desired state");
        Ok(Some(id))
    }

    /// Remove an effect from the desired state
    pub async fn remove_filter(&self, id: &str) -> Result<(), EngineError> {
        if !self.has_surface() {
            return Ok(());
        }
        self.inner.store.remove(self.inner.session.id(), id).await?;
        tracing::debug!(session = %self.inner.session.id(), id = %id, "Removed filter from desired state");
        Ok(())
    }

    /// Toggle an effect: remove `id` if it is present with `effect_type`,
    /// otherwise add it with `options`.
    ///
    /// Returns whether the effect is now part of the desired state.
    pub async fn switch(&self, id: &str, effect_type: &str, options: EffectOptions) -> Result<bool, EngineError> {
        if !self.has_surface() {
            return Ok(false);
        }
        let session_id = self.inner.session.id();
        let present = self
            .inner
            .store
            .get(session_id, id)
            .is_some_and(|record| record.effect_type == effect_type);

        if present {
            self.remove_filter(id).await?;
            Ok(false)
        } else {
            self.add_filter(Some(id.to_string()), effect_type, options).await?;
            Ok(true)
        }
    }

    /// Replace the whole desired state with `records`, each under a fresh id
    pub async fn set_filters(&self, records: Vec<EffectRecord>) -> Result<Vec<String>, EngineError> {
        if !self.has_surface() {
            return Ok(Vec::new());
        }
        let state: BTreeMap<String, EffectRecord> = records
            .into_iter()
            .map(|record| (new_effect_id(), record))
            .collect();
        self.inner.store.replace(self.inner.session.id(), &state).await?;
        tracing::debug!(session = %self.inner.session.id(), count = state.len(), "Replaced desired state");
        Ok(state.into_keys().collect())
    }

    /// Drop the whole desired state
    pub async fn remove_all(&self) -> Result<(), EngineError> {
        if !self.has_surface() {
            return Ok(());
        }
        self.inner.store.clear(self.inner.session.id()).await?;
        tracing::debug!(session = %self.inner.session.id(), "Cleared desired state");
        Ok(())
    }

    /// Current desired state, including records of unknown types
    pub fn desired_state(&self) -> DesiredState {
        self.inner.store.load(self.inner.session.id())
    }

    // ---- Introspection -------------------------------------------------------

    /// Ids in live state, in creation order
    pub fn live_ids(&self) -> Vec<String> {
        self.inner.live.lock().entries.keys().cloned().collect()
    }

    /// Handle to the live instance for `id`
    pub fn live_effect(&self, id: &str) -> Option<EffectHandle> {
        self.inner.live.lock().entries.get(id).map(|entry| entry.handle.clone())
    }

    /// Latest generation handed out for `id`
    pub fn generation(&self, id: &str) -> Option<u64> {
        self.inner.live.lock().generations.get(id).copied()
    }

    /// Whether `id` is waiting for its teardown to finish
    pub fn is_stopping(&self, id: &str) -> bool {
        self.inner
            .live
            .lock()
            .entries
            .get(id)
            .is_some_and(|entry| entry.stopping)
    }

    pub fn is_scheduler_registered(&self) -> bool {
        self.inner.scheduler.is_registered()
    }

    /// Whether a reconciliation pass is in flight
    pub fn is_updating(&self) -> bool {
        self.inner.passes.is_running()
    }

    /// Ids with a superseded instance still running its exit animation
    pub fn retiring_ids(&self) -> Vec<String> {
        self.inner.live.lock().retiring.iter().map(|(id, _)| id.clone()).collect()
    }

    #[cfg(test)]
    pub(crate) fn passes_started(&self) -> u64 {
        self.inner.passes.passes_started()
    }

    fn has_surface(&self) -> bool {
        let present = self.inner.session.surface().is_some();
        if !present {
            tracing::debug!(session = %self.inner.session.id(), "No render surface, ignoring desired-state change");
        }
        present
    }
}

fn new_effect_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
