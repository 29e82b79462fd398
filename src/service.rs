//! Process-wide filter service
//!
//! Holds at most one engine, bound to the active rendering session. The
//! engine is built lazily when a session becomes ready and torn down when the
//! session resets or another session takes over. Session lifecycle signals
//! arrive as [`SessionEvent`]s from whatever event bus the host uses.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc};

use crate::effects::EffectRegistry;
use crate::engine::{EngineConfig, FilterEngine};
use crate::scheduler::FrameClock;
use crate::session::{Session, SessionId};
use crate::store::{ConfigStore, StoreChange};

/// Session lifecycle signals
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A session finished loading and its surface is ready
    Ready(Session),
    /// The active session is being torn down
    Reset,
    /// The desired state of a session changed in the config store
    DesiredStateChanged(SessionId),
}

pub struct FilterService {
    registry: Arc<EffectRegistry>,
    store: Arc<dyn ConfigStore>,
    clock: FrameClock,
    config: EngineConfig,
    engine: Mutex<Option<FilterEngine>>,
}

impl FilterService {
    pub fn new(registry: Arc<EffectRegistry>, store: Arc<dyn ConfigStore>, clock: FrameClock, config: EngineConfig) -> Self {
        Self {
            registry,
            store,
            clock,
            config,
            engine: Mutex::new(None),
        }
    }

    /// Engine bound to the active session, if any
    pub fn engine(&self) -> Option<FilterEngine> {
        self.engine.lock().clone()
    }

    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    /// Bind (or rebind) the engine to `session` and activate it
    pub async fn on_session_ready(&self, session: Session) -> FilterEngine {
        let engine = self.bind(session);
        engine.on_session_ready().await;
        engine
    }

    fn bind(&self, session: Session) -> FilterEngine {
        let mut slot = self.engine.lock();
        match slot.as_ref() {
            Some(engine) if engine.session().is_same(&session) => engine.clone(),
            _ => {
                if let Some(previous) = slot.take() {
                    tracing::info!(session = %previous.session().id(), "Replacing filter engine of previous session");
                    previous.clear();
                }
                tracing::info!(session = %session.id(), "Creating filter engine");
                let engine = FilterEngine::new(
                    session,
                    self.registry.clone(),
                    self.store.clone(),
                    self.clock.clone(),
                    self.config.clone(),
                );
                *slot = Some(engine.clone());
                engine
            }
        }
    }

    /// Clear and drop the engine of the active session
    pub fn on_session_reset(&self) {
        let Some(engine) = self.engine.lock().take() else {
            return;
        };
        tracing::info!(session = %engine.session().id(), "Session reset, clearing filters");
        engine.on_session_reset();
    }

    /// Reconcile if `session_id` is the active session
    pub async fn on_desired_state_changed(&self, session_id: &SessionId) {
        if let Some(engine) = self.engine_for(session_id) {
            engine.on_desired_state_changed().await;
        }
    }

    /// Schedule a pass if `session_id` is the active session
    pub fn request_update(&self, session_id: &SessionId) {
        if let Some(engine) = self.engine_for(session_id) {
            engine.request_update(false);
        }
    }

    fn engine_for(&self, session_id: &SessionId) -> Option<FilterEngine> {
        let engine = self
            .engine
            .lock()
            .as_ref()
            .filter(|engine| engine.session().id() == session_id)
            .cloned();
        if engine.is_none() {
            tracing::trace!(session = %session_id, "Desired state changed for inactive session");
        }
        engine
    }

    /// Apply one event. Passes are scheduled, not awaited, so a pending
    /// teardown never stalls the event loop.
    pub fn handle_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::Ready(session) => self.bind(session).request_activate(),
            SessionEvent::Reset => self.on_session_reset(),
            SessionEvent::DesiredStateChanged(session_id) => self.request_update(&session_id),
        }
    }

    /// Handle events until every sender is dropped
    pub async fn run(&self, mut events: mpsc::Receiver<SessionEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
        tracing::debug!("Session event channel closed");
    }

    /// Turn store writes to the desired-state key into reconciliation passes.
    /// Returns when the store's change channel closes.
    ///
    /// Notifications that piled up while this task was parked are drained
    /// first and become a single request per session.
    pub async fn watch_store(&self, mut changes: broadcast::Receiver<StoreChange>) {
        let mut closed = false;
        while !closed {
            let mut touched: Vec<SessionId> = Vec::new();
            let mut resync = false;
            let mut next = changes.recv().await;
            loop {
                match next {
                    Ok(change) => {
                        if change.key == self.config.store_key && !touched.contains(&change.session) {
                            touched.push(change.session);
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Missed store change notifications, resynchronizing");
                        resync = true;
                    }
                    Err(RecvError::Closed) => {
                        closed = true;
                        break;
                    }
                }
                next = match changes.try_recv() {
                    Ok(change) => Ok(change),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Lagged(missed)) => Err(RecvError::Lagged(missed)),
                    Err(TryRecvError::Closed) => Err(RecvError::Closed),
                };
            }

            if resync {
                if let Some(engine) = self.engine() {
                    engine.request_update(false);
                }
            } else {
                for session in &touched {
                    self.request_update(session);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::EffectOptions;
    use crate::store::MemoryConfigStore;
    use crate::surface::FilterLayer;

    fn service(store: Arc<MemoryConfigStore>) -> FilterService {
        FilterService::new(
            Arc::new(EffectRegistry::with_builtins()),
            store,
            FrameClock::new(),
            EngineConfig::default(),
        )
    }

    async fn settle(cond: impl Fn() -> bool) {
        for _ in 0..1_000 {
            if cond() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("condition never reached");
    }

    #[tokio::test]
    async fn test_engine_created_lazily_and_reused() {
        let service = service(Arc::new(MemoryConfigStore::new()));
        assert!(service.engine().is_none());

        let layer = Arc::new(FilterLayer::new());
        let first = service.on_session_ready(Session::new("scene", layer.clone())).await;
        let second = service.on_session_ready(Session::new("scene", layer)).await;

        assert!(first.is_scheduler_registered());
        assert_eq!(second.session().id().as_str(), "scene");
        assert_eq!(service.clock().listener_count(), 1);
    }

    #[tokio::test]
    async fn test_new_session_replaces_engine() {
        let store = Arc::new(MemoryConfigStore::new());
        let service = service(store.clone());

        let engine = service
            .on_session_ready(Session::new("one", Arc::new(FilterLayer::new())))
            .await;
        engine
            .add_filter(Some("fog".to_string()), "fog", EffectOptions::new())
            .await
            .unwrap();
        engine.update(false).await;
        assert_eq!(engine.live_ids(), vec!["fog"]);

        let replacement = service
            .on_session_ready(Session::new("two", Arc::new(FilterLayer::new())))
            .await;
        assert!(engine.live_ids().is_empty());
        assert!(replacement.live_ids().is_empty());
        assert_eq!(service.engine().unwrap().session().id().as_str(), "two");
    }

    #[tokio::test]
    async fn test_reset_drops_engine() {
        let service = service(Arc::new(MemoryConfigStore::new()));
        service.handle_event(SessionEvent::Ready(Session::new("scene", Arc::new(FilterLayer::new()))));
        assert!(service.engine().is_some());

        service.handle_event(SessionEvent::Reset);
        assert!(service.engine().is_none());
        settle(|| service.clock().listener_count() == 0).await;
    }

    #[tokio::test]
    async fn test_changes_for_other_sessions_are_ignored() {
        let store = Arc::new(MemoryConfigStore::new());
        let service = service(store.clone());
        let engine = service
            .on_session_ready(Session::new("scene", Arc::new(FilterLayer::new())))
            .await;

        store
            .set(&SessionId::new("elsewhere"), "effects", serde_json::json!({"a": {"type": "rain"}}))
            .await
            .unwrap();
        service.handle_event(SessionEvent::DesiredStateChanged(SessionId::new("elsewhere")));
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(engine.live_ids().is_empty());
    }

    #[tokio::test]
    async fn test_watch_store_drives_updates() {
        let store = Arc::new(MemoryConfigStore::new());
        let service = Arc::new(service(store.clone()));
        let layer = Arc::new(FilterLayer::new());
        let engine = service.on_session_ready(Session::new("scene", layer.clone())).await;

        let watcher = tokio::spawn({
            let service = service.clone();
            let changes = store.subscribe();
            async move { service.watch_store(changes).await }
        });

        engine
            .add_filter(Some("storm".to_string()), "lightning", EffectOptions::new())
            .await
            .unwrap();
        settle(|| engine.live_ids() == vec!["storm"]).await;
        assert_eq!(layer.managed_ids(), vec!["storm"]);

        watcher.abort();
    }

    #[tokio::test]
    async fn test_burst_of_store_writes_runs_one_pass() {
        let store = Arc::new(MemoryConfigStore::new());
        let service = Arc::new(service(store.clone()));
        let engine = service
            .on_session_ready(Session::new("scene", Arc::new(FilterLayer::new())))
            .await;
        let before = engine.passes_started();

        let watcher = tokio::spawn({
            let service = service.clone();
            let changes = store.subscribe();
            async move { service.watch_store(changes).await }
        });

        for id in ["a", "b", "c", "d", "e"] {
            engine
                .add_filter(Some(id.to_string()), "color", EffectOptions::new())
                .await
                .unwrap();
        }
        settle(|| engine.live_ids().len() == 5).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(engine.passes_started(), before + 1);

        watcher.abort();
    }

    #[tokio::test]
    async fn test_events_do_not_wait_for_teardown() {
        let store = Arc::new(MemoryConfigStore::new());
        let service = Arc::new(service(store.clone()));
        let (tx, rx) = mpsc::channel(8);
        let runner = tokio::spawn({
            let service = service.clone();
            async move { service.run(rx).await }
        });

        let session = Session::new("scene", Arc::new(FilterLayer::new()));
        tx.send(SessionEvent::Ready(session.clone())).await.unwrap();
        settle(|| service.engine().is_some_and(|engine| !engine.is_updating())).await;
        let engine = service.engine().unwrap();
        engine
            .add_filter(Some("mist".to_string()), "fog", EffectOptions::new())
            .await
            .unwrap();
        tx.send(SessionEvent::DesiredStateChanged(session.id().clone()))
            .await
            .unwrap();
        settle(|| engine.live_ids() == vec!["mist"]).await;
        service.clock().tick_with(0.5);

        // The fog fade-out needs frames that never come; later events still run
        engine.remove_filter("mist").await.unwrap();
        tx.send(SessionEvent::DesiredStateChanged(session.id().clone()))
            .await
            .unwrap();
        settle(|| engine.is_stopping("mist")).await;
        engine
            .add_filter(Some("rain".to_string()), "rain", EffectOptions::new())
            .await
            .unwrap();
        tx.send(SessionEvent::DesiredStateChanged(session.id().clone()))
            .await
            .unwrap();
        settle(|| engine.live_effect("rain").is_some()).await;

        tx.send(SessionEvent::Reset).await.unwrap();
        drop(tx);
        runner.await.unwrap();
        assert!(service.engine().is_none());
    }

    #[tokio::test]
    async fn test_run_consumes_events() {
        let service = Arc::new(service(Arc::new(MemoryConfigStore::new())));
        let (tx, rx) = mpsc::channel(8);
        let runner = tokio::spawn({
            let service = service.clone();
            async move { service.run(rx).await }
        });

        tx.send(SessionEvent::Ready(Session::new("scene", Arc::new(FilterLayer::new()))))
            .await
            .unwrap();
        tx.send(SessionEvent::Reset).await.unwrap();
        drop(tx);
        runner.await.unwrap();

        assert!(service.engine().is_none());
    }
}
