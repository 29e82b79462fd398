//! immersive-filters - headless driver
//!
//! Seeds a desired state, starts one session on an in-memory filter layer and
//! runs the frame clock for a while, logging what ends up attached.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use immersive_filters::effects::{DesiredState, EffectRegistry};
use immersive_filters::scheduler::FrameClock;
use immersive_filters::service::FilterService;
use immersive_filters::session::{Session, SessionId};
use immersive_filters::settings::EngineSettings;
use immersive_filters::store::{DesiredStateStore, MemoryConfigStore};
use immersive_filters::surface::FilterLayer;
use immersive_filters::telemetry::{init_logging, LogConfig};

#[derive(Parser, Debug)]
#[command(name = "immersive-filters")]
#[command(version, about, long_about = None)]
struct Args {
    /// Desired state to start from: JSON object of id -> {type, options}
    #[arg(long, value_name = "FILE")]
    state: Option<PathBuf>,

    /// Settings XML (defaults to the config directory)
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// How long to run the frame clock
    #[arg(long, default_value_t = 5.0)]
    seconds: f64,

    /// Session id the desired state is stored under
    #[arg(long, default_value = "main")]
    session: String,

    /// Write the config store to this JSON file on exit
    #[arg(long, value_name = "FILE")]
    snapshot: Option<PathBuf>,

    /// Also log to this file
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let settings = match &args.settings {
        Some(path) => EngineSettings::load_from_file(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => EngineSettings::load(),
    };

    let log_config = LogConfig {
        file_enabled: args.log_file.is_some(),
        file_path: args.log_file.clone(),
        default_level: settings.log_level.clone(),
        ..LogConfig::default()
    };
    let _log_guard = init_logging(&log_config)?;

    let run_for = Duration::try_from_secs_f64(args.seconds).context("--seconds must be a finite, non-negative number")?;
    let session_id = SessionId::new(args.session.clone());
    let store = Arc::new(MemoryConfigStore::new());

    if let Some(path) = &args.state {
        let contents = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        let state: DesiredState = serde_json::from_str(&contents).with_context(|| format!("invalid desired state in {}", path.display()))?;
        info!(effects = state.len(), path = %path.display(), "Seeding desired state");
        DesiredStateStore::new(store.clone(), settings.store_key.clone())
            .replace(&session_id, &state)
            .await?;
    }

    let clock = FrameClock::new();
    let service = Arc::new(FilterService::new(
        Arc::new(EffectRegistry::with_builtins()),
        store.clone(),
        clock.clone(),
        settings.engine_config(),
    ));

    let watcher = tokio::spawn({
        let service = service.clone();
        let changes = store.subscribe();
        async move { service.watch_store(changes).await }
    });

    let layer = Arc::new(FilterLayer::new());
    let engine = service.on_session_ready(Session::new(session_id.clone(), layer.clone())).await;
    info!(session = %session_id, live = ?engine.live_ids(), fps = settings.target_fps, "Session ready");

    // The clock only stops when the timeout drops it
    let _ = tokio::time::timeout(run_for, clock.run(settings.target_fps)).await;

    for label in layer.labels() {
        info!(filter = %label, "Attached");
    }
    for id in engine.live_ids() {
        if let Some(handle) = engine.live_effect(&id) {
            let effect = handle.lock();
            info!(id = %id, effect_type = effect.effect_type(), strength = effect.strength(), "Live effect");
        }
    }

    service.on_session_reset();
    watcher.abort();

    if let Some(path) = &args.snapshot {
        store.save_snapshot(path)?;
        info!(path = %path.display(), "Saved store snapshot");
    }

    Ok(())
}
