//! Immersive Filters Library
//!
//! Keeps live, animated filter effects on a render surface in step with a
//! persisted declarative description of which effects should be active.

pub mod effects;
pub mod engine;
pub mod scheduler;
pub mod service;
pub mod session;
pub mod settings;
pub mod store;
pub mod surface;
pub mod telemetry;

pub use effects::{DesiredState, EffectOptions, EffectRecord, EffectRegistry, FilterEffect};
pub use engine::{EngineConfig, EngineError, FilterEngine};
pub use scheduler::{AnimationScheduler, FrameClock};
pub use service::{FilterService, SessionEvent};
pub use session::{Session, SessionId};
pub use settings::{EngineSettings, SettingsError};
pub use store::{ConfigStore, DesiredStateStore, MemoryConfigStore, StoreChange, StoreError};
pub use surface::{EffectHandle, FilterLayer, RenderSurface, SurfaceFilter};
