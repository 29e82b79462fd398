//! Filter effects for immersive-filters
//!
//! This module provides the capability layer the reconciliation engine builds
//! on:
//!
//! - **Data types** (`types.rs`): Serializable desired-state records
//!   (EffectRecord, EffectOptions) and parameter metadata
//! - **Traits** (`traits.rs`): `EffectDefinition` factories and the
//!   `FilterEffect` live-instance contract (play/configure/stop/step)
//! - **Teardown** (`teardown.rs`): completion signal returned by `stop()`
//! - **Fade** (`fade.rs`): fade-in/fade-out ramp shared by the built-ins
//! - **Registry** (`registry.rs`): type name -> definition lookup
//! - **Builtin** (`builtin/`): rain, fog, lightning, color
//!
//! # Usage
//!
//! ```
//! use immersive_filters::effects::{EffectOptions, EffectRegistry, FrameParams};
//!
//! let registry = EffectRegistry::with_builtins();
//! let options = EffectOptions::new().with("density", 0.8);
//! let mut rain = registry.create("rain", &options, "storm").unwrap();
//! rain.set_skip_fading(true);
//! rain.play();
//! rain.step(&FrameParams::new(0.016, 0.016, 1));
//! assert_eq!(rain.strength(), 1.0);
//! ```

mod fade;
mod registry;
mod teardown;
mod traits;
mod types;
pub mod builtin;

pub use fade::*;
pub use registry::*;
pub use teardown::*;
pub use traits::*;
pub use types::*;
