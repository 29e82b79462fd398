//! Built-in effects
//!
//! This module contains the standard filter effects that ship with
//! immersive-filters.

mod color;
mod fog;
mod lightning;
mod rain;

pub use color::{ColorDefinition, ColorEffect};
pub use fog::{FogDefinition, FogEffect};
pub use lightning::{LightningDefinition, LightningEffect};
pub use rain::{RainDefinition, RainEffect};

use super::EffectRegistry;

/// Fade ramp duration used when an effect's options don't name one
pub const DEFAULT_FADE_SECONDS: f32 = 2.0;

/// Register all built-in effects with the registry
pub fn register_builtin_effects(registry: &mut EffectRegistry) {
    let results = [
        registry.register(ColorDefinition),
        registry.register(FogDefinition),
        registry.register(LightningDefinition),
        registry.register(RainDefinition),
    ];
    for result in results {
        if let Err(e) = result {
            tracing::warn!("Skipping built-in effect: {}", e);
        }
    }
}
