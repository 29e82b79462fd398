//! Effect traits
//!
//! This module defines the two seams of the effect layer:
//! - `EffectDefinition` - Factory trait, one per effect type, registered with the registry
//! - `FilterEffect` - Live instance contract driven by the engine and the scheduler

use super::teardown::Teardown;
use super::types::{default_options, EffectOptions, ParameterMeta};

/// Per-frame timing handed to `FilterEffect::step`
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameParams {
    /// Time in seconds since the frame clock started
    pub time: f32,
    /// Delta time since the previous frame
    pub delta_time: f32,
    /// Frame counter, starting at 1 for the first tick
    pub frame: u64,
}

impl FrameParams {
    pub fn new(time: f32, delta_time: f32, frame: u64) -> Self {
        Self {
            time,
            delta_time,
            frame,
        }
    }
}

/// A live, animated filter bound to one effect id.
///
/// Instances are created by an [`EffectDefinition`] and are owned by the
/// reconciliation engine. `step()` is called once per rendering frame for as
/// long as the instance is live, including while its exit animation runs.
pub trait FilterEffect: Send {
    /// Effect id this instance is bound to
    fn id(&self) -> &str;

    /// Effect type identifier, matching the definition that built it
    fn effect_type(&self) -> &'static str;

    /// Suppress the fade-in ramp. Only meaningful before the first `play()`.
    fn set_skip_fading(&mut self, skip: bool);

    fn skip_fading(&self) -> bool;

    /// Start or resume the animation.
    ///
    /// Calling this on an already playing instance restarts its steady-state
    /// behaviour and must not allocate a second set of resources.
    fn play(&mut self);

    /// Apply new parameters while keeping ongoing animation state
    fn configure(&mut self, options: &EffectOptions);

    /// Begin teardown. Called at most once per instance.
    fn stop(&mut self) -> Teardown;

    /// Advance exactly one animation frame
    fn step(&mut self, frame: &FrameParams);

    /// Current visible strength (0.0 = invisible), for inspection
    fn strength(&self) -> f32 {
        1.0
    }
}

/// Trait for effect definitions (factory pattern)
///
/// Each effect type implements this trait to provide metadata and create
/// live instances. Definitions are registered with the `EffectRegistry` at
/// startup.
pub trait EffectDefinition: Send + Sync {
    /// Unique identifier for this effect type (e.g., "rain", "fog")
    fn effect_type(&self) -> &'static str;

    /// Human-readable display name (e.g., "Rain", "Fog")
    fn display_name(&self) -> &'static str;

    /// Category for grouping (e.g., "Weather", "Color")
    fn category(&self) -> &'static str;

    /// Parameters this effect understands
    fn parameters(&self) -> Vec<ParameterMeta>;

    /// Option bag holding every parameter's default
    fn default_options(&self) -> EffectOptions {
        default_options(&self.parameters())
    }

    /// Create a live instance for `id` configured with `options`
    fn create(&self, options: &EffectOptions, id: &str) -> Box<dyn FilterEffect>;
}
