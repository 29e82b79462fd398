//! Fog Effect
//!
//! A drifting fog layer. Only the drift phase is simulated; how the phase is
//! turned into pixels is up to the render surface.

use crate::effects::fade::Fade;
use crate::effects::teardown::Teardown;
use crate::effects::traits::{EffectDefinition, FilterEffect, FrameParams};
use crate::effects::types::{EffectOptions, ParameterMeta};

use super::DEFAULT_FADE_SECONDS;

fn parameters() -> Vec<ParameterMeta> {
    vec![
        ParameterMeta::float("density", "Density", 0.65, 0.0, 1.0),
        ParameterMeta::float("speed", "Drift Speed", 0.2, 0.0, 2.0),
        ParameterMeta::color("tint", "Tint", [1.0, 1.0, 1.0, 1.0]),
        ParameterMeta::float("fade_seconds", "Fade Time", DEFAULT_FADE_SECONDS, 0.0, 10.0),
    ]
}

/// Fog effect definition
pub struct FogDefinition;

impl EffectDefinition for FogDefinition {
    fn effect_type(&self) -> &'static str {
        "fog"
    }

    fn display_name(&self) -> &'static str {
        "Fog"
    }

    fn category(&self) -> &'static str {
        "Weather"
    }

    fn parameters(&self) -> Vec<ParameterMeta> {
        parameters()
    }

    fn create(&self, options: &EffectOptions, id: &str) -> Box<dyn FilterEffect> {
        Box::new(FogEffect::new(id, options))
    }
}

/// Live fog instance
pub struct FogEffect {
    id: String,
    density: f32,
    speed: f32,
    tint: [f32; 4],
    /// Drift offset, wraps at 1.0
    phase: f32,
    fade: Fade,
    skip_fading: bool,
}

impl FogEffect {
    pub fn new(id: &str, options: &EffectOptions) -> Self {
        let mut fog = Self {
            id: id.to_string(),
            density: 0.0,
            speed: 0.0,
            tint: [1.0; 4],
            phase: 0.0,
            fade: Fade::new(DEFAULT_FADE_SECONDS),
            skip_fading: false,
        };
        fog.configure(options);
        fog
    }

    pub fn phase(&self) -> f32 {
        self.phase
    }

    /// Effective opacity: density scaled by the fade ramp
    pub fn opacity(&self) -> f32 {
        self.density * self.fade.level() * self.tint[3]
    }
}

impl FilterEffect for FogEffect {
    fn id(&self) -> &str {
        &self.id
    }

    fn effect_type(&self) -> &'static str {
        "fog"
    }

    fn set_skip_fading(&mut self, skip: bool) {
        self.skip_fading = skip;
    }

    fn skip_fading(&self) -> bool {
        self.skip_fading
    }

    fn play(&mut self) {
        self.fade.play(self.skip_fading);
    }

    fn configure(&mut self, options: &EffectOptions) {
        let params = parameters();
        self.density = params[0].read_f32(options);
        self.speed = params[1].read_f32(options);
        self.tint = params[2].read_color(options);
        self.fade.set_duration(params[3].read_f32(options));
    }

    fn stop(&mut self) -> Teardown {
        self.fade.stop()
    }

    fn step(&mut self, frame: &FrameParams) {
        self.fade.step(frame.delta_time);
        self.phase = (self.phase + self.speed * frame.delta_time).rem_euclid(1.0);
    }

    fn strength(&self) -> f32 {
        self.fade.level()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fog_phase_survives_configure() {
        let mut fog = FogEffect::new("f1", &EffectOptions::new().with("speed", 0.5));
        fog.set_skip_fading(true);
        fog.play();
        fog.step(&FrameParams::new(0.5, 0.5, 1));
        assert!((fog.phase() - 0.25).abs() < 1e-6);

        fog.configure(&EffectOptions::new().with("speed", 1.0).with("density", 0.2));
        assert!((fog.phase() - 0.25).abs() < 1e-6);
        fog.step(&FrameParams::new(1.0, 0.5, 2));
        assert!((fog.phase() - 0.75).abs() < 1e-6);
        assert!((fog.opacity() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_fog_fades_in() {
        let mut fog = FogEffect::new("f1", &EffectOptions::new().with("fade_seconds", 1.0));
        fog.play();
        assert_eq!(fog.strength(), 0.0);
        fog.step(&FrameParams::new(0.25, 0.25, 1));
        assert!((fog.strength() - 0.25).abs() < 1e-6);
    }
}
