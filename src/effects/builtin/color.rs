//! Color Effect
//!
//! A static tint. Its only animation is the fade ramp.

use crate::effects::fade::Fade;
use crate::effects::teardown::Teardown;
use crate::effects::traits::{EffectDefinition, FilterEffect, FrameParams};
use crate::effects::types::{EffectOptions, ParameterMeta};

use super::DEFAULT_FADE_SECONDS;

fn parameters() -> Vec<ParameterMeta> {
    vec![
        ParameterMeta::color("color", "Color", [1.0, 1.0, 1.0, 1.0]),
        ParameterMeta::float("strength", "Strength", 1.0, 0.0, 1.0),
        ParameterMeta::float("fade_seconds", "Fade Time", DEFAULT_FADE_SECONDS, 0.0, 10.0),
    ]
}

/// Color effect definition
pub struct ColorDefinition;

impl EffectDefinition for ColorDefinition {
    fn effect_type(&self) -> &'static str {
        "color"
    }

    fn display_name(&self) -> &'static str {
        "Color"
    }

    fn category(&self) -> &'static str {
        "Color"
    }

    fn parameters(&self) -> Vec<ParameterMeta> {
        parameters()
    }

    fn create(&self, options: &EffectOptions, id: &str) -> Box<dyn FilterEffect> {
        Box::new(ColorEffect::new(id, options))
    }
}

/// Live color instance
pub struct ColorEffect {
    id: String,
    color: [f32; 4],
    target_strength: f32,
    fade: Fade,
    skip_fading: bool,
}

impl ColorEffect {
    pub fn new(id: &str, options: &EffectOptions) -> Self {
        let mut effect = Self {
            id: id.to_string(),
            color: [1.0; 4],
            target_strength: 1.0,
            fade: Fade::new(DEFAULT_FADE_SECONDS),
            skip_fading: false,
        };
        effect.configure(options);
        effect
    }

    /// Tint color with the current strength folded into alpha
    pub fn tint(&self) -> [f32; 4] {
        let [r, g, b, a] = self.color;
        [r, g, b, a * self.target_strength * self.fade.level()]
    }
}

impl FilterEffect for ColorEffect {
    fn id(&self) -> &str {
        &self.id
    }

    fn effect_type(&self) -> &'static str {
        "color"
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
        self.color = params[0].read_color(options);
        self.target_strength = params[1].read_f32(options);
        self.fade.set_duration(params[2].read_f32(options));
    }

    fn stop(&mut self) -> Teardown {
        self.fade.stop()
    }

    fn step(&mut self, frame: &FrameParams) {
        self.fade.step(frame.delta_time);
    }

    fn strength(&self) -> f32 {
        self.fade.level()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;

    #[test]
    fn test_color_tint_from_hex() {
        let options = EffectOptions::new().with("color", "#ff0000").with("strength", 0.5);
        let mut color = ColorEffect::new("c1", &options);
        color.set_skip_fading(true);
        color.play();
        assert_eq!(color.tint(), [1.0, 0.0, 0.0, 0.5]);
    }

    #[test]
    fn test_color_stop_waits_for_fade_out() {
        let options = EffectOptions::new().with("fade_seconds", 0.5);
        let mut color = ColorEffect::new("c1", &options);
        color.set_skip_fading(true);
        color.play();

        let mut teardown = color.stop();
        color.step(&FrameParams::new(0.25, 0.25, 1));
        assert!((&mut teardown).now_or_never().is_none());
        color.step(&FrameParams::new(0.5, 0.25, 2));
        assert_eq!(teardown.now_or_never(), Some(Ok(())));
    }
}
