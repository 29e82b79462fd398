//! Lightning Effect
//!
//! Random brightness flashes. A flash is triggered on average `frequency`
//! times per ten seconds and decays over a fixed envelope.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::effects::fade::Fade;
use crate::effects::teardown::Teardown;
use crate::effects::traits::{EffectDefinition, FilterEffect, FrameParams};
use crate::effects::types::{EffectOptions, ParameterMeta};

/// Flash decay time in seconds
const FLASH_DECAY: f32 = 0.35;

fn parameters() -> Vec<ParameterMeta> {
    vec![
        ParameterMeta::float("frequency", "Frequency", 5.0, 0.0, 50.0),
        ParameterMeta::float("brightness", "Brightness", 1.3, 1.0, 3.0),
    ]
}

/// Lightning effect definition
pub struct LightningDefinition;

impl EffectDefinition for LightningDefinition {
    fn effect_type(&self) -> &'static str {
        "lightning"
    }

    fn display_name(&self) -> &'static str {
        "Lightning"
    }

    fn category(&self) -> &'static str {
        "Weather"
    }

    fn parameters(&self) -> Vec<ParameterMeta> {
        parameters()
    }

    fn create(&self, options: &EffectOptions, id: &str) -> Box<dyn FilterEffect> {
        Box::new(LightningEffect::new(id, options))
    }
}

/// Live lightning instance
pub struct LightningEffect {
    id: String,
    frequency: f32,
    brightness: f32,
    /// Remaining flash envelope, 1.0 right after a strike
    flash: f32,
    strikes: u64,
    // Lightning has no fade-in ramp, only the stop ramp so flashes end cleanly
    fade: Fade,
    skip_fading: bool,
    rng: StdRng,
}

impl LightningEffect {
    pub fn new(id: &str, options: &EffectOptions) -> Self {
        let mut effect = Self {
            id: id.to_string(),
            frequency: 0.0,
            brightness: 1.0,
            flash: 0.0,
            strikes: 0,
            fade: Fade::new(FLASH_DECAY),
            skip_fading: false,
            rng: StdRng::from_rng(&mut rand::rng()),
        };
        effect.configure(options);
        effect
    }

    /// Current brightness multiplier (1.0 = unchanged)
    pub fn current_brightness(&self) -> f32 {
        1.0 + (self.brightness - 1.0) * self.flash * self.fade.level()
    }

    pub fn strikes(&self) -> u64 {
        self.strikes
    }
}

impl FilterEffect for LightningEffect {
    fn id(&self) -> &str {
        &self.id
    }

    fn effect_type(&self) -> &'static str {
        "lightning"
    }

    fn set_skip_fading(&mut self, skip: bool) {
        self.skip_fading = skip;
    }

    fn skip_fading(&self) -> bool {
        self.skip_fading
    }

    fn play(&mut self) {
        self.fade.play(true);
    }

    fn configure(&mut self, options: &EffectOptions) {
        let params = parameters();
        self.frequency = params[0].read_f32(options);
        self.brightness = params[1].read_f32(options);
    }

    fn stop(&mut self) -> Teardown {
        self.fade.stop()
    }

    fn step(&mut self, frame: &FrameParams) {
        let dt = frame.delta_time.max(0.0);
        self.fade.step(dt);
        self.flash = (self.flash - dt / FLASH_DECAY).max(0.0);

        if self.fade.is_stopping() {
            return;
        }
        let chance = self.frequency / 10.0 * dt;
        if chance > 0.0 && self.rng.random::<f32>() < chance {
            self.flash = 1.0;
            self.strikes += 1;
        }
    }

    fn strength(&self) -> f32 {
        self.fade.level()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lightning_strikes_at_high_frequency() {
        let mut lightning = LightningEffect::new("l1", &EffectOptions::new().with("frequency", 50.0));
        lightning.play();
        // 5 strikes/second expected; 10 seconds of frames
        for n in 1..=600 {
            lightning.step(&FrameParams::new(n as f32 / 60.0, 1.0 / 60.0, n));
        }
        assert!(lightning.strikes() > 0);
    }

    #[test]
    fn test_lightning_never_strikes_at_zero_frequency() {
        let mut lightning = LightningEffect::new("l1", &EffectOptions::new().with("frequency", 0.0));
        lightning.play();
        for n in 1..=120 {
            lightning.step(&FrameParams::new(n as f32 / 60.0, 1.0 / 60.0, n));
        }
        assert_eq!(lightning.strikes(), 0);
        assert_eq!(lightning.current_brightness(), 1.0);
    }
}
