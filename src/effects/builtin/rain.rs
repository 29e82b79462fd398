//! Rain Effect
//!
//! Particle precipitation. Drops spawn along the top edge at a rate driven by
//! density and fall along the configured direction until they leave the
//! surface.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::effects::fade::Fade;
use crate::effects::teardown::Teardown;
use crate::effects::traits::{EffectDefinition, FilterEffect, FrameParams};
use crate::effects::types::{EffectOptions, ParameterMeta};

use super::DEFAULT_FADE_SECONDS;

const MAX_PARTICLES: usize = 400;

fn parameters() -> Vec<ParameterMeta> {
    vec![
        ParameterMeta::float("density", "Density", 0.5, 0.0, 1.0),
        ParameterMeta::float("speed", "Speed", 1.0, 0.1, 5.0),
        ParameterMeta::float("direction", "Direction", 90.0, 0.0, 360.0),
        ParameterMeta::float("fade_seconds", "Fade Time", DEFAULT_FADE_SECONDS, 0.0, 10.0),
    ]
}

/// Rain effect definition
pub struct RainDefinition;

impl EffectDefinition for RainDefinition {
    fn effect_type(&self) -> &'static str {
        "rain"
    }

    fn display_name(&self) -> &'static str {
        "Rain"
    }

    fn category(&self) -> &'static str {
        "Weather"
    }

    fn parameters(&self) -> Vec<ParameterMeta> {
        parameters()
    }

    fn create(&self, options: &EffectOptions, id: &str) -> Box<dyn FilterEffect> {
        Box::new(RainEffect::new(id, options))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct RainSettings {
    density: f32,
    speed: f32,
    /// Fall direction in degrees, 90 = straight down
    direction: f32,
    fade_seconds: f32,
}

impl RainSettings {
    fn from_options(options: &EffectOptions) -> Self {
        let params = parameters();
        Self {
            density: params[0].read_f32(options),
            speed: params[1].read_f32(options),
            direction: params[2].read_f32(options),
            fade_seconds: params[3].read_f32(options),
        }
    }
}

/// CPU-side raindrop state
#[derive(Debug, Clone)]
struct Raindrop {
    x: f32,
    y: f32,
    length: f32,
}

/// Live rain instance
pub struct RainEffect {
    id: String,
    settings: RainSettings,
    fade: Fade,
    skip_fading: bool,
    playing: bool,
    particles: Vec<Raindrop>,
    spawn_accumulator: f32,
    rng: StdRng,
}

impl RainEffect {
    pub fn new(id: &str, options: &EffectOptions) -> Self {
        let settings = RainSettings::from_options(options);
        Self {
            id: id.to_string(),
            fade: Fade::new(settings.fade_seconds),
            settings,
            skip_fading: false,
            playing: false,
            particles: Vec::new(),
            spawn_accumulator: 0.0,
            rng: StdRng::from_rng(&mut rand::rng()),
        }
    }

    /// Number of drops currently simulated
    pub fn particle_count(&self) -> usize {
        self.particles.len()
    }

    fn simulate(&mut self, dt: f32) {
        let dt = dt.clamp(0.0, 0.1);
        let radians = self.settings.direction.to_radians();
        let (vx, vy) = (radians.cos() * self.settings.speed, radians.sin() * self.settings.speed);

        // Stop spawning once the exit ramp has started; existing drops fall out
        if self.playing && !self.fade.is_stopping() {
            self.spawn_accumulator += self.settings.density * 120.0 * dt;
            while self.spawn_accumulator >= 1.0 && self.particles.len() < MAX_PARTICLES {
                self.spawn_accumulator -= 1.0;
                let x = self.rng.random::<f32>();
                let length = 0.01 + self.rng.random::<f32>() * 0.03;
                self.particles.push(Raindrop { x, y: -0.05, length });
            }
            // Don't bank spawns while the buffer is full
            self.spawn_accumulator = self.spawn_accumulator.min(1.0);
        }

        for drop in &mut self.particles {
            drop.x += vx * dt;
            drop.y += vy * dt;
        }
        self.particles
            .retain(|d| d.y - d.length <= 1.0 && d.x >= -0.1 && d.x <= 1.1 && d.y >= -0.2);
    }
}

impl FilterEffect for RainEffect {
    fn id(&self) -> &str {
        &self.id
    }

    fn effect_type(&self) -> &'static str {
        "rain"
    }

    fn set_skip_fading(&mut self, skip: bool) {
        self.skip_fading = skip;
    }

    fn skip_fading(&self) -> bool {
        self.skip_fading
    }

    fn play(&mut self) {
        self.playing = true;
        self.fade.play(self.skip_fading);
    }

    fn configure(&mut self, options: &EffectOptions) {
        self.settings = RainSettings::from_options(options);
        self.fade.set_duration(self.settings.fade_seconds);
    }

    fn stop(&mut self) -> Teardown {
        self.fade.stop()
    }

    fn step(&mut self, frame: &FrameParams) {
        self.fade.step(frame.delta_time);
        self.simulate(frame.delta_time);
    }

    fn strength(&self) -> f32 {
        self.fade.level()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(n: u64) -> FrameParams {
        FrameParams::new(n as f32 / 60.0, 1.0 / 60.0, n)
    }

    #[test]
    fn test_rain_spawns_while_playing() {
        let options = EffectOptions::new().with("density", 1.0);
        let mut rain = RainEffect::new("r1", &options);
        rain.step(&frame(1));
        assert_eq!(rain.particle_count(), 0);

        rain.play();
        for n in 2..30 {
            rain.step(&frame(n));
        }
        assert!(rain.particle_count() > 0);
        assert!(rain.particle_count() <= MAX_PARTICLES);
    }

    #[test]
    fn test_rain_configure_keeps_particles() {
        let mut rain = RainEffect::new("r1", &EffectOptions::new().with("density", 1.0));
        rain.set_skip_fading(true);
        rain.play();
        for n in 1..10 {
            rain.step(&frame(n));
        }
        let before = rain.particle_count();
        assert!(before > 0);

        rain.configure(&EffectOptions::new().with("density", 0.9));
        assert_eq!(rain.particle_count(), before);
        assert_eq!(rain.settings.density, 0.9);
    }

    #[test]
    fn test_rain_skip_fading() {
        let mut rain = RainEffect::new("r1", &EffectOptions::new());
        rain.set_skip_fading(true);
        rain.play();
        assert_eq!(rain.strength(), 1.0);
    }
}
