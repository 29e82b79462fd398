//! Fade ramp shared by the built-in effects
//!
//! A fade scales an effect's visible strength between 0.0 and 1.0. `play()`
//! ramps it up, `stop()` ramps it down and resolves the returned
//! [`Teardown`] from `step()` once the level reaches zero.

use super::teardown::{teardown_pair, Teardown, TeardownHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadePhase {
    /// Not yet played
    Idle,
    FadingIn,
    Steady,
    FadingOut,
    Stopped,
}

#[derive(Debug)]
pub struct Fade {
    level: f32,
    duration: f32,
    phase: FadePhase,
    teardown: Option<TeardownHandle>,
}

impl Fade {
    /// Create a fade with the given ramp duration in seconds
    pub fn new(duration: f32) -> Self {
        Self {
            level: 0.0,
            duration: duration.max(0.0),
            phase: FadePhase::Idle,
            teardown: None,
        }
    }

    pub fn set_duration(&mut self, duration: f32) {
        self.duration = duration.max(0.0);
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn phase(&self) -> FadePhase {
        self.phase
    }

    pub fn is_stopping(&self) -> bool {
        matches!(self.phase, FadePhase::FadingOut | FadePhase::Stopped)
    }

    /// Ramp towards full strength, or jump there when `skip` is set
    pub fn play(&mut self, skip: bool) {
        if self.is_stopping() {
            return;
        }
        if skip || self.duration <= 0.0 {
            self.level = 1.0;
            self.phase = FadePhase::Steady;
        } else if self.level < 1.0 {
            self.phase = FadePhase::FadingIn;
        }
    }

    /// Ramp down to zero. The returned teardown resolves when the ramp ends.
    pub fn stop(&mut self) -> Teardown {
        if self.duration <= 0.0 || self.level <= 0.0 {
            self.level = 0.0;
            self.phase = FadePhase::Stopped;
            return Teardown::ready();
        }
        let (handle, teardown) = teardown_pair();
        self.teardown = Some(handle);
        self.phase = FadePhase::FadingOut;
        teardown
    }

    /// Advance the ramp by `dt` seconds
    pub fn step(&mut self, dt: f32) {
        let delta = if self.duration > 0.0 { dt.max(0.0) / self.duration } else { 1.0 };
        match self.phase {
            FadePhase::FadingIn => {
                self.level = (self.level + delta).min(1.0);
                if self.level >= 1.0 {
                    self.phase = FadePhase::Steady;
                }
            }
            FadePhase::FadingOut => {
                self.level = (self.level - delta).max(0.0);
                if self.level <= 0.0 {
                    self.phase = FadePhase::Stopped;
                    if let Some(handle) = self.teardown.take() {
                        handle.complete();
                    }
                }
            }
            FadePhase::Idle | FadePhase::Steady | FadePhase::Stopped => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;

    #[test]
    fn test_fade_in_ramps_over_duration() {
        let mut fade = Fade::new(1.0);
        fade.play(false);
        assert_eq!(fade.phase(), FadePhase::FadingIn);
        fade.step(0.5);
        assert!((fade.level() - 0.5).abs() < 1e-6);
        fade.step(0.6);
        assert_eq!(fade.level(), 1.0);
        assert_eq!(fade.phase(), FadePhase::Steady);
    }

    #[test]
    fn test_skip_fading_starts_at_full_strength() {
        let mut fade = Fade::new(2.0);
        fade.play(true);
        assert_eq!(fade.level(), 1.0);
        assert_eq!(fade.phase(), FadePhase::Steady);
    }

    #[test]
    fn test_stop_resolves_after_ramp() {
        let mut fade = Fade::new(1.0);
        fade.play(true);
        let mut teardown = fade.stop();
        assert!((&mut teardown).now_or_never().is_none());

        fade.step(0.5);
        assert!((&mut teardown).now_or_never().is_none());

        fade.step(0.5);
        assert_eq!(fade.phase(), FadePhase::Stopped);
        assert_eq!(teardown.now_or_never(), Some(Ok(())));
    }

    #[test]
    fn test_stop_before_play_is_immediate() {
        let mut fade = Fade::new(1.0);
        assert_eq!(fade.stop().now_or_never(), Some(Ok(())));
    }

    #[test]
    fn test_play_while_stopping_is_ignored() {
        let mut fade = Fade::new(1.0);
        fade.play(true);
        let _teardown = fade.stop();
        fade.play(false);
        assert_eq!(fade.phase(), FadePhase::FadingOut);
    }
}
