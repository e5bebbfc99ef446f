//! Compile-time board/motor configuration.
//!
//! `spec.md` §9: "the spec is written for N motors with N ≥ 1; an
//! implementation should validate N against compile-time configuration and
//! reject inconsistencies" — `NUM_MOTORS` is that N, checked against the
//! board's wired resource count in `GlobalContext::new`.

pub const SYSCLK_HZ: u32 = 170_000_000;
pub const HEARTBEAT_PERIOD_SECS: u64 = 1;

/// Number of motors this board wires up. Each entry in `GlobalContext`'s
/// motor array corresponds 1:1 to a PWM timer / encoder timer / gate driver
/// triple configured in `firmware::system`.
pub const NUM_MOTORS: usize = 1;

/// PWM carrier frequency (`spec.md` §4.1 "identical period P").
pub const PWM_FREQ_HZ: u32 = 20_000;
/// Control period `T`, one PWM half-cycle (current sampled twice per
/// carrier period at top and bottom).
pub const CONTROL_PERIOD_S: f32 = 1.0 / (PWM_FREQ_HZ as f32);
/// Timer counts per PWM half-period, `P` throughout `spec.md`. Derived from
/// `SYSCLK_HZ` for a center-aligned timer counting at the full core clock.
pub const PWM_PERIOD_COUNTS: u16 = (SYSCLK_HZ / PWM_FREQ_HZ / 2) as u16;

/// Timing orchestrator's log ring size (`spec.md` §4.1 "ring of size
/// TIMING_LOG_SIZE").
pub const TIMING_LOG_SIZE: usize = 32;

/// Per-motor static configuration, known at boot and never mutated.
#[derive(Clone, Copy, Debug)]
pub struct MotorConfig {
    pub pole_pairs: u8,
    /// Counts per revolution, post-quadrature (`spec.md` glossary: "CPR =
    /// 4·lines").
    pub encoder_cpr: u32,
}

impl MotorConfig {
    pub const fn default() -> Self {
        Self {
            pole_pairs: 7,
            encoder_cpr: 4 * 2048,
        }
    }

    /// `elec_rad_per_count = POLE_PAIRS · 2π / ENCODER_CPR` (`spec.md` §3).
    pub fn elec_rad_per_count(&self) -> f32 {
        self.pole_pairs as f32 * 2.0 * core::f32::consts::PI / self.encoder_cpr as f32
    }
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self::default()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct EncoderConfig {
    pub resolution_bits: u8,
}

impl EncoderConfig {
    pub const fn quadrature_16bit() -> Self {
        Self { resolution_bits: 16 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elec_rad_per_count_matches_formula() {
        let cfg = MotorConfig {
            pole_pairs: 7,
            encoder_cpr: 8192,
        };
        let expected = 7.0 * 2.0 * core::f32::consts::PI / 8192.0;
        assert!((cfg.elec_rad_per_count() - expected).abs() < 1e-6);
    }

    #[test]
    fn pwm_period_nonzero() {
        assert!(PWM_PERIOD_COUNTS > 0);
    }
}
