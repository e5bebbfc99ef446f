//! FOC current loop (C6): Clarke → Park → PI(d,q) → saturate → inverse Park
//! → SVM, plus the bus-current estimate the brake chopper consumes
//! (`spec.md` §4.4).

use crate::firmware::math::{clarke, inverse_park, park, svm, SQRT3_BY_2};

/// Modulation-index cap (`spec.md` §3: "`|(mod_d,mod_q)| ≤ 0.80·(√3/2)`").
pub const MODULATION_CAP: f32 = 0.80 * SQRT3_BY_2;
/// Anti-windup decay factor applied to the integrators while saturated.
const INTEGRATOR_DECAY: f32 = 0.99;

#[derive(Clone, Copy, Debug, Default)]
pub struct CurrentControlConfig {
    pub p_gain: f32,
    pub i_gain: f32,
}

/// `spec.md` §3 `CurrentControl` entity.
pub struct CurrentControl {
    config: CurrentControlConfig,
    vd_int: f32,
    vq_int: f32,
    i_bus_est: f32,
}

pub struct FocOutput {
    /// Timer-ready duty fractions `(tA, tB, tC) ∈ [0, 1]`.
    pub duties: (f32, f32, f32),
    /// `m_d·I_d + m_q·I_q`, this motor's contribution to the shared bus
    /// current estimate.
    pub i_bus: f32,
    /// Whether the modulation vector hit the cap this cycle.
    pub limited: bool,
}

impl CurrentControl {
    pub fn new(config: CurrentControlConfig) -> Self {
        Self {
            config,
            vd_int: 0.0,
            vq_int: 0.0,
            i_bus_est: 0.0,
        }
    }

    pub fn set_config(&mut self, config: CurrentControlConfig) {
        self.config = config;
    }

    pub fn reset_integrators(&mut self) {
        self.vd_int = 0.0;
        self.vq_int = 0.0;
    }

    pub fn i_bus(&self) -> f32 {
        self.i_bus_est
    }

    pub fn p_gain(&self) -> f32 {
        self.config.p_gain
    }

    pub fn set_p_gain(&mut self, gain: f32) {
        self.config.p_gain = gain;
    }

    pub fn i_gain(&self) -> f32 {
        self.config.i_gain
    }

    pub fn set_i_gain(&mut self, gain: f32) {
        self.config.i_gain = gain;
    }

    pub fn vd_int(&self) -> f32 {
        self.vd_int
    }

    pub fn set_vd_int(&mut self, value: f32) {
        self.vd_int = value;
    }

    pub fn vq_int(&self) -> f32 {
        self.vq_int
    }

    pub fn set_vq_int(&mut self, value: f32) {
        self.vq_int = value;
    }

    /// One current-loop cycle. `cos_phi`/`sin_phi` come from the rotor's
    /// electrical phase; `dt` is the control period `T`.
    pub fn update(
        &mut self,
        i_d_des: f32,
        i_q_des: f32,
        i_b: f32,
        i_c: f32,
        cos_phi: f32,
        sin_phi: f32,
        v_bus: f32,
        dt: f32,
        period_counts: u16,
    ) -> FocOutput {
        let (i_alpha, i_beta) = clarke(i_b, i_c);
        let (i_d, i_q) = park(i_alpha, i_beta, cos_phi, sin_phi);

        let e_d = i_d_des - i_d;
        let e_q = i_q_des - i_q;

        let v_d = self.vd_int + e_d * self.config.p_gain;
        let v_q = self.vq_int + e_q * self.config.p_gain;

        let v_to_m = 1.0 / ((2.0 / 3.0) * v_bus);
        let mut m_d = v_d * v_to_m;
        let mut m_q = v_q * v_to_m;

        let mag = libm::sqrtf(m_d * m_d + m_q * m_q);
        let limited = mag > MODULATION_CAP;
        if limited {
            let s = MODULATION_CAP / mag;
            m_d *= s;
            m_q *= s;
            self.vd_int *= INTEGRATOR_DECAY;
            self.vq_int *= INTEGRATOR_DECAY;
        } else {
            self.vd_int += e_d * self.config.i_gain * dt;
            self.vq_int += e_q * self.config.i_gain * dt;
        }

        self.i_bus_est = m_d * i_d + m_q * i_q;

        let (m_alpha, m_beta) = inverse_park(m_d, m_q, cos_phi, sin_phi);
        let (ta, tb, tc) = svm(m_alpha, m_beta);
        let p = period_counts as f32;

        FocOutput {
            duties: (
                libm::roundf(ta * p) / p,
                libm::roundf(tb * p) / p,
                libm::roundf(tc * p) / p,
            ),
            i_bus: self.i_bus_est,
            limited,
        }
    }
}

/// Converts a duty fraction to a timer compare count.
pub fn duty_to_counts(duty: f32, period_counts: u16) -> u16 {
    libm::roundf(duty * period_counts as f32) as u16
}

/// Open-loop voltage injection synchronized to an observed (or assumed)
/// electrical phase, with no current feedback (`low_level.c`'s
/// `FOC_voltage_loop`, captured in `SPEC_FULL.md` as a bench diagnostic).
pub fn voltage_test(v_d: f32, v_q: f32, cos_phi: f32, sin_phi: f32, v_bus: f32) -> (f32, f32, f32) {
    let v_to_m = 1.0 / ((2.0 / 3.0) * v_bus);
    let (m_alpha, m_beta) = inverse_park(v_d * v_to_m, v_q * v_to_m, cos_phi, sin_phi);
    svm(m_alpha, m_beta)
}

/// Open-loop voltage sweep at a fixed electrical speed (`low_level.c`'s
/// `scan_motor_loop`), used to verify phase wiring/direction ahead of
/// calibration. Advances its own phase rather than reading the rotor.
pub fn scan_test(phase: f32, scan_voltage: f32, v_bus: f32) -> (f32, f32, f32) {
    let cos_phi = libm::cosf(phase);
    let sin_phi = libm::sinf(phase);
    voltage_test(scan_voltage, 0.0, cos_phi, sin_phi, v_bus)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modulation_stays_under_cap_when_saturating() {
        let mut cc = CurrentControl::new(CurrentControlConfig {
            p_gain: 100.0,
            i_gain: 10.0,
        });
        let out = cc.update(0.0, 1000.0, 0.0, 0.0, 1.0, 0.0, 24.0, 1.0 / 20_000.0, 4250);
        assert!(out.limited);
        let (ta, tb, tc) = out.duties;
        for d in [ta, tb, tc] {
            assert!((0.0..=1.0).contains(&d));
        }
    }

    #[test]
    fn integrators_decay_while_saturated() {
        let mut cc = CurrentControl::new(CurrentControlConfig {
            p_gain: 0.0,
            i_gain: 1000.0,
        });
        // Drive hard enough to saturate for several cycles, then check the
        // integrator magnitude is bounded rather than growing unboundedly.
        for _ in 0..50 {
            cc.update(0.0, 1000.0, 0.0, 0.0, 1.0, 0.0, 24.0, 1.0 / 20_000.0, 4250);
        }
        assert!(cc.vq_int.abs() < 1e6);
    }

    #[test]
    fn zero_error_holds_steady_state() {
        let mut cc = CurrentControl::new(CurrentControlConfig {
            p_gain: 1.0,
            i_gain: 1.0,
        });
        // i_d_des = i_q_des = 0 with zero measured current: no error, no
        // integrator growth, modulation should stay at the origin.
        let out = cc.update(0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 24.0, 1.0 / 20_000.0, 4250);
        assert!(!out.limited);
        assert!((cc.i_bus() - 0.0).abs() < 1e-6);
    }

    #[test]
    fn scan_test_duties_in_range() {
        let (ta, tb, tc) = scan_test(1.23, 1.0, 24.0);
        for d in [ta, tb, tc] {
            assert!((0.0..=1.0).contains(&d));
        }
    }
}
