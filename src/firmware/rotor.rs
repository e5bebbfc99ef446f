//! Rotor observer (C5): quadrature decode, unwrap, and a discrete-time PLL
//! producing smoothed position/velocity (`spec.md` §4.3).

/// `pll_pos`, split into whole counts and a `[0, 1)` fraction so it never
/// loses precision at large accumulated counts (`spec.md` §9: "a corrected
/// reimplementation, not a behavior change").
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PllPos {
    whole: i32,
    frac: f32,
}

impl PllPos {
    pub const fn new(whole: i32) -> Self {
        Self { whole, frac: 0.0 }
    }

    /// Advance by `delta` (counts), renormalising the fraction back into
    /// `[0, 1)` and carrying the remainder into `whole`.
    pub fn advance(&mut self, delta: f32) {
        let sum = self.frac + delta;
        let shift = libm::floorf(sum);
        self.whole = self.whole.wrapping_add(shift as i32);
        self.frac = sum - shift;
    }

    /// `floor(pll_pos)` — exact, since `frac` is always in `[0, 1)`.
    pub fn floor(&self) -> i32 {
        self.whole
    }

    /// Combined value as a single float, for display/cascade consumption
    /// at magnitudes where the precision loss doesn't matter.
    pub fn as_f32(&self) -> f32 {
        self.whole as f32 + self.frac
    }
}

/// `Rotor` owns one encoder's unwrap/PLL state (`spec.md` §3).
pub struct Rotor {
    /// Counts, determined during calibration.
    pub encoder_offset: i32,
    /// Counts per revolution, post-quadrature.
    pub cpr: u32,
    /// `POLE_PAIRS · 2π / CPR`.
    pub elec_rad_per_count: f32,
    /// `+1` or `-1`, determined during calibration.
    pub motor_dir: i8,

    /// 32-bit unwrapped encoder position.
    pub encoder_state: i32,
    last_raw_count: u16,
    raw_initialized: bool,

    pub elec_phase: f32,
    pub pll_pos: PllPos,
    pub pll_vel: f32,
    pub pll_kp: f32,
    pub pll_ki: f32,
}

/// Result of one rotor-observer cycle.
#[derive(Clone, Copy, Debug)]
pub struct RotorSample {
    pub elec_phase: f32,
    pub pll_pos: f32,
    pub pll_vel: f32,
}

impl Rotor {
    pub fn new(cpr: u32, elec_rad_per_count: f32, pll_kp: f32, pll_ki: f32) -> Self {
        Self {
            encoder_offset: 0,
            cpr,
            elec_rad_per_count,
            motor_dir: 1,
            encoder_state: 0,
            last_raw_count: 0,
            raw_initialized: false,
            elec_phase: 0.0,
            pll_pos: PllPos::default(),
            pll_vel: 0.0,
            pll_kp,
            pll_ki,
        }
    }

    pub fn set_calibration(&mut self, offset: i32, motor_dir: i8) {
        self.encoder_offset = offset;
        self.motor_dir = motor_dir;
    }

    pub fn set_pll_gains(&mut self, pll_kp: f32, pll_ki: f32) {
        self.pll_kp = pll_kp;
        self.pll_ki = pll_ki;
    }

    pub fn reset_unwrap(&mut self, raw_count: u16) {
        self.last_raw_count = raw_count;
        self.raw_initialized = true;
        self.encoder_state = 0;
        self.pll_pos = PllPos::new(0);
        self.pll_vel = 0.0;
    }

    /// `spec.md` §4.3, one cycle. `raw_count` is the 16-bit hardware
    /// counter; `dt` is the control period `T`.
    pub fn update(&mut self, raw_count: u16, dt: f32) -> RotorSample {
        if !self.raw_initialized {
            self.reset_unwrap(raw_count);
        }

        let delta = raw_count.wrapping_sub(self.last_raw_count) as i16;
        self.last_raw_count = raw_count;
        self.encoder_state = self.encoder_state.wrapping_add(delta as i32);

        let cpr = self.cpr as i32;
        let wrapped = self.encoder_state.rem_euclid(cpr);
        let corrected = (wrapped - self.encoder_offset) as f32 * self.motor_dir as f32;
        self.elec_phase = wrap_to_2pi(self.elec_rad_per_count * corrected);

        self.pll_pos.advance(dt * self.pll_vel);
        let err = (self.encoder_state - self.pll_pos.floor()) as f32;
        self.pll_pos.advance(dt * self.pll_kp * err);
        self.pll_vel += dt * self.pll_ki * err;

        RotorSample {
            elec_phase: self.elec_phase,
            pll_pos: self.pll_pos.as_f32(),
            pll_vel: self.pll_vel,
        }
    }
}

fn wrap_to_2pi(mut angle: f32) -> f32 {
    const TWO_PI: f32 = 2.0 * core::f32::consts::PI;
    angle %= TWO_PI;
    if angle < 0.0 {
        angle += TWO_PI;
    }
    angle
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pll_pos_advance_carries_into_whole() {
        let mut p = PllPos::new(5);
        p.advance(0.7);
        assert_eq!(p.floor(), 5);
        p.advance(0.7);
        assert_eq!(p.floor(), 6);
    }

    #[test]
    fn pll_pos_advance_handles_negative() {
        let mut p = PllPos::new(0);
        p.advance(-0.3);
        assert_eq!(p.floor(), -1);
        assert!((p.as_f32() - (-0.3)).abs() < 1e-5);
    }

    #[test]
    fn steady_state_zero_velocity_tracks_encoder() {
        let mut rotor = Rotor::new(8192, 2.0 * core::f32::consts::PI * 7.0 / 8192.0, 2000.0, 1_000_000.0);
        let dt = 1.0 / 20_000.0;
        // Stationary encoder: PLL should converge pll_pos to encoder_state
        // within +-1 count and pll_vel toward zero.
        for _ in 0..2000 {
            rotor.update(0, dt);
        }
        assert!((rotor.pll_pos.as_f32() - rotor.encoder_state as f32).abs() <= 1.0);
        assert!(rotor.pll_vel.abs() < 5.0);
    }

    #[test]
    fn wrap_to_2pi_stays_in_range() {
        assert!((0.0..2.0 * core::f32::consts::PI).contains(&wrap_to_2pi(-0.1)));
        assert!((0.0..2.0 * core::f32::consts::PI).contains(&wrap_to_2pi(7.0)));
    }

    #[test]
    fn motor_dir_and_offset_apply_to_phase() {
        let mut rotor = Rotor::new(8192, 2.0 * core::f32::consts::PI / 8192.0, 0.0, 0.0);
        rotor.set_calibration(10, -1);
        rotor.reset_unwrap(0);
        let sample = rotor.update(0, 1.0 / 20_000.0);
        // corrected = (0 - 10) * -1 = 10 counts -> positive phase
        let expected = wrap_to_2pi(2.0 * core::f32::consts::PI / 8192.0 * 10.0);
        assert!((sample.elec_phase - expected).abs() < 1e-4);
    }
}
