//! Brake-resistor chopper (C9): sinks regenerated bus current through a
//! complementary-PWM switched resistor (`spec.md` §4.7).

use crate::firmware::hal::BrakeChannel;

/// Clamp on brake duty, leaving headroom for the bootstrap capacitor to
/// recharge (`spec.md` §4.7).
pub const BRAKE_DUTY_MAX: f32 = 0.9;

pub struct BrakeChopper<B> {
    channel: B,
    r_brake: f32,
    deadtime_counts: u16,
}

impl<B: BrakeChannel> BrakeChopper<B> {
    pub fn new(channel: B, r_brake: f32, deadtime_counts: u16) -> Self {
        Self {
            channel,
            r_brake,
            deadtime_counts,
        }
    }

    /// One update. `i_brake` is the desired sink current (negative values —
    /// net regeneration below zero — clamp to no sink). Returns the applied
    /// duty.
    ///
    /// Race-safe per `spec.md` §4.7: disarms (`ch3=0, ch4=P+1`) before
    /// writing the real pair, so an interrupt landing mid-update can never
    /// observe a shoot-through combination.
    pub fn update(&mut self, i_brake: f32, v_bus: f32) -> f32 {
        let i_brake = i_brake.max(0.0);
        let duty = (i_brake * self.r_brake / v_bus).clamp(0.0, BRAKE_DUTY_MAX);

        let period = self.channel.period_counts();
        let high_on = libm::roundf(period as f32 * (1.0 - duty)) as u16;
        let low_off = high_on.saturating_sub(self.deadtime_counts);

        self.channel.set_timings(0, period.saturating_add(1));
        self.channel.set_timings(low_off, high_on);

        duty
    }

    /// `spec.md` §5 "Global fault": drives brake duty to 0 immediately.
    pub fn force_off(&mut self) {
        self.update(0.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::hal::mock::MockBrake;

    fn chopper() -> BrakeChopper<MockBrake> {
        BrakeChopper::new(
            MockBrake {
                period: 4250,
                low_off: 0,
                high_on: 0,
                disarm_writes: 0,
            },
            1.0,
            20,
        )
    }

    #[test]
    fn negative_current_yields_zero_duty() {
        let mut c = chopper();
        let duty = c.update(-5.0, 24.0);
        assert_eq!(duty, 0.0);
    }

    #[test]
    fn duty_clamps_to_max() {
        let mut c = chopper();
        let duty = c.update(1000.0, 24.0);
        assert!((duty - BRAKE_DUTY_MAX).abs() < 1e-6);
    }

    #[test]
    fn update_disarms_before_arming() {
        let mut c = chopper();
        c.update(5.0, 24.0);
        // two set_timings calls per update: disarm, then the real pair.
        assert_eq!(c.channel.disarm_writes, 2);
    }

    #[test]
    fn duty_scales_with_current() {
        let mut c = chopper();
        let duty = c.update(2.4, 24.0);
        assert!((duty - 0.1).abs() < 1e-3);
    }
}
