//! Exposed scalar registry (`spec.md` §6, `SPEC_FULL.md` C13): the typed
//! get/set/monitor table the host command parser reads and writes by
//! `(type, index)`. That parser — and the `g`/`s`/`m`/`o` line syntax
//! itself — is explicitly out of CORE's scope (`spec.md` §1); this module
//! is the CORE-owned storage and indexing the parser would sit on top of,
//! the same role `low_level.c`'s `exposed_floats`/`exposed_ints`/
//! `exposed_bools`/`exposed_uint16` arrays and `monitoring_slots` play
//! there.
//!
//! Layout: a handful of process-wide scalars first (currently just
//! `vbus_voltage`), then one fixed-size block per motor, in motor order.
//! Read-only entries reject `set_*` with [`ScalarAccessError::ReadOnly`].
//!
//! [`ExposedRegistry`] is the named read surface onto a [`GlobalContext`]:
//! a thin borrow a host-facing task can hold instead of the context itself,
//! plus the `defmt::Format` read-only [`RegistrySnapshot`] `SPEC_FULL.md`
//! calls for. Writes go through `GlobalContext`'s own `set_*` methods,
//! which need `&mut` and so don't fit the read-only borrow `ExposedRegistry`
//! wraps.

use crate::firmware::context::GlobalContext;
use crate::firmware::control::cascade::ControlMode;
use crate::firmware::error::FirmwareError;
use crate::firmware::hal::{BrakeChannel, EncoderCounter, GateDriverPort, PwmChannel};

/// Number of `f32` scalars exposed per motor (`spec.md` §6 table).
pub const FLOATS_PER_MOTOR: usize = 28;
/// Number of `int` scalars exposed per motor.
pub const INTS_PER_MOTOR: usize = 4;
/// Number of `bool` scalars exposed per motor.
pub const BOOLS_PER_MOTOR: usize = 4;
/// Number of `uint16` scalars exposed per motor.
pub const UINT16_PER_MOTOR: usize = 2;

/// Process-wide floats that precede the per-motor blocks: `vbus_voltage`.
const GLOBAL_FLOATS: usize = 1;

/// `g`/`s` type tag (`spec.md` §6: "0=float,1=int,2=bool,3=uint16").
#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum ScalarType {
    Float = 0,
    Int = 1,
    Bool = 2,
    Uint16 = 3,
}

/// One read scalar value, typed (the `g`/`o` command's output).
#[derive(Clone, Copy, Debug, defmt::Format)]
pub enum ScalarValue {
    Float(f32),
    Int(i32),
    Bool(bool),
    Uint16(u16),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum ScalarAccessError {
    /// No scalar is registered at this `(type, index)`.
    OutOfRange,
    /// The scalar exists but is read-only (`spec.md` §6 "ro").
    ReadOnly,
}

impl<PWM, ENC, GD, BRK, const N: usize> GlobalContext<PWM, ENC, GD, BRK, N>
where
    PWM: PwmChannel,
    ENC: EncoderCounter,
    GD: GateDriverPort,
    BRK: BrakeChannel,
{
    pub fn get_float(&self, index: usize) -> Result<f32, ScalarAccessError> {
        if index == 0 {
            return Ok(self.vbus.read());
        }
        let (m, field) = motor_field(index - GLOBAL_FLOATS, FLOATS_PER_MOTOR)?;
        let motor = self.motors.get(m).ok_or(ScalarAccessError::OutOfRange)?;
        let sampler = self.current_sampler(m);
        Ok(match field {
            0 => motor.setpoints.position,
            1 => motor.cascade().pos_gain(),
            2 => motor.setpoints.velocity,
            3 => motor.cascade().vel_gain(),
            4 => motor.cascade().vel_integrator_gain(),
            5 => motor.cascade().vel_integrator_current(),
            6 => motor.cascade().vel_limit(),
            7 => motor.setpoints.current,
            8 => motor.motor_config.elec_rad_per_count(),
            9 => motor.phase_inductance,
            10 => motor.phase_resistance,
            11 => motor.last_current_meas().0,
            12 => motor.last_current_meas().1,
            13 => sampler.map(|s| s.dc_offsets().0).unwrap_or(0.0),
            14 => sampler.map(|s| s.dc_offsets().1).unwrap_or(0.0),
            15 => sampler.map(|s| s.shunt_conductance()).unwrap_or(0.0),
            16 => sampler.map(|s| s.rev_gain()).unwrap_or(0.0),
            17 => motor.cascade().current_lim(),
            18 => motor.current_control().p_gain(),
            19 => motor.current_control().i_gain(),
            20 => motor.current_control().vd_int(),
            21 => motor.current_control().vq_int(),
            22 => motor.current_control().i_bus(),
            23 => motor.rotor().elec_phase,
            24 => motor.rotor().pll_pos.as_f32(),
            25 => motor.rotor().pll_vel,
            26 => motor.rotor().pll_kp,
            27 => motor.rotor().pll_ki,
            _ => unreachable!("field index bounded by FLOATS_PER_MOTOR"),
        })
    }

    pub fn set_float(&mut self, index: usize, value: f32) -> Result<(), ScalarAccessError> {
        if index == 0 {
            return Err(ScalarAccessError::ReadOnly); // vbus_voltage
        }
        let (m, field) = motor_field(index - GLOBAL_FLOATS, FLOATS_PER_MOTOR)?;
        if matches!(field, 8 | 9 | 10 | 11 | 12 | 22 | 23) {
            return Err(ScalarAccessError::ReadOnly);
        }

        // DC-cal offsets, shunt conductance and rev gain live on the current
        // sampler, not the motor — handle them against a separate borrow so
        // this never needs to borrow `self` mutably through two accessors
        // at once.
        if matches!(field, 13 | 14 | 15 | 16) {
            let sampler = self
                .current_sampler_mut(m)
                .ok_or(ScalarAccessError::OutOfRange)?;
            match field {
                13 => {
                    let (_, c) = sampler.dc_offsets();
                    sampler.set_dc_offsets(value, c);
                }
                14 => {
                    let (b, _) = sampler.dc_offsets();
                    sampler.set_dc_offsets(b, value);
                }
                15 => sampler.set_shunt_conductance(value),
                16 => sampler.set_rev_gain(value),
                _ => unreachable!("matched above"),
            }
            return Ok(());
        }

        let motor = self.motors.get_mut(m).ok_or(ScalarAccessError::OutOfRange)?;
        match field {
            0 => motor.setpoints.position = value,
            1 => motor.cascade_mut().set_pos_gain(value),
            2 => motor.setpoints.velocity = value,
            3 => motor.cascade_mut().set_vel_gain(value),
            4 => motor.cascade_mut().set_vel_integrator_gain(value),
            5 => motor.cascade_mut().set_vel_integrator_current(value),
            6 => motor.cascade_mut().set_vel_limit(value),
            7 => motor.setpoints.current = value,
            17 => motor.cascade_mut().set_current_lim(value),
            18 => motor.current_control_mut().set_p_gain(value),
            19 => motor.current_control_mut().set_i_gain(value),
            20 => motor.current_control_mut().set_vd_int(value),
            21 => motor.current_control_mut().set_vq_int(value),
            24 => motor.rotor_mut().pll_pos = crate::firmware::rotor::PllPos::new(value as i32),
            25 => motor.rotor_mut().pll_vel = value,
            26 => motor.rotor_mut().pll_kp = value,
            27 => motor.rotor_mut().pll_ki = value,
            _ => unreachable!("read-only and sampler fields filtered above"),
        }
        Ok(())
    }

    pub fn get_int(&self, index: usize) -> Result<i32, ScalarAccessError> {
        let (m, field) = motor_field(index, INTS_PER_MOTOR)?;
        let motor = self.motors.get(m).ok_or(ScalarAccessError::OutOfRange)?;
        Ok(match field {
            0 => motor.mode() as i32,
            1 => motor.rotor().encoder_offset,
            2 => motor.rotor().encoder_state,
            3 => motor.error as i32,
            _ => unreachable!("field index bounded by INTS_PER_MOTOR"),
        })
    }

    pub fn set_int(&mut self, index: usize, value: i32) -> Result<(), ScalarAccessError> {
        let (m, field) = motor_field(index, INTS_PER_MOTOR)?;
        if field == 2 {
            return Err(ScalarAccessError::ReadOnly); // encoder_state
        }
        let motor = self.motors.get_mut(m).ok_or(ScalarAccessError::OutOfRange)?;
        match field {
            0 => motor.set_mode(control_mode_from_i32(value)),
            1 => motor.rotor_mut().encoder_offset = value,
            3 => motor.error = FirmwareError::NoError,
            _ => unreachable!("read-only fields filtered above"),
        }
        Ok(())
    }

    pub fn get_bool(&self, index: usize) -> Result<bool, ScalarAccessError> {
        let (m, field) = motor_field(index, BOOLS_PER_MOTOR)?;
        let motor = self.motors.get(m).ok_or(ScalarAccessError::OutOfRange)?;
        Ok(match field {
            0 => motor.thread_ready,
            1 => motor.flags.enable_control,
            2 => motor.flags.do_calibration,
            3 => motor.calibration_ok,
            _ => unreachable!("field index bounded by BOOLS_PER_MOTOR"),
        })
    }

    pub fn set_bool(&mut self, index: usize, value: bool) -> Result<(), ScalarAccessError> {
        let (m, field) = motor_field(index, BOOLS_PER_MOTOR)?;
        if matches!(field, 0 | 3) {
            return Err(ScalarAccessError::ReadOnly);
        }
        let motor = self.motors.get_mut(m).ok_or(ScalarAccessError::OutOfRange)?;
        match field {
            1 => motor.set_enable_control(value),
            2 => {
                if value {
                    motor.request_calibration();
                } else {
                    motor.flags.do_calibration = false;
                }
            }
            _ => unreachable!("read-only fields filtered above"),
        }
        Ok(())
    }

    pub fn get_uint16(&self, index: usize) -> Result<u16, ScalarAccessError> {
        let (m, field) = motor_field(index, UINT16_PER_MOTOR)?;
        let motor = self.motors.get(m).ok_or(ScalarAccessError::OutOfRange)?;
        Ok(match field {
            0 => motor.control_deadline_counts(),
            1 => motor.last_cpu_time,
            _ => unreachable!("field index bounded by UINT16_PER_MOTOR"),
        })
    }

    pub fn set_uint16(&mut self, index: usize, value: u16) -> Result<(), ScalarAccessError> {
        let (m, field) = motor_field(index, UINT16_PER_MOTOR)?;
        if field == 1 {
            return Err(ScalarAccessError::ReadOnly); // last_cpu_time
        }
        let motor = self.motors.get_mut(m).ok_or(ScalarAccessError::OutOfRange)?;
        motor.set_control_deadline_counts(value);
        Ok(())
    }

    /// Dispatch by runtime [`ScalarType`] tag, for the `g`/`o` command path.
    pub fn get_scalar(&self, ty: ScalarType, index: usize) -> Result<ScalarValue, ScalarAccessError> {
        Ok(match ty {
            ScalarType::Float => ScalarValue::Float(self.get_float(index)?),
            ScalarType::Int => ScalarValue::Int(self.get_int(index)?),
            ScalarType::Bool => ScalarValue::Bool(self.get_bool(index)?),
            ScalarType::Uint16 => ScalarValue::Uint16(self.get_uint16(index)?),
        })
    }

    /// Borrow this context as an [`ExposedRegistry`] — the typed get/set
    /// surface `spec.md` §6's host command interface sits on top of.
    pub fn registry(&self) -> ExposedRegistry<'_, PWM, ENC, GD, BRK, N> {
        ExposedRegistry { ctx: self }
    }
}

/// Read-only view onto a [`GlobalContext`]'s exposed scalars (`spec.md` §6,
/// `SPEC_FULL.md` C13). A thin borrow, not a copy — `get_float`/`get_int`/
/// `get_bool`/`get_uint16`/`get_scalar` just forward to the context's own
/// methods, giving the host command parser one named type to hold onto
/// instead of the context itself. Writes go through `GlobalContext`'s own
/// `set_*` methods directly, since they need `&mut`.
pub struct ExposedRegistry<'a, PWM, ENC, GD, BRK, const N: usize> {
    ctx: &'a GlobalContext<PWM, ENC, GD, BRK, N>,
}

impl<'a, PWM, ENC, GD, BRK, const N: usize> ExposedRegistry<'a, PWM, ENC, GD, BRK, N>
where
    PWM: PwmChannel,
    ENC: EncoderCounter,
    GD: GateDriverPort,
    BRK: BrakeChannel,
{
    pub fn get_float(&self, index: usize) -> Result<f32, ScalarAccessError> {
        self.ctx.get_float(index)
    }

    pub fn get_int(&self, index: usize) -> Result<i32, ScalarAccessError> {
        self.ctx.get_int(index)
    }

    pub fn get_bool(&self, index: usize) -> Result<bool, ScalarAccessError> {
        self.ctx.get_bool(index)
    }

    pub fn get_uint16(&self, index: usize) -> Result<u16, ScalarAccessError> {
        self.ctx.get_uint16(index)
    }

    pub fn get_scalar(&self, ty: ScalarType, index: usize) -> Result<ScalarValue, ScalarAccessError> {
        self.ctx.get_scalar(ty, index)
    }

    /// A `defmt::Format`-derived read-only snapshot of every motor's
    /// headline state, for a future telemetry task (out of CORE's scope
    /// per `spec.md` §1) to log or ship without reaching into `Motor`/
    /// `GlobalContext` internals.
    pub fn snapshot(&self) -> RegistrySnapshot<N> {
        RegistrySnapshot {
            vbus_voltage: self.ctx.vbus.read(),
            motors: self
                .ctx
                .motors
                .iter()
                .map(|m| MotorSnapshot {
                    mode: m.mode(),
                    error: m.error,
                    thread_ready: m.thread_ready,
                    calibration_ok: m.calibration_ok,
                    phase_resistance: m.phase_resistance,
                    phase_inductance: m.phase_inductance,
                })
                .collect(),
        }
    }
}

#[derive(Clone, Copy, Debug, defmt::Format)]
pub struct MotorSnapshot {
    pub mode: ControlMode,
    pub error: FirmwareError,
    pub thread_ready: bool,
    pub calibration_ok: bool,
    pub phase_resistance: f32,
    pub phase_inductance: f32,
}

#[derive(Clone, Debug, defmt::Format)]
pub struct RegistrySnapshot<const N: usize> {
    pub vbus_voltage: f32,
    pub motors: heapless::Vec<MotorSnapshot, N>,
}

fn motor_field(index: usize, fields_per_motor: usize) -> Result<(usize, usize), ScalarAccessError> {
    if fields_per_motor == 0 {
        return Err(ScalarAccessError::OutOfRange);
    }
    Ok((index / fields_per_motor, index % fields_per_motor))
}

fn control_mode_from_i32(value: i32) -> ControlMode {
    match value {
        1 => ControlMode::Velocity,
        2 => ControlMode::Position,
        _ => ControlMode::Current,
    }
}

/// One monitoring binding: `m <type> <index> <slot>` binds scalar
/// `(type, index)` into `slot` (`spec.md` §6); `o <limit>` then samples
/// every bound slot in order.
#[derive(Clone, Copy, Debug)]
struct Binding {
    ty: ScalarType,
    index: usize,
}

/// `spec.md` §3 `MonitoringSlot` / `low_level.c`'s `monitoring_slots[20]`:
/// a fixed-size table of scalar bindings the `m`/`o` commands populate and
/// sample. CORE owns only the storage and sampling; formatting/emitting the
/// `o` output line is the host parser's job (`spec.md` §1).
pub struct MonitoringTable<const SLOTS: usize> {
    slots: [Option<Binding>; SLOTS],
}

impl<const SLOTS: usize> MonitoringTable<SLOTS> {
    pub const fn new() -> Self {
        Self {
            slots: [None; SLOTS],
        }
    }

    /// `m <type> <index> <slot>`.
    pub fn bind(&mut self, slot: usize, ty: ScalarType, index: usize) -> Result<(), ScalarAccessError> {
        let dest = self.slots.get_mut(slot).ok_or(ScalarAccessError::OutOfRange)?;
        *dest = Some(Binding { ty, index });
        Ok(())
    }

    /// `o <limit>`: samples up to `limit` bound slots, in slot order,
    /// skipping unbound ones.
    pub fn sample<PWM, ENC, GD, BRK, const N: usize>(
        &self,
        ctx: &GlobalContext<PWM, ENC, GD, BRK, N>,
        limit: usize,
        out: &mut heapless::Vec<ScalarValue, SLOTS>,
    ) where
        PWM: PwmChannel,
        ENC: EncoderCounter,
        GD: GateDriverPort,
        BRK: BrakeChannel,
    {
        out.clear();
        for binding in self.slots.iter().flatten().take(limit) {
            if let Ok(value) = ctx.get_scalar(binding.ty, binding.index) {
                let _ = out.push(value);
            }
        }
    }
}

impl<const SLOTS: usize> Default for MonitoringTable<SLOTS> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::config::MotorConfig;
    use crate::firmware::control::position::PositionConfig;
    use crate::firmware::control::velocity::VelocityConfig;
    use crate::firmware::current_sense::CurrentSampler;
    use crate::firmware::hal::mock::{MockBrake, MockEncoder, MockGateDriver, MockPwm};
    use crate::firmware::hal::{GateDriverConfig, OcMode, ShuntAmpGain};
    use crate::firmware::motor::{CalibrationParams, Motor};

    fn motor() -> Motor<MockPwm, MockEncoder, MockGateDriver> {
        Motor::new(
            MockPwm::new(4250),
            MockEncoder { count: 0 },
            MockGateDriver {
                config: GateDriverConfig {
                    oc_mode: OcMode::LatchShutdown,
                    oc_threshold: 0.0,
                    shunt_amp_gain: ShuntAmpGain::Gain20VpV,
                },
                enabled: false,
            },
            MotorConfig::default(),
            CalibrationParams {
                i_cal_resistance: 5.0,
                v_max_resistance: 2.0,
                v_lo_inductance: -1.0,
                v_hi_inductance: 1.0,
                i_cal_encoder: 5.0,
            },
            PositionConfig::default(),
            VelocityConfig::default(),
            5.0,
            4250,
        )
    }

    fn context() -> GlobalContext<MockPwm, MockEncoder, MockGateDriver, MockBrake, 1> {
        GlobalContext::new(
            [motor()],
            [CurrentSampler::new(1.0 / 20.0, 0.001)],
            crate::firmware::brake::BrakeChopper::new(
                MockBrake {
                    period: 4250,
                    low_off: 0,
                    high_on: 0,
                    disarm_writes: 0,
                },
                1.0,
                20,
            ),
            4250,
        )
    }

    #[test]
    fn vbus_is_global_and_read_only() {
        let mut ctx = context();
        ctx.on_vbus_sample(24.0);
        assert!((ctx.get_float(0).unwrap() - 24.0).abs() < 1e-4);
        assert_eq!(ctx.set_float(0, 0.0), Err(ScalarAccessError::ReadOnly));
    }

    #[test]
    fn position_setpoint_round_trips() {
        let mut ctx = context();
        // index 1 = global float 0 + motor 0's field 0 (pos_setpoint)
        ctx.set_float(1, 3.5).unwrap();
        assert!((ctx.get_float(1).unwrap() - 3.5).abs() < 1e-6);
    }

    #[test]
    fn phase_resistance_is_read_only() {
        let mut ctx = context();
        // field 9 = phase_resistance
        assert_eq!(ctx.set_float(1 + 9, 0.5), Err(ScalarAccessError::ReadOnly));
    }

    #[test]
    fn encoder_state_is_read_only_but_offset_is_not() {
        let mut ctx = context();
        assert_eq!(ctx.set_int(2, 0), Err(ScalarAccessError::ReadOnly)); // encoder_state
        ctx.set_int(1, 42).unwrap(); // encoder_offset
        assert_eq!(ctx.get_int(1).unwrap(), 42);
    }

    #[test]
    fn control_mode_round_trips_through_int_field() {
        let mut ctx = context();
        ctx.set_int(0, 2).unwrap();
        assert_eq!(ctx.motors[0].mode(), ControlMode::Position);
        assert_eq!(ctx.get_int(0).unwrap(), 2);
    }

    #[test]
    fn do_calibration_bool_requests_calibration() {
        let mut ctx = context();
        ctx.set_bool(2, true).unwrap(); // do_calibration
        assert!(ctx.motors[0].flags.do_calibration);
    }

    #[test]
    fn thread_ready_bool_is_read_only() {
        let mut ctx = context();
        assert_eq!(ctx.set_bool(0, true), Err(ScalarAccessError::ReadOnly));
    }

    #[test]
    fn control_deadline_uint16_round_trips() {
        let mut ctx = context();
        ctx.set_uint16(0, 3000).unwrap();
        assert_eq!(ctx.get_uint16(0).unwrap(), 3000);
        assert_eq!(ctx.set_uint16(1, 0), Err(ScalarAccessError::ReadOnly));
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let ctx = context();
        assert_eq!(
            ctx.get_float(1 + FLOATS_PER_MOTOR),
            Err(ScalarAccessError::OutOfRange)
        );
    }

    #[test]
    fn monitoring_table_samples_bound_slots_in_order() {
        let mut ctx = context();
        ctx.set_float(1, 7.0).unwrap(); // pos_setpoint
        ctx.on_vbus_sample(24.0);

        let mut table: MonitoringTable<20> = MonitoringTable::new();
        table.bind(0, ScalarType::Float, 1).unwrap();
        table.bind(1, ScalarType::Float, 0).unwrap();

        let mut out = heapless::Vec::new();
        table.sample(&ctx, 10, &mut out);
        assert_eq!(out.len(), 2);
        match out[0] {
            ScalarValue::Float(v) => assert!((v - 7.0).abs() < 1e-4),
            _ => panic!("expected float"),
        }
        match out[1] {
            ScalarValue::Float(v) => assert!((v - 24.0).abs() < 1e-4),
            _ => panic!("expected float"),
        }
    }

    #[test]
    fn exposed_registry_forwards_reads_and_snapshots_motor_state() {
        let mut ctx = context();
        ctx.on_vbus_sample(24.0);
        ctx.set_float(1, 3.5).unwrap(); // pos_setpoint

        let registry = ctx.registry();
        assert!((registry.get_float(1).unwrap() - 3.5).abs() < 1e-6);

        let snapshot = registry.snapshot();
        assert!((snapshot.vbus_voltage - 24.0).abs() < 1e-4);
        assert_eq!(snapshot.motors.len(), 1);
        assert_eq!(snapshot.motors[0].mode, ControlMode::Current);
        assert_eq!(snapshot.motors[0].error, FirmwareError::NoError);
        assert!(!snapshot.motors[0].thread_ready);
    }
}
