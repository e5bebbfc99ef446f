//! Per-motor aggregator (`spec.md` §3 `Motor` entity): owns one motor's
//! algorithm state — rotor observer, current loop, outer cascade,
//! calibration engine, supervisor — plus the hardware handles (PWM,
//! encoder, gate driver) it exclusively owns. Cross-motor concerns
//! (timing orchestrator, the shared brake chopper, `vbus_voltage`) live one
//! level up in `context::GlobalContext`, which also hosts the current
//! sampler feeding `step`'s `i_b`/`i_c` inputs — sampling happens in the
//! ADC IRQ, a single-writer field split this module does not own
//! (`spec.md` §5).

use crate::firmware::calibration::{
    derive_gains, DerivedGains, EncoderOffsetCalib, EncoderOffsetResult, InductanceCalib,
    ResistanceCalib,
};
use crate::firmware::config::MotorConfig;
use crate::firmware::control::cascade::{Cascade, ControlMode, Setpoints};
use crate::firmware::control::position::PositionConfig;
use crate::firmware::control::velocity::VelocityConfig;
use crate::firmware::current_control::{self, CurrentControl, CurrentControlConfig};
use crate::firmware::error::FirmwareError;
use crate::firmware::hal::{GateDriverConfig, GateDriverPort, PwmChannel};
use crate::firmware::math::clarke;
use crate::firmware::rotor::Rotor;
use crate::firmware::supervisor::{SupervisorFlags, SupervisorState};

/// Calibration hyperparameters taken verbatim from `spec.md` §4.6.
#[derive(Clone, Copy, Debug)]
pub struct CalibrationParams {
    pub i_cal_resistance: f32,
    pub v_max_resistance: f32,
    pub v_lo_inductance: f32,
    pub v_hi_inductance: f32,
    pub i_cal_encoder: f32,
}

enum CalibrationStage {
    Resistance(ResistanceCalib),
    Inductance(f32, InductanceCalib),
    EncoderOffset(f32, f32, EncoderOffsetCalib),
}

pub struct CalibrationResult {
    pub resistance: f32,
    pub inductance: f32,
    pub encoder_offset: i32,
    pub motor_dir: i8,
    pub gains: DerivedGains,
}

/// Sequences the three calibration phases (C8) and derives control gains
/// once all three complete (`spec.md` §4.6).
struct CalibrationEngine {
    stage: CalibrationStage,
    params: CalibrationParams,
}

impl CalibrationEngine {
    fn new(params: CalibrationParams, period_s: f32) -> Self {
        Self {
            stage: CalibrationStage::Resistance(ResistanceCalib::new(
                params.i_cal_resistance,
                params.v_max_resistance,
                period_s,
            )),
            params,
        }
    }

    /// (alpha-axis phase, voltage magnitude) to command this cycle.
    fn applied(&self) -> (f32, f32) {
        match &self.stage {
            CalibrationStage::Resistance(r) => (0.0, r.applied_voltage()),
            CalibrationStage::Inductance(_, i) => (0.0, i.applied_voltage()),
            CalibrationStage::EncoderOffset(.., e) => e.applied(),
        }
    }

    fn step(
        &mut self,
        i_alpha: f32,
        encoder_state: i32,
        period_s: f32,
    ) -> Option<Result<CalibrationResult, FirmwareError>> {
        match &mut self.stage {
            CalibrationStage::Resistance(r) => match r.step(i_alpha, period_s) {
                Ok(Some(resistance)) => {
                    self.stage = CalibrationStage::Inductance(
                        resistance,
                        InductanceCalib::new(self.params.v_lo_inductance, self.params.v_hi_inductance),
                    );
                    None
                }
                Ok(None) => None,
                Err(e) => Some(Err(e)),
            },
            CalibrationStage::Inductance(resistance, i) => match i.step(i_alpha, period_s) {
                Some(Ok(inductance)) => {
                    let resistance = *resistance;
                    self.stage = CalibrationStage::EncoderOffset(
                        resistance,
                        inductance,
                        EncoderOffsetCalib::new(self.params.i_cal_encoder, resistance, period_s),
                    );
                    None
                }
                Some(Err(e)) => Some(Err(e)),
                None => None,
            },
            CalibrationStage::EncoderOffset(resistance, inductance, e) => {
                match e.step(encoder_state) {
                    Some(Ok(EncoderOffsetResult { offset, motor_dir })) => {
                        match derive_gains(*resistance, *inductance, period_s) {
                            Ok(gains) => Some(Ok(CalibrationResult {
                                resistance: *resistance,
                                inductance: *inductance,
                                encoder_offset: offset,
                                motor_dir,
                                gains,
                            })),
                            Err(e) => Some(Err(e)),
                        }
                    }
                    Some(Err(e)) => Some(Err(e)),
                    None => None,
                }
            }
        }
    }
}

/// `spec.md` §3 `Motor` entity, generic over the hardware capabilities it
/// owns so the algorithm core stays host-testable against `hal::mock`.
pub struct Motor<PWM, ENC, GD> {
    pwm: PWM,
    encoder: ENC,
    gate_driver: GD,
    pub motor_config: MotorConfig,

    rotor: Rotor,
    current_control: CurrentControl,
    cascade: Cascade,

    pub setpoints: Setpoints,
    pub state: SupervisorState,
    pub flags: SupervisorFlags,
    pub enable_step_dir: bool,
    pub calibration_ok: bool,
    pub error: FirmwareError,
    control_deadline_counts: u16,

    /// Set once this motor's worker has run its first `step` (`spec.md`
    /// §3 `thread_ready`, exposed read-only through `monitoring`).
    pub thread_ready: bool,
    /// Measured phase resistance/inductance, latched by a successful
    /// calibration run (`spec.md` §3 Motor entity); read-only through
    /// `monitoring`.
    pub phase_resistance: f32,
    pub phase_inductance: f32,
    /// DC-compensated phase currents from the most recently completed
    /// control cycle, kept only for `monitoring` readback — the control
    /// path itself takes `i_b`/`i_c` as `step` arguments, never this copy.
    last_current_meas: (f32, f32),
    /// PWM timer count observed at the last `step` call (`spec.md` §3
    /// `last_cpu_time`), exposed read-only through `monitoring`.
    pub last_cpu_time: u16,

    calibration: Option<CalibrationEngine>,
    calibration_params: CalibrationParams,

    /// Last duty cycle queued for commit (`spec.md` §3 `next_timings`).
    pub next_timings: [u16; 3],
}

impl<PWM: PwmChannel, ENC: crate::firmware::hal::EncoderCounter, GD: GateDriverPort>
    Motor<PWM, ENC, GD>
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pwm: PWM,
        encoder: ENC,
        gate_driver: GD,
        motor_config: MotorConfig,
        calibration_params: CalibrationParams,
        position: PositionConfig,
        velocity: VelocityConfig,
        current_lim: f32,
        control_deadline_counts: u16,
    ) -> Self {
        let elec_rad_per_count = motor_config.elec_rad_per_count();
        Self {
            pwm,
            encoder,
            gate_driver,
            motor_config,
            rotor: Rotor::new(motor_config.encoder_cpr, elec_rad_per_count, 0.0, 0.0),
            current_control: CurrentControl::new(CurrentControlConfig::default()),
            cascade: Cascade::new(position, velocity, current_lim),
            setpoints: Setpoints::default(),
            state: SupervisorState::Idle,
            flags: SupervisorFlags::default(),
            enable_step_dir: false,
            calibration_ok: false,
            error: FirmwareError::NoError,
            control_deadline_counts,
            thread_ready: false,
            phase_resistance: 0.0,
            phase_inductance: 0.0,
            last_current_meas: (0.0, 0.0),
            last_cpu_time: 0,
            calibration: None,
            calibration_params,
            next_timings: [0; 3],
        }
    }

    pub fn request_calibration(&mut self) {
        self.flags.do_calibration = true;
    }

    pub fn set_enable_control(&mut self, enable: bool) {
        self.flags.enable_control = enable;
    }

    pub fn set_mode(&mut self, mode: ControlMode) {
        self.cascade.set_mode(mode);
    }

    pub fn mode(&self) -> ControlMode {
        self.cascade.mode
    }

    /// Read access to the rotor observer, for `monitoring`'s `g`/`o`
    /// readback of phase/PLL state.
    pub fn rotor(&self) -> &Rotor {
        &self.rotor
    }

    /// Write access to the rotor observer, for `monitoring`'s `s` writes to
    /// `pll_pos`/`pll_vel`/`pll_kp`/`pll_ki`/`encoder_offset` (`spec.md`
    /// §6). Bypasses `set_calibration`/`set_pll_gains` deliberately — those
    /// exist for the calibration engine's own use, not for the scalar
    /// registry's single-field writes.
    pub fn rotor_mut(&mut self) -> &mut Rotor {
        &mut self.rotor
    }

    pub fn cascade(&self) -> &Cascade {
        &self.cascade
    }

    pub fn cascade_mut(&mut self) -> &mut Cascade {
        &mut self.cascade
    }

    pub fn current_control(&self) -> &CurrentControl {
        &self.current_control
    }

    pub fn current_control_mut(&mut self) -> &mut CurrentControl {
        &mut self.current_control
    }

    pub fn control_deadline_counts(&self) -> u16 {
        self.control_deadline_counts
    }

    pub fn set_control_deadline_counts(&mut self, counts: u16) {
        self.control_deadline_counts = counts;
    }

    /// Last `(I_b, I_c)` pair `step` ran with, for `monitoring` readback
    /// only (`spec.md` §3 `current_meas`).
    pub fn last_current_meas(&self) -> (f32, f32) {
        self.last_current_meas
    }

    /// Copies this motor's queued timings into its hardware compare
    /// registers. Called only from the ADC IRQ trampoline at the cross-cycle
    /// commit point the timing orchestrator identifies (`spec.md` §4.1).
    pub fn commit_timings(&mut self) {
        self.pwm.commit_timings();
    }

    /// Read access to the underlying PWM channel, for tests that need to
    /// observe the live compare registers rather than `next_timings`'
    /// queued-side copy.
    pub fn pwm(&self) -> &PWM {
        &self.pwm
    }

    /// Current PWM timer count, read by the worker right before calling
    /// `step` so it can pass an up-to-date `elapsed_counts` for the
    /// control-deadline check (`spec.md` §4.4 step 10).
    pub fn pwm_count(&self) -> u16 {
        self.pwm.count_and_direction().0
    }

    /// Count and count-direction, for the ADC IRQ trampoline's timing
    /// classification (`spec.md` §4.1).
    pub fn pwm_count_and_direction(&self) -> (u16, bool) {
        self.pwm.count_and_direction()
    }

    /// The worker's `PH_CURRENT_MEAS` wait timed out — the ADC IRQ never
    /// published a fresh pair this cycle. Latches the per-motor timeout
    /// error and disables this motor's outputs immediately; the next
    /// `step` call drives the supervisor into `Fault` the same way a
    /// timing overrun does.
    pub fn raise_measurement_timeout(&mut self) {
        self.error = FirmwareError::FocMeasurementTimeout;
        self.pwm.disable_outputs();
        self.state = SupervisorState::after_running(self.error, &self.flags);
    }

    /// `spec.md` §5 "Global fault": forces outputs off immediately,
    /// independent of the supervisor's own state-machine polling cadence.
    pub fn force_disable(&mut self) {
        self.pwm.disable_outputs();
        self.flags.enable_control = false;
        self.calibration_ok = false;
    }

    /// `spec.md` §6: write the gate-driver SPI image and read it back for
    /// verification.
    pub fn configure_gate_driver(
        &mut self,
        config: &GateDriverConfig,
    ) -> Result<GateDriverConfig, FirmwareError> {
        self.gate_driver.enable();
        self.gate_driver.write_config(config)?;
        self.gate_driver.read_config()
    }

    /// One control cycle, invoked by this motor's worker task on its
    /// `PH_CURRENT_MEAS` signal (`spec.md` §4.8). `i_b`/`i_c` are
    /// DC-compensated phase currents sampled by the ADC IRQ; `elapsed_counts`
    /// is the PWM timer count read back right after queuing duties, checked
    /// against `control_deadline_counts` (`spec.md` §4.4 step 10).
    ///
    /// Returns this motor's bus-current contribution for the shared brake
    /// chopper (`spec.md` §4.4 step 7); zero outside `Running`.
    pub fn step(&mut self, i_b: f32, i_c: f32, v_bus: f32, dt: f32, elapsed_counts: u16) -> f32 {
        self.thread_ready = true;
        self.last_current_meas = (i_b, i_c);
        self.last_cpu_time = elapsed_counts;

        let raw_count = self.encoder.count();
        let sample = self.rotor.update(raw_count, dt);

        match self.state {
            SupervisorState::Idle => {
                self.pwm.disable_outputs();
                self.queue_duties(0.5, 0.5, 0.5);
                self.state = SupervisorState::from_idle(&self.flags);
                match self.state {
                    SupervisorState::Calibrating => {
                        self.calibration = Some(CalibrationEngine::new(self.calibration_params, dt));
                        self.pwm.enable_outputs();
                    }
                    SupervisorState::Running => {
                        self.cascade.reset_integrator();
                        self.current_control.reset_integrators();
                        self.enable_step_dir = true;
                        self.pwm.enable_outputs();
                    }
                    _ => {}
                }
                0.0
            }
            SupervisorState::Calibrating => {
                let (i_alpha, _) = clarke(i_b, i_c);
                let engine = self
                    .calibration
                    .as_mut()
                    .expect("Calibrating state without a live calibration engine");
                let result = engine.step(i_alpha, self.rotor.encoder_state, dt);
                let (phase, magnitude) = engine.applied();
                let (ta, tb, tc) = current_control::scan_test(phase, magnitude, v_bus);
                self.queue_duties(ta, tb, tc);

                match result {
                    None => {}
                    Some(Ok(calib)) => {
                        self.rotor.set_calibration(calib.encoder_offset, calib.motor_dir);
                        self.rotor.set_pll_gains(calib.gains.pll_kp, calib.gains.pll_ki);
                        self.current_control.set_config(CurrentControlConfig {
                            p_gain: calib.gains.current_kp,
                            i_gain: calib.gains.current_ki,
                        });
                        self.phase_resistance = calib.resistance;
                        self.phase_inductance = calib.inductance;
                        self.calibration = None;
                        self.flags.do_calibration = false;
                        self.calibration_ok = true;
                        self.error = FirmwareError::NoError;
                        self.state = SupervisorState::after_calibration(Ok(()));
                    }
                    Some(Err(e)) => {
                        self.calibration = None;
                        self.error = e;
                        self.pwm.disable_outputs();
                        self.state = SupervisorState::after_calibration(Err(e));
                    }
                }
                0.0
            }
            SupervisorState::Running => {
                let out = self.cascade.update(
                    &self.setpoints,
                    sample.pll_pos,
                    sample.pll_vel,
                    self.rotor.motor_dir as f32,
                    dt,
                );
                let cos_phi = libm::cosf(sample.elec_phase);
                let sin_phi = libm::sinf(sample.elec_phase);
                let foc = self.current_control.update(
                    0.0,
                    out.i_q_cmd,
                    i_b,
                    i_c,
                    cos_phi,
                    sin_phi,
                    v_bus,
                    dt,
                    self.pwm.period_counts(),
                );
                let (ta, tb, tc) = foc.duties;
                self.queue_duties(ta, tb, tc);

                if elapsed_counts > self.control_deadline_counts {
                    self.error = FirmwareError::FocTiming;
                }

                self.state = SupervisorState::after_running(self.error, &self.flags);
                if self.state != SupervisorState::Running {
                    self.pwm.disable_outputs();
                    self.enable_step_dir = false;
                }
                foc.i_bus
            }
            SupervisorState::Fault => {
                self.calibration_ok = false;
                self.flags.enable_control = false;
                self.queue_duties(0.5, 0.5, 0.5);
                self.pwm.disable_outputs();
                self.state = SupervisorState::after_fault(&self.flags);
                0.0
            }
        }
    }

    /// Open-loop voltage injection with no current feedback
    /// (`SPEC_FULL.md` supplement naming this `Motor::voltage_test`,
    /// grounded on `low_level.c`'s `FOC_voltage_loop`). A bench diagnostic,
    /// run outside the supervisor state machine.
    pub fn voltage_test(
        &mut self,
        v_d: f32,
        v_q: f32,
        v_bus: f32,
        elapsed_counts: u16,
    ) -> Result<(f32, f32, f32), FirmwareError> {
        if elapsed_counts > self.control_deadline_counts {
            self.error = FirmwareError::FocVoltageTiming;
            return Err(FirmwareError::FocVoltageTiming);
        }
        let cos_phi = libm::cosf(self.rotor.elec_phase);
        let sin_phi = libm::sinf(self.rotor.elec_phase);
        let duties = current_control::voltage_test(v_d, v_q, cos_phi, sin_phi, v_bus);
        self.queue_duties(duties.0, duties.1, duties.2);
        Ok(duties)
    }

    /// Open-loop phase scan at a commanded electrical speed
    /// (`SPEC_FULL.md` supplement naming this `Motor::scan_test`, grounded
    /// on `low_level.c`'s `scan_motor_loop`) — verifies wiring/direction
    /// ahead of calibration.
    pub fn scan_test(
        &mut self,
        phase: f32,
        scan_voltage: f32,
        v_bus: f32,
        elapsed_counts: u16,
    ) -> Result<(f32, f32, f32), FirmwareError> {
        if elapsed_counts > self.control_deadline_counts {
            self.error = FirmwareError::ScanMotorTiming;
            return Err(FirmwareError::ScanMotorTiming);
        }
        let duties = current_control::scan_test(phase, scan_voltage, v_bus);
        self.queue_duties(duties.0, duties.1, duties.2);
        Ok(duties)
    }

    fn queue_duties(&mut self, ta: f32, tb: f32, tc: f32) {
        let p = self.pwm.period_counts();
        self.next_timings = [
            current_control::duty_to_counts(ta, p),
            current_control::duty_to_counts(tb, p),
            current_control::duty_to_counts(tc, p),
        ];
        self.pwm.set_next_timings(self.next_timings);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::hal::mock::{MockEncoder, MockGateDriver, MockPwm};
    use crate::firmware::hal::{GateDriverConfig, OcMode, ShuntAmpGain};

    fn params() -> CalibrationParams {
        CalibrationParams {
            i_cal_resistance: 5.0,
            v_max_resistance: 2.0,
            v_lo_inductance: -1.0,
            v_hi_inductance: 1.0,
            i_cal_encoder: 5.0,
        }
    }

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
            params(),
            PositionConfig::default(),
            VelocityConfig::default(),
            5.0,
            4250,
        )
    }

    #[test]
    fn starts_idle_with_outputs_disabled() {
        let mut m = motor();
        m.step(0.0, 0.0, 24.0, 1.0 / 200.0, 0);
        assert_eq!(m.state, SupervisorState::Idle);
        assert!(!m.pwm.enabled);
    }

    #[test]
    fn idle_transitions_to_calibrating_on_request() {
        let mut m = motor();
        m.request_calibration();
        m.step(0.0, 0.0, 24.0, 1.0 / 200.0, 0);
        assert_eq!(m.state, SupervisorState::Calibrating);
        assert!(m.pwm.enabled);
    }

    #[test]
    fn calibration_rejects_out_of_range_resistance_and_faults() {
        let mut m = motor();
        m.request_calibration();
        let period_s = 1.0 / 200.0;
        // Held at zero current throughout: V keeps climbing to its clamp
        // and never produces any measured current, so the resistance stage
        // saturates and rejects regardless of true plant resistance.
        for _ in 0..1000 {
            m.step(0.0, 0.0, 24.0, period_s, 0);
            if m.state == SupervisorState::Fault {
                break;
            }
        }
        assert_eq!(m.state, SupervisorState::Fault);
        assert_eq!(m.error, FirmwareError::PhaseResistanceOutOfRange);
        assert!(!m.pwm.enabled);
    }

    #[test]
    fn running_without_prior_calibration_executes_cascade() {
        let mut m = motor();
        m.set_enable_control(true);
        m.setpoints.current = 1.0;
        m.step(0.0, 0.0, 24.0, 1.0 / 20_000.0, 0);
        assert_eq!(m.state, SupervisorState::Running);
        assert!(m.pwm.enabled);
    }

    #[test]
    fn fault_latches_until_explicit_clear() {
        let mut m = motor();
        m.state = SupervisorState::Fault;
        m.step(0.0, 0.0, 24.0, 1.0 / 20_000.0, 0);
        assert_eq!(m.state, SupervisorState::Fault);
        assert!(!m.calibration_ok);

        m.request_calibration();
        m.step(0.0, 0.0, 24.0, 1.0 / 20_000.0, 0);
        assert_eq!(m.state, SupervisorState::Idle);
    }
}
