//! Process-scoped global context (`spec.md` §9: "Global mutable state →
//! model as a process-scoped context explicitly passed into ISRs' small
//! trampolines").
//!
//! `GlobalContext` is the one place that knows about every motor, the
//! shared brake chopper, and the shared bus-voltage reading. It replaces
//! the C source's free global variables (`motors[]`, `vbus_voltage`,
//! `brake_resistor`) with a struct the IRQ trampolines and worker tasks
//! both borrow from.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;

use crate::firmware::brake::BrakeChopper;
use crate::firmware::config::NUM_MOTORS;
use crate::firmware::current_sense::CurrentSampler;
use crate::firmware::error::FirmwareError;
use crate::firmware::hal::{BrakeChannel, EncoderCounter, GateDriverPort, PwmChannel};
use crate::firmware::motor::Motor;
use crate::firmware::timing::{MotorSlot, SampleClass, TimingOrchestrator};

/// Single-writer-single-reader handoff for one motor's DC-compensated
/// `(I_b, I_c)` pair (`spec.md` §3 `current_meas`, §9: "lock-free
/// single-writer-single-reader slots"). Published by the ADC IRQ once per
/// control cycle, consumed exactly once by that motor's worker when it
/// wakes on `PH_CURRENT_MEAS`.
pub struct CurrentMeasSlot {
    i_b_bits: AtomicU32,
    i_c_bits: AtomicU32,
    ready: AtomicBool,
}

impl CurrentMeasSlot {
    pub const fn new() -> Self {
        Self {
            i_b_bits: AtomicU32::new(0),
            i_c_bits: AtomicU32::new(0),
            ready: AtomicBool::new(false),
        }
    }

    /// Called only from the ADC IRQ, once the current sampler completes a
    /// real (non-DC-cal) phase-current pair.
    pub fn publish(&self, i_b: f32, i_c: f32) {
        self.i_b_bits.store(i_b.to_bits(), Ordering::Relaxed);
        self.i_c_bits.store(i_c.to_bits(), Ordering::Release);
        self.ready.store(true, Ordering::Release);
    }

    /// Called only from the owning motor's worker task. Returns `None` if
    /// no fresh pair has been published since the last take (e.g. the
    /// worker was woken spuriously, or this is the first cycle).
    pub fn take(&self) -> Option<(f32, f32)> {
        if self.ready.swap(false, Ordering::AcqRel) {
            let i_c = f32::from_bits(self.i_c_bits.load(Ordering::Acquire));
            let i_b = f32::from_bits(self.i_b_bits.load(Ordering::Relaxed));
            Some((i_b, i_c))
        } else {
            None
        }
    }
}

impl Default for CurrentMeasSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// DC bus voltage, written once by the VBus ADC IRQ and read everywhere
/// else (`spec.md` §5: "treated as atomic float").
pub struct VbusVoltage {
    bits: AtomicU32,
}

impl VbusVoltage {
    pub const fn new() -> Self {
        Self {
            bits: AtomicU32::new(0),
        }
    }

    pub fn read(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    /// Called only from the VBus ADC IRQ.
    pub fn write(&self, volts: f32) {
        self.bits.store(volts.to_bits(), Ordering::Relaxed);
    }
}

impl Default for VbusVoltage {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide context: every motor, the shared brake chopper, the shared
/// bus-voltage reading, and the timing orchestrator that classifies ADC
/// IRQs and decides cross-motor compare-register commits.
///
/// `N` is validated against `config::NUM_MOTORS` in `new` (`spec.md` §9:
/// "an implementation should validate N against compile-time configuration
/// and reject inconsistencies" — the two-motor constructor quirk in the
/// original is not mirrored).
pub struct GlobalContext<PWM, ENC, GD, BRK, const N: usize> {
    pub motors: [Motor<PWM, ENC, GD>; N],
    pub brake: Mutex<CriticalSectionRawMutex, BrakeChopper<BRK>>,
    pub vbus: VbusVoltage,
    timing: TimingOrchestrator,
    /// Owned and mutated only by the ADC IRQ path (`spec.md` §4.2); read
    /// out through `current_meas`'s own take/publish split, never locked.
    current_samplers: [CurrentSampler; N],
    pub current_meas: [CurrentMeasSlot; N],
    /// Each motor's most recent `FocOutput::i_bus` contribution (`spec.md`
    /// §4.4 step 7: "Sum over all motors"), summed and negated by
    /// `update_brake` before reaching the chopper.
    i_bus_meas: [f32; N],
}

impl<PWM, ENC, GD, BRK, const N: usize> GlobalContext<PWM, ENC, GD, BRK, N>
where
    PWM: PwmChannel,
    ENC: EncoderCounter,
    GD: GateDriverPort,
    BRK: BrakeChannel,
{
    /// Fails at construction if the compile-time motor count doesn't match
    /// the board's wired resource count, rather than silently running with
    /// undefined data in the unused slot (`spec.md` §9).
    pub fn new(
        motors: [Motor<PWM, ENC, GD>; N],
        current_samplers: [CurrentSampler; N],
        brake: BrakeChopper<BRK>,
        pwm_period: u16,
    ) -> Self {
        assert_eq!(
            N, NUM_MOTORS,
            "GlobalContext motor count does not match config::NUM_MOTORS"
        );
        Self {
            motors,
            brake: Mutex::new(brake),
            vbus: VbusVoltage::new(),
            timing: TimingOrchestrator::new(pwm_period),
            current_samplers,
            current_meas: core::array::from_fn(|_| CurrentMeasSlot::new()),
            i_bus_meas: [0.0; N],
        }
    }

    /// Records motor `idx`'s latest bus-current contribution and feeds the
    /// shared brake chopper with `-ΣI_bus` across every motor's most recent
    /// sample (`spec.md` §4.4 step 7: "Sum over all motors and feed the
    /// brake chopper with −Σ I_bus, positive = regenerating"). Called once
    /// per motor per control cycle from the motor worker, inside the same
    /// synchronous context borrow `step` ran in; `try_lock` is safe here
    /// because the chopper's own disarm-then-arm protocol (`spec.md` §4.7)
    /// tolerates either write order when more than one motor updates it.
    pub fn update_brake(&mut self, idx: usize, i_bus: f32, v_bus: f32) -> Option<f32> {
        if let Some(slot) = self.i_bus_meas.get_mut(idx) {
            *slot = i_bus;
        }
        let total: f32 = self.i_bus_meas.iter().sum();
        self.brake.try_lock().ok().map(|mut brake| brake.update(-total, v_bus))
    }

    /// First ADC IRQ of the current-sample pair for motor `idx` (`spec.md`
    /// §4.2, §5: "ADC2 before ADC3... in that order").
    pub fn on_adc_b(&mut self, idx: usize, code: u16) {
        if let Some(sampler) = self.current_samplers.get_mut(idx) {
            sampler.on_adc_b(code);
        }
    }

    /// Second ADC IRQ of the pair. Completes a DC-cal update or publishes a
    /// fresh `(I_b, I_c)` pair into `current_meas[idx]` for the worker.
    pub fn on_adc_c(&mut self, idx: usize, code: u16, is_dc_cal: bool, dt: f32) {
        let Some(sampler) = self.current_samplers.get_mut(idx) else {
            return;
        };
        if let Some(pair) = sampler.on_adc_c(code, is_dc_cal, dt) {
            if let Some(slot) = self.current_meas.get(idx) {
                slot.publish(pair.i_b, pair.i_c);
            }
        }
    }

    /// VBus ADC IRQ trampoline body (`spec.md` §5).
    pub fn on_vbus_sample(&self, volts: f32) {
        self.vbus.write(volts);
    }

    /// Read access to one motor's current sampler, for `monitoring`'s
    /// `DC_calib`/`shunt_conductance`/`phase_current_rev_gain` readback.
    pub fn current_sampler(&self, idx: usize) -> Option<&CurrentSampler> {
        self.current_samplers.get(idx)
    }

    pub fn current_sampler_mut(&mut self, idx: usize) -> Option<&mut CurrentSampler> {
        self.current_samplers.get_mut(idx)
    }

    /// ADC-done IRQ trampoline body for one motor slot (`spec.md` §4.1,
    /// §5). Classifies the event, then commits queued timings into live
    /// compare registers at the appropriate safe boundary: on boards with
    /// a paired motor, that boundary copies the *other* motor's queued
    /// timings (the cross-motor commit rule); on a single-motor board
    /// there is no "other" to target, so the motor commits its *own*
    /// queued timings instead, at its DC-cal boundary (`spec.md` §9 — a
    /// lone motor must still reach the hardware every control cycle). A
    /// classification failure is a global fault: the caller must disable
    /// every motor's outputs and zero the brake.
    pub fn on_adc_event(
        &mut self,
        slot: MotorSlot,
        count: u16,
        counting_down: bool,
    ) -> Result<SampleClass, FirmwareError> {
        let class = self.timing.classify(slot, count, counting_down)?;

        if N == 1 {
            if TimingOrchestrator::should_commit_self(class) {
                if let Some(motor) = self.motors.get_mut(slot as usize) {
                    motor.commit_timings();
                }
            }
        } else if TimingOrchestrator::should_commit_other(slot, class) {
            let other = match slot {
                MotorSlot::M0 => 1,
                MotorSlot::M1 => 0,
            };
            if let Some(motor) = self.motors.get_mut(other) {
                motor.commit_timings();
            }
        }

        Ok(class)
    }

    /// `spec.md` §5 "Global fault": disables every motor's outputs,
    /// clears their control/calibration flags, sets the supplied error on
    /// each, and zeroes the brake.
    pub async fn raise_global_fault(&mut self, error: FirmwareError) {
        debug_assert!(error.is_global());
        for motor in &mut self.motors {
            motor.force_disable();
            motor.error = error;
        }
        self.brake.lock().await.force_off();
    }

    pub fn timing_log(&self) -> &heapless::HistoryBuffer<u16, { crate::firmware::config::TIMING_LOG_SIZE }> {
        self.timing.log()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::config::MotorConfig;
    use crate::firmware::control::position::PositionConfig;
    use crate::firmware::control::velocity::VelocityConfig;
    use crate::firmware::hal::mock::{MockBrake, MockEncoder, MockGateDriver, MockPwm};
    use crate::firmware::hal::{GateDriverConfig, OcMode, ShuntAmpGain};
    use crate::firmware::motor::CalibrationParams;

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
            BrakeChopper::new(
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
    fn update_brake_negates_motoring_current_to_zero_duty() {
        let mut ctx = context();
        // Motoring draws bus current (I_bus > 0); fed through -ΣI_bus that
        // must clamp to zero brake duty, not fire the chopper.
        let duty = ctx.update_brake(0, 5.0, 24.0).unwrap();
        assert_eq!(duty, 0.0);
    }

    #[test]
    fn update_brake_fires_on_net_regeneration() {
        let mut ctx = context();
        // Regeneration returns bus current (I_bus < 0); -ΣI_bus is then
        // positive and must drive a nonzero brake duty.
        let duty = ctx.update_brake(0, -5.0, 24.0).unwrap();
        assert!((duty - 5.0 / 24.0).abs() < 1e-3);
    }

    #[test]
    fn vbus_round_trips_through_atomic_storage() {
        let ctx = context();
        ctx.on_vbus_sample(23.7);
        assert!((ctx.vbus.read() - 23.7).abs() < 1e-4);
    }

    #[test]
    #[should_panic(expected = "GlobalContext motor count")]
    fn rejects_mismatched_motor_count() {
        let _: GlobalContext<MockPwm, MockEncoder, MockGateDriver, MockBrake, 2> =
            GlobalContext::new(
                [motor(), motor()],
                [
                    CurrentSampler::new(1.0 / 20.0, 0.001),
                    CurrentSampler::new(1.0 / 20.0, 0.001),
                ],
                BrakeChopper::new(
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
            );
    }

    #[test]
    fn current_meas_slot_publishes_and_takes_once() {
        let ctx = context();
        assert!(ctx.current_meas[0].take().is_none());
        ctx.current_meas[0].publish(1.5, -2.5);
        let (i_b, i_c) = ctx.current_meas[0].take().unwrap();
        assert!((i_b - 1.5).abs() < 1e-6);
        assert!((i_c + 2.5).abs() < 1e-6);
        assert!(ctx.current_meas[0].take().is_none());
    }

    #[test]
    fn adc_b_then_c_publishes_current_pair() {
        let mut ctx = context();
        ctx.on_adc_b(0, 2148);
        ctx.on_adc_c(0, 1948, false, 1.0 / 20_000.0);
        assert!(ctx.current_meas[0].take().is_some());
    }

    #[test]
    fn single_motor_self_commits_at_dc_cal_boundary() {
        let mut ctx = context();
        let live_before = ctx.motors[0].pwm().live;
        ctx.motors[0].scan_test(0.0, 1.0, 24.0, 0).unwrap();
        let queued = ctx.motors[0].pwm().queued;
        assert_ne!(queued, live_before, "scan_test should queue non-default duties");

        // M0's CurrentSample event would commit M1's timings on a
        // two-motor board; with N=1 there is no M1 slot, so this must be a
        // no-op rather than a panic, and the queued duties stay unapplied.
        let class = ctx.on_adc_event(MotorSlot::M0, 0, false).unwrap();
        assert_eq!(class, SampleClass::CurrentSample);
        assert_eq!(ctx.motors[0].pwm().live, live_before);

        // The following DC-cal event is the lone motor's own safe boundary
        // and must commit its queued duties into the live compare
        // registers.
        let class = ctx.on_adc_event(MotorSlot::M0, 4250, true).unwrap();
        assert_eq!(class, SampleClass::DcCalSample);
        assert_eq!(ctx.motors[0].pwm().live, queued);
    }
}
