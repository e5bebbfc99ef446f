//! Worker tasks and the raw ADC/step IRQ trampolines that feed them
//! (`spec.md` §5 concurrency model, C11).
//!
//! The ADC-done interrupt is a raw `cortex-m-rt` `#[interrupt]` handler,
//! not an `embassy_executor` task — it must never suspend, and embassy's
//! async drivers don't model injected conversions anyway (`drivers::adc`).
//! It does only three things: read the converted code, fold it into
//! [`GlobalContext`]'s timing/current-sense state, and — once a motor's
//! current pair is complete — signal that motor's worker. The worker is an
//! ordinary embassy task that waits on the signal, pulls the published
//! pair out of the lock-free [`CurrentMeasSlot`](crate::firmware::context::CurrentMeasSlot),
//! and runs one control cycle.
//!
//! [`CONTEXT`] is the single shared instance both sides reach through. It
//! is a *blocking* critical-section mutex, not the async kind: every
//! access — from the IRQ and from the worker alike — is a short
//! synchronous borrow that never spans an `.await`, so the two sides never
//! observe each other mid-update. The brake chopper is the one field
//! accessed through its own async `Mutex` (`GlobalContext::brake`), a
//! deliberate exception so two motor workers contending for it block on
//! each other instead of racing `try_lock`.

use core::cell::RefCell;

use embassy_stm32::peripherals::{TIM1, TIM3, TIM4};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration};

use crate::firmware::config::CONTROL_PERIOD_S;
use crate::firmware::context::GlobalContext;
use crate::firmware::drivers::adc::{self, read_and_clear_jeoc};
use crate::firmware::drivers::encoder::TimerEncoder;
use crate::firmware::drivers::gate_driver::SpiGateDriver;
use crate::firmware::drivers::pwm::{BrakePwm, MotorPwm};
use crate::firmware::drivers::step_dir_interface::StepDirGpio;
use crate::firmware::error::FirmwareError;
use crate::firmware::timing::{MotorSlot, SampleClass};

pub type BoardPwm = MotorPwm<'static, TIM1>;
pub type BoardEncoder = TimerEncoder<TIM3>;
pub type BoardGateDriver = SpiGateDriver;
pub type BoardBrake = BrakePwm<'static, TIM4>;
pub type BoardContext = GlobalContext<BoardPwm, BoardEncoder, BoardGateDriver, BoardBrake, 1>;

/// Board context, populated once by `system::initialize` before any task
/// or interrupt can observe it.
pub static CONTEXT: BlockingMutex<CriticalSectionRawMutex, RefCell<Option<BoardContext>>> =
    BlockingMutex::new(RefCell::new(None));

/// "Later wins" handoff waking motor 0's worker once the ADC IRQ publishes
/// a fresh current pair (`spec.md` §9). Indexed by motor; only one entry
/// since `config::NUM_MOTORS == 1` on this board.
pub static PH_CURRENT_MEAS: [Signal<CriticalSectionRawMutex, ()>; 1] = [Signal::new()];

/// Raised by the ADC IRQ when the timing orchestrator reports a global
/// fault (`spec.md` §5: "ADC_FAILED, PWM_SRC_FAIL, UNEXPECTED_STEP_SRC...
/// all motors disabled, all brake current zeroed"). Consumed by
/// `fault_monitor`, the only task allowed to run the disable sweep.
pub static GLOBAL_FAULT: Signal<CriticalSectionRawMutex, FirmwareError> = Signal::new();

fn with_context<R>(f: impl FnOnce(&mut BoardContext) -> R) -> Option<R> {
    CONTEXT.lock(|cell| cell.borrow_mut().as_mut().map(f))
}

/// Control-loop wait budget: a little over one control period, so a
/// genuinely missed ADC IRQ is distinguishable from ordinary jitter
/// (`spec.md` §7 `FOC_MEASUREMENT_TIMEOUT`).
fn measurement_wait_budget() -> Duration {
    Duration::from_micros((CONTROL_PERIOD_S * 1_000_000.0 * 2.0) as u64)
}

/// One motor's control-loop worker (`spec.md` §4.8). Runs forever; the
/// supervisor state machine inside `Motor::step` is what actually moves
/// between Idle/Calibrating/Running/Fault.
#[embassy_executor::task]
pub async fn motor_worker(idx: usize) {
    loop {
        let woke = with_timeout(measurement_wait_budget(), PH_CURRENT_MEAS[idx].wait()).await;

        if woke.is_err() {
            with_context(|ctx| ctx.motors[idx].raise_measurement_timeout());
            continue;
        }

        // Current-sample pull, `step`, and the brake update it feeds all
        // happen inside one synchronous borrow — the brake's own async
        // `Mutex` guard can't outlive this closure, and `update` is cheap
        // enough that holding the context lock across it costs nothing.
        with_context(|ctx| {
            let (i_b, i_c) = ctx.current_meas[idx].take().unwrap_or((0.0, 0.0));
            let v_bus = ctx.vbus.read();
            let elapsed_counts = ctx.motors[idx].pwm_count();
            let i_bus = ctx.motors[idx].step(i_b, i_c, v_bus, CONTROL_PERIOD_S, elapsed_counts);
            ctx.update_brake(idx, i_bus, v_bus);
        });
    }
}

/// Reacts to `GLOBAL_FAULT`, run as its own task so the disable sweep
/// happens from thread mode rather than interrupt context (`spec.md` §5).
#[embassy_executor::task]
pub async fn fault_monitor() {
    loop {
        let error = GLOBAL_FAULT.wait().await;
        debug_assert!(error.is_global());
        with_context(|ctx| {
            for motor in &mut ctx.motors {
                motor.force_disable();
                motor.error = error;
            }
            if let Ok(mut brake) = ctx.brake.try_lock() {
                brake.force_off();
            }
        });
    }
}

/// STEP/DIR pulse counter (`spec.md` §4.8: "increments that motor's
/// `pos_setpoint` by a configured step size; only enabled in Running").
#[embassy_executor::task]
pub async fn step_dir(mut gpio: StepDirGpio, counts_per_step: f32) {
    loop {
        let sample = gpio.wait_for_step().await;
        with_context(|ctx| {
            let motor = &mut ctx.motors[0];
            if motor.enable_step_dir {
                let direction = if sample.last_direction() { 1.0 } else { -1.0 };
                motor.setpoints.position += direction * counts_per_step;
            }
        });
    }
}

/// VBus ADC IRQ (`spec.md` §5). A plain regular conversion, not gated by
/// the timing orchestrator.
#[cortex_m_rt::interrupt]
fn ADC1() {
    let code = read_and_clear_jeoc(embassy_stm32::pac::ADC1);
    let volts = adc::code_to_volts(code, adc::VBUS_DIVIDER_RATIO);
    with_context(|ctx| ctx.on_vbus_sample(volts));
}

/// ADC2's injected-conversion-done IRQ: motor 0's phase-B/phase-C current
/// samples arrive here (`spec.md` §4.1, §4.2). ADC2 always completes
/// before ADC3 for the same vector, so the "B then C" ordering
/// `CurrentSampler` depends on is guaranteed by which unit triggers this
/// handler first.
#[cortex_m_rt::interrupt]
fn ADC2() {
    let code = read_and_clear_jeoc(embassy_stm32::pac::ADC2);
    with_context(|ctx| ctx.on_adc_b(0, code));
}

/// ADC3's injected-conversion-done IRQ: completes motor 0's current pair,
/// classifies the event, and performs the cross-motor compare-register
/// commit the timing orchestrator calls for.
#[cortex_m_rt::interrupt]
fn ADC3() {
    let code = read_and_clear_jeoc(embassy_stm32::pac::ADC3);

    let class = with_context(|ctx| {
        let (count, counting_down) = ctx.motors[0].pwm_count_and_direction();
        let class = ctx.on_adc_event(MotorSlot::M0, count, counting_down);
        if let Ok(class) = class {
            let is_dc_cal = class == SampleClass::DcCalSample;
            ctx.on_adc_c(0, code, is_dc_cal, CONTROL_PERIOD_S);
        }
        class
    });

    match class {
        Some(Ok(SampleClass::CurrentSample)) => PH_CURRENT_MEAS[0].signal(()),
        Some(Ok(SampleClass::DcCalSample)) => {}
        Some(Err(error)) => GLOBAL_FAULT.signal(error),
        None => {}
    }
}
