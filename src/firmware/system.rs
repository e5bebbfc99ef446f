//! Board bring-up: wires concrete `embassy_stm32` peripherals into the
//! hardware-capability traits (`hal`), builds the process-wide
//! [`GlobalContext`], and spawns the worker/monitor tasks (`spec.md` §6,
//! §9). Everything in `tasks::BoardPwm`/`BoardEncoder`/`BoardGateDriver`/
//! `BoardBrake` is concrete here — `embassy_executor` tasks cannot be
//! generic, so the generic `Motor`/`GlobalContext` core is monomorphized
//! exactly once, at this single call site.

use embassy_executor::Spawner;
use embassy_stm32::gpio::{Level, Output, Pull, Speed};
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::spi::{Config as SpiConfig, Spi};
use embassy_stm32::time::Hertz;
use embassy_stm32::timer::complementary_pwm::ComplementaryPwmPin;
use embassy_stm32::timer::simple_pwm::PwmPin;
use embassy_stm32::Peripherals;
use embassy_time::{Duration, Timer};

use crate::firmware::calibration::CalibrationParams;
use crate::firmware::config::{self, MotorConfig};
use crate::firmware::control::position::PositionConfig;
use crate::firmware::control::velocity::VelocityConfig;
use crate::firmware::context::GlobalContext;
use crate::firmware::current_sense::CurrentSampler;
use crate::firmware::drivers::adc::{configure_injected_current_adcs, ADC_VREF_V};
use crate::firmware::drivers::encoder::TimerEncoder;
use crate::firmware::drivers::gate_driver::SpiGateDriver;
use crate::firmware::drivers::pwm::{BrakePwm, MotorPwm, PHASE_OUTPUT_TYPE};
use crate::firmware::drivers::step_dir_interface::StepDirGpio;
use crate::firmware::hal::{GateDriverConfig, OcMode, ShuntAmpGain};
use crate::firmware::motor::Motor;
use crate::firmware::tasks::{self, BoardContext};

/// Dead-time between a phase's high- and low-side conduction, timer counts
/// at `SYSCLK_HZ` (`spec.md` §6).
const DEADTIME_COUNTS: u16 = 170; // 1 us at 170 MHz
/// Step/dir pulse-to-encoder-count scale (`spec.md` §4.8, `DESIGN.md` Open
/// Question: applies directly to `pos_setpoint`, which shares `pll_pos`'s
/// raw-count units).
const COUNTS_PER_STEP: f32 = 8.0;
/// Guard margin added to the nominal half-period before a control cycle is
/// considered overrun (`spec.md` §4.4 step 10).
const CONTROL_DEADLINE_COUNTS: u16 = config::PWM_PERIOD_COUNTS - config::PWM_PERIOD_COUNTS / 8;

fn build_motor(pwm: tasks::BoardPwm, encoder: tasks::BoardEncoder, gate_driver: tasks::BoardGateDriver) -> Motor<tasks::BoardPwm, tasks::BoardEncoder, tasks::BoardGateDriver> {
    Motor::new(
        pwm,
        encoder,
        gate_driver,
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
        20.0,
        CONTROL_DEADLINE_COUNTS,
    )
}

/// Bring up every peripheral this board needs, build `GlobalContext`, and
/// spawn the tasks that drive it. Runs once, at boot, then falls into a
/// heartbeat loop (`spec.md` §1: board bring-up is an external
/// collaborator — this function is that collaborator, not CORE).
pub async fn initialize(spawner: Spawner, p: Peripherals) -> ! {
    defmt::info!("Board bring-up starting");

    let pwm = MotorPwm::new(
        p.TIM1,
        PwmPin::new_ch1(p.PA8, PHASE_OUTPUT_TYPE),
        ComplementaryPwmPin::new_ch1(p.PB13, PHASE_OUTPUT_TYPE),
        PwmPin::new_ch2(p.PA9, PHASE_OUTPUT_TYPE),
        ComplementaryPwmPin::new_ch2(p.PB14, PHASE_OUTPUT_TYPE),
        PwmPin::new_ch3(p.PA10, PHASE_OUTPUT_TYPE),
        ComplementaryPwmPin::new_ch3(p.PB15, PHASE_OUTPUT_TYPE),
        Hertz(config::PWM_FREQ_HZ),
        DEADTIME_COUNTS,
    );

    let encoder = TimerEncoder::new(p.TIM3);

    let mut spi_config = SpiConfig::default();
    spi_config.frequency = Hertz(1_000_000);
    let spi = Spi::new_blocking(p.SPI2, p.PB3, p.PB5, p.PB4, spi_config);
    let cs = Output::new(p.PB12, Level::High, Speed::VeryHigh);
    let en = Output::new(p.PC13, Level::Low, Speed::Low);
    let gate_driver = gate_driver_config(SpiGateDriver::new(spi, cs, en));

    let motor = build_motor(pwm, encoder, gate_driver);

    let brake = BrakePwm::new(
        p.TIM4,
        PwmPin::new_ch1(p.PB6, PHASE_OUTPUT_TYPE),
        ComplementaryPwmPin::new_ch2(p.PB7, PHASE_OUTPUT_TYPE),
        Hertz(config::PWM_FREQ_HZ),
    );
    let brake_chopper = crate::firmware::brake::BrakeChopper::new(brake, 1.0, DEADTIME_COUNTS);

    let context = GlobalContext::new(
        [motor],
        [CurrentSampler::new(ShuntAmpGain::Gain20VpV.rev_gain(), 0.01)],
        brake_chopper,
        config::PWM_PERIOD_COUNTS,
    );

    tasks::CONTEXT.lock(|cell| *cell.borrow_mut() = Some(context));

    configure_injected_current_adcs(&mut embassy_stm32::adc::Adc::new(p.ADC2), &mut embassy_stm32::adc::Adc::new(p.ADC3));
    let _vbus_adc = embassy_stm32::adc::Adc::new(p.ADC1);
    let _ = ADC_VREF_V;

    let step_gpio = StepDirGpio::new(
        ExtiInput::new(p.PB0, p.EXTI0, Pull::Up),
        embassy_stm32::gpio::Input::new(p.PB1, Pull::Up),
    );

    spawner.spawn(tasks::motor_worker(0)).ok();
    spawner.spawn(tasks::fault_monitor()).ok();
    spawner.spawn(tasks::step_dir(step_gpio, COUNTS_PER_STEP)).ok();

    defmt::info!("Board bring-up complete, control loop running");

    let mut counter = 0u32;
    loop {
        Timer::after(Duration::from_secs(config::HEARTBEAT_PERIOD_SECS)).await;
        counter = counter.wrapping_add(1);
        defmt::info!("heartbeat: {} s", counter);
    }
}

/// Writes the board's fixed gate-driver configuration once at boot
/// (`spec.md` §6). Returns the driver, configured; the write/read-back
/// verification itself happens through `Motor::configure_gate_driver`
/// once the motor owns it, but the initial image must exist before that
/// call can read anything sensible back.
fn gate_driver_config(
    mut gate_driver: crate::firmware::drivers::gate_driver::SpiGateDriver,
) -> crate::firmware::drivers::gate_driver::SpiGateDriver {
    use crate::firmware::hal::GateDriverPort;
    let config = GateDriverConfig {
        oc_mode: OcMode::LatchShutdown,
        oc_threshold: 5.0,
        shunt_amp_gain: ShuntAmpGain::Gain20VpV,
    };
    gate_driver.enable();
    let _ = gate_driver.write_config(&config);
    gate_driver
}
