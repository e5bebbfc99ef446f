//! Hardware capability traits — the seam between CORE and vendor HAL.
//!
//! `spec.md` §9 calls out the C source's scattered register fiddling and
//! asks for it to be "encapsulated as a PwmChannel capability... and an
//! EncoderCounter capability... The CORE depends only on these
//! capabilities; vendor HAL lives behind them." Every control algorithm in
//! this crate is written against these traits, never against
//! `embassy_stm32` directly, so it stays host-testable.

use crate::firmware::error::Result;

/// Three-phase center-aligned complementary PWM output with dead-time,
/// plus the fourth ADC-trigger channel (`spec.md` §6).
pub trait PwmChannel {
    /// Timer period in counts (`P` throughout `spec.md`).
    fn period_counts(&self) -> u16;

    /// Queue the next cycle's compare values for phases A/B/C. Takes effect
    /// only when the timing orchestrator (§4.1) copies it into the hardware
    /// compare registers at the designated cross-cycle boundary — this call
    /// itself must not touch hardware registers directly.
    fn set_next_timings(&mut self, counts: [u16; 3]);

    /// Atomically load whatever was last queued by `set_next_timings` into
    /// the live compare registers. Called only from the ADC IRQ trampoline.
    fn commit_timings(&mut self);

    /// Enable the Main Output Enable bit — gate outputs live.
    fn enable_outputs(&mut self);

    /// Unconditionally disable outputs (safe state), even mid-cycle.
    fn disable_outputs(&mut self);

    /// Current timer count and count direction (`true` = counting down),
    /// used by the timing orchestrator's ADC-IRQ classification.
    fn count_and_direction(&self) -> (u16, bool);
}

/// 16-bit up/down quadrature counter (`spec.md` §6: "16-bit up/down counter
/// in quadrature X4 mode").
pub trait EncoderCounter {
    /// Current raw hardware counter value.
    fn count(&self) -> u16;
}

/// Shunt-amp gain settings a gate driver chip (e.g. DRV8301) exposes.
/// `spec.md` §3: "`phase_current_rev_gain` ∈ {1/10, 1/20, 1/40, 1/80}".
#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum ShuntAmpGain {
    Gain10VpV,
    Gain20VpV,
    Gain40VpV,
    Gain80VpV,
}

impl ShuntAmpGain {
    /// `phase_current_rev_gain`: the reciprocal of the amplifier gain.
    pub const fn rev_gain(self) -> f32 {
        match self {
            Self::Gain10VpV => 1.0 / 10.0,
            Self::Gain20VpV => 1.0 / 20.0,
            Self::Gain40VpV => 1.0 / 40.0,
            Self::Gain80VpV => 1.0 / 80.0,
        }
    }
}

/// Over-current protection mode, written to the gate driver's SPI register
/// image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum OcMode {
    LatchShutdown,
    ReportOnly,
}

/// Configuration image written to (and read back from) an external
/// gate-driver chip (`spec.md` §3 `GateDriver`, §6 "SPI register image").
#[derive(Clone, Copy, Debug, defmt::Format)]
pub struct GateDriverConfig {
    pub oc_mode: OcMode,
    /// Over-current threshold, in the driver's native Vds-level units.
    pub oc_threshold: f32,
    pub shunt_amp_gain: ShuntAmpGain,
}

/// Port to an external gate-driver chip: write the configuration image,
/// read it back for verification, and gate the driver enable pin
/// independently of the PWM timer's own output-enable bit.
pub trait GateDriverPort {
    /// Assert the driver's enable pin.
    fn enable(&mut self);
    /// Deassert the driver's enable pin (outputs forced high-impedance).
    fn disable(&mut self);
    /// Write the configuration image over SPI.
    fn write_config(&mut self, config: &GateDriverConfig) -> Result<()>;
    /// Read back the configuration image for verification.
    fn read_config(&mut self) -> Result<GateDriverConfig>;
}

/// DC bus voltage sense (`spec.md` §5 "VBus ADC IRQ... atomically").
pub trait VbusSense {
    /// Convert a raw ADC code to volts.
    fn code_to_volts(&self, code: u16) -> f32;
}

/// Brake-resistor chopper's two complementary PWM channels (`spec.md`
/// §4.7: "ch3 is low side, ch4 is high side").
pub trait BrakeChannel {
    fn period_counts(&self) -> u16;
    /// Write the (low_off, high_on) compare pair. Implementations must
    /// disarm (ch3=0, ch4=period+1) before writing the real values, per the
    /// race-safe update protocol in `spec.md` §4.7.
    fn set_timings(&mut self, low_off: u16, high_on: u16);
}

/// External step/direction GPIO source (`spec.md` §1: out-of-scope
/// collaborator, reached only through this port). CORE never owns the
/// GPIO/EXTI configuration; it only consumes the step events this port
/// produces.
pub trait StepDirPort {
    /// Direction read at the most recent step edge (`true` = positive).
    fn last_direction(&self) -> bool;
}

#[cfg(any(test, feature = "host-mock"))]
pub mod mock {
    //! In-memory fakes for the traits above, used by unit tests and by
    //! `--features host-mock` host builds that want to exercise the control
    //! core without real silicon.
    use super::*;

    pub struct MockPwm {
        pub period: u16,
        pub queued: [u16; 3],
        pub live: [u16; 3],
        pub enabled: bool,
        pub count: u16,
        pub counting_down: bool,
    }

    impl MockPwm {
        pub fn new(period: u16) -> Self {
            Self {
                period,
                queued: [period / 2; 3],
                live: [period / 2; 3],
                enabled: false,
                count: 0,
                counting_down: false,
            }
        }
    }

    impl PwmChannel for MockPwm {
        fn period_counts(&self) -> u16 {
            self.period
        }
        fn set_next_timings(&mut self, counts: [u16; 3]) {
            self.queued = counts;
        }
        fn commit_timings(&mut self) {
            self.live = self.queued;
        }
        fn enable_outputs(&mut self) {
            self.enabled = true;
        }
        fn disable_outputs(&mut self) {
            self.enabled = false;
        }
        fn count_and_direction(&self) -> (u16, bool) {
            (self.count, self.counting_down)
        }
    }

    pub struct MockEncoder {
        pub count: u16,
    }

    impl EncoderCounter for MockEncoder {
        fn count(&self) -> u16 {
            self.count
        }
    }

    pub struct MockGateDriver {
        pub config: GateDriverConfig,
        pub enabled: bool,
    }

    impl GateDriverPort for MockGateDriver {
        fn enable(&mut self) {
            self.enabled = true;
        }
        fn disable(&mut self) {
            self.enabled = false;
        }
        fn write_config(&mut self, config: &GateDriverConfig) -> Result<()> {
            self.config = *config;
            Ok(())
        }
        fn read_config(&mut self) -> Result<GateDriverConfig> {
            Ok(self.config)
        }
    }

    pub struct MockBrake {
        pub period: u16,
        pub low_off: u16,
        pub high_on: u16,
        pub disarm_writes: u32,
    }

    impl BrakeChannel for MockBrake {
        fn period_counts(&self) -> u16 {
            self.period
        }
        fn set_timings(&mut self, low_off: u16, high_on: u16) {
            self.disarm_writes += 1;
            self.low_off = low_off;
            self.high_on = high_on;
        }
    }
}
