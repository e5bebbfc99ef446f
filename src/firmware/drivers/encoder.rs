//! `EncoderCounter` adapter over a general-purpose timer configured in
//! hardware quadrature-encoder mode (`spec.md` §6: "16-bit up/down counter
//! in quadrature X4 mode").
//!
//! `embassy_stm32` has no encoder-mode driver at the HAL level (only PWM
//! and capture/compare), so this adapter configures the timer's slave-mode
//! controller directly through the raw registers, the same
//! `unstable-pac` route `drivers::pwm::MotorPwm::count_and_direction` uses
//! for the same reason.

use embassy_stm32::timer::GeneralInstance4Channel;

use crate::firmware::hal::EncoderCounter;

/// Encoder-mode slave-mode-controller selector, X4 (count on both edges of
/// both channels).
const SMS_ENCODER_MODE_3: u8 = 0b011;

pub struct TimerEncoder<T: GeneralInstance4Channel> {
    _timer: core::marker::PhantomData<T>,
}

impl<T: GeneralInstance4Channel> TimerEncoder<T> {
    /// Configures `T` for quadrature X4 decoding. The timer's two input
    /// channels must already be wired to the encoder's A/B outputs by the
    /// caller (`system.rs`'s peripheral bring-up); this only sets the
    /// slave-mode and input-capture filtering needed for clean decoding.
    pub fn new(_tim: embassy_stm32::Peri<'static, T>) -> Self {
        let regs = T::regs_gp16();
        regs.smcr().modify(|r| r.set_sms(SMS_ENCODER_MODE_3));
        regs.ccmr_input(0).modify(|r| {
            r.set_ccs(0, embassy_stm32::pac::timer::vals::CcmrInputCcs::TI4);
            r.set_ccs(1, embassy_stm32::pac::timer::vals::CcmrInputCcs::TI3);
        });
        regs.ccer().modify(|r| {
            r.set_cce(0, true);
            r.set_cce(1, true);
        });
        regs.cr1().modify(|r| r.set_cen(true));
        Self {
            _timer: core::marker::PhantomData,
        }
    }
}

impl<T: GeneralInstance4Channel> EncoderCounter for TimerEncoder<T> {
    fn count(&self) -> u16 {
        T::regs_gp16().cnt().read().cnt()
    }
}
