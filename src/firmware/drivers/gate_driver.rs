//! `GateDriverPort` adapter over a blocking SPI link to an external
//! gate-driver chip (`spec.md` §3 `GateDriver`, §6 "SPI register image").
//!
//! Framing follows the status-byte-plus-data convention the tmc5072 driver
//! in the example pack uses for its own register reads/writes
//! (`SpiOk<T>::from_buffer`): a status byte, then the register payload.
//! Only the configuration image CORE cares about (`GateDriverConfig`) is
//! modelled; the chip's other registers (gain/timing trims outside
//! `spec.md`'s scope) are never touched by this adapter.

use embassy_stm32::gpio::Output;
use embassy_stm32::spi::Spi;

use crate::firmware::error::{FirmwareError, Result};
use crate::firmware::hal::{GateDriverConfig, GateDriverPort, OcMode, ShuntAmpGain};

const REG_CONTROL: u8 = 0x02;

fn encode_oc_mode(mode: OcMode) -> u8 {
    match mode {
        OcMode::LatchShutdown => 0,
        OcMode::ReportOnly => 1,
    }
}

fn decode_oc_mode(bits: u8) -> OcMode {
    if bits & 0x01 != 0 {
        OcMode::ReportOnly
    } else {
        OcMode::LatchShutdown
    }
}

fn encode_gain(gain: ShuntAmpGain) -> u8 {
    match gain {
        ShuntAmpGain::Gain10VpV => 0,
        ShuntAmpGain::Gain20VpV => 1,
        ShuntAmpGain::Gain40VpV => 2,
        ShuntAmpGain::Gain80VpV => 3,
    }
}

fn decode_gain(bits: u8) -> ShuntAmpGain {
    match bits & 0x03 {
        0 => ShuntAmpGain::Gain10VpV,
        1 => ShuntAmpGain::Gain20VpV,
        2 => ShuntAmpGain::Gain40VpV,
        _ => ShuntAmpGain::Gain80VpV,
    }
}

/// Packs `GateDriverConfig` into the 2-byte register image this adapter
/// writes/reads: byte 0 holds the OC mode bit and the two-bit gain
/// selector, byte 1 the OC threshold as an 8-bit fixed-point code (the
/// chip's native Vds-level units, per `spec.md` §3).
fn encode_config(config: &GateDriverConfig) -> [u8; 2] {
    let mode_gain = encode_oc_mode(config.oc_mode) | (encode_gain(config.shunt_amp_gain) << 1);
    let threshold = (config.oc_threshold.clamp(0.0, 25.5) * 10.0) as u8;
    [mode_gain, threshold]
}

fn decode_config(bytes: [u8; 2]) -> GateDriverConfig {
    GateDriverConfig {
        oc_mode: decode_oc_mode(bytes[0]),
        shunt_amp_gain: decode_gain(bytes[0] >> 1),
        oc_threshold: bytes[1] as f32 / 10.0,
    }
}

/// Blocking-SPI gate-driver port, with a GPIO enable pin wired separately
/// from the SPI CS (the chip's enable input is a dedicated pin, not part
/// of the register protocol).
pub struct SpiGateDriver {
    spi: Spi<'static, embassy_stm32::mode::Blocking>,
    cs: Output<'static>,
    en: Output<'static>,
}

impl SpiGateDriver {
    pub fn new(
        spi: Spi<'static, embassy_stm32::mode::Blocking>,
        cs: Output<'static>,
        en: Output<'static>,
    ) -> Self {
        Self { spi, cs, en }
    }

    fn transfer(&mut self, tx: &[u8; 3]) -> Result<[u8; 3]> {
        let mut rx = [0u8; 3];
        self.cs.set_low();
        let result = self.spi.blocking_transfer(&mut rx, tx);
        self.cs.set_high();
        result.map_err(|_| FirmwareError::PwmSrcFail)?;
        Ok(rx)
    }
}

impl GateDriverPort for SpiGateDriver {
    fn enable(&mut self) {
        self.en.set_high();
    }

    fn disable(&mut self) {
        self.en.set_low();
    }

    fn write_config(&mut self, config: &GateDriverConfig) -> Result<()> {
        let payload = encode_config(config);
        let tx = [REG_CONTROL, payload[0], payload[1]];
        self.transfer(&tx)?;
        Ok(())
    }

    fn read_config(&mut self) -> Result<GateDriverConfig> {
        let tx = [REG_CONTROL | 0x80, 0, 0];
        let rx = self.transfer(&tx)?;
        Ok(decode_config([rx[1], rx[2]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips_through_encoding() {
        let config = GateDriverConfig {
            oc_mode: OcMode::ReportOnly,
            oc_threshold: 12.3,
            shunt_amp_gain: ShuntAmpGain::Gain40VpV,
        };
        let bytes = encode_config(&config);
        let decoded = decode_config(bytes);
        assert_eq!(decoded.oc_mode, config.oc_mode);
        assert_eq!(decoded.shunt_amp_gain, config.shunt_amp_gain);
        assert!((decoded.oc_threshold - config.oc_threshold).abs() < 0.1);
    }

    #[test]
    fn latch_shutdown_is_default_bit_pattern() {
        let config = GateDriverConfig {
            oc_mode: OcMode::LatchShutdown,
            oc_threshold: 0.0,
            shunt_amp_gain: ShuntAmpGain::Gain10VpV,
        };
        assert_eq!(encode_config(&config)[0] & 0x01, 0);
    }
}
