//! Calibration engine (C8): phase resistance, phase inductance, encoder
//! offset & direction, and the gains derived from them (`spec.md` §4.6).
//!
//! Each phase is iterative — it advances one control cycle at a time,
//! driven by the calibrating motor's worker loop rather than run to
//! completion in one call, matching the cooperative-suspension model in
//! `spec.md` §5 (the worker's only suspension points are the signal wait
//! and the bounded sleep; calibration borrows those same cycles).

use crate::firmware::error::FirmwareError;

const RESISTANCE_KI: f32 = 10.0; // V/s/A
const RESISTANCE_WINDOW_S: f32 = 3.0;
const RESISTANCE_RANGE: core::ops::RangeInclusive<f32> = 0.01..=1.0;

const INDUCTANCE_CYCLES_PER_PHASE: u32 = 5000;
const INDUCTANCE_RANGE_H: core::ops::RangeInclusive<f32> = 1.0e-6..=500.0e-6;

const ENCODER_HOLD_S: f32 = 1.0;
const ENCODER_SWEEP_STEPS: u32 = 1024;
const ENCODER_DIRECTION_THRESHOLD: i32 = 8;

const BW_CURRENT_RAD_S: f32 = 1000.0;
const BW_PLL_RAD_S: f32 = 1000.0;

/// (a) Phase resistance identification.
pub struct ResistanceCalib {
    i_des: f32,
    v_max: f32,
    v: f32,
    saturated: bool,
    cycles_done: u32,
    total_cycles: u32,
}

impl ResistanceCalib {
    pub fn new(i_des: f32, v_max: f32, period_s: f32) -> Self {
        Self {
            i_des,
            v_max,
            v: 0.0,
            saturated: false,
            cycles_done: 0,
            total_cycles: (RESISTANCE_WINDOW_S / period_s) as u32,
        }
    }

    /// Applied α-axis voltage command for this cycle's injection.
    pub fn applied_voltage(&self) -> f32 {
        self.v
    }

    /// One cycle. `i_alpha` is the measured α-axis current. Returns
    /// `Some(resistance)` once the window completes.
    pub fn step(&mut self, i_alpha: f32, period_s: f32) -> Result<Option<f32>, FirmwareError> {
        self.v += RESISTANCE_KI * period_s * (self.i_des - i_alpha);
        let clamped = self.v.clamp(-self.v_max, self.v_max);
        if clamped != self.v {
            self.saturated = true;
        }
        self.v = clamped;
        self.cycles_done += 1;

        if self.cycles_done < self.total_cycles {
            return Ok(None);
        }

        if self.saturated {
            return Err(FirmwareError::PhaseResistanceOutOfRange);
        }
        let r = self.v / self.i_des;
        if !RESISTANCE_RANGE.contains(&r) {
            return Err(FirmwareError::PhaseResistanceOutOfRange);
        }
        Ok(Some(r))
    }
}

#[derive(Clone, Copy, PartialEq)]
enum InductancePhase {
    Low,
    High,
}

/// (b) Phase inductance identification.
pub struct InductanceCalib {
    v_lo: f32,
    v_hi: f32,
    phase: InductancePhase,
    cycles_in_phase: u32,
    sum_lo: f32,
    sum_hi: f32,
}

impl InductanceCalib {
    pub fn new(v_lo: f32, v_hi: f32) -> Self {
        Self {
            v_lo,
            v_hi,
            phase: InductancePhase::Low,
            cycles_in_phase: 0,
            sum_lo: 0.0,
            sum_hi: 0.0,
        }
    }

    pub fn applied_voltage(&self) -> f32 {
        match self.phase {
            InductancePhase::Low => self.v_lo,
            InductancePhase::High => self.v_hi,
        }
    }

    pub fn step(&mut self, i_alpha: f32, period_s: f32) -> Option<Result<f32, FirmwareError>> {
        match self.phase {
            InductancePhase::Low => self.sum_lo += i_alpha,
            InductancePhase::High => self.sum_hi += i_alpha,
        }
        self.cycles_in_phase += 1;

        if self.cycles_in_phase < INDUCTANCE_CYCLES_PER_PHASE {
            return None;
        }
        self.cycles_in_phase = 0;

        if self.phase == InductancePhase::Low {
            self.phase = InductancePhase::High;
            return None;
        }

        let n = INDUCTANCE_CYCLES_PER_PHASE as f32;
        let di_dt = (self.sum_hi - self.sum_lo) / (n * period_s);
        let l = ((self.v_hi - self.v_lo) / 2.0) / di_dt;
        if !INDUCTANCE_RANGE_H.contains(&l) {
            return Some(Err(FirmwareError::PhaseInductanceOutOfRange));
        }
        Some(Ok(l))
    }
}

#[derive(Clone, Copy, PartialEq)]
enum EncoderStage {
    Hold,
    Forward,
    Backward,
}

/// (c) Encoder offset & direction identification.
pub struct EncoderOffsetCalib {
    hold_voltage: f32,
    step_size: f32,
    hold_cycles_total: u32,
    hold_cycles_done: u32,
    stage: EncoderStage,
    steps_done: u32,
    phase: f32,
    start_count: i32,
    net_forward: i32,
    sum_counts: i64,
}

pub struct EncoderOffsetResult {
    pub offset: i32,
    pub motor_dir: i8,
}

impl EncoderOffsetCalib {
    pub fn new(i_cal: f32, resistance: f32, period_s: f32) -> Self {
        Self {
            hold_voltage: i_cal * resistance,
            step_size: 4.0 * core::f32::consts::PI / ENCODER_SWEEP_STEPS as f32,
            hold_cycles_total: (ENCODER_HOLD_S / period_s) as u32,
            hold_cycles_done: 0,
            stage: EncoderStage::Hold,
            steps_done: 0,
            phase: 0.0,
            start_count: 0,
            net_forward: 0,
            sum_counts: 0,
        }
    }

    /// α-axis phase and voltage magnitude to command this cycle.
    pub fn applied(&self) -> (f32, f32) {
        (self.phase, self.hold_voltage)
    }

    /// One cycle. `encoder_state` is the rotor observer's unwrapped count.
    /// Returns `Some(result)` once the sweep completes (or fails).
    pub fn step(
        &mut self,
        encoder_state: i32,
    ) -> Option<Result<EncoderOffsetResult, FirmwareError>> {
        match self.stage {
            EncoderStage::Hold => {
                self.hold_cycles_done += 1;
                if self.hold_cycles_done >= self.hold_cycles_total {
                    self.start_count = encoder_state;
                    self.stage = EncoderStage::Forward;
                }
                None
            }
            EncoderStage::Forward => {
                self.sum_counts += encoder_state as i64;
                self.phase += self.step_size;
                self.steps_done += 1;
                if self.steps_done >= ENCODER_SWEEP_STEPS {
                    self.net_forward = encoder_state - self.start_count;
                    self.steps_done = 0;
                    self.stage = EncoderStage::Backward;
                }
                None
            }
            EncoderStage::Backward => {
                self.sum_counts += encoder_state as i64;
                self.phase -= self.step_size;
                self.steps_done += 1;
                if self.steps_done < ENCODER_SWEEP_STEPS {
                    return None;
                }

                let motor_dir = if self.net_forward > ENCODER_DIRECTION_THRESHOLD {
                    1
                } else if self.net_forward < -ENCODER_DIRECTION_THRESHOLD {
                    -1
                } else {
                    return Some(Err(FirmwareError::EncoderResponse));
                };
                let offset = (self.sum_counts / (2 * ENCODER_SWEEP_STEPS as i64)) as i32;
                Some(Ok(EncoderOffsetResult { offset, motor_dir }))
            }
        }
    }
}

/// Control gains derived from measured R, L (`spec.md` §4.6 closing
/// paragraph).
#[derive(Clone, Copy, Debug)]
pub struct DerivedGains {
    pub current_kp: f32,
    pub current_ki: f32,
    pub pll_kp: f32,
    pub pll_ki: f32,
}

/// Derives current-loop and PLL gains from measured phase resistance/
/// inductance. Fails with `CalibrationTiming` if the derived PLL gain
/// would violate the discrete-time stability bound (`spec.md` §4.3:
/// "kp·T < 1 for stability").
pub fn derive_gains(r: f32, l: f32, period_s: f32) -> Result<DerivedGains, FirmwareError> {
    let current_kp = BW_CURRENT_RAD_S * l;
    let current_ki = (r / l) * current_kp;
    let pll_kp = 2.0 * BW_PLL_RAD_S;
    if pll_kp * period_s >= 1.0 {
        return Err(FirmwareError::CalibrationTiming);
    }
    let pll_ki = pll_kp * pll_kp / 4.0;
    Ok(DerivedGains {
        current_kp,
        current_ki,
        pll_kp,
        pll_ki,
    })
}
