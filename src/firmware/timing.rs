//! Timing orchestrator (C3): classifies each ADC-done IRQ by (motor,
//! direction), decides cross-cycle compare-register commits, and keeps the
//! over-run-visible timing log (`spec.md` §4.1).

use crate::firmware::config::TIMING_LOG_SIZE;
use crate::firmware::error::FirmwareError;

/// Which of the two phase-offset PWM timers raised this IRQ.
#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum MotorSlot {
    M0,
    M1,
}

/// What vector a sample was taken in (`spec.md` §4.1).
#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum SampleClass {
    /// SVM vector 0 (all-low): real phase currents.
    CurrentSample,
    /// SVM vector 7 (all-high): DC-offset calibration sample.
    DcCalSample,
}

/// Classifies ADC IRQs and decides cross-motor compare-register commits.
///
/// Each motor alternates `CurrentSample`, `DcCalSample`, `CurrentSample`,
/// ... every half carrier period. A direction reading that doesn't match
/// the alternation a motor is expected to be in is a wiring/IRQ-routing
/// fault, not a transient condition, so it is latched as a global error
/// rather than silently resynchronised.
pub struct TimingOrchestrator {
    period: u16,
    expected: [SampleClass; 2],
    log: heapless::HistoryBuffer<u16, TIMING_LOG_SIZE>,
}

impl TimingOrchestrator {
    pub fn new(period: u16) -> Self {
        Self {
            period,
            expected: [SampleClass::CurrentSample; 2],
            log: heapless::HistoryBuffer::new(),
        }
    }

    /// Classify one IRQ. `counting_down == true` means the timer is now
    /// counting down (i.e. it just reached the top — vector 7 / DC-cal);
    /// `false` means it just reached the bottom and started counting up
    /// (vector 0 / current sample).
    pub fn classify(
        &mut self,
        slot: MotorSlot,
        count: u16,
        counting_down: bool,
    ) -> Result<SampleClass, FirmwareError> {
        let class = if counting_down {
            SampleClass::DcCalSample
        } else {
            SampleClass::CurrentSample
        };

        let idx = slot as usize;
        if class != self.expected[idx] {
            return Err(FirmwareError::PwmSrcFail);
        }
        self.expected[idx] = match class {
            SampleClass::CurrentSample => SampleClass::DcCalSample,
            SampleClass::DcCalSample => SampleClass::CurrentSample,
        };

        self.log.write(self.effective_count(count, counting_down));
        Ok(class)
    }

    /// Count reflected across the top-of-ramp, so an over-running control
    /// loop that delays the next classification shows up as a count greater
    /// than `P` rather than wrapping back toward zero.
    fn effective_count(&self, count: u16, counting_down: bool) -> u16 {
        if counting_down {
            self.period.saturating_add(self.period.saturating_sub(count))
        } else {
            count
        }
    }

    /// Whether this classified event is the trigger point for committing
    /// the *other* motor's queued timings into its compare registers
    /// (`spec.md` §4.1: "on the first of the two ADC channels for that
    /// event").
    pub fn should_commit_other(slot: MotorSlot, class: SampleClass) -> bool {
        matches!(
            (slot, class),
            (MotorSlot::M1, SampleClass::DcCalSample) | (MotorSlot::M0, SampleClass::CurrentSample)
        )
    }

    /// Whether this classified event is the trigger point for a motor to
    /// commit its *own* queued timings, used only on boards with no paired
    /// motor for `should_commit_other` to target (`spec.md` §4.1, §9: a
    /// single-motor board still needs a safe point to move `next_timings`
    /// into the live compare registers). The DC-cal vector (all-high)
    /// carries zero differential switching, so updating compare registers
    /// there can't glitch the vector currently in flight.
    pub fn should_commit_self(class: SampleClass) -> bool {
        matches!(class, SampleClass::DcCalSample)
    }

    pub fn log(&self) -> &heapless::HistoryBuffer<u16, TIMING_LOG_SIZE> {
        &self.log
    }

    pub fn period(&self) -> u16 {
        self.period
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alternates_current_and_dc_cal() {
        let mut t = TimingOrchestrator::new(4250);
        assert_eq!(
            t.classify(MotorSlot::M0, 0, false).unwrap(),
            SampleClass::CurrentSample
        );
        assert_eq!(
            t.classify(MotorSlot::M0, 4250, true).unwrap(),
            SampleClass::DcCalSample
        );
        assert_eq!(
            t.classify(MotorSlot::M0, 0, false).unwrap(),
            SampleClass::CurrentSample
        );
    }

    #[test]
    fn out_of_order_classification_is_a_fault() {
        let mut t = TimingOrchestrator::new(4250);
        // First event for M0 must be CurrentSample; feeding DcCal first is
        // an impossible sequence.
        assert_eq!(
            t.classify(MotorSlot::M0, 4250, true),
            Err(FirmwareError::PwmSrcFail)
        );
    }

    #[test]
    fn commit_points_match_cross_motor_rule() {
        assert!(TimingOrchestrator::should_commit_other(
            MotorSlot::M1,
            SampleClass::DcCalSample
        ));
        assert!(TimingOrchestrator::should_commit_other(
            MotorSlot::M0,
            SampleClass::CurrentSample
        ));
        assert!(!TimingOrchestrator::should_commit_other(
            MotorSlot::M0,
            SampleClass::DcCalSample
        ));
        assert!(!TimingOrchestrator::should_commit_other(
            MotorSlot::M1,
            SampleClass::CurrentSample
        ));
    }

    #[test]
    fn commit_self_triggers_only_on_dc_cal() {
        assert!(TimingOrchestrator::should_commit_self(SampleClass::DcCalSample));
        assert!(!TimingOrchestrator::should_commit_self(SampleClass::CurrentSample));
    }

    #[test]
    fn effective_count_reflects_across_top() {
        let t = TimingOrchestrator::new(1000);
        assert_eq!(t.effective_count(1000, true), 1000);
        assert_eq!(t.effective_count(900, true), 1100);
        assert_eq!(t.effective_count(200, false), 200);
    }
}
