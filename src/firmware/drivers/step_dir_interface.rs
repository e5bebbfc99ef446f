//! STEP/DIR GPIO interface (`spec.md` §1: "step/dir ISR pushes into a
//! queue CORE drains — out of scope, external collaborator" — CORE only
//! ever consumes this through `hal::StepDirPort`; the EXTI wiring and
//! pulse-counting queue that drive it live entirely in this file and in
//! `tasks.rs`'s IRQ trampoline, never inside `motor.rs`).
//!
//! ENABLE/ERROR pins from the teacher's original interface have no
//! counterpart in `hal::StepDirPort` or anywhere in `spec.md` and were
//! dropped (`DESIGN.md`); only STEP (an EXTI pulse source) and DIR (a
//! plain level input) remain.

use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::{Input, Pull};

use crate::firmware::hal::StepDirPort;

/// STEP/DIR GPIO pair. `wait_for_step` is driven from an async task that
/// counts pulses into the step queue `spec.md` §1 describes; `StepDirPort`
/// is implemented on the snapshot taken at each step edge, not on this
/// struct directly, since CORE must see `last_direction` as a plain,
/// already-sampled value rather than a live GPIO read.
pub struct StepDirGpio {
    step: ExtiInput<'static>,
    dir: Input<'static>,
}

impl StepDirGpio {
    pub fn new(step: ExtiInput<'static>, dir: Input<'static>) -> Self {
        Self { step, dir }
    }

    /// Awaits the next STEP rising edge. Called only from the step-queue
    /// task, never from CORE.
    pub async fn wait_for_step(&mut self) -> StepSample {
        self.step.wait_for_rising_edge().await;
        StepSample {
            direction: self.dir.is_high(),
        }
    }
}

/// Direction latched at one STEP edge, handed to CORE through
/// `hal::StepDirPort`.
#[derive(Clone, Copy, Debug)]
pub struct StepSample {
    direction: bool,
}

impl StepDirPort for StepSample {
    fn last_direction(&self) -> bool {
        self.direction
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_sample_reports_latched_direction() {
        let fwd = StepSample { direction: true };
        let rev = StepSample { direction: false };
        assert!(fwd.last_direction());
        assert!(!rev.last_direction());
    }
}
