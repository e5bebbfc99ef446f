//! Per-motor supervisor state machine (C10): `spec.md` §5's
//! Idle/Calibrating/Running/Fault lifecycle, expressed as pure transition
//! functions so the worker task (C11, `tasks::motor_worker`) can drive them
//! without owning any hardware state itself.

use crate::firmware::error::FirmwareError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum SupervisorState {
    Idle,
    Calibrating,
    Running,
    Fault,
}

/// Flags the host (command interface) sets to request a transition; the
/// worker loop clears the request flags once it has acted on them.
#[derive(Clone, Copy, Debug, Default)]
pub struct SupervisorFlags {
    pub do_calibration: bool,
    pub enable_control: bool,
}

impl SupervisorState {
    /// `Idle` → `Calibrating` on a calibration request, `Idle` → `Running`
    /// when control is enabled without a calibration request (prior
    /// calibration results are reused), else stays `Idle`.
    pub fn from_idle(flags: &SupervisorFlags) -> Self {
        if flags.do_calibration {
            Self::Calibrating
        } else if flags.enable_control {
            Self::Running
        } else {
            Self::Idle
        }
    }

    /// `Calibrating` → `Running` on success, `Calibrating` → `Fault` on any
    /// calibration error.
    pub fn after_calibration(result: Result<(), FirmwareError>) -> Self {
        match result {
            Ok(()) => Self::Running,
            Err(_) => Self::Fault,
        }
    }

    /// `Running` stays `Running` unless a fault is raised or control is
    /// disabled, in which case it returns to `Idle`.
    pub fn after_running(error: FirmwareError, flags: &SupervisorFlags) -> Self {
        if error != FirmwareError::NoError {
            Self::Fault
        } else if !flags.enable_control {
            Self::Idle
        } else {
            Self::Running
        }
    }

    /// `Fault` only clears back to `Idle` on an explicit request — a fault
    /// never self-heals (`spec.md` §5, §7).
    pub fn after_fault(flags: &SupervisorFlags) -> Self {
        if flags.do_calibration || flags.enable_control {
            Self::Idle
        } else {
            Self::Fault
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_stays_idle_with_no_flags_set() {
        let flags = SupervisorFlags::default();
        assert_eq!(SupervisorState::from_idle(&flags), SupervisorState::Idle);
    }

    #[test]
    fn idle_to_calibrating_takes_priority_over_enable() {
        let flags = SupervisorFlags {
            do_calibration: true,
            enable_control: true,
        };
        assert_eq!(
            SupervisorState::from_idle(&flags),
            SupervisorState::Calibrating
        );
    }

    #[test]
    fn idle_to_running_without_calibration_request() {
        let flags = SupervisorFlags {
            do_calibration: false,
            enable_control: true,
        };
        assert_eq!(SupervisorState::from_idle(&flags), SupervisorState::Running);
    }

    #[test]
    fn calibration_success_enters_running() {
        assert_eq!(
            SupervisorState::after_calibration(Ok(())),
            SupervisorState::Running
        );
    }

    #[test]
    fn calibration_failure_enters_fault() {
        assert_eq!(
            SupervisorState::after_calibration(Err(FirmwareError::PhaseResistanceOutOfRange)),
            SupervisorState::Fault
        );
    }

    #[test]
    fn running_fault_latches_regardless_of_flags() {
        let flags = SupervisorFlags {
            do_calibration: false,
            enable_control: true,
        };
        assert_eq!(
            SupervisorState::after_running(FirmwareError::FocTiming, &flags),
            SupervisorState::Fault
        );
    }

    #[test]
    fn running_drops_to_idle_when_disabled() {
        let flags = SupervisorFlags::default();
        assert_eq!(
            SupervisorState::after_running(FirmwareError::NoError, &flags),
            SupervisorState::Idle
        );
    }

    #[test]
    fn fault_never_self_heals() {
        let flags = SupervisorFlags::default();
        assert_eq!(SupervisorState::after_fault(&flags), SupervisorState::Fault);
    }

    #[test]
    fn fault_clears_on_explicit_request() {
        let flags = SupervisorFlags {
            do_calibration: true,
            enable_control: false,
        };
        assert_eq!(SupervisorState::after_fault(&flags), SupervisorState::Idle);
    }
}
