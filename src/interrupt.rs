//! Asynchronous trap causes delivered by [`crate::cpu::Cpu::check_pending_interrupt`].

use thiserror::Error;

/// A RISC-V interrupt (asynchronous trap), in the priority order `spec.md`
/// §4.7 assigns when more than one is pending simultaneously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interrupt {
    #[error("machine external interrupt")]
    MachineExternalInterrupt,
    #[error("machine software interrupt")]
    MachineSoftwareInterrupt,
    #[error("machine timer interrupt")]
    MachineTimerInterrupt,
    #[error("supervisor external interrupt")]
    SupervisorExternalInterrupt,
    #[error("supervisor software interrupt")]
    SupervisorSoftwareInterrupt,
    #[error("supervisor timer interrupt")]
    SupervisorTimerInterrupt,
}

impl Interrupt {
    /// The standard RISC-V interrupt cause code, before the bit-63 `is_interrupt` tag is ORed in.
    pub fn cause(&self) -> u64 {
        match self {
            Interrupt::SupervisorSoftwareInterrupt => 1,
            Interrupt::MachineSoftwareInterrupt => 3,
            Interrupt::SupervisorTimerInterrupt => 5,
            Interrupt::MachineTimerInterrupt => 7,
            Interrupt::SupervisorExternalInterrupt => 9,
            Interrupt::MachineExternalInterrupt => 11,
        }
    }
}
