//! Synchronous trap causes raised by fetch, decode, execute, and the SV39
//! walker.

use thiserror::Error;

/// A RISC-V exception (synchronous trap), with the standard architectural
/// cause code and, where the instruction set defines one, the faulting
/// value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Exception {
    #[error("instruction address misaligned: {0:#x}")]
    InstructionAddressMisaligned(u64),
    #[error("instruction access fault")]
    InstructionAccessFault,
    #[error("illegal instruction: {0:#010x}")]
    IllegalInstruction(u64),
    #[error("breakpoint")]
    Breakpoint,
    #[error("load address misaligned")]
    LoadAddressMisaligned,
    #[error("load access fault")]
    LoadAccessFault,
    #[error("store/amo address misaligned")]
    StoreAMOAddressMisaligned,
    #[error("store/amo access fault")]
    StoreAMOAccessFault,
    #[error("environment call from U-mode")]
    EnvironmentCallFromUMode,
    #[error("environment call from S-mode")]
    EnvironmentCallFromSMode,
    #[error("environment call from M-mode")]
    EnvironmentCallFromMMode,
    #[error("instruction page fault: {0:#x}")]
    InstructionPageFault(u64),
    #[error("load page fault: {0:#x}")]
    LoadPageFault(u64),
    #[error("store/amo page fault: {0:#x}")]
    StoreAMOPageFault(u64),
}

impl Exception {
    /// The standard RISC-V exception cause code written to `*cause`.
    pub fn cause(&self) -> u64 {
        match self {
            Exception::InstructionAddressMisaligned(_) => 0,
            Exception::InstructionAccessFault => 1,
            Exception::IllegalInstruction(_) => 2,
            Exception::Breakpoint => 3,
            Exception::LoadAddressMisaligned => 4,
            Exception::LoadAccessFault => 5,
            Exception::StoreAMOAddressMisaligned => 6,
            Exception::StoreAMOAccessFault => 7,
            Exception::EnvironmentCallFromUMode => 8,
            Exception::EnvironmentCallFromSMode => 9,
            Exception::EnvironmentCallFromMMode => 11,
            Exception::InstructionPageFault(_) => 12,
            Exception::LoadPageFault(_) => 13,
            Exception::StoreAMOPageFault(_) => 15,
        }
    }

    /// Whether this exception is fatal: the host is notified and the main
    /// loop terminates after the trap is taken (`spec.md` §4.6).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Exception::InstructionAddressMisaligned(_)
                | Exception::InstructionAccessFault
                | Exception::LoadAccessFault
                | Exception::StoreAMOAddressMisaligned
                | Exception::StoreAMOAccessFault
        )
    }
}
