//! Trap delivery: computes cause, selects M- vs S-mode delegation, and
//! updates `*status`/`*epc`/`*cause`/`*tval`/`pc` (`spec.md` §4.6).
//!
//! Built fresh against `original_source/src/Trap.cpp::take_trap`, the
//! authoritative reference for this component — the teacher's Rust crate
//! never implemented a standalone trap module.

use crate::cpu::{Cpu, Mode};
use crate::exception::Exception;
use crate::interrupt::Interrupt;
use crate::reg::csr::{
    MCAUSE, MEDELEG, MEPC, MSTATUS_MIE, MSTATUS_MPIE, MSTATUS_MPP, MTVAL, MTVEC, SCAUSE, SEPC,
    STVAL, STVEC, XSTATUS_SIE, XSTATUS_SPIE, XSTATUS_SPP,
};

/// The outcome of one instruction's trap path, mirroring `Except::InvalidExcept`
/// / `Interrupt::InvalidInterrupt` as "no trap at all" in the C++ original.
pub enum Trap {
    Exception(Exception),
    Interrupt(Interrupt),
}

impl From<Exception> for Trap {
    fn from(e: Exception) -> Self {
        Trap::Exception(e)
    }
}

impl From<Interrupt> for Trap {
    fn from(i: Interrupt) -> Self {
        Trap::Interrupt(i)
    }
}

/// Take a trap on `cpu`, updating `mode`/`pc` and the trap CSRs.
///
/// Delegation for both exceptions and interrupts is decided by the same
/// `medeleg` bit index. This is the reference's documented quirk (interrupt
/// delegation should normally consult `mideleg`), preserved per `spec.md`
/// §9's Open Questions rather than "fixed".
pub fn take_trap(cpu: &mut Cpu, trap: Trap) {
    let exception_pc = cpu.pc.wrapping_sub(4);
    let previous_mode = cpu.mode;

    let (cause, is_interrupt) = match trap {
        Trap::Exception(e) => (e.cause(), false),
        Trap::Interrupt(i) => (i.cause() | (1u64 << 63), true),
    };

    let delegated = previous_mode <= Mode::Supervisor
        && ((cpu.state.read(MEDELEG) >> (cause & 0x3f)) & 1) != 0;

    if delegated {
        cpu.mode = Mode::Supervisor;

        cpu.pc = if is_interrupt {
            let vector = if cpu.state.read(STVEC) & 1 == 1 {
                4 * (cause & !(1u64 << 63))
            } else {
                0
            };
            (cpu.state.read(STVEC) & !1) + vector
        } else {
            cpu.state.read(STVEC) & !1
        };

        cpu.state.write(SEPC, exception_pc & !1);
        cpu.state.write(SCAUSE, cause);
        cpu.state.write(STVAL, 0);

        cpu.state
            .write_sstatus(XSTATUS_SPIE, cpu.state.read_sstatus(XSTATUS_SIE));
        cpu.state.write_sstatus(XSTATUS_SIE, 0);
        cpu.state.write_sstatus(
            XSTATUS_SPP,
            if previous_mode == Mode::User { 0 } else { 1 },
        );
    } else {
        cpu.mode = Mode::Machine;

        cpu.pc = if is_interrupt {
            let vector = if cpu.state.read(MTVEC) & 1 == 1 {
                4 * (cause & !(1u64 << 63))
            } else {
                0
            };
            (cpu.state.read(MTVEC) & !1) + vector
        } else {
            cpu.state.read(MTVEC) & !1
        };

        cpu.state.write(MEPC, exception_pc & !1);
        cpu.state.write(MCAUSE, cause);
        cpu.state.write(MTVAL, 0);

        cpu.state
            .write_mstatus(MSTATUS_MPIE, cpu.state.read_mstatus(MSTATUS_MIE));
        cpu.state.write_mstatus(MSTATUS_MIE, 0);
        cpu.state.write_mstatus(MSTATUS_MPP, 0);
    }
}
