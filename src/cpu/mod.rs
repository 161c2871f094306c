//! CPU core: registers, CSRs, `pc`, privilege mode; fetch/decode/execute;
//! drives the MMU, bus, and trap unit (`spec.md` §3, §4.2, §4.5-4.7).

pub mod exec;

use tracing::{debug, trace, warn};

use crate::bus::Bus;
use crate::devices::uart::UART_IRQ;
use crate::devices::virtio::VIRTIO_IRQ;
use crate::exception::Exception;
use crate::interrupt::Interrupt;
use crate::primitives::{DOUBLEWORD, HALFWORD, PAGE_SIZE, WORD};
use crate::reg::csr::state::State;
use crate::reg::csr::{
    MEIP_BIT, MIE, MIP, MSIP_BIT, MSTATUS_MIE, MTIP_BIT, SATP, SEIP_BIT, SSIP_BIT, STIP_BIT,
    XSTATUS_SIE,
};
use crate::reg::IntRegister;
use crate::trap::{take_trap, Trap};

/// The kind of access being translated, deciding which page-fault variant a
/// failed SV39 walk raises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Instruction,
    Load,
    Store,
}

/// Privilege mode. Ordered so `mode <= Mode::Supervisor` reads as "not
/// Machine mode", matching `spec.md` §4.6's delegation check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Mode {
    User = 0b00,
    Supervisor = 0b01,
    Machine = 0b11,
}

#[derive(Debug)]
pub struct Cpu {
    pub int_regs: IntRegister,
    pub pc: u64,
    pub state: State,
    pub mode: Mode,
    pub bus: Bus,
    enable_paging: bool,
    page_table: u64,
}

impl Cpu {
    /// Create a CPU with `dram_size` bytes of DRAM, `pc = DRAM_BASE`, and
    /// `x2` (sp) at the top of DRAM, matching `spec.md` §6's program-load
    /// contract.
    pub fn new(dram_size: u64) -> Self {
        let mut int_regs = IntRegister::new();
        int_regs.write(2, crate::primitives::DRAM_BASE + dram_size);
        Self {
            int_regs,
            pc: crate::primitives::DRAM_BASE,
            state: State::new(),
            mode: Mode::Machine,
            bus: Bus::new(dram_size),
            enable_paging: false,
            page_table: 0,
        }
    }

    /// Reset to the power-on state, keeping DRAM and disk contents intact.
    pub fn reset(&mut self) {
        self.pc = crate::primitives::DRAM_BASE;
        self.mode = Mode::Machine;
        self.state.reset();
        self.int_regs.reset();
        self.int_regs
            .write(2, crate::primitives::DRAM_BASE + self.bus.dram.size());
        self.enable_paging = false;
        self.page_table = 0;
    }

    /// Re-derive `enable_paging`/`page_table` from `satp` (`spec.md` §3's
    /// paging invariant). Called as a side effect of every CSR write.
    pub fn update_paging(&mut self) {
        self.page_table = self.state.read_bits(SATP, 0..=43) * PAGE_SIZE;
        self.enable_paging = self.state.read_bits(SATP, 60..=63) == 8;
    }

    /// Translate a virtual address through the SV39 walker, or return it
    /// unchanged when paging is off (`spec.md` §4.2).
    fn translate(&mut self, addr: u64, access_type: AccessType) -> Result<u64, Exception> {
        if !self.enable_paging {
            return Ok(addr);
        }

        let vpn = [
            (addr >> 12) & 0x1ff,
            (addr >> 21) & 0x1ff,
            (addr >> 30) & 0x1ff,
        ];

        let page_fault = |access_type: AccessType| match access_type {
            AccessType::Instruction => Exception::InstructionPageFault(addr),
            AccessType::Load => Exception::LoadPageFault(addr),
            AccessType::Store => Exception::StoreAMOPageFault(addr),
        };

        let mut a = self.page_table;
        let mut i: i64 = 2;
        let mut pte;
        loop {
            pte = self.bus.load(a + vpn[i as usize] * 8, DOUBLEWORD)?;

            let v = pte & 1;
            let r = (pte >> 1) & 1;
            let w = (pte >> 2) & 1;
            let x = (pte >> 3) & 1;
            if v == 0 || (r == 0 && w == 1) {
                return Err(page_fault(access_type));
            }

            if r == 1 || x == 1 {
                break;
            }

            i -= 1;
            if i < 0 {
                return Err(page_fault(access_type));
            }
            let ppn = (pte >> 10) & 0x0fff_ffff_ffff;
            a = ppn * PAGE_SIZE;
        }

        let pgoff = addr & 0xfff;
        let ppn = [
            (pte >> 10) & 0x1ff,
            (pte >> 19) & 0x1ff,
            (pte >> 28) & 0x03ff_ffff,
        ];

        Ok(match i {
            0 => (((pte >> 10) & 0x0fff_ffff_ffff) << 12) | pgoff,
            1 => (ppn[2] << 30) | (ppn[1] << 21) | (vpn[0] << 12) | pgoff,
            2 => (ppn[2] << 30) | (vpn[1] << 21) | (vpn[0] << 12) | pgoff,
            _ => return Err(page_fault(access_type)),
        })
    }

    /// Load `size` bits from virtual address `v_addr`.
    pub fn read(&mut self, v_addr: u64, size: u8) -> Result<u64, Exception> {
        let p_addr = self.translate(v_addr, AccessType::Load)?;
        self.bus.load(p_addr, size)
    }

    /// Store `size` bits of `value` at virtual address `v_addr`.
    pub fn write(&mut self, v_addr: u64, value: u64, size: u8) -> Result<(), Exception> {
        let p_addr = self.translate(v_addr, AccessType::Store)?;
        self.bus.store(p_addr, size, value)
    }

    /// Fetch the next instruction word at `pc`.
    pub fn fetch(&mut self, size: u8) -> Result<u64, Exception> {
        if size != HALFWORD && size != WORD {
            return Err(Exception::InstructionAccessFault);
        }
        let p_pc = self.translate(self.pc, AccessType::Instruction)?;
        self.bus
            .load(p_pc, size)
            .map_err(|_| Exception::InstructionAccessFault)
    }

    /// Advance CLINT's `mtime` by one tick.
    pub fn devices_increment(&mut self) {
        self.bus.clint.increment(&mut self.state);
    }

    /// Fetch, decode, and execute one instruction, advancing `pc` by 4
    /// before the instruction body runs (`spec.md` §4.5: branch/jump/`auipc`
    /// offsets are expressed relative to the already-advanced `pc`).
    pub fn execute(&mut self) -> Result<u64, Exception> {
        let inst = self.fetch(WORD)?;
        self.pc = self.pc.wrapping_add(4);
        trace!(inst, pc = self.pc, "fetched instruction");

        self.int_regs.write(0, 0);
        let result = exec::execute(self, inst);
        self.int_regs.write(0, 0);

        result?;
        Ok(inst)
    }

    /// Poll device interrupt lines and the PLIC/CSR pending state, returning
    /// the highest-priority interrupt ready to be delivered, if any
    /// (`spec.md` §4.7).
    pub fn check_pending_interrupt(&mut self) -> Option<Interrupt> {
        match self.mode {
            Mode::Machine => {
                if self.state.read_mstatus(MSTATUS_MIE) == 0 {
                    return None;
                }
            }
            Mode::Supervisor => {
                if self.state.read_sstatus(XSTATUS_SIE) == 0 {
                    return None;
                }
            }
            Mode::User => {}
        }

        let irq = if self.bus.uart.is_interrupting() {
            UART_IRQ
        } else if self.bus.virtio.is_interrupting() {
            self.bus
                .virtio_disk_access()
                .expect("virtio disk access failed");
            VIRTIO_IRQ
        } else {
            0
        };

        if irq != 0 {
            self.bus
                .plic_notify(irq as u32)
                .expect("plic claim store failed");
            self.state.write(MIP, self.state.read(MIP) | SEIP_BIT);
        }

        let pending = self.state.read(MIE) & self.state.read(MIP);

        let result = if pending & MEIP_BIT != 0 {
            self.state.write(MIP, self.state.read(MIP) & !MEIP_BIT);
            Some(Interrupt::MachineExternalInterrupt)
        } else if pending & MSIP_BIT != 0 {
            self.state.write(MIP, self.state.read(MIP) & !MSIP_BIT);
            Some(Interrupt::MachineSoftwareInterrupt)
        } else if pending & MTIP_BIT != 0 {
            self.state.write(MIP, self.state.read(MIP) & !MTIP_BIT);
            Some(Interrupt::MachineTimerInterrupt)
        } else if pending & SEIP_BIT != 0 {
            self.state.write(MIP, self.state.read(MIP) & !SEIP_BIT);
            Some(Interrupt::SupervisorExternalInterrupt)
        } else if pending & SSIP_BIT != 0 {
            self.state.write(MIP, self.state.read(MIP) & !SSIP_BIT);
            Some(Interrupt::SupervisorSoftwareInterrupt)
        } else if pending & STIP_BIT != 0 {
            self.state.write(MIP, self.state.read(MIP) & !STIP_BIT);
            Some(Interrupt::SupervisorTimerInterrupt)
        } else {
            None
        };

        if let Some(interrupt) = &result {
            debug!(?interrupt, mode = ?self.mode, "interrupt pending");
        }
        result
    }

    /// Run the fetch/execute/interrupt tick once. Returns the exception that
    /// ended execution, if any — callers decide fatality via
    /// [`Exception::is_fatal`].
    pub fn tick(&mut self) -> Result<(), Exception> {
        self.devices_increment();

        match self.execute() {
            Ok(_) => {}
            Err(e) => {
                warn!(%e, pc = self.pc, mode = ?self.mode, "exception raised");
                take_trap(self, Trap::Exception(e));
                if e.is_fatal() {
                    return Err(e);
                }
            }
        }

        if let Some(interrupt) = self.check_pending_interrupt() {
            take_trap(self, Trap::Interrupt(interrupt));
        }

        Ok(())
    }
}
