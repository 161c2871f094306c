//! Instruction executor (`spec.md` §4.5). Trimmed from the teacher's
//! `general_exec.rs`/`compressed_exec.rs` down to the opcode groups
//! `spec.md` §1 names: RV64I, `mul`/`divu`/`remuw` from M, `amoadd`/`amoswap`
//! from A, Zicsr, and the privileged `sret`/`mret`/`ecall`/`ebreak`/`fence`
//! instructions. Floating-point, the rest of M (`div`/`rem`/`mulh*`), the
//! compressed extension, and `lr`/`sc` have no counterpart and are dropped.

use super::{Cpu, Mode};
use crate::exception::Exception;
use crate::primitives::{BYTE, DOUBLEWORD, HALFWORD, WORD};
use crate::reg::csr::SATP;

/// Decode and execute one 32-bit instruction word against `cpu`.
pub fn execute(cpu: &mut Cpu, inst: u64) -> Result<(), Exception> {
    let opcode = inst & 0x7f;
    let rd = (inst & 0xf80) >> 7;
    let rs1 = (inst & 0xf_8000) >> 15;
    let rs2 = (inst & 0x1f0_0000) >> 20;
    let funct3 = (inst & 0x7000) >> 12;
    let funct7 = (inst & 0xfe00_0000) >> 25;

    match opcode {
        0x03 => exec_load(cpu, inst, rd, rs1, funct3),
        0x0f => Ok(()), // fence: no-op
        0x13 => exec_int_imm(cpu, inst, rd, rs1, funct3, funct7),
        0x17 => {
            // auipc: rd = pc + sign_ext(imm_u) - 4 (pc has already advanced)
            let imm = (inst & 0xffff_f000) as i32 as i64 as u64;
            cpu.int_regs
                .write(rd, cpu.pc.wrapping_add(imm).wrapping_sub(4));
            Ok(())
        }
        0x1b => exec_w_imm(cpu, inst, rd, rs1, funct3, funct7),
        0x23 => exec_store(cpu, inst, rs1, rs2, funct3),
        0x2f => exec_atomic(cpu, inst, rd, rs1, rs2, funct3, funct7),
        0x33 => exec_reg_reg(cpu, inst, rd, rs1, rs2, funct3, funct7),
        0x37 => {
            // lui
            cpu.int_regs.write(rd, (inst & 0xffff_f000) as i32 as i64 as u64);
            Ok(())
        }
        0x3b => exec_w_reg_reg(cpu, inst, rd, rs1, rs2, funct3, funct7),
        0x63 => exec_branch(cpu, inst, rs1, rs2, funct3),
        0x67 => {
            // jalr: link = pc (already advanced); pc = (rs1 + imm_i) & ~1
            let imm = (inst as i32 as i64) >> 20;
            let target = (cpu.int_regs.read(rs1) as i64).wrapping_add(imm) as u64 & !1;
            let link = cpu.pc;
            cpu.pc = target;
            cpu.int_regs.write(rd, link);
            Ok(())
        }
        0x6f => {
            // jal: link = pc; pc = pc + imm_j - 4
            let imm = (((inst & 0x8000_0000) as i32 as i64 >> 11) as u64)
                | (inst & 0xff000)
                | ((inst >> 9) & 0x800)
                | ((inst >> 20) & 0x7fe);
            cpu.int_regs.write(rd, cpu.pc);
            cpu.pc = cpu.pc.wrapping_add(imm).wrapping_sub(4);
            Ok(())
        }
        0x73 => exec_system(cpu, inst, rd, rs1, funct3),
        _ => Err(Exception::IllegalInstruction(inst)),
    }
}

fn exec_load(cpu: &mut Cpu, inst: u64, rd: u64, rs1: u64, funct3: u64) -> Result<(), Exception> {
    let offset = (inst as i32 as i64 >> 20) as u64;
    let addr = cpu.int_regs.read(rs1).wrapping_add(offset);
    let value = match funct3 {
        0x0 => cpu.read(addr, BYTE)? as i8 as i64 as u64,
        0x1 => cpu.read(addr, HALFWORD)? as i16 as i64 as u64,
        0x2 => cpu.read(addr, WORD)? as i32 as i64 as u64,
        0x3 => cpu.read(addr, DOUBLEWORD)?,
        0x4 => cpu.read(addr, BYTE)?,
        0x5 => cpu.read(addr, HALFWORD)?,
        0x6 => cpu.read(addr, WORD)?,
        _ => return Err(Exception::IllegalInstruction(inst)),
    };
    cpu.int_regs.write(rd, value);
    Ok(())
}

fn exec_int_imm(
    cpu: &mut Cpu,
    inst: u64,
    rd: u64,
    rs1: u64,
    funct3: u64,
    funct7: u64,
) -> Result<(), Exception> {
    let imm = (inst as i32 as i64 >> 20) as u64;
    let shamt = imm & 0x3f;
    let rs1v = cpu.int_regs.read(rs1);
    let value = match funct3 {
        0x0 => rs1v.wrapping_add(imm),
        0x1 => rs1v << shamt,
        0x2 => (((rs1v as i64) < (imm as i64)) as u64),
        0x3 => ((rs1v < imm) as u64),
        0x4 => rs1v ^ imm,
        0x5 => {
            if funct7 >> 1 == 0x10 {
                ((rs1v as i64) >> shamt) as u64
            } else {
                rs1v >> shamt
            }
        }
        0x6 => rs1v | imm,
        0x7 => rs1v & imm,
        _ => return Err(Exception::IllegalInstruction(inst)),
    };
    cpu.int_regs.write(rd, value);
    Ok(())
}

fn exec_w_imm(
    cpu: &mut Cpu,
    inst: u64,
    rd: u64,
    rs1: u64,
    funct3: u64,
    funct7: u64,
) -> Result<(), Exception> {
    let imm = (inst as i32 as i64 >> 20) as u64;
    let shamt = (imm & 0x1f) as u32;
    let rs1v = cpu.int_regs.read(rs1) as u32;
    let value = match funct3 {
        0x0 => (rs1v.wrapping_add(imm as u32) as i32 as i64 as u64),
        0x1 => ((rs1v << shamt) as i32 as i64 as u64),
        0x5 => {
            if funct7 == 0x20 {
                (((rs1v as i32) >> shamt) as i64 as u64)
            } else {
                // srliw: zero-extended shift of the low 32 bits, then sign-extended,
                // matching the reference's implicit i32 re-sign-extension at shamt 0.
                ((rs1v >> shamt) as i32 as i64 as u64)
            }
        }
        _ => return Err(Exception::IllegalInstruction(inst)),
    };
    cpu.int_regs.write(rd, value);
    Ok(())
}

fn exec_store(cpu: &mut Cpu, inst: u64, rs1: u64, rs2: u64, funct3: u64) -> Result<(), Exception> {
    let imm = (((inst & 0xfe00_0000) as i32 as i64 >> 20) as u64) | ((inst >> 7) & 0x1f);
    let addr = cpu.int_regs.read(rs1).wrapping_add(imm);
    let value = cpu.int_regs.read(rs2);
    match funct3 {
        0x0 => cpu.write(addr, value, BYTE),
        0x1 => cpu.write(addr, value, HALFWORD),
        0x2 => cpu.write(addr, value, WORD),
        0x3 => cpu.write(addr, value, DOUBLEWORD),
        _ => Err(Exception::IllegalInstruction(inst)),
    }
}

fn exec_atomic(
    cpu: &mut Cpu,
    inst: u64,
    rd: u64,
    rs1: u64,
    rs2: u64,
    funct3: u64,
    funct7: u64,
) -> Result<(), Exception> {
    let addr = cpu.int_regs.read(rs1);
    let width = match funct3 {
        0x2 => WORD,
        0x3 => DOUBLEWORD,
        _ => return Err(Exception::IllegalInstruction(inst)),
    };
    let funct5 = funct7 >> 2;
    let current = cpu.read(addr, width)?;
    let operand = cpu.int_regs.read(rs2);
    let new_value = match funct5 {
        0x00 => current.wrapping_add(operand), // amoadd
        0x01 => operand,                       // amoswap
        _ => return Err(Exception::IllegalInstruction(inst)),
    };
    let stored = if width == WORD {
        new_value & 0xffff_ffff
    } else {
        new_value
    };
    cpu.write(addr, stored, width)?;
    let result = if width == WORD {
        current as i32 as i64 as u64
    } else {
        current
    };
    cpu.int_regs.write(rd, result);
    Ok(())
}

fn exec_reg_reg(
    cpu: &mut Cpu,
    inst: u64,
    rd: u64,
    rs1: u64,
    rs2: u64,
    funct3: u64,
    funct7: u64,
) -> Result<(), Exception> {
    let rs1v = cpu.int_regs.read(rs1);
    let rs2v = cpu.int_regs.read(rs2);
    let shamt = rs2v & 0x3f;
    let value = match (funct3, funct7) {
        (0x0, 0x00) => rs1v.wrapping_add(rs2v),
        (0x0, 0x20) => rs1v.wrapping_sub(rs2v),
        (0x0, 0x01) => (rs1v as i64).wrapping_mul(rs2v as i64) as u64, // mul
        (0x1, 0x00) => rs1v << shamt,
        (0x2, 0x00) => (((rs1v as i64) < (rs2v as i64)) as u64),
        (0x3, 0x00) => ((rs1v < rs2v) as u64),
        (0x4, 0x00) => rs1v ^ rs2v,
        (0x5, 0x00) => rs1v >> shamt,
        (0x5, 0x20) => ((rs1v as i64) >> shamt) as u64,
        (0x6, 0x00) => rs1v | rs2v,
        (0x7, 0x00) => rs1v & rs2v,
        _ => return Err(Exception::IllegalInstruction(inst)),
    };
    cpu.int_regs.write(rd, value);
    Ok(())
}

fn exec_w_reg_reg(
    cpu: &mut Cpu,
    inst: u64,
    rd: u64,
    rs1: u64,
    rs2: u64,
    funct3: u64,
    funct7: u64,
) -> Result<(), Exception> {
    let rs1v = cpu.int_regs.read(rs1) as u32;
    let rs2v = cpu.int_regs.read(rs2) as u32;
    let shamt = rs2v & 0x1f;
    let value = match (funct3, funct7) {
        (0x0, 0x00) => (rs1v.wrapping_add(rs2v) as i32 as i64 as u64), // addw
        (0x0, 0x20) => (rs1v.wrapping_sub(rs2v) as i32 as i64 as u64), // subw
        (0x1, 0x00) => ((rs1v << shamt) as i32 as i64 as u64),         // sllw
        (0x5, 0x00) => ((rs1v >> shamt) as i32 as i64 as u64),         // srlw
        (0x5, 0x20) => (((rs1v as i32) >> shamt) as i64 as u64),       // sraw
        (0x5, 0x01) => {
            // divu: zero divisor yields all-ones, no trap
            if rs2v == 0 {
                u64::MAX
            } else {
                (rs1v / rs2v) as i32 as i64 as u64
            }
        }
        (0x7, 0x01) => {
            // remuw: zero divisor leaves the dividend unchanged
            if rs2v == 0 {
                rs1v as i32 as i64 as u64
            } else {
                (rs1v % rs2v) as i32 as i64 as u64
            }
        }
        _ => return Err(Exception::IllegalInstruction(inst)),
    };
    cpu.int_regs.write(rd, value);
    Ok(())
}

fn exec_branch(cpu: &mut Cpu, inst: u64, rs1: u64, rs2: u64, funct3: u64) -> Result<(), Exception> {
    let imm = (((inst & 0x8000_0000) as i32 as i64 >> 19) as u64)
        | ((inst & 0x80) << 4)
        | ((inst >> 20) & 0x7e0)
        | ((inst >> 7) & 0x1e);
    let rs1v = cpu.int_regs.read(rs1);
    let rs2v = cpu.int_regs.read(rs2);
    let taken = match funct3 {
        0x0 => rs1v == rs2v,
        0x1 => rs1v != rs2v,
        0x4 => (rs1v as i64) < (rs2v as i64),
        0x5 => (rs1v as i64) >= (rs2v as i64),
        0x6 => rs1v < rs2v,
        0x7 => rs1v >= rs2v,
        _ => return Err(Exception::IllegalInstruction(inst)),
    };
    if taken {
        cpu.pc = cpu.pc.wrapping_add(imm).wrapping_sub(4);
    }
    Ok(())
}

fn exec_system(cpu: &mut Cpu, inst: u64, rd: u64, rs1: u64, funct3: u64) -> Result<(), Exception> {
    let csr_addr = ((inst >> 20) & 0xfff) as u16;
    match funct3 {
        0x0 => {
            let rs2 = (inst & 0x1f0_0000) >> 20;
            let funct7 = (inst & 0xfe00_0000) >> 25;
            match (rs2, funct7) {
                (0x0, 0x0) => Err(match cpu.mode {
                    Mode::User => Exception::EnvironmentCallFromUMode,
                    Mode::Supervisor => Exception::EnvironmentCallFromSMode,
                    Mode::Machine => Exception::EnvironmentCallFromMMode,
                }),
                (0x1, 0x0) => Err(Exception::Breakpoint),
                (0x2, 0x8) => {
                    exec_sret(cpu);
                    Ok(())
                }
                (0x2, 0x18) => {
                    exec_mret(cpu);
                    Ok(())
                }
                (_, 0x9) => Ok(()), // sfence.vma: no-op
                _ => Err(Exception::IllegalInstruction(inst)),
            }
        }
        0x1 | 0x2 | 0x3 | 0x5 | 0x6 | 0x7 => exec_csr(cpu, inst, rd, rs1, funct3, csr_addr),
        _ => Err(Exception::IllegalInstruction(inst)),
    }
}

fn exec_sret(cpu: &mut Cpu) {
    use crate::reg::csr::{SEPC, XSTATUS_SIE, XSTATUS_SPIE, XSTATUS_SPP};
    cpu.pc = cpu.state.read(SEPC);
    cpu.mode = if cpu.state.read_sstatus(XSTATUS_SPP) == 1 {
        Mode::Supervisor
    } else {
        Mode::User
    };
    cpu.state
        .write_sstatus(XSTATUS_SIE, cpu.state.read_sstatus(XSTATUS_SPIE));
    cpu.state.write_sstatus(XSTATUS_SPIE, 1);
    cpu.state.write_sstatus(XSTATUS_SPP, 0);
}

fn exec_mret(cpu: &mut Cpu) {
    use crate::reg::csr::{MEPC, MSTATUS_MIE, MSTATUS_MPIE, MSTATUS_MPP};
    cpu.pc = cpu.state.read(MEPC);
    cpu.mode = match cpu.state.read_mstatus(MSTATUS_MPP) {
        0b11 => Mode::Machine,
        0b01 => Mode::Supervisor,
        _ => Mode::User,
    };
    cpu.state
        .write_mstatus(MSTATUS_MIE, cpu.state.read_mstatus(MSTATUS_MPIE));
    cpu.state.write_mstatus(MSTATUS_MPIE, 1);
    cpu.state.write_mstatus(MSTATUS_MPP, 0b00);
}

fn exec_csr(
    cpu: &mut Cpu,
    inst: u64,
    rd: u64,
    rs1: u64,
    funct3: u64,
    csr_addr: u16,
) -> Result<(), Exception> {
    let operand = if funct3 >= 0x5 { rs1 } else { cpu.int_regs.read(rs1) };
    let old = cpu.state.read(csr_addr);
    let new = match funct3 {
        0x1 | 0x5 => operand,          // csrrw / csrrwi
        0x2 | 0x6 => old | operand,    // csrrs / csrrsi
        0x3 | 0x7 => old & !operand,   // csrrc / csrrci
        _ => return Err(Exception::IllegalInstruction(inst)),
    };
    cpu.state.write(csr_addr, new);
    cpu.int_regs.write(rd, old);

    if csr_addr == SATP {
        cpu.update_paging();
    }
    Ok(())
}
