//! Decoded RV32 instructions, as consumed by the [`Machine`].
//!
//! This crate does not assemble or decode instructions. Programs are built
//! directly out of [`Instr`] values and placed in memory with a [`Program`].
//!
//! [`Machine`]: crate::sim::Machine

use std::fmt::Write as _;
use std::num::TryFromIntError;

/// An integer register. Must be between 0 and 31.
///
/// This `Reg` struct can either be constructed by selecting a register from [`reg_consts`],
/// or by using [`Reg::try_from`].
///
/// Registers are displayed with their ABI names:
/// ```
/// use rv_multihart::ast::reg_consts::{A0, T1, ZERO};
///
/// assert_eq!(A0.to_string(), "a0");
/// assert_eq!(T1.to_string(), "t1");
/// assert_eq!(ZERO.to_string(), "zero");
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Reg(pub(crate) u8);

macro_rules! reg_consts {
    ($($name:ident = $value:literal),+) => {
        /// Register constants, named by ABI name.
        pub mod reg_consts {
            use super::Reg;

            $(
                #[doc = concat!("Register x", stringify!($value), ".")]
                pub const $name: Reg = Reg($value);
            )+
        }
    }
}
reg_consts!(
    ZERO = 0, RA = 1, SP = 2, GP = 3, TP = 4,
    T0 = 5, T1 = 6, T2 = 7,
    S0 = 8, S1 = 9,
    A0 = 10, A1 = 11, A2 = 12, A3 = 13, A4 = 14, A5 = 15, A6 = 16, A7 = 17,
    S2 = 18, S3 = 19, S4 = 20, S5 = 21, S6 = 22, S7 = 23, S8 = 24, S9 = 25, S10 = 26, S11 = 27,
    T3 = 28, T4 = 29, T5 = 30, T6 = 31
);

const ABI_NAMES: [&str; 32] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2",
    "s0", "s1", "a0", "a1", "a2", "a3", "a4", "a5",
    "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7",
    "s8", "s9", "s10", "s11", "t3", "t4", "t5", "t6",
];

impl Reg {
    /// Gets the register number of this [`Reg`]. This is always between 0 and 31.
    pub fn reg_no(self) -> u8 {
        self.0
    }
}
impl std::fmt::Display for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(ABI_NAMES[usize::from(self.0)])
    }
}
impl From<Reg> for usize {
    // Used for indexing the reg file.
    fn from(value: Reg) -> Self {
        usize::from(value.0)
    }
}
impl TryFrom<u8> for Reg {
    type Error = TryFromIntError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0..=31 => Ok(Reg(value)),
            // there's no public constructor for this error
            _      => u8::try_from(256u16).map(|_| unreachable!("should've been TryFromIntError")),
        }
    }
}

/// A decoded instruction.
///
/// All offsets are in bytes. Branch and jump offsets are relative to the
/// address of the instruction itself.
#[allow(missing_docs)]
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Instr {
    /// `rd = rs1 + imm`
    Addi { rd: Reg, rs1: Reg, imm: i32 },
    /// `rd = rs1 + rs2`
    Add { rd: Reg, rs1: Reg, rs2: Reg },
    /// `rd = rs1 - rs2`
    Sub { rd: Reg, rs1: Reg, rs2: Reg },
    /// `rd = mem[rs1 + offset]`
    Lw { rd: Reg, rs1: Reg, offset: i32 },
    /// `mem[rs1 + offset] = rs2`
    Sw { rs2: Reg, rs1: Reg, offset: i32 },
    /// Branch if `rs1 == rs2`.
    Beq { rs1: Reg, rs2: Reg, offset: i32 },
    /// Branch if `rs1 != rs2`.
    Bne { rs1: Reg, rs2: Reg, offset: i32 },
    /// `rd = pc + 4`, then jump.
    Jal { rd: Reg, offset: i32 },
    /// `csrr rd, mhartid`: reads the executing hart's index.
    HartId { rd: Reg },
    /// Load-reserved word.
    LrW { rd: Reg, rs1: Reg },
    /// Store-conditional word. `rd` is 0 on success, nonzero on failure.
    ScW { rd: Reg, rs1: Reg, rs2: Reg },
    /// Atomic swap.
    AmoSwapW { rd: Reg, rs1: Reg, rs2: Reg },
    /// Atomic add.
    AmoAddW { rd: Reg, rs1: Reg, rs2: Reg },
    /// Memory fence. Accesses already happen in program order, so this does nothing.
    Fence,
    /// Stops the executing hart.
    Ebreak,
}
impl std::fmt::Display for Instr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Instr::Addi { rd, rs1, imm }       => write!(f, "addi {rd}, {rs1}, {imm}"),
            Instr::Add { rd, rs1, rs2 }        => write!(f, "add {rd}, {rs1}, {rs2}"),
            Instr::Sub { rd, rs1, rs2 }        => write!(f, "sub {rd}, {rs1}, {rs2}"),
            Instr::Lw { rd, rs1, offset }      => write!(f, "lw {rd}, {offset}({rs1})"),
            Instr::Sw { rs2, rs1, offset }     => write!(f, "sw {rs2}, {offset}({rs1})"),
            Instr::Beq { rs1, rs2, offset }    => write!(f, "beq {rs1}, {rs2}, {offset}"),
            Instr::Bne { rs1, rs2, offset }    => write!(f, "bne {rs1}, {rs2}, {offset}"),
            Instr::Jal { rd, offset }          => write!(f, "jal {rd}, {offset}"),
            Instr::HartId { rd }               => write!(f, "csrr {rd}, mhartid"),
            Instr::LrW { rd, rs1 }             => write!(f, "lr.w {rd}, ({rs1})"),
            Instr::ScW { rd, rs1, rs2 }        => write!(f, "sc.w {rd}, {rs2}, ({rs1})"),
            Instr::AmoSwapW { rd, rs1, rs2 }   => write!(f, "amoswap.w {rd}, {rs2}, ({rs1})"),
            Instr::AmoAddW { rd, rs1, rs2 }    => write!(f, "amoadd.w {rd}, {rs2}, ({rs1})"),
            Instr::Fence                       => f.write_str("fence"),
            Instr::Ebreak                      => f.write_str("ebreak"),
        }
    }
}

/// A sequence of instructions placed at consecutive word addresses starting at `base`.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Program {
    /// The address of the first instruction. Must be 4-byte aligned.
    pub base: u32,
    /// The instructions.
    pub instrs: Vec<Instr>
}
impl Program {
    /// Creates a new program.
    pub fn new(base: u32, instrs: impl IntoIterator<Item=Instr>) -> Self {
        Self { base, instrs: instrs.into_iter().collect() }
    }

    /// Iterates over each instruction and the address it is placed at.
    pub fn iter(&self) -> impl Iterator<Item=(u32, Instr)> + '_ {
        self.instrs.iter()
            .copied()
            .enumerate()
            .map(|(i, instr)| (self.base.wrapping_add(4 * i as u32), instr))
    }
}
impl std::fmt::Display for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (addr, instr) in self.iter() {
            write!(f, "{addr:08x}: {instr}")?;
            f.write_char('\n')?;
        }
        Ok(())
    }
}
