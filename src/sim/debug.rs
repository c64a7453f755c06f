//! Utilities to debug simulation.
//!
//! The key type here is [`Breakpoint`], which can be appended to the [`Machine`]'s
//! breakpoint field to cause the machine to break.
use crate::ast::Reg;

use super::reserve::HartId;
use super::Machine;

/// Common breakpoints.
#[derive(PartialEq, Eq, Hash)]
pub enum Breakpoint {
    /// Break when the given hart's PC is equal to the given value.
    PC {
        /// Hart to check.
        hart: HartId,
        /// Address to break at.
        addr: u32
    },

    /// Break when the provided register of a hart is set to a given value.
    Reg {
        /// Hart to check.
        hart: HartId,
        /// Register to check.
        reg: Reg,
        /// Predicate to break against.
        value: Comparator
    },
    /// Break when the provided memory address holds a given value.
    Mem {
        /// Address to check.
        addr: u32,
        /// Predicate to break against.
        value: Comparator
    },
    /// Break when the given hart holds a still-valid reservation on the address,
    /// i.e., its next `sc.w` there would succeed.
    Reserved {
        /// Hart to check.
        hart: HartId,
        /// Reserved address.
        addr: u32
    },
}

impl Breakpoint where Breakpoint: Send + Sync { /* assert Breakpoint is send/sync */ }

impl Breakpoint {
    /// Checks if a break should occur.
    pub fn check(&self, machine: &Machine) -> bool {
        match *self {
            Breakpoint::PC { hart, addr } => machine.hart(hart).is_some_and(|h| h.pc == addr),
            Breakpoint::Reg { hart, reg, value } => machine.hart(hart).is_some_and(|h| value.check(h.reg_file[reg])),
            // do not fill memory
            Breakpoint::Mem { addr, value } => machine.mem.peek(addr).is_some_and(|v| value.check(v)),
            Breakpoint::Reserved { hart, addr } => {
                let table = machine.reservations();
                matches!(
                    (table.is_reserved(addr, hart), table.is_invalidated(addr, hart)),
                    (Ok(true), Ok(false))
                )
            },
        }
    }
}
impl std::fmt::Debug for Breakpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PC { hart, addr }         => write!(f, "Breakpoint({hart}: PC == x{addr:08X})"),
            Self::Reg { hart, reg, value }  => write!(f, "Breakpoint({hart}: {reg} {value})"),
            Self::Mem { addr, value }       => write!(f, "Breakpoint(mem[x{addr:08X}] {value})"),
            Self::Reserved { hart, addr }   => write!(f, "Breakpoint({hart}: reserved x{addr:08X})"),
        }
    }
}

/// Predicate which a register or memory value is checked against.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy)]
pub enum Comparator {
    /// Break if the value is equal to the provided value.
    Eq(u32),
    /// Break if the value is not equal to the provided value.
    Ne(u32),
    /// Break if the value is less than the provided value.
    Lt(u32),
    /// Break if the value is greater than or equal to the provided value.
    Ge(u32),
}
impl Comparator {
    /// Checks if the operand passes the comparator.
    pub fn check(self, operand: u32) -> bool {
        match self {
            Comparator::Eq(r) => operand == r,
            Comparator::Ne(r) => operand != r,
            Comparator::Lt(r) => operand < r,
            Comparator::Ge(r) => operand >= r,
        }
    }
}
impl std::fmt::Display for Comparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (op, r) = match *self {
            Comparator::Eq(r) => ("==", r),
            Comparator::Ne(r) => ("!=", r),
            Comparator::Lt(r) => ("<", r),
            Comparator::Ge(r) => (">=", r),
        };
        write!(f, "{op} {r}")
    }
}
