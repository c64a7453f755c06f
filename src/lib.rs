//! A multi-hart RISC-V simulation core.
//!
//! This crate models several harts (hardware threads) sharing one memory,
//! and tracks load-reserved/store-conditional reservations between them so that
//! `lr.w`/`sc.w` sequences behave atomically no matter how the harts are interleaved.
//!
//! # Usage
//!
//! The reservation table can be used on its own by an instruction executor:
//! ```
//! use std::num::NonZeroUsize;
//! use rv_multihart::sim::reserve::{HartId, ReservationTable};
//!
//! let mut table = ReservationTable::with_harts(NonZeroUsize::new(3).unwrap());
//! table.load_reserved(0x80, HartId(0)).unwrap();
//! table.load_reserved(0x80, HartId(2)).unwrap();
//!
//! // hart 1 stores to 0x80, so neither reservation can succeed
//! table.store_to_address(0x80, HartId(1)).unwrap();
//! assert!(!table.store_conditional(0x80, HartId(0)).unwrap());
//! assert!(!table.store_conditional(0x80, HartId(2)).unwrap());
//! ```
//!
//! Or programs can be executed on a [`sim::Machine`], which drives the table itself:
//! ```
//! use std::num::NonZeroUsize;
//! use rv_multihart::ast::{Instr, Program};
//! use rv_multihart::ast::reg_consts::{A0, T0};
//! use rv_multihart::sim::{Machine, MachineFlags};
//! use rv_multihart::sim::reserve::HartId;
//!
//! let mut machine = Machine::new(MachineFlags {
//!     hart_count: NonZeroUsize::new(2).unwrap(),
//!     ..Default::default()
//! });
//! machine.load_program(&Program::new(0x400, [
//!     Instr::LrW { rd: T0, rs1: A0 },
//!     Instr::Ebreak,
//! ]));
//!
//! machine.step_hart(HartId(1)).unwrap();
//! assert!(machine.reservations().is_reserved(0, HartId(1)).unwrap());
//! ```
//!
//! See the [`sim`] module for more details on execution.
#![warn(missing_docs)]

pub mod ast;
pub mod sim;
