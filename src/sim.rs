//! Multi-hart simulation.
//!
//! This module is focused on executing decoded programs (i.e., [`Program`])
//! on a machine with several harts sharing one memory.
//!
//! This module consists of:
//! - [`Machine`]: The struct that simulates the harts.
//! - [`reserve`]: The module tracking `lr.w`/`sc.w` reservations between harts.
//! - [`mem`]: The module handling memory and register files.
//! - [`debug`]: The module handling types of breakpoints for the machine.
//! - [`observer`]: The module tracking memory accesses.
//!
//! # Usage
//!
//! ```
//! use std::num::NonZeroUsize;
//! use rv_multihart::ast::{Instr, Program};
//! use rv_multihart::ast::reg_consts::{A0, A1, T0, T1, ZERO};
//! use rv_multihart::sim::{Machine, MachineFlags};
//!
//! // Each hart atomically increments the word at 0x100 once.
//! let program = Program::new(0x400, [
//!     Instr::Addi { rd: A0, rs1: ZERO, imm: 0x100 },
//!     Instr::LrW { rd: T0, rs1: A0 },
//!     Instr::Addi { rd: T0, rs1: T0, imm: 1 },
//!     Instr::ScW { rd: T1, rs1: A0, rs2: T0 },
//!     Instr::Bne { rs1: T1, rs2: ZERO, offset: -12 },
//!     Instr::Ebreak,
//! ]);
//!
//! let mut machine = Machine::new(MachineFlags {
//!     hart_count: NonZeroUsize::new(4).unwrap(),
//!     ..Default::default()
//! });
//! machine.load_program(&program);
//! machine.run().unwrap();
//!
//! assert!(machine.hit_halt());
//! assert_eq!(machine.mem.peek(0x100), Some(4));
//! ```
//!
//! ## Flags
//!
//! The machine is configured with [`MachineFlags`], which sets the number of harts,
//! the order in which harts are scheduled, and how memory is initialized.
//! The flags can be edited after creation; they go into effect on the next [`Machine::reset`].
//!
//! ## Execution
//!
//! Harts are interleaved one instruction at a time. Each instruction executes completely
//! (including its effect on reservations) before the next one begins.
//!
//! - [`Machine::step_hart`]: execute one instruction on a chosen hart
//! - [`Machine::step_in`]: execute one instruction on the next hart picked by the [`Schedule`]
//! - [`Machine::run`], [`Machine::run_while`], [`Machine::run_with_limit`]: run until every hart halts
//!   (or a breakpoint/limit is hit)
pub mod mem;
pub mod debug;
pub mod observer;
pub mod reserve;

use std::collections::{BTreeMap, HashSet};
use std::num::NonZeroUsize;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::ast::{Instr, Program, Reg};
use debug::Breakpoint;

use self::mem::{MachineInitStrategy, Mem, RegFile};
use self::observer::{AccessObserver, AccessSet};
use self::reserve::{HartId, ReservationTable, ReserveError};

/// Target used for machine log events.
pub const LOG_TARGET: &str = "rv_multihart::sim";

/// Errors that can occur during simulation.
#[derive(Debug, PartialEq, Eq, Clone, thiserror::Error)]
pub enum SimErr {
    /// A hart index that does not exist on this machine was used.
    #[error("{hart} does not exist (hart count is {hart_count})")]
    InvalidHart {
        /// The offending hart.
        hart: HartId,
        /// The number of harts on the machine.
        hart_count: usize
    },
    /// The hart's PC points to an address with no loaded instruction.
    #[error("{hart} has no instruction at x{pc:08X}")]
    NoInstruction {
        /// The executing hart.
        hart: HartId,
        /// Its PC.
        pc: u32
    },
    /// The hart's PC is not 4-byte aligned.
    #[error("{hart} has misaligned PC x{pc:08X}")]
    MisalignedPC {
        /// The executing hart.
        hart: HartId,
        /// Its PC.
        pc: u32
    },
    /// A word or atomic access was not 4-byte aligned.
    #[error("{hart} accessed misaligned address x{addr:08X}")]
    MisalignedAccess {
        /// The executing hart.
        hart: HartId,
        /// The effective address.
        addr: u32
    },
    /// The reservation table rejected a request.
    #[error(transparent)]
    Reservation(#[from] ReserveError),
}

/// Reason for why execution paused if it wasn't due to an error.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
enum PauseCondition {
    /// Every hart halted.
    Halt,
    /// Program hit a breakpoint.
    Breakpoint,
    /// Program hit a tripwire condition.
    Tripwire,
    /// Program hit an error and did not pause successfully.
    #[default]
    Unsuccessful
}

/// The order in which [`Machine::step_in`] and the run functions pick harts.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub enum Schedule {
    /// Harts take turns, one instruction each, in index order.
    #[default]
    RoundRobin,
    /// Each step runs a uniformly chosen hart, using a seeded RNG.
    ///
    /// The same seed and program always produce the same interleaving.
    Random {
        /// The seed the RNG was initialized with.
        seed: u64
    }
}

#[derive(Debug)]
enum Scheduler {
    RoundRobin { next: usize },
    Random(Box<StdRng>)
}
impl Scheduler {
    fn new(schedule: Schedule) -> Self {
        match schedule {
            Schedule::RoundRobin => Scheduler::RoundRobin { next: 0 },
            Schedule::Random { seed } => Scheduler::Random(Box::new(StdRng::seed_from_u64(seed))),
        }
    }

    /// Picks the next running hart, or `None` if every hart halted.
    fn pick(&mut self, harts: &[Hart]) -> Option<HartId> {
        match self {
            Scheduler::RoundRobin { next } => {
                let n = harts.len();
                let i = (0..n).map(|k| (*next + k) % n)
                    .find(|&i| !harts[i].halted)?;

                *next = (i + 1) % n;
                Some(HartId(i))
            },
            Scheduler::Random(rng) => {
                let running: Vec<_> = harts.iter()
                    .filter(|h| !h.halted)
                    .map(|h| h.id)
                    .collect();

                match running.is_empty() {
                    true  => None,
                    false => Some(running[rng.gen_range(0..running.len())])
                }
            }
        }
    }
}

/// Configuration flags for [`Machine`].
///
/// These can be modified after the `Machine` is created with [`Machine::new`].
/// Changes go into effect on the next [`Machine::reset`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct MachineFlags {
    /// The number of harts.
    ///
    /// Changing the number of harts discards every reservation.
    ///
    /// By default, this is 1.
    pub hart_count: NonZeroUsize,

    /// How harts are interleaved.
    ///
    /// By default, this is [`Schedule::RoundRobin`].
    pub schedule: Schedule,

    /// The creation strategy for memory that was never written.
    ///
    /// By default, this is [`MachineInitStrategy::Zeroed`].
    pub machine_init: MachineInitStrategy,
}

impl Default for MachineFlags {
    fn default() -> Self {
        Self {
            hart_count: NonZeroUsize::MIN,
            schedule: Default::default(),
            machine_init: Default::default(),
        }
    }
}

/// The state of a single hart.
#[derive(Debug, Clone)]
pub struct Hart {
    id: HartId,

    /// The program counter.
    ///
    /// If an instruction fails to execute, this stays on that instruction.
    pub pc: u32,

    /// The hart's register file.
    pub reg_file: RegFile,

    /// The number of instructions this hart has executed.
    pub instructions_run: u64,

    halted: bool,
}
impl Hart {
    fn new(id: HartId, pc: u32) -> Self {
        Self { id, pc, reg_file: RegFile::new(), instructions_run: 0, halted: false }
    }

    /// This hart's index.
    pub fn id(&self) -> HartId {
        self.id
    }

    /// Whether this hart has executed `ebreak`.
    pub fn is_halted(&self) -> bool {
        self.halted
    }
}

/// Executes programs across several harts sharing one memory.
#[derive(Debug)]
pub struct Machine {
    // ------------------ SIMULATION STATE ------------------
    // Calling [`Machine::reset`] resets these values.

    /// The data memory shared by every hart.
    pub mem: Mem,

    harts: Vec<Hart>,

    /// Loaded instructions, by address.
    text: BTreeMap<u32, Instr>,

    /// `lr.w`/`sc.w` reservations of every hart.
    reservations: ReservationTable,

    sched: Scheduler,

    /// The number of instructions successfully run (over all harts) since this `Machine` was reset.
    pub instructions_run: u64,

    /// The hart which executed the most recent instruction.
    last_hart: Option<HartId>,

    /// Indicates the reason why the last execution (via [`Machine::run_while`] and adjacent)
    /// had paused.
    pause_condition: PauseCondition,

    /// Tracks memory accesses of the most recent execution call.
    pub observer: AccessObserver,

    // ------------------ CONFIG/DEBUG STATE ------------------
    // Calling [`Machine::reset`] does not reset these values.

    /// Configuration settings for the machine.
    pub flags: MachineFlags,

    /// Breakpoints for the machine.
    pub breakpoints: HashSet<Breakpoint>,
}
impl Machine where Machine: Send + Sync {}

impl Machine {
    /// Creates a new machine with the given flags and no loaded program.
    pub fn new(flags: MachineFlags) -> Self {
        let n = flags.hart_count.get();
        Self {
            mem: Mem::new(flags.machine_init),
            harts: (0..n).map(|i| Hart::new(HartId(i), 0)).collect(),
            text: BTreeMap::new(),
            reservations: ReservationTable::with_harts(flags.hart_count),
            sched: Scheduler::new(flags.schedule),
            instructions_run: 0,
            last_hart: None,
            pause_condition: Default::default(),
            observer: Default::default(),

            flags,
            breakpoints: Default::default(),
        }
    }

    /// Resets the machine.
    ///
    /// This clears memory, registers, loaded instructions, and every reservation,
    /// and applies any change made to [`Machine::flags`].
    ///
    /// Breakpoints and flags are preserved.
    /// The program has to be loaded again with [`Machine::load_program`].
    pub fn reset(&mut self) {
        let flags = self.flags;
        let n = flags.hart_count.get();

        self.mem = Mem::new(flags.machine_init);
        self.harts = (0..n).map(|i| Hart::new(HartId(i), 0)).collect();
        self.text.clear();
        match self.reservations.hart_count() == n {
            true  => self.reservations.reset(),
            false => self.reservations.configure(flags.hart_count),
        }
        self.sched = Scheduler::new(flags.schedule);
        self.instructions_run = 0;
        self.last_hart = None;
        self.pause_condition = Default::default();
        self.observer.clear();

        tracing::debug!(target: LOG_TARGET, hart_count = n, "machine reset");
    }

    /// Changes the number of harts and resets the machine.
    pub fn set_hart_count(&mut self, hart_count: NonZeroUsize) {
        self.flags.hart_count = hart_count;
        self.reset();
    }

    /// Loads the program's instructions and points every hart's PC at its first instruction.
    pub fn load_program(&mut self, program: &Program) {
        self.text.extend(program.iter());
        for hart in &mut self.harts {
            hart.pc = program.base;
        }
    }

    /// The instruction loaded at the given address, if any.
    pub fn instr_at(&self, addr: u32) -> Option<Instr> {
        self.text.get(&addr).copied()
    }

    /// All harts, in index order.
    pub fn harts(&self) -> &[Hart] {
        &self.harts
    }
    /// Gets a hart by index.
    pub fn hart(&self, id: HartId) -> Option<&Hart> {
        self.harts.get(id.0)
    }
    /// Gets a hart by index, mutably (e.g., to set up registers or PC before running).
    pub fn hart_mut(&mut self, id: HartId) -> Option<&mut Hart> {
        self.harts.get_mut(id.0)
    }

    /// The reservation table of this machine.
    pub fn reservations(&self) -> &ReservationTable {
        &self.reservations
    }

    /// The hart which executed the most recent instruction.
    pub fn last_hart(&self) -> Option<HartId> {
        self.last_hart
    }

    /// Indicates whether the last execution of the machine hit a breakpoint.
    pub fn hit_breakpoint(&self) -> bool {
        matches!(self.pause_condition, PauseCondition::Breakpoint)
    }

    /// Indicates whether the last execution of the machine ended with every hart halted.
    pub fn hit_halt(&self) -> bool {
        matches!(self.pause_condition, PauseCondition::Halt)
    }

    fn all_halted(&self) -> bool {
        self.harts.iter().all(Hart::is_halted)
    }

    /// Runs until the tripwire condition returns false (or any of the typical breaks occur).
    ///
    /// The typical break conditions are:
    /// - every hart has halted
    /// - A breakpoint matches
    pub fn run_while(&mut self, mut tripwire: impl FnMut(&mut Machine) -> bool) -> Result<(), SimErr> {
        self.observer.clear();
        std::mem::take(&mut self.pause_condition);

        // event loop
        // run until:
        // 1. every hart halted
        // 2. the tripwire condition returns false
        // 3. any of the breakpoints are hit
        let result = loop {
            if self.all_halted() {
                break Ok(PauseCondition::Halt);
            }
            if !tripwire(self) {
                break Ok(PauseCondition::Tripwire);
            }

            let Some(hart) = self.sched.pick(&self.harts) else {
                break Ok(PauseCondition::Halt);
            };
            if let Err(e) = self.execute(hart) {
                break Err(e);
            }

            // After executing, check that any breakpoints were hit.
            if self.breakpoints.iter().any(|bp| bp.check(self)) {
                break Ok(PauseCondition::Breakpoint);
            }
        };

        tracing::debug!(target: LOG_TARGET, ?result, instructions_run = self.instructions_run, "execution paused");
        self.pause_condition = result?;
        Ok(())
    }

    /// Execute the program.
    ///
    /// This blocks until every hart halts.
    /// If you would like to limit the maximum number of steps to execute, consider [`Machine::run_with_limit`].
    pub fn run(&mut self) -> Result<(), SimErr> {
        self.run_while(|_| true)
    }

    /// Execute the program with a limit on how many steps to execute.
    ///
    /// This blocks until every hart halts or until the number of steps to execute has been hit.
    pub fn run_with_limit(&mut self, max_steps: u64) -> Result<(), SimErr> {
        let i = self.instructions_run;
        self.run_while(|m| m.instructions_run.wrapping_sub(i) < max_steps)
    }

    /// Executes one instruction on the next hart picked by the schedule.
    ///
    /// If every hart has halted, this does nothing.
    pub fn step_in(&mut self) -> Result<(), SimErr> {
        self.observer.clear();
        match self.sched.pick(&self.harts) {
            Some(hart) => self.execute(hart),
            None => Ok(()),
        }
    }

    /// Executes one instruction on the given hart.
    ///
    /// If the hart has halted, this does nothing.
    pub fn step_hart(&mut self, hart: HartId) -> Result<(), SimErr> {
        self.observer.clear();
        self.execute(hart)
    }

    fn reg(&self, i: usize, reg: Reg) -> u32 {
        self.harts[i].reg_file[reg]
    }
    fn set_reg(&mut self, i: usize, reg: Reg, data: u32) {
        self.harts[i].reg_file.set(reg, data);
    }

    fn aligned(hart: HartId, addr: u32) -> Result<u32, SimErr> {
        match addr % 4 {
            0 => Ok(addr),
            _ => Err(SimErr::MisalignedAccess { hart, addr }),
        }
    }

    fn load(&mut self, hart: HartId, addr: u32) -> u32 {
        self.observer.update_mem_accesses(addr, hart, AccessSet::READ);
        self.mem.read(addr)
    }
    fn store(&mut self, hart: HartId, addr: u32, data: u32) {
        let mut set = AccessSet::WRITTEN;
        if self.mem.write(addr, data) {
            set |= AccessSet::MODIFIED;
        }
        self.observer.update_mem_accesses(addr, hart, set);
    }

    /// Executes one instruction on the given hart.
    ///
    /// Every check that can fail is made before any state is changed,
    /// so a failed instruction leaves the machine as it was.
    fn execute(&mut self, id: HartId) -> Result<(), SimErr> {
        let i = id.0;
        let hart = self.harts.get(i)
            .ok_or(SimErr::InvalidHart { hart: id, hart_count: self.harts.len() })?;
        if hart.halted { return Ok(()) };

        let pc = hart.pc;
        if pc % 4 != 0 { return Err(SimErr::MisalignedPC { hart: id, pc }) };
        let instr = self.instr_at(pc)
            .ok_or(SimErr::NoInstruction { hart: id, pc })?;

        tracing::trace!(target: LOG_TARGET, hart = %id, pc = format_args!("{pc:#010x}"), %instr, "execute");

        let mut next_pc = pc.wrapping_add(4);
        match instr {
            Instr::Addi { rd, rs1, imm } => {
                let result = self.reg(i, rs1).wrapping_add_signed(imm);
                self.set_reg(i, rd, result);
            },
            Instr::Add { rd, rs1, rs2 } => {
                let result = self.reg(i, rs1).wrapping_add(self.reg(i, rs2));
                self.set_reg(i, rd, result);
            },
            Instr::Sub { rd, rs1, rs2 } => {
                let result = self.reg(i, rs1).wrapping_sub(self.reg(i, rs2));
                self.set_reg(i, rd, result);
            },
            Instr::Lw { rd, rs1, offset } => {
                let ea = Self::aligned(id, self.reg(i, rs1).wrapping_add_signed(offset))?;
                let val = self.load(id, ea);
                self.set_reg(i, rd, val);
            },
            Instr::Sw { rs2, rs1, offset } => {
                let ea = Self::aligned(id, self.reg(i, rs1).wrapping_add_signed(offset))?;
                self.reservations.store_to_address(ea, id)?;
                self.store(id, ea, self.reg(i, rs2));
            },
            Instr::Beq { rs1, rs2, offset } => {
                if self.reg(i, rs1) == self.reg(i, rs2) {
                    next_pc = pc.wrapping_add_signed(offset);
                }
            },
            Instr::Bne { rs1, rs2, offset } => {
                if self.reg(i, rs1) != self.reg(i, rs2) {
                    next_pc = pc.wrapping_add_signed(offset);
                }
            },
            Instr::Jal { rd, offset } => {
                self.set_reg(i, rd, pc.wrapping_add(4));
                next_pc = pc.wrapping_add_signed(offset);
            },
            Instr::HartId { rd } => {
                self.set_reg(i, rd, id.0 as u32);
            },
            Instr::LrW { rd, rs1 } => {
                let ea = Self::aligned(id, self.reg(i, rs1))?;
                self.reservations.load_reserved(ea, id)?;
                self.observer.update_mem_accesses(ea, id, AccessSet::RESERVED);

                let val = self.load(id, ea);
                self.set_reg(i, rd, val);
            },
            Instr::ScW { rd, rs1, rs2 } => {
                let ea = Self::aligned(id, self.reg(i, rs1))?;
                let success = self.reservations.store_conditional(ea, id)?;
                self.observer.update_mem_accesses(ea, id, AccessSet::CONDITIONAL);
                if success {
                    self.store(id, ea, self.reg(i, rs2));
                }
                self.set_reg(i, rd, u32::from(!success));
            },
            Instr::AmoSwapW { rd, rs1, rs2 } => {
                let ea = Self::aligned(id, self.reg(i, rs1))?;
                self.reservations.store_to_address(ea, id)?;

                let src = self.reg(i, rs2);
                let old = self.load(id, ea);
                self.store(id, ea, src);
                self.set_reg(i, rd, old);
            },
            Instr::AmoAddW { rd, rs1, rs2 } => {
                let ea = Self::aligned(id, self.reg(i, rs1))?;
                self.reservations.store_to_address(ea, id)?;

                let src = self.reg(i, rs2);
                let old = self.load(id, ea);
                self.store(id, ea, old.wrapping_add(src));
                self.set_reg(i, rd, old);
            },
            Instr::Fence => {},
            Instr::Ebreak => {
                tracing::debug!(target: LOG_TARGET, hart = %id, pc = format_args!("{pc:#010x}"), "hart halted");
                self.harts[i].halted = true;
                next_pc = pc;
            },
        }

        let hart = &mut self.harts[i];
        hart.pc = next_pc;
        hart.instructions_run += 1;
        self.instructions_run = self.instructions_run.wrapping_add(1);
        self.last_hart = Some(id);
        Ok(())
    }
}
impl Default for Machine {
    fn default() -> Self {
        Self::new(Default::default())
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

    use super::debug::{Breakpoint, Comparator};
    use super::observer::AccessSet;
    use super::reserve::{HartId, ReserveError};
    use super::{Machine, MachineFlags, Schedule, SimErr};
    use crate::ast::reg_consts::{A0, A1, A2, T0, T1, T2, ZERO};
    use crate::ast::{Instr, Program};

    const COUNTER: u32 = 0x100;

    fn log_guard() -> tracing::subscriber::DefaultGuard {
        let filter = filter::Targets::new()
            .with_target(super::LOG_TARGET, tracing::Level::DEBUG)
            .with_target(super::reserve::LOG_TARGET, tracing::Level::DEBUG);

        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .with(filter)
            .set_default()
    }

    fn machine(harts: usize, schedule: Schedule) -> Machine {
        Machine::new(MachineFlags {
            hart_count: NonZeroUsize::new(harts).unwrap(),
            schedule,
            ..Default::default()
        })
    }

    /// Every hart increments COUNTER `iters` times with an lr.w/sc.w retry loop.
    fn lrsc_counter(iters: i32) -> Program {
        Program::new(0x400, [
            Instr::Addi { rd: A1, rs1: ZERO, imm: COUNTER as i32 },
            Instr::Addi { rd: A2, rs1: ZERO, imm: iters },
            // loop:
            Instr::LrW { rd: T0, rs1: A1 },
            Instr::Addi { rd: T0, rs1: T0, imm: 1 },
            Instr::ScW { rd: T1, rs1: A1, rs2: T0 },
            Instr::Bne { rs1: T1, rs2: ZERO, offset: -12 },
            Instr::Addi { rd: A2, rs1: A2, imm: -1 },
            Instr::Bne { rs1: A2, rs2: ZERO, offset: -20 },
            Instr::Ebreak,
        ])
    }

    /// Hart 0 runs from 0x400 (lr.w, sc.w), hart 1 runs from 0x40C (sw).
    fn split_program(m: &mut Machine) {
        m.load_program(&Program::new(0x400, [
            Instr::LrW { rd: T0, rs1: A1 },
            Instr::ScW { rd: T1, rs1: A1, rs2: T2 },
            Instr::Ebreak,
            Instr::Sw { rs2: T2, rs1: A1, offset: 0 },
            Instr::Ebreak,
        ]));

        for (h, val) in [(0, 7), (1, 9)] {
            let hart = m.hart_mut(HartId(h)).unwrap();
            hart.reg_file.set(A1, COUNTER);
            hart.reg_file.set(T2, val);
        }
        m.hart_mut(HartId(1)).unwrap().pc = 0x40C;
    }

    #[test]
    fn test_sc_fails_after_remote_store() {
        let _guard = log_guard();
        let mut m = machine(2, Schedule::RoundRobin);
        split_program(&mut m);

        m.step_hart(HartId(0)).unwrap(); // lr.w
        assert!(m.reservations().is_reserved(COUNTER, HartId(0)).unwrap());
        m.step_hart(HartId(1)).unwrap(); // sw
        assert!(m.reservations().is_invalidated(COUNTER, HartId(0)).unwrap());
        m.step_hart(HartId(0)).unwrap(); // sc.w

        let h0 = m.hart(HartId(0)).unwrap();
        assert_eq!(h0.reg_file[T1], 1);
        assert_eq!(m.mem.peek(COUNTER), Some(9));
        assert!(!m.reservations().is_reserved(COUNTER, HartId(0)).unwrap());
    }

    #[test]
    fn test_sc_succeeds_without_interference() {
        let mut m = machine(2, Schedule::RoundRobin);
        split_program(&mut m);

        m.step_hart(HartId(0)).unwrap();
        m.step_hart(HartId(0)).unwrap();

        assert_eq!(m.hart(HartId(0)).unwrap().reg_file[T1], 0);
        assert_eq!(m.mem.peek(COUNTER), Some(7));

        // hart 1's store afterwards does not affect anything
        m.step_hart(HartId(1)).unwrap();
        assert_eq!(m.mem.peek(COUNTER), Some(9));
    }

    #[test]
    fn test_sc_without_lr() {
        let mut m = machine(1, Schedule::RoundRobin);
        m.load_program(&Program::new(0, [
            Instr::Addi { rd: A0, rs1: ZERO, imm: COUNTER as i32 },
            Instr::Addi { rd: T0, rs1: ZERO, imm: 5 },
            Instr::ScW { rd: T1, rs1: A0, rs2: T0 },
            Instr::Ebreak,
        ]));
        m.run().unwrap();

        assert_eq!(m.hart(HartId(0)).unwrap().reg_file[T1], 1);
        assert_eq!(m.mem.peek(COUNTER), None);
    }

    #[test]
    fn test_round_robin_counter() {
        let _guard = log_guard();
        let mut m = machine(3, Schedule::RoundRobin);
        m.load_program(&lrsc_counter(10));
        m.run_with_limit(100_000).unwrap();

        assert!(m.hit_halt());
        assert!(m.harts().iter().all(|h| h.is_halted()));
        assert_eq!(m.mem.peek(COUNTER), Some(30));
    }

    #[test]
    fn test_random_schedule_counter() {
        for seed in [0, 1, 2110, 0xDEAD_BEEF] {
            let mut m = machine(4, Schedule::Random { seed });
            m.load_program(&lrsc_counter(25));
            m.run_with_limit(100_000).unwrap();

            assert!(m.hit_halt(), "seed {seed} did not finish");
            assert_eq!(m.mem.peek(COUNTER), Some(100), "seed {seed} lost an update");
        }
    }

    #[test]
    fn test_random_schedule_deterministic() {
        let run = || {
            let mut m = machine(3, Schedule::Random { seed: 42 });
            m.load_program(&lrsc_counter(5));
            m.run().unwrap();
            m.harts().iter().map(|h| h.instructions_run).collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_amo_counter() {
        let mut m = machine(3, Schedule::RoundRobin);
        m.load_program(&Program::new(0x400, [
            Instr::Addi { rd: A1, rs1: ZERO, imm: COUNTER as i32 },
            Instr::Addi { rd: T0, rs1: ZERO, imm: 2 },
            Instr::AmoAddW { rd: T1, rs1: A1, rs2: T0 },
            Instr::Ebreak,
        ]));
        m.run().unwrap();
        assert_eq!(m.mem.peek(COUNTER), Some(6));

        // every hart saw a different old value
        let mut olds: Vec<_> = m.harts().iter().map(|h| h.reg_file[T1]).collect();
        olds.sort_unstable();
        assert_eq!(olds, [0, 2, 4]);
    }

    #[test]
    fn test_amo_invalidates_reservation() {
        let mut m = machine(2, Schedule::RoundRobin);
        m.load_program(&Program::new(0x400, [
            Instr::LrW { rd: T0, rs1: A1 },
            Instr::ScW { rd: T1, rs1: A1, rs2: T2 },
            Instr::Ebreak,
            Instr::AmoSwapW { rd: T0, rs1: A1, rs2: T2 },
            Instr::Ebreak,
        ]));
        for h in 0..2 {
            m.hart_mut(HartId(h)).unwrap().reg_file.set(A1, COUNTER);
        }
        m.hart_mut(HartId(1)).unwrap().pc = 0x40C;

        m.step_hart(HartId(0)).unwrap();
        m.step_hart(HartId(1)).unwrap();
        m.step_hart(HartId(0)).unwrap();
        assert_eq!(m.hart(HartId(0)).unwrap().reg_file[T1], 1);
    }

    #[test]
    fn test_hart_id() {
        let mut m = machine(4, Schedule::RoundRobin);
        m.load_program(&Program::new(0x400, [
            Instr::HartId { rd: T0 },
            Instr::Add { rd: T1, rs1: T0, rs2: T0 },
            Instr::Add { rd: T1, rs1: T1, rs2: T1 },
            Instr::Addi { rd: T0, rs1: T0, imm: 100 },
            Instr::Sw { rs2: T0, rs1: T1, offset: 0x200 },
            Instr::Ebreak,
        ]));
        m.run().unwrap();

        for h in 0..4 {
            assert_eq!(m.mem.peek(0x200 + 4 * h), Some(100 + h));
        }
    }

    #[test]
    fn test_mem_breakpoint() {
        let mut m = machine(2, Schedule::RoundRobin);
        m.load_program(&lrsc_counter(10));
        m.breakpoints.insert(Breakpoint::Mem { addr: COUNTER, value: Comparator::Eq(5) });

        m.run().unwrap();
        assert!(m.hit_breakpoint());
        assert_eq!(m.mem.peek(COUNTER), Some(5));
        let last = m.last_hart().unwrap();
        assert_eq!(m.instr_at(m.hart(last).unwrap().pc - 4).map(|i| i.to_string()).as_deref(), Some("sc.w t1, t0, (a1)"));

        // remove breakpoint & continue
        m.breakpoints.clear();
        m.run().unwrap();
        assert!(m.hit_halt());
        assert_eq!(m.mem.peek(COUNTER), Some(20));
    }

    #[test]
    fn test_pc_breakpoint() {
        let mut m = machine(2, Schedule::RoundRobin);
        m.load_program(&lrsc_counter(3));
        m.breakpoints.insert(Breakpoint::PC { hart: HartId(1), addr: 0x420 });

        m.run().unwrap();
        assert!(m.hit_breakpoint());
        assert_eq!(m.hart(HartId(1)).unwrap().pc, 0x420);
    }

    #[test]
    fn test_reg_breakpoint() {
        let mut m = machine(2, Schedule::RoundRobin);
        m.load_program(&lrsc_counter(3));
        m.breakpoints.insert(Breakpoint::Reg { hart: HartId(1), reg: A2, value: Comparator::Eq(1) });

        m.run().unwrap();
        assert!(m.hit_breakpoint());
        assert_eq!(m.last_hart(), Some(HartId(1)));
        assert_eq!(m.hart(HartId(1)).unwrap().reg_file[A2], 1);

        m.breakpoints.clear();
        m.run().unwrap();
        assert!(m.hit_halt());
        assert_eq!(m.mem.peek(COUNTER), Some(6));
    }

    #[test]
    fn test_reserved_breakpoint() {
        let mut m = machine(2, Schedule::RoundRobin);
        m.load_program(&lrsc_counter(2));
        m.breakpoints.insert(Breakpoint::Reserved { hart: HartId(1), addr: COUNTER });

        m.run().unwrap();
        assert!(m.hit_breakpoint());
        assert_eq!(m.last_hart(), Some(HartId(1)));
        let pc = m.hart(HartId(1)).unwrap().pc;
        assert_eq!(m.instr_at(pc - 4), Some(Instr::LrW { rd: T0, rs1: A1 }));

        m.breakpoints.clear();
        m.run().unwrap();
        assert!(m.hit_halt());
        assert_eq!(m.mem.peek(COUNTER), Some(4));
    }

    #[test]
    fn test_run_with_limit() {
        let mut m = machine(2, Schedule::RoundRobin);
        m.load_program(&lrsc_counter(10));
        m.run_with_limit(7).unwrap();

        assert!(!m.hit_halt());
        assert!(!m.hit_breakpoint());
        assert_eq!(m.instructions_run, 7);
        assert_eq!(m.hart(HartId(0)).unwrap().instructions_run, 4);
        assert_eq!(m.hart(HartId(1)).unwrap().instructions_run, 3);
    }

    #[test]
    fn test_step_in_round_robin() {
        let mut m = machine(3, Schedule::RoundRobin);
        m.load_program(&lrsc_counter(1));

        for expected in [0, 1, 2, 0, 1] {
            m.step_in().unwrap();
            assert_eq!(m.last_hart(), Some(HartId(expected)));
        }
    }

    #[test]
    fn test_observer() {
        let mut m = machine(2, Schedule::RoundRobin);
        split_program(&mut m);

        m.step_hart(HartId(0)).unwrap();
        let acc = m.observer.get_hart_accesses(COUNTER, HartId(0));
        assert_eq!(acc, AccessSet::RESERVED | AccessSet::READ);

        m.step_hart(HartId(1)).unwrap();
        assert!(!m.observer.get_hart_accesses(COUNTER, HartId(0)).accessed());
        let acc = m.observer.get_hart_accesses(COUNTER, HartId(1));
        assert_eq!(acc, AccessSet::WRITTEN | AccessSet::MODIFIED);

        // a failed sc.w is still observed, but writes nothing
        m.step_hart(HartId(0)).unwrap();
        let acc = m.observer.get_mem_accesses(COUNTER);
        assert_eq!(acc, AccessSet::CONDITIONAL);
    }

    #[test]
    fn test_reset() {
        let mut m = machine(2, Schedule::RoundRobin);
        split_program(&mut m);
        m.breakpoints.insert(Breakpoint::PC { hart: HartId(0), addr: 0 });
        m.step_hart(HartId(0)).unwrap();
        assert!(m.reservations().is_reserved(COUNTER, HartId(0)).unwrap());

        m.reset();
        assert!(m.reservations().reservations(HartId(0)).unwrap().is_empty());
        assert_eq!(m.reservations().hart_count(), 2);
        assert_eq!(m.instr_at(0x400), None);
        assert_eq!(m.breakpoints.len(), 1);
        assert_eq!(m.instructions_run, 0);

        m.set_hart_count(NonZeroUsize::new(5).unwrap());
        assert_eq!(m.harts().len(), 5);
        assert_eq!(m.reservations().hart_count(), 5);
    }

    #[test]
    fn test_errors() {
        let mut m = machine(2, Schedule::RoundRobin);
        m.load_program(&Program::new(0x400, [
            Instr::Addi { rd: A0, rs1: ZERO, imm: 0x102 },
            Instr::LrW { rd: T0, rs1: A0 },
            Instr::Ebreak,
        ]));

        m.step_hart(HartId(0)).unwrap();
        assert_eq!(m.step_hart(HartId(0)), Err(SimErr::MisalignedAccess { hart: HartId(0), addr: 0x102 }));
        // failed instruction leaves the PC on itself and makes no reservation
        assert_eq!(m.hart(HartId(0)).unwrap().pc, 0x404);
        assert!(m.reservations().reservations(HartId(0)).unwrap().is_empty());

        assert_eq!(m.step_hart(HartId(2)), Err(SimErr::InvalidHart { hart: HartId(2), hart_count: 2 }));

        m.hart_mut(HartId(1)).unwrap().pc = 0x800;
        assert_eq!(m.step_hart(HartId(1)), Err(SimErr::NoInstruction { hart: HartId(1), pc: 0x800 }));
        m.hart_mut(HartId(1)).unwrap().pc = 0x402;
        assert_eq!(m.step_hart(HartId(1)), Err(SimErr::MisalignedPC { hart: HartId(1), pc: 0x402 }));

        let err = SimErr::from(ReserveError::Unconfigured);
        assert_eq!(err.to_string(), "reservation table used before hart count was configured");
    }

    #[test]
    fn test_halted_hart_is_skipped() {
        let mut m = machine(2, Schedule::RoundRobin);
        m.load_program(&Program::new(0x400, [Instr::Ebreak]));

        m.step_hart(HartId(0)).unwrap();
        assert!(m.hart(HartId(0)).unwrap().is_halted());
        m.step_hart(HartId(0)).unwrap();
        assert_eq!(m.hart(HartId(0)).unwrap().instructions_run, 1);

        m.step_in().unwrap();
        assert_eq!(m.last_hart(), Some(HartId(1)));
        m.run().unwrap();
        assert!(m.hit_halt());
        assert_eq!(m.instructions_run, 2);
    }
}
