//! Memory handling for the simulated machine.
//!
//! This module consists of:
//! - [`Mem`]: The data memory shared by every hart.
//! - [`RegFile`]: The register file of one hart.
//! - [`MachineInitStrategy`]: How memory that was never written is filled.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::Rng;

use crate::ast::Reg;

/// Trait that describes types that can be used to create the data for a word
/// which has never been written.
pub trait WordFiller {
    /// Generate the data.
    fn generate(&mut self) -> u32;
}
impl WordFiller for () {
    /// This creates unseeded, non-deterministic values.
    fn generate(&mut self) -> u32 {
        rand::random()
    }
}
impl WordFiller for u32 {
    /// Sets each word to the given value.
    fn generate(&mut self) -> u32 {
        *self
    }
}
impl WordFiller for StdRng {
    /// This creates values from the standard random number generator.
    ///
    /// This can be used to create deterministic, seeded values.
    fn generate(&mut self) -> u32 {
        self.gen()
    }
}

/// Strategy used to initialize the memory of the [`Machine`].
///
/// [`Machine`]: super::Machine
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub enum MachineInitStrategy {
    /// Initializes each word randomly and non-deterministically.
    Unseeded,

    /// Initializes each word randomly and deterministically.
    Seeded {
        /// The seed the RNG was initialized with.
        seed: u64
    },

    /// Initializes each word to a known value.
    Known {
        /// The value to initialize each value to.
        value: u32
    },

    /// Initializes each word to zero. This is the same as `Known { value: 0 }`.
    #[default]
    Zeroed,
}

impl MachineInitStrategy {
    pub(super) fn generator(&self) -> WordGenerator {
        use rand::SeedableRng;

        match *self {
            MachineInitStrategy::Unseeded => WordGenerator::Unseeded,
            MachineInitStrategy::Seeded { seed } => WordGenerator::Seeded(Box::new(StdRng::seed_from_u64(seed))),
            MachineInitStrategy::Known { value } => WordGenerator::Known(value),
            MachineInitStrategy::Zeroed => WordGenerator::Known(0),
        }
    }
}

#[derive(Debug)]
pub(super) enum WordGenerator {
    Unseeded,
    Seeded(Box<StdRng>),
    Known(u32)
}
impl WordFiller for WordGenerator {
    fn generate(&mut self) -> u32 {
        match self {
            WordGenerator::Unseeded  => ().generate(),
            WordGenerator::Seeded(r) => r.generate(),
            WordGenerator::Known(k)  => k.generate(),
        }
    }
}

/// Data memory, addressed by byte but accessed by aligned 32-bit word.
///
/// Memory is stored sparsely. A word that has never been accessed has no value until
/// it is first read or written; on first read it is filled by the [`MachineInitStrategy`].
///
/// This struct does not check alignment. Every access is performed on the
/// word containing the address (i.e., the low 2 bits are ignored).
///
/// ```
/// use rv_multihart::sim::mem::{Mem, MachineInitStrategy};
///
/// let mut mem = Mem::new(MachineInitStrategy::Known { value: 0xDEAD_BEEF });
/// assert_eq!(mem.peek(0x100), None);
/// assert_eq!(mem.read(0x100), 0xDEAD_BEEF);
///
/// mem.write(0x100, 17);
/// assert_eq!(mem.peek(0x100), Some(17));
/// ```
#[derive(Debug)]
pub struct Mem {
    words: HashMap<u32, u32>,
    filler: WordGenerator
}
impl Mem {
    /// Creates empty memory which fills unwritten words with the given strategy.
    pub fn new(init: MachineInitStrategy) -> Self {
        Self {
            words: HashMap::new(),
            filler: init.generator()
        }
    }

    fn word_addr(addr: u32) -> u32 {
        addr & !0b11
    }

    /// Reads the word at the given address.
    ///
    /// If the word was never accessed, it is filled first.
    pub fn read(&mut self, addr: u32) -> u32 {
        let Self { words, filler } = self;
        *words.entry(Self::word_addr(addr))
            .or_insert_with(|| filler.generate())
    }

    /// Writes the word at the given address.
    ///
    /// This returns whether the value in memory changed.
    pub fn write(&mut self, addr: u32, data: u32) -> bool {
        self.words.insert(Self::word_addr(addr), data) != Some(data)
    }

    /// Gets the word at the given address without filling it if it was never accessed.
    pub fn peek(&self, addr: u32) -> Option<u32> {
        self.words.get(&Self::word_addr(addr)).copied()
    }

    /// Number of words that have been accessed.
    pub fn len(&self) -> usize {
        self.words.len()
    }
    /// Whether no word has been accessed yet.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// The register file of a hart.
///
/// It can be indexed with a [`Reg`]. Writes to `zero` are discarded
/// by [`RegFile::set`] (indexing mutably does not check this).
///
/// ```
/// use rv_multihart::sim::mem::RegFile;
/// use rv_multihart::ast::reg_consts::{A0, ZERO};
///
/// let mut reg_file = RegFile::new();
/// reg_file.set(A0, 11);
/// reg_file.set(ZERO, 11);
/// assert_eq!(reg_file[A0], 11);
/// assert_eq!(reg_file[ZERO], 0);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegFile([u32; 32]);
impl RegFile {
    /// Creates a register file with every register set to zero.
    pub fn new() -> Self {
        Self([0; 32])
    }

    /// Sets a register. Writes to `zero` are ignored.
    pub fn set(&mut self, reg: Reg, data: u32) {
        if reg.reg_no() != 0 {
            self.0[usize::from(reg)] = data;
        }
    }
}
impl std::ops::Index<Reg> for RegFile {
    type Output = u32;

    fn index(&self, index: Reg) -> &Self::Output {
        &self.0[usize::from(index)]
    }
}
impl std::ops::IndexMut<Reg> for RegFile {
    fn index_mut(&mut self, index: Reg) -> &mut Self::Output {
        &mut self.0[usize::from(index)]
    }
}

#[cfg(test)]
mod tests {
    use super::{Mem, MachineInitStrategy, RegFile};
    use crate::ast::reg_consts::{T0, ZERO};

    #[test]
    fn test_seeded_is_deterministic() {
        let strat = MachineInitStrategy::Seeded { seed: 2110 };
        let mut m1 = Mem::new(strat);
        let mut m2 = Mem::new(strat);

        let a: Vec<_> = (0..16).map(|i| m1.read(i * 4)).collect();
        let b: Vec<_> = (0..16).map(|i| m2.read(i * 4)).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_default_is_zeroed() {
        assert_eq!(MachineInitStrategy::default(), MachineInitStrategy::Zeroed);

        let mut zeroed = Mem::new(MachineInitStrategy::default());
        let mut known = Mem::new(MachineInitStrategy::Known { value: 0 });
        for addr in [0, 0x100, 0xFFFF_FFFC] {
            assert_eq!(zeroed.read(addr), 0);
            assert_eq!(known.read(addr), 0);
        }
    }

    #[test]
    fn test_fill_once() {
        let mut mem = Mem::new(MachineInitStrategy::Unseeded);
        let first = mem.read(0x40);
        assert_eq!(mem.read(0x40), first);
        assert_eq!(mem.peek(0x40), Some(first));
        assert_eq!(mem.len(), 1);
    }

    #[test]
    fn test_word_granularity() {
        let mut mem = Mem::new(MachineInitStrategy::Zeroed);
        assert!(mem.write(0x101, 5));
        assert_eq!(mem.peek(0x100), Some(5));
        assert_eq!(mem.read(0x103), 5);

        // rewriting the same value is not a modification
        assert!(!mem.write(0x100, 5));
    }

    #[test]
    fn test_reg_zero() {
        let mut regs = RegFile::new();
        regs.set(ZERO, 1234);
        regs.set(T0, 1234);
        assert_eq!(regs[ZERO], 0);
        assert_eq!(regs[T0], 1234);
    }
}
