//! Module handles memory access observers,
//! which record which harts accessed a given memory location, and how.
//!
//! You would typically access an observer via the [`Machine::observer`] field.
//! The observer is cleared at the start of every step or run, so it holds the
//! accesses of the most recent execution call.
//!
//! [`Machine::observer`]: crate::sim::Machine::observer

use std::collections::BTreeMap;

use super::reserve::HartId;

/// The set of accesses which have occurred at this location.
///
/// ## Example
///
/// ```
/// # use rv_multihart::sim::observer::AccessSet;
///
/// let accesses = AccessSet::READ | AccessSet::RESERVED;
/// assert!(accesses.accessed());
/// assert!(accesses.contains(AccessSet::RESERVED));
/// assert!(!accesses.contains(AccessSet::READ | AccessSet::WRITTEN));
/// assert_eq!(format!("{accesses:?}"), "AccessSet(read | reserved)");
/// ```
#[derive(Default, Clone, Copy, PartialEq, Eq)]
pub struct AccessSet(u8);
impl AccessSet {
    /// Set with only the read flag enabled.
    pub const READ: Self = Self(1 << 0);
    /// Set with only the write flag enabled (the data does not necessarily change).
    pub const WRITTEN: Self = Self(1 << 1);
    /// Set with only the modify flag enabled (a write which changed the data).
    pub const MODIFIED: Self = Self(1 << 2);
    /// Set with only the reserve flag enabled (`lr.w`).
    pub const RESERVED: Self = Self(1 << 3);
    /// Set with only the store-conditional flag enabled.
    ///
    /// This is set on every `sc.w`, including ones that failed and wrote nothing.
    pub const CONDITIONAL: Self = Self(1 << 4);

    const NAMES: [(Self, &'static str); 5] = [
        (Self::READ, "read"),
        (Self::WRITTEN, "written"),
        (Self::MODIFIED, "modified"),
        (Self::RESERVED, "reserved"),
        (Self::CONDITIONAL, "conditional"),
    ];

    /// True if any access has occurred.
    pub fn accessed(&self) -> bool {
        self.0 != 0
    }

    /// True if every flag in `other` is also in this set.
    pub fn contains(&self, other: AccessSet) -> bool {
        self.0 & other.0 == other.0
    }
}
impl std::ops::BitOr for AccessSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}
impl std::ops::BitOrAssign for AccessSet {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = *self | rhs;
    }
}
impl std::fmt::Debug for AccessSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessSet(")?;
        let mut names = Self::NAMES.iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|&(_, name)| name);

        if let Some(first) = names.next() {
            f.write_str(first)?;
            for name in names {
                write!(f, " | {name}")?;
            }
        }
        f.write_str(")")
    }
}

/// A struct that tracks accesses in memory, per hart.
#[derive(Debug, Default)]
pub struct AccessObserver {
    mem: BTreeMap<(u32, HartId), AccessSet>
}
impl AccessObserver {
    /// Creates a new access observer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears all accesses.
    pub fn clear(&mut self) {
        self.mem.clear();
    }

    /// Gets the accesses any hart made to the given memory location.
    pub fn get_mem_accesses(&self, addr: u32) -> AccessSet {
        self.mem.range((addr, HartId(0))..=(addr, HartId(usize::MAX)))
            .fold(AccessSet::default(), |acc, (_, &set)| acc | set)
    }

    /// Gets the accesses one hart made to the given memory location.
    pub fn get_hart_accesses(&self, addr: u32, hart: HartId) -> AccessSet {
        self.mem.get(&(addr, hart)).copied().unwrap_or_default()
    }

    /// Adds new flags to the access set for the given memory location and hart.
    pub fn update_mem_accesses(&mut self, addr: u32, hart: HartId, set: AccessSet) {
        *self.mem.entry((addr, hart)).or_default() |= set;
    }

    /// Takes all memory accesses which have occurred since last clear,
    /// as well as clearing memory accesses.
    ///
    /// This iterator is sorted by address, then by hart.
    pub fn take_mem_accesses(&mut self) -> impl Iterator<Item=(u32, HartId, AccessSet)> {
        std::mem::take(&mut self.mem)
            .into_iter()
            .map(|((addr, hart), set)| (addr, hart, set))
    }
}
