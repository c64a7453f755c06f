//! Reservation tracking for `lr.w`/`sc.w` across multiple harts.
//!
//! The key type here is [`ReservationTable`], which keeps, for every hart,
//! the set of addresses it currently holds a load-reservation on and the
//! subset of those reservations that another hart's store has since invalidated.
//!
//! The table is driven by the instruction executor:
//! - `lr.w` calls [`ReservationTable::load_reserved`]
//! - `sc.w` calls [`ReservationTable::store_conditional`] and only writes memory if it returns `true`
//! - every other store calls [`ReservationTable::store_to_address`]
//!
//! ```
//! use std::num::NonZeroUsize;
//! use rv_multihart::sim::reserve::{HartId, ReservationTable};
//!
//! let mut table = ReservationTable::with_harts(NonZeroUsize::new(2).unwrap());
//! let (h0, h1) = (HartId(0), HartId(1));
//!
//! table.load_reserved(0x100, h0).unwrap();
//! table.store_to_address(0x100, h1).unwrap(); // hart 1 stores to the reserved word
//! assert!(!table.store_conditional(0x100, h0).unwrap());
//!
//! table.load_reserved(0x100, h0).unwrap();
//! assert!(table.store_conditional(0x100, h0).unwrap());
//! ```
//!
//! If the harts are placed on real host threads, the table can be moved behind
//! a [`ReserveActor`], which serializes every request through one thread.
//!
//! [`ReserveActor`]: actor::ReserveActor
pub mod actor;

use std::collections::HashSet;
use std::num::NonZeroUsize;

/// Target used for all reservation table log events.
pub const LOG_TARGET: &str = "rv_multihart::reserve";

/// Index of a simulated hardware thread.
///
/// This is assigned when the machine is configured, and is valid
/// as long as it is less than the configured hart count.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Default)]
pub struct HartId(pub usize);
impl HartId {
    /// The index of this hart.
    pub fn index(self) -> usize {
        self.0
    }
}
impl std::fmt::Display for HartId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "hart {}", self.0)
    }
}
impl From<usize> for HartId {
    fn from(value: usize) -> Self {
        HartId(value)
    }
}

/// Contract violations when calling into a [`ReservationTable`].
///
/// A failed `sc.w` is not an error. These indicate a bug in the caller.
#[derive(Debug, PartialEq, Eq, Clone, Copy, thiserror::Error)]
pub enum ReserveError {
    /// The table was used before a hart count was configured.
    #[error("reservation table used before hart count was configured")]
    Unconfigured,
    /// The hart index is not less than the configured hart count.
    #[error("{hart} is out of range (hart count is {hart_count})")]
    HartOutOfRange {
        /// The offending hart.
        hart: HartId,
        /// The configured hart count.
        hart_count: usize
    },
    /// The actor owning the table has been closed.
    #[error("reservation actor has been closed")]
    Disconnected,
}

/// The reservation state of one hart.
///
/// `invalidated` is always a subset of `reserved`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct HartReservations {
    reserved: HashSet<u32>,
    invalidated: HashSet<u32>,
}
impl HartReservations {
    fn clear(&mut self) {
        self.reserved.clear();
        self.invalidated.clear();
    }

    /// Drops the reservation on `addr`, valid or not.
    fn consume(&mut self, addr: u32) {
        self.reserved.remove(&addr);
        self.invalidated.remove(&addr);
    }
}

/// Per-hart load-reservations.
///
/// An address may be reserved by several harts at once.
/// Whichever of them reaches `sc.w` first wins, and every other hart's
/// reservation on that address is marked invalidated.
/// Invalidated reservations are only dropped when their owner attempts `sc.w`
/// (or when the table is reset).
#[derive(Debug, Default, Clone)]
pub struct ReservationTable {
    harts: Vec<HartReservations>
}

impl ReservationTable {
    /// Creates a new, unconfigured table.
    ///
    /// [`ReservationTable::configure`] must be called before reservations can be made.
    pub fn new() -> Self {
        Self { harts: vec![] }
    }

    /// Creates a table already configured for `hart_count` harts.
    pub fn with_harts(hart_count: NonZeroUsize) -> Self {
        let mut table = Self::new();
        table.configure(hart_count);
        table
    }

    /// Sets the number of harts tracked.
    ///
    /// This discards every existing reservation.
    pub fn configure(&mut self, hart_count: NonZeroUsize) {
        tracing::debug!(target: LOG_TARGET, hart_count = hart_count.get(), "configuring reservation table");
        self.harts = vec![HartReservations::default(); hart_count.get()];
    }

    /// Clears every reservation, preserving the hart count.
    ///
    /// On an unconfigured table there is nothing to clear, and it stays unconfigured.
    pub fn reset(&mut self) {
        tracing::debug!(target: LOG_TARGET, hart_count = self.harts.len(), "resetting reservation table");
        self.harts.iter_mut().for_each(HartReservations::clear);
    }

    /// The number of harts this table was configured with (0 if unconfigured).
    pub fn hart_count(&self) -> usize {
        self.harts.len()
    }

    /// Whether [`ReservationTable::configure`] has been called.
    pub fn is_configured(&self) -> bool {
        !self.harts.is_empty()
    }

    fn check_hart(&self, hart: HartId) -> Result<(), ReserveError> {
        match hart.0 < self.harts.len() {
            true => Ok(()),
            false if self.harts.is_empty() => Err(ReserveError::Unconfigured),
            false => Err(ReserveError::HartOutOfRange { hart, hart_count: self.harts.len() }),
        }
    }
    fn get(&self, hart: HartId) -> Result<&HartReservations, ReserveError> {
        self.check_hart(hart)?;
        Ok(&self.harts[hart.0])
    }
    fn get_mut(&mut self, hart: HartId) -> Result<&mut HartReservations, ReserveError> {
        self.check_hart(hart)?;
        Ok(&mut self.harts[hart.0])
    }

    /// Records a reservation on `addr` for `hart` (`lr.w`).
    ///
    /// If `hart` already holds a reservation on `addr`, this does nothing.
    /// In particular, an already invalidated reservation stays invalidated.
    pub fn load_reserved(&mut self, addr: u32, hart: HartId) -> Result<(), ReserveError> {
        let entry = self.get_mut(hart)?;
        if entry.reserved.insert(addr) {
            tracing::trace!(target: LOG_TARGET, %hart, addr = format_args!("{addr:#010x}"), "reservation made");
        }
        Ok(())
    }

    /// Attempts a store-conditional on `addr` for `hart` (`sc.w`).
    ///
    /// This returns `true` if the store should be committed:
    /// `hart` holds a reservation on `addr` and no other hart has stored to `addr` since.
    ///
    /// Whatever the outcome, `hart`'s reservation on `addr` is consumed.
    /// On success, every other hart's reservation on `addr` is invalidated.
    pub fn store_conditional(&mut self, addr: u32, hart: HartId) -> Result<bool, ReserveError> {
        let entry = self.get_mut(hart)?;

        let success = if !entry.reserved.contains(&addr) {
            false
        } else if entry.invalidated.contains(&addr) {
            entry.consume(addr);
            false
        } else {
            entry.consume(addr);
            self.invalidate_others(addr, hart);
            true
        };

        tracing::debug!(target: LOG_TARGET, %hart, addr = format_args!("{addr:#010x}"), success, "store-conditional");
        Ok(success)
    }

    /// Notifies the table that `hart` performed a plain store to `addr`.
    ///
    /// Every other hart's reservation on `addr` is invalidated.
    ///
    /// Unlike the other operations, this is allowed on an unconfigured table,
    /// in which case it does nothing.
    pub fn store_to_address(&mut self, addr: u32, hart: HartId) -> Result<(), ReserveError> {
        if self.is_configured() {
            self.check_hart(hart)?;
        }
        self.invalidate_others(addr, hart);
        Ok(())
    }

    /// Marks the reservation on `addr` as invalidated for all harts except `hart`.
    pub(crate) fn invalidate_others(&mut self, addr: u32, hart: HartId) {
        let others = self.harts.iter_mut()
            .enumerate()
            .filter(|&(i, _)| i != hart.0);

        for (i, entry) in others {
            if entry.reserved.contains(&addr) && entry.invalidated.insert(addr) {
                tracing::trace!(
                    target: LOG_TARGET,
                    hart = %HartId(i),
                    by = %hart,
                    addr = format_args!("{addr:#010x}"),
                    "reservation invalidated"
                );
            }
        }
    }

    /// Whether `hart` holds a reservation on `addr` (valid or invalidated).
    pub fn is_reserved(&self, addr: u32, hart: HartId) -> Result<bool, ReserveError> {
        Ok(self.get(hart)?.reserved.contains(&addr))
    }

    /// Whether `hart`'s reservation on `addr` was invalidated by another hart's store.
    pub fn is_invalidated(&self, addr: u32, hart: HartId) -> Result<bool, ReserveError> {
        Ok(self.get(hart)?.invalidated.contains(&addr))
    }

    /// All addresses `hart` currently holds a reservation on, in ascending order.
    pub fn reservations(&self, hart: HartId) -> Result<Vec<u32>, ReserveError> {
        let mut addrs: Vec<_> = self.get(hart)?.reserved.iter().copied().collect();
        addrs.sort_unstable();
        Ok(addrs)
    }
}
