//! A [`ReservationTable`] owned by a dedicated thread.
//!
//! When simulated harts run on real host threads, every reservation operation
//! has to observe a single total order. [`ReserveActor`] provides that order by
//! moving the table onto its own thread and servicing requests one at a time,
//! in the order they arrive on its channel.
//!
//! Requests are made through [`ReserveHandle`]s, which can be cloned and sent
//! to other threads. Each call blocks until the actor has applied the request.

use std::num::NonZeroUsize;
use std::thread::JoinHandle;

use crossbeam_channel as cbc;

use super::{HartId, ReservationTable, ReserveError, LOG_TARGET};

enum Request {
    Configure(NonZeroUsize),
    Reset,
    LoadReserved(u32, HartId),
    StoreConditional(u32, HartId),
    StoreToAddress(u32, HartId),
    Stop,
}

struct Envelope {
    req: Request,
    reply: cbc::Sender<Result<bool, ReserveError>>,
}

/// The thread serving reservation requests.
///
/// Dropping the actor without calling [`ReserveActor::close`] leaves the thread
/// running until every [`ReserveHandle`] is dropped.
pub struct ReserveActor {
    requests: cbc::Sender<Envelope>,
    handler: JoinHandle<ReservationTable>,
}

impl ReserveActor {
    /// Moves `table` onto a new thread and starts serving requests.
    pub fn spawn(table: ReservationTable) -> Self {
        let (tx, rx) = cbc::unbounded::<Envelope>();

        let handler = std::thread::spawn(move || {
            let mut table = table;
            for Envelope { req, reply } in rx {
                let result = match req {
                    Request::Configure(n) => {
                        table.configure(n);
                        Ok(true)
                    },
                    Request::Reset => {
                        table.reset();
                        Ok(true)
                    },
                    Request::LoadReserved(addr, hart)     => table.load_reserved(addr, hart).map(|()| true),
                    Request::StoreConditional(addr, hart) => table.store_conditional(addr, hart),
                    Request::StoreToAddress(addr, hart)   => table.store_to_address(addr, hart).map(|()| true),
                    Request::Stop => {
                        let _ = reply.send(Ok(true));
                        break;
                    }
                };

                // The requester may have given up waiting. That's fine.
                let _ = reply.send(result);
            }

            tracing::debug!(target: LOG_TARGET, "reservation actor stopped");
            table
        });

        Self { requests: tx, handler }
    }

    /// Creates a new handle to this actor.
    pub fn handle(&self) -> ReserveHandle {
        ReserveHandle { requests: self.requests.clone() }
    }

    /// Stops the actor and returns the table it was serving.
    ///
    /// Requests already queued before this call are applied first.
    /// Handles used afterwards return [`ReserveError::Disconnected`].
    pub fn close(self) -> ReservationTable {
        let Self { requests, handler } = self;

        let (reply, _rx) = cbc::bounded(1);
        let _ = requests.send(Envelope { req: Request::Stop, reply });
        std::mem::drop(requests);

        match handler.join() {
            Ok(table) => table,
            // The actor only panics if the table did, so there is nothing to recover.
            Err(e) => std::panic::resume_unwind(e),
        }
    }
}

/// A cloneable, thread-safe handle to a [`ReserveActor`].
///
/// This exposes the same operations as [`ReservationTable`].
#[derive(Clone)]
pub struct ReserveHandle {
    requests: cbc::Sender<Envelope>,
}
impl ReserveHandle where ReserveHandle: Send + Sync {}

impl ReserveHandle {
    fn request(&self, req: Request) -> Result<bool, ReserveError> {
        let (reply, rx) = cbc::bounded(1);
        self.requests.send(Envelope { req, reply })
            .map_err(|_| ReserveError::Disconnected)?;

        rx.recv().map_err(|_| ReserveError::Disconnected)?
    }

    /// See [`ReservationTable::configure`].
    pub fn configure(&self, hart_count: NonZeroUsize) -> Result<(), ReserveError> {
        self.request(Request::Configure(hart_count)).map(|_| ())
    }
    /// See [`ReservationTable::reset`].
    pub fn reset(&self) -> Result<(), ReserveError> {
        self.request(Request::Reset).map(|_| ())
    }
    /// See [`ReservationTable::load_reserved`].
    pub fn load_reserved(&self, addr: u32, hart: HartId) -> Result<(), ReserveError> {
        self.request(Request::LoadReserved(addr, hart)).map(|_| ())
    }
    /// See [`ReservationTable::store_conditional`].
    pub fn store_conditional(&self, addr: u32, hart: HartId) -> Result<bool, ReserveError> {
        self.request(Request::StoreConditional(addr, hart))
    }
    /// See [`ReservationTable::store_to_address`].
    pub fn store_to_address(&self, addr: u32, hart: HartId) -> Result<(), ReserveError> {
        self.request(Request::StoreToAddress(addr, hart)).map(|_| ())
    }
}
