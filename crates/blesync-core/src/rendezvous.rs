//! Per-operation-kind wait/signal cells
//!
//! Each kind of GATT operation owns one cell. The event sink signals the cell with
//! the completion status; the caller that issued the operation waits on it. Cells
//! are level-triggered: a signal with nobody waiting stays stored and satisfies the
//! next wait of that kind.
//!
//! All cells share one mutex, so a signal can never slip in between a waiter
//! checking its cell and registering for wakeup.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::transport::GattStatus;

// ----------------------------------------------------------------------------
// Operation Kinds
// ----------------------------------------------------------------------------

/// The eight independently correlated GATT operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Connection,
    Discovery,
    Read,
    Write,
    DescriptorRead,
    DescriptorWrite,
    ReliableWrite,
    SignalStrength,
}

impl OperationKind {
    pub const ALL: [OperationKind; 8] = [
        OperationKind::Connection,
        OperationKind::Discovery,
        OperationKind::Read,
        OperationKind::Write,
        OperationKind::DescriptorRead,
        OperationKind::DescriptorWrite,
        OperationKind::ReliableWrite,
        OperationKind::SignalStrength,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Connection => "connection",
            OperationKind::Discovery => "service discovery",
            OperationKind::Read => "characteristic read",
            OperationKind::Write => "characteristic write",
            OperationKind::DescriptorRead => "descriptor read",
            OperationKind::DescriptorWrite => "descriptor write",
            OperationKind::ReliableWrite => "reliable write",
            OperationKind::SignalStrength => "signal strength read",
        };
        f.write_str(name)
    }
}

// ----------------------------------------------------------------------------
// Rendezvous Table
// ----------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy)]
struct Cell {
    status: GattStatus,
    signaled: bool,
    waiters: usize,
    peak_waiters: usize,
}

/// Eight wait/signal cells behind one shared mutex
#[derive(Debug)]
pub struct RendezvousTable {
    cells: Mutex<[Cell; 8]>,
    wakeups: [Notify; 8],
}

impl Default for RendezvousTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RendezvousTable {
    pub fn new() -> Self {
        Self {
            cells: Mutex::new([Cell::default(); 8]),
            wakeups: std::array::from_fn(|_| Notify::new()),
        }
    }

    fn cells(&self) -> MutexGuard<'_, [Cell; 8]> {
        self.cells.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `status` in the cell for `kind` and wake one waiter
    pub fn signal(&self, kind: OperationKind, status: GattStatus) {
        self.signal_with(kind, status, || ());
    }

    /// Run `update` and store `status` as one step under the cell lock, then wake
    /// one waiter. Side effects made by `update` are visible to the woken waiter.
    pub fn signal_with<R>(
        &self,
        kind: OperationKind,
        status: GattStatus,
        update: impl FnOnce() -> R,
    ) -> R {
        let result = {
            let mut cells = self.cells();
            let result = update();
            let cell = &mut cells[kind.index()];
            cell.status = status;
            cell.signaled = true;
            result
        };
        self.wakeups[kind.index()].notify_one();
        result
    }

    /// Wait for the next signal of `kind`
    ///
    /// Returns the signaled status, or `None` if `timeout` elapsed first. A `None`
    /// timeout waits without bound. A signal arriving after the timeout stays in the
    /// cell for the next waiter.
    pub async fn wait(&self, kind: OperationKind, timeout: Option<Duration>) -> Option<GattStatus> {
        let _waiter = WaiterGuard::enter(self, kind);
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let wakeup = &self.wakeups[kind.index()];

        loop {
            let notified = wakeup.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(status) = self.take(kind) {
                return Some(status);
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return None;
                    }
                }
                None => notified.await,
            }
        }
    }

    fn take(&self, kind: OperationKind) -> Option<GattStatus> {
        let mut cells = self.cells();
        let cell = &mut cells[kind.index()];
        if cell.signaled {
            cell.signaled = false;
            Some(cell.status)
        } else {
            None
        }
    }

    /// Whether a signal of `kind` is stored and not yet consumed
    pub fn is_signaled(&self, kind: OperationKind) -> bool {
        self.cells()[kind.index()].signaled
    }

    /// Largest number of simultaneous waiters ever seen on the cell for `kind`
    pub fn peak_waiters(&self, kind: OperationKind) -> usize {
        self.cells()[kind.index()].peak_waiters
    }
}

/// Waiter accounting for one in-progress `wait`
struct WaiterGuard<'a> {
    table: &'a RendezvousTable,
    kind: OperationKind,
}

impl<'a> WaiterGuard<'a> {
    fn enter(table: &'a RendezvousTable, kind: OperationKind) -> Self {
        let mut cells = table.cells();
        let cell = &mut cells[kind.index()];
        cell.waiters += 1;
        cell.peak_waiters = cell.peak_waiters.max(cell.waiters);
        Self { table, kind }
    }
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        let mut cells = self.table.cells();
        cells[self.kind.index()].waiters -= 1;
    }
}
