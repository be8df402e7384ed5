//! Dedicated ledger writer thread.
//!
//! [`LedgerWriter`] spawns a background thread that owns an [`AuditStore`]
//! exclusively -- no mutex needed. Concurrent callers send append requests
//! through a bounded [`std::sync::mpsc::sync_channel`], so sequence and
//! `prev_hash` assignment are globally serialized by construction.
//!
//! # Design
//!
//! - `Append` uses a reply channel: the caller blocks until the entry is
//!   durable and gets back the hash-linked [`AuditEntry`] (or the error).
//!   Fire-and-forget would let the business action proceed without a
//!   recorded trail.
//! - The channel is bounded at 4096 to provide backpressure.
//! - `LedgerWriter` is `Clone`: each caller thread holds its own handle.

use std::sync::mpsc;
use std::thread;

use tracing::warn;

use custos_types::{AuditEvent, LedgerError};

use crate::entry::AuditEntry;
use crate::store::AuditStore;

/// Messages the writer thread can receive.
enum LedgerMsg {
    /// Append an event; the result is sent back on `reply`.
    Append {
        event: AuditEvent,
        reply: mpsc::SyncSender<Result<AuditEntry, LedgerError>>,
    },
    /// Shut down the writer thread cleanly.
    Shutdown,
}

/// Handle to a dedicated ledger writer thread.
///
/// The thread owns the [`AuditStore`] exclusively, so the write path needs
/// no lock. Clone this handle freely; read-side callers should open their
/// own read-only stores on the same path.
#[derive(Clone)]
pub struct LedgerWriter {
    tx: mpsc::SyncSender<LedgerMsg>,
}

impl LedgerWriter {
    /// Spawn a dedicated writer thread that owns `store`.
    ///
    /// Returns the writer handle and a [`thread::JoinHandle`] the caller
    /// can use to wait for the thread to exit after [`shutdown`].
    ///
    /// [`shutdown`]: LedgerWriter::shutdown
    pub fn spawn(store: AuditStore) -> (Self, thread::JoinHandle<()>) {
        let (tx, rx) = mpsc::sync_channel::<LedgerMsg>(4096);
        let handle = thread::Builder::new()
            .name("ledger-writer".into())
            .spawn(move || {
                Self::writer_loop(store, rx);
            })
            .expect("failed to spawn ledger writer thread");
        (Self { tx }, handle)
    }

    /// Main loop: process messages until `Shutdown` or the channel closes.
    fn writer_loop(mut store: AuditStore, rx: mpsc::Receiver<LedgerMsg>) {
        for msg in rx {
            match msg {
                LedgerMsg::Append { event, reply } => {
                    let result = store.append(&event);
                    if let Err(e) = &result {
                        warn!(error = %e, "ledger writer: append failed");
                    }
                    let _ = reply.send(result);
                }
                LedgerMsg::Shutdown => break,
            }
        }
    }

    /// Append an event to the ledger.
    ///
    /// Blocks until the writer thread has durably written the entry, then
    /// returns it. This is the boundary every sensitive action goes
    /// through; a `WriteFailure` means the caller must treat the whole
    /// logical action as unrecorded.
    pub fn append(&self, event: AuditEvent) -> Result<AuditEntry, LedgerError> {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        self.tx
            .send(LedgerMsg::Append {
                event,
                reply: reply_tx,
            })
            .map_err(|_| LedgerError::WriteFailure("ledger writer thread has shut down".into()))?;
        reply_rx.recv().map_err(|_| {
            LedgerError::WriteFailure("ledger writer reply channel closed unexpectedly".into())
        })?
    }

    /// Ask the writer thread to shut down.
    ///
    /// The thread finishes processing already-queued appends before
    /// exiting. Join the [`thread::JoinHandle`] returned from [`spawn`]
    /// to wait for it.
    ///
    /// [`spawn`]: LedgerWriter::spawn
    pub fn shutdown(&self) {
        let _ = self.tx.send(LedgerMsg::Shutdown);
    }
}
