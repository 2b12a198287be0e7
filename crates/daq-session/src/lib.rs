//! Session Worker, Lock Arbiter, and Client Session Registry — the
//! concurrent access arbiter and transport layer at the center of the
//! gateway.

pub mod client;
pub mod lock;
pub mod worker;

pub use client::{ClientSession, ClientSessionRegistry};
pub use lock::{AcquireOutcome, LockArbiter, LockEvent, LockMode, LockRecord, QueueEntry, ReleaseOutcome};
pub use worker::{PendingRequest, SessionWorker, SessionWorkerHandle, SnapshotSampler};
