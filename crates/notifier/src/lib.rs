//! Notification delivery.
//!
//! Workers claim tasks from the queue and deliver them via:
//! - Email (Resend HTTP API)
//! - SMS (Twilio Messages API)
//!
//! Retry with exponential backoff and dead-lettering are owned by the task
//! store; this crate decides which channels a task needs, how partial
//! failures count, and performs the settlement write-back on success.

pub mod channels;
pub mod dispatcher;
pub mod payload;
pub mod settlement;
pub mod worker;

pub use dispatcher::{DispatchError, DispatchReport, Dispatcher};
pub use settlement::{MemorySettlement, PgSettlement, Settled, Settlement};
pub use worker::{NotificationWorker, WorkerSettings};

#[cfg(test)]
pub(crate) mod test_support;
