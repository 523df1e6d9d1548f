//! Durable notification task queue.
//!
//! The [`store::TaskStore`] trait is the only write path for task rows. It
//! offers the three atomic operations the worker relies on (claim, complete,
//! fail) plus enqueue and read-only lookups for collaborators and operators.

pub mod backoff;
pub mod clock;
pub mod store;

pub use backoff::Backoff;
pub use clock::{Clock, ManualClock, SystemClock};
pub use store::memory::MemoryTaskStore;
pub use store::postgres::PgTaskStore;
pub use store::{Completion, FailOutcome, FailureKind, StoreError, TaskStore};
