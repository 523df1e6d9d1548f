//! Scheduled trigger for the notification worker.

pub mod trigger;
