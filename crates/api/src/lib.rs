//! HTTP surface for the notification queue.
//!
//! - `POST /api/notification-worker`: run one worker invocation
//! - `POST /api/tasks`: enqueue a task
//! - `GET  /api/tasks/{id}`, `GET /api/tasks?status=..`: operator lookups
//! - `GET  /health`

pub mod middleware;
pub mod routes;
pub mod state;
