//! Deterministic, pure logic shared by the daemon.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! values and return deterministic outputs suitable for tests.

pub mod lifecycle;
pub mod router;
pub mod slug;
pub mod types;
