//! Transcoder process management
//!
//! This module owns the external transcoder processes:
//! - Argument construction and process start (one process per request)
//! - Stderr capture for diagnostics
//! - Guaranteed kill-and-reap when a session ends

pub mod guard;
pub mod launcher;
pub mod stderr;

pub use guard::{ProcessExit, ProcessGuard, Shutdown};
pub use launcher::{Launcher, StreamRequest};
