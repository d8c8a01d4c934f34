//! Integration tests
//!
//! Run the full server against fake transcoders built from `sh` scripts.

pub mod support;

#[cfg(unix)]
mod e2e;
