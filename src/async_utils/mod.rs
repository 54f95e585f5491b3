//! Asynchronous utilities for use with Tokio.
//!
//! Some of this stuff is frankly Rust magic, but it enables everything else we
//! do. We pay the complexity tax here to establish the async queue-based
//! architecture of everything else we do.
//!
//! Based on previous Rust experience, you should be able to leave this code
//! unchanged for years.

pub mod blocking_iter_streams;

use std::{future::Future, pin::Pin};

use crate::prelude::*;

/// A boxed, owned, `Send` future, used to carry state across the blocking
/// thread pool boundary in [`blocking_iter_streams`].
pub type BoxedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Report any command failures.
pub fn check_for_command_failure(
    command_name: &str,
    status: std::process::ExitStatus,
) -> Result<()> {
    if status.success() {
        Ok(())
    } else if let Some(exit_code) = status.code() {
        Err(anyhow!("{} failed with exit code {}", command_name, exit_code))
    } else {
        // Not all platforms have exit codes.
        Err(anyhow!("{} failed", command_name))
    }
}
