//! SolidFS Test & Validation
//!
//! Helpers for building images from generated trees, mounting them and
//! damaging them on purpose, plus the cross-crate test suites that use
//! them: round trips, deduplication, corruption handling and concurrent
//! reads.

pub mod harness;
pub mod proptest_image;

#[cfg(test)]
mod host_tree_tests;

pub use harness::{corrupt_fblock, init_tracing, mount_bytes, noise, read_file, TestImage};
pub use proptest_image::{arb_content, arb_tree, TreeModel};
