//! Durability helpers shared by everything that writes local files.
//!
//! A write is only considered durable once both the file and its parent
//! directory have been fsynced. Whole-file replacement goes through a
//! sibling temp file and a rename, so readers see either the old or the new
//! contents, never a mix.

pub mod fsync;

pub use fsync::{fsync_dir, fsync_file, parent_dir, replace_atomic};
