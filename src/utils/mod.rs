//! Shared utilities.

pub mod checksum;
pub mod json_extraction;
