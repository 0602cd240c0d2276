//! HTTP error plumbing shared by every handler.

pub mod error;
pub mod problem;
