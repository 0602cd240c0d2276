//! Database bootstrap and probes.

pub mod bootstrap;
