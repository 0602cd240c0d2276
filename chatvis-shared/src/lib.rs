#![cfg_attr(not(test), forbid(unsafe_code))]
#![deny(clippy::pedantic)]
#![allow(clippy::multiple_crate_versions)]

//! Shared building blocks for the Chatvis server: configuration, wire models and the
//! completion-client abstraction used by AI agents.

pub mod config;
pub mod llms;
pub mod models;
