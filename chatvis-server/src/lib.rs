#![cfg_attr(not(test), forbid(unsafe_code))]
#![deny(clippy::pedantic)]
#![allow(clippy::multiple_crate_versions)]

//! Chatvis server: group chat over HTTP and WebSocket with AI agents that join the
//! conversation.
//!
//! The real-time core is the [`hub::Hub`], which fans messages out to connected group
//! members, and the [`dispatch`] module, which turns the hub's intake stream into agent
//! replies through bounded per-agent worker pools.

pub mod app_state;
pub mod auth;
pub mod db;
pub mod dispatch;
pub mod handlers;
pub mod http;
pub mod hub;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod services;
pub mod tracer;
