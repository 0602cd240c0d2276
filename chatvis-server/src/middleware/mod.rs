//! Request-scoped middleware: request ids and bearer authentication.

pub mod auth;
pub mod request_context;
