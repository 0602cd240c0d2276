//! Credentials and bearer tokens.

pub mod jwt;
pub mod password;

pub use jwt::{AuthError, AuthenticatedUser, Claims, TokenService};
pub use password::{hash_password, verify_password};
