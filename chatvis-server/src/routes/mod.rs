pub mod health;
pub mod protected;
pub mod public;
