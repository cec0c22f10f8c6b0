//! API route modules.

pub mod auth;
pub mod control;
pub mod events;
