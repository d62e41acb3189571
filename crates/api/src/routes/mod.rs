//! HTTP route handlers.

pub mod credit;
pub mod sagas;
pub mod system;
