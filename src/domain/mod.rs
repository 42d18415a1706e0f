//! Domain Module
//!
//! Collaborator ports consumed by the completion protocol.

pub mod ports;

pub use ports::*;
