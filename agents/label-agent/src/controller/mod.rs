//! Controller module
//!
//! This module handles all communication with the controller,
//! including the HTTP label API and its payload formats.

pub mod client;
pub mod protocol;
