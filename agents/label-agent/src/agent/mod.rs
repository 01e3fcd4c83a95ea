//! Agent module
//!
//! This module contains the core agent functionality: the label file
//! watcher, the soft update protocol and the hard restart fallback.

pub mod batch;
pub mod labels;
pub mod restart;
pub mod soft_update;
pub mod state;
pub mod watcher;
