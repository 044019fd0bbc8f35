//! # UI Module
//!
//! Layout and widgets for the pitch trainer window.

pub mod main_display;
pub mod pitch_meter;
