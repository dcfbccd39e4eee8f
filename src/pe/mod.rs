//! Component A: locating the Watcom-appended debug container inside a PE image.

pub mod scanner;

pub use scanner::{locate_debug_container, DebugContainer};
