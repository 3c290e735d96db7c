//! Route handlers.

pub mod frame;
pub mod preview;
