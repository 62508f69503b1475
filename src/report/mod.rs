//! Answer compilation and output.

pub mod compiler;

pub use compiler::*;
