#![allow(clippy::collapsible_if)]

pub mod codegen;
pub mod config;
pub mod driver;
pub mod error;
pub mod job;
pub mod llvm;
pub mod runtime;
pub mod target;

pub use error::{Error, Result};

#[cfg(test)]
mod tests;
