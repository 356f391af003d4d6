//! The run-time support library every kernel links against.

pub mod call;
pub mod depot;
pub mod library;
pub mod link;
pub mod registry;
mod routines;

pub use call::call_runtime;
pub use depot::{DepotPath, ResolvedDepots};
pub use library::{build_runtime, RuntimeLibrary};
pub use link::link_library;
pub use registry::{RoutineSource, RuntimeMethodInstance, RuntimeRegistry};

#[cfg(test)]
mod tests;
