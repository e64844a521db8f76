//! Run-phase runtime: loading, resolution, specialization, invocation.

mod invoke;
mod loader;
mod resolver;
mod state;

pub use invoke::{Artifact, EntryFn, EntryResult, InvokeRequest, InvokeResponse};
pub use loader::{LoadedFunction, RuntimeLoader};
pub use resolver::{LibraryHost, LibraryResolver, PlatformHost, Resolution, SharedLibrary};
pub use state::SpecializationSlot;

/// Default entry symbol when a specialize request names none.
pub const DEFAULT_ENTRY_SYMBOL: &str = "handler";
