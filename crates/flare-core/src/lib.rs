//! Core library for the Flare function platform.
//!
//! Flare turns a user-supplied Rust source file plus a set of prebuilt
//! binary packages into a servable function, in two phases:
//!
//! - **build**: fetch the declared packages, reduce their libraries to a
//!   deduplicated, exclusion-filtered dependency closure, trial-compile the
//!   function against that closure, and persist a function specification
//!   into the deploy package ([`build::BuildEngine`]).
//! - **run**: read the specification back, compile the function a second
//!   time against the exact same closure, load the artifact with a
//!   manifest-backed resolution hook, and serve invocations through the
//!   generic-to-specialized lifecycle ([`runtime::RuntimeLoader`],
//!   [`runtime::SpecializationSlot`]).
//!
//! The function specification (`func.json`) is the only contract between
//! the two phases.

pub mod build;
pub mod closure;
pub mod compile;
pub mod error;
pub mod fetch;
pub mod manifest;
pub mod paths;
pub mod runtime;

pub use build::BuildEngine;
pub use closure::ClosureBuilder;
pub use compile::{CompileOptions, Compiler, Diagnostic, Toolchain};
pub use error::{Error, Result};
pub use fetch::{DirFetcher, FetchCache, HttpFetcher, PackageFetcher, PackageId};
pub use manifest::{
    content_hash, DependencyManifest, ExclusionRule, FunctionSpec, LibraryRef,
};
pub use paths::PackageLayout;
pub use runtime::{
    Artifact, InvokeRequest, InvokeResponse, LoadedFunction, RuntimeLoader, SpecializationSlot,
};
