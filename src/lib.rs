//! Checks whether a running container still uses the newest image published
//! under a tag, and optionally replaces it with a container on that image.
//!
//! The workflow in [check_container] talks to the container runtime only
//! through the [ContainerRuntime] trait. [api_docker::DockerRuntime] is the
//! Docker Engine implementation.

/// [ContainerRuntime] using the docker API provided by [bollard] as a backend
#[cfg(feature = "bollard")]
pub mod api_docker;
mod error;
/// Logging configuration and the alert sink
pub mod logging;
mod parsing;
/// Typed runtime arguments for recreated containers
pub mod run_options;
mod runtime;
mod workflow;

pub use error::*;
pub use parsing::*;
pub use run_options::{load_run_options, RunOptions};
pub use runtime::*;
/// This reexport helps with dependency wrangling
pub use stacked_errors;
pub use workflow::*;
