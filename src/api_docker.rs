mod docker_runtime;
mod run_config;

pub use docker_runtime::*;
pub use run_config::*;
