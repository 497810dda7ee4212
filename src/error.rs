use std::{fmt, path::PathBuf};

/// The replace step that failed during an auto-update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceStep {
    Stop,
    Remove,
    Run,
}

impl fmt::Display for ReplaceStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReplaceStep::Stop => "stop",
            ReplaceStep::Remove => "remove",
            ReplaceStep::Run => "run",
        })
    }
}

/// Every way a check or update run can fail. All of them are fatal to the
/// process.
///
/// The `cause` fields carry the lower level [stacked_errors::Error] from the
/// runtime adapter.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("could not connect to the container runtime: {cause}")]
    Runtime { cause: stacked_errors::Error },
    #[error("container `{name}` not found")]
    ContainerNotFound { name: String },
    #[error("looking up container `{name}` failed: {cause}")]
    Lookup {
        name: String,
        cause: stacked_errors::Error,
    },
    #[error("the image of container `{container}` has no tag or reference to derive a repository from")]
    UntaggedImage { container: String },
    #[error("pulling `{reference}` failed: {cause}")]
    PullFailed {
        reference: String,
        cause: stacked_errors::Error,
    },
    #[error("updating container `{container}` failed at the {step} step: {cause}")]
    UpdateFailed {
        container: String,
        step: ReplaceStep,
        cause: stacked_errors::Error,
    },
    #[error("invalid run options in {path:?}: {cause}")]
    InvalidRunOptions {
        path: PathBuf,
        cause: stacked_errors::Error,
    },
}

impl UpdateError {
    /// The process exit status this error maps to
    pub fn exit_code(&self) -> u8 {
        1
    }
}
