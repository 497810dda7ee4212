use std::future::Future;

use stacked_errors::Result;

use crate::RunOptions;

/// Snapshot of a container as reported by the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    /// Runtime id of the container
    pub id: String,
    /// Container name, without the leading `/` the Engine API reports
    pub name: String,
    /// Content-addressable id of the image the container runs on
    pub image_id: String,
    /// `repository:tag` names currently pointing at `image_id`
    pub image_tags: Vec<String>,
    /// The image reference the container was created from, if known
    pub image_reference: Option<String>,
}

/// Snapshot of an image after a pull
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    /// Content-addressable id
    pub id: String,
    /// The `repository:tag` reference this image was pulled as
    pub reference: String,
    pub tags: Vec<String>,
}

/// The narrow set of container runtime capabilities the update workflow
/// needs.
///
/// [DockerRuntime](crate::api_docker::DockerRuntime) implements this against
/// the Docker Engine API. Every call is a round trip to the runtime.
pub trait ContainerRuntime {
    /// Looks up a container by name. Returns `Ok(None)` if the runtime has no
    /// container with this name, and `Err` only when the lookup itself fails.
    fn find_by_name(&self, name: &str) -> impl Future<Output = Result<Option<ContainerInfo>>>;

    /// Pulls `repository:tag` from its registry and returns the resulting
    /// local image.
    fn pull(&self, repository: &str, tag: &str) -> impl Future<Output = Result<ImageInfo>>;

    /// Gracefully stops the container, blocking until it is stopped
    fn stop(&self, container: &ContainerInfo) -> impl Future<Output = Result<()>>;

    /// Removes the runtime record of a stopped container
    fn remove(&self, container: &ContainerInfo) -> impl Future<Output = Result<()>>;

    /// Creates and starts a detached container named `name` from `image`
    fn run(
        &self,
        image: &str,
        name: &str,
        options: &RunOptions,
    ) -> impl Future<Output = Result<ContainerInfo>>;
}
