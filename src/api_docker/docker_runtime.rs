use bollard::{
    container::{CreateContainerOptions, StopContainerOptions},
    errors::Error as BollardError,
    image::CreateImageOptions,
    Docker,
};
use futures::stream::StreamExt;
use stacked_errors::{Result, StackableErr};

use crate::{
    api_docker::container_config, image_reference, ContainerInfo, ContainerRuntime, ImageInfo,
    RunOptions,
};

/// [ContainerRuntime] backed by the Docker Engine API through [bollard]
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
    stop_timeout: Option<i64>,
}

impl DockerRuntime {
    pub fn new(docker: Docker) -> Self {
        Self {
            docker,
            stop_timeout: None,
        }
    }

    /// Connects with `bollard`'s defaults, which honor `DOCKER_HOST`
    pub async fn connect() -> Result<Self> {
        let docker = tokio::task::spawn_blocking(|| Docker::connect_with_defaults().stack())
            .await
            .stack()??;
        Ok(Self::new(docker))
    }

    /// Seconds to wait for a graceful stop before the container is killed.
    /// `None` leaves it to the daemon.
    pub fn with_stop_timeout(mut self, stop_timeout: Option<i64>) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    async fn image_tags(&self, image_id: &str) -> Result<Vec<String>> {
        Ok(self
            .docker
            .inspect_image(image_id)
            .await
            .stack_err_with(|| format!("inspecting image {image_id}"))?
            .repo_tags
            .unwrap_or_default())
    }
}

impl ContainerRuntime for DockerRuntime {
    #[tracing::instrument(skip(self))]
    async fn find_by_name(&self, name: &str) -> Result<Option<ContainerInfo>> {
        let inspect = match self.docker.inspect_container(name, None).await {
            Ok(inspect) => inspect,
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => return Ok(None),
            Err(err) => {
                return Err(err).stack_err_with(|| format!("inspecting container {name}"))
            }
        };

        let image_id = inspect
            .image
            .stack_err_with(|| format!("container {name} reports no image"))?;
        let image_tags = self.image_tags(&image_id).await.stack()?;
        Ok(Some(ContainerInfo {
            id: inspect.id.unwrap_or_else(|| name.to_owned()),
            name: inspect
                .name
                .as_deref()
                .map_or(name, |n| n.strip_prefix('/').unwrap_or(n))
                .to_owned(),
            image_id,
            image_tags,
            image_reference: inspect.config.and_then(|config| config.image),
        }))
    }

    #[tracing::instrument(skip(self))]
    async fn pull(&self, repository: &str, tag: &str) -> Result<ImageInfo> {
        let reference = image_reference(repository, tag);

        let mut stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: repository,
                tag,
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(info) = stream.next().await {
            let info = info.stack_err_with(|| format!("pulling {reference}"))?;
            if let Some(status) = info.status {
                tracing::debug!(%status, "pull progress");
            }
        }

        let image = self
            .docker
            .inspect_image(&reference)
            .await
            .stack_err_with(|| format!("inspecting pulled image {reference}"))?;
        Ok(ImageInfo {
            id: image
                .id
                .stack_err_with(|| format!("pulled image {reference} has no id"))?,
            reference,
            tags: image.repo_tags.unwrap_or_default(),
        })
    }

    #[tracing::instrument(skip_all, fields(container.name = %container.name))]
    async fn stop(&self, container: &ContainerInfo) -> Result<()> {
        tracing::debug!("stopping container");
        self.docker
            .stop_container(
                &container.id,
                self.stop_timeout.map(|t| StopContainerOptions { t }),
            )
            .await
            .stack_err_with(|| format!("stopping container {}", container.name))
    }

    #[tracing::instrument(skip_all, fields(container.name = %container.name))]
    async fn remove(&self, container: &ContainerInfo) -> Result<()> {
        tracing::debug!("removing container");
        self.docker
            .remove_container(&container.id, None)
            .await
            .stack_err_with(|| format!("removing container {}", container.name))
    }

    #[tracing::instrument(skip(self, options))]
    async fn run(&self, image: &str, name: &str, options: &RunOptions) -> Result<ContainerInfo> {
        let config = container_config(image, options).stack()?;

        tracing::debug!("creating container");
        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.to_owned(),
                    ..Default::default()
                }),
                config,
            )
            .await
            .inspect(|x| tracing::debug!(container.id = %x.id))
            .stack_err_with(|| format!("creating container {name} from {image}"))?;

        tracing::debug!("starting container");
        self.docker
            .start_container::<String>(name, None)
            .await
            .stack_err_with(|| format!("starting container {name}"))?;

        self.find_by_name(name)
            .await
            .stack()?
            .stack_err_with(|| format!("container {name} vanished after starting"))
    }
}
