use std::fmt;

use tracing::{debug, info, warn};

use crate::{
    image_reference, repository_of, ContainerInfo, ContainerRuntime, ImageInfo, ReplaceStep,
    RunOptions, UpdateError,
};

pub type Result<T> = std::result::Result<T, UpdateError>;

/// Where a run currently is. Any stage can move to [Stage::Failed] instead,
/// the failure itself is reported through the returned [UpdateError].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    Located,
    Pulled,
    UpToDate,
    Outdated,
    Stopped,
    Removed,
    Recreated,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

fn enter(stage: Stage) {
    debug!(%stage, "entering stage");
}

/// One check of a single container
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    /// Name of the container to check
    pub container: String,
    /// Tag to pull and compare against, usually `latest`
    pub tag: String,
    /// Replace the container if it is outdated, otherwise only report
    pub update: bool,
    /// Extra arguments for the recreated container
    pub run_options: RunOptions,
}

impl UpdateRequest {
    pub fn new(container: impl ToString) -> Self {
        Self {
            container: container.to_string(),
            tag: "latest".to_owned(),
            update: false,
            run_options: RunOptions::default(),
        }
    }

    pub fn tag(mut self, tag: impl ToString) -> Self {
        self.tag = tag.to_string();
        self
    }

    pub fn update(mut self, update: bool) -> Self {
        self.update = update;
        self
    }

    pub fn run_options(mut self, run_options: RunOptions) -> Self {
        self.run_options = run_options;
        self
    }
}

/// The result of a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The container already runs the pulled image
    UpToDate { container: ContainerInfo },
    /// A newer image exists but no update was requested
    Outdated {
        container: ContainerInfo,
        image: ImageInfo,
    },
    /// The container was replaced by `container`, which runs `image`
    Updated {
        container: ContainerInfo,
        image: ImageInfo,
    },
}

/// Resolves `name` to a live container
pub async fn locate<R: ContainerRuntime>(runtime: &R, name: &str) -> Result<ContainerInfo> {
    match runtime.find_by_name(name).await {
        Ok(Some(container)) => {
            debug!(
                image.id = %container.image_id,
                image.tags = ?container.image_tags,
                "image of container"
            );
            Ok(container)
        }
        Ok(None) => Err(UpdateError::ContainerNotFound {
            name: name.to_owned(),
        }),
        Err(cause) => Err(UpdateError::Lookup {
            name: name.to_owned(),
            cause,
        }),
    }
}

/// The repository the container's image belongs to, taken from the first tag
/// of its image or, for an untagged image, from the reference the container
/// was created with.
pub fn container_repository(container: &ContainerInfo) -> Result<&str> {
    container
        .image_tags
        .first()
        .or(container.image_reference.as_ref())
        .map(|reference| repository_of(reference))
        .ok_or_else(|| UpdateError::UntaggedImage {
            container: container.name.clone(),
        })
}

/// Pulls `tag` of the repository `container` runs on
pub async fn resolve_image<R: ContainerRuntime>(
    runtime: &R,
    container: &ContainerInfo,
    tag: &str,
) -> Result<ImageInfo> {
    let repository = container_repository(container)?;
    debug!(repository, tag, "looking for a new image");
    let image = runtime
        .pull(repository, tag)
        .await
        .map_err(|cause| UpdateError::PullFailed {
            reference: image_reference(repository, tag),
            cause,
        })?;
    debug!(image.id = %image.id, "pulled image version");
    Ok(image)
}

/// Exact, case sensitive comparison of two image identities
pub fn is_up_to_date(current_image_id: &str, pulled_image_id: &str) -> bool {
    current_image_id == pulled_image_id
}

/// Stops and removes `container`, then runs a new container with the same
/// name from `repository:tag`.
///
/// Nothing is rolled back: if the last step fails, no container with this
/// name exists afterwards.
pub async fn replace<R: ContainerRuntime>(
    runtime: &R,
    container: &ContainerInfo,
    tag: &str,
    run_options: &RunOptions,
) -> Result<ContainerInfo> {
    let image = image_reference(container_repository(container)?, tag);
    let failed = |step: ReplaceStep| {
        move |cause: stacked_errors::Error| UpdateError::UpdateFailed {
            container: container.name.clone(),
            step,
            cause,
        }
    };

    runtime
        .stop(container)
        .await
        .map_err(failed(ReplaceStep::Stop))?;
    enter(Stage::Stopped);
    runtime
        .remove(container)
        .await
        .map_err(failed(ReplaceStep::Remove))?;
    enter(Stage::Removed);
    let new_container = runtime
        .run(&image, &container.name, run_options)
        .await
        .map_err(failed(ReplaceStep::Run))?;
    enter(Stage::Recreated);
    Ok(new_container)
}

/// Checks the container named in `request` against the newest image of its
/// repository with the requested tag and, if requested, replaces it.
#[tracing::instrument(skip_all,
    fields(
        container.name = %request.container,
        tag = %request.tag,
    )
)]
pub async fn check_container<R: ContainerRuntime>(
    runtime: &R,
    request: &UpdateRequest,
) -> Result<Outcome> {
    run_stages(runtime, request)
        .await
        .inspect_err(|_| enter(Stage::Failed))
}

async fn run_stages<R: ContainerRuntime>(runtime: &R, request: &UpdateRequest) -> Result<Outcome> {
    enter(Stage::Start);
    debug!("going to check container");
    let container = locate(runtime, &request.container).await?;
    enter(Stage::Located);

    let image = resolve_image(runtime, &container, &request.tag).await?;
    enter(Stage::Pulled);

    if is_up_to_date(&container.image_id, &image.id) {
        enter(Stage::UpToDate);
        debug!("container still up-to-date");
        enter(Stage::Done);
        return Ok(Outcome::UpToDate { container })
    }
    enter(Stage::Outdated);

    let outcome = if request.update {
        info!("container outdated, trying to perform auto-update");
        let new_container =
            replace(runtime, &container, &request.tag, &request.run_options).await?;
        info!(image.tags = ?new_container.image_tags, "container updated");
        Outcome::Updated {
            container: new_container,
            image,
        }
    } else {
        warn!(
            container.name = %container.name,
            image.id = %image.id,
            "container outdated, you need to perform the update manually"
        );
        Outcome::Outdated { container, image }
    };
    enter(Stage::Done);
    Ok(outcome)
}
