//! Original command resolution
//!
//! The profiler wraps whatever the workload would have run unmodified. That
//! is the first container's `command` (plus `args`) when the template sets
//! one, otherwise the image's own entrypoint and default arguments.

use k8s_openapi::api::batch::v1::Job;
use tracing::info;

use kubeprof_common::kube_utils::containers;
use kubeprof_common::{Error, Result};

use crate::image::ImageCommandResolver;

/// Command explicitly set on the first container, with its args appended
pub fn template_command(job: &Job) -> Option<Vec<String>> {
    let container = containers(job).first()?;
    let command = container.command.as_ref().filter(|c| !c.is_empty())?;
    let mut argv = command.clone();
    argv.extend(container.args.iter().flatten().cloned());
    Some(argv)
}

/// Resolve the command the first container runs without instrumentation.
///
/// Falls back to the image defaults, honouring Kubernetes override rules:
/// template `args` replace the image `CMD` but keep its `ENTRYPOINT`.
pub async fn resolve_original_command(
    job: &Job,
    images: &dyn ImageCommandResolver,
) -> Result<Vec<String>> {
    let container = containers(job)
        .first()
        .ok_or_else(|| Error::config("no container specified in job description"))?;

    if let Some(argv) = template_command(job) {
        return Ok(argv);
    }

    let image = container
        .image
        .as_deref()
        .filter(|i| !i.is_empty())
        .ok_or_else(|| {
            Error::config(format!(
                "container {} has neither a command nor an image",
                container.name
            ))
        })?;

    let defaults = images.resolve(image).await.map_err(|e| {
        Error::config(format!(
            "failed to get the original command of image {}: {}",
            image, e
        ))
    })?;

    let argv = match container.args.as_ref().filter(|a| !a.is_empty()) {
        Some(args) => defaults.entrypoint.iter().chain(args).cloned().collect(),
        None => defaults.default_command(),
    };

    if argv.is_empty() {
        return Err(Error::config(format!(
            "image {} defines no default command to profile",
            image
        )));
    }

    info!(image = %image, command = %argv.join(" "), "resolved command from image");
    Ok(argv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{ImageDefaults, MockImageCommandResolver};
    use k8s_openapi::api::batch::v1::JobSpec;
    use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};

    fn argv(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    fn job_with(container: Option<Container>) -> Job {
        Job {
            spec: Some(JobSpec {
                template: PodTemplateSpec {
                    metadata: None,
                    spec: Some(PodSpec {
                        containers: container.into_iter().collect(),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn container(command: Option<&[&str]>, args: Option<&[&str]>) -> Container {
        Container {
            name: "main".to_string(),
            image: Some("nginx:1.27".to_string()),
            command: command.map(argv),
            args: args.map(argv),
            ..Default::default()
        }
    }

    fn nginx_defaults() -> ImageDefaults {
        ImageDefaults {
            entrypoint: argv(&["/docker-entrypoint.sh"]),
            cmd: argv(&["nginx", "-g", "daemon off;"]),
        }
    }

    #[tokio::test]
    async fn template_command_wins_without_inspecting_image() {
        let mut images = MockImageCommandResolver::new();
        images.expect_resolve().never();

        let job = job_with(Some(container(Some(&["sleep"]), Some(&["60"]))));
        let argv_ = resolve_original_command(&job, &images).await.unwrap();
        assert_eq!(argv_, argv(&["sleep", "60"]));
    }

    #[tokio::test]
    async fn empty_template_command_falls_back_to_image() {
        let mut images = MockImageCommandResolver::new();
        images
            .expect_resolve()
            .withf(|image| image == "nginx:1.27")
            .times(1)
            .returning(|_| Ok(nginx_defaults()));

        let job = job_with(Some(container(Some(&[]), None)));
        let argv_ = resolve_original_command(&job, &images).await.unwrap();
        assert_eq!(
            argv_,
            argv(&["/docker-entrypoint.sh", "nginx", "-g", "daemon off;"])
        );
    }

    #[tokio::test]
    async fn template_args_replace_image_cmd() {
        let mut images = MockImageCommandResolver::new();
        images
            .expect_resolve()
            .returning(|_| Ok(nginx_defaults()));

        let job = job_with(Some(container(None, Some(&["nginx", "-T"]))));
        let argv_ = resolve_original_command(&job, &images).await.unwrap();
        assert_eq!(argv_, argv(&["/docker-entrypoint.sh", "nginx", "-T"]));
    }

    #[tokio::test]
    async fn no_source_is_a_config_error() {
        let mut images = MockImageCommandResolver::new();
        images
            .expect_resolve()
            .returning(|_| Ok(ImageDefaults::default()));

        let job = job_with(Some(container(None, None)));
        assert!(matches!(
            resolve_original_command(&job, &images).await,
            Err(Error::Config { .. })
        ));
    }

    #[tokio::test]
    async fn resolver_failure_is_a_config_error() {
        let mut images = MockImageCommandResolver::new();
        images
            .expect_resolve()
            .returning(|_| Err(Error::config("docker pull failed")));

        let job = job_with(Some(container(None, None)));
        let err = resolve_original_command(&job, &images).await.unwrap_err();
        assert!(err.to_string().contains("nginx:1.27"));
    }

    #[tokio::test]
    async fn missing_container_is_a_config_error() {
        let images = MockImageCommandResolver::new();
        assert!(matches!(
            resolve_original_command(&job_with(None), &images).await,
            Err(Error::Config { .. })
        ));
    }
}
