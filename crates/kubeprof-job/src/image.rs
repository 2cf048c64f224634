//! Default command lookup for container images
//!
//! Used when the job template doesn't spell out the workload's command. The
//! Docker-backed resolver pulls the image locally, then inspects its config.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use kubeprof_common::{Error, Result};

/// Entrypoint and default arguments baked into an image
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageDefaults {
    /// `ENTRYPOINT` of the image
    #[serde(default, deserialize_with = "null_as_empty")]
    pub entrypoint: Vec<String>,
    /// `CMD` of the image
    #[serde(default, deserialize_with = "null_as_empty")]
    pub cmd: Vec<String>,
}

impl ImageDefaults {
    /// The command the image runs when nothing overrides it
    pub fn default_command(&self) -> Vec<String> {
        self.entrypoint.iter().chain(&self.cmd).cloned().collect()
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Trait abstracting image introspection
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ImageCommandResolver: Send + Sync {
    /// Resolve the entrypoint and default command of `image`
    async fn resolve(&self, image: &str) -> Result<ImageDefaults>;
}

/// Resolver that shells out to the local Docker daemon
#[derive(Debug, Clone, Default)]
pub struct DockerImageResolver;

impl DockerImageResolver {
    async fn docker(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("docker").args(args).output().await?;
        if !output.status.success() {
            return Err(Error::config(format!(
                "docker {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Parse the output of `docker inspect --format '{{json .Config}}'`
pub(crate) fn parse_image_config(json: &str) -> Result<ImageDefaults> {
    serde_json::from_str(json.trim())
        .map_err(|e| Error::serialization(format!("invalid image config: {}", e)))
}

#[async_trait]
impl ImageCommandResolver for DockerImageResolver {
    async fn resolve(&self, image: &str) -> Result<ImageDefaults> {
        info!(image = %image, "pulling image to inspect its default command");
        self.docker(&["pull", image]).await?;
        let config = self
            .docker(&["inspect", "--format", "{{json .Config}}", image])
            .await?;
        let defaults = parse_image_config(&config)?;
        debug!(image = %image, entrypoint = ?defaults.entrypoint, cmd = ?defaults.cmd, "inspected image");
        Ok(defaults)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_entrypoint_and_cmd() {
        let json = r#"{"Env":["PATH=/usr/bin"],"Entrypoint":["/docker-entrypoint.sh"],"Cmd":["nginx","-g","daemon off;"]}"#;
        let defaults = parse_image_config(json).unwrap();
        assert_eq!(defaults.entrypoint, vec!["/docker-entrypoint.sh"]);
        assert_eq!(
            defaults.default_command(),
            vec!["/docker-entrypoint.sh", "nginx", "-g", "daemon off;"]
        );
    }

    #[test]
    fn null_entrypoint_is_empty() {
        let defaults = parse_image_config("{\"Entrypoint\":null,\"Cmd\":[\"sh\"]}\n").unwrap();
        assert!(defaults.entrypoint.is_empty());
        assert_eq!(defaults.default_command(), vec!["sh"]);
    }

    #[test]
    fn missing_fields_are_empty() {
        let defaults = parse_image_config("{}").unwrap();
        assert!(defaults.default_command().is_empty());
    }

    #[test]
    fn garbage_is_a_serialization_error() {
        assert!(matches!(
            parse_image_config("[ping"),
            Err(Error::Serialization(_))
        ));
    }
}
