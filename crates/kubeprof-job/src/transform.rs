//! Job template instrumentation
//!
//! Pure rewrites of a user-supplied `batch/v1` Job so every container runs
//! under the profiling tool:
//! 1. security elevation (capability + privileged)
//! 2. stage mount injection (host-path volume + mount in every container)
//! 3. command override (copy binary, record, report)
//!
//! Nothing here touches the network, so the whole pipeline is unit tested
//! against literal structures.

use std::borrow::Cow;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{
    Capabilities, Container, HostPathVolumeSource, SecurityContext, Volume, VolumeMount,
};

use kubeprof_common::config::is_path_char;
use kubeprof_common::kube_utils::{containers, containers_mut};
use kubeprof_common::{Error, ProfilingTool, Result, StageConfig, StageMountMode};

/// Capability the profiler needs to read kernel performance counters
pub const ELEVATION_CAPABILITY: &str = "SYS_ADMIN";

/// Name of the injected host-path volume
pub const STAGE_VOLUME_NAME: &str = "stage-dir";

/// Add [`ELEVATION_CAPABILITY`] and `privileged: true` to every container.
///
/// Capability membership is checked case-insensitively so re-applying is a
/// no-op.
pub fn elevate_security(job: &mut Job) {
    let Some(containers) = containers_mut(job) else {
        return;
    };
    for container in containers.iter_mut() {
        elevate_container(container);
    }
}

fn elevate_container(container: &mut Container) {
    let security = container
        .security_context
        .get_or_insert_with(SecurityContext::default);
    let add = security
        .capabilities
        .get_or_insert_with(Capabilities::default)
        .add
        .get_or_insert_with(Vec::new);

    if !add
        .iter()
        .any(|cap| cap.eq_ignore_ascii_case(ELEVATION_CAPABILITY))
    {
        add.push(ELEVATION_CAPABILITY.to_string());
    }
    security.privileged = Some(true);
}

/// Append the stage host-path volume and mount it in every container.
///
/// Not idempotent: each call appends another volume named
/// [`STAGE_VOLUME_NAME`], which the API server rejects as a duplicate. Apply
/// once per job build.
pub fn add_stage_mount(job: &mut Job, stage: &StageConfig, tool: &ProfilingTool) {
    let path = match stage.mount {
        StageMountMode::Directory => stage.dir.clone(),
        StageMountMode::File => tool.staged_binary(&stage.dir).host_path,
    };

    let Some(pod_spec) = job.spec.as_mut().and_then(|s| s.template.spec.as_mut()) else {
        return;
    };

    pod_spec.volumes.get_or_insert_with(Vec::new).push(Volume {
        name: STAGE_VOLUME_NAME.to_string(),
        host_path: Some(HostPathVolumeSource {
            path: path.clone(),
            type_: Some(stage.mount.host_path_type().to_string()),
        }),
        ..Default::default()
    });

    for container in pod_spec.containers.iter_mut() {
        container
            .volume_mounts
            .get_or_insert_with(Vec::new)
            .push(VolumeMount {
                name: STAGE_VOLUME_NAME.to_string(),
                mount_path: path.clone(),
                ..Default::default()
            });
    }
}

/// Quote a word for `sh -c` unless it is made only of safe characters
fn shell_word(word: &str) -> Cow<'_, str> {
    if !word.is_empty() && word.chars().all(is_path_char) {
        Cow::Borrowed(word)
    } else {
        Cow::Owned(format!("'{}'", word.replace('\'', r"'\''")))
    }
}

/// Shell script that copies the staged binary, records the original command
/// and writes the formatted report, in that order.
pub fn profile_script(tool: &ProfilingTool, stage_dir: &str, original: &[String]) -> String {
    let binary = tool.staged_binary(stage_dir);
    let data = tool.data_path(stage_dir);
    let command = original
        .iter()
        .map(|w| shell_word(w))
        .collect::<Vec<_>>()
        .join(" ");

    format!(
        "cp {host} {container} && {tool} record -o {data} {command} && {tool} report -i {data} --stdio > {report}",
        host = shell_word(&binary.host_path),
        container = shell_word(&binary.container_path),
        tool = tool.name(),
        data = shell_word(&data),
        command = command,
        report = shell_word(&tool.report_path(stage_dir)),
    )
}

/// Replace every container's entrypoint with the profiling script.
///
/// Fails without touching the job when the pod template has no containers.
/// Container `args` are cleared since they are already part of `original`.
pub fn override_command(
    job: &mut Job,
    tool: &ProfilingTool,
    stage_dir: &str,
    original: &[String],
) -> Result<()> {
    if containers(job).is_empty() {
        return Err(no_containers());
    }
    if original.is_empty() {
        return Err(Error::config("original command is empty"));
    }

    let script = profile_script(tool, stage_dir, original);
    if let Some(containers) = containers_mut(job) {
        for container in containers.iter_mut() {
            container.command = Some(vec!["sh".to_string(), "-c".to_string(), script.clone()]);
            container.args = None;
        }
    }
    Ok(())
}

fn no_containers() -> Error {
    Error::config("no container specified in job description")
}

/// Build the submitted job from a template.
///
/// Clears server-populated fields so exported jobs can be resubmitted, then
/// applies the three rewrites in order.
pub fn instrument_job(
    template: &Job,
    tool: &ProfilingTool,
    stage: &StageConfig,
    original: &[String],
) -> Result<Job> {
    if containers(template).is_empty() {
        return Err(no_containers());
    }

    let mut job = template.clone();
    job.status = None;
    job.metadata.resource_version = None;
    job.metadata.uid = None;
    job.metadata.creation_timestamp = None;
    job.metadata.managed_fields = None;

    elevate_security(&mut job);
    add_stage_mount(&mut job, stage, tool);
    override_command(&mut job, tool, &stage.dir, original)?;
    Ok(job)
}
