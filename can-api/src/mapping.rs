//! Conversions between the gRPC types and the internal model.

use crate::error::{Error, Result};
use crate::model::{Container, ContainerSpec, ContainerStatus, Pod, PodSpec};
use crate::progress::ImageFetchProgress;
use crate::proto::pods as api;
use crate::validation::check_name;

/// Validate a create request payload and turn it into a [`PodSpec`].
pub fn pod_spec_from_api(pod: Option<api::Pod>) -> Result<PodSpec> {
    let pod = pod.ok_or_else(|| Error::InvalidPod("missing pod".to_string()))?;
    let metadata = pod
        .metadata
        .ok_or_else(|| Error::InvalidPod("missing metadata".to_string()))?;
    if metadata.namespace.is_empty() {
        return Err(Error::InvalidPod("namespace must not be empty".to_string()));
    }
    if metadata.name.is_empty() {
        return Err(Error::InvalidPod("name must not be empty".to_string()));
    }
    check_name("namespace", &metadata.namespace)?;
    check_name("pod name", &metadata.name)?;

    let containers = pod.spec.map(|spec| spec.containers).unwrap_or_default();
    let mut specs: Vec<ContainerSpec> = Vec::with_capacity(containers.len());
    for c in containers {
        if c.name.is_empty() || c.image.is_empty() {
            return Err(Error::InvalidPod(
                "every container needs a name and an image".to_string(),
            ));
        }
        check_name("container name", &c.name)?;
        if specs.iter().any(|s| s.name == c.name) {
            return Err(Error::InvalidPod(format!("duplicate container name {}", c.name)));
        }
        specs.push(ContainerSpec {
            name: c.name,
            image: c.image,
            tty: c.tty,
            args: c.args,
            env: c.env,
            working_dir: c.working_dir,
        });
    }

    Ok(PodSpec {
        namespace: metadata.namespace,
        name: metadata.name,
        labels: metadata.labels,
        containers: specs,
    })
}

fn state_to_api(status: ContainerStatus) -> api::ContainerState {
    match status {
        ContainerStatus::Unknown => api::ContainerState::Unknown,
        ContainerStatus::Created => api::ContainerState::Created,
        ContainerStatus::Running => api::ContainerState::Running,
        ContainerStatus::Stopped => api::ContainerState::Stopped,
    }
}

fn container_to_api(container: &Container) -> (api::Container, api::ContainerStatus) {
    let spec = api::Container {
        name: container.name.clone(),
        image: container.image.clone(),
        tty: container.tty,
        ..Default::default()
    };
    let status = api::ContainerStatus {
        container_id: container.id.clone(),
        name: container.name.clone(),
        image: container.image.clone(),
        state: state_to_api(container.status) as i32,
    };
    (spec, status)
}

pub fn pod_to_api(pod: &Pod) -> api::Pod {
    let (containers, container_statuses): (Vec<_>, Vec<_>) =
        pod.containers.iter().map(container_to_api).unzip();
    api::Pod {
        metadata: Some(api::Metadata {
            name: pod.name.clone(),
            namespace: pod.namespace.clone(),
            ..Default::default()
        }),
        spec: Some(api::PodSpec { containers }),
        status: Some(api::PodStatus { container_statuses }),
    }
}

pub fn progress_to_api(progress: &[ImageFetchProgress]) -> Vec<api::ImageFetch> {
    progress
        .iter()
        .map(|p| api::ImageFetch {
            container_name: p.container_name.clone(),
            image: p.image.clone(),
            resolved: p.done,
            layers_total: p.layers_total,
            layers_fetched: p.layers_fetched,
            bytes_fetched: p.bytes_fetched,
        })
        .collect()
}
