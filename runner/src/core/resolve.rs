//! Expansion of an experiment spec into host and container configurations.

use crate::core::naming::{image_file_name, image_url};
use crate::core::types::{ContainerConfig, ExperimentSpec, HostConfig, ResolvedContainer};

/// Resolve the host and container configurations for `spec`.
///
/// Deterministic: identical inputs always produce identical names and paths.
pub fn resolve_configs(spec: &ExperimentSpec, registry: &str) -> (HostConfig, ContainerConfig) {
    let host = HostConfig {
        implem: spec.host.clone(),
        env: spec.host_env.clone(),
    };

    let env = spec.container_env.clone();
    let name = image_file_name(
        &spec.container.distro,
        &spec.container_implem,
        &spec.app.name,
        spec.container.model,
    );
    let container = ResolvedContainer {
        path: env.install_dir.join(&name),
        name,
        url: image_url(&spec.container_implem, registry),
        build_dir: env.build_dir.clone(),
        install_dir: env.install_dir.clone(),
        distro: spec.container.distro.clone(),
        model: spec.container.model,
    };

    (
        host,
        ContainerConfig {
            implem: spec.container_implem.clone(),
            env,
            container,
        },
    )
}
