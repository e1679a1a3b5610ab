//! Configuration derivation and build-directory preparation.

use std::fs;
use std::path::Path;

use tracing::{debug, info, instrument};

use crate::core::error::RunError;
use crate::core::resolve::resolve_configs;
use crate::core::types::{ContainerConfig, ExperimentSpec, HostConfig};
use crate::io::config::Settings;

/// Derive the host and container configurations for `spec` and make sure
/// their build and scratch directories exist.
///
/// No partial configuration is returned: a directory failure aborts the
/// derivation with [`RunError::Configuration`].
#[instrument(skip_all, fields(host = %spec.host, container = %spec.container_implem))]
pub fn derive_configs(
    spec: &ExperimentSpec,
    settings: &Settings,
) -> Result<(HostConfig, ContainerConfig), RunError> {
    let (host, container) = resolve_configs(spec, &settings.container.registry);
    prepare_environment(&host, &container)?;

    info!(
        build_dir = %host.env.build_dir.display(),
        install_dir = %host.env.install_dir.display(),
        implem = %host.implem,
        url = %host.implem.url,
        "host configuration"
    );
    info!(
        build_dir = %container.env.build_dir.display(),
        distro = %container.container.distro,
        install_dir = %container.env.install_dir.display(),
        image = %container.container.path.display(),
        implem = %container.implem,
        url = %container.implem.url,
        "container configuration"
    );

    Ok((host, container))
}

/// Create the host and container build/scratch directories if absent.
pub fn prepare_environment(host: &HostConfig, container: &ContainerConfig) -> Result<(), RunError> {
    for dir in [
        &host.env.build_dir,
        &host.env.scratch_dir,
        &container.env.build_dir,
        &container.env.scratch_dir,
    ] {
        ensure_dir(dir)?;
    }
    Ok(())
}

/// Create `dir` with its parents; an existing directory is not an error.
pub fn ensure_dir(dir: &Path) -> Result<(), RunError> {
    if dir.is_dir() {
        debug!(dir = %dir.display(), "directory already exists");
        return Ok(());
    }
    fs::create_dir_all(dir).map_err(|err| {
        RunError::Configuration(format!("failed to create {}: {err}", dir.display()))
    })
}
