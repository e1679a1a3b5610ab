//! Naming conventions for images and results files.

use std::path::PathBuf;

use crate::core::types::{ImplemInfo, PackagingModel, ResolvedContainer, Workload};

/// File extension of container images.
pub const IMAGE_SUFFIX: &str = ".sif";

/// Default image name (without suffix) for a container configuration.
///
/// `:` in the distro (e.g. `ubuntu:disco`) is replaced so the name stays a
/// valid file name. The implementation id is lowercased, matching
/// [`image_url`].
pub fn container_default_name(
    distro: &str,
    implem_id: &str,
    implem_version: &str,
    app_name: &str,
    model: PackagingModel,
) -> String {
    format!(
        "{}-{}-{}-{}-{}",
        distro.replace(':', "_"),
        implem_id.to_lowercase(),
        implem_version,
        app_name,
        model.as_str()
    )
}

/// Image file name: default name plus [`IMAGE_SUFFIX`].
pub fn image_file_name(
    distro: &str,
    implem: &ImplemInfo,
    app_name: &str,
    model: PackagingModel,
) -> String {
    let mut name = container_default_name(distro, &implem.id, &implem.version, app_name, model);
    name.push_str(IMAGE_SUFFIX);
    name
}

/// Definition file for an image: `build_dir/<image stem>.def`.
pub fn definition_path(container: &ResolvedContainer) -> PathBuf {
    let stem = container
        .name
        .strip_suffix(IMAGE_SUFFIX)
        .unwrap_or(&container.name);
    container.build_dir.join(format!("{stem}.def"))
}

/// Location of a pre-built image for `implem` in `registry`.
pub fn image_url(implem: &ImplemInfo, registry: &str) -> String {
    format!(
        "{}/{}:{}",
        registry.trim_end_matches('/'),
        implem.id.to_lowercase(),
        implem.version
    )
}

/// Results file name for an implementation and workload family.
pub fn output_filename(implem_id: &str, workload: Workload) -> String {
    format!("{implem_id}-{}-results.txt", workload.as_str())
}
