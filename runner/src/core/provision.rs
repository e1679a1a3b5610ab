//! Decision table for making a container image available.

/// What the provisioner should do for a given image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionAction {
    /// Image already present; nothing to do.
    Skip,
    /// Generate a definition file, then build the image.
    Build,
    /// Fetch a pre-built image from the registry.
    Pull,
}

/// Pick the provisioning action.
///
/// | build allowed | image exists | action |
/// |---|---|---|
/// | yes | yes | `Skip` |
/// | yes | no | `Build` |
/// | no | any | `Pull` |
pub fn decide(build_allowed: bool, image_exists: bool) -> ProvisionAction {
    match (build_allowed, image_exists) {
        (true, true) => ProvisionAction::Skip,
        (true, false) => ProvisionAction::Build,
        (false, _) => ProvisionAction::Pull,
    }
}
