//! Media types for manifests, configs and layers.

pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const OCI_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
pub const OCI_LAYER: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
pub const OCI_EMPTY: &str = "application/vnd.oci.empty.v1+json";

pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
pub const DOCKER_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
pub const DOCKER_LAYER: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

pub fn is_index(media_type: &str) -> bool {
  media_type == OCI_INDEX || media_type == DOCKER_MANIFEST_LIST
}

pub fn is_manifest(media_type: &str) -> bool {
  media_type == OCI_MANIFEST || media_type == DOCKER_MANIFEST
}

pub fn is_docker(media_type: &str) -> bool {
  media_type.starts_with("application/vnd.docker.")
}

/// Config media type matching a manifest's family.
pub fn config_for(manifest_media_type: &str) -> &'static str {
  if is_docker(manifest_media_type) {
    DOCKER_CONFIG
  } else {
    OCI_CONFIG
  }
}

/// Gzip layer media type matching a manifest's family.
pub fn layer_for(manifest_media_type: &str) -> &'static str {
  if is_docker(manifest_media_type) {
    DOCKER_LAYER
  } else {
    OCI_LAYER
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn families_follow_the_manifest() {
    assert_eq!(layer_for(DOCKER_MANIFEST), DOCKER_LAYER);
    assert_eq!(layer_for(OCI_MANIFEST), OCI_LAYER);
    assert_eq!(config_for(DOCKER_MANIFEST), DOCKER_CONFIG);
    assert_eq!(config_for(OCI_MANIFEST), OCI_CONFIG);
  }

  #[test]
  fn classifies_indices() {
    assert!(is_index(OCI_INDEX));
    assert!(is_index(DOCKER_MANIFEST_LIST));
    assert!(!is_index(OCI_MANIFEST));
    assert!(is_manifest(DOCKER_MANIFEST));
  }
}
