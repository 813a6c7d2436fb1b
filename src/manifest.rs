use crate::errors::ImageError;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt};

/// Media types for the manifest, index, config and layer formats we accept
pub mod media_types {
    pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
    pub const DOCKER_MANIFEST_LIST: &str =
        "application/vnd.docker.distribution.manifest.list.v2+json";
    pub const DOCKER_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
    pub const DOCKER_LAYER_TAR_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";
    pub const DOCKER_LAYER_TAR: &str = "application/vnd.docker.image.rootfs.diff.tar";
    pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
    pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
    pub const OCI_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
    pub const OCI_LAYER_TAR_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
    pub const OCI_LAYER_TAR: &str = "application/vnd.oci.image.layer.v1.tar";

    /// Value for the `Accept` header when asking for a manifest by tag
    pub const ACCEPT_MANIFESTS: &str = concat!(
        "application/vnd.oci.image.index.v1+json, ",
        "application/vnd.oci.image.manifest.v1+json, ",
        "application/vnd.docker.distribution.manifest.list.v2+json, ",
        "application/vnd.docker.distribution.manifest.v2+json"
    );
}

/// Reference to a blob by digest, with its size and optional metadata
///
/// Reference: <https://github.com/opencontainers/image-spec/blob/main/descriptor.md>
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default)]
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

/// OCI image manifest, also covering the Docker v2 schema2 manifest
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub media_type: String,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
}

/// OCI image index, also covering the Docker manifest list
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub media_type: String,
    pub manifests: Vec<Descriptor>,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    pub fn linux(architecture: &str) -> Self {
        Platform {
            architecture: normalize_arch(architecture).to_owned(),
            os: "linux".to_owned(),
            variant: None,
        }
    }

    /// Parse `os/arch` or `os/arch/variant`, or a bare architecture
    pub fn parse(s: &str) -> Result<Self, ImageError> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [arch] if !arch.is_empty() => Ok(Platform::linux(arch)),
            [os, arch] if !os.is_empty() && !arch.is_empty() => Ok(Platform {
                os: os.to_string(),
                ..Platform::linux(arch)
            }),
            [os, arch, variant] if !os.is_empty() && !arch.is_empty() => Ok(Platform {
                os: os.to_string(),
                variant: Some(variant.to_string()),
                ..Platform::linux(arch)
            }),
            _ => Err(ImageError::NoMatchingManifest(s.to_owned())),
        }
    }

    /// Operating system and normalized architecture must agree
    pub fn matches(&self, other: &Platform) -> bool {
        self.os == other.os
            && normalize_arch(&self.architecture) == normalize_arch(&other.architecture)
    }
}

impl Default for Platform {
    fn default() -> Self {
        Platform::linux("amd64")
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{}", variant)?;
        }
        Ok(())
    }
}

/// Map kernel architecture names onto the names used by image indexes
pub fn normalize_arch(arch: &str) -> &str {
    match arch {
        "x86_64" | "x86-64" => "amd64",
        "aarch64" => "arm64",
        "i386" | "i686" => "386",
        other => other,
    }
}

impl Index {
    /// Pick the first manifest for this platform; entries without a
    /// platform match anything
    pub fn select(&self, platform: &Platform) -> Result<&Descriptor, ImageError> {
        self.manifests
            .iter()
            .find(|desc| match &desc.platform {
                None => true,
                Some(candidate) => candidate.matches(platform),
            })
            .ok_or_else(|| ImageError::NoMatchingManifest(platform.to_string()))
    }
}

/// Either kind of document found at the top of an image
#[derive(Clone, Debug)]
pub enum ManifestKind {
    Image(Manifest),
    Index(Index),
}

impl ManifestKind {
    pub fn parse(bytes: &[u8]) -> Result<Self, ImageError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        let media_type = value
            .get("mediaType")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_owned();
        log::trace!("raw json manifest, {}", String::from_utf8_lossy(bytes));
        match media_type.as_str() {
            media_types::OCI_INDEX | media_types::DOCKER_MANIFEST_LIST => {
                Ok(ManifestKind::Index(serde_json::from_value(value)?))
            }
            media_types::OCI_MANIFEST | media_types::DOCKER_MANIFEST => {
                Ok(ManifestKind::Image(serde_json::from_value(value)?))
            }
            "" if value.get("manifests").is_some() => {
                Ok(ManifestKind::Index(serde_json::from_value(value)?))
            }
            "" if value.get("layers").is_some() => {
                Ok(ManifestKind::Image(serde_json::from_value(value)?))
            }
            _ => Err(ImageError::UnsupportedManifestType(media_type)),
        }
    }
}

/// Image configuration blob; only the fields we use are parsed
///
/// Reference: <https://github.com/opencontainers/image-spec/blob/main/config.md>
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ImageConfigFile {
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub config: Option<ImageConfig>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ImageConfig {
    #[serde(rename = "User", default)]
    pub user: Option<String>,
    #[serde(rename = "Env", default)]
    pub env: Option<Vec<String>>,
    #[serde(rename = "Entrypoint", default)]
    pub entrypoint: Option<Vec<String>>,
    #[serde(rename = "Cmd", default)]
    pub cmd: Option<Vec<String>>,
    #[serde(rename = "WorkingDir", default)]
    pub working_dir: Option<String>,
}

/// One entry of the `manifest.json` written by `docker save`
#[derive(Clone, Debug, Deserialize)]
pub struct DockerSaveEntry {
    #[serde(rename = "Config")]
    pub config: String,
    #[serde(rename = "Layers")]
    pub layers: Vec<String>,
}
