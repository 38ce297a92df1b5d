//! Image store - pulls OCI images and keeps extracted rootfs trees on disk.

use crate::error::RuntimeError;
use crate::progress::ImageFetchHandle;
use flate2::read::GzDecoder;
use log::{info, warn};
use oci_distribution::{Client, Reference, client::ClientConfig, manifest, secrets::RegistryAuth};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tar::Archive;
use tokio::fs;
use uuid::Uuid;

const ACCEPTED_LAYER_TYPES: [&str; 2] = [
    manifest::IMAGE_LAYER_GZIP_MEDIA_TYPE,
    manifest::IMAGE_DOCKER_LAYER_GZIP_MEDIA_TYPE,
];

/// Metadata stored alongside image files.
#[derive(Debug, Serialize, Deserialize)]
struct ImageMetadata {
    image_ref: String,
    layers: u32,
    bytes: u64,
}

/// Process defaults from the image configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageConfig {
    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub working_dir: String,
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    config: Option<ConfigSection>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ConfigSection {
    entrypoint: Option<Vec<String>>,
    cmd: Option<Vec<String>>,
    env: Option<Vec<String>>,
    working_dir: Option<String>,
}

impl ImageConfig {
    /// Parse an OCI image configuration blob.
    pub fn parse(data: &[u8]) -> Result<Self, RuntimeError> {
        let file: ConfigFile = serde_json::from_slice(data)
            .map_err(|e| RuntimeError::Registry(format!("Invalid image config: {e}")))?;
        let Some(section) = file.config else {
            return Ok(Self::default());
        };
        Ok(Self {
            entrypoint: section.entrypoint.unwrap_or_default(),
            cmd: section.cmd.unwrap_or_default(),
            env: section.env.unwrap_or_default(),
            working_dir: section.working_dir.unwrap_or_default(),
        })
    }
}

/// Directory name an image is cached under.
pub fn cache_key(image_ref: &str) -> String {
    image_ref
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// On-disk image cache.
pub struct ImageStore {
    base_dir: PathBuf,
}

impl ImageStore {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    fn image_dir(&self, image_ref: &str) -> PathBuf {
        self.base_dir.join(cache_key(image_ref))
    }

    /// Path of the extracted rootfs of a pulled image.
    pub fn rootfs(&self, image_ref: &str) -> Result<PathBuf, RuntimeError> {
        let rootfs = self.image_dir(image_ref).join("rootfs");
        if rootfs.is_dir() {
            Ok(rootfs)
        } else {
            Err(RuntimeError::ImageNotPulled(image_ref.to_string()))
        }
    }

    /// Process defaults of a pulled image.
    pub async fn config(&self, image_ref: &str) -> Result<ImageConfig, RuntimeError> {
        let path = self.image_dir(image_ref).join("config.json");
        let data = fs::read(&path).await.map_err(|e| {
            warn!("ImageStore: Cannot read {}: {}", path.display(), e);
            RuntimeError::ImageNotPulled(image_ref.to_string())
        })?;
        ImageConfig::parse(&data)
    }

    async fn cached(&self, image_ref: &str) -> Option<ImageMetadata> {
        let dir = self.image_dir(image_ref);
        if !dir.join("rootfs").is_dir() {
            return None;
        }
        let content = fs::read_to_string(dir.join("metadata.json")).await.ok()?;
        match serde_json::from_str::<ImageMetadata>(&content) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                warn!("ImageStore: Could not parse metadata for {}: {}", image_ref, e);
                None
            }
        }
    }

    /// Make an image available locally, reporting into `progress`.
    pub async fn pull(
        &self,
        image_ref: &str,
        progress: &ImageFetchHandle,
    ) -> Result<PathBuf, RuntimeError> {
        if let Some(metadata) = self.cached(image_ref).await {
            info!("ImageStore: Image {} already cached", image_ref);
            progress.restored(metadata.layers, metadata.bytes);
            return self.rootfs(image_ref);
        }

        info!("ImageStore: Fetching image: {}", image_ref);
        let reference = Reference::try_from(image_ref.to_string())
            .map_err(|e| RuntimeError::InvalidReference(e.to_string()))?;

        let client = Client::new(ClientConfig::default());
        let auth = &RegistryAuth::Anonymous;

        let (manifest, _, config) = client
            .pull_manifest_and_config(&reference, auth)
            .await
            .map_err(|e| RuntimeError::Registry(e.to_string()))?;

        let layers: Vec<_> = manifest
            .layers
            .into_iter()
            .filter(|layer| {
                let accepted = ACCEPTED_LAYER_TYPES.contains(&layer.media_type.as_str());
                if !accepted {
                    warn!(
                        "ImageStore: Skipping layer with unsupported media type: {}",
                        layer.media_type
                    );
                }
                accepted
            })
            .collect();

        if layers.is_empty() {
            return Err(RuntimeError::LayerExtraction(
                "No compatible layers found".to_string(),
            ));
        }
        progress.set_layers(layers.len() as u32);

        let mut blobs = Vec::with_capacity(layers.len());
        for layer in &layers {
            info!("ImageStore: Pulling layer {} ({})", layer.digest, layer.media_type);
            let mut data = Vec::new();
            client
                .pull_blob(&reference, layer, &mut data)
                .await
                .map_err(|e| RuntimeError::Registry(e.to_string()))?;
            progress.layer_fetched(data.len() as u64);
            blobs.push(data);
        }

        let metadata = ImageMetadata {
            image_ref: image_ref.to_string(),
            layers: blobs.len() as u32,
            bytes: blobs.iter().map(|b| b.len() as u64).sum(),
        };
        self.store(image_ref, blobs, config.as_bytes(), &metadata).await?;
        self.rootfs(image_ref)
    }

    /// Extract layers into a scratch directory and move it into place.
    async fn store(
        &self,
        image_ref: &str,
        blobs: Vec<Vec<u8>>,
        config: &[u8],
        metadata: &ImageMetadata,
    ) -> Result<(), RuntimeError> {
        fs::create_dir_all(&self.base_dir).await?;
        let scratch = self.base_dir.join(format!(".pull-{}", Uuid::new_v4()));
        let rootfs = scratch.join("rootfs");
        fs::create_dir_all(&rootfs).await?;

        let result = async {
            for data in blobs {
                extract_layer(&rootfs, data).await?;
            }
            fs::write(scratch.join("config.json"), config).await?;
            let metadata_json =
                serde_json::to_string_pretty(metadata).map_err(std::io::Error::other)?;
            fs::write(scratch.join("metadata.json"), metadata_json).await?;
            Ok::<(), RuntimeError>(())
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_dir_all(&scratch).await;
            return Err(e);
        }

        let final_dir = self.image_dir(image_ref);
        if let Err(e) = fs::rename(&scratch, &final_dir).await {
            // Another pull of the same image finished first.
            let _ = fs::remove_dir_all(&scratch).await;
            if !final_dir.join("rootfs").is_dir() {
                return Err(e.into());
            }
        }

        info!(
            "ImageStore: Image {} stored at {}",
            image_ref,
            final_dir.display()
        );
        Ok(())
    }
}

async fn extract_layer(rootfs: &Path, data: Vec<u8>) -> Result<(), RuntimeError> {
    let rootfs = rootfs.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let decoder = GzDecoder::new(Cursor::new(data));
        let mut archive = Archive::new(decoder);
        archive.unpack(&rootfs)
    })
    .await
    .map_err(|e| RuntimeError::LayerExtraction(e.to_string()))?
    .map_err(|e| RuntimeError::LayerExtraction(e.to_string()))
}
