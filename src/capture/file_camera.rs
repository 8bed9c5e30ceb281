//! Camera backed by still images on disk
//!
//! Serves a single image, or cycles through every image in a directory in
//! name order, so the pipeline can run against a real inference service
//! without camera hardware.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

use super::{AuthorizationStatus, Camera, CameraDevice, CameraPosition};
use crate::capture::frame::CapturedFrame;
use crate::error::{CaptureError, PermissionError};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp"];

/// File-backed camera
pub struct FileCamera {
    device: CameraDevice,
    images: Vec<PathBuf>,
    cursor: AtomicUsize,
}

impl FileCamera {
    /// Open a file or a directory of images
    pub fn open(source: &Path) -> Result<Self> {
        let images = if source.is_dir() {
            let mut images: Vec<PathBuf> = std::fs::read_dir(source)
                .with_context(|| format!("Failed to read image directory {:?}", source))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| is_image(path))
                .collect();
            images.sort();
            images
        } else if source.is_file() {
            vec![source.to_path_buf()]
        } else {
            bail!("Camera source {:?} does not exist", source);
        };

        if images.is_empty() {
            bail!("No images found in {:?}", source);
        }

        info!("File camera serving {} image(s) from {:?}", images.len(), source);

        Ok(Self {
            device: CameraDevice {
                id: source.display().to_string(),
                position: CameraPosition::Back,
            },
            images,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Authorization is read access to the first source image
    async fn access_status(&self) -> Result<AuthorizationStatus, PermissionError> {
        let path = &self.images[0];
        match tokio::fs::File::open(path).await {
            Ok(_) => Ok(AuthorizationStatus::Granted),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                Ok(AuthorizationStatus::Denied)
            }
            Err(e) => Err(PermissionError::Query(format!("{}: {}", path.display(), e))),
        }
    }

    fn next_path(&self) -> &Path {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.images.len();
        &self.images[index]
    }
}

#[async_trait]
impl Camera for FileCamera {
    async fn list_devices(&self) -> Result<Vec<CameraDevice>, CaptureError> {
        Ok(vec![self.device.clone()])
    }

    async fn permission_status(&self) -> Result<AuthorizationStatus, PermissionError> {
        self.access_status().await
    }

    async fn request_permission(&self) -> Result<AuthorizationStatus, PermissionError> {
        // Nothing to prompt for; access is whatever the filesystem allows
        self.access_status().await
    }

    async fn capture(&self, device: &CameraDevice) -> Result<CapturedFrame, CaptureError> {
        if device != &self.device {
            return Err(CaptureError::DeviceUnavailable(device.id.clone()));
        }

        let path = self.next_path();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| CaptureError::Device(format!("{}: {}", path.display(), e)))?;
        let image = image::load_from_memory(&bytes)
            .map_err(|e| CaptureError::Device(format!("{}: {}", path.display(), e)))?;

        debug!("Captured {:?} ({}x{})", path, image.width(), image.height());
        Ok(CapturedFrame::from_rgba_image(image.to_rgba8()))
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
