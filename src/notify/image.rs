//! Panel image rendering and upload hooks.

use std::path::PathBuf;

use futures::future::BoxFuture;

use crate::model::AlertRule;

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("rendering timed out")]
    Timeout,

    #[error("render failed: {0}")]
    Render(String),

    #[error("upload failed: {0}")]
    Upload(String),
}

/// Renders the panel backing a rule to a local image file.
pub trait Renderer: Send + Sync {
    fn render<'a>(&'a self, rule: &'a AlertRule) -> BoxFuture<'a, Result<PathBuf, ImageError>>;
}

/// Publishes a rendered image and returns its public URL.
pub trait ImageUploader: Send + Sync {
    fn upload<'a>(&'a self, path: &'a std::path::Path)
        -> BoxFuture<'a, Result<String, ImageError>>;
}

/// Deployment without a rendering service.
pub struct NoopRenderer;

impl Renderer for NoopRenderer {
    fn render<'a>(&'a self, _rule: &'a AlertRule) -> BoxFuture<'a, Result<PathBuf, ImageError>> {
        Box::pin(async { Err(ImageError::Render("no renderer configured".to_string())) })
    }
}

/// Deployment without external image storage.
pub struct NoopUploader;

impl ImageUploader for NoopUploader {
    fn upload<'a>(
        &'a self,
        _path: &'a std::path::Path,
    ) -> BoxFuture<'a, Result<String, ImageError>> {
        Box::pin(async { Err(ImageError::Upload("no uploader configured".to_string())) })
    }
}
