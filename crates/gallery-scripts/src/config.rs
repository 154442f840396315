//! Script configuration.

use std::path::PathBuf;

/// Configuration for the gallery maintenance scripts.
#[derive(Debug, Clone)]
pub struct ScriptsConfig {
    /// Root of the gallery upload tree (`<root>/<category>/source/...`)
    pub upload_folder: PathBuf,
    /// External command that rebuilds one item's previews, if set
    pub preview_command: Option<String>,
    /// JPEG quality for medium previews
    pub image_quality: u8,
    /// JPEG quality for thumbnails
    pub thumbnail_quality: u8,
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            upload_folder: PathBuf::from("./uploads"),
            preview_command: None,
            image_quality: 100,
            thumbnail_quality: 85,
        }
    }
}

impl ScriptsConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            upload_folder: std::env::var("GALLERY_UPLOAD_FOLDER")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_folder),
            preview_command: std::env::var("GALLERY_PREVIEW_COMMAND")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            image_quality: quality_from_env("GALLERY_IMAGE_QUALITY", defaults.image_quality),
            thumbnail_quality: quality_from_env(
                "GALLERY_THUMBNAIL_QUALITY",
                defaults.thumbnail_quality,
            ),
        }
    }
}

fn quality_from_env(name: &str, default: u8) -> u8 {
    parse_quality(std::env::var(name).ok().as_deref(), default)
}

/// JPEG quality clamped to 1..=100; unparsable values use `default`.
fn parse_quality(value: Option<&str>, default: u8) -> u8 {
    value
        .and_then(|s| s.trim().parse::<u32>().ok())
        .map(|q| q.clamp(1, 100) as u8)
        .unwrap_or(default)
}
