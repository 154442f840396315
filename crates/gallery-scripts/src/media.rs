//! Gallery media file classification.

use std::path::Path;

/// Extensions accepted into the gallery.
pub const ALLOWED_EXTENSIONS: &[&str] = &[
    "heic", "jpg", "jpeg", "png", "gif", "bmp", "mp4", "mov", "avi", "mkv", "m4v",
];

pub const IMAGE_EXTENSIONS: &[&str] = &["heic", "jpg", "jpeg", "png", "gif", "bmp"];

pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "m4v"];

/// Lowercased extension of `name`, if it has one.
pub fn extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Whether `name` has one of the gallery's allowed extensions.
pub fn allowed_file(name: &str) -> bool {
    extension(name).is_some_and(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
}

pub fn is_video(name: &str) -> bool {
    extension(name).is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
}

pub fn is_image(name: &str) -> bool {
    extension(name).is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}
