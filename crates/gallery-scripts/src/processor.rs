//! Per-item preview processing.
//!
//! [`PreviewProcessor`] is the boundary between the resumable iteration in
//! [`RebuildPreviews`](crate::RebuildPreviews) and whatever actually produces
//! the derived files. Two implementations ship here:
//!
//! - [`ImageProcessor`] decodes the source with the `image` crate and writes
//!   `largest/`, `medium/` and `thumbnail/` JPEGs next to `source/`.
//! - [`CommandProcessor`] delegates to an external program, invoked as
//!   `<program> [args...] <path> <category>`.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, ImageOutputFormat, Rgb, RgbImage};
use tracing::debug;

use crate::error::{ScriptError, ScriptResult};
use crate::media;

/// Rebuilds the derived files for one source item.
pub trait PreviewProcessor: Send + Sync {
    /// Process the source file at `path`, which belongs to `category`.
    ///
    /// An error is a per-item failure; the caller logs it and moves on.
    fn process(&self, path: &Path, category: &str) -> ScriptResult<()>;
}

/// Bounding box for each derived size.
const LARGEST: (u32, u32) = (2880, 1620);
const MEDIUM: (u32, u32) = (1920, 1080);
const THUMBNAIL: (u32, u32) = (400, 400);

/// Builds previews in-process with the `image` crate.
///
/// Videos are left alone. HEIC sources cannot be decoded here and fail the
/// item; point `GALLERY_PREVIEW_COMMAND` at an external converter for those.
#[derive(Debug, Clone)]
pub struct ImageProcessor {
    upload_root: PathBuf,
    image_quality: u8,
    thumbnail_quality: u8,
}

impl ImageProcessor {
    pub fn new(upload_root: impl Into<PathBuf>) -> Self {
        Self {
            upload_root: upload_root.into(),
            image_quality: 100,
            thumbnail_quality: 85,
        }
    }

    pub fn with_quality(mut self, image_quality: u8, thumbnail_quality: u8) -> Self {
        self.image_quality = image_quality;
        self.thumbnail_quality = thumbnail_quality;
        self
    }
}

impl PreviewProcessor for ImageProcessor {
    fn process(&self, path: &Path, category: &str) -> ScriptResult<()> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ScriptError::FileNotFound(path.to_path_buf()))?;
        if !path.is_file() {
            return Err(ScriptError::FileNotFound(path.to_path_buf()));
        }

        if media::is_video(name) {
            debug!(path = %path.display(), "Video source, no previews to build");
            return Ok(());
        }

        let ext = media::extension(name).unwrap_or_default();
        if ext == "heic" {
            return Err(ScriptError::unsupported(
                "HEIC sources need an external preview command",
            ));
        }
        if !media::is_image(name) {
            return Err(ScriptError::unsupported(name.to_string()));
        }

        let stem = Path::new(name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.to_string());

        let decoded = image::open(path)?;
        let had_alpha = decoded.color().has_alpha();
        let image = flatten_on_white(&decoded);
        let category_dir = self.upload_root.join(category);

        // Largest keeps the source format unless transparency had to go.
        let largest = fit_within(&image, LARGEST);
        let largest_dir = category_dir.join("largest");
        if had_alpha || ext == "jpg" || ext == "jpeg" {
            let out_ext = if had_alpha { "jpeg" } else { ext.as_str() };
            write_jpeg(&largest, &largest_dir.join(format!("{}.{}", stem, out_ext)), 100)?;
        } else {
            let format = ImageFormat::from_extension(&ext)
                .ok_or_else(|| ScriptError::unsupported(ext.clone()))?;
            write_format(&largest, &largest_dir.join(format!("{}.{}", stem, ext)), format)?;
        }

        write_jpeg(
            &fit_within(&image, MEDIUM),
            &category_dir.join("medium").join(format!("{}.jpeg", stem)),
            self.image_quality,
        )?;
        write_jpeg(
            &fit_within(&image, THUMBNAIL),
            &category_dir.join("thumbnail").join(format!("{}.jpeg", stem)),
            self.thumbnail_quality,
        )?;

        Ok(())
    }
}

/// Shrink to fit the bounding box, preserving aspect ratio. Never enlarges.
fn fit_within(image: &DynamicImage, (width, height): (u32, u32)) -> DynamicImage {
    if image.width() <= width && image.height() <= height {
        image.clone()
    } else {
        image.thumbnail(width, height)
    }
}

/// Composite any alpha channel onto a white background.
fn flatten_on_white(image: &DynamicImage) -> DynamicImage {
    if !image.color().has_alpha() {
        return DynamicImage::ImageRgb8(image.to_rgb8());
    }

    let rgba = image.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = a as u16;
        let blend = |c: u8| ((c as u16 * alpha + 255 * (255 - alpha)) / 255) as u8;
        out.put_pixel(x, y, Rgb([blend(r), blend(g), blend(b)]));
    }
    DynamicImage::ImageRgb8(out)
}

/// Temp file in the destination directory, so the final rename is atomic.
fn temp_beside(dest: &Path) -> ScriptResult<tempfile::NamedTempFile> {
    let dir = dest
        .parent()
        .ok_or_else(|| ScriptError::FileNotFound(dest.to_path_buf()))?;
    fs::create_dir_all(dir)?;
    Ok(tempfile::Builder::new()
        .prefix(".preview.")
        .suffix(".tmp")
        .tempfile_in(dir)?)
}

fn write_jpeg(image: &DynamicImage, dest: &Path, quality: u8) -> ScriptResult<()> {
    let mut tmp = temp_beside(dest)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        let mut encoder = JpegEncoder::new_with_quality(&mut writer, quality);
        encoder.encode_image(&image.to_rgb8())?;
        writer.flush()?;
    }
    tmp.persist(dest)?;
    Ok(())
}

fn write_format(image: &DynamicImage, dest: &Path, format: ImageFormat) -> ScriptResult<()> {
    let mut tmp = temp_beside(dest)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        image.write_to(&mut writer, ImageOutputFormat::from(format))?;
        writer.flush()?;
    }
    tmp.persist(dest)?;
    Ok(())
}

/// Runs an external program once per item.
#[derive(Debug, Clone)]
pub struct CommandProcessor {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandProcessor {
    /// Resolve `program` on `PATH` (or as given, if it is a path).
    pub fn new(program: impl AsRef<str>) -> ScriptResult<Self> {
        let program = program.as_ref();
        let resolved = which::which(program)
            .map_err(|_| ScriptError::CommandNotFound(program.to_string()))?;
        Ok(Self {
            program: resolved,
            args: Vec::new(),
        })
    }

    /// Parse a whitespace-separated command line such as `"convert-previews --fast"`.
    pub fn from_command_line(line: &str) -> ScriptResult<Self> {
        let mut parts = line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| ScriptError::CommandNotFound(line.to_string()))?;
        Ok(parts.fold(Self::new(program)?, |processor, arg| processor.arg(arg)))
    }

    /// Add a fixed argument placed before `<path> <category>`.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl PreviewProcessor for CommandProcessor {
    fn process(&self, path: &Path, category: &str) -> ScriptResult<()> {
        debug!(
            "Running preview command: {} {} {} {}",
            self.program.display(),
            self.args.join(" "),
            path.display(),
            category
        );

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .arg(category)
            .stdin(Stdio::null())
            .output()?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let last_line = stderr.lines().last().unwrap_or_default().to_string();
        Err(ScriptError::CommandFailed {
            message: if last_line.is_empty() {
                format!("exited with {}", output.status)
            } else {
                format!("exited with {}: {}", output.status, last_line)
            },
            stderr: (!stderr.is_empty()).then_some(stderr),
            exit_code: output.status.code(),
        })
    }
}
