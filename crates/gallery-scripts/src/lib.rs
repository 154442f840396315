//! Gallery maintenance scripts.
//!
//! This crate provides the runnable scripts registered with the job manager:
//! - `rebuild_previews`: regenerate derived images for one or all categories
//! - Preview processors: in-process (`image`) or an external command
//! - The `gallery-scripts` operator binary

use std::sync::Arc;

use gallery_jobs::ScriptRegistry;
use tracing::info;

pub mod config;
pub mod error;
pub mod media;
pub mod processor;
pub mod rebuild_previews;

pub use config::ScriptsConfig;
pub use error::{ScriptError, ScriptResult};
pub use processor::{CommandProcessor, ImageProcessor, PreviewProcessor};
pub use rebuild_previews::RebuildPreviews;

/// The processor selected by `config`: the external command if one is set,
/// otherwise the in-process image pipeline.
pub fn preview_processor(config: &ScriptsConfig) -> ScriptResult<Arc<dyn PreviewProcessor>> {
    match &config.preview_command {
        Some(command) => {
            let processor = CommandProcessor::from_command_line(command)?;
            info!(program = %processor.program().display(), "Using external preview command");
            Ok(Arc::new(processor))
        }
        None => Ok(Arc::new(
            ImageProcessor::new(&config.upload_folder)
                .with_quality(config.image_quality, config.thumbnail_quality),
        )),
    }
}

/// Every script this gallery can run.
pub fn script_registry(config: &ScriptsConfig) -> ScriptResult<ScriptRegistry> {
    let processor = preview_processor(config)?;
    Ok(ScriptRegistry::new()
        .register(RebuildPreviews::new(&config.upload_folder, processor).definition()))
}
