//! Resumable preview rebuild over the upload tree.
//!
//! Walks `<upload_root>/<category>/source/` for one category or all of them
//! and hands every allowed file to a [`PreviewProcessor`]. Each finished item
//! is recorded as `<category>/<file>` under the job's progress key, so a
//! stopped or interrupted rebuild picks up where it left off.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::debug;

use gallery_jobs::{JobContext, ScriptDefinition, ScriptRunner};
use gallery_models::{JobParams, ParamSpec};

use crate::media;
use crate::processor::PreviewProcessor;

pub const SCRIPT_NAME: &str = "rebuild_previews";

/// `rebuild_previews:<category>`, or `rebuild_previews:all` without one.
pub fn progress_key(params: &JobParams) -> String {
    format!(
        "{}:{}",
        SCRIPT_NAME,
        category_param(params).unwrap_or("all")
    )
}

fn category_param(params: &JobParams) -> Option<&str> {
    params
        .get("category")
        .map(String::as_str)
        .filter(|c| !c.is_empty())
}

pub struct RebuildPreviews {
    upload_root: PathBuf,
    processor: Arc<dyn PreviewProcessor>,
}

impl RebuildPreviews {
    pub fn new(upload_root: impl Into<PathBuf>, processor: Arc<dyn PreviewProcessor>) -> Self {
        Self {
            upload_root: upload_root.into(),
            processor,
        }
    }

    /// Registry entry for this runner.
    pub fn definition(self) -> ScriptDefinition {
        ScriptDefinition::new(SCRIPT_NAME, self)
            .label("Rebuild previews")
            .description(
                "Regenerate largest, medium and thumbnail images for one category or all of them.",
            )
            .param(ParamSpec::optional(
                "category",
                "Single category to rebuild; every category when omitted",
            ))
            .progress_key(progress_key)
    }

    fn categories(&self, requested: Option<&str>) -> anyhow::Result<Vec<String>> {
        if let Some(category) = requested {
            let mut components = Path::new(category).components();
            if !matches!(
                (components.next(), components.next()),
                (Some(Component::Normal(_)), None)
            ) {
                bail!("invalid category name '{}'", category);
            }
            return Ok(vec![category.to_string()]);
        }

        let entries = fs::read_dir(&self.upload_root).with_context(|| {
            format!(
                "failed to list upload folder {}",
                self.upload_root.display()
            )
        })?;

        let mut categories = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                categories.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        categories.sort();
        Ok(categories)
    }

    fn rebuild_category(&self, ctx: &JobContext, category: &str) -> anyhow::Result<bool> {
        let source_dir = self.upload_root.join(category).join("source");
        if !source_dir.is_dir() {
            ctx.log(format!(
                "No source directory for category '{}', skipping.",
                category
            ));
            return Ok(true);
        }

        let files = sorted_names(&source_dir)
            .with_context(|| format!("failed to list {}", source_dir.display()))?;
        let total = files.len();
        if total == 0 {
            ctx.log(format!(
                "No files in '{}', nothing to do.",
                source_dir.display()
            ));
            return Ok(true);
        }

        ctx.log(format!(
            "Rebuilding previews for category '{}' ({} files)...",
            category, total
        ));

        for (idx, name) in files.iter().enumerate() {
            let idx = idx + 1;
            if ctx.should_stop() {
                ctx.log("Stop requested. Exiting early.");
                return Ok(false);
            }

            if !media::allowed_file(name) {
                continue;
            }

            let item = format!("{}/{}", category, name);
            if ctx.is_processed(&item) {
                ctx.log(format!(
                    "[{}/{}] Skipping {} (already processed)",
                    idx, total, item
                ));
                continue;
            }

            if let Err(e) = self.processor.process(&source_dir.join(name), category) {
                ctx.item_failed_at(idx, total, &item, e);
                continue;
            }
            if let Err(e) = ctx.mark_processed(&item) {
                ctx.item_failed_at(idx, total, &item, format!("could not record progress: {}", e));
                continue;
            }
            ctx.log(format!("[{}/{}] Processed {}", idx, total, item));
        }

        Ok(true)
    }
}

impl ScriptRunner for RebuildPreviews {
    fn run(&self, ctx: &JobContext) -> anyhow::Result<()> {
        let requested = ctx.param("category").filter(|c| !c.is_empty());
        let categories = self.categories(requested)?;
        debug!(
            job_id = %ctx.job_id(),
            script = ctx.script(),
            categories = categories.len(),
            "Rebuilding previews"
        );

        for category in &categories {
            if !self.rebuild_category(ctx, category)? {
                return Ok(());
            }
        }

        ctx.log("Rebuild task finished.");
        Ok(())
    }
}

/// Entry names in `dir`, sorted.
fn sorted_names(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<std::io::Result<Vec<_>>>()?;
    names.sort();
    Ok(names)
}
