//! Registry of runnable scripts.
//!
//! The embedding application builds one [`ScriptRegistry`] at startup and
//! hands it to the [`JobManager`](crate::JobManager). The manager never looks
//! scripts up anywhere else.
//!
//! # Example
//!
//! ```ignore
//! let registry = ScriptRegistry::new().register(
//!     ScriptDefinition::new("rebuild_previews", RebuildPreviews::new(root, processor))
//!         .label("Rebuild previews")
//!         .param(ParamSpec::optional("category", "Single category to rebuild"))
//!         .progress_key(|params| {
//!             format!("rebuild_previews:{}", params.get("category").map_or("all", String::as_str))
//!         }),
//! );
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use gallery_models::{default_progress_key, JobParams, ParamSpec, ScriptInfo};

use crate::context::JobContext;
use crate::error::{JobError, JobResult};

/// One script's resumable iteration logic.
///
/// Runners are called on the job's worker thread and may block for as long
/// as the work takes. They should poll [`JobContext::should_stop`] between
/// items; the manager never interrupts them.
pub trait ScriptRunner: Send + Sync {
    fn run(&self, ctx: &JobContext) -> anyhow::Result<()>;
}

impl<F> ScriptRunner for F
where
    F: Fn(&JobContext) -> anyhow::Result<()> + Send + Sync,
{
    fn run(&self, ctx: &JobContext) -> anyhow::Result<()> {
        self(ctx)
    }
}

/// Derives a progress key from a job's resolved parameters.
pub type ProgressKeyFn = Arc<dyn Fn(&JobParams) -> String + Send + Sync>;

/// A registered script: metadata, parameter schema, runner and key derivation.
#[derive(Clone)]
pub struct ScriptDefinition {
    name: String,
    label: String,
    description: String,
    params: Vec<ParamSpec>,
    runner: Arc<dyn ScriptRunner>,
    progress_key: Option<ProgressKeyFn>,
}

impl ScriptDefinition {
    pub fn new(name: impl Into<String>, runner: impl ScriptRunner + 'static) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            description: String::new(),
            params: Vec::new(),
            runner: Arc::new(runner),
            progress_key: None,
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Declare a parameter. Undeclared parameters are rejected at start.
    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    /// Override the default `"{name}:{params json}"` progress key.
    pub fn progress_key<F>(mut self, derive: F) -> Self
    where
        F: Fn(&JobParams) -> String + Send + Sync + 'static,
    {
        self.progress_key = Some(Arc::new(derive));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn runner(&self) -> Arc<dyn ScriptRunner> {
        Arc::clone(&self.runner)
    }

    pub fn info(&self) -> ScriptInfo {
        ScriptInfo {
            name: self.name.clone(),
            label: self.label.clone(),
            description: self.description.clone(),
            params: self.params.clone(),
        }
    }

    /// Progress key for a job started with `params` (already resolved).
    pub fn derive_progress_key(&self, params: &JobParams) -> String {
        match &self.progress_key {
            Some(derive) => derive(params),
            None => default_progress_key(&self.name, params),
        }
    }

    /// Check `params` against the schema and fill in declared defaults.
    ///
    /// # Errors
    ///
    /// [`JobError::InvalidParams`] for an undeclared parameter or a missing
    /// required one.
    pub fn resolve_params(&self, mut params: JobParams) -> JobResult<JobParams> {
        if let Some(unknown) = params
            .keys()
            .find(|name| !self.params.iter().any(|spec| &spec.name == *name))
        {
            return Err(JobError::invalid_params(
                &self.name,
                format!("unknown parameter '{}'", unknown),
            ));
        }

        for spec in &self.params {
            if params.contains_key(&spec.name) {
                continue;
            }
            if let Some(default) = &spec.default {
                params.insert(spec.name.clone(), default.clone());
            } else if spec.required {
                return Err(JobError::invalid_params(
                    &self.name,
                    format!("missing required parameter '{}'", spec.name),
                ));
            }
        }

        Ok(params)
    }
}

impl fmt::Debug for ScriptDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptDefinition")
            .field("name", &self.name)
            .field("label", &self.label)
            .field("params", &self.params)
            .field("custom_progress_key", &self.progress_key.is_some())
            .finish_non_exhaustive()
    }
}

/// Static table of scripts the manager is allowed to run.
#[derive(Debug, Clone, Default)]
pub struct ScriptRegistry {
    scripts: BTreeMap<String, Arc<ScriptDefinition>>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a script, replacing any previous one with the same name.
    pub fn register(mut self, definition: ScriptDefinition) -> Self {
        self.insert(definition);
        self
    }

    pub fn insert(&mut self, definition: ScriptDefinition) {
        self.scripts
            .insert(definition.name.clone(), Arc::new(definition));
    }

    pub fn get(&self, name: &str) -> Option<Arc<ScriptDefinition>> {
        self.scripts.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.scripts.contains_key(name)
    }

    /// Metadata for every registered script, sorted by name.
    pub fn infos(&self) -> Vec<ScriptInfo> {
        self.scripts.values().map(|d| d.info()).collect()
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}
