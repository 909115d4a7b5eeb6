//! Workflow definitions loaded from data files.
//!
//! A catalog file is either JSON (an array of workflows, or an object with a
//! `workflows` array) or TOML (`[[workflows]]` tables).  Every definition is
//! validated on load.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use intentflow_core::Workflow;

use crate::error::{EngineError, Result};

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonCatalog {
    List(Vec<Workflow>),
    Wrapped { workflows: Vec<Workflow> },
}

#[derive(Deserialize)]
struct TomlCatalog {
    #[serde(default)]
    workflows: Vec<Workflow>,
}

/// Source format of a catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogFormat {
    Json,
    Toml,
}

impl CatalogFormat {
    /// Guess the format from a file extension; anything but `.toml` is JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::Toml,
            _ => Self::Json,
        }
    }
}

/// Validated workflows keyed by id.
#[derive(Debug, Clone, Default)]
pub struct WorkflowCatalog {
    workflows: HashMap<String, Arc<Workflow>>,
}

impl WorkflowCatalog {
    /// Build a catalog, validating every workflow and rejecting duplicate ids.
    pub fn from_workflows(workflows: impl IntoIterator<Item = Workflow>) -> Result<Self> {
        let mut map = HashMap::new();
        for workflow in workflows {
            workflow.validate()?;
            if map.contains_key(&workflow.id) {
                return Err(EngineError::DuplicateWorkflow {
                    workflow_id: workflow.id,
                });
            }
            debug!(workflow_id = %workflow.id, steps = workflow.steps.len(), "workflow registered");
            map.insert(workflow.id.clone(), Arc::new(workflow));
        }
        Ok(Self { workflows: map })
    }

    pub fn parse(text: &str, format: CatalogFormat) -> Result<Self> {
        Self::parse_named(text, format, "<inline>")
    }

    /// Read and parse a catalog file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| EngineError::CatalogIo {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let origin = path.display().to_string();
        let catalog = Self::parse_named(&text, CatalogFormat::from_path(path), &origin)?;
        info!(path = %path.display(), workflows = catalog.len(), "workflow catalog loaded");
        Ok(catalog)
    }

    fn parse_named(text: &str, format: CatalogFormat, origin: &str) -> Result<Self> {
        let parse_error = |reason: String| EngineError::CatalogParse {
            path: origin.to_string(),
            reason,
        };
        let workflows = match format {
            CatalogFormat::Json => match serde_json::from_str::<JsonCatalog>(text)
                .map_err(|e| parse_error(e.to_string()))?
            {
                JsonCatalog::List(list) => list,
                JsonCatalog::Wrapped { workflows } => workflows,
            },
            CatalogFormat::Toml => {
                toml::from_str::<TomlCatalog>(text)
                    .map_err(|e| parse_error(e.to_string()))?
                    .workflows
            }
        };
        Self::from_workflows(workflows)
    }

    pub fn get(&self, workflow_id: &str) -> Option<Arc<Workflow>> {
        self.workflows.get(workflow_id).cloned()
    }

    /// Workflow ids in sorted order.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.workflows.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Workflow>> {
        self.workflows.values()
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intentflow_core::{CoreError, StepType};

    const JSON: &str = r#"[
        {
            "id": "schedule-appointment",
            "name": "Schedule appointment",
            "approvalRequired": true,
            "steps": [
                {"id": "book", "name": "Book", "type": "api_call",
                 "config": {"url": "https://clinic.test/book", "method": "POST",
                            "body": {"doctor": "{intent.doctor}"}}},
                {"id": "confirm", "name": "Confirm", "type": "notification",
                 "config": {"message": "Booked: {result.book.data.id}"},
                 "dependencies": ["book"]}
            ]
        }
    ]"#;

    const TOML: &str = r#"
        [[workflows]]
        id = "send-notification"
        name = "Send notification"
        timeoutMs = 10000

        [[workflows.steps]]
        id = "notify"
        name = "Notify"
        type = "notification"
        config = { message = "{intent.message}", channels = ["email"] }
        retryPolicy = { maxRetries = 1, backoffMs = 250 }
    "#;

    #[test]
    fn parses_json_list() {
        let catalog = WorkflowCatalog::parse(JSON, CatalogFormat::Json).unwrap();
        let wf = catalog.get("schedule-appointment").unwrap();
        assert!(wf.approval_required);
        assert_eq!(wf.steps[1].dependencies, vec!["book".to_string()]);
        assert_eq!(wf.steps[0].step_type, StepType::ApiCall);
    }

    #[test]
    fn parses_wrapped_json() {
        let wrapped = format!(r#"{{"workflows": {JSON}}}"#);
        let catalog = WorkflowCatalog::parse(&wrapped, CatalogFormat::Json).unwrap();
        assert_eq!(catalog.ids(), vec!["schedule-appointment"]);
    }

    #[test]
    fn parses_toml() {
        let catalog = WorkflowCatalog::parse(TOML, CatalogFormat::Toml).unwrap();
        let wf = catalog.get("send-notification").unwrap();
        assert_eq!(wf.timeout_ms, 10_000);
        let step = &wf.steps[0];
        assert_eq!(step.config["channels"][0], "email");
        assert_eq!(step.retry_policy.unwrap().max_retries, 1);
    }

    #[test]
    fn rejects_invalid_definitions() {
        let dangling = JSON.replace(r#"["book"]"#, r#"["ghost"]"#);
        assert!(matches!(
            WorkflowCatalog::parse(&dangling, CatalogFormat::Json),
            Err(EngineError::Core(CoreError::InvalidWorkflow { .. }))
        ));

        let twice = format!("[{0}, {0}]", &JSON.trim()[1..JSON.trim().len() - 1]);
        assert!(matches!(
            WorkflowCatalog::parse(&twice, CatalogFormat::Json),
            Err(EngineError::DuplicateWorkflow { .. })
        ));

        assert!(matches!(
            WorkflowCatalog::parse("{not json", CatalogFormat::Json),
            Err(EngineError::CatalogParse { .. })
        ));
    }

    #[test]
    fn load_picks_format_from_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workflows.toml");
        std::fs::write(&path, TOML).unwrap();
        assert_eq!(WorkflowCatalog::load(&path).unwrap().len(), 1);

        let missing = WorkflowCatalog::load(dir.path().join("missing.json"));
        assert!(matches!(missing, Err(EngineError::CatalogIo { .. })));
    }
}
