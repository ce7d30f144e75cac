//! File-backed mapping loader.
//!
//! Reads the source-to-target mapping as JSON (a bare array, or an object
//! with an `items` array) or TOML (`[[items]]` tables), and turns each row
//! into a [`WorkItem`].

use crate::model::{WorkItem, WorkItemId, string_or_number};
use crate::orchestrator::{MappingLoader, MappingOutcome};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A mapping row before validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingRow {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub layer: Option<String>,
    #[serde(default, alias = "tag_name")]
    pub tag_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MappingFile {
    items: Vec<MappingRow>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonMapping {
    Bare(Vec<MappingRow>),
    Wrapped(MappingFile),
}

pub struct FileMappingLoader {
    path: PathBuf,
    /// Layer for rows that have none. `None` makes such rows an error.
    default_layer: Option<String>,
}

impl FileMappingLoader {
    pub fn new(path: impl Into<PathBuf>, default_layer: Option<String>) -> Self {
        Self {
            path: path.into(),
            default_layer,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse(&self, content: &str) -> Result<Vec<MappingRow>, String> {
        let is_toml = self
            .path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        if is_toml {
            toml::from_str::<MappingFile>(content)
                .map(|f| f.items)
                .map_err(|e| format!("bad mapping TOML {}: {e}", self.path.display()))
        } else {
            serde_json::from_str::<JsonMapping>(content)
                .map(|doc| match doc {
                    JsonMapping::Bare(rows) => rows,
                    JsonMapping::Wrapped(file) => file.items,
                })
                .map_err(|e| format!("bad mapping JSON {}: {e}", self.path.display()))
        }
    }

    /// Validate rows and build work items. Bad rows become errors, not items.
    pub fn transform(&self, rows: Vec<MappingRow>, tag_name: &str) -> MappingOutcome {
        let mut data = Vec::with_capacity(rows.len());
        let mut errors = Vec::new();
        let mut seen = HashSet::new();

        for (index, row) in rows.into_iter().enumerate() {
            let line = index + 1;
            let id = row.id.trim().to_string();
            if id.is_empty() {
                errors.push(format!("row {line}: empty id"));
                continue;
            }
            if !seen.insert(id.clone()) {
                errors.push(format!("row {line}: duplicate id {id}"));
                continue;
            }
            let Some(name) = row.name.filter(|n| !n.trim().is_empty()) else {
                errors.push(format!("row {line} (id {id}): missing name"));
                continue;
            };
            let layer = match row.layer.map(|l| l.trim().to_string()).filter(|l| !l.is_empty()) {
                Some(layer) => layer,
                None => match &self.default_layer {
                    Some(default) => {
                        warn!(id = %id, layer = %default, "row has no layer, using default");
                        default.clone()
                    }
                    None => {
                        errors.push(format!(
                            "row {line} (id {id}): missing layer and no default layer configured"
                        ));
                        continue;
                    }
                },
            };
            data.push(WorkItem {
                code: row
                    .code
                    .filter(|c| !c.trim().is_empty())
                    .unwrap_or_else(|| id.clone()),
                id: WorkItemId::new(id),
                name,
                layer,
                tag_name: row
                    .tag_name
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| tag_name.to_string()),
            });
        }

        if data.is_empty() && errors.is_empty() {
            errors.push("mapping contains no items".to_string());
        }

        MappingOutcome {
            success: errors.is_empty(),
            data,
            errors,
        }
    }
}

#[async_trait]
impl MappingLoader for FileMappingLoader {
    async fn load_and_transform(&self, tag_name: &str) -> MappingOutcome {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) => {
                return MappingOutcome {
                    success: false,
                    data: Vec::new(),
                    errors: vec![format!("cannot read mapping {}: {e}", self.path.display())],
                };
            }
        };
        match self.parse(&content) {
            Ok(rows) => {
                debug!(rows = rows.len(), path = %self.path.display(), "mapping parsed");
                self.transform(rows, tag_name)
            }
            Err(e) => MappingOutcome {
                success: false,
                data: Vec::new(),
                errors: vec![e],
            },
        }
    }
}
