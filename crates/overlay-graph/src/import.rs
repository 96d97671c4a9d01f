//! Parse → match → annotate, as one import call.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use overlay_core::{
    ConfigParser, ImportResult, OverlayAnnotation, OverlayError, OverlayKey, OverlayResult,
    ParseOptions, ResourceMapping, RoleTable,
};

use crate::annotation::AnnotationStore;
use crate::matcher::{MatchSummary, ResourceMatcher};
use crate::port::{GraphQueryPort, Scope};

/// Parameters of one import.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub directory: PathBuf,
    pub exercise: String,
    pub scenario: String,
    pub tenant: String,
    pub layer: String,
    /// Replace existing annotations under the same key instead of failing.
    pub overwrite: bool,
    pub recursive: bool,
    pub roles: RoleTable,
}

impl ImportRequest {
    pub fn new(
        directory: impl Into<PathBuf>,
        exercise: impl Into<String>,
        scenario: impl Into<String>,
        tenant: impl Into<String>,
        layer: impl Into<String>,
    ) -> Self {
        Self {
            directory: directory.into(),
            exercise: exercise.into(),
            scenario: scenario.into(),
            tenant: tenant.into(),
            layer: layer.into(),
            overwrite: false,
            recursive: false,
            roles: RoleTable::new(),
        }
    }

    pub fn key(&self) -> OverlayKey {
        OverlayKey::new(&self.exercise, &self.scenario, &self.layer)
    }
}

/// Warning text for a mapping that produced no annotation.
fn skip_warning(mapping: &ResourceMapping) -> String {
    let resource = mapping.resource();
    format!(
        "{} ({}): {}",
        resource.address(),
        resource.source_location(),
        mapping.reason()
    )
}

/// Imports declared resources as overlay annotations.
#[derive(Clone)]
pub struct ImportPipeline {
    matcher: ResourceMatcher,
    store: AnnotationStore,
}

impl ImportPipeline {
    pub fn new(graph: Arc<dyn GraphQueryPort>, correlation_tag: impl Into<String>) -> Self {
        Self {
            matcher: ResourceMatcher::new(graph.clone(), correlation_tag),
            store: AnnotationStore::new(graph),
        }
    }

    pub fn store(&self) -> &AnnotationStore {
        &self.store
    }

    /// Run an import.
    ///
    /// Unmatched resources are reported in `warnings` and never fail the
    /// call. Parse, transport and transaction errors abort it with nothing
    /// written.
    pub async fn import(&self, request: &ImportRequest) -> OverlayResult<ImportResult> {
        let key = request.key();
        let blank = [&key.exercise, &key.scenario, &key.layer]
            .iter()
            .any(|field| field.trim().is_empty());
        if blank {
            return Err(OverlayError::validation(
                "exercise, scenario and layer must not be empty",
            ));
        }

        let existing = self.store.count(&key).await?;
        if existing > 0 && !request.overwrite {
            return Err(OverlayError::OverlayExists {
                exercise: key.exercise,
                scenario: key.scenario,
                layer: key.layer,
                existing,
            });
        }

        let parser = ConfigParser::new(ParseOptions {
            recursive: request.recursive,
        });
        let resources = parser.parse(&request.directory)?;

        let scope = Scope::new(&request.tenant, &request.layer);
        let mappings = self.matcher.match_resources(&resources, &scope).await?;

        let mut annotations = Vec::new();
        let mut warnings = Vec::new();
        for mapping in &mappings {
            match mapping.target() {
                Some(node) => {
                    let resource = mapping.resource();
                    annotations.push(OverlayAnnotation {
                        node_id: node.node_id.clone(),
                        resource_id: node.resource_id.clone(),
                        resource_kind: node.native_type.clone(),
                        resource_name: node.name.clone(),
                        exercise: key.exercise.clone(),
                        scenario: key.scenario.clone(),
                        layer: key.layer.clone(),
                        role: request.roles.resolve(resource),
                        source_address: resource.address().to_string(),
                        source_location: resource.source_location(),
                    });
                }
                None => {
                    let warning = skip_warning(mapping);
                    warn!("Skipping {}", warning);
                    warnings.push(warning);
                }
            }
        }

        let summary = MatchSummary::from_mappings(&mappings);
        info!(
            overlay = %key,
            parsed = resources.len(),
            exact = summary.exact,
            fuzzy = summary.fuzzy,
            tag = summary.tag,
            unmatched = summary.unmatched,
            ambiguous = summary.ambiguous,
            "Matched declared resources"
        );

        let annotated_count = if existing > 0 {
            info!(overlay = %key, existing, "Overwriting existing overlay");
            self.store.replace(&key, &annotations).await?.into_result()?
        } else if annotations.is_empty() {
            0
        } else {
            self.store.annotate_bulk(&annotations).await?.into_result()?
        };

        Ok(ImportResult {
            parsed_count: resources.len(),
            mapped_count: annotations.len(),
            annotated_count,
            skipped_count: mappings.len() - annotations.len(),
            mappings,
            warnings,
        })
    }
}
