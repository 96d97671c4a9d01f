//! Transactional CRUD for overlay annotations on graph nodes.
//!
//! Annotations live in node properties under the reserved `overlay_` prefix,
//! one namespace per (exercise, scenario) pair:
//! `overlay_<hex exercise>_<hex scenario>_<field>`. A node can therefore carry
//! annotations for any number of scenarios, and clearing one of them only
//! removes that namespace. The resource's own properties are never touched.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use overlay_core::{
    AnnotatedResource, AnnotationFailure, Attributes, OverlayAnnotation, OverlayError, OverlayKey,
    OverlayResult, OverlayRole, OverlayStatistics,
};

use crate::port::{GraphQueryPort, GraphTransaction, NodeRef, PropertyMap, LAYER_PROPERTY};

/// Prefix reserved for overlay properties.
pub const OVERLAY_PREFIX: &str = "overlay_";

pub const EXERCISE_FIELD: &str = "exercise";
pub const SCENARIO_FIELD: &str = "scenario";
pub const LAYER_FIELD: &str = "layer";
pub const ROLE_FIELD: &str = "role";
pub const SOURCE_ADDRESS_FIELD: &str = "source_address";
pub const SOURCE_LOCATION_FIELD: &str = "source_location";
pub const ANNOTATED_AT_FIELD: &str = "annotated_at";

/// Every field an annotation writes inside its namespace.
pub const OVERLAY_FIELDS: &[&str] = &[
    EXERCISE_FIELD,
    SCENARIO_FIELD,
    LAYER_FIELD,
    ROLE_FIELD,
    SOURCE_ADDRESS_FIELD,
    SOURCE_LOCATION_FIELD,
    ANNOTATED_AT_FIELD,
];

/// Hex form of an identifier. Never contains `_`, so namespaces split cleanly.
fn encode(value: &str) -> String {
    value.bytes().map(|b| format!("{:02x}", b)).collect()
}

/// Property-key namespace of one (exercise, scenario) pair.
pub fn namespace(exercise: &str, scenario: &str) -> String {
    format!("{}{}_{}_", OVERLAY_PREFIX, encode(exercise), encode(scenario))
}

/// Common prefix of every namespace of an exercise.
fn exercise_prefix(exercise: &str) -> String {
    format!("{}{}_", OVERLAY_PREFIX, encode(exercise))
}

fn field_keys(namespace: &str) -> Vec<String> {
    OVERLAY_FIELDS
        .iter()
        .map(|field| format!("{}{}", namespace, field))
        .collect()
}

/// Namespaces present in a node's property keys.
fn namespaces(props: &PropertyMap) -> BTreeSet<String> {
    props
        .keys()
        .filter_map(|key| {
            let mut parts = key.strip_prefix(OVERLAY_PREFIX)?.splitn(3, '_');
            let exercise = parts.next()?;
            let scenario = parts.next()?;
            parts.next()?;
            Some(format!("{}{}_{}_", OVERLAY_PREFIX, exercise, scenario))
        })
        .collect()
}

/// Outcome of a bulk write: either everything was written or nothing was.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkWriteOutcome {
    pub success_count: usize,
    pub errors: Vec<AnnotationFailure>,
}

impl BulkWriteOutcome {
    pub fn is_committed(&self) -> bool {
        self.errors.is_empty()
    }

    /// Turn a rolled-back batch into an [`OverlayError::AnnotationTransaction`].
    pub fn into_result(self) -> OverlayResult<usize> {
        if self.errors.is_empty() {
            Ok(self.success_count)
        } else {
            Err(OverlayError::AnnotationTransaction {
                failures: self.errors,
            })
        }
    }
}

fn text<'a>(props: &'a PropertyMap, key: &str) -> Option<&'a str> {
    props.get(key).and_then(Value::as_str)
}

fn annotation_properties(annotation: &OverlayAnnotation, annotated_at: &str) -> PropertyMap {
    let ns = namespace(&annotation.exercise, &annotation.scenario);
    let string = |value: &str| Value::String(value.to_string());
    let role = annotation
        .role
        .map(|r| string(r.as_str()))
        .unwrap_or(Value::Null);

    [
        (EXERCISE_FIELD, string(&annotation.exercise)),
        (SCENARIO_FIELD, string(&annotation.scenario)),
        (LAYER_FIELD, string(&annotation.layer)),
        (ROLE_FIELD, role),
        (SOURCE_ADDRESS_FIELD, string(&annotation.source_address)),
        (SOURCE_LOCATION_FIELD, string(&annotation.source_location)),
        (ANNOTATED_AT_FIELD, string(annotated_at)),
    ]
    .into_iter()
    .map(|(field, value)| (format!("{}{}", ns, field), value))
    .collect()
}

/// One annotation as found on a node.
struct StoredAnnotation {
    namespace: String,
    resource: AnnotatedResource,
}

impl StoredAnnotation {
    fn annotation(&self) -> &OverlayAnnotation {
        &self.resource.annotation
    }
}

/// Every annotation a node carries, one per namespace.
fn stored_annotations(node: &NodeRef) -> Vec<StoredAnnotation> {
    let props = &node.properties;
    let resource_properties: Attributes = props
        .iter()
        .filter(|(key, _)| !key.starts_with(OVERLAY_PREFIX))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    namespaces(props)
        .into_iter()
        .filter_map(|ns| {
            let field = |name: &str| text(props, &format!("{}{}", ns, name));
            let annotation = OverlayAnnotation {
                node_id: node.node_id.clone(),
                resource_id: node.resource_id.clone(),
                resource_kind: node.native_type.clone(),
                resource_name: node.name.clone(),
                exercise: field(EXERCISE_FIELD)?.to_string(),
                scenario: field(SCENARIO_FIELD)?.to_string(),
                layer: field(LAYER_FIELD)?.to_string(),
                role: field(ROLE_FIELD).and_then(OverlayRole::parse),
                source_address: field(SOURCE_ADDRESS_FIELD).unwrap_or_default().to_string(),
                source_location: field(SOURCE_LOCATION_FIELD).unwrap_or_default().to_string(),
            };
            let annotated_at = field(ANNOTATED_AT_FIELD).map(str::to_string);
            Some(StoredAnnotation {
                namespace: ns,
                resource: AnnotatedResource {
                    annotation,
                    annotated_at,
                    properties: resource_properties.clone(),
                },
            })
        })
        .collect()
}

/// Field-level problems that make an annotation unwritable.
fn invalid_fields(annotation: &OverlayAnnotation) -> Option<String> {
    let missing: Vec<&str> = [
        ("node id", annotation.node_id.as_str()),
        ("exercise", annotation.exercise.as_str()),
        ("scenario", annotation.scenario.as_str()),
        ("layer", annotation.layer.as_str()),
    ]
    .iter()
    .filter(|(_, value)| value.trim().is_empty())
    .map(|(name, _)| *name)
    .collect();

    if missing.is_empty() {
        None
    } else {
        Some(format!("empty {}", missing.join(", ")))
    }
}

/// The node must live in the annotation's layer.
fn layer_conflict(annotation: &OverlayAnnotation, current: &PropertyMap) -> Option<String> {
    match text(current, LAYER_PROPERTY) {
        Some(layer) if layer == annotation.layer => None,
        Some(layer) => Some(format!(
            "node belongs to layer '{}', not '{}'",
            layer, annotation.layer
        )),
        None => Some(format!("node has no layer, expected '{}'", annotation.layer)),
    }
}

/// Roll back after a failed statement and hand back the original error.
async fn abort(txn: Box<dyn GraphTransaction>, err: OverlayError) -> OverlayError {
    if let Err(rollback_err) = txn.rollback().await {
        warn!(error = %rollback_err, "Rollback after failed write also failed");
    }
    err
}

/// Remove the given annotations inside `txn`. Returns how many were removed.
async fn remove_stored(
    txn: &mut dyn GraphTransaction,
    stored: &[StoredAnnotation],
) -> OverlayResult<usize> {
    let mut removed = 0;
    for entry in stored {
        let keys = field_keys(&entry.namespace);
        if txn.remove_properties(&entry.annotation().node_id, &keys).await? {
            removed += 1;
        }
    }
    Ok(removed)
}

/// Stage one annotation. `Ok(false)` if the node does not exist.
async fn stage_one(
    txn: &mut dyn GraphTransaction,
    annotation: &OverlayAnnotation,
) -> OverlayResult<bool> {
    let Some(current) = txn.get_properties(&annotation.node_id).await? else {
        return Ok(false);
    };
    if let Some(problem) = layer_conflict(annotation, &current) {
        return Err(OverlayError::validation(format!(
            "{}: {}",
            annotation.node_id, problem
        )));
    }
    let now = chrono::Utc::now().to_rfc3339();
    txn.set_properties(&annotation.node_id, &annotation_properties(annotation, &now))
        .await
}

/// Stage a batch, collecting a failure for every entry that cannot be written.
async fn stage_batch(
    txn: &mut dyn GraphTransaction,
    annotations: &[OverlayAnnotation],
) -> OverlayResult<Vec<AnnotationFailure>> {
    let now = chrono::Utc::now().to_rfc3339();
    let mut seen: HashSet<(&str, &str, &str)> = HashSet::new();
    let mut errors = Vec::new();

    for annotation in annotations {
        let fail = |reason: String| AnnotationFailure {
            node_id: annotation.node_id.clone(),
            reason,
        };

        if let Some(problem) = invalid_fields(annotation) {
            errors.push(fail(problem));
            continue;
        }
        let slot = (
            annotation.node_id.as_str(),
            annotation.exercise.as_str(),
            annotation.scenario.as_str(),
        );
        if !seen.insert(slot) {
            errors.push(fail("node appears more than once in the batch".to_string()));
            continue;
        }
        let Some(current) = txn.get_properties(&annotation.node_id).await? else {
            errors.push(fail("node not found".to_string()));
            continue;
        };
        if let Some(problem) = layer_conflict(annotation, &current) {
            errors.push(fail(problem));
            continue;
        }
        let props = annotation_properties(annotation, &now);
        if !txn.set_properties(&annotation.node_id, &props).await? {
            errors.push(fail("node not found".to_string()));
        }
    }

    Ok(errors)
}

/// Overlay metadata store over a [`GraphQueryPort`].
#[derive(Clone)]
pub struct AnnotationStore {
    graph: Arc<dyn GraphQueryPort>,
}

impl AnnotationStore {
    pub fn new(graph: Arc<dyn GraphQueryPort>) -> Self {
        Self { graph }
    }

    /// Annotate a single node. Returns `false` if the node does not exist.
    pub async fn annotate_one(&self, annotation: &OverlayAnnotation) -> OverlayResult<bool> {
        if let Some(problem) = invalid_fields(annotation) {
            return Err(OverlayError::validation(problem));
        }

        let mut txn = self.graph.begin().await?;
        match stage_one(txn.as_mut(), annotation).await {
            Ok(true) => {
                txn.commit().await?;
                Ok(true)
            }
            Ok(false) => {
                txn.rollback().await?;
                Ok(false)
            }
            Err(err) => Err(abort(txn, err).await),
        }
    }

    /// Write every annotation or none.
    ///
    /// All entries are checked before deciding; if any fails, the batch is
    /// rolled back and `errors` names each failing entry.
    pub async fn annotate_bulk(
        &self,
        annotations: &[OverlayAnnotation],
    ) -> OverlayResult<BulkWriteOutcome> {
        let mut txn = self.graph.begin().await?;
        match stage_batch(txn.as_mut(), annotations).await {
            Ok(errors) => finish(txn, annotations.len(), errors).await,
            Err(err) => Err(abort(txn, err).await),
        }
    }

    /// Clear `key` and write `annotations` in one transaction.
    pub async fn replace(
        &self,
        key: &OverlayKey,
        annotations: &[OverlayAnnotation],
    ) -> OverlayResult<BulkWriteOutcome> {
        let existing = self
            .select(Some(&key.exercise), Some(&key.scenario), &key.layer)
            .await?;

        let mut txn = self.graph.begin().await?;
        let staged = match remove_stored(txn.as_mut(), &existing).await {
            Ok(_) => stage_batch(txn.as_mut(), annotations).await,
            Err(err) => Err(err),
        };
        match staged {
            Ok(errors) => {
                if errors.is_empty() {
                    info!(
                        overlay = %key,
                        cleared = existing.len(),
                        "Replacing overlay annotations"
                    );
                }
                finish(txn, annotations.len(), errors).await
            }
            Err(err) => Err(abort(txn, err).await),
        }
    }

    /// Stored annotations in `layer`, optionally narrowed to an exercise and scenario.
    async fn select(
        &self,
        exercise: Option<&str>,
        scenario: Option<&str>,
        layer: &str,
    ) -> OverlayResult<Vec<StoredAnnotation>> {
        let prefix = match (exercise, scenario) {
            (Some(exercise), Some(scenario)) => namespace(exercise, scenario),
            (Some(exercise), None) => exercise_prefix(exercise),
            _ => OVERLAY_PREFIX.to_string(),
        };
        let nodes = self.graph.find_by_key_prefix(layer, &prefix).await?;

        Ok(nodes
            .iter()
            .flat_map(stored_annotations)
            .filter(|entry| {
                let a = entry.annotation();
                a.layer == layer
                    && exercise.map_or(true, |e| a.exercise == e)
                    && scenario.map_or(true, |s| a.scenario == s)
            })
            .collect())
    }

    /// Annotated resources in `layer`, optionally filtered by exercise and scenario.
    ///
    /// A node annotated under several scenarios appears once per scenario.
    pub async fn query(
        &self,
        exercise: Option<&str>,
        scenario: Option<&str>,
        layer: &str,
    ) -> OverlayResult<Vec<AnnotatedResource>> {
        let mut resources: Vec<AnnotatedResource> = self
            .select(exercise, scenario, layer)
            .await?
            .into_iter()
            .map(|entry| entry.resource)
            .collect();
        resources.sort_by(|a, b| {
            let key = |r: &AnnotatedResource| {
                (
                    r.annotation.exercise.clone(),
                    r.annotation.scenario.clone(),
                    r.annotation.resource_kind.clone(),
                    r.annotation.resource_name.clone(),
                    r.annotation.node_id.clone(),
                )
            };
            key(a).cmp(&key(b))
        });
        Ok(resources)
    }

    /// Number of annotations under one key.
    pub async fn count(&self, key: &OverlayKey) -> OverlayResult<usize> {
        Ok(self
            .select(Some(&key.exercise), Some(&key.scenario), &key.layer)
            .await?
            .len())
    }

    /// Remove annotations of an exercise (one scenario, or all of them).
    ///
    /// Annotations of other keys on the same nodes stay in place. Clearing an
    /// already-empty overlay returns 0.
    pub async fn clear(
        &self,
        exercise: &str,
        scenario: Option<&str>,
        layer: &str,
    ) -> OverlayResult<usize> {
        let stored = self.select(Some(exercise), scenario, layer).await?;
        if stored.is_empty() {
            return Ok(0);
        }

        let mut txn = self.graph.begin().await?;
        let cleared = match remove_stored(txn.as_mut(), &stored).await {
            Ok(cleared) => cleared,
            Err(err) => return Err(abort(txn, err).await),
        };
        txn.commit().await?;

        info!(
            exercise,
            scenario = scenario.unwrap_or("*"),
            layer,
            cleared,
            "Cleared overlay annotations"
        );
        Ok(cleared)
    }

    /// Aggregate counts for a layer, optionally limited to one exercise.
    pub async fn statistics(
        &self,
        exercise: Option<&str>,
        layer: &str,
    ) -> OverlayResult<OverlayStatistics> {
        let resources = self.query(exercise, None, layer).await?;
        let mut stats = OverlayStatistics {
            total_resources: resources.len(),
            ..Default::default()
        };
        for resource in &resources {
            let a = &resource.annotation;
            *stats.by_exercise.entry(a.exercise.clone()).or_default() += 1;
            *stats
                .by_scenario
                .entry(format!("{}/{}", a.exercise, a.scenario))
                .or_default() += 1;
            *stats.by_kind.entry(a.resource_kind.clone()).or_default() += 1;
            let role = a.role.map(|r| r.as_str()).unwrap_or("unassigned");
            *stats.by_role.entry(role.to_string()).or_default() += 1;
        }
        Ok(stats)
    }
}

/// Commit a clean batch, roll back one with failures.
async fn finish(
    txn: Box<dyn GraphTransaction>,
    total: usize,
    errors: Vec<AnnotationFailure>,
) -> OverlayResult<BulkWriteOutcome> {
    if errors.is_empty() {
        txn.commit().await?;
        info!(annotated = total, "Annotation batch committed");
        Ok(BulkWriteOutcome {
            success_count: total,
            errors,
        })
    } else {
        txn.rollback().await?;
        warn!(failed = errors.len(), total, "Annotation batch rolled back");
        Ok(BulkWriteOutcome {
            success_count: 0,
            errors,
        })
    }
}
