//! Resolution of parsed resources to graph nodes.
//!
//! Each resource is tried against [`TIERS`] in order; the first tier that
//! finds exactly one node wins. A tier that finds several nodes ends the walk
//! with an unmatched, ambiguous mapping that lists the candidates.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use overlay_core::kinds::{is_known_kind, native_type};
use overlay_core::model::is_expression;
use overlay_core::{ConfidenceTier, MatchedNode, OverlayResult, ParsedResource, ResourceMapping};

use crate::port::{CandidateQuery, GraphQueryPort, NodeRef, Scope};

/// What a tier sees for one resource.
pub struct MatchInput<'a> {
    pub resource: &'a ParsedResource,
    pub native_type: &'a str,
    pub name: &'a str,
    pub group: Option<&'a str>,
    pub correlation_tag: &'a str,
    pub correlation_value: Option<&'a str>,
    /// Every node fetched for this resource's native type.
    pub candidates: &'a [NodeRef],
}

/// Result of running one tier.
#[derive(Debug)]
pub enum TierOutcome {
    Matched(NodeRef),
    Ambiguous(Vec<NodeRef>),
    Miss(String),
}

pub type TierFn = fn(&MatchInput<'_>) -> TierOutcome;

/// Matching strategies in the order they are attempted.
pub const TIERS: &[(ConfidenceTier, TierFn)] = &[
    (ConfidenceTier::Exact, exact_tier),
    (ConfidenceTier::Fuzzy, fuzzy_tier),
    (ConfidenceTier::Tag, tag_tier),
];

fn decide(found: Vec<&NodeRef>, miss: impl FnOnce() -> String) -> TierOutcome {
    match found.len() {
        0 => TierOutcome::Miss(miss()),
        1 => TierOutcome::Matched(found[0].clone()),
        _ => TierOutcome::Ambiguous(found.into_iter().cloned().collect()),
    }
}

fn same_kind_and_name(input: &MatchInput<'_>, node: &NodeRef) -> bool {
    node.native_type == input.native_type && node.name == input.name
}

/// Kind, name and containing group all identical.
pub fn exact_tier(input: &MatchInput<'_>) -> TierOutcome {
    let Some(group) = input.group else {
        return TierOutcome::Miss("resource declares no group".to_string());
    };
    let found = input
        .candidates
        .iter()
        .filter(|node| same_kind_and_name(input, node) && node.group.as_deref() == Some(group))
        .collect();
    decide(found, || "no node in scope with matching kind+name+group".to_string())
}

/// Kind and name identical, group ignored.
pub fn fuzzy_tier(input: &MatchInput<'_>) -> TierOutcome {
    let found = input
        .candidates
        .iter()
        .filter(|node| same_kind_and_name(input, node))
        .collect();
    decide(found, || "no node in scope with matching kind+name".to_string())
}

/// Same correlation tag value on both sides.
pub fn tag_tier(input: &MatchInput<'_>) -> TierOutcome {
    let Some(value) = input.correlation_value else {
        return TierOutcome::Miss(format!("resource declares no '{}' tag", input.correlation_tag));
    };
    let found = input
        .candidates
        .iter()
        .filter(|node| node.native_type == input.native_type)
        .filter(|node| node.tag(input.correlation_tag).as_deref() == Some(value))
        .collect();
    decide(found, || {
        format!("no node in scope carries {}={}", input.correlation_tag, value)
    })
}

fn success_reason(tier: ConfidenceTier, input: &MatchInput<'_>) -> String {
    match tier {
        ConfidenceTier::Exact => "exact: kind+name+group".to_string(),
        ConfidenceTier::Fuzzy => "fuzzy: kind+name".to_string(),
        ConfidenceTier::Tag => format!(
            "tag match: {}={}",
            input.correlation_tag,
            input.correlation_value.unwrap_or_default()
        ),
        ConfidenceTier::None => String::new(),
    }
}

fn matched_node(node: NodeRef) -> MatchedNode {
    MatchedNode {
        node_id: node.node_id,
        resource_id: node.resource_id,
        native_type: node.native_type,
        name: node.name,
    }
}

/// Walk the tiers for one resource.
pub fn resolve(input: &MatchInput<'_>) -> ResourceMapping {
    let mut misses = Vec::with_capacity(TIERS.len());

    for (tier, run) in TIERS {
        match run(input) {
            TierOutcome::Matched(node) => {
                return ResourceMapping::matched(
                    input.resource.clone(),
                    matched_node(node),
                    *tier,
                    success_reason(*tier, input),
                );
            }
            TierOutcome::Ambiguous(nodes) => {
                let ids: Vec<String> = nodes.into_iter().map(|n| n.node_id).collect();
                let reason = format!(
                    "ambiguous: {} candidates at {} tier: {}",
                    ids.len(),
                    tier.as_str().to_lowercase(),
                    ids.join(", ")
                );
                return ResourceMapping::unmatched(input.resource.clone(), reason, ids);
            }
            TierOutcome::Miss(why) => {
                misses.push(format!("{}: {}", tier.as_str().to_lowercase(), why));
            }
        }
    }

    ResourceMapping::unmatched(
        input.resource.clone(),
        format!("no match ({})", misses.join("; ")),
        Vec::new(),
    )
}

/// Per-tier counts over a batch of mappings.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchSummary {
    pub exact: usize,
    pub fuzzy: usize,
    pub tag: usize,
    pub unmatched: usize,
    pub ambiguous: usize,
}

impl MatchSummary {
    pub fn from_mappings(mappings: &[ResourceMapping]) -> Self {
        let mut summary = Self::default();
        for mapping in mappings {
            match mapping.tier() {
                ConfidenceTier::Exact => summary.exact += 1,
                ConfidenceTier::Fuzzy => summary.fuzzy += 1,
                ConfidenceTier::Tag => summary.tag += 1,
                ConfidenceTier::None if mapping.is_ambiguous() => summary.ambiguous += 1,
                ConfidenceTier::None => summary.unmatched += 1,
            }
        }
        summary
    }
}

/// Resolves parsed resources against the graph in batches per native type.
#[derive(Clone)]
pub struct ResourceMatcher {
    graph: Arc<dyn GraphQueryPort>,
    correlation_tag: String,
}

impl ResourceMatcher {
    pub fn new(graph: Arc<dyn GraphQueryPort>, correlation_tag: impl Into<String>) -> Self {
        Self {
            graph,
            correlation_tag: correlation_tag.into(),
        }
    }

    /// Resolve every resource. Mappings come back in input order.
    ///
    /// Unmatched resources are results, not errors; only a failing graph
    /// query aborts the batch.
    pub async fn match_resources(
        &self,
        resources: &[ParsedResource],
        scope: &Scope,
    ) -> OverlayResult<Vec<ResourceMapping>> {
        let names_by_address: HashMap<&str, &str> = resources
            .iter()
            .map(|r| (r.address(), r.resource_name()))
            .collect();

        let groups: Vec<Option<String>> = resources
            .iter()
            .map(|r| declared_group(r, &names_by_address))
            .collect();
        let correlations: Vec<Option<&str>> = resources
            .iter()
            .map(|r| {
                r.tag(&self.correlation_tag).or_else(|| {
                    r.string_attribute(&self.correlation_tag)
                        .filter(|v| !is_expression(v))
                })
            })
            .collect();

        let mut by_type: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (i, resource) in resources.iter().enumerate() {
            if !is_known_kind(resource.kind()) {
                debug!(kind = resource.kind(), "No native type for kind, matching it verbatim");
            }
            by_type.entry(native_type(resource.kind())).or_default().push(i);
        }

        let mut mappings: Vec<Option<ResourceMapping>> = vec![None; resources.len()];

        for (native, indices) in &by_type {
            let query = CandidateQuery {
                native_type: native.to_string(),
                names: indices.iter().map(|&i| resources[i].resource_name().to_string()).collect(),
                correlation_tag: self.correlation_tag.clone(),
                correlation_values: indices
                    .iter()
                    .filter_map(|&i| correlations[i].map(str::to_string))
                    .collect(),
            };
            let candidates = self.graph.find_candidates(&query, scope).await?;
            debug!(
                native_type = native,
                resources = indices.len(),
                candidates = candidates.len(),
                "Matching batch"
            );

            for &i in indices {
                let input = MatchInput {
                    resource: &resources[i],
                    native_type: native,
                    name: resources[i].resource_name(),
                    group: groups[i].as_deref(),
                    correlation_tag: &self.correlation_tag,
                    correlation_value: correlations[i],
                    candidates: &candidates,
                };
                let mapping = resolve(&input);
                debug!(
                    address = resources[i].address(),
                    tier = %mapping.tier(),
                    reason = mapping.reason(),
                    "Resolved resource"
                );
                mappings[i] = Some(mapping);
            }
        }

        let mut mappings: Vec<ResourceMapping> = mappings.into_iter().flatten().collect();
        release_shared_targets(&mut mappings);
        let summary = MatchSummary::from_mappings(&mappings);
        info!(
            resources = resources.len(),
            queries = by_type.len(),
            exact = summary.exact,
            fuzzy = summary.fuzzy,
            tag = summary.tag,
            ambiguous = summary.ambiguous,
            unmatched = summary.unmatched,
            "Resource matching complete"
        );
        Ok(mappings)
    }
}

/// Two declarations resolving to the same node are both unmatched: neither
/// can claim it, and the rest of the batch is unaffected.
pub fn release_shared_targets(mappings: &mut [ResourceMapping]) {
    let mut claims: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, mapping) in mappings.iter().enumerate() {
        if let Some(node_id) = mapping.graph_node_id() {
            claims.entry(node_id.to_string()).or_default().push(i);
        }
    }

    for (node_id, indices) in claims.into_iter().filter(|(_, c)| c.len() > 1) {
        let addresses: Vec<&str> = indices
            .iter()
            .map(|&i| mappings[i].resource().address())
            .collect();
        let reason = format!(
            "ambiguous: {} declarations resolve to node {}: {}",
            indices.len(),
            node_id,
            addresses.join(", ")
        );
        debug!(node = %node_id, declarations = indices.len(), "Releasing shared match target");
        for &i in &indices {
            let resource = mappings[i].resource().clone();
            mappings[i] =
                ResourceMapping::unmatched(resource, reason.clone(), vec![node_id.clone()]);
        }
    }
}

/// The declared containing group, following `${kind.name.name}` references
/// to other parsed resources.
fn declared_group(
    resource: &ParsedResource,
    names_by_address: &HashMap<&str, &str>,
) -> Option<String> {
    let raw = resource
        .string_attribute("resource_group_name")
        .or_else(|| resource.string_attribute("resource_group"))?;
    if !is_expression(raw) {
        return Some(raw.to_string());
    }
    let inner = &raw[2..raw.len() - 1];
    let (address, attribute) = inner.rsplit_once('.')?;
    if attribute != "name" {
        return None;
    }
    names_by_address.get(address).map(|name| name.to_string())
}
