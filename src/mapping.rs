//! Field Mapping Resolver
//!
//! Validates an operator-supplied `target -> column` mapping once per upload
//! session, before any row is touched. Every problem is collected so the
//! operator sees the full list instead of fixing typos one at a time.
//!
//! Unmapped groups are a policy decision, not an accident:
//! - `Lenient` leaves them `null` in every record and lists them in
//!   [`ResolvedMapping::unmapped_groups`]
//! - `Strict` rejects the mapping with [`MappingError::UnmappedGroup`]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::MappingError;
use crate::schema::{Schema, TargetShape};

/// How groups absent from a mapping are treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingPolicy {
    #[default]
    Lenient,
    Strict,
}

/// Operator mapping: schema target (group name or dotted leaf path) to source
/// column. `None` or a blank column means unmapped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMapping {
    entries: BTreeMap<String, Option<String>>,
}

impl FieldMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, target: impl Into<String>, column: impl Into<String>) -> Self {
        self.insert(target, column);
        self
    }

    pub fn insert(&mut self, target: impl Into<String>, column: impl Into<String>) {
        self.entries.insert(target.into(), Some(column.into()));
    }

    /// Record a target as explicitly unmapped
    pub fn unmap(&mut self, target: impl Into<String>) {
        self.entries.insert(target.into(), None);
    }

    /// Mapped entries with trimmed, non-blank columns
    pub fn mapped(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().filter_map(|(target, column)| {
            column
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(|c| (target.trim(), c))
        })
    }

    pub fn len(&self) -> usize {
        self.mapped().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Into<String>, C: Into<String>> FromIterator<(T, C)> for FieldMapping {
    fn from_iter<I: IntoIterator<Item = (T, C)>>(iter: I) -> Self {
        let mut mapping = FieldMapping::new();
        for (target, column) in iter {
            mapping.insert(target, column);
        }
        mapping
    }
}

/// A validated target with its column position
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedTarget {
    pub target: String,
    pub group: String,
    pub column: String,
    pub column_index: usize,
    pub shape: TargetShape,
}

/// Mapping ready for row processing, targets in schema order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedMapping {
    policy: MappingPolicy,
    targets: Vec<ResolvedTarget>,
    unmapped_groups: Vec<String>,
}

impl ResolvedMapping {
    pub fn policy(&self) -> MappingPolicy {
        self.policy
    }

    pub fn targets(&self) -> &[ResolvedTarget] {
        &self.targets
    }

    /// Groups whose fields will stay absent in every record
    pub fn unmapped_groups(&self) -> &[String] {
        &self.unmapped_groups
    }

    pub fn target(&self, name: &str) -> Option<&ResolvedTarget> {
        self.targets.iter().find(|t| t.target == name)
    }
}

/// Resolve a mapping against the source header and the schema
pub fn resolve(
    mapping: &FieldMapping,
    columns: &[String],
    schema: &Schema,
    policy: MappingPolicy,
) -> Result<ResolvedMapping, Vec<MappingError>> {
    let mut errors = Vec::new();
    // (target, declared path, column)
    let mut known: Vec<(&str, &str, &str)> = Vec::new();
    let mut targets = Vec::new();

    for (target, column) in mapping.mapped() {
        let (Some(shape), Some(path)) = (schema.lookup(target), schema.canonical_path(target))
        else {
            errors.push(MappingError::UnknownTarget {
                target: target.to_string(),
            });
            continue;
        };
        known.push((target, path, column));

        let positions: Vec<usize> = columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.as_str() == column)
            .map(|(i, _)| i)
            .collect();

        match positions.as_slice() {
            [] => errors.push(MappingError::UnknownColumn {
                group: target.to_string(),
                column: column.to_string(),
            }),
            [index] => targets.push(ResolvedTarget {
                target: target.to_string(),
                group: shape.group().to_string(),
                column: column.to_string(),
                column_index: *index,
                shape: shape.clone(),
            }),
            many => errors.push(MappingError::AmbiguousMapping {
                group: target.to_string(),
                column: column.to_string(),
                reason: format!("header '{}' appears {} times", column, many.len()),
            }),
        }
    }

    check_overlaps(&known, &mut errors);

    let mut unmapped_groups = Vec::new();
    for group in schema.group_names() {
        let covered = known.iter().any(|(_, path, _)| covers(group, path));
        if covered {
            continue;
        }
        match policy {
            MappingPolicy::Strict => errors.push(MappingError::UnmappedGroup {
                group: group.to_string(),
            }),
            MappingPolicy::Lenient => unmapped_groups.push(group.to_string()),
        }
    }

    if !errors.is_empty() {
        for error in &errors {
            debug!(target_name = error.target(), %error, "mapping target rejected");
        }
        return Err(errors);
    }

    targets.sort_by_key(|t| schema.ordinal(&t.target));

    info!(
        targets = targets.len(),
        unmapped = unmapped_groups.len(),
        ?policy,
        "field mapping resolved"
    );

    Ok(ResolvedMapping {
        policy,
        targets,
        unmapped_groups,
    })
}

/// True if `target` is `group` itself or a path below it
fn covers(group: &str, target: &str) -> bool {
    target == group
        || target
            .strip_prefix(group)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// Two targets that write the same slot (a whole group and a path below it,
/// or a quantity shorthand and its `.value`) are rejected as a pair.
fn check_overlaps(known: &[(&str, &str, &str)], errors: &mut Vec<MappingError>) {
    for (i, (outer, outer_path, _)) in known.iter().enumerate() {
        for (j, (inner, inner_path, column)) in known.iter().enumerate() {
            let overlaps = if outer_path == inner_path {
                i < j
            } else {
                covers(outer_path, inner_path)
            };
            if overlaps {
                errors.push(MappingError::AmbiguousMapping {
                    group: inner.to_string(),
                    column: column.to_string(),
                    reason: format!("overlaps with the mapping for '{}'", outer),
                });
            }
        }
    }
}
