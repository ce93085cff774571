//! Record Builder
//!
//! Turns one raw row into one passport record using a resolved mapping.
//! Every mapped field is attempted; a missing or unreadable cell is recorded
//! against its path and the row carries on. Only a structurally broken row
//! (wrong width, or a required group left empty under the strict policy) is
//! reported as unbuildable.
//!
//! Rows are independent, so [`build_batch`] fans them out with rayon and
//! collects outcomes back in input order.

use std::fmt;

use chrono::{DateTime, NaiveDate};
use rayon::prelude::*;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::info;

use crate::mapping::{MappingPolicy, ResolvedMapping, ResolvedTarget};
use crate::schema::{Container, FieldKind, Schema, TargetShape};
use crate::source::{RawRow, RowShape};

/// Separator for repeated scalar cells (`commercial.purpose`)
pub const LIST_SEPARATOR: char = ';';

// ============================================================================
// FAILURES
// ============================================================================

/// Why a single field could not be populated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("no value in column")]
    Missing,

    #[error("cannot read {value:?} as {expected}: {message}")]
    Coercion {
        expected: FieldKind,
        value: String,
        message: String,
    },
}

/// Per-field failure. Recorded, never fatal to the row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{path} (column '{column}'): {reason}")]
pub struct FieldFailure {
    pub path: String,
    pub column: String,
    pub reason: FailureReason,
}

/// Per-row failure. Fatal to the row, never to the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("row {row} (line {line}) cannot be built: {reason}")]
pub struct UnbuildableRow {
    pub row: usize,
    pub line: u64,
    pub reason: String,
    pub failures: Vec<FieldFailure>,
}

// ============================================================================
// RECORDS AND OUTCOMES
// ============================================================================

/// One populated passport. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetRecord {
    row: usize,
    document: Value,
}

impl TargetRecord {
    /// Source row the record was built from
    pub fn row(&self) -> usize {
        self.row
    }

    /// Full record with every group present (`null` when absent)
    pub fn as_json(&self) -> &Value {
        &self.document
    }

    /// Group value, `None` when the group is absent
    pub fn group(&self, name: &str) -> Option<&Value> {
        self.document.get(name).filter(|v| !v.is_null())
    }

    /// Value at a dotted path; sequences are read at element 0
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = &self.document;
        for segment in path.split('.') {
            if let Value::Array(items) = current {
                current = items.first()?;
            }
            current = current.get(segment)?;
        }
        (!current.is_null()).then_some(current)
    }

    pub fn into_json(self) -> Value {
        self.document
    }
}

impl Serialize for TargetRecord {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.document.serialize(serializer)
    }
}

/// Row status as reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "failures", rename_all = "snake_case")]
pub enum RowStatus {
    FullyBuilt,
    BuiltWithFailures(usize),
    Unbuildable,
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowStatus::FullyBuilt => write!(f, "fully built"),
            RowStatus::BuiltWithFailures(1) => write!(f, "built with 1 field failure"),
            RowStatus::BuiltWithFailures(n) => write!(f, "built with {} field failures", n),
            RowStatus::Unbuildable => write!(f, "unbuildable"),
        }
    }
}

/// Result of building a single row
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BuildOutcome {
    Built {
        record: TargetRecord,
        failures: Vec<FieldFailure>,
    },
    Unbuildable(UnbuildableRow),
}

impl BuildOutcome {
    pub fn status(&self) -> RowStatus {
        match self {
            BuildOutcome::Built { failures, .. } if failures.is_empty() => RowStatus::FullyBuilt,
            BuildOutcome::Built { failures, .. } => RowStatus::BuiltWithFailures(failures.len()),
            BuildOutcome::Unbuildable(_) => RowStatus::Unbuildable,
        }
    }

    pub fn record(&self) -> Option<&TargetRecord> {
        match self {
            BuildOutcome::Built { record, .. } => Some(record),
            BuildOutcome::Unbuildable(_) => None,
        }
    }

    pub fn failures(&self) -> &[FieldFailure] {
        match self {
            BuildOutcome::Built { failures, .. } => failures,
            BuildOutcome::Unbuildable(row) => &row.failures,
        }
    }

    pub fn row(&self) -> usize {
        match self {
            BuildOutcome::Built { record, .. } => record.row,
            BuildOutcome::Unbuildable(row) => row.row,
        }
    }
}

/// Counts over a batch of outcomes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub fully_built: usize,
    pub built_with_failures: usize,
    pub unbuildable: usize,
    pub field_failures: usize,
}

impl BatchSummary {
    pub fn from_outcomes(outcomes: &[BuildOutcome]) -> Self {
        outcomes.iter().fold(Self::default(), |mut acc, outcome| {
            acc.total += 1;
            acc.field_failures += outcome.failures().len();
            match outcome.status() {
                RowStatus::FullyBuilt => acc.fully_built += 1,
                RowStatus::BuiltWithFailures(_) => acc.built_with_failures += 1,
                RowStatus::Unbuildable => acc.unbuildable += 1,
            }
            acc
        })
    }
}

// ============================================================================
// BUILDING
// ============================================================================

/// Build one record from one row
pub fn build(row: &RawRow, mapping: &ResolvedMapping, schema: &Schema) -> BuildOutcome {
    if let RowShape::Malformed { expected, found } = row.shape() {
        return BuildOutcome::Unbuildable(UnbuildableRow {
            row: row.number(),
            line: row.line(),
            reason: format!("row has {} fields, header has {}", found, expected),
            failures: Vec::new(),
        });
    }

    let mut document = Map::new();
    for group in schema.group_names() {
        document.insert(group.to_string(), Value::Null);
    }

    let mut failures = Vec::new();
    for target in mapping.targets() {
        match populate(&mut document, row, target) {
            Ok(()) => {}
            Err(reason) => failures.push(FieldFailure {
                path: target.target.clone(),
                column: target.column.clone(),
                reason,
            }),
        }
    }

    if mapping.policy() == MappingPolicy::Strict {
        let absent = schema
            .groups()
            .iter()
            .find(|g| g.required && document.get(g.name).map_or(true, Value::is_null));
        if let Some(group) = absent {
            return BuildOutcome::Unbuildable(UnbuildableRow {
                row: row.number(),
                line: row.line(),
                reason: format!("required group '{}' is entirely absent", group.name),
                failures,
            });
        }
    }

    BuildOutcome::Built {
        record: TargetRecord {
            row: row.number(),
            document: Value::Object(document),
        },
        failures,
    }
}

/// Build every row, outcomes in input order
pub fn build_batch(rows: &[RawRow], mapping: &ResolvedMapping, schema: &Schema) -> Vec<BuildOutcome> {
    let outcomes: Vec<BuildOutcome> = rows
        .par_iter()
        .map(|row| build(row, mapping, schema))
        .collect();

    let summary = BatchSummary::from_outcomes(&outcomes);
    info!(
        rows = summary.total,
        fully_built = summary.fully_built,
        built_with_failures = summary.built_with_failures,
        unbuildable = summary.unbuildable,
        field_failures = summary.field_failures,
        "record batch built"
    );
    outcomes
}

fn populate(
    document: &mut Map<String, Value>,
    row: &RawRow,
    target: &ResolvedTarget,
) -> Result<(), FailureReason> {
    let raw = row.cell(target.column_index).ok_or(FailureReason::Missing)?;

    match &target.shape {
        TargetShape::WholeGroup { group } => {
            document.insert(group.clone(), Value::String(raw.to_string()));
        }
        TargetShape::Leaf {
            containers,
            name,
            kind,
            list,
        } => {
            let value = if *list {
                coerce_list(*kind, raw)?
            } else {
                coerce(*kind, raw)?
            };
            insert_at(document, containers, name, value);
        }
    }
    Ok(())
}

/// Write `value` under `containers`, creating objects and one-element
/// sequences on the way
fn insert_at(document: &mut Map<String, Value>, containers: &[Container], leaf: &str, value: Value) {
    let mut slot = document;
    for container in containers {
        let entry = slot.entry(container.name.clone()).or_insert(Value::Null);
        let object = if container.sequence {
            if !entry.is_array() {
                *entry = Value::Array(Vec::new());
            }
            let items = entry.as_array_mut().expect("entry was set to an array");
            if items.is_empty() {
                items.push(Value::Object(Map::new()));
            }
            &mut items[0]
        } else {
            entry
        };
        if !object.is_object() {
            *object = Value::Object(Map::new());
        }
        slot = object.as_object_mut().expect("slot was set to an object");
    }
    slot.insert(leaf.to_string(), value);
}

// ============================================================================
// COERCION
// ============================================================================

/// Coerce a raw cell to the declared kind
pub fn coerce(kind: FieldKind, raw: &str) -> Result<Value, FailureReason> {
    let fail = |message: String| FailureReason::Coercion {
        expected: kind,
        value: raw.to_string(),
        message,
    };

    match kind {
        FieldKind::Text => Ok(Value::String(raw.to_string())),
        FieldKind::Number => {
            let n: f64 = raw.parse().map_err(|e: std::num::ParseFloatError| fail(e.to_string()))?;
            serde_json::Number::from_f64(n)
                .map(Value::Number)
                .ok_or_else(|| fail("number is not finite".to_string()))
        }
        FieldKind::Integer => raw
            .parse::<i64>()
            .map(Value::from)
            .map_err(|e| fail(e.to_string())),
        FieldKind::Boolean => parse_bool(raw)
            .map(Value::Bool)
            .ok_or_else(|| fail("expected true/false, yes/no or 1/0".to_string())),
        FieldKind::Url => {
            let url = url::Url::parse(raw).map_err(|e| fail(e.to_string()))?;
            if !matches!(url.scheme(), "http" | "https") || url.host().is_none() {
                return Err(fail("expected an absolute http(s) URL".to_string()));
            }
            Ok(Value::String(url.to_string()))
        }
        FieldKind::Date => parse_date(raw)
            .map(Value::String)
            .ok_or_else(|| fail("expected YYYY-MM-DD or an RFC 3339 timestamp".to_string())),
    }
}

/// Coerce a `;`-separated cell item by item; any bad item fails the field
pub fn coerce_list(kind: FieldKind, raw: &str) -> Result<Value, FailureReason> {
    let items: Vec<&str> = raw
        .split(LIST_SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if items.is_empty() {
        return Err(FailureReason::Missing);
    }
    items
        .into_iter()
        .map(|item| coerce(kind, item))
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array)
}

fn parse_bool(raw: &str) -> Option<bool> {
    const TRUE: [&str; 4] = ["true", "yes", "y", "1"];
    const FALSE: [&str; 4] = ["false", "no", "n", "0"];
    if TRUE.iter().any(|t| raw.eq_ignore_ascii_case(t)) {
        Some(true)
    } else if FALSE.iter().any(|f| raw.eq_ignore_ascii_case(f)) {
        Some(false)
    } else {
        None
    }
}

fn parse_date(raw: &str) -> Option<String> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date.format("%Y-%m-%d").to_string());
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{resolve, FieldMapping};
    use crate::schema::dpp_schema;
    use crate::source::load_bytes;
    use crate::source::SourceOptions;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn build_one(csv: &str, mapping: FieldMapping, policy: MappingPolicy) -> BuildOutcome {
        let table = load_bytes("t.csv", csv.as_bytes(), &SourceOptions::default()).unwrap();
        let resolved = resolve(&mapping, table.columns(), dpp_schema(), policy).unwrap();
        build(&table.rows()[0], &resolved, dpp_schema())
    }

    #[test]
    fn test_unmapped_column_is_not_a_failure() {
        let outcome = build_one(
            "name,wt_kg\nMirror left,not-a-number\n",
            FieldMapping::new().with("identification", "name"),
            MappingPolicy::Lenient,
        );
        assert_eq!(outcome.status(), RowStatus::FullyBuilt);
        let record = outcome.record().unwrap();
        assert_eq!(record.group("identification"), Some(&json!("Mirror left")));
        assert_eq!(record.group("metadata"), None);
        assert_eq!(record.as_json()["metadata"], Value::Null);
    }

    #[test]
    fn test_coercion_failure_is_recorded_per_path() {
        let outcome = build_one(
            "name,wt_kg\nMirror left,not-a-number\n",
            FieldMapping::new().with("characteristics.physicalDimension.weight", "wt_kg"),
            MappingPolicy::Lenient,
        );
        assert_eq!(outcome.status(), RowStatus::BuiltWithFailures(1));
        assert_eq!(outcome.status().to_string(), "built with 1 field failure");
        let failure = &outcome.failures()[0];
        assert_eq!(failure.path, "characteristics.physicalDimension.weight");
        assert_eq!(failure.column, "wt_kg");
        assert!(matches!(
            failure.reason,
            FailureReason::Coercion {
                expected: FieldKind::Number,
                ..
            }
        ));
        assert_eq!(outcome.record().unwrap().group("characteristics"), None);
    }

    #[test]
    fn test_well_typed_cells_land_at_their_paths() {
        let outcome = build_one(
            "wt,unit,life,critical,backup,issued,purpose\n\
             4.25,kg,10,yes,https://example.com/backup,2024-03-01,resale; repair\n",
            FieldMapping::new()
                .with("characteristics.physicalDimension.weight.value", "wt")
                .with("characteristics.physicalDimension.weight.unit", "unit")
                .with("characteristics.lifespan.value", "life")
                .with("materials.materialComposition.content.critical", "critical")
                .with("metadata.backupReference", "backup")
                .with("metadata.issueDate", "issued")
                .with("commercial.purpose", "purpose"),
            MappingPolicy::Lenient,
        );
        assert_eq!(outcome.status(), RowStatus::FullyBuilt);
        let doc = outcome.record().unwrap().as_json();
        assert_eq!(
            doc["characteristics"],
            json!({
                "physicalDimension": {"weight": {"value": 4.25, "unit": "kg"}},
                "lifespan": [{"value": 10}]
            })
        );
        assert_eq!(
            doc["materials"]["materialComposition"]["content"],
            json!([{"critical": true}])
        );
        assert_eq!(doc["metadata"]["backupReference"], json!("https://example.com/backup"));
        assert_eq!(doc["metadata"]["issueDate"], json!("2024-03-01"));
        assert_eq!(doc["commercial"]["purpose"], json!(["resale", "repair"]));
    }

    #[test]
    fn test_missing_cells_count_as_failures() {
        let outcome = build_one(
            "name,serial,state\n,,solid\n",
            FieldMapping::new()
                .with("identification.type.nameAtManufacturer", "name")
                .with("identification.serial.value", "serial")
                .with("characteristics.physicalState", "state"),
            MappingPolicy::Lenient,
        );
        assert_eq!(outcome.status(), RowStatus::BuiltWithFailures(2));
        assert!(outcome
            .failures()
            .iter()
            .all(|f| f.reason == FailureReason::Missing));
        let record = outcome.record().unwrap();
        assert_eq!(record.get("characteristics.physicalState"), Some(&json!("solid")));
        assert_eq!(record.group("identification"), None);
    }

    #[test]
    fn test_get_reads_through_sequences() {
        let outcome = build_one(
            "k,v\nbatch-key,B-17\n",
            FieldMapping::new()
                .with("identification.batch.key", "k")
                .with("identification.batch.value", "v"),
            MappingPolicy::Lenient,
        );
        let record = outcome.record().unwrap();
        assert_eq!(record.get("identification.batch.value"), Some(&json!("B-17")));
        assert_eq!(
            record.as_json()["identification"]["batch"],
            json!([{"key": "batch-key", "value": "B-17"}])
        );
    }

    #[test]
    fn test_malformed_row_is_unbuildable() {
        let table = load_bytes(
            "t.csv",
            b"name,serial\nMirror,SN-1,extra\n",
            &SourceOptions::default(),
        )
        .unwrap();
        let resolved = resolve(
            &FieldMapping::new().with("identification", "name"),
            table.columns(),
            dpp_schema(),
            MappingPolicy::Lenient,
        )
        .unwrap();
        let outcome = build(&table.rows()[0], &resolved, dpp_schema());
        assert_eq!(outcome.status(), RowStatus::Unbuildable);
        assert!(outcome.record().is_none());
        assert_eq!(outcome.row(), 1);
    }

    #[test]
    fn test_strict_required_group_absent_is_unbuildable() {
        let groups = [
            "metadata",
            "characteristics",
            "commercial",
            "identification",
            "sources",
            "materials",
            "handling",
            "additionalData",
            "operation",
            "sustainability",
        ];
        let mapping: FieldMapping = groups.iter().map(|g| (*g, *g)).collect();
        let header = groups.join(",");

        let full = format!("{}\n{}\n", header, groups.map(|_| "x").join(","));
        assert_eq!(
            build_one(&full, mapping.clone(), MappingPolicy::Strict).status(),
            RowStatus::FullyBuilt
        );

        // identification cell empty
        let mut cells = groups.map(|_| "x");
        cells[3] = "";
        let gap = format!("{}\n{}\n", header, cells.join(","));
        let outcome = build_one(&gap, mapping.clone(), MappingPolicy::Strict);
        assert_eq!(outcome.status(), RowStatus::Unbuildable);
        assert_eq!(outcome.failures().len(), 1);

        // lenient keeps the row
        assert_eq!(
            build_one(&gap, mapping, MappingPolicy::Lenient).status(),
            RowStatus::BuiltWithFailures(1)
        );
    }

    #[test]
    fn test_coerce_rules() {
        assert_eq!(coerce(FieldKind::Integer, "42").unwrap(), json!(42));
        assert!(coerce(FieldKind::Integer, "4.2").is_err());
        assert!(coerce(FieldKind::Number, "NaN").is_err());
        assert!(coerce(FieldKind::Number, "inf").is_err());
        assert_eq!(coerce(FieldKind::Boolean, "NO").unwrap(), json!(false));
        assert!(coerce(FieldKind::Boolean, "maybe").is_err());
        assert!(coerce(FieldKind::Url, "ftp://example.com/x").is_err());
        assert!(coerce(FieldKind::Url, "not a url").is_err());
        assert_eq!(
            coerce(FieldKind::Date, "2024-01-31T10:00:00Z").unwrap(),
            json!("2024-01-31T10:00:00+00:00")
        );
        assert!(coerce(FieldKind::Date, "31/01/2024").is_err());
        assert_eq!(coerce(FieldKind::Text, " as is ").unwrap(), json!(" as is "));
    }

    #[test]
    fn test_list_with_bad_item_fails_whole_field() {
        assert!(coerce_list(FieldKind::Integer, "1;two;3").is_err());
        assert_eq!(coerce_list(FieldKind::Text, " ; ").unwrap_err(), FailureReason::Missing);
    }

    #[test]
    fn test_batch_summary_counts() {
        let table = load_bytes(
            "t.csv",
            b"name,wt\nA,1\nB,x\nC\n",
            &SourceOptions::default(),
        )
        .unwrap();
        let resolved = resolve(
            &FieldMapping::new()
                .with("identification", "name")
                .with("characteristics.physicalDimension.weight.value", "wt"),
            table.columns(),
            dpp_schema(),
            MappingPolicy::Lenient,
        )
        .unwrap();
        let outcomes = build_batch(table.rows(), &resolved, dpp_schema());
        let rows: Vec<_> = outcomes.iter().map(BuildOutcome::row).collect();
        assert_eq!(rows, vec![1, 2, 3]);
        assert_eq!(
            BatchSummary::from_outcomes(&outcomes),
            BatchSummary {
                total: 3,
                fully_built: 1,
                built_with_failures: 1,
                unbuildable: 1,
                field_failures: 1,
            }
        );
    }
}
