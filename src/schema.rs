//! Schema Registry
//!
//! Static declaration of the Digital Product Passport record shape. The
//! registry is the single source of truth for both the mapping resolver
//! (which targets exist) and the record builder (how a cell is coerced and
//! where the value lands).
//!
//! ```text
//! Schema
//! ├── metadata            (group, required)
//! │   ├── backupReference : url
//! │   └── ...
//! ├── characteristics     (group)
//! │   ├── physicalDimension
//! │   │   └── weight { value : number, unit : text }
//! │   └── lifespan[]      (repeated)
//! └── ...
//! ```
//!
//! Targets are dotted paths. A top-level group name on its own is also a
//! valid target: the raw cell is stored as the group's text value.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;

use self::FieldKind::{Boolean, Date, Integer, Number, Text, Url};

// ============================================================================
// FIELD KINDS
// ============================================================================

/// Primitive type of a leaf field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Number,
    Integer,
    Boolean,
    Url,
    Date,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Number => "number",
            FieldKind::Integer => "integer",
            FieldKind::Boolean => "boolean",
            FieldKind::Url => "url",
            FieldKind::Date => "date",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// DECLARATION TREE
// ============================================================================

/// A node in the schema declaration tree
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
    /// Scalar leaf
    Field(FieldKind),
    /// Repeated scalar leaf (cell holds `;`-separated items)
    List(FieldKind),
    /// Nested object
    Group(Vec<SchemaEntry>),
    /// Ordered sequence of sub-records
    Repeated(Vec<SchemaEntry>),
}

/// Named child of a group
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaEntry {
    pub name: &'static str,
    pub node: SchemaNode,
}

/// Top-level group of the record
#[derive(Debug, Clone, PartialEq)]
pub struct GroupDef {
    pub name: &'static str,
    /// Only consulted under the strict mapping policy
    pub required: bool,
    pub children: Vec<SchemaEntry>,
}

pub fn field(name: &'static str, kind: FieldKind) -> SchemaEntry {
    SchemaEntry {
        name,
        node: SchemaNode::Field(kind),
    }
}

pub fn list(name: &'static str, kind: FieldKind) -> SchemaEntry {
    SchemaEntry {
        name,
        node: SchemaNode::List(kind),
    }
}

pub fn group(name: &'static str, children: Vec<SchemaEntry>) -> SchemaEntry {
    SchemaEntry {
        name,
        node: SchemaNode::Group(children),
    }
}

pub fn repeated(name: &'static str, children: Vec<SchemaEntry>) -> SchemaEntry {
    SchemaEntry {
        name,
        node: SchemaNode::Repeated(children),
    }
}

// ============================================================================
// RESOLVED TARGETS
// ============================================================================

/// One step on the way from the record root to a leaf
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Container {
    pub name: String,
    /// Sequence containers are filled at element 0
    pub sequence: bool,
}

/// What a mapping target writes into the record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum TargetShape {
    /// Whole group receives the raw cell as text
    WholeGroup { group: String },
    /// Typed leaf below one or more containers
    Leaf {
        containers: Vec<Container>,
        name: String,
        kind: FieldKind,
        list: bool,
    },
}

impl TargetShape {
    /// Top-level group the target belongs to
    pub fn group(&self) -> &str {
        match self {
            TargetShape::WholeGroup { group } => group,
            TargetShape::Leaf { containers, .. } => containers
                .first()
                .map(|c| c.name.as_str())
                .unwrap_or_default(),
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            TargetShape::WholeGroup { .. } => FieldKind::Text,
            TargetShape::Leaf { kind, .. } => *kind,
        }
    }
}

/// Leaf path with its declared type, as exposed to mapping UIs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldInfo {
    pub path: String,
    pub kind: FieldKind,
    pub list: bool,
    /// True when the path crosses a repeated structure
    pub repeated: bool,
}

/// A group with every leaf below it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupFields {
    pub name: String,
    pub required: bool,
    pub fields: Vec<FieldInfo>,
}

// ============================================================================
// SCHEMA
// ============================================================================

/// Ordered, validated set of groups with a path index
#[derive(Debug, Clone)]
pub struct Schema {
    groups: Vec<GroupDef>,
    targets: Vec<(String, TargetShape)>,
    index: HashMap<String, usize>,
    /// `a.weight` -> index of `a.weight.value` for measured quantities
    shorthand: HashMap<String, usize>,
}

impl Schema {
    /// Build a schema, checking group and path uniqueness
    pub fn new(groups: Vec<GroupDef>) -> Result<Self, SchemaError> {
        let mut targets = Vec::new();
        let mut index = HashMap::new();

        for def in &groups {
            if index.contains_key(def.name) {
                return Err(SchemaError::DuplicateGroup {
                    group: def.name.to_string(),
                });
            }
            index.insert(def.name.to_string(), targets.len());
            targets.push((
                def.name.to_string(),
                TargetShape::WholeGroup {
                    group: def.name.to_string(),
                },
            ));

            let root = vec![Container {
                name: def.name.to_string(),
                sequence: false,
            }];
            let mut leaves = Vec::new();
            collect_leaves(&def.children, def.name, &root, &mut leaves);

            for (path, shape) in leaves {
                if index.contains_key(&path) {
                    return Err(SchemaError::DuplicatePath {
                        group: def.name.to_string(),
                        path,
                    });
                }
                index.insert(path.clone(), targets.len());
                targets.push((path, shape));
            }
        }

        let shorthand = targets
            .iter()
            .enumerate()
            .filter_map(|(i, (path, shape))| match shape {
                TargetShape::Leaf {
                    containers, name, ..
                } if name == "value"
                    && containers.len() > 1
                    && containers.last().is_some_and(|c| !c.sequence) =>
                {
                    let parent = path.strip_suffix(".value")?;
                    (!index.contains_key(parent)).then(|| (parent.to_string(), i))
                }
                _ => None,
            })
            .collect();

        Ok(Self {
            groups,
            targets,
            index,
            shorthand,
        })
    }

    /// Ordered groups with their leaf paths and declared types
    pub fn fields(&self) -> Vec<GroupFields> {
        self.groups
            .iter()
            .map(|def| GroupFields {
                name: def.name.to_string(),
                required: def.required,
                fields: self
                    .targets
                    .iter()
                    .filter_map(|(path, shape)| match shape {
                        TargetShape::Leaf {
                            containers,
                            kind,
                            list,
                            ..
                        } if containers[0].name == def.name => Some(FieldInfo {
                            path: path.clone(),
                            kind: *kind,
                            list: *list,
                            repeated: containers.iter().any(|c| c.sequence),
                        }),
                        _ => None,
                    })
                    .collect(),
            })
            .collect()
    }

    pub fn groups(&self) -> &[GroupDef] {
        &self.groups
    }

    pub fn group_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.groups.iter().map(|g| g.name)
    }

    pub fn group(&self, name: &str) -> Option<&GroupDef> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// Shape of a mapping target, `None` for anything that is neither a
    /// top-level group nor a leaf path.
    ///
    /// A `{ value, unit }` quantity may be named without its `.value` suffix:
    /// `characteristics.physicalDimension.weight` writes the weight value.
    pub fn lookup(&self, target: &str) -> Option<&TargetShape> {
        self.ordinal(target).map(|i| &self.targets[i].1)
    }

    /// Declaration order of a target, used to order resolved mappings
    pub fn ordinal(&self, target: &str) -> Option<usize> {
        self.index
            .get(target)
            .or_else(|| self.shorthand.get(target))
            .copied()
    }

    /// Declared path a target writes to
    pub fn canonical_path(&self, target: &str) -> Option<&str> {
        self.ordinal(target).map(|i| self.targets[i].0.as_str())
    }

    /// Number of addressable targets (groups plus leaves)
    pub fn target_count(&self) -> usize {
        self.targets.len()
    }
}

fn collect_leaves(
    entries: &[SchemaEntry],
    prefix: &str,
    containers: &[Container],
    out: &mut Vec<(String, TargetShape)>,
) {
    for entry in entries {
        let path = format!("{}.{}", prefix, entry.name);
        match &entry.node {
            SchemaNode::Field(kind) | SchemaNode::List(kind) => out.push((
                path,
                TargetShape::Leaf {
                    containers: containers.to_vec(),
                    name: entry.name.to_string(),
                    kind: *kind,
                    list: matches!(entry.node, SchemaNode::List(_)),
                },
            )),
            SchemaNode::Group(children) | SchemaNode::Repeated(children) => {
                let mut nested = containers.to_vec();
                nested.push(Container {
                    name: entry.name.to_string(),
                    sequence: matches!(entry.node, SchemaNode::Repeated(_)),
                });
                collect_leaves(children, &path, &nested, out);
            }
        }
    }
}

// ============================================================================
// DIGITAL PRODUCT PASSPORT
// ============================================================================

/// The built-in passport schema
pub fn dpp_schema() -> &'static Schema {
    static SCHEMA: OnceLock<Schema> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        Schema::new(dpp_groups()).expect("built-in passport schema declares unique paths")
    })
}

fn value_unit(name: &'static str) -> SchemaEntry {
    group(name, vec![field("value", Number), field("unit", Text)])
}

fn key_values(name: &'static str) -> SchemaEntry {
    repeated(name, vec![field("value", Text), field("key", Text)])
}

fn type_identification(name: &'static str, sequence: bool) -> SchemaEntry {
    let children = vec![
        field("manufacturerPartId", Text),
        field("nameAtManufacturer", Text),
    ];
    if sequence {
        repeated(name, children)
    } else {
        group(name, children)
    }
}

fn documentation(name: &'static str) -> SchemaEntry {
    repeated(
        name,
        vec![
            field("contentType", Text),
            field("header", Text),
            field("content", Url),
        ],
    )
}

fn facilities(name: &'static str) -> SchemaEntry {
    repeated(name, vec![field("facility", Text)])
}

fn material_ids() -> SchemaEntry {
    repeated(
        "id",
        vec![field("type", Text), field("name", Text), field("id", Text)],
    )
}

fn footprint(name: &'static str) -> SchemaEntry {
    repeated(
        name,
        vec![
            field("lifecycle", Text),
            documentation("rulebook"),
            field("unit", Text),
            field("performanceClass", Text),
            facilities("manufacturingPlant"),
            field("type", Text),
            field("value", Number),
            documentation("declaration"),
        ],
    )
}

fn additional_data_type() -> SchemaEntry {
    group(
        "type",
        vec![field("typeUnit", Text), field("dataType", Text)],
    )
}

fn dpp_groups() -> Vec<GroupDef> {
    vec![
        GroupDef {
            name: "metadata",
            required: true,
            children: vec![
                field("backupReference", Url),
                field("registrationIdentifier", Url),
                field("economicOperatorId", Text),
                field("lastModification", Date),
                field("predecessor", Text),
                field("issueDate", Date),
                field("version", Text),
                field("passportIdentifier", Text),
                field("status", Text),
                field("expirationDate", Date),
            ],
        },
        GroupDef {
            name: "characteristics",
            required: false,
            children: vec![
                field("generalPerformanceClass", Text),
                field("physicalState", Text),
                group(
                    "physicalDimension",
                    vec![
                        value_unit("volume"),
                        value_unit("grossWeight"),
                        value_unit("diameter"),
                        value_unit("grossVolume"),
                        value_unit("width"),
                        value_unit("length"),
                        value_unit("weight"),
                        value_unit("height"),
                    ],
                ),
                repeated(
                    "lifespan",
                    vec![
                        field("value", Integer),
                        field("unit", Text),
                        field("key", Text),
                    ],
                ),
            ],
        },
        GroupDef {
            name: "commercial",
            required: false,
            children: vec![field("placedOnMarket", Text), list("purpose", Text)],
        },
        GroupDef {
            name: "identification",
            required: true,
            children: vec![
                key_values("batch"),
                key_values("codes"),
                type_identification("type", false),
                repeated(
                    "classification",
                    vec![
                        field("classificationStandard", Text),
                        field("classificationID", Text),
                        field("classificationDescription", Text),
                    ],
                ),
                key_values("serial"),
                group(
                    "dataCarrier",
                    vec![field("carrierType", Text), field("carrierLayout", Text)],
                ),
            ],
        },
        GroupDef {
            name: "sources",
            required: false,
            children: vec![
                field("header", Text),
                field("category", Text),
                field("type", Text),
                field("content", Url),
            ],
        },
        GroupDef {
            name: "materials",
            required: false,
            children: vec![
                group(
                    "substancesOfConcern",
                    vec![
                        field("applicable", Boolean),
                        repeated(
                            "content",
                            vec![
                                field("unit", Text),
                                group(
                                    "hazardClassification",
                                    vec![
                                        field("category", Text),
                                        field("statement", Text),
                                        field("class", Text),
                                    ],
                                ),
                                documentation("documentation"),
                                repeated(
                                    "concentrationRange",
                                    vec![field("max", Number), field("min", Number)],
                                ),
                                field("location", Text),
                                field("concentration", Number),
                                field("exemption", Text),
                                material_ids(),
                            ],
                        ),
                    ],
                ),
                group(
                    "materialComposition",
                    vec![
                        field("applicable", Boolean),
                        repeated(
                            "content",
                            vec![
                                field("unit", Text),
                                field("recycled", Number),
                                field("critical", Boolean),
                                field("renewable", Number),
                                documentation("documentation"),
                                field("concentration", Number),
                                material_ids(),
                            ],
                        ),
                    ],
                ),
            ],
        },
        GroupDef {
            name: "handling",
            required: false,
            children: vec![
                field("applicable", Boolean),
                group(
                    "content",
                    vec![key_values("producer"), type_identification("sparePart", true)],
                ),
            ],
        },
        GroupDef {
            name: "additionalData",
            required: false,
            children: vec![
                field("description", Text),
                field("label", Text),
                additional_data_type(),
                field("data", Text),
                repeated(
                    "children",
                    vec![
                        field("description", Text),
                        field("label", Text),
                        additional_data_type(),
                        field("data", Text),
                    ],
                ),
            ],
        },
        GroupDef {
            name: "operation",
            required: false,
            children: vec![
                group(
                    "import",
                    vec![
                        field("applicable", Boolean),
                        group("content", vec![field("eori", Text), field("id", Text)]),
                    ],
                ),
                group("other", vec![field("id", Text), field("role", Text)]),
                group(
                    "manufacturer",
                    vec![
                        facilities("facility"),
                        field("manufacturingDate", Date),
                        field("manufacturer", Text),
                    ],
                ),
            ],
        },
        GroupDef {
            name: "sustainability",
            required: false,
            children: vec![
                field("reparabilityScore", Text),
                group(
                    "productFootprint",
                    vec![
                        footprint("material"),
                        footprint("carbon"),
                        footprint("environmental"),
                    ],
                ),
                field("status", Text),
                field("durabilityScore", Text),
            ],
        },
    ]
}
