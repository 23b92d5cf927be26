//! Schema registry: one fixed descriptor per extraction kind.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::ContractViolation;
use crate::filing::types::SectionKind;

/// Extraction task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaKind {
    Competitors,
    Cybersecurity,
    RiskSummary,
    BusinessOverview,
    AiAnalysis,
}

impl SchemaKind {
    pub const ALL: [SchemaKind; 5] = [
        SchemaKind::Competitors,
        SchemaKind::Cybersecurity,
        SchemaKind::RiskSummary,
        SchemaKind::BusinessOverview,
        SchemaKind::AiAnalysis,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SchemaKind::Competitors => "competitors",
            SchemaKind::Cybersecurity => "cybersecurity",
            SchemaKind::RiskSummary => "risk_summary",
            SchemaKind::BusinessOverview => "business_overview",
            SchemaKind::AiAnalysis => "ai_analysis",
        }
    }

    pub fn descriptor(self) -> &'static SchemaDescriptor {
        match self {
            SchemaKind::Competitors => &COMPETITORS,
            SchemaKind::Cybersecurity => &CYBERSECURITY,
            SchemaKind::RiskSummary => &RISK_SUMMARY,
            SchemaKind::BusinessOverview => &BUSINESS_OVERVIEW,
            SchemaKind::AiAnalysis => &AI_ANALYSIS,
        }
    }
}

impl fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        SchemaKind::ALL
            .into_iter()
            .find(|k| k.as_str() == wanted)
            .ok_or_else(|| {
                let known: Vec<&str> = SchemaKind::ALL.iter().map(|k| k.as_str()).collect();
                format!("unknown schema kind '{}' (known: {})", s, known.join(", "))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldType {
    String,
    Integer,
    Boolean,
    Array(&'static FieldType),
    Object(&'static [FieldDef]),
}

impl FieldType {
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::Array(_) => "array",
            FieldType::Object(_) => "object",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldDef {
    pub name: &'static str,
    pub ty: FieldType,
    pub required: bool,
    pub description: &'static str,
}

const fn req(name: &'static str, ty: FieldType, description: &'static str) -> FieldDef {
    FieldDef {
        name,
        ty,
        required: true,
        description,
    }
}

const fn opt(name: &'static str, ty: FieldType, description: &'static str) -> FieldDef {
    FieldDef {
        name,
        ty,
        required: false,
        description,
    }
}

/// One source section feeding a schema, with its character budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcePolicy {
    pub section: SectionKind,
    pub budget: usize,
    /// Without a required source the schema is skipped even if other
    /// sources are present.
    pub required: bool,
}

/// Immutable description of one extraction kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchemaDescriptor {
    pub kind: SchemaKind,
    pub instructions: &'static str,
    pub fields: &'static [FieldDef],
    /// Sources in the order their text is concatenated.
    pub sources: &'static [SourcePolicy],
}

impl SchemaDescriptor {
    /// Upper bound on request text length, in chars.
    pub fn total_budget(&self) -> usize {
        self.sources.iter().map(|s| s.budget).sum()
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &'static FieldDef> {
        self.fields.iter().filter(|f| f.required)
    }

    /// Validate the descriptor itself. A failure here is a programming error.
    pub fn check(&self) -> Result<(), ContractViolation> {
        let malformed = |reason: String| ContractViolation::MalformedDescriptor {
            kind: self.kind.to_string(),
            reason,
        };

        if self.instructions.trim().is_empty() {
            return Err(malformed("empty instructions".to_string()));
        }
        if self.sources.is_empty() {
            return Err(malformed("no source sections".to_string()));
        }
        let mut seen = HashSet::new();
        for source in self.sources {
            if source.budget == 0 {
                return Err(malformed(format!("zero budget for {}", source.section)));
            }
            if !seen.insert(source.section) {
                return Err(malformed(format!("duplicate source {}", source.section)));
            }
        }
        check_fields(self.fields, "").map_err(malformed)
    }

    /// Example-shaped schema shown to the model in the prompt.
    pub fn schema_hint(&self) -> Value {
        object_hint(self.fields)
    }

    /// JSON Schema used to constrain gateway output.
    pub fn json_schema(&self) -> Value {
        object_schema(self.fields)
    }
}

fn check_fields(fields: &[FieldDef], path: &str) -> Result<(), String> {
    if fields.is_empty() {
        return Err(format!("object{} has no fields", at(path)));
    }
    let mut names = HashSet::new();
    for field in fields {
        if field.name.is_empty() {
            return Err(format!("unnamed field{}", at(path)));
        }
        if !names.insert(field.name) {
            return Err(format!("duplicate field '{}'{}", field.name, at(path)));
        }
        let child = if path.is_empty() {
            field.name.to_string()
        } else {
            format!("{}.{}", path, field.name)
        };
        check_type(&field.ty, &child)?;
    }
    Ok(())
}

fn check_type(ty: &FieldType, path: &str) -> Result<(), String> {
    match ty {
        FieldType::Array(inner) => check_type(inner, path),
        FieldType::Object(fields) => check_fields(fields, path),
        _ => Ok(()),
    }
}

fn at(path: &str) -> String {
    if path.is_empty() {
        String::new()
    } else {
        format!(" at {}", path)
    }
}

fn object_hint(fields: &[FieldDef]) -> Value {
    let mut map = Map::new();
    for field in fields {
        map.insert(field.name.to_string(), type_hint(&field.ty, field));
    }
    Value::Object(map)
}

fn type_hint(ty: &FieldType, field: &FieldDef) -> Value {
    match ty {
        FieldType::Array(inner) => json!([type_hint(inner, field)]),
        FieldType::Object(fields) => object_hint(fields),
        scalar => {
            let mut hint = scalar.name().to_string();
            if !field.required {
                hint.push_str(" or null");
            }
            if !field.description.is_empty() {
                hint.push_str(" - ");
                hint.push_str(field.description);
            }
            Value::String(hint)
        }
    }
}

fn object_schema(fields: &[FieldDef]) -> Value {
    let properties: Map<String, Value> = fields
        .iter()
        .map(|f| {
            let mut schema = type_schema(&f.ty);
            if !f.required {
                schema = json!({ "anyOf": [schema, { "type": "null" }] });
            }
            (f.name.to_string(), schema)
        })
        .collect();
    let required: Vec<&str> = fields.iter().filter(|f| f.required).map(|f| f.name).collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn type_schema(ty: &FieldType) -> Value {
    match ty {
        FieldType::Array(inner) => json!({ "type": "array", "items": type_schema(inner) }),
        FieldType::Object(fields) => object_schema(fields),
        scalar => json!({ "type": scalar.name() }),
    }
}

// ── Registry ────────────────────────────────────────────────────────────────

const STRINGS: FieldType = FieldType::Array(&FieldType::String);

const COMPETITOR_FIELDS: &[FieldDef] = &[
    req("name", FieldType::String, "company name"),
    req(
        "categories",
        STRINGS,
        "GPU, CPU, Cloud, Networking, Automotive, or SoC",
    ),
];

static COMPETITORS: SchemaDescriptor = SchemaDescriptor {
    kind: SchemaKind::Competitors,
    instructions: "Extract competitors and competitive factors from this Competition section of an SEC 10-K filing.",
    fields: &[
        req(
            "competitors",
            FieldType::Array(&FieldType::Object(COMPETITOR_FIELDS)),
            "",
        ),
        req("competitive_factors", STRINGS, "key competitive factors mentioned"),
    ],
    sources: &[SourcePolicy {
        section: SectionKind::Competition,
        budget: 6_000,
        required: true,
    }],
};

static CYBERSECURITY: SchemaDescriptor = SchemaDescriptor {
    kind: SchemaKind::Cybersecurity,
    instructions: "Extract cybersecurity governance and risk management information from this SEC 10-K filing section.",
    fields: &[
        req("frameworks", STRINGS, "security frameworks mentioned"),
        req("has_cso", FieldType::Boolean, "whether a CISO/CSO role exists"),
        opt("cso_reports_to", FieldType::String, "who the CSO reports to"),
        opt("cso_experience_years", FieldType::Integer, "years of CSO experience"),
        req(
            "board_oversight",
            FieldType::String,
            "which committee oversees cybersecurity",
        ),
        req("has_incident_response_team", FieldType::Boolean, ""),
        req("has_vendor_risk_process", FieldType::Boolean, ""),
        req("key_practices", STRINGS, "key cybersecurity practices mentioned"),
    ],
    sources: &[SourcePolicy {
        section: SectionKind::Cybersecurity,
        budget: 10_000,
        required: true,
    }],
};

const RISK_FIELDS: &[FieldDef] = &[
    req("title", FieldType::String, "brief risk title"),
    req("category", FieldType::String, "which category"),
];

static RISK_SUMMARY: SchemaDescriptor = SchemaDescriptor {
    kind: SchemaKind::RiskSummary,
    instructions: "Extract the risk categories and individual risks from this Risk Factors section of an SEC 10-K filing.",
    fields: &[
        req("risk_categories", STRINGS, "high-level categories"),
        req("risks", FieldType::Array(&FieldType::Object(RISK_FIELDS)), ""),
    ],
    sources: &[SourcePolicy {
        section: SectionKind::RiskFactors,
        budget: 15_000,
        required: true,
    }],
};

const SEGMENT_FIELDS: &[FieldDef] = &[
    req("name", FieldType::String, ""),
    req("description", FieldType::String, "brief description"),
];

static BUSINESS_OVERVIEW: SchemaDescriptor = SchemaDescriptor {
    kind: SchemaKind::BusinessOverview,
    instructions: "Extract business overview information from this SEC 10-K Business section.",
    fields: &[
        req("company_description", FieldType::String, "one sentence description"),
        req(
            "business_segments",
            FieldType::Array(&FieldType::Object(SEGMENT_FIELDS)),
            "",
        ),
        req("markets", STRINGS, "market names"),
        opt("employee_count", FieldType::Integer, ""),
        req("headquarters", FieldType::String, ""),
        req("key_technologies", STRINGS, "core technologies mentioned"),
    ],
    sources: &[SourcePolicy {
        section: SectionKind::Business,
        budget: 8_000,
        required: true,
    }],
};

const AI_PRODUCT_FIELDS: &[FieldDef] = &[
    req("name", FieldType::String, "product or service name"),
    opt("description", FieldType::String, ""),
    opt("monetization", FieldType::String, "how it makes money"),
];

const AI_RISK_FIELDS: &[FieldDef] = &[
    req("risk", FieldType::String, "AI-specific risk"),
    opt("category", FieldType::String, "regulatory, competitive, operational, ethical"),
];

const AI_INVESTMENT_FIELDS: &[FieldDef] = &[
    opt("infrastructure_mentions", FieldType::String, "compute and data center investment"),
    opt("partnerships", STRINGS, ""),
    opt("acquisitions", STRINGS, ""),
];

const AI_POSITION_FIELDS: &[FieldDef] = &[
    opt("claimed_advantages", STRINGS, ""),
    opt("named_competitors", STRINGS, ""),
    opt("market_position_claim", FieldType::String, ""),
];

const AI_METRIC_FIELDS: &[FieldDef] = &[
    opt("revenue_mentions", FieldType::String, "AI-attributed revenue"),
    opt("adoption_metrics", FieldType::String, ""),
    opt("other_kpis", STRINGS, ""),
];

static AI_ANALYSIS: SchemaDescriptor = SchemaDescriptor {
    kind: SchemaKind::AiAnalysis,
    instructions: "Analyze how this company positions itself on artificial intelligence in its SEC 10-K: \
        narrative stance, AI products, AI-specific risks, investments, competitive position and metrics.",
    fields: &[
        req(
            "ai_narrative_stance",
            FieldType::String,
            "opportunity-focused, risk-focused, balanced, or minimal",
        ),
        req(
            "ai_mention_count",
            FieldType::Integer,
            "approximate number of AI-related mentions",
        ),
        req(
            "ai_products_services",
            FieldType::Array(&FieldType::Object(AI_PRODUCT_FIELDS)),
            "",
        ),
        req(
            "ai_risks_disclosed",
            FieldType::Array(&FieldType::Object(AI_RISK_FIELDS)),
            "",
        ),
        opt("ai_investments", FieldType::Object(AI_INVESTMENT_FIELDS), ""),
        opt("ai_competitive_position", FieldType::Object(AI_POSITION_FIELDS), ""),
        opt("ai_metrics", FieldType::Object(AI_METRIC_FIELDS), ""),
        opt("key_ai_quotes", STRINGS, "most significant AI strategy statements"),
    ],
    sources: &[
        SourcePolicy {
            section: SectionKind::Business,
            budget: 8_000,
            required: true,
        },
        SourcePolicy {
            section: SectionKind::RiskFactors,
            budget: 6_000,
            required: false,
        },
        SourcePolicy {
            section: SectionKind::Mdna,
            budget: 6_000,
            required: false,
        },
    ],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_descriptors_are_well_formed() {
        for kind in SchemaKind::ALL {
            let descriptor = kind.descriptor();
            assert_eq!(descriptor.kind, kind);
            assert_eq!(descriptor.check(), Ok(()), "{kind}");
        }
    }

    #[test]
    fn test_schema_kind_parse() {
        assert_eq!("risk_summary".parse::<SchemaKind>(), Ok(SchemaKind::RiskSummary));
        assert_eq!(
            "Business-Overview".parse::<SchemaKind>(),
            Ok(SchemaKind::BusinessOverview)
        );
        assert!("balance_sheet".parse::<SchemaKind>().is_err());
    }

    #[test]
    fn test_total_budget_sums_sources() {
        assert_eq!(SchemaKind::AiAnalysis.descriptor().total_budget(), 20_000);
        assert_eq!(SchemaKind::RiskSummary.descriptor().total_budget(), 15_000);
    }

    #[test]
    fn test_schema_hint_shape() {
        let hint = SchemaKind::Competitors.descriptor().schema_hint();
        assert_eq!(hint["competitors"][0]["name"], "string - company name");
        assert!(hint["competitive_factors"][0]
            .as_str()
            .unwrap()
            .starts_with("string - "));

        let cyber = SchemaKind::Cybersecurity.descriptor().schema_hint();
        assert_eq!(cyber["has_cso"], "boolean - whether a CISO/CSO role exists");
        assert!(cyber["cso_reports_to"].as_str().unwrap().starts_with("string or null"));
    }

    #[test]
    fn test_json_schema_required_list() {
        let schema = SchemaKind::BusinessOverview.descriptor().json_schema();
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert!(required.contains(&"headquarters"));
        assert!(!required.contains(&"employee_count"));
        assert_eq!(schema["properties"]["markets"]["items"]["type"], "string");
    }

    #[test]
    fn test_check_rejects_duplicate_fields() {
        static BROKEN: SchemaDescriptor = SchemaDescriptor {
            kind: SchemaKind::RiskSummary,
            instructions: "x",
            fields: &[
                req("a", FieldType::String, ""),
                req("a", FieldType::Integer, ""),
            ],
            sources: &[SourcePolicy {
                section: SectionKind::RiskFactors,
                budget: 10,
                required: true,
            }],
        };
        assert!(matches!(
            BROKEN.check(),
            Err(ContractViolation::MalformedDescriptor { .. })
        ));
    }

    #[test]
    fn test_check_rejects_zero_budget() {
        static BROKEN: SchemaDescriptor = SchemaDescriptor {
            kind: SchemaKind::RiskSummary,
            instructions: "x",
            fields: &[req("a", FieldType::String, "")],
            sources: &[SourcePolicy {
                section: SectionKind::RiskFactors,
                budget: 0,
                required: true,
            }],
        };
        assert!(BROKEN.check().is_err());
    }
}
