use crate::error::{PipelineError, Result};
use crate::structs::{Entity, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Target case for string normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Case {
    Upper,
    Lower,
}

/// One cleaning step. Rules are applied in list order, each to the output of
/// the previous one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Rule {
    /// Remove whole-record duplicates, keeping the first occurrence.
    DropDuplicates,
    /// Drop records with a null in any of `columns` (all columns when empty).
    DropNulls {
        #[serde(default)]
        columns: Vec<String>,
    },
    FillNull { column: String, value: Value },
    ToNumeric { column: String },
    /// Keep records whose value lies in `[low, high]`; nulls are dropped.
    Range { column: String, low: f64, high: f64 },
    NormalizeCase { column: String, case: Case },
    ParseDate { column: String },
    DropColumns { columns: Vec<String> },
    RenameColumns { mapping: BTreeMap<String, String> },
    /// Keep only `columns`, in the given order.
    ReorderColumns { columns: Vec<String> },
}

impl Rule {
    pub fn name(&self) -> &'static str {
        match self {
            Rule::DropDuplicates => "drop_duplicates",
            Rule::DropNulls { .. } => "drop_nulls",
            Rule::FillNull { .. } => "fill_null",
            Rule::ToNumeric { .. } => "to_numeric",
            Rule::Range { .. } => "range",
            Rule::NormalizeCase { .. } => "normalize_case",
            Rule::ParseDate { .. } => "parse_date",
            Rule::DropColumns { .. } => "drop_columns",
            Rule::RenameColumns { .. } => "rename_columns",
            Rule::ReorderColumns { .. } => "reorder_columns",
        }
    }

    /// Columns that must exist for the rule to apply.
    pub fn columns(&self) -> Vec<&str> {
        match self {
            Rule::DropDuplicates => Vec::new(),
            Rule::DropNulls { columns }
            | Rule::DropColumns { columns }
            | Rule::ReorderColumns { columns } => {
                columns.iter().map(String::as_str).collect()
            }
            Rule::FillNull { column, .. }
            | Rule::ToNumeric { column }
            | Rule::Range { column, .. }
            | Rule::NormalizeCase { column, .. }
            | Rule::ParseDate { column } => vec![column.as_str()],
            Rule::RenameColumns { mapping } => mapping.keys().map(String::as_str).collect(),
        }
    }

    pub fn to_numeric(column: &str) -> Self {
        Rule::ToNumeric {
            column: column.to_string(),
        }
    }

    pub fn fill_null(column: &str, value: impl Into<Value>) -> Self {
        Rule::FillNull {
            column: column.to_string(),
            value: value.into(),
        }
    }

    pub fn range(column: &str, low: f64, high: f64) -> Self {
        Rule::Range {
            column: column.to_string(),
            low,
            high,
        }
    }

    pub fn normalize_case(column: &str, case: Case) -> Self {
        Rule::NormalizeCase {
            column: column.to_string(),
            case,
        }
    }

    pub fn parse_date(column: &str) -> Self {
        Rule::ParseDate {
            column: column.to_string(),
        }
    }
}

/// Default rule set for an entity.
///
/// Deduplication comes last so that rows collapsed into identical records by
/// coercion and fill rules are removed in the same pass.
pub fn default_rules(entity: Entity) -> Vec<Rule> {
    match entity {
        Entity::Customer => vec![
            Rule::parse_date("JoinDate"),
            Rule::to_numeric("OpenInvoices_num"),
            Rule::fill_null("OpenInvoices_num", 0i64),
            Rule::fill_null("RetentionCategory_Cat", "Unknown"),
            Rule::normalize_case("Region", Case::Upper),
            Rule::DropDuplicates,
        ],
        Entity::Product => vec![
            Rule::to_numeric("UnitPrice"),
            Rule::range("UnitPrice", 0.0, 10_000.0),
            Rule::to_numeric("RestockTime_days_num"),
            Rule::fill_null("Category", "Unknown"),
            Rule::normalize_case("Category", Case::Lower),
            Rule::DropDuplicates,
        ],
        Entity::Sale => vec![
            Rule::to_numeric("SaleAmount"),
            Rule::range("SaleAmount", 0.0, 100_000.0),
            Rule::fill_null("PaymentType_cat", "Unknown"),
            Rule::parse_date("SaleDate"),
            Rule::DropDuplicates,
        ],
    }
}

/// Per-entity rule sets. Entities without an override use [`default_rules`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleBook {
    overrides: BTreeMap<Entity, Vec<Rule>>,
}

impl RuleBook {
    pub fn rules_for(&self, entity: Entity) -> Vec<Rule> {
        self.overrides
            .get(&entity)
            .cloned()
            .unwrap_or_else(|| default_rules(entity))
    }

    pub fn with_rules(mut self, entity: Entity, rules: Vec<Rule>) -> Self {
        self.overrides.insert(entity, rules);
        self
    }

    /// Parses a JSON rulebook such as
    /// `{"product": [{"rule": "range", "column": "UnitPrice", "low": 0, "high": 500}]}`.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| PipelineError::Rules(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| PipelineError::Rules(format!("{}: {}", path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rulebook_overrides_only_named_entities() {
        let book = RuleBook::from_json(
            r#"{
                "product": [
                    {"rule": "drop_duplicates"},
                    {"rule": "range", "column": "UnitPrice", "low": 0, "high": 500},
                    {"rule": "normalize_case", "column": "Category", "case": "upper"},
                    {"rule": "fill_null", "column": "Supplier_cat", "value": "Unknown"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(
            book.rules_for(Entity::Product),
            vec![
                Rule::DropDuplicates,
                Rule::range("UnitPrice", 0.0, 500.0),
                Rule::normalize_case("Category", Case::Upper),
                Rule::fill_null("Supplier_cat", "Unknown"),
            ]
        );
        assert_eq!(book.rules_for(Entity::Sale), default_rules(Entity::Sale));
    }

    #[test]
    fn unknown_rule_is_a_rulebook_error() {
        let err = RuleBook::from_json(r#"{"sale": [{"rule": "shuffle"}]}"#).unwrap_err();
        assert!(matches!(err, PipelineError::Rules(_)));
    }

    #[test]
    fn drop_nulls_defaults_to_every_column() {
        let book = RuleBook::from_json(r#"{"customer": [{"rule": "drop_nulls"}]}"#).unwrap();
        assert_eq!(
            book.rules_for(Entity::Customer),
            vec![Rule::DropNulls { columns: vec![] }]
        );
        assert!(book.rules_for(Entity::Customer)[0].columns().is_empty());
    }

    #[test]
    fn reorder_columns_requires_every_listed_column() {
        let book = RuleBook::from_json(
            r#"{"sale": [{"rule": "reorder_columns", "columns": ["SaleDate", "TransactionID"]}]}"#,
        )
        .unwrap();
        let rule = &book.rules_for(Entity::Sale)[0];
        assert_eq!(rule.name(), "reorder_columns");
        assert_eq!(rule.columns(), vec!["SaleDate", "TransactionID"]);
    }

    #[test]
    fn default_rule_sets_end_with_deduplication() {
        for entity in Entity::ALL {
            assert_eq!(default_rules(entity).last(), Some(&Rule::DropDuplicates));
        }
    }
}
