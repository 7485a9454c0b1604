use std::fmt;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

pub const MODE_NULLABLE: &str = "NULLABLE";

/// One column in BigQuery's `TableFieldSchema` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldSchema>,
}

impl FieldSchema {
    fn nullable(name: &str, field_type: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type: field_type.to_string(),
            mode: Some(MODE_NULLABLE.to_string()),
            fields: Vec::new(),
        }
    }

    fn record(name: &str, fields: Vec<FieldSchema>) -> Self {
        Self {
            fields,
            ..Self::nullable(name, "RECORD")
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
}

/// The destination table's columns. Table creation and every load job use this value.
pub fn raw_reviews_schema() -> &'static TableSchema {
    static SCHEMA: OnceLock<TableSchema> = OnceLock::new();
    SCHEMA.get_or_init(|| TableSchema {
        fields: vec![
            FieldSchema::nullable("recommendationid", "STRING"),
            FieldSchema::record(
                "author",
                vec![
                    FieldSchema::nullable("steamid", "STRING"),
                    FieldSchema::nullable("num_games_owned", "INT64"),
                    FieldSchema::nullable("num_reviews", "INT64"),
                    FieldSchema::nullable("playtime_forever", "INT64"),
                    FieldSchema::nullable("playtime_last_two_weeks", "INT64"),
                    FieldSchema::nullable("playtime_at_review", "INT64"),
                    FieldSchema::nullable("last_played", "INT64"),
                ],
            ),
            FieldSchema::nullable("language", "STRING"),
            FieldSchema::nullable("review", "STRING"),
            FieldSchema::nullable("timestamp_created", "INT64"),
            FieldSchema::nullable("timestamp_updated", "INT64"),
            FieldSchema::nullable("voted_up", "BOOL"),
            FieldSchema::nullable("votes_up", "INT64"),
            FieldSchema::nullable("votes_funny", "INT64"),
            FieldSchema::nullable("weighted_vote_score", "FLOAT"),
            FieldSchema::nullable("comment_count", "INT64"),
            FieldSchema::nullable("steam_purchase", "BOOL"),
            FieldSchema::nullable("received_for_free", "BOOL"),
            FieldSchema::nullable("written_during_early_access", "BOOL"),
            FieldSchema::nullable("steam_deck_review", "BOOL"),
            FieldSchema::nullable("app_id", "INT64"),
            FieldSchema::nullable("game_name", "STRING"),
        ],
    })
}

/// BigQuery reports legacy type names (`INTEGER`) for columns declared with standard ones
/// (`INT64`), so comparisons go through this.
pub fn canonical_type(field_type: &str) -> String {
    let upper = field_type.to_ascii_uppercase();
    match upper.as_str() {
        "INT64" => "INTEGER".to_string(),
        "FLOAT64" => "FLOAT".to_string(),
        "BOOL" => "BOOLEAN".to_string(),
        "STRUCT" => "RECORD".to_string(),
        _ => upper,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaDifference {
    MissingColumn {
        column: String,
    },
    TypeChanged {
        column: String,
        expected: String,
        actual: String,
    },
}

impl fmt::Display for SchemaDifference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingColumn { column } => write!(f, "missing column `{column}`"),
            Self::TypeChanged {
                column,
                expected,
                actual,
            } => write!(f, "column `{column}` is {actual}, expected {expected}"),
        }
    }
}

/// Lists every expected column that `actual` lacks or types differently, nested records
/// included (`author.steamid`). Extra columns in `actual` are fine.
pub fn schema_differences(expected: &TableSchema, actual: &TableSchema) -> Vec<SchemaDifference> {
    let mut differences = Vec::new();
    compare_fields(&expected.fields, &actual.fields, "", &mut differences);
    differences
}

fn compare_fields(
    expected: &[FieldSchema],
    actual: &[FieldSchema],
    parent: &str,
    differences: &mut Vec<SchemaDifference>,
) {
    for field in expected {
        let column = if parent.is_empty() {
            field.name.clone()
        } else {
            format!("{parent}.{}", field.name)
        };
        let Some(existing) = actual
            .iter()
            .find(|candidate| candidate.name.eq_ignore_ascii_case(&field.name))
        else {
            differences.push(SchemaDifference::MissingColumn { column });
            continue;
        };

        let expected_type = canonical_type(&field.field_type);
        let actual_type = canonical_type(&existing.field_type);
        if expected_type != actual_type {
            differences.push(SchemaDifference::TypeChanged {
                column,
                expected: expected_type,
                actual: actual_type,
            });
            continue;
        }
        if !field.fields.is_empty() {
            compare_fields(&field.fields, &existing.fields, &column, differences);
        }
    }
}
