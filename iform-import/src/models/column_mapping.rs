//! Source column → destination field mapping
//!
//! Destination fields are warehouse tokens of the form `table:field[:subtype]`,
//! e.g. `sample:date`, `occurrence:fk_taxa_taxon_list:genus`,
//! `sample:fk_location:code`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::ImportError;

/// Parsed destination field token
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldToken {
    pub table: String,
    pub field: String,
    pub subtype: Option<String>,
}

impl FromStr for FieldToken {
    type Err = ImportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let valid_part = |p: &str| !p.is_empty() && p.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

        match parts.as_slice() {
            [table, field] if valid_part(table) && valid_part(field) => Ok(Self {
                table: table.to_string(),
                field: field.to_string(),
                subtype: None,
            }),
            [table, field, subtype]
                if valid_part(table) && valid_part(field) && valid_part(subtype) =>
            {
                Ok(Self {
                    table: table.to_string(),
                    field: field.to_string(),
                    subtype: Some(subtype.to_string()),
                })
            }
            _ => Err(ImportError::InvalidInput(format!(
                "Malformed field token '{}', expected table:field[:subtype]",
                s
            ))),
        }
    }
}

impl TryFrom<String> for FieldToken {
    type Error = ImportError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FieldToken> for String {
    fn from(token: FieldToken) -> Self {
        token.to_string()
    }
}

impl fmt::Display for FieldToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subtype {
            Some(subtype) => write!(f, "{}:{}:{}", self.table, self.field, subtype),
            None => write!(f, "{}:{}", self.table, self.field),
        }
    }
}

/// A destination field the user can map a column to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailableField {
    pub token: FieldToken,
    /// Caption shown in the mapping drop-down
    pub caption: String,
}

/// Lowercase, alphanumeric-only form used for title matching
fn normalise(title: &str) -> String {
    title
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Mapping of source columns onto destination fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnMapping {
    /// Source column titles, in file order
    pub columns: Vec<String>,
    /// Source column title → destination field
    pub mappings: BTreeMap<String, FieldToken>,
}

impl ColumnMapping {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            mappings: BTreeMap::new(),
        }
    }

    /// Map a column to a destination field, replacing any previous choice
    pub fn set(&mut self, column: &str, field: FieldToken) -> Result<(), ImportError> {
        if !self.columns.iter().any(|c| c == column) {
            return Err(ImportError::InvalidInput(format!(
                "Unknown source column '{}'",
                column
            )));
        }
        self.mappings.insert(column.to_string(), field);
        Ok(())
    }

    /// Leave a column unmapped (not imported)
    pub fn clear(&mut self, column: &str) {
        self.mappings.remove(column);
    }

    /// Destination fields currently mapped, as token strings
    pub fn mapped_fields(&self) -> BTreeSet<String> {
        self.mappings.values().map(|t| t.to_string()).collect()
    }

    /// Source column mapped to the given field token, if any
    pub fn column_for(&self, field: &str) -> Option<&str> {
        self.mappings
            .iter()
            .find(|(_, token)| token.to_string() == field)
            .map(|(column, _)| column.as_str())
    }

    /// Destination fields mapped from more than one column
    pub fn duplicate_targets(&self) -> Vec<String> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for token in self.mappings.values() {
            *counts.entry(token.to_string()).or_default() += 1;
        }
        counts
            .into_iter()
            .filter(|(_, n)| *n > 1)
            .map(|(field, _)| field)
            .collect()
    }

    /// Pre-populate unmapped columns by matching titles against fields
    ///
    /// A column matches a field when its normalised title equals the
    /// normalised caption, the full token or the bare field name. A field is
    /// never assigned to two columns; the first column in file order wins.
    /// Returns the number of columns mapped.
    pub fn auto_map(&mut self, available: &[AvailableField]) -> usize {
        let mut taken = self.mapped_fields();
        let mut mapped = 0;

        for column in &self.columns {
            if self.mappings.contains_key(column) {
                continue;
            }
            let wanted = normalise(column);
            if wanted.is_empty() {
                continue;
            }
            let hit = available.iter().find(|f| {
                let token = f.token.to_string();
                !taken.contains(&token)
                    && (normalise(&f.caption) == wanted
                        || normalise(&token) == wanted
                        || normalise(&f.token.field) == wanted)
            });
            if let Some(field) = hit {
                taken.insert(field.token.to_string());
                self.mappings.insert(column.clone(), field.token.clone());
                mapped += 1;
            }
        }

        if mapped > 0 {
            tracing::debug!(mapped, "Auto-mapped columns by title");
        }
        mapped
    }

    /// Form payload: one `column → token` pair per mapped column
    pub fn to_form_pairs(&self) -> Vec<(String, String)> {
        self.mappings
            .iter()
            .map(|(column, token)| (column.clone(), token.to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(s: &str) -> FieldToken {
        s.parse().unwrap()
    }

    #[test]
    fn test_token_parsing() {
        let t = token("sample:fk_location:code");
        assert_eq!(t.table, "sample");
        assert_eq!(t.field, "fk_location");
        assert_eq!(t.subtype.as_deref(), Some("code"));
        assert_eq!(t.to_string(), "sample:fk_location:code");

        assert!("sample".parse::<FieldToken>().is_err());
        assert!("sample::x".parse::<FieldToken>().is_err());
        assert!("a:b:c:d".parse::<FieldToken>().is_err());
        assert!("sample:date range".parse::<FieldToken>().is_err());
    }

    #[test]
    fn test_set_rejects_unknown_column() {
        let mut mapping = ColumnMapping::new(vec!["Date".to_string()]);
        assert!(mapping.set("Grid ref", token("sample:entered_sref")).is_err());
        mapping.set("Date", token("sample:date")).unwrap();
        assert_eq!(mapping.column_for("sample:date"), Some("Date"));
    }

    #[test]
    fn test_duplicate_targets() {
        let mut mapping = ColumnMapping::new(vec!["A".into(), "B".into(), "C".into()]);
        mapping.set("A", token("sample:date")).unwrap();
        mapping.set("B", token("sample:date")).unwrap();
        mapping.set("C", token("sample:comment")).unwrap();
        assert_eq!(mapping.duplicate_targets(), vec!["sample:date".to_string()]);

        mapping.clear("B");
        assert!(mapping.duplicate_targets().is_empty());
    }

    #[test]
    fn test_auto_map_by_caption_and_field_name() {
        let available = vec![
            AvailableField {
                token: token("sample:date"),
                caption: "Date".to_string(),
            },
            AvailableField {
                token: token("sample:entered_sref"),
                caption: "Grid ref".to_string(),
            },
            AvailableField {
                token: token("occurrence:comment"),
                caption: "Occurrence comment".to_string(),
            },
        ];
        let mut mapping = ColumnMapping::new(vec![
            "date".into(),
            "Grid Ref.".into(),
            "entered_sref".into(),
            "Notes".into(),
        ]);

        let mapped = mapping.auto_map(&available);

        assert_eq!(mapped, 2);
        assert_eq!(mapping.column_for("sample:date"), Some("date"));
        assert_eq!(mapping.column_for("sample:entered_sref"), Some("Grid Ref."));
        assert!(!mapping.mappings.contains_key("entered_sref"));
        assert!(!mapping.mappings.contains_key("Notes"));
    }
}
