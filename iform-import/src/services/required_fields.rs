//! Required-fields checker
//!
//! Runs after every mapping change. A required destination field is
//! satisfied by a global value, by a direct column mapping, or by a complete
//! group of related fields that together stand in for it:
//!
//! - `T:date` ← `T:date_start` + `T:date_end` + `T:date_type`,
//!   or `T:date:day` + `T:date:month` + `T:date:year`
//! - `T:fk_taxa_taxon_list` ← `…:genus` + `…:specific`
//! - `T:entered_sref` and `T:entered_sref_system` ← any location lookup
//! - `T:fk_x` ← any `T:fk_x:<subtype>` lookup; `T:x_id` ← `T:fk_x[:subtype]`

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::models::{ColumnMapping, FieldToken};

/// Subtypes naming part of a species name; alone they identify nothing
const PARTIAL_NAME_SUBTYPES: &[&str] = &["genus", "specific", "infraspecific"];

/// Fields that jointly satisfy other fields
struct FieldGroup {
    name: &'static str,
    /// Field paths (without table) this group satisfies
    satisfies: &'static [&'static str],
    /// Each alternative is complete when all of its paths are present
    alternatives: &'static [&'static [&'static str]],
}

const FIELD_GROUPS: &[FieldGroup] = &[
    FieldGroup {
        name: "vague date",
        satisfies: &["date"],
        alternatives: &[
            &["date_start", "date_end", "date_type"],
            &["date:day", "date:month", "date:year"],
        ],
    },
    FieldGroup {
        name: "species name parts",
        satisfies: &["fk_taxa_taxon_list", "taxa_taxon_list_id"],
        alternatives: &[&["fk_taxa_taxon_list:genus", "fk_taxa_taxon_list:specific"]],
    },
    FieldGroup {
        name: "location lookup",
        satisfies: &["entered_sref", "entered_sref_system"],
        alternatives: &[
            &["fk_location"],
            &["fk_location:code"],
            &["fk_location:external_key"],
            &["fk_location:name"],
            &["location_id"],
        ],
    },
];

/// How a required field was satisfied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Satisfaction {
    GlobalValue,
    /// Mapped from this source column
    Mapped(String),
    /// Covered by a complete group of related fields
    FieldGroup(String),
}

/// Result of a required-fields check
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequiredFieldsReport {
    pub satisfied: BTreeMap<String, Satisfaction>,
    /// Required fields nothing provides, in the order they were required
    pub outstanding: Vec<String>,
}

impl RequiredFieldsReport {
    pub fn is_complete(&self) -> bool {
        self.outstanding.is_empty()
    }
}

/// Check every required field against global values and the mapping
pub fn check_required_fields(
    required: &[String],
    global_values: &BTreeMap<String, String>,
    mapping: &ColumnMapping,
) -> RequiredFieldsReport {
    let globals: BTreeSet<String> = global_values
        .iter()
        .filter(|(_, v)| !v.trim().is_empty())
        .map(|(k, _)| k.clone())
        .collect();
    let present: BTreeSet<String> = mapping
        .mapped_fields()
        .into_iter()
        .chain(globals.iter().cloned())
        .collect();

    let mut report = RequiredFieldsReport::default();

    for field in required {
        let satisfaction = if globals.contains(field) {
            Some(Satisfaction::GlobalValue)
        } else if let Some(column) = mapping.column_for(field) {
            Some(Satisfaction::Mapped(column.to_string()))
        } else {
            satisfied_by_group(field, &present).or_else(|| satisfied_by_lookup(field, &present))
        };

        match satisfaction {
            Some(s) => {
                report.satisfied.insert(field.clone(), s);
            }
            None => report.outstanding.push(field.clone()),
        }
    }

    tracing::debug!(
        required = required.len(),
        outstanding = report.outstanding.len(),
        "Required fields checked"
    );

    report
}

fn satisfied_by_group(field: &str, present: &BTreeSet<String>) -> Option<Satisfaction> {
    let (table, path) = field.split_once(':')?;

    FIELD_GROUPS
        .iter()
        .filter(|group| group.satisfies.contains(&path))
        .find(|group| {
            group.alternatives.iter().any(|alternative| {
                alternative
                    .iter()
                    .all(|part| present.contains(&format!("{}:{}", table, part)))
            })
        })
        .map(|group| Satisfaction::FieldGroup(group.name.to_string()))
}

fn satisfied_by_lookup(field: &str, present: &BTreeSet<String>) -> Option<Satisfaction> {
    let wanted: FieldToken = field.parse().ok()?;
    if wanted.subtype.is_some() {
        return None;
    }
    // x_id is also reachable through its fk_x lookup
    let fk_alias = wanted
        .field
        .strip_suffix("_id")
        .map(|stem| format!("fk_{}", stem));

    present
        .iter()
        .filter_map(|p| p.parse::<FieldToken>().ok())
        .find(|p| {
            if p.table != wanted.table {
                return false;
            }
            let partial = p
                .subtype
                .as_deref()
                .map(|s| PARTIAL_NAME_SUBTYPES.contains(&s))
                .unwrap_or(false);
            if partial {
                return false;
            }
            (p.field == wanted.field && p.subtype.is_some())
                || fk_alias.as_deref() == Some(p.field.as_str())
        })
        .map(|p| Satisfaction::FieldGroup(format!("lookup via {}", p)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(pairs: &[(&str, &str)]) -> ColumnMapping {
        let mut m = ColumnMapping::new(pairs.iter().map(|(c, _)| c.to_string()).collect());
        for (column, field) in pairs {
            m.set(column, field.parse().unwrap()).unwrap();
        }
        m
    }

    fn required(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|f| f.to_string()).collect()
    }

    #[test]
    fn test_date_triplet_satisfies_date() {
        let m = mapping(&[
            ("Start", "sample:date_start"),
            ("End", "sample:date_end"),
            ("Type", "sample:date_type"),
        ]);
        let report = check_required_fields(
            &required(&["sample:date", "sample:entered_sref"]),
            &BTreeMap::new(),
            &m,
        );

        assert_eq!(
            report.satisfied.get("sample:date"),
            Some(&Satisfaction::FieldGroup("vague date".to_string()))
        );
        assert_eq!(report.outstanding, vec!["sample:entered_sref".to_string()]);
        assert!(!report.is_complete());
    }

    #[test]
    fn test_partial_date_group_is_not_enough() {
        let m = mapping(&[("Start", "sample:date_start"), ("End", "sample:date_end")]);
        let report = check_required_fields(&required(&["sample:date"]), &BTreeMap::new(), &m);
        assert_eq!(report.outstanding, vec!["sample:date".to_string()]);

        // A global date type completes the triplet
        let mut globals = BTreeMap::new();
        globals.insert("sample:date_type".to_string(), "D".to_string());
        let report = check_required_fields(&required(&["sample:date"]), &globals, &m);
        assert!(report.is_complete());
    }

    #[test]
    fn test_day_month_year_satisfies_date() {
        let m = mapping(&[
            ("D", "sample:date:day"),
            ("M", "sample:date:month"),
            ("Y", "sample:date:year"),
        ]);
        let report = check_required_fields(&required(&["sample:date"]), &BTreeMap::new(), &m);
        assert!(report.is_complete());
    }

    #[test]
    fn test_location_code_satisfies_sref_and_system() {
        let m = mapping(&[("Site code", "sample:fk_location:code")]);
        let report = check_required_fields(
            &required(&["sample:entered_sref", "sample:entered_sref_system"]),
            &BTreeMap::new(),
            &m,
        );
        assert!(report.is_complete());
        assert_eq!(
            report.satisfied.get("sample:entered_sref_system"),
            Some(&Satisfaction::FieldGroup("location lookup".to_string()))
        );
    }

    #[test]
    fn test_genus_alone_does_not_identify_taxon() {
        let m = mapping(&[("Genus", "occurrence:fk_taxa_taxon_list:genus")]);
        let report = check_required_fields(
            &required(&["occurrence:fk_taxa_taxon_list"]),
            &BTreeMap::new(),
            &m,
        );
        assert_eq!(report.outstanding.len(), 1);

        let m = mapping(&[
            ("Genus", "occurrence:fk_taxa_taxon_list:genus"),
            ("Species", "occurrence:fk_taxa_taxon_list:specific"),
        ]);
        let report = check_required_fields(
            &required(&["occurrence:fk_taxa_taxon_list"]),
            &BTreeMap::new(),
            &m,
        );
        assert!(report.is_complete());
    }

    #[test]
    fn test_lookup_subtype_and_id_alias() {
        let m = mapping(&[("Species", "occurrence:fk_taxa_taxon_list:search_code")]);
        let report = check_required_fields(
            &required(&["occurrence:fk_taxa_taxon_list", "occurrence:taxa_taxon_list_id"]),
            &BTreeMap::new(),
            &m,
        );
        assert!(report.is_complete(), "outstanding: {:?}", report.outstanding);
    }

    #[test]
    fn test_global_value_and_direct_mapping() {
        let m = mapping(&[("Grid ref", "sample:entered_sref")]);
        let mut globals = BTreeMap::new();
        globals.insert("sample:entered_sref_system".to_string(), "OSGB".to_string());
        globals.insert("sample:comment".to_string(), "  ".to_string());

        let report = check_required_fields(
            &required(&["sample:entered_sref", "sample:entered_sref_system", "sample:comment"]),
            &globals,
            &m,
        );

        assert_eq!(
            report.satisfied.get("sample:entered_sref"),
            Some(&Satisfaction::Mapped("Grid ref".to_string()))
        );
        assert_eq!(
            report.satisfied.get("sample:entered_sref_system"),
            Some(&Satisfaction::GlobalValue)
        );
        assert_eq!(report.outstanding, vec!["sample:comment".to_string()]);
    }
}
