//! Lookup value matching
//!
//! Raw imported text (species names, location names, attribute terms) has to
//! resolve to warehouse ids. When the warehouse cannot resolve every distinct
//! value of a column it returns an `unmatchedInfo` block and the user picks a
//! target for each value. The choices for one column form a `LookupMatchSet`.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Kind of lookup the unmatched values need
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LookupType {
    /// Termlist-backed custom attribute
    CustomAttribute,
    /// Any other foreign key with a fixed option list
    OtherFk,
    /// Species name, resolved by taxon search
    Taxon,
    /// Location name or code, resolved by location search
    Location,
}

impl LookupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupType::CustomAttribute => "customAttribute",
            LookupType::OtherFk => "otherFk",
            LookupType::Taxon => "taxon",
            LookupType::Location => "location",
        }
    }

    /// Whether the match table offers a fixed option list
    pub fn has_fixed_options(&self) -> bool {
        matches!(self, LookupType::CustomAttribute | LookupType::OtherFk)
    }
}

/// Accepts either `["a","b"]` or `{"a": n, "b": n}` (keys are the values)
fn string_list_or_keys<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ListOrMap {
        List(Vec<String>),
        Map(BTreeMap<String, serde_json::Value>),
    }

    Ok(match ListOrMap::deserialize(deserializer)? {
        ListOrMap::List(values) => values,
        ListOrMap::Map(map) => map.into_keys().collect(),
    })
}

/// `unmatchedInfo` block of a lookup-matching response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnmatchedInfo {
    #[serde(rename = "type")]
    pub lookup_type: LookupType,
    /// Distinct raw values the warehouse could not resolve
    #[serde(deserialize_with = "string_list_or_keys")]
    pub values: Vec<String>,
    /// Selectable targets for fixed-option lookups: id → caption
    #[serde(default)]
    pub match_options: BTreeMap<String, String>,
}

/// Outcome of validating a set before it is saved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchSetState {
    /// Every value has a target
    Complete,
    /// These values still need a target
    Incomplete(Vec<String>),
}

/// User's matches for one source column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupMatchSet {
    /// Source column token the matches are saved against
    pub source_field: String,
    /// Human readable label for the column
    pub column_label: String,
    pub lookup_type: LookupType,
    /// Raw value → chosen target id; empty string means not chosen yet
    pub matches: BTreeMap<String, String>,
    /// Fixed options offered for term lookups: id → caption
    pub options: BTreeMap<String, String>,
    /// Set once the warehouse accepted the matches
    pub saved: bool,
}

impl LookupMatchSet {
    pub fn new(source_field: String, column_label: String, info: &UnmatchedInfo) -> Self {
        let matches = info
            .values
            .iter()
            .map(|v| (v.clone(), String::new()))
            .collect();
        Self {
            source_field,
            column_label,
            lookup_type: info.lookup_type,
            matches,
            options: info.match_options.clone(),
            saved: false,
        }
    }

    /// Raw values in display order
    pub fn values(&self) -> Vec<String> {
        self.matches.keys().cloned().collect()
    }

    /// Choose a target for one raw value
    ///
    /// For fixed-option lookups the id must be one of the offered options.
    pub fn choose(&mut self, value: &str, target_id: &str) -> Result<(), crate::error::ImportError> {
        let Some(slot) = self.matches.get_mut(value) else {
            return Err(crate::error::ImportError::InvalidInput(format!(
                "'{}' is not an unmatched value of {}",
                value, self.column_label
            )));
        };
        if self.lookup_type.has_fixed_options()
            && !target_id.is_empty()
            && !self.options.contains_key(target_id)
        {
            return Err(crate::error::ImportError::InvalidInput(format!(
                "'{}' is not a valid option for {}",
                target_id, self.column_label
            )));
        }
        *slot = target_id.trim().to_string();
        self.saved = false;
        Ok(())
    }

    /// Forget the choice for the given values (server said they are unresolved)
    pub fn flag_unmatched(&mut self, values: &[String]) {
        for value in values {
            if let Some(slot) = self.matches.get_mut(value) {
                slot.clear();
            }
        }
        self.saved = false;
    }

    /// Values still lacking a target
    pub fn unresolved(&self) -> Vec<String> {
        self.matches
            .iter()
            .filter(|(_, target)| target.trim().is_empty())
            .map(|(value, _)| value.clone())
            .collect()
    }

    pub fn state(&self) -> MatchSetState {
        let unresolved = self.unresolved();
        if unresolved.is_empty() {
            MatchSetState::Complete
        } else {
            MatchSetState::Incomplete(unresolved)
        }
    }

    /// `values` field of the save request: JSON object raw value → id
    ///
    /// Unresolved values are sent too so the warehouse reports them back.
    pub fn values_payload(&self) -> String {
        serde_json::to_string(&self.matches).unwrap_or_else(|_| "{}".to_string())
    }
}
