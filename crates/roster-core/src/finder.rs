//! Duplicate lookup by unique identifier fields.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
  Result,
  contact::{Contact, ContactId, FieldMap},
  store::ContactTx,
};

// ─── Configuration ───────────────────────────────────────────────────────────

/// How multiple identifier fields combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchOperator {
  /// A contact matches if any identifier matches.
  #[default]
  Any,
  /// A contact matches only if every supplied identifier matches.
  All,
}

/// Which fields identify a contact uniquely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentifierConfig {
  pub fields:   Vec<String>,
  pub operator: MatchOperator,
}

impl Default for IdentifierConfig {
  fn default() -> Self {
    Self { fields: vec!["email".to_owned()], operator: MatchOperator::Any }
  }
}

impl IdentifierConfig {
  /// The normalised identifier values present in `attributes`, in
  /// configuration order. Empty values are skipped.
  pub fn identifiers(&self, attributes: &FieldMap) -> Vec<(String, String)> {
    self
      .fields
      .iter()
      .filter_map(|field| {
        let key = attributes.get(field)?.match_key()?;
        Some((field.clone(), key))
      })
      .collect()
  }
}

// ─── Lookup ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
  NoMatch,
  Match {
    id:        ContactId,
    /// Other contacts that matched too. Non-empty means the store holds
    /// duplicates that predate this lookup.
    ambiguous: Vec<ContactId>,
  },
}

/// A resolved lookup with the matched contact loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateMatch {
  pub contact:   Contact,
  pub ambiguous: Vec<ContactId>,
}

pub struct DuplicateFinder<'a> {
  config: &'a IdentifierConfig,
}

impl<'a> DuplicateFinder<'a> {
  pub fn new(config: &'a IdentifierConfig) -> Self { Self { config } }

  /// Locate the existing contact for `candidate`.
  ///
  /// When several contacts match, the earliest created wins (lowest id on a
  /// tie) and the others are reported as `ambiguous`.
  pub fn find<T: ContactTx + ?Sized>(
    &self,
    tx: &mut T,
    candidate: &FieldMap,
  ) -> Result<Lookup> {
    let identifiers = self.config.identifiers(candidate);
    if identifiers.is_empty() {
      return Ok(Lookup::NoMatch);
    }

    let mut matches = tx.find_by_identifiers(&identifiers, self.config.operator)?;
    matches.sort_by_key(|c| (c.created_at, c.id));
    matches.dedup_by_key(|c| c.id);

    let mut ids = matches.into_iter().map(|c| c.id);
    let Some(id) = ids.next() else {
      return Ok(Lookup::NoMatch);
    };
    let ambiguous: Vec<ContactId> = ids.collect();

    if !ambiguous.is_empty() {
      warn!(
        chosen = %id,
        others = ?ambiguous,
        "multiple contacts share unique identifiers; using the earliest"
      );
    }

    Ok(Lookup::Match { id, ambiguous })
  }
}
