//! Field reconciliation: per-field choice of the surviving value when two
//! records describe the same person.
//!
//! The rules, in order:
//!
//! 1. An empty incoming value never replaces a non-empty existing one.
//! 2. A protected field only changes when the incoming side set it
//!    explicitly; stored values from a duplicate can fill it but never
//!    replace it.
//! 3. When both sides hold a date, the more recent one wins.
//! 4. Otherwise the non-empty incoming value wins.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::contact::{FieldMap, FieldValue};

// ─── Policy ──────────────────────────────────────────────────────────────────

/// Where the incoming values came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
  /// Submitted in the current request; every value was set on purpose.
  Explicit,
  /// Read back from a stored duplicate.
  Stored,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilePolicy {
  pub protected_fields: BTreeSet<String>,
}

impl ReconcilePolicy {
  pub fn is_protected(&self, field: &str) -> bool {
    self.protected_fields.contains(field)
  }
}

impl Default for ReconcilePolicy {
  fn default() -> Self {
    Self {
      protected_fields: ["id", "date_added", "date_identified", "owner"]
        .into_iter()
        .map(str::to_owned)
        .collect(),
    }
  }
}

// ─── Decisions ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOutcome {
  /// The winner had no value; the incoming one was taken.
  Added,
  /// The incoming value replaced the winner's.
  Overwritten,
  /// The winner's value was kept over a different incoming value.
  KeptExisting,
  /// Both sides already agreed.
  Unchanged,
  /// Kept because the field is protected from stored values.
  Protected,
}

/// One entry in the merge log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDecision {
  pub field:   String,
  pub outcome: FieldOutcome,
}

// ─── Reconciliation ──────────────────────────────────────────────────────────

/// Fold `incoming` into `existing` in place and report what happened to each
/// incoming field. Fields only present on `existing` are left untouched.
pub fn reconcile_fields(
  policy: &ReconcilePolicy,
  existing: &mut FieldMap,
  incoming: &FieldMap,
  provenance: Provenance,
) -> Vec<FieldDecision> {
  incoming
    .iter()
    .map(|(name, value)| {
      let outcome = decide(policy, name, existing.get(name), value, provenance);
      if matches!(outcome, FieldOutcome::Added | FieldOutcome::Overwritten) {
        existing.insert(name.clone(), value.clone());
      }
      FieldDecision { field: name.clone(), outcome }
    })
    .collect()
}

/// Reconcile a single optional reference such as owner or stage, using the
/// same rules as map fields.
pub fn reconcile_reference<T: Copy + PartialEq>(
  policy: &ReconcilePolicy,
  name: &str,
  existing: &mut Option<T>,
  incoming: Option<T>,
  provenance: Provenance,
) -> Option<FieldDecision> {
  let incoming = incoming?;
  let outcome = match *existing {
    None => FieldOutcome::Added,
    Some(current) if current == incoming => FieldOutcome::Unchanged,
    Some(_) if policy.is_protected(name) && provenance == Provenance::Stored => {
      FieldOutcome::Protected
    }
    Some(_) => FieldOutcome::Overwritten,
  };
  if matches!(outcome, FieldOutcome::Added | FieldOutcome::Overwritten) {
    *existing = Some(incoming);
  }
  Some(FieldDecision { field: name.to_owned(), outcome })
}

fn decide(
  policy: &ReconcilePolicy,
  name: &str,
  current: Option<&FieldValue>,
  incoming: &FieldValue,
  provenance: Provenance,
) -> FieldOutcome {
  let current = current.filter(|v| !v.is_empty());

  if incoming.is_empty() {
    return match current {
      Some(_) => FieldOutcome::KeptExisting,
      None => FieldOutcome::Unchanged,
    };
  }

  let Some(current) = current else {
    return FieldOutcome::Added;
  };

  if current == incoming {
    return FieldOutcome::Unchanged;
  }

  if policy.is_protected(name) && provenance == Provenance::Stored {
    return FieldOutcome::Protected;
  }

  match (current.as_instant(), incoming.as_instant()) {
    (Some(ours), Some(theirs)) if theirs <= ours => FieldOutcome::KeptExisting,
    _ => FieldOutcome::Overwritten,
  }
}
