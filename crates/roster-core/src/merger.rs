//! Contact merge orchestration.
//!
//! A merge runs as explicit ordered steps against one [`ContactTx`]:
//!
//! 1. refuse to merge a contact with itself
//! 2. lock and load the winner (the stored `existing` contact)
//! 3. lock and load the loser and fold it in as stored data
//! 4. fold in any submitted changes as explicit data
//! 5. save the winner, then delete the loser
//!
//! Reconciliation and relation migration happen in memory between steps 3
//! and 5. Any error leaves the transaction uncommitted, so the backend rolls
//! back.

use serde::Serialize;
use tracing::{info, instrument};

use crate::{
  Error, Result,
  contact::{Contact, ContactDraft, ContactId, FieldMap, IncomingContact, Manipulator},
  finder::{DuplicateFinder, IdentifierConfig, Lookup},
  migrate::{Relations, RelationLog, migrate_relations},
  reconcile::{
    FieldDecision, Provenance, ReconcilePolicy, reconcile_fields,
    reconcile_reference,
  },
  store::ContactTx,
};

// ─── Results ─────────────────────────────────────────────────────────────────

/// What a merge absorbed from the losing side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeLog {
  pub fields:    Vec<FieldDecision>,
  pub relations: RelationLog,
}

impl MergeLog {
  pub fn append(&mut self, other: MergeLog) {
    self.fields.extend(other.fields);
    self.relations.append(other.relations);
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeResult {
  pub survivor: Contact,
  /// The deleted loser, when the incoming side was stored.
  pub absorbed: Option<ContactId>,
  pub log:      MergeLog,
}

/// Outcome of [`ContactMerger::find_or_merge`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Resolution {
  /// Nothing matched; the draft became a new contact.
  Created { contact: Contact },
  /// The stored incoming contact is the match, or nothing matched it, and
  /// no changes were submitted.
  Unchanged { contact: Contact },
  /// As `Unchanged`, but the submitted changes were applied in place.
  Updated { contact: Contact, log: MergeLog },
  Merged(MergeResult),
}

impl Resolution {
  pub fn contact(&self) -> &Contact {
    match self {
      Self::Created { contact }
      | Self::Unchanged { contact }
      | Self::Updated { contact, .. } => contact,
      Self::Merged(result) => &result.survivor,
    }
  }

  pub fn into_contact(self) -> Contact {
    match self {
      Self::Created { contact }
      | Self::Unchanged { contact }
      | Self::Updated { contact, .. } => contact,
      Self::Merged(result) => result.survivor,
    }
  }
}

// ─── Merger ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ContactMerger {
  policy:      ReconcilePolicy,
  identifiers: IdentifierConfig,
}

impl ContactMerger {
  pub fn new(policy: ReconcilePolicy, identifiers: IdentifierConfig) -> Self {
    Self { policy, identifiers }
  }

  pub fn policy(&self) -> &ReconcilePolicy { &self.policy }

  pub fn identifiers(&self) -> &IdentifierConfig { &self.identifiers }

  /// Fold `incoming` into the stored contact `existing`, which keeps its id.
  ///
  /// Fails with [`Error::SameContact`] before touching the store when both
  /// sides are the same record.
  #[instrument(skip_all, fields(existing = %existing))]
  pub fn merge<T: ContactTx + ?Sized>(
    &self,
    tx: &mut T,
    incoming: IncomingContact,
    existing: ContactId,
    manipulator: Option<&Manipulator>,
  ) -> Result<MergeResult> {
    if incoming.persisted_id() == Some(existing) {
      return Err(Error::SameContact(existing));
    }

    tx.lock(existing)?;
    let mut winner = tx.load(existing)?.ok_or(Error::NotFound(existing))?;

    let (absorbed, mut log, changes) = match incoming {
      IncomingContact::Persisted(id) => {
        (Some(id), self.absorb_stored(tx, &mut winner, id)?, None)
      }
      IncomingContact::Edited { id, changes } => {
        (Some(id), self.absorb_stored(tx, &mut winner, id)?, Some(changes))
      }
      IncomingContact::Transient(draft) => (None, MergeLog::default(), Some(draft)),
    };
    if let Some(changes) = changes {
      log.append(self.absorb_draft(&mut winner, changes)?);
    }

    if let Some(manipulator) = manipulator {
      winner.manipulator = Some(manipulator.clone());
    }

    tx.save(&winner)?;
    if let Some(loser) = absorbed {
      tx.delete(loser)?;
    }

    info!(
      survivor = %winner.id,
      absorbed = ?absorbed.map(|id| id.0),
      fields = log.fields.len(),
      "contacts merged"
    );

    Ok(MergeResult { survivor: winner, absorbed, log })
  }

  /// Resolve `candidate` to an existing contact and merge `incoming` into
  /// it. A stored submission that is its own match, or that matches
  /// nothing, gets its submitted changes applied in place.
  #[instrument(skip_all)]
  pub fn find_or_merge<T: ContactTx + ?Sized>(
    &self,
    tx: &mut T,
    candidate: &FieldMap,
    incoming: IncomingContact,
    manipulator: Option<&Manipulator>,
  ) -> Result<Resolution> {
    let existing = match DuplicateFinder::new(&self.identifiers).find(tx, candidate)? {
      Lookup::Match { id, .. } => Some(id),
      Lookup::NoMatch => None,
    };

    match (existing, incoming) {
      (None, IncomingContact::Transient(draft)) => {
        let contact = tx.create(draft, manipulator)?;
        info!(contact = %contact.id, "contact created");
        Ok(Resolution::Created { contact })
      }
      (Some(existing), incoming @ IncomingContact::Transient(_)) => {
        Ok(Resolution::Merged(self.merge(tx, incoming, existing, manipulator)?))
      }
      (Some(existing), incoming @ (IncomingContact::Persisted(_) | IncomingContact::Edited { .. }))
        if incoming.persisted_id() != Some(existing) =>
      {
        Ok(Resolution::Merged(self.merge(tx, incoming, existing, manipulator)?))
      }
      (_, IncomingContact::Persisted(id)) => {
        self.update_in_place(tx, id, None, manipulator)
      }
      (_, IncomingContact::Edited { id, changes }) => {
        self.update_in_place(tx, id, Some(changes), manipulator)
      }
    }
  }

  /// Lock and load the stored loser `id`, then fold it into `winner`.
  fn absorb_stored<T: ContactTx + ?Sized>(
    &self,
    tx: &mut T,
    winner: &mut Contact,
    id: ContactId,
  ) -> Result<MergeLog> {
    tx.lock(id)?;
    let mut loser = tx.load(id)?.ok_or(Error::NotFound(id))?;
    let fields = std::mem::take(&mut loser.fields);
    let relations = Relations::drain_from(&mut loser);
    self.absorb(winner, &fields, loser.owner, loser.stage, relations, Provenance::Stored)
  }

  /// Fold submitted data into `winner`; every value counts as explicit.
  fn absorb_draft(&self, winner: &mut Contact, mut draft: ContactDraft) -> Result<MergeLog> {
    let fields = std::mem::take(&mut draft.fields);
    let relations = Relations::drain_from_draft(&mut draft);
    self.absorb(winner, &fields, draft.owner, draft.stage, relations, Provenance::Explicit)
  }

  fn absorb(
    &self,
    winner: &mut Contact,
    fields: &FieldMap,
    owner: Option<i64>,
    stage: Option<i64>,
    relations: Relations,
    provenance: Provenance,
  ) -> Result<MergeLog> {
    let mut decisions =
      reconcile_fields(&self.policy, &mut winner.fields, fields, provenance);
    decisions.extend(reconcile_reference(
      &self.policy,
      "owner",
      &mut winner.owner,
      owner,
      provenance,
    ));
    decisions.extend(reconcile_reference(
      &self.policy,
      "stage",
      &mut winner.stage,
      stage,
      provenance,
    ));

    let relations = migrate_relations(winner, relations)?;
    Ok(MergeLog { fields: decisions, relations })
  }

  /// Lock and load `id`, apply `changes` when given, and record
  /// `manipulator` on it.
  fn update_in_place<T: ContactTx + ?Sized>(
    &self,
    tx: &mut T,
    id: ContactId,
    changes: Option<ContactDraft>,
    manipulator: Option<&Manipulator>,
  ) -> Result<Resolution> {
    tx.lock(id)?;
    let mut contact = tx.load(id)?.ok_or(Error::NotFound(id))?;
    let log = changes
      .map(|changes| self.absorb_draft(&mut contact, changes))
      .transpose()?;

    if let Some(manipulator) = manipulator {
      contact.manipulator = Some(manipulator.clone());
    }
    if log.is_some() || manipulator.is_some() {
      tx.save(&contact)?;
    }

    Ok(match log {
      Some(log) => {
        info!(contact = %contact.id, fields = log.fields.len(), "contact updated");
        Resolution::Updated { contact, log }
      }
      None => Resolution::Unchanged { contact },
    })
  }
}
