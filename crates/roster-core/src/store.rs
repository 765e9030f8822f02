//! Store abstractions.
//!
//! [`ContactTx`] is the synchronous, transaction-scoped view the merge engine
//! runs against: every call made through one value belongs to the same
//! transaction, and the backend commits only after the engine returns `Ok`.
//!
//! [`ContactStore`] is the async surface callers use. Each method is one
//! transaction on the backend.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  Result,
  contact::{Contact, ContactDraft, ContactId, FieldMap, IncomingContact, Manipulator},
  finder::{DuplicateMatch, MatchOperator},
  merger::{MergeResult, Resolution},
  relation::{DoNotContact, UtmTag, UtmTagInput},
};

// ─── Transaction ─────────────────────────────────────────────────────────────

/// A contact that matched an identifier lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
  pub id:         ContactId,
  pub created_at: DateTime<Utc>,
}

/// Operations available inside a single store transaction.
pub trait ContactTx {
  /// Take an exclusive lock on `id` that is held until the transaction ends.
  ///
  /// Fails with [`crate::Error::NotFound`] when the contact does not exist
  /// and [`crate::Error::LockContention`] when the bounded wait expires.
  fn lock(&mut self, id: ContactId) -> Result<()>;

  /// Load a contact with all of its relations.
  fn load(&mut self, id: ContactId) -> Result<Option<Contact>>;

  /// Contacts whose normalised identifier values match `identifiers`.
  /// Each pair is `(field, normalised value)`.
  fn find_by_identifiers(
    &mut self,
    identifiers: &[(String, String)],
    operator: MatchOperator,
  ) -> Result<Vec<Candidate>>;

  /// Persist a draft as a new contact and return it with its assigned id.
  fn create(
    &mut self,
    draft: ContactDraft,
    manipulator: Option<&Manipulator>,
  ) -> Result<Contact>;

  /// Write `contact` and replace every relation row it owns. History
  /// records (UTM tags, notes, devices) are re-owned by `contact.id` even if
  /// another contact held them before.
  fn save(&mut self, contact: &Contact) -> Result<()>;

  /// Delete a contact and anything still attached to it.
  fn delete(&mut self, id: ContactId) -> Result<()>;
}

// ─── Async store ─────────────────────────────────────────────────────────────

/// Abstraction over a contact store backend.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes.
pub trait ContactStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn create_contact(
    &self,
    draft: ContactDraft,
    manipulator: Option<Manipulator>,
  ) -> impl Future<Output = Result<Contact, Self::Error>> + Send + '_;

  /// Retrieve a contact by id. Returns `None` if not found.
  fn get_contact(
    &self,
    id: ContactId,
  ) -> impl Future<Output = Result<Option<Contact>, Self::Error>> + Send + '_;

  fn delete_contact(
    &self,
    id: ContactId,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Read-only duplicate lookup for a set of candidate attributes.
  fn find_duplicate(
    &self,
    candidate: FieldMap,
  ) -> impl Future<Output = Result<Option<DuplicateMatch>, Self::Error>> + Send + '_;

  /// Resolve `candidate` to an existing contact and fold `incoming` into it,
  /// or create a new contact when nothing matches.
  fn find_or_merge(
    &self,
    candidate: FieldMap,
    incoming: IncomingContact,
    manipulator: Option<Manipulator>,
  ) -> impl Future<Output = Result<Resolution, Self::Error>> + Send + '_;

  /// Merge the stored contact `incoming` into `existing`, which survives.
  fn merge(
    &self,
    incoming: ContactId,
    existing: ContactId,
    manipulator: Option<Manipulator>,
  ) -> impl Future<Output = Result<MergeResult, Self::Error>> + Send + '_;

  fn add_do_not_contact(
    &self,
    id: ContactId,
    record: DoNotContact,
  ) -> impl Future<Output = Result<Contact, Self::Error>> + Send + '_;

  /// Returns whether a record existed for the channel.
  fn remove_do_not_contact(
    &self,
    id: ContactId,
    channel: String,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn add_utm_tags(
    &self,
    id: ContactId,
    input: UtmTagInput,
  ) -> impl Future<Output = Result<UtmTag, Self::Error>> + Send + '_;

  /// Returns whether the UTM record existed on the contact.
  fn remove_utm_tag(
    &self,
    id: ContactId,
    utm_id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn modify_tags(
    &self,
    id: ContactId,
    add: Vec<String>,
    remove: Vec<String>,
  ) -> impl Future<Output = Result<Contact, Self::Error>> + Send + '_;
}
