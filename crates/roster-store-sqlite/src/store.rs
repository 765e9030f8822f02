//! [`SqliteStore`], the SQLite implementation of [`ContactStore`].

use std::{path::Path, sync::Arc, time::Duration};

use rusqlite::TransactionBehavior;
use tracing::{debug, warn};
use uuid::Uuid;

use roster_core::{
  contact::{Contact, ContactDraft, ContactId, FieldMap, IncomingContact, Manipulator},
  finder::{DuplicateFinder, DuplicateMatch, IdentifierConfig, Lookup},
  maintain,
  merger::{ContactMerger, MergeResult, Resolution},
  reconcile::ReconcilePolicy,
  relation::{DoNotContact, UtmTag, UtmTagInput},
  store::{ContactStore, ContactTx},
};

use crate::{Error, Result, schema::SCHEMA, tx::SqliteTx};

// ─── Options ─────────────────────────────────────────────────────────────────

/// Tuning for a [`SqliteStore`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
  /// How long a write waits for another writer before failing with
  /// [`roster_core::Error::LockContention`].
  pub lock_timeout: Duration,
  pub policy:       ReconcilePolicy,
  pub identifiers:  IdentifierConfig,
}

impl Default for StoreOptions {
  fn default() -> Self {
    Self {
      lock_timeout: Duration::from_secs(5),
      policy:       ReconcilePolicy::default(),
      identifiers:  IdentifierConfig::default(),
    }
  }
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Roster contact store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn:   tokio_rusqlite::Connection,
  merger: Arc<ContactMerger>,
}

impl SqliteStore {
  /// Open (or create) a store at `path` with default options.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    Self::open_with(path, StoreOptions::default()).await
  }

  pub async fn open_with(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
    debug!(path = %path.as_ref().display(), "opening contact store");
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::init(conn, options).await
  }

  /// Open an in-memory store, mostly for tests.
  pub async fn open_in_memory() -> Result<Self> {
    Self::open_in_memory_with(StoreOptions::default()).await
  }

  pub async fn open_in_memory_with(options: StoreOptions) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn, options).await
  }

  async fn init(conn: tokio_rusqlite::Connection, options: StoreOptions) -> Result<Self> {
    let lock_timeout = options.lock_timeout;
    conn
      .call(move |conn| {
        conn.busy_timeout(lock_timeout)?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;

    let merger = ContactMerger::new(options.policy, options.identifiers);
    Ok(Self { conn, merger: Arc::new(merger) })
  }

  /// Run `f` inside one `BEGIN IMMEDIATE` transaction. The transaction
  /// commits only when `f` returns `Ok`; any error rolls everything back.
  async fn write<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&mut SqliteTx<'_>, &ContactMerger) -> roster_core::Result<T>
      + Send
      + 'static,
  {
    let merger = Arc::clone(&self.merger);
    let outcome = self
      .conn
      .call(move |conn| {
        let tx = match conn.transaction_with_behavior(TransactionBehavior::Immediate) {
          Ok(tx) => tx,
          Err(e) => return Ok(Err(Error::from(e).into_core())),
        };
        let result = f(&mut SqliteTx::new(&tx), &merger);
        Ok(match result {
          Ok(value) => tx
            .commit()
            .map(|()| value)
            .map_err(|e| Error::from(e).into_core()),
          // Dropping the transaction rolls it back.
          Err(e) => Err(e),
        })
      })
      .await?;

    outcome.map_err(|e| {
      if e.is_retryable() {
        warn!(error = %e, "contact write gave up waiting for a lock");
      }
      Error::Core(e)
    })
  }

  /// Run `f` inside a deferred read transaction that is never committed.
  async fn read<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&mut SqliteTx<'_>, &ContactMerger) -> roster_core::Result<T>
      + Send
      + 'static,
  {
    let merger = Arc::clone(&self.merger);
    let outcome = self
      .conn
      .call(move |conn| {
        let tx = match conn.transaction() {
          Ok(tx) => tx,
          Err(e) => return Ok(Err(Error::from(e).into_core())),
        };
        Ok(f(&mut SqliteTx::new(&tx), &merger))
      })
      .await?;
    outcome.map_err(Error::Core)
  }
}

// ─── ContactStore impl ───────────────────────────────────────────────────────

impl ContactStore for SqliteStore {
  type Error = Error;

  async fn create_contact(
    &self,
    draft: ContactDraft,
    manipulator: Option<Manipulator>,
  ) -> Result<Contact> {
    self
      .write(move |tx, _| tx.create(draft, manipulator.as_ref()))
      .await
  }

  async fn get_contact(&self, id: ContactId) -> Result<Option<Contact>> {
    self.read(move |tx, _| tx.load(id)).await
  }

  async fn delete_contact(&self, id: ContactId) -> Result<()> {
    self.write(move |tx, _| maintain::delete(tx, id)).await
  }

  async fn find_duplicate(&self, candidate: FieldMap) -> Result<Option<DuplicateMatch>> {
    self
      .read(move |tx, merger| {
        let lookup = DuplicateFinder::new(merger.identifiers()).find(tx, &candidate)?;
        let Lookup::Match { id, ambiguous } = lookup else {
          return Ok(None);
        };
        Ok(tx.load(id)?.map(|contact| DuplicateMatch { contact, ambiguous }))
      })
      .await
  }

  async fn find_or_merge(
    &self,
    candidate: FieldMap,
    incoming: IncomingContact,
    manipulator: Option<Manipulator>,
  ) -> Result<Resolution> {
    self
      .write(move |tx, merger| {
        merger.find_or_merge(tx, &candidate, incoming, manipulator.as_ref())
      })
      .await
  }

  async fn merge(
    &self,
    incoming: ContactId,
    existing: ContactId,
    manipulator: Option<Manipulator>,
  ) -> Result<MergeResult> {
    self
      .write(move |tx, merger| {
        merger.merge(
          tx,
          IncomingContact::Persisted(incoming),
          existing,
          manipulator.as_ref(),
        )
      })
      .await
  }

  async fn add_do_not_contact(&self, id: ContactId, record: DoNotContact) -> Result<Contact> {
    self
      .write(move |tx, _| maintain::add_do_not_contact(tx, id, record))
      .await
  }

  async fn remove_do_not_contact(&self, id: ContactId, channel: String) -> Result<bool> {
    self
      .write(move |tx, _| maintain::remove_do_not_contact(tx, id, &channel))
      .await
  }

  async fn add_utm_tags(&self, id: ContactId, input: UtmTagInput) -> Result<UtmTag> {
    self
      .write(move |tx, _| maintain::add_utm_tags(tx, id, input))
      .await
  }

  async fn remove_utm_tag(&self, id: ContactId, utm_id: Uuid) -> Result<bool> {
    self
      .write(move |tx, _| maintain::remove_utm_tag(tx, id, utm_id))
      .await
  }

  async fn modify_tags(
    &self,
    id: ContactId,
    add: Vec<String>,
    remove: Vec<String>,
  ) -> Result<Contact> {
    self
      .write(move |tx, _| maintain::modify_tags(tx, id, &add, &remove))
      .await
  }
}
