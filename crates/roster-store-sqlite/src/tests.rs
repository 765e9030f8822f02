//! Integration tests for `SqliteStore` against in-memory and on-disk
//! databases.

use std::{collections::BTreeSet, time::Duration};

use chrono::Utc;
use roster_core::{
  contact::{ContactDraft, ContactId, FieldMap, FieldValue, IncomingContact, Manipulator},
  merger::Resolution,
  relation::{DncReason, DoNotContact, Membership, UtmTagInput},
  store::ContactStore,
};

use crate::{SqliteStore, StoreOptions};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn candidate(email: &str) -> FieldMap {
  FieldMap::from([("email".to_owned(), FieldValue::from(email))])
}

fn joined(source: &str) -> Membership {
  Membership { joined_at: Utc::now(), source: source.to_owned() }
}

// ─── Create & load ───────────────────────────────────────────────────────────

#[tokio::test]
async fn create_and_get_contact() {
  let s = store().await;

  let mut draft = ContactDraft::default()
    .with_field("email", "ann@x.com")
    .with_field("firstname", "Ann")
    .with_field("score", FieldValue::Number(4.5))
    .with_tag("vip");
  draft.owner = Some(7);
  draft.points = 12;
  draft.lists.insert(3, joined("form"));
  draft.ip_addresses.insert("10.0.0.1".to_owned());
  draft
    .do_not_contact
    .push(DoNotContact::new("sms", DncReason::Manual));

  let created = s
    .create_contact(draft, Some(Manipulator::new("lead", "api-single")))
    .await
    .unwrap();

  let fetched = s.get_contact(created.id).await.unwrap();
  assert_eq!(fetched, Some(created));
}

#[tokio::test]
async fn get_contact_missing_returns_none() {
  let s = store().await;
  assert!(s.get_contact(ContactId(42)).await.unwrap().is_none());
}

#[tokio::test]
async fn delete_contact_removes_it() {
  let s = store().await;
  let ann = s
    .create_contact(ContactDraft::default().with_tag("vip"), None)
    .await
    .unwrap();

  s.delete_contact(ann.id).await.unwrap();
  assert!(s.get_contact(ann.id).await.unwrap().is_none());

  let err = s.delete_contact(ann.id).await.unwrap_err();
  assert!(matches!(err.as_core(), Some(roster_core::Error::NotFound(_))));
}

// ─── Duplicate lookup ────────────────────────────────────────────────────────

#[tokio::test]
async fn find_duplicate_matches_normalised_email() {
  let s = store().await;
  let ann = s
    .create_contact(ContactDraft::default().with_field("email", "Ann@X.com"), None)
    .await
    .unwrap();

  let found = s.find_duplicate(candidate("  ann@x.COM")).await.unwrap().unwrap();
  assert_eq!(found.contact.id, ann.id);
  assert!(found.ambiguous.is_empty());

  assert!(s.find_duplicate(candidate("bob@x.com")).await.unwrap().is_none());
  assert!(s.find_duplicate(FieldMap::new()).await.unwrap().is_none());
}

#[tokio::test]
async fn find_duplicate_prefers_earliest_and_reports_the_rest() {
  let s = store().await;
  let first = s
    .create_contact(ContactDraft::default().with_field("email", "a@x.com"), None)
    .await
    .unwrap();
  let second = s
    .create_contact(ContactDraft::default().with_field("email", "a@x.com"), None)
    .await
    .unwrap();

  let found = s.find_duplicate(candidate("a@x.com")).await.unwrap().unwrap();
  assert_eq!(found.contact.id, first.id);
  assert_eq!(found.ambiguous, vec![second.id]);
}

// ─── Find or merge ───────────────────────────────────────────────────────────

#[tokio::test]
async fn find_or_merge_creates_when_nothing_matches() {
  let s = store().await;

  let resolution = s
    .find_or_merge(
      candidate("new@x.com"),
      IncomingContact::Transient(ContactDraft::default().with_field("email", "new@x.com")),
      None,
    )
    .await
    .unwrap();

  let Resolution::Created { contact } = resolution else {
    panic!("expected a created contact");
  };
  assert!(s.get_contact(contact.id).await.unwrap().is_some());
}

#[tokio::test]
async fn ann_keeps_her_unsubscribe_and_gains_a_first_name() {
  let s = store().await;

  let mut draft = ContactDraft::default()
    .with_field("email", "a@x.com")
    .with_field("firstname", "");
  draft
    .do_not_contact
    .push(DoNotContact::new("email", DncReason::Unsubscribed));
  let existing = s.create_contact(draft, None).await.unwrap();

  let incoming = ContactDraft::default()
    .with_field("email", "a@x.com")
    .with_field("firstname", "Ann");
  let resolution = s
    .find_or_merge(
      candidate("a@x.com"),
      IncomingContact::Transient(incoming),
      Some(Manipulator::new("lead", "api-single")),
    )
    .await
    .unwrap();

  assert!(matches!(resolution, Resolution::Merged(_)));
  let stored = s.get_contact(existing.id).await.unwrap().unwrap();
  assert_eq!(stored.field("firstname"), Some(&FieldValue::from("Ann")));
  assert_eq!(stored.do_not_contact["email"].reason, DncReason::Unsubscribed);
  assert!(!stored.is_contactable("email"));
  assert_eq!(stored.manipulator.map(|m| m.object), Some("api-single".to_owned()));
}

#[tokio::test]
async fn find_or_merge_of_a_stored_match_is_unchanged() {
  let s = store().await;
  let ann = s
    .create_contact(ContactDraft::default().with_field("email", "a@x.com"), None)
    .await
    .unwrap();

  let resolution = s
    .find_or_merge(candidate("a@x.com"), IncomingContact::Persisted(ann.id), None)
    .await
    .unwrap();

  assert!(matches!(resolution, Resolution::Unchanged { ref contact } if contact.id == ann.id));
}

#[tokio::test]
async fn edited_submission_keeps_its_changes_after_merging() {
  let s = store().await;
  let existing = s
    .create_contact(
      ContactDraft::default()
        .with_field("email", "a@x.com")
        .with_field("city", "Lyon"),
      None,
    )
    .await
    .unwrap();
  let edited = s
    .create_contact(ContactDraft::default().with_field("email", "a@x.com"), None)
    .await
    .unwrap();

  let mut changes = ContactDraft::default()
    .with_field("firstname", "Zed")
    .with_tag("t");
  changes.owner = Some(4);
  let resolution = s
    .find_or_merge(
      candidate("a@x.com"),
      IncomingContact::Edited { id: edited.id, changes },
      None,
    )
    .await
    .unwrap();

  assert_eq!(resolution.contact().id, existing.id);
  assert!(s.get_contact(edited.id).await.unwrap().is_none());
  let stored = s.get_contact(existing.id).await.unwrap().unwrap();
  assert_eq!(stored.field("firstname"), Some(&FieldValue::from("Zed")));
  assert_eq!(stored.field("city"), Some(&FieldValue::from("Lyon")));
  assert!(stored.tags.contains("t"));
  assert_eq!(stored.owner, Some(4));
}

#[tokio::test]
async fn edited_self_match_is_updated_in_place() {
  let s = store().await;
  let ann = s
    .create_contact(ContactDraft::default().with_field("email", "a@x.com"), None)
    .await
    .unwrap();

  let resolution = s
    .find_or_merge(
      candidate("a@x.com"),
      IncomingContact::Edited {
        id:      ann.id,
        changes: ContactDraft::default().with_field("firstname", "Ann"),
      },
      None,
    )
    .await
    .unwrap();

  assert!(matches!(resolution, Resolution::Updated { ref contact, .. } if contact.id == ann.id));
  let stored = s.get_contact(ann.id).await.unwrap().unwrap();
  assert_eq!(stored.field("firstname"), Some(&FieldValue::from("Ann")));
}

// ─── Merge ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn merge_deletes_loser_and_moves_history() {
  let s = store().await;
  let winner = s
    .create_contact(ContactDraft::default().with_field("email", "a@x.com"), None)
    .await
    .unwrap();
  let loser = s
    .create_contact(ContactDraft::default().with_field("city", "Lyon"), None)
    .await
    .unwrap();
  let utm = s
    .add_utm_tags(
      loser.id,
      UtmTagInput { utm_source: Some("google".into()), ..Default::default() },
    )
    .await
    .unwrap();

  let result = s.merge(loser.id, winner.id, None).await.unwrap();
  assert_eq!(result.survivor.id, winner.id);
  assert_eq!(result.absorbed, Some(loser.id));

  assert!(s.get_contact(loser.id).await.unwrap().is_none());
  let survivor = s.get_contact(winner.id).await.unwrap().unwrap();
  assert_eq!(survivor.field("city"), Some(&FieldValue::from("Lyon")));
  assert_eq!(survivor.utm_tags.len(), 1);
  assert_eq!(survivor.utm_tags[0].id, utm.id);

  assert!(s.remove_utm_tag(winner.id, utm.id).await.unwrap());
}

#[tokio::test]
async fn self_merge_is_reported_as_same_contact() {
  let s = store().await;
  let ann = s.create_contact(ContactDraft::default(), None).await.unwrap();

  let err = s.merge(ann.id, ann.id, None).await.unwrap_err();
  let core = err.as_core().expect("core error");
  assert!(matches!(core, roster_core::Error::SameContact(id) if *id == ann.id));
  assert!(core.is_benign());
}

#[tokio::test]
async fn strongest_opt_out_survives_merge() {
  let s = store().await;

  let mut manual = ContactDraft::default();
  manual
    .do_not_contact
    .push(DoNotContact::new("email", DncReason::Manual));
  let winner = s.create_contact(manual, None).await.unwrap();

  let mut unsubscribed = ContactDraft::default();
  unsubscribed
    .do_not_contact
    .push(DoNotContact::new("email", DncReason::Unsubscribed));
  let loser = s.create_contact(unsubscribed, None).await.unwrap();

  let result = s.merge(loser.id, winner.id, None).await.unwrap();
  assert_eq!(
    result.survivor.do_not_contact["email"].reason,
    DncReason::Unsubscribed
  );
}

#[tokio::test]
async fn merge_unions_relations() {
  let s = store().await;

  let mut a = ContactDraft::default().with_tag("x");
  a.lists.insert(1, joined("form"));
  a.points = 5;
  let winner = s.create_contact(a, None).await.unwrap();

  let mut b = ContactDraft::default().with_tag("x").with_tag("y");
  b.lists.insert(1, joined("import"));
  b.lists.insert(2, joined("import"));
  b.campaigns.insert(9, joined("import"));
  b.points = 3;
  let loser = s.create_contact(b, None).await.unwrap();

  s.merge(loser.id, winner.id, None).await.unwrap();
  let survivor = s.get_contact(winner.id).await.unwrap().unwrap();

  let tags: BTreeSet<String> = ["x", "y"].into_iter().map(str::to_owned).collect();
  assert_eq!(survivor.tags, tags);
  assert_eq!(survivor.lists.keys().copied().collect::<Vec<_>>(), [1, 2]);
  assert_eq!(survivor.lists[&1].source, "form");
  assert!(survivor.campaigns.contains_key(&9));
  assert_eq!(survivor.points, 8);
}

#[tokio::test]
async fn failed_merge_rolls_back() {
  let s = store().await;
  let winner = s
    .create_contact(ContactDraft::default().with_field("email", "a@x.com"), None)
    .await
    .unwrap();

  let err = s.merge(ContactId(999), winner.id, None).await.unwrap_err();
  assert!(matches!(
    err.as_core(),
    Some(roster_core::Error::NotFound(ContactId(999)))
  ));
  assert_eq!(s.get_contact(winner.id).await.unwrap(), Some(winner));
}

#[tokio::test]
async fn rejected_write_rolls_back_the_whole_merge() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("roster.db");
  let s = SqliteStore::open(&path).await.unwrap();
  let existing = s
    .create_contact(ContactDraft::default().with_field("email", "a@x.com"), None)
    .await
    .unwrap();

  let raw = rusqlite::Connection::open(&path).unwrap();
  raw
    .execute_batch(
      "CREATE TRIGGER reject_tag BEFORE INSERT ON contact_tags
       WHEN NEW.tag = 'blocked'
       BEGIN SELECT RAISE(ABORT, 'tag rejected'); END;",
    )
    .unwrap();

  let err = s
    .find_or_merge(
      candidate("a@x.com"),
      IncomingContact::Transient(
        ContactDraft::default()
          .with_field("email", "a@x.com")
          .with_field("firstname", "Ann")
          .with_tag("blocked"),
      ),
      None,
    )
    .await
    .unwrap_err();

  assert!(matches!(
    err.as_core(),
    Some(roster_core::Error::ConstraintViolation(_))
  ));
  assert_eq!(s.get_contact(existing.id).await.unwrap(), Some(existing));
}

// ─── Maintenance ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn dnc_add_and_remove() {
  let s = store().await;
  let ann = s.create_contact(ContactDraft::default(), None).await.unwrap();

  let err = s
    .add_do_not_contact(ann.id, DoNotContact::new("email", DncReason::Contactable))
    .await
    .unwrap_err();
  assert!(matches!(err.as_core(), Some(roster_core::Error::InvalidInput(_))));

  let contact = s
    .add_do_not_contact(ann.id, DoNotContact::new("email", DncReason::Bounced))
    .await
    .unwrap();
  assert!(!contact.is_contactable("email"));

  assert!(s.remove_do_not_contact(ann.id, "email".into()).await.unwrap());
  assert!(!s.remove_do_not_contact(ann.id, "email".into()).await.unwrap());
  let stored = s.get_contact(ann.id).await.unwrap().unwrap();
  assert!(stored.do_not_contact.is_empty());
}

#[tokio::test]
async fn modify_tags_adds_and_removes() {
  let s = store().await;
  let ann = s
    .create_contact(ContactDraft::default().with_tag("old"), None)
    .await
    .unwrap();

  s.modify_tags(ann.id, vec!["new".into(), " ".into()], vec!["old".into()])
    .await
    .unwrap();

  let stored = s.get_contact(ann.id).await.unwrap().unwrap();
  assert_eq!(stored.tags.into_iter().collect::<Vec<_>>(), ["new"]);
}

#[tokio::test]
async fn maintenance_on_missing_contact_is_not_found() {
  let s = store().await;
  let err = s
    .modify_tags(ContactId(5), vec!["x".into()], vec![])
    .await
    .unwrap_err();
  assert!(matches!(
    err.as_core(),
    Some(roster_core::Error::NotFound(ContactId(5)))
  ));
}

// ─── Concurrency ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_submissions_from_two_connections_yield_one_contact() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("roster.db");
  let a = SqliteStore::open(&path).await.unwrap();
  let b = SqliteStore::open(&path).await.unwrap();

  let submit = |s: SqliteStore, name: &'static str| async move {
    s.find_or_merge(
      candidate("a@x.com"),
      IncomingContact::Transient(
        ContactDraft::default()
          .with_field("email", "a@x.com")
          .with_field("firstname", name),
      ),
      None,
    )
    .await
  };

  let (first, second) = tokio::join!(submit(a.clone(), "Ann"), submit(b, "Anne"));
  let first = first.unwrap();
  let second = second.unwrap();
  assert_eq!(first.contact().id, second.contact().id);

  let found = a.find_duplicate(candidate("a@x.com")).await.unwrap().unwrap();
  assert!(found.ambiguous.is_empty());
}

#[tokio::test]
async fn concurrent_merges_into_one_winner_keep_both_losers() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("roster.db");
  let a = SqliteStore::open(&path).await.unwrap();
  let b = SqliteStore::open(&path).await.unwrap();

  let winner = a
    .create_contact(ContactDraft::default().with_field("email", "a@x.com"), None)
    .await
    .unwrap();
  let first = a
    .create_contact(
      ContactDraft::default().with_field("city", "Lyon").with_tag("one"),
      None,
    )
    .await
    .unwrap();
  let second = a
    .create_contact(
      ContactDraft::default().with_field("phone", "555").with_tag("two"),
      None,
    )
    .await
    .unwrap();

  let (left, right) = tokio::join!(
    a.merge(first.id, winner.id, None),
    b.merge(second.id, winner.id, None)
  );
  left.unwrap();
  right.unwrap();

  assert!(a.get_contact(first.id).await.unwrap().is_none());
  assert!(a.get_contact(second.id).await.unwrap().is_none());
  let survivor = a.get_contact(winner.id).await.unwrap().unwrap();
  assert_eq!(survivor.field("city"), Some(&FieldValue::from("Lyon")));
  assert_eq!(survivor.field("phone"), Some(&FieldValue::from("555")));
  assert!(survivor.tags.contains("one"));
  assert!(survivor.tags.contains("two"));
}

#[tokio::test]
async fn held_write_lock_surfaces_as_lock_contention() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("roster.db");
  let s = SqliteStore::open_with(
    &path,
    StoreOptions { lock_timeout: Duration::from_millis(50), ..Default::default() },
  )
  .await
  .unwrap();
  let ann = s.create_contact(ContactDraft::default(), None).await.unwrap();

  let raw = rusqlite::Connection::open(&path).unwrap();
  raw.execute_batch("BEGIN IMMEDIATE").unwrap();

  let err = s
    .modify_tags(ann.id, vec!["vip".into()], vec![])
    .await
    .unwrap_err();
  let core = err.as_core().expect("core error");
  assert!(matches!(core, roster_core::Error::LockContention));
  assert!(core.is_retryable());

  raw.execute_batch("COMMIT").unwrap();
  let contact = s
    .modify_tags(ann.id, vec!["vip".into()], vec![])
    .await
    .unwrap();
  assert!(contact.tags.contains("vip"));
}
