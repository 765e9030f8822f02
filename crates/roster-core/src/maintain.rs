//! Single-contact maintenance: DNC, UTM tag, and tag edits.
//!
//! Each function locks the contact, edits the loaded copy, and saves it
//! within the caller's transaction.

use tracing::debug;
use uuid::Uuid;

use crate::{
  Error, Result,
  contact::{Contact, ContactId},
  relation::{DncReason, DoNotContact, UtmTag, UtmTagInput},
  store::ContactTx,
};

fn load_locked<T: ContactTx + ?Sized>(tx: &mut T, id: ContactId) -> Result<Contact> {
  tx.lock(id)?;
  tx.load(id)?.ok_or(Error::NotFound(id))
}

/// Suppress a channel. An explicit add replaces whatever record the channel
/// held before.
pub fn add_do_not_contact<T: ContactTx + ?Sized>(
  tx: &mut T,
  id: ContactId,
  record: DoNotContact,
) -> Result<Contact> {
  if record.reason == DncReason::Contactable {
    return Err(Error::InvalidInput(
      "reason must be unsubscribed, bounced, or manual".to_owned(),
    ));
  }
  if record.channel.trim().is_empty() {
    return Err(Error::InvalidInput("channel must not be empty".to_owned()));
  }

  let mut contact = load_locked(tx, id)?;
  debug!(contact = %id, channel = %record.channel, reason = %record.reason, "adding dnc");
  contact.do_not_contact.insert(record.channel.clone(), record);
  tx.save(&contact)?;
  Ok(contact)
}

/// Lift the suppression on `channel`. Returns whether a record existed.
pub fn remove_do_not_contact<T: ContactTx + ?Sized>(
  tx: &mut T,
  id: ContactId,
  channel: &str,
) -> Result<bool> {
  let mut contact = load_locked(tx, id)?;
  let found = contact.do_not_contact.remove(channel).is_some();
  if found {
    tx.save(&contact)?;
  }
  Ok(found)
}

pub fn add_utm_tags<T: ContactTx + ?Sized>(
  tx: &mut T,
  id: ContactId,
  input: UtmTagInput,
) -> Result<UtmTag> {
  if input.is_empty() {
    return Err(Error::InvalidInput("no utm parameters given".to_owned()));
  }

  let mut contact = load_locked(tx, id)?;
  let tag = input.into_tag(chrono::Utc::now());
  contact.utm_tags.push(tag.clone());
  tx.save(&contact)?;
  Ok(tag)
}

/// Returns whether the UTM record belonged to the contact.
pub fn remove_utm_tag<T: ContactTx + ?Sized>(
  tx: &mut T,
  id: ContactId,
  utm_id: Uuid,
) -> Result<bool> {
  let mut contact = load_locked(tx, id)?;
  let before = contact.utm_tags.len();
  contact.utm_tags.retain(|t| t.id != utm_id);
  let found = contact.utm_tags.len() != before;
  if found {
    tx.save(&contact)?;
  }
  Ok(found)
}

/// Add and remove tags in one step. Blank tag names are ignored.
pub fn modify_tags<T: ContactTx + ?Sized>(
  tx: &mut T,
  id: ContactId,
  add: &[String],
  remove: &[String],
) -> Result<Contact> {
  let mut contact = load_locked(tx, id)?;
  for tag in remove {
    contact.tags.remove(tag.trim());
  }
  for tag in add.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
    contact.tags.insert(tag.to_owned());
  }
  tx.save(&contact)?;
  Ok(contact)
}

pub fn delete<T: ContactTx + ?Sized>(tx: &mut T, id: ContactId) -> Result<()> {
  tx.lock(id)?;
  tx.delete(id)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{contact::ContactDraft, memory::MemoryTx};

  #[test]
  fn contactable_is_not_a_valid_dnc_reason() {
    let mut tx = MemoryTx::default();
    let ann = tx.seed(ContactDraft::default());

    let err = add_do_not_contact(
      &mut tx,
      ann.id,
      DoNotContact::new("email", DncReason::Contactable),
    )
    .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
  }

  #[test]
  fn dnc_add_then_remove() {
    let mut tx = MemoryTx::default();
    let ann = tx.seed(ContactDraft::default());

    let contact =
      add_do_not_contact(&mut tx, ann.id, DoNotContact::new("email", DncReason::Manual))
        .unwrap();
    assert!(!contact.is_contactable("email"));

    assert!(remove_do_not_contact(&mut tx, ann.id, "email").unwrap());
    assert!(!remove_do_not_contact(&mut tx, ann.id, "email").unwrap());
    assert!(tx.get(ann.id).unwrap().is_contactable("email"));
  }

  #[test]
  fn utm_tags_add_and_remove() {
    let mut tx = MemoryTx::default();
    let ann = tx.seed(ContactDraft::default());

    assert!(matches!(
      add_utm_tags(&mut tx, ann.id, UtmTagInput::default()),
      Err(Error::InvalidInput(_))
    ));

    let tag = add_utm_tags(
      &mut tx,
      ann.id,
      UtmTagInput { utm_source: Some("google".into()), ..Default::default() },
    )
    .unwrap();
    assert_eq!(tx.get(ann.id).unwrap().utm_tags.len(), 1);

    assert!(remove_utm_tag(&mut tx, ann.id, tag.id).unwrap());
    assert!(!remove_utm_tag(&mut tx, ann.id, tag.id).unwrap());
  }

  #[test]
  fn tags_are_trimmed_and_deduplicated() {
    let mut tx = MemoryTx::default();
    let ann = tx.seed(ContactDraft::default().with_tag("old"));

    let contact = modify_tags(
      &mut tx,
      ann.id,
      &["new ".to_owned(), "new".to_owned(), " ".to_owned()],
      &["old".to_owned()],
    )
    .unwrap();

    assert_eq!(contact.tags.iter().collect::<Vec<_>>(), ["new"]);
  }

  #[test]
  fn operations_on_missing_contacts_fail() {
    let mut tx = MemoryTx::default();
    assert!(matches!(
      delete(&mut tx, ContactId(4)),
      Err(Error::NotFound(ContactId(4)))
    ));
    assert!(matches!(
      modify_tags(&mut tx, ContactId(4), &[], &[]),
      Err(Error::NotFound(_))
    ));
  }
}
