//! In-memory [`ContactTx`] used by the unit tests of this crate.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::{
  Error, Result,
  contact::{Contact, ContactDraft, ContactId, Manipulator},
  finder::MatchOperator,
  store::{Candidate, ContactTx},
};

#[derive(Debug, Default, Clone)]
pub struct MemoryTx {
  pub contacts: BTreeMap<ContactId, Contact>,
  pub locked:   BTreeSet<ContactId>,
  /// Contacts whose lock acquisition times out.
  pub busy:     BTreeSet<ContactId>,
  next_id:      i64,
}

impl MemoryTx {
  pub fn seed(&mut self, draft: ContactDraft) -> Contact {
    self.create(draft, None).expect("seed contact")
  }

  pub fn backdate(&mut self, id: ContactId, at: DateTime<Utc>) {
    if let Some(contact) = self.contacts.get_mut(&id) {
      contact.created_at = at;
    }
  }

  pub fn get(&self, id: ContactId) -> Option<&Contact> { self.contacts.get(&id) }
}

impl ContactTx for MemoryTx {
  fn lock(&mut self, id: ContactId) -> Result<()> {
    if self.busy.contains(&id) {
      return Err(Error::LockContention);
    }
    if !self.contacts.contains_key(&id) {
      return Err(Error::NotFound(id));
    }
    self.locked.insert(id);
    Ok(())
  }

  fn load(&mut self, id: ContactId) -> Result<Option<Contact>> {
    Ok(self.contacts.get(&id).cloned())
  }

  fn find_by_identifiers(
    &mut self,
    identifiers: &[(String, String)],
    operator: MatchOperator,
  ) -> Result<Vec<Candidate>> {
    let matches = |contact: &Contact, (field, value): &(String, String)| {
      contact
        .field(field)
        .and_then(|v| v.match_key())
        .is_some_and(|key| &key == value)
    };
    Ok(
      self
        .contacts
        .values()
        .filter(|c| match operator {
          MatchOperator::Any => identifiers.iter().any(|i| matches(c, i)),
          MatchOperator::All => identifiers.iter().all(|i| matches(c, i)),
        })
        .map(|c| Candidate { id: c.id, created_at: c.created_at })
        .collect(),
    )
  }

  fn create(
    &mut self,
    draft: ContactDraft,
    manipulator: Option<&Manipulator>,
  ) -> Result<Contact> {
    self.next_id += 1;
    let mut contact = draft.into_contact(ContactId(self.next_id), Utc::now());
    contact.manipulator = manipulator.cloned();
    self.contacts.insert(contact.id, contact.clone());
    Ok(contact)
  }

  fn save(&mut self, contact: &Contact) -> Result<()> {
    for other in self.contacts.values_mut().filter(|c| c.id != contact.id) {
      other.utm_tags.retain(|t| !contact.utm_tags.iter().any(|o| o.id == t.id));
      other.notes.retain(|n| !contact.notes.iter().any(|o| o.id == n.id));
      other.devices.retain(|d| !contact.devices.iter().any(|o| o.id == d.id));
    }
    self.contacts.insert(contact.id, contact.clone());
    Ok(())
  }

  fn delete(&mut self, id: ContactId) -> Result<()> {
    self.contacts.remove(&id).map(|_| ()).ok_or(Error::NotFound(id))
  }
}
