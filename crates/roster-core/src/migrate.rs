//! Relation migration: moves everything a losing contact owns onto the
//! winner.
//!
//! Keyed relations (DNC per channel, list and campaign memberships, tags) are
//! unioned; history records (UTM tags, notes, devices) change owner. The
//! collections are taken out of the loser, so once migration returns the
//! loser owns nothing and can be deleted.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::{
  Error, Result,
  contact::{CampaignId, Contact, ContactDraft, ListId},
  relation::{Channel, Device, DoNotContact, Membership, Note, UtmTag},
};

// ─── Relations bundle ────────────────────────────────────────────────────────

/// Everything a merge moves from the loser to the winner.
#[derive(Debug, Clone, Default)]
pub struct Relations {
  pub tags:            BTreeSet<String>,
  pub utm_tags:        Vec<UtmTag>,
  pub do_not_contact:  Vec<DoNotContact>,
  pub lists:           BTreeMap<ListId, Membership>,
  pub campaigns:       BTreeMap<CampaignId, Membership>,
  pub notes:           Vec<Note>,
  pub devices:         Vec<Device>,
  pub ip_addresses:    BTreeSet<String>,
  /// Added to the winner's score.
  pub points:          i64,
  pub last_active:     Option<DateTime<Utc>>,
  pub date_identified: Option<DateTime<Utc>>,
}

impl Relations {
  /// Take every relation out of `contact`, leaving its collections empty.
  pub fn drain_from(contact: &mut Contact) -> Self {
    Self {
      tags:            std::mem::take(&mut contact.tags),
      utm_tags:        std::mem::take(&mut contact.utm_tags),
      do_not_contact:  std::mem::take(&mut contact.do_not_contact)
        .into_values()
        .collect(),
      lists:           std::mem::take(&mut contact.lists),
      campaigns:       std::mem::take(&mut contact.campaigns),
      notes:           std::mem::take(&mut contact.notes),
      devices:         std::mem::take(&mut contact.devices),
      ip_addresses:    std::mem::take(&mut contact.ip_addresses),
      points:          std::mem::take(&mut contact.points),
      last_active:     contact.last_active.take(),
      date_identified: contact.date_identified.take(),
    }
  }

  /// Take the relation-like parts of a submitted draft.
  pub fn drain_from_draft(draft: &mut ContactDraft) -> Self {
    Self {
      tags: std::mem::take(&mut draft.tags),
      utm_tags: std::mem::take(&mut draft.utm_tags),
      do_not_contact: std::mem::take(&mut draft.do_not_contact),
      lists: std::mem::take(&mut draft.lists),
      campaigns: std::mem::take(&mut draft.campaigns),
      ip_addresses: std::mem::take(&mut draft.ip_addresses),
      points: std::mem::take(&mut draft.points),
      last_active: draft.last_active.take(),
      ..Self::default()
    }
  }
}

// ─── Log ─────────────────────────────────────────────────────────────────────

/// What the migration absorbed from the loser.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelationLog {
  /// Channels the winner had no record for.
  pub dnc_added:          Vec<Channel>,
  /// Channels where the loser's record outranked the winner's.
  pub dnc_replaced:       Vec<Channel>,
  pub tags_added:         Vec<String>,
  pub lists_added:        Vec<ListId>,
  pub campaigns_added:    Vec<CampaignId>,
  pub utm_tags_moved:     Vec<Uuid>,
  pub notes_moved:        Vec<Uuid>,
  pub devices_moved:      Vec<Uuid>,
  pub ip_addresses_added: Vec<String>,
  pub points_added:       i64,
}

impl RelationLog {
  /// Fold a later migration step into this log.
  pub fn append(&mut self, other: RelationLog) {
    self.dnc_added.extend(other.dnc_added);
    self.dnc_replaced.extend(other.dnc_replaced);
    self.tags_added.extend(other.tags_added);
    self.lists_added.extend(other.lists_added);
    self.campaigns_added.extend(other.campaigns_added);
    self.utm_tags_moved.extend(other.utm_tags_moved);
    self.notes_moved.extend(other.notes_moved);
    self.devices_moved.extend(other.devices_moved);
    self.ip_addresses_added.extend(other.ip_addresses_added);
    self.points_added += other.points_added;
  }
}

// ─── DNC precedence ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DncOutcome {
  Added,
  Replaced,
  Kept,
}

/// Insert `record` unless the channel already holds a record that outranks
/// it. An opt-out is therefore never lifted by absorbing another record.
pub fn absorb_dnc(
  target: &mut BTreeMap<Channel, DoNotContact>,
  record: DoNotContact,
) -> DncOutcome {
  match target.get(&record.channel) {
    None => {
      target.insert(record.channel.clone(), record);
      DncOutcome::Added
    }
    Some(current) if record.outranks(current) => {
      target.insert(record.channel.clone(), record);
      DncOutcome::Replaced
    }
    Some(_) => DncOutcome::Kept,
  }
}

// ─── Migration ───────────────────────────────────────────────────────────────

/// Move `loser` onto `winner`.
///
/// Fails with [`Error::ConstraintViolation`] if a history record id is
/// already owned by the winner, which means the same row would be claimed
/// twice.
pub fn migrate_relations(
  winner: &mut Contact,
  loser: Relations,
) -> Result<RelationLog> {
  let mut log = RelationLog::default();

  for record in loser.do_not_contact {
    let channel = record.channel.clone();
    match absorb_dnc(&mut winner.do_not_contact, record) {
      DncOutcome::Added => log.dnc_added.push(channel),
      DncOutcome::Replaced => log.dnc_replaced.push(channel),
      DncOutcome::Kept => {}
    }
  }

  for tag in loser.tags {
    if winner.tags.insert(tag.clone()) {
      log.tags_added.push(tag);
    }
  }

  for (list_id, membership) in loser.lists {
    if let std::collections::btree_map::Entry::Vacant(slot) =
      winner.lists.entry(list_id)
    {
      slot.insert(membership);
      log.lists_added.push(list_id);
    }
  }

  for (campaign_id, membership) in loser.campaigns {
    if let std::collections::btree_map::Entry::Vacant(slot) =
      winner.campaigns.entry(campaign_id)
    {
      slot.insert(membership);
      log.campaigns_added.push(campaign_id);
    }
  }

  log.utm_tags_moved =
    reparent("utm tag", &mut winner.utm_tags, loser.utm_tags, |t| t.id)?;
  log.notes_moved = reparent("note", &mut winner.notes, loser.notes, |n| n.id)?;
  log.devices_moved =
    reparent("device", &mut winner.devices, loser.devices, |d| d.id)?;

  for ip in loser.ip_addresses {
    if winner.ip_addresses.insert(ip.clone()) {
      log.ip_addresses_added.push(ip);
    }
  }

  winner.points += loser.points;
  log.points_added = loser.points;

  winner.last_active = winner.last_active.max(loser.last_active);
  winner.date_identified = match (winner.date_identified, loser.date_identified) {
    (Some(ours), Some(theirs)) => Some(ours.min(theirs)),
    (ours, theirs) => ours.or(theirs),
  };

  debug!(
    contact = %winner.id,
    dnc_added = log.dnc_added.len(),
    dnc_replaced = log.dnc_replaced.len(),
    tags_added = log.tags_added.len(),
    lists_added = log.lists_added.len(),
    campaigns_added = log.campaigns_added.len(),
    utm_tags_moved = log.utm_tags_moved.len(),
    "relations migrated"
  );

  Ok(log)
}

fn reparent<T>(
  kind: &str,
  target: &mut Vec<T>,
  incoming: Vec<T>,
  id_of: impl Fn(&T) -> Uuid,
) -> Result<Vec<Uuid>> {
  let mut owned: HashSet<Uuid> = target.iter().map(&id_of).collect();
  let mut moved = Vec::with_capacity(incoming.len());
  for record in incoming {
    let id = id_of(&record);
    if !owned.insert(id) {
      return Err(Error::ConstraintViolation(format!(
        "{kind} {id} is already owned by the surviving contact"
      )));
    }
    moved.push(id);
    target.push(record);
  }
  Ok(moved)
}
