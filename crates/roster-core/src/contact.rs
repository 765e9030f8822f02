//! Contact types: the person record that deduplication operates on.
//!
//! A [`Contact`] is always fully loaded: its field map and every relation
//! collection live in memory, so merge steps never rely on lazy loading.

use std::{
  collections::{BTreeMap, BTreeSet},
  fmt,
};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::relation::{
  Channel, Device, DoNotContact, Membership, Note, UtmTag,
};

// ─── Identifiers ─────────────────────────────────────────────────────────────

/// Store-assigned identifier of a persisted contact.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ContactId(pub i64);

impl fmt::Display for ContactId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Reference to the user who owns a contact.
pub type OwnerId = i64;

/// Reference to a lifecycle stage.
pub type StageId = i64;

/// Reference to a segment (contact list).
pub type ListId = i64;

/// Reference to a campaign.
pub type CampaignId = i64;

// ─── Field values ────────────────────────────────────────────────────────────

/// A single custom or core field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
  Null,
  Text(String),
  Number(f64),
  Boolean(bool),
  Date(NaiveDate),
  DateTime(DateTime<Utc>),
}

impl FieldValue {
  /// Null and whitespace-only text count as empty.
  pub fn is_empty(&self) -> bool {
    match self {
      Self::Null => true,
      Self::Text(s) => s.trim().is_empty(),
      _ => false,
    }
  }

  /// The comparable instant for date-like values. Dates compare at midnight
  /// UTC. Text counts when it holds an RFC 3339 timestamp or a `YYYY-MM-DD`
  /// date.
  pub fn as_instant(&self) -> Option<DateTime<Utc>> {
    match self {
      Self::Date(d) => midnight(*d),
      Self::DateTime(dt) => Some(*dt),
      Self::Text(s) => match Self::parse_temporal(s)? {
        Self::Date(d) => midnight(d),
        Self::DateTime(dt) => Some(dt),
        _ => None,
      },
      _ => None,
    }
  }

  /// Read `raw` as a [`FieldValue::DateTime`] or [`FieldValue::Date`], if it
  /// has either shape.
  pub fn parse_temporal(raw: &str) -> Option<Self> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
      return Some(Self::DateTime(dt.with_timezone(&Utc)));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok().map(Self::Date)
  }

  /// Normalised text used for identifier matching, or `None` for values that
  /// cannot identify a contact.
  pub fn match_key(&self) -> Option<String> {
    let raw = match self {
      Self::Text(s) => s.clone(),
      Self::Number(n) => n.to_string(),
      Self::Null | Self::Boolean(_) | Self::Date(_) | Self::DateTime(_) => {
        return None;
      }
    };
    normalize_identifier(&raw)
  }
}

fn midnight(date: NaiveDate) -> Option<DateTime<Utc>> {
  date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc())
}

impl From<&str> for FieldValue {
  fn from(s: &str) -> Self { Self::Text(s.to_owned()) }
}

impl From<String> for FieldValue {
  fn from(s: String) -> Self { Self::Text(s) }
}

/// Trim and lowercase an identifier value; empty input is not an identifier.
pub fn normalize_identifier(raw: &str) -> Option<String> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    None
  } else {
    Some(trimmed.to_lowercase())
  }
}

pub type FieldMap = BTreeMap<String, FieldValue>;

// ─── Audit ───────────────────────────────────────────────────────────────────

/// Who or what performed the last mutation of a contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manipulator {
  /// Subsystem that made the change, e.g. `"lead"`.
  pub bundle:      String,
  /// Entry point within the subsystem, e.g. `"api-single"`.
  pub object:      String,
  pub object_id:   Option<i64>,
  /// Human-readable actor, typically a user name.
  pub description: Option<String>,
}

impl Manipulator {
  pub fn new(bundle: impl Into<String>, object: impl Into<String>) -> Self {
    Self {
      bundle:      bundle.into(),
      object:      object.into(),
      object_id:   None,
      description: None,
    }
  }

  pub fn with_description(mut self, description: impl Into<String>) -> Self {
    self.description = Some(description.into());
    self
  }
}

// ─── Contact ─────────────────────────────────────────────────────────────────

/// A persisted contact with every relation loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
  pub id:              ContactId,
  pub fields:          FieldMap,
  pub owner:           Option<OwnerId>,
  pub stage:           Option<StageId>,
  pub points:          i64,
  pub tags:            BTreeSet<String>,
  pub utm_tags:        Vec<UtmTag>,
  pub do_not_contact:  BTreeMap<Channel, DoNotContact>,
  pub lists:           BTreeMap<ListId, Membership>,
  pub campaigns:       BTreeMap<CampaignId, Membership>,
  pub notes:           Vec<Note>,
  pub devices:         Vec<Device>,
  pub ip_addresses:    BTreeSet<String>,
  pub created_at:      DateTime<Utc>,
  pub last_active:     Option<DateTime<Utc>>,
  pub date_identified: Option<DateTime<Utc>>,
  pub manipulator:     Option<Manipulator>,
}

impl Contact {
  pub fn field(&self, name: &str) -> Option<&FieldValue> {
    self.fields.get(name)
  }

  /// `true` unless the channel carries an opt-out record.
  pub fn is_contactable(&self, channel: &str) -> bool {
    self
      .do_not_contact
      .get(channel)
      .is_none_or(|dnc| !dnc.reason.is_opt_out())
  }
}

// ─── Draft ───────────────────────────────────────────────────────────────────

/// Submitted contact data that has not been persisted yet.
///
/// Every value in a draft was set explicitly by the submitter, which is what
/// lets it override protected fields during reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactDraft {
  pub fields:         FieldMap,
  pub owner:          Option<OwnerId>,
  pub stage:          Option<StageId>,
  pub points:         i64,
  pub tags:           BTreeSet<String>,
  pub utm_tags:       Vec<UtmTag>,
  pub do_not_contact: Vec<DoNotContact>,
  pub lists:          BTreeMap<ListId, Membership>,
  pub campaigns:      BTreeMap<CampaignId, Membership>,
  pub ip_addresses:   BTreeSet<String>,
  pub last_active:    Option<DateTime<Utc>>,
}

impl ContactDraft {
  pub fn with_field(
    mut self,
    name: impl Into<String>,
    value: impl Into<FieldValue>,
  ) -> Self {
    self.fields.insert(name.into(), value.into());
    self
  }

  pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
    self.tags.insert(tag.into());
    self
  }

  /// Materialise the draft as a brand-new contact with the given identity.
  ///
  /// Empty field values are dropped; DNC records keep the most restrictive
  /// entry per channel.
  pub fn into_contact(self, id: ContactId, now: DateTime<Utc>) -> Contact {
    let mut do_not_contact: BTreeMap<Channel, DoNotContact> = BTreeMap::new();
    for record in self.do_not_contact {
      crate::migrate::absorb_dnc(&mut do_not_contact, record);
    }

    Contact {
      id,
      fields: self
        .fields
        .into_iter()
        .filter(|(_, v)| !v.is_empty())
        .collect(),
      owner: self.owner,
      stage: self.stage,
      points: self.points,
      tags: self.tags,
      utm_tags: self.utm_tags,
      do_not_contact,
      lists: self.lists,
      campaigns: self.campaigns,
      notes: Vec::new(),
      devices: Vec::new(),
      ip_addresses: self.ip_addresses,
      created_at: now,
      last_active: self.last_active,
      date_identified: None,
      manipulator: None,
    }
  }
}

// ─── Incoming side of a merge ────────────────────────────────────────────────

/// The contact being submitted: already stored, stored with submitted edits,
/// or pure data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum IncomingContact {
  Persisted(ContactId),
  /// A stored contact plus changes submitted for it in the same request.
  /// The changes count as explicitly set.
  Edited { id: ContactId, changes: ContactDraft },
  Transient(ContactDraft),
}

impl IncomingContact {
  pub fn persisted_id(&self) -> Option<ContactId> {
    match self {
      Self::Persisted(id) | Self::Edited { id, .. } => Some(*id),
      Self::Transient(_) => None,
    }
  }
}
