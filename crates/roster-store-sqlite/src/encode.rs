//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as RFC 3339 strings. Field values, manipulators,
//! and UTM query maps are stored as compact JSON. UUIDs are stored as
//! hyphenated lowercase strings.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use roster_core::{
  contact::{ContactId, FieldValue, Manipulator},
  relation::{Device, DncReason, DoNotContact, Membership, Note, UtmTag},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn decode_opt_dt(s: Option<&str>) -> Result<Option<DateTime<Utc>>> {
  s.map(decode_dt).transpose()
}

// ─── FieldValue ───────────────────────────────────────────────────────────────

pub fn encode_field_value(v: &FieldValue) -> Result<String> {
  Ok(serde_json::to_string(v)?)
}

pub fn decode_field_value(s: &str) -> Result<FieldValue> {
  Ok(serde_json::from_str(s)?)
}

// ─── DncReason ────────────────────────────────────────────────────────────────

pub fn encode_reason(r: &DncReason) -> &str { r.as_ref() }

pub fn decode_reason(s: &str) -> Result<DncReason> {
  s.parse().map_err(|_| Error::UnknownValue {
    kind:  "dnc reason",
    value: s.to_owned(),
  })
}

// ─── Manipulator ──────────────────────────────────────────────────────────────

pub fn encode_manipulator(m: Option<&Manipulator>) -> Result<Option<String>> {
  m.map(serde_json::to_string).transpose().map_err(Error::from)
}

pub fn decode_manipulator(s: Option<&str>) -> Result<Option<Manipulator>> {
  s.map(serde_json::from_str).transpose().map_err(Error::from)
}

// ─── UTM query ────────────────────────────────────────────────────────────────

pub fn encode_query(q: &BTreeMap<String, String>) -> Result<String> {
  Ok(serde_json::to_string(q)?)
}

pub fn decode_query(s: &str) -> Result<BTreeMap<String, String>> {
  Ok(serde_json::from_str(s)?)
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read directly from a `contacts` row.
pub struct RawContact {
  pub contact_id:      i64,
  pub owner_id:        Option<i64>,
  pub stage_id:        Option<i64>,
  pub points:          i64,
  pub created_at:      String,
  pub last_active:     Option<String>,
  pub date_identified: Option<String>,
  pub manipulator:     Option<String>,
}

impl RawContact {
  pub fn id(&self) -> ContactId { ContactId(self.contact_id) }
}

/// Raw strings read from a `do_not_contact` row.
pub struct RawDnc {
  pub channel:    String,
  pub reason:     String,
  pub comments:   String,
  pub channel_id: Option<i64>,
  pub date_added: String,
}

impl RawDnc {
  pub fn into_dnc(self) -> Result<DoNotContact> {
    Ok(DoNotContact {
      reason:     decode_reason(&self.reason)?,
      date_added: decode_dt(&self.date_added)?,
      channel:    self.channel,
      comments:   self.comments,
      channel_id: self.channel_id,
    })
  }
}

/// Raw strings read from a `utm_tags` row.
pub struct RawUtmTag {
  pub utm_id:       String,
  pub utm_campaign: Option<String>,
  pub utm_content:  Option<String>,
  pub utm_medium:   Option<String>,
  pub utm_source:   Option<String>,
  pub utm_term:     Option<String>,
  pub url:          Option<String>,
  pub referer:      Option<String>,
  pub query:        String,
  pub date_added:   String,
}

impl RawUtmTag {
  pub fn into_utm_tag(self) -> Result<UtmTag> {
    Ok(UtmTag {
      id:           decode_uuid(&self.utm_id)?,
      utm_campaign: self.utm_campaign,
      utm_content:  self.utm_content,
      utm_medium:   self.utm_medium,
      utm_source:   self.utm_source,
      utm_term:     self.utm_term,
      url:          self.url,
      referer:      self.referer,
      query:        decode_query(&self.query)?,
      date_added:   decode_dt(&self.date_added)?,
    })
  }
}

/// Raw values read from a `list_memberships` or `campaign_memberships` row.
pub struct RawMembership {
  pub target_id: i64,
  pub joined_at: String,
  pub source:    String,
}

impl RawMembership {
  pub fn into_entry(self) -> Result<(i64, Membership)> {
    Ok((self.target_id, Membership {
      joined_at: decode_dt(&self.joined_at)?,
      source:    self.source,
    }))
  }
}

pub struct RawNote {
  pub note_id:    String,
  pub text:       String,
  pub date_added: String,
}

impl RawNote {
  pub fn into_note(self) -> Result<Note> {
    Ok(Note {
      id:         decode_uuid(&self.note_id)?,
      text:       self.text,
      date_added: decode_dt(&self.date_added)?,
    })
  }
}

pub struct RawDevice {
  pub device_id:   String,
  pub device:      String,
  pub fingerprint: Option<String>,
  pub date_added:  String,
}

impl RawDevice {
  pub fn into_device(self) -> Result<Device> {
    Ok(Device {
      id:          decode_uuid(&self.device_id)?,
      device:      self.device,
      fingerprint: self.fingerprint,
      date_added:  decode_dt(&self.date_added)?,
    })
  }
}
