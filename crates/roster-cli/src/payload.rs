//! JSON request bodies accepted by the `upsert` and `find` commands.

use std::collections::BTreeMap;

use anyhow::bail;
use chrono::{DateTime, Utc};
use roster_core::{
  contact::{ContactDraft, ContactId, FieldMap, FieldValue, IncomingContact},
  relation::{DncReason, DoNotContact, Membership, UtmTagInput},
};
use serde::Deserialize;

/// A contact submission. When `id` is present the stored contact is the
/// incoming side and any other attributes are changes applied to it, on top
/// of driving the duplicate lookup.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ContactPayload {
  pub id:             Option<i64>,
  pub fields:         BTreeMap<String, serde_json::Value>,
  pub owner:          Option<i64>,
  pub stage:          Option<i64>,
  pub points:         i64,
  pub tags:           Vec<String>,
  pub utm_tags:       Vec<UtmTagInput>,
  pub do_not_contact: Vec<DncPayload>,
  pub lists:          Vec<i64>,
  pub campaigns:      Vec<i64>,
  pub ip_addresses:   Vec<String>,
  pub last_active:    Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct DncPayload {
  #[serde(default = "default_channel")]
  pub channel:    String,
  #[serde(default = "default_reason")]
  pub reason:     DncReason,
  #[serde(default)]
  pub comments:   String,
  #[serde(default)]
  pub channel_id: Option<i64>,
}

fn default_channel() -> String { "email".to_owned() }

fn default_reason() -> DncReason { DncReason::Manual }

impl From<DncPayload> for DoNotContact {
  fn from(p: DncPayload) -> Self {
    Self {
      comments: p.comments,
      channel_id: p.channel_id,
      ..DoNotContact::new(p.channel, p.reason)
    }
  }
}

impl ContactPayload {
  /// The attributes used for the duplicate lookup.
  pub fn candidate(&self) -> anyhow::Result<FieldMap> {
    self
      .fields
      .iter()
      .map(|(k, v)| Ok((k.clone(), field_value(v)?)))
      .collect()
  }

  pub fn into_incoming(self) -> anyhow::Result<IncomingContact> {
    let id = self.id.map(ContactId);
    let draft = self.into_draft()?;
    Ok(match id {
      Some(id) if draft == ContactDraft::default() => IncomingContact::Persisted(id),
      Some(id) => IncomingContact::Edited { id, changes: draft },
      None => IncomingContact::Transient(draft),
    })
  }

  fn into_draft(self) -> anyhow::Result<ContactDraft> {
    let now = Utc::now();
    let joined = || Membership { joined_at: now, source: "api".to_owned() };

    let draft = ContactDraft {
      fields:         self.candidate()?,
      owner:          self.owner,
      stage:          self.stage,
      points:         self.points,
      tags:           self
        .tags
        .into_iter()
        .map(|t| t.trim().to_owned())
        .filter(|t| !t.is_empty())
        .collect(),
      utm_tags:       self
        .utm_tags
        .into_iter()
        .filter(|u| !u.is_empty())
        .map(|u| u.into_tag(now))
        .collect(),
      do_not_contact: self.do_not_contact.into_iter().map(Into::into).collect(),
      lists:          self.lists.into_iter().map(|id| (id, joined())).collect(),
      campaigns:      self.campaigns.into_iter().map(|id| (id, joined())).collect(),
      ip_addresses:   self.ip_addresses.into_iter().collect(),
      last_active:    self.last_active,
    };
    Ok(draft)
  }
}

/// Map a JSON scalar onto a field value. Strings shaped like an RFC 3339
/// timestamp or a `YYYY-MM-DD` date become temporal values. Nested values
/// are rejected.
fn field_value(v: &serde_json::Value) -> anyhow::Result<FieldValue> {
  use serde_json::Value;
  Ok(match v {
    Value::Null => FieldValue::Null,
    Value::Bool(b) => FieldValue::Boolean(*b),
    Value::Number(n) => match n.as_f64() {
      Some(f) => FieldValue::Number(f),
      None => bail!("number out of range: {n}"),
    },
    Value::String(s) => {
      FieldValue::parse_temporal(s).unwrap_or_else(|| FieldValue::Text(s.clone()))
    }
    Value::Array(_) | Value::Object(_) => bail!("field values must be scalars"),
  })
}
