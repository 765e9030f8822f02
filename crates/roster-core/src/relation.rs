//! Records owned by a contact: do-not-contact entries, UTM tag history,
//! memberships, notes, and devices.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Outreach channel name, e.g. `"email"` or `"sms"`.
pub type Channel = String;

// ─── Do not contact ──────────────────────────────────────────────────────────

/// Why a channel is suppressed. Numeric codes match the legacy API.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DncReason {
  /// Not suppressed; a record that was lifted.
  Contactable,
  Unsubscribed,
  Bounced,
  Manual,
}

impl DncReason {
  pub fn code(self) -> u8 {
    match self {
      Self::Contactable => 0,
      Self::Unsubscribed => 1,
      Self::Bounced => 2,
      Self::Manual => 3,
    }
  }

  pub fn from_code(code: u8) -> Option<Self> {
    match code {
      0 => Some(Self::Contactable),
      1 => Some(Self::Unsubscribed),
      2 => Some(Self::Bounced),
      3 => Some(Self::Manual),
      _ => None,
    }
  }

  /// Higher is more restrictive. A contact's own unsubscribe outranks a
  /// bounce, which outranks an administrator's manual block.
  pub fn severity(self) -> u8 {
    match self {
      Self::Contactable => 0,
      Self::Manual => 1,
      Self::Bounced => 2,
      Self::Unsubscribed => 3,
    }
  }

  pub fn is_opt_out(self) -> bool { !matches!(self, Self::Contactable) }
}

/// A per-channel suppression record. At most one exists per
/// (contact, channel).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoNotContact {
  pub channel:    Channel,
  pub reason:     DncReason,
  #[serde(default)]
  pub comments:   String,
  /// Channel-specific object id, e.g. the email that bounced.
  #[serde(default)]
  pub channel_id: Option<i64>,
  pub date_added: DateTime<Utc>,
}

impl DoNotContact {
  pub fn new(channel: impl Into<Channel>, reason: DncReason) -> Self {
    Self {
      channel: channel.into(),
      reason,
      comments: String::new(),
      channel_id: None,
      date_added: Utc::now(),
    }
  }

  /// Whether `self` should replace `other` for the same channel.
  pub fn outranks(&self, other: &Self) -> bool {
    (self.reason.severity(), self.date_added)
      > (other.reason.severity(), other.date_added)
  }
}

// ─── UTM tags ────────────────────────────────────────────────────────────────

/// One recorded set of campaign-tracking parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtmTag {
  pub id:           Uuid,
  pub utm_campaign: Option<String>,
  pub utm_content:  Option<String>,
  pub utm_medium:   Option<String>,
  pub utm_source:   Option<String>,
  pub utm_term:     Option<String>,
  pub url:          Option<String>,
  pub referer:      Option<String>,
  #[serde(default)]
  pub query:        BTreeMap<String, String>,
  pub date_added:   DateTime<Utc>,
}

/// Caller-supplied UTM parameters; the id and timestamp are assigned on
/// insertion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UtmTagInput {
  pub utm_campaign: Option<String>,
  pub utm_content:  Option<String>,
  pub utm_medium:   Option<String>,
  pub utm_source:   Option<String>,
  pub utm_term:     Option<String>,
  pub url:          Option<String>,
  pub referer:      Option<String>,
  pub query:        BTreeMap<String, String>,
}

impl UtmTagInput {
  pub fn is_empty(&self) -> bool {
    self.utm_campaign.is_none()
      && self.utm_content.is_none()
      && self.utm_medium.is_none()
      && self.utm_source.is_none()
      && self.utm_term.is_none()
  }

  pub fn into_tag(self, date_added: DateTime<Utc>) -> UtmTag {
    UtmTag {
      id: Uuid::new_v4(),
      utm_campaign: self.utm_campaign,
      utm_content: self.utm_content,
      utm_medium: self.utm_medium,
      utm_source: self.utm_source,
      utm_term: self.utm_term,
      url: self.url,
      referer: self.referer,
      query: self.query,
      date_added,
    }
  }
}

// ─── Memberships ─────────────────────────────────────────────────────────────

/// Membership of a contact in a list or campaign. The owning map is keyed by
/// the list or campaign id, so each pair appears once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
  pub joined_at: DateTime<Utc>,
  /// How the contact joined, e.g. `"form"`, `"import"`, `"manual"`.
  pub source:    String,
}

// ─── Notes & devices ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
  pub id:         Uuid,
  pub text:       String,
  pub date_added: DateTime<Utc>,
}

/// A tracked device fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
  pub id:          Uuid,
  pub device:      String,
  pub fingerprint: Option<String>,
  pub date_added:  DateTime<Utc>,
}
