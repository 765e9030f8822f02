//! [`SqliteTx`], the transaction-scoped [`ContactTx`] the merge engine runs
//! against.
//!
//! Every method executes on the connection of an already-open transaction;
//! the caller decides whether it commits.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension as _, params};

use roster_core::{
  contact::{Contact, ContactDraft, ContactId, Manipulator},
  finder::MatchOperator,
  store::{Candidate, ContactTx},
};

use crate::{
  Error, Result,
  encode::{
    RawContact, RawDevice, RawDnc, RawMembership, RawNote, RawUtmTag,
    decode_dt, decode_field_value, decode_manipulator, decode_opt_dt,
    encode_dt, encode_field_value, encode_manipulator, encode_query,
    encode_reason, encode_uuid,
  },
};

pub struct SqliteTx<'a> {
  conn: &'a Connection,
}

impl<'a> SqliteTx<'a> {
  pub fn new(conn: &'a Connection) -> Self { Self { conn } }

  // ── Reads ─────────────────────────────────────────────────────────────────

  fn load_contact(&self, id: ContactId) -> Result<Option<Contact>> {
    let raw = self
      .conn
      .query_row(
        "SELECT contact_id, owner_id, stage_id, points, created_at,
                last_active, date_identified, manipulator
         FROM contacts WHERE contact_id = ?1",
        params![id.0],
        |r| {
          Ok(RawContact {
            contact_id:      r.get(0)?,
            owner_id:        r.get(1)?,
            stage_id:        r.get(2)?,
            points:          r.get(3)?,
            created_at:      r.get(4)?,
            last_active:     r.get(5)?,
            date_identified: r.get(6)?,
            manipulator:     r.get(7)?,
          })
        },
      )
      .optional()?;

    let Some(raw) = raw else {
      return Ok(None);
    };
    let id = raw.id();

    let mut contact = Contact {
      id,
      fields: Default::default(),
      owner: raw.owner_id,
      stage: raw.stage_id,
      points: raw.points,
      tags: Default::default(),
      utm_tags: Vec::new(),
      do_not_contact: Default::default(),
      lists: Default::default(),
      campaigns: Default::default(),
      notes: Vec::new(),
      devices: Vec::new(),
      ip_addresses: Default::default(),
      created_at: decode_dt(&raw.created_at)?,
      last_active: decode_opt_dt(raw.last_active.as_deref())?,
      date_identified: decode_opt_dt(raw.date_identified.as_deref())?,
      manipulator: decode_manipulator(raw.manipulator.as_deref())?,
    };

    let fields: Vec<(String, String)> = self
      .conn
      .prepare("SELECT field, value_json FROM contact_fields WHERE contact_id = ?1")?
      .query_map(params![id.0], |r| Ok((r.get(0)?, r.get(1)?)))?
      .collect::<rusqlite::Result<_>>()?;
    for (field, value) in fields {
      contact.fields.insert(field, decode_field_value(&value)?);
    }

    contact.tags = self
      .conn
      .prepare("SELECT tag FROM contact_tags WHERE contact_id = ?1")?
      .query_map(params![id.0], |r| r.get(0))?
      .collect::<rusqlite::Result<_>>()?;

    contact.ip_addresses = self
      .conn
      .prepare("SELECT ip_address FROM ip_addresses WHERE contact_id = ?1")?
      .query_map(params![id.0], |r| r.get(0))?
      .collect::<rusqlite::Result<_>>()?;

    let dnc: Vec<RawDnc> = self
      .conn
      .prepare(
        "SELECT channel, reason, comments, channel_id, date_added
         FROM do_not_contact WHERE contact_id = ?1",
      )?
      .query_map(params![id.0], |r| {
        Ok(RawDnc {
          channel:    r.get(0)?,
          reason:     r.get(1)?,
          comments:   r.get(2)?,
          channel_id: r.get(3)?,
          date_added: r.get(4)?,
        })
      })?
      .collect::<rusqlite::Result<_>>()?;
    for raw in dnc {
      let record = raw.into_dnc()?;
      contact.do_not_contact.insert(record.channel.clone(), record);
    }

    let utm: Vec<RawUtmTag> = self
      .conn
      .prepare(
        "SELECT utm_id, utm_campaign, utm_content, utm_medium, utm_source,
                utm_term, url, referer, query, date_added
         FROM utm_tags WHERE contact_id = ?1
         ORDER BY date_added, utm_id",
      )?
      .query_map(params![id.0], |r| {
        Ok(RawUtmTag {
          utm_id:       r.get(0)?,
          utm_campaign: r.get(1)?,
          utm_content:  r.get(2)?,
          utm_medium:   r.get(3)?,
          utm_source:   r.get(4)?,
          utm_term:     r.get(5)?,
          url:          r.get(6)?,
          referer:      r.get(7)?,
          query:        r.get(8)?,
          date_added:   r.get(9)?,
        })
      })?
      .collect::<rusqlite::Result<_>>()?;
    contact.utm_tags = utm
      .into_iter()
      .map(RawUtmTag::into_utm_tag)
      .collect::<Result<_>>()?;

    contact.lists = self
      .memberships(
        "SELECT list_id, joined_at, source FROM list_memberships WHERE contact_id = ?1",
        id,
      )?
      .into_iter()
      .collect();
    contact.campaigns = self
      .memberships(
        "SELECT campaign_id, joined_at, source FROM campaign_memberships
         WHERE contact_id = ?1",
        id,
      )?
      .into_iter()
      .collect();

    let notes: Vec<RawNote> = self
      .conn
      .prepare(
        "SELECT note_id, text, date_added FROM notes
         WHERE contact_id = ?1 ORDER BY date_added, note_id",
      )?
      .query_map(params![id.0], |r| {
        Ok(RawNote {
          note_id:    r.get(0)?,
          text:       r.get(1)?,
          date_added: r.get(2)?,
        })
      })?
      .collect::<rusqlite::Result<_>>()?;
    contact.notes = notes
      .into_iter()
      .map(RawNote::into_note)
      .collect::<Result<_>>()?;

    let devices: Vec<RawDevice> = self
      .conn
      .prepare(
        "SELECT device_id, device, fingerprint, date_added FROM devices
         WHERE contact_id = ?1 ORDER BY date_added, device_id",
      )?
      .query_map(params![id.0], |r| {
        Ok(RawDevice {
          device_id:   r.get(0)?,
          device:      r.get(1)?,
          fingerprint: r.get(2)?,
          date_added:  r.get(3)?,
        })
      })?
      .collect::<rusqlite::Result<_>>()?;
    contact.devices = devices
      .into_iter()
      .map(RawDevice::into_device)
      .collect::<Result<_>>()?;

    Ok(Some(contact))
  }

  fn memberships(
    &self,
    sql: &str,
    id: ContactId,
  ) -> Result<Vec<(i64, roster_core::relation::Membership)>> {
    let rows: Vec<RawMembership> = self
      .conn
      .prepare(sql)?
      .query_map(params![id.0], |r| {
        Ok(RawMembership {
          target_id: r.get(0)?,
          joined_at: r.get(1)?,
          source:    r.get(2)?,
        })
      })?
      .collect::<rusqlite::Result<_>>()?;
    rows.into_iter().map(RawMembership::into_entry).collect()
  }

  fn candidates(&self, field: &str, key: &str) -> Result<Vec<Candidate>> {
    let rows: Vec<(i64, String)> = self
      .conn
      .prepare(
        "SELECT c.contact_id, c.created_at
         FROM contacts c
         JOIN contact_fields f ON f.contact_id = c.contact_id
         WHERE f.field = ?1 AND f.match_key = ?2",
      )?
      .query_map(params![field, key], |r| Ok((r.get(0)?, r.get(1)?)))?
      .collect::<rusqlite::Result<_>>()?;

    rows
      .into_iter()
      .map(|(id, created_at)| {
        Ok(Candidate { id: ContactId(id), created_at: decode_dt(&created_at)? })
      })
      .collect()
  }

  // ── Writes ────────────────────────────────────────────────────────────────

  fn insert_contact(
    &self,
    draft: ContactDraft,
    manipulator: Option<&Manipulator>,
  ) -> Result<Contact> {
    let now = Utc::now();
    self.conn.execute(
      "INSERT INTO contacts (created_at, manipulator) VALUES (?1, ?2)",
      params![encode_dt(now), encode_manipulator(manipulator)?],
    )?;
    let id = ContactId(self.conn.last_insert_rowid());

    let mut contact = draft.into_contact(id, now);
    contact.manipulator = manipulator.cloned();
    self.write_contact(&contact)?;
    Ok(contact)
  }

  /// Rewrite the `contacts` row and every relation row of `contact`.
  fn write_contact(&self, contact: &Contact) -> Result<()> {
    let id = contact.id.0;

    let updated = self.conn.execute(
      "UPDATE contacts
       SET owner_id = ?2, stage_id = ?3, points = ?4, last_active = ?5,
           date_identified = ?6, manipulator = ?7
       WHERE contact_id = ?1",
      params![
        id,
        contact.owner,
        contact.stage,
        contact.points,
        contact.last_active.map(encode_dt),
        contact.date_identified.map(encode_dt),
        encode_manipulator(contact.manipulator.as_ref())?,
      ],
    )?;
    if updated == 0 {
      return Err(roster_core::Error::NotFound(contact.id).into());
    }

    for table in [
      "contact_fields",
      "contact_tags",
      "do_not_contact",
      "list_memberships",
      "campaign_memberships",
      "ip_addresses",
      "utm_tags",
      "notes",
      "devices",
    ] {
      self
        .conn
        .execute(&format!("DELETE FROM {table} WHERE contact_id = ?1"), params![id])?;
    }

    {
      let mut stmt = self.conn.prepare(
        "INSERT INTO contact_fields (contact_id, field, value_json, match_key)
         VALUES (?1, ?2, ?3, ?4)",
      )?;
      for (field, value) in &contact.fields {
        stmt.execute(params![
          id,
          field,
          encode_field_value(value)?,
          value.match_key(),
        ])?;
      }
    }

    {
      let mut stmt = self
        .conn
        .prepare("INSERT INTO contact_tags (contact_id, tag) VALUES (?1, ?2)")?;
      for tag in &contact.tags {
        stmt.execute(params![id, tag])?;
      }
    }

    {
      let mut stmt = self
        .conn
        .prepare("INSERT INTO ip_addresses (contact_id, ip_address) VALUES (?1, ?2)")?;
      for ip in &contact.ip_addresses {
        stmt.execute(params![id, ip])?;
      }
    }

    {
      let mut stmt = self.conn.prepare(
        "INSERT INTO do_not_contact
           (contact_id, channel, reason, comments, channel_id, date_added)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
      )?;
      for record in contact.do_not_contact.values() {
        stmt.execute(params![
          id,
          record.channel,
          encode_reason(&record.reason),
          record.comments,
          record.channel_id,
          encode_dt(record.date_added),
        ])?;
      }
    }

    {
      let mut stmt = self.conn.prepare(
        "INSERT INTO list_memberships (contact_id, list_id, joined_at, source)
         VALUES (?1, ?2, ?3, ?4)",
      )?;
      for (list_id, membership) in &contact.lists {
        stmt.execute(params![
          id,
          list_id,
          encode_dt(membership.joined_at),
          membership.source,
        ])?;
      }
    }

    {
      let mut stmt = self.conn.prepare(
        "INSERT INTO campaign_memberships (contact_id, campaign_id, joined_at, source)
         VALUES (?1, ?2, ?3, ?4)",
      )?;
      for (campaign_id, membership) in &contact.campaigns {
        stmt.execute(params![
          id,
          campaign_id,
          encode_dt(membership.joined_at),
          membership.source,
        ])?;
      }
    }

    // History rows are upserted by id so a row still held by the merge loser
    // moves over instead of being copied.
    {
      let mut stmt = self.conn.prepare(
        "INSERT INTO utm_tags
           (utm_id, contact_id, utm_campaign, utm_content, utm_medium,
            utm_source, utm_term, url, referer, query, date_added)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(utm_id) DO UPDATE SET
           contact_id   = excluded.contact_id,
           utm_campaign = excluded.utm_campaign,
           utm_content  = excluded.utm_content,
           utm_medium   = excluded.utm_medium,
           utm_source   = excluded.utm_source,
           utm_term     = excluded.utm_term,
           url          = excluded.url,
           referer      = excluded.referer,
           query        = excluded.query,
           date_added   = excluded.date_added",
      )?;
      for tag in &contact.utm_tags {
        stmt.execute(params![
          encode_uuid(tag.id),
          id,
          tag.utm_campaign,
          tag.utm_content,
          tag.utm_medium,
          tag.utm_source,
          tag.utm_term,
          tag.url,
          tag.referer,
          encode_query(&tag.query)?,
          encode_dt(tag.date_added),
        ])?;
      }
    }

    {
      let mut stmt = self.conn.prepare(
        "INSERT INTO notes (note_id, contact_id, text, date_added)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(note_id) DO UPDATE SET
           contact_id = excluded.contact_id,
           text       = excluded.text,
           date_added = excluded.date_added",
      )?;
      for note in &contact.notes {
        stmt.execute(params![
          encode_uuid(note.id),
          id,
          note.text,
          encode_dt(note.date_added),
        ])?;
      }
    }

    {
      let mut stmt = self.conn.prepare(
        "INSERT INTO devices (device_id, contact_id, device, fingerprint, date_added)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(device_id) DO UPDATE SET
           contact_id  = excluded.contact_id,
           device      = excluded.device,
           fingerprint = excluded.fingerprint,
           date_added  = excluded.date_added",
      )?;
      for device in &contact.devices {
        stmt.execute(params![
          encode_uuid(device.id),
          id,
          device.device,
          device.fingerprint,
          encode_dt(device.date_added),
        ])?;
      }
    }

    Ok(())
  }
}

// ─── ContactTx impl ──────────────────────────────────────────────────────────

impl ContactTx for SqliteTx<'_> {
  /// The surrounding transaction already holds SQLite's write lock, so this
  /// only bumps the row version and checks the contact exists.
  fn lock(&mut self, id: ContactId) -> roster_core::Result<()> {
    let updated = self
      .conn
      .execute(
        "UPDATE contacts SET lock_version = lock_version + 1 WHERE contact_id = ?1",
        params![id.0],
      )
      .map_err(|e| Error::from(e).into_core())?;
    if updated == 0 {
      return Err(roster_core::Error::NotFound(id));
    }
    Ok(())
  }

  fn load(&mut self, id: ContactId) -> roster_core::Result<Option<Contact>> {
    self.load_contact(id).map_err(Error::into_core)
  }

  fn find_by_identifiers(
    &mut self,
    identifiers: &[(String, String)],
    operator: MatchOperator,
  ) -> roster_core::Result<Vec<Candidate>> {
    let mut per_identifier = Vec::with_capacity(identifiers.len());
    for (field, key) in identifiers {
      per_identifier.push(self.candidates(field, key).map_err(Error::into_core)?);
    }

    let found = match operator {
      MatchOperator::Any => per_identifier.into_iter().flatten().collect(),
      MatchOperator::All => {
        let mut sets = per_identifier.into_iter();
        let first = sets.next().unwrap_or_default();
        sets.fold(first, |acc, next| {
          acc
            .into_iter()
            .filter(|c| next.iter().any(|n| n.id == c.id))
            .collect()
        })
      }
    };
    Ok(found)
  }

  fn create(
    &mut self,
    draft: ContactDraft,
    manipulator: Option<&Manipulator>,
  ) -> roster_core::Result<Contact> {
    self
      .insert_contact(draft, manipulator)
      .map_err(Error::into_core)
  }

  fn save(&mut self, contact: &Contact) -> roster_core::Result<()> {
    self.write_contact(contact).map_err(Error::into_core)
  }

  fn delete(&mut self, id: ContactId) -> roster_core::Result<()> {
    let deleted = self
      .conn
      .execute("DELETE FROM contacts WHERE contact_id = ?1", params![id.0])
      .map_err(|e| Error::from(e).into_core())?;
    if deleted == 0 {
      return Err(roster_core::Error::NotFound(id));
    }
    Ok(())
  }
}
