//! SQL schema for the Roster SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS contacts (
    contact_id      INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id        INTEGER,
    stage_id        INTEGER,
    points          INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL,   -- ISO 8601 UTC; never changes
    last_active     TEXT,
    date_identified TEXT,
    manipulator     TEXT,            -- JSON-encoded Manipulator or NULL
    lock_version    INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS contact_fields (
    contact_id INTEGER NOT NULL REFERENCES contacts(contact_id) ON DELETE CASCADE,
    field      TEXT NOT NULL,
    value_json TEXT NOT NULL,
    match_key  TEXT,                 -- trimmed, lowercased identifier value
    PRIMARY KEY (contact_id, field)
);

CREATE TABLE IF NOT EXISTS contact_tags (
    contact_id INTEGER NOT NULL REFERENCES contacts(contact_id) ON DELETE CASCADE,
    tag        TEXT NOT NULL,
    PRIMARY KEY (contact_id, tag)
);

CREATE TABLE IF NOT EXISTS do_not_contact (
    contact_id INTEGER NOT NULL REFERENCES contacts(contact_id) ON DELETE CASCADE,
    channel    TEXT NOT NULL,
    reason     TEXT NOT NULL,        -- 'contactable' | 'unsubscribed' | 'bounced' | 'manual'
    comments   TEXT NOT NULL DEFAULT '',
    channel_id INTEGER,
    date_added TEXT NOT NULL,
    PRIMARY KEY (contact_id, channel)
);

-- History rows keep their id when a merge moves them to another contact.
CREATE TABLE IF NOT EXISTS utm_tags (
    utm_id       TEXT PRIMARY KEY,
    contact_id   INTEGER NOT NULL REFERENCES contacts(contact_id) ON DELETE CASCADE,
    utm_campaign TEXT,
    utm_content  TEXT,
    utm_medium   TEXT,
    utm_source   TEXT,
    utm_term     TEXT,
    url          TEXT,
    referer      TEXT,
    query        TEXT NOT NULL DEFAULT '{}',
    date_added   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS list_memberships (
    contact_id INTEGER NOT NULL REFERENCES contacts(contact_id) ON DELETE CASCADE,
    list_id    INTEGER NOT NULL,
    joined_at  TEXT NOT NULL,
    source     TEXT NOT NULL,
    PRIMARY KEY (contact_id, list_id)
);

CREATE TABLE IF NOT EXISTS campaign_memberships (
    contact_id  INTEGER NOT NULL REFERENCES contacts(contact_id) ON DELETE CASCADE,
    campaign_id INTEGER NOT NULL,
    joined_at   TEXT NOT NULL,
    source      TEXT NOT NULL,
    PRIMARY KEY (contact_id, campaign_id)
);

CREATE TABLE IF NOT EXISTS notes (
    note_id    TEXT PRIMARY KEY,
    contact_id INTEGER NOT NULL REFERENCES contacts(contact_id) ON DELETE CASCADE,
    text       TEXT NOT NULL,
    date_added TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS devices (
    device_id   TEXT PRIMARY KEY,
    contact_id  INTEGER NOT NULL REFERENCES contacts(contact_id) ON DELETE CASCADE,
    device      TEXT NOT NULL,
    fingerprint TEXT,
    date_added  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS ip_addresses (
    contact_id INTEGER NOT NULL REFERENCES contacts(contact_id) ON DELETE CASCADE,
    ip_address TEXT NOT NULL,
    PRIMARY KEY (contact_id, ip_address)
);

CREATE INDEX IF NOT EXISTS contact_fields_match_idx ON contact_fields(field, match_key);
CREATE INDEX IF NOT EXISTS utm_tags_contact_idx     ON utm_tags(contact_id);
CREATE INDEX IF NOT EXISTS notes_contact_idx        ON notes(contact_id);
CREATE INDEX IF NOT EXISTS devices_contact_idx      ON devices(contact_id);

PRAGMA user_version = 1;
";
