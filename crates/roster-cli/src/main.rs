//! roster command-line tool.
//!
//! Reads `roster.toml` (or the path given with `--config`), opens the SQLite
//! store, and runs one command. Results are printed as pretty JSON.

mod config;
mod payload;

use std::{
  path::{Path, PathBuf},
  process::ExitCode,
};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use roster_core::{
  contact::{ContactId, Manipulator},
  relation::{DncReason, DoNotContact, UtmTagInput},
  store::ContactStore,
};
use roster_store_sqlite::SqliteStore;
use serde::Serialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::{config::Settings, payload::ContactPayload};

#[derive(Parser)]
#[command(author, version, about = "Roster contact deduplication tool")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "roster.toml")]
  config: PathBuf,

  /// Name recorded as the actor of any change.
  #[arg(long)]
  actor: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Create a contact from a JSON payload, or merge it into its duplicate.
  Upsert {
    /// Payload file, or `-` for stdin.
    payload: PathBuf,
  },
  /// Look up the stored duplicate of a JSON payload without writing.
  Find { payload: PathBuf },
  /// Merge stored contact `incoming` into `existing`.
  Merge { incoming: i64, existing: i64 },
  Show { id: i64 },
  Delete { id: i64 },
  /// Manage do-not-contact records.
  Dnc {
    #[command(subcommand)]
    command: DncCommand,
  },
  /// Manage UTM tag history.
  Utm {
    #[command(subcommand)]
    command: UtmCommand,
  },
  /// Add and remove tags.
  Tags {
    id:     i64,
    #[arg(long)]
    add:    Vec<String>,
    #[arg(long)]
    remove: Vec<String>,
  },
}

#[derive(Subcommand)]
enum DncCommand {
  Add {
    id:         i64,
    channel:    String,
    /// One of `unsubscribed`, `bounced`, `manual`.
    reason:     DncReason,
    #[arg(long, default_value = "")]
    comments:   String,
    #[arg(long)]
    channel_id: Option<i64>,
  },
  Remove { id: i64, channel: String },
}

#[derive(Subcommand)]
enum UtmCommand {
  Add {
    id:       i64,
    #[arg(long)]
    campaign: Option<String>,
    #[arg(long)]
    content:  Option<String>,
    #[arg(long)]
    medium:   Option<String>,
    #[arg(long)]
    source:   Option<String>,
    #[arg(long)]
    term:     Option<String>,
    #[arg(long)]
    url:      Option<String>,
    #[arg(long)]
    referer:  Option<String>,
  },
  Remove { id: i64, utm_id: Uuid },
}

#[derive(Serialize)]
struct RecordFound {
  record_found: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();

  let settings: Settings = ::config::Config::builder()
    .add_source(::config::File::from(cli.config.as_path()).required(false))
    .add_source(::config::Environment::with_prefix("ROSTER"))
    .build()
    .context("failed to read config file")?
    .try_deserialize()
    .context("failed to deserialise settings")?;

  let store_path = expand_tilde(&settings.store_path);
  if let Some(parent) = store_path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("failed to create {parent:?}"))?;
  }

  let store = SqliteStore::open_with(&store_path, settings.store_options())
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let manipulator = |object: &str| {
    let m = Manipulator::new("lead", object);
    match &cli.actor {
      Some(actor) => m.with_description(actor.clone()),
      None => m,
    }
  };

  match cli.command {
    Command::Upsert { ref payload } => {
      let payload = read_payload(payload)?;
      let candidate = payload.candidate()?;
      let incoming = payload.into_incoming()?;
      let resolution = store
        .find_or_merge(candidate, incoming, Some(manipulator("api-single")))
        .await
        .context("upsert failed")?;
      print_json(&resolution)?;
    }
    Command::Find { ref payload } => {
      let candidate = read_payload(payload)?.candidate()?;
      match store.find_duplicate(candidate).await? {
        Some(found) => print_json(&found)?,
        None => {
          tracing::info!("no duplicate found");
          return Ok(ExitCode::FAILURE);
        }
      }
    }
    Command::Merge { incoming, existing } => {
      let result = store
        .merge(ContactId(incoming), ContactId(existing), Some(manipulator("merge")))
        .await;
      match result {
        Ok(result) => print_json(&result)?,
        Err(e) if e.as_core().is_some_and(|c| c.is_benign()) => {
          tracing::info!(contact = existing, "contact is already merged");
        }
        Err(e) => return Err(e).context("merge failed"),
      }
    }
    Command::Show { id } => match store.get_contact(ContactId(id)).await? {
      Some(contact) => print_json(&contact)?,
      None => {
        eprintln!("contact {id} not found");
        return Ok(ExitCode::FAILURE);
      }
    },
    Command::Delete { id } => {
      store
        .delete_contact(ContactId(id))
        .await
        .with_context(|| format!("failed to delete contact {id}"))?;
    }
    Command::Dnc { command } => match command {
      DncCommand::Add { id, channel, reason, comments, channel_id } => {
        let record = DoNotContact {
          comments,
          channel_id,
          ..DoNotContact::new(channel, reason)
        };
        let contact = store.add_do_not_contact(ContactId(id), record).await?;
        print_json(&contact)?;
      }
      DncCommand::Remove { id, channel } => {
        let record_found = store.remove_do_not_contact(ContactId(id), channel).await?;
        print_json(&RecordFound { record_found })?;
      }
    },
    Command::Utm { command } => match command {
      UtmCommand::Add { id, campaign, content, medium, source, term, url, referer } => {
        let input = UtmTagInput {
          utm_campaign: campaign,
          utm_content: content,
          utm_medium: medium,
          utm_source: source,
          utm_term: term,
          url,
          referer,
          ..Default::default()
        };
        let tag = store.add_utm_tags(ContactId(id), input).await?;
        print_json(&tag)?;
      }
      UtmCommand::Remove { id, utm_id } => {
        let record_found = store.remove_utm_tag(ContactId(id), utm_id).await?;
        print_json(&RecordFound { record_found })?;
      }
    },
    Command::Tags { id, add, remove } => {
      let contact = store.modify_tags(ContactId(id), add, remove).await?;
      print_json(&contact)?;
    }
  }

  Ok(ExitCode::SUCCESS)
}

fn read_payload(path: &Path) -> anyhow::Result<ContactPayload> {
  let raw = if path == Path::new("-") {
    std::io::read_to_string(std::io::stdin()).context("failed to read stdin")?
  } else {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {path:?}"))?
  };
  serde_json::from_str(&raw).context("invalid contact payload")
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
