//! Runtime settings, deserialised from `roster.toml` and `ROSTER_*`
//! environment variables.

use std::{collections::BTreeSet, path::PathBuf, time::Duration};

use roster_core::{finder::IdentifierConfig, reconcile::ReconcilePolicy};
use roster_store_sqlite::StoreOptions;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
  pub store_path:       PathBuf,
  /// Milliseconds a write waits for another writer before giving up.
  pub lock_timeout_ms:  u64,
  pub identifiers:      IdentifierConfig,
  /// Overrides the default protected field set when present.
  pub protected_fields: Option<BTreeSet<String>>,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      store_path:       PathBuf::from("~/.local/share/roster/roster.db"),
      lock_timeout_ms:  5_000,
      identifiers:      IdentifierConfig::default(),
      protected_fields: None,
    }
  }
}

impl Settings {
  pub fn store_options(&self) -> StoreOptions {
    let policy = match &self.protected_fields {
      Some(fields) => ReconcilePolicy { protected_fields: fields.clone() },
      None => ReconcilePolicy::default(),
    };
    StoreOptions {
      lock_timeout: Duration::from_millis(self.lock_timeout_ms),
      policy,
      identifiers: self.identifiers.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use roster_core::finder::MatchOperator;

  use super::*;

  #[test]
  fn toml_overrides_defaults() {
    let settings: Settings = ::config::Config::builder()
      .add_source(::config::File::from_str(
        r#"
          lock_timeout_ms = 250
          protected_fields = ["owner"]

          [identifiers]
          fields = ["email", "phone"]
          operator = "all"
        "#,
        ::config::FileFormat::Toml,
      ))
      .build()
      .unwrap()
      .try_deserialize()
      .unwrap();

    let options = settings.store_options();
    assert_eq!(options.lock_timeout, Duration::from_millis(250));
    assert!(options.policy.is_protected("owner"));
    assert!(!options.policy.is_protected("date_added"));
    assert_eq!(options.identifiers.operator, MatchOperator::All);
    assert_eq!(options.identifiers.fields, ["email", "phone"]);
  }

  #[test]
  fn empty_config_uses_defaults() {
    let settings: Settings = ::config::Config::builder()
      .build()
      .unwrap()
      .try_deserialize()
      .unwrap();
    assert_eq!(settings.lock_timeout_ms, 5_000);
    assert!(settings.store_options().policy.is_protected("date_identified"));
  }
}
