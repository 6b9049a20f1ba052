//! Layered client settings.
//!
//! | Source                            | Precedence |
//! |-----------------------------------|------------|
//! | built-in defaults                 | lowest     |
//! | TOML file (optional)              |            |
//! | `REALM_<SECTION>__<KEY>` env vars | highest    |
//!
//! e.g. `REALM_SESSION__MAX_RECONNECT_ATTEMPTS=3` or
//! `REALM_MOVEMENT__POLICY=edge_triggered`.

use std::path::Path;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::types::{DirectoryConfig, MovementConfig, SessionConfig};

pub const ENV_PREFIX: &str = "REALM";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub directory: DirectoryConfig,
    pub session: SessionConfig,
    pub movement: MovementConfig,
}

impl ClientSettings {
    /// Defaults, overlaid by `path` (if it exists) and then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        let settings: Self = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        log::debug!("[config] Loaded settings: {:?}", settings);
        Ok(settings)
    }

    /// Parse settings from TOML text, without consulting the environment.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MovementPolicy;

    #[test]
    fn empty_document_yields_defaults() {
        let settings = ClientSettings::from_toml("").unwrap();
        assert_eq!(settings, ClientSettings::default());
        assert_eq!(settings.session.max_reconnect_attempts, 5);
        assert_eq!(settings.movement.cooldown_ms, 200);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let settings = ClientSettings::from_toml(
            r#"
            [session]
            max_reconnect_attempts = 2

            [movement]
            policy = "edge_triggered"
            "#,
        )
        .unwrap();

        assert_eq!(settings.session.max_reconnect_attempts, 2);
        assert_eq!(settings.session.reconnect_delay_ms, 1000);
        assert_eq!(settings.movement.policy, MovementPolicy::EdgeTriggered);
        assert_eq!(settings.directory, DirectoryConfig::default());
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let settings = ClientSettings::load(Some(Path::new("/nonexistent/realm.toml"))).unwrap();
        assert_eq!(settings.directory.namespace, "world");
    }
}
