use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Two equivalent ways to configure:
//
//   config.toml:     [relay]
//                    require_beam_key = false
//
//   env var:         BEAM_RELAY__REQUIRE_BEAM_KEY=false   (double underscore = nesting)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub relay: RelayFileConfig,
    #[serde(default)]
    pub server: ServerFileConfig,
}

/// Relay tunables (lives under `[relay]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelayFileConfig {
    /// When true, the auth handshake requires the exact beam key.
    /// When false, any credential is accepted once the beam exists.
    /// Both behaviors exist in the wild; pick explicitly, never silently.
    #[serde(default = "default_require_beam_key")]
    pub require_beam_key: bool,
    /// Bound on the beam lookup during the auth handshake. Timeout is
    /// treated as auth failure.
    #[serde(default = "default_auth_timeout_ms")]
    pub auth_timeout_ms: u64,
    /// Bound on the clipboard persistence call. Timeout is logged and
    /// non-fatal; broadcast delivery proceeds regardless.
    #[serde(default = "default_persist_timeout_ms")]
    pub persist_timeout_ms: u64,
    /// Per-connection outbound queue depth. A full queue drops the
    /// broadcast for that member only.
    #[serde(default = "default_outbound_capacity")]
    pub outbound_channel_capacity: usize,
}

impl Default for RelayFileConfig {
    fn default() -> Self {
        Self {
            require_beam_key: default_require_beam_key(),
            auth_timeout_ms: default_auth_timeout_ms(),
            persist_timeout_ms: default_persist_timeout_ms(),
            outbound_channel_capacity: default_outbound_capacity(),
        }
    }
}

/// Server tuning knobs (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

fn default_require_beam_key() -> bool {
    true
}
fn default_auth_timeout_ms() -> u64 {
    2000
}
fn default_persist_timeout_ms() -> u64 {
    3000
}
fn default_outbound_capacity() -> usize {
    100
}

/// Build a figment that layers: defaults → config.toml → BEAM_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `BEAM_RELAY__REQUIRE_BEAM_KEY=false`  →  `relay.require_beam_key = false`
///   `BEAM_SERVER__PORT=9100`              →  `server.port = 9100`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("BEAM_").split("__"))
}

// =============================================================================
// Runtime config structs (derived from FileConfig, used throughout the server)
// =============================================================================

/// Relay configuration (runtime view).
#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub require_beam_key: bool,
    pub auth_timeout: Duration,
    pub persist_timeout: Duration,
    pub outbound_channel_capacity: usize,
}

impl RelayConfig {
    pub fn from_file(fc: &RelayFileConfig) -> Self {
        Self {
            require_beam_key: fc.require_beam_key,
            auth_timeout: Duration::from_millis(fc.auth_timeout_ms),
            persist_timeout: Duration::from_millis(fc.persist_timeout_ms),
            outbound_channel_capacity: fc.outbound_channel_capacity.max(1),
        }
    }
}

// =============================================================================
// Directory layout config (not tunable via figment — derived from --data-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct BeamRelayConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
}

impl BeamRelayConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = custom_dir.unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".beamrelay")
        });

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let db_path = data_dir.join("beamrelay.db");

        info!("Data directory: {}", data_dir.display());

        Ok(Self { data_dir, db_path })
    }

    pub fn db_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.db_path.display())
    }
}
