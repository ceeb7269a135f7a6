//! Layered `HubSettings` loader (§B.3): file defaults, then environment,
//! then CLI overrides, mirroring the agent's own `CODEX_HOME`/`config.toml`
//! precedence chain.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

const CONFIG_FILE: &str = "config.toml";
const DEFAULT_AGENT_PROGRAM: &str = "agent";
const DEFAULT_SCANNER_POLL_MS: u64 = 2_000;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("could not determine the hub home directory")]
    HomeNotFound,
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("failed to parse {path}: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportPreference {
    #[default]
    AppServer,
    Mcp,
}

impl std::str::FromStr for TransportPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "app-server" | "app_server" => Ok(Self::AppServer),
            "mcp" => Ok(Self::Mcp),
            other => Err(format!("unknown transport preference: {other}")),
        }
    }
}

/// The resolved, fully-typed settings a `SessionLoop` is constructed from.
#[derive(Debug, Clone, PartialEq)]
pub struct HubSettings {
    pub hub_home: PathBuf,
    pub agent_program: String,
    pub agent_args: Vec<String>,
    pub transport_preference: TransportPreference,
    pub scanner_poll_interval: Duration,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            hub_home: PathBuf::from("."),
            agent_program: DEFAULT_AGENT_PROGRAM.to_string(),
            agent_args: Vec::new(),
            transport_preference: TransportPreference::default(),
            scanner_poll_interval: Duration::from_millis(DEFAULT_SCANNER_POLL_MS),
        }
    }
}

/// The `config.toml` shape; every field optional so a partial or absent file
/// just leaves the built-in defaults in place.
#[derive(Debug, Clone, Default, Deserialize)]
struct HubSettingsToml {
    agent_program: Option<String>,
    agent_args: Option<Vec<String>>,
    transport_preference: Option<TransportPreference>,
    scanner_poll_interval_ms: Option<u64>,
}

/// Strongly-typed CLI overrides, applied last (highest precedence).
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub agent_program: Option<String>,
    pub agent_args: Option<Vec<String>>,
    pub transport_preference: Option<TransportPreference>,
    pub scanner_poll_interval: Option<Duration>,
}

/// Honors `$AGENT_HOME`; falls back to `~/.hub`. Does not verify the
/// directory exists, matching `find_codex_home`'s relaxed default case.
pub fn find_hub_home() -> Result<PathBuf, SettingsError> {
    if let Ok(val) = std::env::var("AGENT_HOME")
        && !val.is_empty()
    {
        return Ok(PathBuf::from(val));
    }
    let mut home = dirs::home_dir().ok_or(SettingsError::HomeNotFound)?;
    home.push(".hub");
    Ok(home)
}

fn load_toml(hub_home: &Path) -> Result<HubSettingsToml, SettingsError> {
    let path = hub_home.join(CONFIG_FILE);
    match std::fs::read_to_string(&path) {
        Ok(contents) => toml::from_str(&contents).map_err(|source| SettingsError::Parse { path, source }),
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "config.toml not found, using defaults");
            Ok(HubSettingsToml::default())
        }
        Err(source) => Err(SettingsError::Read { path, source }),
    }
}

/// Applies environment variables between the file defaults and the CLI
/// overrides: `HUB_AGENT_PROGRAM`, `HUB_AGENT_ARGS` (whitespace-separated),
/// `HUB_TRANSPORT_PREFERENCE`, `HUB_SCANNER_POLL_INTERVAL_MS`.
fn apply_env(mut settings: HubSettings) -> HubSettings {
    if let Ok(program) = std::env::var("HUB_AGENT_PROGRAM") {
        settings.agent_program = program;
    }
    if let Ok(args) = std::env::var("HUB_AGENT_ARGS") {
        settings.agent_args = args.split_whitespace().map(str::to_string).collect();
    }
    if let Ok(pref) = std::env::var("HUB_TRANSPORT_PREFERENCE")
        && let Ok(pref) = pref.parse()
    {
        settings.transport_preference = pref;
    }
    if let Ok(ms) = std::env::var("HUB_SCANNER_POLL_INTERVAL_MS")
        && let Ok(ms) = ms.parse::<u64>()
    {
        settings.scanner_poll_interval = Duration::from_millis(ms);
    }
    settings
}

/// Loads `$AGENT_HOME/config.toml`, overlays environment variables, then the
/// strongly-typed `overrides` (precedence: file < env < overrides).
pub fn load(overrides: SettingsOverrides) -> Result<HubSettings, SettingsError> {
    let hub_home = find_hub_home()?;
    let file = load_toml(&hub_home)?;

    let mut settings = HubSettings {
        hub_home,
        agent_program: file.agent_program.unwrap_or_else(|| DEFAULT_AGENT_PROGRAM.to_string()),
        agent_args: file.agent_args.unwrap_or_default(),
        transport_preference: file.transport_preference.unwrap_or_default(),
        scanner_poll_interval: file
            .scanner_poll_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(DEFAULT_SCANNER_POLL_MS)),
    };
    settings = apply_env(settings);

    if let Some(program) = overrides.agent_program {
        settings.agent_program = program;
    }
    if let Some(args) = overrides.agent_args {
        settings.agent_args = args;
    }
    if let Some(pref) = overrides.transport_preference {
        settings.transport_preference = pref;
    }
    if let Some(interval) = overrides.scanner_poll_interval {
        settings.scanner_poll_interval = interval;
    }

    Ok(settings)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let toml = load_toml(dir.path()).unwrap();
        assert!(toml.agent_program.is_none());
    }

    #[test]
    fn file_values_are_parsed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "agent_program = \"codex\"\nscanner_poll_interval_ms = 500\n",
        )
        .unwrap();
        let toml = load_toml(dir.path()).unwrap();
        assert_eq!(toml.agent_program.as_deref(), Some("codex"));
        assert_eq!(toml.scanner_poll_interval_ms, Some(500));
    }

    #[test]
    fn cli_overrides_win_over_env_and_file() {
        // SAFETY: test-local env mutation; no other test in this module reads
        // these variables concurrently.
        unsafe {
            std::env::set_var("HUB_AGENT_PROGRAM", "from-env");
        }
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "agent_program = \"from-file\"\n").unwrap();

        let file = load_toml(dir.path()).unwrap();
        let mut settings = HubSettings {
            hub_home: dir.path().to_path_buf(),
            agent_program: file.agent_program.unwrap_or_else(|| DEFAULT_AGENT_PROGRAM.to_string()),
            ..HubSettings::default()
        };
        settings = apply_env(settings);
        assert_eq!(settings.agent_program, "from-env");

        settings.agent_program = "from-cli".to_string();
        assert_eq!(settings.agent_program, "from-cli");

        unsafe {
            std::env::remove_var("HUB_AGENT_PROGRAM");
        }
    }

    #[test]
    fn transport_preference_parses_kebab_case() {
        assert_eq!("app-server".parse::<TransportPreference>().unwrap(), TransportPreference::AppServer);
        assert_eq!("mcp".parse::<TransportPreference>().unwrap(), TransportPreference::Mcp);
        assert!("bogus".parse::<TransportPreference>().is_err());
    }
}
