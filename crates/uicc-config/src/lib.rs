//! Shared configuration for the uicc tools.
//!
//! TOML file plus `UICC_` environment overrides, translation to
//! `uicc_core::UiccConfig`, and a keyring-backed [`PinStorage`] so an
//! unlocked card can be re-unlocked silently on the next run.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use uicc_core::{MemoryPinStorage, PinStorage, UiccConfig, UiccError};
use uicc_ril::AppFamily;

const KEYRING_SERVICE: &str = "uicc";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Card images inserted at boot, one per slot, when none are given
    /// on the command line.
    #[serde(default)]
    pub images: Vec<PathBuf>,

    /// Output defaults for the CLI.
    #[serde(default)]
    pub defaults: Defaults,

    /// Stack tuning, mirrored into `UiccConfig`.
    #[serde(default)]
    pub uicc: UiccSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// Where PINs entered by hand are kept: "keyring" or "memory".
    #[serde(default = "default_pin_storage")]
    pub pin_storage: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            pin_storage: default_pin_storage(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_pin_storage() -> String {
    "memory".into()
}

/// `[uicc]` table. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct UiccSection {
    pub auth_timeout_ms: u64,
    pub phonebook_max_retries: u32,
    pub phonebook_retry_interval_ms: u64,
    pub hotswap_supported: bool,
    pub cdma_supported: bool,
    pub voice_radio_family: AppFamily,
    pub installed_locales: Vec<String>,
    pub fixed_voicemail_operators: Vec<String>,
    pub non_removable_slots: Vec<usize>,
    pub num_phones: usize,
}

impl Default for UiccSection {
    fn default() -> Self {
        let core = UiccConfig::default();
        Self {
            auth_timeout_ms: millis(core.auth_timeout),
            phonebook_max_retries: core.phonebook_max_retries,
            phonebook_retry_interval_ms: millis(core.phonebook_retry_interval),
            hotswap_supported: core.hotswap_supported,
            cdma_supported: core.cdma_supported,
            voice_radio_family: core.voice_radio_family,
            installed_locales: core.installed_locales,
            fixed_voicemail_operators: core.fixed_voicemail_operators,
            non_removable_slots: core.non_removable_slots,
            num_phones: core.num_phones,
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "uicc", "uicc").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("uicc");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + environment. A missing file yields the defaults.
///
/// Environment keys use a double underscore between tables, e.g.
/// `UICC_UICC__HOTSWAP_SUPPORTED=false`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("UICC_").split("__"));

    let config: Config = figment.extract()?;
    debug!(path = %path.display(), "configuration loaded");
    Ok(config)
}

/// Load config, returning a default if loading fails.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

/// Build the core runtime config.
pub fn to_uicc_config(cfg: &Config) -> Result<UiccConfig, ConfigError> {
    let section = &cfg.uicc;
    if section.num_phones == 0 {
        return Err(ConfigError::Validation {
            field: "uicc.num_phones".into(),
            reason: "at least one phone is required".into(),
        });
    }
    if section.voice_radio_family == AppFamily::Ims {
        return Err(ConfigError::Validation {
            field: "uicc.voice_radio_family".into(),
            reason: "expected '3gpp' or '3gpp2'".into(),
        });
    }
    if let Some(bad) = section
        .fixed_voicemail_operators
        .iter()
        .find(|op| !(5..=6).contains(&op.len()) || !op.bytes().all(|b| b.is_ascii_digit()))
    {
        return Err(ConfigError::Validation {
            field: "uicc.fixed_voicemail_operators".into(),
            reason: format!("'{bad}' is not an MCC+MNC"),
        });
    }

    Ok(UiccConfig {
        auth_timeout: Duration::from_millis(section.auth_timeout_ms),
        phonebook_max_retries: section.phonebook_max_retries,
        phonebook_retry_interval: Duration::from_millis(section.phonebook_retry_interval_ms),
        hotswap_supported: section.hotswap_supported,
        cdma_supported: section.cdma_supported,
        voice_radio_family: section.voice_radio_family,
        installed_locales: section.installed_locales.clone(),
        fixed_voicemail_operators: section.fixed_voicemail_operators.clone(),
        non_removable_slots: section.non_removable_slots.clone(),
        num_phones: section.num_phones,
    })
}

/// PIN storage selected by `defaults.pin_storage`.
pub fn pin_storage(cfg: &Config) -> Result<Arc<dyn PinStorage>, ConfigError> {
    match cfg.defaults.pin_storage.as_str() {
        "memory" => Ok(Arc::new(MemoryPinStorage::new())),
        "keyring" => Ok(Arc::new(KeyringPinStorage)),
        other => Err(ConfigError::Validation {
            field: "defaults.pin_storage".into(),
            reason: format!("expected 'keyring' or 'memory', got '{other}'"),
        }),
    }
}

// ── Keyring PIN storage ─────────────────────────────────────────────

/// PINs in the platform keyring, one entry per ICCID.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyringPinStorage;

impl KeyringPinStorage {
    fn entry(iccid: &str) -> Result<keyring::Entry, UiccError> {
        keyring::Entry::new(KEYRING_SERVICE, &format!("{iccid}/pin")).map_err(storage_error)
    }
}

fn storage_error(err: keyring::Error) -> UiccError {
    UiccError::Storage {
        message: err.to_string(),
    }
}

impl PinStorage for KeyringPinStorage {
    fn get(&self, iccid: &str) -> Result<Option<SecretString>, UiccError> {
        match Self::entry(iccid)?.get_password() {
            Ok(pin) => Ok(Some(SecretString::from(pin))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(storage_error(e)),
        }
    }

    fn store(&self, iccid: &str, pin: &SecretString) -> Result<(), UiccError> {
        Self::entry(iccid)?
            .set_password(pin.expose_secret())
            .map_err(storage_error)
    }

    fn clear(&self, iccid: &str) -> Result<(), UiccError> {
        match Self::entry(iccid)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(storage_error(e)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.uicc, UiccSection::default());
        assert_eq!(to_uicc_config(&cfg).unwrap(), UiccConfig::default());
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
images = ["cards/slot0.toml"]

[defaults]
output = "json"

[uicc]
hotswap_supported = false
voice_radio_family = "3gpp2"
auth_timeout_ms = 1000
fixed_voicemail_operators = ["310260"]
"#,
        )
        .unwrap();

        let cfg = load_config_from(&path).unwrap();
        assert_eq!(cfg.defaults.output, "json");
        assert_eq!(cfg.defaults.color, "auto");
        assert_eq!(cfg.images, vec![PathBuf::from("cards/slot0.toml")]);

        let core = to_uicc_config(&cfg).unwrap();
        assert!(!core.hotswap_supported);
        assert_eq!(core.voice_radio_family, AppFamily::ThreeGpp2);
        assert_eq!(core.auth_timeout, Duration::from_secs(1));
        assert_eq!(core.fixed_voicemail_operators, vec!["310260".to_string()]);
        // Untouched keys keep their defaults.
        assert_eq!(core.phonebook_max_retries, 3);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut cfg = Config::default();
        cfg.uicc.num_phones = 2;
        cfg.defaults.pin_storage = "keyring".into();
        save_config_to(&cfg, &path).unwrap();
        assert_eq!(load_config_from(&path).unwrap(), cfg);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut cfg = Config::default();
        cfg.uicc.num_phones = 0;
        assert!(matches!(
            to_uicc_config(&cfg),
            Err(ConfigError::Validation { field, .. }) if field == "uicc.num_phones"
        ));

        let mut cfg = Config::default();
        cfg.uicc.voice_radio_family = AppFamily::Ims;
        assert!(to_uicc_config(&cfg).is_err());

        let mut cfg = Config::default();
        cfg.uicc.fixed_voicemail_operators = vec!["31A26".into()];
        assert!(to_uicc_config(&cfg).is_err());

        let mut cfg = Config::default();
        cfg.defaults.pin_storage = "disk".into();
        assert!(pin_storage(&cfg).is_err());
    }

    #[test]
    fn bad_toml_is_a_figment_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[uicc]\nnum_phones = \"two\"\n").unwrap();
        assert!(matches!(load_config_from(&path), Err(ConfigError::Figment(_))));
    }
}
