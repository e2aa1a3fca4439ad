//! Encryption layer configuration
//!
//! Settings are read with the `config` crate from an optional file plus the
//! process environment (`SEALSTORE__` prefix, `__` between nested keys):
//!
//! ```text
//! SEALSTORE__KEYSTORE_IDS=primary,legacy
//! SEALSTORE__KEYSTORES__PRIMARY__LOCATION=/etc/sealstore/primary.json
//! SEALSTORE__KEYSTORES__PRIMARY__ALIASES=2024,2025
//! SEALSTORE__FAIL_MISSING_DATABASE_KEYS=true
//! ```
//!
//! Keystore and key passwords are looked up separately, see
//! [`KeystoreSettings::store_password`].

use crate::error::{EncryptionError, Result};
use crate::resource::ResourceResolver;
use sealstore_crypto::{KeyAlgorithm, DEFAULT_KEY_ALGORITHM, DEFAULT_KEY_SIZE};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use tracing::warn;

/// Prefix of all environment variables read by the encryption layer
pub const ENV_PREFIX: &str = "SEALSTORE";

/// Encryption layer settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionSettings {
    /// Keystores to load master keys from, in order
    #[serde(deserialize_with = "string_or_list")]
    pub keystore_ids: Vec<String>,
    /// Per keystore settings, keyed by keystore id
    pub keystores: HashMap<String, KeystoreSettings>,
    /// Fail startup if stored key records reference keys this instance lacks
    pub fail_missing_database_keys: bool,
    /// Fail startup if cluster peers use keys this instance lacks
    pub fail_missing_cluster_keys: bool,
    /// Fail startup if stored check values disagree with loaded keys
    pub fail_mismatched_database_keys: bool,
    /// Fail startup if cluster peers hold different material for a key
    pub fail_mismatched_cluster_keys: bool,
    /// Algorithm of content keys when none is requested
    #[serde(deserialize_with = "algorithm_name")]
    pub default_key_algorithm: KeyAlgorithm,
    /// Size in bits of content keys when none is requested
    pub default_key_size: u32,
    /// Content key algorithm used by the encrypting store facade
    #[serde(deserialize_with = "optional_algorithm_name")]
    pub key_algorithm: Option<KeyAlgorithm>,
    /// Content key size used by the encrypting store facade
    pub key_size: Option<u32>,
    /// Concurrent workers during key re-encryption
    pub re_encryption_thread_count: usize,
    /// Key records fetched per re-encryption page
    pub re_encryption_batch_size: usize,
    /// Processed entries between re-encryption progress logs
    pub re_encryption_log_interval: u64,
}

impl Default for EncryptionSettings {
    fn default() -> Self {
        Self {
            keystore_ids: Vec::new(),
            keystores: HashMap::new(),
            fail_missing_database_keys: false,
            fail_missing_cluster_keys: false,
            fail_mismatched_database_keys: true,
            fail_mismatched_cluster_keys: true,
            default_key_algorithm: DEFAULT_KEY_ALGORITHM,
            default_key_size: DEFAULT_KEY_SIZE,
            key_algorithm: None,
            key_size: None,
            re_encryption_thread_count: 4,
            re_encryption_batch_size: 100,
            re_encryption_log_interval: 1000,
        }
    }
}

impl EncryptionSettings {
    /// Load settings from an optional file and the process environment
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::from_sources(file, None)
    }

    /// Load settings from an optional file and an environment map
    ///
    /// `environment` replaces the process environment when given.
    pub fn from_sources(
        file: Option<&Path>,
        environment: Option<::config::Map<String, String>>,
    ) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .source(environment),
        );

        let settings: Self = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    /// Add a keystore, keeping `keystore_ids` in sync
    pub fn with_keystore(mut self, keystore_id: impl Into<String>, keystore: KeystoreSettings) -> Self {
        let keystore_id = keystore_id.into();
        if !self.keystore_ids.contains(&keystore_id) {
            self.keystore_ids.push(keystore_id.clone());
        }
        self.keystores.insert(keystore_id, keystore);
        self
    }

    /// Settings of one configured keystore
    pub fn keystore(&self, keystore_id: &str) -> Result<&KeystoreSettings> {
        self.keystores.get(keystore_id).ok_or_else(|| {
            EncryptionError::Configuration(format!("no settings for keystore {keystore_id}"))
        })
    }

    /// Check settings for errors that would only surface later
    pub fn validate(&self) -> Result<()> {
        if self.keystore_ids.is_empty() {
            return Err(EncryptionError::Configuration(
                "No keystore IDs have been configured".to_string(),
            ));
        }
        for keystore_id in &self.keystore_ids {
            let keystore = self.keystore(keystore_id)?;
            if keystore.location.trim().is_empty() {
                return Err(EncryptionError::Configuration(format!(
                    "keystore {keystore_id} has no location"
                )));
            }
            if keystore.aliases.is_empty() {
                return Err(EncryptionError::Configuration(format!(
                    "keystore {keystore_id} has no aliases"
                )));
            }
        }

        check_content_key(self.default_key_algorithm, self.default_key_size)?;
        if let Some(algorithm) = self.key_algorithm {
            check_content_key(algorithm, self.key_size.unwrap_or(algorithm.default_key_size()))?;
        } else if let Some(size) = self.key_size {
            check_content_key(self.default_key_algorithm, size)?;
        }

        if self.re_encryption_thread_count == 0 || self.re_encryption_batch_size == 0 {
            return Err(EncryptionError::Configuration(
                "re-encryption thread count and batch size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn check_content_key(algorithm: KeyAlgorithm, key_size: u32) -> Result<()> {
    if !algorithm.is_symmetric() {
        return Err(EncryptionError::Configuration(format!(
            "{algorithm} cannot be used for content keys"
        )));
    }
    if !algorithm.key_sizes().contains(&key_size) {
        return Err(EncryptionError::Configuration(format!(
            "unsupported {algorithm} key size {key_size}"
        )));
    }
    Ok(())
}

/// Settings of one keystore
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeystoreSettings {
    /// Location of the keystore file
    pub location: String,
    /// Aliases of the master keys to load
    #[serde(deserialize_with = "string_or_list")]
    pub aliases: Vec<String>,
    /// Inline store password
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Location of a file whose first line is the store password
    pub password_location: Option<String>,
    /// Per alias key passwords
    pub key_passwords: HashMap<String, PasswordSettings>,
}

/// Password of a single key
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordSettings {
    /// Inline password
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Location of a file whose first line is the password
    pub password_location: Option<String>,
}

impl KeystoreSettings {
    /// Keystore at `location` holding `aliases`
    pub fn new<I, S>(location: impl Into<String>, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            location: location.into(),
            aliases: aliases.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Set the inline store password
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the store password file
    pub fn with_password_location(mut self, location: impl Into<String>) -> Self {
        self.password_location = Some(location.into());
        self
    }

    /// Set the inline password of one key
    pub fn with_key_password(mut self, alias: impl Into<String>, password: impl Into<String>) -> Self {
        self.key_passwords.entry(alias.into()).or_default().password = Some(password.into());
        self
    }

    /// Resolve the store password
    ///
    /// A password file wins over the inline value, which wins over the
    /// `SEALSTORE_KEYSTORE_<ID>_PASSWORD` environment variable.
    pub fn store_password(&self, keystore_id: &str, resolver: &dyn ResourceResolver) -> Option<String> {
        resolve_password(
            resolver,
            self.password_location.as_deref(),
            self.password.as_deref(),
            &password_env_var(keystore_id, None),
        )
    }

    /// Resolve the password of one key, falling back to the store password
    pub fn key_password(
        &self,
        keystore_id: &str,
        alias: &str,
        resolver: &dyn ResourceResolver,
    ) -> Option<String> {
        let own = self.key_passwords.get(alias);
        resolve_password(
            resolver,
            own.and_then(|p| p.password_location.as_deref()),
            own.and_then(|p| p.password.as_deref()),
            &password_env_var(keystore_id, Some(alias)),
        )
        .or_else(|| self.store_password(keystore_id, resolver))
    }
}

/// Environment variable holding a store password, or a key password when
/// `alias` is given
pub fn password_env_var(keystore_id: &str, alias: Option<&str>) -> String {
    let mut name = format!("{ENV_PREFIX}_KEYSTORE_{}", env_segment(keystore_id));
    if let Some(alias) = alias {
        name.push('_');
        name.push_str(&env_segment(alias));
    }
    name.push_str("_PASSWORD");
    name
}

fn env_segment(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn resolve_password(
    resolver: &dyn ResourceResolver,
    location: Option<&str>,
    inline: Option<&str>,
    env_var: &str,
) -> Option<String> {
    if let Some(location) = location.filter(|l| !l.trim().is_empty()) {
        match read_first_line(resolver, location) {
            Ok(Some(line)) => return Some(line),
            Ok(None) => warn!(location, "Password file does not exist or is empty"),
            Err(e) => warn!(location, error = %e, "Failed to read password file"),
        }
    }

    if let Some(password) = inline.filter(|p| !p.is_empty()) {
        return Some(password.to_string());
    }

    std::env::var(env_var).ok().filter(|p| !p.is_empty())
}

fn read_first_line(resolver: &dyn ResourceResolver, location: &str) -> Result<Option<String>> {
    let Some(mut reader) = resolver.open(location)? else {
        return Ok(None);
    };
    let mut content = String::new();
    reader.read_to_string(&mut content)?;
    Ok(content
        .lines()
        .next()
        .map(|line| line.trim_end_matches('\r').to_string())
        .filter(|line| !line.is_empty()))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Accepts a comma list or a sequence; numeric and boolean scalars are taken
/// verbatim, since environment values like `2025` arrive already parsed
fn string_or_list<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<String>, D::Error> {
    fn scalar(value: serde_json::Value) -> Option<String> {
        match value {
            serde_json::Value::String(value) => Some(value),
            serde_json::Value::Number(value) => Some(value.to_string()),
            serde_json::Value::Bool(value) => Some(value.to_string()),
            _ => None,
        }
    }

    match serde_json::Value::deserialize(d)? {
        serde_json::Value::Null => Ok(Vec::new()),
        serde_json::Value::Array(values) => {
            let mut items = Vec::new();
            for value in values {
                let value = scalar(value)
                    .ok_or_else(|| serde::de::Error::custom("list entries must be scalars"))?;
                items.extend(split_list(&value));
            }
            Ok(items)
        }
        value => scalar(value)
            .map(|value| split_list(&value))
            .ok_or_else(|| serde::de::Error::custom("expected a string or a list of strings")),
    }
}

fn algorithm_name<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<KeyAlgorithm, D::Error> {
    let name = String::deserialize(d)?;
    KeyAlgorithm::from_str(&name).map_err(serde::de::Error::custom)
}

fn optional_algorithm_name<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<KeyAlgorithm>, D::Error> {
    match Option::<String>::deserialize(d)? {
        Some(name) if !name.trim().is_empty() => KeyAlgorithm::from_str(&name)
            .map(Some)
            .map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}
