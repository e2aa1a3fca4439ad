//! Keystore file operations behind the keytool commands

use anyhow::{bail, Context};
use sealstore_crypto::{
    KeyAlgorithm, Keystore, KeystoreBuilder, MasterKey, PrivateKey, SymmetricKey,
};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::{info, warn};

/// Parts of an asymmetric entry to export
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Full,
    PublicOnly,
    PrivateOnly,
}

/// Source and target of an export
pub struct Keystores<'a> {
    pub source: &'a Path,
    pub source_password: Option<&'a str>,
    pub target: &'a Path,
    pub target_password: Option<&'a str>,
}

/// One listed keystore entry
#[derive(Clone, Debug, Serialize)]
pub struct EntrySummary {
    pub alias: String,
    pub algorithm: String,
    pub capability: &'static str,
    pub check_value: Option<String>,
}

fn load(path: &Path, store_password: Option<&str>) -> anyhow::Result<Keystore> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    Keystore::load(file, store_password)
        .with_context(|| format!("failed to load keystore {}", path.display()))
}

fn load_or_create(path: &Path, store_password: Option<&str>) -> anyhow::Result<KeystoreBuilder> {
    let builder = if path.exists() {
        KeystoreBuilder::from_keystore(load(path, store_password)?)
    } else {
        KeystoreBuilder::new()
    };
    Ok(match store_password {
        Some(password) => builder.store_password(password),
        None => builder,
    })
}

fn save(builder: &KeystoreBuilder, path: &Path) -> anyhow::Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    builder.write_to(BufWriter::new(file))?;
    Ok(())
}

fn require_password(key_password: Option<&str>) -> anyhow::Result<&str> {
    match key_password {
        Some(password) if !password.is_empty() => Ok(password),
        _ => bail!("a key password or store password is required to seal keys"),
    }
}

/// Generate a key under `alias` and return its check value
pub fn generate(
    path: &Path,
    store_password: Option<&str>,
    alias: &str,
    algorithm: KeyAlgorithm,
    key_size: u32,
    key_password: Option<&str>,
) -> anyhow::Result<String> {
    let password = require_password(key_password)?;
    let mut builder = load_or_create(path, store_password)?;

    let check_value = if algorithm.is_symmetric() {
        let key = SymmetricKey::generate(algorithm, key_size)?;
        builder.add_secret_key(alias, &key, password)?;
        MasterKey::Symmetric(key).check_value()
    } else {
        let private = PrivateKey::generate();
        builder.add_key_pair(alias, &private, password)?;
        MasterKey::Private(private).check_value()
    };

    save(&builder, path)?;
    info!(alias, %algorithm, keystore = %path.display(), "Generated master key");
    Ok(check_value)
}

/// Copy the entry `alias` into another keystore
pub fn export(
    keystores: &Keystores<'_>,
    alias: &str,
    key_password: Option<&str>,
    kind: EntryKind,
) -> anyhow::Result<()> {
    let source = load(keystores.source, keystores.source_password)?;
    let Some(algorithm) = source.algorithm(alias)? else {
        bail!("no entry {alias} in {}", keystores.source.display());
    };
    let mut target = load_or_create(keystores.target, keystores.target_password)?;

    if algorithm.is_symmetric() {
        if kind != EntryKind::Full {
            bail!("--public-only and --private-only apply to X25519 entries only");
        }
        let password = require_password(key_password)?;
        match source.key(alias, password)? {
            Some(MasterKey::Symmetric(key)) => target.add_secret_key(alias, &key, password)?,
            _ => bail!("entry {alias} holds no secret key"),
        }
    } else {
        let public = match source.public_key(alias)? {
            Some(MasterKey::Public(public)) => Some(public),
            _ => None,
        };
        let private = match kind {
            EntryKind::PublicOnly => None,
            _ => match source.key(alias, require_password(key_password)?)? {
                Some(MasterKey::Private(private)) => Some(private),
                _ => None,
            },
        };

        match (kind, public, private) {
            (EntryKind::PublicOnly, Some(public), _) => target.add_public_key(alias, &public)?,
            (EntryKind::PublicOnly, None, _) => bail!("entry {alias} holds no public key"),
            (EntryKind::PrivateOnly, _, Some(private)) => {
                target.add_private_key(alias, &private, require_password(key_password)?)?
            }
            (EntryKind::Full, _, Some(private)) => {
                target.add_key_pair(alias, &private, require_password(key_password)?)?
            }
            _ => bail!("entry {alias} holds no private key"),
        }
    }

    save(&target, keystores.target)?;
    info!(alias, ?kind, target = %keystores.target.display(), "Exported keystore entry");
    Ok(())
}

/// Summaries of all entries; check values of sealed-only entries need `key_password`
pub fn list(
    path: &Path,
    store_password: Option<&str>,
    key_password: Option<&str>,
) -> anyhow::Result<Vec<EntrySummary>> {
    let keystore = load(path, store_password)?;
    let mut summaries = Vec::new();
    for alias in keystore.aliases() {
        let Some(entry) = keystore.entry(alias) else {
            continue;
        };
        let symmetric = entry
            .algorithm
            .parse::<KeyAlgorithm>()
            .map(|a| a.is_symmetric())
            .unwrap_or(false);
        let capability = match (entry.public.is_some(), entry.key.is_some()) {
            (_, true) if symmetric => "encrypt+decrypt",
            (true, true) => "encrypt+decrypt",
            (true, false) => "encrypt",
            (false, true) => "decrypt",
            (false, false) => "none",
        };

        let check_value = match entry_check_value(&keystore, alias, key_password) {
            Ok(value) => value,
            Err(e) => {
                warn!(alias, error = %e, "Cannot compute check value");
                None
            }
        };
        summaries.push(EntrySummary {
            alias: alias.to_string(),
            algorithm: entry.algorithm.clone(),
            capability,
            check_value,
        });
    }
    Ok(summaries)
}

/// Check value of the entry `alias`
pub fn check_value(
    path: &Path,
    store_password: Option<&str>,
    alias: &str,
    key_password: Option<&str>,
) -> anyhow::Result<String> {
    let keystore = load(path, store_password)?;
    if !keystore.contains_alias(alias) {
        bail!("no entry {alias} in {}", path.display());
    }
    entry_check_value(&keystore, alias, key_password)?
        .with_context(|| format!("a key password is required for the check value of {alias}"))
}

fn entry_check_value(
    keystore: &Keystore,
    alias: &str,
    key_password: Option<&str>,
) -> anyhow::Result<Option<String>> {
    if let Some(public) = keystore.public_key(alias)? {
        return Ok(Some(public.check_value()));
    }
    match key_password {
        Some(password) => Ok(keystore.key(alias, password)?.map(|key| key.check_value())),
        None => Ok(None),
    }
}
