//! Sealstore keytool - create and inspect master key keystores

mod keytool;

use clap::{Parser, Subcommand};
use keytool::{EntryKind, Keystores};
use sealstore_crypto::KeyAlgorithm;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "sealstore-keytool")]
#[command(about = "Create and inspect Sealstore master key keystores")]
#[command(version)]
struct Args {
    /// Keystore file
    #[arg(short, long, env = "SEALSTORE_KEYSTORE")]
    keystore: PathBuf,

    /// Store password protecting the keystore's integrity
    #[arg(long, env = "SEALSTORE_KEYSTORE_PASSWORD", hide_env_values = true)]
    store_password: Option<String>,

    /// Enable debug logging
    #[arg(short, long, env = "SEALSTORE_DEBUG")]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a master key and add it to the keystore, creating the file if needed
    Generate {
        /// Alias of the new key
        alias: String,

        /// Key algorithm (AES or X25519)
        #[arg(short, long, default_value = "AES")]
        algorithm: KeyAlgorithm,

        /// Key size in bits for symmetric keys
        #[arg(short = 's', long, default_value_t = 256)]
        key_size: u32,

        /// Password sealing the key; defaults to the store password
        #[arg(long, env = "SEALSTORE_KEY_PASSWORD", hide_env_values = true)]
        key_password: Option<String>,
    },
    /// Copy an entry into another keystore, creating the file if needed
    Export {
        /// Alias of the entry
        alias: String,

        /// Target keystore file
        #[arg(long)]
        to: PathBuf,

        /// Store password of the target keystore
        #[arg(long, env = "SEALSTORE_TARGET_KEYSTORE_PASSWORD", hide_env_values = true)]
        to_store_password: Option<String>,

        /// Password unsealing the key; also seals it in the target keystore
        #[arg(long, env = "SEALSTORE_KEY_PASSWORD", hide_env_values = true)]
        key_password: Option<String>,

        /// For X25519: export only the public key (encryption only)
        #[arg(long, conflicts_with = "private_only")]
        public_only: bool,

        /// For X25519: export only the private key (decryption only)
        #[arg(long)]
        private_only: bool,
    },
    /// List the keystore's entries
    List {
        /// Password unsealing keys, needed for check values of secret keys
        #[arg(long, env = "SEALSTORE_KEY_PASSWORD", hide_env_values = true)]
        key_password: Option<String>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Print the check value of one entry
    CheckValue {
        /// Alias of the entry
        alias: String,

        /// Password unsealing the key
        #[arg(long, env = "SEALSTORE_KEY_PASSWORD", hide_env_values = true)]
        key_password: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("sealstore_keytool={log_level},sealstore_crypto={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let store_password = args.store_password.as_deref();
    match args.command {
        Command::Generate {
            alias,
            algorithm,
            key_size,
            key_password,
        } => {
            let key_password = key_password.as_deref().or(store_password);
            let check_value = keytool::generate(
                &args.keystore,
                store_password,
                &alias,
                algorithm,
                key_size,
                key_password,
            )?;
            println!("{alias}\t{check_value}");
        }
        Command::Export {
            alias,
            to,
            to_store_password,
            key_password,
            public_only,
            private_only,
        } => {
            let kind = if public_only {
                EntryKind::PublicOnly
            } else if private_only {
                EntryKind::PrivateOnly
            } else {
                EntryKind::Full
            };
            keytool::export(
                &Keystores {
                    source: &args.keystore,
                    source_password: store_password,
                    target: &to,
                    target_password: to_store_password.as_deref(),
                },
                &alias,
                key_password.as_deref().or(store_password),
                kind,
            )?;
            println!("Exported {alias} to {}", to.display());
        }
        Command::List { key_password, json } => {
            let password = key_password.as_deref().or(store_password);
            let entries = keytool::list(&args.keystore, store_password, password)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for entry in entries {
                    println!(
                        "{}\t{}\t{}\t{}",
                        entry.alias,
                        entry.algorithm,
                        entry.capability,
                        entry.check_value.as_deref().unwrap_or("-")
                    );
                }
            }
        }
        Command::CheckValue {
            alias,
            key_password,
        } => {
            let password = key_password.as_deref().or(store_password);
            println!(
                "{}",
                keytool::check_value(&args.keystore, store_password, &alias, password)?
            );
        }
    }

    Ok(())
}
