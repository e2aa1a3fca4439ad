//! Administrative commands for master key management
//!
//! [`AdminCommand`] derives `clap::Subcommand` so a host CLI can embed it;
//! responses serialize to JSON.

use crate::batch::BatchReport;
use crate::error::Result;
use crate::manager::EncryptingContentStoreManager;
use clap::Subcommand;
use sealstore_crypto::MasterKeyReference;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Master key administration
#[derive(Clone, Debug, PartialEq, Eq, Subcommand)]
pub enum AdminCommand {
    /// List master keys usable for new content
    ListActive,
    /// List administratively disabled master keys
    ListDisabled,
    /// List master keys whose check value differs from the recorded one
    ListMismatched {
        /// Compare with other cluster members instead of the database
        #[arg(long)]
        current: bool,
    },
    /// List master keys in use elsewhere but not loaded here
    ListMissing {
        /// Compare with other cluster members instead of the database
        #[arg(long)]
        current: bool,
    },
    /// List master keys loaded here but unknown to the cluster
    ListExtraneous,
    /// List disabled or blocked master keys still wrapping content keys
    ListReencryption,
    /// Enable a disabled master key
    Enable {
        /// Master key as <keystoreId>:<alias>
        master_key: MasterKeyReference,
    },
    /// Disable an active master key
    Disable {
        /// Master key as <keystoreId>:<alias>
        master_key: MasterKeyReference,
    },
    /// Count content keys per master key
    Count {
        /// Only count keys wrapped by this master key
        master_key: Option<MasterKeyReference>,
    },
    /// Re-wrap all content keys of an inactive master key
    ReEncrypt {
        /// Master key as <keystoreId>:<alias>
        master_key: MasterKeyReference,
    },
}

/// Result of an administrative command
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdminResponse {
    /// Master keys, as <keystoreId>:<alias>
    Keys { keys: Vec<String> },
    /// Content key counts per master key
    Counts { counts: BTreeMap<String, u64> },
    /// The command changed state
    Done { message: String },
    /// Re-encryption finished without errors
    ReEncrypted { report: BatchReport },
}

impl AdminResponse {
    fn keys(keys: BTreeSet<MasterKeyReference>) -> Self {
        AdminResponse::Keys {
            keys: keys.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Execute `command` against `manager`
pub async fn execute(
    manager: &Arc<EncryptingContentStoreManager>,
    command: AdminCommand,
) -> Result<AdminResponse> {
    let master_keys = manager.master_keys();
    let response = match command {
        AdminCommand::ListActive => AdminResponse::keys(master_keys.get_active_keys()),
        AdminCommand::ListDisabled => AdminResponse::keys(master_keys.get_disabled_keys()),
        AdminCommand::ListMismatched { current } => {
            AdminResponse::keys(master_keys.get_mismatched_keys(current)?)
        }
        AdminCommand::ListMissing { current } => {
            AdminResponse::keys(master_keys.get_missing_keys(current)?)
        }
        AdminCommand::ListExtraneous => AdminResponse::keys(master_keys.get_extraneous_keys()),
        AdminCommand::ListReencryption => {
            AdminResponse::keys(master_keys.get_keys_requiring_re_encryption()?)
        }
        AdminCommand::Enable { master_key } => {
            master_keys.enable(&master_key)?;
            AdminResponse::Done {
                message: format!("Enabled master key {master_key}"),
            }
        }
        AdminCommand::Disable { master_key } => {
            master_keys.disable(&master_key)?;
            AdminResponse::Done {
                message: format!("Disabled master key {master_key}"),
            }
        }
        AdminCommand::Count { master_key: Some(master_key) } => {
            let count = master_keys.count_encrypted_symmetric_keys_for(&master_key)?;
            AdminResponse::Counts {
                counts: BTreeMap::from([(master_key.to_string(), count)]),
            }
        }
        AdminCommand::Count { master_key: None } => AdminResponse::Counts {
            counts: master_keys
                .count_encrypted_symmetric_keys()?
                .into_iter()
                .map(|(reference, count)| (reference.to_string(), count))
                .collect(),
        },
        AdminCommand::ReEncrypt { master_key } => AdminResponse::ReEncrypted {
            report: manager.re_encrypt_symmetric_keys(&master_key).await?,
        },
    };
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{self, Node};
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(subcommand)]
        command: AdminCommand,
    }

    fn parse(args: &[&str]) -> AdminCommand {
        Cli::try_parse_from(std::iter::once("admin").chain(args.iter().copied()))
            .unwrap()
            .command
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse(&["list-active"]), AdminCommand::ListActive);
        assert_eq!(
            parse(&["list-mismatched", "--current"]),
            AdminCommand::ListMismatched { current: true }
        );
        assert_eq!(
            parse(&["disable", "main:a"]),
            AdminCommand::Disable {
                master_key: test_support::key_ref("a")
            }
        );
        assert_eq!(parse(&["count"]), AdminCommand::Count { master_key: None });
        assert!(Cli::try_parse_from(["admin", "enable", "no-alias"]).is_err());
    }

    #[tokio::test]
    async fn test_execute_lifecycle() {
        let node = Node::started(&["a", "b"]);
        let manager = node.store_manager();
        let key = manager.create_encryption_key(None, None).unwrap();
        manager.store_encryption_key("store://x", 1, 16, &key).unwrap();

        let active = execute(&manager, AdminCommand::ListActive).await.unwrap();
        assert_eq!(
            active,
            AdminResponse::Keys {
                keys: vec!["main:a".to_string(), "main:b".to_string()]
            }
        );

        let used = node
            .master_keys
            .count_encrypted_symmetric_keys()
            .unwrap()
            .into_keys()
            .next()
            .unwrap();
        execute(&manager, AdminCommand::Disable { master_key: used.clone() })
            .await
            .unwrap();

        let pending = execute(&manager, AdminCommand::ListReencryption).await.unwrap();
        assert_eq!(
            pending,
            AdminResponse::Keys {
                keys: vec![used.to_string()]
            }
        );

        let response = execute(&manager, AdminCommand::ReEncrypt { master_key: used.clone() })
            .await
            .unwrap();
        match response {
            AdminResponse::ReEncrypted { report } => assert_eq!(report.succeeded, 1),
            other => panic!("unexpected response: {other:?}"),
        }

        let counts = execute(&manager, AdminCommand::Count { master_key: Some(used.clone()) })
            .await
            .unwrap();
        assert_eq!(
            counts,
            AdminResponse::Counts {
                counts: BTreeMap::from([(used.to_string(), 0)])
            }
        );
    }

    #[test]
    fn test_response_json() {
        let response = AdminResponse::Done {
            message: "Enabled master key main:a".to_string(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["type"], "done");
        assert_eq!(json["message"], "Enabled master key main:a");
    }
}
