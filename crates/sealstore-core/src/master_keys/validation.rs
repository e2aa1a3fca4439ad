//! Startup validation of the loaded master keys against durable key records
//! and the other cluster members

use super::manager::MasterKeyManager;
use crate::error::{EncryptionError, Result};
use sealstore_crypto::MasterKeyReference;
use std::collections::BTreeSet;
use tracing::{error, info, warn};

impl MasterKeyManager {
    /// Validate the loaded keys and publish them to the cluster
    ///
    /// Runs once per manager; later calls return immediately. Each detected
    /// inconsistency either fails startup or is logged, depending on the
    /// `fail_*` settings. Startup always fails if no active encryption key
    /// remains afterwards.
    pub fn on_startup(&self) -> Result<()> {
        let mut validated = self.validated.lock();
        if *validated {
            return Ok(());
        }
        *validated = true;

        if !self.has_been_activated() {
            return Err(EncryptionError::IllegalState(
                "master keys must be activated before startup validation".to_string(),
            ));
        }

        let settings = self.settings();
        report(
            &self.get_mismatched_keys(false)?,
            settings.fail_mismatched_database_keys,
            "have different check values than recorded in the database",
        )?;
        report(
            &self.get_mismatched_keys(true)?,
            settings.fail_mismatched_cluster_keys,
            "have different check values than on other cluster members",
        )?;
        report(
            &self.get_missing_keys(false)?,
            settings.fail_missing_database_keys,
            "wrap content keys in the database but are not loaded",
        )?;
        report(
            &self.get_missing_keys(true)?,
            settings.fail_missing_cluster_keys,
            "are loaded on other cluster members but not on this instance",
        )?;

        self.publish_to_cluster();

        let extraneous = self.get_extraneous_keys();
        if !extraneous.is_empty() {
            warn!(
                master_keys = %join(&extraneous),
                "Master keys are loaded on this instance but not on other cluster members and have been blocked"
            );
        }

        let active = self.get_active_keys();
        if active.is_empty() {
            error!("No usable encryption master keys are available");
            return Err(EncryptionError::ClusterValidation(
                "No usable encryption master keys are available".to_string(),
            ));
        }

        info!(active = %join(&active), "Validated master keys");
        Ok(())
    }

    /// Publish this instance's check values, or block keys that disagree with
    /// those published by the first cluster member
    fn publish_to_cluster(&self) {
        let state = self.state.read();
        let caches = &self.collaborators.caches;

        if caches.check_values.is_empty() {
            for (reference, check_value) in &state.check_values {
                caches.check_values.put(reference.clone(), check_value.clone());
            }
            info!(
                keys = state.check_values.len(),
                "Published master key check values to the cluster"
            );
            return;
        }

        for reference in caches.check_values.keys() {
            if !state.check_values.contains_key(&reference) {
                warn!(master_key = %reference, "Blocking master key that is not loaded on this instance");
                caches.blocked.put(reference, true);
            }
        }

        for (reference, check_value) in &state.check_values {
            match caches.check_values.get(reference) {
                None => {
                    warn!(master_key = %reference, "Blocking master key that is not loaded on other cluster members");
                    caches.blocked.put(reference.clone(), true);
                }
                Some(published) if &published != check_value => {
                    warn!(master_key = %reference, "Blocking master key whose check value differs across the cluster");
                    caches.blocked.put(reference.clone(), true);
                }
                Some(_) => {}
            }
        }
    }
}

fn report(keys: &BTreeSet<MasterKeyReference>, fail: bool, problem: &str) -> Result<()> {
    if keys.is_empty() {
        return Ok(());
    }

    let message = format!("Master keys {} {problem}", join(keys));
    if fail {
        error!("{message}");
        return Err(EncryptionError::ClusterValidation(message));
    }
    warn!("{message}");
    Ok(())
}

fn join(keys: &BTreeSet<MasterKeyReference>) -> String {
    keys.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::Collaborators;
    use crate::master_keys::CHECK_VALUES_ATTRIBUTE;
    use crate::test_support::{self, Node};
    use sealstore_crypto::KeyAlgorithm;
    use sealstore_store::EncryptedKey;
    use serde_json::Value;

    fn record_key_use(collaborators: &Collaborators, content_url: &str, alias: &str) {
        collaborators
            .key_dao
            .update_content_url_key(
                content_url,
                EncryptedKey {
                    master_key: test_support::key_ref(alias),
                    algorithm: KeyAlgorithm::Aes,
                    bytes: vec![1; 16],
                },
                16,
            )
            .unwrap();
    }

    #[test]
    fn test_first_instance_publishes() {
        let node = Node::started(&["a", "b"]);
        let published = node.collaborators.caches.check_values.keys();
        assert_eq!(published.len(), 2);
        assert!(node.master_keys.get_extraneous_keys().is_empty());
        assert!(node.collaborators.caches.blocked.is_empty());
    }

    #[test]
    fn test_startup_runs_once() {
        let node = Node::started(&["a"]);
        node.master_keys.on_startup().unwrap();
    }

    #[test]
    fn test_startup_requires_activation() {
        let node = Node::new(&["a"]);
        assert!(matches!(
            node.master_keys.on_startup(),
            Err(EncryptionError::IllegalState(_))
        ));
    }

    #[test]
    fn test_peer_with_same_keys_starts() {
        let first = Node::started(&["a", "b"]);
        let second = first.peer();
        second.master_keys.activate().unwrap();
        second.master_keys.on_startup().unwrap();
        assert_eq!(second.master_keys.get_active_keys().len(), 2);
        assert!(second.collaborators.caches.blocked.is_empty());
    }

    #[test]
    fn test_cluster_mismatch_fails_by_default() {
        let shared = test_support::aes_key();
        let first = Node::build(
            test_support::keystore(&[("a", &test_support::aes_key()), ("b", &shared)]),
            test_support::settings(&["a", "b"]),
            Collaborators::in_memory(),
            1,
        );
        first.start();

        let second = Node::build(
            test_support::keystore(&[("a", &test_support::aes_key()), ("b", &shared)]),
            test_support::settings(&["a", "b"]),
            first.collaborators.clone(),
            2,
        );
        second.master_keys.activate().unwrap();
        assert_eq!(
            second.master_keys.get_mismatched_keys(true).unwrap(),
            BTreeSet::from([test_support::key_ref("a")])
        );
        let err = second.master_keys.on_startup().unwrap_err();
        assert!(matches!(err, EncryptionError::ClusterValidation(_)));
    }

    #[test]
    fn test_cluster_mismatch_blocks_key_when_tolerated() {
        let shared = test_support::aes_key();
        let first = Node::build(
            test_support::keystore(&[("a", &test_support::aes_key()), ("b", &shared)]),
            test_support::settings(&["a", "b"]),
            Collaborators::in_memory(),
            1,
        );
        first.start();

        let mut settings = test_support::settings(&["a", "b"]);
        settings.fail_mismatched_cluster_keys = false;
        let second = Node::build(
            test_support::keystore(&[("a", &test_support::aes_key()), ("b", &shared)]),
            settings,
            first.collaborators.clone(),
            2,
        );
        second.start();

        let expected = BTreeSet::from([test_support::key_ref("b")]);
        assert_eq!(second.master_keys.get_active_keys(), expected);
        assert_eq!(first.master_keys.get_active_keys(), expected);
    }

    #[test]
    fn test_database_mismatch_fails_by_default() {
        let node = Node::started(&["a"]);
        node.master_keys.get_random_active_encryption_key().unwrap();
        record_key_use(&node.collaborators, "store://x", "a");

        let replaced = Node::build(
            test_support::keystore(&[("a", &test_support::aes_key())]),
            test_support::settings(&["a"]),
            node.collaborators.with_separate_caches(),
            3,
        );
        replaced.master_keys.activate().unwrap();
        assert_eq!(replaced.master_keys.get_mismatched_keys(false).unwrap().len(), 1);
        assert!(matches!(
            replaced.master_keys.on_startup(),
            Err(EncryptionError::ClusterValidation(_))
        ));
    }

    #[test]
    fn test_unused_recorded_check_value_is_ignored() {
        let node = Node::started(&["a"]);
        node.collaborators
            .attributes
            .set_attribute(
                Value::String("AES#0000".to_string()),
                &[CHECK_VALUES_ATTRIBUTE, test_support::KEYSTORE_ID, "a"],
            )
            .unwrap();
        assert!(node.master_keys.get_mismatched_keys(false).unwrap().is_empty());
    }

    #[test]
    fn test_missing_database_keys() {
        let node = Node::new(&["a"]);
        record_key_use(&node.collaborators, "store://old", "retired");
        node.master_keys.activate().unwrap();
        assert_eq!(
            node.master_keys.get_missing_keys(false).unwrap(),
            BTreeSet::from([test_support::key_ref("retired")])
        );
        node.master_keys.on_startup().unwrap();

        let mut settings = test_support::settings(&["a"]);
        settings.fail_missing_database_keys = true;
        let strict = Node::build(
            test_support::aes_keystore(&["a"]),
            settings,
            node.collaborators.with_separate_caches(),
            4,
        );
        strict.master_keys.activate().unwrap();
        assert!(strict.master_keys.on_startup().is_err());
    }

    #[test]
    fn test_missing_cluster_keys() {
        let a = test_support::aes_key();
        let b = test_support::aes_key();
        let first = Node::build(
            test_support::keystore(&[("a", &a), ("b", &b)]),
            test_support::settings(&["a", "b"]),
            Collaborators::in_memory(),
            1,
        );
        first.start();

        let mut strict_settings = test_support::settings(&["a"]);
        strict_settings.fail_missing_cluster_keys = true;
        let strict = Node::build(
            test_support::keystore(&[("a", &a)]),
            strict_settings,
            first.collaborators.clone(),
            2,
        );
        strict.master_keys.activate().unwrap();
        assert!(strict.master_keys.on_startup().is_err());

        let lenient = Node::build(
            test_support::keystore(&[("a", &a)]),
            test_support::settings(&["a"]),
            first.collaborators.clone(),
            3,
        );
        lenient.start();
        assert!(first.collaborators.caches.blocked.contains(&test_support::key_ref("b")));
        assert_eq!(
            first.master_keys.get_active_keys(),
            BTreeSet::from([test_support::key_ref("a")])
        );
    }

    #[test]
    fn test_extraneous_keys_are_blocked() {
        let a = test_support::aes_key();
        let first = Node::build(
            test_support::keystore(&[("a", &a)]),
            test_support::settings(&["a"]),
            Collaborators::in_memory(),
            1,
        );
        first.start();

        let second = Node::build(
            test_support::keystore(&[("a", &a), ("b", &test_support::aes_key())]),
            test_support::settings(&["a", "b"]),
            first.collaborators.clone(),
            2,
        );
        second.start();
        assert_eq!(
            second.master_keys.get_extraneous_keys(),
            BTreeSet::from([test_support::key_ref("b")])
        );
        assert_eq!(
            second.master_keys.get_active_keys(),
            BTreeSet::from([test_support::key_ref("a")])
        );
    }

    #[test]
    fn test_no_active_keys_fails_startup() {
        let first = Node::started(&["a"]);
        let stranger = Node::build(
            test_support::keystore(&[("b", &test_support::aes_key())]),
            test_support::settings(&["b"]),
            first.collaborators.clone(),
            2,
        );
        stranger.master_keys.activate().unwrap();
        let err = stranger.master_keys.on_startup().unwrap_err();
        assert!(err.to_string().contains("No usable encryption master keys"));
    }
}
