//! Durable hierarchical attributes

use crate::Result;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;

/// Durable key/value attributes addressed by a path of string keys
pub trait AttributeStore: Send + Sync {
    /// Read the attribute at `keys`
    fn get_attribute(&self, keys: &[&str]) -> Result<Option<Value>>;

    /// Write the attribute at `keys`
    fn set_attribute(&self, value: Value, keys: &[&str]) -> Result<()>;

    /// Remove the attribute at `keys`
    fn remove_attribute(&self, keys: &[&str]) -> Result<()>;

    /// All attributes whose path starts with `prefix`
    fn get_attributes(&self, prefix: &[&str]) -> Result<Vec<(Vec<String>, Value)>>;
}

/// In-memory attribute store
#[derive(Default)]
pub struct MemoryAttributeStore {
    attributes: RwLock<BTreeMap<Vec<String>, Value>>,
}

impl MemoryAttributeStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

fn to_path(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|k| k.to_string()).collect()
}

impl AttributeStore for MemoryAttributeStore {
    fn get_attribute(&self, keys: &[&str]) -> Result<Option<Value>> {
        Ok(self.attributes.read().get(&to_path(keys)).cloned())
    }

    fn set_attribute(&self, value: Value, keys: &[&str]) -> Result<()> {
        self.attributes.write().insert(to_path(keys), value);
        Ok(())
    }

    fn remove_attribute(&self, keys: &[&str]) -> Result<()> {
        self.attributes.write().remove(&to_path(keys));
        Ok(())
    }

    fn get_attributes(&self, prefix: &[&str]) -> Result<Vec<(Vec<String>, Value)>> {
        let prefix = to_path(prefix);
        Ok(self
            .attributes
            .read()
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .map(|(path, value)| (path.clone(), value.clone()))
            .collect())
    }
}
