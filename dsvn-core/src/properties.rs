//! SVN Property Sets
//!
//! Versioned node properties and revision properties share this map type

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Property value
pub type PropertyValue = String;

/// Property set for a single path or revision
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySet {
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
}

impl PropertySet {
    /// Create a new empty property set
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a property value
    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    /// Set a property value
    pub fn set(&mut self, name: String, value: PropertyValue) {
        self.properties.insert(name, value);
    }

    /// Remove a property
    pub fn remove(&mut self, name: &str) -> Option<PropertyValue> {
        self.properties.remove(name)
    }

    /// List all property names
    pub fn list(&self) -> Vec<String> {
        self.properties.keys().cloned().collect()
    }

    /// Check if property exists
    pub fn contains(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Iterate over (name, value) pairs in name order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.properties.iter()
    }
}

impl FromIterator<(String, PropertyValue)> for PropertySet {
    fn from_iter<I: IntoIterator<Item = (String, PropertyValue)>>(iter: I) -> Self {
        Self {
            properties: iter.into_iter().collect(),
        }
    }
}

/// SVN standard properties
pub mod svn_props {
    /// Revision author
    pub const AUTHOR: &str = "svn:author";

    /// Revision date
    pub const DATE: &str = "svn:date";

    /// Revision log message
    pub const LOG: &str = "svn:log";

    /// Executable flag
    pub const EXECUTABLE: &str = "svn:executable";

    /// Merge info
    pub const MERGE_INFO: &str = "svn:mergeinfo";

    /// Value for svn:executable
    pub const EXECUTABLE_VALUE: &str = "*";

    /// Check if a property name is an SVN standard property
    pub fn is_svn_property(name: &str) -> bool {
        name.starts_with("svn:")
    }
}
