//! The database: a registry of named [`DbCollection`](../db_collection/struct.DbCollection.html)s.
//!
//! One object that owns every collection and hands out shared access to
//! them by name, with no I/O of its own.
//!
use crate::db_collection::DbCollection;
use crate::error::Error;
use crate::identity::IdentityManager;
use std::collections::HashMap;

/// Owns every [`DbCollection`](../db_collection/struct.DbCollection.html)
/// in a schema, keyed by collection name.
///
pub struct Db {
    collections: HashMap<String, DbCollection>,
}

impl Db {
    pub fn new() -> Self {
        Self {
            collections: HashMap::new(),
        }
    }

    /// Register a new, empty collection. Fails if the name is already
    /// taken.
    ///
    pub fn create_collection(
        &mut self,
        name: &str,
        identity: Box<dyn IdentityManager + Send + Sync>,
    ) -> Result<(), Error> {
        if self.collections.contains_key(name) {
            return Err(Error::configuration(format!(
                "collection '{}' already registered",
                name
            )));
        }
        self.collections
            .insert(name.to_string(), DbCollection::new(name, identity));
        Ok(())
    }

    pub fn collection(&self, name: &str) -> Option<&DbCollection> {
        self.collections.get(name)
    }

    pub fn collection_mut(&mut self, name: &str) -> Option<&mut DbCollection> {
        self.collections.get_mut(name)
    }

    pub fn require(&self, name: &str) -> Result<&DbCollection, Error> {
        self.collection(name)
            .ok_or_else(|| Error::configuration(format!("no such collection '{}'", name)))
    }

    pub fn require_mut(&mut self, name: &str) -> Result<&mut DbCollection, Error> {
        self.collection_mut(name)
            .ok_or_else(|| Error::configuration(format!("no such collection '{}'", name)))
    }

    pub fn collection_names(&self) -> Vec<&str> {
        self.collections.keys().map(|s| s.as_str()).collect()
    }

    /// Clear every collection, resetting each one's identity manager too.
    ///
    pub fn empty_data(&mut self) {
        for collection in self.collections.values_mut() {
            collection.clear();
        }
    }
}

impl Default for Db {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::NumericIdentityManager;
    use serde_json::json;

    #[test]
    fn create_collection_then_insert_via_registry() {
        let mut db = Db::new();
        db.create_collection("users", Box::new(NumericIdentityManager::new()))
            .unwrap();
        let users = db.require_mut("users").unwrap();
        let rec = users
            .insert(json!({"name": "alice"}).as_object().unwrap().clone())
            .unwrap();
        assert_eq!(rec["id"], json!(1));
    }

    #[test]
    fn duplicate_collection_name_fails() {
        let mut db = Db::new();
        db.create_collection("users", Box::new(NumericIdentityManager::new()))
            .unwrap();
        let err = db.create_collection("users", Box::new(NumericIdentityManager::new()));
        assert!(err.is_err());
    }

    #[test]
    fn empty_data_clears_and_resets_identities() {
        let mut db = Db::new();
        db.create_collection("users", Box::new(NumericIdentityManager::new()))
            .unwrap();
        db.require_mut("users")
            .unwrap()
            .insert(json!({"name": "alice"}).as_object().unwrap().clone())
            .unwrap();
        db.empty_data();
        let users = db.require("users").unwrap();
        assert_eq!(users.size(), 0);
    }

    #[test]
    fn unknown_collection_is_configuration_error() {
        let db = Db::new();
        assert!(matches!(db.require("ghosts"), Err(Error::Configuration(_))));
    }
}
