//! The per-collection document store.
//!
//! Records are kept in insertion order in a `Vec`, indexed by id through a
//! side `HashMap` for O(1) lookup, the way an ordered table plus a
//! primary-key index would behave.
//!
use crate::error::Error;
use crate::identity::IdentityManager;
use crate::query::{OrderBy, PagedResult, Query, Where};
use crate::value::{id_key, merge_shallow, record_id, Record};
use serde_json::Value;
use std::collections::HashMap;

/// Identifies a record (or records) either by a list of ids, a plain
/// attribute-equality map, or a full [`Query`](../query/struct.Query.html)
/// with `where`/`orderBy`/`offset`/`limit`/`cursor`.
///
pub enum Lookup {
    Ids(Vec<Value>),
    Equality(Record),
    Query(Query),
}

impl From<Query> for Lookup {
    fn from(q: Query) -> Self {
        Self::Query(q)
    }
}

impl From<Where> for Lookup {
    fn from(w: Where) -> Self {
        Self::Query(Query {
            where_: Some(w),
            order_by: OrderBy::default(),
            offset: None,
            limit: None,
            cursor: None,
        })
    }
}

impl From<Record> for Lookup {
    fn from(map: Record) -> Self {
        Self::Equality(map)
    }
}

impl From<Vec<Value>> for Lookup {
    fn from(ids: Vec<Value>) -> Self {
        Self::Ids(ids)
    }
}

/// An ordered collection of plain attribute records keyed by id.
///
pub struct DbCollection {
    name: String,
    order: Vec<String>,
    by_key: HashMap<String, Record>,
    identity: Box<dyn IdentityManager + Send + Sync>,
}

impl DbCollection {
    pub fn new(name: &str, identity: Box<dyn IdentityManager + Send + Sync>) -> Self {
        Self {
            name: name.to_string(),
            order: Vec::new(),
            by_key: HashMap::new(),
            identity,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identity_manager(&self) -> &(dyn IdentityManager + Send + Sync) {
        self.identity.as_ref()
    }

    pub fn identity_manager_mut(&mut self) -> &mut (dyn IdentityManager + Send + Sync) {
        self.identity.as_mut()
    }

    /// Allocate an id if `attrs` has none, assign it, append the record,
    /// and return the stored snapshot. Fails if the supplied id is
    /// already present.
    ///
    pub fn insert(&mut self, mut attrs: Record) -> Result<Record, Error> {
        let id = match record_id(&attrs) {
            Some(id) => {
                if self.identity.has(&id) {
                    return Err(Error::identity(format!(
                        "{}: id {} already exists",
                        self.name, id
                    )));
                }
                self.identity.set(&id);
                id
            }
            None => self.identity.next(),
        };
        attrs.insert("id".to_string(), id.clone());
        let key = id_key(&id);
        if self.by_key.contains_key(&key) {
            return Err(Error::identity(format!(
                "{}: id {} already exists",
                self.name, id
            )));
        }
        self.by_key.insert(key.clone(), attrs.clone());
        self.order.push(key);
        Ok(attrs)
    }

    pub fn insert_many(
        &mut self,
        list: Vec<Record>,
    ) -> Result<Vec<Record>, Error> {
        list.into_iter().map(|r| self.insert(r)).collect()
    }

    /// Look up a single record by id.
    ///
    pub fn find(&self, id: &Value) -> Option<Record> {
        self.by_key.get(&id_key(id)).cloned()
    }

    /// Return the first record matching `lookup`.
    ///
    pub fn find_one(&self, lookup: impl Into<Lookup>) -> Option<Record> {
        match lookup.into() {
            Lookup::Ids(ids) => ids.first().and_then(|id| self.find(id)),
            Lookup::Equality(map) => {
                let where_ = Where::from_equality_map(&map);
                self.order
                    .iter()
                    .filter_map(|k| self.by_key.get(k))
                    .find(|r| where_.matches(r))
                    .cloned()
            }
            Lookup::Query(q) => {
                self.all_ordered()
                    .into_iter()
                    .find(|r| q.matches(r))
            }
        }
    }

    fn all_ordered(&self) -> Vec<Record> {
        self.order
            .iter()
            .filter_map(|k| self.by_key.get(k))
            .cloned()
            .collect()
    }

    /// Return every record matching `lookup`, honoring sort, offset,
    /// limit, and cursor, plus the match count before pagination.
    ///
    pub fn find_many(&self, lookup: impl Into<Lookup>) -> Result<PagedResult, Error> {
        match lookup.into() {
            Lookup::Ids(ids) => {
                let records: Vec<Record> =
                    ids.iter().filter_map(|id| self.find(id)).collect();
                let total = records.len();
                Ok(PagedResult { records, total })
            }
            Lookup::Equality(map) => {
                let where_ = Where::from_equality_map(&map);
                let mut records: Vec<Record> = self
                    .all_ordered()
                    .into_iter()
                    .filter(|r| where_.matches(r))
                    .collect();
                let total = records.len();
                OrderBy::default().apply(&mut records);
                Ok(PagedResult { records, total })
            }
            Lookup::Query(q) => {
                let mut matched: Vec<Record> = self
                    .all_ordered()
                    .into_iter()
                    .filter(|r| q.matches(r))
                    .collect();
                let total = matched.len();
                q.order_by.apply(&mut matched);

                if let Some(cursor_key) = q.order_by.0.first().cloned() {
                    if let Some(cursor) = q.cursor.as_ref() {
                        let mut skipping = true;
                        matched.retain(|r| {
                            if !skipping {
                                return true;
                            }
                            let v = r.get(&cursor_key.field).cloned();
                            if v.as_ref() == Some(&cursor.0) {
                                skipping = false;
                                false
                            } else {
                                true
                            }
                        });
                    }
                } else if q.cursor.is_some() {
                    return Err(Error::query(
                        "cursor pagination requires an orderBy field",
                    ));
                }

                let start = q.offset.unwrap_or(0).min(matched.len());
                let mut page: Vec<Record> = matched.split_off(start);
                if let Some(limit) = q.limit {
                    page.truncate(limit);
                }
                Ok(PagedResult {
                    records: page,
                    total,
                })
            }
        }
    }

    /// Merge `patch` into the record with id `id`. Returns the updated
    /// snapshot, or `None` if no such id.
    ///
    pub fn update(&mut self, id: &Value, patch: &Record) -> Option<Record> {
        let key = id_key(id);
        let record = self.by_key.get_mut(&key)?;
        merge_shallow(record, patch);
        record.insert("id".to_string(), id.clone());
        Some(record.clone())
    }

    /// Apply `patch` to every record matched by `lookup`, respecting
    /// `limit`/`offset`/`orderBy` to bound the affected set, and return
    /// the updated snapshots.
    ///
    pub fn update_many(
        &mut self,
        lookup: impl Into<Lookup>,
        patch: &Record,
    ) -> Result<Vec<Record>, Error> {
        let matched = self.find_many(lookup)?;
        let mut updated = Vec::with_capacity(matched.records.len());
        for record in matched.records {
            let id = record_id(&record).ok_or_else(|| {
                Error::identity("matched record has no id".to_string())
            })?;
            if let Some(r) = self.update(&id, patch) {
                updated.push(r);
            }
        }
        Ok(updated)
    }

    /// Remove the record with id `id`. Returns whether anything was
    /// removed.
    ///
    pub fn delete(&mut self, id: &Value) -> bool {
        let key = id_key(id);
        if self.by_key.remove(&key).is_some() {
            self.order.retain(|k| k != &key);
            true
        } else {
            false
        }
    }

    /// Remove every record matched by `lookup`, return the count removed.
    ///
    pub fn delete_many(&mut self, lookup: impl Into<Lookup>) -> Result<usize, Error> {
        let matched = self.find_many(lookup)?;
        let mut count = 0;
        for record in matched.records {
            if let Some(id) = record_id(&record) {
                if self.delete(&id) {
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    pub fn count(&self, where_: Option<&Where>) -> usize {
        match where_ {
            Some(w) => self.all_ordered().iter().filter(|r| w.matches(r)).count(),
            None => self.order.len(),
        }
    }

    pub fn exists(&self, where_: Option<&Where>) -> bool {
        self.count(where_) > 0
    }

    pub fn all(&self) -> Vec<Record> {
        self.all_ordered()
    }

    pub fn at(&self, i: usize) -> Option<Record> {
        self.order.get(i).and_then(|k| self.by_key.get(k)).cloned()
    }

    pub fn first(&self) -> Option<Record> {
        self.at(0)
    }

    pub fn last(&self) -> Option<Record> {
        if self.order.is_empty() {
            None
        } else {
            self.at(self.order.len() - 1)
        }
    }

    pub fn size(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.by_key.clear();
        self.identity.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::NumericIdentityManager;
    use crate::query::{FieldOp, QueryBld};
    use serde_json::json;

    fn rec(v: serde_json::Value) -> Record {
        v.as_object().unwrap().clone()
    }

    fn new_users() -> DbCollection {
        DbCollection::new("users", Box::new(NumericIdentityManager::new()))
    }

    #[test]
    fn insert_assigns_id_and_find_roundtrips() {
        let mut c = new_users();
        let inserted = c.insert(rec(json!({"name": "alice"}))).unwrap();
        assert_eq!(inserted["id"], json!(1));
        assert_eq!(c.find(&json!(1)).unwrap()["name"], "alice");
    }

    #[test]
    fn insert_duplicate_id_fails() {
        let mut c = new_users();
        c.insert(rec(json!({"id": 1, "name": "alice"}))).unwrap();
        let err = c.insert(rec(json!({"id": 1, "name": "bob"})));
        assert!(err.is_err());
    }

    #[test]
    fn delete_then_find_is_none() {
        let mut c = new_users();
        c.insert(rec(json!({"id": 1, "name": "alice"}))).unwrap();
        assert!(c.delete(&json!(1)));
        assert!(c.find(&json!(1)).is_none());
    }

    #[test]
    fn find_many_respects_where_order_offset_limit_and_total() {
        let mut c = new_users();
        for (age, status) in [
            (25, "active"),
            (30, "active"),
            (35, "inactive"),
            (28, "pending"),
            (40, "active"),
        ] {
            c.insert(rec(json!({"age": age, "status": status}))).unwrap();
        }
        let query = QueryBld::new()
            .filter(Where::and(vec![
                Where::eq("status", "active"),
                Where::op("age", FieldOp::Gte(json!(30))),
            ]))
            .order_by(OrderBy::asc("age"))
            .build()
            .unwrap();
        let result = c.find_many(query).unwrap();
        assert_eq!(result.total, 2);
        let ages: Vec<i64> =
            result.records.iter().map(|r| r["age"].as_i64().unwrap()).collect();
        assert_eq!(ages, vec![30, 40]);
    }

    #[test]
    fn find_many_limit_bounds_length_total_is_full_match_count() {
        let mut c = new_users();
        for age in [25, 30, 35, 28, 40] {
            c.insert(rec(json!({"age": age}))).unwrap();
        }
        let query = QueryBld::new()
            .order_by(OrderBy::asc("age"))
            .limit(2)
            .build()
            .unwrap();
        let result = c.find_many(query).unwrap();
        assert_eq!(result.records.len(), 2);
        assert_eq!(result.total, 5);
    }

    #[test]
    fn cursor_pagination_skips_through_boundary() {
        let mut c = new_users();
        for age in [10, 20, 30, 40, 50] {
            c.insert(rec(json!({"age": age}))).unwrap();
        }
        let query = QueryBld::new()
            .order_by(OrderBy::asc("age"))
            .cursor(crate::query::Cursor(json!(30)))
            .build()
            .unwrap();
        let result = c.find_many(query).unwrap();
        let ages: Vec<i64> =
            result.records.iter().map(|r| r["age"].as_i64().unwrap()).collect();
        assert_eq!(ages, vec![40, 50]);
    }

    #[test]
    fn update_many_bounded_by_limit() {
        let mut c = new_users();
        for _ in 0..3 {
            c.insert(rec(json!({"status": "active"}))).unwrap();
        }
        let query = QueryBld::new()
            .filter(Where::eq("status", "active"))
            .order_by(OrderBy::asc("id"))
            .limit(2)
            .build()
            .unwrap();
        let updated = c
            .update_many(query, &rec(json!({"status": "done"})))
            .unwrap();
        assert_eq!(updated.len(), 2);
        assert_eq!(c.count(Some(&Where::eq("status", "done"))), 2);
    }
}
