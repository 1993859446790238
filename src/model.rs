//! Typed-ish wrappers over stored records: [`Model`] for one instance,
//! [`ModelCollection`] for an ordered bulk view.
//!
//! A single runtime-dispatched `Model` is shared by every collection,
//! exposing attribute accessors, relationship accessors, and lifecycle
//! methods (`save`, `update`, `destroy`, `link`/`unlink`) uniformly.
use crate::db::Db;
use crate::error::Error;
use crate::identity::IdentityManager;
use crate::logger::LoggerIf;
use crate::query::{PagedResult, Query};
use crate::relationship::{
    self, PendingUpdate, RelationshipKind, ResolvedRelationship,
};
use crate::serializer::{self, SerializerConfig};
use crate::value::{merge_shallow, record_id, Record};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Infrastructure shared by every [`Model`] and [`ModelCollection`]
/// produced from one [`Schema`](../schema/struct.Schema.html): the store,
/// the resolved relationship graph, the collection-to-model-name map used
/// for default serializer root keys, configured serializers, and the
/// shared logger.
///
#[derive(Clone)]
pub struct ModelContext {
    pub db: Rc<RefCell<Db>>,
    pub relationships: Rc<HashMap<String, Vec<ResolvedRelationship>>>,
    pub model_names: Rc<HashMap<String, String>>,
    pub serializer_configs: Rc<HashMap<String, SerializerConfig>>,
    pub logger: LoggerIf,
}

impl ModelContext {
    pub fn relationships_for(&self, collection: &str) -> &[ResolvedRelationship] {
        self.relationships
            .get(collection)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn relationship<'a>(
        &'a self,
        collection: &str,
        name: &str,
    ) -> Result<&'a ResolvedRelationship, Error> {
        self.relationships_for(collection)
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| {
                Error::query(format!("unknown relationship '{}' on '{}'", name, collection))
            })
    }

    pub fn model_name(&self, collection: &str) -> String {
        self.model_names
            .get(collection)
            .cloned()
            .unwrap_or_else(|| collection.to_string())
    }
}

/// What [`Model::related`](struct.Model.html#method.related) returns: a
/// single optional model for a belongs-to relationship, or a collection
/// for a has-many one.
///
pub enum Related {
    One(Option<Model>),
    Many(ModelCollection),
}

/// What a relationship field in [`Model::update`
/// ](struct.Model.html#method.update) may be set to: a raw id/list, or
/// model instances resolved to their ids.
///
pub enum RelationshipValue {
    Clear,
    Id(Value),
    Ids(Vec<Value>),
    Model(Model),
    Models(Vec<Model>),
}

/// A live view over one record. Either "new" (`id` absent, not in the
/// store) or "saved" (persisted, `id` present).
///
#[derive(Clone)]
pub struct Model {
    pub collection: String,
    ctx: ModelContext,
    attrs: Record,
    persisted: bool,
    pending: Vec<(String, PendingUpdate)>,
}

impl Model {
    pub fn new(collection: &str, ctx: ModelContext, attrs: Record) -> Self {
        Self {
            collection: collection.to_string(),
            ctx,
            attrs,
            persisted: false,
            pending: Vec::new(),
        }
    }

    /// Wrap an already-stored record (e.g. one just returned by
    /// `DbCollection::insert`, or resolved through a relationship).
    ///
    pub fn from_record(collection: &str, ctx: ModelContext, attrs: Record) -> Self {
        Self {
            collection: collection.to_string(),
            ctx,
            attrs,
            persisted: true,
            pending: Vec::new(),
        }
    }

    pub fn id(&self) -> Option<Value> {
        record_id(&self.attrs)
    }

    pub fn is_new(&self) -> bool {
        !self.persisted
    }

    pub fn attrs(&self) -> &Record {
        &self.attrs
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.attrs.get(field)
    }

    /// Set a plain attribute in memory. Does not persist; call
    /// [`save`](#method.save) afterward.
    ///
    pub fn set(&mut self, field: &str, value: Value) {
        self.attrs.insert(field.to_string(), value);
    }

    fn require_id(&self) -> Result<Value, Error> {
        self.id()
            .ok_or_else(|| Error::integrity("model has not been saved".to_string()))
    }

    fn relationship(&self, name: &str) -> Result<&ResolvedRelationship, Error> {
        self.ctx.relationship(&self.collection, name)
    }

    /// Insert (if new) or re-persist (if saved), then flush any pending
    /// relationship updates queued while this model was unsaved.
    ///
    pub fn save(&mut self) -> Result<(), Error> {
        if self.persisted {
            let id = self.require_id()?;
            let mut db = self.ctx.db.borrow_mut();
            let updated = db
                .require_mut(&self.collection)?
                .update(&id, &self.attrs)
                .ok_or_else(|| Error::integrity("saved model missing from store".to_string()))?;
            self.attrs = updated;
            return Ok(());
        }

        let inserted = {
            let mut db = self.ctx.db.borrow_mut();
            db.require_mut(&self.collection)?.insert(self.attrs.clone())?
        };
        self.attrs = inserted;
        self.persisted = true;

        let pending = std::mem::take(&mut self.pending);
        for (name, update) in pending {
            self.apply_update(&name, update)?;
        }
        Ok(())
    }

    fn apply_update(&mut self, name: &str, update: PendingUpdate) -> Result<(), Error> {
        let id = self.require_id()?;
        let rel = self.relationship(name)?.clone();
        let mut db = self.ctx.db.borrow_mut();
        match update {
            PendingUpdate::SetBelongsTo(target) => {
                relationship::set_belongs_to(&mut db, &self.collection, &id, &rel, target)?
            }
            PendingUpdate::SetHasMany(targets) => {
                relationship::set_has_many(&mut db, &self.collection, &id, &rel, targets)?
            }
            PendingUpdate::Append(target) => {
                relationship::append_has_many(&mut db, &self.collection, &id, &rel, target)?
            }
            PendingUpdate::Remove(target) => {
                relationship::remove_has_many(&mut db, &self.collection, &id, &rel, &target)?
            }
        }
        drop(db);
        self.reload()
    }

    fn queue_or_apply(&mut self, name: &str, update: PendingUpdate) -> Result<(), Error> {
        if self.persisted {
            self.apply_update(name, update)
        } else {
            self.pending.push((name.to_string(), update));
            Ok(())
        }
    }

    fn resolve_target_id(&self, target: &Model) -> Result<Value, Error> {
        target
            .id()
            .ok_or_else(|| Error::integrity("target must be saved".to_string()))
    }

    /// `link(name, target)`: set a belongs-to, or append one model to a
    /// has-many.
    ///
    pub fn link(&mut self, name: &str, target: &Model) -> Result<(), Error> {
        let id = self.resolve_target_id(target)?;
        let kind = self.relationship(name)?.kind();
        match kind {
            RelationshipKind::BelongsTo => {
                self.queue_or_apply(name, PendingUpdate::SetBelongsTo(Some(id)))
            }
            RelationshipKind::HasMany => self.queue_or_apply(name, PendingUpdate::Append(id)),
        }
    }

    /// `link(name, [targets])`: replace a has-many relationship's full
    /// list.
    ///
    pub fn link_many(&mut self, name: &str, targets: &[Model]) -> Result<(), Error> {
        let ids = targets
            .iter()
            .map(|t| self.resolve_target_id(t))
            .collect::<Result<Vec<_>, _>>()?;
        self.queue_or_apply(name, PendingUpdate::SetHasMany(ids))
    }

    /// `unlink(name, target?)`: clear a belongs-to, clear the whole
    /// has-many list (`target = None`), or remove one entry.
    ///
    pub fn unlink(&mut self, name: &str, target: Option<&Model>) -> Result<(), Error> {
        let kind = self.relationship(name)?.kind();
        match kind {
            RelationshipKind::BelongsTo => {
                self.queue_or_apply(name, PendingUpdate::SetBelongsTo(None))
            }
            RelationshipKind::HasMany => match target {
                None => self.queue_or_apply(name, PendingUpdate::SetHasMany(Vec::new())),
                Some(t) => {
                    let id = self.resolve_target_id(t)?;
                    self.queue_or_apply(name, PendingUpdate::Remove(id))
                }
            },
        }
    }

    /// `update(patch, relations)`: merge plain attributes and apply any
    /// relationship changes, then persist immediately.
    ///
    pub fn update(
        &mut self,
        patch: &Record,
        relations: HashMap<String, RelationshipValue>,
    ) -> Result<(), Error> {
        for name in relations.keys() {
            if let Ok(rel) = self.relationship(name) {
                if patch.contains_key(rel.foreign_key()) {
                    self.ctx.logger.warn(&format!(
                        "update: relationship '{}' overrides its own foreign key '{}' supplied in the same patch; the relationship model wins",
                        name,
                        rel.foreign_key(),
                    ));
                }
            }
        }
        merge_shallow(&mut self.attrs, patch);
        if self.persisted {
            self.save()?;
        }
        for (name, value) in relations {
            let kind = self.relationship(&name)?.kind();
            match (kind, value) {
                (RelationshipKind::BelongsTo, RelationshipValue::Clear) => {
                    self.queue_or_apply(&name, PendingUpdate::SetBelongsTo(None))?
                }
                (RelationshipKind::BelongsTo, RelationshipValue::Id(id)) => {
                    self.queue_or_apply(&name, PendingUpdate::SetBelongsTo(Some(id)))?
                }
                (RelationshipKind::BelongsTo, RelationshipValue::Model(m)) => {
                    let id = self.resolve_target_id(&m)?;
                    self.queue_or_apply(&name, PendingUpdate::SetBelongsTo(Some(id)))?
                }
                (RelationshipKind::HasMany, RelationshipValue::Clear) => {
                    self.queue_or_apply(&name, PendingUpdate::SetHasMany(Vec::new()))?
                }
                (RelationshipKind::HasMany, RelationshipValue::Ids(ids)) => {
                    self.queue_or_apply(&name, PendingUpdate::SetHasMany(ids))?
                }
                (RelationshipKind::HasMany, RelationshipValue::Models(models)) => {
                    let ids = models
                        .iter()
                        .map(|m| self.resolve_target_id(m))
                        .collect::<Result<Vec<_>, _>>()?;
                    self.queue_or_apply(&name, PendingUpdate::SetHasMany(ids))?
                }
                _ => {
                    return Err(Error::query(format!(
                        "relationship '{}' does not accept that value shape",
                        name
                    )))
                }
            }
        }
        if !self.persisted {
            self.save()?;
        }
        Ok(())
    }

    /// Remove self from the store, clear every inverse link pointing at
    /// it, and reset to "new".
    ///
    pub fn destroy(&mut self) -> Result<(), Error> {
        let id = self.require_id()?;
        {
            let mut db = self.ctx.db.borrow_mut();
            relationship::destroy(
                &mut db,
                &self.collection,
                &id,
                self.ctx.relationships_for(&self.collection),
            )?;
            db.require_mut(&self.collection)?.delete(&id);
        }
        self.attrs.remove("id");
        self.persisted = false;
        Ok(())
    }

    /// Replace in-memory attributes with the stored record.
    ///
    pub fn reload(&mut self) -> Result<(), Error> {
        let id = self.require_id()?;
        let db = self.ctx.db.borrow();
        let record = db
            .require(&self.collection)?
            .find(&id)
            .ok_or_else(|| Error::integrity("model has been destroyed".to_string()))?;
        drop(db);
        self.attrs = record;
        Ok(())
    }

    /// Read a relationship without mutating pending state. Never errors
    /// for an empty relationship; errors only for an unknown name.
    ///
    pub fn related(&self, name: &str) -> Result<Related, Error> {
        let rel = self.relationship(name)?;
        let db = self.ctx.db.borrow();
        match rel.kind() {
            RelationshipKind::BelongsTo => {
                let target_id = self.attrs.get(rel.foreign_key()).cloned().filter(|v| !v.is_null());
                match target_id {
                    None => Ok(Related::One(None)),
                    Some(id) => {
                        let record = db.require(rel.target())?.find(&id);
                        Ok(Related::One(record.map(|r| {
                            Model::from_record(rel.target(), self.ctx.clone(), r)
                        })))
                    }
                }
            }
            RelationshipKind::HasMany => {
                let ids: Vec<Value> = match self.attrs.get(rel.foreign_key()) {
                    Some(Value::Array(items)) => items.clone(),
                    _ => Vec::new(),
                };
                let collection = db.require(rel.target())?;
                let models: Vec<Model> = ids
                    .iter()
                    .filter_map(|id| collection.find(id))
                    .map(|r| Model::from_record(rel.target(), self.ctx.clone(), r))
                    .collect();
                Ok(Related::Many(ModelCollection::new(
                    rel.target().to_string(),
                    self.ctx.clone(),
                    models,
                    None,
                )))
            }
        }
    }

    pub fn to_json(&self, opts: Option<&SerializerConfig>) -> Result<Value, Error> {
        serializer::serialize_model(self, &self.ctx, opts)
    }

    pub fn serialize(&self, opts: Option<&SerializerConfig>) -> Result<Value, Error> {
        self.to_json(opts)
    }
}

/// An ordered, owned snapshot of model instances for bulk operations.
/// A value, not a live cursor: later mutations to the store are not
/// reflected until the models are reloaded.
///
#[derive(Clone)]
pub struct ModelCollection {
    pub collection: String,
    ctx: ModelContext,
    models: Vec<Model>,
    meta_total: Option<usize>,
}

impl ModelCollection {
    pub fn new(
        collection: String,
        ctx: ModelContext,
        models: Vec<Model>,
        meta_total: Option<usize>,
    ) -> Self {
        Self {
            collection,
            ctx,
            models,
            meta_total,
        }
    }

    pub fn from_paged(collection: String, ctx: ModelContext, page: PagedResult) -> Self {
        let total = page.total;
        let models = page
            .records
            .into_iter()
            .map(|r| Model::from_record(&collection, ctx.clone(), r))
            .collect();
        Self::new(collection, ctx, models, Some(total))
    }

    pub fn models(&self) -> &[Model] {
        &self.models
    }

    pub fn into_vec(self) -> Vec<Model> {
        self.models
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn meta_total(&self) -> Option<usize> {
        self.meta_total
    }

    pub fn push(&mut self, model: Model) {
        self.models.push(model);
    }

    pub fn includes(&self, id: &Value) -> bool {
        self.models.iter().any(|m| m.id().as_ref() == Some(id))
    }

    pub fn filter(&self, pred: impl Fn(&Model) -> bool) -> Self {
        Self::new(
            self.collection.clone(),
            self.ctx.clone(),
            self.models.iter().filter(|m| pred(m)).cloned().collect(),
            None,
        )
    }

    pub fn slice(&self, start: usize, end: usize) -> Self {
        let end = end.min(self.models.len());
        let start = start.min(end);
        Self::new(
            self.collection.clone(),
            self.ctx.clone(),
            self.models[start..end].to_vec(),
            None,
        )
    }

    pub fn sort_by(&self, cmp: impl FnMut(&Model, &Model) -> std::cmp::Ordering) -> Self {
        let mut models = self.models.clone();
        models.sort_by(cmp);
        Self::new(self.collection.clone(), self.ctx.clone(), models, self.meta_total)
    }

    pub fn concat(&self, other: &Self) -> Self {
        let mut models = self.models.clone();
        models.extend(other.models.iter().cloned());
        Self::new(self.collection.clone(), self.ctx.clone(), models, None)
    }

    pub fn save(&mut self) -> Result<(), Error> {
        for m in &mut self.models {
            m.save()?;
        }
        Ok(())
    }

    pub fn update(
        &mut self,
        patch: &Record,
        relations_for_each: impl Fn() -> HashMap<String, RelationshipValue>,
    ) -> Result<(), Error> {
        for m in &mut self.models {
            m.update(patch, relations_for_each())?;
        }
        Ok(())
    }

    pub fn destroy(&mut self) -> Result<(), Error> {
        for m in &mut self.models {
            m.destroy()?;
        }
        Ok(())
    }

    pub fn reload(&mut self) -> Result<(), Error> {
        for m in &mut self.models {
            m.reload()?;
        }
        Ok(())
    }

    pub fn to_json(&self, opts: Option<&SerializerConfig>) -> Result<Value, Error> {
        serializer::serialize_collection(self, &self.ctx, opts)
    }

    pub fn serialize(&self, opts: Option<&SerializerConfig>) -> Result<Value, Error> {
        self.to_json(opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use crate::identity::NumericIdentityManager;
    use crate::relationship::{InversePeer, RelationshipDescriptor};
    use serde_json::json;

    fn ctx_with_author_relationship() -> ModelContext {
        let mut db = Db::new();
        db.create_collection("users", Box::new(NumericIdentityManager::new()))
            .unwrap();
        db.create_collection("posts", Box::new(NumericIdentityManager::new()))
            .unwrap();

        let mut relationships = HashMap::new();
        relationships.insert(
            "posts".to_string(),
            vec![ResolvedRelationship {
                name: "author".to_string(),
                descriptor: RelationshipDescriptor::belongs_to("users", "authorId", "authors"),
                inverse_peer: Some(InversePeer {
                    name: "posts".to_string(),
                    foreign_key: "postIds".to_string(),
                    kind: RelationshipKind::HasMany,
                }),
            }],
        );
        relationships.insert(
            "users".to_string(),
            vec![ResolvedRelationship {
                name: "posts".to_string(),
                descriptor: RelationshipDescriptor::has_many("posts", "postIds", "posts"),
                inverse_peer: Some(InversePeer {
                    name: "author".to_string(),
                    foreign_key: "authorId".to_string(),
                    kind: RelationshipKind::BelongsTo,
                }),
            }],
        );

        ModelContext {
            db: Rc::new(RefCell::new(db)),
            relationships: Rc::new(relationships),
            model_names: Rc::new(HashMap::new()),
            serializer_configs: Rc::new(HashMap::new()),
            logger: LoggerIf::null(),
        }
    }

    #[test]
    fn s1_link_before_save_is_deferred_then_flushed() {
        let ctx = ctx_with_author_relationship();
        let mut user = Model::new("users", ctx.clone(), json!({"name": "alice"}).as_object().unwrap().clone());
        user.save().unwrap();

        let mut post = Model::new(
            "posts",
            ctx.clone(),
            json!({"title": "hi"}).as_object().unwrap().clone(),
        );
        post.link("author", &user).unwrap();
        post.save().unwrap();

        assert_eq!(post.get("authorId"), Some(&user.id().unwrap()));
        user.reload().unwrap();
        match user.related("posts").unwrap() {
            Related::Many(collection) => {
                assert_eq!(collection.len(), 1);
                assert_eq!(collection.models()[0].id(), post.id());
            }
            _ => panic!("expected Many"),
        }
    }

    #[test]
    fn destroy_clears_inverse_and_resets_to_new() {
        let ctx = ctx_with_author_relationship();
        let mut user = Model::new("users", ctx.clone(), json!({"name": "alice"}).as_object().unwrap().clone());
        user.save().unwrap();
        let mut post = Model::new("posts", ctx.clone(), json!({"title": "hi"}).as_object().unwrap().clone());
        post.link("author", &user).unwrap();
        post.save().unwrap();

        post.destroy().unwrap();
        assert!(post.is_new());
        user.reload().unwrap();
        assert_eq!(user.get("postIds"), Some(&json!([])));
    }

    #[test]
    fn update_relationship_model_wins_over_raw_foreign_key_in_same_patch() {
        let ctx = ctx_with_author_relationship();
        let mut user_a = Model::new("users", ctx.clone(), json!({"name": "alice"}).as_object().unwrap().clone());
        user_a.save().unwrap();
        let mut user_b = Model::new("users", ctx.clone(), json!({"name": "bob"}).as_object().unwrap().clone());
        user_b.save().unwrap();
        let mut post = Model::new("posts", ctx.clone(), json!({"title": "hi"}).as_object().unwrap().clone());
        post.save().unwrap();

        let patch = json!({"authorId": user_a.id().unwrap()}).as_object().unwrap().clone();
        let mut relations = HashMap::new();
        relations.insert("author".to_string(), RelationshipValue::Model(user_b.clone()));
        post.update(&patch, relations).unwrap();

        assert_eq!(post.get("authorId"), Some(&user_b.id().unwrap()));
    }

    #[test]
    fn unlink_without_target_clears_has_many() {
        let ctx = ctx_with_author_relationship();
        let mut user = Model::new("users", ctx.clone(), json!({"name": "alice"}).as_object().unwrap().clone());
        user.save().unwrap();
        let mut post = Model::new("posts", ctx.clone(), json!({"title": "hi"}).as_object().unwrap().clone());
        post.link("author", &user).unwrap();
        post.save().unwrap();

        user.unlink("posts", None).unwrap();
        post.reload().unwrap();
        assert!(post.get("authorId").unwrap().is_null());
    }
}
