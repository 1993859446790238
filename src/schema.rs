//! The composition root: binds collection configs into a live system.
//!
//! [`SchemaBuilder`] validates and assembles every registered collection
//! at runtime -- collections are configured programmatically rather than
//! discovered via a derive macro.
use crate::db::Db;
use crate::error::Error;
use crate::factory::{self, Arg, FactoryDef, Selector};
use crate::identity::{IdentityManager, NumericIdentityManager};
use crate::logger::LoggerIf;
use crate::model::{Model, ModelContext};
use crate::query::{PagedResult, Query, Where};
use crate::relationship::{Inverse, InversePeer, RelationshipDescriptor, ResolvedRelationship};
use crate::serializer::SerializerConfig;
use crate::value::Record;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// A design-time descriptor of a model's name, collection name, and
/// attribute shape. Templates carry only naming metadata -- the attribute
/// shape itself is whatever the factory/overrides produce, since this
/// crate has no compile-time schema codegen.
///
#[derive(Clone, Debug)]
pub struct Template {
    pub model_name: String,
    pub collection_name: String,
}

impl Template {
    pub fn new(model_name: &str, collection_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            collection_name: collection_name.to_string(),
        }
    }
}

/// Binds one template to its relationships, factory, identity manager, and
/// serializer.
///
pub struct CollectionConfig {
    pub template: Template,
    pub relationships: HashMap<String, RelationshipDescriptor>,
    pub factory: Option<FactoryDef>,
    pub identity: Option<Box<dyn IdentityManager + Send + Sync>>,
    pub serializer: Option<SerializerConfig>,
}

/// A function that seeds a fresh schema with data.
///
pub type SeedsFn = Rc<dyn Fn(&Schema) -> Result<(), Error>>;

/// Collects [`CollectionConfig`]s and ambient defaults, then [`build`
/// ](#method.build)s them into a live [`Schema`].
///
pub struct SchemaBuilder {
    collections: HashMap<String, CollectionConfig>,
    order: Vec<String>,
    default_identity: Option<fn() -> Box<dyn IdentityManager + Send + Sync>>,
    logger: LoggerIf,
    seeds: Option<SeedsFn>,
    default_seeds: Option<SeedsFn>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self {
            collections: HashMap::new(),
            order: Vec::new(),
            default_identity: None,
            logger: LoggerIf::null(),
            seeds: None,
            default_seeds: None,
        }
    }

    /// Register one collection. `relationships` names each relationship
    /// and its descriptor; `factory`/`identity`/`serializer` default to an
    /// empty factory, a numeric identity manager, and the default
    /// serializer config respectively when omitted.
    ///
    pub fn collection(
        mut self,
        collection_name: &str,
        model_name: &str,
        relationships: Option<Vec<(&str, RelationshipDescriptor)>>,
        factory: Option<FactoryDef>,
        identity: Option<Box<dyn IdentityManager + Send + Sync>>,
        serializer: Option<SerializerConfig>,
    ) -> Self {
        let mut rel_map = HashMap::new();
        for (name, desc) in relationships.unwrap_or_default() {
            rel_map.insert(name.to_string(), desc);
        }
        if !self.collections.contains_key(collection_name) {
            self.order.push(collection_name.to_string());
        }
        self.collections.insert(
            collection_name.to_string(),
            CollectionConfig {
                template: Template::new(model_name, collection_name),
                relationships: rel_map,
                factory,
                identity,
                serializer,
            },
        );
        self
    }

    /// Override the default identity manager used for collections that did
    /// not supply their own.
    ///
    pub fn default_identity(mut self, f: fn() -> Box<dyn IdentityManager + Send + Sync>) -> Self {
        self.default_identity = Some(f);
        self
    }

    pub fn logger(mut self, logger: LoggerIf) -> Self {
        self.logger = logger;
        self
    }

    /// The seeds function run by `loadSeeds({})`.
    ///
    pub fn seeds(mut self, seeds: SeedsFn) -> Self {
        self.seeds = Some(seeds);
        self
    }

    /// The narrower seed set run by `loadSeeds({ onlyDefault: true })`.
    ///
    pub fn default_seeds(mut self, seeds: SeedsFn) -> Self {
        self.default_seeds = Some(seeds);
        self
    }

    /// Validate and assemble every registered collection into a live
    /// [`Schema`].
    ///
    pub fn build(self) -> Result<Schema, Error> {
        let mut db = Db::new();
        for name in &self.order {
            let config = &self.collections[name];
            let identity = config
                .identity
                .as_ref()
                .map(|i| i.boxed_clone())
                .unwrap_or_else(|| match self.default_identity {
                    Some(f) => f(),
                    None => Box::new(NumericIdentityManager::new()),
                });
            db.create_collection(name, identity)?;
        }

        for name in &self.order {
            for (rel_name, desc) in &self.collections[name].relationships {
                if !self.collections.contains_key(&desc.target) {
                    return Err(Error::configuration(format!(
                        "relationship '{}' on '{}' targets unknown collection '{}'",
                        rel_name, name, desc.target
                    )));
                }
            }
        }

        let mut relationships: HashMap<String, Vec<ResolvedRelationship>> = HashMap::new();
        for name in &self.order {
            let mut resolved = Vec::new();
            for (rel_name, desc) in &self.collections[name].relationships {
                let inverse_peer = self.resolve_inverse(name, rel_name, desc)?;
                resolved.push(ResolvedRelationship {
                    name: rel_name.clone(),
                    descriptor: desc.clone(),
                    inverse_peer,
                });
            }
            relationships.insert(name.clone(), resolved);
        }

        let mut model_names = HashMap::new();
        let mut serializer_configs = HashMap::new();
        let mut factories = HashMap::new();
        for name in &self.order {
            let config = &self.collections[name];
            model_names.insert(name.clone(), config.template.model_name.clone());
            serializer_configs.insert(
                name.clone(),
                config.serializer.clone().unwrap_or_default(),
            );
            factories.insert(
                name.clone(),
                config.factory.clone().unwrap_or_else(|| FactoryDef::empty(name)),
            );
        }

        let ctx = ModelContext {
            db: Rc::new(RefCell::new(db)),
            relationships: Rc::new(relationships),
            model_names: Rc::new(model_names),
            serializer_configs: Rc::new(serializer_configs),
            logger: self.logger.clone(),
        };

        Ok(Schema {
            ctx,
            factories,
            seeds: self.seeds,
            default_seeds: self.default_seeds,
            logger: self.logger,
        })
    }

    /// Auto-inverse detection: explicit names resolve directly; `null`
    /// disables sync; absent scans the target for the unique relationship
    /// pointing back, failing on zero or multiple matches.
    ///
    fn resolve_inverse(
        &self,
        owner: &str,
        rel_name: &str,
        desc: &RelationshipDescriptor,
    ) -> Result<Option<InversePeer>, Error> {
        let target_config = &self.collections[&desc.target];
        match &desc.inverse {
            Inverse::Disabled => Ok(None),
            Inverse::Explicit(name) => {
                let peer_desc = target_config.relationships.get(name).ok_or_else(|| {
                    Error::configuration(format!(
                        "relationship '{}' on '{}' names inverse '{}', which does not exist on '{}'",
                        rel_name, owner, name, desc.target
                    ))
                })?;
                Ok(Some(InversePeer {
                    name: name.clone(),
                    foreign_key: peer_desc.foreign_key.clone(),
                    kind: peer_desc.kind,
                }))
            }
            Inverse::Auto => {
                let candidates: Vec<(&String, &RelationshipDescriptor)> = target_config
                    .relationships
                    .iter()
                    .filter(|(_, d)| d.target == owner)
                    .collect();
                match candidates.len() {
                    0 => Err(Error::configuration(format!(
                        "relationship '{}' on '{}' has no inverse on '{}' and none could be auto-detected",
                        rel_name, owner, desc.target
                    ))),
                    1 => {
                        let (name, peer_desc) = candidates[0];
                        Ok(Some(InversePeer {
                            name: name.clone(),
                            foreign_key: peer_desc.foreign_key.clone(),
                            kind: peer_desc.kind,
                        }))
                    }
                    _ => {
                        let names: Vec<&str> =
                            candidates.iter().map(|(n, _)| n.as_str()).collect();
                        Err(Error::configuration(format!(
                            "relationship '{}' on '{}' has ambiguous inverse candidates on '{}': {}",
                            rel_name,
                            owner,
                            desc.target,
                            names.join(", ")
                        )))
                    }
                }
            }
        }
    }
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A live system: document stores, relationships, factories, and
/// serializers bound together.
///
pub struct Schema {
    ctx: ModelContext,
    factories: HashMap<String, FactoryDef>,
    seeds: Option<SeedsFn>,
    default_seeds: Option<SeedsFn>,
    logger: LoggerIf,
}

impl Schema {
    pub fn ctx(&self) -> &ModelContext {
        &self.ctx
    }

    pub fn logger(&self) -> &LoggerIf {
        &self.logger
    }

    pub fn collection_names(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }

    fn factory(&self, collection: &str) -> Result<&FactoryDef, Error> {
        self.factories
            .get(collection)
            .ok_or_else(|| Error::configuration(format!("no such collection '{}'", collection)))
    }

    /// Build and persist a new model via the collection's factory,
    /// applying the given trait names and override records.
    ///
    pub fn create(&self, collection: &str, args: Vec<Arg>) -> Result<Model, Error> {
        let factory = self.factory(collection)?;
        factory::build(factory, self, args)
    }

    /// Build and persist `n` new models via the collection's factory,
    /// each with the same trait names and override records.
    ///
    pub fn create_many(
        &self,
        collection: &str,
        n: usize,
        args: Vec<Arg>,
    ) -> Result<crate::model::ModelCollection, Error> {
        let mut models = Vec::with_capacity(n);
        for _ in 0..n {
            models.push(self.create(collection, args.clone())?);
        }
        Ok(crate::model::ModelCollection::new(
            collection.to_string(),
            self.ctx.clone(),
            models,
            None,
        ))
    }

    /// Short-circuits to an existing match, otherwise falls through to
    /// the factory with the query's fields as overrides.
    ///
    pub fn find_or_create_by(&self, collection: &str, query: Record) -> Result<Model, Error> {
        if let Some(found) = self.find_by(collection, query.clone())? {
            return Ok(found);
        }
        self.create(collection, vec![Arg::Override(query)])
    }

    pub fn find(&self, collection: &str, id: &Value) -> Result<Option<Model>, Error> {
        let db = self.ctx.db.borrow();
        let record = db.require(collection)?.find(id);
        drop(db);
        Ok(record.map(|r| Model::from_record(collection, self.ctx.clone(), r)))
    }

    pub fn find_by(&self, collection: &str, query: Record) -> Result<Option<Model>, Error> {
        let db = self.ctx.db.borrow();
        let record = db.require(collection)?.find_one(query);
        drop(db);
        Ok(record.map(|r| Model::from_record(collection, self.ctx.clone(), r)))
    }

    pub fn find_many(
        &self,
        collection: &str,
        query: Query,
    ) -> Result<crate::model::ModelCollection, Error> {
        let db = self.ctx.db.borrow();
        let page: PagedResult = db.require(collection)?.find_many(query)?;
        drop(db);
        Ok(crate::model::ModelCollection::from_paged(
            collection.to_string(),
            self.ctx.clone(),
            page,
        ))
    }

    pub fn where_(&self, collection: &str, where_: Where) -> Result<crate::model::ModelCollection, Error> {
        self.find_many(collection, Query {
            where_: Some(where_),
            order_by: Default::default(),
            offset: None,
            limit: None,
            cursor: None,
        })
    }

    pub fn all(&self, collection: &str) -> Result<crate::model::ModelCollection, Error> {
        let db = self.ctx.db.borrow();
        let records = db.require(collection)?.all();
        drop(db);
        let total = records.len();
        let models = records
            .into_iter()
            .map(|r| Model::from_record(collection, self.ctx.clone(), r))
            .collect();
        Ok(crate::model::ModelCollection::new(
            collection.to_string(),
            self.ctx.clone(),
            models,
            Some(total),
        ))
    }

    pub fn first(&self, collection: &str) -> Result<Option<Model>, Error> {
        let db = self.ctx.db.borrow();
        let record = db.require(collection)?.first();
        drop(db);
        Ok(record.map(|r| Model::from_record(collection, self.ctx.clone(), r)))
    }

    pub fn last(&self, collection: &str) -> Result<Option<Model>, Error> {
        let db = self.ctx.db.borrow();
        let record = db.require(collection)?.last();
        drop(db);
        Ok(record.map(|r| Model::from_record(collection, self.ctx.clone(), r)))
    }

    pub fn update(&self, collection: &str, id: &Value, patch: &Record) -> Result<Option<Model>, Error> {
        let mut db = self.ctx.db.borrow_mut();
        let updated = db.require_mut(collection)?.update(id, patch);
        drop(db);
        Ok(updated.map(|r| Model::from_record(collection, self.ctx.clone(), r)))
    }

    pub fn delete(&self, collection: &str, id: &Value) -> Result<bool, Error> {
        if let Some(mut model) = self.find(collection, id)? {
            model.destroy()?;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn delete_many(&self, collection: &str, query: Query) -> Result<usize, Error> {
        let matched = self.find_many(collection, query)?;
        let mut count = 0;
        for mut model in matched.into_vec() {
            model.destroy()?;
            count += 1;
        }
        Ok(count)
    }

    /// Resolve a factory `link`/`linkMany` association selector against
    /// `collection`.
    ///
    pub(crate) fn resolve_selector(
        &self,
        collection: &str,
        selector: &Selector,
    ) -> Result<Model, Error> {
        match selector {
            Selector::Id(id) => self.find(collection, id)?.ok_or_else(|| {
                Error::integrity(format!("{}:{} does not exist", collection, id))
            }),
            Selector::Query(where_) => self
                .where_(collection, where_.clone())?
                .models()
                .first()
                .cloned()
                .ok_or_else(|| {
                    Error::integrity(format!("no record in '{}' matched the selector", collection))
                }),
        }
    }

    /// Run the schema's seeds function. `only_default` runs the narrower
    /// default-seed set instead.
    ///
    pub fn load_seeds(&self, only_default: bool) -> Result<(), Error> {
        if only_default {
            if let Some(seeds) = &self.default_seeds {
                return seeds(self);
            }
            return Ok(());
        }
        if let Some(seeds) = &self.seeds {
            seeds(self)?;
        }
        Ok(())
    }
}
