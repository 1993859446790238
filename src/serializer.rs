//! Projects a model or collection to a plain record/array.
//!
//! `serde_json::Value` is the boundary representation: an arbitrary
//! JSON-serializable payload that crosses from the live model graph to a
//! plain record a caller can inspect or compare.
use crate::error::Error;
use crate::model::{Model, ModelCollection, ModelContext, Related};
use crate::relationship::RelationshipKind;
use crate::value::Record;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// How a relationship's projected form is chosen.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RelationsMode {
    /// Include the relationship's foreign-key attribute; do not embed the
    /// related record(s). The default.
    ForeignKey,
    /// Replace the foreign-key attribute with the nested serialized
    /// record(s) under the relationship name; foreign keys are suppressed.
    Embedded,
    /// Both the foreign key and the nested record(s) are present.
    EmbeddedForeignKey,
    /// The owner keeps its foreign keys; related records are aggregated
    /// into sibling root keys named by each relationship's side-load
    /// collection name.
    SideLoaded,
    /// Like `SideLoaded`, but the owner's foreign-key attribute is kept.
    SideLoadedForeignKey,
}

impl RelationsMode {
    fn is_side_loaded(self) -> bool {
        matches!(self, Self::SideLoaded | Self::SideLoadedForeignKey)
    }

    fn includes_fk(self) -> bool {
        !matches!(self, Self::Embedded)
    }

    fn includes_embed(self) -> bool {
        matches!(self, Self::Embedded | Self::EmbeddedForeignKey)
    }
}

/// Which attributes to keep or drop.
///
#[derive(Clone, Debug)]
pub enum Select {
    /// Include only these keys.
    Only(Vec<String>),
    /// `true` entries are included, `false` entries excluded; a key
    /// present with `false` wins over any unmentioned key (which is
    /// included by default unless it is a suppressed foreign key).
    Flags(HashMap<String, bool>),
}

/// Per-relationship nested override, recursively a full
/// [`SerializerConfig`](struct.SerializerConfig.html) plus an optional mode
/// override.
///
#[derive(Clone, Debug, Default)]
pub struct NestedConfig {
    pub mode: Option<RelationsMode>,
    pub config: SerializerConfig,
}

/// What relationships to walk, and how.
///
#[derive(Clone, Debug)]
pub enum With {
    /// Include these relationships, using the ambient/default mode and
    /// configuration for each.
    Names(Vec<String>),
    /// Include (or exclude, for `false` entries) each named relationship,
    /// with an optional per-relationship override.
    Entries(HashMap<String, WithEntry>),
}

#[derive(Clone, Debug)]
pub enum WithEntry {
    Include,
    Exclude,
    Nested(NestedConfig),
}

impl Default for With {
    fn default() -> Self {
        Self::Names(Vec::new())
    }
}

impl With {
    fn names(&self) -> Vec<String> {
        match self {
            Self::Names(v) => v.clone(),
            Self::Entries(m) => m
                .iter()
                .filter(|(_, e)| !matches!(e, WithEntry::Exclude))
                .map(|(k, _)| k.clone())
                .collect(),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Self::Names(v) => v.is_empty(),
            Self::Entries(m) => m.values().all(|e| matches!(e, WithEntry::Exclude)),
        }
    }

    fn nested_for(&self, name: &str) -> Option<NestedConfig> {
        match self {
            Self::Names(_) => None,
            Self::Entries(m) => match m.get(name) {
                Some(WithEntry::Nested(n)) => Some(n.clone()),
                _ => None,
            },
        }
    }
}

/// What root wrapping a serialized value gets, when the caller or config
/// specified one explicitly. The absence of this choice (`SerializerConfig
/// ::root == None`) is a distinct third state -- "no preference" -- so
/// `sideLoaded` mode can tell an explicit `root: false` (which it overrides
/// with a warning) apart from the ambient default (which it enables
/// silently).
///
#[derive(Clone, Debug)]
pub enum Root {
    /// Explicit `root: false`: no wrapping, the model/array is returned
    /// directly.
    Off,
    /// Explicit `root: true`: wrap under a key derived from the model's
    /// singular name (or the collection name for an array).
    On,
    /// Wrap under an explicit key.
    Key(String),
}

/// A serializer configuration: what to select, how to wrap the root, and
/// which relationships to walk and in what mode.
///
#[derive(Clone, Debug, Default)]
pub struct SerializerConfig {
    pub select: Option<Select>,
    pub root: Option<Root>,
    pub with: With,
    pub relations_mode: Option<RelationsMode>,
}

impl SerializerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_select(mut self, select: Select) -> Self {
        self.select = Some(select);
        self
    }

    pub fn with_root(mut self, root: Root) -> Self {
        self.root = Some(root);
        self
    }

    pub fn with_relations(mut self, with: With, mode: RelationsMode) -> Self {
        self.with = with;
        self.relations_mode = Some(mode);
        self
    }

    /// Merge `override_` into `self`, an override winning wherever it
    /// specifies something; a field `override_` leaves unset falls back to
    /// `self`.
    ///
    fn merged_with(&self, override_: Option<&SerializerConfig>) -> SerializerConfig {
        let Some(o) = override_ else {
            return self.clone();
        };
        SerializerConfig {
            select: o.select.clone().or_else(|| self.select.clone()),
            root: o.root.clone().or_else(|| self.root.clone()),
            with: if o.with.is_empty() {
                self.with.clone()
            } else {
                o.with.clone()
            },
            relations_mode: o.relations_mode.or(self.relations_mode),
        }
    }

    fn mode(&self) -> RelationsMode {
        self.relations_mode.unwrap_or(RelationsMode::ForeignKey)
    }
}

fn apply_select(record: &Record, select: &Select) -> Record {
    match select {
        Select::Only(keys) => {
            let mut out = Record::new();
            for k in keys {
                if let Some(v) = record.get(k) {
                    out.insert(k.clone(), v.clone());
                }
            }
            out
        }
        Select::Flags(flags) => {
            let mut out = Record::new();
            let any_true = flags.values().any(|v| *v);
            for (k, v) in record {
                let keep = match flags.get(k) {
                    Some(true) => true,
                    Some(false) => false,
                    None => !any_true,
                };
                if keep {
                    out.insert(k.clone(), v.clone());
                }
            }
            out
        }
    }
}

fn singularize(model_name: &str) -> String {
    model_name.to_string()
}

fn default_root_key(singular_name: &str, collection_name: &str, is_many: bool) -> String {
    if is_many {
        collection_name.to_string()
    } else {
        singularize(singular_name)
    }
}

struct SideLoadBag {
    // collection name -> id -> record, preserving first-seen order
    order: Vec<String>,
    by_collection: HashMap<String, (Vec<Value>, std::collections::HashSet<String>)>,
}

impl SideLoadBag {
    fn new() -> Self {
        Self {
            order: Vec::new(),
            by_collection: HashMap::new(),
        }
    }

    fn add(&mut self, side_load_name: &str, id_key: String, record: Value) {
        let entry = self
            .by_collection
            .entry(side_load_name.to_string())
            .or_insert_with(|| {
                self.order.push(side_load_name.to_string());
                (Vec::new(), std::collections::HashSet::new())
            });
        if entry.1.insert(id_key) {
            entry.0.push(record);
        }
    }

    fn into_entries(mut self) -> Vec<(String, Vec<Value>)> {
        self.order
            .drain(..)
            .map(|name| {
                let (records, _) = self.by_collection.remove(&name).unwrap();
                (name, records)
            })
            .collect()
    }
}

/// Render one model to a plain `Value`, honoring `opts` as a per-call
/// override merged over the target collection's configured serializer.
///
pub fn serialize_model(
    model: &Model,
    ctx: &ModelContext,
    opts: Option<&SerializerConfig>,
) -> Result<Value, Error> {
    let mut bag = SideLoadBag::new();
    let body = render_model(model, ctx, opts, &mut bag)?;
    wrap_root_single(model, ctx, opts, body, bag)
}

/// Render a collection to a plain `Value`, aggregating side-loaded relation
/// records across all members, de-duplicated by id.
///
pub fn serialize_collection(
    collection: &ModelCollection,
    ctx: &ModelContext,
    opts: Option<&SerializerConfig>,
) -> Result<Value, Error> {
    let mut bag = SideLoadBag::new();
    let mut bodies = Vec::with_capacity(collection.len());
    for model in collection.models() {
        bodies.push(render_model(model, ctx, opts, &mut bag)?);
    }
    wrap_root_many(collection, ctx, opts, bodies, bag)
}

fn effective_config(
    ctx: &ModelContext,
    collection: &str,
    opts: Option<&SerializerConfig>,
) -> SerializerConfig {
    let base = ctx
        .serializer_configs
        .get(collection)
        .cloned()
        .unwrap_or_default();
    base.merged_with(opts)
}

fn render_model(
    model: &Model,
    ctx: &ModelContext,
    opts: Option<&SerializerConfig>,
    bag: &mut SideLoadBag,
) -> Result<Value, Error> {
    let config = effective_config(ctx, &model.collection, opts);
    let mode = config.mode();
    let with_names = config.with.names();

    let mut record = model.attrs().clone();

    // When `with` is empty, every foreign-key attribute is excluded too.
    if with_names.is_empty() {
        for rel in ctx.relationships_for(&model.collection) {
            record.remove(rel.foreign_key());
        }
    } else {
        for name in &with_names {
            let rel = ctx.relationship(&model.collection, name)?;
            if !mode.includes_fk() {
                record.remove(rel.foreign_key());
            }
        }
    }

    if let Some(select) = &config.select {
        record = apply_select(&record, select);
    }

    for name in &with_names {
        let rel = ctx.relationship(&model.collection, name)?.clone();
        let nested = config.with.nested_for(name);
        let nested_mode = nested.as_ref().and_then(|n| n.mode).unwrap_or(mode);
        let nested_opts = nested.map(|n| n.config);

        match model.related(name)? {
            Related::One(target) => {
                if nested_mode.includes_embed() {
                    let embedded = match &target {
                        None => Value::Null,
                        Some(t) => render_model(t, ctx, nested_opts.as_ref(), bag)?,
                    };
                    record.insert(name.clone(), embedded);
                }
                if nested_mode.is_side_loaded() {
                    if let Some(t) = &target {
                        let id = crate::value::id_key(&t.id().unwrap_or(Value::Null));
                        let rendered = render_model(t, ctx, nested_opts.as_ref(), bag)?;
                        bag.add(&rel.descriptor.side_load_collection_name, id, rendered);
                    }
                }
            }
            Related::Many(targets) => {
                if nested_mode.includes_embed() {
                    let mut rendered = Vec::with_capacity(targets.len());
                    for t in targets.models() {
                        rendered.push(render_model(t, ctx, nested_opts.as_ref(), bag)?);
                    }
                    record.insert(name.clone(), Value::Array(rendered));
                }
                if nested_mode.is_side_loaded() {
                    for t in targets.models() {
                        let id = crate::value::id_key(&t.id().unwrap_or(Value::Null));
                        let rendered = render_model(t, ctx, nested_opts.as_ref(), bag)?;
                        bag.add(&rel.descriptor.side_load_collection_name, id, rendered);
                    }
                }
            }
        }
    }

    Ok(Value::Object(record))
}

fn resolve_root(
    ctx: &ModelContext,
    collection: &str,
    config: &SerializerConfig,
    is_many: bool,
    side_loading: bool,
) -> Option<String> {
    let default_key = || default_root_key(&ctx.model_name(collection), collection, is_many);
    match (&config.root, side_loading) {
        // no preference at all: sideLoaded enables the root silently,
        // every other mode leaves the record unwrapped.
        (None, true) => Some(default_key()),
        (None, false) => None,
        // explicit `root: false` is honored everywhere except sideLoaded,
        // where it is overridden with a warning.
        (Some(Root::Off), true) => {
            ctx.logger.warn(
                "root: false ignored: sideLoaded relations mode requires a root to host them",
            );
            Some(default_key())
        }
        (Some(Root::Off), false) => None,
        (Some(Root::On), _) => Some(default_key()),
        (Some(Root::Key(k)), _) => Some(k.clone()),
    }
}

fn wrap_root_single(
    model: &Model,
    ctx: &ModelContext,
    opts: Option<&SerializerConfig>,
    body: Value,
    bag: SideLoadBag,
) -> Result<Value, Error> {
    let config = effective_config(ctx, &model.collection, opts);
    let side_loading = config.mode().is_side_loaded() && !config.with.is_empty();
    let key = resolve_root(ctx, &model.collection, &config, false, side_loading);

    match key {
        None => Ok(body),
        Some(k) => {
            let mut out = Map::new();
            out.insert(k, body);
            for (name, records) in bag.into_entries() {
                out.insert(name, Value::Array(records));
            }
            Ok(Value::Object(out))
        }
    }
}

fn wrap_root_many(
    collection: &ModelCollection,
    ctx: &ModelContext,
    opts: Option<&SerializerConfig>,
    bodies: Vec<Value>,
    bag: SideLoadBag,
) -> Result<Value, Error> {
    let config = effective_config(ctx, &collection.collection, opts);
    let side_loading = config.mode().is_side_loaded() && !config.with.is_empty();
    let key = resolve_root(ctx, &collection.collection, &config, true, side_loading);

    match key {
        None => Ok(Value::Array(bodies)),
        Some(k) => {
            let mut out = Map::new();
            out.insert(k, Value::Array(bodies));
            for (name, records) in bag.into_entries() {
                out.insert(name, Value::Array(records));
            }
            Ok(Value::Object(out))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use crate::identity::NumericIdentityManager;
    use crate::logger::LoggerIf;
    use crate::relationship::{
        InversePeer, RelationshipDescriptor, ResolvedRelationship,
    };
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn ctx() -> ModelContext {
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
                descriptor: RelationshipDescriptor::belongs_to(
                    "users", "authorId", "authors",
                ),
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
                descriptor: RelationshipDescriptor::has_many(
                    "posts", "postIds", "posts",
                ),
                inverse_peer: Some(InversePeer {
                    name: "author".to_string(),
                    foreign_key: "authorId".to_string(),
                    kind: RelationshipKind::BelongsTo,
                }),
            }],
        );

        let mut model_names = HashMap::new();
        model_names.insert("posts".to_string(), "post".to_string());
        model_names.insert("users".to_string(), "user".to_string());

        let mut serializer_configs = HashMap::new();
        serializer_configs.insert(
            "posts".to_string(),
            SerializerConfig::new().with_relations(
                With::Names(vec!["author".to_string()]),
                RelationsMode::SideLoaded,
            ),
        );

        ModelContext {
            db: Rc::new(RefCell::new(db)),
            relationships: Rc::new(relationships),
            model_names: Rc::new(model_names),
            serializer_configs: Rc::new(serializer_configs),
            logger: LoggerIf::null(),
        }
    }

    #[test]
    fn s6_serializer_side_load() {
        let ctx = ctx();
        let mut user = Model::new(
            "users",
            ctx.clone(),
            json!({"name": "alice"}).as_object().unwrap().clone(),
        );
        user.save().unwrap();
        let mut post = Model::new(
            "posts",
            ctx.clone(),
            json!({"title": "hi", "content": "body"})
                .as_object()
                .unwrap()
                .clone(),
        );
        post.link("author", &user).unwrap();
        post.save().unwrap();

        let rendered = post.to_json(None).unwrap();
        assert_eq!(
            rendered,
            json!({
                "post": {
                    "id": post.id().unwrap(),
                    "title": "hi",
                    "content": "body",
                    "authorId": user.id().unwrap(),
                },
                "authors": [
                    {"id": user.id().unwrap(), "name": "alice", "postIds": [post.id().unwrap()]}
                ]
            })
        );
    }

    #[test]
    fn default_root_excludes_fk_when_with_is_empty() {
        let ctx = ctx();
        let mut user = Model::new(
            "users",
            ctx.clone(),
            json!({"name": "alice"}).as_object().unwrap().clone(),
        );
        user.save().unwrap();
        let mut post = Model::new(
            "posts",
            ctx.clone(),
            json!({"title": "hi"}).as_object().unwrap().clone(),
        );
        post.link("author", &user).unwrap();
        post.save().unwrap();

        let rendered = post
            .to_json(Some(&SerializerConfig::new().with_relations(
                With::Names(Vec::new()),
                RelationsMode::ForeignKey,
            )))
            .unwrap();
        let obj = rendered.as_object().unwrap().get("post").unwrap();
        assert!(obj.get("authorId").is_none());
    }

    #[test]
    fn embedded_mode_nests_and_suppresses_fk() {
        let ctx = ctx();
        let mut user = Model::new(
            "users",
            ctx.clone(),
            json!({"name": "alice"}).as_object().unwrap().clone(),
        );
        user.save().unwrap();
        let mut post = Model::new(
            "posts",
            ctx.clone(),
            json!({"title": "hi"}).as_object().unwrap().clone(),
        );
        post.link("author", &user).unwrap();
        post.save().unwrap();

        let rendered = post
            .to_json(Some(&SerializerConfig::new().with_relations(
                With::Names(vec!["author".to_string()]),
                RelationsMode::Embedded,
            )))
            .unwrap();
        let obj = rendered.as_object().unwrap();
        assert!(obj.get("authorId").is_none());
        assert_eq!(obj.get("author").unwrap()["name"], "alice");
    }

    #[test]
    fn select_only_list() {
        let ctx = ctx();
        let mut post = Model::new(
            "posts",
            ctx.clone(),
            json!({"title": "hi", "content": "body"})
                .as_object()
                .unwrap()
                .clone(),
        );
        post.save().unwrap();
        let rendered = post
            .to_json(Some(
                &SerializerConfig::new().with_select(Select::Only(vec!["title".to_string()])),
            ))
            .unwrap();
        let obj = rendered.as_object().unwrap();
        assert_eq!(obj.len(), 1);
        assert_eq!(obj.get("title").unwrap(), "hi");
    }

    #[test]
    fn collection_side_load_union_deduplicates() {
        let ctx = ctx();
        let mut user = Model::new(
            "users",
            ctx.clone(),
            json!({"name": "alice"}).as_object().unwrap().clone(),
        );
        user.save().unwrap();
        let mut p1 = Model::new(
            "posts",
            ctx.clone(),
            json!({"title": "a"}).as_object().unwrap().clone(),
        );
        p1.link("author", &user).unwrap();
        p1.save().unwrap();
        let mut p2 = Model::new(
            "posts",
            ctx.clone(),
            json!({"title": "b"}).as_object().unwrap().clone(),
        );
        p2.link("author", &user).unwrap();
        p2.save().unwrap();

        let collection = ModelCollection::new(
            "posts".to_string(),
            ctx.clone(),
            vec![p1, p2],
            None,
        );
        let rendered = collection.to_json(None).unwrap();
        let authors = rendered.as_object().unwrap().get("authors").unwrap();
        assert_eq!(authors.as_array().unwrap().len(), 1);
    }
}
