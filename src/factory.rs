//! Builds attribute dictionaries and schedules associated-model creation.
//!
//! Composes a record from base attributes, overrides, and named traits,
//! then resolves any function-valued attributes through a lazy
//! sibling-resolution context before persisting. The post-build
//! persistence step (insert, then apply pending relationship updates)
//! reuses [`Model::save`](../model/struct.Model.html) and [`Model::link`
//! ](../model/struct.Model.html#method.link).
use crate::error::Error;
use crate::model::Model;
use crate::query::Where;
use crate::schema::Schema;
use crate::value::{merge_shallow, record_id, Record};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// One argument to [`build`](fn.build.html): either the name of a trait to
/// apply, or an override record. Plain strings and JSON objects convert
/// automatically so callers can write `factory::build(f, schema, vec!["admin".into(), overrides.into()])`.
///
#[derive(Clone)]
pub enum Arg {
    Trait(String),
    Override(Record),
}

impl From<&str> for Arg {
    fn from(name: &str) -> Self {
        Self::Trait(name.to_string())
    }
}

impl From<String> for Arg {
    fn from(name: String) -> Self {
        Self::Trait(name)
    }
}

impl From<Record> for Arg {
    fn from(record: Record) -> Self {
        Self::Override(record)
    }
}

/// Context given to a function-valued attribute: the about-to-be-assigned
/// id, plus lazy access to sibling attributes, resolved on demand with a
/// visiting-stack cycle check.
///
pub struct FactoryAttrCtx<'a> {
    id: Value,
    attrs: &'a HashMap<String, AttrValue>,
    state: RefCell<HashMap<String, ResolveState>>,
    path: RefCell<Vec<String>>,
}

#[derive(Clone)]
enum ResolveState {
    Visiting,
    Done(Value),
}

impl<'a> FactoryAttrCtx<'a> {
    fn new(id: Value, attrs: &'a HashMap<String, AttrValue>) -> Self {
        Self {
            id,
            attrs,
            state: RefCell::new(HashMap::new()),
            path: RefCell::new(Vec::new()),
        }
    }

    /// The id that will be assigned to the model under construction.
    ///
    pub fn id(&self) -> &Value {
        &self.id
    }

    /// Resolve a sibling attribute, evaluating it (and memoizing the
    /// result) if it has not been resolved yet. Errors if `name` is
    /// unknown, is an association descriptor (not a plain attribute), or
    /// participates in a circular dependency -- the error names the
    /// traversal path.
    ///
    pub fn get(&self, name: &str) -> Result<Value, Error> {
        if let Some(state) = self.state.borrow().get(name) {
            match state {
                ResolveState::Done(v) => return Ok(v.clone()),
                ResolveState::Visiting => {
                    let mut path = self.path.borrow().clone();
                    path.push(name.to_string());
                    return Err(Error::factory(format!(
                        "circular dependency among factory attributes: {}",
                        path.join(" -> ")
                    )));
                }
            }
        }
        let attr = self
            .attrs
            .get(name)
            .ok_or_else(|| Error::factory(format!("unknown factory attribute '{}'", name)))?;
        if matches!(attr, AttrValue::Association(_)) {
            return Err(Error::factory(format!(
                "'{}' is an association, not a plain attribute",
                name
            )));
        }
        self.state
            .borrow_mut()
            .insert(name.to_string(), ResolveState::Visiting);
        self.path.borrow_mut().push(name.to_string());
        let result = match attr {
            AttrValue::Value(v) => Ok(v.clone()),
            AttrValue::Fn(f) => Ok(f(&self.id, self)),
            AttrValue::Association(_) => unreachable!(),
        };
        self.path.borrow_mut().pop();
        match result {
            Ok(v) => {
                self.state
                    .borrow_mut()
                    .insert(name.to_string(), ResolveState::Done(v.clone()));
                Ok(v)
            }
            Err(e) => {
                self.state.borrow_mut().remove(name);
                Err(e)
            }
        }
    }
}

/// One base/trait attribute: a constant, a lazily-evaluated function, or an
/// association descriptor.
///
#[derive(Clone)]
pub enum AttrValue {
    Value(Value),
    Fn(Rc<dyn Fn(&Value, &FactoryAttrCtx) -> Value>),
    Association(Association),
}

impl AttrValue {
    pub fn value(v: impl Into<Value>) -> Self {
        Self::Value(v.into())
    }

    pub fn func(f: impl Fn(&Value, &FactoryAttrCtx) -> Value + 'static) -> Self {
        Self::Fn(Rc::new(f))
    }
}

/// Which existing record an association's `link`/`linkMany` descriptor
/// resolves to.
///
#[derive(Clone)]
pub enum Selector {
    Id(Value),
    Query(Where),
}

/// A factory-time placeholder that, on save, produces or links related
/// models.
///
#[derive(Clone)]
pub enum Association {
    Create {
        template: String,
        args: Vec<(Vec<String>, Record)>,
    },
    CreateMany {
        template: String,
        n: usize,
        args: Vec<(Vec<String>, Record)>,
    },
    Link {
        template: String,
        selector: Selector,
    },
    LinkMany {
        template: String,
        selectors: Vec<Selector>,
    },
}

impl Association {
    pub fn create(template: &str, traits: Vec<&str>, overrides: Record) -> Self {
        Self::Create {
            template: template.to_string(),
            args: vec![(traits.into_iter().map(String::from).collect(), overrides)],
        }
    }

    pub fn create_many(template: &str, n: usize, traits: Vec<&str>, overrides: Record) -> Self {
        Self::CreateMany {
            template: template.to_string(),
            n,
            args: vec![(traits.into_iter().map(String::from).collect(), overrides)],
        }
    }

    pub fn link(template: &str, selector: Selector) -> Self {
        Self::Link {
            template: template.to_string(),
            selector,
        }
    }

    pub fn link_many(template: &str, selectors: Vec<Selector>) -> Self {
        Self::LinkMany {
            template: template.to_string(),
            selectors,
        }
    }
}

/// A hook run after a model is saved and its associations applied.
///
pub type AfterCreateHook = Rc<dyn Fn(&mut Model, &Schema) -> Result<(), Error>>;

/// A named override bundle: partial attributes, partial associations, and
/// an optional after-create hook.
///
#[derive(Clone, Default)]
pub struct TraitDef {
    pub attrs: HashMap<String, AttrValue>,
    pub associations: HashMap<String, Association>,
    pub after_create: Option<AfterCreateHook>,
}

impl TraitDef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attr(mut self, name: &str, value: AttrValue) -> Self {
        self.attrs.insert(name.to_string(), value);
        self
    }

    pub fn association(mut self, name: &str, assoc: Association) -> Self {
        self.associations.insert(name.to_string(), assoc);
        self
    }

    pub fn after_create(mut self, hook: AfterCreateHook) -> Self {
        self.after_create = Some(hook);
        self
    }
}

/// A factory definition bound to one collection.
///
#[derive(Clone, Default)]
pub struct FactoryDef {
    pub collection: String,
    pub base: HashMap<String, AttrValue>,
    pub associations: HashMap<String, Association>,
    pub traits: HashMap<String, TraitDef>,
    pub after_create: Option<AfterCreateHook>,
}

impl FactoryDef {
    pub fn new(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            ..Default::default()
        }
    }

    pub fn attr(mut self, name: &str, value: AttrValue) -> Self {
        self.base.insert(name.to_string(), value);
        self
    }

    pub fn association(mut self, name: &str, assoc: Association) -> Self {
        self.associations.insert(name.to_string(), assoc);
        self
    }

    pub fn trait_(mut self, name: &str, def: TraitDef) -> Self {
        self.traits.insert(name.to_string(), def);
        self
    }

    pub fn after_create(mut self, hook: AfterCreateHook) -> Self {
        self.after_create = Some(hook);
        self
    }

    /// An empty factory for a collection with no configured one: base
    /// attributes come entirely from the caller's overrides.
    ///
    pub fn empty(collection: &str) -> Self {
        Self::new(collection)
    }
}

/// Run the full build algorithm: split args, reserve/allocate an id,
/// evaluate attributes, insert, run associations, run after-create hooks.
///
pub fn build(factory: &FactoryDef, schema: &Schema, args: Vec<Arg>) -> Result<Model, Error> {
    let mut trait_names = Vec::new();
    let mut overrides = Record::new();
    for arg in args {
        match arg {
            Arg::Trait(name) => {
                if !factory.traits.contains_key(&name) {
                    return Err(Error::factory(format!(
                        "factory for '{}' has no trait '{}'",
                        factory.collection, name
                    )));
                }
                trait_names.push(name);
            }
            Arg::Override(record) => merge_shallow(&mut overrides, &record),
        }
    }

    let id = {
        let ctx = schema.ctx();
        let mut db = ctx.db.borrow_mut();
        let collection = db.require_mut(&factory.collection)?;
        match record_id(&overrides) {
            Some(id) => {
                collection.identity_manager_mut().set(&id);
                id
            }
            None => collection.identity_manager_mut().next(),
        }
    };

    let mut attrs_map: HashMap<String, AttrValue> = factory.base.clone();
    for (k, v) in &overrides {
        attrs_map.insert(k.clone(), AttrValue::Value(v.clone()));
    }
    for name in &trait_names {
        for (k, v) in &factory.traits[name].attrs {
            attrs_map.insert(k.clone(), v.clone());
        }
    }

    let attr_ctx = FactoryAttrCtx::new(id.clone(), &attrs_map);
    let mut record = Record::new();
    for (key, value) in &attrs_map {
        if matches!(value, AttrValue::Association(_)) {
            continue;
        }
        record.insert(key.clone(), attr_ctx.get(key)?);
    }
    record.insert("id".to_string(), id);

    let inserted = {
        let ctx = schema.ctx();
        let mut db = ctx.db.borrow_mut();
        db.require_mut(&factory.collection)?.insert(record)?
    };
    let mut model = Model::from_record(&factory.collection, schema.ctx().clone(), inserted);

    let mut associations: HashMap<String, Association> = factory.associations.clone();
    for name in &trait_names {
        for (k, v) in &factory.traits[name].associations {
            associations.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
    associations.retain(|name, _| {
        schema
            .ctx()
            .relationship(&factory.collection, name)
            .map(|rel| !overrides.contains_key(rel.foreign_key()))
            .unwrap_or(true)
    });

    for (name, assoc) in &associations {
        run_association(name, assoc, &mut model, schema)?;
    }

    if let Some(hook) = &factory.after_create {
        hook(&mut model, schema)?;
    }
    for name in &trait_names {
        if let Some(hook) = &factory.traits[name].after_create {
            hook(&mut model, schema)?;
        }
    }

    Ok(model)
}

fn run_association(
    name: &str,
    assoc: &Association,
    model: &mut Model,
    schema: &Schema,
) -> Result<(), Error> {
    match assoc {
        Association::Create { template, args } => {
            let build_args = expand_args(args);
            let target = schema.create(template, build_args)?;
            model.link(name, &target)
        }
        Association::CreateMany { template, n, args } => {
            let mut targets = Vec::with_capacity(*n);
            for _ in 0..*n {
                let build_args = expand_args(args);
                targets.push(schema.create(template, build_args)?);
            }
            for target in &targets {
                model.link(name, target)?;
            }
            Ok(())
        }
        Association::Link { template, selector } => {
            let target = schema.resolve_selector(template, selector)?;
            model.link(name, &target)
        }
        Association::LinkMany { template, selectors } => {
            for selector in selectors {
                let target = schema.resolve_selector(template, selector)?;
                model.link(name, &target)?;
            }
            Ok(())
        }
    }
}

fn expand_args(args: &[(Vec<String>, Record)]) -> Vec<Arg> {
    let mut out = Vec::new();
    for (traits, overrides) in args {
        for t in traits {
            out.push(Arg::Trait(t.clone()));
        }
        out.push(Arg::Override(overrides.clone()));
    }
    out
}
