//! An in-memory, schema-driven object-relational mapper for testing and
//! mocking: a document store with a query DSL, a bidirectional
//! belongs-to/has-many relationship engine, a factory engine for building
//! fixtures, and a serializer that projects models to plain records.
pub mod db;
pub mod db_collection;
pub mod error;
pub mod factory;
pub mod identity;
pub mod logger;
pub mod model;
pub mod query;
pub mod relationship;
pub mod schema;
pub mod serializer;
pub mod value;

pub use db::Db;
pub use db_collection::{DbCollection, Lookup};
pub use error::Error;
pub use factory::{
    AfterCreateHook, Arg, Association, AttrValue, FactoryAttrCtx, FactoryDef, Selector, TraitDef,
};
pub use identity::{IdentityManager, NumericIdentityManager, StringIdentityManager};
pub use logger::{Level, Logger, LoggerIf, NullLogger, StderrLogger};
pub use model::{Model, ModelCollection, ModelContext, Related, RelationshipValue};
pub use query::{
    like, Cursor, FieldCond, FieldOp, OrderBy, OrderKey, PagedResult, Query, QueryBld, Where,
};
pub use relationship::{
    Inverse, InversePeer, PendingUpdate, RelationshipDescriptor, RelationshipKind,
    ResolvedRelationship,
};
pub use schema::{CollectionConfig, Schema, SchemaBuilder, SeedsFn, Template};
pub use serializer::{
    NestedConfig, RelationsMode, Root, Select, SerializerConfig, With, WithEntry,
};
pub use value::Record;
