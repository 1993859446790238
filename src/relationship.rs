//! Bidirectional belongs-to / has-many synchronization.
//!
//! `ResolvedRelationship` is built once during [`Schema`
//! ](../schema/struct.Schema.html) setup -- inverse names resolved,
//! foreign keys bound -- and then interpreted at every
//! link/unlink/update/destroy call instead of being recomputed each time.
use crate::db::Db;
use crate::error::Error;
use crate::value::{id_key, Record};
use itertools::Itertools;
use serde_json::Value;

/// Whether a relationship's foreign key is a scalar id (`belongsTo`) or a
/// list of ids (`hasMany`).
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RelationshipKind {
    BelongsTo,
    HasMany,
}

/// How a relationship's inverse should be resolved at schema setup.
///
#[derive(Clone, Debug)]
pub enum Inverse {
    /// Use this exact relationship name on the target collection.
    Explicit(String),
    /// No synchronization: the relationship is one-directional.
    Disabled,
    /// Search the target collection for the unique relationship pointing
    /// back at this one.
    Auto,
}

/// The design-time shape of one relationship, as given to a
/// [`CollectionConfig`](../schema/struct.CollectionConfig.html) builder.
///
#[derive(Clone, Debug)]
pub struct RelationshipDescriptor {
    pub kind: RelationshipKind,
    pub target: String,
    pub foreign_key: String,
    pub inverse: Inverse,
    pub side_load_collection_name: String,
}

impl RelationshipDescriptor {
    pub fn belongs_to(target: &str, foreign_key: &str, side_load_collection_name: &str) -> Self {
        Self {
            kind: RelationshipKind::BelongsTo,
            target: target.to_string(),
            foreign_key: foreign_key.to_string(),
            inverse: Inverse::Auto,
            side_load_collection_name: side_load_collection_name.to_string(),
        }
    }

    pub fn has_many(target: &str, foreign_key: &str, side_load_collection_name: &str) -> Self {
        Self {
            kind: RelationshipKind::HasMany,
            target: target.to_string(),
            foreign_key: foreign_key.to_string(),
            inverse: Inverse::Auto,
            side_load_collection_name: side_load_collection_name.to_string(),
        }
    }

    pub fn with_inverse(mut self, inverse: Inverse) -> Self {
        self.inverse = inverse;
        self
    }
}

/// The target-side half of a relationship, resolved once at setup so the
/// engine never has to re-search the schema while mutating records.
///
#[derive(Clone, Debug)]
pub struct InversePeer {
    pub name: String,
    pub foreign_key: String,
    pub kind: RelationshipKind,
}

/// A relationship descriptor plus its resolved inverse, ready for the
/// engine to interpret.
///
#[derive(Clone, Debug)]
pub struct ResolvedRelationship {
    pub name: String,
    pub descriptor: RelationshipDescriptor,
    pub inverse_peer: Option<InversePeer>,
}

impl ResolvedRelationship {
    pub fn target(&self) -> &str {
        &self.descriptor.target
    }

    pub fn foreign_key(&self) -> &str {
        &self.descriptor.foreign_key
    }

    pub fn kind(&self) -> RelationshipKind {
        self.descriptor.kind
    }
}

/// A relationship mutation queued against a not-yet-persisted model,
/// applied in one pass once the model is assigned an id.
///
#[derive(Clone, Debug)]
pub enum PendingUpdate {
    SetBelongsTo(Option<Value>),
    SetHasMany(Vec<Value>),
    Append(Value),
    Remove(Value),
}

fn get_record(db: &Db, collection: &str, id: &Value) -> Result<Record, Error> {
    db.require(collection)?
        .find(id)
        .ok_or_else(|| Error::integrity(format!("{}:{} does not exist", collection, id)))
}

fn patch_field(db: &mut Db, collection: &str, id: &Value, field: &str, value: Value) -> Result<(), Error> {
    let mut patch = Record::new();
    patch.insert(field.to_string(), value);
    db.require_mut(collection)?
        .update(id, &patch)
        .ok_or_else(|| Error::integrity(format!("{}:{} does not exist", collection, id)))?;
    Ok(())
}

fn read_list(db: &Db, collection: &str, id: &Value, field: &str) -> Result<Vec<Value>, Error> {
    let record = get_record(db, collection, id)?;
    Ok(match record.get(field) {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    })
}

fn append_dedup(mut list: Vec<Value>, id: &Value) -> Vec<Value> {
    if !list.contains(id) {
        list.push(id.clone());
    }
    list
}

fn remove_one(mut list: Vec<Value>, id: &Value) -> Vec<Value> {
    list.retain(|v| v != id);
    list
}

fn add_to_inverse(
    db: &mut Db,
    rel: &ResolvedRelationship,
    owner_id: &Value,
    target_id: &Value,
) -> Result<(), Error> {
    let peer = match &rel.inverse_peer {
        Some(p) => p.clone(),
        None => return Ok(()),
    };
    match peer.kind {
        RelationshipKind::HasMany => {
            let list = read_list(db, rel.target(), target_id, &peer.foreign_key)?;
            let list = append_dedup(list, owner_id);
            patch_field(db, rel.target(), target_id, &peer.foreign_key, Value::Array(list))
        }
        RelationshipKind::BelongsTo => {
            patch_field(db, rel.target(), target_id, &peer.foreign_key, owner_id.clone())
        }
    }
}

fn remove_from_inverse(
    db: &mut Db,
    rel: &ResolvedRelationship,
    owner_id: &Value,
    target_id: &Value,
) -> Result<(), Error> {
    let peer = match &rel.inverse_peer {
        Some(p) => p.clone(),
        None => return Ok(()),
    };
    match peer.kind {
        RelationshipKind::HasMany => {
            let list = read_list(db, rel.target(), target_id, &peer.foreign_key)?;
            let list = remove_one(list, owner_id);
            patch_field(db, rel.target(), target_id, &peer.foreign_key, Value::Array(list))
        }
        RelationshipKind::BelongsTo => {
            patch_field(db, rel.target(), target_id, &peer.foreign_key, Value::Null)
        }
    }
}

/// Remove `target_id` from the list belonging to whichever record on
/// `owner_collection` currently claims it via `foreign_key` -- used when a
/// belongs-to inverse peer is displaced by a new owner, clearing the
/// prior owner's claim.
///
fn steal_from_prior_owner(
    db: &mut Db,
    owner_collection: &str,
    prior_owner_id: &Value,
    foreign_key: &str,
    target_id: &Value,
) -> Result<(), Error> {
    let list = read_list(db, owner_collection, prior_owner_id, foreign_key)?;
    let list = remove_one(list, target_id);
    patch_field(db, owner_collection, prior_owner_id, foreign_key, Value::Array(list))
}

/// Operation 1/2: set (or, with `new_target = None`, clear) a belongs-to
/// relationship.
///
pub fn set_belongs_to(
    db: &mut Db,
    this_collection: &str,
    this_id: &Value,
    rel: &ResolvedRelationship,
    new_target: Option<Value>,
) -> Result<(), Error> {
    if let Some(target_id) = &new_target {
        get_record(db, rel.target(), target_id)?;
    }
    let old = get_record(db, this_collection, this_id)?
        .get(rel.foreign_key())
        .cloned()
        .filter(|v| !v.is_null());

    patch_field(
        db,
        this_collection,
        this_id,
        rel.foreign_key(),
        new_target.clone().unwrap_or(Value::Null),
    )?;

    if let Some(old_id) = &old {
        if new_target.as_ref() != Some(old_id) {
            remove_from_inverse(db, rel, this_id, old_id)?;
        }
    }
    if let Some(new_id) = &new_target {
        if old.as_ref() != Some(new_id) {
            add_to_inverse(db, rel, this_id, new_id)?;
        }
    }
    Ok(())
}

/// Operation 3: replace a has-many relationship's full target list.
///
pub fn set_has_many(
    db: &mut Db,
    this_collection: &str,
    this_id: &Value,
    rel: &ResolvedRelationship,
    new_targets: Vec<Value>,
) -> Result<(), Error> {
    for id in &new_targets {
        get_record(db, rel.target(), id)?;
    }
    // de-duplicated, insertion order.
    let deduped: Vec<Value> = new_targets.into_iter().unique_by(id_key).collect();
    let old_list = read_list(db, this_collection, this_id, rel.foreign_key())?;

    patch_field(
        db,
        this_collection,
        this_id,
        rel.foreign_key(),
        Value::Array(deduped.clone()),
    )?;

    for removed in old_list.iter().filter(|id| !deduped.contains(id)) {
        remove_from_inverse(db, rel, this_id, removed)?;
    }
    for added in deduped.iter().filter(|id| !old_list.contains(id)) {
        if let Some(InversePeer {
            kind: RelationshipKind::BelongsTo,
            foreign_key,
            ..
        }) = &rel.inverse_peer
        {
            let target_record = get_record(db, rel.target(), added)?;
            if let Some(prior) = target_record.get(foreign_key).cloned().filter(|v| !v.is_null()) {
                if &prior != this_id {
                    steal_from_prior_owner(db, this_collection, &prior, rel.foreign_key(), added)?;
                }
            }
        }
        add_to_inverse(db, rel, this_id, added)?;
    }
    Ok(())
}

/// Operation 4: append one target to a has-many relationship (no-op if
/// already present).
///
pub fn append_has_many(
    db: &mut Db,
    this_collection: &str,
    this_id: &Value,
    rel: &ResolvedRelationship,
    target_id: Value,
) -> Result<(), Error> {
    get_record(db, rel.target(), &target_id)?;
    let list = read_list(db, this_collection, this_id, rel.foreign_key())?;
    if list.contains(&target_id) {
        return Ok(());
    }
    if let Some(InversePeer {
        kind: RelationshipKind::BelongsTo,
        foreign_key,
        ..
    }) = &rel.inverse_peer
    {
        let target_record = get_record(db, rel.target(), &target_id)?;
        if let Some(prior) = target_record.get(foreign_key).cloned().filter(|v| !v.is_null()) {
            if &prior != this_id {
                steal_from_prior_owner(db, this_collection, &prior, rel.foreign_key(), &target_id)?;
            }
        }
    }
    let list = append_dedup(list, &target_id);
    patch_field(db, this_collection, this_id, rel.foreign_key(), Value::Array(list))?;
    add_to_inverse(db, rel, this_id, &target_id)
}

/// Operation 5: remove one target from a has-many relationship.
///
pub fn remove_has_many(
    db: &mut Db,
    this_collection: &str,
    this_id: &Value,
    rel: &ResolvedRelationship,
    target_id: &Value,
) -> Result<(), Error> {
    let list = read_list(db, this_collection, this_id, rel.foreign_key())?;
    let list = remove_one(list, target_id);
    patch_field(db, this_collection, this_id, rel.foreign_key(), Value::Array(list))?;
    remove_from_inverse(db, rel, this_id, target_id)
}

/// Operation 6: clear every inverse link pointing at `this_id`, in
/// preparation for removing it from its own store (the removal itself is
/// the caller's job -- see [`Model::destroy`](../model/struct.Model.html)).
///
pub fn destroy(
    db: &mut Db,
    this_collection: &str,
    this_id: &Value,
    relationships: &[ResolvedRelationship],
) -> Result<(), Error> {
    for rel in relationships {
        match rel.kind() {
            RelationshipKind::BelongsTo => {
                let target = get_record(db, this_collection, this_id)?
                    .get(rel.foreign_key())
                    .cloned()
                    .filter(|v| !v.is_null());
                if let Some(target_id) = target {
                    remove_from_inverse(db, rel, this_id, &target_id)?;
                }
            }
            RelationshipKind::HasMany => {
                let list = read_list(db, this_collection, this_id, rel.foreign_key())?;
                for target_id in &list {
                    remove_from_inverse(db, rel, this_id, target_id)?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::NumericIdentityManager;
    use serde_json::json;

    fn setup() -> (Db, ResolvedRelationship, ResolvedRelationship) {
        let mut db = Db::new();
        db.create_collection("users", Box::new(NumericIdentityManager::new()))
            .unwrap();
        db.create_collection("posts", Box::new(NumericIdentityManager::new()))
            .unwrap();

        let author_rel = ResolvedRelationship {
            name: "author".to_string(),
            descriptor: RelationshipDescriptor::belongs_to("users", "authorId", "authors"),
            inverse_peer: Some(InversePeer {
                name: "posts".to_string(),
                foreign_key: "postIds".to_string(),
                kind: RelationshipKind::HasMany,
            }),
        };
        let posts_rel = ResolvedRelationship {
            name: "posts".to_string(),
            descriptor: RelationshipDescriptor::has_many("posts", "postIds", "posts"),
            inverse_peer: Some(InversePeer {
                name: "author".to_string(),
                foreign_key: "authorId".to_string(),
                kind: RelationshipKind::BelongsTo,
            }),
        };
        (db, author_rel, posts_rel)
    }

    #[test]
    fn s1_basic_belongs_to() {
        let (mut db, author_rel, _posts_rel) = setup();
        let u = db
            .require_mut("users")
            .unwrap()
            .insert(json!({"name": "alice"}).as_object().unwrap().clone())
            .unwrap();
        let p = db
            .require_mut("posts")
            .unwrap()
            .insert(json!({"title": "hi"}).as_object().unwrap().clone())
            .unwrap();
        let u_id = u["id"].clone();
        let p_id = p["id"].clone();

        set_belongs_to(&mut db, "posts", &p_id, &author_rel, Some(u_id.clone())).unwrap();

        let post = db.require("posts").unwrap().find(&p_id).unwrap();
        assert_eq!(post["authorId"], u_id);
        let user = db.require("users").unwrap().find(&u_id).unwrap();
        assert_eq!(user["postIds"], json!([p_id]));
    }

    #[test]
    fn s2_has_many_replace_then_shrink() {
        let (mut db, _author_rel, posts_rel) = setup();
        let u = db
            .require_mut("users")
            .unwrap()
            .insert(json!({"name": "alice"}).as_object().unwrap().clone())
            .unwrap();
        let p1 = db
            .require_mut("posts")
            .unwrap()
            .insert(json!({"title": "a"}).as_object().unwrap().clone())
            .unwrap();
        let p2 = db
            .require_mut("posts")
            .unwrap()
            .insert(json!({"title": "b"}).as_object().unwrap().clone())
            .unwrap();
        let u_id = u["id"].clone();
        let p1_id = p1["id"].clone();
        let p2_id = p2["id"].clone();

        set_has_many(
            &mut db,
            "users",
            &u_id,
            &posts_rel,
            vec![p1_id.clone(), p2_id.clone()],
        )
        .unwrap();
        assert_eq!(
            db.require("posts").unwrap().find(&p1_id).unwrap()["authorId"],
            u_id
        );
        assert_eq!(
            db.require("posts").unwrap().find(&p2_id).unwrap()["authorId"],
            u_id
        );

        set_has_many(&mut db, "users", &u_id, &posts_rel, vec![p2_id.clone()]).unwrap();
        assert!(db.require("posts").unwrap().find(&p1_id).unwrap()["authorId"].is_null());
        assert_eq!(
            db.require("posts").unwrap().find(&p2_id).unwrap()["authorId"],
            u_id
        );
        assert_eq!(
            db.require("users").unwrap().find(&u_id).unwrap()["postIds"],
            json!([p2_id])
        );
    }

    #[test]
    fn s3_destroy_cascade() {
        let (mut db, _author_rel, posts_rel) = setup();
        let u = db
            .require_mut("users")
            .unwrap()
            .insert(json!({"name": "alice"}).as_object().unwrap().clone())
            .unwrap();
        let p1 = db
            .require_mut("posts")
            .unwrap()
            .insert(json!({"title": "a"}).as_object().unwrap().clone())
            .unwrap();
        let p2 = db
            .require_mut("posts")
            .unwrap()
            .insert(json!({"title": "b"}).as_object().unwrap().clone())
            .unwrap();
        let u_id = u["id"].clone();
        let p1_id = p1["id"].clone();
        let p2_id = p2["id"].clone();
        set_has_many(
            &mut db,
            "users",
            &u_id,
            &posts_rel,
            vec![p1_id.clone(), p2_id.clone()],
        )
        .unwrap();

        let author_rel_on_posts = ResolvedRelationship {
            name: "author".to_string(),
            descriptor: RelationshipDescriptor::belongs_to("users", "authorId", "authors"),
            inverse_peer: Some(InversePeer {
                name: "posts".to_string(),
                foreign_key: "postIds".to_string(),
                kind: RelationshipKind::HasMany,
            }),
        };
        destroy(&mut db, "posts", &p1_id, std::slice::from_ref(&author_rel_on_posts)).unwrap();
        db.require_mut("posts").unwrap().delete(&p1_id);

        assert_eq!(
            db.require("users").unwrap().find(&u_id).unwrap()["postIds"],
            json!([p2_id])
        );
    }
}
