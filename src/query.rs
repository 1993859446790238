//! The query predicate language, sort, and pagination.
//!
//! A fluent builder (`QueryBld`) freezes into an immutable, reusable
//! `Query` value, with a catch-all escape hatch (`filter`) that accepts
//! either a `Where` tree or a callback. A `Where` compiles directly to a
//! matcher closure evaluated in memory -- there is no SQL to generate.
use crate::error::Error;
use crate::value::Record;
use chrono::DateTime;
use regex::escape as regex_escape;
use serde_json::Value;
use std::cmp::Ordering;
use std::rc::Rc;

/// A single comparison against one field's value.
///
#[derive(Clone)]
pub enum FieldOp {
    Eq(Value),
    Ne(Value),
    Lt(Value),
    Lte(Value),
    Gt(Value),
    Gte(Value),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    Between(Value, Value),
    Like(String),
    ILike(String),
    StartsWith(Value),
    EndsWith(Value),
    Contains(Value),
}

/// One leaf condition: `field` must satisfy `op`.
///
#[derive(Clone)]
pub struct FieldCond {
    pub field: String,
    pub op: FieldOp,
}

/// A boxed predicate callback: the closure receives the record directly
/// and is expected to use the free functions in this module (`eq`,
/// `like`, ...) if it wants that vocabulary.
///
pub type Callback = Rc<dyn Fn(&Record) -> bool>;

/// A `where` expression: a tagged union of leaf conditions, boolean
/// combinators, and an escape-hatch callback.
///
#[derive(Clone)]
pub enum Where {
    Field(FieldCond),
    And(Vec<Where>),
    Or(Vec<Where>),
    Not(Box<Where>),
    Callback(Callback),
}

impl Where {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::Field(FieldCond {
            field: field.to_string(),
            op: FieldOp::Eq(value.into()),
        })
    }

    pub fn op(field: &str, op: FieldOp) -> Self {
        Self::Field(FieldCond {
            field: field.to_string(),
            op,
        })
    }

    pub fn and(clauses: Vec<Where>) -> Self {
        Self::And(clauses)
    }

    pub fn or(clauses: Vec<Where>) -> Self {
        Self::Or(clauses)
    }

    pub fn not(clause: Where) -> Self {
        Self::Not(Box::new(clause))
    }

    pub fn callback<F: Fn(&Record) -> bool + 'static>(f: F) -> Self {
        Self::Callback(Rc::new(f))
    }

    /// Compile this tree into a matcher over a single record.
    ///
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::Field(cond) => field_matches(record, cond),
            Self::And(clauses) => clauses.iter().all(|c| c.matches(record)),
            Self::Or(clauses) => clauses.iter().any(|c| c.matches(record)),
            Self::Not(inner) => !inner.matches(record),
            Self::Callback(f) => f(record),
        }
    }

    /// Build a `Where` from a plain attribute-equality map: a conjunction
    /// of per-field equalities.
    ///
    pub fn from_equality_map(map: &Record) -> Self {
        Self::And(
            map.iter()
                .map(|(k, v)| Self::eq(k, v.clone()))
                .collect(),
        )
    }
}

/// Records carry dates as RFC 3339 strings; ordering two such strings
/// parses them so a `+02:00`-offset timestamp compares correctly against
/// a `Z` one, falling back to plain lexicographic comparison for
/// non-date strings.
///
fn value_ordering(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            x.as_f64().partial_cmp(&y.as_f64())
        }
        (Value::String(x), Value::String(y)) => {
            match (DateTime::parse_from_rfc3339(x), DateTime::parse_from_rfc3339(y)) {
                (Ok(dx), Ok(dy)) => Some(dx.cmp(&dy)),
                _ => Some(x.cmp(y)),
            }
        }
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// SQL-style `LIKE` match: `%` is a wildcard for any run of characters,
/// `_` for a single character. Case-sensitive; `ilike` is the
/// case-insensitive twin.
///
pub fn like(haystack: &str, pattern: &str, case_insensitive: bool) -> bool {
    let mut regex_pattern = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '%' => regex_pattern.push_str(".*"),
            '_' => regex_pattern.push('.'),
            other => regex_pattern.push_str(&regex_escape(&other.to_string())),
        }
    }
    regex_pattern.push('$');
    let re = if case_insensitive {
        regex::RegexBuilder::new(&regex_pattern)
            .case_insensitive(true)
            .build()
    } else {
        regex::Regex::new(&regex_pattern)
    };
    re.map(|re| re.is_match(haystack)).unwrap_or(false)
}

fn as_str(v: &Value) -> Option<&str> {
    v.as_str()
}

fn field_matches(record: &Record, cond: &FieldCond) -> bool {
    let actual = record.get(&cond.field).cloned().unwrap_or(Value::Null);
    match &cond.op {
        FieldOp::Eq(v) => &actual == v,
        FieldOp::Ne(v) => &actual != v,
        FieldOp::Lt(v) => value_ordering(&actual, v) == Some(Ordering::Less),
        FieldOp::Lte(v) => matches!(
            value_ordering(&actual, v),
            Some(Ordering::Less) | Some(Ordering::Equal)
        ),
        FieldOp::Gt(v) => value_ordering(&actual, v) == Some(Ordering::Greater),
        FieldOp::Gte(v) => matches!(
            value_ordering(&actual, v),
            Some(Ordering::Greater) | Some(Ordering::Equal)
        ),
        FieldOp::In(values) => values.contains(&actual),
        FieldOp::NotIn(values) => !values.contains(&actual),
        FieldOp::Between(lo, hi) => {
            matches!(
                value_ordering(&actual, lo),
                Some(Ordering::Greater) | Some(Ordering::Equal)
            ) && matches!(
                value_ordering(&actual, hi),
                Some(Ordering::Less) | Some(Ordering::Equal)
            )
        }
        FieldOp::Like(pattern) => as_str(&actual)
            .map(|s| like(s, pattern, false))
            .unwrap_or(false),
        FieldOp::ILike(pattern) => as_str(&actual)
            .map(|s| like(s, pattern, true))
            .unwrap_or(false),
        FieldOp::StartsWith(v) => match (as_str(&actual), as_str(v)) {
            (Some(s), Some(p)) => s.starts_with(p),
            _ => false,
        },
        FieldOp::EndsWith(v) => match (as_str(&actual), as_str(v)) {
            (Some(s), Some(p)) => s.ends_with(p),
            _ => false,
        },
        // against an array field, "contains" means "element of"; against a
        // string field it means substring.
        FieldOp::Contains(v) => match &actual {
            Value::Array(items) => items.contains(v),
            Value::String(s) => {
                as_str(v).map(|p| s.contains(p)).unwrap_or(false)
            }
            _ => false,
        },
    }
}

/// One `(field, direction)` sort key.
///
#[derive(Clone, Debug)]
pub struct OrderKey {
    pub field: String,
    pub ascending: bool,
}

/// One or more sort keys applied in order, stable, with `id` as the final
/// tiebreak.
///
#[derive(Clone, Debug, Default)]
pub struct OrderBy(pub Vec<OrderKey>);

impl OrderBy {
    pub fn asc(field: &str) -> Self {
        Self(vec![OrderKey {
            field: field.to_string(),
            ascending: true,
        }])
    }

    pub fn desc(field: &str) -> Self {
        Self(vec![OrderKey {
            field: field.to_string(),
            ascending: false,
        }])
    }

    pub fn then_asc(mut self, field: &str) -> Self {
        self.0.push(OrderKey {
            field: field.to_string(),
            ascending: true,
        });
        self
    }

    pub fn then_desc(mut self, field: &str) -> Self {
        self.0.push(OrderKey {
            field: field.to_string(),
            ascending: false,
        });
        self
    }

    fn compare(&self, a: &Record, b: &Record) -> Ordering {
        for key in &self.0 {
            let av = a.get(&key.field).cloned().unwrap_or(Value::Null);
            let bv = b.get(&key.field).cloned().unwrap_or(Value::Null);
            if let Some(ord) = value_ordering(&av, &bv) {
                let ord = if key.ascending { ord } else { ord.reverse() };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
        // stable: id as final tiebreak, ascending regardless of the last
        // explicit key's direction.
        let a_id = a.get("id").cloned().unwrap_or(Value::Null);
        let b_id = b.get("id").cloned().unwrap_or(Value::Null);
        value_ordering(&a_id, &b_id).unwrap_or(Ordering::Equal)
    }

    /// Sort `records` in place.
    ///
    pub fn apply(&self, records: &mut [Record]) {
        if self.0.is_empty() {
            records.sort_by(|a, b| {
                let a_id = a.get("id").cloned().unwrap_or(Value::Null);
                let b_id = b.get("id").cloned().unwrap_or(Value::Null);
                value_ordering(&a_id, &b_id).unwrap_or(Ordering::Equal)
            });
            return;
        }
        records.sort_by(|a, b| self.compare(a, b));
    }
}

/// A keyset pagination boundary: the value of the first `orderBy` field
/// for the last record already seen. Records up to and including this
/// value are skipped.
///
#[derive(Clone, Debug)]
pub struct Cursor(pub Value);

/// A fully built query: predicate, ordering, and pagination.
///
/// Built with [`QueryBld`](struct.QueryBld.html); the predicate is the
/// `Where` tree itself, evaluated directly against each record.
///
#[derive(Clone)]
pub struct Query {
    pub where_: Option<Where>,
    pub order_by: OrderBy,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
    pub cursor: Option<Cursor>,
}

impl Query {
    pub fn matches(&self, record: &Record) -> bool {
        self.where_.as_ref().map(|w| w.matches(record)).unwrap_or(true)
    }
}

/// Builds a [`Query`](struct.Query.html). Combinations `find_many` cannot
/// honor (`offset` and `cursor` together) are rejected at
/// [`build()`](#method.build) rather than at the call site.
///
#[derive(Clone, Default)]
pub struct QueryBld {
    where_: Option<Where>,
    order_by: OrderBy,
    offset: Option<usize>,
    limit: Option<usize>,
    cursor: Option<Cursor>,
}

impl QueryBld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a `where` condition. If one already exists, the two are
    /// AND-ed together.
    ///
    pub fn filter(mut self, clause: Where) -> Self {
        self.where_ = Some(match self.where_.take() {
            Some(old) => Where::And(vec![old, clause]),
            None => clause,
        });
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by = order;
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn cursor(mut self, cursor: Cursor) -> Self {
        self.cursor = Some(cursor);
        self
    }

    /// Freeze the builder. Cursor pagination combines with `limit` but
    /// not with `offset`; fails if both `offset` and `cursor` were set.
    ///
    pub fn build(self) -> Result<Query, Error> {
        if self.offset.is_some() && self.cursor.is_some() {
            return Err(Error::query(
                "cursor pagination cannot be combined with offset",
            ));
        }
        if self.cursor.is_some() && self.order_by.0.is_empty() {
            return Err(Error::query(
                "cursor pagination requires an orderBy field",
            ));
        }
        Ok(Query {
            where_: self.where_,
            order_by: self.order_by,
            offset: self.offset,
            limit: self.limit,
            cursor: self.cursor,
        })
    }
}

/// The result of [`DbCollection::find_many`
/// ](../db_collection/struct.DbCollection.html#method.find_many): the
/// paginated records, plus the total match count before pagination.
///
#[derive(Clone, Debug, Default)]
pub struct PagedResult {
    pub records: Vec<Record>,
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(v: serde_json::Value) -> Record {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn like_wildcards() {
        assert!(like("hello world", "hello%", false));
        assert!(!like("Hello world", "hello%", false));
        assert!(like("Hello world", "hello%", true));
        assert!(like("cat", "c_t", false));
    }

    #[test]
    fn contains_array_vs_string() {
        let r = rec(json!({"tags": ["a", "b"], "name": "alice"}));
        assert!(field_matches(
            &r,
            &FieldCond {
                field: "tags".into(),
                op: FieldOp::Contains(json!("a")),
            }
        ));
        assert!(field_matches(
            &r,
            &FieldCond {
                field: "name".into(),
                op: FieldOp::Contains(json!("lic")),
            }
        ));
    }

    #[test]
    fn and_or_not_compose() {
        let r = rec(json!({"status": "active", "age": 35}));
        let where_ = Where::and(vec![
            Where::eq("status", "active"),
            Where::op("age", FieldOp::Gte(json!(30))),
        ]);
        assert!(where_.matches(&r));
        assert!(!Where::not(where_.clone()).matches(&r));
    }

    #[test]
    fn order_by_stable_with_id_tiebreak() {
        let mut records = vec![
            rec(json!({"id": 3, "age": 30})),
            rec(json!({"id": 1, "age": 30})),
            rec(json!({"id": 2, "age": 25})),
        ];
        OrderBy::asc("age").apply(&mut records);
        let ids: Vec<i64> =
            records.iter().map(|r| r["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[test]
    fn order_by_compares_dates_across_offsets() {
        let mut records = vec![
            rec(json!({"id": 1, "createdAt": "2024-01-01T09:00:00+02:00"})),
            rec(json!({"id": 2, "createdAt": "2024-01-01T08:00:00Z"})),
        ];
        OrderBy::asc("createdAt").apply(&mut records);
        // id 1's local 09:00+02:00 is 07:00Z, earlier than id 2's 08:00Z,
        // even though "09:00" sorts after "08:00" lexicographically.
        let ids: Vec<i64> = records.iter().map(|r| r["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn builder_rejects_offset_with_cursor() {
        let built = QueryBld::new()
            .offset(1)
            .cursor(Cursor(json!(1)))
            .order_by(OrderBy::asc("id"))
            .build();
        assert!(built.is_err());
    }
}
