use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::matcher::{sort_order, Matcher};
use super::{DocumentStore, FindRequest, StoreError, WriteRequest};
use crate::query::field;
use crate::query::{FilterExpr, Namespace, SortDirection, UpdateExpr, UpdateOp};

/// Document store held entirely in process. Used in development mode and by
/// the test suites; evaluates the same canonical filters the SQL store does.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<Namespace, Vec<Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append documents, assigning an `_id` where missing. Insertion order
    /// is the natural order used to break sort ties.
    pub fn insert_many(&self, namespace: &Namespace, documents: impl IntoIterator<Item = Value>) -> usize {
        let mut collections = self.collections.write().unwrap_or_else(|p| p.into_inner());
        let collection = collections.entry(namespace.clone()).or_default();
        let before = collection.len();
        for document in documents {
            let Value::Object(mut map) = document else {
                tracing::warn!(namespace = %namespace, "skipping non-object document");
                continue;
            };
            map.entry("_id".to_string()).or_insert_with(new_object_id);
            collection.push(Value::Object(map));
        }
        collection.len() - before
    }

    pub fn count(&self, namespace: &Namespace) -> usize {
        let collections = self.collections.read().unwrap_or_else(|p| p.into_inner());
        collections.get(namespace).map_or(0, Vec::len)
    }
}

fn new_object_id() -> Value {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    json!({ "$oid": &hex[..24] })
}

fn compile(filter: &FilterExpr) -> Result<Matcher, StoreError> {
    Matcher::compile(filter).map_err(StoreError::Rejected)
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find(&self, request: &FindRequest) -> Result<Vec<Value>, StoreError> {
        let matcher = compile(&request.filter)?;
        let collections = self.collections.read().unwrap_or_else(|p| p.into_inner());
        let Some(collection) = collections.get(&request.namespace) else {
            return Ok(Vec::new());
        };

        let mut matched: Vec<&Value> = collection.iter().filter(|d| matcher.matches(d)).collect();

        if let Some(sort) = &request.sort {
            // sort_by is stable, so ties keep insertion order
            matched.sort_by(|a, b| {
                let ordering = sort_order(field::lookup(a, &sort.field), field::lookup(b, &sort.field));
                match sort.direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            });
        }

        Ok(matched
            .into_iter()
            .take(request.limit as usize)
            .map(|doc| match &request.projection {
                Some(projection) => projection.apply(doc),
                None => doc.clone(),
            })
            .collect())
    }

    async fn update_many(&self, request: &WriteRequest, update: &UpdateExpr) -> Result<u64, StoreError> {
        let matcher = compile(&request.filter)?;
        let mut collections = self.collections.write().unwrap_or_else(|p| p.into_inner());
        let Some(collection) = collections.get_mut(&request.namespace) else {
            return Ok(0);
        };

        let mut modified = 0;
        for document in collection.iter_mut().filter(|d| matcher.matches(d)) {
            if let Value::Object(map) = document {
                apply_update(map, update)?;
                modified += 1;
            }
        }
        Ok(modified)
    }

    async fn delete_many(&self, request: &WriteRequest) -> Result<u64, StoreError> {
        let matcher = compile(&request.filter)?;
        let mut collections = self.collections.write().unwrap_or_else(|p| p.into_inner());
        let Some(collection) = collections.get_mut(&request.namespace) else {
            return Ok(0);
        };

        let before = collection.len();
        collection.retain(|d| !matcher.matches(d));
        Ok((before - collection.len()) as u64)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

fn apply_update(document: &mut Map<String, Value>, update: &UpdateExpr) -> Result<(), StoreError> {
    for (op, path, operand) in update.actions() {
        match op {
            UpdateOp::Set => field::insert(document, path, operand.clone()),
            UpdateOp::Unset => {
                field::remove(document, path);
            }
            UpdateOp::Inc => {
                let current = field::lookup_map(document, path).cloned().unwrap_or(json!(0));
                let next = increment(&current, operand).ok_or_else(|| {
                    StoreError::Rejected(format!("cannot apply $inc to non-numeric field {}", path))
                })?;
                field::insert(document, path, next);
            }
        }
    }
    Ok(())
}

fn increment(current: &Value, by: &Value) -> Option<Value> {
    if let (Some(a), Some(b)) = (current.as_i64(), by.as_i64()) {
        if let Some(sum) = a.checked_add(b) {
            return Some(json!(sum));
        }
    }
    let sum = current.as_f64()? + by.as_f64()?;
    serde_json::Number::from_f64(sum).map(Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Projection, QuerySanitizer, SortSpec};
    use std::time::Duration;

    fn namespace() -> Namespace {
        Namespace::new("shop", "users").unwrap()
    }

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.insert_many(
            &namespace(),
            vec![
                json!({ "name": "ann", "age": 30, "email": "ann@example.com" }),
                json!({ "name": "bob", "age": 15 }),
                json!({ "name": "cy", "age": 30 }),
                json!({ "name": "di" }),
            ],
        );
        store
    }

    fn find_request(filter: &str) -> FindRequest {
        FindRequest {
            namespace: namespace(),
            filter: QuerySanitizer::new(10).sanitize(filter).unwrap(),
            sort: None,
            limit: 100,
            projection: None,
            timeout: Duration::from_secs(1),
        }
    }

    fn names(docs: &[Value]) -> Vec<&str> {
        docs.iter().filter_map(|d| d["name"].as_str()).collect()
    }

    #[tokio::test]
    async fn insert_assigns_object_ids() {
        let store = seeded();
        let docs = store.find(&find_request("{}")).await.unwrap();
        assert_eq!(docs.len(), 4);
        let id = docs[0]["_id"]["$oid"].as_str().unwrap();
        assert_eq!(id.len(), 24);
    }

    #[tokio::test]
    async fn sort_is_stable_and_direction_aware() {
        let store = seeded();
        let mut request = find_request("{}");
        request.sort = Some(SortSpec::new("age", SortDirection::Desc).unwrap());
        let docs = store.find(&request).await.unwrap();
        assert_eq!(names(&docs), vec!["ann", "cy", "bob", "di"]);

        request.sort = Some(SortSpec::new("age", SortDirection::Asc).unwrap());
        let docs = store.find(&request).await.unwrap();
        assert_eq!(names(&docs), vec!["di", "bob", "ann", "cy"]);
    }

    #[tokio::test]
    async fn limit_and_projection_apply_after_sort() {
        let store = seeded();
        let mut request = find_request(r#"{"age": {"$gte": 18}}"#);
        request.limit = 1;
        request.projection = Some(Projection::new(vec!["email".into()]));
        let docs = store.find(&request).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["email"], "ann@example.com");
        assert!(docs[0].get("name").is_none());
        assert!(docs[0].get("_id").is_some());
    }

    #[tokio::test]
    async fn unknown_namespace_is_empty() {
        let store = seeded();
        let mut request = find_request("{}");
        request.namespace = Namespace::new("shop", "nothing").unwrap();
        assert!(store.find(&request).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_and_delete_by_filter() {
        let store = seeded();
        let sanitizer = QuerySanitizer::new(10);
        let write = WriteRequest {
            namespace: namespace(),
            filter: sanitizer.sanitize(r#"{"age": 30}"#).unwrap(),
            timeout: Duration::from_secs(1),
        };
        let update = sanitizer
            .sanitize_update(r#"{"$set": {"tier": "gold"}, "$inc": {"age": 1}}"#)
            .unwrap();
        assert_eq!(store.update_many(&write, &update).await.unwrap(), 2);

        let docs = store.find(&find_request(r#"{"tier": "gold"}"#)).await.unwrap();
        assert!(docs.iter().all(|d| d["age"] == 31));

        let delete = WriteRequest {
            filter: sanitizer.sanitize(r#"{"tier": "gold"}"#).unwrap(),
            ..write
        };
        assert_eq!(store.delete_many(&delete).await.unwrap(), 2);
        assert_eq!(store.count(&namespace()), 2);
    }
}
