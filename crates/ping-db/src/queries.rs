use anyhow::{Result, anyhow, bail};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, Transaction};
use serde_json::Value;

use crate::Database;
use crate::models::{ChangeKind, Document, DocumentChange, Filter, Query, WriteOp, check_field};

impl Database {
    // -- Reads --

    pub fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.with_conn(|conn| query_document(conn, collection, id))
    }

    pub fn query(&self, query: &Query) -> Result<Vec<Document>> {
        self.with_conn(|conn| run_query(conn, query))
    }

    pub fn query_equals(
        &self,
        collection: &str,
        field: &str,
        value: impl Into<Value>,
    ) -> Result<Vec<Document>> {
        self.query(&Query::collection(collection).where_eq(field, value))
    }

    pub fn count(&self, collection: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM documents WHERE collection = ?1",
                [collection],
                |row| row.get(0),
            )?;
            Ok(n as u64)
        })
    }

    // -- Writes --

    pub fn set(&self, collection: &str, id: &str, data: Value) -> Result<()> {
        self.batch_write(vec![WriteOp::Set {
            collection: collection.to_string(),
            id: id.to_string(),
            data,
        }])
    }

    pub fn update(&self, collection: &str, id: &str, patch: Value) -> Result<()> {
        self.batch_write(vec![WriteOp::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            patch,
        }])
    }

    pub fn upsert(&self, collection: &str, id: &str, on_create: Value, on_update: Value) -> Result<()> {
        self.batch_write(vec![WriteOp::Upsert {
            collection: collection.to_string(),
            id: id.to_string(),
            on_create,
            on_update,
        }])
    }

    pub fn delete(&self, collection: &str, id: &str) -> Result<()> {
        self.batch_write(vec![WriteOp::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        }])
    }

    /// Apply every write in one transaction. Either all of them land or none
    /// do; listeners are notified only after the commit.
    pub fn batch_write(&self, ops: Vec<WriteOp>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }

        let changes = self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut changes = Vec::with_capacity(ops.len());
            for op in &ops {
                apply(&tx, op, &mut changes)?;
            }
            tx.commit()?;
            Ok(changes)
        })?;

        self.notify(changes);
        Ok(())
    }
}

fn apply(tx: &Transaction<'_>, op: &WriteOp, changes: &mut Vec<DocumentChange>) -> Result<()> {
    match op {
        WriteOp::Set { collection, id, data } => {
            let body = object_text(data)?;
            tx.execute(
                "INSERT INTO documents (collection, id, data) VALUES (?1, ?2, ?3)
                 ON CONFLICT(collection, id) DO UPDATE
                 SET data = excluded.data, updated_at = datetime('now')",
                (collection, id, &body),
            )?;
            changes.push(written(collection, id));
        }
        WriteOp::Upsert { collection, id, on_create, on_update } => {
            let create = object_text(on_create)?;
            let merge = object_text(on_update)?;
            tx.execute(
                "INSERT INTO documents (collection, id, data) VALUES (?1, ?2, ?3)
                 ON CONFLICT(collection, id) DO UPDATE
                 SET data = json_patch(data, ?4), updated_at = datetime('now')",
                (collection, id, &create, &merge),
            )?;
            changes.push(written(collection, id));
        }
        WriteOp::Update { collection, id, patch } => {
            let merge = object_text(patch)?;
            let n = tx.execute(
                "UPDATE documents SET data = json_patch(data, ?3), updated_at = datetime('now')
                 WHERE collection = ?1 AND id = ?2",
                (collection, id, &merge),
            )?;
            if n == 0 {
                bail!("Document not found: {}/{}", collection, id);
            }
            changes.push(written(collection, id));
        }
        WriteOp::Delete { collection, id } => {
            let n = tx.execute(
                "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                (collection, id),
            )?;
            if n > 0 {
                changes.push(deleted(collection, id));
            }
        }
        WriteOp::DeleteCollection { collection } => {
            let ids: Vec<String> = {
                let mut stmt = tx.prepare("SELECT id FROM documents WHERE collection = ?1")?;
                stmt.query_map([collection], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            };
            tx.execute("DELETE FROM documents WHERE collection = ?1", [collection])?;
            changes.extend(ids.iter().map(|id| deleted(collection, id)));
        }
    }
    Ok(())
}

fn written(collection: &str, id: &str) -> DocumentChange {
    DocumentChange {
        collection: collection.to_string(),
        id: id.to_string(),
        kind: ChangeKind::Written,
    }
}

fn deleted(collection: &str, id: &str) -> DocumentChange {
    DocumentChange {
        collection: collection.to_string(),
        id: id.to_string(),
        kind: ChangeKind::Deleted,
    }
}

fn object_text(value: &Value) -> Result<String> {
    if !value.is_object() {
        bail!("Document body must be a JSON object");
    }
    Ok(serde_json::to_string(value)?)
}

/// Map a JSON scalar to the SQL value json_extract yields for it.
fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn query_document(conn: &Connection, collection: &str, id: &str) -> Result<Option<Document>> {
    let data: Option<String> = conn
        .query_row(
            "SELECT data FROM documents WHERE collection = ?1 AND id = ?2",
            (collection, id),
            |row| row.get(0),
        )
        .optional()?;

    data.map(|text| parse_document(collection, id.to_string(), &text))
        .transpose()
}

fn run_query(conn: &Connection, query: &Query) -> Result<Vec<Document>> {
    let mut sql = String::from("SELECT id, data FROM documents WHERE collection = ?1");
    let mut params: Vec<SqlValue> = vec![SqlValue::Text(query.collection.clone())];

    for filter in &query.filters {
        match filter {
            Filter::Eq(field, value) => {
                check_field(field)?;
                params.push(to_sql(value));
                sql.push_str(&format!(" AND json_extract(data, '$.{}') = ?{}", field, params.len()));
            }
            Filter::In(field, values) => {
                check_field(field)?;
                // `x IN ()` matches nothing; skip the round trip.
                if values.is_empty() {
                    return Ok(vec![]);
                }
                let mut placeholders = Vec::with_capacity(values.len());
                for value in values {
                    params.push(to_sql(value));
                    placeholders.push(format!("?{}", params.len()));
                }
                sql.push_str(&format!(
                    " AND json_extract(data, '$.{}') IN ({})",
                    field,
                    placeholders.join(", ")
                ));
            }
        }
    }

    if let Some((field, direction)) = &query.order_by {
        check_field(field)?;
        sql.push_str(&format!(" ORDER BY json_extract(data, '$.{}') {}", field, direction.sql()));
    }

    if let Some(limit) = query.limit {
        params.push(SqlValue::Integer(limit as i64));
        sql.push_str(&format!(" LIMIT ?{}", params.len()));
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, text)| parse_document(&query.collection, id, &text))
        .collect()
}

fn parse_document(collection: &str, id: String, text: &str) -> Result<Document> {
    let data = serde_json::from_str(text)
        .map_err(|e| anyhow!("Corrupt JSON in {}/{}: {}", collection, id, e))?;
    Ok(Document {
        collection: collection.to_string(),
        id,
        data,
    })
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;
    use serde_json::json;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn set_get_and_equality_query() {
        let db = db();
        db.set("users", "u1", json!({ "pingId": "alice01", "n": 1 })).unwrap();
        db.set("users", "u2", json!({ "pingId": "bob002", "n": 2 })).unwrap();

        let doc = db.get("users", "u1").unwrap().unwrap();
        assert_eq!(doc.data["pingId"], "alice01");
        assert!(db.get("users", "missing").unwrap().is_none());

        let hits = db.query_equals("users", "pingId", "bob002").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "u2");

        // exact, case-sensitive
        assert!(db.query_equals("users", "pingId", "ALICE01").unwrap().is_empty());
        assert_eq!(db.query_equals("users", "n", 2).unwrap().len(), 1);
    }

    #[test]
    fn in_query_orders_and_limits() {
        let db = db();
        for i in 0..10 {
            let author = if i % 2 == 0 { "a" } else { "b" };
            db.set("posts", &format!("p{}", i), json!({ "authorId": author, "timestamp": i }))
                .unwrap();
        }
        db.set("posts", "px", json!({ "authorId": "c", "timestamp": 100 })).unwrap();

        let q = Query::collection("posts")
            .where_in("authorId", ["a", "b"])
            .order_by("timestamp", Direction::Desc)
            .limit(4);
        let ids: Vec<String> = db.query(&q).unwrap().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["p9", "p8", "p7", "p6"]);

        let empty = Query::collection("posts").where_in("authorId", Vec::<String>::new());
        assert!(db.query(&empty).unwrap().is_empty());
    }

    #[test]
    fn upsert_keeps_created_fields() {
        let db = db();
        db.upsert("chats", "c", json!({ "createdAt": 1, "updatedAt": 1 }), json!({ "updatedAt": 2 }))
            .unwrap();
        db.upsert("chats", "c", json!({ "createdAt": 5, "updatedAt": 5 }), json!({ "updatedAt": 6 }))
            .unwrap();

        let doc = db.get("chats", "c").unwrap().unwrap();
        assert_eq!(doc.data, json!({ "createdAt": 1, "updatedAt": 6 }));
        assert_eq!(db.count("chats").unwrap(), 1);
    }

    #[test]
    fn failed_batch_writes_nothing() {
        let db = db();
        let result = db.batch_write(vec![
            WriteOp::Set {
                collection: "posts".into(),
                id: "p1".into(),
                data: json!({ "text": "hi" }),
            },
            WriteOp::Update {
                collection: "posts".into(),
                id: "missing".into(),
                patch: json!({ "text": "x" }),
            },
        ]);
        assert!(result.is_err());
        assert!(db.get("posts", "p1").unwrap().is_none());
    }

    #[test]
    fn changes_are_published_after_commit() {
        let db = db();
        let mut rx = db.subscribe_changes();
        db.set("posts/p1/comments", "c1", json!({ "text": "a" })).unwrap();
        db.set("posts/p1/comments", "c2", json!({ "text": "b" })).unwrap();
        db.batch_write(vec![WriteOp::DeleteCollection {
            collection: "posts/p1/comments".into(),
        }])
        .unwrap();

        let kinds: Vec<ChangeKind> = (0..4).map(|_| rx.try_recv().unwrap().kind).collect();
        assert_eq!(
            kinds,
            vec![ChangeKind::Written, ChangeKind::Written, ChangeKind::Deleted, ChangeKind::Deleted]
        );
        assert_eq!(db.count("posts/p1/comments").unwrap(), 0);
    }

    #[test]
    fn rejects_non_object_bodies() {
        let db = db();
        assert!(db.set("posts", "p", json!([1, 2])).is_err());
    }
}
