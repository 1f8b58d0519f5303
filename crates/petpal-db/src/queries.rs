use anyhow::{Result, anyhow, bail};
use rusqlite::Connection;
use serde_json::{Map, Value};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::Database;
use crate::batch::WriteBatch;
use crate::document;
use crate::models::CredentialRow;
use crate::paths::DocPath;

/// Result of a committed transaction: the caller's output plus every path the
/// write touched, in the order it was applied.
#[derive(Debug)]
pub struct Committed<T> {
    pub output: T,
    pub touched: Vec<DocPath>,
}

/// Reads issued from inside a [`Database::transact`] decision. They see the
/// store as the enclosing transaction does.
pub struct TxReader<'a> {
    conn: &'a Connection,
}

impl TxReader<'_> {
    pub fn read(&self, path: &DocPath) -> Result<Option<Value>> {
        read_path(self.conn, path)
    }
}

impl Database {
    // -- Documents --

    pub fn read_once(&self, path: &DocPath) -> Result<Option<Value>> {
        self.with_conn(|conn| read_path(conn, path))
    }

    /// Apply every entry of `batch` inside one SQLite transaction.
    pub fn write_atomic(&self, batch: WriteBatch) -> Result<Vec<DocPath>> {
        let committed = self.transact(|_| Ok::<_, anyhow::Error>((batch, ())))?;
        Ok(committed.touched)
    }

    /// Let `decide` read whatever it needs and turn it into a write, then
    /// commit that write, all under one transaction. If `decide` fails nothing
    /// is written and its error is returned unchanged.
    pub fn transact<T, E, F>(&self, decide: F) -> std::result::Result<Committed<T>, E>
    where
        F: FnOnce(&TxReader<'_>) -> std::result::Result<(WriteBatch, T), E>,
        E: From<anyhow::Error>,
    {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let (batch, output) = match decide(&TxReader { conn: &tx }) {
                Ok(decision) => decision,
                // Dropping `tx` rolls back
                Err(e) => return Ok(Err(e)),
            };

            let touched = apply_batch(&tx, &batch)?;
            tx.commit()?;

            if !touched.is_empty() {
                debug!("Committed write touching {} path(s)", touched.len());
            }
            Ok(Ok(Committed { output, touched }))
        })
        .map_err(E::from)?
    }

    /// Allocate a fresh identifier for a child of `parent`.
    pub fn generate_id(&self, parent: &DocPath) -> String {
        let id = Uuid::new_v4().to_string();
        trace!("Allocated id {} under {}", id, parent);
        id
    }

    // -- Credentials --

    pub fn create_credentials(&self, uid: &str, email: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO credentials (uid, email, password) VALUES (?1, ?2, ?3)",
                (uid, email, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn get_credentials_by_email(&self, email: &str) -> Result<Option<CredentialRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT uid, email, password, created_at FROM credentials WHERE email = ?1",
                [email],
                |row| {
                    Ok(CredentialRow {
                        uid: row.get(0)?,
                        email: row.get(1)?,
                        password: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()
        })
    }

    pub fn delete_credentials(&self, uid: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM credentials WHERE uid = ?1", [uid])?;
            Ok(())
        })
    }
}

fn read_path(conn: &Connection, path: &DocPath) -> Result<Option<Value>> {
    let Some(doc_id) = path.doc_id() else {
        return read_collection(conn, path.collection());
    };

    let Some(body) = load_body(conn, path.collection(), doc_id)? else {
        return Ok(None);
    };
    Ok(document::get_in(&body, path.field()).cloned())
}

fn read_collection(conn: &Connection, collection: &str) -> Result<Option<Value>> {
    let mut stmt =
        conn.prepare("SELECT doc_id, body FROM documents WHERE collection = ?1 ORDER BY doc_id")?;

    let rows = stmt
        .query_map([collection], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if rows.is_empty() {
        return Ok(None);
    }

    let mut map = Map::new();
    for (doc_id, body) in rows {
        let value = serde_json::from_str(&body)
            .map_err(|e| anyhow!("Corrupt document {}/{}: {}", collection, doc_id, e))?;
        map.insert(doc_id, value);
    }
    Ok(Some(Value::Object(map)))
}

fn load_body(conn: &Connection, collection: &str, doc_id: &str) -> Result<Option<Value>> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM documents WHERE collection = ?1 AND doc_id = ?2",
            [collection, doc_id],
            |row| row.get(0),
        )
        .optional()?;

    body.map(|b| {
        serde_json::from_str(&b)
            .map_err(|e| anyhow!("Corrupt document {}/{}: {}", collection, doc_id, e))
    })
    .transpose()
}

fn store_body(conn: &Connection, collection: &str, doc_id: &str, body: Option<Value>) -> Result<()> {
    match body {
        Some(value) => {
            conn.execute(
                "INSERT INTO documents (collection, doc_id, body) VALUES (?1, ?2, ?3)
                 ON CONFLICT(collection, doc_id)
                 DO UPDATE SET body = excluded.body, updated_at = datetime('now')",
                (collection, doc_id, serde_json::to_string(&value)?),
            )?;
        }
        None => {
            conn.execute(
                "DELETE FROM documents WHERE collection = ?1 AND doc_id = ?2",
                [collection, doc_id],
            )?;
        }
    }
    Ok(())
}

fn apply_batch(conn: &Connection, batch: &WriteBatch) -> Result<Vec<DocPath>> {
    let entries = batch.validated()?;
    let mut touched = Vec::with_capacity(entries.len());

    for (path, value) in entries {
        let collection = path.collection();
        match path.doc_id() {
            None => {
                conn.execute("DELETE FROM documents WHERE collection = ?1", [collection])?;
                match value.and_then(document::prune) {
                    Some(Value::Object(docs)) => {
                        for (doc_id, body) in docs {
                            DocPath::parse(&format!("{}/{}", collection, doc_id))?;
                            store_body(conn, collection, &doc_id, Some(body))?;
                        }
                    }
                    Some(_) => bail!("collection '{}' can only hold an object", collection),
                    None => {}
                }
            }
            Some(doc_id) if path.field().is_empty() => {
                store_body(conn, collection, doc_id, value.and_then(document::prune))?;
            }
            Some(doc_id) => {
                let mut body = load_body(conn, collection, doc_id)?
                    .unwrap_or_else(|| Value::Object(Map::new()));
                match value {
                    Some(v) => document::set_in(&mut body, path.field(), v),
                    None => document::remove_in(&mut body, path.field()),
                }
                store_body(conn, collection, doc_id, document::prune(body))?;
            }
        }
        touched.push(path);
    }

    Ok(touched)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
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
    use serde_json::json;

    fn path(s: &str) -> DocPath {
        DocPath::parse(s).unwrap()
    }

    fn db_with_post() -> Database {
        let db = Database::open_in_memory().unwrap();
        let mut batch = WriteBatch::new();
        batch.set("posts/p1", json!({"authorId": "u1", "content": "hi", "replyCount": 0}));
        db.write_atomic(batch).unwrap();
        db
    }

    #[test]
    fn test_read_document_field_and_collection() {
        let db = db_with_post();
        assert_eq!(db.read_once(&path("posts/p1/content")).unwrap(), Some(json!("hi")));
        assert_eq!(db.read_once(&path("posts/p1/likes")).unwrap(), None);
        assert_eq!(
            db.read_once(&path("posts")).unwrap(),
            Some(json!({"p1": {"authorId": "u1", "content": "hi", "replyCount": 0}}))
        );
        assert_eq!(db.read_once(&path("users")).unwrap(), None);
    }

    #[test]
    fn test_field_writes_and_deletes() {
        let db = db_with_post();
        let mut batch = WriteBatch::new();
        batch.set("posts/p1/likes/u2", json!(true));
        db.write_atomic(batch).unwrap();
        assert_eq!(db.read_once(&path("posts/p1/likes")).unwrap(), Some(json!({"u2": true})));

        let mut batch = WriteBatch::new();
        batch.delete("posts/p1/likes/u2");
        db.write_atomic(batch).unwrap();
        assert_eq!(db.read_once(&path("posts/p1/likes")).unwrap(), None);
        assert!(db.read_once(&path("posts/p1")).unwrap().is_some());
    }

    #[test]
    fn test_document_removed_when_emptied() {
        let db = Database::open_in_memory().unwrap();
        let mut batch = WriteBatch::new();
        batch.set("notifications/u2/n1", json!({"type": "follow"}));
        db.write_atomic(batch).unwrap();

        let mut batch = WriteBatch::new();
        batch.delete("notifications/u2/n1");
        db.write_atomic(batch).unwrap();
        assert_eq!(db.read_once(&path("notifications")).unwrap(), None);
    }

    #[test]
    fn test_multi_path_write_is_all_or_nothing() {
        let db = db_with_post();
        let mut batch = WriteBatch::new();
        batch
            .set("posts/p1/content", json!("changed"))
            .set("posts/p1", json!({"content": "clobber"}));
        assert!(db.write_atomic(batch).is_err());
        assert_eq!(db.read_once(&path("posts/p1/content")).unwrap(), Some(json!("hi")));
    }

    #[test]
    fn test_failed_decision_writes_nothing() {
        let db = db_with_post();
        let result = db.transact(|tx| {
            tx.read(&path("posts/p1"))?;
            Err::<(WriteBatch, ()), anyhow::Error>(anyhow!("not the author"))
        });
        assert!(result.is_err());
        assert_eq!(db.read_once(&path("posts/p1/content")).unwrap(), Some(json!("hi")));
    }

    #[test]
    fn test_transact_sees_current_values() {
        let db = db_with_post();
        let committed = db
            .transact(|tx| {
                let count = tx
                    .read(&path("posts/p1/replyCount"))?
                    .as_ref()
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                let mut batch = WriteBatch::new();
                batch.set("posts/p1/replyCount", json!(count + 1));
                Ok::<_, anyhow::Error>((batch, count + 1))
            })
            .unwrap();
        assert_eq!(committed.output, 1);
        assert_eq!(committed.touched, vec![path("posts/p1/replyCount")]);
        assert_eq!(db.read_once(&path("posts/p1/replyCount")).unwrap(), Some(json!(1)));
    }

    #[test]
    fn test_collection_replace() {
        let db = db_with_post();
        let mut batch = WriteBatch::new();
        batch.set("posts", json!({"p2": {"content": "new"}}));
        db.write_atomic(batch).unwrap();
        assert_eq!(db.read_once(&path("posts")).unwrap(), Some(json!({"p2": {"content": "new"}})));
    }

    #[test]
    fn test_credentials_email_unique_case_insensitive() {
        let db = Database::open_in_memory().unwrap();
        db.create_credentials("u1", "ana@example.com", "hash").unwrap();
        assert!(db.create_credentials("u2", "ANA@example.com", "hash").is_err());
        let row = db.get_credentials_by_email("Ana@Example.com").unwrap().unwrap();
        assert_eq!(row.uid, "u1");
        db.delete_credentials("u1").unwrap();
        assert!(db.get_credentials_by_email("ana@example.com").unwrap().is_none());
    }
}
