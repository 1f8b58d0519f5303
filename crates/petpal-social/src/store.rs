use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::anyhow;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use petpal_db::blobs::MAX_BLOB_SIZE;
use petpal_db::{BlobStore, Database, DocPath, TxReader, WriteBatch};
use petpal_gateway::{Dispatcher, Subscription};

use crate::error::{SocialError, SocialResult};

pub const USERS: &str = "users";
pub const HANDLES: &str = "handles";
pub const POSTS: &str = "posts";
pub const NOTIFICATIONS: &str = "notifications";
pub const PETS: &str = "pets";

/// Async face of the document store. Every commit is announced to the
/// dispatcher so subscribers see it.
#[derive(Clone)]
pub struct Backend {
    dispatcher: Dispatcher,
}

impl Backend {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self::new(Dispatcher::new(Arc::new(db))))
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub async fn read_once(&self, path: &DocPath) -> SocialResult<Option<Value>> {
        let db = self.dispatcher.db().clone();
        let path = path.clone();
        blocking(move || Ok(db.read_once(&path)?)).await
    }

    /// Commit `batch` and return the sequence number it was published under.
    pub async fn write_atomic(&self, batch: WriteBatch) -> SocialResult<u64> {
        let db = self.dispatcher.db().clone();
        let touched = blocking(move || Ok(db.write_atomic(batch)?)).await?;
        Ok(self.dispatcher.publish(touched))
    }

    /// Run a read-decide-write as one store transaction. An error from
    /// `decide` leaves the store untouched.
    pub async fn transact<T, F>(&self, decide: F) -> SocialResult<T>
    where
        F: FnOnce(&TxReader<'_>) -> SocialResult<(WriteBatch, T)> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.dispatcher.db().clone();
        let committed = blocking(move || db.transact(decide)).await?;
        self.dispatcher.publish(committed.touched);
        Ok(committed.output)
    }

    pub fn generate_id(&self, parent: &DocPath) -> String {
        self.dispatcher.db().generate_id(parent)
    }

    pub fn subscribe(&self, path: DocPath) -> Subscription {
        self.dispatcher.subscribe(path)
    }

    /// Typed one-shot read of a single document.
    pub async fn load<T: DeserializeOwned>(&self, collection: &str, id: &str) -> SocialResult<Option<T>> {
        let path = doc_path(collection, id)?;
        self.read_once(&path)
            .await?
            .map(|value| decode_doc(&path, value))
            .transpose()
    }
}

async fn blocking<T, F>(f: F) -> SocialResult<T>
where
    F: FnOnce() -> SocialResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SocialError::Backend(anyhow!("store task failed: {}", e)))?
}

/// Longest file name accepted for an uploaded image.
const MAX_FILE_NAME_CHARS: usize = 100;

/// Check an uploaded file before it reaches the blob store. Returns the
/// trimmed file name.
pub fn check_upload(file_name: &str, bytes: &[u8]) -> SocialResult<String> {
    let name = file_name.trim();
    if name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\'])
        || name.chars().any(char::is_control)
        || name.chars().count() > MAX_FILE_NAME_CHARS
    {
        return Err(SocialError::Validation(format!("invalid file name '{}'", file_name)));
    }
    if bytes.is_empty() {
        return Err(SocialError::Validation("uploaded file is empty".into()));
    }
    if bytes.len() > MAX_BLOB_SIZE {
        return Err(SocialError::Validation(format!(
            "uploaded file is {} bytes, the limit is {}",
            bytes.len(),
            MAX_BLOB_SIZE
        )));
    }
    Ok(name.to_string())
}

/// Pass `linked` through. When linking failed, the blob just written at
/// `uploaded` is removed unless a record pointed at that path before the upload.
pub(crate) async fn discard_upload_on_error<T>(
    blobs: &BlobStore,
    uploaded: &str,
    linked_before: Option<&str>,
    linked: SocialResult<T>,
) -> SocialResult<T> {
    if linked.is_err() && linked_before.and_then(|url| blobs.path_of(url)) != Some(uploaded) {
        if let Err(e) = blobs.delete(uploaded).await {
            warn!("Failed to remove unlinked blob {}: {}", uploaded, e);
        }
    }
    linked
}

pub fn collection_path(collection: &str) -> SocialResult<DocPath> {
    DocPath::parse(collection).map_err(|e| SocialError::Validation(e.to_string()))
}

/// Path of one document. Ids that would address a different depth are refused.
pub fn doc_path(collection: &str, id: &str) -> SocialResult<DocPath> {
    child_path(&collection_path(collection)?, &[id])
}

pub fn child_path(base: &DocPath, segments: &[&str]) -> SocialResult<DocPath> {
    let mut path = base.clone();
    for segment in segments {
        if segment.is_empty() || segment.contains('/') {
            return Err(SocialError::Validation(format!("invalid key '{}'", segment)));
        }
        path = path
            .child(segment)
            .map_err(|e| SocialError::Validation(e.to_string()))?;
    }
    Ok(path)
}

pub fn decode_doc<T: DeserializeOwned>(path: &DocPath, value: Value) -> SocialResult<T> {
    serde_json::from_value(value)
        .map_err(|e| SocialError::Backend(anyhow!("corrupt document {}: {}", path, e)))
}

/// Typed read inside a transaction.
pub fn read_doc<T: DeserializeOwned>(tx: &TxReader<'_>, path: &DocPath) -> SocialResult<Option<T>> {
    tx.read(path)?.map(|value| decode_doc(path, value)).transpose()
}

/// Decode every entry of a map read from the store, keyed by its id.
/// Entries that fail to decode are logged and left out.
pub fn decode_entries<T, F>(value: Option<Value>, kind: &str, mut assign_id: F) -> BTreeMap<String, T>
where
    T: DeserializeOwned,
    F: FnMut(&mut T, &str),
{
    let mut out = BTreeMap::new();
    let entries = match value {
        Some(Value::Object(entries)) => entries,
        Some(other) => {
            warn!("Expected a map of {} records, got {}", kind, other);
            return out;
        }
        None => return out,
    };

    for (id, raw) in entries {
        match serde_json::from_value::<T>(raw) {
            Ok(mut record) => {
                assign_id(&mut record, &id);
                out.insert(id, record);
            }
            Err(e) => warn!("Skipping malformed {} {}: {}", kind, id, e),
        }
    }
    out
}
