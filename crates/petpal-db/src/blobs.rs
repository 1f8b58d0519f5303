use anyhow::{Result, bail};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tokio::fs;
use tracing::{info, warn};

/// Uploads larger than this are refused.
pub const MAX_BLOB_SIZE: usize = 10 * 1024 * 1024;

/// A stored blob and the URL it is served under.
#[derive(Debug, Clone, PartialEq)]
pub struct BlobRef {
    pub path: String,
    pub url: String,
    pub size: u64,
    pub sha256: String,
}

/// Filesystem blob storage for pet photos and avatars.
///
/// Each blob lives at `{dir}/{path}` and is served at `{public_base}/files/{path}`.
pub struct BlobStore {
    dir: PathBuf,
    public_base: String,
}

impl BlobStore {
    pub async fn new(dir: PathBuf, public_base: &str) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Blob storage directory: {}", dir.display());
        Ok(Self {
            dir,
            public_base: public_base.trim_end_matches('/').to_string(),
        })
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}/files/{}", self.public_base, path)
    }

    /// Inverse of [`BlobStore::url_for`]: the blob path behind a URL this store handed out.
    pub fn path_of<'a>(&self, url: &'a str) -> Option<&'a str> {
        url.strip_prefix(self.public_base.as_str())?
            .strip_prefix("/files/")
            .filter(|path| !path.is_empty())
    }

    pub async fn upload(&self, path: &str, bytes: &[u8]) -> Result<BlobRef> {
        if bytes.is_empty() {
            bail!("Refusing to store an empty blob at {}", path);
        }
        if bytes.len() > MAX_BLOB_SIZE {
            bail!("Blob of {} bytes exceeds the {} byte limit", bytes.len(), MAX_BLOB_SIZE);
        }

        let file_path = self.resolve(path)?;
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&file_path, bytes).await?;

        let mut hasher = Sha256::new();
        hasher.update(bytes);

        info!("Stored blob {} ({} bytes)", path, bytes.len());
        Ok(BlobRef {
            path: path.to_string(),
            url: self.url_for(path),
            size: bytes.len() as u64,
            sha256: hex::encode(hasher.finalize()),
        })
    }

    pub async fn read(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let file_path = self.resolve(path)?;
        match fs::read(&file_path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        let file_path = self.resolve(path)?;
        match fs::remove_file(&file_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Blob {} already gone", path);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Map a blob path onto the storage directory, refusing anything that could escape it.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let mut out = self.dir.clone();
        let mut depth = 0;
        for seg in path.trim_matches('/').split('/') {
            if seg.is_empty()
                || seg == "."
                || seg == ".."
                || seg.contains('\\')
                || seg.chars().any(char::is_control)
            {
                bail!("Invalid blob path '{}'", path);
            }
            out.push(seg);
            depth += 1;
        }
        if depth == 0 {
            bail!("Invalid blob path '{}'", path);
        }
        Ok(out)
    }
}
