//! Local-disk document store.

use super::{validate_name, DocumentStore, StoredDocument};
use crate::error::{Result, VenueError};
use lru::LruCache;
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Magic bytes for document files.
const DOCUMENT_MAGIC: &[u8; 4] = b"SMD\0";

/// Current document format version.
const DOCUMENT_VERSION: u8 = 1;

/// Magic, version, length and checksum around the content.
const ENVELOPE_LEN: u64 = 4 + 1 + 8 + 4;

const DOCUMENT_EXTENSION: &str = "doc";

/// Document store configuration.
#[derive(Clone, Debug)]
pub struct DocumentStoreConfig {
    /// Directory holding the document files.
    pub path: PathBuf,

    /// Read cache size (number of documents).
    pub cache_size: usize,

    /// Prefix of the public URL returned by `put`.
    pub base_url: String,
}

impl Default for DocumentStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./documents"),
            cache_size: 64,
            base_url: "file://documents".to_string(),
        }
    }
}

/// Documents stored one per file with a checksummed envelope.
pub struct FsDocumentStore {
    path: PathBuf,
    base_url: String,
    cache: Mutex<LruCache<String, Vec<u8>>>,
}

impl FsDocumentStore {
    pub fn new(config: DocumentStoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.path)?;

        let cache_size = NonZeroUsize::new(config.cache_size).unwrap_or(NonZeroUsize::MIN);

        Ok(Self {
            path: config.path,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            cache: Mutex::new(LruCache::new(cache_size)),
        })
    }

    pub fn url_for(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, name)
    }

    fn document_path(&self, name: &str) -> PathBuf {
        self.path.join(format!("{name}.{DOCUMENT_EXTENSION}"))
    }

    fn read_file(path: &Path) -> Result<Vec<u8>> {
        let mut file = File::open(path)?;
        let file_len = file.metadata()?.len();

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != DOCUMENT_MAGIC {
            return Err(VenueError::InvalidFormat("Invalid document magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != DOCUMENT_VERSION {
            return Err(VenueError::InvalidFormat(format!(
                "Unsupported document version: {}",
                version[0]
            )));
        }

        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes)?;
        let len = u64::from_le_bytes(len_bytes);
        if len.checked_add(ENVELOPE_LEN) != Some(file_len) {
            return Err(VenueError::Corruption(format!(
                "document length {len} does not match file size {file_len}"
            )));
        }

        let mut content = vec![0u8; len as usize];
        file.read_exact(&mut content)?;

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        let expected = u32::from_le_bytes(checksum_bytes);
        let got = crc32fast::hash(&content);
        if expected != got {
            return Err(VenueError::ChecksumMismatch { expected, got });
        }

        Ok(content)
    }
}

impl DocumentStore for FsDocumentStore {
    fn put(&self, name: &str, bytes: &[u8]) -> Result<String> {
        validate_name(name)?;

        let target = self.document_path(name);
        let staging = target.with_extension("tmp");
        {
            let mut file = File::create(&staging)?;
            file.write_all(DOCUMENT_MAGIC)?;
            file.write_all(&[DOCUMENT_VERSION])?;
            file.write_all(&(bytes.len() as u64).to_le_bytes())?;
            file.write_all(bytes)?;
            file.write_all(&crc32fast::hash(bytes).to_le_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&staging, &target)?;

        self.cache.lock().put(name.to_string(), bytes.to_vec());
        debug!(name, bytes = bytes.len(), "Stored document");

        Ok(self.url_for(name))
    }

    fn get(&self, name: &str) -> Result<Vec<u8>> {
        validate_name(name)?;

        if let Some(cached) = self.cache.lock().get(name).cloned() {
            return Ok(cached);
        }

        let path = self.document_path(name);
        if !path.exists() {
            return Err(VenueError::DocumentNotFound(name.to_string()));
        }

        let content = Self::read_file(&path)?;
        self.cache.lock().put(name.to_string(), content.clone());
        Ok(content)
    }

    fn list(&self) -> Result<Vec<StoredDocument>> {
        let mut documents = Vec::new();

        for entry in fs::read_dir(&self.path)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(DOCUMENT_EXTENSION) {
                continue;
            }
            if let Some(name) = path.file_stem().and_then(|s| s.to_str()) {
                documents.push(StoredDocument {
                    name: name.to_string(),
                    url: self.url_for(name),
                });
            }
        }

        documents.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(documents)
    }

    fn delete(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        self.cache.lock().pop(name);

        let path = self.document_path(name);
        if path.exists() {
            fs::remove_file(&path)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}
