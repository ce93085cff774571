//! Document Publisher
//!
//! Serializes built records to canonical JSON, assigns each a fresh random
//! identifier and persists it write-once through a [`DocumentStore`].
//!
//! Storage layout for the filesystem store:
//!
//! ```text
//! <content_dir>/
//! ├── 3f2c...e1.json   canonical passport document
//! └── 3f2c...e1.png    code image for the same document
//! ```

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::builder::TargetRecord;
use crate::canonical;
use crate::error::PublishError;

/// Attempts before giving up on finding an unused identifier
const MAX_ID_ATTEMPTS: usize = 3;

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// Random 128-bit document identifier (UUID v4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(Uuid);

impl DocumentId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for DocumentId {
    type Err = PublishError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| PublishError::InvalidIdentifier { id: s.to_string() })
    }
}

/// A persisted record: identifier plus canonical JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedDocument {
    pub id: DocumentId,
    pub json: String,
    /// SHA-256 of `json`
    pub digest: String,
}

impl PublishedDocument {
    pub fn bytes(&self) -> &[u8] {
        self.json.as_bytes()
    }
}

// ============================================================================
// STORES
// ============================================================================

/// Write-once storage keyed by document identifier
pub trait DocumentStore: Send + Sync {
    /// Persist a document. Fails with `AlreadyExists` rather than overwrite.
    fn put_document(&self, id: &DocumentId, json: &[u8]) -> Result<(), PublishError>;

    /// Fetch a document, `NotFound` when absent
    fn get_document(&self, id: &DocumentId) -> Result<Vec<u8>, PublishError>;

    /// Persist the code image for a document, returning where it was stored
    fn put_code(&self, id: &DocumentId, png: &[u8]) -> Result<String, PublishError>;
}

/// One `<id>.json` and one `<id>.png` per document under a content directory
#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    /// Open a store, creating the directory if needed
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, PublishError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| PublishError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn document_path(&self, id: &DocumentId) -> PathBuf {
        self.root.join(format!("{}.json", id))
    }

    pub fn code_path(&self, id: &DocumentId) -> PathBuf {
        self.root.join(format!("{}.png", id))
    }

    fn create_new(&self, id: &DocumentId, path: &Path, bytes: &[u8]) -> Result<(), PublishError> {
        let io = |source| PublishError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(PublishError::AlreadyExists { id: id.to_string() })
            }
            Err(e) => return Err(io(e)),
        };
        let written = file.write_all(bytes).and_then(|()| file.sync_all());
        drop(file);
        discard_on_error(path, written).map_err(io)
    }
}

/// Remove a partially written file so it can never be read back as a document
fn discard_on_error(path: &Path, written: io::Result<()>) -> io::Result<()> {
    if written.is_err() {
        if let Err(e) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "could not remove partial file");
        }
    }
    written
}

impl DocumentStore for FsDocumentStore {
    fn put_document(&self, id: &DocumentId, json: &[u8]) -> Result<(), PublishError> {
        self.create_new(id, &self.document_path(id), json)
    }

    fn get_document(&self, id: &DocumentId) -> Result<Vec<u8>, PublishError> {
        let path = self.document_path(id);
        fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => PublishError::NotFound { id: id.to_string() },
            _ => PublishError::Io { path, source: e },
        })
    }

    fn put_code(&self, id: &DocumentId, png: &[u8]) -> Result<String, PublishError> {
        let path = self.code_path(id);
        self.create_new(id, &path, png)?;
        Ok(path.display().to_string())
    }
}

/// In-process store for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: RwLock<HashMap<DocumentId, Vec<u8>>>,
    codes: RwLock<HashMap<DocumentId, Vec<u8>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document_count(&self) -> usize {
        self.documents.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn code(&self, id: &DocumentId) -> Option<Vec<u8>> {
        self.codes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }
}

fn insert_once(
    map: &RwLock<HashMap<DocumentId, Vec<u8>>>,
    id: &DocumentId,
    bytes: &[u8],
) -> Result<(), PublishError> {
    let mut guard = map.write().unwrap_or_else(|e| e.into_inner());
    if guard.contains_key(id) {
        return Err(PublishError::AlreadyExists { id: id.to_string() });
    }
    guard.insert(*id, bytes.to_vec());
    Ok(())
}

impl DocumentStore for MemoryDocumentStore {
    fn put_document(&self, id: &DocumentId, json: &[u8]) -> Result<(), PublishError> {
        insert_once(&self.documents, id, json)
    }

    fn get_document(&self, id: &DocumentId) -> Result<Vec<u8>, PublishError> {
        self.documents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| PublishError::NotFound { id: id.to_string() })
    }

    fn put_code(&self, id: &DocumentId, png: &[u8]) -> Result<String, PublishError> {
        insert_once(&self.codes, id, png)?;
        Ok(format!("memory://{}.png", id))
    }
}

// ============================================================================
// PUBLISHER
// ============================================================================

/// Publishes records into a store. Cheap to clone, safe to share.
#[derive(Clone)]
pub struct DocumentPublisher {
    store: Arc<dyn DocumentStore>,
}

impl DocumentPublisher {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Serialize, assign a fresh identifier and persist
    pub fn publish(&self, record: &TargetRecord) -> Result<PublishedDocument, PublishError> {
        let json = canonical::to_canonical_string(record)?;
        let digest = canonical::sha256_hex(json.as_bytes());

        for attempt in 1..=MAX_ID_ATTEMPTS {
            let id = DocumentId::new_random();
            match self.store.put_document(&id, json.as_bytes()) {
                Ok(()) => {
                    info!(
                        document_id = %id,
                        row = record.row(),
                        bytes = json.len(),
                        "published passport document"
                    );
                    return Ok(PublishedDocument { id, json, digest });
                }
                Err(PublishError::AlreadyExists { .. }) => {
                    warn!(document_id = %id, attempt, "identifier already taken, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        Err(PublishError::IdentifierExhausted {
            attempts: MAX_ID_ATTEMPTS,
        })
    }

    /// Retrieve canonical JSON by identifier string
    pub fn get(&self, id: &str) -> Result<Vec<u8>, PublishError> {
        let id: DocumentId = id.trim().parse()?;
        self.store.get_document(&id)
    }

    /// Store the code image next to its document
    pub fn attach_code(&self, id: &DocumentId, png: &[u8]) -> Result<String, PublishError> {
        self.store.put_code(id, png)
    }
}

impl fmt::Debug for DocumentPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentPublisher").finish_non_exhaustive()
    }
}
