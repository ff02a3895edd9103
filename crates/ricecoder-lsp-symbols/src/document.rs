//! Open documents and their versions

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use url::Url;
use uuid::Uuid;

use crate::error::{Result, SymbolsError};
use crate::text;

/// `file://` URI of an absolute path
pub fn path_to_uri(path: &Path) -> Result<String> {
    Url::from_file_path(path)
        .map(String::from)
        .map_err(|_| SymbolsError::InvalidArgument(format!("Path is not absolute: {}", path.display())))
}

/// Filesystem path of a `file://` URI
pub fn uri_to_path(uri: &str) -> Result<PathBuf> {
    Url::parse(uri)
        .map_err(|e| SymbolsError::InvalidArgument(format!("Invalid URI {}: {}", uri, e)))?
        .to_file_path()
        .map_err(|_| SymbolsError::InvalidArgument(format!("Not a file URI: {}", uri)))
}

/// Content fingerprint used to notice changes made behind our back
pub fn fingerprint(text: &str) -> u64 {
    fxhash::hash64(text)
}

/// Identifies one booted server; documents must be reopened when it changes
pub type ServerGeneration = (Uuid, u64);

/// A document as the language server sees it
#[derive(Debug, Clone)]
pub struct Document {
    /// Document URI
    pub uri: String,
    /// Absolute filesystem path
    pub path: PathBuf,
    /// `languageId` sent in didOpen
    pub language_id: String,
    /// Bumped by one on every applied or observed change
    pub version: i32,
    /// Full text
    pub text: String,
    /// Fingerprint of `text`
    pub fingerprint: u64,
    /// Server the document is currently open in
    pub(crate) opened_in: Option<ServerGeneration>,
}

impl Document {
    /// A document at version 0
    pub fn new(path: &Path, language_id: impl Into<String>, text: String) -> Result<Self> {
        Ok(Self {
            uri: path_to_uri(path)?,
            path: path.to_path_buf(),
            language_id: language_id.into(),
            version: 0,
            fingerprint: fingerprint(&text),
            text,
            opened_in: None,
        })
    }

    /// Replace the text, bumping the version by one
    pub fn set_text(&mut self, text: String) -> i32 {
        self.fingerprint = fingerprint(&text);
        self.text = text;
        self.version += 1;
        self.version
    }

    /// Number of lines
    pub fn line_count(&self) -> usize {
        text::line_count(&self.text)
    }

    /// `TextDocumentItem` for didOpen
    pub fn text_document_item(&self) -> serde_json::Value {
        serde_json::json!({
            "uri": self.uri,
            "languageId": self.language_id,
            "version": self.version,
            "text": self.text,
        })
    }
}

/// Documents known to one symbol service, keyed by URI
#[derive(Default)]
pub struct DocumentStore {
    documents: RwLock<HashMap<String, Document>>,
}

impl DocumentStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a document
    pub fn get(&self, uri: &str) -> Option<Document> {
        self.documents.read().get(uri).cloned()
    }

    /// Current version of a document
    pub fn version(&self, uri: &str) -> Option<i32> {
        self.documents.read().get(uri).map(|document| document.version)
    }

    /// Insert or replace a document
    pub fn insert(&self, document: Document) {
        self.documents.write().insert(document.uri.clone(), document);
    }

    /// Forget a document
    pub fn remove(&self, uri: &str) -> Option<Document> {
        self.documents.write().remove(uri)
    }

    /// Mutate a document in place
    pub fn update<R>(&self, uri: &str, f: impl FnOnce(&mut Document) -> R) -> Option<R> {
        self.documents.write().get_mut(uri).map(f)
    }

    /// Number of known documents
    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    /// Whether no document is known
    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }
}
