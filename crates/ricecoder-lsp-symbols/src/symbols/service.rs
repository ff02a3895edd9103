//! Symbol queries over one project's language server

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ignore::WalkBuilder;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::cache::{CacheMetrics, SymbolCache};
use super::model::{lines_around, Reference, ReferencingSymbol, Symbol, SymbolKind, SymbolTree};
use super::name_path::NamePathPattern;
use crate::client::capabilities::{Capability, TextSyncKind};
use crate::config::{ConfigLoader, SessionSettings};
use crate::document::{fingerprint, path_to_uri, uri_to_path, Document, DocumentStore};
use crate::error::{Result, SymbolsError};
use crate::events::EventStream;
use crate::process::{ServerLauncher, StdioLauncher};
use crate::session::ServerSession;
use crate::text::{self, Range};
use crate::types::{Project, SessionState};

/// `FileChangeType` values of `workspace/didChangeWatchedFiles`
const FILE_CREATED: u8 = 1;
const FILE_CHANGED: u8 = 2;
const FILE_DELETED: u8 = 3;

/// Symbol requests overtaken by an edit are retried this often
const SYMBOL_FETCH_ATTEMPTS: usize = 3;

/// Filters for [`SymbolService::find_symbol`].
///
/// [`SymbolService::find_referencing_symbols`] honours `within` and the kind
/// filters, applied to the referencing symbols.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// File or directory to search, relative to the project root
    pub within: Option<PathBuf>,
    /// Only these kinds, when non-empty
    pub include_kinds: Vec<SymbolKind>,
    /// Never these kinds; wins over `include_kinds`
    pub exclude_kinds: Vec<SymbolKind>,
    /// Match the last name-path segment by substring
    pub substring: bool,
    /// Levels of children kept on each result
    pub depth: usize,
    /// Attach the source text of each result
    pub include_body: bool,
}

impl FindOptions {
    /// Options restricted to a file or directory
    pub fn within(path: impl Into<PathBuf>) -> Self {
        Self {
            within: Some(path.into()),
            ..Self::default()
        }
    }

    fn allows(&self, kind: SymbolKind) -> bool {
        !self.exclude_kinds.contains(&kind)
            && (self.include_kinds.is_empty() || self.include_kinds.contains(&kind))
    }
}

/// Blocking symbol API for one project.
///
/// The language server session is started on first use. Methods may be
/// called from many threads at once; edits are applied one at a time.
pub struct SymbolService {
    pub(super) project: Project,
    settings: SessionSettings,
    launcher: Arc<dyn ServerLauncher>,
    session: RwLock<Option<Arc<ServerSession>>>,
    session_lock: Mutex<()>,
    pub(super) documents: DocumentStore,
    pub(super) cache: SymbolCache,
    /// Serializes edits
    pub(super) edit_lock: Mutex<()>,
    /// Held while a document's text, disk content and server view change
    pub(super) sync_lock: Mutex<()>,
    closed: AtomicBool,
}

impl SymbolService {
    /// Service for `project`, spawning its server over stdio
    pub fn new(project: Project, settings: SessionSettings) -> Self {
        Self::with_launcher(project, settings, Arc::new(StdioLauncher))
    }

    /// Service starting its server through `launcher`
    pub fn with_launcher(
        project: Project,
        settings: SessionSettings,
        launcher: Arc<dyn ServerLauncher>,
    ) -> Self {
        Self {
            project,
            settings,
            launcher,
            session: RwLock::new(None),
            session_lock: Mutex::new(()),
            documents: DocumentStore::new(),
            cache: SymbolCache::new(),
            edit_lock: Mutex::new(()),
            sync_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    /// Service for `root` configured from the project, user and built-in
    /// configuration
    pub fn open(root: impl AsRef<Path>, language: &str) -> Result<Self> {
        let root = root.as_ref();
        let registry = ConfigLoader::load_hierarchy(root)?;
        let descriptor = registry
            .descriptor_for_language(language)
            .cloned()
            .ok_or_else(|| {
                SymbolsError::ConfigError(format!("No language server configured for {}", language))
            })?;
        Ok(Self::new(Project::new(root, descriptor)?, registry.settings()))
    }

    /// The project served
    pub fn project(&self) -> &Project {
        &self.project
    }

    /// The running session, started on first use.
    ///
    /// A session that stopped for good stays in place until [`restart`].
    ///
    /// [`restart`]: SymbolService::restart
    pub fn session(&self) -> Result<Arc<ServerSession>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SymbolsError::unavailable("symbol service was shut down"));
        }
        if let Some(session) = self.session.read().clone() {
            return usable(session);
        }

        let _guard = self.session_lock.lock();
        if let Some(session) = self.session.read().clone() {
            return usable(session);
        }
        let session = Arc::new(ServerSession::start(
            self.project.clone(),
            self.settings.clone(),
            Arc::clone(&self.launcher),
        )?);
        *self.session.write() = Some(Arc::clone(&session));
        Ok(session)
    }

    /// Lifecycle state of the session, if one was started
    pub fn session_state(&self) -> Option<SessionState> {
        self.session.read().as_ref().map(|session| session.state())
    }

    /// Events of the session, starting it if needed
    pub fn subscribe_events(&self) -> Result<EventStream> {
        Ok(self.session()?.subscribe_events())
    }

    /// Symbol cache counters
    pub fn cache_metrics(&self) -> CacheMetrics {
        self.cache.metrics()
    }

    /// Current version of a file the service has seen
    pub fn document_version(&self, path: impl AsRef<Path>) -> Option<i32> {
        let uri = path_to_uri(&self.project.resolve(path)).ok()?;
        self.documents.version(&uri)
    }

    /// Bring the document at `path` in sync with the disk and the server.
    ///
    /// Content that changed on disk bumps the version; a document not yet
    /// open in the current server is opened.
    pub(super) fn open_document(&self, session: &ServerSession, path: &Path) -> Result<Document> {
        let uri = path_to_uri(path)?;
        let generation = session.generation();

        let _sync = self.sync_lock.lock();
        let text = std::fs::read_to_string(path)?;
        let Some(mut document) = self.documents.get(&uri) else {
            let mut document = Document::new(path, self.project.language(), text)?;
            session.notify(
                "textDocument/didOpen",
                Some(json!({ "textDocument": document.text_document_item() })),
            )?;
            document.opened_in = Some(generation);
            debug!(uri = %uri, "Opened document");
            self.documents.insert(document.clone());
            return Ok(document);
        };

        let open_here = document.opened_in == Some(generation);
        if document.fingerprint != fingerprint(&text) {
            let version = document.set_text(text);
            debug!(uri = %uri, version, "Document changed on disk");
            self.cache.invalidate(&uri);
            if open_here {
                self.send_full_text(session, &document)?;
            }
        }
        if !open_here {
            session.notify(
                "textDocument/didOpen",
                Some(json!({ "textDocument": document.text_document_item() })),
            )?;
            document.opened_in = Some(generation);
            debug!(uri = %uri, version = document.version, "Reopened document in new server");
        }

        self.documents.insert(document.clone());
        Ok(document)
    }

    /// Send the whole text of a document the server already has open
    pub(super) fn send_full_text(&self, session: &ServerSession, document: &Document) -> Result<()> {
        match session.capabilities().text_sync {
            TextSyncKind::None => self.reopen(session, document),
            TextSyncKind::Full | TextSyncKind::Incremental => session.notify(
                "textDocument/didChange",
                Some(json!({
                    "textDocument": { "uri": document.uri, "version": document.version },
                    "contentChanges": [{ "text": document.text }],
                })),
            ),
        }
    }

    pub(super) fn reopen(&self, session: &ServerSession, document: &Document) -> Result<()> {
        session.notify(
            "textDocument/didClose",
            Some(json!({ "textDocument": { "uri": document.uri } })),
        )?;
        session.notify(
            "textDocument/didOpen",
            Some(json!({ "textDocument": document.text_document_item() })),
        )
    }

    /// Symbol tree of one file, from the cache when still current, with the
    /// document snapshot the tree describes
    pub(super) fn document_symbols(
        &self,
        session: &ServerSession,
        path: &Path,
    ) -> Result<(Arc<SymbolTree>, Document)> {
        session.capabilities().require(Capability::DocumentSymbol)?;
        let relative = self.relative(path);

        let mut attempt = 1;
        loop {
            let document = self.open_document(session, path)?;
            let fetched = self.cache.get_or_fetch(&document.uri, document.version, || {
                let result = session.request(
                    "textDocument/documentSymbol",
                    Some(json!({ "textDocument": { "uri": document.uri } })),
                )?;
                // Only store a tree for the version it was requested under.
                match self.documents.version(&document.uri) {
                    Some(current) if current != document.version => {
                        return Err(SymbolsError::StaleEdit {
                            uri: document.uri.clone(),
                            captured: document.version,
                            current,
                        })
                    }
                    _ => {}
                }
                let roots = super::model::parse_document_symbols(&result, &document.uri, &relative, document.version)?;
                Ok(SymbolTree {
                    uri: document.uri.clone(),
                    path: relative.clone(),
                    version: document.version,
                    roots,
                })
            });

            match fetched {
                Ok(tree) => return Ok((tree, document)),
                Err(SymbolsError::StaleEdit { current, .. }) if attempt < SYMBOL_FETCH_ATTEMPTS => {
                    debug!(uri = %document.uri, fetched = document.version, current, "Document changed during symbol request, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub(super) fn relative(&self, path: &Path) -> PathBuf {
        self.project
            .relativize(path)
            .unwrap_or_else(|| path.to_path_buf())
    }

    /// Absolute path of a project file, which must exist
    pub(super) fn existing_file(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let absolute = self.project.resolve(path.as_ref());
        if !absolute.is_file() {
            return Err(SymbolsError::InvalidArgument(format!(
                "Not a file: {}",
                path.as_ref().display()
            )));
        }
        Ok(absolute)
    }

    /// Source files under `dir` the server handles, in path order
    fn walk(&self, dir: &Path) -> Vec<PathBuf> {
        let descriptor = self.project.descriptor().clone();
        let handles = descriptor.clone();

        let mut files: Vec<PathBuf> = WalkBuilder::new(dir)
            .hidden(true)
            .require_git(false)
            .filter_entry(move |entry| {
                let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
                entry.depth() == 0 || !is_dir || !descriptor.is_ignored_dir(&entry.file_name().to_string_lossy())
            })
            .build()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable path");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
            .map(ignore::DirEntry::into_path)
            .filter(|path| handles.handles_path(path))
            .collect();
        files.sort();
        files
    }

    /// Files a workspace symbol query names, inside the project
    fn workspace_files(&self, session: &ServerSession, query: &str) -> Result<Arc<Vec<PathBuf>>> {
        if let Some(files) = self.cache.workspace_get(query) {
            return Ok(files);
        }

        let result = session.request("workspace/symbol", Some(json!({ "query": query })))?;
        let mut files: Vec<PathBuf> = result
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|item| item.pointer("/location/uri").and_then(Value::as_str))
            .filter_map(|uri| uri_to_path(uri).ok())
            .filter(|path| path.starts_with(self.project.root()))
            .filter(|path| self.project.descriptor().handles_path(path))
            .collect();
        files.sort();
        files.dedup();
        Ok(self.cache.workspace_put(query, files))
    }

    fn candidate_files(
        &self,
        session: &ServerSession,
        pattern: &NamePathPattern,
        options: &FindOptions,
    ) -> Result<Vec<PathBuf>> {
        if let Some(within) = &options.within {
            let scope = self.project.resolve(within);
            if scope.is_file() {
                return Ok(vec![scope]);
            }
            if scope.is_dir() {
                return Ok(self.walk(&scope));
            }
            return Err(SymbolsError::InvalidArgument(format!(
                "No such file or directory: {}",
                within.display()
            )));
        }

        if session.capabilities().supports(Capability::WorkspaceSymbol) {
            match self.workspace_files(session, pattern.last_name()) {
                Ok(files) if !files.is_empty() => return Ok(files.as_ref().clone()),
                Ok(_) => debug!(query = %pattern.last_name(), "Workspace symbol query found nothing, walking project"),
                Err(e @ SymbolsError::ServerError { .. }) => {
                    debug!(error = %e, "Workspace symbol query failed, walking project")
                }
                Err(e) => return Err(e),
            }
        }
        Ok(self.walk(self.project.root()))
    }

    /// Symbols matching a name-path pattern.
    ///
    /// Results are grouped by file in path order and listed in document
    /// pre-order within a file. No match is an empty result.
    pub fn find_symbol(&self, pattern: &str, options: &FindOptions) -> Result<Vec<Symbol>> {
        let pattern = NamePathPattern::parse(pattern)?;
        let session = self.session()?;
        let files = self.candidate_files(&session, &pattern, options)?;
        let single_file = files.len() == 1;

        let encoding = session.capabilities().position_encoding;
        let mut found = Vec::new();
        for file in files {
            let (tree, document) = match self.document_symbols(&session, &file) {
                Ok(fetched) => fetched,
                Err(e @ (SymbolsError::Io(_) | SymbolsError::ProtocolError(_))) if !single_file => {
                    warn!(path = %file.display(), error = %e, "Skipping file during symbol search");
                    continue;
                }
                Err(e) => return Err(e),
            };
            found.extend(
                tree.iter()
                    .filter(|symbol| options.allows(symbol.kind) && pattern.matches(symbol, options.substring))
                    .map(|symbol| {
                        let mut symbol = symbol.truncated(options.depth);
                        if options.include_body {
                            symbol.body = text::slice(&document.text, symbol.range, encoding).map(str::to_string);
                        }
                        symbol
                    }),
            );
        }

        debug!(pattern = %pattern.as_str(), matches = found.len(), "find_symbol");
        Ok(found)
    }

    /// The one symbol matching `pattern`, optionally within `file`
    pub fn find_unique(&self, pattern: &str, file: Option<&Path>) -> Result<Symbol> {
        let options = FindOptions {
            within: file.map(Path::to_path_buf),
            ..FindOptions::default()
        };
        let mut found = self.find_symbol(pattern, &options)?;
        let scope = file.map_or_else(|| "project".to_string(), |f| f.display().to_string());

        match found.len() {
            0 => Err(SymbolsError::SymbolNotFound {
                name_path: pattern.to_string(),
                scope,
            }),
            1 => Ok(found.remove(0)),
            count => Err(SymbolsError::AmbiguousSymbol {
                name_path: pattern.to_string(),
                scope,
                count,
            }),
        }
    }

    /// Top-level symbols of a file with children down to `depth` levels
    pub fn symbols_overview(&self, file: impl AsRef<Path>, depth: usize) -> Result<Vec<Symbol>> {
        let path = self.existing_file(file)?;
        let session = self.session()?;
        let (tree, _) = self.document_symbols(&session, &path)?;
        Ok(tree.roots.iter().map(|symbol| symbol.truncated(depth)).collect())
    }

    /// Current source text of a symbol
    pub fn symbol_body(&self, symbol: &Symbol) -> Result<String> {
        let session = self.session()?;
        let document = self.open_document(&session, &self.project.resolve(&symbol.path))?;
        check_version(symbol.document_version, &document)?;
        let encoding = session.capabilities().position_encoding;
        text::slice(&document.text, symbol.range, encoding)
            .map(str::to_string)
            .ok_or(SymbolsError::InvalidPosition {
                uri: document.uri.clone(),
                line: symbol.range.start.line,
                character: symbol.range.start.character,
            })
    }

    /// Locations referring to `symbol`, declaration excluded, in path order.
    ///
    /// Fails with `StaleEdit` when the symbol's document changed since the
    /// symbol was read.
    pub fn find_references(&self, symbol: &Symbol) -> Result<Vec<Reference>> {
        let session = self.session()?;
        session.capabilities().require(Capability::References)?;
        let document = self.open_document(&session, &self.project.resolve(&symbol.path))?;
        check_version(symbol.document_version, &document)?;

        let result = session.request(
            "textDocument/references",
            Some(json!({
                "textDocument": { "uri": document.uri },
                "position": symbol.selection_range.start,
                "context": { "includeDeclaration": false },
            })),
        )?;

        let mut references = Vec::new();
        for location in result.as_array().into_iter().flatten() {
            let (Some(uri), Some(range)) = (location.get("uri").and_then(Value::as_str), location.get("range")) else {
                warn!(location = %location, "Ignoring malformed reference location");
                continue;
            };
            let range: Range = serde_json::from_value(range.clone())?;
            let path = uri_to_path(uri)?;
            references.push(Reference {
                path: self.relative(&path),
                range,
                uri: uri.to_string(),
            });
        }
        references.sort();
        references.dedup();
        Ok(references)
    }

    /// For each reference to `symbol`, the innermost symbol containing it.
    ///
    /// References outside `options.within` or inside a symbol whose kind the
    /// options exclude are skipped.
    pub fn find_referencing_symbols(&self, symbol: &Symbol, options: &FindOptions) -> Result<Vec<ReferencingSymbol>> {
        let references = self.find_references(symbol)?;
        let session = self.session()?;
        let scope = options.within.as_ref().map(|within| self.project.resolve(within));

        let mut found = Vec::new();
        for reference in references {
            let path = self.project.resolve(&reference.path);
            if !path.starts_with(self.project.root()) || !self.project.descriptor().handles_path(&path) {
                continue;
            }
            if scope.as_ref().is_some_and(|scope| !path.starts_with(scope)) {
                continue;
            }
            let (tree, document) = self.document_symbols(&session, &path)?;
            let Some(container) = tree.innermost_containing(reference.range.start) else {
                debug!(path = %reference.path.display(), "Reference outside any symbol");
                continue;
            };
            if !options.allows(container.kind) {
                continue;
            }

            let at = reference.range.start.line;
            found.push(ReferencingSymbol {
                symbol: container.truncated(0),
                line: text::line_text(&document.text, at as usize)
                    .unwrap_or_default()
                    .to_string(),
                context: lines_around(&document.text, at, 1, 1),
                reference,
            });
        }
        Ok(found)
    }

    /// Record a change made to a file outside the service
    pub fn notify_file_changed(&self, path: impl AsRef<Path>) -> Result<()> {
        let absolute = self.project.resolve(path.as_ref());
        let uri = path_to_uri(&absolute)?;
        let session = self.session()?;
        let generation = session.generation();

        let change = {
            let _sync = self.sync_lock.lock();
            match (absolute.is_file(), self.documents.get(&uri)) {
                (false, document) => {
                    if let Some(document) = document.filter(|d| d.opened_in == Some(generation)) {
                        session.notify(
                            "textDocument/didClose",
                            Some(json!({ "textDocument": { "uri": document.uri } })),
                        )?;
                    }
                    self.documents.remove(&uri);
                    FILE_DELETED
                }
                (true, None) => FILE_CREATED,
                (true, Some(mut document)) => {
                    let text = std::fs::read_to_string(&absolute)?;
                    if document.fingerprint != fingerprint(&text) {
                        let version = document.set_text(text);
                        debug!(uri = %uri, version, "External change recorded");
                        if document.opened_in == Some(generation) {
                            self.send_full_text(&session, &document)?;
                        }
                        self.documents.insert(document);
                    }
                    FILE_CHANGED
                }
            }
        };

        self.cache.invalidate(&uri);
        session.notify(
            "workspace/didChangeWatchedFiles",
            Some(json!({ "changes": [{ "uri": uri, "type": change }] })),
        )
    }

    /// Stop the current server and start a fresh one
    pub fn restart(&self) -> Result<()> {
        let _guard = self.session_lock.lock();
        let previous = self.session.write().take();
        if let Some(session) = previous {
            info!(language = %self.project.language(), "Restarting language server");
            if let Err(e) = session.shutdown() {
                warn!(error = %e, "Previous session did not shut down cleanly");
            }
        }
        self.cache.invalidate_all();
        self.closed.store(false, Ordering::SeqCst);
        drop(_guard);

        self.session().map(|_| ())
    }

    /// Stop the server; later calls fail with `ServerUnavailable`
    pub fn shutdown(&self) -> Result<()> {
        let _guard = self.session_lock.lock();
        self.closed.store(true, Ordering::SeqCst);
        let session = self.session.write().take();
        match session {
            Some(session) => session.shutdown(),
            None => Ok(()),
        }
    }
}

/// Fail with `StaleEdit` unless `document` is still at version `captured`
pub(super) fn check_version(captured: i32, document: &Document) -> Result<()> {
    if captured != document.version {
        return Err(SymbolsError::StaleEdit {
            uri: document.uri.clone(),
            captured,
            current: document.version,
        });
    }
    Ok(())
}

fn usable(session: Arc<ServerSession>) -> Result<Arc<ServerSession>> {
    match session.state() {
        state if state.is_terminal() => Err(SymbolsError::unavailable(format!(
            "language server is {}, restart required",
            state
        ))),
        _ => Ok(session),
    }
}
