//! In-process language server for a toy brace language.
//!
//! Toy files (`*.toy`) declare `class NAME {` and `fn NAME() {` blocks that
//! end at a line holding `}`. The server answers the requests the symbol
//! service sends from the text it was told about, reading other project
//! files from disk like a real server would.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use ricecoder_lsp_symbols::client::PositionEncoding;
use ricecoder_lsp_symbols::document::{path_to_uri, uri_to_path};
use ricecoder_lsp_symbols::process::{LaunchedServer, ServerLauncher};
use ricecoder_lsp_symbols::text::{self, Position, Range};
use ricecoder_lsp_symbols::transport::{encode, read_frame};
use ricecoder_lsp_symbols::{
    Project, ServerDescriptor, SessionSettings, SymbolService, SymbolsError,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{duplex, split, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// What the fake server advertises and how it misbehaves
#[derive(Debug, Clone)]
pub struct FakeConfig {
    /// `textDocumentSync` kind: 1 full, 2 incremental
    pub sync_kind: u64,
    pub references: bool,
    pub rename: bool,
    pub workspace_symbol: bool,
    /// Methods that never get a reply
    pub silent_methods: Vec<String>,
    /// Delay before answering `textDocument/documentSymbol`
    pub symbol_delay: Duration,
}

impl Default for FakeConfig {
    fn default() -> Self {
        Self {
            sync_kind: 2,
            references: true,
            rename: true,
            workspace_symbol: true,
            silent_methods: Vec::new(),
            symbol_delay: Duration::ZERO,
        }
    }
}

/// Observations shared by every server the launcher starts
#[derive(Default)]
pub struct FakeServer {
    config: Mutex<FakeConfig>,
    root: Mutex<Option<PathBuf>>,
    /// Text of the documents open in the current server
    open: Mutex<HashMap<String, String>>,
    requests: Mutex<HashMap<String, usize>>,
    /// (launch, method, uri, version) of every didOpen and didChange
    syncs: Mutex<Vec<(usize, String, String, i64)>>,
    notifications: Mutex<Vec<String>>,
    launches: AtomicUsize,
    failing_launches: AtomicUsize,
    crash: Mutex<Option<CancellationToken>>,
}

impl FakeServer {
    pub fn new(config: FakeConfig) -> Arc<Self> {
        let server = Self::default();
        *server.config.lock() = config;
        Arc::new(server)
    }

    pub fn configure(&self, f: impl FnOnce(&mut FakeConfig)) {
        f(&mut self.config.lock());
    }

    /// Requests received for `method` across all launches
    pub fn request_count(&self, method: &str) -> usize {
        self.requests.lock().get(method).copied().unwrap_or(0)
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Make the next `count` launches fail to spawn
    pub fn fail_launches(&self, count: usize) {
        self.failing_launches.store(count, Ordering::SeqCst);
    }

    /// Drop the connection of the running server
    pub fn crash(&self) {
        if let Some(token) = self.crash.lock().take() {
            token.cancel();
        }
    }

    /// The current server's view of a file
    pub fn open_text(&self, path: &Path) -> Option<String> {
        let uri = path_to_uri(path).ok()?;
        self.open.lock().get(&uri).cloned()
    }

    /// Versions synced for one file, per launch, in arrival order
    pub fn versions(&self, path: &Path) -> Vec<(usize, i64)> {
        let uri = path_to_uri(path).unwrap();
        self.syncs
            .lock()
            .iter()
            .filter(|(_, _, u, _)| *u == uri)
            .map(|(launch, _, _, version)| (*launch, *version))
            .collect()
    }

    /// Number of didOpen notifications for one file
    pub fn open_count(&self, path: &Path) -> usize {
        let uri = path_to_uri(path).unwrap();
        self.syncs
            .lock()
            .iter()
            .filter(|(_, method, u, _)| *u == uri && method == "textDocument/didOpen")
            .count()
    }

    /// Notification methods received, in order
    pub fn notifications(&self) -> Vec<String> {
        self.notifications.lock().clone()
    }

    fn capabilities(&self) -> Value {
        let config = self.config.lock();
        json!({
            "textDocumentSync": { "openClose": true, "change": config.sync_kind },
            "documentSymbolProvider": true,
            "referencesProvider": config.references,
            "renameProvider": config.rename,
            "workspaceSymbolProvider": config.workspace_symbol,
        })
    }

    fn file_text(&self, uri: &str) -> Option<String> {
        if let Some(text) = self.open.lock().get(uri) {
            return Some(text.clone());
        }
        std::fs::read_to_string(uri_to_path(uri).ok()?).ok()
    }

    /// Every toy file of the project, as URIs in path order
    fn project_uris(&self) -> Vec<String> {
        let Some(root) = self.root.lock().clone() else {
            return Vec::new();
        };
        let mut files = Vec::new();
        collect_toy_files(&root, &mut files);
        files.sort();
        files.iter().filter_map(|path| path_to_uri(path).ok()).collect()
    }

    fn handle_notification(&self, launch: usize, method: &str, params: &Value) {
        self.notifications.lock().push(method.to_string());
        let uri = params
            .pointer("/textDocument/uri")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let version = params
            .pointer("/textDocument/version")
            .and_then(Value::as_i64)
            .unwrap_or(-1);

        match method {
            "textDocument/didOpen" => {
                let text = params
                    .pointer("/textDocument/text")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                self.open.lock().insert(uri.clone(), text.to_string());
                self.syncs.lock().push((launch, method.to_string(), uri, version));
            }
            "textDocument/didChange" => {
                let mut open = self.open.lock();
                let Some(current) = open.get_mut(&uri) else {
                    panic!("didChange for a document that is not open: {}", uri);
                };
                for change in params["contentChanges"].as_array().into_iter().flatten() {
                    let new_text = change["text"].as_str().unwrap_or_default();
                    *current = match change.get("range") {
                        Some(range) => {
                            let range: Range = serde_json::from_value(range.clone()).unwrap();
                            text::replace_range(current, range, new_text, PositionEncoding::Utf16)
                                .expect("incremental change outside the document")
                        }
                        None => new_text.to_string(),
                    };
                }
                drop(open);
                self.syncs.lock().push((launch, method.to_string(), uri, version));
            }
            "textDocument/didClose" => {
                self.open.lock().remove(&uri);
            }
            _ => {}
        }
    }

    fn handle_request(&self, method: &str, params: &Value) -> std::result::Result<Value, (i64, String)> {
        match method {
            "initialize" => {
                if let Some(path) = params
                    .get("rootUri")
                    .and_then(Value::as_str)
                    .and_then(|uri| uri_to_path(uri).ok())
                {
                    *self.root.lock() = Some(path);
                }
                Ok(json!({
                    "capabilities": self.capabilities(),
                    "serverInfo": { "name": "toy-ls", "version": "0.1" },
                }))
            }
            "shutdown" => Ok(Value::Null),
            "textDocument/documentSymbol" => {
                let uri = params.pointer("/textDocument/uri").and_then(Value::as_str).unwrap_or_default();
                let text = self.file_text(uri).ok_or((-32602, format!("unknown document {}", uri)))?;
                Ok(Value::Array(document_symbols(&text)))
            }
            "workspace/symbol" => {
                let query = params["query"].as_str().unwrap_or_default();
                let mut found = Vec::new();
                for uri in self.project_uris() {
                    let text = self.file_text(&uri).unwrap_or_default();
                    flatten_symbols(&document_symbols(&text), &uri, query, &mut found);
                }
                Ok(Value::Array(found))
            }
            "textDocument/references" => {
                let (word, _) = self.word_at(params)?;
                let include_declaration = params
                    .pointer("/context/includeDeclaration")
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                let mut locations = Vec::new();
                for uri in self.project_uris() {
                    let text = self.file_text(&uri).unwrap_or_default();
                    for (range, declaration) in occurrences(&text, &word) {
                        if include_declaration || !declaration {
                            locations.push(json!({ "uri": uri, "range": range }));
                        }
                    }
                }
                Ok(Value::Array(locations))
            }
            "textDocument/rename" => {
                let (word, _) = self.word_at(params)?;
                let new_name = params["newName"].as_str().unwrap_or_default();
                let mut changes = BTreeMap::new();
                for uri in self.project_uris() {
                    let text = self.file_text(&uri).unwrap_or_default();
                    let edits: Vec<Value> = occurrences(&text, &word)
                        .into_iter()
                        .map(|(range, _)| json!({ "range": range, "newText": new_name }))
                        .collect();
                    if !edits.is_empty() {
                        changes.insert(uri, Value::Array(edits));
                    }
                }
                Ok(json!({ "changes": changes }))
            }
            other => Err((-32601, format!("method not found: {}", other))),
        }
    }

    fn word_at(&self, params: &Value) -> std::result::Result<(String, Position), (i64, String)> {
        let uri = params.pointer("/textDocument/uri").and_then(Value::as_str).unwrap_or_default();
        let position: Position = serde_json::from_value(params["position"].clone())
            .map_err(|e| (-32602, e.to_string()))?;
        let text = self.file_text(uri).ok_or((-32602, format!("unknown document {}", uri)))?;
        let line = text::line_text(&text, position.line as usize).unwrap_or_default();
        word_at(line, position.character as usize)
            .map(|word| (word, position))
            .ok_or((-32602, "no identifier at position".to_string()))
    }
}

fn collect_toy_files(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_toy_files(&path, files);
        } else if path.extension().is_some_and(|ext| ext == "toy") {
            files.push(path);
        }
    }
}

fn is_ident(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

fn word_at(line: &str, column: usize) -> Option<String> {
    let chars: Vec<char> = line.chars().collect();
    if column >= chars.len() || !is_ident(chars[column]) {
        return None;
    }
    let start = (0..=column).rev().take_while(|&i| is_ident(chars[i])).last()?;
    let end = (column..chars.len()).take_while(|&i| is_ident(chars[i])).last()? + 1;
    Some(chars[start..end].iter().collect())
}

/// Whole-word occurrences of `word`, flagged when they are a declaration
fn occurrences(text: &str, word: &str) -> Vec<(Range, bool)> {
    let mut found = Vec::new();
    for (line_no, line) in text.split('\n').enumerate() {
        let mut from = 0;
        while let Some(index) = line[from..].find(word) {
            let start = from + index;
            let end = start + word.len();
            let before = line[..start].chars().last();
            let after = line[end..].chars().next();
            if !before.is_some_and(is_ident) && !after.is_some_and(is_ident) {
                let prefix = line[..start].trim_end();
                let declaration = prefix.ends_with("fn") || prefix.ends_with("class");
                let range = Range::new(
                    Position::new(line_no as u32, start as u32),
                    Position::new(line_no as u32, end as u32),
                );
                found.push((range, declaration));
            }
            from = end;
        }
    }
    found
}

struct OpenBlock {
    name: String,
    kind: u64,
    start: Position,
    selection: Range,
    children: Vec<Value>,
}

/// Hierarchical `DocumentSymbol`s of a toy file
pub fn document_symbols(text: &str) -> Vec<Value> {
    let mut stack: Vec<OpenBlock> = Vec::new();
    let mut roots = Vec::new();

    for (line_no, line) in text.split('\n').enumerate() {
        let line_no = line_no as u32;
        let trimmed = line.trim_start();
        let indent = (line.len() - trimmed.len()) as u32;

        let declaration = ["class ", "fn "]
            .iter()
            .find(|keyword| trimmed.starts_with(**keyword))
            .filter(|_| trimmed.trim_end().ends_with('{'));
        if let Some(keyword) = declaration {
            let rest = &trimmed[keyword.len()..];
            let name: String = rest.chars().take_while(|ch| is_ident(*ch)).collect();
            let name_start = indent + keyword.len() as u32;
            let kind = match (*keyword, stack.last()) {
                ("class ", _) => 5,
                (_, Some(parent)) if parent.kind == 5 => 6,
                _ => 12,
            };
            stack.push(OpenBlock {
                selection: Range::new(
                    Position::new(line_no, name_start),
                    Position::new(line_no, name_start + name.len() as u32),
                ),
                name,
                kind,
                start: Position::new(line_no, indent),
                children: Vec::new(),
            });
        } else if trimmed.trim_end() == "}" {
            let Some(block) = stack.pop() else {
                continue;
            };
            let symbol = json!({
                "name": block.name,
                "kind": block.kind,
                "range": Range::new(block.start, Position::new(line_no, indent + 1)),
                "selectionRange": block.selection,
                "children": block.children,
            });
            match stack.last_mut() {
                Some(parent) => parent.children.push(symbol),
                None => roots.push(symbol),
            }
        }
    }
    roots
}

fn flatten_symbols(symbols: &[Value], uri: &str, query: &str, out: &mut Vec<Value>) {
    for symbol in symbols {
        let name = symbol["name"].as_str().unwrap_or_default();
        if name.contains(query) {
            out.push(json!({
                "name": name,
                "kind": symbol["kind"],
                "location": { "uri": uri, "range": symbol["range"] },
            }));
        }
        if let Some(children) = symbol["children"].as_array() {
            flatten_symbols(children, uri, query, out);
        }
    }
}

async fn serve(server: Arc<FakeServer>, launch: usize, stream: DuplexStream, crash: CancellationToken) {
    let (read, mut write) = split(stream);
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();

    let writer_crash = crash.clone();
    let writer = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                _ = writer_crash.cancelled() => break,
                message = rx.recv() => message,
            };
            let Some(message) = message else {
                break;
            };
            let frame = encode(&serde_json::to_vec(&message).unwrap());
            if write.write_all(&frame).await.is_err() {
                break;
            }
        }
    });

    let mut reader = BufReader::new(read);
    loop {
        let frame = tokio::select! {
            _ = crash.cancelled() => break,
            frame = read_frame(&mut reader) => frame,
        };
        let Ok(Some(payload)) = frame else {
            break;
        };
        let message: Value = serde_json::from_slice(&payload).unwrap();
        let method = message["method"].as_str().unwrap_or_default().to_string();
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        let Some(id) = message.get("id").cloned() else {
            server.handle_notification(launch, &method, &params);
            if method == "initialized" {
                let _ = tx.send(json!({
                    "jsonrpc": "2.0",
                    "method": "window/logMessage",
                    "params": { "type": 3, "message": "toy-ls ready" },
                }));
            }
            if method == "textDocument/didOpen" {
                let _ = tx.send(json!({
                    "jsonrpc": "2.0",
                    "method": "textDocument/publishDiagnostics",
                    "params": {
                        "uri": params["textDocument"]["uri"],
                        "version": params["textDocument"]["version"],
                        "diagnostics": [],
                    },
                }));
            }
            if method == "exit" {
                break;
            }
            continue;
        };

        *server.requests.lock().entry(method.clone()).or_default() += 1;
        let (silent, delay) = {
            let config = server.config.lock();
            let delay = if method == "textDocument/documentSymbol" {
                config.symbol_delay
            } else {
                Duration::ZERO
            };
            (config.silent_methods.contains(&method), delay)
        };
        if silent {
            continue;
        }

        let reply = match server.handle_request(&method, &params) {
            Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Err((code, text)) => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": code, "message": text },
            }),
        };
        if delay.is_zero() {
            let _ = tx.send(reply);
        } else {
            let tx = tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(reply);
            });
        }
    }

    drop(reader);
    drop(tx);
    let _ = writer.await;
}

/// Starts an in-process [`FakeServer`] for every launch
pub struct FakeLauncher {
    pub server: Arc<FakeServer>,
}

impl ServerLauncher for FakeLauncher {
    fn launch(&self, _descriptor: &ServerDescriptor, _root: &Path) -> ricecoder_lsp_symbols::Result<LaunchedServer> {
        let failing = self.server.failing_launches.load(Ordering::SeqCst);
        if failing > 0 {
            self.server.failing_launches.store(failing - 1, Ordering::SeqCst);
            return Err(SymbolsError::SpawnFailed(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "toy-ls not installed",
            )));
        }

        let launch = self.server.launches.fetch_add(1, Ordering::SeqCst) + 1;
        self.server.open.lock().clear();
        let crash = CancellationToken::new();
        *self.server.crash.lock() = Some(crash.clone());

        let (client, server_end) = duplex(1 << 20);
        tokio::spawn(serve(Arc::clone(&self.server), launch, server_end, crash));

        let (stdout, stdin) = split(client);
        Ok(LaunchedServer {
            stdin: Box::pin(stdin),
            stdout: Box::pin(stdout),
            process: None,
        })
    }
}

/// A temporary toy project served through a [`FakeServer`]
pub struct Fixture {
    pub dir: TempDir,
    pub server: Arc<FakeServer>,
    pub service: SymbolService,
}

impl Fixture {
    pub fn new(files: &[(&str, &str)]) -> Self {
        Self::with_config(files, FakeConfig::default())
    }

    pub fn with_config(files: &[(&str, &str)], config: FakeConfig) -> Self {
        Self::with_settings(files, config, test_settings())
    }

    pub fn with_settings(files: &[(&str, &str)], config: FakeConfig, settings: SessionSettings) -> Self {
        Self::with_descriptor(files, config, settings, toy_descriptor())
    }

    pub fn with_descriptor(
        files: &[(&str, &str)],
        config: FakeConfig,
        settings: SessionSettings,
        descriptor: ServerDescriptor,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        for (path, content) in files {
            let path = dir.path().join(path);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }

        let server = FakeServer::new(config);
        let project = Project::new(dir.path(), descriptor).unwrap();
        let service = SymbolService::with_launcher(
            project,
            settings,
            Arc::new(FakeLauncher {
                server: Arc::clone(&server),
            }),
        );
        Self { dir, server, service }
    }

    /// Absolute path of a project file
    pub fn path(&self, relative: &str) -> PathBuf {
        self.service.project().resolve(relative)
    }

    pub fn read(&self, relative: &str) -> String {
        std::fs::read_to_string(self.path(relative)).unwrap()
    }

    pub fn write(&self, relative: &str, content: &str) {
        std::fs::write(self.path(relative), content).unwrap();
    }

    /// Assert the server's view of a file equals the disk
    pub fn assert_in_sync(&self, relative: &str) {
        let path = self.path(relative);
        assert_eq!(
            self.server.open_text(&path).as_deref(),
            Some(std::fs::read_to_string(&path).unwrap().as_str()),
            "server view of {} diverged from disk",
            relative
        );
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

pub fn toy_descriptor() -> ServerDescriptor {
    ServerDescriptor::new("toy", "toy-ls", ["toy"])
}

pub fn test_settings() -> SessionSettings {
    SessionSettings {
        request_timeout_ms: 2_000,
        startup_timeout_ms: 2_000,
        shutdown_timeout_ms: 500,
        restart_backoff_base_ms: 10,
        restart_backoff_max_ms: 50,
        ..SessionSettings::default()
    }
}

pub const GREETER: &str = "\
class Greeter {
    fn greet() {
        hello
    }

    fn wave() {
        greet
    }
}

fn main() {
    greet
}
";

pub const CALLER: &str = "\
fn call_twice() {
    greet
    greet
}
";
