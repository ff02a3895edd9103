//! Structural edits relative to symbols
//!
//! Every edit is checked against the document version its symbol was read
//! from, written to disk, bumps the document version by one, drops the
//! document's cached symbols and is forwarded to the server.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tracing::{debug, warn};

use super::model::Symbol;
use super::service::{check_version, SymbolService};
use crate::client::capabilities::{Capability, TextSyncKind};
use crate::document::{uri_to_path, Document};
use crate::error::{Result, SymbolsError};
use crate::session::ServerSession;
use crate::text::{self, Position, Range, TextEdit};

/// Where an edit landed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditOutcome {
    /// Project-relative path of the edited file
    pub path: PathBuf,
    /// Document version after the edit
    pub version: i32,
}

/// Files touched by a rename
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenameOutcome {
    /// One entry per edited file, in URI order
    pub files: Vec<EditOutcome>,
    /// Total number of text edits applied
    pub edits: usize,
}

impl SymbolService {
    /// Replace the whole definition of `symbol` with `body`
    pub fn replace_symbol_body(&self, symbol: &Symbol, body: &str) -> Result<EditOutcome> {
        self.edit_symbol(symbol, |_| {
            Ok(TextEdit {
                range: symbol.range,
                new_text: body.trim().to_string(),
            })
        })
    }

    /// Insert `content` on its own lines just before `symbol`.
    ///
    /// When a blank line precedes the symbol, at least one blank line
    /// separates the inserted text from it.
    pub fn insert_before_symbol(&self, symbol: &Symbol, content: &str) -> Result<EditOutcome> {
        self.edit_symbol(symbol, |document| {
            let line = symbol.range.start.line;
            let separated = line > 0 && is_blank_line(&document.text, line - 1);
            let at = Position::new(line, 0);
            Ok(TextEdit {
                range: Range::new(at, at),
                new_text: indent_like(&document.text, line, &text_before(content, usize::from(separated))),
            })
        })
    }

    /// Insert `content` on its own lines just after `symbol`.
    ///
    /// When a blank line follows the symbol, at least one blank line
    /// separates the symbol from the inserted text.
    pub fn insert_after_symbol(&self, symbol: &Symbol, content: &str) -> Result<EditOutcome> {
        self.edit_symbol(symbol, |document| {
            let next = symbol.range.end.line + 1;
            let separated = is_blank_line(&document.text, next);
            let at = Position::new(next, 0);
            Ok(TextEdit {
                range: Range::new(at, at),
                new_text: indent_like(
                    &document.text,
                    symbol.range.start.line,
                    &text_after(content, usize::from(separated)),
                ),
            })
        })
    }

    /// Remove the definition of `symbol`
    pub fn delete_symbol(&self, symbol: &Symbol) -> Result<EditOutcome> {
        self.edit_symbol(symbol, |_| {
            Ok(TextEdit {
                range: symbol.range,
                new_text: String::new(),
            })
        })
    }

    /// Insert `content` at the start of `line` (zero-based). The line just
    /// past the end of the file is accepted.
    pub fn insert_at_line(&self, file: impl AsRef<Path>, line: u32, content: &str) -> Result<EditOutcome> {
        let path = self.existing_file(file)?;
        self.edit_file(&path, None, |document| {
            if line as usize > document.line_count() {
                return Err(invalid_position(document, Position::new(line, 0)));
            }
            let at = Position::new(line, 0);
            Ok(TextEdit {
                range: Range::new(at, at),
                new_text: content.to_string(),
            })
        })
    }

    /// Delete lines `start..=end` (zero-based)
    pub fn delete_lines(&self, file: impl AsRef<Path>, start: u32, end: u32) -> Result<EditOutcome> {
        let path = self.existing_file(file)?;
        self.edit_file(&path, None, |document| {
            let count = document.line_count() as u32;
            if start > end || end >= count {
                return Err(invalid_position(document, Position::new(end, 0)));
            }
            let stop = if end + 1 < count {
                Position::new(end + 1, 0)
            } else {
                Position::new(end, u32::MAX)
            };
            Ok(TextEdit {
                range: Range::new(Position::new(start, 0), stop),
                new_text: String::new(),
            })
        })
    }

    /// Rename `symbol` everywhere the server knows it is used
    pub fn rename_symbol(&self, symbol: &Symbol, new_name: &str) -> Result<RenameOutcome> {
        if new_name.trim().is_empty() {
            return Err(SymbolsError::InvalidArgument("New name is empty".to_string()));
        }

        let _edit = self.edit_lock.lock();
        let session = self.session()?;
        let capabilities = session.capabilities();
        capabilities.require(Capability::Rename)?;

        let document = self.open_document(&session, &self.project.resolve(&symbol.path))?;
        check_version(symbol.document_version, &document)?;

        let result = session.request(
            "textDocument/rename",
            Some(json!({
                "textDocument": { "uri": document.uri },
                "position": symbol.selection_range.start,
                "newName": new_name,
            })),
        )?;

        let mut planned = Vec::new();
        for (uri, edits) in workspace_edit_changes(&result)? {
            let document = self.open_document(&session, &uri_to_path(&uri)?)?;
            let new_text = text::apply_edits(&document.text, &edits, capabilities.position_encoding)
                .ok_or_else(|| {
                    SymbolsError::ProtocolError(format!("Rename returned unusable edits for {}", uri))
                })?;
            planned.push((document, edits, new_text));
        }

        let mut outcome = RenameOutcome::default();
        for (document, edits, new_text) in planned {
            let single = match edits.as_slice() {
                [edit] => Some(edit),
                _ => None,
            };
            let version = self.commit(&session, &document, new_text, single)?;
            outcome.edits += edits.len();
            outcome.files.push(EditOutcome {
                path: self.relative(&document.path),
                version,
            });
        }

        self.cache.invalidate_all();
        debug!(
            name = %symbol.name,
            new_name = %new_name,
            files = outcome.files.len(),
            edits = outcome.edits,
            "Renamed symbol"
        );
        Ok(outcome)
    }

    fn edit_symbol<F>(&self, symbol: &Symbol, plan: F) -> Result<EditOutcome>
    where
        F: FnOnce(&Document) -> Result<TextEdit>,
    {
        let path = self.project.resolve(&symbol.path);
        self.edit_file(&path, Some(symbol.document_version), plan)
    }

    fn edit_file<F>(&self, path: &Path, captured: Option<i32>, plan: F) -> Result<EditOutcome>
    where
        F: FnOnce(&Document) -> Result<TextEdit>,
    {
        let _edit = self.edit_lock.lock();
        let session = self.session()?;
        let document = self.open_document(&session, path)?;
        if let Some(captured) = captured {
            check_version(captured, &document)?;
        }

        let edit = plan(&document)?;
        let encoding = session.capabilities().position_encoding;
        let new_text = text::apply_edit(&document.text, &edit, encoding)
            .ok_or_else(|| invalid_position(&document, edit.range.start))?;

        let version = self.commit(&session, &document, new_text, Some(&edit))?;
        Ok(EditOutcome {
            path: self.relative(path),
            version,
        })
    }

    /// Write the new text, bump the version and tell the server.
    ///
    /// A server that cannot be told keeps the document marked unopened so it
    /// receives the full text on next use.
    fn commit(
        &self,
        session: &ServerSession,
        document: &Document,
        new_text: String,
        edit: Option<&TextEdit>,
    ) -> Result<i32> {
        let _sync = self.sync_lock.lock();
        std::fs::write(&document.path, &new_text)?;

        let updated = self
            .documents
            .update(&document.uri, |stored| {
                stored.set_text(new_text);
                stored.clone()
            })
            .ok_or_else(|| SymbolsError::InvalidState(format!("{} is not open", document.uri)))?;
        self.cache.invalidate(&document.uri);

        if updated.opened_in != Some(session.generation()) {
            return Ok(updated.version);
        }

        let capabilities = session.capabilities();
        let incremental = edit.filter(|edit| {
            capabilities.text_sync == TextSyncKind::Incremental
                && text::offset_at(&document.text, edit.range.start, capabilities.position_encoding).is_some()
        });
        let synced = match incremental {
            Some(edit) => session.notify(
                "textDocument/didChange",
                Some(json!({
                    "textDocument": { "uri": updated.uri, "version": updated.version },
                    "contentChanges": [{ "range": edit.range, "text": edit.new_text }],
                })),
            ),
            None => self.send_full_text(session, &updated),
        };

        if let Err(e) = synced {
            warn!(uri = %updated.uri, error = %e, "Could not forward edit to language server");
            self.documents.update(&updated.uri, |stored| stored.opened_in = None);
        }
        Ok(updated.version)
    }
}

fn invalid_position(document: &Document, position: Position) -> SymbolsError {
    SymbolsError::InvalidPosition {
        uri: document.uri.clone(),
        line: position.line,
        character: position.character,
    }
}

/// Whether `line` is blank and followed by more of the file.
///
/// The empty line after a final newline is not a separator.
fn is_blank_line(document_text: &str, line: u32) -> bool {
    let line = line as usize;
    line + 1 < text::line_count(document_text)
        && text::line_text(document_text, line).is_some_and(|l| l.trim().is_empty())
}

/// Content for insertion before a symbol: trailing whitespace trimmed, then
/// the blank lines the caller gave, at least `min_blank`
fn text_before(content: &str, min_blank: usize) -> String {
    let body = content.trim_end();
    let requested = content[body.len()..].matches('\n').count().saturating_sub(1);
    format!("{}\n{}", body, "\n".repeat(requested.max(min_blank)))
}

/// Content for insertion after a symbol: the leading blank lines the caller
/// gave, at least `min_blank`, and exactly one trailing line break
fn text_after(content: &str, min_blank: usize) -> String {
    let body = content.trim_start_matches(['\r', '\n']);
    let requested = content[..content.len() - body.len()].matches('\n').count();
    format!("{}{}\n", "\n".repeat(requested.max(min_blank)), body.trim_end())
}

/// Indent `inserted` like the symbol's line when the caller gave none
fn indent_like(document_text: &str, line: u32, inserted: &str) -> String {
    let indent = text::line_text(document_text, line as usize)
        .map(text::leading_whitespace)
        .unwrap_or("");
    let unindented = inserted
        .lines()
        .find(|l| !l.trim().is_empty())
        .is_some_and(|first| text::leading_whitespace(first).is_empty());

    if indent.is_empty() || !unindented {
        return inserted.to_string();
    }

    inserted
        .split('\n')
        .map(|l| {
            if l.trim().is_empty() {
                l.to_string()
            } else {
                format!("{}{}", indent, l)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Per-document edits of a `WorkspaceEdit`, in URI order
fn workspace_edit_changes(edit: &Value) -> Result<Vec<(String, Vec<TextEdit>)>> {
    let mut changes: BTreeMap<String, Vec<TextEdit>> = BTreeMap::new();

    if let Some(document_changes) = edit.get("documentChanges").and_then(Value::as_array) {
        for change in document_changes {
            if let Some(kind) = change.get("kind").and_then(Value::as_str) {
                warn!(kind = %kind, "Skipping file operation in workspace edit");
                continue;
            }
            let uri = change
                .pointer("/textDocument/uri")
                .and_then(Value::as_str)
                .ok_or_else(|| SymbolsError::ProtocolError("Text document edit without uri".to_string()))?;
            let edits: Vec<TextEdit> =
                serde_json::from_value(change.get("edits").cloned().unwrap_or(Value::Array(Vec::new())))?;
            changes.entry(uri.to_string()).or_default().extend(edits);
        }
    } else if let Some(by_uri) = edit.get("changes").and_then(Value::as_object) {
        for (uri, edits) in by_uri {
            let edits: Vec<TextEdit> = serde_json::from_value(edits.clone())?;
            changes.entry(uri.clone()).or_default().extend(edits);
        }
    }

    Ok(changes.into_iter().filter(|(_, edits)| !edits.is_empty()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_before_keeps_requested_blank_lines() {
        assert_eq!(text_before("# note", 0), "# note\n");
        assert_eq!(text_before("# note\n", 0), "# note\n");
        assert_eq!(text_before("# note\n\n", 0), "# note\n\n");
        assert_eq!(text_before("# note  \n", 0), "# note\n");
    }

    #[test]
    fn test_text_before_adds_minimum_separation() {
        assert_eq!(text_before("fn f() {\n}", 1), "fn f() {\n}\n\n");
        assert_eq!(text_before("fn f() {\n}\n", 1), "fn f() {\n}\n\n");
        assert_eq!(text_before("fn f() {\n}\n\n\n", 1), "fn f() {\n}\n\n\n");
    }

    #[test]
    fn test_text_after_keeps_leading_blank_lines() {
        assert_eq!(text_after("\n# note", 0), "\n# note\n");
        assert_eq!(text_after("x\n\n\n", 0), "x\n");
        assert_eq!(text_after("x", 1), "\nx\n");
        assert_eq!(text_after("\n\nx", 1), "\n\nx\n");
    }

    #[test]
    fn test_blank_line_detection() {
        let document = "fn a() {\n}\n\nfn b() {\n}\n";
        assert!(!is_blank_line(document, 1));
        assert!(is_blank_line(document, 2));
        // The empty tail after the last newline separates nothing.
        assert!(!is_blank_line(document, 5));
        assert!(!is_blank_line(document, 9));
    }

    #[test]
    fn test_indent_like_symbol_line() {
        let document = "class A:\n    def f(self):\n        pass\n";
        assert_eq!(
            indent_like(document, 1, "def g(self):\n    pass\n"),
            "    def g(self):\n        pass\n"
        );
        // Already indented content is left alone.
        assert_eq!(indent_like(document, 1, "  x\n"), "  x\n");
        // Top-level symbols need no indentation.
        assert_eq!(indent_like(document, 0, "y\n"), "y\n");
        // Blank lines stay blank.
        assert_eq!(indent_like(document, 1, "\nz\n"), "\n    z\n");
    }

    #[test]
    fn test_workspace_edit_changes_form() {
        let edit = json!({
            "changes": {
                "file:///p/b.rs": [{"range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 1}}, "newText": "y"}],
                "file:///p/a.rs": [{"range": {"start": {"line": 1, "character": 0}, "end": {"line": 1, "character": 1}}, "newText": "y"}]
            }
        });
        let changes = workspace_edit_changes(&edit).unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].0, "file:///p/a.rs");
        assert_eq!(changes[1].1[0].new_text, "y");
    }

    #[test]
    fn test_workspace_edit_document_changes_form() {
        let range = json!({"start": {"line": 0, "character": 4}, "end": {"line": 0, "character": 5}});
        let edit = json!({
            "documentChanges": [
                {"textDocument": {"uri": "file:///p/a.rs", "version": 3}, "edits": [{"range": range, "newText": "z"}]},
                {"kind": "rename", "oldUri": "file:///p/x.rs", "newUri": "file:///p/y.rs"},
                {"textDocument": {"uri": "file:///p/a.rs", "version": 3}, "edits": [{"range": range, "newText": "w", "annotationId": "a"}]}
            ]
        });
        let changes = workspace_edit_changes(&edit).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].1.len(), 2);
        assert!(workspace_edit_changes(&Value::Null).unwrap().is_empty());
    }
}
