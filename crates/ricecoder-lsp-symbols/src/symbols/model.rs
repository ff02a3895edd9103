//! Symbols, references and the trees they form

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SymbolsError};
use crate::text::{self, Position, Range};

/// LSP `SymbolKind`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum SymbolKind {
    File = 1,
    Module = 2,
    Namespace = 3,
    Package = 4,
    Class = 5,
    Method = 6,
    Property = 7,
    Field = 8,
    Constructor = 9,
    Enum = 10,
    Interface = 11,
    Function = 12,
    Variable = 13,
    Constant = 14,
    String = 15,
    Number = 16,
    Boolean = 17,
    Array = 18,
    Object = 19,
    Key = 20,
    Null = 21,
    EnumMember = 22,
    Struct = 23,
    Event = 24,
    Operator = 25,
    TypeParameter = 26,
}

impl SymbolKind {
    const ALL: [SymbolKind; 26] = [
        SymbolKind::File,
        SymbolKind::Module,
        SymbolKind::Namespace,
        SymbolKind::Package,
        SymbolKind::Class,
        SymbolKind::Method,
        SymbolKind::Property,
        SymbolKind::Field,
        SymbolKind::Constructor,
        SymbolKind::Enum,
        SymbolKind::Interface,
        SymbolKind::Function,
        SymbolKind::Variable,
        SymbolKind::Constant,
        SymbolKind::String,
        SymbolKind::Number,
        SymbolKind::Boolean,
        SymbolKind::Array,
        SymbolKind::Object,
        SymbolKind::Key,
        SymbolKind::Null,
        SymbolKind::EnumMember,
        SymbolKind::Struct,
        SymbolKind::Event,
        SymbolKind::Operator,
        SymbolKind::TypeParameter,
    ];

    /// Kind for an LSP kind number (1 to 26)
    pub fn from_lsp(number: u64) -> Result<Self> {
        number
            .checked_sub(1)
            .and_then(|index| Self::ALL.get(index as usize))
            .copied()
            .ok_or_else(|| SymbolsError::InvalidArgument(format!("Invalid symbol kind {}", number)))
    }

    /// Kinds for a list of LSP kind numbers
    pub fn from_numbers(numbers: &[u64]) -> Result<Vec<Self>> {
        numbers.iter().map(|&n| Self::from_lsp(n)).collect()
    }
}

impl From<SymbolKind> for u8 {
    fn from(kind: SymbolKind) -> u8 {
        kind as u8
    }
}

impl TryFrom<u8> for SymbolKind {
    type Error = SymbolsError;

    fn try_from(number: u8) -> Result<Self> {
        Self::from_lsp(number as u64)
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A symbol from one document, as of one document version
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Symbol {
    /// Symbol name
    pub name: String,
    /// Symbol kind
    pub kind: SymbolKind,
    /// Extra detail such as a signature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Whole definition, body included
    pub range: Range,
    /// The identifier itself
    pub selection_range: Range,
    /// Names of the enclosing symbols, outermost first
    pub container_path: Vec<String>,
    /// Nested symbols in document order
    pub children: Vec<Symbol>,
    /// Document URI
    pub uri: String,
    /// Project-relative path
    pub path: PathBuf,
    /// Document version the symbol was read from
    pub document_version: i32,
    /// Position among same-named siblings, when there are several
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overload_index: Option<usize>,
    /// Source text of the definition, when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl Symbol {
    /// Slash-separated path from the outermost container
    pub fn name_path(&self) -> String {
        let mut path = self.container_path.join("/");
        if !path.is_empty() {
            path.push('/');
        }
        path.push_str(&self.name);
        path
    }

    /// The symbol and its descendants in pre-order
    pub fn iter(&self) -> SymbolIter<'_> {
        SymbolIter { stack: vec![self] }
    }

    /// Copy with descendants deeper than `depth` levels removed
    pub fn truncated(&self, depth: usize) -> Symbol {
        Symbol {
            children: match depth {
                0 => Vec::new(),
                _ => self.children.iter().map(|c| c.truncated(depth - 1)).collect(),
            },
            ..self.clone_shallow()
        }
    }

    fn clone_shallow(&self) -> Symbol {
        Symbol {
            name: self.name.clone(),
            kind: self.kind,
            detail: self.detail.clone(),
            range: self.range,
            selection_range: self.selection_range,
            container_path: self.container_path.clone(),
            children: Vec::new(),
            uri: self.uri.clone(),
            path: self.path.clone(),
            document_version: self.document_version,
            overload_index: self.overload_index,
            body: self.body.clone(),
        }
    }
}

/// Pre-order iterator over a symbol forest
pub struct SymbolIter<'a> {
    stack: Vec<&'a Symbol>,
}

impl<'a> Iterator for SymbolIter<'a> {
    type Item = &'a Symbol;

    fn next(&mut self) -> Option<&'a Symbol> {
        let symbol = self.stack.pop()?;
        self.stack.extend(symbol.children.iter().rev());
        Some(symbol)
    }
}

/// All symbols of one document version
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolTree {
    /// Document URI
    pub uri: String,
    /// Project-relative path
    pub path: PathBuf,
    /// Document version the tree describes
    pub version: i32,
    /// Top-level symbols in document order
    pub roots: Vec<Symbol>,
}

impl SymbolTree {
    /// Every symbol in pre-order
    pub fn iter(&self) -> SymbolIter<'_> {
        SymbolIter {
            stack: self.roots.iter().rev().collect(),
        }
    }

    /// The deepest symbol whose range contains `position`
    pub fn innermost_containing(&self, position: Position) -> Option<&Symbol> {
        let mut level = &self.roots;
        let mut found = None;
        while let Some(symbol) = level.iter().find(|s| s.range.contains(position)) {
            found = Some(symbol);
            level = &symbol.children;
        }
        found
    }
}

/// A location referring to a symbol
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Reference {
    /// Project-relative path, or absolute when outside the project
    pub path: PathBuf,
    /// Range of the reference
    pub range: Range,
    /// Document URI
    pub uri: String,
}

/// One numbered line of source
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceLine {
    /// Zero-based line number
    pub line: u32,
    /// Line content without its terminator
    pub text: String,
}

/// A reference together with the symbol it occurs in
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferencingSymbol {
    /// Innermost symbol containing the reference, without children
    pub symbol: Symbol,
    /// The reference itself
    pub reference: Reference,
    /// Text of the referencing line
    pub line: String,
    /// The referencing line with one line of context on either side
    pub context: Vec<SourceLine>,
}

/// Lines `line - before ..= line + after` of `source`, clipped to the text
pub fn lines_around(source: &str, line: u32, before: u32, after: u32) -> Vec<SourceLine> {
    (line.saturating_sub(before)..=line.saturating_add(after))
        .map_while(|number| {
            text::line_text(source, number as usize).map(|content| SourceLine {
                line: number,
                text: content.to_string(),
            })
        })
        .collect()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDocumentSymbol {
    name: String,
    #[serde(default)]
    detail: Option<String>,
    kind: u64,
    range: Range,
    selection_range: Range,
    #[serde(default)]
    children: Vec<RawDocumentSymbol>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSymbolInformation {
    name: String,
    kind: u64,
    location: RawLocation,
}

#[derive(Deserialize)]
struct RawLocation {
    range: Range,
}

struct Origin<'a> {
    uri: &'a str,
    path: &'a Path,
    version: i32,
}

impl Origin<'_> {
    fn symbol(&self, name: String, kind: u64, detail: Option<String>, range: Range, selection_range: Range) -> Result<Symbol> {
        let kind = SymbolKind::from_lsp(kind)
            .map_err(|_| SymbolsError::ProtocolError(format!("Server sent symbol kind {} for {}", kind, name)))?;
        Ok(Symbol {
            name,
            kind,
            detail,
            range,
            selection_range,
            container_path: Vec::new(),
            children: Vec::new(),
            uri: self.uri.to_string(),
            path: self.path.to_path_buf(),
            document_version: self.version,
            overload_index: None,
            body: None,
        })
    }

    fn hierarchical(&self, raw: RawDocumentSymbol) -> Result<Symbol> {
        let mut symbol = self.symbol(raw.name, raw.kind, raw.detail, raw.range, raw.selection_range)?;
        symbol.children = raw
            .children
            .into_iter()
            .map(|child| self.hierarchical(child))
            .collect::<Result<_>>()?;
        Ok(symbol)
    }
}

/// Build the symbol forest of a `textDocument/documentSymbol` result.
///
/// Accepts both the hierarchical `DocumentSymbol[]` form and the flat
/// `SymbolInformation[]` form; the latter is nested by range containment.
pub fn parse_document_symbols(result: &Value, uri: &str, path: &Path, version: i32) -> Result<Vec<Symbol>> {
    let items = match result {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        other => {
            return Err(SymbolsError::ProtocolError(format!(
                "documentSymbol result is not an array: {}",
                other
            )))
        }
    };
    let origin = Origin { uri, path, version };

    let flat = items.first().is_some_and(|item| item.get("location").is_some());
    let mut roots = if flat {
        let mut symbols = Vec::with_capacity(items.len());
        for item in items {
            let raw: RawSymbolInformation = serde_json::from_value(item.clone())?;
            let range = raw.location.range;
            symbols.push(origin.symbol(raw.name, raw.kind, None, range, range)?);
        }
        nest(symbols)
    } else {
        items
            .iter()
            .map(|item| {
                let raw: RawDocumentSymbol = serde_json::from_value(item.clone())?;
                origin.hierarchical(raw)
            })
            .collect::<Result<Vec<_>>>()?
    };

    finish(&mut roots, &[]);
    Ok(roots)
}

/// Nest flat symbols by range containment
fn nest(mut symbols: Vec<Symbol>) -> Vec<Symbol> {
    symbols.sort_by(|a, b| a.range.start.cmp(&b.range.start).then(b.range.end.cmp(&a.range.end)));

    fn insert(level: &mut Vec<Symbol>, symbol: Symbol) {
        match level.last_mut() {
            Some(last) if last.range != symbol.range && last.range.contains_range(&symbol.range) => {
                insert(&mut last.children, symbol)
            }
            _ => level.push(symbol),
        }
    }

    let mut roots = Vec::new();
    for symbol in symbols {
        insert(&mut roots, symbol);
    }
    roots
}

/// Order siblings, fill in container paths and overload indices
fn finish(level: &mut [Symbol], container: &[String]) {
    level.sort_by_key(|symbol| symbol.range.start);

    let mut counts: HashMap<String, usize> = HashMap::new();
    for symbol in level.iter() {
        *counts.entry(symbol.name.clone()).or_default() += 1;
    }
    let mut seen: HashMap<String, usize> = HashMap::new();

    for symbol in level.iter_mut() {
        symbol.container_path = container.to_vec();
        if counts.get(&symbol.name).copied().unwrap_or(0) > 1 {
            let index = seen.entry(symbol.name.clone()).or_default();
            symbol.overload_index = Some(*index);
            *index += 1;
        }

        let mut inner = container.to_vec();
        inner.push(symbol.name.clone());
        finish(&mut symbol.children, &inner);
    }
}
