//! Symbol retrieval and symbol-level editing

pub mod cache;
pub mod edit;
pub mod model;
pub mod name_path;
pub mod service;

pub use cache::{CacheMetrics, SymbolCache};
pub use edit::{EditOutcome, RenameOutcome};
pub use model::{
    lines_around, parse_document_symbols, Reference, ReferencingSymbol, SourceLine, Symbol,
    SymbolIter, SymbolKind, SymbolTree,
};
pub use name_path::NamePathPattern;
pub use service::{FindOptions, SymbolService};
