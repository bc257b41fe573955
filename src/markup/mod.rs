//! Generic markup tree used by document validation and analysis.

mod tree;

pub(crate) use tree::local_part;
pub use tree::{Ancestors, Descendants, Document, Element, MarkupError, NodeId, NodeKind};
