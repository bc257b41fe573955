//! Arena-backed markup tree.
//!
//! Nodes live in a flat `Vec` and refer to each other by index, so every
//! walk (descendants, ancestors, serialization) runs on an explicit stack
//! or parent chain and never recurses, however deeply the input nests.

use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use thiserror::Error;

/// Structural failure while reading or writing markup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message} (at byte {position})")]
pub struct MarkupError {
    pub message: String,
    pub position: u64,
}

impl MarkupError {
    fn new(message: impl Into<String>, position: u64) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

/// Index of a node inside its document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// An element with its qualified name and attributes in source order.
#[derive(Clone, Debug, PartialEq)]
pub struct Element {
    name: String,
    attributes: Vec<(String, String)>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
        }
    }

    /// Qualified name as written (`svg:g`, `circle`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name without namespace prefix.
    pub fn local_name(&self) -> &str {
        local_part(&self.name)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attribute(name).is_some()
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((name, value)),
        }
    }

    /// Drop every attribute for which `keep` returns false. Returns how many were removed.
    pub fn retain_attributes(&mut self, mut keep: impl FnMut(&str) -> bool) -> usize {
        let before = self.attributes.len();
        self.attributes.retain(|(k, _)| keep(k));
        before - self.attributes.len()
    }
}

pub(crate) fn local_part(name: &str) -> &str {
    match name.rsplit_once(':') {
        Some((_, local)) => local,
        None => name,
    }
}

/// Content of a node.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    Element(Element),
    Text(String),
    CData(String),
    Comment(String),
}

#[derive(Clone, Debug)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    kind: NodeKind,
}

/// A parsed markup document with exactly one root element.
#[derive(Clone, Debug)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    declaration: bool,
}

impl Document {
    /// Parse markup text into a tree.
    ///
    /// Processing instructions and DOCTYPE declarations are dropped.
    pub fn parse(text: &str) -> Result<Self, MarkupError> {
        let mut reader = Reader::from_str(text);
        let mut nodes: Vec<Node> = Vec::new();
        let mut open: Vec<NodeId> = Vec::new();
        let mut root: Option<NodeId> = None;
        let mut declaration = false;

        loop {
            let position = reader.buffer_position() as u64;
            let event = reader
                .read_event()
                .map_err(|e| MarkupError::new(e.to_string(), reader.buffer_position() as u64))?;

            match event {
                Event::Decl(_) => declaration = true,
                Event::Start(start) => {
                    let element = read_element(&start, position)?;
                    let id = attach_element(&mut nodes, &open, &mut root, element, position)?;
                    open.push(id);
                }
                Event::Empty(start) => {
                    let element = read_element(&start, position)?;
                    attach_element(&mut nodes, &open, &mut root, element, position)?;
                }
                Event::End(_) => {
                    open.pop();
                }
                Event::Text(text) => {
                    let text = text
                        .unescape()
                        .map_err(|e| MarkupError::new(e.to_string(), position))?
                        .into_owned();
                    match open.last() {
                        Some(&parent) => {
                            push_child(&mut nodes, parent, NodeKind::Text(text));
                        }
                        None if text.trim().is_empty() => {}
                        None => {
                            return Err(MarkupError::new(
                                "text content outside the root element",
                                position,
                            ))
                        }
                    }
                }
                Event::CData(data) => {
                    let data = String::from_utf8(data.into_inner().into_owned())
                        .map_err(|e| MarkupError::new(e.to_string(), position))?;
                    match open.last() {
                        Some(&parent) => {
                            push_child(&mut nodes, parent, NodeKind::CData(data));
                        }
                        None => {
                            return Err(MarkupError::new(
                                "CDATA section outside the root element",
                                position,
                            ))
                        }
                    }
                }
                Event::Comment(comment) => {
                    if let Some(&parent) = open.last() {
                        let comment = String::from_utf8_lossy(&comment.into_inner()).into_owned();
                        push_child(&mut nodes, parent, NodeKind::Comment(comment));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if let Some(&unclosed) = open.last() {
            let name = match &nodes[unclosed.0].kind {
                NodeKind::Element(el) => el.name.clone(),
                _ => String::new(),
            };
            return Err(MarkupError::new(
                format!("unclosed element <{name}>"),
                reader.buffer_position() as u64,
            ));
        }

        let root = root.ok_or_else(|| MarkupError::new("document has no root element", 0))?;

        Ok(Self {
            nodes,
            root,
            declaration,
        })
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match &self.nodes[id.0].kind {
            NodeKind::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        match &mut self.nodes[id.0].kind {
            NodeKind::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn root_element(&self) -> &Element {
        match &self.nodes[self.root.0].kind {
            NodeKind::Element(el) => el,
            _ => unreachable!("root is always an element"),
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    /// Direct element children, in order.
    pub fn child_elements(&self, id: NodeId) -> impl Iterator<Item = (NodeId, &Element)> + '_ {
        self.nodes[id.0]
            .children
            .iter()
            .filter_map(move |&child| self.element(child).map(|el| (child, el)))
    }

    /// `id` and everything below it, in document order.
    pub fn descendants(&self, id: NodeId) -> Descendants<'_> {
        Descendants {
            doc: self,
            stack: vec![id],
        }
    }

    /// Every element reachable from the root, in document order.
    pub fn elements(&self) -> impl Iterator<Item = (NodeId, &Element)> + '_ {
        self.descendants(self.root)
            .filter_map(move |id| self.element(id).map(|el| (id, el)))
    }

    /// Parent chain of `id`, nearest first, ending at the root.
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            doc: self,
            next: self.parent(id),
        }
    }

    /// Concatenated text of every text/CDATA node below `id`.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        for node in self.descendants(id) {
            match self.kind(node) {
                NodeKind::Text(t) | NodeKind::CData(t) => out.push_str(t),
                _ => {}
            }
        }
        out
    }

    /// Unlink `id` (and its subtree) from its parent. The root cannot be detached.
    pub fn detach(&mut self, id: NodeId) -> bool {
        let Some(parent) = self.nodes[id.0].parent.take() else {
            return false;
        };
        self.nodes[parent.0].children.retain(|&child| child != id);
        true
    }

    /// Write the tree back out as markup text.
    pub fn serialize(&self) -> Result<String, MarkupError> {
        enum Step {
            Enter(NodeId),
            Exit(NodeId),
        }

        let mut writer = Writer::new(Vec::new());
        if self.declaration {
            emit(&mut writer, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        }

        let mut stack = vec![Step::Enter(self.root)];
        while let Some(step) = stack.pop() {
            match step {
                Step::Enter(id) => {
                    let node = &self.nodes[id.0];
                    match &node.kind {
                        NodeKind::Element(el) => {
                            let mut start = BytesStart::new(el.name.as_str());
                            for (key, value) in &el.attributes {
                                start.push_attribute((key.as_str(), value.as_str()));
                            }
                            if node.children.is_empty() {
                                emit(&mut writer, Event::Empty(start))?;
                            } else {
                                emit(&mut writer, Event::Start(start))?;
                                stack.push(Step::Exit(id));
                                stack.extend(node.children.iter().rev().map(|&c| Step::Enter(c)));
                            }
                        }
                        NodeKind::Text(text) => {
                            emit(&mut writer, Event::Text(BytesText::new(text)))?;
                        }
                        NodeKind::CData(data) => {
                            emit(&mut writer, Event::CData(BytesCData::new(data.as_str())))?;
                        }
                        NodeKind::Comment(comment) => {
                            emit(
                                &mut writer,
                                Event::Comment(BytesText::from_escaped(comment.as_str())),
                            )?;
                        }
                    }
                }
                Step::Exit(id) => {
                    if let NodeKind::Element(el) = &self.nodes[id.0].kind {
                        emit(&mut writer, Event::End(BytesEnd::new(el.name.as_str())))?;
                    }
                }
            }
        }

        String::from_utf8(writer.into_inner()).map_err(|e| MarkupError::new(e.to_string(), 0))
    }
}

fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), MarkupError> {
    let position = writer.get_ref().len() as u64;
    writer
        .write_event(event)
        .map_err(|e| MarkupError::new(e.to_string(), position))
}

fn read_element(start: &BytesStart<'_>, position: u64) -> Result<Element, MarkupError> {
    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(|e| MarkupError::new(e.to_string(), position))?
        .to_string();

    let mut element = Element::new(name);
    for attr in start.attributes() {
        let attr = attr.map_err(|e| MarkupError::new(e.to_string(), position))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|e| MarkupError::new(e.to_string(), position))?
            .to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| MarkupError::new(e.to_string(), position))?
            .into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn attach_element(
    nodes: &mut Vec<Node>,
    open: &[NodeId],
    root: &mut Option<NodeId>,
    element: Element,
    position: u64,
) -> Result<NodeId, MarkupError> {
    match open.last() {
        Some(&parent) => Ok(push_child(nodes, parent, NodeKind::Element(element))),
        None => {
            if root.is_some() {
                return Err(MarkupError::new("more than one root element", position));
            }
            let id = NodeId(nodes.len());
            nodes.push(Node {
                parent: None,
                children: Vec::new(),
                kind: NodeKind::Element(element),
            });
            *root = Some(id);
            Ok(id)
        }
    }
}

fn push_child(nodes: &mut Vec<Node>, parent: NodeId, kind: NodeKind) -> NodeId {
    let id = NodeId(nodes.len());
    nodes.push(Node {
        parent: Some(parent),
        children: Vec::new(),
        kind,
    });
    nodes[parent.0].children.push(id);
    id
}

/// Pre-order walk driven by an explicit stack.
pub struct Descendants<'a> {
    doc: &'a Document,
    stack: Vec<NodeId>,
}

impl Iterator for Descendants<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        self.stack
            .extend(self.doc.nodes[id.0].children.iter().rev().copied());
        Some(id)
    }
}

/// Walk up the parent chain.
pub struct Ancestors<'a> {
    doc: &'a Document,
    next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.next?;
        self.next = self.doc.parent(id);
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_builds_tree_in_document_order() {
        let doc = Document::parse(
            r#"<svg width="10"><g id="a"><circle id="c1"/><rect id="r1"/></g><text>Hi</text></svg>"#,
        )
        .unwrap();

        let names: Vec<_> = doc.elements().map(|(_, el)| el.name().to_string()).collect();
        assert_eq!(names, vec!["svg", "g", "circle", "rect", "text"]);
        assert_eq!(doc.root_element().attribute("width"), Some("10"));
    }

    #[test]
    fn test_ancestors_stop_at_root() {
        let doc = Document::parse(r#"<svg><g id="outer"><g id="inner"><circle/></g></g></svg>"#)
            .unwrap();
        let circle = doc
            .elements()
            .find(|(_, el)| el.name() == "circle")
            .map(|(id, _)| id)
            .unwrap();

        let chain: Vec<_> = doc
            .ancestors(circle)
            .filter_map(|id| doc.element(id))
            .map(|el| el.attribute("id").unwrap_or("-").to_string())
            .collect();
        assert_eq!(chain, vec!["inner", "outer", "-"]);
    }

    #[test]
    fn test_deep_nesting_does_not_overflow() {
        let depth = 20_000;
        let mut text = String::from("<svg>");
        for _ in 0..depth {
            text.push_str("<g>");
        }
        text.push_str("<circle id=\"seat-deep\"/>");
        for _ in 0..depth {
            text.push_str("</g>");
        }
        text.push_str("</svg>");

        let doc = Document::parse(&text).unwrap();
        assert_eq!(doc.elements().count(), depth + 2);
        let out = doc.serialize().unwrap();
        assert!(out.contains("seat-deep"));
    }

    #[test]
    fn test_structural_errors() {
        assert!(Document::parse("").is_err());
        assert!(Document::parse("<svg><g></svg>").is_err());
        assert!(Document::parse("<svg></svg><svg></svg>").is_err());
        assert!(Document::parse("stray<svg></svg>").is_err());
        assert!(Document::parse("<svg><g>").is_err());
    }

    #[test]
    fn test_serialize_escapes_and_keeps_declaration() {
        let doc = Document::parse(
            "<?xml version=\"1.0\"?>\n<svg a=\"x &amp; y\"><text>1 &lt; 2</text><!-- note --></svg>",
        )
        .unwrap();
        let out = doc.serialize().unwrap();
        assert!(out.starts_with("<?xml"));
        assert!(out.contains("a=\"x &amp; y\""));
        assert!(out.contains("1 &lt; 2"));
        assert!(out.contains("<!-- note -->"));

        let reparsed = Document::parse(&out).unwrap();
        let text = reparsed
            .elements()
            .find(|(_, el)| el.name() == "text")
            .map(|(id, _)| reparsed.text_content(id))
            .unwrap();
        assert_eq!(text, "1 < 2");
    }

    #[test]
    fn test_detach_removes_subtree() {
        let mut doc =
            Document::parse(r#"<svg><script>alert(1)</script><circle/></svg>"#).unwrap();
        let script = doc
            .elements()
            .find(|(_, el)| el.name() == "script")
            .map(|(id, _)| id)
            .unwrap();
        assert!(doc.detach(script));
        assert!(!doc.detach(doc.root()));
        let out = doc.serialize().unwrap();
        assert_eq!(out, "<svg><circle/></svg>");
    }

    #[test]
    fn test_text_and_cdata_join_in_content() {
        let doc = Document::parse("<svg><text>Zona <![CDATA[A & B]]></text></svg>").unwrap();
        let text = doc
            .elements()
            .find(|(_, el)| el.name() == "text")
            .map(|(id, _)| id)
            .unwrap();
        assert_eq!(doc.text_content(text), "Zona A & B");
    }

    #[test]
    fn test_local_name_strips_prefix() {
        let doc = Document::parse(r#"<svg:svg xmlns:svg="http://www.w3.org/2000/svg"/>"#).unwrap();
        assert_eq!(doc.root_element().name(), "svg:svg");
        assert_eq!(doc.root_element().local_name(), "svg");
    }
}
