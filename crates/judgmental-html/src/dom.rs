//! Owned arena document tree.
//!
//! Pages are parsed with `scraper` and copied into a [`Document`], whose nodes
//! live in a single `Vec` and refer to each other by [`NodeId`]. Surgery
//! (detach, insert, replace) is explicit and never shares a node between two
//! documents; moving content across documents goes through
//! [`Document::import`], which deep-copies.

use scraper::{ElementRef, Html, Node, Selector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementData {
    pub name: String,
    pub attrs: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeData {
    Document,
    Doctype(String),
    Element(ElementData),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone)]
struct Slot {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

const PRESERVE_WHITESPACE: &[&str] = &["pre", "textarea", "script", "style"];

pub const MAX_INDENT_DEPTH: usize = 40;

#[derive(Debug, Clone)]
pub struct Document {
    slots: Vec<Slot>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// An empty document holding only its root node.
    pub fn new() -> Self {
        Self {
            slots: vec![Slot {
                data: NodeData::Document,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    pub fn parse(source: &str) -> Self {
        Self::parse_locating(source, &[]).0
    }

    /// Parses `source` and also reports, for each selector, the first element
    /// in document order that it matches.
    pub fn parse_locating(source: &str, selectors: &[Selector]) -> (Self, Vec<Option<NodeId>>) {
        let html = Html::parse_document(source);
        let mut doc = Self::new();
        let mut found = vec![None; selectors.len()];

        // Explicit stack: scraped pages can nest thousands of unclosed tags.
        let mut stack = html
            .tree
            .root()
            .children()
            .map(|child| (child, doc.root()))
            .collect::<Vec<_>>();
        stack.reverse();
        while let Some((node, parent)) = stack.pop() {
            let Some(id) = doc.copy_node(node.value(), parent) else {
                continue;
            };
            let Some(element) = ElementRef::wrap(node) else {
                continue;
            };
            for (slot, selector) in found.iter_mut().zip(selectors) {
                if slot.is_none() && selector.matches(&element) {
                    *slot = Some(id);
                }
            }
            let mark = stack.len();
            stack.extend(node.children().map(|child| (child, id)));
            stack[mark..].reverse();
        }
        (doc, found)
    }

    fn copy_node(&mut self, value: &Node, parent: NodeId) -> Option<NodeId> {
        let data = match value {
            Node::Doctype(doctype) => NodeData::Doctype(doctype.name().to_string()),
            Node::Comment(comment) => {
                let text: &str = comment;
                NodeData::Comment(text.to_string())
            }
            Node::Text(text) => {
                let text: &str = text;
                NodeData::Text(text.to_string())
            }
            Node::Element(el) => NodeData::Element(ElementData {
                name: el.name().to_string(),
                attrs: el
                    .attrs()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            }),
            _ => return None,
        };
        let id = self.push(data);
        self.append(parent, id);
        Some(id)
    }

    fn push(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.slots.len());
        self.slots.push(Slot {
            data,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn data(&self, id: NodeId) -> &NodeData {
        &self.slots[id.0].data
    }

    pub fn element(&self, id: NodeId) -> Option<&ElementData> {
        match self.data(id) {
            NodeData::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|el| el.name.as_str())
    }

    pub fn is_element(&self, id: NodeId, name: &str) -> bool {
        self.tag(id) == Some(name)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.slots[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.slots[id.0].children
    }

    pub fn element_children(&self, id: NodeId) -> Vec<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .filter(|c| self.element(*c).is_some())
            .collect()
    }

    /// Element descendants of `id` in document order, `id` excluded.
    pub fn descendant_elements(&self, id: NodeId, name: &str) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            if self.is_element(next, name) {
                out.push(next);
            }
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }

    pub fn create_element(&mut self, name: &str) -> NodeId {
        self.push(NodeData::Element(ElementData {
            name: name.to_string(),
            attrs: Vec::new(),
        }))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push(NodeData::Text(text.to_string()))
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        if let NodeData::Element(el) = &mut self.slots[id.0].data {
            match el.attrs.iter_mut().find(|(k, _)| k == name) {
                Some((_, v)) => *v = value.to_string(),
                None => el.attrs.push((name.to_string(), value.to_string())),
            }
        }
    }

    /// Position of `id` within its parent's children.
    pub fn index_in_parent(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.children(parent).iter().position(|c| *c == id)
    }

    /// Unlinks `id` (and its subtree) from its parent. The node stays in the
    /// arena and may be reinserted.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.slots[id.0].parent.take() {
            self.slots[parent.0].children.retain(|c| *c != id);
        }
    }

    pub fn append(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.slots[child.0].parent = Some(parent);
        self.slots[parent.0].children.push(child);
    }

    /// Inserts `child` at `index` among `parent`'s children, clamped to the end.
    pub fn insert(&mut self, parent: NodeId, index: usize, child: NodeId) {
        self.detach(child);
        let children = &mut self.slots[parent.0].children;
        let index = index.min(children.len());
        children.insert(index, child);
        self.slots[child.0].parent = Some(parent);
    }

    /// Puts `replacements` where `old` was, in order, and detaches `old`.
    pub fn replace_with(&mut self, old: NodeId, replacements: &[NodeId]) {
        let (Some(parent), Some(index)) = (self.parent(old), self.index_in_parent(old)) else {
            return;
        };
        self.detach(old);
        for (offset, node) in replacements.iter().enumerate() {
            self.insert(parent, index + offset, *node);
        }
    }

    /// Replaces every child of `id` with a single text node.
    pub fn set_text(&mut self, id: NodeId, text: &str) {
        for child in self.children(id).to_vec() {
            self.detach(child);
        }
        let node = self.create_text(text);
        self.append(id, node);
    }

    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            match self.data(next) {
                NodeData::Text(text) => out.push_str(text),
                _ => stack.extend(self.children(next).iter().rev().copied()),
            }
        }
        out
    }

    /// Deep-copies the subtree rooted at `id` in `other` into this document.
    /// The copy is returned detached.
    pub fn import(&mut self, other: &Document, id: NodeId) -> NodeId {
        let copy = self.push(other.data(id).clone());
        let mut stack = other
            .children(id)
            .iter()
            .rev()
            .map(|child| (*child, copy))
            .collect::<Vec<_>>();
        while let Some((source, parent)) = stack.pop() {
            let node = self.push(other.data(source).clone());
            self.append(parent, node);
            stack.extend(other.children(source).iter().rev().map(|child| (*child, node)));
        }
        copy
    }

    /// Serializes the whole document with two-space indentation wherever an
    /// element holds only elements, keeping mixed content on one line.
    /// Indentation stops growing past [`MAX_INDENT_DEPTH`] levels.
    pub fn to_pretty_html(&self) -> String {
        let mut out = String::new();
        let mut stack = self
            .children(self.root())
            .iter()
            .rev()
            .map(|child| Pretty::Node(*child, 0))
            .collect::<Vec<_>>();
        while let Some(step) = stack.pop() {
            match step {
                Pretty::Node(id, depth) => {
                    if self.is_blank_text(id) {
                        continue;
                    }
                    push_indent(depth, &mut out);
                    match self.element(id).filter(|_| self.lays_out_as_block(id)) {
                        Some(el) => {
                            write_open_tag(el, &mut out);
                            out.push('\n');
                            stack.push(Pretty::Close(id, depth));
                            stack.extend(
                                self.children(id)
                                    .iter()
                                    .rev()
                                    .map(|child| Pretty::Node(*child, depth + 1)),
                            );
                        }
                        None => {
                            self.write_inline(id, &mut out);
                            out.push('\n');
                        }
                    }
                }
                Pretty::Close(id, depth) => {
                    if let Some(el) = self.element(id) {
                        push_indent(depth, &mut out);
                        write_close_tag(el, &mut out);
                        out.push('\n');
                    }
                }
            }
        }
        out
    }

    /// Serializes one subtree without added whitespace.
    pub fn outer_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_inline(id, &mut out);
        out
    }

    fn is_blank_text(&self, id: NodeId) -> bool {
        matches!(self.data(id), NodeData::Text(text) if text.trim().is_empty())
    }

    fn lays_out_as_block(&self, id: NodeId) -> bool {
        let Some(el) = self.element(id) else {
            return false;
        };
        if PRESERVE_WHITESPACE.contains(&el.name.as_str()) {
            return false;
        }
        let children = self.children(id);
        children.iter().any(|c| self.element(*c).is_some())
            && children.iter().all(|c| match self.data(*c) {
                NodeData::Element(_) | NodeData::Comment(_) => true,
                NodeData::Text(_) => self.is_blank_text(*c),
                _ => false,
            })
    }

    fn write_inline(&self, id: NodeId, out: &mut String) {
        let mut stack = vec![Inline::Node(id, false)];
        while let Some(step) = stack.pop() {
            let (id, raw_text) = match step {
                Inline::Node(id, raw_text) => (id, raw_text),
                Inline::Close(id) => {
                    if let Some(el) = self.element(id) {
                        write_close_tag(el, out);
                    }
                    continue;
                }
            };
            match self.data(id) {
                NodeData::Document => {
                    stack.extend(self.children(id).iter().rev().map(|c| Inline::Node(*c, false)));
                }
                NodeData::Doctype(name) => {
                    out.push_str("<!DOCTYPE ");
                    out.push_str(name);
                    out.push('>');
                }
                NodeData::Comment(text) => {
                    out.push_str("<!--");
                    out.push_str(text);
                    out.push_str("-->");
                }
                NodeData::Text(text) => {
                    if raw_text {
                        out.push_str(text);
                    } else {
                        escape_text(text, out);
                    }
                }
                NodeData::Element(el) => {
                    if VOID_ELEMENTS.contains(&el.name.as_str()) {
                        out.push('<');
                        out.push_str(&el.name);
                        write_attrs(el, out);
                        out.push_str("/>");
                        continue;
                    }
                    write_open_tag(el, out);
                    let raw = RAW_TEXT_ELEMENTS.contains(&el.name.as_str());
                    stack.push(Inline::Close(id));
                    stack.extend(self.children(id).iter().rev().map(|c| Inline::Node(*c, raw)));
                }
            }
        }
    }
}

enum Pretty {
    Node(NodeId, usize),
    Close(NodeId, usize),
}

enum Inline {
    Node(NodeId, bool),
    Close(NodeId),
}

fn push_indent(depth: usize, out: &mut String) {
    for _ in 0..depth.min(MAX_INDENT_DEPTH) {
        out.push_str("  ");
    }
}

fn write_close_tag(el: &ElementData, out: &mut String) {
    out.push_str("</");
    out.push_str(&el.name);
    out.push('>');
}

fn write_open_tag(el: &ElementData, out: &mut String) {
    out.push('<');
    out.push_str(&el.name);
    write_attrs(el, out);
    out.push('>');
}

fn write_attrs(el: &ElementData, out: &mut String) {
    for (name, value) in &el.attrs {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        for ch in value.chars() {
            match ch {
                '&' => out.push_str("&amp;"),
                '"' => out.push_str("&quot;"),
                '<' => out.push_str("&lt;"),
                _ => out.push(ch),
            }
        }
        out.push('"');
    }
}

fn escape_text(text: &str, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_keeps_structure_and_locates_first_match() {
        let selectors = vec![
            Selector::parse("div#meta-date").unwrap(),
            Selector::parse("span.missing").unwrap(),
        ];
        let (doc, found) = Document::parse_locating(
            "<!DOCTYPE html><html><body><div id=\"meta-date\">x</div><div id=\"meta-date\">y</div></body></html>",
            &selectors,
        );
        let date = found[0].expect("date located");
        assert_eq!(doc.text_content(date), "x");
        assert!(found[1].is_none());
        assert_eq!(doc.data(doc.children(doc.root())[0]), &NodeData::Doctype("html".into()));
    }

    #[test]
    fn insert_detach_and_replace_move_nodes() {
        let mut doc = Document::new();
        let root = doc.root();
        let ul = doc.create_element("ul");
        doc.append(root, ul);
        let a = doc.create_element("li");
        let b = doc.create_element("li");
        doc.append(ul, a);
        doc.append(ul, b);
        let c = doc.create_element("li");
        doc.insert(ul, 1, c);
        assert_eq!(doc.children(ul), &[a, c, b]);
        assert_eq!(doc.index_in_parent(b), Some(2));

        let br = doc.create_element("br");
        doc.replace_with(c, &[br]);
        assert_eq!(doc.children(ul), &[a, br, b]);
        assert_eq!(doc.parent(c), None);

        doc.append(a, b);
        assert_eq!(doc.children(ul), &[a, br]);
        assert_eq!(doc.parent(b), Some(a));
    }

    #[test]
    fn import_deep_copies_between_documents() {
        let source = Document::parse("<html><body><p class=\"x\">one <b>two</b></p></body></html>");
        let p = source.descendant_elements(source.root(), "p")[0];

        let mut target = Document::new();
        let copy = target.import(&source, p);
        target.append(target.root(), copy);
        assert_eq!(target.outer_html(copy), "<p class=\"x\">one <b>two</b></p>");
        assert_eq!(source.parent(p).and_then(|b| source.tag(b)), Some("body"));
    }

    #[test]
    fn pretty_output_indents_element_only_content() {
        let doc = Document::parse(
            "<!DOCTYPE html><html><head><title>T &amp; U</title></head><body><div>\n  <p>a <i>b</i></p><br></div></body></html>",
        );
        assert_eq!(
            doc.to_pretty_html(),
            "<!DOCTYPE html>\n<html>\n  <head>\n    <title>T &amp; U</title>\n  </head>\n  <body>\n    <div>\n      <p>a <i>b</i></p>\n      <br/>\n    </div>\n  </body>\n</html>\n"
        );
    }

    #[test]
    fn deep_nesting_is_walked_without_recursion() {
        let depth = 20_000;
        let source = format!(
            "<html><body>{}deep{}</body></html>",
            "<div>".repeat(depth),
            "</div>".repeat(depth)
        );
        let doc = Document::parse(&source);
        let divs = doc.descendant_elements(doc.root(), "div");
        assert_eq!(divs.len(), depth);
        assert_eq!(doc.text_content(doc.root()), "deep");

        let inline = doc.outer_html(divs[0]);
        assert_eq!(inline.len(), depth * "<div></div>".len() + "deep".len());

        let mut copy = Document::new();
        let imported = copy.import(&doc, divs[0]);
        copy.append(copy.root(), imported);
        assert_eq!(copy.outer_html(imported), inline);

        let pretty = doc.to_pretty_html();
        let widest = pretty
            .lines()
            .map(|line| line.len() - line.trim_start().len())
            .max();
        assert_eq!(widest, Some(2 * MAX_INDENT_DEPTH));
        assert!(pretty.contains("<div>deep</div>"));
    }

    #[test]
    fn set_text_replaces_children() {
        let mut doc = Document::parse("<html><body><h1>Old <span>court</span></h1></body></html>");
        let h1 = doc.descendant_elements(doc.root(), "h1")[0];
        doc.set_text(h1, "Court of Appeal");
        assert_eq!(doc.outer_html(h1), "<h1>Court of Appeal</h1>");
    }
}
