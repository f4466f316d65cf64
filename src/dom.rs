//! In-memory document the page features render into.
//!
//! Nodes live in an arena and are addressed by [`NodeId`]. Removing a node only
//! detaches it, so state kept elsewhere can still refer to a node after it left
//! the tree. [`Document::release`] hands a detached subtree's slots back for
//! reuse once nothing refers to it any more.

use std::collections::BTreeMap;

use scraper::{ElementRef, Html, Node as HtmlNode};

use crate::overlay::{Rect, Size};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// Behaviour bound to a node. Binding the same listener twice is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Listener {
    ThumbClick,
    ShrinkClick,
    SwallowClick,
    MediaEnded,
    MenuButtonClick,
    MenuButtonBlur,
    MenuItemClick,
    ReferenceEnter,
    ReferenceLeave,
    FormSubmit,
    FormatClick,
    PasswordInput,
}

#[derive(Debug, Clone)]
enum NodeData {
    Element {
        tag: String,
        attrs: BTreeMap<String, String>,
        classes: Vec<String>,
        style: BTreeMap<String, String>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct NodeEntry {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    listeners: Vec<Listener>,
    rect: Option<Rect>,
    released: bool,
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<NodeEntry>,
    free: Vec<NodeId>,
    root: NodeId,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        let mut doc = Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: NodeId(0),
        };
        doc.root = doc.create_element("body");
        doc
    }

    /// Builds a document from a full HTML page, keeping the contents of `<body>`.
    pub fn from_html(markup: &str) -> Self {
        let mut doc = Self::new();
        let html = Html::parse_document(markup);
        let body = html
            .root_element()
            .children()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == "body");
        if let Some(body) = body {
            let root = doc.root;
            for (name, value) in body.value().attrs() {
                doc.set_attr(root, name, value);
            }
            doc.import_children(root, body);
        }
        doc
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push(NodeData::Element {
            tag: tag.to_ascii_lowercase(),
            attrs: BTreeMap::new(),
            classes: Vec::new(),
            style: BTreeMap::new(),
        })
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push(NodeData::Text(text.to_string()))
    }

    fn push(&mut self, data: NodeData) -> NodeId {
        let entry = NodeEntry {
            data,
            parent: None,
            children: Vec::new(),
            listeners: Vec::new(),
            rect: None,
            released: false,
        };
        match self.free.pop() {
            Some(id) => {
                self.nodes[id.0] = entry;
                id
            }
            None => {
                self.nodes.push(entry);
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    /// Detaches `node` and frees its whole subtree for reuse. Ids into the
    /// subtree must not be used afterwards. The root is never released.
    pub fn release(&mut self, node: NodeId) {
        if node == self.root || self.entry(node).released {
            return;
        }
        self.detach(node);
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            let entry = self.entry_mut(id);
            if entry.released {
                continue;
            }
            stack.append(&mut entry.children);
            entry.data = NodeData::Text(String::new());
            entry.parent = None;
            entry.listeners.clear();
            entry.rect = None;
            entry.released = true;
            self.free.push(id);
        }
    }

    /// Nodes currently allocated, attached or not.
    pub fn live_nodes(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    fn entry(&self, node: NodeId) -> &NodeEntry {
        &self.nodes[node.0]
    }

    fn entry_mut(&mut self, node: NodeId) -> &mut NodeEntry {
        &mut self.nodes[node.0]
    }

    /// Parses an HTML fragment into a detached `<div>` container.
    pub fn parse_fragment(&mut self, markup: &str) -> NodeId {
        let container = self.create_element("div");
        let html = Html::parse_fragment(markup);
        self.import_children(container, html.root_element());
        container
    }

    /// Replaces the children of `node` with the parsed `markup`.
    pub fn set_inner_html(&mut self, node: NodeId, markup: &str) {
        self.clear_children(node);
        let fragment = self.parse_fragment(markup);
        for child in self.children(fragment).to_vec() {
            self.append_child(node, child);
        }
        self.release(fragment);
    }

    fn import_children(&mut self, parent: NodeId, element: ElementRef<'_>) {
        for child in element.children() {
            match child.value() {
                HtmlNode::Text(text) => {
                    let node = self.create_text(&**text);
                    self.append_child(parent, node);
                }
                HtmlNode::Element(_) => {
                    let Some(child_el) = ElementRef::wrap(child) else {
                        continue;
                    };
                    let node = self.create_element(child_el.value().name());
                    for (name, value) in child_el.value().attrs() {
                        self.set_attr(node, name, value);
                    }
                    self.append_child(parent, node);
                    self.import_children(node, child_el);
                }
                _ => {}
            }
        }
    }

    pub fn tag(&self, node: NodeId) -> Option<&str> {
        match &self.entry(node).data {
            NodeData::Element { tag, .. } => Some(tag.as_str()),
            NodeData::Text(_) => None,
        }
    }

    pub fn is_element(&self, node: NodeId) -> bool {
        self.tag(node).is_some()
    }

    pub fn is_tag(&self, node: NodeId, expected: &str) -> bool {
        self.tag(node) == Some(expected)
    }

    pub fn attr(&self, node: NodeId, name: &str) -> Option<&str> {
        match &self.entry(node).data {
            NodeData::Element { attrs, .. } => attrs.get(name).map(String::as_str),
            NodeData::Text(_) => None,
        }
    }

    pub fn set_attr(&mut self, node: NodeId, name: &str, value: &str) {
        match name {
            "class" => {
                for class in value.split_whitespace() {
                    self.add_class(node, class);
                }
            }
            "style" => {
                for decl in value.split(';') {
                    if let Some((prop, val)) = decl.split_once(':') {
                        self.set_style(node, prop.trim(), val.trim());
                    }
                }
            }
            _ => {
                if let NodeData::Element { attrs, .. } = &mut self.entry_mut(node).data {
                    attrs.insert(name.to_string(), value.to_string());
                }
            }
        }
    }

    pub fn remove_attr(&mut self, node: NodeId, name: &str) {
        if let NodeData::Element { attrs, .. } = &mut self.entry_mut(node).data {
            attrs.remove(name);
        }
    }

    /// Reads a `data-*` attribute.
    pub fn data(&self, node: NodeId, key: &str) -> Option<&str> {
        self.attr(node, &format!("data-{key}"))
    }

    pub fn set_data(&mut self, node: NodeId, key: &str, value: &str) {
        self.set_attr(node, &format!("data-{key}"), value);
    }

    pub fn element_id(&self, node: NodeId) -> Option<&str> {
        self.attr(node, "id")
    }

    pub fn has_class(&self, node: NodeId, class: &str) -> bool {
        match &self.entry(node).data {
            NodeData::Element { classes, .. } => classes.iter().any(|c| c == class),
            NodeData::Text(_) => false,
        }
    }

    pub fn add_class(&mut self, node: NodeId, class: &str) {
        if let NodeData::Element { classes, .. } = &mut self.entry_mut(node).data {
            if !classes.iter().any(|c| c == class) {
                classes.push(class.to_string());
            }
        }
    }

    pub fn remove_class(&mut self, node: NodeId, class: &str) {
        if let NodeData::Element { classes, .. } = &mut self.entry_mut(node).data {
            classes.retain(|c| c != class);
        }
    }

    pub fn style(&self, node: NodeId, prop: &str) -> Option<&str> {
        match &self.entry(node).data {
            NodeData::Element { style, .. } => style.get(prop).map(String::as_str),
            NodeData::Text(_) => None,
        }
    }

    pub fn set_style(&mut self, node: NodeId, prop: &str, value: &str) {
        if let NodeData::Element { style, .. } = &mut self.entry_mut(node).data {
            style.insert(prop.to_string(), value.to_string());
        }
    }

    pub fn remove_style(&mut self, node: NodeId, prop: &str) {
        if let NodeData::Element { style, .. } = &mut self.entry_mut(node).data {
            style.remove(prop);
        }
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.entry(node).parent
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        &self.entry(node).children
    }

    pub fn element_children(&self, node: NodeId) -> Vec<NodeId> {
        self.children(node)
            .iter()
            .copied()
            .filter(|child| self.is_element(*child))
            .collect()
    }

    pub fn first_element_child(&self, node: NodeId) -> Option<NodeId> {
        self.children(node)
            .iter()
            .copied()
            .find(|child| self.is_element(*child))
    }

    pub fn last_element_child(&self, node: NodeId) -> Option<NodeId> {
        self.children(node)
            .iter()
            .rev()
            .copied()
            .find(|child| self.is_element(*child))
    }

    pub fn next_element_sibling(&self, node: NodeId) -> Option<NodeId> {
        let parent = self.parent(node)?;
        let siblings = self.children(parent);
        let pos = siblings.iter().position(|child| *child == node)?;
        siblings[pos + 1..]
            .iter()
            .copied()
            .find(|sibling| self.is_element(*sibling))
    }

    /// Appends `child` to `parent`, moving it out of its current parent first.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.entry_mut(parent).children.push(child);
        self.entry_mut(child).parent = Some(parent);
    }

    pub fn prepend_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.entry_mut(parent).children.insert(0, child);
        self.entry_mut(child).parent = Some(parent);
    }

    /// Detaches the node from the tree. Its subtree stays intact.
    pub fn remove(&mut self, node: NodeId) {
        self.detach(node);
    }

    fn detach(&mut self, node: NodeId) {
        if let Some(parent) = self.entry_mut(node).parent.take() {
            self.entry_mut(parent).children.retain(|child| *child != node);
        }
    }

    pub fn clear_children(&mut self, node: NodeId) {
        for child in std::mem::take(&mut self.entry_mut(node).children) {
            self.entry_mut(child).parent = None;
        }
    }

    /// Whether the node is attached under the document root.
    pub fn is_connected(&self, node: NodeId) -> bool {
        self.contains(self.root, node)
    }

    /// Inclusive ancestor test.
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    /// Descendants of `scope` in document order, excluding `scope` itself.
    pub fn descendants(&self, scope: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(scope).iter().rev().copied().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(self.children(node).iter().rev().copied());
        }
        out
    }

    pub fn find_all<F>(&self, scope: NodeId, pred: F) -> Vec<NodeId>
    where
        F: Fn(&Document, NodeId) -> bool,
    {
        self.descendants(scope)
            .into_iter()
            .filter(|node| self.is_element(*node) && pred(self, *node))
            .collect()
    }

    pub fn find_first<F>(&self, scope: NodeId, pred: F) -> Option<NodeId>
    where
        F: Fn(&Document, NodeId) -> bool,
    {
        self.descendants(scope)
            .into_iter()
            .find(|node| self.is_element(*node) && pred(self, *node))
    }

    pub fn by_class(&self, scope: NodeId, class: &str) -> Vec<NodeId> {
        self.find_all(scope, |doc, node| doc.has_class(node, class))
    }

    pub fn first_by_class(&self, scope: NodeId, class: &str) -> Option<NodeId> {
        self.find_first(scope, |doc, node| doc.has_class(node, class))
    }

    pub fn get_element_by_id(&self, id: &str) -> Option<NodeId> {
        if self.element_id(self.root) == Some(id) {
            return Some(self.root);
        }
        self.find_first(self.root, |doc, node| doc.element_id(node) == Some(id))
    }

    /// Nearest inclusive ancestor matching `pred`.
    pub fn closest<F>(&self, node: NodeId, pred: F) -> Option<NodeId>
    where
        F: Fn(&Document, NodeId) -> bool,
    {
        let mut current = Some(node);
        while let Some(id) = current {
            if self.is_element(id) && pred(self, id) {
                return Some(id);
            }
            current = self.parent(id);
        }
        None
    }

    pub fn text_content(&self, node: NodeId) -> String {
        match &self.entry(node).data {
            NodeData::Text(text) => text.clone(),
            NodeData::Element { .. } => {
                let mut out = String::new();
                for child in self.descendants(node) {
                    if let NodeData::Text(text) = &self.entry(child).data {
                        out.push_str(text);
                    }
                }
                out
            }
        }
    }

    pub fn set_text(&mut self, node: NodeId, text: &str) {
        if let NodeData::Text(existing) = &mut self.entry_mut(node).data {
            *existing = text.to_string();
            return;
        }
        for child in self.children(node).to_vec() {
            self.release(child);
        }
        let text_node = self.create_text(text);
        self.append_child(node, text_node);
    }

    pub fn bind(&mut self, node: NodeId, listener: Listener) {
        let listeners = &mut self.entry_mut(node).listeners;
        if !listeners.contains(&listener) {
            listeners.push(listener);
        }
    }

    pub fn listeners(&self, node: NodeId) -> &[Listener] {
        &self.entry(node).listeners
    }

    /// Records where the host laid the node out, in viewport coordinates.
    pub fn set_rect(&mut self, node: NodeId, rect: Rect) {
        self.entry_mut(node).rect = Some(rect);
    }

    pub fn rect_hint(&self, node: NodeId) -> Option<Rect> {
        self.entry(node).rect
    }
}

/// Geometry source for overlay placement.
pub trait Layout {
    fn rect(&self, doc: &Document, node: NodeId) -> Rect;
    fn measure(&self, doc: &Document, node: NodeId) -> Size;
}

/// Uses rect hints where the host recorded them and estimates the rest from text.
#[derive(Debug, Clone)]
pub struct EstimatedLayout {
    pub char_width: f64,
    pub line_height: f64,
    pub max_width: f64,
}

impl Default for EstimatedLayout {
    fn default() -> Self {
        Self {
            char_width: 7.0,
            line_height: 16.0,
            max_width: 640.0,
        }
    }
}

impl Layout for EstimatedLayout {
    fn rect(&self, doc: &Document, node: NodeId) -> Rect {
        doc.rect_hint(node).unwrap_or_default()
    }

    fn measure(&self, doc: &Document, node: NodeId) -> Size {
        if let Some(rect) = doc.rect_hint(node) {
            return rect.size();
        }
        let blocks = doc
            .find_all(node, |doc, n| {
                matches!(doc.tag(n), Some("li" | "p" | "br" | "div" | "blockquote"))
            })
            .len();
        let text = doc.text_content(node);
        let lines = blocks.max(text.lines().count()).max(1);
        let longest = text.lines().map(|l| l.chars().count()).max().unwrap_or(0);
        Size {
            width: (longest as f64 * self.char_width).min(self.max_width),
            height: lines as f64 * self.line_height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_import_keeps_attributes_classes_and_text() {
        let mut doc = Document::new();
        let frag = doc.parse_fragment(
            r#"<div class="post reply" id="b-12" data-board_id="b" style="color: red"><span>hi</span> there</div>"#,
        );
        let post = doc.first_element_child(frag).unwrap();
        assert_eq!(doc.tag(post), Some("div"));
        assert!(doc.has_class(post, "post"));
        assert!(doc.has_class(post, "reply"));
        assert_eq!(doc.element_id(post), Some("b-12"));
        assert_eq!(doc.data(post, "board_id"), Some("b"));
        assert_eq!(doc.style(post, "color"), Some("red"));
        assert_eq!(doc.text_content(post), "hi there");
        assert!(!doc.is_connected(post));
    }

    #[test]
    fn append_moves_nodes_between_parents() {
        let mut doc = Document::new();
        let a = doc.create_element("div");
        let b = doc.create_element("div");
        let child = doc.create_element("span");
        doc.append_child(a, child);
        doc.append_child(b, child);
        assert!(doc.children(a).is_empty());
        assert_eq!(doc.children(b), &[child]);
        assert_eq!(doc.parent(child), Some(b));
    }

    #[test]
    fn lookup_by_id_only_sees_connected_nodes() {
        let mut doc = Document::new();
        let frag = doc.parse_fragment(r#"<p id="x">detached</p>"#);
        assert!(doc.get_element_by_id("x").is_none());
        let p = doc.first_element_child(frag).unwrap();
        let root = doc.root();
        doc.append_child(root, p);
        assert_eq!(doc.get_element_by_id("x"), Some(p));
        doc.remove(p);
        assert!(doc.get_element_by_id("x").is_none());
    }

    #[test]
    fn sibling_and_closest_navigation() {
        let mut doc = Document::from_html(
            r#"<html><body><div class="thread" id="t"><div class="post" id="b-1"><a id="r">x</a></div>
            <hr></div></body></html>"#,
        );
        let post = doc.get_element_by_id("b-1").unwrap();
        let hr = doc.next_element_sibling(post).unwrap();
        assert!(doc.is_tag(hr, "hr"));
        let link = doc.get_element_by_id("r").unwrap();
        assert_eq!(doc.closest(link, |d, n| d.has_class(n, "post")), Some(post));
        let thread = doc.get_element_by_id("t").unwrap();
        doc.remove(thread);
        assert!(!doc.is_connected(link));
    }

    #[test]
    fn released_subtrees_are_recycled() {
        let mut doc = Document::new();
        let frag = doc.parse_fragment(r#"<div id="old"><span>a</span><b>b</b></div>"#);
        let before = doc.live_nodes();
        doc.release(frag);
        assert_eq!(doc.live_nodes(), before - 6);

        let frag = doc.parse_fragment(r#"<p id="new">c</p>"#);
        assert_eq!(doc.live_nodes(), before - 3);
        let p = doc.first_element_child(frag).unwrap();
        assert_eq!(doc.element_id(p), Some("new"));
        assert_eq!(doc.text_content(frag), "c");
        assert!(doc.listeners(p).is_empty());
    }

    #[test]
    fn releasing_twice_or_the_root_is_ignored() {
        let mut doc = Document::new();
        let root = doc.root();
        let div = doc.create_element("div");
        doc.append_child(root, div);
        doc.release(div);
        doc.release(div);
        doc.release(root);
        assert_eq!(doc.live_nodes(), 1);
        assert!(doc.children(root).is_empty());
        let a = doc.create_element("a");
        let b = doc.create_element("b");
        assert_ne!(a, b);
    }

    #[test]
    fn set_text_frees_replaced_children() {
        let mut doc = Document::new();
        let field = doc.create_element("textarea");
        doc.set_text(field, "one");
        let before = doc.live_nodes();
        for _ in 0..10 {
            doc.set_text(field, "again");
        }
        assert_eq!(doc.live_nodes(), before);
        assert_eq!(doc.text_content(field), "again");
    }

    #[test]
    fn binding_is_idempotent() {
        let mut doc = Document::new();
        let a = doc.create_element("a");
        doc.bind(a, Listener::ReferenceEnter);
        doc.bind(a, Listener::ReferenceEnter);
        assert_eq!(doc.listeners(a), &[Listener::ReferenceEnter]);
    }

    #[test]
    fn estimated_layout_prefers_rect_hints() {
        let mut doc = Document::new();
        let div = doc.create_element("div");
        doc.set_rect(div, Rect::new(0.0, 0.0, 120.0, 40.0));
        let size = EstimatedLayout::default().measure(&doc, div);
        assert_eq!(size, Size { width: 120.0, height: 40.0 });
    }
}
