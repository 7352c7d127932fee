//! In-memory model of the host document.
//!
//! The host owns this tree and rewrites it whenever it likes; the engine only
//! reads it, inserts its own badges and subscribes to structural changes.
//! Nodes live in an arena and are never freed, so a `NodeId` held after the
//! host removed the node still answers `is_connected() == false`.

pub mod selector;

pub use selector::{Selector, SelectorError};

use std::collections::BTreeMap;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

/// On-screen bounds of an element, as laid out by the host.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// One child-list change under an observed subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    /// The node whose children changed.
    pub target: NodeId,
    pub added: Vec<NodeId>,
    pub removed: Vec<NodeId>,
}

/// Interest in "the subtree under X changed". Records arrive in the order the
/// mutations happened; the stream ends once the observer is disconnected.
#[derive(Debug)]
pub struct Subscription {
    id: ObserverId,
    records: mpsc::UnboundedReceiver<MutationRecord>,
}

impl Subscription {
    pub fn id(&self) -> ObserverId {
        self.id
    }

    pub async fn next(&mut self) -> Option<MutationRecord> {
        self.records.recv().await
    }

    /// Records already queued, without waiting.
    pub fn drain(&mut self) -> Vec<MutationRecord> {
        let mut records = Vec::new();
        while let Ok(record) = self.records.try_recv() {
            records.push(record);
        }
        records
    }
}

#[derive(Debug)]
struct Node {
    tag: String,
    attrs: BTreeMap<String, String>,
    text: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    rect: Option<Rect>,
}

#[derive(Debug)]
struct Observer {
    id: ObserverId,
    target: NodeId,
    sender: mpsc::UnboundedSender<MutationRecord>,
}

#[derive(Debug)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    body: NodeId,
    observers: Vec<Observer>,
    next_observer: u64,
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
            root: NodeId(0),
            body: NodeId(0),
            observers: Vec::new(),
            next_observer: 0,
        };
        doc.root = doc.create_element("html");
        doc.body = doc.create_element("body");
        doc.link(doc.root, doc.body, None);
        doc
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    /// A new element, not yet attached anywhere.
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            tag: tag.to_ascii_lowercase(),
            attrs: BTreeMap::new(),
            text: String::new(),
            parent: None,
            children: Vec::new(),
            rect: None,
        });
        id
    }

    pub fn tag(&self, node: NodeId) -> &str {
        &self.node(node).tag
    }

    pub fn attr(&self, node: NodeId, name: &str) -> Option<&str> {
        self.node(node).attrs.get(name).map(String::as_str)
    }

    pub fn set_attr(&mut self, node: NodeId, name: &str, value: impl Into<String>) {
        self.node_mut(node).attrs.insert(name.to_string(), value.into());
    }

    pub fn has_class(&self, node: NodeId, class: &str) -> bool {
        self.attr(node, "class")
            .is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
    }

    /// The element's own text, excluding descendants.
    pub fn text(&self, node: NodeId) -> &str {
        &self.node(node).text
    }

    pub fn set_text(&mut self, node: NodeId, text: impl Into<String>) {
        self.node_mut(node).text = text.into();
    }

    /// Own text followed by every descendant's, in document order.
    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = self.node(node).text.clone();
        for descendant in self.descendants(node) {
            out.push_str(&self.node(descendant).text);
        }
        out
    }

    pub fn rect(&self, node: NodeId) -> Option<Rect> {
        self.node(node).rect
    }

    #[cfg(test)]
    pub fn set_rect(&mut self, node: NodeId, rect: Rect) {
        self.node_mut(node).rect = Some(rect);
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).parent
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        &self.node(node).children
    }

    /// Whether `node` is `ancestor` or lies beneath it.
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

    pub fn is_connected(&self, node: NodeId) -> bool {
        self.contains(self.root, node)
    }

    /// Every node under `scope` in document order, `scope` excluded.
    pub fn descendants(&self, scope: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(scope).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.children(id).iter().rev().copied());
        }
        out
    }

    pub fn query_selector(&self, scope: NodeId, selector: &Selector) -> Option<NodeId> {
        self.descendants(scope)
            .into_iter()
            .find(|&id| selector.matches(self, id))
    }

    pub fn query_selector_all(&self, scope: NodeId, selector: &Selector) -> Vec<NodeId> {
        self.descendants(scope)
            .into_iter()
            .filter(|&id| selector.matches(self, id))
            .collect()
    }

    /// Nearest inclusive ancestor matching `selector`.
    pub fn closest(&self, node: NodeId, selector: &Selector) -> Option<NodeId> {
        let mut current = Some(node);
        while let Some(id) = current {
            if selector.matches(self, id) {
                return Some(id);
            }
            current = self.parent(id);
        }
        None
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.link(parent, child, None);
        self.notify(MutationRecord {
            target: parent,
            added: vec![child],
            removed: Vec::new(),
        });
    }

    /// Insert `node` as the next sibling of `reference`. Returns false when
    /// `reference` has no parent.
    pub fn insert_after(&mut self, reference: NodeId, node: NodeId) -> bool {
        let Some(parent) = self.parent(reference) else {
            return false;
        };
        if reference == node {
            return false;
        }
        self.detach(node);
        let index = self
            .children(parent)
            .iter()
            .position(|&c| c == reference)
            .map_or(self.children(parent).len(), |i| i + 1);
        self.link(parent, node, Some(index));
        self.notify(MutationRecord {
            target: parent,
            added: vec![node],
            removed: Vec::new(),
        });
        true
    }

    /// Detach `node` (and its subtree) from its parent.
    pub fn remove(&mut self, node: NodeId) {
        self.detach(node);
    }

    /// Detach every child of `parent` in one mutation, the way a host
    /// re-render swaps out a subtree.
    pub fn clear_children(&mut self, parent: NodeId) {
        let removed = std::mem::take(&mut self.node_mut(parent).children);
        if removed.is_empty() {
            return;
        }
        for &child in &removed {
            self.node_mut(child).parent = None;
        }
        self.notify(MutationRecord {
            target: parent,
            added: Vec::new(),
            removed,
        });
    }

    fn detach(&mut self, node: NodeId) {
        let Some(parent) = self.node_mut(node).parent.take() else {
            return;
        };
        self.node_mut(parent).children.retain(|&c| c != node);
        self.notify(MutationRecord {
            target: parent,
            added: Vec::new(),
            removed: vec![node],
        });
    }

    fn link(&mut self, parent: NodeId, child: NodeId, index: Option<usize>) {
        self.node_mut(child).parent = Some(parent);
        let children = &mut self.node_mut(parent).children;
        match index {
            Some(i) if i <= children.len() => children.insert(i, child),
            _ => children.push(child),
        }
    }

    /// Start delivering records for mutations at or beneath `target`.
    pub fn observe(&mut self, target: NodeId) -> Subscription {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        let (sender, records) = mpsc::unbounded_channel();
        self.observers.push(Observer { id, target, sender });
        Subscription { id, records }
    }

    /// Stop delivering records to `id`. Returns false if it was not registered.
    pub fn disconnect(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|o| o.id != id);
        self.observers.len() != before
    }

    #[cfg(test)]
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    fn notify(&mut self, record: MutationRecord) {
        let mut observers = std::mem::take(&mut self.observers);
        // Observers whose subscription was dropped are pruned here.
        observers.retain(|observer| {
            if !self.contains(observer.target, record.target) {
                return !observer.sender.is_closed();
            }
            observer.sender.send(record.clone()).is_ok()
        });
        self.observers = observers;
    }
}
