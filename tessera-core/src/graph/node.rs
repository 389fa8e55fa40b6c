//! Composition Nodes
//!
//! This module defines the nodes that make up the composition tree.

use std::any::Any;
use std::fmt;
use std::panic::Location;
use std::rc::Rc;

use super::arena::Handle;
use super::scope::Scope;
use crate::error::Result;

/// Closure evaluated when a node runs.
pub type Body = Rc<dyn Fn(&mut Scope<'_>) -> Result<()>>;

/// Callback run once when a node leaves the tree.
pub(crate) type Disposer = Box<dyn FnOnce()>;

/// Unique identifier for a node in the composition tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(Handle);

impl NodeId {
    /// Get the arena handle.
    pub fn handle(&self) -> Handle {
        self.0
    }
}

impl From<Handle> for NodeId {
    fn from(handle: Handle) -> Self {
        Self(handle)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a node among its siblings.
///
/// A node re-reached on a later run of its parent is matched by this key; a
/// node whose key is not reached again is detached.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKey {
    /// The root of a tree.
    Root,

    /// A node created at a call site inside a body. `occurrence` counts how
    /// many times the same site (and explicit key) was reached earlier in the
    /// same run, so loops without keys still get distinct identities.
    Site {
        location: &'static Location<'static>,
        occurrence: u32,
        explicit: Option<String>,
    },

    /// An item of a keyed group.
    Item(String),

    /// A local named state; unique per name among its siblings.
    Named(String),
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKey::Root => f.write_str("root"),
            NodeKey::Site {
                location,
                occurrence,
                explicit,
            } => {
                write!(f, "{}:{}:{}", location.file(), location.line(), location.column())?;
                if let Some(key) = explicit {
                    write!(f, "[{key}]")?;
                }
                if *occurrence > 0 {
                    write!(f, "#{occurrence}")?;
                }
                Ok(())
            }
            NodeKey::Item(key) => write!(f, "[{key}]"),
            NodeKey::Named(name) => write!(f, "@{name}"),
        }
    }
}

/// Attachment state of a node.
///
/// `Detached` is terminal; a detached node is removed from the arena right
/// after its disposers ran, so it is only observable as a stale handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attachment {
    /// Created, `onCreate` not run yet.
    Unattached,
    /// Part of the tree.
    Attached,
    /// Left the tree; disposers ran.
    Detached,
}

/// The closed set of node kinds. The scheduler dispatches on this.
pub(crate) enum NodeKind {
    /// Root of a tree.
    Root,
    /// A plain child with its own body.
    Group,
    /// `once`: ran on first attach, skipped afterwards.
    Once,
    /// `remember`: the value computed on first attach.
    Remember { value: Rc<dyn Any> },
    /// `remember_disposable`: value plus the disposer for it.
    Disposable {
        value: Rc<dyn Any>,
        dispose: Option<Disposer>,
    },
    /// `memo_lifecycle`: the detach half of the pair.
    Lifecycle { on_detach: Option<Disposer> },
    /// Container of a keyed group; its children are items.
    Keyed,
}

impl NodeKind {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            NodeKind::Root => "root",
            NodeKind::Group => "group",
            NodeKind::Once => "once",
            NodeKind::Remember { .. } => "remember",
            NodeKind::Disposable { .. } => "disposable",
            NodeKind::Lifecycle { .. } => "lifecycle",
            NodeKind::Keyed => "keyed",
        }
    }

    /// The memoized value, for kinds that hold one.
    pub(crate) fn value(&self) -> Option<&Rc<dyn Any>> {
        match self {
            NodeKind::Remember { value } | NodeKind::Disposable { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Take the disposer, leaving the kind inert.
    pub(crate) fn take_disposer(&mut self) -> Option<Disposer> {
        match self {
            NodeKind::Disposable { dispose, .. } => dispose.take(),
            NodeKind::Lifecycle { on_detach } => on_detach.take(),
            _ => None,
        }
    }
}

impl fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A node in the composition tree.
pub(crate) struct CompositionNode {
    pub(crate) key: NodeKey,
    /// Parent link, for traversal only; ownership flows parent to child.
    pub(crate) parent: Option<NodeId>,
    /// Root of the tree this node belongs to.
    pub(crate) root: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) body: Option<Body>,
    pub(crate) attachment: Attachment,
    pub(crate) dirty: bool,
    pub(crate) kind: NodeKind,
}

impl CompositionNode {
    pub(crate) fn new(
        key: NodeKey,
        parent: Option<NodeId>,
        root: Option<NodeId>,
        kind: NodeKind,
        body: Option<Body>,
    ) -> Self {
        Self {
            key,
            parent,
            root,
            children: Vec::new(),
            // Nodes with a body start dirty so their first reach runs it.
            dirty: body.is_some(),
            body,
            attachment: Attachment::Unattached,
            kind,
        }
    }

    /// Whether the scheduler may run this node's body.
    pub(crate) fn is_runnable(&self) -> bool {
        self.dirty && self.body.is_some() && self.attachment == Attachment::Attached
    }
}

impl fmt::Debug for CompositionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositionNode")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("attachment", &self.attachment)
            .field("dirty", &self.dirty)
            .field("children", &self.children.len())
            .finish()
    }
}

/// Read-only snapshot of a node, for inspection and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub id: NodeId,
    pub key: NodeKey,
    pub kind: &'static str,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub attachment: Attachment,
    pub dirty: bool,
}

impl NodeInfo {
    pub(crate) fn of(id: NodeId, node: &CompositionNode) -> Self {
        Self {
            id,
            key: node.key.clone(),
            kind: node.kind.name(),
            parent: node.parent,
            children: node.children.clone(),
            attachment: node.attachment,
            dirty: node.dirty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_keys_render_location_and_occurrence() {
        let location = Location::caller();
        let key = NodeKey::Site {
            location,
            occurrence: 2,
            explicit: Some("row".into()),
        };
        let rendered = key.to_string();
        assert!(rendered.starts_with(location.file()));
        assert!(rendered.ends_with("[row]#2"));
        assert_eq!(NodeKey::Item("a".into()).to_string(), "[a]");
    }

    #[test]
    fn only_bodied_nodes_start_dirty() {
        let body: Body = Rc::new(|_| Ok(()));
        let group = CompositionNode::new(NodeKey::Root, None, None, NodeKind::Group, Some(body));
        let once = CompositionNode::new(NodeKey::Root, None, None, NodeKind::Once, None);
        assert!(group.dirty);
        assert!(!once.dirty);
        assert!(!group.is_runnable());
    }

    #[test]
    fn disposer_is_taken_once() {
        let mut kind = NodeKind::Lifecycle {
            on_detach: Some(Box::new(|| {})),
        };
        assert!(kind.take_disposer().is_some());
        assert!(kind.take_disposer().is_none());
        assert_eq!(kind.name(), "lifecycle");
    }
}
