//! Scope tree used to place nodes and lay out frame addresses.
//!
//! The root scope holds everything computed once per call. Each loop gets a
//! child scope re-run per iteration and each switch branch gets a child scope
//! run only when selected.

use crate::graph::NodeId;
use crate::interp::Addr;

/// Index into a [`ScopeTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u32);

impl ScopeId {
    pub const ROOT: ScopeId = ScopeId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Root,
    /// Body of the loop closed by this end node.
    Loop(NodeId),
    /// Branch `index` of this switch node.
    Branch(NodeId, usize),
}

#[derive(Debug, Clone)]
struct Scope {
    kind: ScopeKind,
    parent: Option<ScopeId>,
    depth: usize,
    /// Addresses owned directly by this scope.
    len: usize,
    base: Addr,
}

#[derive(Debug, Clone)]
pub struct ScopeTree {
    scopes: Vec<Scope>,
}

impl ScopeTree {
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope {
                kind: ScopeKind::Root,
                parent: None,
                depth: 0,
                len: 0,
                base: 0,
            }],
        }
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn child(&mut self, parent: ScopeId, kind: ScopeKind) -> ScopeId {
        let depth = self.scopes[parent.index()].depth + 1;
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            kind,
            parent: Some(parent),
            depth,
            len: 0,
            base: 0,
        });
        id
    }

    pub fn kind(&self, id: ScopeId) -> ScopeKind {
        self.scopes[id.index()].kind
    }

    pub fn parent(&self, id: ScopeId) -> Option<ScopeId> {
        self.scopes[id.index()].parent
    }

    pub fn depth(&self, id: ScopeId) -> usize {
        self.scopes[id.index()].depth
    }

    /// True when `ancestor` is `scope` or encloses it.
    pub fn encloses(&self, ancestor: ScopeId, scope: ScopeId) -> bool {
        let mut current = Some(scope);
        while let Some(id) = current {
            if self.depth(id) < self.depth(ancestor) {
                return false;
            }
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    /// Innermost scope enclosing both `a` and `b`.
    pub fn common(&self, mut a: ScopeId, mut b: ScopeId) -> ScopeId {
        while self.depth(a) > self.depth(b) {
            a = self.parent(a).unwrap_or(ScopeId::ROOT);
        }
        while self.depth(b) > self.depth(a) {
            b = self.parent(b).unwrap_or(ScopeId::ROOT);
        }
        while a != b {
            a = self.parent(a).unwrap_or(ScopeId::ROOT);
            b = self.parent(b).unwrap_or(ScopeId::ROOT);
        }
        a
    }

    /// Claim the next address slot of `scope`; offsets become addresses in [`Self::layout`].
    pub fn claim(&mut self, scope: ScopeId) -> usize {
        let scope = &mut self.scopes[scope.index()];
        scope.len += 1;
        scope.len - 1
    }

    /// Place the root after `reserved` addresses and every scope right after
    /// its parent's own range. Siblings share a range. Returns the frame size.
    pub fn layout(&mut self, reserved: usize) -> usize {
        let mut frame_size = reserved;
        // Parents precede their children in `scopes`.
        for index in 0..self.scopes.len() {
            let base = match self.scopes[index].parent {
                Some(parent) => {
                    let parent = &self.scopes[parent.index()];
                    parent.base + parent.len
                }
                None => reserved,
            };
            let scope = &mut self.scopes[index];
            scope.base = base;
            frame_size = frame_size.max(base + scope.len);
        }
        frame_size
    }

    pub fn address(&self, scope: ScopeId, offset: usize) -> Addr {
        self.scopes[scope.index()].base + offset
    }

    /// Addresses used by `scope` and everything nested in it.
    pub fn extent(&self, scope: ScopeId) -> std::ops::Range<Addr> {
        let base = self.scopes[scope.index()].base;
        let end = (0..self.scopes.len())
            .map(|index| ScopeId(index as u32))
            .filter(|id| self.encloses(scope, *id))
            .map(|id| {
                let nested = &self.scopes[id.index()];
                nested.base + nested.len
            })
            .max()
            .unwrap_or(base);
        base..end
    }
}

impl Default for ScopeTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(index: u32) -> NodeId {
        NodeId {
            index,
            generation: 0,
        }
    }

    #[test]
    fn common_scope_walks_to_the_shared_ancestor() {
        let mut tree = ScopeTree::new();
        let outer = tree.child(ScopeId::ROOT, ScopeKind::Loop(node(1)));
        let left = tree.child(outer, ScopeKind::Branch(node(2), 0));
        let right = tree.child(outer, ScopeKind::Branch(node(2), 1));
        let deep = tree.child(left, ScopeKind::Loop(node(3)));

        assert_eq!(tree.common(deep, right), outer);
        assert_eq!(tree.common(deep, left), left);
        assert_eq!(tree.common(ScopeId::ROOT, deep), ScopeId::ROOT);
        assert!(tree.encloses(outer, deep));
        assert!(!tree.encloses(right, deep));
    }

    #[test]
    fn siblings_share_addresses_after_their_parent() {
        let mut tree = ScopeTree::new();
        tree.claim(ScopeId::ROOT);
        let left = tree.child(ScopeId::ROOT, ScopeKind::Branch(node(1), 0));
        let right = tree.child(ScopeId::ROOT, ScopeKind::Branch(node(1), 1));
        for _ in 0..3 {
            tree.claim(left);
        }
        tree.claim(right);

        let frame_size = tree.layout(2);
        assert_eq!(tree.address(ScopeId::ROOT, 0), 2);
        assert_eq!(tree.address(left, 0), 3);
        assert_eq!(tree.address(right, 0), 3);
        assert_eq!(frame_size, 6);
        assert_eq!(tree.extent(left), 3..6);
        assert_eq!(tree.extent(ScopeId::ROOT), 2..6);
    }
}
