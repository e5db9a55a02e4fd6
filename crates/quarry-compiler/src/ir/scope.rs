//! Scope handles and the arena that allocates them

use std::collections::BTreeMap;

/// What introduced a scope; determines its alias prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScopeKind {
    /// A base table (`t`)
    Table,
    /// A derived select (`s`)
    Select,
    /// A set operation (`u`)
    SetOp,
}

impl ScopeKind {
    fn prefix(self) -> char {
        match self {
            ScopeKind::Table => 't',
            ScopeKind::Select => 's',
            ScopeKind::SetOp => 'u',
        }
    }
}

/// Handle to a row-source scope
///
/// Column references hold a handle, never a name, so rewrites that merge or
/// replace scopes only ever remap handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeId {
    index: u32,
    kind: ScopeKind,
}

impl ScopeId {
    pub fn kind(self) -> ScopeKind {
        self.kind
    }

    pub fn index(self) -> u32 {
        self.index
    }

    /// SQL alias: `t0`, `s1`, `u2`
    pub fn alias(self) -> String {
        format!("{}{}", self.kind.prefix(), self.index)
    }
}

impl std::fmt::Display for ScopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.index)
    }
}

/// Allocates unique scope handles for one compilation and records scopes
/// that rewrites have retired in favor of another
#[derive(Debug, Clone, Default)]
pub struct ScopeArena {
    next: u32,
    redirects: BTreeMap<ScopeId, ScopeId>,
}

impl ScopeArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh handle
    pub fn alloc(&mut self, kind: ScopeKind) -> ScopeId {
        let id = ScopeId {
            index: self.next,
            kind,
        };
        self.next += 1;
        id
    }

    /// Number of handles allocated so far
    pub fn len(&self) -> usize {
        self.next as usize
    }

    pub fn is_empty(&self) -> bool {
        self.next == 0
    }

    /// Record that `from` was spliced away and its columns now live in `to`
    pub fn redirect(&mut self, from: ScopeId, to: ScopeId) {
        if from != to {
            self.redirects.insert(from, to);
        }
    }

    /// Follow redirects from `id` to the scope that currently stands for it
    pub fn resolve(&self, id: ScopeId) -> ScopeId {
        let mut current = id;
        for _ in 0..=self.redirects.len() {
            match self.redirects.get(&current) {
                Some(next) => current = *next,
                None => break,
            }
        }
        current
    }
}
