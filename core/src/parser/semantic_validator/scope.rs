//! Lexical scopes
//!
//! Scopes live in an arena and point at their parent by index. Lookup walks
//! the parent chain up to the global scope.

use indexmap::IndexMap;

use crate::types::ast::SourcePosition;

/// Read-only variables every flow and handler can see
pub const BUILTIN_VARIABLES: [&str; 5] = [
    "input_prompt",
    "conversation",
    "current_agent",
    "session_id",
    "turn_count",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeType {
    Global,
    Flow,
    Handler,
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Builtin,
    Parameter,
    Variable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeSymbol {
    pub kind: SymbolKind,
    /// Where the symbol was introduced; `None` for built-ins
    pub position: Option<SourcePosition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

#[derive(Debug, Clone)]
pub struct Scope {
    pub scope_type: ScopeType,
    pub parent: Option<ScopeId>,
    pub symbols: IndexMap<String, ScopeSymbol>,
}

#[derive(Debug, Clone)]
pub struct ScopeArena {
    scopes: Vec<Scope>,
}

impl Default for ScopeArena {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeArena {
    /// Arena holding only the seeded global scope
    pub fn new() -> Self {
        let mut global = Scope {
            scope_type: ScopeType::Global,
            parent: None,
            symbols: IndexMap::new(),
        };
        for name in BUILTIN_VARIABLES {
            global.symbols.insert(
                name.to_string(),
                ScopeSymbol {
                    kind: SymbolKind::Builtin,
                    position: None,
                },
            );
        }
        Self {
            scopes: vec![global],
        }
    }

    pub fn global(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn push(&mut self, scope_type: ScopeType, parent: ScopeId) -> ScopeId {
        self.scopes.push(Scope {
            scope_type,
            parent: Some(parent),
            symbols: IndexMap::new(),
        });
        ScopeId(self.scopes.len() - 1)
    }

    pub fn get(&self, id: ScopeId) -> Option<&Scope> {
        self.scopes.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Define `name` in `scope`. Built-ins cannot be shadowed or rebound.
    pub fn define(
        &mut self,
        scope: ScopeId,
        name: &str,
        kind: SymbolKind,
        position: Option<SourcePosition>,
    ) {
        if matches!(self.lookup(scope, name), Some(symbol) if symbol.kind == SymbolKind::Builtin) {
            return;
        }
        if let Some(target) = self.scopes.get_mut(scope.0) {
            target
                .symbols
                .entry(name.to_string())
                .or_insert(ScopeSymbol { kind, position });
        }
    }

    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<&ScopeSymbol> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let scope = self.scopes.get(id.0)?;
            if let Some(symbol) = scope.symbols.get(name) {
                return Some(symbol);
            }
            current = scope.parent;
        }
        None
    }

    /// Every name visible from `scope`, innermost first
    pub fn visible_names(&self, scope: ScopeId) -> Vec<&str> {
        let mut names = Vec::new();
        let mut current = Some(scope);
        while let Some(id) = current {
            let Some(scope) = self.scopes.get(id.0) else {
                break;
            };
            names.extend(scope.symbols.keys().map(String::as_str));
            current = scope.parent;
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_is_seeded_with_builtins() {
        let arena = ScopeArena::new();
        for name in BUILTIN_VARIABLES {
            let symbol = arena.lookup(arena.global(), name).unwrap();
            assert_eq!(symbol.kind, SymbolKind::Builtin);
        }
    }

    #[test]
    fn test_lookup_walks_to_parent_but_not_to_siblings() {
        let mut arena = ScopeArena::new();
        let flow = arena.push(ScopeType::Flow, arena.global());
        arena.define(flow, "topic", SymbolKind::Parameter, None);
        let block = arena.push(ScopeType::Block, flow);
        arena.define(block, "item", SymbolKind::Variable, None);
        let sibling = arena.push(ScopeType::Block, flow);

        assert!(arena.lookup(block, "topic").is_some());
        assert!(arena.lookup(block, "input_prompt").is_some());
        assert!(arena.lookup(sibling, "item").is_none());
        assert!(arena.lookup(flow, "item").is_none());
    }

    #[test]
    fn test_builtins_cannot_be_rebound() {
        let mut arena = ScopeArena::new();
        let flow = arena.push(ScopeType::Flow, arena.global());
        arena.define(flow, "session_id", SymbolKind::Variable, None);
        assert_eq!(
            arena.lookup(flow, "session_id").unwrap().kind,
            SymbolKind::Builtin
        );
        assert!(arena.get(flow).unwrap().symbols.is_empty());
    }
}
