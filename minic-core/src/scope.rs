//! Lexical scopes.
//!
//! A [`ScopeStack`] is the chain of scopes active at one point of a
//! traversal: index 0 is the global scope, the last entry the innermost
//! block. Names are unique within one scope; an inner scope may shadow
//! an outer one. The stack is generic over what a name maps to so the
//! semantic analyzer (symbols) and the IR lowering (storage slots) each
//! keep their own table.

use std::collections::HashMap;

use crate::types::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Variable,
    Function,
}

impl SymbolKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SymbolKind::Variable => "variable",
            SymbolKind::Function => "function",
        }
    }
}

/// A declared name as the semantic analyzer sees it.
///
/// For functions `ty` is the return type and `params` the ordered
/// parameter types; variables leave `params` empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub ty: Type,
    pub params: Vec<Type>,
    pub line: u32,
    pub column: u32,
}

impl Symbol {
    pub fn variable(name: impl Into<String>, ty: Type, line: u32, column: u32) -> Self {
        Symbol {
            name: name.into(),
            kind: SymbolKind::Variable,
            ty,
            params: Vec::new(),
            line,
            column,
        }
    }

    pub fn function(
        name: impl Into<String>,
        return_type: Type,
        params: Vec<Type>,
        line: u32,
        column: u32,
    ) -> Self {
        Symbol {
            name: name.into(),
            kind: SymbolKind::Function,
            ty: return_type,
            params,
            line,
            column,
        }
    }
}

/// One name-to-entry mapping.
#[derive(Debug)]
pub struct Scope<T> {
    entries: HashMap<String, T>,
}

impl<T> Default for Scope<T> {
    fn default() -> Self {
        Scope {
            entries: HashMap::new(),
        }
    }
}

impl<T> Scope<T> {
    pub fn get(&self, name: &str) -> Option<&T> {
        self.entries.get(name)
    }
}

#[derive(Debug)]
pub struct ScopeStack<T> {
    scopes: Vec<Scope<T>>,
}

impl<T> Default for ScopeStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ScopeStack<T> {
    /// A stack holding only the (empty) global scope.
    pub fn new() -> Self {
        ScopeStack {
            scopes: vec![Scope::default()],
        }
    }

    pub fn push(&mut self) {
        self.scopes.push(Scope::default());
    }

    /// Pop the innermost scope. The global scope is never popped.
    pub fn pop(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_global(&self) -> bool {
        self.scopes.len() == 1
    }

    /// Insert into the innermost scope. A name already present in that
    /// same scope is left untouched and its entry is returned as the
    /// error.
    pub fn insert(&mut self, name: &str, entry: T) -> Result<(), &T> {
        let index = self.scopes.len() - 1;
        if self.scopes[index].entries.contains_key(name) {
            return Err(&self.scopes[index].entries[name]);
        }
        self.scopes[index].entries.insert(name.to_string(), entry);
        Ok(())
    }

    /// Walk outward from the innermost scope.
    pub fn lookup(&self, name: &str) -> Option<&T> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    pub fn innermost(&self) -> &Scope<T> {
        &self.scopes[self.scopes.len() - 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_finds_nearest_declaration() {
        let mut scopes = ScopeStack::new();
        scopes.insert("x", 1).expect("global x");
        scopes.push();
        assert_eq!(scopes.lookup("x"), Some(&1));
        scopes.insert("x", 2).expect("shadowing is allowed");
        assert_eq!(scopes.lookup("x"), Some(&2));
        scopes.pop();
        assert_eq!(scopes.lookup("x"), Some(&1));
        assert_eq!(scopes.lookup("y"), None);
    }

    #[test]
    fn duplicate_in_same_scope_keeps_first() {
        let mut scopes = ScopeStack::new();
        scopes.insert("foo", "first").expect("first insert");
        assert_eq!(scopes.insert("foo", "second"), Err(&"first"));
        assert_eq!(scopes.lookup("foo"), Some(&"first"));
        assert_eq!(scopes.innermost().get("foo"), Some(&"first"));
    }

    #[test]
    fn global_scope_survives_pop() {
        let mut scopes: ScopeStack<u8> = ScopeStack::new();
        scopes.pop();
        assert!(scopes.is_global());
        assert_eq!(scopes.depth(), 1);
    }
}
