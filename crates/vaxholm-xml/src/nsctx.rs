#![forbid(unsafe_code)]

//! In-scope namespace tracking for event streams.

use crate::event::NsDecl;

/// A stack of namespace declarations, pushed per start element and popped
/// per end element. Used by the reader for prefix resolution and by the
/// processors to seed subtree canonicalization with ancestor context.
#[derive(Debug, Clone, Default)]
pub struct NsContext {
    stack: Vec<Vec<NsDecl>>,
}

impl NsContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter an element scope with its declarations.
    pub fn push(&mut self, declarations: &[NsDecl]) {
        self.stack.push(declarations.to_vec());
    }

    /// Leave the current element scope.
    pub fn pop(&mut self) {
        self.stack.pop();
    }

    /// Resolve a prefix to its in-scope URI. The `xml` prefix is always
    /// bound. Returns `None` for undeclared prefixes and for a default
    /// namespace that was never declared (or was undeclared with
    /// `xmlns=""`).
    pub fn resolve(&self, prefix: &str) -> Option<&str> {
        if prefix == "xml" {
            return Some(vaxholm_core::ns::XML);
        }
        for level in self.stack.iter().rev() {
            for decl in level.iter().rev() {
                if decl.prefix == prefix {
                    if decl.uri.is_empty() {
                        return None;
                    }
                    return Some(&decl.uri);
                }
            }
        }
        None
    }

    /// All effective in-scope bindings, innermost declaration winning.
    /// Undeclared default namespaces (`xmlns=""`) are omitted.
    pub fn bindings(&self) -> Vec<NsDecl> {
        let mut out: Vec<NsDecl> = Vec::new();
        for level in &self.stack {
            for decl in level {
                if let Some(existing) = out.iter_mut().find(|d| d.prefix == decl.prefix) {
                    existing.uri = decl.uri.clone();
                } else {
                    out.push(decl.clone());
                }
            }
        }
        out.retain(|d| !d.uri.is_empty());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_and_shadowing() {
        let mut ctx = NsContext::new();
        ctx.push(&[NsDecl::new("a", "urn:one")]);
        ctx.push(&[NsDecl::new("a", "urn:two"), NsDecl::new("", "urn:default")]);
        assert_eq!(ctx.resolve("a"), Some("urn:two"));
        assert_eq!(ctx.resolve(""), Some("urn:default"));
        ctx.pop();
        assert_eq!(ctx.resolve("a"), Some("urn:one"));
        assert_eq!(ctx.resolve(""), None);
    }

    #[test]
    fn test_default_ns_undeclare() {
        let mut ctx = NsContext::new();
        ctx.push(&[NsDecl::new("", "urn:default")]);
        ctx.push(&[NsDecl::new("", "")]);
        assert_eq!(ctx.resolve(""), None);
        assert!(ctx.bindings().iter().all(|d| !d.prefix.is_empty() || !d.uri.is_empty()));
    }

    #[test]
    fn test_xml_prefix_always_bound() {
        let ctx = NsContext::new();
        assert_eq!(ctx.resolve("xml"), Some(vaxholm_core::ns::XML));
    }
}
