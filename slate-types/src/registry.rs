use std::collections::{BTreeMap, HashSet};

use crate::schema::Module;
use crate::Type;

/// A named alias for one or more concrete dotted field paths.
///
/// Concepts may also reference other concepts, which are expanded
/// recursively during resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Concept {
    /// A human-readable description.
    pub description: String,
    /// Concrete dotted field paths this concept maps to.
    pub fields: Vec<String>,
    /// Names of other concepts subsumed by this one.
    pub concepts: Vec<String>,
}

/// The table of known concepts, consulted as a fallback during key
/// resolution.
///
/// Intended lifecycle: populated once during startup and read-only
/// thereafter; resolution calls take it by shared reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConceptRegistry {
    concepts: BTreeMap<String, Concept>,
}

impl ConceptRegistry {
    /// Registers a concept mapping directly to concrete field paths.
    pub fn insert<S: Into<String>>(
        &mut self,
        name: impl Into<String>,
        fields: impl IntoIterator<Item = S>,
    ) {
        self.insert_concept(
            name,
            Concept {
                fields: fields.into_iter().map(Into::into).collect(),
                ..Concept::default()
            },
        );
    }

    /// Registers a concept. An existing concept of the same name has the
    /// new fields and nested concepts appended.
    pub fn insert_concept(&mut self, name: impl Into<String>, concept: Concept) {
        let entry = self.concepts.entry(name.into()).or_default();
        if entry.description.is_empty() {
            entry.description = concept.description;
        }
        entry.fields.extend(concept.fields);
        entry.concepts.extend(concept.concepts);
    }

    /// Looks up a concept by name.
    pub fn get(&self, name: &str) -> Option<&Concept> {
        self.concepts.get(name)
    }

    /// Expands a key into concrete field paths.
    ///
    /// A key that names no concept resolves to itself. Nested concepts
    /// expand recursively; cycles are tolerated and expand once.
    pub fn resolve(&self, key: &str) -> Vec<String> {
        if !self.concepts.contains_key(key) {
            return vec![key.to_string()];
        }
        let mut result = Vec::new();
        let mut seen = HashSet::new();
        let mut pending = vec![key.to_string()];
        while let Some(name) = pending.pop() {
            if !seen.insert(name.clone()) {
                continue;
            }
            let Some(concept) = self.concepts.get(&name) else {
                log::warn!("concept `{name}` references undefined concept");
                continue;
            };
            result.extend(concept.fields.iter().cloned());
            pending.extend(concept.concepts.iter().cloned());
        }
        result
    }
}

/// The table of resolved schema modules.
///
/// Same lifecycle as [`ConceptRegistry`]: built once at startup, read-only
/// afterwards.
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, Module>,
}

impl ModuleRegistry {
    /// Registers a module under a name, replacing any previous module of
    /// that name.
    pub fn register(&mut self, name: impl Into<String>, module: Module) {
        self.modules.insert(name.into(), module);
    }

    /// Looks up a module by name.
    pub fn get(&self, name: &str) -> Option<&Module> {
        self.modules.get(name)
    }

    /// Looks up a schema type by name across all modules.
    pub fn schema(&self, name: &str) -> Option<&Type> {
        self.modules.values().find_map(|module| module.get(name))
    }

    /// Iterates over all registered modules.
    pub fn modules(&self) -> impl Iterator<Item = (&str, &Module)> {
        self.modules.iter().map(|(name, module)| (name.as_str(), module))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_concept_keys_resolve_to_themselves() {
        let registry = ConceptRegistry::default();
        assert_eq!(registry.resolve("a.b"), vec!["a.b".to_string()]);
    }

    #[test]
    fn nested_concepts_expand() {
        let mut registry = ConceptRegistry::default();
        registry.insert_concept(
            "net.endpoint",
            Concept {
                concepts: vec!["net.src".into(), "net.dst".into()],
                ..Concept::default()
            },
        );
        registry.insert("net.src", ["flow.src_ip".to_string()]);
        registry.insert("net.dst", ["flow.dst_ip".to_string()]);
        let mut resolved = registry.resolve("net.endpoint");
        resolved.sort();
        assert_eq!(resolved, ["flow.dst_ip", "flow.src_ip"]);
    }

    #[test]
    fn cyclic_concepts_terminate() {
        let mut registry = ConceptRegistry::default();
        registry.insert_concept(
            "a",
            Concept {
                fields: vec!["x".into()],
                concepts: vec!["b".into()],
                ..Concept::default()
            },
        );
        registry.insert_concept(
            "b",
            Concept {
                fields: vec!["y".into()],
                concepts: vec!["a".into()],
                ..Concept::default()
            },
        );
        let mut resolved = registry.resolve("a");
        resolved.sort();
        assert_eq!(resolved, ["x", "y"]);
    }
}
