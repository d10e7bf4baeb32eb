use std::collections::{HashMap, HashSet};

use slate_error::{slate_bail, SlateResult};

use crate::{legacy, LegacyType, ModuleRegistry, Type};

/// An ordered set of named, possibly unresolved legacy type bindings, as
/// produced by the parser.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolMap {
    entries: Vec<(String, LegacyType)>,
}

impl SymbolMap {
    /// Adds a binding. Defining the same symbol twice is a hard error.
    pub fn insert(&mut self, name: impl Into<String>, legacy: LegacyType) -> SlateResult<()> {
        let name = name.into();
        if self.get(&name).is_some() {
            slate_bail!(Parse: "duplicate definition of type `{name}`");
        }
        self.entries.push((name, legacy));
        Ok(())
    }

    /// Looks up a binding by name.
    pub fn get(&self, name: &str) -> Option<&LegacyType> {
        self.entries
            .iter()
            .find_map(|(n, legacy)| (n == name).then_some(legacy))
    }

    /// Iterates over the bindings in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &LegacyType)> {
        self.entries
            .iter()
            .map(|(name, legacy)| (name.as_str(), legacy))
    }

    /// The number of bindings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map has no bindings.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The resolved counterpart of a [`SymbolMap`]: named types in
/// declaration order, with no dangling references.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Module {
    types: Vec<(String, Type)>,
}

impl Module {
    /// Looks up a resolved type by name.
    pub fn get(&self, name: &str) -> Option<&Type> {
        self.types
            .iter()
            .find_map(|(n, ty)| (n == name).then_some(ty))
    }

    /// Iterates over the resolved types in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Type)> {
        self.types.iter().map(|(name, ty)| (name.as_str(), ty))
    }

    /// The number of resolved types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether the module has no types.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// Resolves all bindings of a symbol map into a module.
///
/// References look up the already-resolved set first, then the remaining
/// local bindings (resolving them on the spot, which is what makes
/// forward references work), then the global registry. A name missing
/// from all three is an undefined-symbol error, and a true cycle among
/// local bindings is diagnosed rather than overflowing the stack.
pub fn resolve(symbols: &SymbolMap, global: &ModuleRegistry) -> SlateResult<Module> {
    let mut resolver = Resolver {
        symbols,
        global,
        resolved: HashMap::new(),
        resolving: HashSet::new(),
    };
    let mut types = Vec::with_capacity(symbols.len());
    for (name, _) in symbols.iter() {
        types.push((name.to_string(), resolver.resolve_symbol(name)?));
    }
    Ok(Module { types })
}

struct Resolver<'a> {
    symbols: &'a SymbolMap,
    global: &'a ModuleRegistry,
    resolved: HashMap<String, Type>,
    resolving: HashSet<String>,
}

impl Resolver<'_> {
    fn resolve_symbol(&mut self, name: &str) -> SlateResult<Type> {
        if let Some(ty) = self.resolved.get(name) {
            return Ok(ty.clone());
        }
        if self.resolving.contains(name) {
            slate_bail!(Parse: "cyclic definition of type `{name}`");
        }
        let symbols = self.symbols;
        let Some(legacy) = symbols.get(name) else {
            if let Some(ty) = self.global.schema(name) {
                return Ok(ty.clone());
            }
            slate_bail!(Parse: "undefined type `{name}`");
        };
        self.resolving.insert(name.to_string());
        let ty = legacy::convert(legacy, &mut |reference| self.resolve_symbol(reference))?;
        // The declaration name becomes the outermost alias.
        let ty = Type::enriched(&ty, Some(name), std::iter::empty());
        self.resolving.remove(name);
        self.resolved.insert(name.to_string(), ty.clone());
        Ok(ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse;
    use crate::TypeKind;

    fn resolve_text(input: &str) -> SlateResult<Module> {
        resolve(&parse(input)?, &ModuleRegistry::default())
    }

    #[test]
    fn aliases_and_records() {
        let module = resolve_text("type a = int64\ntype b = record{x: a, y: double}\n").unwrap();
        assert_eq!(module.len(), 2);
        let a = module.get("a").unwrap();
        assert_eq!(a.name(), Some("a"));
        assert_eq!(a.kind(), TypeKind::Int64);
        let b = module.get("b").unwrap();
        assert_eq!(b.name(), Some("b"));
        let record = b.as_record().unwrap();
        assert_eq!(record.num_leaves(), 2);
        let x = record.field(0);
        assert_eq!(x.ty.name(), Some("a"));
        assert_eq!(x.ty.kind(), TypeKind::Int64);
        assert_eq!(record.field(1).ty.kind(), TypeKind::Double);
    }

    #[test]
    fn forward_references() {
        let module = resolve_text("type b = record{x: a}\ntype a = string\n").unwrap();
        let b = module.get("b").unwrap();
        assert_eq!(
            b.as_record().unwrap().field(0).ty.name(),
            Some("a")
        );
    }

    #[test]
    fn prefer_left_algebra() {
        let module = resolve_text(
            "type foo = record{a: int64, b: int64}\n\
             type bar = record{a: double, c: double}\n\
             type lplus = foo <+ bar\n",
        )
        .unwrap();
        let lplus = module.get("lplus").unwrap();
        assert_eq!(lplus.name(), Some("lplus"));
        let record = lplus.as_record().unwrap();
        let fields: Vec<_> = record
            .fields()
            .map(|f| (f.name.clone(), f.ty.kind()))
            .collect();
        assert_eq!(
            fields,
            [
                ("a".to_string(), TypeKind::Int64),
                ("b".to_string(), TypeKind::Int64),
                ("c".to_string(), TypeKind::Double),
            ]
        );
    }

    #[test]
    fn union_algebra_rejects_conflicts() {
        let result = resolve_text(
            "type foo = record{a: int64}\n\
             type bar = record{a: double}\n\
             type both = foo + bar\n",
        );
        assert!(result.is_err());
    }

    #[test]
    fn removal() {
        let module = resolve_text(
            "type foo = record{a: int64, b: record{c: string, d: ip}}\n\
             type bare = foo - b.c\n",
        )
        .unwrap();
        let record = module.get("bare").unwrap().as_record().unwrap();
        assert_eq!(record.num_leaves(), 2);
        assert!(record.resolve_key("b.c").is_none());
        assert!(record.resolve_key("b.d").is_some());
    }

    #[test]
    fn undefined_symbols_are_diagnosed() {
        let err = resolve_text("type a = record{x: nope}\n").unwrap_err();
        assert!(err.to_string().contains("nope"), "{err}");
    }

    #[test]
    fn cycles_are_diagnosed() {
        let err = resolve_text(
            "type a = record{x: b}\n\
             type b = record{y: a}\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("cyclic"), "{err}");
    }

    #[test]
    fn global_registry_fallback() {
        let module = resolve_text("type base = record{n: uint64}\n").unwrap();
        let mut registry = ModuleRegistry::default();
        registry.register("base-module", module);
        let symbols = parse("type derived = record{inner: base}\n").unwrap();
        let module = resolve(&symbols, &registry).unwrap();
        let inner = module
            .get("derived")
            .unwrap()
            .as_record()
            .unwrap()
            .field(0);
        assert_eq!(inner.ty.name(), Some("base"));
    }
}
