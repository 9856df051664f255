//! The type system: a single sum type plus an interning registry. Every
//! call site carries a stable handle into the registry rather than a type
//! pointer/reference.

use std::collections::HashMap;

use crate::error::Error;

/// A stable handle into [`TypeRegistry`]. Two handles compare equal iff
/// they were interned from the same structural request — `pointer_of(t)`
/// returns the same handle across calls rather than a fresh one each time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeHandle(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    /// `i8..i64`, `u8..u64`, `bool` (1 bit), `char` (8 bits), `pointer`
    /// (pointer-size bits).
    Builtin { name: String, bit_size: u32 },
    /// Bit-size is the sum of member bit-sizes, each member rounded up to
    /// pointer size.
    Struct {
        name: String,
        members: Vec<(String, TypeHandle)>,
    },
    /// Bit-size = pointer size.
    Pointer { base: TypeHandle },
    /// Bit-size = pointer size (a handle, not inline storage).
    Array { base: TypeHandle },
    /// Unresolved reference; resolves through the registry lazily, never
    /// canonicalized eagerly (the registry may grow after this is parsed).
    Named { name: String },
}

pub struct TypeRegistry {
    arena: Vec<TypeKind>,
    pointer_bits: u32,
    named_types: HashMap<String, TypeHandle>,
    builtin_types: HashMap<String, TypeHandle>,
    struct_types: HashMap<String, TypeHandle>,
    pointer_types: HashMap<TypeHandle, TypeHandle>,
    array_types: HashMap<TypeHandle, TypeHandle>,
}

impl TypeRegistry {
    /// `pointer_bits` is the target's pointer width; this compiler only
    /// ever targets 64.
    pub fn new(pointer_bits: u32) -> Self {
        let mut reg = TypeRegistry {
            arena: Vec::new(),
            pointer_bits,
            named_types: HashMap::new(),
            builtin_types: HashMap::new(),
            struct_types: HashMap::new(),
            pointer_types: HashMap::new(),
            array_types: HashMap::new(),
        };
        reg.seed_builtins();
        reg
    }

    fn push(&mut self, kind: TypeKind) -> TypeHandle {
        self.arena.push(kind);
        TypeHandle(self.arena.len() - 1)
    }

    fn seed_builtins(&mut self) {
        let pointer_bits = self.pointer_bits;
        let builtins: &[(&str, u32)] = &[
            ("i8", 8),
            ("i16", 16),
            ("i32", 32),
            ("i64", 64),
            ("u8", 8),
            ("u16", 16),
            ("u32", 32),
            ("u64", 64),
            ("bool", 1),
            ("char", 8),
            ("pointer", pointer_bits),
        ];
        for &(name, bits) in builtins {
            self.register_builtin(name, bits);
        }
    }

    /// Registers a builtin scalar type externally; the driver seeds these
    /// before parsing begins.
    pub fn register_builtin(&mut self, name: &str, bit_size: u32) -> TypeHandle {
        if let Some(&h) = self.builtin_types.get(name) {
            return h;
        }
        let h = self.push(TypeKind::Builtin {
            name: name.to_string(),
            bit_size,
        });
        self.builtin_types.insert(name.to_string(), h);
        h
    }

    /// Registers a struct type externally, by its already-resolved member
    /// type handles.
    pub fn register_struct(&mut self, name: &str, members: Vec<(String, TypeHandle)>) -> TypeHandle {
        if let Some(&h) = self.struct_types.get(name) {
            return h;
        }
        let h = self.push(TypeKind::Struct {
            name: name.to_string(),
            members,
        });
        self.struct_types.insert(name.to_string(), h);
        h
    }

    /// Interns a `Named` reference on first request.
    pub fn named(&mut self, name: &str) -> TypeHandle {
        if let Some(&h) = self.named_types.get(name) {
            return h;
        }
        let h = self.push(TypeKind::Named {
            name: name.to_string(),
        });
        self.named_types.insert(name.to_string(), h);
        h
    }

    /// Interns `Pointer(base)` on first request, keyed by base handle.
    pub fn pointer_of(&mut self, base: TypeHandle) -> TypeHandle {
        if let Some(&h) = self.pointer_types.get(&base) {
            return h;
        }
        let h = self.push(TypeKind::Pointer { base });
        self.pointer_types.insert(base, h);
        h
    }

    /// Interns `Array(base)` on first request, keyed by base handle.
    pub fn array_of(&mut self, base: TypeHandle) -> TypeHandle {
        if let Some(&h) = self.array_types.get(&base) {
            return h;
        }
        let h = self.push(TypeKind::Array { base });
        self.array_types.insert(base, h);
        h
    }

    pub fn kind(&self, handle: TypeHandle) -> &TypeKind {
        &self.arena[handle.0]
    }

    /// Resolves a `Named` type to the `Builtin`/`Struct` it names; any
    /// other kind resolves to itself. Fails if the name has no registered
    /// backing type.
    pub fn resolve(&self, handle: TypeHandle) -> Result<TypeHandle, Error> {
        match self.kind(handle) {
            TypeKind::Named { name } => self
                .builtin_types
                .get(name)
                .or_else(|| self.struct_types.get(name))
                .copied()
                .ok_or_else(|| Error::Semantic {
                    at: Default::default(),
                    msg: format!("Undefined type '{}'", name),
                }),
            _ => Ok(handle),
        }
    }

    /// Structural equality after resolution: `Named` transparently
    /// resolves on every comparison, `Pointer`/`Array` recurse on base.
    pub fn are_same(&self, a: TypeHandle, b: TypeHandle) -> Result<bool, Error> {
        let ra = self.resolve(a)?;
        let rb = self.resolve(b)?;
        Ok(match (self.kind(ra), self.kind(rb)) {
            (TypeKind::Builtin { name: na, .. }, TypeKind::Builtin { name: nb, .. }) => na == nb,
            (TypeKind::Struct { name: na, .. }, TypeKind::Struct { name: nb, .. }) => na == nb,
            (TypeKind::Pointer { base: pa }, TypeKind::Pointer { base: pb }) => {
                self.are_same(*pa, *pb)?
            }
            (TypeKind::Array { base: pa }, TypeKind::Array { base: pb }) => {
                self.are_same(*pa, *pb)?
            }
            _ => false,
        })
    }

    /// The canonical string form, the function-mangling alphabet: builtin
    /// and struct names are their own name; pointers append `*`; arrays
    /// append `[]`.
    pub fn to_string(&self, handle: TypeHandle) -> String {
        match self.kind(handle) {
            TypeKind::Builtin { name, .. } => name.clone(),
            TypeKind::Struct { name, .. } => name.clone(),
            TypeKind::Pointer { base } => format!("{}*", self.to_string(*base)),
            TypeKind::Array { base } => format!("{}[]", self.to_string(*base)),
            TypeKind::Named { name } => name.clone(),
        }
    }

    /// Bit-size of a resolved type: builtins carry their own; structs sum
    /// member bit-sizes, each member rounded up to pointer size; pointers
    /// and arrays are pointer-size.
    pub fn bit_size(&self, handle: TypeHandle) -> Result<u32, Error> {
        let resolved = self.resolve(handle)?;
        Ok(match self.kind(resolved) {
            TypeKind::Builtin { bit_size, .. } => *bit_size,
            TypeKind::Struct { members, .. } => {
                let mut total = 0u32;
                for (_, member) in members {
                    let bits = self.bit_size(*member)?;
                    total += bits.div_ceil(self.pointer_bits) * self.pointer_bits;
                }
                total
            }
            TypeKind::Pointer { .. } | TypeKind::Array { .. } => self.pointer_bits,
            TypeKind::Named { .. } => unreachable!("resolve() never returns Named"),
        })
    }

    pub fn pointer_bits(&self) -> u32 {
        self.pointer_bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_of_is_identical_across_calls() {
        let mut reg = TypeRegistry::new(64);
        let i64h = reg.named("i64");
        let p1 = reg.pointer_of(i64h);
        let p2 = reg.pointer_of(i64h);
        assert_eq!(p1, p2);
    }

    #[test]
    fn array_of_same_base_is_structurally_same() {
        let mut reg = TypeRegistry::new(64);
        let i64h = reg.named("i64");
        let a1 = reg.array_of(i64h);
        let a2 = reg.array_of(i64h);
        assert!(reg.are_same(a1, a2).unwrap());
    }

    #[test]
    fn named_resolves_lazily() {
        let mut reg = TypeRegistry::new(64);
        // `Named` interned before the registry knows about "i64" as a
        // builtin would, in this registry, simply never resolve — but
        // seed_builtins() always runs first, so resolution succeeds.
        let named = reg.named("i64");
        let builtin = reg.named("i64"); // same interned Named handle
        assert_eq!(named, builtin);
        assert!(reg.are_same(named, builtin).unwrap());
        let resolved = reg.resolve(named).unwrap();
        assert_eq!(reg.to_string(resolved), "i64");
    }

    #[test]
    fn mangling_alphabet() {
        let mut reg = TypeRegistry::new(64);
        let i64h = reg.named("i64");
        let p = reg.pointer_of(i64h);
        let arr = reg.array_of(p);
        assert_eq!(reg.to_string(arr), "i64*[]");
    }
}
