//! Native value types and the struct-type table.

use std::fmt;

use rustc_hash::FxHashMap;

use crate::StructId;

/// Size of every memory field, in bytes.
pub const WORD: u32 = 8;

/// Physical type of a native value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NativeType {
    I1,
    I64,
    F64,
    Ptr,
    Void,
}

impl NativeType {
    pub fn name(self) -> &'static str {
        match self {
            NativeType::I1 => "i1",
            NativeType::I64 => "i64",
            NativeType::F64 => "f64",
            NativeType::Ptr => "ptr",
            NativeType::Void => "void",
        }
    }
}

impl fmt::Display for NativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Function signature.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Signature {
    pub params: Vec<NativeType>,
    pub ret: NativeType,
}

impl Signature {
    pub fn new(params: Vec<NativeType>, ret: NativeType) -> Self {
        Signature { params, ret }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (", self.ret)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{p}")?;
        }
        write!(f, ")")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructField {
    pub name: String,
    pub ty: NativeType,
    pub offset: u32,
}

/// Ordered field list with byte offsets computed once at definition.
///
/// Every field occupies one word; `i1` fields are widened to a word in
/// memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructLayout {
    pub name: String,
    pub fields: Vec<StructField>,
    pub size: u32,
}

impl StructLayout {
    pub fn field(&self, index: u32) -> Option<&StructField> {
        self.fields.get(index as usize)
    }

    pub fn field_index(&self, name: &str) -> Option<u32> {
        self.fields
            .iter()
            .position(|f| f.name == name)
            .and_then(|i| u32::try_from(i).ok())
    }

    pub fn words(&self) -> u32 {
        self.size / WORD
    }
}

/// Module-wide table of named struct layouts.
#[derive(Default, Debug, Clone)]
pub struct StructTable {
    layouts: Vec<StructLayout>,
    by_name: FxHashMap<String, StructId>,
}

impl StructTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a layout, or return the existing one with the same name.
    pub fn define(&mut self, name: &str, fields: &[(&str, NativeType)]) -> StructId {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let mut offset = 0;
        let fields = fields
            .iter()
            .map(|(field, ty)| {
                let f = StructField {
                    name: (*field).to_owned(),
                    ty: *ty,
                    offset,
                };
                offset += WORD;
                f
            })
            .collect();
        let id = StructId::from_len(self.layouts.len());
        self.layouts.push(StructLayout {
            name: name.to_owned(),
            fields,
            size: offset,
        });
        self.by_name.insert(name.to_owned(), id);
        id
    }

    /// Define a layout whose field list is owned.
    pub fn define_owned(&mut self, name: &str, fields: Vec<(String, NativeType)>) -> StructId {
        let borrowed: Vec<(&str, NativeType)> =
            fields.iter().map(|(n, t)| (n.as_str(), *t)).collect();
        self.define(name, &borrowed)
    }

    pub fn get(&self, id: StructId) -> &StructLayout {
        &self.layouts[id.index()]
    }

    pub fn lookup(&self, name: &str) -> Option<StructId> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (StructId, &StructLayout)> {
        self.layouts
            .iter()
            .enumerate()
            .map(|(i, l)| (StructId::from_len(i), l))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_are_word_sized() {
        let mut table = StructTable::new();
        let id = table.define(
            "point",
            &[("x", NativeType::F64), ("y", NativeType::F64), ("live", NativeType::I1)],
        );
        let layout = table.get(id);
        let offsets: Vec<u32> = layout.fields.iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 8, 16]);
        assert_eq!(layout.size, 24);
        assert_eq!(layout.field_index("y"), Some(1));
    }

    #[test]
    fn redefinition_returns_existing_layout() {
        let mut table = StructTable::new();
        let a = table.define("env", &[("a", NativeType::I64)]);
        let b = table.define("env", &[("a", NativeType::I64), ("b", NativeType::Ptr)]);
        assert_eq!(a, b);
        assert_eq!(table.get(a).fields.len(), 1);
    }
}
