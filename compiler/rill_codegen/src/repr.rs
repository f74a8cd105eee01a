//! Physical representations and the per-function representation tracker.
//!
//! Every value a lowerer produces carries a [`Repr`] saying how it is held
//! right now: an unboxed primitive, a boxed dynamic value, a pointer to a
//! known class's struct, or a collection handle with a known element or
//! key kind. Consumers never assume the producer matches what they need;
//! they ask their target adapter to materialize the value at the required
//! representation.
//!
//! # Unification
//!
//! ```text
//!   same      ∪ same      = same
//!   Int       ∪ Float     = Float
//!   otherwise             = Boxed
//! ```

use rill_ir::{BindingId, Name, Ty};
use rill_native::abi::{ElemKind, KeyKind};
use rill_native::NativeType;
use rustc_hash::{FxHashMap, FxHashSet};

/// How a value is physically held.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Repr {
    Int,
    Float,
    Bool,
    /// Boxed dynamic value; `nil` is null.
    Boxed,
    /// Pointer to an instance of a registered class (or a subclass).
    Struct(Name),
    Array(ElemKind),
    Hash(KeyKind),
}

impl Repr {
    /// Representation for a value of static type `ty`. `is_class` says
    /// whether a class name is registered; unregistered class types stay
    /// boxed.
    pub fn of(ty: &Ty, is_class: impl Fn(Name) -> bool) -> Repr {
        match ty {
            Ty::Int => Repr::Int,
            Ty::Float => Repr::Float,
            Ty::Bool => Repr::Bool,
            Ty::Class(name) if is_class(*name) => Repr::Struct(*name),
            Ty::Array(elem) => Repr::Array(match **elem {
                Ty::Int => ElemKind::Int,
                Ty::Float => ElemKind::Float,
                _ => ElemKind::Boxed,
            }),
            Ty::Hash(key, _) => Repr::Hash(match **key {
                Ty::Int => KeyKind::Int,
                Ty::Str => KeyKind::Text,
                _ => KeyKind::Value,
            }),
            _ => Repr::Boxed,
        }
    }

    #[must_use]
    pub fn unify(self, other: Repr) -> Repr {
        match (self, other) {
            (a, b) if a == b => a,
            (Repr::Int, Repr::Float) | (Repr::Float, Repr::Int) => Repr::Float,
            _ => Repr::Boxed,
        }
    }

    #[inline]
    pub fn is_unboxed(self) -> bool {
        matches!(self, Repr::Int | Repr::Float | Repr::Bool)
    }

    pub fn native_type(self) -> NativeType {
        match self {
            Repr::Int => NativeType::I64,
            Repr::Float => NativeType::F64,
            Repr::Bool => NativeType::I1,
            Repr::Boxed | Repr::Struct(_) | Repr::Array(_) | Repr::Hash(_) => NativeType::Ptr,
        }
    }

    /// Element representation of a raw array element of `kind`.
    pub fn of_elem(kind: ElemKind) -> Repr {
        match kind {
            ElemKind::Int => Repr::Int,
            ElemKind::Float => Repr::Float,
            ElemKind::Boxed => Repr::Boxed,
        }
    }

    /// Representation of a raw hash key of `kind`.
    pub fn of_key(kind: KeyKind) -> Repr {
        match kind {
            KeyKind::Int => Repr::Int,
            KeyKind::Text | KeyKind::Value => Repr::Boxed,
        }
    }
}

/// A tracked binding: the target value holding it and its representation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Tracked<V> {
    pub value: V,
    pub repr: Repr,
}

/// Binding → (value, representation) for one function or callback.
///
/// Generic over the adapter's value handle: native lowering tracks SSA
/// value ids, managed lowering tracks local variable slots. Bindings whose
/// class is known exactly (results of `new`) are remembered separately so
/// dispatch can call the method directly.
#[derive(Debug)]
pub struct ReprTracker<V> {
    bindings: FxHashMap<BindingId, Tracked<V>>,
    exact: FxHashSet<BindingId>,
}

impl<V> Default for ReprTracker<V> {
    fn default() -> Self {
        ReprTracker {
            bindings: FxHashMap::default(),
            exact: FxHashSet::default(),
        }
    }
}

impl<V: Copy> ReprTracker<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, binding: BindingId, value: V, repr: Repr) {
        self.bindings.insert(binding, Tracked { value, repr });
    }

    pub fn get(&self, binding: BindingId) -> Option<Tracked<V>> {
        self.bindings.get(&binding).copied()
    }

    #[allow(dead_code)]
    pub fn repr_of(&self, binding: BindingId) -> Option<Repr> {
        self.bindings.get(&binding).map(|t| t.repr)
    }

    pub fn mark_exact(&mut self, binding: BindingId) {
        self.exact.insert(binding);
    }

    pub fn is_exact(&self, binding: BindingId) -> bool {
        self.exact.contains(&binding)
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn clear(&mut self) {
        self.bindings.clear();
        self.exact.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_ir::StringInterner;

    #[test]
    fn unify_widens_numeric_pairs_to_float() {
        assert_eq!(Repr::Int.unify(Repr::Float), Repr::Float);
        assert_eq!(Repr::Float.unify(Repr::Int), Repr::Float);
        assert_eq!(Repr::Int.unify(Repr::Int), Repr::Int);
    }

    #[test]
    fn unify_falls_back_to_boxed() {
        assert_eq!(Repr::Int.unify(Repr::Boxed), Repr::Boxed);
        assert_eq!(Repr::Bool.unify(Repr::Int), Repr::Boxed);
        assert_eq!(
            Repr::Array(ElemKind::Int).unify(Repr::Array(ElemKind::Float)),
            Repr::Boxed
        );
    }

    #[test]
    fn static_types_pick_representations() {
        let interner = StringInterner::new();
        let point = interner.intern("Point");
        let other = interner.intern("Other");
        let known = |name: Name| name == point;

        assert_eq!(Repr::of(&Ty::Int, known), Repr::Int);
        assert_eq!(Repr::of(&Ty::Nil, known), Repr::Boxed);
        assert_eq!(Repr::of(&Ty::Class(point), known), Repr::Struct(point));
        assert_eq!(Repr::of(&Ty::Class(other), known), Repr::Boxed);
        assert_eq!(Repr::of(&Ty::array(Ty::Float), known), Repr::Array(ElemKind::Float));
        assert_eq!(Repr::of(&Ty::array(Ty::Str), known), Repr::Array(ElemKind::Boxed));
        assert_eq!(Repr::of(&Ty::hash(Ty::Str, Ty::Int), known), Repr::Hash(KeyKind::Text));
        assert_eq!(Repr::of(&Ty::hash(Ty::Int, Ty::Int), known), Repr::Hash(KeyKind::Int));
        assert_eq!(Repr::of(&Ty::hash(Ty::Float, Ty::Int), known), Repr::Hash(KeyKind::Value));
        assert_eq!(Repr::of(&Ty::Union(vec![Ty::Int, Ty::Nil]), known), Repr::Boxed);
    }

    #[test]
    fn tracker_resets() {
        let mut tracker: ReprTracker<u32> = ReprTracker::new();
        let b = BindingId::new(3);
        tracker.record(b, 7, Repr::Int);
        tracker.mark_exact(b);
        assert_eq!(tracker.get(b), Some(Tracked { value: 7, repr: Repr::Int }));
        assert!(tracker.is_exact(b));
        tracker.clear();
        assert!(tracker.is_empty());
        assert!(!tracker.is_exact(b));
    }
}
