//! Representation changes and small value helpers.

use rill_native::{CastOp, FunctionBuilder, ValueId, WORD};

use super::lowerer::Unit;
use super::{NativeOut, Rt};
use crate::context::CodegenCx;
use crate::repr::{Repr, Tracked};

/// Call runtime entry point `rt`.
pub(super) fn call_rt(fb: &mut FunctionBuilder, out: &mut NativeOut, rt: Rt, args: Vec<ValueId>) -> ValueId {
    let callee = out.rt(rt);
    fb.call(callee, args, rt.ret())
}

/// Box an unboxed `value` held at `repr`. Pointers pass through.
pub(super) fn box_value(fb: &mut FunctionBuilder, out: &mut NativeOut, value: ValueId, repr: Repr) -> ValueId {
    match repr {
        Repr::Int => call_rt(fb, out, Rt::BoxInt, vec![value]),
        Repr::Float => call_rt(fb, out, Rt::BoxFloat, vec![value]),
        Repr::Bool => call_rt(fb, out, Rt::BoxBool, vec![value]),
        _ => value,
    }
}

/// Convert `value` to representation `to`.
///
/// Widening between primitives is a cast, primitives reach pointer
/// representations by boxing, and pointers narrow through the runtime's
/// checked conversions.
pub(super) fn materialize(
    fb: &mut FunctionBuilder,
    out: &mut NativeOut,
    cx: &CodegenCx<'_>,
    value: Tracked<ValueId>,
    to: Repr,
) -> ValueId {
    let (from, v) = (value.repr, value.value);
    if from == to {
        return v;
    }
    match (from, to) {
        (Repr::Int, Repr::Float) => fb.cast(CastOp::SiToFp, v),
        (Repr::Float, Repr::Int) => fb.cast(CastOp::FpToSi, v),
        (Repr::Bool, Repr::Int) => fb.cast(CastOp::BoolToInt, v),
        (Repr::Bool, Repr::Float) => {
            let int = fb.cast(CastOp::BoolToInt, v);
            fb.cast(CastOp::SiToFp, int)
        }
        (Repr::Int | Repr::Float, Repr::Bool) => fb.bconst(true),
        (_, Repr::Bool) => call_rt(fb, out, Rt::Truthy, vec![v]),
        (from, to) if from.is_unboxed() => {
            let boxed = box_value(fb, out, v, from);
            materialize(
                fb,
                out,
                cx,
                Tracked {
                    value: boxed,
                    repr: Repr::Boxed,
                },
                to,
            )
        }
        (_, Repr::Int) => call_rt(fb, out, Rt::UnboxInt, vec![v]),
        (_, Repr::Float) => call_rt(fb, out, Rt::UnboxFloat, vec![v]),
        (_, Repr::Boxed) => v,
        (Repr::Struct(sub), Repr::Struct(class)) if cx.classes.is_subclass(sub, class) => v,
        (_, Repr::Struct(class)) => {
            let name = out.module.text(cx.name(class));
            let name = fb.global_addr(name);
            call_rt(fb, out, Rt::CheckClass, vec![v, name])
        }
        (_, Repr::Array(kind)) => {
            let tag = fb.iconst(kind.tag());
            call_rt(fb, out, Rt::ArrayCoerce, vec![v, tag])
        }
        (_, Repr::Hash(kind)) => {
            let tag = fb.iconst(kind.tag());
            call_rt(fb, out, Rt::HashCoerce, vec![v, tag])
        }
    }
}

impl Unit<'_, '_> {
    /// A fresh stack vector holding boxed `values`; null when empty.
    pub(super) fn argv(&mut self, values: &[ValueId]) -> ValueId {
        if values.is_empty() {
            return self.fb.null();
        }
        let words = u32::try_from(values.len()).unwrap_or(u32::MAX);
        let base = self.fb.alloca(words);
        for (i, value) in values.iter().enumerate() {
            let offset = self.fb.iconst(i64::try_from(i).unwrap_or(0) * i64::from(WORD));
            let addr = self.fb.ptr_add(base, offset);
            self.fb.store(addr, *value);
        }
        base
    }

    /// Word `index` of the pointer `base`.
    pub(super) fn load_word(&mut self, base: ValueId, index: u32, ty: rill_native::NativeType) -> ValueId {
        let offset = self.fb.iconst(i64::from(index) * i64::from(WORD));
        let addr = self.fb.ptr_add(base, offset);
        self.fb.load(ty, addr)
    }

    pub(super) fn store_word(&mut self, base: ValueId, index: u32, value: ValueId) {
        let offset = self.fb.iconst(i64::from(index) * i64::from(WORD));
        let addr = self.fb.ptr_add(base, offset);
        self.fb.store(addr, value);
    }
}
