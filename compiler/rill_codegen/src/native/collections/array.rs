//! Growable array helpers.
//!
//! ```text
//!   rl.array  [class][len][cap][data][kind]
//!   data      cap words, raw elements of `kind`
//! ```
//!
//! Growth doubles the capacity (from at least one) until the requested
//! length fits, copies the live prefix and frees the old storage.

use rill_native::abi::{array as fields, BuiltinClass, ElemKind, MIN_ARRAY_CAPACITY};
use rill_native::{BinOp, CmpPred, FuncId, NativeType};

use super::{helper, words_bytes, Helper};
use crate::native::{NativeOut, Rt};

const PTR: NativeType = NativeType::Ptr;
const I64: NativeType = NativeType::I64;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(in crate::native) enum ArrayFn {
    /// `(capacity) -> array`
    New,
    /// `(array, needed) -> array`
    Grow,
    /// `(array, elem) -> array`
    Push,
    /// `(array, index) -> elem`
    Get,
    /// `(array, index, elem) -> elem`
    Set,
    /// `(array) -> elem`
    Pop,
}

impl ArrayFn {
    fn name(self) -> &'static str {
        match self {
            ArrayFn::New => "new",
            ArrayFn::Grow => "grow",
            ArrayFn::Push => "push",
            ArrayFn::Get => "get",
            ArrayFn::Set => "set",
            ArrayFn::Pop => "pop",
        }
    }
}

/// Helper `op` for arrays of `kind`, and its result type.
pub(in crate::native) fn array_fn(out: &mut NativeOut, op: ArrayFn, kind: ElemKind) -> (FuncId, NativeType) {
    let elem = kind.native_type();
    let name = format!("rl.array.{}.{}", op.name(), kind.suffix());
    let (params, ret) = match op {
        ArrayFn::New => (vec![I64], PTR),
        ArrayFn::Grow => (vec![PTR, I64], PTR),
        ArrayFn::Push => (vec![PTR, elem], PTR),
        ArrayFn::Get => (vec![PTR, I64], elem),
        ArrayFn::Set => (vec![PTR, I64, elem], elem),
        ArrayFn::Pop => (vec![PTR], elem),
    };
    let id = helper(out, &name, params, ret, |h| match op {
        ArrayFn::New => build_new(h, kind),
        ArrayFn::Grow => build_grow(h, kind),
        ArrayFn::Push => build_push(h, kind),
        ArrayFn::Get => build_get(h, kind),
        ArrayFn::Set => build_set(h, kind),
        ArrayFn::Pop => build_pop(h, kind),
    });
    (id, ret)
}

fn build_new(h: &mut Helper<'_>, kind: ElemKind) {
    let layout = h.out.abi.array;
    let requested = h.fb.param(0);
    let min = h.int(MIN_ARRAY_CAPACITY);
    let small = h.cmp(CmpPred::Lt, requested, min);
    let cap = h.fb.select(small, min, requested);

    let header_bytes = h.int(words_bytes(5));
    let arr = h.rt(Rt::Alloc, vec![header_bytes]);
    let word = h.int(words_bytes(1));
    let data_bytes = h.fb.binary(BinOp::Mul, cap, word);
    let data = h.rt(Rt::Alloc, vec![data_bytes]);

    let tag = h.int(BuiltinClass::Array.tag());
    let zero = h.int(0);
    let kind_tag = h.int(kind.tag());
    h.set(arr, layout, fields::CLASS, tag);
    h.set(arr, layout, fields::LEN, zero);
    h.set(arr, layout, fields::CAP, cap);
    h.set(arr, layout, fields::DATA, data);
    h.set(arr, layout, fields::KIND, kind_tag);
    h.fb.ret(Some(arr));
}

fn build_grow(h: &mut Helper<'_>, kind: ElemKind) {
    let layout = h.out.abi.array;
    let (arr, needed) = (h.fb.param(0), h.fb.param(1));
    let cap = h.get(arr, layout, fields::CAP);
    let fits = h.cmp(CmpPred::Le, needed, cap);
    let done = h.split(fits, "fits");
    let resume = h.fb.current_block();
    h.fb.position_at(done);
    h.fb.ret(Some(arr));
    h.fb.position_at(resume);

    // new capacity: double from max(cap, 1) until it holds `needed`
    let one = h.int(1);
    let tiny = h.cmp(CmpPred::Lt, cap, one);
    let start = h.fb.select(tiny, one, cap);
    let new_cap = h.var(start);
    let double_head = h.fb.new_block("double.head");
    let double_body = h.fb.new_block("double.body");
    let copy = h.fb.new_block("copy");
    h.fb.br(double_head);

    h.fb.position_at(double_head);
    let c = h.read(new_cap, I64);
    let short = h.cmp(CmpPred::Lt, c, needed);
    h.fb.cond_br(short, double_body, copy);

    h.fb.position_at(double_body);
    let c = h.read(new_cap, I64);
    let two = h.int(2);
    let doubled = h.fb.binary(BinOp::Mul, c, two);
    h.fb.store(new_cap, doubled);
    h.fb.br(double_head);

    h.fb.position_at(copy);
    let c = h.read(new_cap, I64);
    let word = h.int(words_bytes(1));
    let bytes = h.fb.binary(BinOp::Mul, c, word);
    let data = h.rt(Rt::Alloc, vec![bytes]);
    let old = h.get(arr, layout, fields::DATA);
    let len = h.get(arr, layout, fields::LEN);
    copy_words(h, old, data, len, kind.native_type());
    let _ = h.rt(Rt::Free, vec![old]);
    h.set(arr, layout, fields::DATA, data);
    h.set(arr, layout, fields::CAP, c);
    h.fb.ret(Some(arr));
}

/// Copy words `0..len` of `from` into `to`.
fn copy_words(
    h: &mut Helper<'_>,
    from: rill_native::ValueId,
    to: rill_native::ValueId,
    len: rill_native::ValueId,
    ty: NativeType,
) {
    let zero = h.int(0);
    let i = h.var(zero);
    let head = h.fb.new_block("copy.head");
    let body = h.fb.new_block("copy.body");
    let exit = h.fb.new_block("copy.exit");
    h.fb.br(head);

    h.fb.position_at(head);
    let at = h.read(i, I64);
    let more = h.cmp(CmpPred::Lt, at, len);
    h.fb.cond_br(more, body, exit);

    h.fb.position_at(body);
    let at = h.read(i, I64);
    let src = h.word(from, at);
    let value = h.fb.load(ty, src);
    let dst = h.word(to, at);
    h.fb.store(dst, value);
    h.bump(i);
    h.fb.br(head);

    h.fb.position_at(exit);
}

fn build_push(h: &mut Helper<'_>, kind: ElemKind) {
    let layout = h.out.abi.array;
    let (arr, value) = (h.fb.param(0), h.fb.param(1));
    let len = h.get(arr, layout, fields::LEN);
    let one = h.int(1);
    let needed = h.fb.binary(BinOp::Add, len, one);
    let (grow, _) = array_fn(h.out, ArrayFn::Grow, kind);
    let _ = h.call(grow, vec![arr, needed], PTR);
    let data = h.get(arr, layout, fields::DATA);
    let slot = h.word(data, len);
    h.fb.store(slot, value);
    h.set(arr, layout, fields::LEN, needed);
    h.fb.ret(Some(arr));
}

/// `index` resolved against `len`: negative indices count from the end.
fn resolve_index(
    h: &mut Helper<'_>,
    index: rill_native::ValueId,
    len: rill_native::ValueId,
) -> rill_native::ValueId {
    let zero = h.int(0);
    let negative = h.cmp(CmpPred::Lt, index, zero);
    let from_end = h.fb.binary(BinOp::Add, index, len);
    h.fb.select(negative, from_end, index)
}

fn index_error(h: &mut Helper<'_>) {
    h.raise("IndexError", "index outside of array bounds");
}

fn build_get(h: &mut Helper<'_>, kind: ElemKind) {
    let layout = h.out.abi.array;
    let (arr, index) = (h.fb.param(0), h.fb.param(1));
    let len = h.get(arr, layout, fields::LEN);
    let at = resolve_index(h, index, len);
    let zero = h.int(0);
    let below = h.cmp(CmpPred::Lt, at, zero);
    let above = h.cmp(CmpPred::Ge, at, len);
    let outside = h.fb.select(below, below, above);
    let miss = h.split(outside, "outside");
    let resume = h.fb.current_block();

    h.fb.position_at(miss);
    match kind {
        ElemKind::Boxed => {
            let nil = h.fb.null();
            h.fb.ret(Some(nil));
        }
        ElemKind::Int | ElemKind::Float => index_error(h),
    }

    h.fb.position_at(resume);
    let data = h.get(arr, layout, fields::DATA);
    let slot = h.word(data, at);
    let value = h.fb.load(kind.native_type(), slot);
    h.fb.ret(Some(value));
}

fn build_set(h: &mut Helper<'_>, kind: ElemKind) {
    let layout = h.out.abi.array;
    let (arr, index, value) = (h.fb.param(0), h.fb.param(1), h.fb.param(2));
    let len = h.get(arr, layout, fields::LEN);
    let at = resolve_index(h, index, len);
    let zero = h.int(0);
    let below = h.cmp(CmpPred::Lt, at, zero);
    let miss = h.split(below, "before.start");
    let resume = h.fb.current_block();
    h.fb.position_at(miss);
    index_error(h);

    h.fb.position_at(resume);
    let one = h.int(1);
    let needed = h.fb.binary(BinOp::Add, at, one);
    let (grow, _) = array_fn(h.out, ArrayFn::Grow, kind);
    let _ = h.call(grow, vec![arr, needed], PTR);
    let data = h.get(arr, layout, fields::DATA);
    let slot = h.word(data, at);
    h.fb.store(slot, value);

    let extends = h.cmp(CmpPred::Ge, at, len);
    let extend = h.split(extends, "extend");
    let done = h.fb.current_block();
    h.fb.position_at(extend);
    h.set(arr, layout, fields::LEN, needed);
    h.fb.br(done);

    h.fb.position_at(done);
    h.fb.ret(Some(value));
}

/// Popping an empty array yields `nil` for boxed storage and zero for raw
/// storage.
fn build_pop(h: &mut Helper<'_>, kind: ElemKind) {
    let layout = h.out.abi.array;
    let ty = kind.native_type();
    let arr = h.fb.param(0);
    let len = h.get(arr, layout, fields::LEN);
    let zero = h.int(0);
    let empty = h.cmp(CmpPred::Eq, len, zero);
    let on_empty = h.split(empty, "empty");
    let resume = h.fb.current_block();
    h.fb.position_at(on_empty);
    let nothing = h.zero(ty);
    h.fb.ret(Some(nothing));

    h.fb.position_at(resume);
    let one = h.int(1);
    let last = h.fb.binary(BinOp::Sub, len, one);
    let data = h.get(arr, layout, fields::DATA);
    let slot = h.word(data, last);
    let value = h.fb.load(ty, slot);
    let cleared = h.zero(ty);
    h.fb.store(slot, cleared);
    h.set(arr, layout, fields::LEN, last);
    h.fb.ret(Some(value));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CodegenCx, Findings};
    use crate::options::CodegenOptions;
    use rill_ir::{Program, StringInterner};
    use rill_native::verify_module;

    #[test]
    fn helpers_are_emitted_once_per_kind_and_verify() {
        let interner = StringInterner::new();
        let program = Program::new(Vec::new(), Vec::new());
        let options = CodegenOptions::default();
        let mut findings = Findings::new();
        let Ok(cx) = CodegenCx::new(&program, &interner, &options, &mut findings) else {
            panic!("context should build");
        };
        let mut out = NativeOut::new(&cx);
        let (a, _) = array_fn(&mut out, ArrayFn::Set, ElemKind::Int);
        let (b, _) = array_fn(&mut out, ArrayFn::Set, ElemKind::Int);
        let (c, ret) = array_fn(&mut out, ArrayFn::Get, ElemKind::Float);
        let _ = array_fn(&mut out, ArrayFn::Push, ElemKind::Boxed);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(ret, NativeType::F64);
        assert!(out.module.function_id("rl.array.grow.int").is_some());
        assert!(out.module.function_id("rl.array.push.boxed").is_some());
        assert!(verify_module(&out.module).is_ok());
    }
}
