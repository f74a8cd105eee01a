//! Native arrays and hash tables.
//!
//! Every array and hash operation on a specialized collection calls a
//! module helper function (`rl.array.*`, `rl.hash.*`), one per operation
//! and element or key kind, emitted on first use. The helpers implement
//! the same algorithms as the runtime, on the same memory layout, so either
//! side can read what the other wrote. Collections whose kind is not known
//! statically go through named dispatch.

mod array;
mod hash;

use rill_ir::{Operand, Ty};
use rill_native::abi::{ElemKind, KeyKind};
use rill_native::{
    BinOp, BlockId, Callee, CmpPred, FuncId, FunctionBuilder, FunctionFlags, NativeType, Signature,
    StructId, ValueId, WORD,
};

use super::lowerer::Unit;
use super::{values, NativeOut, Rt};
use crate::repr::{Repr, Tracked};
use crate::CodegenError;

pub(super) use array::{array_fn, ArrayFn};
pub(super) use hash::{hash_fn, HashFn};

/// Builder state of one helper function.
pub(super) struct Helper<'o> {
    pub(super) fb: FunctionBuilder,
    pub(super) out: &'o mut NativeOut,
}

impl Helper<'_> {
    pub(super) fn int(&mut self, v: i64) -> ValueId {
        self.fb.iconst(v)
    }

    pub(super) fn get(&mut self, base: ValueId, layout: StructId, field: u32) -> ValueId {
        self.fb.load_field(&self.out.structs, base, layout, field)
    }

    pub(super) fn get_as(&mut self, ty: NativeType, base: ValueId, layout: StructId, field: u32) -> ValueId {
        let addr = self.fb.field_addr(&self.out.structs, base, layout, field);
        self.fb.load(ty, addr)
    }

    pub(super) fn set(&mut self, base: ValueId, layout: StructId, field: u32, value: ValueId) {
        self.fb.store_field(&self.out.structs, base, layout, field, value);
    }

    pub(super) fn rt(&mut self, rt: Rt, args: Vec<ValueId>) -> ValueId {
        values::call_rt(&mut self.fb, self.out, rt, args)
    }

    pub(super) fn call(&mut self, func: FuncId, args: Vec<ValueId>, ret: NativeType) -> ValueId {
        self.fb.call(Callee::Func(func), args, ret)
    }

    /// A mutable one-word local initialized to `init`.
    pub(super) fn var(&mut self, init: ValueId) -> ValueId {
        let slot = self.fb.alloca(1);
        self.fb.store(slot, init);
        slot
    }

    pub(super) fn read(&mut self, var: ValueId, ty: NativeType) -> ValueId {
        self.fb.load(ty, var)
    }

    /// `*var += 1`.
    pub(super) fn bump(&mut self, var: ValueId) {
        let v = self.fb.load(NativeType::I64, var);
        let one = self.fb.iconst(1);
        let next = self.fb.binary(BinOp::Add, v, one);
        self.fb.store(var, next);
    }

    pub(super) fn cmp(&mut self, pred: CmpPred, a: ValueId, b: ValueId) -> ValueId {
        self.fb.icmp(pred, a, b)
    }

    /// Branch to a fresh block when `cond` holds, continue in another.
    /// Returns the `then` block; the builder is left positioned at the
    /// continuation.
    pub(super) fn split(&mut self, cond: ValueId, name: &str) -> BlockId {
        let then_block = self.fb.new_block(name);
        let cont = self.fb.new_block(&format!("{name}.cont"));
        self.fb.cond_br(cond, then_block, cont);
        self.fb.position_at(cont);
        then_block
    }

    /// Raise `class` with `message` and stop.
    pub(super) fn raise(&mut self, class: &str, message: &str) {
        let class = self.out.module.text(class);
        let class = self.fb.global_addr(class);
        let message = self.out.module.text(message);
        let message = self.fb.global_addr(message);
        let message = self.rt(Rt::StrLit, vec![message]);
        let _ = self.rt(Rt::Raise, vec![class, message]);
        self.fb.unreachable();
    }

    /// Address of word `index` of `base`.
    pub(super) fn word(&mut self, base: ValueId, index: ValueId) -> ValueId {
        self.fb.word_addr(base, index)
    }

    pub(super) fn zero(&mut self, ty: NativeType) -> ValueId {
        match ty {
            NativeType::F64 => self.fb.fconst(0.0),
            NativeType::I1 => self.fb.bconst(false),
            NativeType::Ptr => self.fb.null(),
            _ => self.fb.iconst(0),
        }
    }
}

/// Declare helper `name` and build its body once.
pub(super) fn helper(
    out: &mut NativeOut,
    name: &str,
    params: Vec<NativeType>,
    ret: NativeType,
    build: impl FnOnce(&mut Helper<'_>),
) -> FuncId {
    if let Some(id) = out.module.function_id(name) {
        return id;
    }
    let sig = Signature::new(params, ret);
    let id = out
        .module
        .declare_function(name, sig.clone(), FunctionFlags::HELPER);
    let mut h = Helper {
        fb: FunctionBuilder::new(&sig),
        out,
    };
    build(&mut h);
    let Helper { fb, out } = h;
    out.define(id, fb);
    id
}

/// Element kind of arrays of static type `ty`.
fn elem_kind_of(repr: Repr) -> ElemKind {
    match repr {
        Repr::Array(kind) => kind,
        _ => ElemKind::Boxed,
    }
}

fn key_kind_of(repr: Repr) -> KeyKind {
    match repr {
        Repr::Hash(kind) => kind,
        _ => KeyKind::Value,
    }
}

impl Unit<'_, '_> {
    fn array_op(&mut self, op: ArrayFn, kind: ElemKind, args: Vec<ValueId>) -> ValueId {
        let (id, ret) = array_fn(self.out, op, kind);
        self.call_func(id, args, ret)
    }

    fn hash_op(&mut self, op: HashFn, kind: KeyKind, args: Vec<ValueId>) -> ValueId {
        let (id, ret) = hash_fn(self.out, op, kind);
        self.call_func(id, args, ret)
    }

    /// Named call of builtin collection method `method` on an untyped
    /// collection.
    fn collection_send(
        &mut self,
        recv: Tracked<ValueId>,
        method: &str,
        args: &[Tracked<ValueId>],
        block: Option<ValueId>,
    ) -> Tracked<ValueId> {
        let recv = self.boxed(recv);
        let boxed: Vec<ValueId> = args.iter().map(|a| self.boxed(*a)).collect();
        let value = self.send_boxed(recv, method, &boxed, block);
        Tracked {
            value,
            repr: Repr::Boxed,
        }
    }

    // -- Arrays --

    pub(super) fn array_literal(&mut self, elements: &[Operand], ty: &Ty) -> Result<Tracked<ValueId>, CodegenError> {
        let kind = elem_kind_of(self.cx.classes.repr_of(ty));
        let elem = Repr::of_elem(kind);
        let values = elements
            .iter()
            .map(|e| self.operand_as(e, elem))
            .collect::<Result<Vec<_>, _>>()?;
        let cap = self.fb.iconst(i64::try_from(values.len()).unwrap_or(0));
        let arr = self.array_op(ArrayFn::New, kind, vec![cap]);
        for value in values {
            let _ = self.array_op(ArrayFn::Push, kind, vec![arr, value]);
        }
        Ok(Tracked {
            value: arr,
            repr: Repr::Array(kind),
        })
    }

    pub(super) fn array_get(&mut self, array: &Operand, index: &Operand) -> Result<Tracked<ValueId>, CodegenError> {
        let arr = self.operand(array)?;
        let Repr::Array(kind) = arr.repr else {
            let index = self.operand(index)?;
            return Ok(self.collection_send(arr, "[]", &[index], None));
        };
        let index = self.operand_as(index, Repr::Int)?;
        Ok(Tracked {
            value: self.array_op(ArrayFn::Get, kind, vec![arr.value, index]),
            repr: Repr::of_elem(kind),
        })
    }

    pub(super) fn array_set(
        &mut self,
        array: &Operand,
        index: &Operand,
        value: &Operand,
    ) -> Result<Tracked<ValueId>, CodegenError> {
        let arr = self.operand(array)?;
        let Repr::Array(kind) = arr.repr else {
            let index = self.operand(index)?;
            let value = self.operand(value)?;
            return Ok(self.collection_send(arr, "[]=", &[index, value], None));
        };
        let index = self.operand_as(index, Repr::Int)?;
        let value = self.operand_as(value, Repr::of_elem(kind))?;
        Ok(Tracked {
            value: self.array_op(ArrayFn::Set, kind, vec![arr.value, index, value]),
            repr: Repr::of_elem(kind),
        })
    }

    pub(super) fn array_push(&mut self, array: &Operand, value: &Operand) -> Result<Tracked<ValueId>, CodegenError> {
        let arr = self.operand(array)?;
        let Repr::Array(kind) = arr.repr else {
            let value = self.operand(value)?;
            return Ok(self.collection_send(arr, "push", &[value], None));
        };
        let value = self.operand_as(value, Repr::of_elem(kind))?;
        let _ = self.array_op(ArrayFn::Push, kind, vec![arr.value, value]);
        Ok(arr)
    }

    pub(super) fn array_pop(&mut self, array: &Operand) -> Result<Tracked<ValueId>, CodegenError> {
        let arr = self.operand(array)?;
        let Repr::Array(kind) = arr.repr else {
            return Ok(self.collection_send(arr, "pop", &[], None));
        };
        Ok(Tracked {
            value: self.array_op(ArrayFn::Pop, kind, vec![arr.value]),
            repr: Repr::of_elem(kind),
        })
    }

    pub(super) fn array_len(&mut self, array: &Operand) -> Result<Tracked<ValueId>, CodegenError> {
        let arr = self.operand(array)?;
        if !matches!(arr.repr, Repr::Array(_)) {
            return Ok(self.collection_send(arr, "size", &[], None));
        }
        let layout = self.out.abi.array;
        Ok(Tracked {
            value: self
                .fb
                .load_field(&self.out.structs, arr.value, layout, rill_native::abi::array::LEN),
            repr: Repr::Int,
        })
    }

    /// `array.each { |x| … }`: the length is re-read every iteration, so
    /// elements pushed by the block are visited too.
    pub(super) fn array_each(&mut self, array: &Operand, block: &Operand) -> Result<Tracked<ValueId>, CodegenError> {
        let arr = self.operand(array)?;
        let block = self.operand(block)?;
        let Repr::Array(kind) = arr.repr else {
            let block = self.boxed(block);
            return Ok(self.collection_send(arr, "each", &[], Some(block)));
        };
        let layout = self.out.abi.array;
        let zero = self.fb.iconst(0);
        let index = self.fb.alloca(1);
        self.fb.store(index, zero);

        let head = self.fb.new_block("each.head");
        let body = self.fb.new_block("each.body");
        let exit = self.fb.new_block("each.exit");
        self.fb.br(head);

        self.fb.position_at(head);
        let i = self.fb.load(NativeType::I64, index);
        let len = self
            .fb
            .load_field(&self.out.structs, arr.value, layout, rill_native::abi::array::LEN);
        let more = self.fb.icmp(CmpPred::Lt, i, len);
        self.fb.cond_br(more, body, exit);

        self.fb.position_at(body);
        let elem = self.array_op(ArrayFn::Get, kind, vec![arr.value, i]);
        let _ = self.invoke_block(
            block,
            &[Tracked {
                value: elem,
                repr: Repr::of_elem(kind),
            }],
        );
        let i = self.fb.load(NativeType::I64, index);
        let one = self.fb.iconst(1);
        let next = self.fb.binary(BinOp::Add, i, one);
        self.fb.store(index, next);
        self.fb.br(head);

        self.fb.position_at(exit);
        Ok(arr)
    }

    // -- Hashes --

    pub(super) fn hash_literal(
        &mut self,
        entries: &[(Operand, Operand)],
        ty: &Ty,
    ) -> Result<Tracked<ValueId>, CodegenError> {
        let kind = key_kind_of(self.cx.classes.repr_of(ty));
        let mut pairs = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let k = self.operand_as(key, Repr::of_key(kind))?;
            let v = self.operand_as(value, Repr::Boxed)?;
            pairs.push((k, v));
        }
        let hash = self.hash_op(HashFn::New, kind, Vec::new());
        for (k, v) in pairs {
            let _ = self.hash_op(HashFn::Set, kind, vec![hash, k, v]);
        }
        Ok(Tracked {
            value: hash,
            repr: Repr::Hash(kind),
        })
    }

    /// Receiver and key of a keyed hash operation; `Err` carries the
    /// untyped receiver and key for the named fallback.
    fn keyed(
        &mut self,
        hash: &Operand,
        key: &Operand,
    ) -> Result<Result<(ValueId, ValueId, KeyKind), (Tracked<ValueId>, Tracked<ValueId>)>, CodegenError> {
        let h = self.operand(hash)?;
        let Repr::Hash(kind) = h.repr else {
            let key = self.operand(key)?;
            return Ok(Err((h, key)));
        };
        let key = self.operand_as(key, Repr::of_key(kind))?;
        Ok(Ok((h.value, key, kind)))
    }

    pub(super) fn hash_get(&mut self, hash: &Operand, key: &Operand) -> Result<Tracked<ValueId>, CodegenError> {
        Ok(match self.keyed(hash, key)? {
            Ok((h, k, kind)) => Tracked {
                value: self.hash_op(HashFn::Get, kind, vec![h, k]),
                repr: Repr::Boxed,
            },
            Err((h, k)) => self.collection_send(h, "[]", &[k], None),
        })
    }

    pub(super) fn hash_set(
        &mut self,
        hash: &Operand,
        key: &Operand,
        value: &Operand,
    ) -> Result<Tracked<ValueId>, CodegenError> {
        let keyed = self.keyed(hash, key)?;
        let v = self.operand(value)?;
        Ok(match keyed {
            Ok((h, k, kind)) => {
                let boxed = self.boxed(v);
                Tracked {
                    value: self.hash_op(HashFn::Set, kind, vec![h, k, boxed]),
                    repr: Repr::Boxed,
                }
            }
            Err((h, k)) => self.collection_send(h, "[]=", &[k, v], None),
        })
    }

    pub(super) fn hash_delete(&mut self, hash: &Operand, key: &Operand) -> Result<Tracked<ValueId>, CodegenError> {
        Ok(match self.keyed(hash, key)? {
            Ok((h, k, kind)) => Tracked {
                value: self.hash_op(HashFn::Delete, kind, vec![h, k]),
                repr: Repr::Boxed,
            },
            Err((h, k)) => self.collection_send(h, "delete", &[k], None),
        })
    }

    pub(super) fn hash_has_key(&mut self, hash: &Operand, key: &Operand) -> Result<Tracked<ValueId>, CodegenError> {
        Ok(match self.keyed(hash, key)? {
            Ok((h, k, kind)) => Tracked {
                value: self.hash_op(HashFn::Has, kind, vec![h, k]),
                repr: Repr::Bool,
            },
            Err((h, k)) => self.collection_send(h, "key?", &[k], None),
        })
    }

    pub(super) fn hash_len(&mut self, hash: &Operand) -> Result<Tracked<ValueId>, CodegenError> {
        let h = self.operand(hash)?;
        if !matches!(h.repr, Repr::Hash(_)) {
            return Ok(self.collection_send(h, "size", &[], None));
        }
        let layout = self.out.abi.hash;
        Ok(Tracked {
            value: self
                .fb
                .load_field(&self.out.structs, h.value, layout, rill_native::abi::hash::SIZE),
            repr: Repr::Int,
        })
    }

    /// `hash.keys` or, with `values`, `hash.values`.
    pub(super) fn hash_listing(&mut self, hash: &Operand, values: bool) -> Result<Tracked<ValueId>, CodegenError> {
        let h = self.operand(hash)?;
        let Repr::Hash(kind) = h.repr else {
            let method = if values { "values" } else { "keys" };
            return Ok(self.collection_send(h, method, &[], None));
        };
        let op = if values { HashFn::Values } else { HashFn::Keys };
        Ok(Tracked {
            value: self.hash_op(op, kind, vec![h.value]),
            repr: Repr::Array(ElemKind::Boxed),
        })
    }

    /// `hash.each { |k, v| … }` over the backing store, in slot order.
    pub(super) fn hash_each(&mut self, hash: &Operand, block: &Operand) -> Result<Tracked<ValueId>, CodegenError> {
        use rill_native::abi::{entry, hash as fields, HASH_ENTRY_BYTES};

        let h = self.operand(hash)?;
        let block = self.operand(block)?;
        let Repr::Hash(kind) = h.repr else {
            let block = self.boxed(block);
            return Ok(self.collection_send(h, "each", &[], Some(block)));
        };
        let (hash_layout, entry_layout) = (self.out.abi.hash, self.out.abi.entry);
        let zero = self.fb.iconst(0);
        let slot_var = self.fb.alloca(1);
        self.fb.store(slot_var, zero);

        let head = self.fb.new_block("hash.each.head");
        let body = self.fb.new_block("hash.each.body");
        let visit = self.fb.new_block("hash.each.visit");
        let next = self.fb.new_block("hash.each.next");
        let exit = self.fb.new_block("hash.each.exit");
        self.fb.br(head);

        self.fb.position_at(head);
        let slot = self.fb.load(NativeType::I64, slot_var);
        let cap = self.fb.load_field(&self.out.structs, h.value, hash_layout, fields::CAP);
        let more = self.fb.icmp(CmpPred::Lt, slot, cap);
        self.fb.cond_br(more, body, exit);

        self.fb.position_at(body);
        let entries = self
            .fb
            .load_field(&self.out.structs, h.value, hash_layout, fields::ENTRIES);
        let stride = self.fb.iconst(HASH_ENTRY_BYTES);
        let offset = self.fb.binary(BinOp::Mul, slot, stride);
        let at = self.fb.ptr_add(entries, offset);
        let state = self.fb.load_field(&self.out.structs, at, entry_layout, entry::STATE);
        let occupied = self.fb.iconst(entry::OCCUPIED);
        let is_occupied = self.fb.icmp(CmpPred::Eq, state, occupied);
        self.fb.cond_br(is_occupied, visit, next);

        self.fb.position_at(visit);
        let key_addr = self.fb.field_addr(&self.out.structs, at, entry_layout, entry::KEY);
        let key = self.fb.load(kind.native_type(), key_addr);
        let value = self.fb.load_field(&self.out.structs, at, entry_layout, entry::VALUE);
        let _ = self.invoke_block(
            block,
            &[
                Tracked {
                    value: key,
                    repr: Repr::of_key(kind),
                },
                Tracked {
                    value,
                    repr: Repr::Boxed,
                },
            ],
        );
        self.fb.br(next);

        self.fb.position_at(next);
        let slot = self.fb.load(NativeType::I64, slot_var);
        let one = self.fb.iconst(1);
        let bumped = self.fb.binary(BinOp::Add, slot, one);
        self.fb.store(slot_var, bumped);
        self.fb.br(head);

        self.fb.position_at(exit);
        Ok(h)
    }
}

/// Bytes of `words` words.
pub(super) fn words_bytes(words: i64) -> i64 {
    words * i64::from(WORD)
}
