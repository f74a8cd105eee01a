//! Arrays and hashes.
//!
//! Collections are `rill/rt/RArray` and `rill/rt/RHash` instances holding
//! boxed elements. A collection whose static type is known calls the
//! runtime class directly; anything else is a named call.

use rill_ir::{Operand, Ty};

use super::document::Insn;
use super::emitter::{ARRAY, BLOCK, HASH};
use super::lowerer::Unit;
use crate::repr::{Repr, Tracked};
use crate::CodegenError;

const OBJ_OBJ: &str = "(Ljava/lang/Object;)Ljava/lang/Object;";
const OBJ_OBJ_OBJ: &str = "(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;";

impl Unit<'_, '_> {
    /// Push `array` as an `RArray` when it is one; `None` leaves the stack
    /// untouched.
    fn typed_array(&mut self, array: Tracked<u16>) -> Option<()> {
        matches!(array.repr, Repr::Array(_)).then(|| self.push(array, array.repr))
    }

    fn typed_hash(&mut self, hash: Tracked<u16>) -> Option<()> {
        matches!(hash.repr, Repr::Hash(_)).then(|| self.push(hash, hash.repr))
    }

    fn push_block(&mut self, block: Tracked<u16>) {
        self.push_boxed(block);
        self.em.checkcast(BLOCK);
    }

    // -- Arrays --

    pub(super) fn array_literal(&mut self, elements: &[Operand], ty: &Ty) -> Result<Repr, CodegenError> {
        let values = self.operands(elements)?;
        self.pack_array(&values);
        Ok(match self.cx.classes.repr_of(ty) {
            repr @ Repr::Array(_) => repr,
            _ => Repr::Boxed,
        })
    }

    pub(super) fn array_get(&mut self, array: &Operand, index: &Operand) -> Result<Repr, CodegenError> {
        let arr = self.operand(array)?;
        let index = self.operand(index)?;
        if self.typed_array(arr).is_none() {
            return Ok(self.send(arr, "[]", &[index], None));
        }
        self.push(index, Repr::Int);
        self.em.invoke_virtual(ARRAY, "get", "(J)Ljava/lang/Object;");
        Ok(Repr::Boxed)
    }

    pub(super) fn array_set(&mut self, array: &Operand, index: &Operand, value: &Operand) -> Result<Repr, CodegenError> {
        let arr = self.operand(array)?;
        let index = self.operand(index)?;
        let value = self.operand(value)?;
        if self.typed_array(arr).is_none() {
            return Ok(self.send(arr, "[]=", &[index, value], None));
        }
        self.push(index, Repr::Int);
        self.push_boxed(value);
        self.em
            .invoke_virtual(ARRAY, "set", "(JLjava/lang/Object;)Ljava/lang/Object;");
        Ok(Repr::Boxed)
    }

    pub(super) fn array_push(&mut self, array: &Operand, value: &Operand) -> Result<Repr, CodegenError> {
        let arr = self.operand(array)?;
        let value = self.operand(value)?;
        if self.typed_array(arr).is_none() {
            return Ok(self.send(arr, "push", &[value], None));
        }
        self.push_boxed(value);
        self.em
            .invoke_virtual(ARRAY, "push", "(Ljava/lang/Object;)Lrill/rt/RArray;");
        Ok(arr.repr)
    }

    /// `array.pop`; an empty array yields nil.
    pub(super) fn array_pop(&mut self, array: &Operand) -> Result<Repr, CodegenError> {
        let arr = self.operand(array)?;
        if self.typed_array(arr).is_none() {
            return Ok(self.send(arr, "pop", &[], None));
        }
        self.em.invoke_virtual(ARRAY, "pop", "()Ljava/lang/Object;");
        Ok(Repr::Boxed)
    }

    pub(super) fn array_len(&mut self, array: &Operand) -> Result<Repr, CodegenError> {
        let arr = self.operand(array)?;
        if self.typed_array(arr).is_none() {
            return Ok(self.send(arr, "size", &[], None));
        }
        self.em.invoke_virtual(ARRAY, "size", "()J");
        Ok(Repr::Int)
    }

    /// `array.each { |x| … }`. The loop re-reads the size every iteration,
    /// so elements pushed by the block are visited too.
    pub(super) fn array_each(&mut self, array: &Operand, block: &Operand) -> Result<Repr, CodegenError> {
        let arr = self.operand(array)?;
        let block = self.operand(block)?;
        if !matches!(arr.repr, Repr::Array(_)) {
            return Ok(self.send(arr, "each", &[], Some(block)));
        }
        let index = self.em.local(Repr::Int);
        self.em.long(0);
        self.em.store(index, Repr::Int);
        let head = self.em.label("each_head");
        let exit = self.em.label("each_exit");

        self.em.place(&head);
        self.em.load(index, Repr::Int);
        self.push(arr, arr.repr);
        self.em.invoke_virtual(ARRAY, "size", "()J");
        self.em.emit(Insn::Lcmp);
        self.em.emit(Insn::Ifge {
            target: exit.clone(),
        });

        self.push(arr, arr.repr);
        self.em.load(index, Repr::Int);
        self.em.invoke_virtual(ARRAY, "get", "(J)Ljava/lang/Object;");
        let elem = self.spill(Repr::Boxed);
        self.invoke_block(block, &[elem]);
        self.em.emit(Insn::Pop);

        self.em.load(index, Repr::Int);
        self.em.long(1);
        self.em.emit(Insn::Ladd);
        self.em.store(index, Repr::Int);
        self.em.goto(&head);

        self.em.place(&exit);
        self.push(arr, arr.repr);
        Ok(arr.repr)
    }

    // -- Hashes --

    pub(super) fn hash_literal(&mut self, entries: &[(Operand, Operand)], ty: &Ty) -> Result<Repr, CodegenError> {
        let mut pairs = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let k = self.operand(key)?;
            let v = self.operand(value)?;
            pairs.push((k, v));
        }
        self.em.construct(HASH);
        for (k, v) in pairs {
            self.em.emit(Insn::Dup);
            self.push_boxed(k);
            self.push_boxed(v);
            self.em.invoke_virtual(HASH, "put", OBJ_OBJ_OBJ);
            self.em.emit(Insn::Pop);
        }
        Ok(match self.cx.classes.repr_of(ty) {
            repr @ Repr::Hash(_) => repr,
            _ => Repr::Boxed,
        })
    }

    pub(super) fn hash_get(&mut self, hash: &Operand, key: &Operand) -> Result<Repr, CodegenError> {
        let h = self.operand(hash)?;
        let k = self.operand(key)?;
        if self.typed_hash(h).is_none() {
            return Ok(self.send(h, "[]", &[k], None));
        }
        self.push_boxed(k);
        self.em.invoke_virtual(HASH, "get", OBJ_OBJ);
        Ok(Repr::Boxed)
    }

    pub(super) fn hash_set(&mut self, hash: &Operand, key: &Operand, value: &Operand) -> Result<Repr, CodegenError> {
        let h = self.operand(hash)?;
        let k = self.operand(key)?;
        let v = self.operand(value)?;
        if self.typed_hash(h).is_none() {
            return Ok(self.send(h, "[]=", &[k, v], None));
        }
        self.push_boxed(k);
        self.push_boxed(v);
        self.em.invoke_virtual(HASH, "put", OBJ_OBJ_OBJ);
        Ok(Repr::Boxed)
    }

    pub(super) fn hash_delete(&mut self, hash: &Operand, key: &Operand) -> Result<Repr, CodegenError> {
        let h = self.operand(hash)?;
        let k = self.operand(key)?;
        if self.typed_hash(h).is_none() {
            return Ok(self.send(h, "delete", &[k], None));
        }
        self.push_boxed(k);
        self.em.invoke_virtual(HASH, "delete", OBJ_OBJ);
        Ok(Repr::Boxed)
    }

    pub(super) fn hash_has_key(&mut self, hash: &Operand, key: &Operand) -> Result<Repr, CodegenError> {
        let h = self.operand(hash)?;
        let k = self.operand(key)?;
        if self.typed_hash(h).is_none() {
            return Ok(self.send(h, "key?", &[k], None));
        }
        self.push_boxed(k);
        self.em.invoke_virtual(HASH, "hasKey", "(Ljava/lang/Object;)Z");
        Ok(Repr::Bool)
    }

    pub(super) fn hash_len(&mut self, hash: &Operand) -> Result<Repr, CodegenError> {
        let h = self.operand(hash)?;
        if self.typed_hash(h).is_none() {
            return Ok(self.send(h, "size", &[], None));
        }
        self.em.invoke_virtual(HASH, "size", "()J");
        Ok(Repr::Int)
    }

    /// `hash.keys` or, with `values`, `hash.values`.
    pub(super) fn hash_listing(&mut self, hash: &Operand, values: bool) -> Result<Repr, CodegenError> {
        let h = self.operand(hash)?;
        let method = if values { "values" } else { "keys" };
        if self.typed_hash(h).is_none() {
            return Ok(self.send(h, method, &[], None));
        }
        self.em.invoke_virtual(HASH, method, "()Lrill/rt/RArray;");
        Ok(Repr::Array(rill_native::abi::ElemKind::Boxed))
    }

    /// `hash.each { |k, v| … }` in insertion order.
    pub(super) fn hash_each(&mut self, hash: &Operand, block: &Operand) -> Result<Repr, CodegenError> {
        let h = self.operand(hash)?;
        let block = self.operand(block)?;
        if self.typed_hash(h).is_none() {
            return Ok(self.send(h, "each", &[], Some(block)));
        }
        self.push_block(block);
        self.em
            .invoke_virtual(HASH, "each", "(Lrill/rt/Block;)Lrill/rt/RHash;");
        Ok(h.repr)
    }
}
