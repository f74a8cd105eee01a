//! Open-addressing hash table helpers.
//!
//! ```text
//!   rl.hash        [class][size][cap][entries][key_kind]
//!   rl.hash.entry  [state][hash][key][value]     state: empty | occupied | tombstone
//! ```
//!
//! Probing is linear from `hash % cap`. Lookups skip tombstones and stop at
//! the first empty slot; inserts take the first tombstone seen, or the
//! empty slot that ends the probe, and update in place when the key is
//! already present. An insert that would push the load factor past 3/4
//! first doubles the table, dropping tombstones. Values are stored boxed.

use rill_native::abi::{
    entry, hash as fields, BuiltinClass, ElemKind, KeyKind, HASH_ENTRY_BYTES, INT_HASH_MULTIPLIER,
    MIN_HASH_CAPACITY,
};
use rill_native::{BinOp, CmpPred, FuncId, NativeType, ValueId};

use super::array::{array_fn, ArrayFn};
use super::{helper, words_bytes, Helper};
use crate::native::{NativeOut, Rt};

const PTR: NativeType = NativeType::Ptr;
const I64: NativeType = NativeType::I64;
const I1: NativeType = NativeType::I1;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(in crate::native) enum HashFn {
    /// `() -> hash`
    New,
    /// `(key) -> hash code`
    Hash,
    /// `(key, key) -> bool`
    Eq,
    /// `(hash, key, code) -> slot or -1`
    Find,
    /// `(hash) -> hash`
    Resize,
    /// `(hash, key, value) -> value`
    Set,
    /// `(hash, key) -> value or nil`
    Get,
    /// `(hash, key) -> bool`
    Has,
    /// `(hash, key) -> removed value or nil`
    Delete,
    /// `(hash) -> array`
    Keys,
    /// `(hash) -> array`
    Values,
}

impl HashFn {
    fn name(self) -> &'static str {
        match self {
            HashFn::New => "new",
            HashFn::Hash => "hash",
            HashFn::Eq => "eq",
            HashFn::Find => "find",
            HashFn::Resize => "resize",
            HashFn::Set => "set",
            HashFn::Get => "get",
            HashFn::Has => "has",
            HashFn::Delete => "delete",
            HashFn::Keys => "keys",
            HashFn::Values => "values",
        }
    }
}

/// Helper `op` for tables with keys of `kind`, and its result type.
pub(in crate::native) fn hash_fn(out: &mut NativeOut, op: HashFn, kind: KeyKind) -> (FuncId, NativeType) {
    let key = kind.native_type();
    let name = format!("rl.hash.{}.{}", op.name(), kind.suffix());
    let (params, ret) = match op {
        HashFn::New => (Vec::new(), PTR),
        HashFn::Hash => (vec![key], I64),
        HashFn::Eq => (vec![key, key], I1),
        HashFn::Find => (vec![PTR, key, I64], I64),
        HashFn::Resize | HashFn::Keys | HashFn::Values => (vec![PTR], PTR),
        HashFn::Set => (vec![PTR, key, PTR], PTR),
        HashFn::Get | HashFn::Delete => (vec![PTR, key], PTR),
        HashFn::Has => (vec![PTR, key], I1),
    };
    let id = helper(out, &name, params, ret, |h| match op {
        HashFn::New => build_new(h, kind),
        HashFn::Hash => build_hash(h, kind),
        HashFn::Eq => build_eq(h, kind),
        HashFn::Find => build_find(h, kind),
        HashFn::Resize => build_resize(h),
        HashFn::Set => build_set(h, kind),
        HashFn::Get => build_lookup(h, kind, Lookup::Get),
        HashFn::Has => build_lookup(h, kind, Lookup::Has),
        HashFn::Delete => build_lookup(h, kind, Lookup::Delete),
        HashFn::Keys => build_listing(h, kind, false),
        HashFn::Values => build_listing(h, kind, true),
    });
    (id, ret)
}

/// Address of entry `slot` of `entries`.
fn entry_at(h: &mut Helper<'_>, entries: ValueId, slot: ValueId) -> ValueId {
    let stride = h.int(HASH_ENTRY_BYTES);
    let offset = h.fb.binary(BinOp::Mul, slot, stride);
    h.fb.ptr_add(entries, offset)
}

fn entry_state(h: &mut Helper<'_>, at: ValueId) -> ValueId {
    let layout = h.out.abi.entry;
    h.get(at, layout, entry::STATE)
}

fn entry_key(h: &mut Helper<'_>, at: ValueId, kind: KeyKind) -> ValueId {
    let layout = h.out.abi.entry;
    h.get_as(kind.native_type(), at, layout, entry::KEY)
}

/// `(slot + 1) % cap`.
fn next_slot(h: &mut Helper<'_>, slot: ValueId, cap: ValueId) -> ValueId {
    let one = h.int(1);
    let bumped = h.fb.binary(BinOp::Add, slot, one);
    h.fb.binary(BinOp::SRem, bumped, cap)
}

fn alloc_entries(h: &mut Helper<'_>, cap: ValueId) -> ValueId {
    let stride = h.int(HASH_ENTRY_BYTES);
    let bytes = h.fb.binary(BinOp::Mul, cap, stride);
    h.rt(Rt::Alloc, vec![bytes])
}

fn build_new(h: &mut Helper<'_>, kind: KeyKind) {
    let layout = h.out.abi.hash;
    let header = h.int(words_bytes(5));
    let table = h.rt(Rt::Alloc, vec![header]);
    let cap = h.int(MIN_HASH_CAPACITY);
    let entries = alloc_entries(h, cap);
    let tag = h.int(BuiltinClass::Hash.tag());
    let zero = h.int(0);
    let kind_tag = h.int(kind.tag());
    h.set(table, layout, fields::CLASS, tag);
    h.set(table, layout, fields::SIZE, zero);
    h.set(table, layout, fields::CAP, cap);
    h.set(table, layout, fields::ENTRIES, entries);
    h.set(table, layout, fields::KEY_KIND, kind_tag);
    h.fb.ret(Some(table));
}

/// Integer keys use Fibonacci hashing, shifted right once so the code is
/// never negative; other keys hash through the runtime.
fn build_hash(h: &mut Helper<'_>, kind: KeyKind) {
    let key = h.fb.param(0);
    let code = match kind {
        KeyKind::Int => {
            let mult = h.int(INT_HASH_MULTIPLIER);
            let mixed = h.fb.binary(BinOp::Mul, key, mult);
            let one = h.int(1);
            h.fb.binary(BinOp::LShr, mixed, one)
        }
        KeyKind::Text => h.rt(Rt::StrHash, vec![key]),
        KeyKind::Value => h.rt(Rt::ValueHash, vec![key]),
    };
    h.fb.ret(Some(code));
}

fn build_eq(h: &mut Helper<'_>, kind: KeyKind) {
    let (a, b) = (h.fb.param(0), h.fb.param(1));
    let same = match kind {
        KeyKind::Int => h.cmp(CmpPred::Eq, a, b),
        KeyKind::Text => h.rt(Rt::StrEq, vec![a, b]),
        KeyKind::Value => h.rt(Rt::ValueEq, vec![a, b]),
    };
    h.fb.ret(Some(same));
}

fn build_find(h: &mut Helper<'_>, kind: KeyKind) {
    let layout = h.out.abi.hash;
    let entry_layout = h.out.abi.entry;
    let (table, key, code) = (h.fb.param(0), h.fb.param(1), h.fb.param(2));
    let miss_value = h.int(-1);
    let cap = h.get(table, layout, fields::CAP);
    let zero = h.int(0);
    let no_room = h.cmp(CmpPred::Le, cap, zero);
    let miss_early = h.split(no_room, "no.room");
    let resume = h.fb.current_block();
    h.fb.position_at(miss_early);
    h.fb.ret(Some(miss_value));
    h.fb.position_at(resume);

    let entries = h.get(table, layout, fields::ENTRIES);
    let start = h.fb.binary(BinOp::SRem, code, cap);
    let slot = h.var(start);
    let probes = h.var(zero);
    let (eq, _) = hash_fn(h.out, HashFn::Eq, kind);

    let head = h.fb.new_block("probe.head");
    let body = h.fb.new_block("probe.body");
    let occupied = h.fb.new_block("probe.occupied");
    let compare = h.fb.new_block("probe.compare");
    let hit = h.fb.new_block("probe.hit");
    let next = h.fb.new_block("probe.next");
    let miss = h.fb.new_block("probe.miss");
    h.fb.br(head);

    h.fb.position_at(head);
    let n = h.read(probes, I64);
    let more = h.cmp(CmpPred::Lt, n, cap);
    h.fb.cond_br(more, body, miss);

    h.fb.position_at(body);
    let s = h.read(slot, I64);
    let at = entry_at(h, entries, s);
    let state = entry_state(h, at);
    let empty = h.int(entry::EMPTY);
    let is_empty = h.cmp(CmpPred::Eq, state, empty);
    let check = h.fb.new_block("probe.check");
    h.fb.cond_br(is_empty, miss, check);

    h.fb.position_at(check);
    let full = h.int(entry::OCCUPIED);
    let is_full = h.cmp(CmpPred::Eq, state, full);
    h.fb.cond_br(is_full, occupied, next);

    h.fb.position_at(occupied);
    let stored = h.get(at, entry_layout, entry::HASH);
    let same_code = h.cmp(CmpPred::Eq, stored, code);
    h.fb.cond_br(same_code, compare, next);

    h.fb.position_at(compare);
    let stored_key = entry_key(h, at, kind);
    let same = h.call(eq, vec![stored_key, key], I1);
    h.fb.cond_br(same, hit, next);

    h.fb.position_at(hit);
    let found = h.read(slot, I64);
    h.fb.ret(Some(found));

    h.fb.position_at(next);
    let s = h.read(slot, I64);
    let following = next_slot(h, s, cap);
    h.fb.store(slot, following);
    h.bump(probes);
    h.fb.br(head);

    h.fb.position_at(miss);
    h.fb.ret(Some(miss_value));
}

/// Double the table (at least to the minimum capacity) and re-insert every
/// occupied entry.
fn build_resize(h: &mut Helper<'_>) {
    let layout = h.out.abi.hash;
    let table = h.fb.param(0);
    let old_cap = h.get(table, layout, fields::CAP);
    let old = h.get(table, layout, fields::ENTRIES);
    let two = h.int(2);
    let doubled = h.fb.binary(BinOp::Mul, old_cap, two);
    let min = h.int(MIN_HASH_CAPACITY);
    let small = h.cmp(CmpPred::Lt, doubled, min);
    let new_cap = h.fb.select(small, min, doubled);
    let fresh = alloc_entries(h, new_cap);

    let zero = h.int(0);
    let slot = h.var(zero);
    let head = h.fb.new_block("rehash.head");
    let body = h.fb.new_block("rehash.body");
    let moving = h.fb.new_block("rehash.move");
    let place = h.fb.new_block("rehash.place");
    let probe = h.fb.new_block("rehash.probe");
    let store = h.fb.new_block("rehash.store");
    let next = h.fb.new_block("rehash.next");
    let done = h.fb.new_block("rehash.done");
    h.fb.br(head);

    h.fb.position_at(head);
    let s = h.read(slot, I64);
    let more = h.cmp(CmpPred::Lt, s, old_cap);
    h.fb.cond_br(more, body, done);

    h.fb.position_at(body);
    let s = h.read(slot, I64);
    let from = entry_at(h, old, s);
    let state = entry_state(h, from);
    let full = h.int(entry::OCCUPIED);
    let is_full = h.cmp(CmpPred::Eq, state, full);
    h.fb.cond_br(is_full, moving, next);

    h.fb.position_at(moving);
    let entry_layout = h.out.abi.entry;
    let code = h.get(from, entry_layout, entry::HASH);
    let start = h.fb.binary(BinOp::SRem, code, new_cap);
    let target = h.var(start);
    h.fb.br(place);

    h.fb.position_at(place);
    let t = h.read(target, I64);
    let to = entry_at(h, fresh, t);
    let state = entry_state(h, to);
    let empty = h.int(entry::EMPTY);
    let is_empty = h.cmp(CmpPred::Eq, state, empty);
    h.fb.cond_br(is_empty, store, probe);

    h.fb.position_at(probe);
    let t = h.read(target, I64);
    let following = next_slot(h, t, new_cap);
    h.fb.store(target, following);
    h.fb.br(place);

    h.fb.position_at(store);
    let t = h.read(target, I64);
    let to = entry_at(h, fresh, t);
    for field in [entry::STATE, entry::HASH, entry::KEY, entry::VALUE] {
        let addr = h.fb.field_addr(&h.out.structs, from, entry_layout, field);
        let ty = if field == entry::VALUE { PTR } else { I64 };
        let word = h.fb.load(ty, addr);
        h.set(to, entry_layout, field, word);
    }
    h.fb.br(next);

    h.fb.position_at(next);
    h.bump(slot);
    h.fb.br(head);

    h.fb.position_at(done);
    let _ = h.rt(Rt::Free, vec![old]);
    h.set(table, layout, fields::ENTRIES, fresh);
    h.set(table, layout, fields::CAP, new_cap);
    h.fb.ret(Some(table));
}

fn build_set(h: &mut Helper<'_>, kind: KeyKind) {
    let layout = h.out.abi.hash;
    let entry_layout = h.out.abi.entry;
    let (table, key, value) = (h.fb.param(0), h.fb.param(1), h.fb.param(2));

    // grow when (size + 1) * 4 > cap * 3
    let size = h.get(table, layout, fields::SIZE);
    let cap = h.get(table, layout, fields::CAP);
    let one = h.int(1);
    let four = h.int(4);
    let three = h.int(3);
    let next_size = h.fb.binary(BinOp::Add, size, one);
    let load = h.fb.binary(BinOp::Mul, next_size, four);
    let limit = h.fb.binary(BinOp::Mul, cap, three);
    let crowded = h.cmp(CmpPred::Gt, load, limit);
    let grow = h.split(crowded, "grow");
    let probe_start = h.fb.current_block();
    h.fb.position_at(grow);
    let (resize, _) = hash_fn(h.out, HashFn::Resize, kind);
    let _ = h.call(resize, vec![table], PTR);
    h.fb.br(probe_start);
    h.fb.position_at(probe_start);

    let cap = h.get(table, layout, fields::CAP);
    let entries = h.get(table, layout, fields::ENTRIES);
    let (hash, _) = hash_fn(h.out, HashFn::Hash, kind);
    let (eq, _) = hash_fn(h.out, HashFn::Eq, kind);
    let code = h.call(hash, vec![key], I64);
    let start = h.fb.binary(BinOp::SRem, code, cap);
    let slot = h.var(start);
    let none = h.int(-1);
    let tombstone = h.var(none);
    let target = h.var(none);
    let zero = h.int(0);
    let probes = h.var(zero);

    let head = h.fb.new_block("insert.head");
    let body = h.fb.new_block("insert.body");
    let on_empty = h.fb.new_block("insert.empty");
    let not_empty = h.fb.new_block("insert.not.empty");
    let on_tombstone = h.fb.new_block("insert.tombstone");
    let remember = h.fb.new_block("insert.remember");
    let occupied = h.fb.new_block("insert.occupied");
    let compare = h.fb.new_block("insert.compare");
    let update = h.fb.new_block("insert.update");
    let next = h.fb.new_block("insert.next");
    let exhausted = h.fb.new_block("insert.exhausted");
    let write = h.fb.new_block("insert.write");
    let give_up = h.fb.new_block("insert.full");
    h.fb.br(head);

    h.fb.position_at(head);
    let n = h.read(probes, I64);
    let more = h.cmp(CmpPred::Lt, n, cap);
    h.fb.cond_br(more, body, exhausted);

    h.fb.position_at(body);
    let s = h.read(slot, I64);
    let at = entry_at(h, entries, s);
    let state = entry_state(h, at);
    let empty = h.int(entry::EMPTY);
    let is_empty = h.cmp(CmpPred::Eq, state, empty);
    h.fb.cond_br(is_empty, on_empty, not_empty);

    // empty slot: the first tombstone seen wins, else this slot
    h.fb.position_at(on_empty);
    let t = h.read(tombstone, I64);
    let s = h.read(slot, I64);
    let zero = h.int(0);
    let have_tombstone = h.cmp(CmpPred::Ge, t, zero);
    let chosen = h.fb.select(have_tombstone, t, s);
    h.fb.store(target, chosen);
    h.fb.br(write);

    h.fb.position_at(not_empty);
    let dead = h.int(entry::TOMBSTONE);
    let is_dead = h.cmp(CmpPred::Eq, state, dead);
    h.fb.cond_br(is_dead, on_tombstone, occupied);

    h.fb.position_at(on_tombstone);
    let t = h.read(tombstone, I64);
    let zero = h.int(0);
    let unset = h.cmp(CmpPred::Lt, t, zero);
    h.fb.cond_br(unset, remember, next);

    h.fb.position_at(remember);
    let s = h.read(slot, I64);
    h.fb.store(tombstone, s);
    h.fb.br(next);

    h.fb.position_at(occupied);
    let stored = h.get(at, entry_layout, entry::HASH);
    let same_code = h.cmp(CmpPred::Eq, stored, code);
    h.fb.cond_br(same_code, compare, next);

    h.fb.position_at(compare);
    let stored_key = entry_key(h, at, kind);
    let same = h.call(eq, vec![stored_key, key], I1);
    h.fb.cond_br(same, update, next);

    h.fb.position_at(update);
    h.set(at, entry_layout, entry::VALUE, value);
    h.fb.ret(Some(value));

    h.fb.position_at(next);
    let s = h.read(slot, I64);
    let following = next_slot(h, s, cap);
    h.fb.store(slot, following);
    h.bump(probes);
    h.fb.br(head);

    // every slot probed: fall back to the first tombstone
    h.fb.position_at(exhausted);
    let t = h.read(tombstone, I64);
    h.fb.store(target, t);
    let zero = h.int(0);
    let have_tombstone = h.cmp(CmpPred::Ge, t, zero);
    h.fb.cond_br(have_tombstone, write, give_up);

    h.fb.position_at(give_up);
    h.fb.ret(Some(value));

    h.fb.position_at(write);
    let t = h.read(target, I64);
    let at = entry_at(h, entries, t);
    let full = h.int(entry::OCCUPIED);
    h.set(at, entry_layout, entry::STATE, full);
    h.set(at, entry_layout, entry::HASH, code);
    h.set(at, entry_layout, entry::KEY, key);
    h.set(at, entry_layout, entry::VALUE, value);
    let size = h.get(table, layout, fields::SIZE);
    let one = h.int(1);
    let grown = h.fb.binary(BinOp::Add, size, one);
    h.set(table, layout, fields::SIZE, grown);
    h.fb.ret(Some(value));
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum Lookup {
    Get,
    Has,
    Delete,
}

fn build_lookup(h: &mut Helper<'_>, kind: KeyKind, lookup: Lookup) {
    let layout = h.out.abi.hash;
    let entry_layout = h.out.abi.entry;
    let (table, key) = (h.fb.param(0), h.fb.param(1));
    let (hash, _) = hash_fn(h.out, HashFn::Hash, kind);
    let (find, _) = hash_fn(h.out, HashFn::Find, kind);
    let code = h.call(hash, vec![key], I64);
    let slot = h.call(find, vec![table, key, code], I64);
    let zero = h.int(0);
    let found = h.cmp(CmpPred::Ge, slot, zero);

    if lookup == Lookup::Has {
        h.fb.ret(Some(found));
        return;
    }

    let missing = h.fb.not(found);
    let on_miss = h.split(missing, "miss");
    let resume = h.fb.current_block();
    h.fb.position_at(on_miss);
    let nil = h.fb.null();
    h.fb.ret(Some(nil));

    h.fb.position_at(resume);
    let entries = h.get(table, layout, fields::ENTRIES);
    let at = entry_at(h, entries, slot);
    let value = h.get(at, entry_layout, entry::VALUE);
    if lookup == Lookup::Delete {
        let dead = h.int(entry::TOMBSTONE);
        h.set(at, entry_layout, entry::STATE, dead);
        let size = h.get(table, layout, fields::SIZE);
        let one = h.int(1);
        let shrunk = h.fb.binary(BinOp::Sub, size, one);
        h.set(table, layout, fields::SIZE, shrunk);
    }
    h.fb.ret(Some(value));
}

/// Keys (boxed) or values of every occupied entry, in slot order.
fn build_listing(h: &mut Helper<'_>, kind: KeyKind, values: bool) {
    let layout = h.out.abi.hash;
    let entry_layout = h.out.abi.entry;
    let table = h.fb.param(0);
    let (new, _) = array_fn(h.out, ArrayFn::New, ElemKind::Boxed);
    let (push, _) = array_fn(h.out, ArrayFn::Push, ElemKind::Boxed);
    let size = h.get(table, layout, fields::SIZE);
    let list = h.call(new, vec![size], PTR);
    let cap = h.get(table, layout, fields::CAP);
    let entries = h.get(table, layout, fields::ENTRIES);

    let zero = h.int(0);
    let slot = h.var(zero);
    let head = h.fb.new_block("list.head");
    let body = h.fb.new_block("list.body");
    let take = h.fb.new_block("list.take");
    let next = h.fb.new_block("list.next");
    let done = h.fb.new_block("list.done");
    h.fb.br(head);

    h.fb.position_at(head);
    let s = h.read(slot, I64);
    let more = h.cmp(CmpPred::Lt, s, cap);
    h.fb.cond_br(more, body, done);

    h.fb.position_at(body);
    let s = h.read(slot, I64);
    let at = entry_at(h, entries, s);
    let state = entry_state(h, at);
    let full = h.int(entry::OCCUPIED);
    let is_full = h.cmp(CmpPred::Eq, state, full);
    h.fb.cond_br(is_full, take, next);

    h.fb.position_at(take);
    let item = if values {
        h.get(at, entry_layout, entry::VALUE)
    } else {
        let raw = entry_key(h, at, kind);
        match kind {
            KeyKind::Int => h.rt(Rt::BoxInt, vec![raw]),
            KeyKind::Text | KeyKind::Value => raw,
        }
    };
    let _ = h.call(push, vec![list, item], PTR);
    h.fb.br(next);

    h.fb.position_at(next);
    h.bump(slot);
    h.fb.br(head);

    h.fb.position_at(done);
    h.fb.ret(Some(list));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CodegenCx, Findings};
    use crate::options::CodegenOptions;
    use rill_ir::{Program, StringInterner};
    use rill_native::verify_module;

    #[test]
    fn every_key_kind_gets_a_verified_helper_family() {
        let interner = StringInterner::new();
        let program = Program::new(Vec::new(), Vec::new());
        let options = CodegenOptions::default();
        let mut findings = Findings::new();
        let Ok(cx) = CodegenCx::new(&program, &interner, &options, &mut findings) else {
            panic!("context should build");
        };
        let mut out = NativeOut::new(&cx);
        for kind in [KeyKind::Int, KeyKind::Text, KeyKind::Value] {
            for op in [HashFn::Set, HashFn::Get, HashFn::Has, HashFn::Delete, HashFn::Keys, HashFn::Values] {
                let _ = hash_fn(&mut out, op, kind);
            }
        }
        for name in ["rl.hash.resize.int", "rl.hash.find.text", "rl.hash.eq.value"] {
            assert!(out.module.function_id(name).is_some(), "{name} missing");
        }
        assert!(out.module.extern_id("rl_str_hash").is_some());
        assert!(verify_module(&out.module).is_ok());
    }
}
