//! Runtime side of the growable array and the open-addressing hash table.
//!
//! Generated code manipulates both structures with inline memory
//! operations; the functions here implement the same algorithms for the
//! paths that go through the runtime (named dispatch, printing, coercions)
//! so either side can read what the other wrote.

use rill_native::abi::{self, entry, BuiltinClass, ElemKind, KeyKind};
use rill_native::NativeType;
use tracing::warn;

use super::ops::{unbox_float_word, unbox_int_word};
use super::value::{self, classify, Value};
use super::{arg, int_arg};
use crate::{ExecError, Machine, Unwind, Word};

type RtResult = Result<Word, Unwind>;

const ENTRY_WORDS: i64 = abi::HASH_ENTRY_BYTES / rill_native::WORD as i64;

fn field_int(m: &Machine, base: Word, index: u32) -> Result<i64, ExecError> {
    Ok(m.load_field(base, index)?
        .coerce(NativeType::I64)
        .as_int()
        .unwrap_or(0))
}

fn word_index(index: i64) -> u32 {
    u32::try_from(index).unwrap_or(u32::MAX)
}

// -- Arrays --

struct ArrayView {
    header: Word,
    len: i64,
    cap: i64,
    data: Word,
    kind: ElemKind,
}

fn array_view(m: &Machine, arr: Word) -> Result<ArrayView, ExecError> {
    let kind_tag = field_int(m, arr, abi::array::KIND)?;
    Ok(ArrayView {
        header: arr,
        len: field_int(m, arr, abi::array::LEN)?,
        cap: field_int(m, arr, abi::array::CAP)?,
        data: m.load_field(arr, abi::array::DATA)?.coerce(NativeType::Ptr),
        kind: ElemKind::from_tag(kind_tag)
            .ok_or_else(|| ExecError::TypeMismatch(format!("bad element kind {kind_tag}")))?,
    })
}

/// Elements of an array, boxed.
pub(crate) fn array_elements(m: &Machine, arr: Word) -> Result<Vec<Word>, Unwind> {
    let view = array_view(m, arr)?;
    let mut out = Vec::with_capacity(usize::try_from(view.len).unwrap_or(0));
    for i in 0..view.len {
        let raw = m.load_field(view.data, word_index(i))?;
        out.push(value::box_elem(m, view.kind, raw));
    }
    Ok(out)
}

/// Allocate an array of `kind` holding raw elements `items`.
pub(crate) fn new_array(m: &Machine, kind: ElemKind, items: &[Word]) -> Word {
    let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
    let cap = len.max(abi::MIN_ARRAY_CAPACITY);
    let data = m.alloc_zeroed(cap * i64::from(rill_native::WORD));
    for (i, item) in items.iter().enumerate() {
        let _ = m.store_field(data, word_index(i as i64), *item);
    }
    m.alloc_words(vec![
        Word::Int(BuiltinClass::Array.tag()),
        Word::Int(len),
        Word::Int(cap),
        data,
        Word::Int(kind.tag()),
    ])
}

pub(crate) fn new_boxed_array(m: &Machine, items: &[Word]) -> Word {
    new_array(m, ElemKind::Boxed, items)
}

/// Convert a boxed value to the raw storage of `kind`.
fn to_raw_elem(m: &Machine, kind: ElemKind, boxed: Word) -> Result<Word, Unwind> {
    Ok(match kind {
        ElemKind::Boxed => boxed,
        ElemKind::Int => Word::Int(unbox_int_word(m, boxed)?),
        ElemKind::Float => Word::Float(unbox_float_word(m, boxed)?),
    })
}

/// Make room for at least `needed` elements, doubling the capacity.
fn reserve(m: &Machine, view: &mut ArrayView, needed: i64) -> Result<(), ExecError> {
    if needed <= view.cap {
        return Ok(());
    }
    let mut cap = view.cap.max(1);
    while cap < needed {
        cap *= 2;
    }
    let data = m.alloc_zeroed(cap * i64::from(rill_native::WORD));
    for i in 0..view.len {
        let word = m.load_field(view.data, word_index(i))?;
        m.store_field(data, word_index(i), word)?;
    }
    if let Some(old) = view.data.as_ptr() {
        m.free(old)?;
    }
    m.store_field(view.header, abi::array::DATA, data)?;
    m.store_field(view.header, abi::array::CAP, Word::Int(cap))?;
    view.data = data;
    view.cap = cap;
    Ok(())
}

pub(crate) fn array_push_boxed(m: &Machine, arr: Word, boxed: Word) -> Result<(), Unwind> {
    let mut view = array_view(m, arr)?;
    let raw = to_raw_elem(m, view.kind, boxed)?;
    let needed = view.len + 1;
    reserve(m, &mut view, needed)?;
    m.store_field(view.data, word_index(view.len), raw)?;
    m.store_field(arr, abi::array::LEN, Word::Int(view.len + 1))?;
    Ok(())
}

fn index_error(m: &Machine, index: i64, len: i64) -> Unwind {
    m.raise_error(
        "IndexError",
        format!("index {index} outside of array bounds: {}...{len}", -len),
    )
}

/// `array[index]`, boxed. Out of range reads are nil for boxed storage and
/// an `IndexError` for raw storage.
pub(crate) fn array_get_boxed(m: &Machine, arr: Word, index: i64) -> RtResult {
    let view = array_view(m, arr)?;
    let at = if index < 0 { index + view.len } else { index };
    if at < 0 || at >= view.len {
        return match view.kind {
            ElemKind::Boxed => Ok(Word::Null),
            _ => Err(index_error(m, index, view.len)),
        };
    }
    let raw = m.load_field(view.data, word_index(at))?;
    Ok(value::box_elem(m, view.kind, raw))
}

/// `array[index] = value`. Writing past the end extends the array.
pub(crate) fn array_set_boxed(m: &Machine, arr: Word, index: i64, boxed: Word) -> RtResult {
    let mut view = array_view(m, arr)?;
    let at = if index < 0 { index + view.len } else { index };
    if at < 0 {
        return Err(index_error(m, index, view.len));
    }
    let raw = to_raw_elem(m, view.kind, boxed)?;
    reserve(m, &mut view, at + 1)?;
    m.store_field(view.data, word_index(at), raw)?;
    if at >= view.len {
        m.store_field(arr, abi::array::LEN, Word::Int(at + 1))?;
    }
    Ok(boxed)
}

pub(crate) fn array_pop_boxed(m: &Machine, arr: Word) -> RtResult {
    let view = array_view(m, arr)?;
    if view.len == 0 {
        return Ok(Word::Null);
    }
    let last = word_index(view.len - 1);
    let raw = m.load_field(view.data, last)?;
    m.store_field(view.data, last, Word::Zero)?;
    m.store_field(arr, abi::array::LEN, Word::Int(view.len - 1))?;
    Ok(value::box_elem(m, view.kind, raw))
}

fn expect_array(m: &Machine, word: Word) -> RtResult {
    match classify(m, word)? {
        Value::Array(arr) => Ok(arr),
        Value::Nil => Err(m.raise_error("TypeError", "no implicit conversion of nil into Array")),
        other => Err(m.raise_error(
            "TypeError",
            format!("no implicit conversion of {} into Array", other.class_name(m)),
        )),
    }
}

/// Narrow a boxed value to an array with element storage `kind`.
///
/// An array with other storage is converted into a new array.
pub(super) fn rl_array_coerce(m: &Machine, args: &[Word]) -> RtResult {
    let arr = expect_array(m, arg(args, 0))?;
    let tag = int_arg(args, 1);
    let kind = ElemKind::from_tag(tag)
        .ok_or_else(|| ExecError::TypeMismatch(format!("bad element kind {tag}")))?;
    let view = array_view(m, arr)?;
    if view.kind == kind {
        return Ok(arr);
    }
    let mut raw = Vec::new();
    for item in array_elements(m, arr)? {
        raw.push(to_raw_elem(m, kind, item)?);
    }
    Ok(new_array(m, kind, &raw))
}

pub(super) fn rl_array_size(m: &Machine, args: &[Word]) -> RtResult {
    Ok(Word::Int(field_int(m, arg(args, 0), abi::array::LEN)?))
}

/// Like [`array_get_boxed`], but an empty array yields nil for any storage.
pub(crate) fn array_get_boxed_or_nil(m: &Machine, arr: Word, index: i64) -> RtResult {
    if field_int(m, arr, abi::array::LEN)? == 0 {
        return Ok(Word::Null);
    }
    array_get_boxed(m, arr, index)
}

pub(super) fn rl_array_first(m: &Machine, args: &[Word]) -> RtResult {
    array_get_boxed_or_nil(m, arg(args, 0), 0)
}

pub(super) fn rl_array_last(m: &Machine, args: &[Word]) -> RtResult {
    array_get_boxed_or_nil(m, arg(args, 0), -1)
}

// -- Hash tables --

struct HashView {
    header: Word,
    size: i64,
    cap: i64,
    entries: Word,
    kind: KeyKind,
}

fn hash_view(m: &Machine, hash: Word) -> Result<HashView, ExecError> {
    let kind_tag = field_int(m, hash, abi::hash::KEY_KIND)?;
    Ok(HashView {
        header: hash,
        size: field_int(m, hash, abi::hash::SIZE)?,
        cap: field_int(m, hash, abi::hash::CAP)?,
        entries: m.load_field(hash, abi::hash::ENTRIES)?.coerce(NativeType::Ptr),
        kind: KeyKind::from_tag(kind_tag)
            .ok_or_else(|| ExecError::TypeMismatch(format!("bad key kind {kind_tag}")))?,
    })
}

/// Word index of field `field` of entry `slot`.
fn entry_word(slot: i64, field: u32) -> u32 {
    word_index(slot * ENTRY_WORDS + i64::from(field))
}

fn entry_field(m: &Machine, entries: Word, slot: i64, field: u32) -> Result<Word, ExecError> {
    m.load_field(entries, entry_word(slot, field))
}

fn set_entry_field(
    m: &Machine,
    entries: Word,
    slot: i64,
    field: u32,
    value: Word,
) -> Result<(), ExecError> {
    m.store_field(entries, entry_word(slot, field), value)
}

pub(crate) fn new_hash(m: &Machine, kind: KeyKind) -> Word {
    let cap = abi::MIN_HASH_CAPACITY;
    let entries = m.alloc_zeroed(cap * abi::HASH_ENTRY_BYTES);
    m.alloc_words(vec![
        Word::Int(BuiltinClass::Hash.tag()),
        Word::Int(0),
        Word::Int(cap),
        entries,
        Word::Int(kind.tag()),
    ])
}

/// Convert a boxed key to the raw key of `kind`.
fn to_raw_key(m: &Machine, kind: KeyKind, boxed: Word) -> Result<Word, Unwind> {
    Ok(match kind {
        KeyKind::Int => Word::Int(unbox_int_word(m, boxed)?),
        KeyKind::Text => match classify(m, boxed)? {
            Value::Str(_) => boxed,
            other => {
                return Err(m.raise_error(
                    "TypeError",
                    format!("no implicit conversion of {} into String", other.class_name(m)),
                ))
            }
        },
        KeyKind::Value => boxed,
    })
}

fn key_hash(m: &Machine, kind: KeyKind, raw: Word) -> Result<i64, Unwind> {
    Ok(match kind {
        KeyKind::Int => value::int_hash(raw.coerce(NativeType::I64).as_int().unwrap_or(0)),
        KeyKind::Text => match classify(m, raw)? {
            Value::Str(s) => value::text_hash(&s),
            _ => 0,
        },
        KeyKind::Value => value::value_hash(m, raw)?,
    })
}

fn keys_equal(m: &Machine, kind: KeyKind, a: Word, b: Word) -> Result<bool, Unwind> {
    Ok(match kind {
        KeyKind::Int => {
            a.coerce(NativeType::I64).as_int() == b.coerce(NativeType::I64).as_int()
        }
        KeyKind::Text => match (classify(m, a)?, classify(m, b)?) {
            (Value::Str(x), Value::Str(y)) => x == y,
            _ => false,
        },
        KeyKind::Value => value::value_eq(m, a, b)?,
    })
}

fn stored_key(m: &Machine, view: &HashView, slot: i64) -> Result<Word, ExecError> {
    Ok(entry_field(m, view.entries, slot, entry::KEY)?.coerce(view.kind.native_type()))
}

/// Probe for `raw`; returns the occupied slot holding it.
fn find_slot(m: &Machine, view: &HashView, raw: Word, hash: i64) -> Result<Option<i64>, Unwind> {
    if view.cap <= 0 {
        return Ok(None);
    }
    let mut slot = hash % view.cap;
    for _ in 0..view.cap {
        let state = entry_field(m, view.entries, slot, entry::STATE)?
            .coerce(NativeType::I64)
            .as_int()
            .unwrap_or(entry::EMPTY);
        if state == entry::EMPTY {
            return Ok(None);
        }
        if state == entry::OCCUPIED {
            let stored_hash = entry_field(m, view.entries, slot, entry::HASH)?.as_int();
            if stored_hash == Some(hash) && keys_equal(m, view.kind, stored_key(m, view, slot)?, raw)? {
                return Ok(Some(slot));
            }
        }
        slot = (slot + 1) % view.cap;
    }
    Ok(None)
}

/// Double the capacity, re-inserting occupied entries and dropping tombstones.
fn resize(m: &Machine, view: &mut HashView) -> Result<(), ExecError> {
    let new_cap = (view.cap * 2).max(abi::MIN_HASH_CAPACITY);
    let entries = m.alloc_zeroed(new_cap * abi::HASH_ENTRY_BYTES);
    for slot in 0..view.cap {
        let state = entry_field(m, view.entries, slot, entry::STATE)?
            .coerce(NativeType::I64)
            .as_int();
        if state != Some(entry::OCCUPIED) {
            continue;
        }
        let hash = entry_field(m, view.entries, slot, entry::HASH)?
            .as_int()
            .unwrap_or(0);
        let mut target = hash % new_cap;
        while entry_field(m, entries, target, entry::STATE)?
            .coerce(NativeType::I64)
            .as_int()
            != Some(entry::EMPTY)
        {
            target = (target + 1) % new_cap;
        }
        for field in [entry::STATE, entry::HASH, entry::KEY, entry::VALUE] {
            let word = entry_field(m, view.entries, slot, field)?;
            set_entry_field(m, entries, target, field, word)?;
        }
    }
    if let Some(old) = view.entries.as_ptr() {
        m.free(old)?;
    }
    m.store_field(view.header, abi::hash::ENTRIES, entries)?;
    m.store_field(view.header, abi::hash::CAP, Word::Int(new_cap))?;
    view.entries = entries;
    view.cap = new_cap;
    Ok(())
}

/// Insert or update `key => value` (both boxed).
pub(crate) fn hash_set_boxed(m: &Machine, hash: Word, key: Word, value: Word) -> Result<(), Unwind> {
    let mut view = hash_view(m, hash)?;
    let raw = to_raw_key(m, view.kind, key)?;
    if (view.size + 1) * 4 > view.cap * 3 {
        resize(m, &mut view)?;
    }
    let h = key_hash(m, view.kind, raw)?;
    let mut slot = h % view.cap;
    let mut tombstone = None;
    let mut target = None;
    for _ in 0..view.cap {
        let state = entry_field(m, view.entries, slot, entry::STATE)?
            .coerce(NativeType::I64)
            .as_int()
            .unwrap_or(entry::EMPTY);
        if state == entry::EMPTY {
            target = Some(tombstone.unwrap_or(slot));
            break;
        }
        if state == entry::TOMBSTONE {
            tombstone.get_or_insert(slot);
        } else if entry_field(m, view.entries, slot, entry::HASH)?.as_int() == Some(h)
            && keys_equal(m, view.kind, stored_key(m, &view, slot)?, raw)?
        {
            set_entry_field(m, view.entries, slot, entry::VALUE, value)?;
            return Ok(());
        }
        slot = (slot + 1) % view.cap;
    }
    let Some(target) = target.or(tombstone) else {
        warn!(cap = view.cap, size = view.size, "hash insert found no free slot");
        return Ok(());
    };
    set_entry_field(m, view.entries, target, entry::STATE, Word::Int(entry::OCCUPIED))?;
    set_entry_field(m, view.entries, target, entry::HASH, Word::Int(h))?;
    set_entry_field(m, view.entries, target, entry::KEY, raw)?;
    set_entry_field(m, view.entries, target, entry::VALUE, value)?;
    m.store_field(hash, abi::hash::SIZE, Word::Int(view.size + 1))?;
    Ok(())
}

/// Convert a boxed lookup key; `None` when it cannot be a key of `kind`.
fn lookup_key(m: &Machine, kind: KeyKind, key: Word) -> Result<Option<Word>, Unwind> {
    match (kind, classify(m, key)?) {
        (KeyKind::Int, Value::Int(v)) => Ok(Some(Word::Int(v))),
        (KeyKind::Text, Value::Str(_)) | (KeyKind::Value, _) => Ok(Some(key)),
        _ => Ok(None),
    }
}

pub(crate) fn hash_get_boxed(m: &Machine, hash: Word, key: Word) -> Result<Option<Word>, Unwind> {
    let view = hash_view(m, hash)?;
    let Some(raw) = lookup_key(m, view.kind, key)? else {
        return Ok(None);
    };
    let h = key_hash(m, view.kind, raw)?;
    match find_slot(m, &view, raw, h)? {
        Some(slot) => Ok(Some(
            entry_field(m, view.entries, slot, entry::VALUE)?.coerce(NativeType::Ptr),
        )),
        None => Ok(None),
    }
}

pub(crate) fn hash_delete_boxed(m: &Machine, hash: Word, key: Word) -> Result<Option<Word>, Unwind> {
    let view = hash_view(m, hash)?;
    let Some(raw) = lookup_key(m, view.kind, key)? else {
        return Ok(None);
    };
    let h = key_hash(m, view.kind, raw)?;
    let Some(slot) = find_slot(m, &view, raw, h)? else {
        return Ok(None);
    };
    let value = entry_field(m, view.entries, slot, entry::VALUE)?.coerce(NativeType::Ptr);
    set_entry_field(m, view.entries, slot, entry::STATE, Word::Int(entry::TOMBSTONE))?;
    m.store_field(hash, abi::hash::SIZE, Word::Int(view.size - 1))?;
    Ok(Some(value))
}

/// Occupied entries in backing-store order, boxed.
pub(crate) fn hash_entries(m: &Machine, hash: Word) -> Result<Vec<(Word, Word)>, Unwind> {
    let view = hash_view(m, hash)?;
    let mut out = Vec::with_capacity(usize::try_from(view.size).unwrap_or(0));
    for slot in 0..view.cap {
        let state = entry_field(m, view.entries, slot, entry::STATE)?
            .coerce(NativeType::I64)
            .as_int();
        if state != Some(entry::OCCUPIED) {
            continue;
        }
        let key = value::box_key(m, view.kind, stored_key(m, &view, slot)?);
        let value = entry_field(m, view.entries, slot, entry::VALUE)?.coerce(NativeType::Ptr);
        out.push((key, value));
    }
    Ok(out)
}

pub(crate) fn hash_keys(m: &Machine, hash: Word) -> RtResult {
    let keys: Vec<Word> = hash_entries(m, hash)?.into_iter().map(|(k, _)| k).collect();
    Ok(new_boxed_array(m, &keys))
}

pub(crate) fn hash_values(m: &Machine, hash: Word) -> RtResult {
    let values: Vec<Word> = hash_entries(m, hash)?.into_iter().map(|(_, v)| v).collect();
    Ok(new_boxed_array(m, &values))
}

pub(crate) fn hash_size(m: &Machine, hash: Word) -> Result<i64, ExecError> {
    field_int(m, hash, abi::hash::SIZE)
}

/// Narrow a boxed value to a hash with key strategy `kind`, converting
/// tables with another strategy into a new table.
pub(super) fn rl_hash_coerce(m: &Machine, args: &[Word]) -> RtResult {
    let hash = match classify(m, arg(args, 0))? {
        Value::Hash(hash) => hash,
        other => {
            let from = match other {
                Value::Nil => "nil".to_owned(),
                other => other.class_name(m),
            };
            return Err(m.raise_error(
                "TypeError",
                format!("no implicit conversion of {from} into Hash"),
            ));
        }
    };
    let tag = int_arg(args, 1);
    let kind = KeyKind::from_tag(tag)
        .ok_or_else(|| ExecError::TypeMismatch(format!("bad key kind {tag}")))?;
    if hash_view(m, hash)?.kind == kind {
        return Ok(hash);
    }
    let converted = new_hash(m, kind);
    for (key, value) in hash_entries(m, hash)? {
        hash_set_boxed(m, converted, key, value)?;
    }
    Ok(converted)
}

pub(super) fn rl_hash_size(m: &Machine, args: &[Word]) -> RtResult {
    Ok(Word::Int(hash_size(m, arg(args, 0))?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rill_native::Module;

    fn machine() -> Machine {
        match Machine::new(Module::new("collections")) {
            Ok(m) => m,
            Err(err) => panic!("empty module should load: {err}"),
        }
    }

    #[test]
    fn array_growth_keeps_order() {
        let m = machine();
        let arr = new_array(&m, ElemKind::Int, &[]);
        for i in 0..10 {
            assert!(array_push_boxed(&m, arr, value::box_int(&m, i)).is_ok());
        }
        let Ok(items) = array_elements(&m, arr) else {
            panic!("array should be readable");
        };
        let ints: Vec<i64> = items
            .into_iter()
            .filter_map(|w| match classify(&m, w) {
                Ok(Value::Int(v)) => Some(v),
                _ => None,
            })
            .collect();
        assert_eq!(ints, (0..10).collect::<Vec<_>>());
        assert_eq!(field_int(&m, arr, abi::array::CAP), Ok(16));
    }

    #[test]
    fn hash_update_and_delete() {
        let m = machine();
        let hash = new_hash(&m, KeyKind::Text);
        let key = value::new_string(&m, "a");
        let same_key = value::new_string(&m, "a");
        assert!(hash_set_boxed(&m, hash, key, value::box_int(&m, 1)).is_ok());
        assert!(hash_set_boxed(&m, hash, same_key, value::box_int(&m, 2)).is_ok());
        assert_eq!(hash_size(&m, hash), Ok(1));
        let Ok(Some(found)) = hash_get_boxed(&m, hash, key) else {
            panic!("key should be present");
        };
        assert!(matches!(classify(&m, found), Ok(Value::Int(2))));
        assert!(matches!(hash_delete_boxed(&m, hash, key), Ok(Some(_))));
        assert!(matches!(hash_get_boxed(&m, hash, key), Ok(None)));
        assert_eq!(hash_size(&m, hash), Ok(0));
    }

    #[test]
    fn crossing_the_load_factor_doubles_capacity() {
        let m = machine();
        let hash = new_hash(&m, KeyKind::Int);
        for k in 0..6 {
            assert!(hash_set_boxed(&m, hash, value::box_int(&m, k), value::box_int(&m, k)).is_ok());
        }
        assert_eq!(field_int(&m, hash, abi::hash::CAP), Ok(abi::MIN_HASH_CAPACITY));
        assert!(hash_delete_boxed(&m, hash, value::box_int(&m, 0)).is_ok());
        for k in [0, 6] {
            assert!(hash_set_boxed(&m, hash, value::box_int(&m, k), value::box_int(&m, k)).is_ok());
        }
        assert_eq!(field_int(&m, hash, abi::hash::CAP), Ok(abi::MIN_HASH_CAPACITY * 2));
        assert_eq!(hash_size(&m, hash), Ok(7));
        for k in 0..7 {
            assert!(matches!(hash_get_boxed(&m, hash, value::box_int(&m, k)), Ok(Some(_))));
        }
    }

    #[derive(Clone, Debug)]
    enum Churn {
        Set(i64, i64),
        Delete(i64),
    }

    fn churn() -> impl Strategy<Value = Churn> {
        prop_oneof![
            (0..24_i64, any::<i64>()).prop_map(|(k, v)| Churn::Set(k, v)),
            (0..24_i64).prop_map(Churn::Delete),
        ]
    }

    proptest! {
        // Insert/delete churn near the load threshold keeps lookups exact.
        #[test]
        fn int_keyed_hash_matches_a_model(ops in proptest::collection::vec(churn(), 1..200)) {
            let m = machine();
            let hash = new_hash(&m, KeyKind::Int);
            let mut model = std::collections::BTreeMap::new();
            for op in ops {
                match op {
                    Churn::Set(k, v) => {
                        prop_assert!(hash_set_boxed(&m, hash, value::box_int(&m, k), value::box_int(&m, v)).is_ok());
                        model.insert(k, v);
                    }
                    Churn::Delete(k) => {
                        let removed = hash_delete_boxed(&m, hash, value::box_int(&m, k));
                        prop_assert_eq!(matches!(removed, Ok(Some(_))), model.remove(&k).is_some());
                    }
                }
            }
            prop_assert_eq!(hash_size(&m, hash), Ok(model.len() as i64));
            for k in 0..24_i64 {
                let found = match hash_get_boxed(&m, hash, value::box_int(&m, k)) {
                    Ok(Some(word)) => match classify(&m, word) {
                        Ok(Value::Int(v)) => Some(v),
                        _ => None,
                    },
                    _ => None,
                };
                prop_assert_eq!(found, model.get(&k).copied());
            }
        }
    }
}
