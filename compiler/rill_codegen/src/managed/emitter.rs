//! Instruction emission for one managed method.
//!
//! Values live in local variable slots between instructions; the operand
//! stack only holds the inputs of the bytecode being emitted. `long` and
//! `double` values take two slots.

use rill_ir::StringInterner;

use super::document::{Access, Constant, ExceptionEntry, Insn, MethodDef, WideKind};
use crate::repr::Repr;

pub(crate) const OBJECT: &str = "java/lang/Object";
pub(crate) const OBJECT_DESC: &str = "Ljava/lang/Object;";
pub(crate) const OPS: &str = "rill/rt/Ops";
pub(crate) const BLOCK: &str = "rill/rt/Block";
pub(crate) const ARRAY: &str = "rill/rt/RArray";
pub(crate) const HASH: &str = "rill/rt/RHash";

/// Local slots taken by a value of `repr`.
pub(crate) fn width(repr: Repr) -> u16 {
    match repr {
        Repr::Int | Repr::Float => 2,
        _ => 1,
    }
}

/// Member name safe for a class file: characters the format reserves are
/// spelled out.
pub(crate) fn member_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '.' => out.push_str("$dot"),
            ';' => out.push_str("$semi"),
            '[' => out.push_str("$lbrack"),
            '/' => out.push_str("$slash"),
            '<' => out.push_str("$lt"),
            '>' => out.push_str("$gt"),
            c => out.push(c),
        }
    }
    out
}

pub(crate) struct MethodEmitter {
    insns: Vec<Insn>,
    exceptions: Vec<ExceptionEntry>,
    next_local: u16,
    labels: u32,
    line: Option<u32>,
}

impl MethodEmitter {
    /// Emitter whose first free local is `first_local` (parameters, and
    /// `this` for instance methods, come before it).
    pub(crate) fn new(first_local: u16) -> Self {
        MethodEmitter {
            insns: Vec::new(),
            exceptions: Vec::new(),
            next_local: first_local,
            labels: 0,
            line: None,
        }
    }

    #[inline]
    pub(crate) fn emit(&mut self, insn: Insn) {
        self.insns.push(insn);
    }

    /// Fresh label name starting with `hint`.
    pub(crate) fn label(&mut self, hint: &str) -> String {
        let n = self.labels;
        self.labels += 1;
        format!("{hint}_{n}")
    }

    pub(crate) fn place(&mut self, label: &str) {
        self.emit(Insn::Label {
            name: label.to_owned(),
        });
    }

    pub(crate) fn goto(&mut self, target: &str) {
        self.emit(Insn::Goto {
            target: target.to_owned(),
        });
    }

    /// Record that the following code comes from source line `line`.
    pub(crate) fn line(&mut self, line: u32) {
        if self.line == Some(line) {
            return;
        }
        self.line = Some(line);
        let label = self.label("line");
        self.place(&label);
        self.emit(Insn::Linenumber { line, label });
    }

    /// A fresh local for a value of `repr`.
    pub(crate) fn local(&mut self, repr: Repr) -> u16 {
        let slot = self.next_local;
        self.next_local = self.next_local.saturating_add(width(repr));
        slot
    }

    pub(crate) fn load(&mut self, var: u16, repr: Repr) {
        self.emit(match repr {
            Repr::Int => Insn::Lload { var },
            Repr::Float => Insn::Dload { var },
            Repr::Bool => Insn::Iload { var },
            _ => Insn::Aload { var },
        });
    }

    pub(crate) fn store(&mut self, var: u16, repr: Repr) {
        self.emit(match repr {
            Repr::Int => Insn::Lstore { var },
            Repr::Float => Insn::Dstore { var },
            Repr::Bool => Insn::Istore { var },
            _ => Insn::Astore { var },
        });
    }

    /// Store the stack top in a fresh local.
    pub(crate) fn spill(&mut self, repr: Repr) -> u16 {
        let slot = self.local(repr);
        self.store(slot, repr);
        slot
    }

    pub(crate) fn ret(&mut self, repr: Repr) {
        self.emit(match repr {
            Repr::Int => Insn::Lreturn,
            Repr::Float => Insn::Dreturn,
            Repr::Bool => Insn::Ireturn,
            _ => Insn::Areturn,
        });
    }

    /// Drop a value of `repr` from the stack.
    pub(crate) fn pop(&mut self, repr: Repr) {
        self.emit(if width(repr) == 2 { Insn::Pop2 } else { Insn::Pop });
    }

    // -- Constants --

    pub(crate) fn long(&mut self, v: i64) {
        self.emit(match v {
            0 => Insn::Lconst0,
            1 => Insn::Lconst1,
            v => Insn::Ldc2W {
                value: Constant::Int(v),
                kind: WideKind::Long,
            },
        });
    }

    pub(crate) fn double(&mut self, v: f64) {
        let bits = v.to_bits();
        self.emit(if bits == 0f64.to_bits() {
            Insn::Dconst0
        } else if bits == 1f64.to_bits() {
            Insn::Dconst1
        } else {
            Insn::Ldc2W {
                value: Constant::Float(v),
                kind: WideKind::Double,
            }
        });
    }

    pub(crate) fn int(&mut self, v: i32) {
        self.emit(Insn::Iconst { value: v });
    }

    pub(crate) fn string(&mut self, s: &str) {
        self.emit(Insn::Ldc {
            value: Constant::Str(s.to_owned()),
        });
    }

    /// A runtime string object holding `s`.
    pub(crate) fn string_object(&mut self, s: &str) {
        self.string(s);
        self.invoke_static(OPS, "string", "(Ljava/lang/String;)Ljava/lang/Object;");
    }

    /// The zero value of `repr`: `0`, `0.0`, `false` or `null`.
    pub(crate) fn zero(&mut self, repr: Repr) {
        match repr {
            Repr::Int => self.emit(Insn::Lconst0),
            Repr::Float => self.emit(Insn::Dconst0),
            Repr::Bool => self.int(0),
            _ => self.emit(Insn::AconstNull),
        }
    }

    // -- Members --

    pub(crate) fn invoke_static(&mut self, owner: &str, name: &str, descriptor: &str) {
        self.emit(Insn::Invokestatic {
            owner: owner.to_owned(),
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
            is_interface: false,
        });
    }

    pub(crate) fn invoke_virtual(&mut self, owner: &str, name: &str, descriptor: &str) {
        self.emit(Insn::Invokevirtual {
            owner: owner.to_owned(),
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
        });
    }

    pub(crate) fn invoke_special(&mut self, owner: &str, name: &str, descriptor: &str) {
        self.emit(Insn::Invokespecial {
            owner: owner.to_owned(),
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
        });
    }

    pub(crate) fn checkcast(&mut self, class: &str) {
        self.emit(Insn::Checkcast {
            class: class.to_owned(),
        });
    }

    /// `new class` with its no-argument constructor run.
    pub(crate) fn construct(&mut self, class: &str) {
        self.emit(Insn::New {
            class: class.to_owned(),
        });
        self.emit(Insn::Dup);
        self.invoke_special(class, "<init>", "()V");
    }

    /// Throw a new `class` whose message is the value on the stack.
    pub(crate) fn throw_with_message(&mut self, class: &str) {
        let message = self.spill(Repr::Boxed);
        self.emit(Insn::New {
            class: class.to_owned(),
        });
        self.emit(Insn::Dup);
        self.load(message, Repr::Boxed);
        self.invoke_special(class, "<init>", "(Ljava/lang/Object;)V");
        self.emit(Insn::Athrow);
    }

    // -- Conversions --

    /// Box the stack top held at unboxed `repr`.
    pub(crate) fn box_top(&mut self, repr: Repr) {
        match repr {
            Repr::Int => self.invoke_static("java/lang/Long", "valueOf", "(J)Ljava/lang/Long;"),
            Repr::Float => self.invoke_static("java/lang/Double", "valueOf", "(D)Ljava/lang/Double;"),
            Repr::Bool => self.invoke_static("java/lang/Boolean", "valueOf", "(Z)Ljava/lang/Boolean;"),
            _ => {}
        }
    }

    /// Convert the stack top from `from` to `to`.
    pub(crate) fn convert(&mut self, from: Repr, to: Repr, interner: &StringInterner) {
        if from == to {
            return;
        }
        match (from, to) {
            (Repr::Int, Repr::Float) => self.emit(Insn::L2d),
            (Repr::Float, Repr::Int) => self.emit(Insn::D2l),
            (Repr::Bool, Repr::Int) => self.emit(Insn::I2l),
            (Repr::Bool, Repr::Float) => {
                self.emit(Insn::I2l);
                self.emit(Insn::L2d);
            }
            (Repr::Int | Repr::Float, Repr::Bool) => {
                self.emit(Insn::Pop2);
                self.int(1);
            }
            (_, Repr::Bool) => self.invoke_static(OPS, "truthy", "(Ljava/lang/Object;)Z"),
            (from, to) if from.is_unboxed() => {
                self.box_top(from);
                self.convert(Repr::Boxed, to, interner);
            }
            (_, Repr::Int) => self.invoke_static(OPS, "toLong", "(Ljava/lang/Object;)J"),
            (_, Repr::Float) => self.invoke_static(OPS, "toDouble", "(Ljava/lang/Object;)D"),
            (_, Repr::Boxed) => {}
            (_, Repr::Struct(class)) => self.checkcast(interner.lookup(class)),
            (_, Repr::Array(_)) => self.checkcast(ARRAY),
            (_, Repr::Hash(_)) => self.checkcast(HASH),
        }
    }

    /// Push `1` when `jump` would branch, `0` otherwise.
    pub(crate) fn flag(&mut self, jump: impl FnOnce(String) -> Insn) {
        let yes = self.label("true");
        let done = self.label("flag");
        self.emit(jump(yes.clone()));
        self.int(0);
        self.goto(&done);
        self.place(&yes);
        self.int(1);
        self.place(&done);
    }

    /// `Object[]` holding the locals `items`, each boxed.
    pub(crate) fn object_array(&mut self, items: &[(u16, Repr)]) {
        self.int(i32::try_from(items.len()).unwrap_or(i32::MAX));
        self.emit(Insn::Anewarray {
            class: OBJECT.to_owned(),
        });
        for (i, (slot, repr)) in items.iter().enumerate() {
            self.emit(Insn::Dup);
            self.int(i32::try_from(i).unwrap_or(i32::MAX));
            self.load(*slot, *repr);
            self.box_top(*repr);
            self.emit(Insn::Aastore);
        }
    }

    // -- Exception table --

    pub(crate) fn protect(&mut self, start: &str, end: &str, handler: &str, class: Option<String>) {
        self.exceptions.push(ExceptionEntry {
            start: start.to_owned(),
            end: end.to_owned(),
            handler: handler.to_owned(),
            class,
        });
    }

    pub(crate) fn finish(self, name: String, descriptor: String, access: Vec<Access>) -> MethodDef {
        MethodDef {
            name,
            descriptor,
            access,
            instructions: self.insns,
            exception_table: self.exceptions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ops(em: MethodEmitter) -> Vec<&'static str> {
        let method = em.finish("m".to_owned(), "()V".to_owned(), Vec::new());
        method.instructions.iter().map(Insn::op).collect()
    }

    #[test]
    fn wide_values_take_two_slots() {
        let mut em = MethodEmitter::new(1);
        assert_eq!(em.local(Repr::Int), 1);
        assert_eq!(em.local(Repr::Boxed), 3);
        assert_eq!(em.local(Repr::Float), 4);
        assert_eq!(em.local(Repr::Bool), 6);
    }

    #[test]
    fn conversions_box_before_narrowing() {
        let interner = StringInterner::new();
        let point = interner.intern("Point");
        let mut em = MethodEmitter::new(0);
        em.convert(Repr::Int, Repr::Struct(point), &interner);
        em.convert(Repr::Boxed, Repr::Float, &interner);
        em.convert(Repr::Bool, Repr::Float, &interner);
        assert_eq!(
            ops(em),
            vec!["invokestatic", "checkcast", "invokestatic", "i2l", "l2d"]
        );
    }

    #[test]
    fn small_constants_use_short_forms() {
        let mut em = MethodEmitter::new(0);
        em.long(0);
        em.long(1);
        em.long(7);
        em.double(1.0);
        em.double(0.5);
        assert_eq!(
            ops(em),
            vec!["lconst_0", "lconst_1", "ldc2_w", "dconst_1", "ldc2_w"]
        );
    }

    #[test]
    fn reserved_characters_are_spelled_out() {
        assert_eq!(member_name("<=>"), "$lt=$gt");
        assert_eq!(member_name("[]="), "$lbrack]=");
        assert_eq!(member_name("nil?"), "nil?");
    }

    #[test]
    fn line_numbers_are_emitted_once_per_line() {
        let mut em = MethodEmitter::new(0);
        em.line(3);
        em.line(3);
        em.line(4);
        assert_eq!(ops(em), vec!["label", "linenumber", "label", "linenumber"]);
    }
}
