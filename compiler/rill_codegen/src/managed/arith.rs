//! Operators.
//!
//! `long` and `double` operands use the arithmetic bytecodes. Division and
//! remainder of integers go through `Ops` so a zero divisor raises
//! `ZeroDivisionError`; every other combination calls the generic operator
//! helper with boxed operands.

use rill_ir::{BinaryOp, Operand, UnaryOp};

use super::document::Insn;
use super::emitter::OPS;
use super::lowerer::Unit;
use crate::repr::{Repr, Tracked};
use crate::CodegenError;

const GENERIC_BINARY: &str = "(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;";

/// Branch taken when the comparison result on the stack satisfies `op`.
fn compare_jump(op: BinaryOp, target: String) -> Insn {
    match op {
        BinaryOp::Eq => Insn::Ifeq { target },
        BinaryOp::Ne => Insn::Ifne { target },
        BinaryOp::Lt => Insn::Iflt { target },
        BinaryOp::Le => Insn::Ifle { target },
        BinaryOp::Gt => Insn::Ifgt { target },
        _ => Insn::Ifge { target },
    }
}

/// Name of the `Ops` helper implementing `op` on boxed values.
pub(super) fn generic_name(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "add",
        BinaryOp::Sub => "sub",
        BinaryOp::Mul => "mul",
        BinaryOp::Div => "div",
        BinaryOp::Rem => "mod",
        BinaryOp::Eq => "eq",
        BinaryOp::Ne => "ne",
        BinaryOp::Lt => "lt",
        BinaryOp::Le => "le",
        BinaryOp::Gt => "gt",
        BinaryOp::Ge => "ge",
        BinaryOp::BitAnd => "bitAnd",
        BinaryOp::BitOr => "bitOr",
        BinaryOp::BitXor => "bitXor",
        BinaryOp::Shl => "shl",
        BinaryOp::Shr => "shr",
    }
}

impl Unit<'_, '_> {
    pub(super) fn binary(&mut self, op: BinaryOp, lhs: &Operand, rhs: &Operand) -> Result<Repr, CodegenError> {
        let l = self.operand(lhs)?;
        let r = self.operand(rhs)?;
        let numeric = |repr: Repr| matches!(repr, Repr::Int | Repr::Float);
        Ok(match (l.repr, r.repr) {
            (Repr::Int, Repr::Int) => self.long_binary(op, l, r),
            (a, b) if numeric(a) && numeric(b) && !op.is_bitwise() => self.double_binary(op, l, r),
            (Repr::Bool, Repr::Bool) if matches!(op, BinaryOp::Eq | BinaryOp::Ne) => {
                self.push(l, Repr::Bool);
                self.push(r, Repr::Bool);
                self.em.flag(|target| {
                    if op == BinaryOp::Eq {
                        Insn::IfIcmpeq { target }
                    } else {
                        Insn::IfIcmpne { target }
                    }
                });
                Repr::Bool
            }
            _ => {
                self.push_boxed(l);
                self.push_boxed(r);
                self.em.invoke_static(OPS, generic_name(op), GENERIC_BINARY);
                Repr::Boxed
            }
        })
    }

    fn long_binary(&mut self, op: BinaryOp, l: Tracked<u16>, r: Tracked<u16>) -> Repr {
        self.push(l, Repr::Int);
        self.push(r, Repr::Int);
        if op.is_comparison() {
            self.em.emit(Insn::Lcmp);
            self.em.flag(|target| compare_jump(op, target));
            return Repr::Bool;
        }
        match op {
            BinaryOp::Add => self.em.emit(Insn::Ladd),
            BinaryOp::Sub => self.em.emit(Insn::Lsub),
            BinaryOp::Mul => self.em.emit(Insn::Lmul),
            BinaryOp::Div => self.em.invoke_static(OPS, "intDiv", "(JJ)J"),
            BinaryOp::Rem => self.em.invoke_static(OPS, "intMod", "(JJ)J"),
            BinaryOp::BitAnd => self.em.emit(Insn::Land),
            BinaryOp::BitOr => self.em.emit(Insn::Lor),
            BinaryOp::BitXor => self.em.emit(Insn::Lxor),
            BinaryOp::Shl | BinaryOp::Shr => {
                // Shift counts are ints; the machine masks them to six bits.
                self.em.emit(Insn::L2i);
                self.em.emit(if op == BinaryOp::Shl { Insn::Lshl } else { Insn::Lshr });
            }
            _ => {}
        }
        Repr::Int
    }

    fn double_binary(&mut self, op: BinaryOp, l: Tracked<u16>, r: Tracked<u16>) -> Repr {
        self.push(l, Repr::Float);
        self.push(r, Repr::Float);
        if op.is_comparison() {
            // NaN compares false: `dcmpg` for < and <=, `dcmpl` otherwise.
            let cmp = if matches!(op, BinaryOp::Lt | BinaryOp::Le) {
                Insn::Dcmpg
            } else {
                Insn::Dcmpl
            };
            self.em.emit(cmp);
            self.em.flag(|target| compare_jump(op, target));
            return Repr::Bool;
        }
        self.em.emit(match op {
            BinaryOp::Add => Insn::Dadd,
            BinaryOp::Sub => Insn::Dsub,
            BinaryOp::Mul => Insn::Dmul,
            BinaryOp::Div => Insn::Ddiv,
            _ => Insn::Drem,
        });
        Repr::Float
    }

    pub(super) fn unary(&mut self, op: UnaryOp, operand: &Operand) -> Result<Repr, CodegenError> {
        let v = self.operand(operand)?;
        Ok(match (op, v.repr) {
            (UnaryOp::Neg, Repr::Int | Repr::Bool) => {
                self.push(v, Repr::Int);
                self.em.emit(Insn::Lneg);
                Repr::Int
            }
            (UnaryOp::Neg, Repr::Float) => {
                self.push(v, Repr::Float);
                self.em.emit(Insn::Dneg);
                Repr::Float
            }
            (UnaryOp::Neg, _) => {
                self.push_boxed(v);
                self.em
                    .invoke_static(OPS, "neg", "(Ljava/lang/Object;)Ljava/lang/Object;");
                Repr::Boxed
            }
            (UnaryOp::Not, Repr::Int | Repr::Float) => {
                self.em.int(0);
                Repr::Bool
            }
            (UnaryOp::Not, _) => {
                self.push(v, Repr::Bool);
                self.em.flag(|target| Insn::Ifeq { target });
                Repr::Bool
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn comparisons_branch_on_their_own_sign() {
        let ops: Vec<&str> = [BinaryOp::Eq, BinaryOp::Ne, BinaryOp::Lt, BinaryOp::Ge]
            .into_iter()
            .map(|op| compare_jump(op, String::new()).op())
            .collect();
        assert_eq!(ops, vec!["ifeq", "ifne", "iflt", "ifge"]);
        assert_eq!(generic_name(BinaryOp::Rem), "mod");
    }
}
