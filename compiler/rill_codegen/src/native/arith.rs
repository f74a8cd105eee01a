//! Operators.
//!
//! Integer and float operands get inline arithmetic; everything else goes
//! through `rl_binop`. The inline integer paths behave exactly like the
//! runtime's: wrapping arithmetic, truncating division, a
//! `ZeroDivisionError` on a zero divisor, and shift counts masked to six
//! bits.

use rill_ir::{BinaryOp, Operand, UnaryOp};
use rill_native::abi::OpCode;
use rill_native::{BinOp, CastOp, CmpPred, ValueId};

use super::lowerer::Unit;
use super::Rt;
use crate::repr::{Repr, Tracked};
use crate::CodegenError;

fn cmp_pred(op: BinaryOp) -> Option<CmpPred> {
    Some(match op {
        BinaryOp::Eq => CmpPred::Eq,
        BinaryOp::Ne => CmpPred::Ne,
        BinaryOp::Lt => CmpPred::Lt,
        BinaryOp::Le => CmpPred::Le,
        BinaryOp::Gt => CmpPred::Gt,
        BinaryOp::Ge => CmpPred::Ge,
        _ => return None,
    })
}

fn op_code(op: BinaryOp) -> OpCode {
    OpCode::ALL
        .into_iter()
        .find(|code| code.symbol() == op.method_name())
        .unwrap_or(OpCode::Eq)
}

impl Unit<'_, '_> {
    pub(super) fn binary(
        &mut self,
        op: BinaryOp,
        lhs: &Operand,
        rhs: &Operand,
    ) -> Result<Tracked<ValueId>, CodegenError> {
        let l = self.operand(lhs)?;
        let r = self.operand(rhs)?;
        let numeric = |repr: Repr| matches!(repr, Repr::Int | Repr::Float);
        Ok(match (l.repr, r.repr) {
            (Repr::Int, Repr::Int) => self.int_binary(op, l.value, r.value),
            (a, b) if numeric(a) && numeric(b) && !op.is_bitwise() => {
                let lv = self.materialize(l, Repr::Float);
                let rv = self.materialize(r, Repr::Float);
                self.float_binary(op, lv, rv)
            }
            (Repr::Bool, Repr::Bool) if matches!(op, BinaryOp::Eq | BinaryOp::Ne) => {
                let pred = cmp_pred(op).unwrap_or(CmpPred::Eq);
                Tracked {
                    value: self.fb.icmp(pred, l.value, r.value),
                    repr: Repr::Bool,
                }
            }
            _ => self.generic_binary(op, l, r),
        })
    }

    fn int_binary(&mut self, op: BinaryOp, l: ValueId, r: ValueId) -> Tracked<ValueId> {
        let value = match op {
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let pred = cmp_pred(op).unwrap_or(CmpPred::Eq);
                return Tracked {
                    value: self.fb.icmp(pred, l, r),
                    repr: Repr::Bool,
                };
            }
            BinaryOp::Add => self.fb.binary(BinOp::Add, l, r),
            BinaryOp::Sub => self.fb.binary(BinOp::Sub, l, r),
            BinaryOp::Mul => self.fb.binary(BinOp::Mul, l, r),
            BinaryOp::Div => self.checked_division(BinOp::SDiv, l, r),
            BinaryOp::Rem => self.checked_division(BinOp::SRem, l, r),
            BinaryOp::BitAnd => self.fb.binary(BinOp::And, l, r),
            BinaryOp::BitOr => self.fb.binary(BinOp::Or, l, r),
            BinaryOp::BitXor => self.fb.binary(BinOp::Xor, l, r),
            BinaryOp::Shl | BinaryOp::Shr => {
                let mask = self.fb.iconst(63);
                let count = self.fb.binary(BinOp::And, r, mask);
                let shift = if op == BinaryOp::Shl {
                    BinOp::Shl
                } else {
                    BinOp::AShr
                };
                self.fb.binary(shift, l, count)
            }
        };
        Tracked {
            value,
            repr: Repr::Int,
        }
    }

    /// `l / r` or `l % r`, raising `ZeroDivisionError` when `r` is zero.
    fn checked_division(&mut self, op: BinOp, l: ValueId, r: ValueId) -> ValueId {
        let zero = self.fb.iconst(0);
        let is_zero = self.fb.icmp(CmpPred::Eq, r, zero);
        let fail = self.fb.new_block("div.zero");
        let ok = self.fb.new_block("div.ok");
        self.fb.cond_br(is_zero, fail, ok);

        self.fb.position_at(fail);
        let class = self.text("ZeroDivisionError");
        let message = self.text("divided by 0");
        let message = self.rt(Rt::StrLit, vec![message]);
        let _ = self.rt(Rt::Raise, vec![class, message]);
        self.fb.unreachable();

        self.fb.position_at(ok);
        self.fb.binary(op, l, r)
    }

    fn float_binary(&mut self, op: BinaryOp, l: ValueId, r: ValueId) -> Tracked<ValueId> {
        if let Some(pred) = cmp_pred(op) {
            return Tracked {
                value: self.fb.fcmp(pred, l, r),
                repr: Repr::Bool,
            };
        }
        let bin = match op {
            BinaryOp::Add => BinOp::FAdd,
            BinaryOp::Sub => BinOp::FSub,
            BinaryOp::Mul => BinOp::FMul,
            BinaryOp::Div => BinOp::FDiv,
            _ => BinOp::FRem,
        };
        Tracked {
            value: self.fb.binary(bin, l, r),
            repr: Repr::Float,
        }
    }

    fn generic_binary(&mut self, op: BinaryOp, l: Tracked<ValueId>, r: Tracked<ValueId>) -> Tracked<ValueId> {
        let lv = self.boxed(l);
        let rv = self.boxed(r);
        let code = self.fb.iconst(op_code(op).tag());
        Tracked {
            value: self.rt(Rt::Binop, vec![code, lv, rv]),
            repr: Repr::Boxed,
        }
    }

    pub(super) fn unary(&mut self, op: UnaryOp, operand: &Operand) -> Result<Tracked<ValueId>, CodegenError> {
        let v = self.operand(operand)?;
        Ok(match (op, v.repr) {
            (UnaryOp::Neg, Repr::Int) => {
                let zero = self.fb.iconst(0);
                Tracked {
                    value: self.fb.binary(BinOp::Sub, zero, v.value),
                    repr: Repr::Int,
                }
            }
            (UnaryOp::Neg, Repr::Float) => {
                let minus_one = self.fb.fconst(-1.0);
                Tracked {
                    value: self.fb.binary(BinOp::FMul, v.value, minus_one),
                    repr: Repr::Float,
                }
            }
            (UnaryOp::Neg, Repr::Bool) => {
                let int = self.fb.cast(CastOp::BoolToInt, v.value);
                let zero = self.fb.iconst(0);
                Tracked {
                    value: self.fb.binary(BinOp::Sub, zero, int),
                    repr: Repr::Int,
                }
            }
            (UnaryOp::Neg, _) => Tracked {
                value: self.rt(Rt::Neg, vec![v.value]),
                repr: Repr::Boxed,
            },
            (UnaryOp::Not, Repr::Bool) => Tracked {
                value: self.fb.not(v.value),
                repr: Repr::Bool,
            },
            (UnaryOp::Not, Repr::Int | Repr::Float) => Tracked {
                value: self.fb.bconst(false),
                repr: Repr::Bool,
            },
            (UnaryOp::Not, _) => {
                let truthy = self.rt(Rt::Truthy, vec![v.value]);
                Tracked {
                    value: self.fb.not(truthy),
                    repr: Repr::Bool,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn every_operator_has_a_runtime_code() {
        let ops = [
            BinaryOp::Add,
            BinaryOp::Sub,
            BinaryOp::Mul,
            BinaryOp::Div,
            BinaryOp::Rem,
            BinaryOp::Eq,
            BinaryOp::Ne,
            BinaryOp::Lt,
            BinaryOp::Le,
            BinaryOp::Gt,
            BinaryOp::Ge,
            BinaryOp::BitAnd,
            BinaryOp::BitOr,
            BinaryOp::BitXor,
            BinaryOp::Shl,
            BinaryOp::Shr,
        ];
        let tags: Vec<i64> = ops.iter().map(|op| op_code(*op).tag()).collect();
        assert_eq!(tags, (0..16).collect::<Vec<i64>>());
    }
}
