//! Instruction interpreter.

use rill_native::{
    BinOp, BlockId, Callee, CastOp, CmpPred, Const, FuncId, FunctionBody, Inst, Terminator,
    ValueId,
};

use super::Machine;
use crate::{ExecError, Ptr, Unwind, Word};

/// Per-call state: SSA values and the stack slots to release on exit.
struct Frame {
    values: Vec<Word>,
    slots: Vec<Ptr>,
}

pub(super) fn call_function(m: &Machine, func: FuncId, args: &[Word]) -> Result<Word, Unwind> {
    let decl = m.module().function(func);
    let body = decl
        .body
        .as_ref()
        .ok_or_else(|| ExecError::MissingBody(decl.name.clone()))?;
    if args.len() != body.params as usize {
        return Err(ExecError::ArityMismatch {
            function: decl.name.clone(),
            expected: body.params as usize,
            found: args.len(),
        }
        .into());
    }
    let mut frame = Frame {
        values: vec![Word::Undef; body.value_types.len()],
        slots: Vec::new(),
    };
    frame.values[..args.len()].copy_from_slice(args);

    let result = run(m, &decl.name, body, &mut frame);
    for slot in frame.slots {
        let _ = m.free(slot);
    }
    result
}

fn run(m: &Machine, name: &str, body: &FunctionBody, frame: &mut Frame) -> Result<Word, Unwind> {
    let mut current = BlockId::ENTRY;
    loop {
        let block = body
            .block(current)
            .ok_or_else(|| ExecError::Unreachable(name.to_owned()))?;
        for data in &block.insts {
            let value = eval(m, &data.inst, frame)?;
            if let Some(result) = data.result {
                frame.values[result.index()] = value;
            }
        }
        match &block.terminator {
            Some(Terminator::Br(target)) => current = *target,
            Some(Terminator::CondBr {
                cond,
                then_block,
                else_block,
            }) => {
                let taken = get(frame, *cond)
                    .as_bool()
                    .ok_or_else(|| mismatch("branch condition is not a boolean"))?;
                current = if taken { *then_block } else { *else_block };
            }
            Some(Terminator::Ret(value)) => {
                return Ok(value.map_or(Word::Undef, |v| get(frame, v)));
            }
            Some(Terminator::Unreachable) | None => {
                return Err(ExecError::Unreachable(name.to_owned()).into());
            }
        }
    }
}

#[inline]
fn get(frame: &Frame, value: ValueId) -> Word {
    frame.values.get(value.index()).copied().unwrap_or(Word::Undef)
}

fn mismatch(what: &str) -> ExecError {
    ExecError::TypeMismatch(what.to_owned())
}

fn int(word: Word) -> Result<i64, ExecError> {
    word.as_int()
        .ok_or_else(|| ExecError::TypeMismatch(format!("expected i64, found {word:?}")))
}

fn float(word: Word) -> Result<f64, ExecError> {
    match word {
        Word::Float(v) => Ok(v),
        Word::Zero => Ok(0.0),
        other => Err(ExecError::TypeMismatch(format!("expected f64, found {other:?}"))),
    }
}

fn pointer(word: Word) -> Result<Ptr, ExecError> {
    match word {
        Word::Ptr(p) => Ok(p),
        Word::Null | Word::Zero => Err(ExecError::NullPointer),
        other => Err(ExecError::TypeMismatch(format!("expected ptr, found {other:?}"))),
    }
}

fn eval(m: &Machine, inst: &Inst, frame: &mut Frame) -> Result<Word, Unwind> {
    let word = match inst {
        Inst::Const(c) => match c {
            Const::Int(v) => Word::Int(*v),
            Const::Float(v) => Word::Float(*v),
            Const::Bool(v) => Word::Bool(*v),
            Const::Null => Word::Null,
        },
        Inst::Binary { op, lhs, rhs } => binary(*op, get(frame, *lhs), get(frame, *rhs))?,
        Inst::ICmp { pred, lhs, rhs } => {
            Word::Bool(icmp(*pred, get(frame, *lhs), get(frame, *rhs))?)
        }
        Inst::FCmp { pred, lhs, rhs } => {
            let (a, b) = (float(get(frame, *lhs))?, float(get(frame, *rhs))?);
            Word::Bool(compare(*pred, a.partial_cmp(&b)))
        }
        Inst::Not(v) => Word::Bool(
            !get(frame, *v)
                .as_bool()
                .ok_or_else(|| mismatch("not of a non-boolean"))?,
        ),
        Inst::Cast { op, value } => {
            let v = get(frame, *value);
            match op {
                CastOp::SiToFp => Word::Float(int(v)? as f64),
                CastOp::FpToSi => Word::Int(float(v)? as i64),
                CastOp::BoolToInt => Word::Int(i64::from(
                    v.as_bool().ok_or_else(|| mismatch("zext of a non-boolean"))?,
                )),
            }
        }
        Inst::Alloca { words } => {
            let Word::Ptr(ptr) = m.alloc_words(vec![Word::Zero; *words as usize]) else {
                return Err(mismatch("allocation did not return a pointer").into());
            };
            frame.slots.push(ptr);
            Word::Ptr(ptr)
        }
        Inst::Load { ty, ptr } => m.load_typed(pointer(get(frame, *ptr))?, *ty)?,
        Inst::Store { ptr, value } => {
            m.store(pointer(get(frame, *ptr))?, get(frame, *value))?;
            Word::Undef
        }
        Inst::PtrAdd { base, offset } => {
            let base = pointer(get(frame, *base))?;
            Word::Ptr(base.add(int(get(frame, *offset))?))
        }
        Inst::FieldAddr { base, offset, .. } => {
            let base = pointer(get(frame, *base))?;
            Word::Ptr(base.add(i64::from(*offset)))
        }
        Inst::GlobalAddr(g) => Word::Ptr(Ptr::new(g.raw(), 0)),
        Inst::FuncAddr(f) => Word::Func(*f),
        Inst::Call { callee, args, .. } => {
            let args: Vec<Word> = args.iter().map(|a| get(frame, *a)).collect();
            match callee {
                Callee::Func(f) => m.call(*f, &args)?,
                Callee::Extern(e) => {
                    let f = m
                        .extern_fn(e.index())
                        .ok_or_else(|| ExecError::UnknownExtern(format!("{e:?}")))?;
                    f(m, &args)?
                }
                Callee::Indirect(v) => m.call_word(get(frame, *v), &args)?,
            }
        }
        Inst::Select {
            cond,
            on_true,
            on_false,
        } => {
            let c = get(frame, *cond)
                .as_bool()
                .ok_or_else(|| mismatch("select condition is not a boolean"))?;
            if c {
                get(frame, *on_true)
            } else {
                get(frame, *on_false)
            }
        }
    };
    Ok(word)
}

fn binary(op: BinOp, lhs: Word, rhs: Word) -> Result<Word, ExecError> {
    if op.is_float() {
        let (a, b) = (float(lhs)?, float(rhs)?);
        return Ok(Word::Float(match op {
            BinOp::FAdd => a + b,
            BinOp::FSub => a - b,
            BinOp::FMul => a * b,
            BinOp::FDiv => a / b,
            _ => a % b,
        }));
    }
    // Logical operators on booleans.
    if let (Word::Bool(a), Word::Bool(b)) = (lhs, rhs) {
        match op {
            BinOp::And => return Ok(Word::Bool(a & b)),
            BinOp::Or => return Ok(Word::Bool(a | b)),
            BinOp::Xor => return Ok(Word::Bool(a ^ b)),
            _ => {}
        }
    }
    let (a, b) = (int(lhs)?, int(rhs)?);
    let shift = (b & 63) as u32;
    Ok(Word::Int(match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::SDiv => {
            if b == 0 {
                return Err(ExecError::DivisionByZero);
            }
            a.wrapping_div(b)
        }
        BinOp::SRem => {
            if b == 0 {
                return Err(ExecError::DivisionByZero);
            }
            a.wrapping_rem(b)
        }
        BinOp::And => a & b,
        BinOp::Or => a | b,
        BinOp::Xor => a ^ b,
        BinOp::Shl => a.wrapping_shl(shift),
        BinOp::AShr => a.wrapping_shr(shift),
        BinOp::LShr => ((a as u64) >> shift) as i64,
        BinOp::FAdd | BinOp::FSub | BinOp::FMul | BinOp::FDiv | BinOp::FRem => 0,
    }))
}

fn compare(pred: CmpPred, ord: Option<std::cmp::Ordering>) -> bool {
    use std::cmp::Ordering::{Equal, Greater, Less};
    match (pred, ord) {
        // Unordered (NaN) compares false except `ne`.
        (CmpPred::Ne, None) => true,
        (_, None) => false,
        (CmpPred::Eq, Some(o)) => o == Equal,
        (CmpPred::Ne, Some(o)) => o != Equal,
        (CmpPred::Lt, Some(o)) => o == Less,
        (CmpPred::Le, Some(o)) => o != Greater,
        (CmpPred::Gt, Some(o)) => o == Greater,
        (CmpPred::Ge, Some(o)) => o != Less,
    }
}

fn icmp(pred: CmpPred, lhs: Word, rhs: Word) -> Result<bool, ExecError> {
    let identity = |pred: CmpPred, same: bool| -> Result<bool, ExecError> {
        match pred {
            CmpPred::Eq => Ok(same),
            CmpPred::Ne => Ok(!same),
            _ => Err(mismatch("ordered compare of pointers")),
        }
    };
    match (lhs, rhs) {
        (Word::Ptr(a), Word::Ptr(b)) => identity(pred, a == b),
        (Word::Ptr(_), Word::Null | Word::Zero) | (Word::Null | Word::Zero, Word::Ptr(_)) => {
            identity(pred, false)
        }
        (Word::Null, Word::Null | Word::Zero) | (Word::Zero, Word::Null) => identity(pred, true),
        (Word::Func(a), Word::Func(b)) => identity(pred, a == b),
        (Word::Func(_), Word::Null) | (Word::Null, Word::Func(_)) => identity(pred, false),
        (a, b) => Ok(compare(pred, Some(int(a)?.cmp(&int(b)?)))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_ops_wrap() {
        assert_eq!(
            binary(BinOp::Add, Word::Int(i64::MAX), Word::Int(1)),
            Ok(Word::Int(i64::MIN))
        );
        assert_eq!(
            binary(BinOp::LShr, Word::Int(-1), Word::Int(1)),
            Ok(Word::Int(i64::MAX))
        );
        assert_eq!(
            binary(BinOp::SDiv, Word::Int(1), Word::Int(0)),
            Err(ExecError::DivisionByZero)
        );
    }

    #[test]
    fn pointer_identity_compare() {
        let p = Word::Ptr(Ptr::new(3, 8));
        assert_eq!(icmp(CmpPred::Eq, p, p), Ok(true));
        assert_eq!(icmp(CmpPred::Eq, p, Word::Null), Ok(false));
        assert_eq!(icmp(CmpPred::Ne, Word::Null, Word::Zero), Ok(false));
    }
}
