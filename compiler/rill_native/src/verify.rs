//! Module verifier.
//!
//! Checks the structural contract the executor and printer rely on: every
//! block is terminated, branch targets exist, operands are defined in the
//! function, direct calls match the callee's declared arity, and every
//! declared function has a body.

use thiserror::Error;

use crate::{Callee, FuncId, Inst, Module, ValueId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("{function}: block {block} has no terminator")]
    MissingTerminator { function: String, block: String },
    #[error("{function}: branch to unknown block bb{target}")]
    UnknownBlock { function: String, target: u32 },
    #[error("{function}: use of undefined value %{value}")]
    UndefinedValue { function: String, value: u32 },
    #[error("{function}: call to {callee} passes {found} arguments, expected {expected}")]
    ArityMismatch {
        function: String,
        callee: String,
        expected: usize,
        found: usize,
    },
    #[error("function {function} is declared but never defined")]
    MissingBody { function: String },
}

/// Verify every function in `module`, collecting all problems.
pub fn verify_module(module: &Module) -> Result<(), Vec<VerifyError>> {
    let mut errors = Vec::new();
    for (id, decl) in module.functions() {
        if decl.body.is_none() {
            errors.push(VerifyError::MissingBody {
                function: decl.name.clone(),
            });
            continue;
        }
        verify_function(module, id, &mut errors);
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn verify_function(module: &Module, id: FuncId, errors: &mut Vec<VerifyError>) {
    let decl = module.function(id);
    let Some(body) = &decl.body else {
        return;
    };
    let function = &decl.name;
    let value_count = body.value_types.len();
    let check_value = |value: ValueId, errors: &mut Vec<VerifyError>| {
        if value.index() >= value_count {
            errors.push(VerifyError::UndefinedValue {
                function: function.clone(),
                value: value.raw(),
            });
        }
    };

    for block in &body.blocks {
        for data in &block.insts {
            for operand in data.inst.operands() {
                check_value(operand, errors);
            }
            if let Inst::Call {
                callee: callee @ (Callee::Func(_) | Callee::Extern(_)),
                args,
                ..
            } = &data.inst
            {
                let (name, expected) = match callee {
                    Callee::Func(f) => {
                        let target = module.function(*f);
                        (target.name.as_str(), target.sig.params.len())
                    }
                    Callee::Extern(e) => {
                        let target = module.extern_decl(*e);
                        (target.name.as_str(), target.sig.params.len())
                    }
                    Callee::Indirect(_) => continue,
                };
                if expected != args.len() {
                    errors.push(VerifyError::ArityMismatch {
                        function: function.clone(),
                        callee: name.to_owned(),
                        expected,
                        found: args.len(),
                    });
                }
            }
        }
        match &block.terminator {
            None => errors.push(VerifyError::MissingTerminator {
                function: function.clone(),
                block: block.name.clone(),
            }),
            Some(term) => {
                for operand in term.operands() {
                    check_value(operand, errors);
                }
                for target in term.successors() {
                    if target.index() >= body.blocks.len() {
                        errors.push(VerifyError::UnknownBlock {
                            function: function.clone(),
                            target: target.raw(),
                        });
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BlockId, FunctionBuilder, FunctionFlags, NativeType, Signature};

    #[test]
    fn reports_missing_body_and_bad_branch() {
        let mut module = Module::new("m");
        let sig = Signature::new(vec![], NativeType::Void);
        let _ = module.declare_function("undefined", sig.clone(), FunctionFlags::empty());
        let f = module.declare_function("f", sig.clone(), FunctionFlags::empty());
        let mut b = FunctionBuilder::new(&sig);
        b.br(BlockId::new(7));
        module.define_function(f, b.finish());

        let errors = verify_module(&module).err().unwrap_or_default();
        assert_eq!(errors.len(), 2);
        assert!(errors.contains(&VerifyError::UnknownBlock {
            function: "f".into(),
            target: 7
        }));
    }

    #[test]
    fn reports_arity_mismatch() {
        let mut module = Module::new("m");
        let callee_sig = Signature::new(vec![NativeType::I64], NativeType::Void);
        let callee = module.declare_function("g", callee_sig.clone(), FunctionFlags::empty());
        let mut g = FunctionBuilder::new(&callee_sig);
        g.ret(None);
        module.define_function(callee, g.finish());

        let sig = Signature::new(vec![], NativeType::Void);
        let f = module.declare_function("f", sig.clone(), FunctionFlags::empty());
        let mut b = FunctionBuilder::new(&sig);
        let _ = b.call(Callee::Func(callee), vec![], NativeType::Void);
        b.ret(None);
        module.define_function(f, b.finish());

        let errors = verify_module(&module).err().unwrap_or_default();
        assert_eq!(
            errors,
            vec![VerifyError::ArityMismatch {
                function: "f".into(),
                callee: "g".into(),
                expected: 1,
                found: 0
            }]
        );
    }
}
