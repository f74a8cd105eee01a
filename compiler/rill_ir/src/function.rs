//! Basic blocks, bodies, functions and class declarations.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::{BlockLabel, InstrKind, Instruction, Name, Terminator, Ty};

/// How a parameter receives its argument.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamKind {
    #[default]
    Required,
    /// Collects excess positional arguments into an array.
    Rest,
    /// Collects keyword arguments that match no named parameter into a hash.
    KeywordRest,
    /// The block argument.
    Block,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Param {
    pub name: Name,
    pub ty: Ty,
    #[serde(default)]
    pub kind: ParamKind,
}

impl Param {
    pub fn new(name: Name, ty: Ty) -> Self {
        Param {
            name,
            ty,
            kind: ParamKind::Required,
        }
    }

    pub fn rest(name: Name) -> Self {
        Param {
            name,
            ty: Ty::array(Ty::Dynamic),
            kind: ParamKind::Rest,
        }
    }

    pub fn keyword_rest(name: Name) -> Self {
        Param {
            name,
            ty: Ty::hash(Ty::Str, Ty::Dynamic),
            kind: ParamKind::KeywordRest,
        }
    }

    pub fn block(name: Name) -> Self {
        Param {
            name,
            ty: Ty::Proc,
            kind: ParamKind::Block,
        }
    }
}

/// Instructions plus exactly one terminator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BasicBlock {
    pub label: BlockLabel,
    pub instrs: Vec<Instruction>,
    pub terminator: Terminator,
}

/// Ordered basic blocks; the first block is the entry.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Body {
    pub blocks: Vec<BasicBlock>,
}

impl Body {
    pub fn entry(&self) -> Option<&BasicBlock> {
        self.blocks.first()
    }

    pub fn block(&self, label: BlockLabel) -> Option<&BasicBlock> {
        // Builders hand out labels equal to the block index; fall back to a
        // scan for bodies produced elsewhere.
        match self.blocks.get(label.index()) {
            Some(block) if block.label == label => Some(block),
            _ => self.blocks.iter().find(|b| b.label == label),
        }
    }

    /// Predecessor labels of `label`, in block order.
    pub fn predecessors(&self, label: BlockLabel) -> Vec<BlockLabel> {
        self.blocks
            .iter()
            .filter(|b| b.terminator.successors().contains(&label))
            .map(|b| b.label)
            .collect()
    }

    /// Whether block `label` starts with phi instructions.
    pub fn has_phis(&self, label: BlockLabel) -> bool {
        self.block(label)
            .is_some_and(|b| b.instrs.iter().any(|i| matches!(i.kind, InstrKind::Phi { .. })))
    }

    /// Labels reachable from the entry, in reverse postorder.
    pub fn reverse_postorder(&self) -> Vec<BlockLabel> {
        let Some(entry) = self.entry() else {
            return Vec::new();
        };
        let mut seen: FxHashSet<BlockLabel> = FxHashSet::default();
        let mut post: Vec<BlockLabel> = Vec::with_capacity(self.blocks.len());
        // (label, next successor to visit)
        let mut stack: Vec<(BlockLabel, usize)> = vec![(entry.label, 0)];
        seen.insert(entry.label);
        while let Some((label, next)) = stack.last_mut() {
            let succs = self
                .block(*label)
                .map(|b| b.terminator.successors())
                .unwrap_or_default();
            if let Some(succ) = succs.get(*next).copied() {
                *next += 1;
                if self.block(succ).is_some() && seen.insert(succ) {
                    stack.push((succ, 0));
                }
            } else {
                post.push(*label);
                stack.pop();
            }
        }
        post.reverse();
        post
    }
}

/// A method or top-level routine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: Name,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Name>,
    pub params: Vec<Param>,
    pub return_ty: Ty,
    pub body: Body,
}

impl Function {
    pub fn new(name: Name, params: Vec<Param>, return_ty: Ty, body: Body) -> Self {
        Function {
            name,
            owner: None,
            params,
            return_ty,
            body,
        }
    }

    pub fn method(owner: Name, name: Name, params: Vec<Param>, return_ty: Ty, body: Body) -> Self {
        Function {
            name,
            owner: Some(owner),
            params,
            return_ty,
            body,
        }
    }

    pub fn block_param(&self) -> Option<&Param> {
        self.params.iter().find(|p| p.kind == ParamKind::Block)
    }

    pub fn required_arity(&self) -> usize {
        self.params
            .iter()
            .filter(|p| p.kind == ParamKind::Required)
            .count()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: Name,
    pub ty: Ty,
}

/// A class declaration.
///
/// `methods` lists method names in declaration order; the bodies are
/// [`Function`]s whose `owner` is this class.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassType {
    pub name: Name,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superclass: Option<Name>,
    #[serde(default)]
    pub fields: Vec<FieldDecl>,
    #[serde(default)]
    pub methods: Vec<Name>,
    /// Set by the frontend when it already knows a method is overridden in
    /// a subclass. The class registry computes the same fact independently.
    #[serde(default)]
    pub needs_vtable: bool,
}

impl ClassType {
    pub fn new(name: Name, superclass: Option<Name>) -> Self {
        ClassType {
            name,
            superclass,
            fields: Vec::new(),
            methods: Vec::new(),
            needs_vtable: false,
        }
    }

    #[must_use]
    pub fn with_field(mut self, name: Name, ty: Ty) -> Self {
        self.fields.push(FieldDecl { name, ty });
        self
    }

    #[must_use]
    pub fn with_method(mut self, name: Name) -> Self {
        self.methods.push(name);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BodyBuilder;
    use pretty_assertions::assert_eq;

    #[test]
    fn unreachable_blocks_are_skipped_and_order_follows_control() {
        let mut b = BodyBuilder::new();
        let cond = b.bool(true);
        let then_block = b.new_block();
        let else_block = b.new_block();
        let dead = b.new_block();
        let join = b.new_block();
        b.branch(cond, then_block, else_block);
        b.position_at(then_block);
        let one = b.int(1);
        b.jump(join);
        b.position_at(else_block);
        let two = b.int(2);
        b.jump(join);
        b.position_at(dead);
        b.jump(join);
        b.position_at(join);
        let merged = b.phi(Ty::Int, &[(then_block, one), (else_block, two)]);
        b.ret(Some(merged));
        let body = b.finish();

        let order = body.reverse_postorder();
        assert_eq!(order.len(), 4);
        assert_eq!(order[0], body.blocks[0].label);
        assert_eq!(order.last().copied(), Some(join));
        assert!(!order.contains(&dead));
        assert!(body.has_phis(join));
        assert!(!body.has_phis(then_block));
    }
}
