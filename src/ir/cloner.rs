//! Copying blocks between method bodies.

use std::collections::{HashMap, HashSet};

use crate::{
    entities::GenericContext,
    ir::{BlockId, InstId, InstKind, MethodBody, Value, VarId},
    Result,
};

/// Copies blocks with their instructions, phis, guards and edges, remapping every
/// reference on the way.
///
/// Blocks, values and variables are looked up in the mapping tables first; anything
/// without a mapping is kept as it is, which is what cloning inside one body wants. Types
/// and entity descriptors are specialized through the generic context given to
/// [`IrCloner::new`].
///
/// Operands referring to instructions of the cloned region that are only cloned later (a
/// phi reading a loop-carried value, for example) are patched once every block is copied.
///
/// # Examples
///
/// ```rust
/// use dotssa::{entities::{GenericContext, IrType}, ir::{InstKind, IrCloner, MethodBody, UnaryOp}};
///
/// let mut body = MethodBody::new(vec![IrType::GenericParam(0)], IrType::GenericParam(0));
/// let entry = body.create_block(None);
/// let ret = body.create_inst(InstKind::Return, vec![body.arg(0)], IrType::Void)?;
/// body.insert_last(entry, ret)?;
///
/// let ctx = GenericContext::new(vec![IrType::I32], vec![]);
/// let mut target = MethodBody::new(vec![IrType::I32], IrType::I32);
/// let mut cloner = IrCloner::new(ctx);
/// cloner.add_value_mapping(body.arg(0), target.arg(0));
/// let blocks = cloner.clone_blocks(&body, &[entry], &mut target)?;
///
/// assert_eq!(target.entry_block(), Some(blocks[0]));
/// let new_ret = target.terminator(blocks[0]).unwrap();
/// assert_eq!(target.operand(new_ret, 0), &target.arg(0));
/// # Ok::<(), dotssa::Error>(())
/// ```
#[derive(Debug, Default)]
pub struct IrCloner {
    ctx: GenericContext,
    values: HashMap<Value, Value>,
    blocks: HashMap<BlockId, BlockId>,
    vars: HashMap<VarId, VarId>,
}

impl IrCloner {
    /// Creates a cloner specializing types and entities under `ctx`.
    #[must_use]
    pub fn new(ctx: GenericContext) -> Self {
        IrCloner {
            ctx,
            ..Self::default()
        }
    }

    /// Maps `src` to `dst` in every cloned operand.
    pub fn add_value_mapping(&mut self, src: Value, dst: Value) {
        self.values.insert(src, dst);
    }

    /// Maps block `src` to `dst` in every cloned control target.
    pub fn add_block_mapping(&mut self, src: BlockId, dst: BlockId) {
        self.blocks.insert(src, dst);
    }

    /// Maps variable `src` to `dst` in every cloned variable access.
    pub fn add_var_mapping(&mut self, src: VarId, dst: VarId) {
        self.vars.insert(src, dst);
    }

    /// Current image of a value.
    #[must_use]
    pub fn map_value(&self, value: &Value) -> Value {
        match value {
            Value::Undef(ty) => Value::Undef(ty.get_spec(&self.ctx)),
            other => self.values.get(other).cloned().unwrap_or_else(|| other.clone()),
        }
    }

    /// Current image of a block.
    #[must_use]
    pub fn map_block(&self, block: BlockId) -> BlockId {
        self.blocks.get(&block).copied().unwrap_or(block)
    }

    /// Clones `blocks` of `src` into `dst` and returns the new blocks in the same order.
    ///
    /// Variables without a mapping are redeclared in `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Invariant`] if an unmapped argument does not exist in `dst`,
    /// or if a cloned instruction cannot be created or inserted.
    pub fn clone_blocks(&mut self, src: &MethodBody, blocks: &[BlockId], dst: &mut MethodBody) -> Result<Vec<BlockId>> {
        let mut cloned = Vec::with_capacity(blocks.len());
        for &block in blocks {
            let image = match self.blocks.get(&block) {
                Some(image) => *image,
                None => {
                    let image = dst.create_block(None);
                    self.blocks.insert(block, image);
                    image
                }
            };
            cloned.push(image);
        }

        let region: HashSet<InstId> = blocks.iter().flat_map(|b| src.insts(*b)).collect();
        let mut pending = Vec::new();

        for (&block, &image) in blocks.iter().zip(&cloned) {
            for inst in src.insts(block) {
                let mut kind = src.kind(inst).get_spec(&self.ctx);
                kind.map_blocks(|b| self.map_block(b));
                self.remap_var(src, dst, &mut kind);

                let mut operands = Vec::with_capacity(src.num_operands(inst));
                for (slot, value) in src.operands(inst).enumerate() {
                    operands.push(match value {
                        Value::Inst(def) if region.contains(def) && !self.values.contains_key(value) => {
                            pending.push((inst, slot));
                            Value::Undef(src.inst_type(*def).get_spec(&self.ctx))
                        }
                        Value::Arg(arg) if !self.values.contains_key(value) && arg.index() >= dst.num_args() => {
                            return Err(invariant_error!("argument {} has no counterpart in the target body", arg));
                        }
                        other => self.map_value(other),
                    });
                }

                let copy = dst.create_inst(kind, operands, src.inst_type(inst).get_spec(&self.ctx))?;
                dst.insert_last(image, copy)?;
                self.values.insert(Value::Inst(inst), Value::Inst(copy));
            }
        }

        for (inst, slot) in pending {
            let Some(Value::Inst(copy)) = self.values.get(&Value::Inst(inst)).cloned() else {
                continue;
            };
            let value = self.map_value(src.operand(inst, slot));
            dst.set_operand(copy, slot, value)?;
        }
        Ok(cloned)
    }

    /// Clones `blocks` within `body`.
    ///
    /// Targets outside the region keep pointing at the original blocks, so the caller is
    /// responsible for wiring the copies into the graph.
    ///
    /// # Errors
    ///
    /// Propagates failures of [`IrCloner::clone_blocks`].
    pub fn clone_within(&mut self, body: &mut MethodBody, blocks: &[BlockId]) -> Result<Vec<BlockId>> {
        for var in body.vars() {
            self.vars.entry(var).or_insert(var);
        }
        let snapshot = body.clone();
        self.clone_blocks(&snapshot, blocks, body)
    }

    fn remap_var(&mut self, src: &MethodBody, dst: &mut MethodBody, kind: &mut InstKind) {
        let (InstKind::LoadVar(var) | InstKind::StoreVar(var) | InstKind::VarAddr(var)) = kind else {
            return;
        };
        let image = *self.vars.entry(*var).or_insert_with(|| {
            let decl = src.var(*var);
            let copy = dst.create_var(decl.ty.get_spec(&self.ctx), decl.origin);
            let copied = dst.var_mut(copy);
            copied.is_pinned = decl.is_pinned;
            copied.is_exposed = decl.is_exposed;
            copy
        });
        *var = image;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        entities::{FieldDesc, IrType, Token, TypeDefDesc},
        ir::{verify, BinaryOp, VariableOrigin},
    };

    #[test]
    fn test_clone_loop_resolves_forward_refs() {
        // entry -> header(phi i) -> latch(i + 1) -> header; header -> exit
        let mut body = MethodBody::new(vec![IrType::Bool], IrType::I32);
        let entry = body.create_block(None);
        let header = body.create_block(None);
        let latch = body.create_block(None);
        let exit = body.create_block(None);

        body.set_branch(entry, header).unwrap();
        let phi = body.insert_phi(header, IrType::I32).unwrap();
        let br = body
            .create_inst(
                InstKind::Branch {
                    then_block: latch,
                    else_block: exit,
                },
                vec![body.arg(0)],
                IrType::Void,
            )
            .unwrap();
        body.insert_last(header, br).unwrap();
        let next = body
            .create_inst(InstKind::Binary(BinaryOp::Add), vec![Value::Inst(phi), Value::i32(1)], IrType::I32)
            .unwrap();
        body.insert_last(latch, next).unwrap();
        body.set_branch(latch, header).unwrap();
        body.phi_add_arg(phi, entry, Value::i32(0)).unwrap();
        body.phi_add_arg(phi, latch, Value::Inst(next)).unwrap();
        let ret = body.create_inst(InstKind::Return, vec![Value::Inst(phi)], IrType::Void).unwrap();
        body.insert_last(exit, ret).unwrap();
        verify(&body).unwrap();

        let mut target = MethodBody::new(vec![IrType::Bool], IrType::I32);
        let mut cloner = IrCloner::new(GenericContext::default());
        let blocks = cloner.clone_blocks(&body, &[entry, header, latch, exit], &mut target).unwrap();
        verify(&target).unwrap();

        let new_phi = target.first_inst(blocks[1]).unwrap();
        let new_next = target.first_inst(blocks[2]).unwrap();
        assert_eq!(
            target.phi_args(new_phi),
            vec![(blocks[0], Value::i32(0)), (blocks[2], Value::Inst(new_next))]
        );
        assert_eq!(target.users(&Value::Inst(new_next)), vec![new_phi]);
        assert_eq!(target.preds(blocks[1]), &[blocks[0], blocks[2]]);
    }

    #[test]
    fn test_clone_specializes_entities_and_vars() {
        let list = TypeDefDesc::class(Token::new(0x0200_0002), "System.Collections.Generic", "List`1");
        let list_t = IrType::Instance(list.clone(), vec![IrType::GenericParam(0)]);
        let field = FieldDesc::instance(Token::new(0x0400_0001), list_t.clone(), "_size", IrType::GenericParam(0));

        let mut body = MethodBody::new(vec![list_t.clone()], IrType::Void);
        let entry = body.create_block(None);
        let var = body.create_var(IrType::GenericParam(0), VariableOrigin::Local(0));
        let addr = body
            .create_inst(
                InstKind::FieldAddr { field },
                vec![body.arg(0)],
                IrType::by_ref(IrType::GenericParam(0)),
            )
            .unwrap();
        body.insert_last(entry, addr).unwrap();
        let load = body.create_inst(InstKind::LoadVar(var), vec![], IrType::GenericParam(0)).unwrap();
        body.insert_last(entry, load).unwrap();
        let ret = body.create_inst(InstKind::Return, vec![], IrType::Void).unwrap();
        body.insert_last(entry, ret).unwrap();

        let ctx = GenericContext::new(vec![IrType::I32], vec![]);
        let list_int = IrType::Instance(list, vec![IrType::I32]);
        let mut target = MethodBody::new(vec![list_int.clone()], IrType::Void);
        let mut cloner = IrCloner::new(ctx);
        let blocks = cloner.clone_blocks(&body, &[entry], &mut target).unwrap();

        let new_addr = target.first_inst(blocks[0]).unwrap();
        assert_eq!(target.inst_type(new_addr), &IrType::by_ref(IrType::I32));
        match target.kind(new_addr) {
            InstKind::FieldAddr { field } => {
                assert_eq!(field.ty, IrType::I32);
                assert_eq!(field.declaring_type, list_int);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(target.num_vars(), 1);
        assert_eq!(target.var(VarId::new(0)).ty, IrType::I32);
    }

    #[test]
    fn test_clone_within_keeps_vars() {
        let mut body = MethodBody::new(vec![], IrType::Void);
        let entry = body.create_block(None);
        let var = body.create_var(IrType::I32, VariableOrigin::Local(0));
        let store = body.create_inst(InstKind::StoreVar(var), vec![Value::i32(1)], IrType::Void).unwrap();
        body.insert_last(entry, store).unwrap();
        let ret = body.create_inst(InstKind::Return, vec![], IrType::Void).unwrap();
        body.insert_last(entry, ret).unwrap();

        let mut cloner = IrCloner::new(GenericContext::default());
        let blocks = cloner.clone_within(&mut body, &[entry]).unwrap();
        assert_eq!(body.num_blocks(), 2);
        assert_eq!(body.num_vars(), 1);
        let copy = body.first_inst(blocks[0]).unwrap();
        assert_eq!(body.kind(copy), &InstKind::StoreVar(var));
    }

    #[test]
    fn test_unmapped_argument_is_rejected() {
        let mut body = MethodBody::new(vec![IrType::I32], IrType::I32);
        let entry = body.create_block(None);
        let ret = body.create_inst(InstKind::Return, vec![body.arg(0)], IrType::Void).unwrap();
        body.insert_last(entry, ret).unwrap();

        let mut target = MethodBody::new(vec![], IrType::I32);
        let mut cloner = IrCloner::new(GenericContext::default());
        assert!(cloner.clone_blocks(&body, &[entry], &mut target).is_err());
    }
}
