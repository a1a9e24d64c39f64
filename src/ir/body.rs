//! The method body arena.
//!
//! [`MethodBody`] is the single ownership root of a method's IR. Blocks, instructions,
//! arguments and variables live in index-addressed arenas; every cross reference (operand,
//! use-list link, block membership, predecessor edge) is an id, never a pointer. Removed
//! entities stay in the arena as tombstones so that ids are never reused.
//!
//! The mutation API is split over three files:
//! - this file: construction, arenas and read accessors
//! - `uses.rs`: operand slots and use lists
//! - `block.rs`: blocks, instruction lists and control-flow edges

use crate::{
    entities::IrType,
    ir::{ArgId, BlockId, InstId, InstKind, Use, Value, VarId, Variable, VariableOrigin},
    Result,
};

/// Head of the intrusive use list of a tracked value.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct UseList {
    pub(crate) head: Option<Use>,
    pub(crate) len: u32,
}

/// An operand slot, linked into the use list of the value it references.
#[derive(Debug, Clone)]
pub(crate) struct Operand {
    pub(crate) value: Value,
    pub(crate) prev: Option<Use>,
    pub(crate) next: Option<Use>,
}

#[derive(Debug, Clone)]
pub(crate) struct ArgData {
    pub(crate) ty: IrType,
    pub(crate) uses: UseList,
}

#[derive(Debug, Clone)]
pub(crate) struct InstData {
    pub(crate) kind: InstKind,
    pub(crate) ty: IrType,
    pub(crate) operands: Vec<Operand>,
    pub(crate) block: Option<BlockId>,
    pub(crate) prev: Option<InstId>,
    pub(crate) next: Option<InstId>,
    pub(crate) uses: UseList,
    pub(crate) removed: bool,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct BlockData {
    pub(crate) first: Option<InstId>,
    pub(crate) last: Option<InstId>,
    pub(crate) preds: Vec<BlockId>,
    pub(crate) succs: Vec<BlockId>,
    pub(crate) prev: Option<BlockId>,
    pub(crate) next: Option<BlockId>,
    pub(crate) removed: bool,
}

/// The IR of one method: blocks, instructions, arguments and variables.
///
/// # Examples
///
/// ```rust
/// use dotssa::{entities::IrType, ir::{BinaryOp, InstKind, MethodBody, Value}};
///
/// let mut body = MethodBody::new(vec![IrType::I32], IrType::I32);
/// let entry = body.create_block(None);
/// let arg = body.arg(0);
///
/// let sum = body.create_inst(
///     InstKind::Binary(BinaryOp::Add),
///     vec![arg.clone(), arg.clone()],
///     IrType::I32,
/// )?;
/// body.insert_last(entry, sum)?;
/// let ret = body.create_inst(InstKind::Return, vec![Value::Inst(sum)], IrType::Void)?;
/// body.insert_last(entry, ret)?;
///
/// assert_eq!(body.num_uses(&arg), 2);
/// assert_eq!(body.users(&Value::Inst(sum)), vec![ret]);
/// # Ok::<(), dotssa::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct MethodBody {
    pub(crate) args: Vec<ArgData>,
    pub(crate) vars: Vec<Variable>,
    pub(crate) insts: Vec<InstData>,
    pub(crate) blocks: Vec<BlockData>,
    pub(crate) entry: Option<BlockId>,
    pub(crate) first_block: Option<BlockId>,
    pub(crate) last_block: Option<BlockId>,
    pub(crate) return_type: IrType,
    pub(crate) cfg_version: u64,
}

impl MethodBody {
    /// Creates an empty body with the given argument types.
    #[must_use]
    pub fn new(arg_types: Vec<IrType>, return_type: IrType) -> Self {
        MethodBody {
            args: arg_types
                .into_iter()
                .map(|ty| ArgData {
                    ty,
                    uses: UseList::default(),
                })
                .collect(),
            vars: Vec::new(),
            insts: Vec::new(),
            blocks: Vec::new(),
            entry: None,
            first_block: None,
            last_block: None,
            return_type,
            cfg_version: 0,
        }
    }

    /// Declared return type.
    #[must_use]
    pub fn return_type(&self) -> &IrType {
        &self.return_type
    }

    /// Number of arguments, `this` included.
    #[must_use]
    pub fn num_args(&self) -> usize {
        self.args.len()
    }

    /// Value of argument `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not less than [`MethodBody::num_args`].
    #[must_use]
    pub fn arg(&self, index: usize) -> Value {
        assert!(index < self.args.len(), "argument index out of bounds");
        Value::Arg(ArgId::new(index))
    }

    /// Iterates over argument ids in signature order.
    pub fn args(&self) -> impl Iterator<Item = ArgId> + '_ {
        (0..self.args.len()).map(ArgId::new)
    }

    /// Declares a variable.
    pub fn create_var(&mut self, ty: IrType, origin: VariableOrigin) -> VarId {
        self.vars.push(Variable::new(ty, origin));
        VarId::new(self.vars.len() - 1)
    }

    /// Returns a variable.
    #[must_use]
    pub fn var(&self, id: VarId) -> &Variable {
        &self.vars[id.index()]
    }

    /// Returns a variable for changing its flags.
    pub fn var_mut(&mut self, id: VarId) -> &mut Variable {
        &mut self.vars[id.index()]
    }

    /// Iterates over all variable ids.
    pub fn vars(&self) -> impl Iterator<Item = VarId> + '_ {
        (0..self.vars.len()).map(VarId::new)
    }

    /// Number of declared variables.
    #[must_use]
    pub fn num_vars(&self) -> usize {
        self.vars.len()
    }

    /// Result type of a value, `void` for instructions producing none.
    #[must_use]
    pub fn value_type(&self, value: &Value) -> IrType {
        match value {
            Value::Const(c) => c.ty(),
            Value::Undef(ty) => ty.clone(),
            Value::Arg(arg) => self.args[arg.index()].ty.clone(),
            Value::Inst(inst) => self.insts[inst.index()].ty.clone(),
        }
    }

    /// Creates a detached instruction and links its operands into their use lists.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Invariant`] if the operand count does not match the kind.
    pub fn create_inst(&mut self, kind: InstKind, operands: Vec<Value>, ty: IrType) -> Result<InstId> {
        if let Some(arity) = kind.fixed_arity() {
            if arity != operands.len() {
                return Err(invariant_error!(
                    "{} takes {} operands, got {}",
                    kind.name(),
                    arity,
                    operands.len()
                ));
            }
        } else if operands.len() > 1 {
            return Err(invariant_error!(
                "{} takes at most one operand, got {}",
                kind.name(),
                operands.len()
            ));
        }

        let id = InstId::new(self.insts.len());
        self.insts.push(InstData {
            kind,
            ty,
            operands: Vec::with_capacity(operands.len()),
            block: None,
            prev: None,
            next: None,
            uses: UseList::default(),
            removed: false,
        });
        for value in operands {
            self.push_operand(id, value);
        }
        Ok(id)
    }

    /// Operation of an instruction.
    #[must_use]
    pub fn kind(&self, inst: InstId) -> &InstKind {
        &self.insts[inst.index()].kind
    }

    /// Result type of an instruction.
    #[must_use]
    pub fn inst_type(&self, inst: InstId) -> &IrType {
        &self.insts[inst.index()].ty
    }

    /// Number of operand slots.
    #[must_use]
    pub fn num_operands(&self, inst: InstId) -> usize {
        self.insts[inst.index()].operands.len()
    }

    /// Value in operand slot `slot`.
    ///
    /// # Panics
    ///
    /// Panics if the slot does not exist.
    #[must_use]
    pub fn operand(&self, inst: InstId, slot: usize) -> &Value {
        &self.insts[inst.index()].operands[slot].value
    }

    /// Iterates over the operand values in slot order.
    pub fn operands(&self, inst: InstId) -> impl Iterator<Item = &Value> + '_ {
        self.insts[inst.index()].operands.iter().map(|op| &op.value)
    }

    /// Block the instruction is attached to.
    #[must_use]
    pub fn inst_block(&self, inst: InstId) -> Option<BlockId> {
        self.insts[inst.index()].block
    }

    /// Returns `true` once the instruction was removed.
    #[must_use]
    pub fn is_removed(&self, inst: InstId) -> bool {
        self.insts[inst.index()].removed
    }

    /// Next instruction in the same block.
    #[must_use]
    pub fn next_inst(&self, inst: InstId) -> Option<InstId> {
        self.insts[inst.index()].next
    }

    /// Previous instruction in the same block.
    #[must_use]
    pub fn prev_inst(&self, inst: InstId) -> Option<InstId> {
        self.insts[inst.index()].prev
    }

    /// Designated entry block.
    #[must_use]
    pub fn entry_block(&self) -> Option<BlockId> {
        self.entry
    }

    /// Block laid out before `block`.
    #[must_use]
    pub fn prev_block(&self, block: BlockId) -> Option<BlockId> {
        self.blocks[block.index()].prev
    }

    /// Block laid out after `block`.
    #[must_use]
    pub fn next_block(&self, block: BlockId) -> Option<BlockId> {
        self.blocks[block.index()].next
    }

    /// Blocks in layout order.
    pub fn blocks(&self) -> BlockIter<'_> {
        BlockIter {
            body: self,
            next: self.first_block,
        }
    }

    /// Number of live blocks.
    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.blocks.iter().filter(|b| !b.removed).count()
    }

    /// Upper bound of block indices, for sizing per-block tables.
    #[must_use]
    pub fn block_capacity(&self) -> usize {
        self.blocks.len()
    }

    /// Upper bound of instruction indices, for sizing per-instruction tables.
    #[must_use]
    pub fn inst_capacity(&self) -> usize {
        self.insts.len()
    }

    /// Returns `true` once the block was removed.
    #[must_use]
    pub fn is_block_removed(&self, block: BlockId) -> bool {
        self.blocks[block.index()].removed
    }

    /// Predecessors of a block.
    #[must_use]
    pub fn preds(&self, block: BlockId) -> &[BlockId] {
        &self.blocks[block.index()].preds
    }

    /// Successors of a block, guard handler edges included.
    #[must_use]
    pub fn succs(&self, block: BlockId) -> &[BlockId] {
        &self.blocks[block.index()].succs
    }

    /// First instruction of a block.
    #[must_use]
    pub fn first_inst(&self, block: BlockId) -> Option<InstId> {
        self.blocks[block.index()].first
    }

    /// Last instruction of a block.
    #[must_use]
    pub fn last_inst(&self, block: BlockId) -> Option<InstId> {
        self.blocks[block.index()].last
    }

    /// Instructions of a block in order.
    pub fn insts(&self, block: BlockId) -> InstIter<'_> {
        InstIter {
            body: self,
            next: self.blocks[block.index()].first,
        }
    }

    /// Terminator of a block, if its last instruction is one.
    #[must_use]
    pub fn terminator(&self, block: BlockId) -> Option<InstId> {
        self.last_inst(block)
            .filter(|inst| self.kind(*inst).is_terminator())
    }

    /// Phis at the start of a block.
    pub fn phis(&self, block: BlockId) -> impl Iterator<Item = InstId> + '_ {
        self.insts(block).take_while(|inst| self.kind(*inst).is_phi())
    }

    /// Guards hosted by a block.
    pub fn guards(&self, block: BlockId) -> impl Iterator<Item = InstId> + '_ {
        self.insts(block).filter(|inst| self.kind(*inst).is_guard())
    }

    /// Version of the control-flow structure, bumped by every block or edge change.
    ///
    /// Cached analyses compare it to detect that they are stale.
    #[must_use]
    pub fn cfg_version(&self) -> u64 {
        self.cfg_version
    }
}

/// Iterator over blocks in layout order.
pub struct BlockIter<'a> {
    body: &'a MethodBody,
    next: Option<BlockId>,
}

impl Iterator for BlockIter<'_> {
    type Item = BlockId;

    fn next(&mut self) -> Option<BlockId> {
        let current = self.next?;
        self.next = self.body.blocks[current.index()].next;
        Some(current)
    }
}

/// Iterator over the instructions of a block.
pub struct InstIter<'a> {
    body: &'a MethodBody,
    next: Option<InstId>,
}

impl Iterator for InstIter<'_> {
    type Item = InstId;

    fn next(&mut self) -> Option<InstId> {
        let current = self.next?;
        self.next = self.body.insts[current.index()].next;
        Some(current)
    }
}
