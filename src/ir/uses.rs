//! Operand slots and use lists.
//!
//! Each operand slot of an instruction is a node of an intrusive doubly-linked list
//! threaded through the operands of every instruction referencing the same tracked value.
//! The list head lives in the value's arena entry. A node is addressed by its [`Use`]
//! `(instruction, slot)` pair, so linking and unlinking are O(1) index updates.

use crate::{
    ir::{
        body::{Operand, UseList},
        BlockId, InstId, InstKind, MethodBody, Use, Value,
    },
    utils::BitSet,
    Result,
};

impl MethodBody {
    fn use_list_mut(&mut self, value: &Value) -> Option<&mut UseList> {
        match value {
            Value::Arg(arg) => Some(&mut self.args[arg.index()].uses),
            Value::Inst(inst) => Some(&mut self.insts[inst.index()].uses),
            Value::Const(_) | Value::Undef(_) => None,
        }
    }

    fn use_list(&self, value: &Value) -> Option<&UseList> {
        match value {
            Value::Arg(arg) => Some(&self.args[arg.index()].uses),
            Value::Inst(inst) => Some(&self.insts[inst.index()].uses),
            Value::Const(_) | Value::Undef(_) => None,
        }
    }

    fn slot(&self, u: Use) -> &Operand {
        &self.insts[u.inst.index()].operands[u.slot as usize]
    }

    fn slot_mut(&mut self, u: Use) -> &mut Operand {
        &mut self.insts[u.inst.index()].operands[u.slot as usize]
    }

    /// Links slot `u`, which must already hold its value, at the head of the value's list.
    fn link_use(&mut self, u: Use) {
        let value = self.slot(u).value.clone();
        let Some(list) = self.use_list_mut(&value) else {
            return;
        };
        let old_head = list.head.replace(u);
        list.len += 1;

        let op = self.slot_mut(u);
        op.prev = None;
        op.next = old_head;
        if let Some(next) = old_head {
            self.slot_mut(next).prev = Some(u);
        }
    }

    /// Unlinks slot `u` from the list of the value it currently holds.
    fn unlink_use(&mut self, u: Use) {
        let op = self.slot(u);
        let (value, prev, next) = (op.value.clone(), op.prev, op.next);
        if !value.is_tracked() {
            return;
        }

        match prev {
            Some(prev) => self.slot_mut(prev).next = next,
            None => {
                if let Some(list) = self.use_list_mut(&value) {
                    list.head = next;
                }
            }
        }
        if let Some(next) = next {
            self.slot_mut(next).prev = prev;
        }
        if let Some(list) = self.use_list_mut(&value) {
            list.len -= 1;
        }

        let op = self.slot_mut(u);
        op.prev = None;
        op.next = None;
    }

    pub(crate) fn push_operand(&mut self, inst: InstId, value: Value) {
        let operands = &mut self.insts[inst.index()].operands;
        let u = Use::new(inst, operands.len() as u32);
        operands.push(Operand {
            value,
            prev: None,
            next: None,
        });
        self.link_use(u);
    }

    /// Unlinks and discards every operand of `inst`.
    pub(crate) fn drop_operands(&mut self, inst: InstId) {
        for slot in 0..self.insts[inst.index()].operands.len() {
            self.unlink_use(Use::new(inst, slot as u32));
        }
        self.insts[inst.index()].operands.clear();
        if let InstKind::Phi { blocks } = &mut self.insts[inst.index()].kind {
            blocks.clear();
        }
    }

    /// Replaces the value in operand slot `slot` of `inst`.
    ///
    /// The old use edge is unlinked and the new one linked in a single step.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Invariant`] if the slot does not exist.
    pub fn set_operand(&mut self, inst: InstId, slot: usize, value: Value) -> Result<()> {
        let len = self.insts[inst.index()].operands.len();
        if slot >= len {
            return Err(invariant_error!(
                "operand slot {} out of range for {} with {} operands",
                slot,
                inst,
                len
            ));
        }

        let u = Use::new(inst, slot as u32);
        if self.slot(u).value == value {
            return Ok(());
        }
        self.unlink_use(u);
        self.slot_mut(u).value = value;
        self.link_use(u);
        Ok(())
    }

    /// Iterates over every `(instruction, slot)` edge referencing `value`.
    ///
    /// An instruction using the value in several slots appears once per slot. Constants
    /// have no use list and yield nothing.
    pub fn uses(&self, value: &Value) -> UseIter<'_> {
        UseIter {
            body: self,
            next: self.use_list(value).and_then(|list| list.head),
        }
    }

    /// Distinct instructions referencing `value`, in use-list order.
    #[must_use]
    pub fn users(&self, value: &Value) -> Vec<InstId> {
        let mut seen = BitSet::new(self.inst_capacity());
        self.uses(value)
            .filter(|u| seen.insert(u.inst.index()))
            .map(|u| u.inst)
            .collect()
    }

    /// Number of use edges referencing `value`.
    #[must_use]
    pub fn num_uses(&self, value: &Value) -> usize {
        self.use_list(value).map_or(0, |list| list.len as usize)
    }

    /// Rewrites every use of `value` to `new_value`. Returns the number of rewritten edges.
    ///
    /// The walk saves the next link before relinking the current edge, so each edge is
    /// visited exactly once even though the list is mutated underneath it.
    pub fn replace_all_uses(&mut self, value: &Value, new_value: Value) -> usize {
        if *value == new_value {
            return 0;
        }
        let mut count = 0;
        let mut cursor = self.use_list(value).and_then(|list| list.head);
        while let Some(u) = cursor {
            cursor = self.slot(u).next;
            self.unlink_use(u);
            self.slot_mut(u).value = new_value.clone();
            self.link_use(u);
            count += 1;
        }
        count
    }

    /// Replaces every use of `inst` with `value` and removes `inst`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Invariant`] if `value` is `inst` itself.
    pub fn replace_with(&mut self, inst: InstId, value: Value) -> Result<()> {
        if value == Value::Inst(inst) {
            return Err(invariant_error!("cannot replace {} with itself", inst));
        }
        self.replace_all_uses(&Value::Inst(inst), value);
        self.remove_inst(inst)
    }

    /// Incoming `(predecessor, value)` pairs of a phi.
    #[must_use]
    pub fn phi_args(&self, phi: InstId) -> Vec<(BlockId, Value)> {
        match self.kind(phi) {
            InstKind::Phi { blocks } => blocks
                .iter()
                .copied()
                .zip(self.operands(phi).cloned())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Incoming value of a phi for predecessor `block`.
    #[must_use]
    pub fn phi_arg_for(&self, phi: InstId, block: BlockId) -> Option<&Value> {
        match self.kind(phi) {
            InstKind::Phi { blocks } => blocks
                .iter()
                .position(|b| *b == block)
                .map(|index| self.operand(phi, index)),
            _ => None,
        }
    }

    /// Appends an incoming value to a phi.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Invariant`] if `phi` is not a phi.
    pub fn phi_add_arg(&mut self, phi: InstId, block: BlockId, value: Value) -> Result<()> {
        match &mut self.insts[phi.index()].kind {
            InstKind::Phi { blocks } => blocks.push(block),
            other => return Err(invariant_error!("{} is a {}, not a phi", phi, other.name())),
        }
        self.push_operand(phi, value);
        Ok(())
    }

    /// Removes incoming entry `index` of a phi.
    ///
    /// Slots after `index` shift down by one; their use edges are relinked under the new
    /// slot numbers.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Invariant`] if `phi` is not a phi or `index` is out of range.
    pub fn phi_remove_arg(&mut self, phi: InstId, index: usize) -> Result<()> {
        let len = self.insts[phi.index()].operands.len();
        match &self.insts[phi.index()].kind {
            InstKind::Phi { .. } if index < len => {}
            InstKind::Phi { .. } => {
                return Err(invariant_error!("phi {} has no argument {}", phi, index));
            }
            other => return Err(invariant_error!("{} is a {}, not a phi", phi, other.name())),
        }
        self.remove_phi_slot(phi, index);
        Ok(())
    }

    fn remove_phi_slot(&mut self, phi: InstId, index: usize) {
        let len = self.insts[phi.index()].operands.len();
        for slot in index..len {
            self.unlink_use(Use::new(phi, slot as u32));
        }
        let data = &mut self.insts[phi.index()];
        data.operands.remove(index);
        if let InstKind::Phi { blocks } = &mut data.kind {
            blocks.remove(index);
        }
        for slot in index..len - 1 {
            self.link_use(Use::new(phi, slot as u32));
        }
    }

    /// Removes the incoming entry for `block` from every phi of `target`.
    pub(crate) fn remove_phi_args_from(&mut self, target: BlockId, block: BlockId) {
        let phis: Vec<InstId> = self.phis(target).collect();
        for phi in phis {
            while let Some(index) = match self.kind(phi) {
                InstKind::Phi { blocks } => blocks.iter().position(|b| *b == block),
                _ => None,
            } {
                self.remove_phi_slot(phi, index);
            }
        }
    }
}

/// Iterator over the use edges of a value.
pub struct UseIter<'a> {
    body: &'a MethodBody,
    next: Option<Use>,
}

impl Iterator for UseIter<'_> {
    type Item = Use;

    fn next(&mut self) -> Option<Use> {
        let current = self.next?;
        self.next = self.body.slot(current).next;
        Some(current)
    }
}
