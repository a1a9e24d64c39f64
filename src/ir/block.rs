//! Blocks, instruction lists and control-flow edges.
//!
//! Edges follow the instructions: attaching a terminator or guard to a block connects the
//! block to each of its targets, detaching one disconnects every target no other
//! terminator or guard of the block still references. Disconnecting `A -> B` also drops
//! the incoming entry for `A` from every phi in `B`, so phi arity keeps matching the
//! predecessor count.

use crate::{
    entities::IrType,
    ir::{body::BlockData, BlockId, InstId, InstKind, MethodBody, Value},
    Result,
};

impl MethodBody {
    /// Creates an empty block after `insert_after`, or at the end of the layout.
    ///
    /// The first block ever created becomes the entry block.
    pub fn create_block(&mut self, insert_after: Option<BlockId>) -> BlockId {
        let id = BlockId::new(self.blocks.len());
        self.blocks.push(BlockData::default());

        let after = insert_after.or(self.last_block);
        match after {
            Some(prev) => {
                let next = self.blocks[prev.index()].next;
                self.blocks[id.index()].prev = Some(prev);
                self.blocks[id.index()].next = next;
                self.blocks[prev.index()].next = Some(id);
                match next {
                    Some(next) => self.blocks[next.index()].prev = Some(id),
                    None => self.last_block = Some(id),
                }
            }
            None => {
                self.first_block = Some(id);
                self.last_block = Some(id);
            }
        }

        if self.entry.is_none() {
            self.entry = Some(id);
        }
        self.cfg_version += 1;
        id
    }

    /// Designates the entry block.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Invariant`] if the block has predecessors.
    pub fn set_entry_block(&mut self, block: BlockId) -> Result<()> {
        if !self.preds(block).is_empty() {
            return Err(invariant_error!("entry block {} must not have predecessors", block));
        }
        self.entry = Some(block);
        self.cfg_version += 1;
        Ok(())
    }

    /// Removes a block with every instruction it holds.
    ///
    /// Values defined in the block that are still used elsewhere are replaced with
    /// undefined values.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Invariant`] if the block still has predecessors, is targeted
    /// by a guard, or is the entry block.
    pub fn remove_block(&mut self, block: BlockId) -> Result<()> {
        if !self.preds(block).is_empty() {
            return Err(invariant_error!(
                "cannot remove {} with predecessors {:?}",
                block,
                self.preds(block)
            ));
        }
        if self.entry == Some(block) {
            return Err(invariant_error!("cannot remove entry block {}", block));
        }
        let guarded = self.blocks().filter(|b| *b != block).any(|b| {
            self.guards(b)
                .any(|guard| self.kind(guard).successors().contains(&block))
        });
        if guarded {
            return Err(invariant_error!("cannot remove {}: still targeted by a guard", block));
        }

        let insts: Vec<InstId> = self.insts(block).collect();
        for inst in insts.iter().rev() {
            self.unlink_inst(*inst);
        }
        for inst in insts {
            self.drop_operands(inst);
            let ty = self.inst_type(inst).clone();
            self.replace_all_uses(&Value::Inst(inst), Value::Undef(ty));
            self.insts[inst.index()].removed = true;
        }
        for succ in self.blocks[block.index()].succs.clone() {
            self.disconnect(block, succ);
        }

        let data = &self.blocks[block.index()];
        let (prev, next) = (data.prev, data.next);
        match prev {
            Some(prev) => self.blocks[prev.index()].next = next,
            None => self.first_block = next,
        }
        match next {
            Some(next) => self.blocks[next.index()].prev = prev,
            None => self.last_block = prev,
        }
        let data = &mut self.blocks[block.index()];
        data.prev = None;
        data.next = None;
        data.removed = true;
        self.cfg_version += 1;
        Ok(())
    }

    /// Adds the edge `from -> to` unless present.
    pub fn connect(&mut self, from: BlockId, to: BlockId) {
        if self.blocks[from.index()].succs.contains(&to) {
            return;
        }
        self.blocks[from.index()].succs.push(to);
        self.blocks[to.index()].preds.push(from);
        self.cfg_version += 1;
    }

    /// Removes the edge `from -> to` and the incoming phi entries it carried.
    pub fn disconnect(&mut self, from: BlockId, to: BlockId) {
        let succs = &mut self.blocks[from.index()].succs;
        let Some(pos) = succs.iter().position(|b| *b == to) else {
            return;
        };
        succs.remove(pos);
        self.blocks[to.index()].preds.retain(|b| *b != from);
        self.remove_phi_args_from(to, from);
        self.cfg_version += 1;
    }

    /// Returns `true` if a terminator or guard attached to `block` targets `target`.
    fn references_block(&self, block: BlockId, target: BlockId) -> bool {
        self.insts(block).any(|inst| {
            let kind = self.kind(inst);
            (kind.is_terminator() || kind.is_guard()) && kind.successors().contains(&target)
        })
    }

    fn check_detached(&self, inst: InstId) -> Result<()> {
        let data = &self.insts[inst.index()];
        if data.removed {
            return Err(invariant_error!("{} was removed", inst));
        }
        if let Some(block) = data.block {
            return Err(invariant_error!("{} is already attached to {}", inst, block));
        }
        Ok(())
    }

    fn link_inst(&mut self, inst: InstId, block: BlockId, prev: Option<InstId>, next: Option<InstId>) {
        {
            let data = &mut self.insts[inst.index()];
            data.block = Some(block);
            data.prev = prev;
            data.next = next;
        }
        match prev {
            Some(prev) => self.insts[prev.index()].next = Some(inst),
            None => self.blocks[block.index()].first = Some(inst),
        }
        match next {
            Some(next) => self.insts[next.index()].prev = Some(inst),
            None => self.blocks[block.index()].last = Some(inst),
        }

        let kind = &self.insts[inst.index()].kind;
        if kind.is_terminator() || kind.is_guard() {
            for succ in kind.successors() {
                self.connect(block, succ);
            }
        }
    }

    /// Unlinks an attached instruction from its block and drops the edges only it held.
    fn unlink_inst(&mut self, inst: InstId) {
        let Some(block) = self.insts[inst.index()].block else {
            return;
        };
        let (prev, next) = {
            let data = &mut self.insts[inst.index()];
            let links = (data.prev, data.next);
            data.block = None;
            data.prev = None;
            data.next = None;
            links
        };
        match prev {
            Some(prev) => self.insts[prev.index()].next = next,
            None => self.blocks[block.index()].first = next,
        }
        match next {
            Some(next) => self.insts[next.index()].prev = prev,
            None => self.blocks[block.index()].last = prev,
        }

        let kind = &self.insts[inst.index()].kind;
        if kind.is_terminator() || kind.is_guard() {
            for succ in kind.successors() {
                if !self.references_block(block, succ) {
                    self.disconnect(block, succ);
                }
            }
        }
    }

    /// Inserts a detached instruction at the start of `block`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Invariant`] if the instruction is attached or removed.
    pub fn insert_first(&mut self, block: BlockId, inst: InstId) -> Result<()> {
        self.check_detached(inst)?;
        let first = self.blocks[block.index()].first;
        self.link_inst(inst, block, None, first);
        Ok(())
    }

    /// Inserts a detached instruction at the end of `block`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Invariant`] if the instruction is attached or removed.
    pub fn insert_last(&mut self, block: BlockId, inst: InstId) -> Result<()> {
        self.check_detached(inst)?;
        let last = self.blocks[block.index()].last;
        self.link_inst(inst, block, last, None);
        Ok(())
    }

    /// Inserts a detached instruction right before `anchor`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Invariant`] if `inst` is attached or `anchor` is not.
    pub fn insert_before(&mut self, anchor: InstId, inst: InstId) -> Result<()> {
        self.check_detached(inst)?;
        let Some(block) = self.inst_block(anchor) else {
            return Err(invariant_error!("anchor {} is not attached to a block", anchor));
        };
        let prev = self.insts[anchor.index()].prev;
        self.link_inst(inst, block, prev, Some(anchor));
        Ok(())
    }

    /// Inserts a detached instruction right after `anchor`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Invariant`] if `inst` is attached or `anchor` is not.
    pub fn insert_after(&mut self, anchor: InstId, inst: InstId) -> Result<()> {
        self.check_detached(inst)?;
        let Some(block) = self.inst_block(anchor) else {
            return Err(invariant_error!("anchor {} is not attached to a block", anchor));
        };
        let next = self.insts[anchor.index()].next;
        self.link_inst(inst, block, Some(anchor), next);
        Ok(())
    }

    /// Creates an empty phi of type `ty` after the existing phis of `block`.
    ///
    /// # Errors
    ///
    /// Propagates failures of [`MethodBody::insert_after`].
    pub fn insert_phi(&mut self, block: BlockId, ty: IrType) -> Result<InstId> {
        let phi = self.create_inst(InstKind::Phi { blocks: Vec::new() }, Vec::new(), ty)?;
        let last_phi = self.phis(block).last();
        match last_phi {
            Some(last_phi) => self.insert_after(last_phi, phi)?,
            None => self.insert_first(block, phi)?,
        }
        Ok(phi)
    }

    /// Unlinks an instruction from its block, keeping its operands.
    ///
    /// The instruction can be inserted again, into any block.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Invariant`] if the instruction was removed.
    pub fn detach_inst(&mut self, inst: InstId) -> Result<()> {
        if self.insts[inst.index()].removed {
            return Err(invariant_error!("{} was removed", inst));
        }
        self.unlink_inst(inst);
        Ok(())
    }

    /// Removes an instruction that has no remaining uses.
    ///
    /// Outgoing operand edges are dropped and the id becomes a tombstone.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Invariant`] if the instruction still has users.
    pub fn remove_inst(&mut self, inst: InstId) -> Result<()> {
        let uses = self.num_uses(&Value::Inst(inst));
        if uses != 0 {
            return Err(invariant_error!(
                "cannot remove {} ({}) with {} remaining uses",
                inst,
                self.kind(inst).name(),
                uses
            ));
        }
        self.unlink_inst(inst);
        self.drop_operands(inst);
        self.insts[inst.index()].removed = true;
        Ok(())
    }

    /// Removes an instruction, severing remaining uses by replacing them with an undefined
    /// value of its type.
    pub fn destroy_inst(&mut self, inst: InstId) {
        self.unlink_inst(inst);
        self.drop_operands(inst);
        let ty = self.inst_type(inst).clone();
        self.replace_all_uses(&Value::Inst(inst), Value::Undef(ty));
        self.insts[inst.index()].removed = true;
    }

    /// Replaces the terminator of `block` with the detached terminator `inst`.
    ///
    /// The new terminator is attached before the old one is removed, so edges to targets
    /// shared by both survive along with their phi entries.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Invariant`] if `inst` is not a detached terminator.
    pub fn set_terminator(&mut self, block: BlockId, inst: InstId) -> Result<()> {
        if !self.kind(inst).is_terminator() {
            return Err(invariant_error!("{} is not a terminator", self.kind(inst).name()));
        }
        let old = self.terminator(block);
        self.insert_last(block, inst)?;
        if let Some(old) = old {
            self.destroy_inst(old);
        }
        Ok(())
    }

    /// Makes `block` end with an unconditional jump to `target`.
    ///
    /// # Errors
    ///
    /// Propagates failures of [`MethodBody::set_terminator`].
    pub fn set_branch(&mut self, block: BlockId, target: BlockId) -> Result<()> {
        let jump = self.create_inst(InstKind::Jump { target }, Vec::new(), IrType::Void)?;
        self.set_terminator(block, jump)
    }

    /// Retargets every reference to `old` in the terminator and guards of `block` to `new`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Invariant`] if no instruction of the block targets `old`.
    pub fn replace_target(&mut self, block: BlockId, old: BlockId, new: BlockId) -> Result<()> {
        let branching: Vec<InstId> = self
            .insts(block)
            .filter(|inst| {
                let kind = self.kind(*inst);
                kind.is_terminator() || kind.is_guard()
            })
            .collect();

        let mut changed = false;
        for inst in branching {
            changed |= self.insts[inst.index()].kind.replace_successor(old, new);
        }
        if !changed {
            return Err(invariant_error!("no instruction of {} targets {}", block, old));
        }
        self.connect(block, new);
        if !self.references_block(block, old) {
            self.disconnect(block, old);
        }
        Ok(())
    }
}
