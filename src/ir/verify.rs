//! Structural verification of method bodies.

use std::collections::HashSet;

use crate::{
    analysis::DominatorTree,
    ir::{BlockId, InstId, MethodBody, Use, Value},
    Error, Result,
};

fn failure(message: String) -> Error {
    Error::Verification(message)
}

/// Checks the structural invariants of `body`.
///
/// The checks cover the block structure, the control-flow edges, phi arity, the use lists
/// and, for reachable blocks, the SSA dominance property: every operand is defined in a
/// block dominating its use, or earlier in the same block. Phi operands must be defined in
/// a block dominating the corresponding predecessor.
///
/// Variable instructions are accepted, so a body can be verified before and after
/// promotion.
///
/// # Errors
///
/// Returns [`Error::Verification`] describing the first violation found.
pub fn verify(body: &MethodBody) -> Result<()> {
    let Some(entry) = body.entry_block() else {
        return Err(failure("method body has no entry block".into()));
    };
    if body.is_block_removed(entry) {
        return Err(failure(format!("entry block {entry} was removed")));
    }
    if !body.preds(entry).is_empty() {
        return Err(failure(format!(
            "entry block {} has predecessors {:?}",
            entry,
            body.preds(entry)
        )));
    }

    let doms = DominatorTree::compute(body)?;
    let mut position = vec![0u32; body.inst_capacity()];
    for block in body.blocks() {
        verify_block(body, &doms, block, &mut position)?;
        verify_edges(body, block)?;
    }
    verify_use_lists(body)?;
    for block in body.blocks().filter(|b| doms.is_reachable(*b)) {
        verify_dominance(body, &doms, &position, block)?;
    }
    Ok(())
}

fn verify_block(body: &MethodBody, doms: &DominatorTree, block: BlockId, position: &mut [u32]) -> Result<()> {
    if body.is_block_removed(block) {
        return Err(failure(format!("removed block {block} is still in the layout")));
    }

    let mut seen_non_phi = false;
    let mut prev = None;
    for (index, inst) in body.insts(block).enumerate() {
        position[inst.index()] = index as u32;
        let kind = body.kind(inst);
        if body.is_removed(inst) {
            return Err(failure(format!("removed {inst} is still attached to {block}")));
        }
        if body.inst_block(inst) != Some(block) {
            return Err(failure(format!("{inst} in {block} records a different block")));
        }
        if body.prev_inst(inst) != prev {
            return Err(failure(format!("broken instruction links at {inst} in {block}")));
        }
        if kind.is_phi() {
            if seen_non_phi {
                return Err(failure(format!("phi {inst} follows a non-phi in {block}")));
            }
        } else {
            seen_non_phi = true;
        }
        if kind.is_terminator() && body.next_inst(inst).is_some() {
            return Err(failure(format!(
                "terminator {} ({}) is not the last instruction of {}",
                inst,
                kind.name(),
                block
            )));
        }
        prev = Some(inst);
    }
    if body.last_inst(block) != prev {
        return Err(failure(format!("broken instruction links at the end of {block}")));
    }

    if doms.is_reachable(block) && body.terminator(block).is_none() {
        return Err(failure(format!("reachable block {block} has no terminator")));
    }
    Ok(())
}

fn verify_edges(body: &MethodBody, block: BlockId) -> Result<()> {
    let succs = body.succs(block);
    let preds = body.preds(block);

    for (i, succ) in succs.iter().enumerate() {
        if succs[..i].contains(succ) {
            return Err(failure(format!("duplicate edge {block} -> {succ}")));
        }
        if body.is_block_removed(*succ) {
            return Err(failure(format!("{block} has removed successor {succ}")));
        }
        if !body.preds(*succ).contains(&block) {
            return Err(failure(format!("edge {block} -> {succ} is missing its predecessor side")));
        }
    }
    for pred in preds {
        if !body.succs(*pred).contains(&block) {
            return Err(failure(format!("edge {pred} -> {block} is missing its successor side")));
        }
    }

    let mut targets: Vec<BlockId> = Vec::new();
    for inst in body.insts(block) {
        let kind = body.kind(inst);
        if kind.is_terminator() || kind.is_guard() {
            for target in kind.successors() {
                if !targets.contains(&target) {
                    targets.push(target);
                }
            }
        }
    }
    if targets.len() != succs.len() || targets.iter().any(|t| !succs.contains(t)) {
        return Err(failure(format!(
            "successors of {block} are {succs:?} but its instructions target {targets:?}"
        )));
    }

    for phi in body.phis(block) {
        let args = body.phi_args(phi);
        if args.len() != preds.len() || preds.iter().any(|p| !args.iter().any(|(b, _)| b == p)) {
            return Err(failure(format!(
                "phi {} in {} has incoming blocks {:?}, predecessors are {:?}",
                phi,
                block,
                args.iter().map(|(b, _)| *b).collect::<Vec<_>>(),
                preds
            )));
        }
    }
    Ok(())
}

fn verify_use_lists(body: &MethodBody) -> Result<()> {
    let mut slots = 0usize;
    for index in 0..body.inst_capacity() {
        let inst = InstId::new(index);
        let count = body.num_operands(inst);
        if body.is_removed(inst) {
            if count != 0 {
                return Err(failure(format!("removed {inst} still holds operands")));
            }
            if body.num_uses(&Value::Inst(inst)) != 0 {
                return Err(failure(format!("removed {inst} is still used")));
            }
            continue;
        }
        slots += body.operands(inst).filter(|v| v.is_tracked()).count();
    }

    let mut listed = HashSet::new();
    let tracked = body
        .args()
        .map(Value::Arg)
        .chain((0..body.inst_capacity()).map(|i| Value::Inst(InstId::new(i))));
    for value in tracked {
        let mut walked = 0;
        for u in body.uses(&value) {
            walked += 1;
            if !listed.insert(u) {
                return Err(failure(format!("use {}:{} is listed twice", u.inst, u.slot)));
            }
            check_use(body, &value, u)?;
        }
        if walked != body.num_uses(&value) {
            return Err(failure(format!(
                "use count of {} is {} but its list holds {}",
                value,
                body.num_uses(&value),
                walked
            )));
        }
    }

    if listed.len() != slots {
        return Err(failure(format!(
            "{} operand slots reference tracked values but use lists hold {}",
            slots,
            listed.len()
        )));
    }
    Ok(())
}

fn check_use(body: &MethodBody, value: &Value, u: Use) -> Result<()> {
    let slot = u.slot as usize;
    if body.is_removed(u.inst) || slot >= body.num_operands(u.inst) || body.operand(u.inst, slot) != value {
        return Err(failure(format!(
            "use list of {} references {}:{} which does not hold it",
            value, u.inst, u.slot
        )));
    }
    Ok(())
}

fn verify_dominance(body: &MethodBody, doms: &DominatorTree, position: &[u32], block: BlockId) -> Result<()> {
    for inst in body.insts(block) {
        let phi_blocks = body.kind(inst).is_phi().then(|| body.phi_args(inst));
        for (slot, value) in body.operands(inst).enumerate() {
            let Value::Inst(def) = value else {
                continue;
            };
            let Some(def_block) = body.inst_block(*def) else {
                return Err(failure(format!("{inst} uses {def}, which is not in any block")));
            };

            let ok = match &phi_blocks {
                Some(args) => {
                    let pred = args[slot].0;
                    !doms.is_reachable(pred) || doms.dominates(def_block, pred)
                }
                None if def_block == block => position[def.index()] < position[inst.index()],
                None => doms.strictly_dominates(def_block, block),
            };
            if !ok {
                return Err(failure(format!(
                    "{} ({}) in {} uses {}, which does not dominate it",
                    inst,
                    body.kind(inst).name(),
                    block,
                    def
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        entities::IrType,
        ir::{BinaryOp, InstKind},
    };

    fn ret(body: &mut MethodBody, block: BlockId, value: Value) -> InstId {
        let inst = body.create_inst(InstKind::Return, vec![value], IrType::Void).unwrap();
        body.insert_last(block, inst).unwrap();
        inst
    }

    #[test]
    fn test_valid_body() {
        let mut body = MethodBody::new(vec![IrType::I32], IrType::I32);
        let b0 = body.create_block(None);
        let sum = body
            .create_inst(InstKind::Binary(BinaryOp::Add), vec![body.arg(0), Value::i32(1)], IrType::I32)
            .unwrap();
        body.insert_last(b0, sum).unwrap();
        ret(&mut body, b0, Value::Inst(sum));
        verify(&body).unwrap();
    }

    #[test]
    fn test_missing_terminator() {
        let mut body = MethodBody::new(vec![], IrType::Void);
        body.create_block(None);
        assert!(matches!(verify(&body), Err(Error::Verification(_))));
    }

    #[test]
    fn test_use_before_def() {
        let mut body = MethodBody::new(vec![IrType::I32], IrType::I32);
        let b0 = body.create_block(None);
        let sum = body
            .create_inst(InstKind::Binary(BinaryOp::Add), vec![body.arg(0), Value::i32(1)], IrType::I32)
            .unwrap();
        let neg = body
            .create_inst(InstKind::Unary(crate::ir::UnaryOp::Neg), vec![Value::Inst(sum)], IrType::I32)
            .unwrap();
        body.insert_last(b0, neg).unwrap();
        body.insert_last(b0, sum).unwrap();
        ret(&mut body, b0, Value::Inst(neg));
        let err = verify(&body).unwrap_err();
        assert!(err.to_string().contains("does not dominate"), "{err}");
    }

    #[test]
    fn test_def_in_sibling_branch() {
        let mut body = MethodBody::new(vec![IrType::Bool], IrType::I32);
        let b0 = body.create_block(None);
        let left = body.create_block(None);
        let right = body.create_block(None);
        let br = body
            .create_inst(
                InstKind::Branch {
                    then_block: left,
                    else_block: right,
                },
                vec![body.arg(0)],
                IrType::Void,
            )
            .unwrap();
        body.insert_last(b0, br).unwrap();
        let neg = body
            .create_inst(InstKind::Unary(crate::ir::UnaryOp::Neg), vec![Value::i32(3)], IrType::I32)
            .unwrap();
        body.insert_last(left, neg).unwrap();
        ret(&mut body, left, Value::Inst(neg));
        ret(&mut body, right, Value::Inst(neg));
        assert!(verify(&body).is_err());
    }

    #[test]
    fn test_phi_arity_mismatch() {
        let mut body = MethodBody::new(vec![IrType::Bool], IrType::I32);
        let b0 = body.create_block(None);
        let b1 = body.create_block(None);
        let join = body.create_block(None);
        let br = body
            .create_inst(
                InstKind::Branch {
                    then_block: b1,
                    else_block: join,
                },
                vec![body.arg(0)],
                IrType::Void,
            )
            .unwrap();
        body.insert_last(b0, br).unwrap();
        body.set_branch(b1, join).unwrap();
        let phi = body.insert_phi(join, IrType::I32).unwrap();
        body.phi_add_arg(phi, b0, Value::i32(1)).unwrap();
        ret(&mut body, join, Value::Inst(phi));
        assert!(verify(&body).is_err());

        body.phi_add_arg(phi, b1, Value::i32(2)).unwrap();
        verify(&body).unwrap();
    }
}
