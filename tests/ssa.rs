//! SSA construction integration tests.
//!
//! Every test assembles bytecode with `IlBuilder`, compiles it through the pipeline with
//! verification enabled and then checks the promoted graph:
//! 1. Phi placement at joins and loop headers
//! 2. Removal of promotable variable accesses
//! 3. Guard placement for exception regions
//! 4. Use lists and dominance after promotion

use std::collections::HashSet;

use dotssa::{
    analysis::DominatorTree,
    entities::{IrType, MethodSig},
    il::{IlBuilder, IlOperand, OpCode},
    ir::{verify, BlockId, GuardKind, InstId, InstKind, MemoryFlags, MethodBody, Use, Value},
    passes::{MethodInvalidations, MethodPass, MethodTransformContext, Pipeline, PipelineConfig, SsaPromotion},
    Result,
};

fn compile(il: &IlBuilder) -> Result<MethodBody> {
    let pipeline = Pipeline::with_config(PipelineConfig {
        verify: true,
        ..PipelineConfig::default()
    });
    pipeline.compile(&il.build()?)
}

fn all_insts(body: &MethodBody) -> Vec<InstId> {
    body.blocks().flat_map(|b| body.insts(b)).collect()
}

fn all_phis(body: &MethodBody) -> Vec<InstId> {
    body.blocks().flat_map(|b| body.phis(b)).collect()
}

/// `LoadVar`/`StoreVar` instructions against variables that could have been promoted.
fn promotable_accesses(body: &MethodBody) -> usize {
    all_insts(body)
        .into_iter()
        .filter(|inst| match body.kind(*inst) {
            InstKind::LoadVar(var) | InstKind::StoreVar(var) => body.var(*var).can_promote(),
            _ => false,
        })
        .count()
}

fn block_at(body: &MethodBody, index: usize) -> BlockId {
    body.blocks().nth(index).expect("block index out of range")
}

fn ret_value(body: &MethodBody, block: BlockId) -> Value {
    let ret = body.terminator(block).expect("block has no terminator");
    assert!(matches!(body.kind(ret), InstKind::Return));
    body.operand(ret, 0).clone()
}

/// `(guard, host block)` pairs ordered by the layout position of each guard's handler.
fn guard_hosts(body: &MethodBody) -> Vec<(InstId, BlockId)> {
    let layout: Vec<BlockId> = body.blocks().collect();
    let position = |block: BlockId| layout.iter().position(|b| *b == block).unwrap();

    let mut guards: Vec<(usize, InstId, BlockId)> = body
        .blocks()
        .flat_map(|b| body.guards(b))
        .map(|guard| match body.kind(guard) {
            InstKind::Guard { handler, .. } => {
                (position(*handler), guard, body.inst_block(guard).unwrap())
            }
            _ => unreachable!(),
        })
        .collect();
    guards.sort();
    guards.into_iter().map(|(_, guard, host)| (guard, host)).collect()
}

/// Checks the properties every promoted body must satisfy beyond `verify`.
fn assert_sound(body: &MethodBody) {
    verify(body).unwrap();
    assert_eq!(promotable_accesses(body), 0, "promotable variable access left behind");
    for phi in all_phis(body) {
        let block = body.inst_block(phi).unwrap();
        assert_eq!(body.phi_args(phi).len(), body.preds(block).len(), "phi {phi} arity");
    }
}

#[test]
fn test_ssa_partial_diamond() -> Result<()> {
    // x = 1; if (!c) x = 2; return x;
    let mut il = IlBuilder::new(MethodSig::new_static(vec![IrType::Bool], IrType::I32));
    il.local(IrType::I32);
    il.emit(OpCode::LdcI41)
        .emit(OpCode::Stloc0)
        .emit(OpCode::Ldarg0)
        .branch(OpCode::BrtrueS, "join")
        .emit(OpCode::LdcI42)
        .emit(OpCode::Stloc0)
        .label("join")
        .emit(OpCode::Ldloc0)
        .emit(OpCode::Ret);

    let body = compile(&il)?;
    assert_sound(&body);
    assert_eq!(body.num_blocks(), 3);

    let join = block_at(&body, 2);
    let phis: Vec<InstId> = body.phis(join).collect();
    assert_eq!(phis.len(), 1, "expected one phi for x");
    assert_eq!(ret_value(&body, join), Value::Inst(phis[0]));

    let incoming: HashSet<Value> = body.phi_args(phis[0]).into_iter().map(|(_, v)| v).collect();
    assert_eq!(incoming, HashSet::from([Value::i32(1), Value::i32(2)]));
    Ok(())
}

#[test]
fn test_ssa_full_diamond() -> Result<()> {
    // if (c) x = 1; else x = 2; return x;
    let mut il = IlBuilder::new(MethodSig::new_static(vec![IrType::Bool], IrType::I32));
    il.local(IrType::I32);
    il.emit(OpCode::Ldarg0)
        .branch(OpCode::BrfalseS, "else")
        .emit(OpCode::LdcI41)
        .emit(OpCode::Stloc0)
        .branch(OpCode::BrS, "join")
        .label("else")
        .emit(OpCode::LdcI42)
        .emit(OpCode::Stloc0)
        .label("join")
        .emit(OpCode::Ldloc0)
        .emit(OpCode::Ret);

    let body = compile(&il)?;
    assert_sound(&body);
    assert_eq!(body.num_blocks(), 4, "entry, then, else and join");

    let join = block_at(&body, 3);
    let phis: Vec<InstId> = body.phis(join).collect();
    assert_eq!(phis.len(), 1);
    let args = body.phi_args(phis[0]);
    assert_eq!(args.len(), 2);
    let preds: HashSet<BlockId> = body.preds(join).iter().copied().collect();
    assert_eq!(args.iter().map(|(b, _)| *b).collect::<HashSet<_>>(), preds);

    // Both stores are gone, only the phi remains as a definition of x.
    let stores = all_insts(&body)
        .into_iter()
        .filter(|i| matches!(body.kind(*i), InstKind::StoreVar(_)))
        .count();
    assert_eq!(stores, 0);
    Ok(())
}

#[test]
fn test_ssa_loop_phi() -> Result<()> {
    // x = 0; while (c) { x = x + 1; } return x;
    let mut il = IlBuilder::new(MethodSig::new_static(vec![IrType::Bool], IrType::I32));
    il.local(IrType::I32);
    il.emit(OpCode::LdcI40)
        .emit(OpCode::Stloc0)
        .branch(OpCode::BrS, "cond")
        .label("loop")
        .emit(OpCode::Ldloc0)
        .emit(OpCode::LdcI41)
        .emit(OpCode::Add)
        .emit(OpCode::Stloc0)
        .label("cond")
        .emit(OpCode::Ldarg0)
        .branch(OpCode::BrtrueS, "loop")
        .emit(OpCode::Ldloc0)
        .emit(OpCode::Ret);

    let body = compile(&il)?;
    assert_sound(&body);
    assert_eq!(body.num_blocks(), 4);

    let latch = block_at(&body, 1);
    let header = block_at(&body, 2);
    let phis: Vec<InstId> = body.phis(header).collect();
    assert_eq!(phis.len(), 1, "one phi for x at the loop header");

    let phi = phis[0];
    assert_eq!(body.phi_args(phi).len(), 2);
    assert_eq!(body.phi_arg_for(phi, block_at(&body, 0)), Some(&Value::i32(0)));
    let Some(Value::Inst(update)) = body.phi_arg_for(phi, latch).cloned() else {
        panic!("latch value is not an instruction");
    };
    assert!(matches!(body.kind(update), InstKind::Binary(_)));
    assert_eq!(body.operand(update, 0), &Value::Inst(phi));

    assert_eq!(ret_value(&body, block_at(&body, 3)), Value::Inst(phi));
    Ok(())
}

#[test]
fn test_ssa_idempotent() -> Result<()> {
    let mut il = IlBuilder::new(MethodSig::new_static(vec![IrType::Bool, IrType::I32], IrType::I32));
    il.local(IrType::I32);
    il.emit(OpCode::Ldarg1)
        .emit(OpCode::Stloc0)
        .label("loop")
        .emit(OpCode::Ldarg0)
        .branch(OpCode::BrfalseS, "exit")
        .emit(OpCode::Ldloc0)
        .emit(OpCode::LdcI42)
        .emit(OpCode::Mul)
        .emit(OpCode::Stloc0)
        .branch(OpCode::BrS, "loop")
        .label("exit")
        .emit(OpCode::Ldloc0)
        .emit(OpCode::Ret);

    let mut body = compile(&il)?;
    let phis = all_phis(&body).len();
    let insts = all_insts(&body);

    let mut ctx = MethodTransformContext::new(&mut body);
    let invalidations = SsaPromotion::new().run(&mut ctx)?;
    assert_eq!(invalidations, MethodInvalidations::empty());

    assert_eq!(all_phis(&body).len(), phis);
    assert_eq!(all_insts(&body), insts);
    Ok(())
}

#[test]
fn test_ssa_try_catch_guard() -> Result<()> {
    // try { } catch (object e) { throw e; }
    let mut il = IlBuilder::new(MethodSig::new_static(vec![], IrType::Void));
    il.label("try")
        .emit(OpCode::Nop)
        .branch(OpCode::LeaveS, "exit")
        .label("handler")
        .emit(OpCode::Throw)
        .label("exit")
        .emit(OpCode::Ret)
        .catch_region(("try", "handler"), ("handler", "exit"), IrType::Object);

    let body = compile(&il)?;
    assert_sound(&body);

    let guards: Vec<InstId> = body.blocks().flat_map(|b| body.guards(b)).collect();
    assert_eq!(guards.len(), 1, "exactly one guard");
    let guard = guards[0];
    let try_block = body.inst_block(guard).unwrap();

    let InstKind::Guard { kind, handler, filter, .. } = body.kind(guard).clone() else {
        unreachable!();
    };
    assert_eq!(kind, GuardKind::Catch);
    assert_eq!(filter, None);
    assert_eq!(body.inst_type(guard), &IrType::Object);

    // The guard contributes an edge to its handler.
    assert!(body.succs(try_block).contains(&handler));
    assert!(body.preds(handler).contains(&try_block));

    // The handler's stack starts with the exception value, which it rethrows.
    let throw = body.terminator(handler).unwrap();
    assert!(matches!(body.kind(throw), InstKind::Throw { rethrow: false }));
    assert_eq!(body.operand(throw, 0), &Value::Inst(guard));
    Ok(())
}

#[test]
fn test_ssa_nested_guards_split() -> Result<()> {
    // Both try ranges start at offset 0; the inner one ends first.
    let mut il = IlBuilder::new(MethodSig::new_static(vec![], IrType::Void));
    il.label("try")
        .emit(OpCode::Nop)
        .branch(OpCode::LeaveS, "after_inner")
        .label("inner_handler")
        .emit(OpCode::Pop)
        .branch(OpCode::LeaveS, "after_inner")
        .label("after_inner")
        .branch(OpCode::LeaveS, "exit")
        .label("outer_handler")
        .emit(OpCode::Pop)
        .branch(OpCode::LeaveS, "exit")
        .label("exit")
        .emit(OpCode::Ret)
        .catch_region(("try", "inner_handler"), ("inner_handler", "after_inner"), IrType::Object)
        .catch_region(("try", "outer_handler"), ("outer_handler", "exit"), IrType::Object);

    let body = compile(&il)?;
    assert_sound(&body);

    let hosts = guard_hosts(&body);
    assert_eq!(hosts.len(), 2);
    let (inner_host, outer_host) = (hosts[0].1, hosts[1].1);

    assert_ne!(inner_host, outer_host);
    let doms = DominatorTree::compute(&body)?;
    assert!(doms.strictly_dominates(outer_host, inner_host));
    assert_eq!(body.preds(inner_host), &[outer_host]);
    Ok(())
}

#[test]
fn test_ssa_three_guards_share_start() -> Result<()> {
    // Three try ranges start at offset 0, each ending after the previous one's handler.
    let mut il = IlBuilder::new(MethodSig::new_static(vec![], IrType::Void));
    il.label("try")
        .emit(OpCode::Nop)
        .branch(OpCode::LeaveS, "after_inner")
        .label("inner_handler")
        .emit(OpCode::Pop)
        .branch(OpCode::LeaveS, "after_inner")
        .label("after_inner")
        .branch(OpCode::LeaveS, "after_middle")
        .label("middle_handler")
        .emit(OpCode::Pop)
        .branch(OpCode::LeaveS, "after_middle")
        .label("after_middle")
        .branch(OpCode::LeaveS, "exit")
        .label("outer_handler")
        .emit(OpCode::Pop)
        .branch(OpCode::LeaveS, "exit")
        .label("exit")
        .emit(OpCode::Ret)
        .catch_region(("try", "inner_handler"), ("inner_handler", "after_inner"), IrType::Object)
        .catch_region(("try", "middle_handler"), ("middle_handler", "after_middle"), IrType::Object)
        .catch_region(("try", "outer_handler"), ("outer_handler", "exit"), IrType::Object);

    let body = compile(&il)?;
    assert_sound(&body);

    let hosts = guard_hosts(&body);
    assert_eq!(hosts.len(), 3);
    let (inner, middle, outer) = (hosts[0].1, hosts[1].1, hosts[2].1);
    assert_eq!(hosts.iter().map(|(_, host)| *host).collect::<HashSet<_>>().len(), 3);
    for (_, host) in &hosts {
        assert_eq!(body.guards(*host).count(), 1, "{host} hosts more than one guard");
    }

    let doms = DominatorTree::compute(&body)?;
    assert!(doms.strictly_dominates(outer, middle));
    assert!(doms.strictly_dominates(middle, inner));
    assert_eq!(body.preds(middle), &[outer]);
    assert_eq!(body.preds(inner), &[middle]);
    Ok(())
}

#[test]
fn test_ssa_back_edge_into_split_try_start() -> Result<()> {
    // loc0 = 0; do { try { try { loc0++; } catch { } } catch { } } while (loc0 < 3);
    let mut il = IlBuilder::new(MethodSig::new_static(vec![], IrType::I32));
    il.local(IrType::I32);
    il.emit(OpCode::LdcI40)
        .emit(OpCode::Stloc0)
        .label("try")
        .emit(OpCode::Ldloc0)
        .emit(OpCode::LdcI41)
        .emit(OpCode::Add)
        .emit(OpCode::Stloc0)
        .branch(OpCode::LeaveS, "after_inner")
        .label("inner_handler")
        .emit(OpCode::Pop)
        .branch(OpCode::LeaveS, "after_inner")
        .label("after_inner")
        .branch(OpCode::LeaveS, "next")
        .label("outer_handler")
        .emit(OpCode::Pop)
        .branch(OpCode::LeaveS, "next")
        .label("next")
        .emit(OpCode::Ldloc0)
        .emit(OpCode::LdcI43)
        .branch(OpCode::BltS, "try")
        .emit(OpCode::Ldloc0)
        .emit(OpCode::Ret)
        .catch_region(("try", "inner_handler"), ("inner_handler", "after_inner"), IrType::Object)
        .catch_region(("try", "outer_handler"), ("outer_handler", "next"), IrType::Object);

    let body = compile(&il)?;
    assert_sound(&body);

    let hosts = guard_hosts(&body);
    assert_eq!(hosts.len(), 2);
    let (inner_host, outer_host) = (hosts[0].1, hosts[1].1);
    assert_ne!(inner_host, outer_host);

    // The back edge enters through the outer guard, never around it.
    assert_eq!(body.preds(inner_host), &[outer_host]);
    assert_eq!(body.preds(outer_host).len(), 2, "fallthrough and back edge");

    let doms = DominatorTree::compute(&body)?;
    assert!(doms.strictly_dominates(outer_host, inner_host));
    let latches: Vec<BlockId> = body
        .preds(outer_host)
        .iter()
        .copied()
        .filter(|pred| doms.dominates(outer_host, *pred))
        .collect();
    assert_eq!(latches.len(), 1, "one back edge");
    assert!(!body.succs(latches[0]).contains(&inner_host));
    Ok(())
}

#[test]
fn test_ssa_unreachable_pred_feeds_phi() -> Result<()> {
    // The block at "dead" has no predecessors but still branches to the join.
    let mut il = IlBuilder::new(MethodSig::new_static(vec![IrType::Bool], IrType::I32));
    il.local(IrType::I32);
    il.emit(OpCode::Ldarg0)
        .branch(OpCode::BrtrueS, "other")
        .emit(OpCode::LdcI41)
        .emit(OpCode::Stloc0)
        .branch(OpCode::BrS, "join")
        .label("dead")
        .emit(OpCode::LdcI45)
        .emit(OpCode::Stloc0)
        .branch(OpCode::BrS, "join")
        .label("other")
        .emit(OpCode::LdcI42)
        .emit(OpCode::Stloc0)
        .label("join")
        .emit(OpCode::Ldloc0)
        .emit(OpCode::Ret);

    let body = compile(&il)?;
    assert_sound(&body);

    let dead = block_at(&body, 2);
    let join = block_at(&body, 4);
    assert!(body.preds(dead).is_empty());
    assert_eq!(body.preds(join).len(), 3);

    let phis: Vec<InstId> = body.phis(join).collect();
    assert_eq!(phis.len(), 1);
    assert_eq!(body.phi_args(phis[0]).len(), 3);
    assert_eq!(body.phi_arg_for(phis[0], dead), Some(&Value::i32(5)));
    assert_eq!(body.phi_arg_for(phis[0], block_at(&body, 1)), Some(&Value::i32(1)));
    assert_eq!(body.phi_arg_for(phis[0], block_at(&body, 3)), Some(&Value::i32(2)));
    assert_eq!(ret_value(&body, join), Value::Inst(phis[0]));
    Ok(())
}

#[test]
fn test_ssa_fault_guard() -> Result<()> {
    // try { loc0 = volatile *p; } fault { } return loc0;
    let sig = MethodSig::new_static(vec![IrType::by_ref(IrType::I32)], IrType::I32);
    let mut il = IlBuilder::new(sig);
    il.local(IrType::I32);
    il.label("try")
        .emit(OpCode::Ldarg0)
        .emit(OpCode::Volatile)
        .emit(OpCode::LdindI4)
        .emit(OpCode::Stloc0)
        .branch(OpCode::LeaveS, "exit")
        .label("handler")
        .emit(OpCode::Endfinally)
        .label("exit")
        .emit(OpCode::Ldloc0)
        .emit(OpCode::Ret)
        .fault_region(("try", "handler"), ("handler", "exit"));

    let body = compile(&il)?;
    assert_sound(&body);

    let hosts = guard_hosts(&body);
    assert_eq!(hosts.len(), 1);
    let (guard, host) = hosts[0];
    let InstKind::Guard { kind, handler, filter, catch_type } = body.kind(guard).clone() else {
        unreachable!();
    };
    assert_eq!(kind, GuardKind::Fault);
    assert_eq!(filter, None);
    assert_eq!(catch_type, None);
    assert_eq!(body.inst_type(guard), &IrType::Void);

    assert_ne!(handler, host);
    assert!(body.succs(host).contains(&handler));
    assert_eq!(body.preds(handler), &[host]);
    let resume = body.terminator(handler).unwrap();
    assert!(matches!(body.kind(resume), InstKind::Resume));
    assert_eq!(body.operands(resume).count(), 0);

    let loads: Vec<MemoryFlags> = body
        .insts(host)
        .filter_map(|inst| match body.kind(inst) {
            InstKind::Load { flags } => Some(*flags),
            _ => None,
        })
        .collect();
    assert_eq!(loads, vec![MemoryFlags::VOLATILE]);
    Ok(())
}

#[test]
fn test_ssa_exposed_and_pinned_kept() -> Result<()> {
    // loc0 is address-taken, loc1 is pinned, loc2 is promotable
    let mut il = IlBuilder::new(MethodSig::new_static(vec![], IrType::I32));
    il.local(IrType::I32);
    il.pinned_local(IrType::Object);
    il.local(IrType::I32);
    il.emit(OpCode::LdcI43)
        .emit(OpCode::Stloc0)
        .emit(OpCode::Ldnull)
        .emit(OpCode::Stloc1)
        .emit_with(OpCode::LdlocaS, IlOperand::Var(0))
        .emit(OpCode::LdindI4)
        .emit(OpCode::Stloc2)
        .emit(OpCode::Ldloc2)
        .emit(OpCode::Ret);

    let body = compile(&il)?;
    assert_sound(&body);

    let kept: Vec<&InstKind> = all_insts(&body)
        .into_iter()
        .map(|i| body.kind(i))
        .filter(|k| matches!(k, InstKind::LoadVar(_) | InstKind::StoreVar(_) | InstKind::VarAddr(_)))
        .collect();
    assert_eq!(kept.len(), 3, "store and address of loc0, store of loc1");
    Ok(())
}

#[test]
fn test_ssa_use_lists_consistent() -> Result<()> {
    // int Sum(int n) { int s = 0; for (int i = 0; i < n; i++) s += i; return s; }
    let mut il = IlBuilder::new(MethodSig::new_static(vec![IrType::I32], IrType::I32));
    il.local(IrType::I32);
    il.local(IrType::I32);
    il.emit(OpCode::LdcI40)
        .emit(OpCode::Stloc0)
        .emit(OpCode::LdcI40)
        .emit(OpCode::Stloc1)
        .branch(OpCode::BrS, "cond")
        .label("loop")
        .emit(OpCode::Ldloc0)
        .emit(OpCode::Ldloc1)
        .emit(OpCode::Add)
        .emit(OpCode::Stloc0)
        .emit(OpCode::Ldloc1)
        .emit(OpCode::LdcI41)
        .emit(OpCode::Add)
        .emit(OpCode::Stloc1)
        .label("cond")
        .emit(OpCode::Ldloc1)
        .emit(OpCode::Ldarg0)
        .branch(OpCode::BltS, "loop")
        .emit(OpCode::Ldloc0)
        .emit(OpCode::Ret);

    let body = compile(&il)?;
    assert_sound(&body);
    assert_eq!(all_phis(&body).len(), 2);

    let mut expected: HashSet<Use> = HashSet::new();
    let mut tracked = Vec::new();
    for inst in all_insts(&body) {
        for (slot, value) in body.operands(inst).enumerate() {
            if value.is_tracked() {
                expected.insert(Use::new(inst, slot as u32));
                tracked.push(value.clone());
            }
        }
    }

    let mut actual: HashSet<Use> = HashSet::new();
    for value in tracked {
        for u in body.uses(&value) {
            assert_eq!(body.operand(u.inst, u.slot as usize), &value);
            actual.insert(u);
        }
    }
    assert_eq!(actual, expected);
    Ok(())
}

#[test]
fn test_ssa_stack_value_across_blocks() -> Result<()> {
    // return c ? 10 : 20;
    let mut il = IlBuilder::new(MethodSig::new_static(vec![IrType::Bool], IrType::I32));
    il.emit(OpCode::Ldarg0)
        .branch(OpCode::BrtrueS, "ten")
        .ldc_i4(20)
        .branch(OpCode::BrS, "join")
        .label("ten")
        .ldc_i4(10)
        .label("join")
        .emit(OpCode::Ret);

    let body = compile(&il)?;
    assert_sound(&body);

    let join = block_at(&body, 3);
    let phis: Vec<InstId> = body.phis(join).collect();
    assert_eq!(phis.len(), 1, "stack slot joined by a phi");
    assert_eq!(ret_value(&body, join), Value::Inst(phis[0]));
    Ok(())
}

#[test]
fn test_ssa_batch() {
    let methods: Vec<_> = (0..16)
        .map(|n| {
            let mut il = IlBuilder::new(MethodSig::new_static(vec![IrType::I32], IrType::I32));
            il.local(IrType::I32);
            il.emit(OpCode::Ldarg0)
                .ldc_i4(n)
                .emit(OpCode::Add)
                .emit(OpCode::Stloc0)
                .emit(OpCode::Ldloc0)
                .emit(OpCode::Ret);
            il.build().unwrap()
        })
        .collect();

    let results = Pipeline::new().compile_all(&methods);
    assert_eq!(results.len(), methods.len());
    for (n, result) in results.into_iter().enumerate() {
        let body = result.unwrap();
        assert_sound(&body);
        let entry = body.entry_block().unwrap();
        let Value::Inst(add) = ret_value(&body, entry) else {
            panic!("method {n} does not return the sum");
        };
        assert_eq!(body.operand(add, 1), &Value::i32(n as i32));
    }
}
