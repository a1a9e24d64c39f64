//! Promotion of variables into SSA values.
//!
//! Builds semi-pruned SSA in the classic two steps:
//!
//! 1. Phi placement. A variable needs phis only if it is global, i.e. some block reads
//!    it before writing it. Phis for global variables go on the iterated dominance
//!    frontier of the blocks storing them.
//! 2. Renaming. A pre-order walk of the dominator tree keeps one definition stack per
//!    variable. Stores push their value and disappear, loads are replaced by the top of
//!    the stack, and phis of every successor receive the value live at the end of the
//!    block. Leaving a block pops what it pushed, using one undo log for the whole walk.
//!
//! Pinned and exposed variables keep their `LoadVar`/`StoreVar` instructions.

use std::collections::HashMap;

use tracing::{debug, instrument, trace, warn};

use crate::{
    analysis::{DominanceFrontier, DominatorTree},
    ir::{BlockId, InstId, InstKind, MethodBody, Value, VarId},
    passes::{MethodInvalidations, MethodPass, MethodTransformContext},
    utils::BitSet,
    Result,
};

/// Options for [`SsaPromotion`].
#[derive(Debug, Clone)]
pub struct PromotionConfig {
    /// Delete phis whose only users are other dead phis or themselves (default: true).
    pub remove_dead_phis: bool,

    /// Emit a warning for every read of a variable with no reaching definition
    /// (default: true).
    pub warn_on_undefined: bool,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            remove_dead_phis: true,
            warn_on_undefined: true,
        }
    }
}

/// Rewrites promotable variables into SSA form.
///
/// Reads with no reaching definition become [`Value::Undef`] of the variable's type.
/// Stored values narrower than their variable, such as an `int32` written to a `bool`
/// local, are converted to the variable type first.
///
/// Running the pass on a body without promotable variable accesses changes nothing and
/// reports no invalidations.
///
/// # Examples
///
/// ```rust
/// use dotssa::{
///     entities::{IrType, MethodSig},
///     frontend::ILImporter,
///     il::{IlBuilder, OpCode},
///     passes::{MethodPass, MethodTransformContext, SsaPromotion},
/// };
///
/// let mut builder = IlBuilder::new(MethodSig::new_static(vec![IrType::I32], IrType::I32));
/// builder.emit(OpCode::Ldarg0).emit(OpCode::Ret);
/// let mut body = ILImporter::new(&builder.build()?).import()?;
///
/// let mut ctx = MethodTransformContext::new(&mut body);
/// SsaPromotion::new().run(&mut ctx)?;
///
/// let entry = body.entry_block().unwrap();
/// let ret = body.terminator(entry).unwrap();
/// assert_eq!(body.operand(ret, 0), &body.arg(0));
/// # Ok::<(), dotssa::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct SsaPromotion {
    config: PromotionConfig,
}

impl SsaPromotion {
    /// Creates the pass with default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the pass with the given options.
    #[must_use]
    pub fn with_config(config: PromotionConfig) -> Self {
        Self { config }
    }
}

impl MethodPass for SsaPromotion {
    fn name(&self) -> &'static str {
        "ssa_promotion"
    }

    #[instrument(skip_all, name = "ssa_promotion")]
    fn run(&mut self, ctx: &mut MethodTransformContext<'_>) -> Result<MethodInvalidations> {
        let Some(accesses) = collect_accesses(ctx.body) else {
            trace!("no promotable variable accesses");
            return Ok(MethodInvalidations::empty());
        };

        let doms = ctx.get_analysis::<DominatorTree>(true)?;
        let frontiers = ctx.get_analysis::<DominanceFrontier>(true)?;
        let body = &mut *ctx.body;

        let phi_vars = insert_phis(body, &frontiers, &accesses)?;
        let inserted = phi_vars.len();

        let mut renamer = Renamer {
            body,
            promotable: accesses.promotable,
            phi_vars,
            stacks: vec![Vec::new(); accesses.num_vars],
            undo: Vec::new(),
            warn_on_undefined: self.config.warn_on_undefined,
            reachable: true,
            stats: RenameStats::default(),
        };
        doms.traverse(&mut renamer, Renamer::enter, Renamer::exit)?;

        // Unreachable blocks see no definitions; their reads become undefined.
        renamer.reachable = false;
        let unreachable: Vec<BlockId> = renamer.body.blocks().filter(|b| !doms.is_reachable(*b)).collect();
        for block in unreachable {
            renamer.enter(block)?;
            renamer.exit(block)?;
        }

        let removed = if self.config.remove_dead_phis {
            renamer.remove_dead_phis()
        } else {
            0
        };

        let stats = renamer.stats;
        debug!(
            phis = inserted - removed,
            dead_phis = removed,
            stores = stats.stores,
            loads = stats.loads,
            undefined = stats.undefined,
            "promoted variables"
        );
        Ok(MethodInvalidations::DATA_FLOW)
    }
}

/// Per-variable facts gathered before phi placement.
struct Accesses {
    num_vars: usize,
    promotable: Vec<bool>,
    global: Vec<bool>,
    /// Blocks storing each variable, each listed once
    def_blocks: Vec<Vec<BlockId>>,
}

/// Scans every block once. Returns `None` if no promotable variable is accessed.
fn collect_accesses(body: &MethodBody) -> Option<Accesses> {
    let num_vars = body.num_vars();
    let mut promotable: Vec<bool> = body.vars().map(|v| body.var(v).can_promote()).collect();

    // A variable whose address is taken can be written through memory.
    for block in body.blocks() {
        for inst in body.insts(block) {
            if let InstKind::VarAddr(var) = body.kind(inst) {
                promotable[var.index()] = false;
            }
        }
    }

    let mut global = vec![false; num_vars];
    let mut def_blocks: Vec<Vec<BlockId>> = vec![Vec::new(); num_vars];
    let mut killed = BitSet::new(num_vars);
    let mut any = false;
    for block in body.blocks() {
        killed.clear();
        for inst in body.insts(block) {
            match body.kind(inst) {
                InstKind::StoreVar(var) if promotable[var.index()] => {
                    killed.insert(var.index());
                    let defs = &mut def_blocks[var.index()];
                    if defs.last() != Some(&block) {
                        defs.push(block);
                    }
                    any = true;
                }
                InstKind::LoadVar(var) if promotable[var.index()] => {
                    if !killed.contains(var.index()) {
                        global[var.index()] = true;
                    }
                    any = true;
                }
                _ => {}
            }
        }
    }

    any.then_some(Accesses {
        num_vars,
        promotable,
        global,
        def_blocks,
    })
}

/// Places phis for global variables on the iterated dominance frontier of their
/// definitions. Returns the variable each new phi stands for.
fn insert_phis(
    body: &mut MethodBody,
    frontiers: &DominanceFrontier,
    accesses: &Accesses,
) -> Result<HashMap<InstId, VarId>> {
    let mut phi_vars = HashMap::new();
    let mut has_phi = BitSet::new(body.block_capacity());
    let mut queued = BitSet::new(body.block_capacity());

    for index in (0..accesses.num_vars).filter(|i| accesses.global[*i]) {
        let var = VarId::new(index);
        let ty = body.var(var).ty.clone();
        has_phi.clear();
        queued.clear();

        let mut worklist = accesses.def_blocks[index].clone();
        for block in &worklist {
            queued.insert(block.index());
        }
        while let Some(block) = worklist.pop() {
            for &frontier in frontiers.of(block) {
                if !has_phi.insert(frontier.index()) {
                    continue;
                }
                let phi = body.insert_phi(frontier, ty.clone())?;
                phi_vars.insert(phi, var);
                trace!(%phi, %var, block = %frontier, "inserted phi");
                if queued.insert(frontier.index()) {
                    worklist.push(frontier);
                }
            }
        }
    }
    Ok(phi_vars)
}

#[derive(Debug, Default, Clone, Copy)]
struct RenameStats {
    stores: usize,
    loads: usize,
    undefined: usize,
}

struct Renamer<'b> {
    body: &'b mut MethodBody,
    promotable: Vec<bool>,
    phi_vars: HashMap<InstId, VarId>,
    /// Current definitions of each variable, innermost last
    stacks: Vec<Vec<Value>>,
    /// Definitions pushed so far, in push order
    undo: Vec<(BlockId, VarId)>,
    warn_on_undefined: bool,
    reachable: bool,
    stats: RenameStats,
}

impl Renamer<'_> {
    fn enter(&mut self, block: BlockId) -> Result<()> {
        let phis: Vec<InstId> = self.body.phis(block).collect();
        for phi in phis {
            if let Some(&var) = self.phi_vars.get(&phi) {
                self.push_def(block, var, Value::Inst(phi));
            }
        }

        let insts: Vec<InstId> = self.body.insts(block).collect();
        for inst in insts {
            let (var, is_store) = match self.body.kind(inst) {
                InstKind::StoreVar(var) => (*var, true),
                InstKind::LoadVar(var) => (*var, false),
                _ => continue,
            };
            if !self.promotable[var.index()] {
                continue;
            }

            if is_store {
                let value = self.body.operand(inst, 0).clone();
                let value = self.coerce(inst, var, value)?;
                self.push_def(block, var, value);
                self.body.remove_inst(inst)?;
                self.stats.stores += 1;
            } else {
                let value = self.current_def(var, inst);
                self.body.replace_with(inst, value)?;
                self.stats.loads += 1;
            }
        }

        let succs = self.body.succs(block).to_vec();
        for succ in succs {
            let phis: Vec<InstId> = self.body.phis(succ).collect();
            for phi in phis {
                let Some(&var) = self.phi_vars.get(&phi) else {
                    continue;
                };
                let value = match self.stacks[var.index()].last() {
                    Some(value) => value.clone(),
                    None => Value::Undef(self.body.var(var).ty.clone()),
                };
                self.body.phi_add_arg(phi, block, value)?;
            }
        }
        Ok(())
    }

    fn exit(&mut self, block: BlockId) -> Result<()> {
        while let Some(&(owner, var)) = self.undo.last() {
            if owner != block {
                break;
            }
            self.undo.pop();
            self.stacks[var.index()].pop();
        }
        Ok(())
    }

    fn push_def(&mut self, block: BlockId, var: VarId, value: Value) {
        self.stacks[var.index()].push(value);
        self.undo.push((block, var));
    }

    fn current_def(&mut self, var: VarId, load: InstId) -> Value {
        if let Some(value) = self.stacks[var.index()].last() {
            return value.clone();
        }
        self.stats.undefined += 1;
        let var_data = self.body.var(var);
        if self.warn_on_undefined && self.reachable {
            warn!(%var, origin = %var_data.origin, %load, "variable read before any definition");
        }
        Value::Undef(var_data.ty.clone())
    }

    /// Narrows `value` to the type of `var` if its stack representation is wider.
    fn coerce(&mut self, store: InstId, var: VarId, value: Value) -> Result<Value> {
        let ty = self.body.var(var).ty.clone();
        if !ty.needs_narrowing_from(&self.body.value_type(&value)) {
            return Ok(value);
        }
        let conv = self.body.create_inst(
            InstKind::Convert {
                check_overflow: false,
                src_unsigned: false,
            },
            vec![value],
            ty,
        )?;
        self.body.insert_before(store, conv)?;
        Ok(Value::Inst(conv))
    }

    /// Deletes the phis no real instruction depends on, directly or through other phis.
    fn remove_dead_phis(&mut self) -> usize {
        let mut live: Vec<InstId> = Vec::new();
        let mut is_live: HashMap<InstId, bool> = self.phi_vars.keys().map(|phi| (*phi, false)).collect();

        for &phi in self.phi_vars.keys() {
            let used = self
                .body
                .users(&Value::Inst(phi))
                .into_iter()
                .any(|user| user != phi && !self.phi_vars.contains_key(&user));
            if used {
                is_live.insert(phi, true);
                live.push(phi);
            }
        }
        while let Some(phi) = live.pop() {
            for operand in self.body.operands(phi) {
                if let Value::Inst(def) = operand {
                    if is_live.get(def) == Some(&false) {
                        is_live.insert(*def, true);
                        live.push(*def);
                    }
                }
            }
        }

        let dead: Vec<InstId> = is_live.into_iter().filter(|(_, l)| !l).map(|(phi, _)| phi).collect();
        for &phi in &dead {
            self.body.destroy_inst(phi);
            self.phi_vars.remove(&phi);
        }
        dead.len()
    }
}
