//! Block discovery and guard construction.
//!
//! The importer works in four steps over one [`IlMethod`]:
//!
//! 1. Leaders: every branch and switch target, every offset following a block-ending
//!    instruction and every exception-region boundary starts a block.
//! 2. Blocks: one IR block per run between consecutive leaders. If offset 0 is itself a
//!    branch target or region start, a dedicated entry block jumping to it is created so
//!    the entry never has predecessors.
//! 3. Guards: one guard per exception region on the block starting its protected range,
//!    with dummy edges to the handler and filter.
//! 4. Translation: each block is translated in layout order against a simulated
//!    evaluation stack (see `translate.rs`).

use std::collections::HashMap;

use tracing::{debug, instrument, trace};

use crate::{
    entities::IrType,
    il::{IlMethod, RegionKind},
    ir::{BlockId, GuardKind, InstId, InstKind, MethodBody, Value, VarId, VariableOrigin},
    utils::BitSet,
    Result,
};

/// One value a block starts with on its evaluation stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum EntrySlot {
    /// The implicit exception value of a handler or filter
    Value(Value),
    /// Stack-slot variable written by every predecessor
    Var(VarId),
}

/// Import state of the block starting at one leader.
#[derive(Debug)]
pub(super) struct BlockState {
    /// First offset of the block
    pub(super) start: u32,
    /// Offset of the next leader
    pub(super) end: u32,
    /// Block receiving the translated code
    pub(super) block: BlockId,
    /// Block branches to `start` jump to; differs from `block` once a guard split
    /// placed an outer guard in front of it
    pub(super) entry_block: BlockId,
    /// Stack shape on entry, fixed by the first predecessor or the guard seeding it
    pub(super) entry_stack: Option<Vec<EntrySlot>>,
    /// Whether the code of the block has been translated
    pub(super) imported: bool,
    /// Whether the block lies in a protected range, handler or filter
    pub(super) in_region: bool,
}

/// Blocks a variable is accessed in, for exposure marking.
#[derive(Debug, Default, Clone, Copy)]
struct VarAccess {
    block: Option<BlockId>,
    multi_block: bool,
    stored_in_region: bool,
}

/// Translates one [`IlMethod`] into a [`MethodBody`] in variable form.
///
/// Arguments, locals and evaluation-stack values crossing block boundaries become
/// [`crate::ir::Variable`]s accessed through `LoadVar`/`StoreVar`. Arguments are copied
/// into their variables at the start of the entry block. Run
/// [`crate::passes::SsaPromotion`] afterwards to obtain SSA form.
///
/// # Examples
///
/// ```rust
/// use dotssa::{
///     entities::{IrType, MethodSig},
///     frontend::ILImporter,
///     il::{IlBuilder, OpCode},
/// };
///
/// let mut builder = IlBuilder::new(MethodSig::new_static(vec![IrType::I32], IrType::I32));
/// builder.emit(OpCode::Ldarg0).emit(OpCode::LdcI41).emit(OpCode::Add).emit(OpCode::Ret);
/// let method = builder.build()?;
///
/// let body = ILImporter::new(&method).import()?;
/// assert_eq!(body.num_blocks(), 1);
/// assert_eq!(body.num_vars(), 1);
/// # Ok::<(), dotssa::Error>(())
/// ```
pub struct ILImporter<'a> {
    pub(super) method: &'a IlMethod,
    pub(super) body: MethodBody,
    pub(super) states: Vec<BlockState>,
    pub(super) arg_vars: Vec<VarId>,
    pub(super) local_vars: Vec<VarId>,
    access: Vec<VarAccess>,
    guard_regions: HashMap<InstId, usize>,
}

impl<'a> ILImporter<'a> {
    /// Prepares the import of `method`, creating one variable per argument and local.
    #[must_use]
    pub fn new(method: &'a IlMethod) -> Self {
        let arg_types = method.arg_types();
        let mut body = MethodBody::new(arg_types.clone(), method.sig.ret.clone());

        let arg_vars = arg_types
            .into_iter()
            .enumerate()
            .map(|(i, ty)| body.create_var(ty, VariableOrigin::Argument(i as u16)))
            .collect();
        let local_vars = method
            .locals
            .iter()
            .enumerate()
            .map(|(i, decl)| {
                let var = body.create_var(decl.ty.clone(), VariableOrigin::Local(i as u16));
                body.var_mut(var).is_pinned = decl.pinned;
                var
            })
            .collect();

        ILImporter {
            method,
            body,
            states: Vec::new(),
            arg_vars,
            local_vars,
            access: Vec::new(),
            guard_regions: HashMap::new(),
        }
    }

    /// Runs the import.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidProgram`] for malformed bytecode: branches or region
    /// boundaries off instruction boundaries, stack underflow, stack height mismatches at
    /// block boundaries or control falling off the end of the method. Returns
    /// [`crate::Error::NotSupported`] for opcodes without a translation.
    #[instrument(skip_all, fields(method = %self.method.name))]
    pub fn import(mut self) -> Result<MethodBody> {
        if self.method.instructions.is_empty() {
            return Err(invalid_program!(0, "method has no instructions"));
        }

        let leaders = self.find_leaders()?;
        self.create_blocks(leaders)?;
        self.create_guards()?;
        self.copy_arguments()?;
        for index in 0..self.states.len() {
            self.import_block(index)?;
        }
        self.mark_exposed();

        debug!(
            blocks = self.body.num_blocks(),
            guards = self.guard_regions.len(),
            vars = self.body.num_vars(),
            "imported method"
        );
        Ok(self.body)
    }

    fn find_leaders(&self) -> Result<BitSet> {
        let method = self.method;
        let code_size = method.code_size();
        let mut leaders = BitSet::new(code_size as usize + 1);
        let mut mark = |offset: u32, at: u32| {
            if offset > code_size {
                return Err(invalid_program!(
                    at,
                    "target IL_{:04x} is past the end of the method",
                    offset
                ));
            }
            leaders.insert(offset as usize);
            Ok(())
        };

        for inst in &method.instructions {
            if inst.opcode.ends_block() {
                for target in inst.branch_targets() {
                    mark(target, inst.offset)?;
                }
                mark(inst.end_offset(), inst.offset)?;
            }
        }
        for region in &method.regions {
            if region.try_start >= region.try_end || region.handler_start >= region.handler_end {
                return Err(invalid_program!(region.try_start, "exception region has an empty range"));
            }
            let bounds = [region.try_start, region.try_end, region.handler_start, region.handler_end];
            for offset in bounds.into_iter().chain(region.filter_start) {
                mark(offset, region.try_start)?;
            }
        }

        for offset in leaders.iter() {
            self.find_index(offset as u32)?;
        }
        Ok(leaders)
    }

    /// Index of the instruction at `offset`; the end of the code maps to the instruction
    /// count.
    pub(super) fn find_index(&self, offset: u32) -> Result<usize> {
        let code = &self.method.instructions;
        match code.binary_search_by_key(&offset, |inst| inst.offset) {
            Ok(index) => Ok(index),
            Err(_) if offset >= self.method.code_size() => Ok(code.len()),
            Err(_) => Err(invalid_program!(offset, "offset is not on an instruction boundary")),
        }
    }

    /// Index of the block state starting at `offset`.
    pub(super) fn state_at(&self, offset: u32) -> Result<usize> {
        self.states
            .binary_search_by_key(&offset, |state| state.start)
            .map_err(|_| invalid_program!(offset, "no block starts at this offset"))
    }

    fn create_blocks(&mut self, mut leaders: BitSet) -> Result<()> {
        let code_size = self.method.code_size();
        let entry = leaders.contains(0).then(|| self.body.create_block(None));
        leaders.insert(0);
        leaders.insert(code_size as usize);

        let offsets: Vec<u32> = leaders.iter().map(|offset| offset as u32).collect();
        for bounds in offsets.windows(2) {
            let (start, end) = (bounds[0], bounds[1]);
            let block = self.body.create_block(None);
            let in_region = self.method.regions.iter().any(|r| r.contains(start));
            self.states.push(BlockState {
                start,
                end,
                block,
                entry_block: block,
                entry_stack: None,
                imported: false,
                in_region,
            });
        }

        if let Some(entry) = entry {
            let first = self.states[0].block;
            self.body.set_branch(entry, first)?;
            trace!(%entry, %first, "offset 0 has predecessors, created a dedicated entry block");
        }
        Ok(())
    }

    fn create_guards(&mut self) -> Result<()> {
        let method = self.method;
        for (index, region) in method.regions.iter().enumerate() {
            let start = self.try_start_block(index)?;
            let handler_state = self.state_at(region.handler_start)?;
            let handler = self.states[handler_state].entry_block;
            let filter_state = region.filter_start.map(|offset| self.state_at(offset)).transpose()?;
            let filter = filter_state.map(|state| self.states[state].entry_block);

            let (kind, ty, catch_type) = match region.kind {
                RegionKind::Catch => {
                    let caught = region.catch_type.clone().unwrap_or(IrType::Object);
                    (GuardKind::Catch, caught.clone(), Some(caught))
                }
                RegionKind::Filter => (GuardKind::Filter, IrType::Object, None),
                RegionKind::Finally => (GuardKind::Finally, IrType::Void, None),
                RegionKind::Fault => (GuardKind::Fault, IrType::Void, None),
            };
            let guard = self.body.create_inst(
                InstKind::Guard {
                    kind,
                    handler,
                    filter,
                    catch_type,
                },
                Vec::new(),
                ty,
            )?;
            match self.body.terminator(start) {
                Some(term) => self.body.insert_before(term, guard)?,
                None => self.body.insert_last(start, guard)?,
            }
            self.guard_regions.insert(guard, index);

            if matches!(kind, GuardKind::Catch | GuardKind::Filter) {
                let seeded = Some(vec![EntrySlot::Value(Value::Inst(guard))]);
                self.states[handler_state].entry_stack = seeded.clone();
                if let Some(state) = filter_state {
                    self.states[state].entry_stack = seeded;
                }
            }
            trace!(%guard, %start, %handler, kind = ?kind, "installed guard");
        }
        Ok(())
    }

    /// Block to host the guard of region `index`.
    ///
    /// If the region's first block already hosts the guard of a region nested strictly
    /// inside this one, a new block is placed in front of it: every predecessor is
    /// redirected to the new block, which falls through to the old one. Outer guards thus
    /// always dominate inner ones.
    fn try_start_block(&mut self, index: usize) -> Result<BlockId> {
        let method = self.method;
        let region = &method.regions[index];
        let state = self.state_at(region.try_start)?;
        let start = self.states[state].entry_block;

        let nested = self.body.guards(start).any(|guard| {
            self.guard_regions.get(&guard).is_some_and(|&inner| {
                let inner = &method.regions[inner];
                inner.try_start >= region.try_start && inner.try_end < region.try_end
            })
        });
        if !nested {
            return Ok(start);
        }

        let split = self.body.create_block(self.body.prev_block(start));
        for pred in self.body.preds(start).to_vec() {
            self.body.replace_target(pred, start, split)?;
        }
        self.body.set_branch(split, start)?;
        self.states[state].entry_block = split;
        trace!(%split, %start, "split try start for an enclosing region");
        Ok(split)
    }

    fn copy_arguments(&mut self) -> Result<()> {
        let Some(entry) = self.body.entry_block() else {
            return Err(invariant_error!("import created no entry block"));
        };

        let mut prev = None;
        for (index, var) in self.arg_vars.clone().into_iter().enumerate() {
            let store = self
                .body
                .create_inst(InstKind::StoreVar(var), vec![self.body.arg(index)], IrType::Void)?;
            match prev {
                Some(prev) => self.body.insert_after(prev, store)?,
                None => self.body.insert_first(entry, store)?,
            }
            prev = Some(store);
            self.record_access(var, entry, false, false);
        }
        Ok(())
    }

    /// Notes an access of `var` in `block` for exposure marking.
    pub(super) fn record_access(&mut self, var: VarId, block: BlockId, is_store: bool, in_region: bool) {
        if self.access.len() <= var.index() {
            self.access.resize(self.body.num_vars(), VarAccess::default());
        }
        let access = &mut self.access[var.index()];
        match access.block {
            None => access.block = Some(block),
            Some(first) if first != block => access.multi_block = true,
            Some(_) => {}
        }
        if is_store && in_region {
            access.stored_in_region = true;
        }
    }

    // SSA values do not flow along exceptional edges, so a variable written inside a
    // region and used in another block has to stay in memory.
    fn mark_exposed(&mut self) {
        for (index, access) in self.access.iter().enumerate() {
            if access.stored_in_region && access.multi_block {
                let var = VarId::new(index);
                let var_data = self.body.var_mut(var);
                if !var_data.is_exposed {
                    var_data.is_exposed = true;
                    trace!(%var, origin = %var_data.origin, "variable crosses an exception region");
                }
            }
        }
    }
}
