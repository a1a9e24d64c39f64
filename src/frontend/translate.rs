//! Per-block translation of bytecode against a simulated evaluation stack.
//!
//! Stack entries are IR values. Pushing an instruction's result needs no storage; only
//! values still on the stack when a block ends are spilled into stack-slot variables
//! that the successors load on entry.

use tracing::trace;

use crate::{
    entities::{EntityDesc, FieldHandle, IrType, MethodHandle, StackType, Token, TypeDefDesc},
    frontend::importer::{EntrySlot, ILImporter},
    il::{IlInstruction, IlOperand, OpCode},
    ir::{
        BinaryOp, BlockId, CompareOp, Const, InstKind, IntrinsicId, MemoryFlags, UnaryOp, Value, VarId,
        VariableOrigin,
    },
    Error, Result,
};

/// Modifiers collected from prefix opcodes, consumed by the next instruction.
#[derive(Debug, Default)]
struct Prefixes {
    constrained: Option<IrType>,
    flags: MemoryFlags,
    readonly: bool,
}

/// Translation state of the block being imported.
#[derive(Debug)]
struct BlockContext {
    index: usize,
    block: BlockId,
    in_region: bool,
    offset: u32,
    stack: Vec<Value>,
    prefixes: Prefixes,
}

impl BlockContext {
    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<Value> {
        self.stack
            .pop()
            .ok_or_else(|| invalid_program!(self.offset, "evaluation stack underflow"))
    }

    /// Pops `count` values, returned in push order.
    fn pop_n(&mut self, count: usize) -> Result<Vec<Value>> {
        if self.stack.len() < count {
            return Err(invalid_program!(
                self.offset,
                "evaluation stack underflow: {} values needed, {} available",
                count,
                self.stack.len()
            ));
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }
}

fn target_of(inst: &IlInstruction) -> Result<u32> {
    match inst.operand {
        IlOperand::Target(target) => Ok(target),
        _ => Err(invalid_program!(inst.offset, "'{}' has no branch target", inst.opcode)),
    }
}

fn index_of(inst: &IlInstruction) -> Result<u16> {
    match inst.operand {
        IlOperand::Var(index) => Ok(index),
        _ => Err(invalid_program!(inst.offset, "'{}' has no variable index", inst.opcode)),
    }
}

fn type_of(inst: &IlInstruction) -> Result<&IrType> {
    match &inst.operand {
        IlOperand::Type(ty) => Ok(ty),
        _ => Err(invalid_program!(inst.offset, "'{}' has no type operand", inst.opcode)),
    }
}

fn method_of(inst: &IlInstruction) -> Result<&MethodHandle> {
    match &inst.operand {
        IlOperand::Method(method) => Ok(method),
        _ => Err(invalid_program!(inst.offset, "'{}' has no method operand", inst.opcode)),
    }
}

fn field_of(inst: &IlInstruction) -> Result<&FieldHandle> {
    match &inst.operand {
        IlOperand::Field(field) => Ok(field),
        _ => Err(invalid_program!(inst.offset, "'{}' has no field operand", inst.opcode)),
    }
}

/// Element type encoded in the typed forms of `ldind`, `stind`, `ldelem` and `stelem`.
fn primitive_of(opcode: OpCode) -> Option<IrType> {
    use OpCode::*;
    let ty = match opcode {
        LdindI1 | StindI1 | LdelemI1 | StelemI1 => IrType::I8,
        LdindU1 | LdelemU1 => IrType::U8,
        LdindI2 | StindI2 | LdelemI2 | StelemI2 => IrType::I16,
        LdindU2 | LdelemU2 => IrType::U16,
        LdindI4 | StindI4 | LdelemI4 | StelemI4 => IrType::I32,
        LdindU4 | LdelemU4 => IrType::U32,
        LdindI8 | StindI8 | LdelemI8 | StelemI8 => IrType::I64,
        LdindI | StindI | LdelemI | StelemI => IrType::NInt,
        LdindR4 | StindR4 | LdelemR4 | StelemR4 => IrType::F32,
        LdindR8 | StindR8 | LdelemR8 | StelemR8 => IrType::F64,
        _ => return None,
    };
    Some(ty)
}

/// Target type, overflow check and unsigned source flag of a conversion opcode.
fn conversion_of(opcode: OpCode) -> Option<(IrType, bool, bool)> {
    use OpCode::*;
    let conv = match opcode {
        ConvI1 => (IrType::I8, false, false),
        ConvI2 => (IrType::I16, false, false),
        ConvI4 => (IrType::I32, false, false),
        ConvI8 => (IrType::I64, false, false),
        ConvR4 => (IrType::F32, false, false),
        ConvR8 => (IrType::F64, false, false),
        ConvU1 => (IrType::U8, false, false),
        ConvU2 => (IrType::U16, false, false),
        ConvU4 => (IrType::U32, false, false),
        ConvU8 => (IrType::U64, false, false),
        ConvI => (IrType::NInt, false, false),
        ConvU => (IrType::NUInt, false, false),
        ConvRUn => (IrType::F64, false, true),
        ConvOvfI1 => (IrType::I8, true, false),
        ConvOvfI2 => (IrType::I16, true, false),
        ConvOvfI4 => (IrType::I32, true, false),
        ConvOvfI8 => (IrType::I64, true, false),
        ConvOvfU1 => (IrType::U8, true, false),
        ConvOvfU2 => (IrType::U16, true, false),
        ConvOvfU4 => (IrType::U32, true, false),
        ConvOvfU8 => (IrType::U64, true, false),
        ConvOvfI => (IrType::NInt, true, false),
        ConvOvfU => (IrType::NUInt, true, false),
        ConvOvfI1Un => (IrType::I8, true, true),
        ConvOvfI2Un => (IrType::I16, true, true),
        ConvOvfI4Un => (IrType::I32, true, true),
        ConvOvfI8Un => (IrType::I64, true, true),
        ConvOvfU1Un => (IrType::U8, true, true),
        ConvOvfU2Un => (IrType::U16, true, true),
        ConvOvfU4Un => (IrType::U32, true, true),
        ConvOvfU8Un => (IrType::U64, true, true),
        ConvOvfIUn => (IrType::NInt, true, true),
        ConvOvfUUn => (IrType::NUInt, true, true),
        _ => return None,
    };
    Some(conv)
}

fn binary_op_of(opcode: OpCode) -> Option<BinaryOp> {
    use OpCode::*;
    let op = match opcode {
        Add => BinaryOp::Add,
        Sub => BinaryOp::Sub,
        Mul => BinaryOp::Mul,
        Div => BinaryOp::SDiv,
        DivUn => BinaryOp::UDiv,
        Rem => BinaryOp::SRem,
        RemUn => BinaryOp::URem,
        And => BinaryOp::And,
        Or => BinaryOp::Or,
        Xor => BinaryOp::Xor,
        Shl => BinaryOp::Shl,
        Shr => BinaryOp::Shra,
        ShrUn => BinaryOp::Shrl,
        AddOvf => BinaryOp::AddOvf,
        AddOvfUn => BinaryOp::UAddOvf,
        SubOvf => BinaryOp::SubOvf,
        SubOvfUn => BinaryOp::USubOvf,
        MulOvf => BinaryOp::MulOvf,
        MulOvfUn => BinaryOp::UMulOvf,
        _ => return None,
    };
    Some(op)
}

/// Comparison performed by a compare-and-branch opcode.
fn branch_compare_of(opcode: OpCode) -> Option<CompareOp> {
    use OpCode::*;
    let op = match opcode {
        Beq | BeqS => CompareOp::Eq,
        Bge | BgeS => CompareOp::Sge,
        Bgt | BgtS => CompareOp::Sgt,
        Ble | BleS => CompareOp::Sle,
        Blt | BltS => CompareOp::Slt,
        BneUn | BneUnS => CompareOp::Ne,
        BgeUn | BgeUnS => CompareOp::Uge,
        BgtUn | BgtUnS => CompareOp::Ugt,
        BleUn | BleUnS => CompareOp::Ule,
        BltUn | BltUnS => CompareOp::Ult,
        _ => return None,
    };
    Some(op)
}

/// Result type of a binary operation under the ECMA-335 operand rules.
fn binary_type(op: BinaryOp, left: &IrType, right: &IrType) -> IrType {
    if op.is_shift() {
        return IrType::for_stack(left.stack_type());
    }
    match (left.stack_type(), right.stack_type()) {
        (StackType::ByRef, StackType::ByRef) => IrType::NInt,
        (StackType::ByRef, _) => left.clone(),
        (_, StackType::ByRef) => right.clone(),
        (StackType::Float, StackType::Float) if left == right => left.clone(),
        (StackType::NInt, _) if matches!(left, IrType::Pointer(_)) => left.clone(),
        (StackType::NInt, _) | (_, StackType::NInt) => IrType::NInt,
        (stack, _) => IrType::for_stack(stack),
    }
}

/// Value type of the handle `ldtoken` pushes.
fn handle_type(entity: &EntityDesc) -> IrType {
    let name = match entity {
        EntityDesc::Type(_) => "RuntimeTypeHandle",
        EntityDesc::Method(_) => "RuntimeMethodHandle",
        EntityDesc::Field(_) => "RuntimeFieldHandle",
    };
    IrType::Def(TypeDefDesc::value_type(Token::new(0), "System", name))
}

impl ILImporter<'_> {
    /// Translates the block of state `index`.
    pub(super) fn import_block(&mut self, index: usize) -> Result<()> {
        let state = &mut self.states[index];
        state.imported = true;
        let entry = state.entry_stack.get_or_insert_with(Vec::new).clone();
        let mut cx = BlockContext {
            index,
            block: state.block,
            in_region: state.in_region,
            offset: state.start,
            stack: Vec::with_capacity(entry.len()),
            prefixes: Prefixes::default(),
        };
        let (start, end) = (state.start, state.end);

        for slot in entry {
            let value = match slot {
                EntrySlot::Value(value) => value,
                EntrySlot::Var(var) => self.load_var(&cx, var)?,
            };
            cx.push(value);
        }

        let method = self.method;
        let first = self.find_index(start)?;
        let last = self.find_index(end)?;
        let code = &method.instructions[first..last];
        for inst in code {
            cx.offset = inst.offset;
            if self.translate(&mut cx, inst)? {
                cx.prefixes = Prefixes::default();
            }
        }

        let ends_block = code.last().is_some_and(|inst| inst.opcode.ends_block());
        if !ends_block {
            cx.offset = end;
            let next = self.fallthrough(&cx)?;
            self.spill(&mut cx, &[next])?;
            let target = self.states[next].entry_block;
            self.emit(&cx, InstKind::Jump { target }, Vec::new(), IrType::Void)?;
        }
        trace!(block = %cx.block, start, end, "translated block");
        Ok(())
    }

    fn emit(&mut self, cx: &BlockContext, kind: InstKind, operands: Vec<Value>, ty: IrType) -> Result<Value> {
        let inst = self.body.create_inst(kind, operands, ty)?;
        self.body.insert_last(cx.block, inst)?;
        Ok(Value::Inst(inst))
    }

    fn push_emit(&mut self, cx: &mut BlockContext, kind: InstKind, operands: Vec<Value>, ty: IrType) -> Result<()> {
        let value = self.emit(cx, kind, operands, ty)?;
        cx.push(value);
        Ok(())
    }

    fn load_var(&mut self, cx: &BlockContext, var: VarId) -> Result<Value> {
        self.record_access(var, cx.block, false, cx.in_region);
        let ty = self.body.var(var).ty.clone();
        self.emit(cx, InstKind::LoadVar(var), Vec::new(), ty)
    }

    fn store_var(&mut self, cx: &BlockContext, var: VarId, value: Value) -> Result<()> {
        self.record_access(var, cx.block, true, cx.in_region);
        self.emit(cx, InstKind::StoreVar(var), vec![value], IrType::Void)?;
        Ok(())
    }

    fn var_addr(&mut self, cx: &mut BlockContext, var: VarId) -> Result<()> {
        self.record_access(var, cx.block, false, cx.in_region);
        self.body.var_mut(var).is_exposed = true;
        let ty = IrType::by_ref(self.body.var(var).ty.clone());
        self.push_emit(cx, InstKind::VarAddr(var), Vec::new(), ty)
    }

    fn arg_var(&self, cx: &BlockContext, index: u16) -> Result<VarId> {
        self.arg_vars
            .get(usize::from(index))
            .copied()
            .ok_or_else(|| invalid_program!(cx.offset, "argument {} does not exist", index))
    }

    fn local_var(&self, cx: &BlockContext, index: u16) -> Result<VarId> {
        self.local_vars
            .get(usize::from(index))
            .copied()
            .ok_or_else(|| invalid_program!(cx.offset, "local {} does not exist", index))
    }

    fn fallthrough(&self, cx: &BlockContext) -> Result<usize> {
        let next = cx.index + 1;
        if next < self.states.len() {
            Ok(next)
        } else {
            Err(invalid_program!(cx.offset, "control falls through the end of the method"))
        }
    }

    /// Writes the values left on the stack into the entry slots of `succs`.
    ///
    /// The first predecessor reaching a block fixes its stack shape. Successors that are
    /// still unshaped share one set of fresh stack-slot variables.
    fn spill(&mut self, cx: &mut BlockContext, succs: &[usize]) -> Result<()> {
        let mut fresh: Option<Vec<VarId>> = None;
        let mut written: Vec<Vec<VarId>> = Vec::new();

        for &succ in succs {
            let slots = match &self.states[succ].entry_stack {
                Some(slots) => {
                    if slots.len() != cx.stack.len() {
                        return Err(invalid_program!(
                            cx.offset,
                            "stack height {} does not match the height {} expected at IL_{:04x}",
                            cx.stack.len(),
                            slots.len(),
                            self.states[succ].start
                        ));
                    }
                    slots
                        .iter()
                        .map(|slot| match slot {
                            EntrySlot::Var(var) => Ok(*var),
                            EntrySlot::Value(_) => Err(invalid_program!(cx.offset, "branch into an exception handler")),
                        })
                        .collect::<Result<Vec<_>>>()?
                }
                None => {
                    let vars = match &fresh {
                        Some(vars) => vars.clone(),
                        None => {
                            let vars: Vec<VarId> = cx
                                .stack
                                .iter()
                                .enumerate()
                                .map(|(depth, value)| {
                                    let ty = self.body.value_type(value);
                                    self.body.create_var(ty, VariableOrigin::Stack(depth as u32))
                                })
                                .collect();
                            fresh = Some(vars.clone());
                            vars
                        }
                    };
                    self.states[succ].entry_stack = Some(vars.iter().map(|v| EntrySlot::Var(*v)).collect());
                    vars
                }
            };

            if !written.contains(&slots) {
                for (value, var) in cx.stack.clone().into_iter().zip(&slots) {
                    self.store_var(cx, *var, value)?;
                }
                written.push(slots);
            }
        }
        cx.stack.clear();
        Ok(())
    }

    fn branch_to(&mut self, cx: &mut BlockContext, target: u32) -> Result<()> {
        let state = self.state_at(target)?;
        self.spill(cx, &[state])?;
        let target = self.states[state].entry_block;
        self.emit(cx, InstKind::Jump { target }, Vec::new(), IrType::Void)?;
        Ok(())
    }

    /// Emits a two-way branch to `target` when `cond` holds, falling through otherwise.
    fn branch_if(&mut self, cx: &mut BlockContext, cond: Value, target: u32, negate: bool) -> Result<()> {
        let taken = self.state_at(target)?;
        let next = self.fallthrough(cx)?;
        self.spill(cx, &[taken, next])?;
        let (taken, next) = (self.states[taken].entry_block, self.states[next].entry_block);
        let (then_block, else_block) = if negate { (next, taken) } else { (taken, next) };
        self.emit(
            cx,
            InstKind::Branch {
                then_block,
                else_block,
            },
            vec![cond],
            IrType::Void,
        )?;
        Ok(())
    }

    fn binary(&mut self, cx: &mut BlockContext, op: BinaryOp) -> Result<()> {
        let right = cx.pop()?;
        let left = cx.pop()?;
        let ty = binary_type(op, &self.body.value_type(&left), &self.body.value_type(&right));
        self.push_emit(cx, InstKind::Binary(op), vec![left, right], ty)
    }

    fn compare(&mut self, cx: &mut BlockContext, op: CompareOp) -> Result<Value> {
        let right = cx.pop()?;
        let left = cx.pop()?;
        self.emit(cx, InstKind::Compare(op), vec![left, right], IrType::Bool)
    }

    fn load(&mut self, cx: &mut BlockContext, address: Value, ty: IrType) -> Result<()> {
        let flags = cx.prefixes.flags;
        self.push_emit(cx, InstKind::Load { flags }, vec![address], ty)
    }

    fn store(&mut self, cx: &mut BlockContext, address: Value, value: Value, elem_type: IrType) -> Result<()> {
        let flags = cx.prefixes.flags;
        self.emit(cx, InstKind::Store { elem_type, flags }, vec![address, value], IrType::Void)?;
        Ok(())
    }

    fn array_addr(&mut self, cx: &mut BlockContext, array: Value, index: Value, elem_type: IrType) -> Result<Value> {
        let readonly = cx.prefixes.readonly;
        let ty = IrType::by_ref(elem_type.clone());
        self.emit(cx, InstKind::ArrayAddr { elem_type, readonly }, vec![array, index], ty)
    }

    fn element_type(&self, array: &Value) -> IrType {
        self.body
            .value_type(array)
            .element_type()
            .cloned()
            .unwrap_or(IrType::Object)
    }

    fn field_addr(&mut self, cx: &mut BlockContext, field: &FieldHandle, object: Option<Value>) -> Result<Value> {
        let ty = IrType::by_ref(field.ty.clone());
        self.emit(cx, InstKind::FieldAddr { field: field.clone() }, object.into_iter().collect(), ty)
    }

    fn intrinsic(
        &mut self,
        cx: &mut BlockContext,
        id: IntrinsicId,
        static_args: Vec<EntityDesc>,
        operands: Vec<Value>,
        ty: IrType,
    ) -> Result<()> {
        let void = ty.is_void();
        let value = self.emit(cx, InstKind::Intrinsic { id, static_args }, operands, ty)?;
        if !void {
            cx.push(value);
        }
        Ok(())
    }

    /// Translates one instruction. Returns `false` for prefixes, whose modifiers carry
    /// over to the next instruction.
    fn translate(&mut self, cx: &mut BlockContext, inst: &IlInstruction) -> Result<bool> {
        use OpCode::*;

        if let Some(op) = binary_op_of(inst.opcode) {
            self.binary(cx, op)?;
            return Ok(true);
        }
        if let Some((ty, check_overflow, src_unsigned)) = conversion_of(inst.opcode) {
            let value = cx.pop()?;
            self.push_emit(
                cx,
                InstKind::Convert {
                    check_overflow,
                    src_unsigned,
                },
                vec![value],
                ty,
            )?;
            return Ok(true);
        }
        if let Some(op) = branch_compare_of(inst.opcode) {
            let cond = self.compare(cx, op)?;
            self.branch_if(cx, cond, target_of(inst)?, false)?;
            return Ok(true);
        }

        match inst.opcode {
            Nop | Break => {}

            Ldarg0 | Ldarg1 | Ldarg2 | Ldarg3 => {
                let var = self.arg_var(cx, inst.opcode as u16 - Ldarg0 as u16)?;
                let value = self.load_var(cx, var)?;
                cx.push(value);
            }
            Ldarg | LdargS => {
                let var = self.arg_var(cx, index_of(inst)?)?;
                let value = self.load_var(cx, var)?;
                cx.push(value);
            }
            Starg | StargS => {
                let var = self.arg_var(cx, index_of(inst)?)?;
                let value = cx.pop()?;
                self.store_var(cx, var, value)?;
            }
            Ldarga | LdargaS => {
                let var = self.arg_var(cx, index_of(inst)?)?;
                self.var_addr(cx, var)?;
            }
            Ldloc0 | Ldloc1 | Ldloc2 | Ldloc3 => {
                let var = self.local_var(cx, inst.opcode as u16 - Ldloc0 as u16)?;
                let value = self.load_var(cx, var)?;
                cx.push(value);
            }
            Ldloc | LdlocS => {
                let var = self.local_var(cx, index_of(inst)?)?;
                let value = self.load_var(cx, var)?;
                cx.push(value);
            }
            Stloc0 | Stloc1 | Stloc2 | Stloc3 => {
                let var = self.local_var(cx, inst.opcode as u16 - Stloc0 as u16)?;
                let value = cx.pop()?;
                self.store_var(cx, var, value)?;
            }
            Stloc | StlocS => {
                let var = self.local_var(cx, index_of(inst)?)?;
                let value = cx.pop()?;
                self.store_var(cx, var, value)?;
            }
            Ldloca | LdlocaS => {
                let var = self.local_var(cx, index_of(inst)?)?;
                self.var_addr(cx, var)?;
            }

            Ldnull => cx.push(Value::null()),
            LdcI4M1 | LdcI40 | LdcI41 | LdcI42 | LdcI43 | LdcI44 | LdcI45 | LdcI46 | LdcI47 | LdcI48 => {
                cx.push(Value::i32(inst.opcode as i32 - LdcI40 as i32));
            }
            LdcI4 | LdcI4S => match inst.operand {
                IlOperand::I32(value) => cx.push(Value::i32(value)),
                _ => return Err(invalid_program!(inst.offset, "'{}' has no int32 operand", inst.opcode)),
            },
            LdcI8 => match inst.operand {
                IlOperand::I64(value) => cx.push(Value::i64(value)),
                _ => return Err(invalid_program!(inst.offset, "'ldc.i8' has no int64 operand")),
            },
            LdcR4 => match inst.operand {
                IlOperand::F32(value) => cx.push(Value::Const(Const::F32(value))),
                _ => return Err(invalid_program!(inst.offset, "'ldc.r4' has no float32 operand")),
            },
            LdcR8 => match inst.operand {
                IlOperand::F64(value) => cx.push(Value::Const(Const::F64(value))),
                _ => return Err(invalid_program!(inst.offset, "'ldc.r8' has no float64 operand")),
            },
            Ldstr => match &inst.operand {
                IlOperand::String(value) => cx.push(Value::Const(Const::String(value.as_str().into()))),
                _ => return Err(invalid_program!(inst.offset, "'ldstr' has no string operand")),
            },

            Dup => {
                let value = cx.pop()?;
                cx.push(value.clone());
                cx.push(value);
            }
            Pop => {
                cx.pop()?;
            }

            Neg | Not => {
                let value = cx.pop()?;
                let ty = self.body.value_type(&value);
                let ty = if ty.is_float() { ty } else { IrType::for_stack(ty.stack_type()) };
                let op = if inst.opcode == Neg { UnaryOp::Neg } else { UnaryOp::Not };
                self.push_emit(cx, InstKind::Unary(op), vec![value], ty)?;
            }
            Ceq | Cgt | CgtUn | Clt | CltUn => {
                let op = match inst.opcode {
                    Ceq => CompareOp::Eq,
                    Cgt => CompareOp::Sgt,
                    CgtUn => CompareOp::Ugt,
                    Clt => CompareOp::Slt,
                    _ => CompareOp::Ult,
                };
                let value = self.compare(cx, op)?;
                cx.push(value);
            }

            Br | BrS => self.branch_to(cx, target_of(inst)?)?,
            Brtrue | BrtrueS | Brfalse | BrfalseS => {
                let cond = cx.pop()?;
                let negate = matches!(inst.opcode, Brfalse | BrfalseS);
                self.branch_if(cx, cond, target_of(inst)?, negate)?;
            }
            Switch => {
                let IlOperand::Switch(offsets) = &inst.operand else {
                    return Err(invalid_program!(inst.offset, "'switch' has no jump table"));
                };
                let selector = cx.pop()?;
                let mut succs = offsets
                    .iter()
                    .map(|offset| self.state_at(*offset))
                    .collect::<Result<Vec<_>>>()?;
                let next = self.fallthrough(cx)?;
                succs.push(next);
                self.spill(cx, &succs)?;

                let targets = succs[..succs.len() - 1]
                    .iter()
                    .map(|s| self.states[*s].entry_block)
                    .collect();
                let default = self.states[next].entry_block;
                self.emit(cx, InstKind::Switch { targets, default }, vec![selector], IrType::Void)?;
            }
            Ret => {
                let ret_type = self.body.return_type().clone();
                let operands = if ret_type.is_void() { Vec::new() } else { vec![cx.pop()?] };
                if !cx.stack.is_empty() {
                    return Err(invalid_program!(
                        inst.offset,
                        "{} values left on the stack at return",
                        cx.stack.len()
                    ));
                }
                self.emit(cx, InstKind::Return, operands, IrType::Void)?;
            }

            Call | Callvirt => {
                let method = method_of(inst)?;
                let args = cx.pop_n(method.sig.arg_count())?;
                let ty = method.sig.ret.clone();
                let kind = InstKind::Call {
                    method: method.clone(),
                    is_virtual: inst.opcode == Callvirt,
                    constraint: cx.prefixes.constrained.take(),
                };
                let value = self.emit(cx, kind, args, ty.clone())?;
                if !ty.is_void() {
                    cx.push(value);
                }
            }
            Newobj => {
                let ctor = method_of(inst)?;
                let args = cx.pop_n(ctor.sig.params.len())?;
                let ty = ctor.declaring_type.clone();
                self.push_emit(cx, InstKind::NewObj { ctor: ctor.clone() }, args, ty)?;
            }
            Ldftn => {
                let method = method_of(inst)?.clone();
                self.push_emit(
                    cx,
                    InstKind::FuncAddr {
                        method,
                        is_virtual: false,
                    },
                    Vec::new(),
                    IrType::NInt,
                )?;
            }
            Ldvirtftn => {
                let method = method_of(inst)?.clone();
                let object = cx.pop()?;
                self.push_emit(
                    cx,
                    InstKind::FuncAddr {
                        method,
                        is_virtual: true,
                    },
                    vec![object],
                    IrType::NInt,
                )?;
            }

            Ldfld => {
                let field = field_of(inst)?;
                let object = cx.pop()?;
                if self.body.value_type(&object).stack_type() == StackType::Struct {
                    let ty = field.ty.clone();
                    self.push_emit(cx, InstKind::ExtractField { field: field.clone() }, vec![object], ty)?;
                } else {
                    let address = self.field_addr(cx, field, Some(object))?;
                    self.load(cx, address, field.ty.clone())?;
                }
            }
            Ldflda => {
                let field = field_of(inst)?;
                let object = cx.pop()?;
                let address = self.field_addr(cx, field, Some(object))?;
                cx.push(address);
            }
            Stfld => {
                let field = field_of(inst)?;
                let value = cx.pop()?;
                let object = cx.pop()?;
                let address = self.field_addr(cx, field, Some(object))?;
                self.store(cx, address, value, field.ty.clone())?;
            }
            Ldsfld => {
                let field = field_of(inst)?;
                let address = self.field_addr(cx, field, None)?;
                self.load(cx, address, field.ty.clone())?;
            }
            Ldsflda => {
                let address = self.field_addr(cx, field_of(inst)?, None)?;
                cx.push(address);
            }
            Stsfld => {
                let field = field_of(inst)?;
                let value = cx.pop()?;
                let address = self.field_addr(cx, field, None)?;
                self.store(cx, address, value, field.ty.clone())?;
            }

            LdindI1 | LdindU1 | LdindI2 | LdindU2 | LdindI4 | LdindU4 | LdindI8 | LdindI | LdindR4
            | LdindR8 | LdindRef => {
                let address = cx.pop()?;
                let ty = match primitive_of(inst.opcode) {
                    Some(ty) => ty,
                    None => self.element_type(&address),
                };
                self.load(cx, address, ty)?;
            }
            StindI1 | StindI2 | StindI4 | StindI8 | StindI | StindR4 | StindR8 | StindRef => {
                let value = cx.pop()?;
                let address = cx.pop()?;
                let ty = match primitive_of(inst.opcode) {
                    Some(ty) => ty,
                    None => self.element_type(&address),
                };
                self.store(cx, address, value, ty)?;
            }
            Ldobj => {
                let ty = type_of(inst)?.clone();
                let address = cx.pop()?;
                self.load(cx, address, ty)?;
            }
            Stobj => {
                let ty = type_of(inst)?.clone();
                let value = cx.pop()?;
                let address = cx.pop()?;
                self.store(cx, address, value, ty)?;
            }

            Ldelema => {
                let ty = type_of(inst)?.clone();
                let index = cx.pop()?;
                let array = cx.pop()?;
                let address = self.array_addr(cx, array, index, ty)?;
                cx.push(address);
            }
            LdelemI1 | LdelemU1 | LdelemI2 | LdelemU2 | LdelemI4 | LdelemU4 | LdelemI8 | LdelemI
            | LdelemR4 | LdelemR8 | LdelemRef | Ldelem => {
                let index = cx.pop()?;
                let array = cx.pop()?;
                let ty = match (primitive_of(inst.opcode), inst.opcode) {
                    (Some(ty), _) => ty,
                    (None, Ldelem) => type_of(inst)?.clone(),
                    (None, _) => self.element_type(&array),
                };
                let address = self.array_addr(cx, array, index, ty.clone())?;
                self.load(cx, address, ty)?;
            }
            StelemI | StelemI1 | StelemI2 | StelemI4 | StelemI8 | StelemR4 | StelemR8 | StelemRef
            | Stelem => {
                let value = cx.pop()?;
                let index = cx.pop()?;
                let array = cx.pop()?;
                let ty = match (primitive_of(inst.opcode), inst.opcode) {
                    (Some(ty), _) => ty,
                    (None, Stelem) => type_of(inst)?.clone(),
                    (None, _) => self.element_type(&array),
                };
                let address = self.array_addr(cx, array, index, ty.clone())?;
                self.store(cx, address, value, ty)?;
            }
            Ldlen => {
                let array = cx.pop()?;
                self.intrinsic(cx, IntrinsicId::ArrayLen, Vec::new(), vec![array], IrType::NUInt)?;
            }
            Newarr => {
                let ty = type_of(inst)?.clone();
                let length = cx.pop()?;
                let array = IrType::array_of(ty.clone());
                self.intrinsic(cx, IntrinsicId::NewArray, vec![EntityDesc::Type(ty)], vec![length], array)?;
            }

            Castclass | Isinst | Box | Unbox | UnboxAny => {
                let ty = type_of(inst)?.clone();
                let value = cx.pop()?;
                let (id, result) = match inst.opcode {
                    Castclass => (IntrinsicId::CastClass, ty.clone()),
                    Isinst => (IntrinsicId::IsInst, ty.clone()),
                    Box => (IntrinsicId::Box, IrType::Object),
                    Unbox => (IntrinsicId::Unbox, IrType::by_ref(ty.clone())),
                    _ => (IntrinsicId::UnboxAny, ty.clone()),
                };
                self.intrinsic(cx, id, vec![EntityDesc::Type(ty)], vec![value], result)?;
            }
            Initobj => {
                let ty = type_of(inst)?.clone();
                let address = cx.pop()?;
                self.intrinsic(cx, IntrinsicId::InitObj, vec![EntityDesc::Type(ty)], vec![address], IrType::Void)?;
            }
            Sizeof => {
                let ty = type_of(inst)?.clone();
                self.intrinsic(cx, IntrinsicId::SizeOf, vec![EntityDesc::Type(ty)], Vec::new(), IrType::U32)?;
            }
            Ldtoken => {
                let entity = match &inst.operand {
                    IlOperand::Type(ty) => EntityDesc::Type(ty.clone()),
                    IlOperand::Method(method) => EntityDesc::Method(method.clone()),
                    IlOperand::Field(field) => EntityDesc::Field(field.clone()),
                    _ => return Err(invalid_program!(inst.offset, "'ldtoken' has no token operand")),
                };
                let ty = handle_type(&entity);
                self.intrinsic(cx, IntrinsicId::LoadToken, vec![entity], Vec::new(), ty)?;
            }
            Localloc => {
                let size = cx.pop()?;
                self.intrinsic(
                    cx,
                    IntrinsicId::StackAlloc,
                    Vec::new(),
                    vec![size],
                    IrType::pointer_to(IrType::U8),
                )?;
            }

            Throw => {
                let exception = cx.pop()?;
                cx.stack.clear();
                self.emit(cx, InstKind::Throw { rethrow: false }, vec![exception], IrType::Void)?;
            }
            Rethrow => {
                cx.stack.clear();
                self.emit(cx, InstKind::Throw { rethrow: true }, Vec::new(), IrType::Void)?;
            }
            Leave | LeaveS => {
                cx.stack.clear();
                self.branch_to_leave(cx, target_of(inst)?)?;
            }
            Endfinally => {
                cx.stack.clear();
                self.emit(cx, InstKind::Resume, Vec::new(), IrType::Void)?;
            }
            Endfilter => {
                let result = cx.pop()?;
                cx.stack.clear();
                self.emit(cx, InstKind::Resume, vec![result], IrType::Void)?;
            }

            Constrained => {
                cx.prefixes.constrained = Some(type_of(inst)?.clone());
                return Ok(false);
            }
            Volatile => {
                cx.prefixes.flags |= MemoryFlags::VOLATILE;
                return Ok(false);
            }
            Unaligned => {
                cx.prefixes.flags |= MemoryFlags::UNALIGNED;
                return Ok(false);
            }
            Readonly => {
                cx.prefixes.readonly = true;
                return Ok(false);
            }
            Tail => return Ok(false),

            Calli | Jmp | Cpblk | Initblk | Arglist | Mkrefany | Refanyval | Refanytype | Cpobj | Ckfinite => {
                return Err(Error::NotSupported(inst.opcode));
            }

            _ => return Err(Error::NotSupported(inst.opcode)),
        }
        Ok(true)
    }

    fn branch_to_leave(&mut self, cx: &mut BlockContext, target: u32) -> Result<()> {
        let state = self.state_at(target)?;
        self.spill(cx, &[state])?;
        let target = self.states[state].entry_block;
        self.emit(cx, InstKind::Leave { target }, Vec::new(), IrType::Void)?;
        Ok(())
    }
}
