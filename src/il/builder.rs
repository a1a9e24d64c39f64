//! Label-based assembler for [`IlMethod`] bodies.
//!
//! [`IlBuilder`] lays instructions out at their encoded offsets, so the records it produces
//! look exactly like the output of a bytecode decoder. Branch, switch and exception-region
//! boundaries are written against named labels and resolved when the method is built.
//!
//! # Examples
//!
//! ```rust
//! use dotssa::{entities::{IrType, MethodSig}, il::{IlBuilder, OpCode}};
//!
//! let mut builder = IlBuilder::new(MethodSig::new_static(vec![IrType::Bool], IrType::I32));
//! builder
//!     .emit(OpCode::Ldarg0)
//!     .branch(OpCode::BrfalseS, "zero")
//!     .emit(OpCode::LdcI41)
//!     .emit(OpCode::Ret)
//!     .label("zero")
//!     .emit(OpCode::LdcI40)
//!     .emit(OpCode::Ret);
//!
//! let method = builder.build()?;
//! assert_eq!(method.instructions.len(), 6);
//! assert_eq!(method.instructions[4].offset, 5);
//! # Ok::<(), dotssa::Error>(())
//! ```

use std::collections::HashMap;

use crate::{
    entities::{IrType, MethodSig},
    il::{ExceptionRegion, IlInstruction, IlMethod, IlOperand, LocalDecl, OpCode, RegionKind},
    Error, Result,
};

/// Unresolved label reference of a branch or switch.
#[derive(Debug, Clone)]
struct LabelFixup {
    /// Index of the instruction whose operand must be patched
    index: usize,
    /// Target labels, one for branches
    labels: Vec<String>,
}

/// Exception clause whose boundaries are still labels.
#[derive(Debug, Clone)]
struct PendingRegion {
    kind: RegionKind,
    try_start: String,
    try_end: String,
    handler_start: String,
    handler_end: String,
    filter_start: Option<String>,
    catch_type: Option<IrType>,
}

/// Assembles an [`IlMethod`] instruction by instruction.
#[derive(Debug, Clone)]
pub struct IlBuilder {
    name: String,
    declaring_type: IrType,
    sig: MethodSig,
    locals: Vec<LocalDecl>,
    instructions: Vec<IlInstruction>,
    offset: u32,
    labels: HashMap<String, u32>,
    fixups: Vec<LabelFixup>,
    regions: Vec<PendingRegion>,
}

impl IlBuilder {
    /// Creates a builder for a method with the given signature.
    #[must_use]
    pub fn new(sig: MethodSig) -> Self {
        IlBuilder {
            name: "method".to_string(),
            declaring_type: IrType::Object,
            sig,
            locals: Vec::new(),
            instructions: Vec::new(),
            offset: 0,
            labels: HashMap::new(),
            fixups: Vec::new(),
            regions: Vec::new(),
        }
    }

    /// Sets the method name.
    pub fn name(&mut self, name: &str) -> &mut Self {
        self.name = name.to_string();
        self
    }

    /// Sets the declaring type.
    pub fn declaring_type(&mut self, ty: IrType) -> &mut Self {
        self.declaring_type = ty;
        self
    }

    /// Declares a local and returns its index.
    pub fn local(&mut self, ty: IrType) -> u16 {
        self.locals.push(LocalDecl { ty, pinned: false });
        (self.locals.len() - 1) as u16
    }

    /// Declares a pinned local and returns its index.
    pub fn pinned_local(&mut self, ty: IrType) -> u16 {
        self.locals.push(LocalDecl { ty, pinned: true });
        (self.locals.len() - 1) as u16
    }

    /// Offset the next instruction will be placed at.
    #[must_use]
    pub fn current_offset(&self) -> u32 {
        self.offset
    }

    /// Emits an instruction without operand.
    pub fn emit(&mut self, opcode: OpCode) -> &mut Self {
        self.emit_with(opcode, IlOperand::None)
    }

    /// Emits an instruction with an operand.
    pub fn emit_with(&mut self, opcode: OpCode, operand: IlOperand) -> &mut Self {
        let inst = IlInstruction::new(opcode, self.offset, operand);
        self.offset = inst.end_offset();
        self.instructions.push(inst);
        self
    }

    /// Emits `ldc.i4` with a 32-bit immediate.
    pub fn ldc_i4(&mut self, value: i32) -> &mut Self {
        self.emit_with(OpCode::LdcI4, IlOperand::I32(value))
    }

    /// Emits a branch to `label`.
    pub fn branch(&mut self, opcode: OpCode, label: &str) -> &mut Self {
        self.fixups.push(LabelFixup {
            index: self.instructions.len(),
            labels: vec![label.to_string()],
        });
        self.emit_with(opcode, IlOperand::Target(0))
    }

    /// Emits a `switch` over `labels`.
    pub fn switch(&mut self, labels: &[&str]) -> &mut Self {
        self.fixups.push(LabelFixup {
            index: self.instructions.len(),
            labels: labels.iter().map(|l| (*l).to_string()).collect(),
        });
        self.emit_with(OpCode::Switch, IlOperand::Switch(vec![0; labels.len()]))
    }

    /// Places `label` at the current offset.
    pub fn label(&mut self, label: &str) -> &mut Self {
        self.labels.insert(label.to_string(), self.offset);
        self
    }

    /// Adds a typed catch clause.
    pub fn catch_region(
        &mut self,
        try_range: (&str, &str),
        handler_range: (&str, &str),
        catch_type: IrType,
    ) -> &mut Self {
        self.region(RegionKind::Catch, try_range, handler_range, None, Some(catch_type))
    }

    /// Adds a filtered catch clause; the filter runs from `filter_start` to the handler.
    pub fn filter_region(
        &mut self,
        try_range: (&str, &str),
        filter_start: &str,
        handler_range: (&str, &str),
    ) -> &mut Self {
        self.region(RegionKind::Filter, try_range, handler_range, Some(filter_start), None)
    }

    /// Adds a finally clause.
    pub fn finally_region(&mut self, try_range: (&str, &str), handler_range: (&str, &str)) -> &mut Self {
        self.region(RegionKind::Finally, try_range, handler_range, None, None)
    }

    /// Adds a fault clause.
    pub fn fault_region(&mut self, try_range: (&str, &str), handler_range: (&str, &str)) -> &mut Self {
        self.region(RegionKind::Fault, try_range, handler_range, None, None)
    }

    fn region(
        &mut self,
        kind: RegionKind,
        (try_start, try_end): (&str, &str),
        (handler_start, handler_end): (&str, &str),
        filter_start: Option<&str>,
        catch_type: Option<IrType>,
    ) -> &mut Self {
        self.regions.push(PendingRegion {
            kind,
            try_start: try_start.to_string(),
            try_end: try_end.to_string(),
            handler_start: handler_start.to_string(),
            handler_end: handler_end.to_string(),
            filter_start: filter_start.map(str::to_string),
            catch_type,
        });
        self
    }

    fn resolve(&self, label: &str) -> Result<u32> {
        self.labels
            .get(label)
            .copied()
            .ok_or_else(|| Error::UndefinedLabel(label.to_string()))
    }

    /// Resolves all labels and returns the method.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UndefinedLabel`] if a branch or region names a label that was
    /// never placed.
    pub fn build(&self) -> Result<IlMethod> {
        let mut instructions = self.instructions.clone();
        for fixup in &self.fixups {
            let targets = fixup
                .labels
                .iter()
                .map(|label| self.resolve(label))
                .collect::<Result<Vec<_>>>()?;

            let inst = &mut instructions[fixup.index];
            inst.operand = match inst.operand {
                IlOperand::Switch(_) => IlOperand::Switch(targets),
                _ => IlOperand::Target(targets[0]),
            };
        }

        let mut regions = Vec::with_capacity(self.regions.len());
        for region in &self.regions {
            regions.push(ExceptionRegion {
                kind: region.kind,
                try_start: self.resolve(&region.try_start)?,
                try_end: self.resolve(&region.try_end)?,
                handler_start: self.resolve(&region.handler_start)?,
                handler_end: self.resolve(&region.handler_end)?,
                filter_start: region
                    .filter_start
                    .as_deref()
                    .map(|label| self.resolve(label))
                    .transpose()?,
                catch_type: region.catch_type.clone(),
            });
        }

        Ok(IlMethod {
            name: self.name.clone(),
            declaring_type: self.declaring_type.clone(),
            sig: self.sig.clone(),
            locals: self.locals.clone(),
            instructions,
            regions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_and_backward_labels() {
        let mut b = IlBuilder::new(MethodSig::new_static(vec![], IrType::Void));
        b.label("top")
            .emit(OpCode::Nop)
            .branch(OpCode::BrS, "end")
            .branch(OpCode::Br, "top")
            .label("end")
            .emit(OpCode::Ret);
        let method = b.build().unwrap();

        assert_eq!(method.instructions[1].operand, IlOperand::Target(8));
        assert_eq!(method.instructions[2].operand, IlOperand::Target(0));
        assert_eq!(method.instructions[3].offset, 8);
        assert_eq!(method.code_size(), 9);
    }

    #[test]
    fn test_switch_labels() {
        let mut b = IlBuilder::new(MethodSig::new_static(vec![IrType::I32], IrType::Void));
        b.emit(OpCode::Ldarg0)
            .switch(&["a", "b"])
            .label("a")
            .emit(OpCode::Ret)
            .label("b")
            .emit(OpCode::Ret);
        let method = b.build().unwrap();
        assert_eq!(method.instructions[1].operand, IlOperand::Switch(vec![14, 15]));
    }

    #[test]
    fn test_regions_resolve() {
        let mut b = IlBuilder::new(MethodSig::new_static(vec![], IrType::Void));
        b.label("try")
            .emit(OpCode::Nop)
            .branch(OpCode::LeaveS, "exit")
            .label("handler")
            .emit(OpCode::Pop)
            .branch(OpCode::LeaveS, "exit")
            .label("exit")
            .emit(OpCode::Ret)
            .catch_region(("try", "handler"), ("handler", "exit"), IrType::Object);
        let method = b.build().unwrap();

        let region = &method.regions[0];
        assert_eq!((region.try_start, region.try_end), (0, 3));
        assert_eq!((region.handler_start, region.handler_end), (3, 6));
        assert_eq!(region.catch_type, Some(IrType::Object));
    }

    #[test]
    fn test_undefined_label() {
        let mut b = IlBuilder::new(MethodSig::new_static(vec![], IrType::Void));
        b.finally_region(("a", "b"), ("b", "c"));
        assert!(matches!(b.build(), Err(Error::UndefinedLabel(l)) if l == "a"));
    }
}
