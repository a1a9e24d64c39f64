//! The ECMA-335 opcode set.
//!
//! Every opcode carries its mnemonic, its encoding (one byte, or `0xFE` followed by a second
//! byte), the kind of inline operand that follows it and its control-flow behaviour. The
//! importer uses these to compute instruction sizes and to discover block leaders.

use std::fmt;

use strum::{EnumCount, EnumIter};

/// Kind of inline operand following an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// No operand
    InlineNone,
    /// 8-bit integer
    ShortInlineI,
    /// 32-bit integer
    InlineI,
    /// 64-bit integer
    InlineI8,
    /// 32-bit float
    ShortInlineR,
    /// 64-bit float
    InlineR,
    /// 8-bit argument or local index
    ShortInlineVar,
    /// 16-bit argument or local index
    InlineVar,
    /// 8-bit relative branch target
    ShortInlineBrTarget,
    /// 32-bit relative branch target
    InlineBrTarget,
    /// Jump table
    InlineSwitch,
    /// Method token
    InlineMethod,
    /// Field token
    InlineField,
    /// Type token
    InlineType,
    /// Type, method or field token
    InlineTok,
    /// User string token
    InlineString,
    /// Stand-alone signature token
    InlineSig,
}

impl OperandKind {
    /// Encoded size of the operand in bytes; switch tables add 4 bytes per target.
    #[must_use]
    pub const fn size(self) -> u32 {
        match self {
            OperandKind::InlineNone => 0,
            OperandKind::ShortInlineI | OperandKind::ShortInlineVar | OperandKind::ShortInlineBrTarget => 1,
            OperandKind::InlineVar => 2,
            OperandKind::InlineI8 | OperandKind::InlineR => 8,
            _ => 4,
        }
    }
}

/// How an instruction affects control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Normal execution continues to next instruction
    Sequential,
    /// Conditional branch to another location
    ConditionalBranch,
    /// Always branches to another location
    UnconditionalBranch,
    /// Call to another method
    Call,
    /// Returns from current method
    Return,
    /// Multi-way branch
    Switch,
    /// Exception throwing
    Throw,
    /// End of a finally, fault or filter block
    EndFinally,
    /// Leave protected region
    Leave,
    /// Prefix modifying the next instruction
    Prefix,
}

macro_rules! opcodes {
    ($($name:ident = $code:literal, $mnemonic:literal, $operand:ident;)*) => {
        /// A CIL opcode.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumCount)]
        #[repr(u16)]
        #[allow(missing_docs)]
        pub enum OpCode {
            $($name = $code,)*
        }

        impl OpCode {
            /// Returns the assembler mnemonic, e.g. `ldarg.0`.
            #[must_use]
            pub const fn mnemonic(self) -> &'static str {
                match self {
                    $(OpCode::$name => $mnemonic,)*
                }
            }

            /// Returns the kind of inline operand that follows the opcode.
            #[must_use]
            pub const fn operand_kind(self) -> OperandKind {
                match self {
                    $(OpCode::$name => OperandKind::$operand,)*
                }
            }

            /// Looks up an opcode by its encoding.
            #[must_use]
            pub const fn from_code(code: u16) -> Option<OpCode> {
                match code {
                    $($code => Some(OpCode::$name),)*
                    _ => None,
                }
            }
        }
    };
}

opcodes! {
    Nop = 0x00, "nop", InlineNone;
    Break = 0x01, "break", InlineNone;
    Ldarg0 = 0x02, "ldarg.0", InlineNone;
    Ldarg1 = 0x03, "ldarg.1", InlineNone;
    Ldarg2 = 0x04, "ldarg.2", InlineNone;
    Ldarg3 = 0x05, "ldarg.3", InlineNone;
    Ldloc0 = 0x06, "ldloc.0", InlineNone;
    Ldloc1 = 0x07, "ldloc.1", InlineNone;
    Ldloc2 = 0x08, "ldloc.2", InlineNone;
    Ldloc3 = 0x09, "ldloc.3", InlineNone;
    Stloc0 = 0x0A, "stloc.0", InlineNone;
    Stloc1 = 0x0B, "stloc.1", InlineNone;
    Stloc2 = 0x0C, "stloc.2", InlineNone;
    Stloc3 = 0x0D, "stloc.3", InlineNone;
    LdargS = 0x0E, "ldarg.s", ShortInlineVar;
    LdargaS = 0x0F, "ldarga.s", ShortInlineVar;
    StargS = 0x10, "starg.s", ShortInlineVar;
    LdlocS = 0x11, "ldloc.s", ShortInlineVar;
    LdlocaS = 0x12, "ldloca.s", ShortInlineVar;
    StlocS = 0x13, "stloc.s", ShortInlineVar;
    Ldnull = 0x14, "ldnull", InlineNone;
    LdcI4M1 = 0x15, "ldc.i4.m1", InlineNone;
    LdcI40 = 0x16, "ldc.i4.0", InlineNone;
    LdcI41 = 0x17, "ldc.i4.1", InlineNone;
    LdcI42 = 0x18, "ldc.i4.2", InlineNone;
    LdcI43 = 0x19, "ldc.i4.3", InlineNone;
    LdcI44 = 0x1A, "ldc.i4.4", InlineNone;
    LdcI45 = 0x1B, "ldc.i4.5", InlineNone;
    LdcI46 = 0x1C, "ldc.i4.6", InlineNone;
    LdcI47 = 0x1D, "ldc.i4.7", InlineNone;
    LdcI48 = 0x1E, "ldc.i4.8", InlineNone;
    LdcI4S = 0x1F, "ldc.i4.s", ShortInlineI;
    LdcI4 = 0x20, "ldc.i4", InlineI;
    LdcI8 = 0x21, "ldc.i8", InlineI8;
    LdcR4 = 0x22, "ldc.r4", ShortInlineR;
    LdcR8 = 0x23, "ldc.r8", InlineR;
    Dup = 0x25, "dup", InlineNone;
    Pop = 0x26, "pop", InlineNone;
    Jmp = 0x27, "jmp", InlineMethod;
    Call = 0x28, "call", InlineMethod;
    Calli = 0x29, "calli", InlineSig;
    Ret = 0x2A, "ret", InlineNone;
    BrS = 0x2B, "br.s", ShortInlineBrTarget;
    BrfalseS = 0x2C, "brfalse.s", ShortInlineBrTarget;
    BrtrueS = 0x2D, "brtrue.s", ShortInlineBrTarget;
    BeqS = 0x2E, "beq.s", ShortInlineBrTarget;
    BgeS = 0x2F, "bge.s", ShortInlineBrTarget;
    BgtS = 0x30, "bgt.s", ShortInlineBrTarget;
    BleS = 0x31, "ble.s", ShortInlineBrTarget;
    BltS = 0x32, "blt.s", ShortInlineBrTarget;
    BneUnS = 0x33, "bne.un.s", ShortInlineBrTarget;
    BgeUnS = 0x34, "bge.un.s", ShortInlineBrTarget;
    BgtUnS = 0x35, "bgt.un.s", ShortInlineBrTarget;
    BleUnS = 0x36, "ble.un.s", ShortInlineBrTarget;
    BltUnS = 0x37, "blt.un.s", ShortInlineBrTarget;
    Br = 0x38, "br", InlineBrTarget;
    Brfalse = 0x39, "brfalse", InlineBrTarget;
    Brtrue = 0x3A, "brtrue", InlineBrTarget;
    Beq = 0x3B, "beq", InlineBrTarget;
    Bge = 0x3C, "bge", InlineBrTarget;
    Bgt = 0x3D, "bgt", InlineBrTarget;
    Ble = 0x3E, "ble", InlineBrTarget;
    Blt = 0x3F, "blt", InlineBrTarget;
    BneUn = 0x40, "bne.un", InlineBrTarget;
    BgeUn = 0x41, "bge.un", InlineBrTarget;
    BgtUn = 0x42, "bgt.un", InlineBrTarget;
    BleUn = 0x43, "ble.un", InlineBrTarget;
    BltUn = 0x44, "blt.un", InlineBrTarget;
    Switch = 0x45, "switch", InlineSwitch;
    LdindI1 = 0x46, "ldind.i1", InlineNone;
    LdindU1 = 0x47, "ldind.u1", InlineNone;
    LdindI2 = 0x48, "ldind.i2", InlineNone;
    LdindU2 = 0x49, "ldind.u2", InlineNone;
    LdindI4 = 0x4A, "ldind.i4", InlineNone;
    LdindU4 = 0x4B, "ldind.u4", InlineNone;
    LdindI8 = 0x4C, "ldind.i8", InlineNone;
    LdindI = 0x4D, "ldind.i", InlineNone;
    LdindR4 = 0x4E, "ldind.r4", InlineNone;
    LdindR8 = 0x4F, "ldind.r8", InlineNone;
    LdindRef = 0x50, "ldind.ref", InlineNone;
    StindRef = 0x51, "stind.ref", InlineNone;
    StindI1 = 0x52, "stind.i1", InlineNone;
    StindI2 = 0x53, "stind.i2", InlineNone;
    StindI4 = 0x54, "stind.i4", InlineNone;
    StindI8 = 0x55, "stind.i8", InlineNone;
    StindR4 = 0x56, "stind.r4", InlineNone;
    StindR8 = 0x57, "stind.r8", InlineNone;
    Add = 0x58, "add", InlineNone;
    Sub = 0x59, "sub", InlineNone;
    Mul = 0x5A, "mul", InlineNone;
    Div = 0x5B, "div", InlineNone;
    DivUn = 0x5C, "div.un", InlineNone;
    Rem = 0x5D, "rem", InlineNone;
    RemUn = 0x5E, "rem.un", InlineNone;
    And = 0x5F, "and", InlineNone;
    Or = 0x60, "or", InlineNone;
    Xor = 0x61, "xor", InlineNone;
    Shl = 0x62, "shl", InlineNone;
    Shr = 0x63, "shr", InlineNone;
    ShrUn = 0x64, "shr.un", InlineNone;
    Neg = 0x65, "neg", InlineNone;
    Not = 0x66, "not", InlineNone;
    ConvI1 = 0x67, "conv.i1", InlineNone;
    ConvI2 = 0x68, "conv.i2", InlineNone;
    ConvI4 = 0x69, "conv.i4", InlineNone;
    ConvI8 = 0x6A, "conv.i8", InlineNone;
    ConvR4 = 0x6B, "conv.r4", InlineNone;
    ConvR8 = 0x6C, "conv.r8", InlineNone;
    ConvU4 = 0x6D, "conv.u4", InlineNone;
    ConvU8 = 0x6E, "conv.u8", InlineNone;
    Callvirt = 0x6F, "callvirt", InlineMethod;
    Cpobj = 0x70, "cpobj", InlineType;
    Ldobj = 0x71, "ldobj", InlineType;
    Ldstr = 0x72, "ldstr", InlineString;
    Newobj = 0x73, "newobj", InlineMethod;
    Castclass = 0x74, "castclass", InlineType;
    Isinst = 0x75, "isinst", InlineType;
    ConvRUn = 0x76, "conv.r.un", InlineNone;
    Unbox = 0x79, "unbox", InlineType;
    Throw = 0x7A, "throw", InlineNone;
    Ldfld = 0x7B, "ldfld", InlineField;
    Ldflda = 0x7C, "ldflda", InlineField;
    Stfld = 0x7D, "stfld", InlineField;
    Ldsfld = 0x7E, "ldsfld", InlineField;
    Ldsflda = 0x7F, "ldsflda", InlineField;
    Stsfld = 0x80, "stsfld", InlineField;
    Stobj = 0x81, "stobj", InlineType;
    ConvOvfI1Un = 0x82, "conv.ovf.i1.un", InlineNone;
    ConvOvfI2Un = 0x83, "conv.ovf.i2.un", InlineNone;
    ConvOvfI4Un = 0x84, "conv.ovf.i4.un", InlineNone;
    ConvOvfI8Un = 0x85, "conv.ovf.i8.un", InlineNone;
    ConvOvfU1Un = 0x86, "conv.ovf.u1.un", InlineNone;
    ConvOvfU2Un = 0x87, "conv.ovf.u2.un", InlineNone;
    ConvOvfU4Un = 0x88, "conv.ovf.u4.un", InlineNone;
    ConvOvfU8Un = 0x89, "conv.ovf.u8.un", InlineNone;
    ConvOvfIUn = 0x8A, "conv.ovf.i.un", InlineNone;
    ConvOvfUUn = 0x8B, "conv.ovf.u.un", InlineNone;
    Box = 0x8C, "box", InlineType;
    Newarr = 0x8D, "newarr", InlineType;
    Ldlen = 0x8E, "ldlen", InlineNone;
    Ldelema = 0x8F, "ldelema", InlineType;
    LdelemI1 = 0x90, "ldelem.i1", InlineNone;
    LdelemU1 = 0x91, "ldelem.u1", InlineNone;
    LdelemI2 = 0x92, "ldelem.i2", InlineNone;
    LdelemU2 = 0x93, "ldelem.u2", InlineNone;
    LdelemI4 = 0x94, "ldelem.i4", InlineNone;
    LdelemU4 = 0x95, "ldelem.u4", InlineNone;
    LdelemI8 = 0x96, "ldelem.i8", InlineNone;
    LdelemI = 0x97, "ldelem.i", InlineNone;
    LdelemR4 = 0x98, "ldelem.r4", InlineNone;
    LdelemR8 = 0x99, "ldelem.r8", InlineNone;
    LdelemRef = 0x9A, "ldelem.ref", InlineNone;
    StelemI = 0x9B, "stelem.i", InlineNone;
    StelemI1 = 0x9C, "stelem.i1", InlineNone;
    StelemI2 = 0x9D, "stelem.i2", InlineNone;
    StelemI4 = 0x9E, "stelem.i4", InlineNone;
    StelemI8 = 0x9F, "stelem.i8", InlineNone;
    StelemR4 = 0xA0, "stelem.r4", InlineNone;
    StelemR8 = 0xA1, "stelem.r8", InlineNone;
    StelemRef = 0xA2, "stelem.ref", InlineNone;
    Ldelem = 0xA3, "ldelem", InlineType;
    Stelem = 0xA4, "stelem", InlineType;
    UnboxAny = 0xA5, "unbox.any", InlineType;
    ConvOvfI1 = 0xB3, "conv.ovf.i1", InlineNone;
    ConvOvfU1 = 0xB4, "conv.ovf.u1", InlineNone;
    ConvOvfI2 = 0xB5, "conv.ovf.i2", InlineNone;
    ConvOvfU2 = 0xB6, "conv.ovf.u2", InlineNone;
    ConvOvfI4 = 0xB7, "conv.ovf.i4", InlineNone;
    ConvOvfU4 = 0xB8, "conv.ovf.u4", InlineNone;
    ConvOvfI8 = 0xB9, "conv.ovf.i8", InlineNone;
    ConvOvfU8 = 0xBA, "conv.ovf.u8", InlineNone;
    Refanyval = 0xC2, "refanyval", InlineType;
    Ckfinite = 0xC3, "ckfinite", InlineNone;
    Mkrefany = 0xC6, "mkrefany", InlineType;
    Ldtoken = 0xD0, "ldtoken", InlineTok;
    ConvU2 = 0xD1, "conv.u2", InlineNone;
    ConvU1 = 0xD2, "conv.u1", InlineNone;
    ConvI = 0xD3, "conv.i", InlineNone;
    ConvOvfI = 0xD4, "conv.ovf.i", InlineNone;
    ConvOvfU = 0xD5, "conv.ovf.u", InlineNone;
    AddOvf = 0xD6, "add.ovf", InlineNone;
    AddOvfUn = 0xD7, "add.ovf.un", InlineNone;
    MulOvf = 0xD8, "mul.ovf", InlineNone;
    MulOvfUn = 0xD9, "mul.ovf.un", InlineNone;
    SubOvf = 0xDA, "sub.ovf", InlineNone;
    SubOvfUn = 0xDB, "sub.ovf.un", InlineNone;
    Endfinally = 0xDC, "endfinally", InlineNone;
    Leave = 0xDD, "leave", InlineBrTarget;
    LeaveS = 0xDE, "leave.s", ShortInlineBrTarget;
    StindI = 0xDF, "stind.i", InlineNone;
    ConvU = 0xE0, "conv.u", InlineNone;
    Arglist = 0xFE00, "arglist", InlineNone;
    Ceq = 0xFE01, "ceq", InlineNone;
    Cgt = 0xFE02, "cgt", InlineNone;
    CgtUn = 0xFE03, "cgt.un", InlineNone;
    Clt = 0xFE04, "clt", InlineNone;
    CltUn = 0xFE05, "clt.un", InlineNone;
    Ldftn = 0xFE06, "ldftn", InlineMethod;
    Ldvirtftn = 0xFE07, "ldvirtftn", InlineMethod;
    Ldarg = 0xFE09, "ldarg", InlineVar;
    Ldarga = 0xFE0A, "ldarga", InlineVar;
    Starg = 0xFE0B, "starg", InlineVar;
    Ldloc = 0xFE0C, "ldloc", InlineVar;
    Ldloca = 0xFE0D, "ldloca", InlineVar;
    Stloc = 0xFE0E, "stloc", InlineVar;
    Localloc = 0xFE0F, "localloc", InlineNone;
    Endfilter = 0xFE11, "endfilter", InlineNone;
    Unaligned = 0xFE12, "unaligned.", ShortInlineI;
    Volatile = 0xFE13, "volatile.", InlineNone;
    Tail = 0xFE14, "tail.", InlineNone;
    Initobj = 0xFE15, "initobj", InlineType;
    Constrained = 0xFE16, "constrained.", InlineType;
    Cpblk = 0xFE17, "cpblk", InlineNone;
    Initblk = 0xFE18, "initblk", InlineNone;
    Rethrow = 0xFE1A, "rethrow", InlineNone;
    Sizeof = 0xFE1C, "sizeof", InlineType;
    Refanytype = 0xFE1D, "refanytype", InlineNone;
    Readonly = 0xFE1E, "readonly.", InlineNone;
}

impl OpCode {
    /// Returns the raw encoding; two-byte opcodes have `0xFE` in the high byte.
    #[must_use]
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Size of the opcode encoding in bytes.
    #[must_use]
    pub const fn size(self) -> u32 {
        if self.code() > 0xFF {
            2
        } else {
            1
        }
    }

    /// Returns the control-flow behaviour of the opcode.
    #[must_use]
    pub const fn flow(self) -> FlowType {
        use OpCode::*;
        match self {
            Br | BrS => FlowType::UnconditionalBranch,
            Brfalse | BrfalseS | Brtrue | BrtrueS | Beq | BeqS | Bge | BgeS | Bgt | BgtS | Ble
            | BleS | Blt | BltS | BneUn | BneUnS | BgeUn | BgeUnS | BgtUn | BgtUnS | BleUn
            | BleUnS | BltUn | BltUnS => FlowType::ConditionalBranch,
            Switch => FlowType::Switch,
            Call | Callvirt | Calli | Newobj | Jmp => FlowType::Call,
            Ret => FlowType::Return,
            Throw | Rethrow => FlowType::Throw,
            Endfinally | Endfilter => FlowType::EndFinally,
            Leave | LeaveS => FlowType::Leave,
            Unaligned | Volatile | Tail | Constrained | Readonly => FlowType::Prefix,
            _ => FlowType::Sequential,
        }
    }

    /// Returns `true` if control never falls through to the next instruction.
    #[must_use]
    pub const fn is_terminator(self) -> bool {
        matches!(
            self.flow(),
            FlowType::UnconditionalBranch
                | FlowType::Return
                | FlowType::Throw
                | FlowType::EndFinally
                | FlowType::Leave
        ) || matches!(self, OpCode::Jmp)
    }

    /// Returns `true` if the instruction ends a basic block (terminators and all branches).
    #[must_use]
    pub const fn ends_block(self) -> bool {
        self.is_terminator()
            || matches!(self.flow(), FlowType::ConditionalBranch | FlowType::Switch)
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}
