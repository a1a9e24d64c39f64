//! Type descriptors as seen by the IR.
//!
//! [`IrType`] is an opaque, hashable description of a .NET type. The IR never resolves types
//! against metadata; it only needs to compare them, classify them into evaluation stack
//! types and substitute generic parameters through a [`GenericContext`].
//!
//! # Type Categories
//!
//! - **Primitives**: Fixed-size numeric types, `bool` and `char`
//! - **References**: `object`, `string`, arrays and class definitions
//! - **Compound**: Pointers, managed references and generic instantiations
//! - **Generic parameters**: `!n` (type) and `!!n` (method), replaced by [`IrType::get_spec`]

use std::{fmt, sync::Arc};

use crate::entities::Token;

/// A type definition or reference, identified by token and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeDefDesc {
    /// Metadata token of the definition or reference
    pub token: Token,
    /// Namespace, empty for the global namespace
    pub namespace: String,
    /// Simple name, including the generic arity suffix
    pub name: String,
    /// Whether the type derives from `System.ValueType`
    pub is_value_type: bool,
    /// Number of generic parameters declared by the type
    pub generic_arity: u32,
}

impl TypeDefDesc {
    /// Creates a non-generic reference type descriptor.
    #[must_use]
    pub fn class(token: Token, namespace: &str, name: &str) -> Arc<Self> {
        Arc::new(TypeDefDesc {
            token,
            namespace: namespace.to_string(),
            name: name.to_string(),
            is_value_type: false,
            generic_arity: 0,
        })
    }

    /// Creates a non-generic value type descriptor.
    #[must_use]
    pub fn value_type(token: Token, namespace: &str, name: &str) -> Arc<Self> {
        Arc::new(TypeDefDesc {
            token,
            namespace: namespace.to_string(),
            name: name.to_string(),
            is_value_type: true,
            generic_arity: 0,
        })
    }

    /// Returns the namespace-qualified name.
    #[must_use]
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }
}

/// Normalized type classes of the CIL evaluation stack (ECMA-335 III.1.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackType {
    /// No value
    Void,
    /// `int32`, including all smaller integers, `bool` and `char`
    Int,
    /// `int64`
    Long,
    /// `native int`, including unmanaged pointers
    NInt,
    /// Floating point
    Float,
    /// Managed reference (`&`)
    ByRef,
    /// Object reference
    Object,
    /// Value type instance
    Struct,
}

/// Type descriptor for values, variables and entity signatures.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum IrType {
    /// No value
    #[default]
    Void,
    /// `bool`
    Bool,
    /// `char`
    Char,
    /// `int8`
    I8,
    /// `uint8`
    U8,
    /// `int16`
    I16,
    /// `uint16`
    U16,
    /// `int32`
    I32,
    /// `uint32`
    U32,
    /// `int64`
    I64,
    /// `uint64`
    U64,
    /// `native int`
    NInt,
    /// `native uint`
    NUInt,
    /// `float32`
    F32,
    /// `float64`
    F64,
    /// `System.Object`
    Object,
    /// `System.String`
    String,
    /// `System.TypedReference`
    TypedRef,
    /// A non-generic class or value type
    Def(Arc<TypeDefDesc>),
    /// A generic instantiation of a type definition
    Instance(Arc<TypeDefDesc>, Vec<IrType>),
    /// Single-dimensional, zero-based array
    Array(Box<IrType>),
    /// Unmanaged pointer
    Pointer(Box<IrType>),
    /// Managed reference
    ByRef(Box<IrType>),
    /// Type generic parameter `!n`
    GenericParam(u32),
    /// Method generic parameter `!!n`
    MethodGenericParam(u32),
}

impl IrType {
    /// Creates `elem[]`.
    #[must_use]
    pub fn array_of(elem: IrType) -> Self {
        IrType::Array(Box::new(elem))
    }

    /// Creates `elem*`.
    #[must_use]
    pub fn pointer_to(elem: IrType) -> Self {
        IrType::Pointer(Box::new(elem))
    }

    /// Creates `elem&`.
    #[must_use]
    pub fn by_ref(elem: IrType) -> Self {
        IrType::ByRef(Box::new(elem))
    }

    /// Returns `true` for `void`.
    #[must_use]
    pub const fn is_void(&self) -> bool {
        matches!(self, IrType::Void)
    }

    /// Returns `true` for integral primitives, including `bool` and `char`.
    #[must_use]
    pub const fn is_integral(&self) -> bool {
        matches!(
            self,
            IrType::Bool
                | IrType::Char
                | IrType::I8
                | IrType::U8
                | IrType::I16
                | IrType::U16
                | IrType::I32
                | IrType::U32
                | IrType::I64
                | IrType::U64
                | IrType::NInt
                | IrType::NUInt
        )
    }

    /// Returns `true` for `float32` and `float64`.
    #[must_use]
    pub const fn is_float(&self) -> bool {
        matches!(self, IrType::F32 | IrType::F64)
    }

    /// Returns `true` for unsigned integers, `bool` and `char`.
    #[must_use]
    pub const fn is_unsigned(&self) -> bool {
        matches!(
            self,
            IrType::Bool | IrType::Char | IrType::U8 | IrType::U16 | IrType::U32 | IrType::U64 | IrType::NUInt
        )
    }

    /// Returns `true` for value types (primitives and struct definitions).
    #[must_use]
    pub fn is_value_type(&self) -> bool {
        match self {
            IrType::Def(def) | IrType::Instance(def, _) => def.is_value_type,
            IrType::TypedRef => true,
            other => other.is_integral() || other.is_float(),
        }
    }

    /// Returns the size in bytes of primitives whose size is platform-independent.
    #[must_use]
    pub const fn size_bytes(&self) -> Option<u32> {
        match self {
            IrType::Bool | IrType::I8 | IrType::U8 => Some(1),
            IrType::I16 | IrType::U16 | IrType::Char => Some(2),
            IrType::I32 | IrType::U32 | IrType::F32 => Some(4),
            IrType::I64 | IrType::U64 | IrType::F64 => Some(8),
            _ => None,
        }
    }

    /// Returns the element type of arrays, pointers and managed references.
    #[must_use]
    pub fn element_type(&self) -> Option<&IrType> {
        match self {
            IrType::Array(elem) | IrType::Pointer(elem) | IrType::ByRef(elem) => Some(elem),
            _ => None,
        }
    }

    /// Classifies the type as it appears on the evaluation stack.
    #[must_use]
    pub fn stack_type(&self) -> StackType {
        match self {
            IrType::Void => StackType::Void,
            IrType::Bool
            | IrType::Char
            | IrType::I8
            | IrType::U8
            | IrType::I16
            | IrType::U16
            | IrType::I32
            | IrType::U32 => StackType::Int,
            IrType::I64 | IrType::U64 => StackType::Long,
            IrType::NInt | IrType::NUInt | IrType::Pointer(_) => StackType::NInt,
            IrType::F32 | IrType::F64 => StackType::Float,
            IrType::ByRef(_) => StackType::ByRef,
            IrType::TypedRef => StackType::Struct,
            IrType::Def(def) | IrType::Instance(def, _) if def.is_value_type => StackType::Struct,
            _ => StackType::Object,
        }
    }

    /// Returns `true` if a stored value of type `value` must be narrowed to fit this type.
    ///
    /// Applies to small integers, whose stack representation is `int32`, and to `float32`
    /// storage of a `float64` stack value.
    #[must_use]
    pub fn needs_narrowing_from(&self, value: &IrType) -> bool {
        match self {
            IrType::Bool | IrType::Char | IrType::I8 | IrType::U8 | IrType::I16 | IrType::U16 => {
                value.stack_type() == StackType::Int && value.size_bytes().unwrap_or(4) > self.size_bytes().unwrap_or(4)
            }
            IrType::F32 => *value == IrType::F64,
            _ => false,
        }
    }

    /// Substitutes generic parameters using `ctx`.
    ///
    /// Parameters with no corresponding argument in `ctx` are left untouched, which keeps
    /// open generic code open when cloned through a partial context.
    #[must_use]
    pub fn get_spec(&self, ctx: &GenericContext) -> IrType {
        match self {
            IrType::GenericParam(index) => ctx
                .type_args
                .get(*index as usize)
                .cloned()
                .unwrap_or_else(|| self.clone()),
            IrType::MethodGenericParam(index) => ctx
                .method_args
                .get(*index as usize)
                .cloned()
                .unwrap_or_else(|| self.clone()),
            IrType::Instance(def, args) => {
                IrType::Instance(def.clone(), args.iter().map(|a| a.get_spec(ctx)).collect())
            }
            IrType::Array(elem) => IrType::Array(Box::new(elem.get_spec(ctx))),
            IrType::Pointer(elem) => IrType::Pointer(Box::new(elem.get_spec(ctx))),
            IrType::ByRef(elem) => IrType::ByRef(Box::new(elem.get_spec(ctx))),
            _ => self.clone(),
        }
    }

    /// Returns `true` if the type mentions a generic parameter anywhere.
    #[must_use]
    pub fn is_open(&self) -> bool {
        match self {
            IrType::GenericParam(_) | IrType::MethodGenericParam(_) => true,
            IrType::Instance(_, args) => args.iter().any(IrType::is_open),
            IrType::Array(elem) | IrType::Pointer(elem) | IrType::ByRef(elem) => elem.is_open(),
            _ => false,
        }
    }

    /// The type a value of stack class `stack` takes after an arithmetic operation.
    #[must_use]
    pub fn for_stack(stack: StackType) -> IrType {
        match stack {
            StackType::Void => IrType::Void,
            StackType::Int => IrType::I32,
            StackType::Long => IrType::I64,
            StackType::NInt => IrType::NInt,
            StackType::Float => IrType::F64,
            StackType::ByRef => IrType::by_ref(IrType::U8),
            StackType::Object | StackType::Struct => IrType::Object,
        }
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrType::Void => write!(f, "void"),
            IrType::Bool => write!(f, "bool"),
            IrType::Char => write!(f, "char"),
            IrType::I8 => write!(f, "sbyte"),
            IrType::U8 => write!(f, "byte"),
            IrType::I16 => write!(f, "short"),
            IrType::U16 => write!(f, "ushort"),
            IrType::I32 => write!(f, "int"),
            IrType::U32 => write!(f, "uint"),
            IrType::I64 => write!(f, "long"),
            IrType::U64 => write!(f, "ulong"),
            IrType::NInt => write!(f, "nint"),
            IrType::NUInt => write!(f, "nuint"),
            IrType::F32 => write!(f, "float"),
            IrType::F64 => write!(f, "double"),
            IrType::Object => write!(f, "object"),
            IrType::String => write!(f, "string"),
            IrType::TypedRef => write!(f, "TypedReference"),
            IrType::Def(def) => write!(f, "{}", def.full_name()),
            IrType::Instance(def, args) => {
                write!(f, "{}[", def.full_name())?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, "]")
            }
            IrType::Array(elem) => write!(f, "{elem}[]"),
            IrType::Pointer(elem) => write!(f, "{elem}*"),
            IrType::ByRef(elem) => write!(f, "{elem}&"),
            IrType::GenericParam(index) => write!(f, "!{index}"),
            IrType::MethodGenericParam(index) => write!(f, "!!{index}"),
        }
    }
}

/// Generic arguments used to specialize descriptors of open generic code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct GenericContext {
    /// Arguments for `!n` parameters of the declaring type
    pub type_args: Vec<IrType>,
    /// Arguments for `!!n` parameters of the method
    pub method_args: Vec<IrType>,
}

impl GenericContext {
    /// Creates a context from type and method arguments.
    #[must_use]
    pub fn new(type_args: Vec<IrType>, method_args: Vec<IrType>) -> Self {
        GenericContext {
            type_args,
            method_args,
        }
    }

    /// Creates a context holding the type arguments of a generic instantiation.
    #[must_use]
    pub fn from_type(ty: &IrType) -> Self {
        match ty {
            IrType::Instance(_, args) => GenericContext::new(args.clone(), Vec::new()),
            _ => GenericContext::default(),
        }
    }

    /// Returns `true` if no substitution would change anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.type_args.is_empty() && self.method_args.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_def() -> Arc<TypeDefDesc> {
        Arc::new(TypeDefDesc {
            token: Token::from_parts(Token::TABLE_TYPEREF, 7),
            namespace: "System.Collections.Generic".to_string(),
            name: "List`1".to_string(),
            is_value_type: false,
            generic_arity: 1,
        })
    }

    #[test]
    fn test_stack_types() {
        assert_eq!(IrType::Bool.stack_type(), StackType::Int);
        assert_eq!(IrType::U32.stack_type(), StackType::Int);
        assert_eq!(IrType::U64.stack_type(), StackType::Long);
        assert_eq!(IrType::pointer_to(IrType::U8).stack_type(), StackType::NInt);
        assert_eq!(IrType::by_ref(IrType::I32).stack_type(), StackType::ByRef);
        assert_eq!(IrType::String.stack_type(), StackType::Object);
        assert_eq!(IrType::array_of(IrType::I32).stack_type(), StackType::Object);

        let point = TypeDefDesc::value_type(Token::new(0x0200_0002), "Geo", "Point");
        assert_eq!(IrType::Def(point).stack_type(), StackType::Struct);
    }

    #[test]
    fn test_narrowing() {
        assert!(IrType::U8.needs_narrowing_from(&IrType::I32));
        assert!(IrType::Bool.needs_narrowing_from(&IrType::I32));
        assert!(!IrType::U8.needs_narrowing_from(&IrType::U8));
        assert!(!IrType::I32.needs_narrowing_from(&IrType::U8));
        assert!(IrType::F32.needs_narrowing_from(&IrType::F64));
        assert!(!IrType::F64.needs_narrowing_from(&IrType::F32));
    }

    #[test]
    fn test_get_spec_substitutes_nested_params() {
        let open = IrType::Instance(list_def(), vec![IrType::GenericParam(0)]);
        let ty = IrType::array_of(open.clone());
        assert!(ty.is_open());

        let ctx = GenericContext::new(vec![IrType::String], vec![]);
        let spec = ty.get_spec(&ctx);
        assert_eq!(
            spec,
            IrType::array_of(IrType::Instance(list_def(), vec![IrType::String]))
        );
        assert!(!spec.is_open());
    }

    #[test]
    fn test_get_spec_keeps_unbound_params() {
        let ctx = GenericContext::new(vec![IrType::I32], vec![]);
        assert_eq!(IrType::MethodGenericParam(0).get_spec(&ctx), IrType::MethodGenericParam(0));
        assert_eq!(IrType::GenericParam(3).get_spec(&ctx), IrType::GenericParam(3));
        assert_eq!(IrType::GenericParam(0).get_spec(&ctx), IrType::I32);
    }

    #[test]
    fn test_context_from_type() {
        let inst = IrType::Instance(list_def(), vec![IrType::I64]);
        let ctx = GenericContext::from_type(&inst);
        assert_eq!(ctx.type_args, vec![IrType::I64]);
        assert!(GenericContext::from_type(&IrType::Object).is_empty());
    }

    #[test]
    fn test_display() {
        let inst = IrType::Instance(list_def(), vec![IrType::I32]);
        assert_eq!(format!("{inst}"), "System.Collections.Generic.List`1[int]");
        assert_eq!(format!("{}", IrType::by_ref(IrType::array_of(IrType::U8))), "byte[]&");
    }
}
