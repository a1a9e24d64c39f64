//! Method and field descriptors.

use std::{fmt, sync::Arc};

use crate::entities::{GenericContext, IrType, Token};

/// Shared handle to a method descriptor.
pub type MethodHandle = Arc<MethodDesc>;

/// Shared handle to a field descriptor.
pub type FieldHandle = Arc<FieldDesc>;

/// A method signature: the implicit `this`, explicit parameters and return type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct MethodSig {
    /// Whether the method takes an implicit `this` argument
    pub has_this: bool,
    /// Explicit parameter types, excluding `this`
    pub params: Vec<IrType>,
    /// Return type, `void` for none
    pub ret: IrType,
}

impl MethodSig {
    /// Signature of a static method.
    #[must_use]
    pub fn new_static(params: Vec<IrType>, ret: IrType) -> Self {
        MethodSig {
            has_this: false,
            params,
            ret,
        }
    }

    /// Signature of an instance method.
    #[must_use]
    pub fn new_instance(params: Vec<IrType>, ret: IrType) -> Self {
        MethodSig {
            has_this: true,
            params,
            ret,
        }
    }

    /// Number of values a call pops, `this` included.
    #[must_use]
    pub fn arg_count(&self) -> usize {
        self.params.len() + usize::from(self.has_this)
    }

    /// Substitutes generic parameters in every parameter and the return type.
    #[must_use]
    pub fn get_spec(&self, ctx: &GenericContext) -> MethodSig {
        MethodSig {
            has_this: self.has_this,
            params: self.params.iter().map(|p| p.get_spec(ctx)).collect(),
            ret: self.ret.get_spec(ctx),
        }
    }
}

/// A method definition, reference or generic instantiation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDesc {
    /// Metadata token
    pub token: Token,
    /// Simple name, e.g. `.ctor` or `ToString`
    pub name: String,
    /// Type declaring the method
    pub declaring_type: IrType,
    /// Signature
    pub sig: MethodSig,
    /// Method generic arguments, empty for non-generic methods
    pub generic_args: Vec<IrType>,
}

impl MethodDesc {
    /// Creates a non-generic method descriptor.
    #[must_use]
    pub fn new(token: Token, declaring_type: IrType, name: &str, sig: MethodSig) -> MethodHandle {
        Arc::new(MethodDesc {
            token,
            name: name.to_string(),
            declaring_type,
            sig,
            generic_args: Vec::new(),
        })
    }

    /// Returns `true` if the method has no `this` argument.
    #[must_use]
    pub fn is_static(&self) -> bool {
        !self.sig.has_this
    }

    /// Returns `true` for instance constructors.
    #[must_use]
    pub fn is_ctor(&self) -> bool {
        self.name == ".ctor"
    }

    /// Type of the implicit `this` argument, a managed reference for value types.
    #[must_use]
    pub fn this_type(&self) -> Option<IrType> {
        if !self.sig.has_this {
            return None;
        }
        if self.declaring_type.is_value_type() {
            Some(IrType::by_ref(self.declaring_type.clone()))
        } else {
            Some(self.declaring_type.clone())
        }
    }

    /// Specializes the descriptor under `ctx`.
    ///
    /// Returns the same handle when `ctx` is empty or the descriptor is closed.
    #[must_use]
    pub fn get_spec(self: &Arc<Self>, ctx: &GenericContext) -> MethodHandle {
        if ctx.is_empty() || !self.is_open() {
            return self.clone();
        }
        Arc::new(MethodDesc {
            token: self.token,
            name: self.name.clone(),
            declaring_type: self.declaring_type.get_spec(ctx),
            sig: self.sig.get_spec(ctx),
            generic_args: self.generic_args.iter().map(|a| a.get_spec(ctx)).collect(),
        })
    }

    fn is_open(&self) -> bool {
        self.declaring_type.is_open()
            || self.sig.ret.is_open()
            || self.sig.params.iter().any(IrType::is_open)
            || self.generic_args.iter().any(IrType::is_open)
    }
}

impl fmt::Display for MethodDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.declaring_type, self.name)
    }
}

/// A field definition or reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldDesc {
    /// Metadata token
    pub token: Token,
    /// Field name
    pub name: String,
    /// Type declaring the field
    pub declaring_type: IrType,
    /// Field type
    pub ty: IrType,
    /// Whether the field is static
    pub is_static: bool,
}

impl FieldDesc {
    /// Creates an instance field descriptor.
    #[must_use]
    pub fn instance(token: Token, declaring_type: IrType, name: &str, ty: IrType) -> FieldHandle {
        Arc::new(FieldDesc {
            token,
            name: name.to_string(),
            declaring_type,
            ty,
            is_static: false,
        })
    }

    /// Creates a static field descriptor.
    #[must_use]
    pub fn new_static(token: Token, declaring_type: IrType, name: &str, ty: IrType) -> FieldHandle {
        Arc::new(FieldDesc {
            token,
            name: name.to_string(),
            declaring_type,
            ty,
            is_static: true,
        })
    }

    /// Specializes the descriptor under `ctx`.
    #[must_use]
    pub fn get_spec(self: &Arc<Self>, ctx: &GenericContext) -> FieldHandle {
        if ctx.is_empty() || !(self.declaring_type.is_open() || self.ty.is_open()) {
            return self.clone();
        }
        Arc::new(FieldDesc {
            token: self.token,
            name: self.name.clone(),
            declaring_type: self.declaring_type.get_spec(ctx),
            ty: self.ty.get_spec(ctx),
            is_static: self.is_static,
        })
    }
}

impl fmt::Display for FieldDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.declaring_type, self.name)
    }
}

/// Any entity an instruction can reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityDesc {
    /// A type
    Type(IrType),
    /// A method
    Method(MethodHandle),
    /// A field
    Field(FieldHandle),
}

impl EntityDesc {
    /// Returns the declaring type of members, `None` for types.
    #[must_use]
    pub fn declaring_type(&self) -> Option<&IrType> {
        match self {
            EntityDesc::Type(_) => None,
            EntityDesc::Method(method) => Some(&method.declaring_type),
            EntityDesc::Field(field) => Some(&field.declaring_type),
        }
    }

    /// Specializes the entity under `ctx`.
    #[must_use]
    pub fn get_spec(&self, ctx: &GenericContext) -> EntityDesc {
        match self {
            EntityDesc::Type(ty) => EntityDesc::Type(ty.get_spec(ctx)),
            EntityDesc::Method(method) => EntityDesc::Method(method.get_spec(ctx)),
            EntityDesc::Field(field) => EntityDesc::Field(field.get_spec(ctx)),
        }
    }
}
