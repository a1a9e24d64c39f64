use std::fmt;

/// A metadata token identifying the definition or reference an entity descriptor came from.
///
/// The importer never decodes tokens. They only give descriptors a stable identity that a
/// re-encoder can map back to the metadata tables:
/// - The high byte (bits 24-31) indicates the table type
/// - The low 24 bits (bits 0-23) indicate the row index within that table
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Token(pub u32);

impl Token {
    /// `TypeRef` table.
    pub const TABLE_TYPEREF: u8 = 0x01;
    /// `TypeDef` table.
    pub const TABLE_TYPEDEF: u8 = 0x02;
    /// `Field` table.
    pub const TABLE_FIELD: u8 = 0x04;
    /// `MethodDef` table.
    pub const TABLE_METHODDEF: u8 = 0x06;
    /// `MemberRef` table.
    pub const TABLE_MEMBERREF: u8 = 0x0A;
    /// `TypeSpec` table.
    pub const TABLE_TYPESPEC: u8 = 0x1B;
    /// `MethodSpec` table.
    pub const TABLE_METHODSPEC: u8 = 0x2B;

    /// Creates a token from a raw 32-bit value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Token(value)
    }

    /// Creates a token from a table id and a row index.
    #[must_use]
    pub const fn from_parts(table: u8, row: u32) -> Self {
        Token(((table as u32) << 24) | (row & 0x00FF_FFFF))
    }

    /// Returns the raw token value.
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }

    /// Extracts the table type (high byte).
    #[must_use]
    pub const fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Extracts the row index (low 24 bits).
    #[must_use]
    pub const fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Returns true for the null token (descriptors synthesized without metadata).
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token(0x{:02x}:{})", self.table(), self.row())
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}
