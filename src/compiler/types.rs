//! # Type & width model
//!
//! Scalar widths, fixed-point encodings and the structured types (strings,
//! pointers, arrays) that every virtual register and global is tagged with.
//!
//! 24-bit integers are emulated in 32-bit storage: values are kept
//! normalized (masked or sign-extended) to 24 bits after every operation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed-point encoding: storage width and number of fraction bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FixedKind {
    /// 8.8 signed, 16-bit storage
    F8_8,
    /// .8 unsigned, 8-bit storage
    F8,
    /// .16 unsigned, 16-bit storage
    F16,
    /// 16.8 signed, 24 bits in 32-bit storage
    F16_8,
    /// 8.16 signed, 24 bits in 32-bit storage
    F8_16,
}

impl FixedKind {
    /// Logical width in bits
    pub fn bits(self) -> u32 {
        match self {
            FixedKind::F8 => 8,
            FixedKind::F8_8 | FixedKind::F16 => 16,
            FixedKind::F16_8 | FixedKind::F8_16 => 24,
        }
    }

    /// Number of fraction bits
    pub fn shift(self) -> u32 {
        match self {
            FixedKind::F8_8 | FixedKind::F8 | FixedKind::F16_8 => 8,
            FixedKind::F16 | FixedKind::F8_16 => 16,
        }
    }

    /// Whether the encoding carries a sign
    pub fn is_signed(self) -> bool {
        matches!(self, FixedKind::F8_8 | FixedKind::F16_8 | FixedKind::F8_16)
    }

    /// Canonical short name (`f8_8`, `f_16`, ...)
    pub fn short_name(self) -> &'static str {
        match self {
            FixedKind::F8_8 => "f8_8",
            FixedKind::F8 => "f_8",
            FixedKind::F16 => "f_16",
            FixedKind::F16_8 => "f16_8",
            FixedKind::F8_16 => "f8_16",
        }
    }
}

/// Backend type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    U8,
    U16,
    U24,
    U32,
    I8,
    I16,
    I24,
    I32,
    Fixed(FixedKind),
    Bool,
    /// Length-prefixed string record `{ len: u16, data: *u8 }`
    String,
    Pointer(Box<Type>),
    Array(Box<Type>, u16),
    /// Return type of procedures; never carried by a register
    Void,
}

impl Type {
    /// Pointer to `inner`
    pub fn ptr(inner: Type) -> Type {
        Type::Pointer(Box::new(inner))
    }

    /// Fixed-length array of `elem`
    pub fn array(elem: Type, len: u16) -> Type {
        Type::Array(Box::new(elem), len)
    }

    /// Can a virtual register hold a value of this type?
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Type::String | Type::Array(..) | Type::Void)
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Type::U8
                | Type::U16
                | Type::U24
                | Type::U32
                | Type::I8
                | Type::I16
                | Type::I24
                | Type::I32
        )
    }

    pub fn is_signed(&self) -> bool {
        match self {
            Type::I8 | Type::I16 | Type::I24 | Type::I32 => true,
            Type::Fixed(kind) => kind.is_signed(),
            _ => false,
        }
    }

    /// Fraction bits for fixed-point types, 0 otherwise
    pub fn fixed_shift(&self) -> u32 {
        match self {
            Type::Fixed(kind) => kind.shift(),
            _ => 0,
        }
    }

    /// Logical width in bits of a scalar value (pointers are 16-bit in the
    /// IR's address model)
    pub fn bits(&self) -> u32 {
        match self {
            Type::U8 | Type::I8 | Type::Bool => 8,
            Type::U16 | Type::I16 | Type::Pointer(_) => 16,
            Type::U24 | Type::I24 => 24,
            Type::U32 | Type::I32 => 32,
            Type::Fixed(kind) => kind.bits(),
            Type::String => 32,
            Type::Array(elem, len) => elem.storage_bytes() * 8 * u32::from(*len),
            Type::Void => 0,
        }
    }

    /// Bytes occupied in memory (24-bit values take 32-bit storage)
    pub fn storage_bytes(&self) -> u32 {
        match self {
            Type::U24 | Type::I24 => 4,
            Type::Fixed(kind) if kind.bits() == 24 => 4,
            Type::String => 4,
            Type::Array(elem, len) => elem.storage_bytes() * u32::from(*len),
            Type::Void => 0,
            other => other.bits() / 8,
        }
    }

    /// Element type addressed through a pointer of this type
    ///
    /// `*[T; N]` and `*T` both index `T`.
    pub fn element(&self) -> Option<&Type> {
        match self {
            Type::Pointer(inner) => match inner.as_ref() {
                Type::Array(elem, _) => Some(elem),
                other => Some(other),
            },
            _ => None,
        }
    }

    /// Canonical short name used in mangled symbols (`u8`, `p_u16`, `a10_u8`)
    pub fn short_name(&self) -> String {
        match self {
            Type::U8 => "u8".into(),
            Type::U16 => "u16".into(),
            Type::U24 => "u24".into(),
            Type::U32 => "u32".into(),
            Type::I8 => "i8".into(),
            Type::I16 => "i16".into(),
            Type::I24 => "i24".into(),
            Type::I32 => "i32".into(),
            Type::Fixed(kind) => kind.short_name().into(),
            Type::Bool => "bool".into(),
            Type::String => "str".into(),
            Type::Pointer(inner) => format!("p_{}", inner.short_name()),
            Type::Array(elem, len) => format!("a{}_{}", len, elem.short_name()),
            Type::Void => "void".into(),
        }
    }

    /// Wrap an arbitrary integer into this type's value range
    ///
    /// Unsigned types wrap modulo 2^width, signed types are sign-extended
    /// from their top bit, booleans collapse to 0/1.
    pub fn wrap(&self, value: i64) -> i64 {
        match self {
            Type::Bool => i64::from(value != 0),
            Type::Void | Type::String | Type::Array(..) => value,
            ty => {
                let bits = ty.bits();
                let mask = (1i64 << bits) - 1;
                let low = value & mask;
                if ty.is_signed() && low & (1i64 << (bits - 1)) != 0 {
                    low - (1i64 << bits)
                } else {
                    low
                }
            }
        }
    }
}

// Ordered by canonical name so symbol tuples sort deterministically
impl PartialOrd for Type {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Type {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.short_name().cmp(&other.short_name())
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Fixed(kind) => write!(f, "{}", kind.short_name().replace('_', ".")),
            Type::String => write!(f, "string"),
            Type::Pointer(inner) => write!(f, "*{}", inner),
            Type::Array(elem, len) => write!(f, "[{}; {}]", elem, len),
            other => write!(f, "{}", other.short_name()),
        }
    }
}
