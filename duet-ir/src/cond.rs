use core::fmt;

use crate::error::ParseError;

/// Condition code of a `setcond`/`movcond`/`brcond` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CondCode {
    /// Constant false.
    Never = 0,
    /// Constant true.
    Always = 1,
    /// Equality.
    Eq = 2,
    /// Inequality.
    Ne = 3,
    /// Signed less-than.
    Lt = 4,
    /// Signed less-or-equal.
    Le = 5,
    /// Signed greater-or-equal.
    Ge = 6,
    /// Signed greater-than.
    Gt = 7,
    /// Unsigned less-than.
    Ltu = 8,
    /// Unsigned less-or-equal.
    Leu = 9,
    /// Unsigned greater-or-equal.
    Geu = 10,
    /// Unsigned greater-than.
    Gtu = 11,
    /// `(a & b) == 0`.
    TstEq = 12,
    /// `(a & b) != 0`.
    TstNe = 13,
}

impl TryFrom<u32> for CondCode {
    type Error = ParseError;

    fn try_from(raw: u32) -> Result<Self, ParseError> {
        Ok(match raw {
            0 => CondCode::Never,
            1 => CondCode::Always,
            2 => CondCode::Eq,
            3 => CondCode::Ne,
            4 => CondCode::Lt,
            5 => CondCode::Le,
            6 => CondCode::Ge,
            7 => CondCode::Gt,
            8 => CondCode::Ltu,
            9 => CondCode::Leu,
            10 => CondCode::Geu,
            11 => CondCode::Gtu,
            12 => CondCode::TstEq,
            13 => CondCode::TstNe,
            other => return Err(ParseError::InvalidCond(other)),
        })
    }
}

impl fmt::Display for CondCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CondCode::Never => "never",
            CondCode::Always => "always",
            CondCode::Eq => "eq",
            CondCode::Ne => "ne",
            CondCode::Lt => "lt",
            CondCode::Le => "le",
            CondCode::Ge => "ge",
            CondCode::Gt => "gt",
            CondCode::Ltu => "ltu",
            CondCode::Leu => "leu",
            CondCode::Geu => "geu",
            CondCode::Gtu => "gtu",
            CondCode::TstEq => "tsteq",
            CondCode::TstNe => "tstne",
        };
        f.write_str(name)
    }
}
