use std::fmt;

/// Codes for codegen diagnostics.
///
/// Format: E#### where the first digit indicates the phase:
/// - E5xxx: lowering findings (never fatal)
/// - E6xxx: class registry findings
/// - E9xxx: internal invariant violations
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub enum ErrorCode {
    /// Call site fell back to dynamic dispatch
    E5001,
    /// Keyword argument matches no parameter and the callee has no collector
    E5002,
    /// `yield` in a function without a block parameter
    E5003,
    /// Rescue clause names a class that is neither builtin nor declared
    E5004,
    /// Boxed value narrowed with a run-time check at a typed boundary
    E5005,
    /// Override arity differs from the overridden method; excluded from the vtable
    E6001,
    /// Field declared twice along an inheritance chain
    E6002,
    /// Internal invariant violated during lowering
    E9001,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::E5001 => "E5001",
            ErrorCode::E5002 => "E5002",
            ErrorCode::E5003 => "E5003",
            ErrorCode::E5004 => "E5004",
            ErrorCode::E5005 => "E5005",
            ErrorCode::E6001 => "E6001",
            ErrorCode::E6002 => "E6002",
            ErrorCode::E9001 => "E9001",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ErrorCode::E5001 => "dynamic dispatch fallback",
            ErrorCode::E5002 => "unmatched keyword argument",
            ErrorCode::E5003 => "yield without block parameter",
            ErrorCode::E5004 => "unknown rescue class",
            ErrorCode::E5005 => "checked narrowing",
            ErrorCode::E6001 => "override arity mismatch",
            ErrorCode::E6002 => "duplicate field",
            ErrorCode::E9001 => "internal error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
