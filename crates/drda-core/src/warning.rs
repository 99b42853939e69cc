//! Non-fatal conditions reported alongside successful replies.

use std::fmt;

/// Sqlcode for "no data": end of a cursor, not a warning.
pub const SQLCODE_NO_DATA: i32 = 100;
/// Sqlcode returned when a procedure call produced result sets.
pub const SQLCODE_RESULT_SETS_RETURNED: i32 = 466;

/// A warning chained on a session or statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub sqlcode: i32,
    pub sqlstate: String,
    pub message: String,
}

impl Warning {
    pub fn new(sqlcode: i32, sqlstate: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            sqlcode,
            sqlstate: sqlstate.into(),
            message: message.into(),
        }
    }

    /// A client-generated warning (downgraded cursor attributes and the like).
    pub fn client(sqlstate: &str, message: impl Into<String>) -> Self {
        Self::new(0, sqlstate, message)
    }

    /// Whether a positive sqlcode should surface as a warning.
    pub const fn is_reportable(sqlcode: i32) -> bool {
        sqlcode > 0 && sqlcode != SQLCODE_NO_DATA && sqlcode != SQLCODE_RESULT_SETS_RETURNED
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (SQLSTATE {})", self.message, self.sqlstate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reportable_codes() {
        assert!(Warning::is_reportable(1));
        assert!(Warning::is_reportable(20_000));
        assert!(!Warning::is_reportable(0));
        assert!(!Warning::is_reportable(-1));
        assert!(!Warning::is_reportable(SQLCODE_NO_DATA));
        assert!(!Warning::is_reportable(SQLCODE_RESULT_SETS_RETURNED));
    }
}
