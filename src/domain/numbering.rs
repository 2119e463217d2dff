//! Human-readable document numbers of the form `{kind}-{department}-{seq:05}`.

use std::fmt;

use thiserror::Error;

use crate::domain::models::DepartmentId;

pub const SEQUENCE_WIDTH: usize = 5;
pub const MAX_SEQUENCE: u32 = 99_999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    PurchaseRequest,
    PurchaseOrder,
}

impl DocumentKind {
    pub fn code(&self) -> &'static str {
        match self {
            DocumentKind::PurchaseRequest => "PR",
            DocumentKind::PurchaseOrder => "PO",
        }
    }

    /// First key of the advisory lock serializing allocation for this kind.
    pub fn lock_namespace(&self) -> i32 {
        match self {
            DocumentKind::PurchaseRequest => 0x5052,
            DocumentKind::PurchaseOrder => 0x504f,
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NumberingError {
    #[error("malformed document number: {0}")]
    Malformed(String),
    #[error("sequence exhausted for {prefix}")]
    Exhausted { prefix: String },
}

pub fn prefix(kind: DocumentKind, department_id: DepartmentId) -> String {
    format!("{}-{}-", kind.code(), department_id)
}

/// Parses the trailing sequence of a number that starts with `prefix`.
pub fn parse_sequence(number: &str, prefix: &str) -> Result<u32, NumberingError> {
    let digits = number
        .strip_prefix(prefix)
        .ok_or_else(|| NumberingError::Malformed(number.to_string()))?;
    if digits.len() != SEQUENCE_WIDTH || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(NumberingError::Malformed(number.to_string()));
    }
    digits
        .parse::<u32>()
        .map_err(|_| NumberingError::Malformed(number.to_string()))
}

pub fn format_number(kind: DocumentKind, department_id: DepartmentId, sequence: u32) -> String {
    format!(
        "{}{:0width$}",
        prefix(kind, department_id),
        sequence,
        width = SEQUENCE_WIDTH
    )
}

/// Computes the number following `greatest`, the lexicographically greatest
/// number already issued for this kind and department.
pub fn next_number(
    kind: DocumentKind,
    department_id: DepartmentId,
    greatest: Option<&str>,
) -> Result<String, NumberingError> {
    let prefix = prefix(kind, department_id);
    let sequence = match greatest {
        Some(number) => parse_sequence(number, &prefix)? + 1,
        None => 1,
    };
    if sequence > MAX_SEQUENCE {
        return Err(NumberingError::Exhausted { prefix });
    }
    Ok(format_number(kind, department_id, sequence))
}
