// src/engine/reply.rs

use crate::error::KvError;

/// Result of one command, rendered to text lines by [`Reply::into_lines`].
#[derive(Debug)]
pub enum Reply {
    /// `OK` and other status words.
    Status(&'static str),
    Integer(i64),
    Float(f64),
    /// A stored value, sent verbatim.
    Bulk(String),
    Nil,
    Array(Vec<String>),
    Error(KvError),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Status("OK")
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    pub fn into_lines(self) -> Vec<String> {
        match self {
            Reply::Status(s) => vec![s.to_string()],
            Reply::Integer(n) => vec![format!("(integer) {n}")],
            Reply::Float(f) => vec![format!("(float) {}", format_float(f))],
            Reply::Bulk(s) => vec![s],
            Reply::Nil => vec!["(nil)".to_string()],
            Reply::Array(items) if items.is_empty() => vec!["(empty array)".to_string()],
            Reply::Array(items) => items,
            Reply::Error(e) => vec![format!("(error) {e}")],
        }
    }
}

/// Shortest decimal that parses back to `f`. Very large and very small magnitudes
/// switch to exponent form (`1e300`, `2.5e-7`) instead of spelling out every zero.
pub fn format_float(f: f64) -> String {
    let abs = f.abs();
    if f.is_finite() && (abs >= 1e16 || (abs > 0.0 && abs < 1e-4)) {
        format!("{f:e}")
    } else {
        format!("{f}")
    }
}

impl From<KvError> for Reply {
    fn from(e: KvError) -> Self {
        Reply::Error(e)
    }
}
