use serde::{Deserialize, Serialize};

/// Source text plus the byte code compiled from it. Empty byte code marks a
/// program that failed to compile or was never compiled.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Program {
    source: String,
    byte_code: Vec<u8>,
}

impl Program {
    pub fn new(source: impl Into<String>, byte_code: Vec<u8>) -> Self {
        Program { source: source.into(), byte_code }
    }

    /// A program whose compilation failed.
    pub fn invalid(source: impl Into<String>) -> Self {
        Program::new(source, Vec::new())
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn byte_code(&self) -> &[u8] {
        &self.byte_code
    }

    pub fn byte_code_size(&self) -> usize {
        self.byte_code.len()
    }

    pub fn is_valid(&self) -> bool {
        !self.byte_code.is_empty()
    }
}
