//! Decoded function traces
//!
//! The command line tool reads a function as the decoder would hand it
//! over: a name and a list of blocks, each with its decoded instructions.
//!
//! ```toml
//! name = "count"
//!
//! [[blocks]]
//! address = 0x1000
//! instrs = [
//!     { opcode = "add", address = 0x1000, length = 4, operands = [{ reg = "rax", facet = "i64" }, { imm = 1 }] },
//!     { opcode = "jnz", address = 0x1004, length = 2, operands = [{ imm = 0x1000 }] },
//! ]
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::instr::Instr;

/// A function as produced by the decoder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedFunction {
    pub name: String,
    pub blocks: Vec<DecodedBlock>,
}

/// Instructions of one basic block, in address order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedBlock {
    pub address: u64,
    #[serde(default)]
    pub instrs: Vec<Instr>,
}

impl DecodedFunction {
    pub fn new(name: impl Into<String>, blocks: Vec<DecodedBlock>) -> Self {
        Self {
            name: name.into(),
            blocks,
        }
    }

    pub fn from_toml_str(source: &str) -> Result<Self, TraceError> {
        Ok(toml::from_str(source)?)
    }

    pub fn from_json_str(source: &str) -> Result<Self, TraceError> {
        Ok(serde_json::from_str(source)?)
    }

    pub fn parse(source: &str, format: TraceFormat) -> Result<Self, TraceError> {
        match format {
            TraceFormat::Toml => Self::from_toml_str(source),
            TraceFormat::Json => Self::from_json_str(source),
        }
    }

    /// Read a trace file, picking the format from its extension
    pub fn load(path: &Path) -> Result<Self, TraceError> {
        let source = std::fs::read_to_string(path)?;
        Self::parse(&source, TraceFormat::from_path(path))
    }

    pub fn instr_count(&self) -> usize {
        self.blocks.iter().map(|b| b.instrs.len()).sum()
    }
}

impl DecodedBlock {
    pub fn new(address: u64, instrs: Vec<Instr>) -> Self {
        Self { address, instrs }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceFormat {
    Toml,
    Json,
}

impl TraceFormat {
    /// `.toml` files are TOML, everything else is JSON
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => TraceFormat::Toml,
            _ => TraceFormat::Json,
        }
    }
}

/// Trace loading error
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML trace: {}", .0.message())]
    Toml(#[from] toml::de::Error),

    #[error("Invalid JSON trace: {0}")]
    Json(#[from] serde_json::Error),
}

impl TraceError {
    /// Byte range of the offending input, if known
    pub fn span(&self, source: &str) -> Option<std::ops::Range<usize>> {
        match self {
            TraceError::Io(_) => None,
            TraceError::Toml(e) => e.span(),
            TraceError::Json(e) => {
                if e.line() == 0 {
                    return None;
                }
                let line_start: usize = source
                    .split_inclusive('\n')
                    .take(e.line() - 1)
                    .map(str::len)
                    .sum();
                let offset = (line_start + e.column().saturating_sub(1)).min(source.len());
                Some(offset..offset)
            }
        }
    }
}

/// Report a trace error with ariadne
pub fn report_error(filename: &str, source: &str, error: &TraceError) -> std::io::Result<()> {
    use ariadne::{Color, Label, Report, ReportKind, Source};

    let message = match error {
        TraceError::Toml(e) => e.message().to_string(),
        other => other.to_string(),
    };

    match error.span(source) {
        Some(span) => Report::build(ReportKind::Error, (filename, span.clone()))
            .with_message("Invalid trace")
            .with_label(
                Label::new((filename, span))
                    .with_message(message)
                    .with_color(Color::Red),
            )
            .finish()
            .eprint((filename, Source::from(source))),
        None => Report::build(ReportKind::Error, (filename, 0..0))
            .with_message(message)
            .finish()
            .eprint((filename, Source::from(source))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facet::Facet;
    use crate::instr::{Opcode, Operand};
    use crate::reg::Reg;

    const LOOP: &str = r#"
name = "count"

[[blocks]]
address = 0x1000
instrs = [
    { opcode = "add", address = 0x1000, length = 4, operands = [{ reg = "rax", facet = "i64" }, { imm = 1 }] },
    { opcode = "jnz", address = 0x1004, length = 2, operands = [{ imm = 0x1000 }] },
]

[[blocks]]
address = 0x1006
instrs = [{ opcode = "ret", address = 0x1006, length = 1 }]
"#;

    #[test]
    fn test_parse_toml() {
        let func = DecodedFunction::from_toml_str(LOOP).unwrap();
        assert_eq!(func.name, "count");
        assert_eq!(func.blocks.len(), 2);
        assert_eq!(func.instr_count(), 3);
        assert_eq!(
            func.blocks[0].instrs[0],
            Instr::new(
                Opcode::Add,
                0x1000,
                4,
                vec![Operand::reg(Reg::gp(0), Facet::I64), Operand::imm(1)]
            )
        );
        assert!(func.blocks[1].instrs[0].operands.is_empty());
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{"name": "f", "blocks": [{"address": 16, "instrs": [
            {"opcode": "mov", "address": 16, "length": 3, "operands": [{"reg": "ecx", "facet": "i32"}, {"imm": -1}]}
        ]}]}"#;
        let err = DecodedFunction::from_json_str(json).unwrap_err();
        // register names are architectural, not facet aliases
        assert!(matches!(err, TraceError::Json(_)));

        let json = json.replace("ecx", "rcx");
        let func = DecodedFunction::from_json_str(&json).unwrap();
        assert_eq!(func.blocks[0].instrs[0].operands[1], Operand::imm(-1));
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(TraceFormat::from_path(Path::new("a/loop.toml")), TraceFormat::Toml);
        assert_eq!(TraceFormat::from_path(Path::new("loop.json")), TraceFormat::Json);
        assert_eq!(TraceFormat::from_path(Path::new("loop")), TraceFormat::Json);
    }

    #[test]
    fn test_error_spans() {
        let source = "name = \"f\"\nblocks = [{ address = \"x\" }]\n";
        let err = DecodedFunction::from_toml_str(source).unwrap_err();
        assert!(err.span(source).is_some());

        let source = "{\"name\": \"f\",\n \"blocks\": 3}";
        let err = DecodedFunction::from_json_str(source).unwrap_err();
        let span = err.span(source).unwrap();
        assert!(span.start > source.find('\n').unwrap());
    }
}
