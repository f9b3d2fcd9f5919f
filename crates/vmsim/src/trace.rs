//! Memory access traces.
//!
//! One access per line:
//!
//! ```text
//! # comment
//! r ADDR [LEN]        read LEN bytes (default 1)
//! w ADDR BYTE [LEN]   write BYTE to LEN bytes (default 1)
//! ```
//!
//! Numbers are decimal or `0x`-prefixed hexadecimal. Anything after `#` is ignored.

use std::num::ParseIntError;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Read { addr: usize, len: usize },
    Write { addr: usize, byte: u8, len: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TraceError {
    #[error("line {line}: unknown operation {op:?}")]
    UnknownOp { line: usize, op: String },
    #[error("line {line}: expected {expected}")]
    Arity { line: usize, expected: &'static str },
    #[error("line {line}: bad number {text:?}: {source}")]
    BadNumber {
        line: usize,
        text: String,
        source: ParseIntError,
    },
    #[error("line {line}: byte value {value:#x} does not fit in a byte")]
    ByteRange { line: usize, value: usize },
}

fn parse_number(text: &str, line: usize) -> Result<usize, TraceError> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => text.parse::<usize>(),
    };
    parsed.map_err(|source| TraceError::BadNumber {
        line,
        text: text.to_string(),
        source,
    })
}

/// Parses a whole trace.
pub fn parse(text: &str) -> Result<Vec<Op>, TraceError> {
    let mut ops = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let content = raw.split('#').next().unwrap_or_default();
        let fields: Vec<&str> = content.split_whitespace().collect();
        let Some((op, args)) = fields.split_first() else {
            continue;
        };

        let numbers = args
            .iter()
            .map(|arg| parse_number(arg, line))
            .collect::<Result<Vec<_>, _>>()?;
        let parsed = match (op.to_ascii_lowercase().as_str(), numbers.as_slice()) {
            ("r", [addr]) => Op::Read {
                addr: *addr,
                len: 1,
            },
            ("r", [addr, len]) => Op::Read {
                addr: *addr,
                len: *len,
            },
            ("r", _) => {
                return Err(TraceError::Arity {
                    line,
                    expected: "r ADDR [LEN]",
                });
            }
            ("w", [addr, byte, rest @ ..]) if rest.len() <= 1 => {
                let byte = u8::try_from(*byte)
                    .map_err(|_| TraceError::ByteRange { line, value: *byte })?;
                Op::Write {
                    addr: *addr,
                    byte,
                    len: rest.first().copied().unwrap_or(1),
                }
            }
            ("w", _) => {
                return Err(TraceError::Arity {
                    line,
                    expected: "w ADDR BYTE [LEN]",
                });
            }
            (other, _) => {
                return Err(TraceError::UnknownOp {
                    line,
                    op: other.to_string(),
                });
            }
        };
        ops.push(parsed);
    }
    Ok(ops)
}
