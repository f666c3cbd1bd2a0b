//! Deterministic binary serialization of compiled programs.
//!
//! Layout, all multi-byte integers little-endian:
//!
//! ```text
//! magic    [u8; 4] = b"VETO"
//! version  u32
//! partial  u8 (0 | 1)
//! 4 sections, each: length u32 + postcard-encoded body
//!   constants, blocks, entry points, extension declarations
//! ```
//!
//! The layout is self-describing and length-prefixed: decoding never relies
//! on host byte order or pointer width, never panics, and never reads out of
//! bounds. A version tag newer than [`Program::FORMAT_VERSION`] is a
//! [`CodecError::FormatVersionMismatch`]; anything structurally wrong is a
//! [`CodecError::CorruptProgram`].

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::values::{Number, Value};

use super::program::{Block, EntryPoint, ExtensionDecl, Program};

/// Serialization-layer errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("unsupported program format version {found} (supported up to {supported})")]
    FormatVersionMismatch { found: u32, supported: u32 },

    #[error("corrupt program: {0}")]
    CorruptProgram(String),

    #[error("cannot encode program: {0}")]
    Encode(String),
}

/// Wire twin of [`Value`].
///
/// `Value`'s own serde implementation is JSON-oriented (canonical key order,
/// numbers routed through `serde_json::Number`), which a compact binary
/// codec cannot reuse. This mirror keeps numbers as exact decimal text and
/// composites as plain sequences; collections are re-canonicalized when
/// decoding.
#[derive(Serialize, Deserialize)]
enum BinaryValue {
    Null,
    Bool(bool),
    Number(String),
    String(String),
    Array(Vec<BinaryValue>),
    Set(Vec<BinaryValue>),
    Object(Vec<(BinaryValue, BinaryValue)>),
}

impl From<&Value> for BinaryValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => BinaryValue::Null,
            Value::Bool(b) => BinaryValue::Bool(*b),
            Value::Number(n) => BinaryValue::Number(n.to_canonical_string()),
            Value::String(s) => BinaryValue::String(s.to_string()),
            Value::Array(items) => BinaryValue::Array(items.iter().map(Into::into).collect()),
            Value::Set(items) => BinaryValue::Set(items.iter().map(Into::into).collect()),
            Value::Object(fields) => BinaryValue::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }
}

impl TryFrom<BinaryValue> for Value {
    type Error = CodecError;

    fn try_from(binary: BinaryValue) -> Result<Self, CodecError> {
        Ok(match binary {
            BinaryValue::Null => Value::Null,
            BinaryValue::Bool(b) => Value::Bool(b),
            BinaryValue::Number(text) => Value::Number(Number::parse(&text).ok_or_else(|| {
                CodecError::CorruptProgram(format!("invalid number literal '{text}'"))
            })?),
            BinaryValue::String(s) => Value::String(s.into()),
            BinaryValue::Array(items) => Value::from(
                items
                    .into_iter()
                    .map(Value::try_from)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            BinaryValue::Set(items) => Value::from(
                items
                    .into_iter()
                    .map(Value::try_from)
                    .collect::<Result<BTreeSet<_>, _>>()?,
            ),
            BinaryValue::Object(fields) => {
                let mut object = BTreeMap::new();
                for (k, v) in fields {
                    object.insert(Value::try_from(k)?, Value::try_from(v)?);
                }
                Value::from(object)
            }
        })
    }
}

/// Bounds-checked cursor over the serialized bytes.
struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self
            .offset
            .checked_add(n)
            .ok_or_else(|| CodecError::CorruptProgram("offset overflow".into()))?;
        let slice = self.data.get(self.offset..end).ok_or_else(|| {
            CodecError::CorruptProgram(format!(
                "truncated: need {n} bytes at offset {}, have {}",
                self.offset,
                self.data.len().saturating_sub(self.offset)
            ))
        })?;
        self.offset = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32, CodecError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.offset)
    }
}

fn write_section<T: Serialize>(buffer: &mut Vec<u8>, section: &T) -> Result<(), CodecError> {
    let body = postcard::to_allocvec(section).map_err(|e| CodecError::Encode(e.to_string()))?;
    let len = u32::try_from(body.len())
        .map_err(|_| CodecError::Encode("section exceeds 4 GiB".into()))?;
    buffer.extend_from_slice(&len.to_le_bytes());
    buffer.extend_from_slice(&body);
    Ok(())
}

fn read_section<'a, T: Deserialize<'a>>(
    reader: &mut Reader<'a>,
    what: &str,
) -> Result<T, CodecError> {
    let len = reader.read_u32()? as usize;
    let body = reader.take(len)?;
    let (value, rest) = postcard::take_from_bytes::<T>(body)
        .map_err(|e| CodecError::CorruptProgram(format!("{what} section: {e}")))?;
    if !rest.is_empty() {
        return Err(CodecError::CorruptProgram(format!(
            "{what} section has {} trailing bytes",
            rest.len()
        )));
    }
    Ok(value)
}

impl Program {
    /// Serialize to the portable binary format.
    pub fn serialize_binary(&self) -> Result<Vec<u8>, CodecError> {
        let mut buffer = Vec::new();

        buffer.extend_from_slice(&Self::MAGIC);
        buffer.extend_from_slice(&Self::FORMAT_VERSION.to_le_bytes());
        buffer.push(u8::from(self.partial));

        let constants: Vec<BinaryValue> = self.constants.iter().map(Into::into).collect();
        write_section(&mut buffer, &constants)?;
        write_section(&mut buffer, &self.blocks)?;
        write_section(&mut buffer, &self.entry_points)?;
        write_section(&mut buffer, &self.extension_decls)?;

        Ok(buffer)
    }

    /// Deserialize from the portable binary format. The partial flag
    /// round-trips: a partial program decodes successfully and is rejected
    /// only when execution is attempted.
    pub fn deserialize_binary(data: &[u8]) -> Result<Program, CodecError> {
        let mut reader = Reader::new(data);

        let magic = reader.take(4)?;
        if magic != Self::MAGIC {
            return Err(CodecError::CorruptProgram("bad magic bytes".into()));
        }

        let version = reader.read_u32()?;
        if version > Self::FORMAT_VERSION {
            return Err(CodecError::FormatVersionMismatch {
                found: version,
                supported: Self::FORMAT_VERSION,
            });
        }

        let partial = match reader.read_u8()? {
            0 => false,
            1 => true,
            other => {
                return Err(CodecError::CorruptProgram(format!(
                    "invalid partial flag {other}"
                )));
            }
        };

        let constants: Vec<BinaryValue> = read_section(&mut reader, "constants")?;
        let blocks: Vec<Block> = read_section(&mut reader, "blocks")?;
        let entry_points: Vec<EntryPoint> = read_section(&mut reader, "entry points")?;
        let extension_decls: Vec<ExtensionDecl> =
            read_section(&mut reader, "extension declarations")?;

        if reader.remaining() != 0 {
            return Err(CodecError::CorruptProgram(format!(
                "{} trailing bytes after program",
                reader.remaining()
            )));
        }

        let constants = constants
            .into_iter()
            .map(Value::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Program {
            constants,
            blocks,
            entry_points,
            extension_decls,
            partial,
        })
    }

    /// Cheap header probe: could `data` plausibly be deserialized?
    pub fn can_deserialize(data: &[u8]) -> bool {
        let mut reader = Reader::new(data);
        match (reader.take(4), reader.read_u32()) {
            (Ok(magic), Ok(version)) => magic == Self::MAGIC && version <= Self::FORMAT_VERSION,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::vm::instruction_set::{BinOp, Instruction};
    use crate::vm::program::SourceSpan;

    use super::*;

    fn sample_program(partial: bool) -> Program {
        let mut program = Program::new();
        let user = program.add_constant(Value::from("alice"));
        let pi = program.add_constant(Value::Number("3.14159".parse().unwrap()));
        let nested = program.add_constant(Value::from_iter([(
            Value::from("roles"),
            Value::from(vec![Value::from("admin"), Value::from("auditor")]),
        )]));

        let mut block = Block::new(1);
        block.add_instruction(Instruction::LoadInput, Some(SourceSpan { line: 1, column: 1 }));
        block.add_instruction(Instruction::LoadConst(user), None);
        block.add_instruction(Instruction::Index, None);
        block.add_instruction(Instruction::LoadConst(pi), None);
        block.add_instruction(Instruction::BinaryOp(BinOp::Eq), None);
        block.add_instruction(Instruction::Emit, None);
        block.add_instruction(Instruction::Return, None);
        let entry = program.add_block(block);

        program.add_entry_point("data.example.allow", entry);
        program.add_extension_decl("http.send");
        program.add_constant(Value::from(vec![Value::from(nested as u64)]));
        program.set_partial(partial);
        program
    }

    #[test]
    fn test_round_trip() {
        let program = sample_program(false);
        let bytes = program.serialize_binary().unwrap();
        let decoded = Program::deserialize_binary(&bytes).unwrap();
        assert_eq!(program, decoded);
        assert!(!decoded.is_partial());
    }

    #[test]
    fn test_partial_flag_round_trips() {
        let program = sample_program(true);
        let bytes = program.serialize_binary().unwrap();
        let decoded = Program::deserialize_binary(&bytes).unwrap();
        assert!(decoded.is_partial());
        assert_eq!(program, decoded);
    }

    #[test]
    fn test_deterministic_encoding() {
        let program = sample_program(false);
        assert_eq!(
            program.serialize_binary().unwrap(),
            program.serialize_binary().unwrap()
        );
    }

    #[test]
    fn test_version_mismatch() {
        let mut bytes = sample_program(false).serialize_binary().unwrap();
        bytes[4..8].copy_from_slice(&(Program::FORMAT_VERSION + 1).to_le_bytes());
        let err = Program::deserialize_binary(&bytes).unwrap_err();
        assert_eq!(
            err,
            CodecError::FormatVersionMismatch {
                found: Program::FORMAT_VERSION + 1,
                supported: Program::FORMAT_VERSION,
            }
        );
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = sample_program(false).serialize_binary().unwrap();
        bytes[0] = b'X';
        assert!(matches!(
            Program::deserialize_binary(&bytes),
            Err(CodecError::CorruptProgram(_))
        ));
    }

    #[test]
    fn test_truncation_at_every_length() {
        let bytes = sample_program(false).serialize_binary().unwrap();
        for len in 0..bytes.len() {
            assert!(
                Program::deserialize_binary(&bytes[..len]).is_err(),
                "prefix of length {len} must not decode"
            );
        }
    }

    #[test]
    fn test_trailing_garbage() {
        let mut bytes = sample_program(false).serialize_binary().unwrap();
        bytes.push(0);
        assert!(matches!(
            Program::deserialize_binary(&bytes),
            Err(CodecError::CorruptProgram(_))
        ));
    }

    #[test]
    fn test_set_constant_encoding_ignores_insertion_order() {
        let build = |items: &[i64]| {
            let mut program = Program::new();
            let set: BTreeSet<Value> = items.iter().map(|&n| Value::from(n)).collect();
            program.add_constant(Value::from(set));
            program
        };
        assert_eq!(
            build(&[3, 1, 2]).serialize_binary().unwrap(),
            build(&[2, 3, 1]).serialize_binary().unwrap()
        );
    }

    #[test]
    fn test_can_deserialize() {
        let bytes = sample_program(false).serialize_binary().unwrap();
        assert!(Program::can_deserialize(&bytes));
        assert!(!Program::can_deserialize(b"VET"));
        assert!(!Program::can_deserialize(b"XXXX\x01\x00\x00\x00"));
    }
}
