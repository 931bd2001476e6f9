//! Binary IR encoding
//!
//! Little-endian layout:
//!
//! ```text
//! u32 magic "PSIR"   u32 version   u32 function_count   u32 entry_index
//! u32 string_count   { u32 len, bytes }*
//! { u32 name_len, name bytes, u32 instruction_count, { u8 opcode, u64 imm }* }*
//! ```

use super::instruction::{IrInstruction, IrOpcode};
use super::program::{IrFunction, IrModule};
use crate::{Error, Result};

/// Magic word; the encoded module starts with the bytes `PSIR`
pub const IR_MAGIC: u32 = u32::from_le_bytes(*b"PSIR");
/// Current format version
pub const IR_VERSION: u32 = 1;

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_str(out: &mut Vec<u8>, text: &str) {
    put_u32(out, text.len() as u32);
    out.extend_from_slice(text.as_bytes());
}

/// Encode `module`
pub fn serialize_ir(module: &IrModule) -> Result<Vec<u8>> {
    if module.entry_index as usize >= module.functions.len() {
        return Err(Error::serialization("invalid IR entry index"));
    }
    let mut out = Vec::with_capacity(20 + module.instruction_count() * 9);
    put_u32(&mut out, IR_MAGIC);
    put_u32(&mut out, IR_VERSION);
    put_u32(&mut out, module.functions.len() as u32);
    put_u32(&mut out, module.entry_index);
    put_u32(&mut out, module.string_table.len() as u32);
    for text in &module.string_table {
        put_str(&mut out, text);
    }
    for function in &module.functions {
        put_str(&mut out, &function.name);
        put_u32(&mut out, function.instructions.len() as u32);
        for instr in &function.instructions {
            out.push(instr.op as u8);
            out.extend_from_slice(&instr.imm.to_le_bytes());
        }
    }
    tracing::trace!(bytes = out.len(), "serialized IR module");
    Ok(out)
}

/// Cursor over the encoded bytes; every read names the section it belongs to
struct Reader<'b> {
    bytes: &'b [u8],
    pos: usize,
}

impl<'b> Reader<'b> {
    fn take(&mut self, n: usize, section: &str) -> Result<&'b [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| Error::serialization(format!("truncated IR {}", section)))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self, section: &str) -> Result<u8> {
        Ok(self.take(1, section)?[0])
    }

    fn u32(&mut self, section: &str) -> Result<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4, section)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn u64(&mut self, section: &str) -> Result<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8, section)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn string(&mut self, section: &str) -> Result<String> {
        let len = self.u32(section)? as usize;
        let raw = self.take(len, section)?;
        String::from_utf8(raw.to_vec()).map_err(|_| Error::serialization("invalid UTF-8 in IR string"))
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }
}

/// Decode a module produced by [`serialize_ir`]
pub fn deserialize_ir(bytes: &[u8]) -> Result<IrModule> {
    let mut reader = Reader { bytes, pos: 0 };
    if reader.u32("header")? != IR_MAGIC {
        return Err(Error::serialization("invalid IR header"));
    }
    if reader.u32("header")? != IR_VERSION {
        return Err(Error::serialization("unsupported IR version"));
    }
    let function_count = reader.u32("header")? as usize;
    let entry_index = reader.u32("header")?;
    let string_count = reader.u32("header")? as usize;

    // Counts are untrusted; grow as data actually arrives.
    let mut string_table = Vec::with_capacity(string_count.min(reader.remaining() / 4));
    for _ in 0..string_count {
        string_table.push(reader.string("string table")?);
    }

    let mut functions = Vec::with_capacity(function_count.min(reader.remaining() / 8));
    for _ in 0..function_count {
        let name = reader.string("function")?;
        let count = reader.u32("function")? as usize;
        let mut instructions = Vec::with_capacity(count.min(reader.remaining() / 9));
        for _ in 0..count {
            let op = IrOpcode::try_from(reader.u8("instructions")?)?;
            let imm = reader.u64("instructions")?;
            instructions.push(IrInstruction::new(op, imm));
        }
        functions.push(IrFunction { name, instructions });
    }

    if reader.remaining() != 0 {
        return Err(Error::serialization("trailing bytes after IR module"));
    }
    if entry_index as usize >= functions.len() {
        return Err(Error::serialization("invalid IR entry index"));
    }
    Ok(IrModule {
        functions,
        string_table,
        entry_index,
    })
}
