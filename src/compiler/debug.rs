//! Debug utilities for lowered IR
//!
//! Tools for inspecting and sanity-checking an [`IrModule`].

use super::ir::{decode_print_imm, IrInstruction, IrModule, IrOpcode};

/// Render a module in human-readable form
pub fn dump_ir(module: &IrModule) -> String {
    let mut out = String::new();
    out.push_str("═══════════════════════════════════════════════════════════\n");
    out.push_str("                    IR DUMP\n");
    out.push_str("═══════════════════════════════════════════════════════════\n");
    out.push_str(&format!("Entry: {}\n", module.entry_index));
    out.push_str(&format!("Strings: {:?}\n", module.string_table));
    for function in &module.functions {
        out.push_str("───────────────────────────────────────────────────────────\n");
        out.push_str(&format!("fn {} ({} instructions)\n", function.name, function.instructions.len()));
        for (i, instr) in function.instructions.iter().enumerate() {
            out.push_str(&format!("{:04}: {}\n", i, format_ir_instr(instr, &module.string_table)));
        }
    }
    out.push_str("═══════════════════════════════════════════════════════════\n");
    out
}

fn print_suffix(newline: bool, stderr: bool) -> &'static str {
    match (newline, stderr) {
        (false, false) => "",
        (true, false) => " +nl",
        (false, true) => " +err",
        (true, true) => " +nl +err",
    }
}

/// Format a single instruction; string immediates are resolved against `strings`
pub fn format_ir_instr(instr: &IrInstruction, strings: &[String]) -> String {
    let imm = instr.imm;
    match instr.op {
        IrOpcode::PushI32 => format!("push.i32 {}", imm as i64 as i32),
        IrOpcode::PushI64 => format!("push.i64 {}", imm as i64),
        IrOpcode::PushF32 => format!("push.f32 {}", f32::from_bits(imm as u32)),
        IrOpcode::PushF64 => format!("push.f64 {}", f64::from_bits(imm)),
        IrOpcode::LoadLocal => format!("load l{}", imm),
        IrOpcode::StoreLocal => format!("store l{}", imm),
        IrOpcode::AddressOfLocal => format!("addr l{}", imm),
        IrOpcode::Jump => format!("jmp {:04}", imm),
        IrOpcode::JumpIfZero => format!("jz {:04}", imm),
        IrOpcode::PrintString => {
            let (index, newline, stderr) = decode_print_imm(imm);
            match strings.get(index as usize) {
                Some(text) => format!("print.str {:?}{}", text, print_suffix(newline, stderr)),
                None => format!("print.str <bad index {}>{}", index, print_suffix(newline, stderr)),
            }
        }
        IrOpcode::LoadStringByte => match strings.get(imm as usize) {
            Some(text) => format!("str.byte {:?}", text),
            None => format!("str.byte <bad index {}>", imm),
        },
        IrOpcode::PrintI32
        | IrOpcode::PrintI64
        | IrOpcode::PrintU64
        | IrOpcode::PrintArgv
        | IrOpcode::PrintArgvUnsafe => {
            let (_, newline, stderr) = decode_print_imm(imm);
            format!("{:?}{}", instr.op, print_suffix(newline, stderr))
        }
        op => format!("{:?}", op),
    }
}

/// Structural problems in a module: bad entry index, jump targets past the
/// end of a function, string indices outside the table
pub fn validate_ir(module: &IrModule) -> Vec<String> {
    let mut issues = Vec::new();
    if module.entry().is_none() {
        issues.push(format!("entry index {} out of range", module.entry_index));
    }
    for function in &module.functions {
        let len = function.instructions.len() as u64;
        for (i, instr) in function.instructions.iter().enumerate() {
            if instr.op.is_jump() && instr.imm > len {
                issues.push(format!("{}@{}: jump target {} out of range", function.name, i, instr.imm));
            }
            if instr.op == IrOpcode::PrintString {
                let (index, _, _) = decode_print_imm(instr.imm);
                if index as usize >= module.string_table.len() {
                    issues.push(format!("{}@{}: string index {} out of range", function.name, i, index));
                }
            }
            if instr.op == IrOpcode::LoadStringByte && instr.imm as usize >= module.string_table.len() {
                issues.push(format!("{}@{}: string index {} out of range", function.name, i, instr.imm));
            }
        }
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{encode_print_string, IrFunction};

    #[test]
    fn test_format_and_dump() {
        let strings = vec!["hi".to_string()];
        let print = IrInstruction::new(IrOpcode::PrintString, encode_print_string(0, true, false));
        assert_eq!(format_ir_instr(&print, &strings), "print.str \"hi\" +nl");
        assert_eq!(
            format_ir_instr(&IrInstruction::new(IrOpcode::PushI32, (-4i64) as u64), &strings),
            "push.i32 -4"
        );

        let module = IrModule {
            functions: vec![IrFunction::new("/main", vec![print, IrInstruction::op(IrOpcode::ReturnVoid)])],
            string_table: strings,
            entry_index: 0,
        };
        let dump = dump_ir(&module);
        assert!(dump.contains("fn /main (2 instructions)"));
        assert!(dump.contains("0001: ReturnVoid"));
        assert!(validate_ir(&module).is_empty());
    }

    #[test]
    fn test_validate_reports_bad_targets() {
        let module = IrModule {
            functions: vec![IrFunction::new(
                "/main",
                vec![
                    IrInstruction::new(IrOpcode::Jump, 9),
                    IrInstruction::new(IrOpcode::PrintString, encode_print_string(3, false, false)),
                    IrInstruction::new(IrOpcode::LoadStringByte, 0),
                ],
            )],
            string_table: Vec::new(),
            entry_index: 1,
        };
        let issues = validate_ir(&module);
        assert_eq!(issues.len(), 4);
        assert!(issues[1].contains("jump target 9"));
        assert_eq!(issues[3], "/main@2: string index 0 out of range");
        assert_eq!(
            format_ir_instr(&IrInstruction::new(IrOpcode::LoadStringByte, 0), &["ab".to_string()]),
            "str.byte \"ab\""
        );
    }
}
