//! Reference interpreter for lowered IR
//!
//! Executes the entry function of an [`IrModule`] over a `u64` operand stack.
//! Output is captured rather than written to the process streams, so tests
//! can compare it directly.

use crate::compiler::ir::{decode_print_imm, IrModule, IrOpcode};
use crate::{Error, Result};

/// Default bound on executed instructions
pub const DEFAULT_STEP_LIMIT: u64 = 10_000_000;

const MAX_LOCALS: usize = 1 << 20;

/// Result of running a module
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VmOutput {
    /// Raw returned value; `None` after `ReturnVoid`
    pub return_value: Option<u64>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl VmOutput {
    /// Return value read as an i32
    pub fn as_i32(&self) -> Option<i32> {
        self.return_value.map(|v| v as u32 as i32)
    }

    /// Return value read as an i64
    pub fn as_i64(&self) -> Option<i64> {
        self.return_value.map(|v| v as i64)
    }

    /// Return value read as an f32
    pub fn as_f32(&self) -> Option<f32> {
        self.return_value.map(|v| f32::from_bits(v as u32))
    }

    /// Return value read as an f64
    pub fn as_f64(&self) -> Option<f64> {
        self.return_value.map(f64::from_bits)
    }
}

fn i32_of(v: u64) -> i32 {
    v as u32 as i32
}

fn from_i32(v: i32) -> u64 {
    v as i64 as u64
}

fn f32_of(v: u64) -> f32 {
    f32::from_bits(v as u32)
}

fn from_f32(v: f32) -> u64 {
    v.to_bits() as u64
}

fn flag(b: bool) -> u64 {
    b as u64
}

/// Stack VM over one module
pub struct Vm<'m> {
    module: &'m IrModule,
    step_limit: u64,
}

impl<'m> Vm<'m> {
    /// Create a VM for `module`
    pub fn new(module: &'m IrModule) -> Self {
        Self {
            module,
            step_limit: DEFAULT_STEP_LIMIT,
        }
    }

    /// Bound the number of executed instructions
    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = limit;
        self
    }

    /// Run the entry function with `args` as the process arguments
    pub fn run(&self, args: &[String]) -> Result<VmOutput> {
        let function = self
            .module
            .entry()
            .ok_or_else(|| Error::execution("invalid IR entry index"))?;
        let code = &function.instructions;

        let local_count = code
            .iter()
            .filter(|i| matches!(i.op, IrOpcode::LoadLocal | IrOpcode::StoreLocal | IrOpcode::AddressOfLocal))
            .map(|i| (i.imm as usize).saturating_add(1))
            .max()
            .unwrap_or(0);
        if local_count > MAX_LOCALS {
            return Err(Error::execution(format!("too many locals in IR: {}", local_count)));
        }
        let mut locals = vec![0u64; local_count];
        let mut stack: Vec<u64> = Vec::with_capacity(64);
        let mut out = VmOutput::default();
        let mut pc = 0usize;
        let mut steps = 0u64;

        tracing::debug!(function = %function.name, instructions = code.len(), locals = local_count, "vm start");

        macro_rules! pop {
            () => {
                stack
                    .pop()
                    .ok_or_else(|| Error::execution(format!("stack underflow in IR at {}", pc)))?
            };
        }
        macro_rules! binary {
            ($conv:expr, $op:expr) => {{
                let rhs = $conv(pop!());
                let lhs = $conv(pop!());
                stack.push($op(lhs, rhs));
            }};
        }

        while pc < code.len() {
            steps += 1;
            if steps > self.step_limit {
                return Err(Error::execution("step limit exceeded in IR"));
            }
            let instr = code[pc];
            tracing::trace!(pc, op = ?instr.op, imm = instr.imm, depth = stack.len(), "vm step");
            pc += 1;

            match instr.op {
                // =============================================================
                // STACK AND LOCALS
                // =============================================================
                IrOpcode::PushI32 => stack.push(from_i32(instr.imm as i64 as i32)),
                IrOpcode::PushI64 | IrOpcode::PushF64 => stack.push(instr.imm),
                IrOpcode::PushF32 => stack.push(instr.imm & 0xffff_ffff),
                IrOpcode::Pop => {
                    pop!();
                }
                IrOpcode::Dup => {
                    let top = pop!();
                    stack.push(top);
                    stack.push(top);
                }
                IrOpcode::LoadLocal => stack.push(locals[instr.imm as usize]),
                IrOpcode::StoreLocal => locals[instr.imm as usize] = pop!(),
                IrOpcode::AddressOfLocal => stack.push(instr.imm.wrapping_mul(16)),
                IrOpcode::LoadIndirect => {
                    let slot = Self::slot_of(pop!(), locals.len())?;
                    stack.push(locals[slot]);
                }
                IrOpcode::StoreIndirect => {
                    let value = pop!();
                    let slot = Self::slot_of(pop!(), locals.len())?;
                    locals[slot] = value;
                    stack.push(value);
                }

                // =============================================================
                // ARITHMETIC
                // =============================================================
                IrOpcode::AddI32 => binary!(i32_of, |a: i32, b: i32| from_i32(a.wrapping_add(b))),
                IrOpcode::SubI32 => binary!(i32_of, |a: i32, b: i32| from_i32(a.wrapping_sub(b))),
                IrOpcode::MulI32 => binary!(i32_of, |a: i32, b: i32| from_i32(a.wrapping_mul(b))),
                IrOpcode::DivI32 => {
                    let rhs = i32_of(pop!());
                    let lhs = i32_of(pop!());
                    if rhs == 0 {
                        return Err(Error::execution("division by zero in IR"));
                    }
                    stack.push(from_i32(lhs.wrapping_div(rhs)));
                }
                IrOpcode::NegI32 => {
                    let v = i32_of(pop!());
                    stack.push(from_i32(v.wrapping_neg()));
                }
                IrOpcode::AddI64 => binary!(|v| v, |a: u64, b: u64| a.wrapping_add(b)),
                IrOpcode::SubI64 => binary!(|v| v, |a: u64, b: u64| a.wrapping_sub(b)),
                IrOpcode::MulI64 => binary!(|v| v, |a: u64, b: u64| a.wrapping_mul(b)),
                IrOpcode::DivI64 => {
                    let rhs = pop!() as i64;
                    let lhs = pop!() as i64;
                    if rhs == 0 {
                        return Err(Error::execution("division by zero in IR"));
                    }
                    stack.push(lhs.wrapping_div(rhs) as u64);
                }
                IrOpcode::NegI64 => {
                    let v = pop!() as i64;
                    stack.push(v.wrapping_neg() as u64);
                }
                IrOpcode::DivU64 => {
                    let rhs = pop!();
                    let lhs = pop!();
                    if rhs == 0 {
                        return Err(Error::execution("division by zero in IR"));
                    }
                    stack.push(lhs / rhs);
                }
                IrOpcode::AddF32 => binary!(f32_of, |a: f32, b: f32| from_f32(a + b)),
                IrOpcode::SubF32 => binary!(f32_of, |a: f32, b: f32| from_f32(a - b)),
                IrOpcode::MulF32 => binary!(f32_of, |a: f32, b: f32| from_f32(a * b)),
                IrOpcode::DivF32 => binary!(f32_of, |a: f32, b: f32| from_f32(a / b)),
                IrOpcode::NegF32 => {
                    let v = f32_of(pop!());
                    stack.push(from_f32(-v));
                }
                IrOpcode::AddF64 => binary!(f64::from_bits, |a: f64, b: f64| (a + b).to_bits()),
                IrOpcode::SubF64 => binary!(f64::from_bits, |a: f64, b: f64| (a - b).to_bits()),
                IrOpcode::MulF64 => binary!(f64::from_bits, |a: f64, b: f64| (a * b).to_bits()),
                IrOpcode::DivF64 => binary!(f64::from_bits, |a: f64, b: f64| (a / b).to_bits()),
                IrOpcode::NegF64 => {
                    let v = f64::from_bits(pop!());
                    stack.push((-v).to_bits());
                }

                // =============================================================
                // COMPARISONS
                // =============================================================
                IrOpcode::CmpEqI32 => binary!(i32_of, |a: i32, b: i32| flag(a == b)),
                IrOpcode::CmpNeI32 => binary!(i32_of, |a: i32, b: i32| flag(a != b)),
                IrOpcode::CmpLtI32 => binary!(i32_of, |a: i32, b: i32| flag(a < b)),
                IrOpcode::CmpLeI32 => binary!(i32_of, |a: i32, b: i32| flag(a <= b)),
                IrOpcode::CmpGtI32 => binary!(i32_of, |a: i32, b: i32| flag(a > b)),
                IrOpcode::CmpGeI32 => binary!(i32_of, |a: i32, b: i32| flag(a >= b)),
                IrOpcode::CmpEqI64 => binary!(|v| v, |a: u64, b: u64| flag(a == b)),
                IrOpcode::CmpNeI64 => binary!(|v| v, |a: u64, b: u64| flag(a != b)),
                IrOpcode::CmpLtI64 => binary!(|v: u64| v as i64, |a: i64, b: i64| flag(a < b)),
                IrOpcode::CmpLeI64 => binary!(|v: u64| v as i64, |a: i64, b: i64| flag(a <= b)),
                IrOpcode::CmpGtI64 => binary!(|v: u64| v as i64, |a: i64, b: i64| flag(a > b)),
                IrOpcode::CmpGeI64 => binary!(|v: u64| v as i64, |a: i64, b: i64| flag(a >= b)),
                IrOpcode::CmpLtU64 => binary!(|v| v, |a: u64, b: u64| flag(a < b)),
                IrOpcode::CmpLeU64 => binary!(|v| v, |a: u64, b: u64| flag(a <= b)),
                IrOpcode::CmpGtU64 => binary!(|v| v, |a: u64, b: u64| flag(a > b)),
                IrOpcode::CmpGeU64 => binary!(|v| v, |a: u64, b: u64| flag(a >= b)),
                IrOpcode::CmpEqF32 => binary!(f32_of, |a: f32, b: f32| flag(a == b)),
                IrOpcode::CmpNeF32 => binary!(f32_of, |a: f32, b: f32| flag(a != b)),
                IrOpcode::CmpLtF32 => binary!(f32_of, |a: f32, b: f32| flag(a < b)),
                IrOpcode::CmpLeF32 => binary!(f32_of, |a: f32, b: f32| flag(a <= b)),
                IrOpcode::CmpGtF32 => binary!(f32_of, |a: f32, b: f32| flag(a > b)),
                IrOpcode::CmpGeF32 => binary!(f32_of, |a: f32, b: f32| flag(a >= b)),
                IrOpcode::CmpEqF64 => binary!(f64::from_bits, |a: f64, b: f64| flag(a == b)),
                IrOpcode::CmpNeF64 => binary!(f64::from_bits, |a: f64, b: f64| flag(a != b)),
                IrOpcode::CmpLtF64 => binary!(f64::from_bits, |a: f64, b: f64| flag(a < b)),
                IrOpcode::CmpLeF64 => binary!(f64::from_bits, |a: f64, b: f64| flag(a <= b)),
                IrOpcode::CmpGtF64 => binary!(f64::from_bits, |a: f64, b: f64| flag(a > b)),
                IrOpcode::CmpGeF64 => binary!(f64::from_bits, |a: f64, b: f64| flag(a >= b)),

                // =============================================================
                // CONVERSIONS
                // =============================================================
                IrOpcode::ConvertI32ToF32 => {
                    let v = i32_of(pop!());
                    stack.push(from_f32(v as f32));
                }
                IrOpcode::ConvertI32ToF64 => {
                    let v = i32_of(pop!());
                    stack.push((v as f64).to_bits());
                }
                IrOpcode::ConvertI64ToF32 => {
                    let v = pop!() as i64;
                    stack.push(from_f32(v as f32));
                }
                IrOpcode::ConvertI64ToF64 => {
                    let v = pop!() as i64;
                    stack.push((v as f64).to_bits());
                }
                IrOpcode::ConvertU64ToF32 => {
                    let v = pop!();
                    stack.push(from_f32(v as f32));
                }
                IrOpcode::ConvertU64ToF64 => {
                    let v = pop!();
                    stack.push((v as f64).to_bits());
                }
                IrOpcode::ConvertF32ToI32 => {
                    let v = f32_of(pop!());
                    stack.push(from_i32(v as i32));
                }
                IrOpcode::ConvertF32ToI64 => {
                    let v = f32_of(pop!());
                    stack.push(v as i64 as u64);
                }
                IrOpcode::ConvertF32ToU64 => {
                    let v = f32_of(pop!());
                    stack.push(v as u64);
                }
                IrOpcode::ConvertF64ToI32 => {
                    let v = f64::from_bits(pop!());
                    stack.push(from_i32(v as i32));
                }
                IrOpcode::ConvertF64ToI64 => {
                    let v = f64::from_bits(pop!());
                    stack.push(v as i64 as u64);
                }
                IrOpcode::ConvertF64ToU64 => {
                    let v = f64::from_bits(pop!());
                    stack.push(v as u64);
                }
                IrOpcode::ConvertF32ToF64 => {
                    let v = f32_of(pop!());
                    stack.push((v as f64).to_bits());
                }
                IrOpcode::ConvertF64ToF32 => {
                    let v = f64::from_bits(pop!());
                    stack.push(from_f32(v as f32));
                }

                // =============================================================
                // CONTROL FLOW
                // =============================================================
                IrOpcode::Jump => pc = Self::target(instr.imm, code.len())?,
                IrOpcode::JumpIfZero => {
                    let cond = pop!();
                    let target = Self::target(instr.imm, code.len())?;
                    if cond == 0 {
                        pc = target;
                    }
                }
                IrOpcode::ReturnVoid => {
                    out.return_value = None;
                    return Ok(out);
                }
                IrOpcode::ReturnI32
                | IrOpcode::ReturnI64
                | IrOpcode::ReturnF32
                | IrOpcode::ReturnF64 => {
                    out.return_value = Some(pop!());
                    tracing::debug!(steps, "vm finished");
                    return Ok(out);
                }

                // =============================================================
                // ARGUMENTS AND OUTPUT
                // =============================================================
                IrOpcode::PushArgc => stack.push(args.len() as u64),
                IrOpcode::PrintString => {
                    let (index, newline, stderr) = decode_print_imm(instr.imm);
                    let text = self
                        .module
                        .string_table
                        .get(index as usize)
                        .ok_or_else(|| Error::execution(format!("invalid string index in IR: {}", index)))?;
                    Self::write(&mut out, text, newline, stderr);
                }
                IrOpcode::PrintI32 => {
                    let v = i32_of(pop!());
                    Self::write_flags(&mut out, &v.to_string(), instr.imm);
                }
                IrOpcode::PrintI64 => {
                    let v = pop!() as i64;
                    Self::write_flags(&mut out, &v.to_string(), instr.imm);
                }
                IrOpcode::PrintU64 => {
                    let v = pop!();
                    Self::write_flags(&mut out, &v.to_string(), instr.imm);
                }
                IrOpcode::PrintArgv | IrOpcode::PrintArgvUnsafe => {
                    let index = pop!();
                    let text = usize::try_from(index)
                        .ok()
                        .and_then(|i| args.get(i))
                        .ok_or_else(|| Error::execution("invalid argv index in IR"))?;
                    Self::write_flags(&mut out, text, instr.imm);
                }

                // =============================================================
                // STRINGS
                // =============================================================
                IrOpcode::LoadStringByte => {
                    let index = pop!();
                    let byte = self
                        .module
                        .string_table
                        .get(instr.imm as usize)
                        .and_then(|text| usize::try_from(index).ok().and_then(|i| text.as_bytes().get(i)))
                        .ok_or_else(|| Error::execution(format!("invalid string byte in IR: {}[{}]", instr.imm, index)))?;
                    stack.push(from_i32(*byte as i32));
                }
            }
        }

        Err(Error::execution("missing return in IR"))
    }

    fn target(imm: u64, len: usize) -> Result<usize> {
        usize::try_from(imm)
            .ok()
            .filter(|t| *t <= len)
            .ok_or_else(|| Error::execution(format!("invalid jump target in IR: {}", imm)))
    }

    fn slot_of(address: u64, local_count: usize) -> Result<usize> {
        let slot = (address / 16) as usize;
        if address % 16 != 0 || slot >= local_count {
            return Err(Error::execution(format!("invalid indirect address in IR: {}", address)));
        }
        Ok(slot)
    }

    fn write_flags(out: &mut VmOutput, text: &str, imm: u64) {
        let (_, newline, stderr) = decode_print_imm(imm);
        Self::write(out, text, newline, stderr);
    }

    fn write(out: &mut VmOutput, text: &str, newline: bool, stderr: bool) {
        let sink = if stderr { &mut out.stderr } else { &mut out.stdout };
        sink.push_str(text);
        if newline {
            sink.push('\n');
        }
    }
}
