//! Runtime execution of lowered IR

mod vm;

pub use vm::{Vm, VmOutput, DEFAULT_STEP_LIMIT};
