//! IR function and module definitions

use super::instruction::IrInstruction;
use serde::{Deserialize, Serialize};

/// A lowered function
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IrFunction {
    /// Full definition path
    pub name: String,
    /// Flat instruction sequence; jumps hold absolute indices into it
    pub instructions: Vec<IrInstruction>,
}

impl IrFunction {
    /// Create a function
    pub fn new(name: &str, instructions: Vec<IrInstruction>) -> Self {
        Self {
            name: name.to_string(),
            instructions,
        }
    }
}

/// Complete IR module
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IrModule {
    /// Functions; the entry is `functions[entry_index]`
    pub functions: Vec<IrFunction>,
    /// Deduplicated string literals referenced by print immediates
    pub string_table: Vec<String>,
    /// Index of the entry function
    pub entry_index: u32,
}

impl IrModule {
    /// Create an empty module
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `text` in the string table, appending it if new
    pub fn intern(&mut self, text: &str) -> u32 {
        if let Some(index) = self.string_table.iter().position(|s| s == text) {
            return index as u32;
        }
        self.string_table.push(text.to_string());
        (self.string_table.len() - 1) as u32
    }

    /// The entry function, if `entry_index` is valid
    pub fn entry(&self) -> Option<&IrFunction> {
        self.functions.get(self.entry_index as usize)
    }

    /// Total instructions across all functions
    pub fn instruction_count(&self) -> usize {
        self.functions.iter().map(|f| f.instructions.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_deduplicates() {
        let mut module = IrModule::new();
        assert_eq!(module.intern("hello"), 0);
        assert_eq!(module.intern("world"), 1);
        assert_eq!(module.intern("hello"), 0);
        assert_eq!(module.string_table.len(), 2);
    }

    #[test]
    fn test_entry_lookup() {
        let mut module = IrModule::new();
        assert!(module.entry().is_none());
        module.functions.push(IrFunction::new("/main", Vec::new()));
        assert_eq!(module.entry().unwrap().name, "/main");
        assert_eq!(module.instruction_count(), 0);
    }
}
