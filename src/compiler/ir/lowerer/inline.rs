//! Inline expansion of user calls
//!
//! The native backend has no call instruction: every call site receives a
//! copy of the callee body with fresh locals for its parameters. A `return`
//! inside the copy stores into a dedicated slot and jumps to the end of the
//! expansion. A definition already being expanded cannot be expanded again,
//! which rules out direct and mutual recursion.

use super::{InlineContext, IrLowerer, LocalMap};
use crate::compiler::ir::instruction::IrOpcode;
use crate::parser::{Call, Definition};
use crate::types::effects;
use crate::types::numeric::NumericWidth;
use crate::types::{binding_default, call_parameters, order_call_arguments, ValueKind};
use crate::{Error, Result};

impl<'a> IrLowerer<'a> {
    /// Expand `callee` at the current position
    ///
    /// Returns the kind of the produced value, `None` for void callees. With
    /// `require_value` the value is left on the stack.
    pub(super) fn emit_inline_call(
        &mut self,
        call: &Call,
        callee: &'a Definition,
        caller_locals: &LocalMap,
        require_value: bool,
    ) -> Result<Option<ValueKind>> {
        let path = callee.full_path.as_str();
        if self.inline_stack.contains(path) {
            return Err(Error::lowering(format!("native backend does not support recursive calls: {}", path)));
        }
        if call.body.is_some() {
            return Err(Error::lowering("native backend does not support block arguments on calls"));
        }

        let params = call_parameters(callee)?;
        let args = order_call_arguments(path, &params, &call.args, &call.arg_names)?;

        if callee.is_struct() {
            // Struct values carry no runtime payload in this backend.
            if require_value {
                self.emit(IrOpcode::PushI32, 0);
            }
            return Ok(Some(ValueKind::Int32));
        }

        let returns = self.return_info(callee)?;
        if require_value && returns.returns_void {
            return Err(Error::lowering(format!("void call not allowed in expression context: {}", path)));
        }
        let callee_effects = effects::resolve_active_effects(&callee.transforms, &self.default_effects, path)?;
        tracing::trace!(callee = %path, depth = self.inline_stack.len(), "inlining call");

        let caller_path = self.current_path();
        let mut callee_locals = LocalMap::new();
        for (param, arg) in params.iter().zip(&args) {
            let is_default = binding_default(param).is_some_and(|d| std::ptr::eq(d, *arg));
            let (eval, from) = if is_default {
                (&callee_locals, path)
            } else {
                (caller_locals, caller_path.as_str())
            };
            let (name, info) = self.bind_local(param, Some(*arg), eval, from, true)?;
            callee_locals.insert(name, info);
        }

        let return_local = if returns.returns_void {
            None
        } else {
            let slot = self.alloc_local();
            let width = NumericWidth::of(returns.kind).unwrap_or(NumericWidth::I32);
            self.push_const(width, 0);
            self.store_local(slot);
            Some(slot)
        };
        let outer_ctx = self.inline_ctx.replace(InlineContext {
            def_path: path.to_string(),
            returns,
            return_local,
            return_jumps: Vec::new(),
        });
        let outer_effects = std::mem::replace(&mut self.active_effects, callee_effects);
        self.inline_stack.insert(path.to_string());

        let body = callee.body();
        let lowered = self.lower_statements(&body, &mut callee_locals);

        self.inline_stack.remove(path);
        self.active_effects = outer_effects;
        let ctx = std::mem::replace(&mut self.inline_ctx, outer_ctx);
        lowered?;

        if let Some(ctx) = ctx {
            for jump in ctx.return_jumps {
                self.patch_jump_here(jump);
            }
        }

        if returns.returns_void {
            return Ok(None);
        }
        let kind = match returns.kind {
            ValueKind::Unknown => ValueKind::Int32,
            kind => kind,
        };
        if require_value {
            if let Some(slot) = return_local {
                self.load_local(slot);
            }
        }
        Ok(Some(kind))
    }
}
