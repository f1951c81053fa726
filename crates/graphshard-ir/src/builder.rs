//! Builder for assembling functions block by block.

use crate::attr::{AttrValue, Attribute};
use crate::function::{Block, GraphFunction, Operation, Terminator};

/// Chained builder over [`GraphFunction`].
///
/// Opens with an implicit `entry` block; each terminator call closes the
/// current block, and `block` opens the next one.
#[derive(Debug)]
pub struct FunctionBuilder {
    name: String,
    blocks: Vec<Block>,
    current_label: String,
    current_ops: Vec<Operation>,
}

impl FunctionBuilder {
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self {
            name: name.into(),
            blocks: Vec::new(),
            current_label: "entry".into(),
            current_ops: Vec::new(),
        }
    }

    /// Appends an operation to the current block.
    pub fn add_op<N, T>(
        mut self,
        name: N,
        op_type: T,
        operands: &[&str],
        attributes: Vec<Attribute>,
    ) -> Self
    where
        N: Into<String>,
        T: Into<String>,
    {
        let operands = operands.iter().map(|s| s.to_string()).collect();
        let mut op = Operation::new(name, op_type, operands);
        op.attributes = attributes;
        self.current_ops.push(op);
        self
    }

    /// Shorthand for a zero-operand constant with a value attribute.
    pub fn add_const<N: Into<String>>(self, name: N, value: AttrValue) -> Self {
        self.add_op(name, "Const", &[], vec![Attribute::new("value", value)])
    }

    pub fn branch<T: Into<String>>(self, target: T) -> Self {
        let target = target.into();
        self.terminate(Terminator::Branch { target })
    }

    pub fn cond_branch<C, T, F>(self, condition: C, true_target: T, false_target: F) -> Self
    where
        C: Into<String>,
        T: Into<String>,
        F: Into<String>,
    {
        self.terminate(Terminator::CondBranch {
            condition: condition.into(),
            true_target: true_target.into(),
            false_target: false_target.into(),
        })
    }

    pub fn ret(self, value: Option<&str>) -> Self {
        self.terminate(Terminator::Return(value.map(|v| v.to_string())))
    }

    /// Opens a new block. Must follow a terminator call.
    pub fn block<L: Into<String>>(mut self, label: L) -> Self {
        self.current_label = label.into();
        self
    }

    fn terminate(mut self, terminator: Terminator) -> Self {
        self.blocks.push(Block {
            label: std::mem::take(&mut self.current_label),
            ops: std::mem::take(&mut self.current_ops),
            terminator,
        });
        self
    }

    /// Finishes the function. Any trailing unterminated block is closed with
    /// a bare `return`.
    pub fn build(mut self) -> GraphFunction {
        if !self.current_ops.is_empty() || self.blocks.is_empty() {
            self.blocks.push(Block {
                label: std::mem::take(&mut self.current_label),
                ops: std::mem::take(&mut self.current_ops),
                terminator: Terminator::Return(None),
            });
        }
        GraphFunction::new(self.name, self.blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_block_build() {
        let function = FunctionBuilder::new("f")
            .add_const("c", AttrValue::Int(7))
            .ret(Some("c"))
            .build();
        assert_eq!(function.blocks.len(), 1);
        assert_eq!(function.blocks[0].label, "entry");
        assert_eq!(function.op_count(), 1);
    }

    #[test]
    fn test_multi_block_build() {
        let function = FunctionBuilder::new("f")
            .add_const("flag", AttrValue::Bool(true))
            .cond_branch("flag", "then", "done")
            .block("then")
            .add_op("x", "Identity", &["flag"], vec![])
            .branch("done")
            .block("done")
            .ret(None)
            .build();
        assert_eq!(function.blocks.len(), 3);
        assert_eq!(function.blocks[1].label, "then");
        assert!(matches!(
            function.blocks[0].terminator,
            Terminator::CondBranch { .. }
        ));
    }
}
