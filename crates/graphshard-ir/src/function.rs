//! Functions, blocks, and operations.
//!
//! Every operation produces exactly one result value, named after the
//! operation itself; operands reference producer operations by name. This
//! keeps the graph flat and serializable while still supporting explicit
//! control flow through block terminators.

use crate::attr::{AttrValue, Attribute};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// A single operation instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    /// Unique within the function; also names the operation's result value.
    pub name: String,
    /// Kernel-level operation type, e.g. "Const" or "Add".
    pub op_type: String,
    /// Names of the operations producing each input value, in order.
    pub operands: Vec<String>,
    /// Ordered, appendable attribute list.
    pub attributes: Vec<Attribute>,
}

impl Operation {
    pub fn new<N, T>(name: N, op_type: T, operands: Vec<String>) -> Self
    where
        N: Into<String>,
        T: Into<String>,
    {
        Self {
            name: name.into(),
            op_type: op_type.into(),
            operands,
            attributes: Vec::new(),
        }
    }

    /// Returns the first attribute value with the given name, if any.
    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attributes
            .iter()
            .find(|attr| attr.name == name)
            .map(|attr| &attr.value)
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attributes.iter().any(|attr| attr.name == name)
    }

    /// Appends an attribute without checking for duplicates; the verifier
    /// rejects duplicated reserved attributes downstream.
    pub fn append_attr<N: Into<String>>(&mut self, name: N, value: AttrValue) {
        self.attributes.push(Attribute::new(name, value));
    }

    pub fn with_attr<N: Into<String>>(mut self, name: N, value: AttrValue) -> Self {
        self.append_attr(name, value);
        self
    }
}

/// Block terminator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Terminator {
    /// Return an optional value to the caller.
    Return(Option<String>),
    /// Unconditional jump.
    Branch { target: String },
    /// Two-way branch on a produced value.
    CondBranch {
        condition: String,
        true_target: String,
        false_target: String,
    },
}

impl Terminator {
    /// The value this terminator consumes, if any.
    pub fn consumed_value(&self) -> Option<&str> {
        match self {
            Terminator::Return(value) => value.as_deref(),
            Terminator::Branch { .. } => None,
            Terminator::CondBranch { condition, .. } => Some(condition),
        }
    }

    pub fn targets(&self) -> Vec<&str> {
        match self {
            Terminator::Return(_) => Vec::new(),
            Terminator::Branch { target } => vec![target],
            Terminator::CondBranch {
                true_target,
                false_target,
                ..
            } => vec![true_target, false_target],
        }
    }
}

/// A basic block: ordered operations plus a terminator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub label: String,
    pub ops: Vec<Operation>,
    pub terminator: Terminator,
}

/// A function over the graph IR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphFunction {
    pub name: String,
    pub blocks: Vec<Block>,
}

impl GraphFunction {
    pub fn new<N: Into<String>>(name: N, blocks: Vec<Block>) -> Self {
        Self {
            name: name.into(),
            blocks,
        }
    }

    /// Enumerates every operation in program order (block order, then
    /// operation order within each block).
    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.blocks.iter().flat_map(|block| block.ops.iter())
    }

    pub fn operations_mut(&mut self) -> impl Iterator<Item = &mut Operation> {
        self.blocks.iter_mut().flat_map(|block| block.ops.iter_mut())
    }

    pub fn find_op(&self, name: &str) -> Option<&Operation> {
        self.operations().find(|op| op.name == name)
    }

    /// Deletes the named operation. Returns true if an operation was removed.
    pub fn remove_op(&mut self, name: &str) -> bool {
        for block in &mut self.blocks {
            if let Some(index) = block.ops.iter().position(|op| op.name == name) {
                block.ops.remove(index);
                return true;
            }
        }
        false
    }

    pub fn op_count(&self) -> usize {
        self.blocks.iter().map(|block| block.ops.len()).sum()
    }

    /// Renders the function as a compact textual listing.
    pub fn to_text(&self) -> String {
        let mut text = String::new();
        let _ = writeln!(text, "func @{} {{", self.name);
        for block in &self.blocks {
            let _ = writeln!(text, "  ^{}:", block.label);
            for op in &block.ops {
                let operands = op.operands.join(", ");
                let mut attrs = String::new();
                for attribute in &op.attributes {
                    if !attrs.is_empty() {
                        attrs.push_str(", ");
                    }
                    let _ = write!(attrs, "{} = {}", attribute.name, render_value(&attribute.value));
                }
                if attrs.is_empty() {
                    let _ = writeln!(text, "    %{} = {}({})", op.name, op.op_type, operands);
                } else {
                    let _ = writeln!(
                        text,
                        "    %{} = {}({}) {{{}}}",
                        op.name, op.op_type, operands, attrs
                    );
                }
            }
            match &block.terminator {
                Terminator::Return(Some(value)) => {
                    let _ = writeln!(text, "    return %{}", value);
                }
                Terminator::Return(None) => {
                    let _ = writeln!(text, "    return");
                }
                Terminator::Branch { target } => {
                    let _ = writeln!(text, "    br ^{}", target);
                }
                Terminator::CondBranch {
                    condition,
                    true_target,
                    false_target,
                } => {
                    let _ = writeln!(
                        text,
                        "    cond_br %{}, ^{}, ^{}",
                        condition, true_target, false_target
                    );
                }
            }
        }
        text.push_str("}\n");
        text
    }
}

fn render_value(value: &AttrValue) -> String {
    match value {
        AttrValue::Str(s) => format!("\"{}\"", s),
        AttrValue::Int(v) => v.to_string(),
        AttrValue::Float(v) => format!("{:?}", v),
        AttrValue::Bool(v) => v.to_string(),
        AttrValue::Shape(dims) => format!("shape{:?}", dims),
        AttrValue::ShapeArray(shapes) => format!("shapes{:?}", shapes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_op_function() -> GraphFunction {
        GraphFunction::new(
            "main",
            vec![Block {
                label: "entry".into(),
                ops: vec![
                    Operation::new("a", "Const", vec![])
                        .with_attr("value", AttrValue::Int(1)),
                    Operation::new("sum", "Add", vec!["a".into(), "a".into()]),
                ],
                terminator: Terminator::Return(Some("sum".into())),
            }],
        )
    }

    #[test]
    fn test_operations_in_program_order() {
        let function = two_op_function();
        let names: Vec<_> = function.operations().map(|op| op.name.as_str()).collect();
        assert_eq!(names, ["a", "sum"]);
    }

    #[test]
    fn test_remove_op() {
        let mut function = two_op_function();
        assert!(function.remove_op("a"));
        assert!(!function.remove_op("a"));
        assert_eq!(function.op_count(), 1);
    }

    #[test]
    fn test_text_rendering_mentions_ops_and_terminator() {
        let text = two_op_function().to_text();
        assert!(text.contains("%sum = Add(a, a)"));
        assert!(text.contains("return %sum"));
    }

    #[test]
    fn test_json_round_trip() {
        let function = two_op_function();
        let json = serde_json::to_string(&function).unwrap();
        let parsed: GraphFunction = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.op_count(), function.op_count());
        assert_eq!(parsed.blocks[0].label, "entry");
    }
}
