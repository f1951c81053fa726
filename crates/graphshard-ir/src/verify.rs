//! Structural verification, the second line of defense after placement.

use crate::function::GraphFunction;
use anyhow::{bail, Result};
use std::collections::HashSet;
use tracing::debug;

/// Verifies structural invariants of a function:
///
/// - operation names are unique,
/// - no operation carries two attributes with the same name (placement runs
///   append-only, so a duplicated `__device` attribute means the policy was
///   invoked twice for one operation),
/// - every operand and terminator value names an operation in the function,
/// - every branch target names a block in the function.
pub fn verify(function: &GraphFunction) -> Result<()> {
    let mut op_names = HashSet::new();
    for op in function.operations() {
        if !op_names.insert(op.name.as_str()) {
            bail!("function {}: duplicate operation name {}", function.name, op.name);
        }
        let mut attr_names = HashSet::new();
        for attribute in &op.attributes {
            if !attr_names.insert(attribute.name.as_str()) {
                bail!(
                    "function {}: operation {} carries duplicate attribute {}",
                    function.name,
                    op.name,
                    attribute.name
                );
            }
        }
    }

    let block_labels: HashSet<&str> = function
        .blocks
        .iter()
        .map(|block| block.label.as_str())
        .collect();

    for block in &function.blocks {
        for op in &block.ops {
            for operand in &op.operands {
                if !op_names.contains(operand.as_str()) {
                    bail!(
                        "function {}: operation {} reads undefined value {}",
                        function.name,
                        op.name,
                        operand
                    );
                }
            }
        }
        if let Some(value) = block.terminator.consumed_value() {
            if !op_names.contains(value) {
                bail!(
                    "function {}: block {} terminator reads undefined value {}",
                    function.name,
                    block.label,
                    value
                );
            }
        }
        for target in block.terminator.targets() {
            if !block_labels.contains(target) {
                bail!(
                    "function {}: block {} branches to unknown block {}",
                    function.name,
                    block.label,
                    target
                );
            }
        }
    }

    debug!(function = %function.name, ops = function.op_count(), "verified function");
    Ok(())
}
