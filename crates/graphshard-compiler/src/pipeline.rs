//! Placement-then-partitioning pipeline assembly.

use anyhow::Result;
use graphshard_devices::{DeviceType, KernelRegistry, DEVICE_ATTR};
use graphshard_ir::{verify, AttrValue, GraphFunction};
use graphshard_placement::{DevicePartitioner, GraphFunctionDeviceInfo, TransferIdAllocator};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Verify the placed source function and every extracted sub-function.
    pub verify: bool,
    /// Delete the device-configuration marker while resolving device info.
    pub remove_config_op: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            verify: true,
            remove_config_op: true,
        }
    }
}

/// Output of one pipeline run: the fully placed source function and its
/// per-device sub-functions, ordered by device ordinal.
#[derive(Debug)]
pub struct PartitionArtifacts {
    pub source: GraphFunction,
    pub per_device: Vec<(DeviceType, GraphFunction)>,
}

pub struct CompilerPipeline {
    config: CompilerConfig,
    registry: Arc<KernelRegistry>,
}

impl CompilerPipeline {
    pub fn new(config: CompilerConfig) -> Self {
        Self::with_registry(config, Arc::new(KernelRegistry::with_default_kernels()))
    }

    pub fn with_registry(config: CompilerConfig, registry: Arc<KernelRegistry>) -> Self {
        Self { config, registry }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Places every operation of `function`, then extracts one sub-function
    /// per used device.
    pub fn partition(&self, mut function: GraphFunction) -> Result<PartitionArtifacts> {
        let mut device_info = GraphFunctionDeviceInfo::get_for_function(
            &mut function,
            Arc::clone(&self.registry),
            self.config.remove_config_op,
        )?;
        place_all(&mut function, &mut device_info)?;
        if self.config.verify {
            verify(&function)?;
        }

        let mut transfer_ids = TransferIdAllocator::new();
        let partitioner = DevicePartitioner::new(&function, &device_info, &mut transfer_ids)?;
        let mut per_device = Vec::new();
        for device in device_info.used_device_types().collect::<Vec<_>>() {
            let extracted = partitioner.extract_function_for_device(device)?;
            if self.config.verify {
                verify(&extracted)?;
            }
            per_device.push((device, extracted));
        }

        info!(
            function = %function.name,
            devices = per_device.len(),
            "partitioned function"
        );
        Ok(PartitionArtifacts {
            source: function,
            per_device,
        })
    }
}

/// The placement pass: one `handle_device_placement` call per operation that
/// does not already carry a device attribute. An optional plain `device`
/// attribute on the operation serves as the authoritative hint.
fn place_all(function: &mut GraphFunction, device_info: &mut GraphFunctionDeviceInfo) -> Result<()> {
    for op in function.operations_mut() {
        if op.has_attr(DEVICE_ATTR) {
            // Already placed; its device was marked used during device-info
            // resolution.
            continue;
        }
        let hint = op
            .attr("device")
            .and_then(AttrValue::as_str)
            .unwrap_or("")
            .to_string();
        let op_type = op.op_type.clone();
        let mut attributes = std::mem::take(&mut op.attributes);
        device_info.handle_device_placement(&op_type, &hint, &mut attributes)?;
        op.attributes = attributes;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphshard_ir::{Attribute, FunctionBuilder};
    use graphshard_placement::CONFIGURE_GPU_OP;

    #[test]
    fn test_partition_places_every_op() {
        let function = FunctionBuilder::new("f")
            .add_op("config", CONFIGURE_GPU_OP, &[], vec![])
            .add_const("a", AttrValue::Int(1))
            .add_op("sum", "Add", &["a", "a"], vec![])
            .ret(Some("sum"))
            .build();
        let artifacts = CompilerPipeline::new(CompilerConfig::default())
            .partition(function)
            .unwrap();
        assert!(artifacts
            .source
            .operations()
            .all(|op| op.has_attr(DEVICE_ATTR)));
        // Everything landed on the GPU primary; one sub-function, no config op.
        assert_eq!(artifacts.per_device.len(), 1);
        assert_eq!(artifacts.per_device[0].0, DeviceType::Gpu);
        assert!(artifacts.source.find_op("config").is_none());
    }

    #[test]
    fn test_device_hint_is_respected() {
        let function = FunctionBuilder::new("hinted")
            .add_op(
                "pinned",
                "Const",
                &[],
                vec![Attribute::new(
                    "device",
                    AttrValue::Str("/device:GPU:0".into()),
                )],
            )
            .ret(None)
            .build();
        let artifacts = CompilerPipeline::new(CompilerConfig::default())
            .partition(function)
            .unwrap();
        let pinned = artifacts.source.find_op("pinned").unwrap();
        assert_eq!(
            pinned.attr(DEVICE_ATTR),
            Some(&AttrValue::Str("/device:GPU:0".into()))
        );
    }

    #[test]
    fn test_duplicate_device_attr_caught_by_verification() {
        let mut function = FunctionBuilder::new("dup")
            .add_const("a", AttrValue::Int(1))
            .ret(None)
            .build();
        let op = &mut function.blocks[0].ops[0];
        op.append_attr(DEVICE_ATTR, AttrValue::Str("/device:CPU:0".into()));
        op.append_attr(DEVICE_ATTR, AttrValue::Str("/device:CPU:0".into()));
        assert!(CompilerPipeline::new(CompilerConfig::default())
            .partition(function)
            .is_err());
    }
}
