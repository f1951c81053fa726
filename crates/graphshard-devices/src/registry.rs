//! Kernel availability lookup, keyed by operation type and device.

use crate::device::{DeviceType, UsedDeviceSet};
use std::collections::HashMap;

/// Answers whether a kernel exists for an operation type on a device.
///
/// Operation types with no entry are treated as available on every concrete
/// device, so callers only need to register the restricted ones.
#[derive(Debug, Clone, Default)]
pub struct KernelRegistry {
    kernels: HashMap<String, UsedDeviceSet>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A realistic default table: core math everywhere, host-side ops pinned
    /// to CPU, a few ops without TPU kernels.
    pub fn with_default_kernels() -> Self {
        let mut registry = Self::new();
        for op_type in ["Const", "Add", "Sub", "Mul", "MatMul", "Relu", "Identity", "Mean"] {
            registry.register(op_type, &DeviceType::CONCRETE);
        }
        for op_type in ["Print", "Assert", "StringJoin", "EncodeJson"] {
            registry.register(op_type, &[DeviceType::Cpu]);
        }
        for op_type in ["RandomUniform", "TopKV2"] {
            registry.register(op_type, &[DeviceType::Cpu, DeviceType::Gpu]);
        }
        registry
    }

    pub fn register(&mut self, op_type: &str, devices: &[DeviceType]) {
        let entry = self.kernels.entry(op_type.to_string()).or_default();
        for device in devices {
            entry.insert(*device);
        }
    }

    /// Returns true if a kernel for `op_type` exists on `device`.
    pub fn supports(&self, op_type: &str, device: DeviceType) -> bool {
        match self.kernels.get(op_type) {
            Some(devices) => devices.contains(device),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unregistered_op_is_available_everywhere() {
        let registry = KernelRegistry::with_default_kernels();
        for device in DeviceType::CONCRETE {
            assert!(registry.supports("SomeCustomOp", device));
        }
    }

    #[test]
    fn test_cpu_only_op() {
        let registry = KernelRegistry::with_default_kernels();
        assert!(registry.supports("Print", DeviceType::Cpu));
        assert!(!registry.supports("Print", DeviceType::Gpu));
        assert!(!registry.supports("Print", DeviceType::Tpu));
    }

    #[test]
    fn test_register_accumulates_devices() {
        let mut registry = KernelRegistry::new();
        registry.register("Scan", &[DeviceType::Cpu]);
        registry.register("Scan", &[DeviceType::Gpu]);
        assert!(registry.supports("Scan", DeviceType::Gpu));
        assert!(!registry.supports("Scan", DeviceType::Tpu));
    }
}
