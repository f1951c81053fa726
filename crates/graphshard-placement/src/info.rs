//! Per-function device info and the placement decision policy.

use anyhow::{bail, Result};
use graphshard_devices::{DeviceType, KernelRegistry, UsedDeviceSet, DEVICE_ATTR};
use graphshard_ir::{AttrValue, Attribute, GraphFunction};
use std::sync::Arc;
use tracing::debug;

/// Operation type of the CPU device-configuration marker.
pub const CONFIGURE_CPU_OP: &str = "ConfigureCpu";
/// Operation type of the GPU device-configuration marker.
pub const CONFIGURE_GPU_OP: &str = "ConfigureGpu";
/// Operation type of the TPU device-configuration marker; may carry a bool
/// `enable_infeed` attribute.
pub const CONFIGURE_TPU_OP: &str = "ConfigureTpu";

/// Device info for one function: the primary device, whether TPU infeed is
/// enabled, and the set of devices actually occupied by its operations.
///
/// Built once per function via [`GraphFunctionDeviceInfo::get_for_function`],
/// mutated by the placement pass, then consumed read-only by the partitioner.
pub struct GraphFunctionDeviceInfo {
    primary_device: DeviceType,
    tpu_infeed_enabled: bool,
    used: UsedDeviceSet,
    registry: Arc<KernelRegistry>,
}

impl GraphFunctionDeviceInfo {
    fn new(
        primary_device: DeviceType,
        tpu_infeed_enabled: bool,
        registry: Arc<KernelRegistry>,
    ) -> Self {
        assert!(
            primary_device != DeviceType::All && primary_device != DeviceType::Invalid,
            "primary device must be a concrete device"
        );
        let mut used = UsedDeviceSet::new();
        used.insert(primary_device);
        Self {
            primary_device,
            tpu_infeed_enabled,
            used,
            registry,
        }
    }

    /// Builds the device info for `function`.
    ///
    /// Scans for at most one device-configuration operation to discover the
    /// primary device (CPU when absent) and the TPU infeed setting, and marks
    /// every device already named by a `__device` attribute as used. When
    /// `remove_config_op` is set, the configuration operation is deleted from
    /// the function as a side effect.
    ///
    /// Must run exactly once per function, before any placement decision is
    /// requested.
    pub fn get_for_function(
        function: &mut GraphFunction,
        registry: Arc<KernelRegistry>,
        remove_config_op: bool,
    ) -> Result<Self> {
        let mut config: Option<(String, DeviceType, bool)> = None;
        for op in function.operations() {
            let primary = match op.op_type.as_str() {
                CONFIGURE_CPU_OP => DeviceType::Cpu,
                CONFIGURE_GPU_OP => DeviceType::Gpu,
                CONFIGURE_TPU_OP => DeviceType::Tpu,
                _ => continue,
            };
            if let Some((existing, ..)) = &config {
                bail!(
                    "function {}: duplicate device-configuration ops {} and {}",
                    function.name,
                    existing,
                    op.name
                );
            }
            let infeed = primary == DeviceType::Tpu
                && op
                    .attr("enable_infeed")
                    .and_then(AttrValue::as_bool)
                    .unwrap_or(false);
            config = Some((op.name.clone(), primary, infeed));
        }

        let (primary_device, tpu_infeed_enabled) = config
            .as_ref()
            .map(|(_, device, infeed)| (*device, *infeed))
            .unwrap_or((DeviceType::Cpu, false));
        let mut info = Self::new(primary_device, tpu_infeed_enabled, registry);

        for op in function.operations() {
            if let Some(AttrValue::Str(device)) = op.attr(DEVICE_ATTR) {
                let device = DeviceType::from_device_string(device)?;
                info.mark_device_used(device);
            }
        }

        if remove_config_op {
            if let Some((name, ..)) = config {
                function.remove_op(&name);
            }
        }

        debug!(
            function = %function.name,
            primary = info.primary_device.short_name(),
            infeed = info.tpu_infeed_enabled,
            used = info.used.len(),
            "resolved device info"
        );
        Ok(info)
    }

    pub fn primary_device(&self) -> DeviceType {
        self.primary_device
    }

    pub fn tpu_infeed_enabled(&self) -> bool {
        self.tpu_infeed_enabled
    }

    /// Marks a device as occupied. `All` denotes replication rather than a
    /// concrete device and is intentionally never recorded.
    pub fn mark_device_used(&mut self, device: DeviceType) {
        self.used.insert(device);
    }

    pub fn device_in_use(&self, device: DeviceType) -> bool {
        self.used.contains(device)
    }

    pub fn used_device_count(&self) -> usize {
        self.used.len()
    }

    /// Ordered, restartable iteration over the concretely-used devices.
    pub fn used_device_types(&self) -> impl Iterator<Item = DeviceType> + '_ {
        self.used.iter()
    }

    /// Decides the device for one operation under construction, appends the
    /// `__device` attribute to `attributes`, and records the device as used.
    ///
    /// A non-empty `op_device` is authoritative and used verbatim. An empty
    /// one defers to [`choose_device`](Self::choose_device).
    ///
    /// Not idempotent: a second call for the same operation appends a second
    /// device attribute, which the IR verifier rejects downstream.
    pub fn handle_device_placement(
        &mut self,
        op_type: &str,
        op_device: &str,
        attributes: &mut Vec<Attribute>,
    ) -> Result<()> {
        let device_string = if op_device.is_empty() {
            let chosen = self.choose_device(op_type);
            debug!(op_type, device = chosen.short_name(), "placed operation");
            self.mark_device_used(chosen);
            chosen.device_string().to_string()
        } else {
            let device = DeviceType::from_device_string(op_device)?;
            self.mark_device_used(device);
            op_device.to_string()
        };
        attributes.push(Attribute::new(DEVICE_ATTR, AttrValue::Str(device_string)));
        Ok(())
    }

    /// Picks the device for an operation with no explicit placement: the
    /// primary device when its kernel is available there, otherwise the
    /// lowest-ordinal already-used device with the kernel, otherwise the
    /// lowest-ordinal concrete device with the kernel. Falls back to the
    /// primary device when nothing supports the op type, keeping the result
    /// total and deterministic.
    fn choose_device(&self, op_type: &str) -> DeviceType {
        if self.registry.supports(op_type, self.primary_device) {
            return self.primary_device;
        }
        if let Some(device) = self
            .used
            .iter()
            .find(|device| self.registry.supports(op_type, *device))
        {
            return device;
        }
        DeviceType::CONCRETE
            .into_iter()
            .find(|device| self.registry.supports(op_type, *device))
            .unwrap_or(self.primary_device)
    }
}
