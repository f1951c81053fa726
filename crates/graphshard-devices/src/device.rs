//! Device identity: the closed device enumeration, canonical path strings,
//! reserved attribute names, and the used-device set.

use anyhow::{bail, Result};
use graphshard_ir::AttrValue;
use serde::{Deserialize, Serialize};

/// The device an operation (and its result tensor) is placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeviceType {
    /// Sentinel; never assigned to a real operation.
    Invalid,
    Cpu,
    Gpu,
    Tpu,
    /// Pseudo-device: the operation runs on every device in the function's
    /// used-device set. For example, a promoted scalar runs on all devices
    /// in case it feeds a loop iteration count and the loop runs everywhere.
    All,
}

/// Must be kept in sync with the enum above.
pub const NUM_DEVICE_TYPES: usize = 5;

pub const DEFAULT_CPU_DEVICE: &str = "/device:CPU:0";
pub const DEFAULT_GPU_DEVICE: &str = "/device:GPU:0";
pub const DEFAULT_TPU_DEVICE: &str = "TPU_SYSTEM";
/// Pseudo-device string that only exists between partitioning and graph
/// lowering; the lowering stage replaces it with concrete devices.
pub const ALL_DEVICES: &str = "ALL_DEVICES";

/// Reserved attribute name carrying an operation's device placement.
pub const DEVICE_ATTR: &str = "__device";
/// Reserved pseudo-attribute carrying result shapes across device transfer
/// operations. It is kept when lowering a transfer to a TPU infeed/outfeed
/// op and dropped when lowering ordinary data-producing ops.
pub const SHAPE_ARRAY_ATTR: &str = "__shapes";

impl DeviceType {
    /// Concrete devices an operation can actually occupy, ascending ordinal.
    pub const CONCRETE: [DeviceType; 3] = [DeviceType::Cpu, DeviceType::Gpu, DeviceType::Tpu];

    pub fn ordinal(self) -> usize {
        self as usize
    }

    pub fn from_ordinal(ordinal: usize) -> Option<DeviceType> {
        match ordinal {
            0 => Some(DeviceType::Invalid),
            1 => Some(DeviceType::Cpu),
            2 => Some(DeviceType::Gpu),
            3 => Some(DeviceType::Tpu),
            4 => Some(DeviceType::All),
            _ => None,
        }
    }

    /// Parses a canonical device path string. Abbreviated or malformed
    /// strings (e.g. a bare "CPU:0") are an upstream bug and rejected.
    pub fn from_device_string(device: &str) -> Result<DeviceType> {
        match device {
            DEFAULT_CPU_DEVICE => Ok(DeviceType::Cpu),
            DEFAULT_GPU_DEVICE => Ok(DeviceType::Gpu),
            DEFAULT_TPU_DEVICE => Ok(DeviceType::Tpu),
            ALL_DEVICES => Ok(DeviceType::All),
            other => bail!("unknown device string: {other}"),
        }
    }

    /// The canonical device path string, compatible with generated graphs.
    ///
    /// Panics for `Invalid`, which has no string form.
    pub fn device_string(self) -> &'static str {
        match self {
            DeviceType::Cpu => DEFAULT_CPU_DEVICE,
            DeviceType::Gpu => DEFAULT_GPU_DEVICE,
            DeviceType::Tpu => DEFAULT_TPU_DEVICE,
            DeviceType::All => ALL_DEVICES,
            DeviceType::Invalid => panic!("DeviceType::Invalid has no device string"),
        }
    }

    /// Short identifier usable in generated function names.
    ///
    /// Panics for `Invalid`, which has no string form.
    pub fn short_name(self) -> &'static str {
        match self {
            DeviceType::Cpu => "CPU",
            DeviceType::Gpu => "GPU",
            DeviceType::Tpu => "TPU",
            DeviceType::All => "ALL",
            DeviceType::Invalid => panic!("DeviceType::Invalid has no short name"),
        }
    }
}

/// Returns true if the attribute is the reserved shape-array pseudo-attribute
/// with a shape-typed payload.
pub fn is_shape_array_pseudo_attr(name: &str, value: &AttrValue) -> bool {
    name == SHAPE_ARRAY_ATTR && value.is_shape_array()
}

/// Fixed-size membership set over concrete device ordinals.
///
/// The `Invalid` and `All` positions are never set: `insert` asserts against
/// `Invalid` and silently ignores `All` (it denotes replication, not an
/// occupied device), so iteration never has to filter them out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsedDeviceSet {
    used: [bool; NUM_DEVICE_TYPES],
    len: usize,
}

impl UsedDeviceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a concrete device. Idempotent; `All` is accepted and ignored.
    pub fn insert(&mut self, device: DeviceType) {
        assert!(
            device != DeviceType::Invalid,
            "cannot mark DeviceType::Invalid as used"
        );
        if device == DeviceType::All || self.used[device.ordinal()] {
            return;
        }
        self.used[device.ordinal()] = true;
        self.len += 1;
    }

    pub fn contains(&self, device: DeviceType) -> bool {
        self.used[device.ordinal()]
    }

    /// Number of distinct concrete devices in the set.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Ordered, restartable iteration over the members, ascending ordinal.
    pub fn iter(&self) -> impl Iterator<Item = DeviceType> + '_ {
        self.used
            .iter()
            .enumerate()
            .filter(|(_, used)| **used)
            .map(|(ordinal, _)| {
                DeviceType::from_ordinal(ordinal).unwrap_or(DeviceType::Invalid)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_string_bijection() {
        for device in [
            DeviceType::Cpu,
            DeviceType::Gpu,
            DeviceType::Tpu,
            DeviceType::All,
        ] {
            let parsed = DeviceType::from_device_string(device.device_string()).unwrap();
            assert_eq!(parsed, device);
        }
    }

    #[test]
    fn test_malformed_device_string_rejected() {
        assert!(DeviceType::from_device_string("CPU:0").is_err());
        assert!(DeviceType::from_device_string("/device:cpu:0").is_err());
        assert!(DeviceType::from_device_string("").is_err());
    }

    #[test]
    #[should_panic]
    fn test_invalid_has_no_device_string() {
        let _ = DeviceType::Invalid.device_string();
    }

    #[test]
    fn test_used_set_excludes_all_and_is_idempotent() {
        let mut set = UsedDeviceSet::new();
        set.insert(DeviceType::Gpu);
        set.insert(DeviceType::All);
        set.insert(DeviceType::Gpu);
        set.insert(DeviceType::Cpu);
        assert_eq!(set.len(), 2);
        let members: Vec<_> = set.iter().collect();
        assert_eq!(members, [DeviceType::Cpu, DeviceType::Gpu]);
        // Restartable: a second pass yields the same members.
        let again: Vec<_> = set.iter().collect();
        assert_eq!(members, again);
    }

    #[test]
    #[should_panic]
    fn test_used_set_rejects_invalid() {
        let mut set = UsedDeviceSet::new();
        set.insert(DeviceType::Invalid);
    }

    #[test]
    fn test_shape_array_pseudo_attr() {
        let shapes = AttrValue::ShapeArray(vec![vec![2, 2]]);
        assert!(is_shape_array_pseudo_attr(SHAPE_ARRAY_ATTR, &shapes));
        assert!(!is_shape_array_pseudo_attr("shapes", &shapes));
        assert!(!is_shape_array_pseudo_attr(
            SHAPE_ARRAY_ATTR,
            &AttrValue::Int(1)
        ));
    }
}
