//! Partitioning of a placed function into per-device sub-functions.
//!
//! Cross-device data dependencies are stitched with matched send/receive
//! pairs: the send lands in the producer's sub-function right after the
//! producing operation, the receive lands in each consumer's sub-function at
//! the point of first use, and both carry the same transfer id. A receive
//! keeps the produced value's name, so downstream uses resolve without
//! rewriting.

use crate::info::GraphFunctionDeviceInfo;
use anyhow::{anyhow, bail, Result};
use graphshard_devices::{
    is_shape_array_pseudo_attr, DeviceType, ALL_DEVICES, DEVICE_ATTR, SHAPE_ARRAY_ATTR,
};
use graphshard_ir::{AttrValue, Block, GraphFunction, Operation, Terminator};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Operation type of a synthesized device-to-device send.
pub const SEND_OP: &str = "D2DTensorSend";
/// Operation type of a synthesized device-to-device receive.
pub const RECV_OP: &str = "D2DTensorRecv";
/// Attribute carrying the id pairing a send with its receives.
pub const TRANSFER_ID_ATTR: &str = "transfer_id";
/// Attribute on a receive naming the sending device.
pub const TRANSFER_FROM_ATTR: &str = "from_device";
/// Attribute on a send naming the receiving device (or `ALL_DEVICES`).
pub const TRANSFER_TO_ATTR: &str = "to_device";

/// Monotonic transfer-id counter, owned by the caller orchestrating all
/// extractions for one source function. The first id issued is 1.
#[derive(Debug, Default)]
pub struct TransferIdAllocator {
    issued: i64,
}

impl TransferIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self) -> i64 {
        self.issued += 1;
        self.issued
    }
}

/// Where one cross-device edge delivers a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TransferDest {
    /// Point-to-point transfer to one concrete device.
    Device(DeviceType),
    /// One send, received by every other used device. Used for values
    /// consumed by `All`-placed operations and for branch conditions, which
    /// every device's replicated control flow needs.
    Broadcast,
}

/// Partitions one placed source function into per-device sub-functions.
///
/// Construction resolves every operation's device and pre-allocates one
/// transfer id per cross-device edge in program order, so every extraction
/// from the same partitioner sees consistent ids. Extracted sub-functions
/// are owned by the caller; the partitioner keeps nothing.
pub struct DevicePartitioner<'a> {
    inner: DevicePartitionerImpl<'a>,
}

impl<'a> DevicePartitioner<'a> {
    pub fn new(
        src: &'a GraphFunction,
        device_info: &'a GraphFunctionDeviceInfo,
        transfer_ids: &mut TransferIdAllocator,
    ) -> Result<Self> {
        Ok(Self {
            inner: DevicePartitionerImpl::new(src, device_info, transfer_ids)?,
        })
    }

    /// Returns the sub-function of the source function specialized on
    /// `device`. Fails for any device never marked used.
    ///
    /// For example, for a function returning a+b where a is placed on GPU
    /// and b and the add on CPU, the GPU sub-function computes a and sends
    /// it, and the CPU sub-function receives a and adds b to it.
    pub fn extract_function_for_device(&self, device: DeviceType) -> Result<GraphFunction> {
        self.inner.extract_function_for_device(device)
    }
}

struct DevicePartitionerImpl<'a> {
    src: &'a GraphFunction,
    device_info: &'a GraphFunctionDeviceInfo,
    /// Resolved placement of every source operation.
    op_devices: HashMap<String, DeviceType>,
    /// Shape-array pseudo-attributes by producing operation.
    shapes: HashMap<String, AttrValue>,
    /// Transfer edges by producer, in destination order, with their ids.
    edges: HashMap<String, Vec<(TransferDest, i64)>>,
}

impl<'a> DevicePartitionerImpl<'a> {
    fn new(
        src: &'a GraphFunction,
        device_info: &'a GraphFunctionDeviceInfo,
        transfer_ids: &mut TransferIdAllocator,
    ) -> Result<Self> {
        let mut op_devices = HashMap::new();
        let mut shapes = HashMap::new();
        for op in src.operations() {
            let device = match op.attr(DEVICE_ATTR) {
                Some(AttrValue::Str(device)) => DeviceType::from_device_string(device)?,
                Some(_) => bail!("op {}: {} attribute must be a string", op.name, DEVICE_ATTR),
                None => bail!("op {} has no device placement; run placement first", op.name),
            };
            op_devices.insert(op.name.clone(), device);
            if let Some(value) = op.attr(SHAPE_ARRAY_ATTR) {
                if is_shape_array_pseudo_attr(SHAPE_ARRAY_ATTR, value) {
                    shapes.insert(op.name.clone(), value.clone());
                }
            }
        }

        let needs = collect_transfer_needs(src, device_info, &op_devices)?;

        // Allocate ids in program order of the producers; a broadcast edge
        // subsumes any point edge for the same producer.
        let mut edges: HashMap<String, Vec<(TransferDest, i64)>> = HashMap::new();
        for op in src.operations() {
            let Some(dests) = needs.get(op.name.as_str()) else {
                continue;
            };
            let mut ordered = Vec::new();
            if dests.contains(&TransferDest::Broadcast) {
                ordered.push(TransferDest::Broadcast);
            } else {
                for device in DeviceType::CONCRETE {
                    if dests.contains(&TransferDest::Device(device)) {
                        ordered.push(TransferDest::Device(device));
                    }
                }
            }
            let list: Vec<_> = ordered
                .into_iter()
                .map(|dest| (dest, transfer_ids.allocate()))
                .collect();
            edges.insert(op.name.clone(), list);
        }

        debug!(
            function = %src.name,
            ops = src.op_count(),
            transfer_edges = edges.values().map(Vec::len).sum::<usize>(),
            "analyzed function for partitioning"
        );
        Ok(Self {
            src,
            device_info,
            op_devices,
            shapes,
            edges,
        })
    }

    fn extract_function_for_device(&self, device: DeviceType) -> Result<GraphFunction> {
        if !self.device_info.device_in_use(device) {
            bail!(
                "cannot extract function for unused device {}",
                device.short_name()
            );
        }

        // Values already present on this device, across the whole walk, so a
        // value transferred once is not received again by a later use.
        let mut available: HashSet<String> = HashSet::new();
        let mut blocks = Vec::new();
        for block in &self.src.blocks {
            let mut ops = Vec::new();
            for op in &block.ops {
                let op_device = self.op_devices[op.name.as_str()];
                if op_device == device || op_device == DeviceType::All {
                    for operand in &op.operands {
                        self.ensure_available(operand, device, &mut available, &mut ops)?;
                    }
                    ops.push(op.clone());
                    available.insert(op.name.clone());
                }
                if op_device == device {
                    if let Some(edges) = self.edges.get(op.name.as_str()) {
                        for (dest, id) in edges {
                            ops.push(self.make_send(op, device, *dest, *id));
                        }
                    }
                }
            }

            // Control flow is replicated on every device, so a branch
            // condition computed elsewhere must be received before the
            // terminator even if nothing else here uses it.
            let mut terminator = block.terminator.clone();
            if let Terminator::CondBranch { condition, .. } = &terminator {
                self.ensure_available(condition, device, &mut available, &mut ops)?;
            }
            let drop_return = match &terminator {
                // Only the device holding the result value returns it.
                Terminator::Return(Some(value)) => !available.contains(value),
                _ => false,
            };
            if drop_return {
                terminator = Terminator::Return(None);
            }
            blocks.push(Block {
                label: block.label.clone(),
                ops,
                terminator,
            });
        }

        let name = format!("{}_{}", self.src.name, device.short_name());
        debug!(function = %name, "extracted device function");
        Ok(GraphFunction::new(name, blocks))
    }

    /// Inserts a receive for `value` if it is not yet present on `device`.
    fn ensure_available(
        &self,
        value: &str,
        device: DeviceType,
        available: &mut HashSet<String>,
        ops: &mut Vec<Operation>,
    ) -> Result<()> {
        if available.contains(value) {
            return Ok(());
        }
        let from_device = *self
            .op_devices
            .get(value)
            .ok_or_else(|| anyhow!("undefined value {value} in function {}", self.src.name))?;
        let id = self.transfer_id(value, device).ok_or_else(|| {
            anyhow!(
                "value {value} is not transferred to {} (use before definition?)",
                device.short_name()
            )
        })?;
        ops.push(self.make_recv(value, from_device, device, id));
        available.insert(value.to_string());
        Ok(())
    }

    /// The id of the edge delivering `producer`'s value to `device`; a
    /// broadcast edge serves every destination.
    fn transfer_id(&self, producer: &str, device: DeviceType) -> Option<i64> {
        self.edges.get(producer)?.iter().find_map(|(dest, id)| match dest {
            TransferDest::Broadcast => Some(*id),
            TransferDest::Device(d) if *d == device => Some(*id),
            TransferDest::Device(_) => None,
        })
    }

    fn make_recv(
        &self,
        value: &str,
        from_device: DeviceType,
        device: DeviceType,
        id: i64,
    ) -> Operation {
        let mut op = Operation::new(value, RECV_OP, Vec::new());
        op.append_attr(TRANSFER_ID_ATTR, AttrValue::Int(id));
        op.append_attr(
            TRANSFER_FROM_ATTR,
            AttrValue::Str(from_device.device_string().into()),
        );
        op.append_attr(DEVICE_ATTR, AttrValue::Str(device.device_string().into()));
        // Infeed-style receives need the incoming shapes; everything else
        // drops the pseudo-attribute.
        if device == DeviceType::Tpu && self.device_info.tpu_infeed_enabled() {
            if let Some(shapes) = self.shapes.get(value) {
                op.append_attr(SHAPE_ARRAY_ATTR, shapes.clone());
            }
        }
        op
    }

    fn make_send(
        &self,
        producer: &Operation,
        device: DeviceType,
        dest: TransferDest,
        id: i64,
    ) -> Operation {
        let (suffix, to_device) = match dest {
            TransferDest::Device(d) => (d.short_name(), d.device_string()),
            TransferDest::Broadcast => ("ALL", ALL_DEVICES),
        };
        let mut op = Operation::new(
            format!("{}_send_{}", producer.name, suffix),
            SEND_OP,
            vec![producer.name.clone()],
        );
        op.append_attr(TRANSFER_ID_ATTR, AttrValue::Int(id));
        op.append_attr(TRANSFER_TO_ATTR, AttrValue::Str(to_device.into()));
        op.append_attr(DEVICE_ATTR, AttrValue::Str(device.device_string().into()));
        if device == DeviceType::Tpu && self.device_info.tpu_infeed_enabled() {
            if let Some(shapes) = self.shapes.get(producer.name.as_str()) {
                op.append_attr(SHAPE_ARRAY_ATTR, shapes.clone());
            }
        }
        op
    }
}

/// Collects, per producer, the destinations its value must be transferred to.
fn collect_transfer_needs<'s>(
    src: &'s GraphFunction,
    device_info: &GraphFunctionDeviceInfo,
    op_devices: &HashMap<String, DeviceType>,
) -> Result<HashMap<&'s str, HashSet<TransferDest>>> {
    let mut needs: HashMap<&str, HashSet<TransferDest>> = HashMap::new();
    // With a single used device there is nowhere to broadcast to.
    let multi_device = device_info.used_device_count() > 1;
    for block in &src.blocks {
        for op in &block.ops {
            let consumer_device = op_devices[op.name.as_str()];
            for operand in &op.operands {
                let producer_device = *op_devices.get(operand.as_str()).ok_or_else(|| {
                    anyhow!("op {} reads undefined value {}", op.name, operand)
                })?;
                if producer_device == consumer_device || producer_device == DeviceType::All {
                    continue;
                }
                let dest = if consumer_device == DeviceType::All {
                    if !multi_device {
                        continue;
                    }
                    TransferDest::Broadcast
                } else {
                    TransferDest::Device(consumer_device)
                };
                needs.entry(operand.as_str()).or_default().insert(dest);
            }
        }
        if let Terminator::CondBranch { condition, .. } = &block.terminator {
            let producer_device = *op_devices.get(condition.as_str()).ok_or_else(|| {
                anyhow!(
                    "block {} condition reads undefined value {}",
                    block.label,
                    condition
                )
            })?;
            if producer_device != DeviceType::All && multi_device {
                needs
                    .entry(condition.as_str())
                    .or_default()
                    .insert(TransferDest::Broadcast);
            }
        }
    }
    // Broadcast subsumes point edges for the same producer.
    for dests in needs.values_mut() {
        if dests.contains(&TransferDest::Broadcast) {
            dests.retain(|dest| *dest == TransferDest::Broadcast);
        }
    }
    Ok(needs)
}
