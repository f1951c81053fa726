//! CLI wiring for the graphshard partitioner.

use crate::pipeline::{CompilerConfig, CompilerPipeline, PartitionArtifacts};
use anyhow::Result;
use clap::{Parser, Subcommand};
use graphshard_ir::{AttrValue, Attribute, FunctionBuilder, GraphFunction};
use graphshard_placement::CONFIGURE_GPU_OP;
use std::fs;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "graphshard", about = "Device placement and graph partitioning toolkit")]
pub struct Cli {
    /// Skip structural verification of placed and extracted functions.
    #[arg(long, default_value_t = false)]
    pub no_verify: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Partition a JSON-encoded function into per-device sub-functions.
    Partition {
        /// Path to the function, serialized as JSON.
        input: PathBuf,
        /// Write one JSON file per device instead of printing listings.
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Partition a built-in sample function and print the listings.
    EmitText,
}

pub fn run_cli(cli: Cli) -> Result<()> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let Cli { no_verify, command } = cli;
    let config = CompilerConfig {
        verify: !no_verify,
        ..CompilerConfig::default()
    };
    let pipeline = CompilerPipeline::new(config);

    match command {
        Command::Partition { input, output_dir } => {
            let blob = fs::read_to_string(&input)?;
            let function: GraphFunction = serde_json::from_str(&blob)?;
            info!(path = %input.display(), function = %function.name, "loaded function");
            let artifacts = pipeline.partition(function)?;

            if let Some(dir) = output_dir {
                fs::create_dir_all(&dir)?;
                for (device, function) in &artifacts.per_device {
                    let path = dir.join(format!("{}.json", function.name));
                    fs::write(&path, serde_json::to_string_pretty(function)?)?;
                    info!(device = device.short_name(), path = %path.display(), "wrote sub-function");
                }
            } else {
                print_artifacts(&artifacts);
            }
        }
        Command::EmitText => {
            let artifacts = pipeline.partition(sample_branch_function())?;
            print_artifacts(&artifacts);
        }
    }
    Ok(())
}

fn print_artifacts(artifacts: &PartitionArtifacts) {
    for (device, function) in &artifacts.per_device {
        println!("// ---- {} ----", device.short_name());
        println!("{}", function.to_text());
    }
}

/// A small function exercising hints, kernel-availability fallback, and
/// cross-device control flow: GPU primary, a CPU-pinned constant, a CPU-only
/// `Print`, and a branch whose condition crosses devices.
fn sample_branch_function() -> GraphFunction {
    FunctionBuilder::new("sample")
        .add_op("config", CONFIGURE_GPU_OP, &[], vec![])
        .add_const("x", AttrValue::Float(1.0))
        .add_op(
            "threshold",
            "Const",
            &[],
            vec![
                Attribute::new("value", AttrValue::Float(0.5)),
                Attribute::new("device", AttrValue::Str("/device:CPU:0".into())),
            ],
        )
        .add_op("flag", "Greater", &["x", "threshold"], vec![])
        .cond_branch("flag", "report", "done")
        .block("report")
        .add_op("print_t", "Print", &["threshold"], vec![])
        .branch("done")
        .block("done")
        .ret(Some("x"))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphshard_devices::DeviceType;

    #[test]
    fn test_sample_function_partitions_across_devices() {
        let pipeline = CompilerPipeline::new(CompilerConfig::default());
        let artifacts = pipeline.partition(sample_branch_function()).unwrap();
        let devices: Vec<_> = artifacts
            .per_device
            .iter()
            .map(|(device, _)| *device)
            .collect();
        assert_eq!(devices, [DeviceType::Cpu, DeviceType::Gpu]);
        // Every device replicates the three-block control flow.
        for (_, function) in &artifacts.per_device {
            assert_eq!(function.blocks.len(), 3);
        }
    }
}
