//! linkdeploy - deploy interdependent components and record their addresses
//!
//! Runs the whole pipeline in one command: plan the topology, deploy every
//! component through a JSON-RPC node, patch cyclic references, and write
//! the address manifest. Every flag has an environment variable and a
//! default, so a bare `linkdeploy` deploys the built-in topology against a
//! local node.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use linkdeploy_backend::{
    ConsumerLayoutSink, FsArtifactResolver, JsonManifestSink, JsonRpcBackend, ManifestSink,
    RpcConfig,
};
use linkdeploy_core::config::{
    DEFAULT_ARTIFACTS_DIR, DEFAULT_CONFIRMATIONS, DEFAULT_MANIFEST_PATH, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_RECEIPT_TIMEOUT_SECS, DEFAULT_RPC_URL,
};
use linkdeploy_core::{
    plan, ArgSource, DependencySequencer, DeployConfig, DeploymentPlan, JournalEntry,
    ManifestLayout, OrchestratorError, RunReport, SequencerOptions,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{warn, Level};

#[derive(Parser)]
#[command(name = "linkdeploy")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(
    about = "Deploy interdependent components and write their address manifest",
    long_about = None
)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,

    /// Print the deployment plan and exit without touching the node
    #[arg(long)]
    dry_run: bool,

    /// JSON-RPC endpoint of the node
    #[arg(long, env = "LINKDEPLOY_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,

    /// Directory searched for `<Component>.json` build artifacts
    #[arg(long, env = "LINKDEPLOY_ARTIFACTS_DIR", default_value = DEFAULT_ARTIFACTS_DIR)]
    artifacts_dir: PathBuf,

    /// Where the address manifest is written (a directory for `--layout consumer`)
    #[arg(long, env = "LINKDEPLOY_MANIFEST_PATH", default_value = DEFAULT_MANIFEST_PATH)]
    manifest_path: PathBuf,

    /// Manifest layout on disk
    #[arg(long, env = "LINKDEPLOY_LAYOUT", value_enum, default_value_t = Layout::Document)]
    layout: Layout,

    /// JSON topology file (default: built-in Ticket/EventManager/Marketplace)
    #[arg(long, env = "LINKDEPLOY_TOPOLOGY")]
    topology: Option<PathBuf>,

    /// Sending account (default: first account reported by the node)
    #[arg(long, env = "LINKDEPLOY_FROM")]
    from: Option<String>,

    /// Blocks required on top of a receipt before it counts as durable
    #[arg(long, env = "LINKDEPLOY_CONFIRMATIONS", default_value_t = DEFAULT_CONFIRMATIONS)]
    confirmations: u64,

    /// Receipt polling interval in milliseconds
    #[arg(long, env = "LINKDEPLOY_POLL_INTERVAL_MS", default_value_t = DEFAULT_POLL_INTERVAL_MS)]
    poll_interval_ms: u64,

    /// Give up waiting for a receipt after this many seconds
    #[arg(
        long,
        env = "LINKDEPLOY_RECEIPT_TIMEOUT_SECS",
        default_value_t = DEFAULT_RECEIPT_TIMEOUT_SECS
    )]
    receipt_timeout_secs: u64,

    /// Upper bound on any single deploy or patch, in seconds
    #[arg(long, env = "LINKDEPLOY_STEP_TIMEOUT_SECS")]
    step_timeout_secs: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Layout {
    /// One JSON document with every component, link and alias
    Document,
    /// `abis/<Component>.json` files plus a flat `deployedContracts.json`
    Consumer,
}

impl From<Layout> for ManifestLayout {
    fn from(layout: Layout) -> Self {
        match layout {
            Layout::Document => ManifestLayout::Document,
            Layout::Consumer => ManifestLayout::Consumer,
        }
    }
}

impl Cli {
    fn deploy_config(&self) -> DeployConfig {
        DeployConfig {
            rpc: RpcConfig {
                url: self.rpc_url.clone(),
                from: self.from.clone(),
                confirmations: self.confirmations,
                poll_interval: Duration::from_millis(self.poll_interval_ms),
                receipt_timeout: Duration::from_secs(self.receipt_timeout_secs),
            },
            artifacts_dir: self.artifacts_dir.clone(),
            manifest_path: self.manifest_path.clone(),
            layout: self.layout.into(),
            topology_path: self.topology.clone(),
            step_timeout: self.step_timeout_secs.map(Duration::from_secs),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    linkdeploy_core::init_tracing(cli.json, level);

    let config = cli.deploy_config();
    let topology = config
        .load_topology()
        .context("Failed to load topology")?;
    let plan = plan::plan(&topology).context("Failed to plan deployment")?;

    if cli.dry_run {
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&plan)?);
        } else {
            print_plan(&plan);
        }
        return Ok(());
    }

    print_plan(&plan);

    let backend = JsonRpcBackend::new(config.rpc.clone()).context("Failed to build RPC client")?;
    let sink: Arc<dyn ManifestSink> = match config.layout {
        ManifestLayout::Document => Arc::new(JsonManifestSink::new(&config.manifest_path)),
        ManifestLayout::Consumer => Arc::new(ConsumerLayoutSink::new(&config.manifest_path)),
    };
    let cancel = CancellationToken::new();
    spawn_ctrl_c_handler(cancel.clone());
    let (progress, entries) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_progress(entries));

    let sequencer = DependencySequencer::new(
        Arc::new(FsArtifactResolver::new(&config.artifacts_dir)),
        Arc::new(backend),
        sink,
    )
    .with_options(SequencerOptions {
        step_timeout: config.step_timeout,
        cancel,
        progress: Some(progress),
    });

    let outcome = sequencer.run(&topology).await;
    drop(sequencer);
    printer.await.context("Progress printer failed")?;

    match outcome {
        Ok(report) => {
            print_report(&report, &config);
            Ok(())
        }
        Err(err) => {
            print_failure(&err);
            Err(err).context("Deployment failed")
        }
    }
}

fn spawn_ctrl_c_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping after the current step");
            cancel.cancel();
        }
    });
}

/// One stdout line per journal entry, as each step lands.
async fn print_progress(mut entries: mpsc::UnboundedReceiver<JournalEntry>) {
    while let Some(entry) = entries.recv().await {
        println!("{}", progress_line(&entry));
    }
}

fn progress_line(entry: &JournalEntry) -> String {
    match entry {
        JournalEntry::Deployed {
            component, address, ..
        } => format!("Deployed {component} at {address}"),
        JournalEntry::Patched {
            source,
            dependency,
            method,
            receipt,
            ..
        } => format!(
            "Linked {dependency} into {source} via {method} (tx {})",
            receipt.transaction_hash
        ),
        JournalEntry::InDoubt { action, .. } => match &action.tx_hash {
            Some(tx) => format!("Sent {} as {tx}, not confirmed", action.step),
            None => format!("Sent {}, not confirmed", action.step),
        },
    }
}

fn print_plan(plan: &DeploymentPlan) {
    println!("Deployment plan ({} components):", plan.steps.len());
    for step in &plan.steps {
        let args: Vec<String> = step
            .constructor_args
            .iter()
            .map(|arg| match arg {
                ArgSource::Deployed(name) => name.clone(),
                ArgSource::Placeholder(name) => format!("{name}?"),
            })
            .collect();
        println!(
            "  {}. {}({})",
            step.position + 1,
            step.component,
            args.join(", ")
        );
    }
    for patch in &plan.patches {
        println!(
            "  then {}.{}({})",
            patch.source, patch.method, patch.dependency
        );
    }
}

fn print_report(report: &RunReport, config: &DeployConfig) {
    println!("Deployer: {}", report.manifest.deployer.0);
    for component in &report.manifest.components {
        println!("  {:<24} {}", component.name, component.address);
    }
    println!(
        "Patched {} link(s); manifest written to {}",
        report.plan.patches.len(),
        config.manifest_path.display()
    );
    println!("Run: {}", report.run_id);
}

fn print_failure(err: &OrchestratorError) {
    if let Some(step) = err.step() {
        eprintln!("Failed at step: {step}");
    }
    match err {
        OrchestratorError::PartialManifest(partial) => {
            eprintln!("Components already deployed (not rolled back):");
            for component in &partial.partial.deployed {
                eprintln!("  {:<24} {}", component.name, component.address);
            }
            if let Some(in_flight) = &partial.partial.in_flight {
                eprintln!(
                    "In doubt, check the node before re-running: {}",
                    in_flight.step
                );
                if let Some(tx) = &in_flight.tx_hash {
                    eprintln!("  transaction {tx}");
                }
                if let Some(address) = &in_flight.address {
                    eprintln!("  reported address {address}");
                }
            }
            if !partial.partial.not_deployed.is_empty() {
                eprintln!("Not deployed: {}", partial.partial.not_deployed.join(", "));
            }
            for patch in &partial.partial.pending_patches {
                eprintln!(
                    "Pending patch: {}.{}({})",
                    patch.source, patch.method, patch.dependency
                );
            }
            if let Ok(state) = serde_json::to_string_pretty(&partial.partial) {
                eprintln!("Partial state:\n{state}");
            }
        }
        OrchestratorError::SinkWrite(failed) => {
            eprintln!("All components are deployed; only the manifest write failed.");
            if let Ok(manifest) = serde_json::to_string_pretty(&failed.manifest) {
                eprintln!("Manifest:\n{manifest}");
            }
        }
        other if other.retry_safe() => {
            eprintln!("Nothing was deployed; the run can be retried as is.");
        }
        _ => {}
    }
}
