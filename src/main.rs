use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use flow_store::FileFlowRuntime;
use kevoree_nodered::{
    BridgeConfig, BridgeController, BridgePorts, Component, EnvConfigSource,
    flow_commands::{reconcile_flow_file, validate_flow_file},
    logger::{LogConfig, init_tracing},
};
use std::{fs, path::PathBuf, sync::Arc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "kevoree-nodered",
    about = "Node-RED flow runtime hosted as a Kevoree component",
    version = "0.1.0"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the component and bridge stdin/stdout to the flow
    Run(RunArgs),

    /// Print the JSON-Schema of the component attributes
    Schema(SchemaArgs),

    /// Work on flow files offline
    Flow(FlowArgs),
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Component instance name used in log lines
    #[arg(long, default_value = "nodered")]
    name: String,

    /// .env file loaded into the environment before reading NODERED_* attributes
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Log filter (e.g. error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Write the log file as JSON lines
    #[arg(long, default_value_t = false)]
    json_logs: bool,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long)]
    user_dir: Option<String>,

    #[arg(long)]
    http_admin_root: Option<String>,

    #[arg(long)]
    http_node_root: Option<String>,

    /// File whose content is used as the `flows` attribute
    #[arg(long)]
    flows_file: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    in_port: Option<u16>,

    #[arg(long)]
    out_port: Option<u16>,
}

#[derive(Args, Debug)]
struct SchemaArgs {
    /// Write the schema here instead of stdout
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct FlowArgs {
    #[command(subcommand)]
    command: FlowCommands,
}

#[derive(Subcommand, Debug)]
enum FlowCommands {
    Validate {
        file: PathBuf,
    },
    /// Add the bridge nodes and wires a running component would deploy
    Reconcile {
        file: PathBuf,
        #[arg(long, default_value_t = 9091)]
        in_port: u16,
        #[arg(long, default_value_t = 9092)]
        out_port: u16,
        /// Replace the file instead of printing the result
        #[arg(long, default_value_t = false)]
        write: bool,
    },
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Schema(args) => {
            let schema = schemars::schema_for!(BridgeConfig);
            let json = serde_json::to_string_pretty(&schema)?;
            match args.out {
                Some(path) => {
                    fs::write(&path, json)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("Schema written to {}", path.display());
                }
                None => println!("{json}"),
            }
            Ok(())
        }
        Commands::Flow(flow_args) => match flow_args.command {
            FlowCommands::Validate { file } => {
                validate_flow_file(&file)?;
                println!("✅ Flow file is valid.");
                Ok(())
            }
            FlowCommands::Reconcile {
                file,
                in_port,
                out_port,
                write,
            } => {
                let (doc, changed) =
                    reconcile_flow_file(&file, BridgePorts::new(in_port, out_port), write)?;
                if write {
                    if changed {
                        println!("✅ Flow `{}` updated.", file.display());
                    } else {
                        println!("✅ Flow `{}` already up to date.", file.display());
                    }
                } else {
                    println!("{}", doc.to_json_pretty()?);
                }
                Ok(())
            }
        },
    }
}

/// Environment attributes with the command line overrides on top.
async fn load_config(args: &RunArgs) -> anyhow::Result<BridgeConfig> {
    let source = EnvConfigSource::new(args.env_file.clone());
    let mut config = BridgeConfig::load(&source).await?;

    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(dir) = &args.user_dir {
        config.user_dir = Some(dir.clone());
    }
    if let Some(root) = &args.http_admin_root {
        config.http_admin_root = root.clone();
    }
    if let Some(root) = &args.http_node_root {
        config.http_node_root = root.clone();
    }
    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.in_port {
        config.in_port = port;
    }
    if let Some(port) = args.out_port {
        config.out_port = port;
    }
    if let Some(path) = &args.flows_file {
        let flows = fs::read_to_string(path)
            .with_context(|| format!("Failed to read flows file: {}", path.display()))?;
        config.flows = Some(flows);
    }
    Ok(config)
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let _guard = init_tracing(&LogConfig {
        log_level: args.log_level.clone(),
        log_dir: args.log_dir.clone(),
        json: args.json_logs,
        ..Default::default()
    })?;

    let config = load_config(&args).await?;
    let mut controller =
        BridgeController::new(args.name.clone(), config, Arc::new(FileFlowRuntime::new()));
    let mut outbound = controller
        .take_outbound()
        .context("outbound receiver already taken")?;

    controller.start().await?;
    info!("\"{}\" running; one stdin line per message, `:reload` to re-read attributes, Ctrl-C to exit", args.name);

    let printer = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            println!("{msg}");
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim() == ":reload" => {
                    let config = match load_config(&args).await {
                        Ok(config) => config,
                        Err(err) => {
                            error!("reload failed: {err:#}");
                            continue;
                        }
                    };
                    let diff = controller.apply_config(config).await;
                    if diff.is_empty() {
                        info!("attributes unchanged");
                    } else if let Err(err) = controller.update().await {
                        error!("update failed: {err}");
                    }
                }
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => {
                    if let Err(err) = controller.on_inbound(&line) {
                        warn!("message dropped: {err}");
                    }
                }
                Ok(None) => {
                    info!("stdin closed; press Ctrl-C to exit");
                    tokio::signal::ctrl_c().await?;
                    break;
                }
                Err(err) => {
                    error!("stdin read failed: {err}");
                    break;
                }
            },
        }
    }

    info!("shutting down");
    controller.stop().await?;
    printer.abort();
    Ok(())
}
