use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relay_core::{
    clock::{Clock, ManualClock, SystemClock},
    decision_registry::{DecisionRegistry, InMemoryDecisionRegistry, RpcDecisionRegistry},
    relayer::{Operation, RelayService},
    Config, RelayEngine,
};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 验证并解析配置文件
    ValidateConfig {
        /// 配置文件路径
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },
    /// 按顺序回放操作脚本
    Replay {
        /// 配置文件路径
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
        /// 操作脚本路径（JSON）
        #[arg(short, long, value_name = "FILE")]
        script: PathBuf,
    },
}

#[derive(Debug, Deserialize)]
struct Script {
    /// 回放起始时间（unix 秒），缺省为当前时间
    start_time: Option<u64>,
    steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Step {
    Execute(Operation),
    AdvanceClock(u64),
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::ValidateConfig { config } => {
            info!("Validating config file: {:?}", config);
            let config = Config::load(config)?;
            let params = config.engine.params();
            println!("Config is valid.");
            println!("- Local chain: {}", config.engine.local_chain_id);
            println!("- Admin: {}", config.engine.admin);
            println!("- Remote chains:");
            for chain in &config.chains {
                let state = if chain.enabled { "enabled" } else { "disabled" };
                println!(
                    "  - {} ({}): {} confirmation blocks, {}",
                    chain.name, chain.id, chain.confirmation_blocks, state
                );
            }
            println!("- Engine parameters:");
            println!("  - min confirmations: {}", params.min_confirmations);
            println!("  - message timeout: {}s", params.message_timeout);
            println!("  - min relay stake: {}", params.min_relay_stake);
            match &config.registry {
                Some(registry) => println!("- Decision registry: {}", registry.rpc_url),
                None => println!("- Decision registry: in-memory"),
            }
            Ok(())
        }
        Commands::Replay { config, script } => {
            info!("Replaying {:?} with config {:?}", script, config);
            let config = Config::load(config)?;
            let script_str = std::fs::read_to_string(&script)
                .with_context(|| format!("Failed to read script {:?}", script))?;
            let script: Script = serde_json::from_str(&script_str).context("Failed to parse script")?;

            let registry: Arc<dyn DecisionRegistry> = match &config.registry {
                Some(registry_config) => Arc::new(RpcDecisionRegistry::new(registry_config)),
                None => Arc::new(InMemoryDecisionRegistry::new()),
            };
            let clock = Arc::new(ManualClock::new(
                script.start_time.unwrap_or_else(|| SystemClock.now()),
            ));
            let engine = RelayEngine::from_config(&config, registry, clock.clone())?;
            let service = RelayService::new(engine);

            let mut rejected = 0usize;
            for (index, step) in script.steps.into_iter().enumerate() {
                match step {
                    Step::AdvanceClock(secs) => {
                        clock.advance(secs);
                        println!("#{} advance_clock +{}s -> {}", index, secs, clock.now());
                    }
                    Step::Execute(operation) => {
                        let name = operation.name();
                        match service.execute(operation).await {
                            Ok(outcome) => {
                                println!("#{} {} ok {}", index, name, serde_json::to_string(&outcome)?);
                            }
                            Err(e) => {
                                rejected += 1;
                                warn!("Step {} ({}) rejected: {}", index, name, e);
                                println!("#{} {} rejected: {}", index, name, e);
                            }
                        }
                    }
                }
            }

            let engine = service.engine();
            let engine = engine.read().await;
            println!("{}", serde_json::to_string_pretty(engine.events().records())?);
            println!("{}", serde_json::to_string_pretty(&engine.stats())?);
            if rejected > 0 {
                error!("{} operation(s) were rejected", rejected);
            }
            Ok(())
        }
    }
}
