use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// 多网络分析网关。
#[derive(Debug, Parser)]
#[command(name = "lab-gateway", version, about)]
struct Args {
    /// YAML 配置文件路径。
    #[arg(short, long, default_value = "config.yaml", env = "LAB_CONFIG")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = lab_core::config::Config::load(&args.config)
        .with_context(|| format!("load config from {}", args.config.display()))?;

    // RUST_LOG 优先；未设置时退回配置文件的日志级别。
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.server.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    lab_gateway::run(config).await
}
