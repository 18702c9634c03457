//! 舵机控制守护进程主入口
//!
//! 打开舵机串口，通过 TCP（每行一个 JSON 事件）向客户端提供单步控制、
//! 序列保存/查询、回放、导出与导入。

mod client_manager;
mod config;
mod gateway;
mod protocol;
mod singleton;

use anyhow::{Context, Result};
use clap::Parser;
use config::DaemonConfig;
use gateway::Gateway;
use servo_driver::DriverBuilder;
use singleton::SingletonLock;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};

/// 舵机控制守护进程
///
/// 独占舵机控制器串口，向网络客户端提供控制接口
#[derive(Parser, Debug)]
#[command(name = "servo-daemon")]
#[command(about = "Six-servo arm daemon - serial control and sequence playback over TCP", long_about = None)]
struct Args {
    /// 监听地址
    ///
    /// 格式: IP:PORT，默认: 127.0.0.1:3001
    #[arg(long)]
    listen: Option<String>,

    /// 串口路径（可选）
    ///
    /// 如果不指定，自动选择制造商为 Arduino 的串口，否则第一个串口
    #[arg(long)]
    port: Option<String>,

    /// 波特率，默认: 9600
    #[arg(long)]
    baud: Option<u32>,

    /// 数据目录（sequences.json / sequences.txt / 导入暂存文件），默认: 当前目录
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// 配置文件路径（TOML）
    #[arg(long)]
    config: Option<PathBuf>,

    /// 锁文件路径
    ///
    /// 默认: XDG_RUNTIME_DIR 或系统临时目录下的 servo_daemon.lock
    #[arg(long)]
    lock_file: Option<PathBuf>,

    /// 日志过滤规则（EnvFilter 语法）
    #[arg(long)]
    log_filter: Option<String>,

    /// 启动时从 sequences.json 恢复序列库
    #[arg(long)]
    restore: bool,
}

fn init_tracing(filter: &str) -> Result<()> {
    let mut env_filter = tracing_subscriber::EnvFilter::from_default_env();
    for directive in filter.split(',').filter(|d| !d.trim().is_empty()) {
        env_filter = env_filter.add_directive(
            directive
                .trim()
                .parse()
                .with_context(|| format!("Invalid log filter directive: {}", directive))?,
        );
    }
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = DaemonConfig::from_args(&args)?;

    init_tracing(&config.log_filter)?;

    // 1. 单例锁（确保只有一个守护进程占用串口）
    let _lock = SingletonLock::try_lock(&config.lock_file).with_context(|| {
        format!(
            "Failed to acquire singleton lock {} (another servo-daemon may be running)",
            config.lock_file.display()
        )
    })?;

    // 2. Ctrl+C 优雅退出
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            eprintln!("\nReceived interrupt signal. Shutting down...");
            shutdown.store(true, Ordering::Release);
        })
        .context("Failed to set signal handler")?;
    }

    info!("Servo daemon starting...");
    info!("  Listen: {}", config.listen);
    info!(
        "  Serial: {} @ {} baud",
        config.port.as_deref().unwrap_or("auto"),
        config.baud
    );
    info!("  Data dir: {}", config.data_dir.display());
    info!("  Lock file: {}", config.lock_file.display());

    // 3. 打开串口并启动驱动（找不到设备时在这里退出）
    let mut builder = DriverBuilder::new()
        .baud_rate(config.baud)
        .data_dir(config.data_dir.clone())
        .restore(config.restore)
        .playback_config(config.playback);
    if let Some(port) = &config.port {
        builder = builder.port(port.clone());
    }
    let driver = match builder.build() {
        Ok(driver) => Arc::new(driver),
        Err(e) => {
            if e.is_device_unavailable() {
                error!("No serial device found: {}", e);
            }
            return Err(e).context("Failed to start servo driver");
        },
    };

    // 4. 启动网关（阻塞直到 Ctrl+C）
    let gateway = Gateway::bind(&config.listen, driver.clone(), shutdown)?;
    info!("Servo daemon started. Press Ctrl+C to stop.");
    gateway.run()?;

    drop(gateway);
    drop(driver);
    info!("Servo daemon stopped");
    Ok(())
}
