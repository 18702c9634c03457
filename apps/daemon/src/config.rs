//! 守护进程配置
//!
//! 优先级：命令行参数 > 配置文件 > 默认值。
//!
//! 配置文件示例（TOML）：
//!
//! ```toml
//! log_filter = "servo_daemon=debug,servo_driver=debug"
//!
//! [serial]
//! port = "/dev/ttyACM0"
//! baud = 9600
//!
//! [gateway]
//! listen = "0.0.0.0:3001"
//!
//! [storage]
//! data_dir = "/var/lib/servo"
//! restore = true
//!
//! [playback]
//! homing_settle_ms = 2000
//! delay_per_speed_unit_ms = 50
//! import_line_delay_ms = 1000
//! min_group_delay_ms = 50
//! ```

use crate::Args;
use crate::singleton::default_lock_path;
use anyhow::{Context, Result};
use serde::Deserialize;
use servo_driver::PlaybackConfig;
use servo_protocol::DEFAULT_BAUD_RATE;
use std::path::{Path, PathBuf};

/// 默认监听地址
pub const DEFAULT_LISTEN: &str = "127.0.0.1:3001";

/// 默认日志过滤规则
pub const DEFAULT_LOG_FILTER: &str = "servo_daemon=info,servo_driver=info";

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SerialSection {
    pub port: Option<String>,
    pub baud: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewaySection {
    pub listen: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSection {
    pub data_dir: Option<PathBuf>,
    pub restore: Option<bool>,
}

/// 配置文件内容
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub log_filter: Option<String>,
    pub serial: SerialSection,
    pub gateway: GatewaySection,
    pub storage: StorageSection,
    pub playback: PlaybackConfig,
}

impl FileConfig {
    /// 读取并解析配置文件
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// 合并后的守护进程配置
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    pub listen: String,
    /// 串口路径（None 表示自动发现）
    pub port: Option<String>,
    pub baud: u32,
    pub data_dir: PathBuf,
    pub restore: bool,
    pub lock_file: PathBuf,
    pub log_filter: String,
    pub playback: PlaybackConfig,
}

impl DaemonConfig {
    /// 合并命令行参数与配置文件
    pub fn resolve(args: &Args, file: FileConfig) -> Self {
        Self {
            listen: args
                .listen
                .clone()
                .or(file.gateway.listen)
                .unwrap_or_else(|| DEFAULT_LISTEN.to_string()),
            port: args.port.clone().or(file.serial.port),
            baud: args.baud.or(file.serial.baud).unwrap_or(DEFAULT_BAUD_RATE),
            data_dir: args
                .data_dir
                .clone()
                .or(file.storage.data_dir)
                .unwrap_or_else(|| PathBuf::from(".")),
            restore: args.restore || file.storage.restore.unwrap_or(false),
            lock_file: args.lock_file.clone().unwrap_or_else(default_lock_path),
            log_filter: args
                .log_filter
                .clone()
                .or(file.log_filter)
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            playback: file.playback,
        }
    }

    /// 从命令行参数加载（含可选的配置文件）
    pub fn from_args(args: &Args) -> Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Ok(Self::resolve(args, file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args(argv: &[&str]) -> Args {
        Args::parse_from(std::iter::once("servo-daemon").chain(argv.iter().copied()))
    }

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::resolve(&args(&[]), FileConfig::default());
        assert_eq!(config.listen, "127.0.0.1:3001");
        assert_eq!(config.port, None);
        assert_eq!(config.baud, 9600);
        assert_eq!(config.data_dir, PathBuf::from("."));
        assert!(!config.restore);
        assert_eq!(config.log_filter, DEFAULT_LOG_FILTER);
        assert_eq!(config.playback, PlaybackConfig::default());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let file = FileConfig::parse(
            r#"
            log_filter = "debug"

            [serial]
            port = "/dev/ttyACM0"

            [storage]
            data_dir = "/var/lib/servo"
            restore = true

            [playback]
            delay_per_speed_unit_ms = 20
            "#,
        )
        .unwrap();

        let config = DaemonConfig::resolve(&args(&[]), file);
        assert_eq!(config.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.baud, 9600);
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/servo"));
        assert!(config.restore);
        assert_eq!(config.log_filter, "debug");
        assert_eq!(config.playback.delay_per_speed_unit_ms, 20);
        assert_eq!(config.playback.homing_settle_ms, 2000);
    }

    #[test]
    fn test_args_override_file() {
        let file = FileConfig::parse(
            r#"
            [serial]
            port = "/dev/ttyACM0"
            baud = 19200

            [gateway]
            listen = "0.0.0.0:3001"
            "#,
        )
        .unwrap();

        let config = DaemonConfig::resolve(
            &args(&["--port", "/dev/ttyUSB1", "--listen", "127.0.0.1:4000", "--restore"]),
            file,
        );
        assert_eq!(config.port.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(config.baud, 19200);
        assert_eq!(config.listen, "127.0.0.1:4000");
        assert!(config.restore);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(FileConfig::parse("[serial]\nparity = \"even\"\n").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = FileConfig::load(Path::new("/nonexistent/servo.toml")).unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/servo.toml"));
    }
}
