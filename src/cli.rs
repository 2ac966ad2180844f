use clap::{Parser, Subcommand};

impl Cli {
    /// 解析命令行参数
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}

/// MQTT Push Bridge - 将 MQTT 通知主题转发为 FCM 推送
#[derive(Parser, Debug, Default)]
#[command(name = "mqtt-push-bridge")]
#[command(version)]
#[command(about = "订阅 MQTT 主题并通过 Firebase Cloud Messaging 推送通知", long_about = None)]
pub struct Cli {
    /// 配置文件路径
    #[arg(long, value_name = "FILE", help = "指定配置文件路径")]
    pub config_file: Option<String>,

    /// MQTT Broker 地址
    #[arg(long, value_name = "HOST", help = "MQTT Broker 地址")]
    pub broker_host: Option<String>,

    /// MQTT Broker 端口
    #[arg(long, value_name = "PORT", help = "MQTT Broker 端口")]
    pub broker_port: Option<u16>,

    /// 订阅主题
    #[arg(long, value_name = "TOPIC", help = "订阅的 MQTT 主题（支持 + / # 通配符）")]
    pub topic: Option<String>,

    /// 只推送给管理员
    #[arg(long, value_name = "BOOL", help = "只向目录中的管理员条目推送: true, false")]
    pub admin_only: Option<bool>,

    /// 日志级别
    #[arg(
        long,
        value_name = "LEVEL",
        help = "日志级别: trace, debug, info, warn, error"
    )]
    pub log_level: Option<String>,

    /// 日志格式
    #[arg(long, value_name = "FORMAT", help = "日志格式: pretty, json, compact")]
    pub log_format: Option<String>,

    /// 日志文件路径
    #[arg(long, value_name = "PATH", help = "日志输出文件路径")]
    pub log_file: Option<String>,

    /// 详细输出（可重复使用：-v, -vv, -vvv）
    #[arg(short, action = clap::ArgAction::Count, help = "详细输出级别")]
    pub verbose: u8,

    /// 静默模式
    #[arg(long, short = 'q', help = "静默模式（只输出错误）")]
    pub quiet: bool,

    /// 开发模式（等同于 --log-level debug --log-format pretty）
    #[arg(long, help = "启用开发模式")]
    pub dev: bool,

    /// 不调用 FCM，只打印将要推送的消息
    #[arg(long, help = "演练模式：使用日志 Provider 代替 FCM")]
    pub dry_run: bool,

    /// 子命令
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 生成默认配置文件
    GenerateConfig {
        /// 输出文件路径
        #[arg(value_name = "PATH", default_value = "config.toml")]
        path: String,
    },
    /// 验证配置文件
    ValidateConfig {
        /// 配置文件路径
        #[arg(value_name = "PATH", default_value = "config.toml")]
        path: String,
    },
    /// 显示最终配置（合并后的配置）
    ShowConfig,
    /// 将一个 JSON 消息文件走一遍投递流程并打印汇总
    Send {
        /// 消息文件路径
        #[arg(value_name = "PATH")]
        path: String,
    },
}

impl Cli {
    /// 获取日志级别（考虑 verbose 和 quiet）
    pub fn get_log_level(&self) -> Option<String> {
        if self.quiet {
            return Some("error".to_string());
        }

        if self.dev {
            return Some("debug".to_string());
        }

        if let Some(level) = &self.log_level {
            return Some(level.clone());
        }

        match self.verbose {
            0 => None,
            1 => Some("info".to_string()),
            2 => Some("debug".to_string()),
            _ => Some("trace".to_string()),
        }
    }

    /// 获取日志格式
    pub fn get_log_format(&self) -> Option<String> {
        if self.dev {
            return Some("pretty".to_string());
        }
        self.log_format.clone()
    }
}
