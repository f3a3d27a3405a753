//! 统一配置中心
//!
//! 提供实时网关的全局配置管理，包括：
//! - 服务监听地址
//! - JWT认证
//! - 可选的数据库连接
//! - 实时层参数（队列容量、心跳、存活检查）
//!
//! 加载顺序：内置默认值 → `TASKHUB_CONFIG_FILE` 指定的文件 → `TASKHUB_*` 环境变量。

use std::time::Duration;

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// 配置文件路径的环境变量
pub const CONFIG_FILE_ENV: &str = "TASKHUB_CONFIG_FILE";
/// 环境变量前缀
pub const ENV_PREFIX: &str = "TASKHUB_";

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务配置
    pub server: ServerConfig,
    /// JWT认证配置
    pub jwt: JwtConfig,
    /// 数据库配置；缺省时使用内存存储
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    /// 实时层配置
    #[serde(default)]
    pub realtime: RealtimeConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// JWT配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub expiration_hours: i64,
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

/// 实时层配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// 每个连接的出站队列容量，满了之后丢弃新事件
    pub outbound_queue_capacity: usize,
    /// 服务端发送 WebSocket Ping 的间隔
    pub heartbeat_interval_secs: u64,
    /// 存活检查的扫描间隔
    pub sweep_interval_secs: u64,
    /// 超过这个时间没有任何入站帧的连接视为失效
    pub stale_after_secs: u64,
    /// 上线/下线通知通道容量
    pub presence_channel_capacity: usize,
    /// 是否跳过触发变更的那个连接
    pub suppress_origin_echo: bool,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: 256,
            heartbeat_interval_secs: 30,
            sweep_interval_secs: 60,
            stale_after_secs: 300,
            presence_channel_capacity: 1024,
            suppress_origin_echo: true,
        }
    }
}

impl RealtimeConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

impl AppConfig {
    /// 开发环境默认值，提供不安全的密钥，仅用于测试和开发
    pub fn development() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            jwt: JwtConfig {
                secret: "dev-secret-key-not-for-production-use-minimum-32-chars".to_string(),
                expiration_hours: 24 * 7,
            },
            database: None,
            realtime: RealtimeConfig::default(),
        }
    }

    /// 按 默认值 → 配置文件 → 环境变量 的顺序合并配置
    pub fn figment() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::development()));
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            figment = if path.ends_with(".yml") || path.ends_with(".yaml") {
                figment.merge(Yaml::file(path))
            } else if path.ends_with(".json") {
                figment.merge(Json::file(path))
            } else {
                figment.merge(Toml::file(path))
            };
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// 加载并验证配置
    pub fn load() -> Result<Self, ConfigError> {
        let config: AppConfig = Self::figment().extract().map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        // JWT密钥至少256位/32字节
        if self.jwt.secret.len() < 32 {
            return Err(ConfigError::InvalidJwtSecret(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }

        if self.jwt.expiration_hours <= 0 {
            return Err(ConfigError::InvalidJwtSecret(
                "JWT expiration must be positive".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigError::InvalidServerPort(
                "port 0 is reserved".to_string(),
            ));
        }

        if let Some(database) = &self.database {
            if database.url.is_empty() {
                return Err(ConfigError::InvalidDatabaseUrl(
                    "Database URL cannot be empty".to_string(),
                ));
            }
            if database.max_connections == 0 {
                return Err(ConfigError::InvalidDatabaseConfig(
                    "Max connections must be greater than 0".to_string(),
                ));
            }
        }

        let realtime = &self.realtime;
        if realtime.outbound_queue_capacity == 0 || realtime.presence_channel_capacity == 0 {
            return Err(ConfigError::InvalidRealtimeConfig(
                "queue capacities must be greater than 0".to_string(),
            ));
        }
        if realtime.heartbeat_interval_secs == 0
            || realtime.sweep_interval_secs == 0
            || realtime.stale_after_secs == 0
        {
            return Err(ConfigError::InvalidRealtimeConfig(
                "heartbeat, sweep and staleness intervals must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for AppConfig {
    /// 默认配置使用开发环境版本
    fn default() -> Self {
        Self::development()
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid database URL: {0}")]
    InvalidDatabaseUrl(String),
    #[error("Invalid JWT secret: {0}")]
    InvalidJwtSecret(String),
    #[error("Invalid server port: {0}")]
    InvalidServerPort(String),
    #[error("Invalid database configuration: {0}")]
    InvalidDatabaseConfig(String),
    #[error("Invalid realtime configuration: {0}")]
    InvalidRealtimeConfig(String),
    #[error("Failed to load configuration: {0}")]
    Load(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Load(Box::new(err))
    }
}
