//! 调用配置模块

use crate::commands::invoke::Operation;
use crate::logging::LogConfig;
use crate::transport::{IO_TIMEOUT_SECS, LIST_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

/// 默认 FTP 端口
pub const DEFAULT_PORT: u16 = 21;

/// 一次调用的完整配置：服务器、凭据、操作名和最多三个位置参数
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeConfig {
    #[serde(alias = "FtpServer", alias = "Server")]
    pub server: String,
    #[serde(
        default = "default_port",
        alias = "Port",
        deserialize_with = "deserialize_port"
    )]
    pub port: u16,
    #[serde(default, alias = "UserName")]
    pub user_name: String,
    #[serde(default, alias = "PassWord")]
    pub pass_word: String,
    #[serde(alias = "MethodName")]
    pub method_name: Operation,
    #[serde(default, alias = "Parameter1")]
    pub parameter1: Option<serde_json::Value>,
    #[serde(default, alias = "Parameter2")]
    pub parameter2: Option<serde_json::Value>,
    #[serde(default, alias = "Parameter3")]
    pub parameter3: Option<serde_json::Value>,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// 端口既可以写成数字，也可以写成字符串
fn deserialize_port<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortValue {
        Number(u16),
        Text(String),
    }

    match PortValue::deserialize(deserializer)? {
        PortValue::Number(n) => Ok(n),
        PortValue::Text(s) if s.trim().is_empty() => Ok(DEFAULT_PORT),
        PortValue::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid port: {}", s))),
    }
}

impl InvokeConfig {
    /// 从 JSON 配置文件加载
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        // 兼容带 BOM 的配置文件
        let content = content.trim_start_matches('\u{feff}');
        let config: InvokeConfig =
            serde_json::from_str(content).context("invalid invoke config")?;
        if config.server.trim().is_empty() {
            return Err(anyhow::anyhow!("server must not be empty"));
        }
        Ok(config)
    }

    /// 提取不可变的服务器配置
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            server: self.server.trim().to_string(),
            port: self.port,
            user_name: self.user_name.clone(),
            password: self.pass_word.clone(),
            list_timeout_secs: self.engine.list_timeout_secs,
            op_timeout_secs: self.engine.op_timeout_secs,
            io_timeout_secs: self.engine.io_timeout_secs,
        }
    }
}

/// 引擎与超时设置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSettings {
    /// 递归最大深度
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_list_timeout")]
    pub list_timeout_secs: u64,
    #[serde(default = "default_op_timeout")]
    pub op_timeout_secs: u64,
    #[serde(default = "default_io_timeout")]
    pub io_timeout_secs: u64,
}

fn default_max_depth() -> usize {
    64
}

fn default_list_timeout() -> u64 {
    LIST_TIMEOUT_SECS
}

fn default_op_timeout() -> u64 {
    OP_TIMEOUT_SECS
}

fn default_io_timeout() -> u64 {
    IO_TIMEOUT_SECS
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            list_timeout_secs: default_list_timeout(),
            op_timeout_secs: default_op_timeout(),
            io_timeout_secs: default_io_timeout(),
        }
    }
}

/// 服务器地址与凭据，构造后不再修改
#[derive(Clone)]
pub struct ServerConfig {
    /// `ftp://host[/base]` 或 `file:///dir`
    pub server: String,
    pub port: u16,
    pub user_name: String,
    pub password: String,
    pub list_timeout_secs: u64,
    pub op_timeout_secs: u64,
    pub io_timeout_secs: u64,
}

impl ServerConfig {
    fn without_scheme(&self) -> &str {
        self.server
            .strip_prefix("ftp://")
            .or_else(|| self.server.strip_prefix("FTP://"))
            .unwrap_or(&self.server)
    }

    /// 主机名
    pub fn host(&self) -> Result<&str> {
        let rest = self.without_scheme();
        let host = rest.split('/').next().unwrap_or_default();
        // 地址中自带端口时以配置的端口为准
        let host = host.split(':').next().unwrap_or_default();
        if host.is_empty() {
            return Err(anyhow::anyhow!("no host in server address '{}'", self.server));
        }
        Ok(host)
    }

    /// 地址中主机之后的路径，作为所有远程路径的前缀
    pub fn base_path(&self) -> String {
        let rest = self.without_scheme();
        match rest.find('/') {
            Some(idx) => rest[idx..].trim_matches('/').to_string(),
            None => String::new(),
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("user_name", &self.user_name)
            .field("password", &"***")
            .finish()
    }
}
