pub mod ftp;
pub mod local;

use crate::config::ServerConfig;
use crate::core::error::SyncError;
use anyhow::Result;
use async_trait::async_trait;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub use ftp::FtpTransport;
pub use local::LocalTransport;

// ============ 公共常量 ============

/// 目录列表超时（秒）
pub const LIST_TIMEOUT_SECS: u64 = 5;
/// 非 IO 操作超时（秒）- mkdir, delete, rename 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- 上传、下载
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 远程文件协议的基础能力
///
/// 所有路径都相对于服务器根目录，使用 `/` 分隔。
#[async_trait]
pub trait Transport: Send + Sync {
    /// 返回目录的原始详细列表文本
    async fn list_details(&self, path: &str) -> Result<String, SyncError>;

    /// 列表式探测，目录不存在时返回 [`SyncError::NotFound`]
    async fn probe(&self, path: &str) -> Result<(), SyncError>;

    /// 检查目录是否存在，仅 "不存在" 被解释为 false，其他错误继续上抛
    async fn exists(&self, path: &str) -> Result<bool, SyncError> {
        match self.probe(path).await {
            Ok(()) => Ok(true),
            Err(SyncError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// 创建一级目录
    async fn create_directory(&self, path: &str) -> Result<(), SyncError>;

    /// 删除（应为空的）目录
    async fn remove_directory(&self, path: &str) -> Result<(), SyncError>;

    /// 删除单个文件
    async fn delete_file(&self, path: &str) -> Result<(), SyncError>;

    /// 重命名或移动单个文件/目录
    async fn rename(&self, from: &str, to: &str) -> Result<(), SyncError>;

    /// 上传本地文件到远程路径
    async fn upload_file(&self, local: &Path, remote: &str) -> Result<(), SyncError>;

    /// 下载远程文件到本地路径
    async fn download_file(&self, remote: &str, local: &Path) -> Result<(), SyncError>;

    /// 获取传输名称（用于日志）
    fn name(&self) -> &str;
}

/// 拼接远程路径，空的基路径不会产生前导 `/`
pub fn join_remote(base: &str, name: &str) -> String {
    let base = base.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if base.is_empty() {
        name.to_string()
    } else if name.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, name)
    }
}

/// 规范化远程路径：统一分隔符，去掉首尾的 `/`
pub fn normalize_remote(path: &str) -> String {
    path.replace('\\', "/").trim_matches('/').to_string()
}

/// 为远程调用加上超时，超时后返回 [`SyncError::Timeout`]
pub async fn with_timeout<T, F>(secs: u64, what: &str, fut: F) -> Result<T, SyncError>
where
    F: Future<Output = Result<T, SyncError>>,
{
    match tokio::time::timeout(Duration::from_secs(secs), fut).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::Timeout(format!("{} ({}s)", what, secs))),
    }
}

/// 根据配置创建传输实例
pub fn create_transport(config: &ServerConfig) -> Result<Arc<dyn Transport>> {
    if let Some(dir) = config.server.strip_prefix("file://") {
        if dir.is_empty() {
            return Err(anyhow::anyhow!("file:// server requires a directory"));
        }
        tracing::info!("初始化本地传输: {}", dir);
        return Ok(Arc::new(LocalTransport::new(dir)?) as Arc<dyn Transport>);
    }

    tracing::info!("初始化 FTP 传输: {}:{}", config.host()?, config.port);
    Ok(Arc::new(FtpTransport::new(config.clone())?) as Arc<dyn Transport>)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_remote() {
        assert_eq!(join_remote("", "a"), "a");
        assert_eq!(join_remote("a", "b"), "a/b");
        assert_eq!(join_remote("a/", "b"), "a/b");
        assert_eq!(join_remote("a", ""), "a");
        assert_eq!(join_remote("a/b", "c d"), "a/b/c d");
    }

    #[test]
    fn test_normalize_remote() {
        assert_eq!(normalize_remote("/a/b/"), "a/b");
        assert_eq!(normalize_remote("a\\b"), "a/b");
        assert_eq!(normalize_remote(""), "");
    }

    #[tokio::test]
    async fn test_with_timeout_elapsed() {
        let result: Result<(), SyncError> = with_timeout(0, "list", async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(SyncError::Timeout(_))));
    }
}
