use super::Transport;
use crate::core::error::SyncError;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::path::{Component, Path, PathBuf};
use tokio::fs;

/// 以本地目录作为服务器根目录的传输实现
///
/// 列表输出与 IIS FTP 的 DOS 风格一致，便于离线使用和测试。
pub struct LocalTransport {
    base_path: PathBuf,
    name: String,
}

impl LocalTransport {
    pub fn new(path: &str) -> Result<Self> {
        let base_path = PathBuf::from(path);
        if !base_path.exists() {
            std::fs::create_dir_all(&base_path)?;
        }
        let name = format!("local:{}", path);
        Ok(Self { base_path, name })
    }

    fn resolve_path(&self, path: &str) -> Result<PathBuf, SyncError> {
        let path = path.trim_start_matches('/').trim_start_matches('\\');
        if path.is_empty() {
            return Ok(self.base_path.clone());
        }
        let relative = Path::new(path);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(SyncError::Domain(format!("路径越出根目录: {}", path)));
        }
        Ok(self.base_path.join(relative))
    }

    /// 把本地 I/O 错误映射为传输错误，"不存在" 单独区分
    fn map_err(path: &str, err: std::io::Error) -> SyncError {
        if err.kind() == std::io::ErrorKind::NotFound {
            SyncError::NotFound(path.to_string())
        } else {
            SyncError::Transport(format!("{}: {}", path, err))
        }
    }

    fn format_line(name: &str, metadata: &std::fs::Metadata) -> String {
        let stamp = metadata
            .modified()
            .map(|t| DateTime::<Local>::from(t).format("%m-%d-%y  %I:%M%p").to_string())
            .unwrap_or_else(|_| "01-01-70  12:00AM".to_string());

        if metadata.is_dir() {
            format!("{}       <DIR>          {}", stamp, name)
        } else {
            format!("{} {:>20} {}", stamp, metadata.len(), name)
        }
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn list_details(&self, path: &str) -> Result<String, SyncError> {
        let dir = self.resolve_path(path)?;
        let mut reader = fs::read_dir(&dir).await.map_err(|e| Self::map_err(path, e))?;

        let mut lines = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| Self::map_err(path, e))?
        {
            let metadata = entry.metadata().await.map_err(|e| Self::map_err(path, e))?;
            let name = entry.file_name().to_string_lossy().to_string();
            lines.push((name, metadata));
        }

        // read_dir 的顺序不固定，按名称排序
        lines.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(lines
            .iter()
            .map(|(name, metadata)| format!("{}\r\n", Self::format_line(name, metadata)))
            .collect())
    }

    async fn probe(&self, path: &str) -> Result<(), SyncError> {
        let dir = self.resolve_path(path)?;
        match fs::metadata(&dir).await {
            Ok(metadata) if metadata.is_dir() => Ok(()),
            Ok(_) => Err(SyncError::NotFound(path.to_string())),
            Err(e) => Err(Self::map_err(path, e)),
        }
    }

    async fn create_directory(&self, path: &str) -> Result<(), SyncError> {
        let dir = self.resolve_path(path)?;
        fs::create_dir(&dir).await.map_err(|e| Self::map_err(path, e))
    }

    async fn remove_directory(&self, path: &str) -> Result<(), SyncError> {
        let dir = self.resolve_path(path)?;
        fs::remove_dir(&dir).await.map_err(|e| Self::map_err(path, e))
    }

    async fn delete_file(&self, path: &str) -> Result<(), SyncError> {
        let file = self.resolve_path(path)?;
        fs::remove_file(&file).await.map_err(|e| Self::map_err(path, e))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), SyncError> {
        let source = self.resolve_path(from)?;
        let target = self.resolve_path(to)?;
        fs::rename(&source, &target)
            .await
            .map_err(|e| Self::map_err(from, e))
    }

    async fn upload_file(&self, local: &Path, remote: &str) -> Result<(), SyncError> {
        let target = self.resolve_path(remote)?;
        if !fs::try_exists(local).await.unwrap_or(false) {
            return Err(SyncError::local_io(
                local,
                std::io::Error::new(std::io::ErrorKind::NotFound, "本地文件不存在"),
            ));
        }
        fs::copy(local, &target)
            .await
            .map(|_| ())
            .map_err(|e| Self::map_err(remote, e))
    }

    async fn download_file(&self, remote: &str, local: &Path) -> Result<(), SyncError> {
        let source = self.resolve_path(remote)?;
        if !fs::try_exists(&source).await.unwrap_or(false) {
            return Err(SyncError::NotFound(remote.to_string()));
        }
        fs::copy(&source, local)
            .await
            .map(|_| ())
            .map_err(|e| SyncError::local_io(local, e))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
