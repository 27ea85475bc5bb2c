use crate::core::error::{OperationOutcome, SyncError};
use crate::core::listing::{parse_listing, Entry};
use crate::core::walker::{DirectoryWalker, ListedEntry};
use crate::transport::{join_remote, normalize_remote, Transport};
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// 同步配置
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// 递归操作的最大深度，防止异常或循环的远程结构
    pub max_depth: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { max_depth: 64 }
    }
}

/// 批量下载的结果
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DownloadReport {
    pub downloaded: Vec<String>,
    pub failed: Vec<String>,
}

/// 本地目录的直接子项
struct LocalChildren {
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
}

/// 目录树同步引擎
///
/// 每个公开操作只有一层外部保护：执行过程中任何位置抛出的错误都会终止
/// 本次调用的剩余部分，并转换为失败结果返回，已经处理过的兄弟项保持处理后
/// 的状态，尚未处理的兄弟项被跳过。
pub struct SyncEngine {
    transport: Arc<dyn Transport>,
    config: SyncConfig,
}

impl SyncEngine {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            config: SyncConfig::default(),
        }
    }

    pub fn with_config(transport: Arc<dyn Transport>, config: SyncConfig) -> Self {
        Self { transport, config }
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// 外部保护：记录错误并转换为失败结果
    async fn guarded<T, F>(&self, operation: &str, fut: F) -> OperationOutcome<T>
    where
        F: Future<Output = Result<T, SyncError>>,
    {
        match fut.await {
            Ok(value) => {
                info!("{} 完成", operation);
                Ok(value)
            }
            Err(e) => {
                error!("{} 失败: {}", operation, e);
                Err(e.into())
            }
        }
    }

    fn check_depth(&self, depth: usize, path: &str) -> Result<(), SyncError> {
        if depth > self.config.max_depth {
            return Err(SyncError::Domain(format!(
                "超过最大递归深度 {}: {}",
                self.config.max_depth, path
            )));
        }
        Ok(())
    }

    // ============ 公开操作 ============

    /// 列出单层目录
    pub async fn list(&self, path: &str) -> OperationOutcome<Vec<Entry>> {
        let path = normalize_remote(path);
        self.guarded("列出目录", self.list_entries(&path)).await
    }

    /// 递归列出整棵子树，无法读取的子目录只记录警告
    pub async fn recursive_list(&self, path: &str) -> OperationOutcome<Vec<ListedEntry>> {
        let path = normalize_remote(path);
        self.guarded("递归列出目录", async {
            let walker = DirectoryWalker::new(self.transport.as_ref(), self.config.max_depth);
            let outcome = walker.walk(&path).await?;
            if !outcome.unreadable.is_empty() {
                warn!(
                    "{} 个子目录无法读取: {:?}",
                    outcome.unreadable.len(),
                    outcome.unreadable
                );
            }
            Ok(outcome.entries)
        })
        .await
    }

    /// 判断远程目录是否存在
    pub async fn exists_directory(&self, path: &str) -> OperationOutcome<bool> {
        let path = normalize_remote(path);
        self.guarded("检查目录", self.transport.exists(&path))
            .await
    }

    /// 逐级创建目录，已存在的层级会被跳过
    pub async fn create_directory(&self, path: &str) -> OperationOutcome<()> {
        let path = normalize_remote(path);
        self.guarded("创建目录", self.ensure_directory(&path))
            .await
    }

    /// 上传单个文件到远程目录（目录不存在时先创建）
    pub async fn upload_file(&self, local_file: &Path, remote_dir: &str) -> OperationOutcome<()> {
        let remote_dir = normalize_remote(remote_dir);
        self.guarded("上传文件", async {
            let name = file_name_of(local_file)?;
            if !local_file.is_file() {
                return Err(SyncError::local_io(
                    local_file,
                    std::io::Error::new(std::io::ErrorKind::NotFound, "本地文件不存在"),
                ));
            }
            self.ensure_directory(&remote_dir).await?;
            self.transport
                .upload_file(local_file, &join_remote(&remote_dir, &name))
                .await
        })
        .await
    }

    /// 上传整个本地目录，目标为 `remote_dir/<本地目录名>`
    pub async fn upload_tree(&self, local_dir: &Path, remote_dir: &str) -> OperationOutcome<()> {
        let remote_dir = normalize_remote(remote_dir);
        self.guarded("上传目录", self.upload_tree_at(local_dir, &remote_dir, 0))
            .await
    }

    /// 依次上传多个本地目录，第一个失败终止后续目录
    pub async fn upload_trees(
        &self,
        local_dirs: &[PathBuf],
        remote_dir: &str,
    ) -> OperationOutcome<()> {
        let remote_dir = normalize_remote(remote_dir);
        self.guarded("上传多个目录", async {
            for local_dir in local_dirs {
                self.upload_tree_at(local_dir, &remote_dir, 0).await?;
            }
            Ok(())
        })
        .await
    }

    /// 下载多个远程文件到本地目录
    ///
    /// 单个文件失败只记录并继续，结果中列出成功和失败的路径。
    pub async fn download_files(
        &self,
        remote_paths: &[String],
        local_dir: &Path,
    ) -> OperationOutcome<DownloadReport> {
        self.guarded("下载文件", async {
            ensure_local_dir(local_dir).await?;

            let mut report = DownloadReport::default();
            for remote in remote_paths {
                let remote = normalize_remote(remote);
                let name = remote.rsplit('/').next().unwrap_or_default();
                let local = match local_child(local_dir, name) {
                    Ok(local) => local,
                    Err(e) => {
                        warn!("跳过远程路径 '{}': {}", remote, e);
                        report.failed.push(remote);
                        continue;
                    }
                };

                match self.transport.download_file(&remote, &local).await {
                    Ok(()) => {
                        debug!("文件 '{}' 下载成功", name);
                        report.downloaded.push(remote);
                    }
                    Err(e) => {
                        warn!("下载文件 '{}' 时出错: {}", name, e);
                        report.failed.push(remote);
                    }
                }
            }
            Ok(report)
        })
        .await
    }

    /// 下载整个远程目录到本地目录
    pub async fn download_tree(&self, remote_dir: &str, local_dir: &Path) -> OperationOutcome<()> {
        let remote_dir = normalize_remote(remote_dir);
        self.guarded("下载目录", self.download_tree_at(&remote_dir, local_dir, 0))
            .await
    }

    /// 把远程目录移动到另一个目录下，完成后删除源目录
    pub async fn move_tree(&self, src_dir: &str, dst_dir: &str) -> OperationOutcome<()> {
        let src_dir = normalize_remote(src_dir);
        let dst_dir = normalize_remote(dst_dir);
        self.guarded("移动目录", async {
            if is_within(&dst_dir, &src_dir) {
                return Err(SyncError::Domain(format!(
                    "目标目录 '{}' 位于源目录 '{}' 内",
                    dst_dir, src_dir
                )));
            }
            self.move_tree_at(&src_dir, &dst_dir, 0).await
        })
        .await
    }

    /// 删除整个远程目录；目录不存在时直接返回
    pub async fn delete_tree(&self, dir: &str) -> OperationOutcome<()> {
        let dir = normalize_remote(dir);
        self.guarded("删除目录", self.delete_tree_at(&dir, 0)).await
    }

    /// 依次删除多个远程目录，第一个失败终止后续目录
    pub async fn delete_trees(&self, dirs: &[String]) -> OperationOutcome<()> {
        self.guarded("删除多个目录", async {
            for dir in dirs {
                self.delete_tree_at(&normalize_remote(dir), 0).await?;
            }
            Ok(())
        })
        .await
    }

    /// 按名称批量移动文件
    ///
    /// 整批共用一层保护：某个文件失败后，后面的文件都不会再处理。
    pub async fn move_files(
        &self,
        src_dir: &str,
        dst_dir: &str,
        names: &[String],
    ) -> OperationOutcome<()> {
        let src_dir = normalize_remote(src_dir);
        let dst_dir = normalize_remote(dst_dir);
        self.guarded("移动文件", async {
            self.ensure_directory(&dst_dir).await?;
            for name in names {
                self.transport
                    .rename(&join_remote(&src_dir, name), &join_remote(&dst_dir, name))
                    .await?;
                debug!("文件 '{}' 移动成功", name);
            }
            Ok(())
        })
        .await
    }

    /// 按名称批量删除文件，失败语义同 [`SyncEngine::move_files`]
    pub async fn delete_files(&self, dir: &str, names: &[String]) -> OperationOutcome<()> {
        let dir = normalize_remote(dir);
        self.guarded("删除文件", async {
            for name in names {
                self.transport.delete_file(&join_remote(&dir, name)).await?;
                debug!("文件 '{}' 删除成功", name);
            }
            Ok(())
        })
        .await
    }

    // ============ 内部实现（不带保护） ============

    async fn list_entries(&self, path: &str) -> Result<Vec<Entry>, SyncError> {
        let raw = self.transport.list_details(path).await?;
        parse_listing(&raw)
    }

    async fn ensure_directory(&self, path: &str) -> Result<(), SyncError> {
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = join_remote(&current, segment);
            if self.transport.exists(&current).await? {
                debug!("目录已存在: {}", current);
                continue;
            }
            self.transport.create_directory(&current).await?;
            debug!("目录创建成功: {}", current);
        }
        Ok(())
    }

    fn upload_tree_at<'a>(
        &'a self,
        local_dir: &'a Path,
        remote_dir: &'a str,
        depth: usize,
    ) -> BoxFuture<'a, Result<(), SyncError>> {
        async move {
            self.check_depth(depth, remote_dir)?;
            if !local_dir.is_dir() {
                return Err(SyncError::local_io(
                    local_dir,
                    std::io::Error::new(std::io::ErrorKind::NotFound, "本地文件夹不存在"),
                ));
            }

            let target = join_remote(remote_dir, &local_dir_name(local_dir).await?);
            self.ensure_directory(&target).await?;

            let children = read_local_children(local_dir).await?;
            for file in &children.files {
                let remote = join_remote(&target, &file_name_of(file)?);
                self.transport.upload_file(file, &remote).await?;
                debug!("文件上传成功: {}", remote);
            }

            for dir in &children.dirs {
                self.upload_tree_at(dir, &target, depth + 1).await?;
            }

            info!("{} 文件夹上传成功", local_dir.display());
            Ok(())
        }
        .boxed()
    }

    fn download_tree_at<'a>(
        &'a self,
        remote_dir: &'a str,
        local_dir: &'a Path,
        depth: usize,
    ) -> BoxFuture<'a, Result<(), SyncError>> {
        async move {
            self.check_depth(depth, remote_dir)?;
            ensure_local_dir(local_dir).await?;

            for entry in self.list_entries(remote_dir).await? {
                let remote = join_remote(remote_dir, &entry.name);
                let local = local_child(local_dir, &entry.name)?;
                if entry.is_dir() {
                    ensure_local_dir(&local).await?;
                    self.download_tree_at(&remote, &local, depth + 1).await?;
                } else {
                    self.transport.download_file(&remote, &local).await?;
                    debug!("文件下载成功: {}", remote);
                }
            }
            Ok(())
        }
        .boxed()
    }

    fn move_tree_at<'a>(
        &'a self,
        src_dir: &'a str,
        dst_dir: &'a str,
        depth: usize,
    ) -> BoxFuture<'a, Result<(), SyncError>> {
        async move {
            self.check_depth(depth, src_dir)?;
            if !self.transport.exists(src_dir).await? {
                return Err(SyncError::NotFound(format!("源目录不存在: {}", src_dir)));
            }
            self.ensure_directory(dst_dir).await?;

            for entry in self.list_entries(src_dir).await? {
                let from = join_remote(src_dir, &entry.name);
                let to = join_remote(dst_dir, &entry.name);
                if entry.is_dir() {
                    self.move_tree_at(&from, &to, depth + 1).await?;
                } else {
                    self.transport.rename(&from, &to).await?;
                    debug!("文件移动成功: {} -> {}", from, to);
                }
            }

            // 永远不删除服务器根目录
            if !src_dir.is_empty() {
                self.transport.remove_directory(src_dir).await?;
            }
            Ok(())
        }
        .boxed()
    }

    fn delete_tree_at<'a>(
        &'a self,
        dir: &'a str,
        depth: usize,
    ) -> BoxFuture<'a, Result<(), SyncError>> {
        async move {
            self.check_depth(depth, dir)?;
            if !self.transport.exists(dir).await? {
                info!("目录不存在，无需删除: {}", dir);
                return Ok(());
            }

            for entry in self.list_entries(dir).await? {
                let child = join_remote(dir, &entry.name);
                if entry.is_dir() {
                    self.delete_tree_at(&child, depth + 1).await?;
                } else {
                    self.transport.delete_file(&child).await?;
                    debug!("文件删除成功: {}", child);
                }
            }

            // 永远不删除服务器根目录
            if !dir.is_empty() {
                self.transport.remove_directory(dir).await?;
            }
            Ok(())
        }
        .boxed()
    }
}

/// `path` 是否等于 `dir` 或位于其下
fn is_within(path: &str, dir: &str) -> bool {
    if dir.is_empty() {
        return true;
    }
    path == dir || path.starts_with(&format!("{}/", dir))
}

fn file_name_of(path: &Path) -> Result<String, SyncError> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| SyncError::Domain(format!("无法确定名称: {}", path.display())))
}

/// 本地目录名；`.`、`..` 结尾的路径先解析为真实路径再取名称
async fn local_dir_name(dir: &Path) -> Result<String, SyncError> {
    if let Ok(name) = file_name_of(dir) {
        return Ok(name);
    }
    let resolved = tokio::fs::canonicalize(dir)
        .await
        .map_err(|e| SyncError::local_io(dir, e))?;
    file_name_of(&resolved)
}

/// 远程条目在本地目录下的路径，名称必须是单个普通路径段
fn local_child(dir: &Path, name: &str) -> Result<PathBuf, SyncError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(SyncError::Domain(format!("非法的远程条目名称: '{}'", name)));
    }
    Ok(dir.join(name))
}

async fn ensure_local_dir(dir: &Path) -> Result<(), SyncError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| SyncError::local_io(dir, e))
}

/// 列出本地目录的直接子文件和子目录（按名称排序）
async fn read_local_children(dir: &Path) -> Result<LocalChildren, SyncError> {
    let root = dir.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut children = LocalChildren {
            files: Vec::new(),
            dirs: Vec::new(),
        };
        for entry in WalkDir::new(&root)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| {
                let path = e
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| root.clone());
                SyncError::local_io(&path, std::io::Error::other(e.to_string()))
            })?;
            if entry.file_type().is_dir() {
                children.dirs.push(entry.into_path());
            } else if entry.file_type().is_file() {
                children.files.push(entry.into_path());
            }
        }
        Ok(children)
    })
    .await
    .map_err(|e| SyncError::Domain(format!("本地目录扫描任务失败: {}", e)))?
}
