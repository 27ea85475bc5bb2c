use crate::core::error::SyncError;
use crate::core::listing::{parse_listing, Entry};
use crate::transport::{join_remote, Transport};
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// 递归列表中的一项：相对于遍历起点的路径 + 条目本身
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ListedEntry {
    pub path: String,
    #[serde(flatten)]
    pub entry: Entry,
}

/// 一次递归遍历的结果
#[derive(Debug, Default)]
pub struct WalkOutcome {
    /// 深度优先先序排列的条目
    pub entries: Vec<ListedEntry>,
    /// 无法列出的子目录（相对路径）
    pub unreadable: Vec<String>,
}

/// 远程目录树遍历器
pub struct DirectoryWalker<'a> {
    transport: &'a dyn Transport,
    max_depth: usize,
}

impl<'a> DirectoryWalker<'a> {
    pub fn new(transport: &'a dyn Transport, max_depth: usize) -> Self {
        Self {
            transport,
            max_depth,
        }
    }

    /// 深度优先列出整棵子树
    ///
    /// 起点本身无法列出时返回错误；某个子目录失败只会让该分支没有后代，
    /// 兄弟和祖先目录继续遍历。
    pub async fn walk(&self, path: &str) -> Result<WalkOutcome, SyncError> {
        info!("开始遍历: {} ({})", path, self.transport.name());

        let mut outcome = WalkOutcome::default();
        let entries = self.list(path).await?;
        self.descend(path, "", entries, 1, &mut outcome).await;

        info!(
            "遍历完成: {} 个条目, {} 个目录无法读取",
            outcome.entries.len(),
            outcome.unreadable.len()
        );
        Ok(outcome)
    }

    async fn list(&self, path: &str) -> Result<Vec<Entry>, SyncError> {
        let raw = self.transport.list_details(path).await?;
        parse_listing(&raw)
    }

    fn descend<'b>(
        &'b self,
        remote: &'b str,
        relative: &'b str,
        entries: Vec<Entry>,
        depth: usize,
        outcome: &'b mut WalkOutcome,
    ) -> BoxFuture<'b, ()> {
        async move {
            for entry in entries {
                let child_relative = join_remote(relative, &entry.name);
                let is_dir = entry.is_dir();
                let name = entry.name.clone();

                outcome.entries.push(ListedEntry {
                    path: child_relative.clone(),
                    entry,
                });

                if !is_dir {
                    continue;
                }

                let child_remote = join_remote(remote, &name);
                match self.list_child(&child_remote, depth).await {
                    Ok(children) => {
                        self.descend(&child_remote, &child_relative, children, depth + 1, outcome)
                            .await;
                    }
                    Err(e) => {
                        warn!("无法列出子目录 {}: {}", child_remote, e);
                        outcome.unreadable.push(child_relative);
                    }
                }
            }
        }
        .boxed()
    }

    async fn list_child(&self, path: &str, depth: usize) -> Result<Vec<Entry>, SyncError> {
        if depth > self.max_depth {
            return Err(SyncError::Domain(format!(
                "超过最大递归深度 {}: {}",
                self.max_depth, path
            )));
        }
        debug!("列出子目录: {}", path);
        self.list(path).await
    }
}
