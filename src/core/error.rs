//! 错误分类 - 传输层、本地 I/O 与引擎自身的前置条件错误

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 引擎内部错误，在每个公开操作的外层保护处转换为 [`OperationFailure`]
#[derive(Error, Debug)]
pub enum SyncError {
    /// 远程调用超时
    #[error("连接超时: {0}")]
    Timeout(String),

    /// 其他传输层错误（非预期状态码、连接中断等）
    #[error("传输错误: {0}")]
    Transport(String),

    /// 远程目录或文件不存在
    #[error("不存在: {0}")]
    NotFound(String),

    /// 本地路径缺失或无法创建
    #[error("本地 I/O 错误 '{path}': {source}")]
    LocalIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// 引擎自身检查出的前置条件失败
    #[error("{0}")]
    Domain(String),

    /// 目录列表中的文件大小无法解析
    #[error("无法解析目录列表: {0}")]
    InvalidListing(String),

    /// 调用参数缺失或类型不符
    #[error("参数错误: {0}")]
    InvalidParameter(String),
}

impl SyncError {
    pub fn local_io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        SyncError::LocalIo {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Timeout(_) => ErrorKind::Timeout,
            SyncError::Transport(_) => ErrorKind::Transport,
            SyncError::NotFound(_) => ErrorKind::NotFound,
            SyncError::LocalIo { .. } => ErrorKind::LocalIo,
            SyncError::Domain(_) => ErrorKind::Domain,
            SyncError::InvalidListing(_) => ErrorKind::InvalidListing,
            SyncError::InvalidParameter(_) => ErrorKind::InvalidParameter,
        }
    }
}

/// 失败类别，随结果信封一起输出，调用方可据此分支
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Timeout,
    Transport,
    NotFound,
    LocalIo,
    Domain,
    InvalidListing,
    InvalidParameter,
}

/// 公开操作的失败结果
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[error("{message}")]
pub struct OperationFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<SyncError> for OperationFailure {
    fn from(err: SyncError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// 所有公开引擎操作的返回类型，错误永远不会越过操作边界
pub type OperationOutcome<T> = Result<T, OperationFailure>;
