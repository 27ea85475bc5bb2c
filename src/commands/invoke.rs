//! 调度器 - 按操作名把一次调用分派到 SyncEngine，并封装为结果信封

use crate::config::InvokeConfig;
use crate::core::engine::{DownloadReport, SyncEngine};
use crate::core::error::{ErrorKind, OperationFailure, OperationOutcome, SyncError};
use crate::core::listing::Entry;
use crate::core::walker::ListedEntry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use tracing::info;

/// 可调用的操作，兼容旧的方法名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    #[serde(alias = "FtpQueryAll")]
    List,
    #[serde(alias = "FtpRecursiveQueryAll", alias = "RecursiveQueryAll")]
    RecursiveList,
    #[serde(alias = "FtpDirectoryExists")]
    ExistsDirectory,
    #[serde(alias = "FtpCreateDirectory")]
    CreateDirectory,
    #[serde(alias = "FtpUploadFile")]
    UploadFile,
    #[serde(alias = "FtpUploadFolder")]
    UploadTree,
    #[serde(alias = "FtpUploadFolders")]
    UploadTrees,
    #[serde(alias = "FtpDownloadFile")]
    DownloadFiles,
    #[serde(alias = "FtpDownloadFolder")]
    DownloadTree,
    #[serde(alias = "FtpMoveFiles")]
    MoveFiles,
    #[serde(alias = "FtpMoveFolder")]
    MoveTree,
    #[serde(alias = "FtpDeleteFiles")]
    DeleteFiles,
    #[serde(alias = "FtpDeleteFolder")]
    DeleteTree,
    #[serde(alias = "FtpDeleteFolders")]
    DeleteTrees,
    /// 清空服务器根目录（或指定目录）
    #[serde(alias = "FtpDeleteAll")]
    DeleteAll,
}

/// 最多三个位置参数
#[derive(Debug, Clone, Default)]
pub struct Parameters {
    values: [Option<Value>; 3],
}

impl Parameters {
    pub fn new(
        parameter1: Option<Value>,
        parameter2: Option<Value>,
        parameter3: Option<Value>,
    ) -> Self {
        Self {
            values: [parameter1, parameter2, parameter3],
        }
    }

    pub fn from_config(config: &InvokeConfig) -> Self {
        Self::new(
            config.parameter1.clone(),
            config.parameter2.clone(),
            config.parameter3.clone(),
        )
    }

    fn value(&self, index: usize) -> Option<&Value> {
        self.values
            .get(index)
            .and_then(Option::as_ref)
            .filter(|v| !v.is_null())
    }

    /// 读取字符串参数（序号从 1 开始）
    fn string(&self, index: usize) -> Result<String, SyncError> {
        match self.value(index - 1) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(other) => Err(SyncError::InvalidParameter(format!(
                "parameter{} 应为字符串，实际为 {}",
                index, other
            ))),
            None => Err(SyncError::InvalidParameter(format!(
                "缺少 parameter{}",
                index
            ))),
        }
    }

    /// 可缺省的字符串参数
    fn string_or(&self, index: usize, default: &str) -> Result<String, SyncError> {
        match self.value(index - 1) {
            None => Ok(default.to_string()),
            Some(_) => self.string(index),
        }
    }

    /// 读取字符串列表参数，单个字符串视为只有一个元素的列表
    fn strings(&self, index: usize) -> Result<Vec<String>, SyncError> {
        match self.value(index - 1) {
            Some(Value::String(s)) => Ok(vec![s.clone()]),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    other => Err(SyncError::InvalidParameter(format!(
                        "parameter{} 的元素应为字符串，实际为 {}",
                        index, other
                    ))),
                })
                .collect(),
            Some(other) => Err(SyncError::InvalidParameter(format!(
                "parameter{} 应为字符串列表，实际为 {}",
                index, other
            ))),
            None => Err(SyncError::InvalidParameter(format!(
                "缺少 parameter{}",
                index
            ))),
        }
    }

    fn path(&self, index: usize) -> Result<PathBuf, SyncError> {
        self.string(index).map(PathBuf::from)
    }

    fn paths(&self, index: usize) -> Result<Vec<PathBuf>, SyncError> {
        Ok(self.strings(index)?.into_iter().map(PathBuf::from).collect())
    }
}

/// 成功时返回的数据
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum InvokeData {
    Entries(Vec<Entry>),
    Tree(Vec<ListedEntry>),
    Flag(bool),
    Report(DownloadReport),
    /// 无返回值操作的结果码：0 成功，1 失败
    Code(u8),
}

/// 结果信封
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InvokeResult {
    pub message: Option<String>,
    pub data: Option<InvokeData>,
    pub error_kind: Option<ErrorKind>,
}

impl InvokeResult {
    pub const SUCCESS_CODE: u8 = 0;
    pub const FAILURE_CODE: u8 = 1;

    pub fn is_success(&self) -> bool {
        self.error_kind.is_none()
    }

    /// 无法执行任何操作时（例如配置无效）的失败信封
    pub fn failure(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            message: Some(message.into()),
            data: None,
            error_kind: Some(kind),
        }
    }

    fn from_value<T>(outcome: OperationOutcome<T>, wrap: impl FnOnce(T) -> InvokeData) -> Self {
        match outcome {
            Ok(value) => Self {
                message: None,
                data: Some(wrap(value)),
                error_kind: None,
            },
            Err(failure) => Self::failed(failure, None),
        }
    }

    fn from_unit(outcome: OperationOutcome<()>) -> Self {
        match outcome {
            Ok(()) => Self {
                message: None,
                data: Some(InvokeData::Code(Self::SUCCESS_CODE)),
                error_kind: None,
            },
            Err(failure) => Self::failed(failure, Some(InvokeData::Code(Self::FAILURE_CODE))),
        }
    }

    fn failed(failure: OperationFailure, data: Option<InvokeData>) -> Self {
        Self {
            message: Some(failure.message),
            data,
            error_kind: Some(failure.kind),
        }
    }
}

/// 参数解码失败时按操作的返回类型生成信封
fn parameter_failure(operation: Operation, err: SyncError) -> InvokeResult {
    let failure = OperationFailure::from(err);
    if returns_unit(operation) {
        InvokeResult::failed(failure, Some(InvokeData::Code(InvokeResult::FAILURE_CODE)))
    } else {
        InvokeResult::failed(failure, None)
    }
}

fn returns_unit(operation: Operation) -> bool {
    !matches!(
        operation,
        Operation::List
            | Operation::RecursiveList
            | Operation::ExistsDirectory
            | Operation::DownloadFiles
    )
}

/// 执行一次调用
pub async fn invoke(engine: &SyncEngine, operation: Operation, params: &Parameters) -> InvokeResult {
    info!("调用操作 {:?} ({})", operation, engine.transport().name());

    let result = match dispatch(engine, operation, params).await {
        Ok(result) => result,
        Err(e) => parameter_failure(operation, e),
    };

    if let Some(message) = &result.message {
        info!("操作 {:?} 失败: {}", operation, message);
    }
    result
}

async fn dispatch(
    engine: &SyncEngine,
    operation: Operation,
    params: &Parameters,
) -> Result<InvokeResult, SyncError> {
    let result = match operation {
        Operation::List => {
            let path = params.string_or(1, "")?;
            InvokeResult::from_value(engine.list(&path).await, InvokeData::Entries)
        }
        Operation::RecursiveList => {
            let path = params.string(1)?;
            InvokeResult::from_value(engine.recursive_list(&path).await, InvokeData::Tree)
        }
        Operation::ExistsDirectory => {
            let path = params.string(1)?;
            InvokeResult::from_value(engine.exists_directory(&path).await, InvokeData::Flag)
        }
        Operation::CreateDirectory => {
            let path = params.string(1)?;
            InvokeResult::from_unit(engine.create_directory(&path).await)
        }
        Operation::UploadFile => {
            let local = params.path(1)?;
            let remote = params.string_or(2, "")?;
            InvokeResult::from_unit(engine.upload_file(&local, &remote).await)
        }
        Operation::UploadTree => {
            let local = params.path(1)?;
            let remote = params.string_or(2, "")?;
            InvokeResult::from_unit(engine.upload_tree(&local, &remote).await)
        }
        Operation::UploadTrees => {
            let locals = params.paths(1)?;
            let remote = params.string_or(2, "")?;
            InvokeResult::from_unit(engine.upload_trees(&locals, &remote).await)
        }
        Operation::DownloadFiles => {
            let remotes = params.strings(1)?;
            let local = params.path(2)?;
            InvokeResult::from_value(
                engine.download_files(&remotes, &local).await,
                InvokeData::Report,
            )
        }
        Operation::DownloadTree => {
            let remote = params.string(1)?;
            let local = params.path(2)?;
            InvokeResult::from_unit(engine.download_tree(&remote, &local).await)
        }
        Operation::MoveFiles => {
            let src = params.string(1)?;
            let dst = params.string(2)?;
            let names = params.strings(3)?;
            InvokeResult::from_unit(engine.move_files(&src, &dst, &names).await)
        }
        Operation::MoveTree => {
            let src = params.string(1)?;
            let dst = params.string(2)?;
            InvokeResult::from_unit(engine.move_tree(&src, &dst).await)
        }
        Operation::DeleteFiles => {
            let dir = params.string(1)?;
            let names = params.strings(2)?;
            InvokeResult::from_unit(engine.delete_files(&dir, &names).await)
        }
        Operation::DeleteTree => {
            let dir = params.string(1)?;
            InvokeResult::from_unit(engine.delete_tree(&dir).await)
        }
        Operation::DeleteTrees => {
            let dirs = params.strings(1)?;
            InvokeResult::from_unit(engine.delete_trees(&dirs).await)
        }
        Operation::DeleteAll => {
            let dir = params.string_or(1, "")?;
            InvokeResult::from_unit(engine.delete_tree(&dir).await)
        }
    };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalTransport;
    use serde_json::json;
    use std::sync::Arc;

    fn engine(dir: &tempfile::TempDir) -> SyncEngine {
        let transport = LocalTransport::new(dir.path().to_str().unwrap()).unwrap();
        SyncEngine::new(Arc::new(transport))
    }

    fn params(values: &[Value]) -> Parameters {
        let mut it = values.iter().cloned();
        Parameters::new(it.next(), it.next(), it.next())
    }

    #[test]
    fn test_operation_aliases() {
        let op: Operation = serde_json::from_value(json!("FtpRecursiveQueryAll")).unwrap();
        assert_eq!(op, Operation::RecursiveList);
        let op: Operation = serde_json::from_value(json!("RecursiveQueryAll")).unwrap();
        assert_eq!(op, Operation::RecursiveList);
        let op: Operation = serde_json::from_value(json!("deleteAll")).unwrap();
        assert_eq!(op, Operation::DeleteAll);
        assert!(serde_json::from_value::<Operation>(json!("format")).is_err());
    }

    #[test]
    fn test_strings_accepts_single_string() {
        let p = params(&[json!("one"), json!(["a", "b"]), json!(3)]);
        assert_eq!(p.strings(1).unwrap(), vec!["one".to_string()]);
        assert_eq!(p.strings(2).unwrap().len(), 2);
        assert!(p.strings(3).is_err());
    }

    #[tokio::test]
    async fn test_list_envelope() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "abc").unwrap();
        let result = invoke(&engine(&dir), Operation::List, &params(&[json!("")])).await;

        assert!(result.is_success());
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["message"], Value::Null);
        assert_eq!(value["errorKind"], Value::Null);
        assert_eq!(value["data"][0]["name"], "a.txt");
        assert_eq!(value["data"][0]["size"], 3);
        assert_eq!(value["data"][0]["kind"], "file");
    }

    #[tokio::test]
    async fn test_unit_operation_codes() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir);

        let ok = invoke(&engine, Operation::CreateDirectory, &params(&[json!("x/y")])).await;
        assert_eq!(ok.data, Some(InvokeData::Code(0)));
        assert!(dir.path().join("x/y").is_dir());

        let failed = invoke(
            &engine,
            Operation::MoveTree,
            &params(&[json!("missing"), json!("dst")]),
        )
        .await;
        assert_eq!(failed.data, Some(InvokeData::Code(1)));
        assert_eq!(failed.error_kind, Some(ErrorKind::NotFound));
        assert!(failed.message.is_some());
    }

    #[tokio::test]
    async fn test_value_operation_failure_has_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let result = invoke(&engine(&dir), Operation::List, &params(&[json!("nope")])).await;
        assert_eq!(result.data, None);
        assert_eq!(result.error_kind, Some(ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn test_missing_parameter() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir);

        let result = invoke(&engine, Operation::MoveTree, &params(&[json!("a")])).await;
        assert_eq!(result.error_kind, Some(ErrorKind::InvalidParameter));
        assert_eq!(result.data, Some(InvokeData::Code(1)));

        let result = invoke(&engine, Operation::ExistsDirectory, &Parameters::default()).await;
        assert_eq!(result.error_kind, Some(ErrorKind::InvalidParameter));
        assert_eq!(result.data, None);
    }

    #[tokio::test]
    async fn test_delete_all_defaults_to_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/b/f"), "f").unwrap();
        std::fs::write(dir.path().join("top.txt"), "t").unwrap();

        let result = invoke(&engine(&dir), Operation::DeleteAll, &Parameters::default()).await;
        assert!(result.is_success());
        assert!(dir.path().is_dir());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_remote_root_defaults_when_omitted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("top.txt"), "t").unwrap();
        let engine = engine(&dir);

        let listed = invoke(&engine, Operation::List, &Parameters::default()).await;
        assert!(listed.is_success());
        let value = serde_json::to_value(&listed).unwrap();
        assert_eq!(value["data"][0]["name"], "top.txt");

        let local = tempfile::tempdir().unwrap();
        let file = local.path().join("note.txt");
        std::fs::write(&file, "n").unwrap();
        let uploaded = invoke(
            &engine,
            Operation::UploadFile,
            &params(&[json!(file.to_str().unwrap())]),
        )
        .await;
        assert_eq!(uploaded.data, Some(InvokeData::Code(0)));
        assert!(dir.path().join("note.txt").is_file());

        let tree = local.path().join("tree");
        std::fs::create_dir(&tree).unwrap();
        std::fs::write(tree.join("leaf.txt"), "l").unwrap();
        let uploaded = invoke(
            &engine,
            Operation::UploadTrees,
            &params(&[json!(tree.to_str().unwrap())]),
        )
        .await;
        assert!(uploaded.is_success());
        assert!(dir.path().join("tree/leaf.txt").is_file());
    }

    #[tokio::test]
    async fn test_exists_envelope() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("here")).unwrap();
        let engine = engine(&dir);

        let yes = invoke(&engine, Operation::ExistsDirectory, &params(&[json!("here")])).await;
        assert_eq!(yes.data, Some(InvokeData::Flag(true)));
        let no = invoke(&engine, Operation::ExistsDirectory, &params(&[json!("gone")])).await;
        assert_eq!(no.data, Some(InvokeData::Flag(false)));
        assert!(no.is_success());
    }

    #[tokio::test]
    async fn test_download_files_report() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        let target = tempfile::tempdir().unwrap();

        let result = invoke(
            &engine(&dir),
            Operation::DownloadFiles,
            &params(&[
                json!(["a.txt", "b.txt"]),
                json!(target.path().to_str().unwrap()),
            ]),
        )
        .await;

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["data"]["downloaded"], json!(["a.txt"]));
        assert_eq!(value["data"]["failed"], json!(["b.txt"]));
    }
}
