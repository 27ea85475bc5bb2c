use clap::Parser;
use ftpsync_lib::core::ErrorKind;
use ftpsync_lib::logging::init_logging;
use ftpsync_lib::{
    create_transport, invoke, InvokeConfig, InvokeResult, Parameters, SyncConfig, SyncEngine,
};
use std::path::PathBuf;
use std::process::ExitCode;

/// 按配置文件执行一次 FTP 目录同步操作，结果以 JSON 输出到 stdout
#[derive(Parser, Debug)]
#[command(name = "ftpsync", version, about)]
struct Cli {
    /// 调用配置文件（JSON）
    config: PathBuf,
}

fn emit(result: &InvokeResult) -> ExitCode {
    match serde_json::to_string(result) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("无法序列化结果: {}", e);
            return ExitCode::FAILURE;
        }
    }
    if result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match InvokeConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            return emit(&InvokeResult::failure(
                format!("{:#}", e),
                ErrorKind::InvalidParameter,
            ))
        }
    };

    init_logging(&config.log);

    let transport = match create_transport(&config.server_config()) {
        Ok(transport) => transport,
        Err(e) => {
            tracing::error!("初始化传输失败: {:#}", e);
            return emit(&InvokeResult::failure(
                format!("{:#}", e),
                ErrorKind::InvalidParameter,
            ));
        }
    };

    let engine = SyncEngine::with_config(
        transport,
        SyncConfig {
            max_depth: config.engine.max_depth,
        },
    );

    let result = invoke(&engine, config.method_name, &Parameters::from_config(&config)).await;
    emit(&result)
}
