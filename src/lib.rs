pub mod commands;
pub mod config;
pub mod core;
pub mod logging;
pub mod transport;

pub use commands::{invoke, InvokeData, InvokeResult, Operation, Parameters};
pub use config::{InvokeConfig, ServerConfig};
pub use crate::core::{SyncConfig, SyncEngine};
pub use transport::{create_transport, Transport};

// 平台相关目录
pub mod dirs {
    use std::path::PathBuf;

    pub fn cache_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("LOCALAPPDATA").ok().map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library").join("Caches"))
        } else {
            // Linux
            std::env::var("XDG_CACHE_HOME")
                .ok()
                .filter(|d| !d.is_empty())
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".cache"))
                })
        }
    }
}
