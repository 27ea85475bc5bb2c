use super::{join_remote, normalize_remote, with_timeout, Transport};
use crate::config::ServerConfig;
use crate::core::error::SyncError;
use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::OnceLock;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

/// 服务器响应
#[derive(Debug, Clone)]
struct Reply {
    code: u16,
    text: String,
}

/// 文件不可用（不存在或无权限）
const FILE_UNAVAILABLE: u16 = 550;

fn io_error(what: &str, err: std::io::Error) -> SyncError {
    if err.kind() == std::io::ErrorKind::TimedOut {
        SyncError::Timeout(format!("{}: {}", what, err))
    } else {
        SyncError::Transport(format!("{}: {}", what, err))
    }
}

/// 把非预期的响应转换为错误，550 视为不存在
fn reply_error(command: &str, reply: &Reply) -> SyncError {
    if reply.code == FILE_UNAVAILABLE {
        SyncError::NotFound(format!("{} ({})", command, reply.text))
    } else {
        SyncError::Transport(format!("{} -> {} {}", command, reply.code, reply.text))
    }
}

static PASV_ADDR: OnceLock<Option<Regex>> = OnceLock::new();

/// 227 响应中地址部分的匹配表达式，只编译一次
fn pasv_pattern() -> Option<&'static Regex> {
    PASV_ADDR
        .get_or_init(|| {
            Regex::new(r"(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3})").ok()
        })
        .as_ref()
}

/// 解析 227 响应中的 `h1,h2,h3,h4,p1,p2`，返回数据端口
fn parse_pasv_port(text: &str) -> Result<u16, SyncError> {
    let re = pasv_pattern()
        .ok_or_else(|| SyncError::Transport("被动模式地址表达式无效".to_string()))?;
    let caps = re
        .captures(text)
        .ok_or_else(|| SyncError::Transport(format!("无法解析被动模式地址: {}", text)))?;

    let p1: u16 = caps[5]
        .parse()
        .map_err(|_| SyncError::Transport(format!("无效的被动模式端口: {}", text)))?;
    let p2: u16 = caps[6]
        .parse()
        .map_err(|_| SyncError::Transport(format!("无效的被动模式端口: {}", text)))?;
    if p1 > 255 || p2 > 255 {
        return Err(SyncError::Transport(format!("无效的被动模式端口: {}", text)));
    }
    Ok(p1 * 256 + p2)
}

/// 一条已登录的控制连接
struct Session {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    peer: SocketAddr,
}

impl Session {
    async fn connect(config: &ServerConfig) -> Result<Self, SyncError> {
        let host = config
            .host()
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        let addr = format!("{}:{}", host, config.port);

        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| io_error(&format!("连接 {}", addr), e))?;
        let peer = stream
            .peer_addr()
            .map_err(|e| io_error("peer_addr", e))?;
        let (read_half, write_half) = stream.into_split();

        let mut session = Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            peer,
        };

        let greeting = session.read_reply().await?;
        if greeting.code != 220 {
            return Err(reply_error("connect", &greeting));
        }

        let reply = session
            .command(&format!("USER {}", config.user_name))
            .await?;
        match reply.code {
            230 => {}
            331 => {
                let reply = session
                    .command(&format!("PASS {}", config.password))
                    .await?;
                if !matches!(reply.code, 230 | 202) {
                    return Err(reply_error("PASS", &reply));
                }
            }
            _ => return Err(reply_error("USER", &reply)),
        }

        session.expect("TYPE I", &[200]).await?;
        Ok(session)
    }

    async fn read_line(&mut self) -> Result<String, SyncError> {
        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| io_error("读取响应", e))?;
        if n == 0 {
            return Err(SyncError::Transport("服务器关闭了控制连接".to_string()));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    async fn read_reply(&mut self) -> Result<Reply, SyncError> {
        let first = self.read_line().await?;
        let code: u16 = first
            .get(..3)
            .and_then(|c| c.parse().ok())
            .ok_or_else(|| SyncError::Transport(format!("无效的响应: {}", first)))?;
        let mut text = first.get(4..).unwrap_or_default().to_string();

        // 多行响应以 "xyz-" 开始，以 "xyz " 结束
        if first.as_bytes().get(3) == Some(&b'-') {
            let terminator = format!("{} ", code);
            loop {
                let line = self.read_line().await?;
                text.push('\n');
                text.push_str(&line);
                if line.starts_with(&terminator) {
                    break;
                }
            }
        }

        debug!("< {} {}", code, text);
        Ok(Reply { code, text })
    }

    async fn command(&mut self, command: &str) -> Result<Reply, SyncError> {
        if command.starts_with("PASS ") {
            debug!("> PASS ***");
        } else {
            debug!("> {}", command);
        }
        self.writer
            .write_all(format!("{}\r\n", command).as_bytes())
            .await
            .map_err(|e| io_error("发送命令", e))?;
        self.read_reply().await
    }

    async fn expect(&mut self, command: &str, codes: &[u16]) -> Result<Reply, SyncError> {
        let reply = self.command(command).await?;
        if codes.contains(&reply.code) {
            Ok(reply)
        } else {
            Err(reply_error(command, &reply))
        }
    }

    /// 进入被动模式并建立数据连接
    ///
    /// 数据连接沿用控制连接的对端地址，只取 227 响应中的端口。
    async fn passive(&mut self) -> Result<TcpStream, SyncError> {
        let reply = self.expect("PASV", &[227]).await?;
        let port = parse_pasv_port(&reply.text)?;
        let addr = SocketAddr::new(self.peer.ip(), port);
        TcpStream::connect(addr)
            .await
            .map_err(|e| io_error(&format!("数据连接 {}", addr), e))
    }

    /// 打开数据连接并发出传输命令，等待 1xx 预备响应
    async fn open_transfer(&mut self, command: &str) -> Result<TcpStream, SyncError> {
        let data = self.passive().await?;
        let reply = self.command(command).await?;
        if matches!(reply.code, 125 | 150) {
            Ok(data)
        } else {
            Err(reply_error(command, &reply))
        }
    }

    async fn finish_transfer(&mut self, command: &str) -> Result<(), SyncError> {
        let reply = self.read_reply().await?;
        if matches!(reply.code, 226 | 250) {
            Ok(())
        } else {
            Err(reply_error(command, &reply))
        }
    }

    async fn quit(mut self) {
        let _ = self.command("QUIT").await;
    }
}

/// FTP 传输
///
/// 每次基础调用都建立一条新的控制连接，完成后立即 QUIT，不做连接复用。
pub struct FtpTransport {
    config: ServerConfig,
    base_path: String,
    name: String,
}

impl FtpTransport {
    pub fn new(config: ServerConfig) -> Result<Self> {
        let name = format!("ftp://{}:{}", config.host()?, config.port);
        let base_path = config.base_path();
        Ok(Self {
            config,
            base_path,
            name,
        })
    }

    fn remote(&self, path: &str) -> String {
        join_remote(&self.base_path, &normalize_remote(path))
    }

    fn with_path(verb: &str, path: &str) -> String {
        if path.is_empty() {
            verb.to_string()
        } else {
            format!("{} {}", verb, path)
        }
    }

    /// 执行一条不需要数据连接的命令
    async fn run(&self, command: String, codes: &[u16]) -> Result<(), SyncError> {
        with_timeout(self.config.op_timeout_secs, &command, async {
            let mut session = Session::connect(&self.config).await?;
            session.expect(&command, codes).await?;
            session.quit().await;
            Ok(())
        })
        .await
    }

    /// 读取一次列表型命令的数据连接内容
    async fn read_listing(&self, command: String, secs: u64) -> Result<String, SyncError> {
        with_timeout(secs, &command, async {
            let mut session = Session::connect(&self.config).await?;
            let mut data = session.open_transfer(&command).await?;

            let mut buf = Vec::new();
            data.read_to_end(&mut buf)
                .await
                .map_err(|e| io_error("读取数据连接", e))?;
            drop(data);

            session.finish_transfer(&command).await?;
            session.quit().await;
            Ok(String::from_utf8_lossy(&buf).into_owned())
        })
        .await
    }
}

#[async_trait]
impl Transport for FtpTransport {
    async fn list_details(&self, path: &str) -> Result<String, SyncError> {
        let command = Self::with_path("LIST", &self.remote(path));
        self.read_listing(command, self.config.list_timeout_secs)
            .await
    }

    async fn probe(&self, path: &str) -> Result<(), SyncError> {
        let command = Self::with_path("NLST", &self.remote(path));
        self.read_listing(command, self.config.op_timeout_secs)
            .await
            .map(|_| ())
    }

    async fn create_directory(&self, path: &str) -> Result<(), SyncError> {
        self.run(format!("MKD {}", self.remote(path)), &[257, 250])
            .await
    }

    async fn remove_directory(&self, path: &str) -> Result<(), SyncError> {
        self.run(format!("RMD {}", self.remote(path)), &[250]).await
    }

    async fn delete_file(&self, path: &str) -> Result<(), SyncError> {
        self.run(format!("DELE {}", self.remote(path)), &[250]).await
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), SyncError> {
        let rnfr = format!("RNFR {}", self.remote(from));
        let rnto = format!("RNTO {}", self.remote(to));
        with_timeout(self.config.op_timeout_secs, &rnfr, async {
            let mut session = Session::connect(&self.config).await?;
            session.expect(&rnfr, &[350]).await?;
            session.expect(&rnto, &[250]).await?;
            session.quit().await;
            Ok(())
        })
        .await
    }

    async fn upload_file(&self, local: &Path, remote: &str) -> Result<(), SyncError> {
        let command = format!("STOR {}", self.remote(remote));
        let mut file = tokio::fs::File::open(local)
            .await
            .map_err(|e| SyncError::local_io(local, e))?;

        with_timeout(self.config.io_timeout_secs, &command, async {
            let mut session = Session::connect(&self.config).await?;
            let mut data = session.open_transfer(&command).await?;

            let bytes = tokio::io::copy(&mut file, &mut data)
                .await
                .map_err(|e| io_error("写入数据连接", e))?;
            data.shutdown()
                .await
                .map_err(|e| io_error("关闭数据连接", e))?;
            drop(data);

            session.finish_transfer(&command).await?;
            session.quit().await;
            debug!("已上传 {} 字节: {}", bytes, command);
            Ok(())
        })
        .await
    }

    async fn download_file(&self, remote: &str, local: &Path) -> Result<(), SyncError> {
        let command = format!("RETR {}", self.remote(remote));

        with_timeout(self.config.io_timeout_secs, &command, async {
            let mut session = Session::connect(&self.config).await?;
            let mut data = session.open_transfer(&command).await?;

            let mut file = tokio::fs::File::create(local)
                .await
                .map_err(|e| SyncError::local_io(local, e))?;
            let bytes = tokio::io::copy(&mut data, &mut file)
                .await
                .map_err(|e| io_error("读取数据连接", e))?;
            file.flush()
                .await
                .map_err(|e| SyncError::local_io(local, e))?;
            drop(data);

            session.finish_transfer(&command).await?;
            session.quit().await;
            debug!("已下载 {} 字节: {}", bytes, command);
            Ok(())
        })
        .await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::listing::parse_listing;
    use tokio::net::TcpListener;

    fn config(port: u16) -> ServerConfig {
        ServerConfig {
            server: "ftp://127.0.0.1".to_string(),
            port,
            user_name: "user".to_string(),
            password: "secret".to_string(),
            list_timeout_secs: 5,
            op_timeout_secs: 5,
            io_timeout_secs: 5,
        }
    }

    /// 按固定脚本应答单条控制连接的简易服务器，返回收到的命令
    async fn serve_once(listener: TcpListener, listing: &'static str) -> Vec<String> {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut writer) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        let mut received = Vec::new();
        let mut data_listener: Option<TcpListener> = None;

        writer
            .write_all(b"220-Welcome\r\n220 ready\r\n")
            .await
            .unwrap();

        while let Some(line) = lines.next_line().await.unwrap() {
            received.push(line.clone());
            let verb = line.split(' ').next().unwrap().to_uppercase();
            let reply = match verb.as_str() {
                "USER" => "331 password required".to_string(),
                "PASS" => "230 logged in".to_string(),
                "TYPE" => "200 binary".to_string(),
                "PASV" => {
                    let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
                    let port = l.local_addr().unwrap().port();
                    data_listener = Some(l);
                    format!(
                        "227 Entering Passive Mode (127,0,0,1,{},{})",
                        port / 256,
                        port % 256
                    )
                }
                "LIST" => {
                    writer.write_all(b"150 opening\r\n").await.unwrap();
                    let (mut data, _) = data_listener.take().unwrap().accept().await.unwrap();
                    data.write_all(listing.as_bytes()).await.unwrap();
                    data.shutdown().await.unwrap();
                    drop(data);
                    "226 done".to_string()
                }
                "MKD" => "257 created".to_string(),
                "DELE" => "550 no such file".to_string(),
                "QUIT" => {
                    writer.write_all(b"221 bye\r\n").await.unwrap();
                    break;
                }
                _ => "502 not implemented".to_string(),
            };
            writer
                .write_all(format!("{}\r\n", reply).as_bytes())
                .await
                .unwrap();
        }
        received
    }

    #[test]
    fn test_parse_pasv_port() {
        assert_eq!(
            parse_pasv_port("Entering Passive Mode (192,168,1,2,19,137)").unwrap(),
            19 * 256 + 137
        );
        assert!(parse_pasv_port("Entering Passive Mode").is_err());
        assert!(parse_pasv_port("(1,2,3,4,300,1)").is_err());
    }

    #[test]
    fn test_pasv_pattern_is_compiled_once() {
        assert_eq!(parse_pasv_port("227 (10,0,0,1,0,21)").unwrap(), 21);
        assert_eq!(parse_pasv_port("227 (10,0,0,1,1,0)").unwrap(), 256);
        let first = pasv_pattern().unwrap();
        assert!(std::ptr::eq(first, pasv_pattern().unwrap()));
    }

    #[test]
    fn test_reply_error_maps_550_to_not_found() {
        let reply = Reply {
            code: 550,
            text: "missing".into(),
        };
        assert!(matches!(
            reply_error("DELE a", &reply),
            SyncError::NotFound(_)
        ));
        let reply = Reply {
            code: 421,
            text: "closing".into(),
        };
        assert!(matches!(
            reply_error("DELE a", &reply),
            SyncError::Transport(_)
        ));
    }

    #[tokio::test]
    async fn test_list_details_over_passive_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(serve_once(
            listener,
            "01-15-24  10:30AM       <DIR>          Sub Folder\r\n",
        ));

        let transport = FtpTransport::new(config(port)).unwrap();
        let raw = transport.list_details("docs").await.unwrap();
        let entries = parse_listing(&raw).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "Sub Folder");

        let received = server.await.unwrap();
        assert!(received.contains(&"LIST docs".to_string()));
        assert!(received.contains(&"PASS secret".to_string()));
    }

    #[tokio::test]
    async fn test_create_directory_sends_mkd() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(serve_once(listener, ""));

        let transport = FtpTransport::new(config(port)).unwrap();
        transport.create_directory("/a/b/").await.unwrap();

        let received = server.await.unwrap();
        assert!(received.contains(&"MKD a/b".to_string()));
        assert_eq!(received.last().unwrap(), "QUIT");
    }

    #[tokio::test]
    async fn test_delete_missing_file_is_not_found() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(serve_once(listener, ""));

        let transport = FtpTransport::new(config(port)).unwrap();
        let err = transport.delete_file("gone.txt").await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));

        // 出错时连接直接丢弃，服务器读到 EOF 后结束
        let received = server.await.unwrap();
        assert!(received.contains(&"DELE gone.txt".to_string()));
    }
}
