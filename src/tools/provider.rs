//! 工具提供者：统一 trait 与子进程实现
//!
//! 每个提供者子进程是一条长期共享的连接；并发调用按请求 id 在 pending 表中关联响应，
//! 不经过全局锁。每次请求有独立超时，超时只让本次调用失败，已发出的请求无法撤回。

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};

use crate::config::ProviderEntry;
use crate::core::AgentError;
use crate::tools::protocol::{self, WireRequest, WireResponse, MAX_FRAME_BYTES};

/// 提供者目录中的一个工具
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// 工具提供者 trait：子进程、进程内注册表都实现它
#[async_trait]
pub trait ToolProvider: Send + Sync {
    fn id(&self) -> &str;

    /// 请求工具目录
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, AgentError>;

    /// 调用工具，返回文本内容
    async fn call_tool(&self, name: &str, args: Value) -> Result<String, AgentError>;
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<WireResponse>>>>;
type FrameWriter = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, LinesCodec>;

/// 一条按行分帧、按 id 关联的请求/响应连接
pub struct Connection {
    label: String,
    writer: Mutex<FrameWriter>,
    pending: PendingMap,
    next_id: AtomicU64,
    timeout: Duration,
    reader: JoinHandle<()>,
}

impl Connection {
    /// 在任意读写端上启动连接（子进程 stdio 或测试用 duplex）
    pub fn start<R, W>(label: impl Into<String>, reader: R, writer: W, timeout: Duration) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let label = label.into();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let reader = tokio::spawn(read_loop(
            label.clone(),
            FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_FRAME_BYTES)),
            pending.clone(),
        ));
        let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(writer);
        Self {
            label,
            writer: Mutex::new(FramedWrite::new(writer, LinesCodec::new())),
            pending,
            next_id: AtomicU64::new(1),
            timeout,
            reader,
        }
    }

    /// 发送请求并等待同 id 的响应；错误以字符串返回，由调用方附上工具名
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, String> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let line = protocol::encode_frame(&WireRequest::call(id, method, params))?;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        tracing::debug!(provider = %self.label, id, method, "wire request");
        if let Err(e) = self.writer.lock().await.send(line).await {
            self.pending.lock().await.remove(&id);
            return Err(format!("write to {} failed: {e}", self.label));
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(resp)) => match resp.error {
                Some(err) => Err(format!("{} (code {})", err.message, err.code)),
                None => Ok(resp.result.unwrap_or(Value::Null)),
            },
            Ok(Err(_)) => Err(format!("connection to {} closed", self.label)),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(format!(
                    "{method} timed out after {}s",
                    self.timeout.as_secs_f64()
                ))
            }
        }
    }

    /// 发送通知（无 id，不等待响应）
    pub async fn notify(&self, method: &str, params: Value) -> Result<(), String> {
        let line = protocol::encode_frame(&WireRequest::notification(method, params))?;
        self.writer
            .lock()
            .await
            .send(line)
            .await
            .map_err(|e| format!("write to {} failed: {e}", self.label))
    }

    /// initialize 握手 + initialized 通知；必须在第一次调用之前完成
    pub async fn initialize(&self) -> Result<Value, String> {
        let result = self
            .request(
                protocol::METHOD_INITIALIZE,
                protocol::initialize_params(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            )
            .await?;
        self.notify(protocol::METHOD_INITIALIZED, json!({})).await?;
        let protocol_version = result
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        tracing::info!(
            provider = %self.label,
            protocol = protocol_version,
            "provider initialized"
        );
        Ok(result)
    }

    /// 当前等待响应的请求数
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop<R>(label: String, mut frames: FramedRead<R, LinesCodec>, pending: PendingMap)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    while let Some(frame) = frames.next().await {
        let line = match frame {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                tracing::warn!(provider = %label, "oversized frame discarded");
                continue;
            }
            Err(LinesCodecError::Io(e)) => {
                tracing::warn!(provider = %label, error = %e, "provider read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let resp = match protocol::decode_frame(&line) {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(provider = %label, error = %e, "undecodable frame ignored");
                continue;
            }
        };
        match resp.numeric_id() {
            Some(id) => match pending.lock().await.remove(&id) {
                Some(tx) => {
                    let _ = tx.send(resp);
                }
                None => tracing::debug!(provider = %label, id, "response without pending request ignored"),
            },
            None => {
                tracing::debug!(provider = %label, method = ?resp.method, "provider notification ignored")
            }
        }
    }
    // 连接关闭：丢弃全部 sender，等待方收到 closed
    pending.lock().await.clear();
    tracing::info!(provider = %label, "provider connection closed");
}

/// 线协议提供者：子进程或任意已连接的读写端
pub struct RpcProvider {
    id: String,
    connection: Connection,
    _child: Option<Child>,
}

impl RpcProvider {
    /// 在已建立的读写端上完成握手
    pub async fn connect<R, W>(
        id: impl Into<String>,
        reader: R,
        writer: W,
        timeout: Duration,
    ) -> Result<Self, AgentError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let id = id.into();
        let connection = Connection::start(id.clone(), reader, writer, timeout);
        connection
            .initialize()
            .await
            .map_err(|message| AgentError::ToolExecutionError {
                tool: protocol::METHOD_INITIALIZE.to_string(),
                message,
            })?;
        Ok(Self {
            id,
            connection,
            _child: None,
        })
    }

    /// 启动子进程（无 shell，直接 exec program + args），通过 stdio 通信
    pub async fn spawn(
        entry: &ProviderEntry,
        workspace: &Path,
        timeout: Duration,
    ) -> Result<Self, AgentError> {
        tracing::info!(provider = %entry.id, program = %entry.program, "spawning tool provider");
        let mut child = Command::new(&entry.program)
            .args(&entry.args)
            .envs(&entry.env)
            .current_dir(workspace)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::ToolExecutionError {
                tool: entry.id.clone(),
                message: format!("spawn {} failed: {e}", entry.program),
            })?;
        let stdin = child.stdin.take().ok_or_else(|| AgentError::ToolExecutionError {
            tool: entry.id.clone(),
            message: "provider stdin unavailable".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| AgentError::ToolExecutionError {
            tool: entry.id.clone(),
            message: "provider stdout unavailable".to_string(),
        })?;
        let mut provider = Self::connect(entry.id.clone(), stdout, stdin, timeout).await?;
        provider._child = Some(child);
        Ok(provider)
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

#[async_trait]
impl ToolProvider for RpcProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, AgentError> {
        let result = self
            .connection
            .request(protocol::METHOD_TOOLS_LIST, json!({}))
            .await
            .and_then(|r| protocol::parse_tool_list(&r))
            .map_err(|message| AgentError::ToolExecutionError {
                tool: protocol::METHOD_TOOLS_LIST.to_string(),
                message,
            })?;
        Ok(result)
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<String, AgentError> {
        self.connection
            .request(
                protocol::METHOD_TOOLS_CALL,
                json!({ "name": name, "arguments": args }),
            )
            .await
            .and_then(|r| protocol::extract_call_content(&r))
            .map_err(|message| AgentError::ToolExecutionError {
                tool: name.to_string(),
                message,
            })
    }
}
