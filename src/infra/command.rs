//! 命令执行器
//!
//! 提供统一的命令执行接口，支持：
//! - 超时控制
//! - 标准输入写入（kubectl apply -f -）
//! - 非零退出码转换为错误
//!
//! 子进程均设置 `kill_on_drop`，调用方丢弃 future（取消、阶段超时）时进程随之终止

use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// 命令执行器
pub struct CommandRunner;

/// 命令执行错误
#[derive(Debug)]
pub enum CommandError {
    /// 命令启动失败
    SpawnFailed {
        program: String,
        source: std::io::Error,
    },
    /// 命令超时
    Timeout { program: String, after: Duration },
    /// 写入标准输入或等待命令完成失败
    Io(std::io::Error),
    /// 命令以非零状态退出
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::SpawnFailed { program, source } => {
                write!(f, "Failed to spawn {}: {}", program, source)
            }
            CommandError::Timeout { program, after } => {
                write!(f, "{} timed out after {}s", program, after.as_secs())
            }
            CommandError::Io(e) => write!(f, "Command I/O failed: {}", e),
            CommandError::Failed {
                program,
                code,
                stderr,
            } => {
                let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
                write!(f, "{} exited with {}: {}", program, code, stderr.trim())
            }
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommandError::SpawnFailed { source, .. } => Some(source),
            CommandError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl CommandRunner {
    /// 执行命令并收集输出
    ///
    /// `timeout` 为 `None` 时不设上限
    pub async fn run_simple(
        program: &str,
        args: &[&str],
        work_dir: Option<&Path>,
        timeout: Option<Duration>,
    ) -> Result<Output, CommandError> {
        Self::run(program, args, work_dir, None, timeout).await
    }

    /// 执行命令，向标准输入写入 `input`
    pub async fn run_with_stdin(
        program: &str,
        args: &[&str],
        input: &[u8],
        timeout: Option<Duration>,
    ) -> Result<Output, CommandError> {
        Self::run(program, args, None, Some(input), timeout).await
    }

    /// 执行命令，非零退出码视为错误，返回 stdout 文本
    pub async fn run_checked(
        program: &str,
        args: &[&str],
        work_dir: Option<&Path>,
        timeout: Option<Duration>,
    ) -> Result<String, CommandError> {
        let output = Self::run_simple(program, args, work_dir, timeout).await?;
        Self::ensure_success(program, output)
    }

    /// 非零退出码转换为 `CommandError::Failed`
    pub fn ensure_success(program: &str, output: Output) -> Result<String, CommandError> {
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(CommandError::Failed {
                program: program.to_string(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }

    async fn run(
        program: &str,
        args: &[&str],
        work_dir: Option<&Path>,
        input: Option<&[u8]>,
        timeout: Option<Duration>,
    ) -> Result<Output, CommandError> {
        debug!(program, ?args, "Running command");

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = work_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| CommandError::SpawnFailed {
            program: program.to_string(),
            source,
        })?;

        if let Some(input) = input {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input).await.map_err(CommandError::Io)?;
                // 关闭 stdin，让子进程读到 EOF
                drop(stdin);
            }
        }

        let output = child.wait_with_output();
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, output).await {
                Ok(result) => result.map_err(CommandError::Io),
                Err(_) => {
                    warn!(program, "Command timed out after {:?}", limit);
                    Err(CommandError::Timeout {
                        program: program.to_string(),
                        after: limit,
                    })
                }
            },
            None => output.await.map_err(CommandError::Io),
        }
    }
}
