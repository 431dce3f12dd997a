//! 命令执行器
//!
//! 执行单个外部命令并逐行产出输出：
//! - 参数向量直接传给进程，不经过 shell 拼接
//! - stdout/stderr 合并为一个行序列，边产生边读取
//! - 模拟模式回放预置输出，不修改主机
//! - 非零退出码和启动失败都只是结果，不是错误

use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// 行通道容量
const LINE_CHANNEL_CAPACITY: usize = 256;

/// 模拟模式默认的逐行延迟
const DEFAULT_SIMULATED_DELAY: Duration = Duration::from_millis(150);

/// 模拟执行配置
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimulationConfig {
    /// 每行输出之间的人工延迟
    pub line_delay: Duration,
    /// 命令行包含该文本的命令以退出码 1 结束（用于演示失败路径）
    pub fail_matching: Option<String>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            line_delay: DEFAULT_SIMULATED_DELAY,
            fail_matching: None,
        }
    }
}

impl SimulationConfig {
    /// 无延迟
    pub fn instant() -> Self {
        Self {
            line_delay: Duration::ZERO,
            fail_matching: None,
        }
    }

    /// 设置失败匹配
    pub fn failing(mut self, pattern: impl Into<String>) -> Self {
        self.fail_matching = Some(pattern.into());
        self
    }
}

/// 执行模式
///
/// 每次工作流调用时确定一次，显式传入
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecMode {
    Simulate(SimulationConfig),
    Real,
}

impl ExecMode {
    pub fn is_simulated(&self) -> bool {
        matches!(self, ExecMode::Simulate(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExecMode::Simulate(_) => "simulate",
            ExecMode::Real => "real",
        }
    }
}

/// 命令执行前置条件
#[derive(Clone, Debug)]
pub enum Guard {
    Always,
    /// 路径不存在时才执行
    PathMissing(PathBuf),
    /// 路径存在时才执行
    PathExists(PathBuf),
    /// 探测命令成功时才执行
    If(Box<CommandSpec>),
    /// 探测命令失败时才执行
    Unless(Box<CommandSpec>),
}

/// 命令描述
#[derive(Clone, Debug)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// 写入 stdin 的内容
    pub stdin: Option<String>,
    pub guard: Guard,
    /// 模拟模式下回放的输出
    pub simulated: Vec<String>,
    /// 模拟模式下的退出码
    pub simulated_exit: i32,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            stdin: None,
            guard: Guard::Always,
            simulated: Vec::new(),
            simulated_exit: 0,
        }
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn guard(mut self, guard: Guard) -> Self {
        self.guard = guard;
        self
    }

    pub fn only_if_missing(self, path: impl Into<PathBuf>) -> Self {
        self.guard(Guard::PathMissing(path.into()))
    }

    pub fn only_if(self, probe: CommandSpec) -> Self {
        self.guard(Guard::If(Box::new(probe)))
    }

    pub fn unless(self, probe: CommandSpec) -> Self {
        self.guard(Guard::Unless(Box::new(probe)))
    }

    pub fn simulate<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.simulated = lines.into_iter().map(Into::into).collect();
        self
    }

    pub fn simulate_exit(mut self, code: i32) -> Self {
        self.simulated_exit = code;
        self
    }

    /// 用于日志显示的命令行（仅显示，从不交给 shell）
    pub fn display(&self) -> String {
        let mut out = self.program.clone();
        for arg in &self.args {
            out.push(' ');
            if arg.is_empty() || arg.contains(|c: char| c.is_whitespace() || c == '\'' || c == '"') {
                out.push_str(&format!("'{}'", arg.replace('\'', r"'\''")));
            } else {
                out.push_str(arg);
            }
        }
        out
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

/// 命令执行结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandOutcome {
    pub success: bool,
    /// 退出码（启动失败或被信号终止时为 None）
    pub exit_code: Option<i32>,
    /// 捕获的全部输出行
    pub lines: Vec<String>,
}

impl CommandOutcome {
    pub fn last_line(&self) -> Option<&str> {
        self.lines.iter().rev().find(|l| !l.is_empty()).map(String::as_str)
    }
}

enum RunState {
    Simulated {
        pending: VecDeque<String>,
        delay: Duration,
        exit_code: i32,
    },
    Process {
        rx: mpsc::Receiver<String>,
        child: Child,
    },
    SpawnFailed {
        pending: Option<String>,
    },
}

/// 运行中的命令
///
/// 行序列是惰性的、不可重放的；成功标志只在序列耗尽后通过 `finish` 给出
pub struct RunningCommand {
    display: String,
    state: RunState,
    lines: Vec<String>,
}

impl RunningCommand {
    /// 读取下一行输出，序列结束返回 None
    pub async fn next_line(&mut self) -> Option<String> {
        let line = match &mut self.state {
            RunState::Simulated { pending, delay, .. } => {
                let line = pending.pop_front()?;
                if !delay.is_zero() {
                    tokio::time::sleep(*delay).await;
                }
                line
            }
            RunState::Process { rx, .. } => rx.recv().await?,
            RunState::SpawnFailed { pending } => pending.take()?,
        };
        self.lines.push(line.clone());
        Some(line)
    }

    /// 读完剩余输出并等待命令结束
    pub async fn finish(mut self) -> CommandOutcome {
        while self.next_line().await.is_some() {}

        let (success, exit_code) = match self.state {
            RunState::Simulated { exit_code, .. } => (exit_code == 0, Some(exit_code)),
            RunState::Process { mut child, .. } => match child.wait().await {
                Ok(status) => (status.success(), status.code()),
                Err(e) => {
                    warn!(command = %self.display, error = %e, "Failed to wait for command");
                    self.lines
                        .push(format!("failed to wait for `{}`: {}", self.display, e));
                    (false, None)
                }
            },
            RunState::SpawnFailed { .. } => (false, None),
        };

        debug!(command = %self.display, success, exit_code = ?exit_code, "Command finished");

        CommandOutcome {
            success,
            exit_code,
            lines: self.lines,
        }
    }
}

/// 命令执行器
#[derive(Clone)]
pub struct CommandRunner {
    mode: ExecMode,
    invocations: Arc<AtomicUsize>,
}

impl CommandRunner {
    pub fn new(mode: ExecMode) -> Self {
        Self {
            mode,
            invocations: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn mode(&self) -> &ExecMode {
        &self.mode
    }

    /// 已启动的命令数量（包括前置条件的探测命令）
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// 评估前置条件
    pub async fn should_run(&self, spec: &CommandSpec) -> bool {
        match &spec.guard {
            Guard::Always => true,
            Guard::PathMissing(path) => !tokio::fs::try_exists(path).await.unwrap_or(false),
            Guard::PathExists(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
            Guard::If(probe) => self.capture(probe).await.success,
            Guard::Unless(probe) => !self.capture(probe).await.success,
        }
    }

    /// 启动命令
    ///
    /// 不检查前置条件；启动失败体现在结果中
    pub fn start(&self, spec: &CommandSpec) -> RunningCommand {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let shown = spec.display();
        debug!(command = %shown, mode = self.mode.name(), "Starting command");

        let state = match &self.mode {
            ExecMode::Simulate(sim) => {
                let mut pending: VecDeque<String> = spec.simulated.iter().cloned().collect();
                let mut exit_code = spec.simulated_exit;
                if let Some(ref pattern) = sim.fail_matching {
                    if shown.contains(pattern.as_str()) {
                        pending.push_back(format!("simulated failure of `{}`", shown));
                        exit_code = 1;
                    }
                }
                RunState::Simulated {
                    pending,
                    delay: sim.line_delay,
                    exit_code,
                }
            }
            ExecMode::Real => match spawn(spec) {
                Ok(state) => state,
                Err(e) => {
                    warn!(command = %shown, error = %e, "Failed to spawn command");
                    RunState::SpawnFailed {
                        pending: Some(format!("failed to start `{}`: {}", shown, e)),
                    }
                }
            },
        };

        RunningCommand {
            display: shown,
            state,
            lines: Vec::new(),
        }
    }

    /// 执行命令直到结束，不流式输出
    ///
    /// 用于探测命令和状态查询
    pub async fn capture(&self, spec: &CommandSpec) -> CommandOutcome {
        self.start(spec).finish().await
    }
}

fn spawn(spec: &CommandSpec) -> std::io::Result<RunState> {
    let mut child = Command::new(&spec.program)
        .args(&spec.args)
        .stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    if let (Some(input), Some(mut stdin)) = (spec.stdin.clone(), child.stdin.take()) {
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                warn!(error = %e, "Failed to write command stdin");
            }
        });
    }

    let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, tx));
    }

    Ok(RunState::Process { rx, child })
}

/// 逐行读取并转发到合并通道
async fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line.trim().to_string()).await.is_err() {
            break;
        }
    }
}
