use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use sprt_core::uci_types::{InfoLine, UciLine};

use crate::error::{BattlerError, EngineError};

pub const DEFAULT_MOVETIME: Duration = Duration::from_millis(100);
const QUIT_GRACE: Duration = Duration::from_millis(500);

/// How to launch an engine, and which UCI options to set once it is up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSpec {
    pub name: String,
    pub path: PathBuf,
    pub args: Vec<String>,
    pub options: Vec<(String, String)>,
}

impl EngineSpec {
    /// Names the engine after its file stem
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self {
            name,
            path,
            args: Vec::new(),
            options: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.push((name.into(), value.into()));
        self
    }
}

/// Splits a `NAME=VALUE` command line option
pub fn parse_option(raw: &str) -> Result<(String, String), BattlerError> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_owned(), value.trim().to_owned()))
        }
        _ => Err(BattlerError::InvalidOption(raw.to_owned())),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchLimits {
    pub movetime: Option<Duration>,
    pub depth: Option<u32>,
    pub nodes: Option<u64>,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            movetime: Some(DEFAULT_MOVETIME),
            depth: None,
            nodes: None,
        }
    }
}

impl SearchLimits {
    pub fn movetime(movetime: Duration) -> Self {
        Self {
            movetime: Some(movetime),
            depth: None,
            nodes: None,
        }
    }

    pub fn depth(depth: u32) -> Self {
        Self {
            movetime: None,
            depth: Some(depth),
            nodes: None,
        }
    }

    pub fn nodes(nodes: u64) -> Self {
        Self {
            movetime: None,
            depth: None,
            nodes: Some(nodes),
        }
    }

    pub fn go_command(&self) -> String {
        let mut command = String::from("go");
        if let Some(depth) = self.depth {
            command.push_str(&format!(" depth {depth}"));
        }
        if let Some(nodes) = self.nodes {
            command.push_str(&format!(" nodes {nodes}"));
        }
        // An unlimited `go` never returns on its own, so fall back to the default movetime
        let movetime = match self.movetime {
            Some(movetime) => Some(movetime),
            None if self.depth.is_none() && self.nodes.is_none() => Some(DEFAULT_MOVETIME),
            None => None,
        };
        if let Some(movetime) = movetime {
            command.push_str(&format!(" movetime {}", movetime.as_millis()));
        }
        command
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOutcome {
    /// `None` when the engine reported that it has no move
    pub best_move: Option<String>,
    pub ponder: Option<String>,
    /// Last search progress line that carried a score
    pub info: Option<InfoLine>,
    pub elapsed: Duration,
}

/// A running UCI engine. Stdout is read on a background thread and handed
/// over line by line, so every read can be bounded by a deadline.
pub struct EngineProcess {
    name: String,
    id_name: Option<String>,
    options: Vec<(String, String)>,
    child: Child,
    stdin: ChildStdin,
    receiver: Receiver<String>,
}

impl EngineProcess {
    pub fn spawn(spec: &EngineSpec) -> Result<Self, EngineError> {
        let mut child = Command::new(&spec.path)
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| EngineError::Spawn {
                path: spec.path.clone(),
                source,
            })?;

        let disconnected = || EngineError::Disconnected {
            engine: spec.name.clone(),
        };
        let stdin = child.stdin.take().ok_or_else(disconnected)?;
        let stdout = child.stdout.take().ok_or_else(disconnected)?;
        let stderr = child.stderr.take().ok_or_else(disconnected)?;

        let (child_msg_tx, child_msg_rx) = mpsc::channel::<String>();

        let reader_name = spec.name.clone();
        thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        if child_msg_tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("[{}] error reading stdout: {}", reader_name, e);
                        break;
                    }
                }
            }
        });

        let stderr_name = spec.name.clone();
        thread::spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                debug!("[{}] stderr: {}", stderr_name, line);
            }
        });

        Ok(Self {
            name: spec.name.clone(),
            id_name: None,
            options: spec.options.clone(),
            child,
            stdin,
            receiver: child_msg_rx,
        })
    }

    /// Spawns the engine and completes the UCI handshake
    pub fn start(spec: &EngineSpec, timeout: Duration) -> Result<Self, EngineError> {
        let mut engine = Self::spawn(spec)?;
        engine.handshake(timeout)?;
        Ok(engine)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// What the engine called itself in `id name`
    pub fn id_name(&self) -> Option<&str> {
        self.id_name.as_deref()
    }

    pub fn send(&mut self, command: &str) -> Result<(), EngineError> {
        trace!(">> [{}] {}", self.name, command);
        writeln!(self.stdin, "{}", command)?;
        self.stdin.flush()?;
        Ok(())
    }

    fn recv_line(&mut self, deadline: Instant, waiting_for: &str) -> Result<UciLine, EngineError> {
        let now = Instant::now();
        if now >= deadline {
            return Err(self.timeout(waiting_for));
        }

        match self.receiver.recv_timeout(deadline - now) {
            Ok(line) => {
                trace!("<< [{}] {}", self.name, line);
                Ok(UciLine::parse(&line))
            }
            Err(RecvTimeoutError::Timeout) => Err(self.timeout(waiting_for)),
            Err(RecvTimeoutError::Disconnected) => Err(EngineError::Disconnected {
                engine: self.name.clone(),
            }),
        }
    }

    fn timeout(&self, waiting_for: &str) -> EngineError {
        EngineError::Timeout {
            engine: self.name.clone(),
            waiting_for: waiting_for.to_owned(),
        }
    }

    /// Next line of output, or a timeout once `deadline` passes
    pub fn read_line(&mut self, deadline: Instant) -> Result<UciLine, EngineError> {
        self.recv_line(deadline, "output")
    }

    /// Reads until a line matches `predicate`, discarding everything before it
    pub fn wait_for<F>(
        &mut self,
        waiting_for: &str,
        timeout: Duration,
        mut predicate: F,
    ) -> Result<UciLine, EngineError>
    where
        F: FnMut(&UciLine) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let line = self.recv_line(deadline, waiting_for)?;
            if predicate(&line) {
                return Ok(line);
            }
        }
    }

    pub fn handshake(&mut self, timeout: Duration) -> Result<(), EngineError> {
        let deadline = Instant::now() + timeout;
        self.send("uci")?;
        loop {
            match self.recv_line(deadline, "uciok")? {
                UciLine::UciOk => break,
                UciLine::Id { key, value } if key == "name" => {
                    debug!("[{}] identifies as {}", self.name, value);
                    self.id_name = Some(value);
                }
                _ => {}
            }
        }

        for (name, value) in self.options.clone() {
            self.send(&format!("setoption name {} value {}", name, value))?;
        }

        self.sync_ready(deadline.saturating_duration_since(Instant::now()))
    }

    pub fn sync_ready(&mut self, timeout: Duration) -> Result<(), EngineError> {
        self.send("isready")?;
        self.wait_for("readyok", timeout, |line| *line == UciLine::ReadyOk)?;
        Ok(())
    }

    pub fn new_game(&mut self, timeout: Duration) -> Result<(), EngineError> {
        self.send("ucinewgame")?;
        self.sync_ready(timeout)
    }

    /// Runs one search. `position` is everything after the `position` keyword,
    /// e.g. `startpos moves e2e4` or `fen <fen>`.
    pub fn search(
        &mut self,
        position: &str,
        limits: &SearchLimits,
        timeout: Duration,
    ) -> Result<SearchOutcome, EngineError> {
        let started_at = Instant::now();
        let deadline = started_at + timeout;

        self.send(&format!("position {}", position))?;
        self.send(&limits.go_command())?;

        let mut last_info = None;
        loop {
            match self.recv_line(deadline, "bestmove") {
                Ok(UciLine::BestMove { best, ponder }) => {
                    return Ok(SearchOutcome {
                        best_move: best,
                        ponder,
                        info: last_info,
                        elapsed: started_at.elapsed(),
                    });
                }
                Ok(UciLine::Info(info)) => {
                    if info.is_search_progress() && info.score.is_some() {
                        last_info = Some(info);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    if e.is_timeout() {
                        // Best effort, the engine may be wedged
                        let _ = self.send("stop");
                    }
                    return Err(e);
                }
            }
        }
    }

    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Asks the engine to exit, killing it if it lingers
    pub fn quit(&mut self) {
        if !self.is_alive() {
            return;
        }
        let _ = self.send("quit");

        let end_at = Instant::now() + QUIT_GRACE;
        while Instant::now() < end_at {
            if !self.is_alive() {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }

        warn!("[{}] did not exit after quit, killing it", self.name);
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        if self.is_alive() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}
