//! Shell-free command execution for command steps.

use std::fmt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use anyhow::{anyhow, Context, Result};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::result::{Metadata, StepResult};

/// A fully substituted command, ready to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandInvocation {
    /// Program and arguments, spawned directly.
    Argv(Vec<String>),
    /// A script handed to `sh -c`.
    Shell(String),
}

impl fmt::Display for CommandInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Argv(argv) => f.write_str(&argv.join(" ")),
            Self::Shell(script) => write!(f, "sh -c {script}"),
        }
    }
}

/// Runs command steps on behalf of the executor.
pub trait CommandRunner: fmt::Debug {
    /// Exit status 0 maps to `Success`, anything else to `Error`. `Err` is
    /// reserved for commands that could not be started at all.
    fn run(&self, invocation: &CommandInvocation) -> Result<StepResult>;
}

/// Spawns commands as child processes, capturing stdout.
#[derive(Debug, Clone, Default)]
pub struct ProcessCommandRunner {
    working_dir: Option<PathBuf>,
}

impl ProcessCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: Some(dir.into()),
        }
    }
}

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, invocation: &CommandInvocation) -> Result<StepResult> {
        let mut command = match invocation {
            CommandInvocation::Argv(argv) => {
                let (program, args) = argv
                    .split_first()
                    .ok_or_else(|| anyhow!("empty command argv"))?;
                let mut command = Command::new(program);
                command.args(args);
                command
            }
            CommandInvocation::Shell(script) => {
                let mut command = Command::new("sh");
                command.arg("-c").arg(script);
                command
            }
        };
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        debug!("spawning '{}'", invocation);
        let output = command
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .output()
            .with_context(|| format!("failed to start command '{invocation}'"))?;

        if !output.status.success() {
            return Ok(StepResult::Error {
                message: format!("command failed with status {}: {}", output.status, invocation),
                error_code: output.status.code(),
                cause: None,
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        let message = stdout
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("command completed")
            .trim()
            .to_string();
        let mut metadata = Metadata::new();
        metadata.insert("stdout".to_string(), json!(stdout));
        metadata.insert("exit_code".to_string(), json!(0));
        Ok(StepResult::success_with(message, metadata))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SplitError {
    #[error("unterminated {0} quote")]
    UnterminatedQuote(&'static str),
    #[error("trailing backslash")]
    TrailingBackslash,
}

/// Splits a command template into words the way a POSIX shell would,
/// honouring single quotes, double quotes and backslash escapes. No
/// expansion of any kind happens here.
pub fn split_words(input: &str) -> Result<Vec<String>, SplitError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = input.chars();

    while let Some(ch) = chars.next() {
        match ch {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => return Err(SplitError::UnterminatedQuote("single")),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('"' | '\\' | '$' | '`')) => current.push(c),
                            Some('\n') => {}
                            Some(c) => {
                                current.push('\\');
                                current.push(c);
                            }
                            None => return Err(SplitError::UnterminatedQuote("double")),
                        },
                        Some(c) => current.push(c),
                        None => return Err(SplitError::UnterminatedQuote("double")),
                    }
                }
            }
            '\\' => match chars.next() {
                Some('\n') => {}
                Some(c) => {
                    in_word = true;
                    current.push(c);
                }
                None => return Err(SplitError::TrailingBackslash),
            },
            other => {
                in_word = true;
                current.push(other);
            }
        }
    }

    if in_word {
        words.push(current);
    }
    Ok(words)
}
