//! External checker and assembler processes.
//!
//! The checker is invoked as `<command...> <compile|run> <language>` with the
//! program on stdin and must print a JSON check report
//! (`{"error": ..., "metrics": {...}, "annotated_code": ...}`) on stdout.
//! The assembler is invoked as
//! `<command...> --output <path> --index <i> --language <language> <files...>`
//! and signals success through its exit status.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use circuitgen_core::{Assembler, CheckReport, ForgeError, ForgeResult, Language, ProgramChecker};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

fn command(argv: &[String]) -> ForgeResult<Command> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| ForgeError::Config("empty tool command".into()))?;
    let mut cmd = Command::new(program);
    cmd.args(args).kill_on_drop(true);
    Ok(cmd)
}

fn stderr_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

/// Checker backed by an external program.
pub struct ProcessChecker {
    argv: Vec<String>,
    timeout: Duration,
}

impl ProcessChecker {
    pub fn new(argv: Vec<String>, timeout: Duration) -> Self {
        Self { argv, timeout }
    }

    async fn check(&self, stage: &str, code: &str, language: Language) -> ForgeResult<CheckReport> {
        let mut cmd = command(&self.argv)?;
        cmd.arg(stage)
            .arg(language.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| ForgeError::Checker(format!("cannot start {}: {}", self.argv[0], e)))?;
        let stdin = child.stdin.take();
        let exchange = async move {
            if let Some(mut stdin) = stdin {
                // A checker may exit without reading its input; its report decides.
                if let Err(e) = stdin.write_all(code.as_bytes()).await {
                    debug!(stage, error = %e, "checker did not take the program");
                }
            }
            child.wait_with_output().await
        };

        let output = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| ForgeError::Checker(format!("{} check timed out after {:?}", stage, self.timeout)))??;

        debug!(stage, status = %output.status, "checker finished");
        match serde_json::from_slice::<CheckReport>(&output.stdout) {
            Ok(report) => Ok(report),
            Err(e) if output.status.success() => {
                Err(ForgeError::Checker(format!("unreadable {} report: {}", stage, e)))
            }
            Err(_) => Err(ForgeError::Checker(format!(
                "{} check exited with {}: {}",
                stage,
                output.status,
                stderr_text(&output)
            ))),
        }
    }
}

#[async_trait]
impl ProgramChecker for ProcessChecker {
    async fn compile(&self, code: &str, language: Language) -> ForgeResult<CheckReport> {
        self.check("compile", code, language).await
    }

    async fn run(&self, code: &str, language: Language) -> ForgeResult<CheckReport> {
        self.check("run", code, language).await
    }

    fn name(&self) -> &str {
        "process"
    }
}

/// Assembler backed by an external program.
pub struct ProcessAssembler {
    argv: Vec<String>,
    timeout: Duration,
}

impl ProcessAssembler {
    pub fn new(argv: Vec<String>, timeout: Duration) -> Self {
        Self { argv, timeout }
    }
}

#[async_trait]
impl Assembler for ProcessAssembler {
    async fn assemble(
        &self,
        selected: &[PathBuf],
        output: &Path,
        index: usize,
        language: Language,
    ) -> ForgeResult<()> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut cmd = command(&self.argv)?;
        cmd.arg("--output")
            .arg(output)
            .arg("--index")
            .arg(index.to_string())
            .arg("--language")
            .arg(language.as_str())
            .args(selected)
            .stdin(Stdio::null());

        let result = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| ForgeError::Assembly(format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| ForgeError::Assembly(format!("cannot start {}: {}", self.argv[0], e)))?;

        if result.status.success() {
            Ok(())
        } else {
            Err(ForgeError::Assembly(format!(
                "exited with {}: {}",
                result.status,
                stderr_text(&result)
            )))
        }
    }

    fn name(&self) -> &str {
        "process"
    }
}
