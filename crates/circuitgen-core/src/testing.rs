//! Scripted collaborators for tests and offline dry runs.
//!
//! These stand in for the LLM transport, the program checker and the
//! assembler so the whole pipeline can run without network access or
//! external tools.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::checker::{CheckReport, ProgramChecker};
use crate::error::{ForgeError, ForgeResult};
use crate::model::{Completion, ModelClient, ModelRequest};
use crate::sampler::Assembler;
use crate::training::IMPROVEMENT_TEMPLATE;
use crate::types::{Language, Usage, FIXING_PROMPT, GENERATION_PROMPT};

/// A completion with fixed, non-zero usage.
pub fn completion(text: &str) -> Completion {
    Completion {
        text: text.to_string(),
        usage: Usage {
            cost: 0.001,
            prompt_tokens: 100,
            completion_tokens: 50,
            total_tokens: 150,
            quality_score: None,
        },
    }
}

/// Write a minimal set of prompt templates.
///
/// The generation prompt reads `Write a quantum circuit.`, the fixing prompt
/// starts with `FIX` and the improvement template starts with `IMPROVE`.
pub fn write_prompt_templates(prompt_dir: &Path, common_dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(prompt_dir)?;
    std::fs::create_dir_all(common_dir)?;
    std::fs::write(prompt_dir.join(GENERATION_PROMPT), "Write a quantum circuit.")?;
    std::fs::write(
        prompt_dir.join(FIXING_PROMPT),
        "FIX this program:\n{faulty_code}\nError:\n{error_message}\n",
    )?;
    std::fs::write(
        common_dir.join(IMPROVEMENT_TEMPLATE),
        "IMPROVE this {language} prompt:\n{original_content}\nErrors seen:\n{errors_text}\n",
    )?;
    Ok(())
}

// ── Model Client ───────────────────────────────────────────────────────

type Responder = Box<dyn Fn(&ModelRequest, usize) -> ForgeResult<Completion> + Send + Sync>;

/// Model client answering from a closure; records every request.
pub struct ScriptedModelClient {
    respond: Responder,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModelClient {
    /// The closure receives the request and its zero-based call number.
    pub fn new(
        respond: impl Fn(&ModelRequest, usize) -> ForgeResult<Completion> + Send + Sync + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer with the given texts in order, then fail.
    pub fn sequence(texts: Vec<&str>) -> Self {
        let texts: Vec<String> = texts.into_iter().map(String::from).collect();
        Self::new(move |_, call| {
            texts
                .get(call)
                .map(|t| completion(t))
                .ok_or_else(|| ForgeError::Model("script exhausted".into()))
        })
    }

    /// Always answer with the same text.
    pub fn always(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_, _| Ok(completion(&text)))
    }

    /// Always fail with a model error.
    pub fn failing(message: &str) -> Self {
        let message = message.to_string();
        Self::new(move |_, _| Err(ForgeError::Model(message.clone())))
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Number of requests whose prompt contains `needle`.
    pub fn count_matching(&self, needle: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.prompt.contains(needle))
            .count()
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    async fn ask(&self, request: &ModelRequest) -> ForgeResult<Completion> {
        let call = {
            let mut requests = self.requests.lock();
            requests.push(request.clone());
            requests.len() - 1
        };
        (self.respond)(request, call)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ── Checker ────────────────────────────────────────────────────────────

type Check = Box<dyn Fn(&str) -> CheckReport + Send + Sync>;

/// Checker deciding from the program text alone.
pub struct ScriptedChecker {
    compile: Check,
    run: Check,
    compile_calls: AtomicUsize,
    run_calls: AtomicUsize,
}

impl ScriptedChecker {
    pub fn new(
        compile: impl Fn(&str) -> CheckReport + Send + Sync + 'static,
        run: impl Fn(&str) -> CheckReport + Send + Sync + 'static,
    ) -> Self {
        Self {
            compile: Box::new(compile),
            run: Box::new(run),
            compile_calls: AtomicUsize::new(0),
            run_calls: AtomicUsize::new(0),
        }
    }

    /// Every check passes with `score`.
    pub fn all_pass(score: f64) -> Self {
        Self::new(
            move |_| CheckReport::passed_with_score(score),
            move |_| CheckReport::passed_with_score(score),
        )
    }

    /// Compiles iff the code contains `marker`; execution always passes.
    pub fn compiles_when_contains(marker: &str, score: f64) -> Self {
        let marker = marker.to_string();
        Self::new(
            move |code| {
                if code.contains(&marker) {
                    CheckReport::passed_with_score(score)
                } else {
                    CheckReport::failed(format!("expected {} in program", marker))
                }
            },
            move |_| CheckReport::passed_with_score(score),
        )
    }

    pub fn compile_calls(&self) -> usize {
        self.compile_calls.load(Ordering::SeqCst)
    }

    pub fn run_calls(&self) -> usize {
        self.run_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProgramChecker for ScriptedChecker {
    async fn compile(&self, code: &str, _language: Language) -> ForgeResult<CheckReport> {
        self.compile_calls.fetch_add(1, Ordering::SeqCst);
        Ok((self.compile)(code))
    }

    async fn run(&self, code: &str, _language: Language) -> ForgeResult<CheckReport> {
        self.run_calls.fetch_add(1, Ordering::SeqCst);
        Ok((self.run)(code))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ── Assembler ──────────────────────────────────────────────────────────

type AssemblyFilter = Box<dyn Fn(&[PathBuf]) -> bool + Send + Sync>;

/// Assembler that records every selection it is handed.
pub struct RecordingAssembler {
    fail_when: Option<AssemblyFilter>,
    write_outputs: bool,
    calls: Mutex<Vec<Vec<PathBuf>>>,
}

impl RecordingAssembler {
    pub fn new() -> Self {
        Self {
            fail_when: None,
            write_outputs: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fail every selection for which `predicate` holds.
    pub fn failing_when(
        mut self,
        predicate: impl Fn(&[PathBuf]) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.fail_when = Some(Box::new(predicate));
        self
    }

    /// Write the concatenated inputs to the output path.
    pub fn writing_outputs(mut self) -> Self {
        self.write_outputs = true;
        self
    }

    pub fn calls(&self) -> Vec<Vec<PathBuf>> {
        self.calls.lock().clone()
    }
}

impl Default for RecordingAssembler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Assembler for RecordingAssembler {
    async fn assemble(
        &self,
        selected: &[PathBuf],
        output: &Path,
        _index: usize,
        _language: Language,
    ) -> ForgeResult<()> {
        self.calls.lock().push(selected.to_vec());
        if self.fail_when.as_ref().is_some_and(|fail| fail(selected)) {
            return Err(ForgeError::Assembly(format!(
                "rejected {} program(s)",
                selected.len()
            )));
        }
        if self.write_outputs {
            let mut combined = String::new();
            for path in selected {
                combined.push_str(&tokio::fs::read_to_string(path).await?);
                combined.push('\n');
            }
            crate::artifacts::save_text(&combined, output).await?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}
