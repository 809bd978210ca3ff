//! Prompt templates.
//!
//! Templates are plain text files with `{name}` placeholders. A missing file
//! is always reported as [`ForgeError::MissingTemplate`] so callers can decide
//! whether that is fatal for them.

use std::path::Path;

use async_trait::async_trait;

use crate::error::{ForgeError, ForgeResult};

/// Replace every `{key}` placeholder with its value. Unknown placeholders stay.
pub fn substitute(template: &str, substitutions: &[(&str, &str)]) -> String {
    substitutions
        .iter()
        .fold(template.to_string(), |text, (key, value)| {
            text.replace(&format!("{{{}}}", key), value)
        })
}

/// Source of prompt templates.
#[async_trait]
pub trait PromptTemplates: Send + Sync {
    /// Load a template and fill in its placeholders.
    async fn render(&self, path: &Path, substitutions: &[(&str, &str)]) -> ForgeResult<String>;

    /// Load a template verbatim.
    async fn load(&self, path: &Path) -> ForgeResult<String> {
        self.render(path, &[]).await
    }
}

/// Templates read from the filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct FsPromptTemplates;

#[async_trait]
impl PromptTemplates for FsPromptTemplates {
    async fn render(&self, path: &Path, substitutions: &[(&str, &str)]) -> ForgeResult<String> {
        match tokio::fs::read_to_string(path).await {
            Ok(template) => Ok(substitute(&template, substitutions)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ForgeError::MissingTemplate(path.to_path_buf()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
