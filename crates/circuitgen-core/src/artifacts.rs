//! Artifact persistence.

use std::path::Path;

use crate::error::ForgeResult;

/// Write `text` to `path`, creating missing parent directories.
pub async fn save_text(text: &str, path: &Path) -> ForgeResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, text).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_text_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("prog.py");
        save_text("print(1)", &path).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "print(1)");
    }
}
