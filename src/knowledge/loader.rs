//! Load raw documents from files and directories.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glob::Pattern;
use tracing::{debug, info, warn};

use crate::config::KnowledgeSettings;
use crate::domain::document::SOURCE_KEY;
use crate::domain::Document;

/// Metadata key holding the file name of a loaded document
pub const FILE_NAME_KEY: &str = "file_name";

/// Metadata key holding the 1-based page number of a PDF document
pub const PAGE_KEY: &str = "page";

/// Load every readable document under `sources`.
///
/// A source is a file, or a directory expanded with the configured glob
/// patterns. Denylisted paths are never read. PDFs yield one document per
/// page with text. Failures are logged and the offending source or file is
/// skipped.
pub async fn load_sources(sources: &[PathBuf], settings: &KnowledgeSettings) -> Vec<Document> {
    let mut documents = Vec::new();

    for source in sources {
        let files = match expand_source(source, &settings.patterns) {
            Ok(files) => files,
            Err(e) => {
                warn!(source = %source.display(), error = %e, "Skipping source");
                continue;
            }
        };

        let before = documents.len();
        for file in files {
            if settings.is_denylisted(&denylist_key(source, &file)) {
                warn!(path = %file.display(), "Skipping denylisted file");
                continue;
            }

            match read_documents(&file).await {
                Ok(loaded) if loaded.is_empty() => {
                    debug!(path = %file.display(), "Skipping empty file");
                }
                Ok(loaded) => documents.extend(loaded),
                Err(e) => {
                    warn!(path = %file.display(), error = %e, "Failed to read file, skipping");
                }
            }
        }

        info!(
            source = %source.display(),
            loaded = documents.len() - before,
            "Loaded source"
        );
    }

    documents
}

/// Path matched against the denylist: relative to a directory source, or
/// the bare file name for a file source
fn denylist_key(source: &Path, file: &Path) -> String {
    let relative = match file.strip_prefix(source) {
        Ok(relative) if !relative.as_os_str().is_empty() => relative,
        _ => file.file_name().map(Path::new).unwrap_or(file),
    };
    relative.to_string_lossy().into_owned()
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

/// Documents in one file; empty when it holds no text
async fn read_documents(file: &Path) -> Result<Vec<Document>> {
    if !is_pdf(file) {
        let content = tokio::fs::read_to_string(file).await?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        return Ok(vec![to_document(file, content)]);
    }

    let bytes = tokio::fs::read(file).await?;
    let pages = tokio::task::spawn_blocking(move || {
        pdf_extract::extract_text_from_mem_by_pages(&bytes)
            .map_err(|e| anyhow::anyhow!("Failed to extract PDF text: {}", e))
    })
    .await
    .context("PDF extraction aborted")??;

    Ok(pages
        .into_iter()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(i, text)| to_document(file, text).with_metadata(PAGE_KEY, (i + 1).to_string()))
        .collect())
}

fn to_document(path: &Path, content: String) -> Document {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    Document::new(content)
        .with_metadata(SOURCE_KEY, path.display().to_string())
        .with_metadata(FILE_NAME_KEY, file_name)
}

/// Files named by one source, sorted and deduplicated
fn expand_source(source: &Path, patterns: &[String]) -> Result<Vec<PathBuf>> {
    if source.is_file() {
        return Ok(vec![source.to_path_buf()]);
    }
    if !source.is_dir() {
        anyhow::bail!("Source does not exist");
    }

    let root = Pattern::escape(&source.to_string_lossy());
    let mut files = BTreeSet::new();

    for pattern in patterns {
        let full = format!("{}/{}", root.trim_end_matches('/'), pattern);
        let entries =
            glob::glob(&full).with_context(|| format!("Invalid source pattern: {}", pattern))?;

        for entry in entries {
            match entry {
                Ok(path) if path.is_file() => {
                    files.insert(path);
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Failed to read directory entry"),
            }
        }
    }

    Ok(files.into_iter().collect())
}
