//! Case document staging and text extraction.
//!
//! Each analysis copies the case files into its own temporary directory,
//! extracts text from them and removes the directory when done, whatever the
//! outcome. Files that cannot be read are skipped.

use async_trait::async_trait;
use pdfium_render::prelude::{Pdfium, PdfiumError};
use quick_xml::Reader;
use quick_xml::escape::resolve_xml_entity;
use quick_xml::events::Event;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::AnalysisError;
use crate::models::DocumentContent;

/// Extensions in the order their files are submitted.
pub const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "docx", "txt"];

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to extract PDF text from {path}: {reason}")]
    Pdf { path: String, reason: String },

    #[error("Failed to extract DOCX text from {path}: {reason}")]
    Docx { path: String, reason: String },

    #[error("Failed to describe image {path}: {reason}")]
    Image { path: String, reason: String },

    #[error("Unsupported document {path}: {reason}")]
    Unsupported { path: String, reason: String },
}

/// Uniquely named working directory for one case. Removed on drop.
#[derive(Debug)]
pub struct StagingArea {
    dir: TempDir,
}

impl StagingArea {
    pub fn new(case_id: &str) -> std::io::Result<Self> {
        let safe_id: String = case_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        let dir = tempfile::Builder::new()
            .prefix(&format!("case_{safe_id}_"))
            .tempdir()?;
        debug!("Staging case {} in {}", case_id, dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Where a case's files come from.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Copy the files of `case_id` into `dir`, returning how many were staged.
    async fn stage(&self, case_id: &str, dir: &Path) -> std::io::Result<usize>;
}

/// Reads case files from a local folder. If the folder has a sub-folder named
/// after the case, that sub-folder is used.
#[derive(Debug, Clone)]
pub struct LocalDirectorySource {
    root: PathBuf,
}

impl LocalDirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl DocumentSource for LocalDirectorySource {
    async fn stage(&self, case_id: &str, dir: &Path) -> std::io::Result<usize> {
        let case_dir = self.root.join(case_id);
        let source = if tokio::fs::metadata(&case_dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            case_dir
        } else {
            self.root.clone()
        };

        let mut entries = tokio::fs::read_dir(&source).await?;
        let mut staged = 0;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            tokio::fs::copy(entry.path(), dir.join(entry.file_name())).await?;
            staged += 1;
        }
        info!("Staged {} files for case {} from {}", staged, case_id, source.display());
        Ok(staged)
    }
}

/// Files in `dir` grouped in the order of `extensions`.
///
/// Within a group files keep directory listing order, which the OS does not
/// guarantee to be stable.
pub async fn discover_files(dir: &Path, extensions: &[&str]) -> std::io::Result<Vec<PathBuf>> {
    let mut groups: Vec<Vec<PathBuf>> = vec![Vec::new(); extensions.len()];

    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        let ext = ext.to_ascii_lowercase();
        if let Some(group) = extensions.iter().position(|known| *known == ext) {
            groups[group].push(path);
        }
    }

    Ok(groups.into_iter().flatten().collect())
}

#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extensions this extractor reads, in submission order.
    fn extensions(&self) -> &'static [&'static str] {
        DOCUMENT_EXTENSIONS
    }

    /// Text of one file, or `None` when it has none.
    async fn extract(&self, path: &Path) -> Result<Option<DocumentContent>, ExtractError>;
}

/// Plain text directly, PDFs through Pdfium, DOCX from its document XML.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileTextExtractor;

#[async_trait]
impl TextExtractor for FileTextExtractor {
    async fn extract(&self, path: &Path) -> Result<Option<DocumentContent>, ExtractError> {
        let display = path.display().to_string();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        let text = match ext.as_str() {
            "txt" => {
                let bytes = tokio::fs::read(path).await.map_err(|source| ExtractError::Io {
                    path: display.clone(),
                    source,
                })?;
                String::from_utf8_lossy(&bytes).into_owned()
            }
            "pdf" => {
                let bytes = tokio::fs::read(path).await.map_err(|source| ExtractError::Io {
                    path: display.clone(),
                    source,
                })?;
                let pdf_path = display.clone();
                tokio::task::spawn_blocking(move || extract_pdf_text(&bytes))
                    .await
                    .map_err(|e| ExtractError::Pdf {
                        path: pdf_path.clone(),
                        reason: e.to_string(),
                    })?
                    .map_err(|e| ExtractError::Pdf {
                        path: pdf_path,
                        reason: e.to_string(),
                    })?
            }
            "docx" => {
                let bytes = tokio::fs::read(path).await.map_err(|source| ExtractError::Io {
                    path: display.clone(),
                    source,
                })?;
                extract_docx_text(&bytes).map_err(|reason| ExtractError::Docx {
                    path: display.clone(),
                    reason,
                })?
            }
            other => {
                return Err(ExtractError::Unsupported {
                    path: display,
                    reason: format!("unknown extension '{other}'"),
                });
            }
        };

        if text.trim().is_empty() {
            return Ok(None);
        }
        let source = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or(display);
        Ok(Some(DocumentContent::new(text).with_source(source)))
    }
}

fn extract_pdf_text(bytes: &[u8]) -> Result<String, PdfiumError> {
    let pdfium = load_pdfium()?;
    let document = pdfium.load_pdf_from_byte_slice(bytes, None)?;

    let mut buffer = String::new();
    for page in document.pages().iter() {
        let page_text = page.text()?.all();
        if page_text.trim().is_empty() {
            continue;
        }
        if !buffer.is_empty() {
            buffer.push_str("\n\n");
        }
        buffer.push_str(&page_text);
    }
    Ok(buffer)
}

/// Non-empty paragraphs of `word/document.xml`, separated by blank lines.
fn extract_docx_text(bytes: &[u8]) -> Result<String, String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| e.to_string())?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| e.to_string())?
        .read_to_string(&mut xml)
        .map_err(|e| e.to_string())?;
    Ok(docx_paragraphs(&xml)?.join("\n\n"))
}

fn docx_paragraphs(xml: &str) -> Result<Vec<String>, String> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => in_text = true,
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let paragraph = current.trim();
                    if !paragraph.is_empty() {
                        paragraphs.push(paragraph.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" | b"cr" => current.push('\n'),
                _ => {}
            },
            Event::Text(text) if in_text => {
                current.push_str(&text.decode().map_err(|e| e.to_string())?);
            }
            Event::GeneralRef(reference) if in_text => {
                match reference.resolve_char_ref().map_err(|e| e.to_string())? {
                    Some(c) => current.push(c),
                    None => {
                        let name = reference.decode().map_err(|e| e.to_string())?;
                        if let Some(resolved) = resolve_xml_entity(&name) {
                            current.push_str(resolved);
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(paragraphs)
}

fn load_pdfium() -> Result<Pdfium, PdfiumError> {
    if let Ok(path) = std::env::var("PDFIUM_DYNAMIC_LIB_PATH") {
        let library = Pdfium::pdfium_platform_library_name_at_path(&path);
        if let Ok(bindings) = Pdfium::bind_to_library(library) {
            return Ok(Pdfium::new(bindings));
        }
        warn!("Could not load Pdfium from {}, trying system library", path);
    }
    Pdfium::bind_to_system_library().map(Pdfium::new)
}

/// Stage, discover and extract every document of a case.
///
/// Documents that fail to extract are logged and skipped. The staging
/// directory is gone by the time this returns.
pub async fn collect_case_documents(
    case_id: &str,
    source: &dyn DocumentSource,
    extractor: &dyn TextExtractor,
) -> Result<Vec<DocumentContent>, AnalysisError> {
    let staging = StagingArea::new(case_id)?;
    let staged = source.stage(case_id, staging.path()).await?;
    let paths = discover_files(staging.path(), extractor.extensions()).await?;
    info!(
        "Case {}: {} files staged, {} documents found",
        case_id,
        staged,
        paths.len()
    );

    let mut documents = Vec::with_capacity(paths.len());
    for path in &paths {
        match extractor.extract(path).await {
            Ok(Some(document)) => documents.push(document),
            Ok(None) => warn!("No text extracted from {}", path.display()),
            Err(e) => warn!("Skipping document: {}", e),
        }
    }

    info!(
        "Case {}: extracted text from {} of {} documents",
        case_id,
        documents.len(),
        paths.len()
    );
    Ok(documents)
}
