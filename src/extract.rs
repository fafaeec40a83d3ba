//! PDF document loader.
//!
//! Turns one PDF into one [`RawDocument`] per page, in page order. Each
//! page's metadata carries the name the user uploaded (not the path the
//! bytes were spooled to), its 1-based page number and the page count.
//!
//! Text comes from `pdf-extract` page by page. Pages it leaves blank, and
//! whole documents it cannot handle, fall back to `lopdf`'s own text
//! extraction. A page with no extractable text still produces a document
//! with empty text so numbering stays aligned with the source.

use std::collections::{BTreeMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;

use async_trait::async_trait;
use lopdf::encryption::decrypt_object;
use lopdf::xref::XrefEntry;
use lopdf::{Document, EncryptionState, Object, ObjectId, ObjectStream, Reader};
use tracing::{debug, warn};

use knowledge_rag_core::error::ExtractionError;
use knowledge_rag_core::models::{PageMetadata, RawDocument};

pub const MIME_PDF: &str = "application/pdf";

/// A file handed to the loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Where the bytes are on disk (possibly a temporary upload path).
    pub path: PathBuf,
    /// The user-facing file name recorded in page metadata.
    pub name: String,
    /// Decryption key for encrypted PDFs.
    pub password: Option<String>,
}

impl SourceFile {
    /// Use the path's final component as the display name.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            path,
            name,
            password: None,
        }
    }

    /// Bytes at `path`, recorded under `name`.
    pub fn named(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            password: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

#[async_trait]
pub trait DocumentLoader: Send + Sync {
    async fn load(&self, source: &SourceFile) -> Result<Vec<RawDocument>, ExtractionError>;
}

/// Loads PDFs from the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfLoader;

#[async_trait]
impl DocumentLoader for PdfLoader {
    async fn load(&self, source: &SourceFile) -> Result<Vec<RawDocument>, ExtractionError> {
        debug!(file = %source.name, path = %source.path.display(), "loading PDF");
        let bytes = tokio::fs::read(&source.path)
            .await
            .map_err(|e| ExtractionError::Io {
                file: source.name.clone(),
                source: e,
            })?;

        let name = source.name.clone();
        let password = source.password.clone();
        tokio::task::spawn_blocking(move || load_pdf(&bytes, &name, password.as_deref()))
            .await
            .map_err(|e| ExtractionError::Corrupt {
                file: source.name.clone(),
                reason: format!("extraction task failed: {}", e),
            })?
    }
}

/// Split PDF bytes into per-page documents labelled with `name`.
pub fn load_pdf(
    bytes: &[u8],
    name: &str,
    password: Option<&str>,
) -> Result<Vec<RawDocument>, ExtractionError> {
    if !looks_like_pdf(bytes) {
        return Err(ExtractionError::NotPdf {
            file: name.to_string(),
        });
    }

    let mut doc = Document::load_mem(bytes).map_err(|e| ExtractionError::Corrupt {
        file: name.to_string(),
        reason: e.to_string(),
    })?;

    let encrypted = doc.is_encrypted();
    if encrypted {
        unlock(&mut doc, bytes, name, password)?;
    }

    let pages: Vec<u32> = doc.get_pages().keys().copied().collect();
    if pages.is_empty() {
        return Err(ExtractionError::Corrupt {
            file: name.to_string(),
            reason: "document has no pages".to_string(),
        });
    }
    let total_pages = pages.len() as u32;

    // pdf-extract reads the raw bytes, so it cannot see decrypted content.
    let primary = if encrypted {
        None
    } else {
        extract_by_pages(bytes, name, pages.len())
    };

    let mut docs = Vec::with_capacity(pages.len());
    for (i, page_number) in pages.iter().enumerate() {
        let mut text = primary
            .as_ref()
            .and_then(|texts| texts.get(i))
            .cloned()
            .unwrap_or_default();
        if text.trim().is_empty() {
            text = doc.extract_text(&[*page_number]).unwrap_or_else(|e| {
                debug!(file = name, page = page_number, error = %e, "no text on page");
                String::new()
            });
        }
        docs.push(RawDocument {
            text: clean_text(&text),
            metadata: PageMetadata {
                source_file: name.to_string(),
                page_number: (i + 1) as u32,
                total_pages,
            },
        });
    }

    debug!(file = name, pages = total_pages, "loaded PDF");
    Ok(docs)
}

fn looks_like_pdf(bytes: &[u8]) -> bool {
    // The header may follow a few bytes of junk.
    let head = &bytes[..bytes.len().min(1024)];
    head.windows(5).any(|w| w == b"%PDF-")
}

/// Make an encrypted document readable.
///
/// lopdf decrypts on load when the empty user password opens the file
/// (owner-password-only PDFs). Otherwise it keeps only the encryption
/// dictionary, so the objects are parsed again from `bytes` and decrypted
/// with `password`.
fn unlock(
    doc: &mut Document,
    bytes: &[u8],
    name: &str,
    password: Option<&str>,
) -> Result<(), ExtractionError> {
    if doc.encryption_state.is_some() {
        return Ok(());
    }
    let Some(key) = password else {
        return Err(ExtractionError::Encrypted {
            file: name.to_string(),
        });
    };
    let failed = |reason: String| ExtractionError::Decrypt {
        file: name.to_string(),
        reason,
    };

    doc.authenticate_password(key)
        .map_err(|e| failed(e.to_string()))?;
    let state = EncryptionState::decode(&*doc, key).map_err(|e| failed(e.to_string()))?;
    let encrypt_id = doc
        .trailer
        .get(b"Encrypt")
        .and_then(Object::as_reference)
        .map_err(|e| failed(e.to_string()))?;

    // Xref offsets count from the header, as in lopdf's own reader.
    let start = bytes.windows(5).position(|w| w == b"%PDF-").unwrap_or(0);
    let mut reader = Reader {
        buffer: &bytes[start..],
        document: Document::new(),
        encryption_state: None,
        raw_objects: BTreeMap::new(),
    };
    reader.document.reference_table = doc.reference_table.clone();

    let ids: Vec<ObjectId> = doc
        .reference_table
        .entries
        .iter()
        .filter_map(|(&number, entry)| match *entry {
            XrefEntry::Normal { generation, .. } => Some((number, generation)),
            _ => None,
        })
        .filter(|id| *id != encrypt_id)
        .collect();

    for id in ids {
        let mut object = match reader.get_object(id, &mut HashSet::new()) {
            Ok(object) => object,
            Err(e) => {
                debug!(file = name, object = ?id, error = %e, "skipping unreadable object");
                continue;
            }
        };
        if let Err(e) = decrypt_object(&state, id, &mut object) {
            debug!(file = name, object = ?id, error = %e, "skipping undecryptable object");
            continue;
        }
        doc.objects.insert(id, object);
    }

    let mut packed = Vec::new();
    for object in doc.objects.values_mut() {
        if let Ok(stream) = object.as_stream_mut() {
            if stream.dict.has_type(b"ObjStm") {
                if let Ok(objects) = ObjectStream::new(stream) {
                    packed.extend(objects.objects);
                }
            }
        }
    }
    for (id, object) in packed {
        doc.objects.entry(id).or_insert(object);
    }

    doc.trailer.remove(b"Encrypt");
    doc.objects.remove(&encrypt_id);
    doc.encryption_state = Some(state);
    debug!(file = name, objects = doc.objects.len(), "decrypted PDF");
    Ok(())
}

/// Per-page text from pdf-extract, or `None` when it fails, panics, or
/// disagrees with lopdf about the page count.
fn extract_by_pages(bytes: &[u8], name: &str, expected: usize) -> Option<Vec<String>> {
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(bytes)
    }));
    match result {
        Ok(Ok(texts)) if texts.len() == expected => Some(texts),
        Ok(Ok(texts)) => {
            warn!(
                file = name,
                expected,
                actual = texts.len(),
                "pdf-extract page count differs, falling back to lopdf"
            );
            None
        }
        Ok(Err(e)) => {
            warn!(file = name, error = %e, "pdf-extract failed, falling back to lopdf");
            None
        }
        Err(_) => {
            warn!(file = name, "pdf-extract panicked, falling back to lopdf");
            None
        }
    }
}

/// Strip NULs and trailing whitespace on each line.
fn clean_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (i, line) in text.replace('\0', "").lines().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(line.trim_end());
    }
    out.trim_matches('\n').to_string()
}
