//! PDF loading against documents built with lopdf.

use std::fs;

use tempfile::TempDir;

use knowledge_rag::extract::{load_pdf, DocumentLoader, PdfLoader, SourceFile};
use knowledge_rag_core::error::ExtractionError;

mod common;
use common::{encrypted_pdf_with_pages, pdf_with_pages};

#[test]
fn test_one_document_per_page() {
    let bytes = pdf_with_pages(&["first page alpha", "second page beta", "third page gamma"]);
    let docs = load_pdf(&bytes, "Quarterly Report.pdf", None).unwrap();

    assert_eq!(docs.len(), 3);
    for (i, doc) in docs.iter().enumerate() {
        assert_eq!(doc.metadata.page_number, i as u32 + 1);
        assert_eq!(doc.metadata.total_pages, 3);
        assert_eq!(doc.metadata.source_file, "Quarterly Report.pdf");
    }
    assert!(docs[0].text.contains("alpha"), "page 1: {:?}", docs[0].text);
    assert!(docs[1].text.contains("beta"), "page 2: {:?}", docs[1].text);
    assert!(docs[2].text.contains("gamma"), "page 3: {:?}", docs[2].text);
}

#[test]
fn test_blank_page_kept_with_empty_text() {
    let bytes = pdf_with_pages(&["cover text", ""]);
    let docs = load_pdf(&bytes, "scan.pdf", None).unwrap();
    assert_eq!(docs.len(), 2);
    assert!(docs[1].text.trim().is_empty());
    assert_eq!(docs[1].metadata.page_number, 2);
}

#[tokio::test]
async fn test_loader_records_original_name_not_temp_path() {
    let tmp = TempDir::new().unwrap();
    let spooled = tmp.path().join("upload-5d1c.tmp");
    fs::write(&spooled, pdf_with_pages(&["hello world"])).unwrap();

    let docs = PdfLoader
        .load(&SourceFile::named(&spooled, "My Notes.pdf"))
        .await
        .unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].metadata.source_file, "My Notes.pdf");
    assert!(!docs[0].metadata.source_file.contains("upload-5d1c"));
}

#[tokio::test]
async fn test_loader_rejects_non_pdf() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("notes.pdf");
    fs::write(&path, "just some text pretending to be a PDF").unwrap();

    let err = PdfLoader.load(&SourceFile::new(&path)).await.unwrap_err();
    assert!(matches!(err, ExtractionError::NotPdf { .. }));
    assert_eq!(err.file(), "notes.pdf");
}

#[tokio::test]
async fn test_loader_missing_file() {
    let tmp = TempDir::new().unwrap();
    let err = PdfLoader
        .load(&SourceFile::named(tmp.path().join("upload-8f3a.tmp"), "report.pdf"))
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractionError::Io { .. }));
    assert_eq!(err.file(), "report.pdf");
}

const LOCKED_PAGES: [&str; 2] = ["secret alpha page", "second beta page"];

#[test]
fn test_encrypted_with_right_key() {
    let bytes = encrypted_pdf_with_pages(&LOCKED_PAGES, "owner", "user");
    let docs = load_pdf(&bytes, "locked.pdf", Some("user")).unwrap();

    assert_eq!(docs.len(), 2);
    assert!(docs[0].text.contains("secret alpha"), "page 1: {:?}", docs[0].text);
    assert!(docs[1].text.contains("second beta"), "page 2: {:?}", docs[1].text);
    assert_eq!(docs[1].metadata.page_number, 2);
    assert_eq!(docs[1].metadata.total_pages, 2);
    assert_eq!(docs[0].metadata.source_file, "locked.pdf");
}

#[test]
fn test_encrypted_without_key() {
    let bytes = encrypted_pdf_with_pages(&LOCKED_PAGES, "owner", "user");
    let err = load_pdf(&bytes, "locked.pdf", None).unwrap_err();
    assert!(matches!(err, ExtractionError::Encrypted { .. }), "{:?}", err);
    assert_eq!(err.file(), "locked.pdf");
}

#[test]
fn test_encrypted_with_wrong_key() {
    let bytes = encrypted_pdf_with_pages(&LOCKED_PAGES, "owner", "user");
    let err = load_pdf(&bytes, "locked.pdf", Some("guess")).unwrap_err();
    assert!(matches!(err, ExtractionError::Decrypt { .. }), "{:?}", err);
}

#[test]
fn test_owner_password_only_opens_without_key() {
    let bytes = encrypted_pdf_with_pages(&LOCKED_PAGES, "owner", "");
    let docs = load_pdf(&bytes, "restricted.pdf", None).unwrap();

    assert_eq!(docs.len(), 2);
    assert!(docs[0].text.contains("secret alpha"), "page 1: {:?}", docs[0].text);
    assert!(docs[1].text.contains("second beta"), "page 2: {:?}", docs[1].text);
}

#[tokio::test]
async fn test_loader_passes_key_through() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("locked.pdf");
    fs::write(&path, encrypted_pdf_with_pages(&LOCKED_PAGES, "owner", "user")).unwrap();

    let docs = PdfLoader
        .load(&SourceFile::new(&path).with_password("user"))
        .await
        .unwrap();
    assert!(docs[0].text.contains("secret alpha"));
}
