use std::fs;
use std::path::Path;
use tempfile::TempDir;

use docrag_core::chunker::chunk;
use docrag_core::normalize::{is_supported_file, normalize};

#[test]
fn normalize_then_chunk_markdown_file() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("guide.md");
    fs::write(
        &path,
        "---\ntitle: Guide\n---\n\n# Getting Started\n\nDownload the latest release and run the installer.\n\n## Configuration\n\nEdit the config file to set the *listen* port.\n",
    )
    .unwrap();

    let raw = fs::read_to_string(&path).unwrap();
    let text = normalize(&raw, &path).expect("normalize");
    let chunks = chunk(&text, "guide.md", 100, 10).expect("chunk");

    assert_eq!(chunks.len(), 2, "one chunk per section");
    assert_eq!(chunks[0].heading.as_deref(), Some("Getting Started"));
    assert_eq!(chunks[1].heading.as_deref(), Some("Configuration"));
    assert!(chunks[1].text.contains("listen"), "emphasis markers removed");
    assert!(!chunks[1].text.contains('*'));
}

#[test]
fn rechunking_a_file_reproduces_identical_ids() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("notes.txt");
    let body: String = (0..300).map(|i| format!("token{} ", i)).collect();
    fs::write(&path, &body).unwrap();

    let raw = fs::read_to_string(&path).unwrap();
    let text = normalize(&raw, &path).expect("normalize");
    let first = chunk(&text, "notes.txt", 50, 5).expect("chunk");
    let second = chunk(&text, "notes.txt", 50, 5).expect("chunk");

    let first_ids: Vec<_> = first.iter().map(|c| c.id.clone()).collect();
    let second_ids: Vec<_> = second.iter().map(|c| c.id.clone()).collect();
    assert_eq!(first_ids, second_ids);
    assert!(first.len() > 1);
}

#[test]
fn unsupported_files_are_rejected_by_the_filter() {
    assert!(is_supported_file(Path::new("a.md")));
    assert!(is_supported_file(Path::new("a.txt")));
    assert!(!is_supported_file(Path::new("a.pdf")));
    assert!(!is_supported_file(Path::new("a.jpg")));
}
