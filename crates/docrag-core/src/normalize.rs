//! Text normalization applied to raw documents before chunking.
//!
//! Markdown keeps its heading lines (`# ...`) so the chunker can attach
//! heading context; emphasis and inline-code markers are dropped. HTML is
//! reduced to text with entities decoded. Paragraph structure (blank lines)
//! is preserved in all flavors because the chunker splits on it.

use std::path::Path;

use crate::{Error, Result};

/// File extensions the ingestion path accepts.
pub fn is_supported_file(path: &Path) -> bool {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => matches!(
            ext.to_ascii_lowercase().as_str(),
            "md" | "markdown" | "html" | "htm" | "txt" | "rst"
        ),
        None => false,
    }
}

/// Normalize raw file content according to the file's extension.
pub fn normalize(content: &str, path: &Path) -> Result<String> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match extension.as_str() {
        "md" | "markdown" => Ok(normalize_markdown(content)),
        "html" | "htm" => normalize_html(content),
        _ => Ok(normalize_plain(content)),
    }
}

fn normalize_markdown(content: &str) -> String {
    let content = strip_frontmatter(content);

    let mut out = Vec::new();
    let mut in_code_fence = false;
    for line in content.lines() {
        let trimmed = line.trim_end();
        if trimmed.trim_start().starts_with("```") {
            in_code_fence = !in_code_fence;
            continue;
        }
        if in_code_fence {
            // Keep code content searchable, just without the fence markers.
            out.push(trimmed.to_string());
            continue;
        }
        if trimmed.trim_start().starts_with('#') {
            // Heading lines pass through untouched for the chunker.
            out.push(trimmed.trim_start().to_string());
            continue;
        }
        let line = trimmed.replace("**", "").replace('*', "").replace('`', "");
        out.push(line);
    }
    collapse_blank_runs(&out)
}

fn normalize_html(content: &str) -> Result<String> {
    let mut processed = content.to_string();

    // Drop non-content elements wholesale.
    for tag in ["script", "style", "nav", "header", "footer", "aside"] {
        let re = regex::Regex::new(&format!(r"(?is)<{tag}\b.*?</{tag}>"))
            .map_err(|e| Error::Operation(format!("regex error: {}", e)))?;
        processed = re.replace_all(&processed, " ").to_string();
    }

    // Block-level closers become paragraph breaks so structure survives.
    let block_re = regex::Regex::new(r"(?i)</(p|div|section|article|h[1-6]|li|tr)>|<br\s*/?>")
        .map_err(|e| Error::Operation(format!("regex error: {}", e)))?;
    processed = block_re.replace_all(&processed, "\n\n").to_string();

    let tag_re = regex::Regex::new(r"<[^>]*>")
        .map_err(|e| Error::Operation(format!("regex error: {}", e)))?;
    processed = tag_re.replace_all(&processed, " ").to_string();

    processed = processed
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");

    let lines: Vec<String> = processed
        .lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect();
    Ok(collapse_blank_runs(&lines))
}

fn normalize_plain(content: &str) -> String {
    let lines: Vec<String> = content.lines().map(|l| l.trim_end().to_string()).collect();
    collapse_blank_runs(&lines)
}

/// Strip YAML frontmatter from markdown content.
pub fn strip_frontmatter(content: &str) -> &str {
    if let Some(rest) = content.strip_prefix("---") {
        if let Some(end) = rest.find("\n---") {
            let after = &rest[end + 4..];
            return after.strip_prefix('\n').unwrap_or(after);
        }
    }
    content
}

// Collapse runs of blank lines to a single paragraph break and trim the ends.
fn collapse_blank_runs(lines: &[String]) -> String {
    let mut out = String::new();
    let mut pending_break = false;
    for line in lines {
        if line.trim().is_empty() {
            pending_break = !out.is_empty();
            continue;
        }
        if pending_break {
            out.push_str("\n\n");
            pending_break = false;
        } else if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(line);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn supported_extensions() {
        assert!(is_supported_file(Path::new("guide.md")));
        assert!(is_supported_file(Path::new("page.HTML")));
        assert!(is_supported_file(Path::new("notes.rst")));
        assert!(!is_supported_file(Path::new("image.png")));
        assert!(!is_supported_file(Path::new("Makefile")));
    }

    #[test]
    fn frontmatter_is_stripped() {
        let input = "---\ntitle: Test\n---\n\n# Heading\n\nBody";
        let out = strip_frontmatter(input);
        assert!(out.starts_with("\n# Heading"));
    }

    #[test]
    fn markdown_keeps_headings_and_drops_emphasis() {
        let input = "# Install\n\nThis is **bold** and `inline`.\n\n```rust\nfn main() {}\n```\n";
        let out = normalize(input, Path::new("a.md")).unwrap();
        assert!(out.contains("# Install"));
        assert!(out.contains("This is bold and inline."));
        assert!(!out.contains("```"));
        assert!(out.contains("fn main() {}"));
    }

    #[test]
    fn html_is_reduced_to_text() {
        let input = "<html><script>var x = 1;</script><body><h1>Title</h1><p>First &amp; second</p></body></html>";
        let out = normalize(input, Path::new("a.html")).unwrap();
        assert!(out.contains("Title"));
        assert!(out.contains("First & second"));
        assert!(!out.contains("var x"));
        assert!(!out.contains('<'));
    }

    #[test]
    fn blank_runs_collapse_to_one_paragraph_break() {
        let input = "alpha\n\n\n\nbravo\n";
        let out = normalize(input, Path::new("a.txt")).unwrap();
        assert_eq!(out, "alpha\n\nbravo");
    }
}
