//! Parses the named-path code-block and unified-diff conventions LLM
//! responses use to carry stage artifacts (`spec.md` §6).
//!
//! Code fences open with one of three conventions on the fence line:
//! `language:path`, `filename:path`, or a bare `path`. Patches are standard
//! unified diffs (`diff --git a/... b/...`).

use std::fmt;

/// One named file extracted from a fenced code block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamedFile {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("code fence opening line {0:?} does not declare an unambiguous path")]
    AmbiguousPath(String),
    #[error("unterminated code fence")]
    Unterminated,
}

impl fmt::Display for NamedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)
    }
}

/// Extracts every named file from triple-backtick fences in `text`. A fence
/// opening line must match one of: `language:path`, `filename:path`, or a
/// bare `path` containing at least one `/` or a recognizable extension;
/// anything else is skipped as ambiguous rather than guessed at.
pub fn parse_named_files(text: &str) -> Vec<NamedFile> {
    let mut files = Vec::new();
    let mut lines = text.lines().peekable();

    while let Some(line) = lines.next() {
        let Some(opening) = line.strip_prefix("```") else {
            continue;
        };
        let opening = opening.trim();
        if opening.is_empty() {
            continue;
        }
        let Some(path) = extract_path(opening) else {
            // Skip to the fence's close without emitting a file.
            for l in lines.by_ref() {
                if l.trim_start().starts_with("```") {
                    break;
                }
            }
            continue;
        };

        let mut content_lines = Vec::new();
        let mut closed = false;
        for l in lines.by_ref() {
            if l.trim_start() == "```" {
                closed = true;
                break;
            }
            content_lines.push(l);
        }
        if closed {
            files.push(NamedFile {
                path,
                content: content_lines.join("\n"),
            });
        }
    }

    files
}

fn extract_path(opening: &str) -> Option<String> {
    if let Some((prefix, path)) = opening.split_once(':') {
        if !prefix.is_empty() && !path.is_empty() && (prefix == "filename" || is_language_tag(prefix)) {
            return Some(path.trim().to_string());
        }
        return None;
    }
    // Bare path: must look like a path, not a lone language name.
    if opening.contains('/') || opening.contains('.') {
        Some(opening.to_string())
    } else {
        None
    }
}

fn is_language_tag(tag: &str) -> bool {
    const KNOWN: &[&str] = &[
        "rust", "rs", "python", "py", "javascript", "js", "typescript", "ts", "json", "toml",
        "yaml", "yml", "html", "css", "sql", "bash", "sh", "go", "java", "c", "cpp",
    ];
    KNOWN.contains(&tag.to_ascii_lowercase().as_str())
}

/// A single file's hunk within a unified diff (`spec.md` §6).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiffFile {
    pub old_path: String,
    pub new_path: String,
    pub hunks: Vec<String>,
}

/// Splits a unified-diff blob into per-file sections on `diff --git` lines.
pub fn parse_unified_diff(text: &str) -> Vec<DiffFile> {
    let mut files = Vec::new();
    let mut current: Option<(String, String, Vec<String>)> = None;

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            if let Some((old, new, hunks)) = current.take() {
                files.push(DiffFile {
                    old_path: old,
                    new_path: new,
                    hunks,
                });
            }
            let mut parts = rest.split_whitespace();
            let a = parts.next().unwrap_or("").trim_start_matches("a/").to_string();
            let b = parts.next().unwrap_or("").trim_start_matches("b/").to_string();
            current = Some((a, b, Vec::new()));
        } else if let Some((_, _, hunks)) = current.as_mut() {
            if line.starts_with("@@") || !hunks.is_empty() {
                hunks.push(line.to_string());
            }
        }
    }
    if let Some((old, new, hunks)) = current.take() {
        files.push(DiffFile {
            old_path: old,
            new_path: new,
            hunks,
        });
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_language_colon_path_fence() {
        let text = "Here is the file:\n```rust:src/main.rs\nfn main() {}\n```\ndone";
        let files = parse_named_files(text);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "src/main.rs");
        assert_eq!(files[0].content, "fn main() {}");
    }

    #[test]
    fn parses_filename_colon_path_fence() {
        let text = "```filename:Cargo.toml\n[package]\nname = \"x\"\n```";
        let files = parse_named_files(text);
        assert_eq!(files[0].path, "Cargo.toml");
    }

    #[test]
    fn parses_bare_path_fence() {
        let text = "```src/lib.rs\npub fn f() {}\n```";
        let files = parse_named_files(text);
        assert_eq!(files[0].path, "src/lib.rs");
    }

    #[test]
    fn ambiguous_fence_is_skipped_not_guessed() {
        let text = "```rust\nfn main() {}\n```";
        let files = parse_named_files(text);
        assert!(files.is_empty());
    }

    #[test]
    fn unterminated_fence_yields_no_file() {
        let text = "```rust:src/main.rs\nfn main() {}";
        let files = parse_named_files(text);
        assert!(files.is_empty());
    }

    #[test]
    fn parses_unified_diff_file_headers() {
        let diff = "diff --git a/src/main.rs b/src/main.rs\n--- a/src/main.rs\n+++ b/src/main.rs\n@@ -1,1 +1,2 @@\n fn main() {}\n+// added\n";
        let files = parse_unified_diff(diff);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].old_path, "src/main.rs");
        assert_eq!(files[0].new_path, "src/main.rs");
        assert!(files[0].hunks.iter().any(|h| h.starts_with("@@")));
    }
}
