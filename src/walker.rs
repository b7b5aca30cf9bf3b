/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Repository enumeration and filtering.
//!
//! Walks a project root with `.gitignore` semantics, drops binaries and
//! oversized files, detects each file's language, and classifies analysis
//! priority so entry points and API surfaces reach the queue first.

use anyhow::{Context, Result};
use ignore::WalkBuilder;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::lang;

/// How many bytes of the file head are read for the binary heuristic and
/// shebang sniff.
const HEAD_BYTES: usize = 8 * 1024;

/// Analysis priority classes. Smaller means sooner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Language-idiomatic entry point, or file named after its directory.
    EntryPoint = 1,
    /// Export/API surface (`exports.ts`, `*.d.ts`, anything `api`-ish).
    ExportApi = 2,
    /// File sitting directly in the repository root.
    RootFile = 3,
    /// Everything else.
    Regular = 4,
}

impl Priority {
    /// Numeric rank used by the work queue (1 = most urgent).
    #[must_use]
    pub const fn rank(self) -> u32 {
        self as u32
    }
}

/// A file that survived filtering, ready for the work queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    /// Absolute path.
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
    /// Detected LSP language id (or [`lang::CONFIG_LANGUAGE`]).
    pub language: &'static str,
    /// Priority class.
    pub priority: Priority,
}

/// Walks and filters a repository root.
pub struct FileWalker {
    root: PathBuf,
    max_file_bytes: u64,
    export_api: Regex,
}

impl FileWalker {
    /// Creates a walker for `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` cannot be canonicalized.
    pub fn new(root: &Path, max_file_bytes: u64) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("invalid project root: {}", root.display()))?;
        // The pattern is fixed; failure here would be a programming error,
        // surfaced once at construction rather than per file.
        let export_api = Regex::new(r"^(exports?\.(js|ts)|public\..*)$")
            .context("invalid export-api pattern")?;
        Ok(Self {
            root,
            max_file_bytes,
            export_api,
        })
    }

    /// Enumerates the repository and returns descriptors ordered by
    /// (priority, size, path). The ordering is total, so two walks of the
    /// same tree produce the same sequence.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying directory walk fails.
    pub fn discover(&self) -> Result<Vec<FileDescriptor>> {
        let mut files = Vec::new();

        let walker = WalkBuilder::new(&self.root)
            .hidden(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .build();

        for entry in walker {
            let entry = entry.context("walk failed")?;
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let path = entry.path();

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    debug!("skipping unreadable entry {}: {e}", path.display());
                    continue;
                }
            };
            let size = metadata.len();
            if size > self.max_file_bytes {
                trace!("skipping oversized file ({size} bytes): {}", path.display());
                continue;
            }

            let head = match read_head(path) {
                Ok(h) => h,
                Err(e) => {
                    debug!("skipping unreadable file {}: {e}", path.display());
                    continue;
                }
            };
            if looks_binary(&head) {
                trace!("skipping binary file: {}", path.display());
                continue;
            }

            let Some(language) = lang::detect(path, &head) else {
                trace!("skipping unsupported file: {}", path.display());
                continue;
            };

            files.push(FileDescriptor {
                path: path.to_path_buf(),
                size,
                language,
                priority: self.classify(path),
            });
        }

        files.sort_by(|a, b| {
            (a.priority, a.size, &a.path).cmp(&(b.priority, b.size, &b.path))
        });

        debug!("discovered {} analyzable files under {}", files.len(), self.root.display());
        Ok(files)
    }

    /// Root the walker was built over (canonicalized).
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn classify(&self, path: &Path) -> Priority {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            return Priority::Regular;
        };

        if is_entry_point(file_name) || named_after_directory(path, file_name) {
            return Priority::EntryPoint;
        }

        let lower = file_name.to_ascii_lowercase();
        if self.export_api.is_match(&lower) || lower.contains("api") || lower.ends_with(".d.ts") {
            return Priority::ExportApi;
        }

        if path.parent() == Some(self.root.as_path()) {
            return Priority::RootFile;
        }

        Priority::Regular
    }
}

fn is_entry_point(file_name: &str) -> bool {
    matches!(
        file_name,
        "__init__.py" | "index.js" | "index.ts" | "mod.rs" | "lib.rs"
    ) || file_name
        .strip_prefix("main.")
        .is_some_and(|rest| !rest.is_empty() && !rest.contains('.'))
}

/// `utils/utils.py`-style files count as entry points for their directory.
fn named_after_directory(path: &Path, file_name: &str) -> bool {
    let stem = file_name.rsplit_once('.').map_or(file_name, |(s, _)| s);
    path.parent()
        .and_then(|p| p.file_name())
        .and_then(|d| d.to_str())
        .is_some_and(|dir| dir == stem)
}

fn read_head(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let mut buf = vec![0u8; HEAD_BYTES];
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

/// Binary heuristic: any NUL byte in the first 8 KiB.
fn looks_binary(head: &[u8]) -> bool {
    head.contains(&0)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "test fixtures")]

    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, contents: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn discovers_and_orders_by_priority() {
        let dir = tempdir().unwrap();
        write(dir.path(), "pkg/__init__.py", b"");
        write(dir.path(), "pkg/worker.py", b"def run(): pass\n");
        write(dir.path(), "setup.py", b"import setuptools\n");

        let walker = FileWalker::new(dir.path(), 2 * 1024 * 1024).unwrap();
        let files = walker.discover().unwrap();

        assert_eq!(files.len(), 3);
        assert!(files[0].path.ends_with("__init__.py"));
        assert_eq!(files[0].priority, Priority::EntryPoint);
        assert!(files.iter().all(|f| f.language == "python"));
    }

    #[test]
    fn rejects_binary_and_oversized() {
        let dir = tempdir().unwrap();
        write(dir.path(), "blob.py", b"\x00\x01\x02");
        write(dir.path(), "big.py", &vec![b'x'; 64]);
        write(dir.path(), "ok.py", b"x = 1\n");

        let walker = FileWalker::new(dir.path(), 32).unwrap();
        let files = walker.discover().unwrap();

        assert_eq!(files.len(), 1);
        assert!(files[0].path.ends_with("ok.py"));
    }

    #[test]
    fn respects_gitignore() {
        let dir = tempdir().unwrap();
        write(dir.path(), ".gitignore", b"generated/\n");
        write(dir.path(), "generated/out.py", b"x = 1\n");
        write(dir.path(), "src/keep.py", b"x = 1\n");

        let walker = FileWalker::new(dir.path(), 2 * 1024 * 1024).unwrap();
        let files = walker.discover().unwrap();

        assert_eq!(files.len(), 1);
        assert!(files[0].path.ends_with("keep.py"));
    }

    #[test]
    fn keeps_config_files_without_language() {
        let dir = tempdir().unwrap();
        write(dir.path(), "Dockerfile", b"FROM debian\n");
        write(dir.path(), "notes.xyz", b"not code\n");

        let walker = FileWalker::new(dir.path(), 2 * 1024 * 1024).unwrap();
        let files = walker.discover().unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].language, lang::CONFIG_LANGUAGE);
    }

    #[test]
    fn classifies_export_api_and_root() {
        let dir = tempdir().unwrap();
        write(dir.path(), "src/exports.ts", b"export {};\n");
        write(dir.path(), "src/types.d.ts", b"export {};\n");
        write(dir.path(), "rootfile.rs", b"fn f() {}\n");
        write(dir.path(), "src/deep/other.rs", b"fn g() {}\n");

        let walker = FileWalker::new(dir.path(), 2 * 1024 * 1024).unwrap();
        let files = walker.discover().unwrap();
        let by_name = |name: &str| {
            files
                .iter()
                .find(|f| f.path.file_name().unwrap().to_str().unwrap() == name)
                .unwrap()
        };

        assert_eq!(by_name("exports.ts").priority, Priority::ExportApi);
        assert_eq!(by_name("types.d.ts").priority, Priority::ExportApi);
        assert_eq!(by_name("rootfile.rs").priority, Priority::RootFile);
        assert_eq!(by_name("other.rs").priority, Priority::Regular);
    }

    #[test]
    fn directory_named_file_is_entry_point() {
        let dir = tempdir().unwrap();
        write(dir.path(), "utils/utils.py", b"x = 1\n");

        let walker = FileWalker::new(dir.path(), 2 * 1024 * 1024).unwrap();
        let files = walker.discover().unwrap();
        assert_eq!(files[0].priority, Priority::EntryPoint);
    }
}
