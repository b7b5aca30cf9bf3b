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

//! Language detection: pure functions from path (plus a peek at the file
//! head) to an LSP language id.
//!
//! Resolution order: filename table, extension table, shebang sniff for
//! extensionless files. Files nobody can analyze come back as `None`; the
//! walker excludes them unless they match the config-file table.

use std::path::Path;

/// Pseudo language id for build/config files that carry no language server
/// but still belong in the graph (`Dockerfile`, `package.json`, ...).
pub const CONFIG_LANGUAGE: &str = "config";

/// Well-known filenames that override extension-based detection.
const FILENAME_TABLE: &[(&str, &str)] = &[
    ("__init__.py", "python"),
    ("mod.rs", "rust"),
    ("Dockerfile", CONFIG_LANGUAGE),
    ("Containerfile", CONFIG_LANGUAGE),
    ("Makefile", CONFIG_LANGUAGE),
    ("Justfile", CONFIG_LANGUAGE),
    ("package.json", CONFIG_LANGUAGE),
    ("tsconfig.json", CONFIG_LANGUAGE),
    ("pyproject.toml", CONFIG_LANGUAGE),
    ("Cargo.toml", CONFIG_LANGUAGE),
    ("go.mod", CONFIG_LANGUAGE),
    ("pom.xml", CONFIG_LANGUAGE),
    ("build.gradle", CONFIG_LANGUAGE),
    ("CMakeLists.txt", CONFIG_LANGUAGE),
];

/// Detects the language id for a path, consulting `head` (the first bytes
/// of the file) for a shebang when the path has no extension.
#[must_use]
pub fn detect(path: &Path, head: &[u8]) -> Option<&'static str> {
    let file_name = path.file_name().and_then(|n| n.to_str())?;

    if let Some((_, lang)) = FILENAME_TABLE.iter().find(|(name, _)| *name == file_name) {
        return Some(lang);
    }

    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => from_extension(ext),
        None => from_shebang(head),
    }
}

/// Returns true if the filename is in the config-file table.
#[must_use]
pub fn is_config_name(file_name: &str) -> bool {
    FILENAME_TABLE
        .iter()
        .any(|(name, lang)| *name == file_name && *lang == CONFIG_LANGUAGE)
}

fn from_extension(ext: &str) -> Option<&'static str> {
    let lang = match ext {
        "rs" => "rust",
        "go" => "go",
        "py" | "pyi" => "python",
        "js" | "mjs" | "cjs" => "javascript",
        "ts" | "mts" => "typescript",
        "tsx" => "typescriptreact",
        "jsx" => "javascriptreact",
        "c" => "c",
        "cpp" | "cc" | "cxx" | "h" | "hpp" => "cpp",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "rb" => "ruby",
        "php" => "php",
        "cs" => "csharp",
        "swift" => "swift",
        "scala" => "scala",
        "lua" => "lua",
        "sh" | "bash" | "zsh" => "shellscript",
        "json" | "yaml" | "yml" | "toml" => CONFIG_LANGUAGE,
        _ => return None,
    };
    Some(lang)
}

/// Sniffs a `#!` interpreter line from the head of an extensionless file.
fn from_shebang(head: &[u8]) -> Option<&'static str> {
    let head = std::str::from_utf8(head).ok()?;
    let first_line = head.lines().next()?;
    let interpreter = first_line.strip_prefix("#!")?;

    // `#!/usr/bin/env python3` and `#!/usr/bin/python3` both end with the
    // interpreter name.
    let program = interpreter
        .split_whitespace()
        .last()?
        .rsplit('/')
        .next()?
        .trim_end_matches(|c: char| c.is_ascii_digit() || c == '.');

    match program {
        "python" => Some("python"),
        "node" => Some("javascript"),
        "ruby" => Some("ruby"),
        "sh" | "bash" | "zsh" | "dash" => Some("shellscript"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_table() {
        assert_eq!(detect(Path::new("src/main.rs"), b""), Some("rust"));
        assert_eq!(detect(Path::new("a/b.py"), b""), Some("python"));
        assert_eq!(detect(Path::new("web/app.tsx"), b""), Some("typescriptreact"));
        assert_eq!(detect(Path::new("x.bin"), b""), None);
    }

    #[test]
    fn filename_table_beats_extension() {
        assert_eq!(detect(Path::new("pkg/__init__.py"), b""), Some("python"));
        assert_eq!(detect(Path::new("package.json"), b""), Some(CONFIG_LANGUAGE));
        assert_eq!(detect(Path::new("deep/Cargo.toml"), b""), Some(CONFIG_LANGUAGE));
        assert_eq!(detect(Path::new("Dockerfile"), b""), Some(CONFIG_LANGUAGE));
    }

    #[test]
    fn shebang_fallback_for_extensionless() {
        assert_eq!(
            detect(Path::new("scripts/deploy"), b"#!/usr/bin/env python3\nimport os\n"),
            Some("python")
        );
        assert_eq!(detect(Path::new("run"), b"#!/bin/bash\necho hi\n"), Some("shellscript"));
        assert_eq!(detect(Path::new("LICENSE"), b"GPL-3.0\n"), None);
    }

    #[test]
    fn config_names() {
        assert!(is_config_name("Dockerfile"));
        assert!(is_config_name("package.json"));
        assert!(!is_config_name("__init__.py"));
        assert!(!is_config_name("main.rs"));
    }
}
