// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! A configurable mock LSP server for testing.
//!
//! Speaks the LSP protocol over stdin/stdout using Content-Length framed
//! JSON-RPC. Serves deterministic `documentSymbol`/`references`/
//! `implementation` answers derived from line-based scanning of Python-ish
//! source, so pipeline tests need no real language server. CLI flags
//! control timing and failure modes. No tokio — a plain synchronous loop.

#![allow(clippy::print_stdout, reason = "stdout carries the LSP wire protocol")]

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde_json::{Value, json};

/// Mock LSP server for integration testing.
#[derive(Parser, Debug)]
#[command(name = "mockls")]
struct Args {
    /// Sleep before every response (milliseconds).
    #[arg(long, default_value_t = 0)]
    response_delay: u64,

    /// Return `InternalError` for this method (repeatable).
    #[arg(long)]
    fail_on: Vec<String>,

    /// Never respond to this method (repeatable).
    #[arg(long)]
    hang_on: Vec<String>,

    /// Close stdout after n responses (simulate crash).
    #[arg(long)]
    drop_after: Option<u64>,

    /// Exit immediately when a request targets a uri containing this
    /// substring (simulate a poison file crashing the server). Repeatable.
    #[arg(long)]
    die_on_uri: Vec<String>,
}

struct MockServer {
    args: Args,
    root: Option<PathBuf>,
    response_count: u64,
}

fn main() {
    let args = Args::parse();
    let mut server = MockServer {
        args,
        root: None,
        response_count: 0,
    };

    let stdin = std::io::stdin();
    let mut reader = stdin.lock();

    while let Some(message) = read_frame(&mut reader) {
        if !server.handle(&message) {
            break;
        }
    }
}

/// Reads one Content-Length framed JSON message from the reader.
fn read_frame(reader: &mut impl Read) -> Option<Value> {
    let mut header = Vec::new();
    let mut byte = [0u8; 1];

    // Read until \r\n\r\n
    while !header.ends_with(b"\r\n\r\n") {
        reader.read_exact(&mut byte).ok()?;
        header.push(byte[0]);
    }

    let header_str = String::from_utf8_lossy(&header);
    let content_length: usize = header_str
        .lines()
        .find_map(|line| {
            line.to_ascii_lowercase()
                .strip_prefix("content-length:")
                .map(|v| v.trim().parse().ok())?
        })?;

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).ok()?;
    serde_json::from_slice(&body).ok()
}

fn write_frame(message: &Value) {
    let body = message.to_string();
    print!("Content-Length: {}\r\n\r\n{}", body.len(), body);
    let _ = std::io::stdout().flush();
}

impl MockServer {
    /// Handles one message; returns false when the server should exit.
    fn handle(&mut self, message: &Value) -> bool {
        let method = message.get("method").and_then(Value::as_str).unwrap_or("");
        let id = message.get("id").cloned();
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        if let Some(uri) = request_uri(&params)
            && self.args.die_on_uri.iter().any(|s| uri.contains(s.as_str()))
        {
            std::process::exit(1);
        }

        if self.args.hang_on.iter().any(|m| m == method) {
            return true;
        }

        if self.args.response_delay > 0 {
            std::thread::sleep(Duration::from_millis(self.args.response_delay));
        }

        match method {
            "initialize" => {
                self.root = workspace_root(&params);
                self.respond(
                    id,
                    json!({
                        "capabilities": {
                            "documentSymbolProvider": true,
                            "referencesProvider": true,
                            "implementationProvider": true,
                            "textDocumentSync": 1
                        },
                        "serverInfo": { "name": "mockls" }
                    }),
                )
            }
            "shutdown" => self.respond(id, Value::Null),
            "exit" => false,
            "initialized" | "textDocument/didOpen" | "textDocument/didClose"
            | "$/cancelRequest" => true,
            "textDocument/documentSymbol" => {
                if self.should_fail(method, &id) {
                    return true;
                }
                let symbols = document_uri(&params)
                    .and_then(|uri| read_uri(&uri))
                    .map_or(Value::Null, |text| scan_symbols(&text));
                self.respond(id, symbols)
            }
            "textDocument/references" => {
                if self.should_fail(method, &id) {
                    return true;
                }
                let locations = self.find_references(&params);
                self.respond(id, locations)
            }
            "textDocument/implementation" => {
                if self.should_fail(method, &id) {
                    return true;
                }
                let locations = self.find_implementations(&params);
                self.respond(id, locations)
            }
            _ => {
                if let Some(id) = id {
                    self.respond(
                        Some(id),
                        Value::Null,
                    )
                } else {
                    true
                }
            }
        }
    }

    fn should_fail(&mut self, method: &str, id: &Option<Value>) -> bool {
        if self.args.fail_on.iter().any(|m| m == method) {
            if let Some(id) = id {
                write_frame(&json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": { "code": -32603, "message": format!("mock failure for {method}") }
                }));
            }
            return true;
        }
        false
    }

    fn respond(&mut self, id: Option<Value>, result: Value) -> bool {
        let Some(id) = id else { return true };
        write_frame(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": result
        }));
        self.response_count += 1;
        if let Some(limit) = self.args.drop_after
            && self.response_count >= limit
        {
            return false;
        }
        true
    }

    /// All same-extension files under the workspace root, sorted.
    fn sibling_files(&self, extension: &str) -> Vec<PathBuf> {
        let Some(root) = &self.root else { return vec![] };
        let mut files = Vec::new();
        collect_files(root, extension, &mut files);
        files.sort();
        files
    }

    fn find_references(&self, params: &Value) -> Value {
        let Some((path, line)) = position_target(params) else {
            return Value::Null;
        };
        let Ok(text) = std::fs::read_to_string(&path) else {
            return Value::Null;
        };
        let Some(name) = symbol_defined_at(&text, line) else {
            return Value::Null;
        };

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("py")
            .to_string();
        let mut locations = Vec::new();
        for file in self.sibling_files(&extension) {
            let Ok(content) = std::fs::read_to_string(&file) else {
                continue;
            };
            for (idx, text_line) in content.lines().enumerate() {
                if defines_symbol(text_line, &name) {
                    continue;
                }
                if let Some(column) = find_word(text_line, &name) {
                    locations.push(location_json(&file, idx, column, name.len()));
                }
            }
        }
        Value::Array(locations)
    }

    fn find_implementations(&self, params: &Value) -> Value {
        let Some((path, line)) = position_target(params) else {
            return Value::Null;
        };
        let Ok(text) = std::fs::read_to_string(&path) else {
            return Value::Null;
        };
        let Some(name) = symbol_defined_at(&text, line) else {
            return Value::Null;
        };

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("py")
            .to_string();
        let mut locations = Vec::new();
        for file in self.sibling_files(&extension) {
            let Ok(content) = std::fs::read_to_string(&file) else {
                continue;
            };
            for (idx, text_line) in content.lines().enumerate() {
                if subclasses(text_line, &name) {
                    let indent = text_line.len() - text_line.trim_start().len();
                    locations.push(location_json(&file, idx, indent, name.len()));
                }
            }
        }
        Value::Array(locations)
    }
}

fn collect_files(dir: &Path, extension: &str, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, extension, out);
        } else if path.extension().and_then(|e| e.to_str()) == Some(extension) {
            out.push(path);
        }
    }
}

fn workspace_root(params: &Value) -> Option<PathBuf> {
    let folders = params.get("workspaceFolders")?.as_array()?;
    let uri = folders.first()?.get("uri")?.as_str()?;
    Some(PathBuf::from(uri.strip_prefix("file://")?))
}

fn request_uri(params: &Value) -> Option<String> {
    document_uri(params).or_else(|| {
        params
            .get("textDocument")
            .and_then(|d| d.get("uri"))
            .and_then(Value::as_str)
            .map(str::to_string)
    })
}

fn document_uri(params: &Value) -> Option<String> {
    params
        .get("textDocument")
        .and_then(|d| d.get("uri"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn position_target(params: &Value) -> Option<(PathBuf, usize)> {
    let uri = document_uri(params)?;
    let path = PathBuf::from(uri.strip_prefix("file://")?);
    let line = params.get("position")?.get("line")?.as_u64()? as usize;
    Some((path, line))
}

fn read_uri(uri: &str) -> Option<String> {
    std::fs::read_to_string(uri.strip_prefix("file://")?).ok()
}

/// Extracts the name a `class`/`def`/assignment line defines, if any.
fn defined_name(line: &str) -> Option<(String, &'static str)> {
    let trimmed = line.trim_start();
    if let Some(rest) = trimmed.strip_prefix("class ") {
        let name: String = rest
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        return (!name.is_empty()).then_some((name, "class"));
    }
    if let Some(rest) = trimmed.strip_prefix("def ") {
        let name: String = rest
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        return (!name.is_empty()).then_some((name, "def"));
    }
    None
}

/// The symbol defined on `line` (class, def, or import target).
fn symbol_defined_at(text: &str, line: usize) -> Option<String> {
    let target = text.lines().nth(line)?;
    defined_name(target).map(|(name, _)| name)
}

fn defines_symbol(line: &str, name: &str) -> bool {
    defined_name(line).is_some_and(|(defined, _)| defined == name)
}

/// Byte column of a word-boundary occurrence of `name` in `line`.
fn find_word(line: &str, name: &str) -> Option<usize> {
    let bytes = line.as_bytes();
    let mut start = 0;
    while let Some(offset) = line[start..].find(name) {
        let at = start + offset;
        let before_ok = at == 0 || !is_word_byte(bytes[at - 1]);
        let after = at + name.len();
        let after_ok = after >= bytes.len() || !is_word_byte(bytes[after]);
        if before_ok && after_ok {
            return Some(at);
        }
        start = at + name.len();
    }
    None
}

const fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// True if `line` declares a class inheriting from `name`.
fn subclasses(line: &str, name: &str) -> bool {
    let trimmed = line.trim_start();
    let Some(rest) = trimmed.strip_prefix("class ") else {
        return false;
    };
    let Some(open) = rest.find('(') else { return false };
    let Some(close) = rest.find(')') else { return false };
    if close < open {
        return false;
    }
    rest[open + 1..close]
        .split(',')
        .any(|base| base.trim() == name)
}

fn location_json(path: &Path, line: usize, column: usize, len: usize) -> Value {
    json!({
        "uri": format!("file://{}", path.display()),
        "range": {
            "start": { "line": line, "character": column },
            "end": { "line": line, "character": column + len }
        }
    })
}

/// Scans Python-ish source into a nested `DocumentSymbol` array.
///
/// Recognized forms: top-level `class` (children: indented `def`s),
/// top-level `def`, top-level `import a.b` / `from a.b import x` (surfaced
/// as Module symbols so clients can derive import edges), and top-level
/// `NAME = ...` assignments.
fn scan_symbols(text: &str) -> Value {
    const CLASS: u64 = 5;
    const METHOD: u64 = 6;
    const FUNCTION: u64 = 12;
    const VARIABLE: u64 = 13;
    const MODULE: u64 = 2;

    let lines: Vec<&str> = text.lines().collect();
    let mut symbols: Vec<Value> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim_start();
        let indent = line.len() - trimmed.len();

        if indent > 0 || trimmed.is_empty() {
            i += 1;
            continue;
        }

        if let Some((name, keyword)) = defined_name(line) {
            let end = block_end(&lines, i);
            if keyword == "class" {
                let mut children: Vec<Value> = Vec::new();
                let mut j = i + 1;
                while j <= end {
                    let child = lines[j];
                    let child_trimmed = child.trim_start();
                    let child_indent = child.len() - child_trimmed.len();
                    if child_indent > 0
                        && let Some((child_name, "def")) = defined_name(child)
                    {
                        let child_end = block_end(&lines, j);
                        children.push(symbol_json(
                            &child_name,
                            METHOD,
                            j,
                            child_indent,
                            child_end,
                            Vec::new(),
                        ));
                        j = child_end + 1;
                        continue;
                    }
                    j += 1;
                }
                symbols.push(symbol_json(&name, CLASS, i, indent, end, children));
            } else {
                symbols.push(symbol_json(&name, FUNCTION, i, indent, end, Vec::new()));
            }
            i = end + 1;
            continue;
        }

        if let Some(module) = import_target(trimmed) {
            symbols.push(symbol_json(&module, MODULE, i, indent, i, Vec::new()));
            i += 1;
            continue;
        }

        if let Some(name) = assignment_target(trimmed) {
            symbols.push(symbol_json(&name, VARIABLE, i, indent, i, Vec::new()));
        }
        i += 1;
    }

    Value::Array(symbols)
}

/// Last line of the block opened at `start` (lines indented deeper).
fn block_end(lines: &[&str], start: usize) -> usize {
    let base_indent = lines[start].len() - lines[start].trim_start().len();
    let mut end = start;
    for (offset, line) in lines.iter().enumerate().skip(start + 1) {
        let trimmed = line.trim_start();
        if trimmed.is_empty() {
            continue;
        }
        let indent = line.len() - trimmed.len();
        if indent <= base_indent {
            break;
        }
        end = offset;
    }
    end
}

fn import_target(trimmed: &str) -> Option<String> {
    if let Some(rest) = trimmed.strip_prefix("from ") {
        let module: String = rest
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '.')
            .collect();
        return (!module.is_empty()).then_some(module);
    }
    if let Some(rest) = trimmed.strip_prefix("import ") {
        let module: String = rest
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '.')
            .collect();
        return (!module.is_empty()).then_some(module);
    }
    None
}

fn assignment_target(trimmed: &str) -> Option<String> {
    let (lhs, _) = trimmed.split_once('=')?;
    let lhs = lhs.trim();
    if lhs.is_empty()
        || !lhs.chars().all(|c| c.is_alphanumeric() || c == '_')
        || lhs.chars().next().is_some_and(|c| c.is_ascii_digit())
    {
        return None;
    }
    Some(lhs.to_string())
}

fn symbol_json(
    name: &str,
    kind: u64,
    start_line: usize,
    start_char: usize,
    end_line: usize,
    children: Vec<Value>,
) -> Value {
    let range = json!({
        "start": { "line": start_line, "character": start_char },
        "end": { "line": end_line + 1, "character": 0 }
    });
    json!({
        "name": name,
        "kind": kind,
        "range": range,
        "selectionRange": range,
        "children": children
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "test fixtures")]

    use super::*;

    const SAMPLE: &str = "from pkg.a import A\n\nclass B(A):\n    def run(self):\n        pass\n\ndef helper():\n    return 1\n\nLIMIT = 10\n";

    #[test]
    fn scans_classes_methods_functions() {
        let symbols = scan_symbols(SAMPLE);
        let names: Vec<&str> = symbols
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["pkg.a", "B", "helper", "LIMIT"]);

        let class_b = &symbols.as_array().unwrap()[1];
        assert_eq!(class_b["kind"], 5);
        let children = class_b["children"].as_array().unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0]["name"], "run");
        assert_eq!(children[0]["kind"], 6);
    }

    #[test]
    fn import_lines_become_module_symbols() {
        let symbols = scan_symbols("import os.path\n");
        let first = &symbols.as_array().unwrap()[0];
        assert_eq!(first["name"], "os.path");
        assert_eq!(first["kind"], 2);
    }

    #[test]
    fn finds_symbol_defined_at_line() {
        assert_eq!(symbol_defined_at(SAMPLE, 2).unwrap(), "B");
        assert_eq!(symbol_defined_at(SAMPLE, 3).unwrap(), "run");
        assert!(symbol_defined_at(SAMPLE, 0).is_none());
    }

    #[test]
    fn word_boundary_matching() {
        assert_eq!(find_word("x = A()", "A"), Some(4));
        assert_eq!(find_word("x = AB()", "A"), None);
        assert_eq!(find_word("value = max(a)", "a"), Some(12));
    }

    #[test]
    fn detects_subclassing() {
        assert!(subclasses("class B(A):", "A"));
        assert!(subclasses("class C(Base, A):", "A"));
        assert!(!subclasses("class B(AX):", "A"));
        assert!(!subclasses("def f(A):", "A"));
    }

    #[test]
    fn block_end_spans_indented_body() {
        let lines: Vec<&str> = SAMPLE.lines().collect();
        // class B block runs through "        pass".
        assert_eq!(block_end(&lines, 2), 4);
        // LIMIT has no block.
        assert_eq!(block_end(&lines, 9), 9);
    }
}
