//! Python project scanner.
//!
//! A line-oriented reader, not a parser: it recognizes top-level imports,
//! classes with their bases, module functions, and the methods directly in a
//! class body. That is enough to build the module dependency graph and a
//! skeleton view; anything it cannot recognize is skipped.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use walkdir::{DirEntry, WalkDir};

/// Directory names never descended into.
const EXCLUDED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".idea",
    ".venv",
    ".vscode",
    "__pycache__",
    "_trash",
    "build",
    "dist",
    "env",
    "log",
    "logs",
    "node_modules",
    "old",
    "save",
    "saves",
    "target",
    "temp",
    "tmp",
    "trash",
    "venv",
];

/// File-name fragments marking editor or backup copies.
const EXCLUDED_FILE_MARKERS: &[&str] = &[".bak", ".tmp", ".old", "copy"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFunction {
    pub name: String,
    /// Header without the trailing colon, e.g. `def load(path: str) -> dict`.
    pub signature: String,
    pub docstring: Option<String>,
    pub line: usize,
    /// Full source of the definition block.
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedClass {
    pub name: String,
    pub bases: Vec<String>,
    pub docstring: Option<String>,
    pub line: usize,
    pub methods: Vec<ScannedFunction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedModule {
    /// Dotted name relative to the scan root (`pkg/util.py` → `pkg.util`).
    pub module: String,
    /// Path relative to the scan root.
    pub path: String,
    pub docstring: Option<String>,
    pub imports: Vec<String>,
    pub classes: Vec<ScannedClass>,
    pub functions: Vec<ScannedFunction>,
}

/// Every `.py` file under `root`, skipping excluded directories and backup copies.
pub fn discover(root: &Path) -> Result<Vec<PathBuf>> {
    anyhow::ensure!(root.is_dir(), "{} is not a directory", root.display());
    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_excluded(e))
    {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        if entry.file_type().is_file()
            && entry.path().extension().is_some_and(|ext| ext == "py")
        {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn is_excluded(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy().to_lowercase();
    if entry.file_type().is_dir() {
        EXCLUDED_DIRS.contains(&name.as_str())
            || name.starts_with("backup")
            || name.starts_with("archive")
    } else {
        EXCLUDED_FILE_MARKERS.iter().any(|m| name.contains(m))
    }
}

/// Scan every module under `root`.
#[tracing::instrument(skip_all, fields(root = %root.display()))]
pub fn scan_project(root: &Path) -> Result<Vec<ScannedModule>> {
    let files = discover(root)?;
    let mut modules = Vec::with_capacity(files.len());
    for path in files {
        let bytes =
            std::fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
        let source = String::from_utf8_lossy(&bytes);
        let relative = path.strip_prefix(root).unwrap_or(&path);
        modules.push(parse_module(
            &module_name(relative),
            &relative.to_string_lossy().replace('\\', "/"),
            &source,
        ));
    }
    tracing::info!(modules = modules.len(), "project scanned");
    Ok(modules)
}

/// `pkg/sub/mod.py` → `pkg.sub.mod`; `pkg/__init__.py` → `pkg`.
pub fn module_name(relative: &Path) -> String {
    let mut parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if let Some(last) = parts.last_mut() {
        if let Some(stem) = last.strip_suffix(".py") {
            *last = stem.to_string();
        }
    }
    if parts.len() > 1 && parts.last().is_some_and(|p| p == "__init__") {
        parts.pop();
    }
    parts.join(".")
}

struct Line<'a> {
    number: usize,
    indent: usize,
    text: &'a str,
    /// Inside a multi-line string literal: never a statement.
    in_string: bool,
}

fn classify_lines(source: &str) -> Vec<Line<'_>> {
    let mut open: Option<&'static str> = None;
    let mut out = Vec::new();
    for (i, raw) in source.lines().enumerate() {
        let in_string = open.is_some();
        let trimmed = raw.trim_start();
        let indent = raw
            .chars()
            .take_while(|c| c.is_whitespace())
            .map(|c| if c == '\t' { 4 } else { 1 })
            .sum();
        out.push(Line {
            number: i + 1,
            indent,
            text: trimmed.trim_end(),
            in_string,
        });

        // Track triple-quoted strings spanning lines.
        let mut rest = raw;
        loop {
            match open {
                Some(delim) => match rest.find(delim) {
                    Some(pos) => {
                        rest = &rest[pos + 3..];
                        open = None;
                    }
                    None => break,
                },
                None => {
                    let next = ["\"\"\"", "'''"]
                        .into_iter()
                        .filter_map(|d| rest.find(d).map(|p| (p, d)))
                        .min_by_key(|(p, _)| *p);
                    match next {
                        Some((pos, delim)) if !rest[..pos].contains('#') => {
                            rest = &rest[pos + 3..];
                            open = Some(delim);
                        }
                        _ => break,
                    }
                }
            }
        }
    }
    out
}

fn is_code(line: &Line<'_>) -> bool {
    !line.in_string && !line.text.is_empty() && !line.text.starts_with('#')
}

/// Parse one module's source.
pub fn parse_module(module: &str, path: &str, source: &str) -> ScannedModule {
    let lines = classify_lines(source);
    let mut scanned = ScannedModule {
        module: module.to_string(),
        path: path.to_string(),
        docstring: None,
        imports: Vec::new(),
        classes: Vec::new(),
        functions: Vec::new(),
    };

    if let Some(first) = lines.iter().position(is_code) {
        scanned.docstring = docstring_at(&lines, first);
    }

    let mut i = 0;
    while i < lines.len() {
        let line = &lines[i];
        if !is_code(line) || line.indent != 0 {
            i += 1;
            continue;
        }
        let text = line.text;

        if let Some(rest) = text.strip_prefix("import ") {
            for name in rest.split(',') {
                let name = name.split(" as ").next().unwrap_or("").trim();
                push_import(&mut scanned.imports, name);
            }
            i += 1;
        } else if let Some(rest) = text.strip_prefix("from ") {
            if let Some((module, _)) = rest.split_once(" import") {
                push_import(&mut scanned.imports, module.trim().trim_start_matches('.'));
            }
            i += 1;
        } else if text.starts_with("class ") {
            let (class, end) = parse_class(&lines, i, source);
            scanned.classes.push(class);
            i = end;
        } else if is_def(text) {
            let (function, end) = parse_function(&lines, i, source);
            scanned.functions.push(function);
            i = end;
        } else {
            i += 1;
        }
    }

    scanned.imports.sort();
    scanned.imports.dedup();
    scanned
}

fn push_import(imports: &mut Vec<String>, name: &str) {
    let name = name.trim_matches(|c: char| c == '(' || c == ')' || c.is_whitespace());
    if !name.is_empty() {
        imports.push(name.to_string());
    }
}

fn is_def(text: &str) -> bool {
    text.starts_with("def ") || text.starts_with("async def ")
}

/// Index just past the block opened at `start` (first later code line at or
/// below its indentation).
fn block_end(lines: &[Line<'_>], start: usize) -> usize {
    let indent = lines[start].indent;
    let header_end = header_end(lines, start);
    lines
        .iter()
        .enumerate()
        .skip(header_end + 1)
        .find(|(_, l)| is_code(l) && l.indent <= indent)
        .map(|(i, _)| i)
        .unwrap_or(lines.len())
}

/// Last line of a (possibly multi-line) `def`/`class` header.
fn header_end(lines: &[Line<'_>], start: usize) -> usize {
    let mut depth: i32 = 0;
    for (i, line) in lines.iter().enumerate().skip(start) {
        for c in line.text.chars() {
            match c {
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => depth -= 1,
                _ => {}
            }
        }
        if depth <= 0 && line.text.ends_with(':') {
            return i;
        }
    }
    start
}

fn header_text(lines: &[Line<'_>], start: usize) -> String {
    let end = header_end(lines, start);
    let joined = lines[start..=end]
        .iter()
        .map(|l| l.text)
        .collect::<Vec<_>>()
        .join(" ");
    let joined = joined.split_whitespace().collect::<Vec<_>>().join(" ");
    joined
        .strip_suffix(':')
        .unwrap_or(&joined)
        .replace("( ", "(")
        .replace(" )", ")")
}

/// First line of the docstring starting at `lines[at]`, if there is one.
fn docstring_at(lines: &[Line<'_>], at: usize) -> Option<String> {
    let text = lines.get(at)?.text;
    let body = text.trim_start_matches(['r', 'u', 'R', 'U']);
    let delim = ["\"\"\"", "'''"].into_iter().find(|d| body.starts_with(d))?;
    let inner = &body[3..];
    let first = match inner.find(delim) {
        Some(end) => inner[..end].trim().to_string(),
        None if !inner.trim().is_empty() => inner.trim().to_string(),
        None => lines
            .get(at + 1)
            .map(|l| l.text.trim_end_matches(delim).trim().to_string())
            .unwrap_or_default(),
    };
    (!first.is_empty()).then_some(first)
}

/// First code-or-string line after the header at `start`.
fn body_start(lines: &[Line<'_>], start: usize) -> Option<usize> {
    let after = header_end(lines, start) + 1;
    lines
        .iter()
        .enumerate()
        .skip(after)
        .find(|(_, l)| !l.text.is_empty() && !l.text.starts_with('#'))
        .map(|(i, _)| i)
}

fn source_of(source: &str, lines: &[Line<'_>], start: usize, end: usize) -> String {
    source
        .lines()
        .skip(lines[start].number - 1)
        .take(end - start)
        .collect::<Vec<_>>()
        .join("\n")
        .trim_end()
        .to_string()
}

fn parse_function(lines: &[Line<'_>], start: usize, source: &str) -> (ScannedFunction, usize) {
    let end = block_end(lines, start);
    let signature = header_text(lines, start);
    let name = signature
        .trim_start_matches("async ")
        .trim_start_matches("def ")
        .split('(')
        .next()
        .unwrap_or("")
        .trim()
        .to_string();
    let docstring = body_start(lines, start)
        .filter(|&b| b < end)
        .and_then(|b| docstring_at(lines, b));
    (
        ScannedFunction {
            name,
            signature,
            docstring,
            line: lines[start].number,
            source: source_of(source, lines, start, end),
        },
        end,
    )
}

fn parse_class(lines: &[Line<'_>], start: usize, source: &str) -> (ScannedClass, usize) {
    let end = block_end(lines, start);
    let header = header_text(lines, start);
    let rest = header.trim_start_matches("class ");
    let (name, bases) = match rest.split_once('(') {
        Some((name, args)) => {
            let args = args.rsplit_once(')').map_or(args, |(a, _)| a);
            let bases = args
                .split(',')
                .map(str::trim)
                .filter(|b| !b.is_empty() && !b.contains('='))
                .map(str::to_string)
                .collect();
            (name.trim().to_string(), bases)
        }
        None => (rest.trim().to_string(), Vec::new()),
    };

    let first_body = body_start(lines, start).filter(|&b| b < end);
    let docstring = first_body.and_then(|b| docstring_at(lines, b));
    let body_indent = first_body.map(|b| lines[b].indent);

    let mut methods = Vec::new();
    let mut i = header_end(lines, start) + 1;
    while i < end {
        let line = &lines[i];
        if is_code(line) && Some(line.indent) == body_indent && is_def(line.text) {
            let (method, method_end) = parse_function(lines, i, source);
            methods.push(method);
            i = method_end.min(end).max(i + 1);
        } else {
            i += 1;
        }
    }

    (
        ScannedClass {
            name,
            bases,
            docstring,
            line: lines[start].number,
            methods,
        },
        end,
    )
}
