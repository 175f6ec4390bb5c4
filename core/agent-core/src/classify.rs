//! Decides whether a changed file is source code worth recording.
//!
//! Pure: callers read the file and pass its bytes. Rejections are a normal
//! outcome and carry a [`SkipReason`] so logs can say why a write was dropped.

use std::path::Path;

/// Only this many leading bytes are inspected for NUL bytes and shebangs.
pub const SNIFF_LEN: usize = 8000;

/// Generic classification that never counts as code.
const PLAIN_TEXT: &str = "text";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Record { language: String },
    Skip(SkipReason),
}

impl Classification {
    pub fn should_record(&self) -> bool {
        matches!(self, Classification::Record { .. })
    }

    pub fn language(&self) -> Option<&str> {
        match self {
            Classification::Record { language } => Some(language),
            Classification::Skip(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    IgnoredSuffix,
    DotFile,
    Vendored,
    Documentation,
    Configuration,
    Image,
    Binary,
    UnknownLanguage,
    PlainText,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::IgnoredSuffix => "ignored_suffix",
            SkipReason::DotFile => "dot_file",
            SkipReason::Vendored => "vendored",
            SkipReason::Documentation => "documentation",
            SkipReason::Configuration => "configuration",
            SkipReason::Image => "image",
            SkipReason::Binary => "binary",
            SkipReason::UnknownLanguage => "unknown_language",
            SkipReason::PlainText => "plain_text",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Static tables
// ─────────────────────────────────────────────────────────────────────────────

const IGNORED_SUFFIXES: &[&str] = &[
    ".log",
    "package-lock.json",
    ".gitignore",
    "~",
    ".lock",
    ".swp",
    ".swo",
    ".tmp",
    ".orig",
    ".bak",
];

const VENDORED_COMPONENTS: &[&str] = &[
    "node_modules",
    "vendor",
    "third_party",
    "third-party",
    "bower_components",
    "Godeps",
    ".venv",
    "site-packages",
];

const DOCUMENTATION_COMPONENTS: &[&str] = &[
    "docs",
    "Docs",
    "doc",
    "Doc",
    "Documentation",
    "documentation",
    "javadoc",
    "Javadoc",
    "man",
    "Man",
];

/// Matched case-sensitively against the name up to its first dot.
const DOCUMENTATION_STEMS: &[&str] = &[
    "README",
    "Readme",
    "readme",
    "LICENSE",
    "LICENCE",
    "License",
    "Licence",
    "license",
    "licence",
    "COPYING",
    "CONTRIBUTING",
    "CHANGE",
    "CHANGES",
    "CHANGELOG",
    "INSTALL",
];

const CONFIGURATION_EXTENSIONS: &[&str] = &[
    "json", "toml", "xml", "yaml", "yml", "ini", "cfg", "conf", "properties", "plist", "env",
];

const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "icns", "tif", "tiff", "webp", "svg", "psd",
];

const EXTENSION_LANGUAGES: &[(&str, &str)] = &[
    ("rs", "Rust"),
    ("go", "Go"),
    ("c", "C"),
    ("h", "C"),
    ("cc", "C++"),
    ("cpp", "C++"),
    ("cxx", "C++"),
    ("hpp", "C++"),
    ("hh", "C++"),
    ("cs", "C#"),
    ("java", "Java"),
    ("kt", "Kotlin"),
    ("kts", "Kotlin"),
    ("scala", "Scala"),
    ("groovy", "Groovy"),
    ("gradle", "Gradle"),
    ("clj", "Clojure"),
    ("cljs", "Clojure"),
    ("py", "Python"),
    ("pyw", "Python"),
    ("rb", "Ruby"),
    ("php", "PHP"),
    ("pl", "Perl"),
    ("pm", "Perl"),
    ("lua", "Lua"),
    ("js", "JavaScript"),
    ("mjs", "JavaScript"),
    ("cjs", "JavaScript"),
    ("jsx", "JavaScript"),
    ("ts", "TypeScript"),
    ("tsx", "TSX"),
    ("vue", "Vue"),
    ("svelte", "Svelte"),
    ("html", "HTML"),
    ("htm", "HTML"),
    ("css", "CSS"),
    ("scss", "SCSS"),
    ("sass", "Sass"),
    ("less", "Less"),
    ("swift", "Swift"),
    ("m", "Objective-C"),
    ("mm", "Objective-C++"),
    ("dart", "Dart"),
    ("ex", "Elixir"),
    ("exs", "Elixir"),
    ("erl", "Erlang"),
    ("hrl", "Erlang"),
    ("hs", "Haskell"),
    ("ml", "OCaml"),
    ("mli", "OCaml"),
    ("fs", "F#"),
    ("fsx", "F#"),
    ("elm", "Elm"),
    ("zig", "Zig"),
    ("nim", "Nim"),
    ("jl", "Julia"),
    ("r", "R"),
    ("sql", "SQL"),
    ("sh", "Shell"),
    ("bash", "Shell"),
    ("zsh", "Shell"),
    ("fish", "fish"),
    ("ps1", "PowerShell"),
    ("bat", "Batchfile"),
    ("cmd", "Batchfile"),
    ("tf", "HCL"),
    ("hcl", "HCL"),
    ("proto", "Protocol Buffer"),
    ("graphql", "GraphQL"),
    ("gql", "GraphQL"),
    ("sol", "Solidity"),
    ("v", "V"),
    ("vhdl", "VHDL"),
    ("asm", "Assembly"),
    ("s", "Assembly"),
    ("cmake", "CMake"),
    ("vim", "Vim script"),
    ("el", "Emacs Lisp"),
    ("lisp", "Common Lisp"),
    ("rkt", "Racket"),
    ("cr", "Crystal"),
    ("d", "D"),
    ("pas", "Pascal"),
    ("f90", "Fortran"),
    ("cob", "COBOL"),
    ("txt", PLAIN_TEXT),
    ("text", PLAIN_TEXT),
];

const FILENAME_LANGUAGES: &[(&str, &str)] = &[
    ("Makefile", "Makefile"),
    ("GNUmakefile", "Makefile"),
    ("Dockerfile", "Dockerfile"),
    ("Containerfile", "Dockerfile"),
    ("CMakeLists.txt", "CMake"),
    ("Rakefile", "Ruby"),
    ("Gemfile", "Ruby"),
    ("Jenkinsfile", "Groovy"),
    ("Vagrantfile", "Ruby"),
    ("BUILD", "Starlark"),
    ("WORKSPACE", "Starlark"),
];

const SHEBANG_LANGUAGES: &[(&str, &str)] = &[
    ("python", "Python"),
    ("node", "JavaScript"),
    ("deno", "TypeScript"),
    ("ruby", "Ruby"),
    ("perl", "Perl"),
    ("php", "PHP"),
    ("bash", "Shell"),
    ("zsh", "Shell"),
    ("sh", "Shell"),
    ("lua", "Lua"),
];

// ─────────────────────────────────────────────────────────────────────────────
// Classification
// ─────────────────────────────────────────────────────────────────────────────

/// Classifies the file at `path`, given relative to its watch root.
///
/// Directory rules (vendored, documentation) look at every parent component
/// of `path`, so callers strip the watch root first.
pub fn classify(path: &Path, bytes: &[u8]) -> Classification {
    let file_name = match path.file_name().and_then(|name| name.to_str()) {
        Some(name) if !name.is_empty() => name,
        _ => return Classification::Skip(SkipReason::UnknownLanguage),
    };

    if has_ignored_suffix(file_name) {
        return Classification::Skip(SkipReason::IgnoredSuffix);
    }
    if file_name.starts_with('.') {
        return Classification::Skip(SkipReason::DotFile);
    }
    if has_component(path, VENDORED_COMPONENTS) {
        return Classification::Skip(SkipReason::Vendored);
    }
    if is_documentation(path, file_name) {
        return Classification::Skip(SkipReason::Documentation);
    }

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    if let Some(ext) = extension.as_deref() {
        if CONFIGURATION_EXTENSIONS.contains(&ext) {
            return Classification::Skip(SkipReason::Configuration);
        }
        if IMAGE_EXTENSIONS.contains(&ext) {
            return Classification::Skip(SkipReason::Image);
        }
    }

    let head = &bytes[..bytes.len().min(SNIFF_LEN)];
    if head.contains(&0) {
        return Classification::Skip(SkipReason::Binary);
    }

    let language = language_for_filename(file_name)
        .or_else(|| extension.as_deref().and_then(language_for_extension))
        .or_else(|| language_for_shebang(head));

    match language {
        None => Classification::Skip(SkipReason::UnknownLanguage),
        Some(PLAIN_TEXT) => Classification::Skip(SkipReason::PlainText),
        Some(language) => Classification::Record {
            language: language.to_lowercase(),
        },
    }
}

fn has_ignored_suffix(file_name: &str) -> bool {
    IGNORED_SUFFIXES
        .iter()
        .any(|suffix| file_name.ends_with(suffix))
}

fn has_component(path: &Path, names: &[&str]) -> bool {
    path.parent()
        .map(|parent| {
            parent.components().any(|component| {
                component
                    .as_os_str()
                    .to_str()
                    .is_some_and(|name| names.contains(&name))
            })
        })
        .unwrap_or(false)
}

fn is_documentation(path: &Path, file_name: &str) -> bool {
    if has_component(path, DOCUMENTATION_COMPONENTS) {
        return true;
    }
    let stem = file_name.split('.').next().unwrap_or(file_name);
    DOCUMENTATION_STEMS.contains(&stem)
}

fn language_for_filename(file_name: &str) -> Option<&'static str> {
    FILENAME_LANGUAGES
        .iter()
        .find(|(name, _)| *name == file_name)
        .map(|(_, language)| *language)
}

fn language_for_extension(ext: &str) -> Option<&'static str> {
    EXTENSION_LANGUAGES
        .iter()
        .find(|(candidate, _)| *candidate == ext)
        .map(|(_, language)| *language)
}

fn language_for_shebang(head: &[u8]) -> Option<&'static str> {
    let first_line = head.split(|byte| *byte == b'\n').next()?;
    let line = std::str::from_utf8(first_line).ok()?.trim();
    let interpreter_line = line.strip_prefix("#!")?;

    // `#!/usr/bin/env python3` names the interpreter in the last word;
    // `#!/bin/bash -e` names it in the first.
    let mut words = interpreter_line.split_whitespace();
    let first = words.next()?;
    let program = if first.ends_with("/env") {
        words.find(|word| !word.starts_with('-'))?
    } else {
        first
    };
    let program = program.rsplit('/').next()?;
    let program = program.trim_end_matches(|c: char| c.is_ascii_digit() || c == '.');

    SHEBANG_LANGUAGES
        .iter()
        .find(|(name, _)| *name == program)
        .map(|(_, language)| *language)
}
