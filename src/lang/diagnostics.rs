//! Compile diagnostics: accumulation during a compile pass and structured
//! extraction once the pass settles.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static COMPILED_DIR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*compiling dir:\s*'(.+)'\s*$").unwrap());
static ERROR_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(.+?)\n\s+in file '(.+?)'\n\s+line (\d+) char (\d+)").unwrap()
});
static EXTENSION_ERROR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"ERROR: Class extension for nonexistent class '([^']+)'[\s\S]*?in file '([^']+)'")
        .unwrap()
});
static DUPLICATE_CLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^ERROR: duplicate Class found: '([^']+)'\n(.+)\n(.+)").unwrap()
});

/// Pseudo-root the interpreter reports common-library paths under.
const COMMON_LIBRARY_ROOT: &str = "/Common/";

/// A single compiler error with its source location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileErrorRecord {
    /// Error message text
    pub message: String,
    /// Source file the error was reported in
    pub file: String,
    /// Line number
    pub line: u32,
    /// Character position within the line
    pub char_pos: u32,
}

/// A class extension targeting a class that does not exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionError {
    /// Class the extension targets
    pub for_class: String,
    /// File declaring the extension
    pub file: String,
}

/// The same class defined in more than one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateClass {
    /// Class defined twice
    pub for_class: String,
    /// The conflicting definition files
    pub files: Vec<String>,
}

/// Accumulated record of one compile pass.
///
/// Created fresh on entry to booting/compiling, populated incrementally
/// while output streams in, and finalized exactly once when the pass
/// settles into compiled, compile-error, or ready.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompileDiagnostics {
    /// Interpreter version from the welcome banner, when seen
    pub version: Option<String>,
    /// Raw captured compile output
    pub raw_output: String,
    /// Structured compiler errors
    pub errors: Vec<CompileErrorRecord>,
    /// Extensions of nonexistent classes
    pub extension_errors: Vec<ExtensionError>,
    /// Duplicate class definitions
    pub duplicate_classes: Vec<DuplicateClass>,
    /// Directories the compiler walked, in reported order
    pub compiled_dirs: Vec<String>,
}

impl CompileDiagnostics {
    /// Append a chunk of raw compile output.
    pub fn append_raw(&mut self, text: &str) {
        self.raw_output.push_str(text);
    }

    /// Extract structured records from the accumulated raw output.
    ///
    /// Compiled-directory lines are collected and stripped first; the
    /// remainder is scanned for error blocks, extension errors, and
    /// duplicate-class reports. Paths reported under the common-library
    /// pseudo-root are rewritten against the first compiled directory.
    pub fn finalize(&mut self) {
        let mut working = String::with_capacity(self.raw_output.len());
        let mut last = 0;
        for caps in COMPILED_DIR.captures_iter(&self.raw_output) {
            let whole = caps.get(0).expect("regex match has group 0");
            self.compiled_dirs.push(caps[1].to_string());
            working.push_str(&self.raw_output[last..whole.start()]);
            last = whole.end();
        }
        working.push_str(&self.raw_output[last..]);

        for caps in ERROR_BLOCK.captures_iter(&working) {
            let message = caps[1]
                .trim()
                .trim_start_matches("ERROR: ")
                .to_string();
            let file = self.rewrite_common_path(&caps[2]);
            let line = caps[3].parse().unwrap_or(0);
            let char_pos = caps[4].parse().unwrap_or(0);
            self.errors.push(CompileErrorRecord {
                message,
                file,
                line,
                char_pos,
            });
        }

        for caps in EXTENSION_ERROR.captures_iter(&working) {
            self.extension_errors.push(ExtensionError {
                for_class: caps[1].to_string(),
                file: caps[2].to_string(),
            });
        }

        for caps in DUPLICATE_CLASS.captures_iter(&working) {
            self.duplicate_classes.push(DuplicateClass {
                for_class: caps[1].to_string(),
                files: vec![caps[2].trim().to_string(), caps[3].trim().to_string()],
            });
        }
    }

    fn rewrite_common_path(&self, file: &str) -> String {
        match self.compiled_dirs.first() {
            Some(root) if file.starts_with(COMMON_LIBRARY_ROOT) => format!("{root}{file}"),
            _ => file.to_string(),
        }
    }
}
