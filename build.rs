use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Only the crate's own sources are policed; vendored or sibling trees are not ours to lint.
const SOURCE_ROOTS: [&str; 3] = ["mask", "tests", "benches"];

const CHANGE_LOG_WORDS: [&str; 15] = [
    "FIXED", "CORRECTED", "FIX", "FIXES", "NEW", "CHANGED", "CHANGES", "CHANGE", "MODIFIED",
    "MODIFIES", "MODIFY", "UPDATED", "UPDATES", "UPDATE", "TEMP",
];

/// One policy: a line regex, a filter deciding whether a hit is a real violation, and the
/// explanation printed when it is.
struct Rule {
    name: &'static str,
    pattern: String,
    is_violation: fn(&str) -> bool,
    advice: &'static str,
}

// Collects the violating lines of a single file.
struct ViolationCollector {
    file_path: PathBuf,
    is_violation: fn(&str) -> bool,
    violations: Vec<String>,
}

impl ViolationCollector {
    fn new(file_path: &Path, is_violation: fn(&str) -> bool) -> Self {
        Self {
            file_path: file_path.to_path_buf(),
            is_violation,
            violations: Vec::new(),
        }
    }

    fn error_message(&self, rule: &Rule) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }
        let mut msg = format!(
            "\n❌ ERROR: Found {} {} in {}:\n",
            self.violations.len(),
            rule.name,
            self.file_path.display()
        );
        for violation in &self.violations {
            msg.push_str(&format!("   {violation}\n"));
        }
        msg.push_str(&format!("\n⚠️ {}\n", rule.advice));
        Some(msg)
    }
}

impl Sink for ViolationCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if (self.is_violation)(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn is_comment(line: &str) -> bool {
    line.trim_start().starts_with("//")
}

fn is_doc_comment(line: &str) -> bool {
    line.trim_start().starts_with("///")
}

// A hit inside a comment or between quotes is text, not a binding.
fn underscore_binding_in_code(line: &str) -> bool {
    if is_comment(line) {
        return false;
    }
    let quoted_underscore = line
        .split('"')
        .enumerate()
        .any(|(i, part)| i % 2 == 1 && part.contains('_'));
    !quoted_underscore
}

fn change_log_comment(line: &str) -> bool {
    is_comment(line)
}

fn bold_in_plain_comment(line: &str) -> bool {
    is_comment(line) && !is_doc_comment(line)
}

fn always(_: &str) -> bool {
    true
}

fn rules() -> Vec<Rule> {
    vec![
        Rule {
            name: "underscore-prefixed bindings",
            pattern: r"\b(_[a-zA-Z0-9_]+)\b".to_string(),
            is_violation: underscore_binding_in_code,
            advice: "Underscore-prefixed names are not allowed. Use the value or remove it.",
        },
        Rule {
            name: "change-log comments",
            pattern: format!(r"//.*\b(?:{})\b", CHANGE_LOG_WORDS.join("|")),
            is_violation: change_log_comment,
            advice: "Comments describe the code as it is, not how it got there.",
        },
        Rule {
            name: "bold markers in plain comments",
            pattern: r"//.*\*\*".to_string(),
            is_violation: bold_in_plain_comment,
            advice: "Markdown emphasis belongs in doc comments only.",
        },
        Rule {
            name: "#[allow(dead_code)] attributes",
            pattern: r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]".to_string(),
            is_violation: always,
            advice: "Dead code is removed, not silenced.",
        },
    ]
}

fn rust_sources() -> impl Iterator<Item = PathBuf> {
    SOURCE_ROOTS
        .into_iter()
        .flat_map(|root| WalkDir::new(root).into_iter().filter_map(|e| e.ok()))
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
}

fn scan(rule: &Rule) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(&rule.pattern)?;
    let mut searcher = Searcher::new();
    for path in rust_sources() {
        let mut collector = ViolationCollector::new(&path, rule.is_violation);
        searcher.search_path(&matcher, &path, &mut collector)?;
        if let Some(message) = collector.error_message(rule) {
            return Err(message.into());
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for root in SOURCE_ROOTS {
        println!("cargo:rerun-if-changed={root}");
    }

    for rule in rules() {
        if let Err(e) = scan(&rule) {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
