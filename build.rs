use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Directories holding the crate's own sources. Nothing else is scanned.
const SOURCE_DIRS: [&str; 4] = ["logit", "cli", "tests", "benches"];

// What a rule does with a line the regex matched.
#[derive(Clone, Copy)]
enum LineFilter {
    // Underscore-prefixed names outside comments and string literals.
    CodeOnly,
    // Every match counts.
    Any,
    // Only comments whose letters are all uppercase.
    AllCapsComment,
}

struct Rule {
    pattern: &'static str,
    filter: LineFilter,
    headline: &'static str,
    advice: &'static str,
}

const RULES: [Rule; 4] = [
    Rule {
        pattern: r"\b(_[a-zA-Z0-9_]+)\b",
        filter: LineFilter::CodeOnly,
        headline: "underscore-prefixed names",
        advice: "Either use the binding (removing the underscore) or remove it completely.",
    },
    Rule {
        pattern: r"(//|/\*).*(?:FIXED|CORRECTED|FIXES|FIX|NEW|CHANGED|CHANGES|CHANGE|MODIFIED|MODIFIES|MODIFY|UPDATED|UPDATES|UPDATE)",
        filter: LineFilter::Any,
        headline: "forbidden comment patterns",
        advice: "Comments narrating edits (FIX, NEW, CHANGE, UPDATE and friends) are not allowed. Describe the code instead.",
    },
    Rule {
        pattern: r"(//|/\*).*",
        filter: LineFilter::AllCapsComment,
        headline: "all-uppercase comments",
        advice: "Comments containing only uppercase alphabetic characters are not allowed.",
    },
    Rule {
        pattern: r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
        filter: LineFilter::Any,
        headline: "#[allow(dead_code)] attributes",
        advice: "Either use the code (removing the attribute) or remove it completely.",
    },
];

// Collects every offending line of one file for one rule.
struct ViolationCollector {
    violations: Vec<String>,
    file_path: PathBuf,
    filter: LineFilter,
}

impl ViolationCollector {
    fn new(file_path: &Path, filter: LineFilter) -> Self {
        Self {
            violations: Vec::new(),
            file_path: file_path.to_path_buf(),
            filter,
        }
    }

    fn check_and_get_error_message(&self, rule: &Rule) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }

        let file_name = self.file_path.to_str().unwrap_or("?");
        let mut error_msg = format!(
            "\n❌ ERROR: Found {} {} in {}:\n",
            self.violations.len(),
            rule.headline,
            file_name
        );
        for violation in &self.violations {
            error_msg.push_str(&format!("   {violation}\n"));
        }
        error_msg.push_str(&format!("\n⚠️ {}\n", rule.advice));
        Some(error_msg)
    }
}

fn comment_text(line_text: &str) -> Option<&str> {
    let trimmed = line_text.trim_start();
    if let Some(rest) = trimmed.strip_prefix("///") {
        Some(rest.trim())
    } else if let Some(rest) = trimmed.strip_prefix("//") {
        Some(rest.trim())
    } else {
        let idx = line_text.find("/*")?;
        let rest = &line_text[idx + 2..];
        Some(match rest.find("*/") {
            Some(end) => rest[..end].trim(),
            None => rest.trim(),
        })
    }
}

fn is_in_string_literal(line_text: &str) -> bool {
    line_text
        .split('"')
        .enumerate()
        .any(|(i, part)| i % 2 == 1 && part.contains('_'))
}

impl Sink for ViolationCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();

        let is_violation = match self.filter {
            LineFilter::Any => true,
            LineFilter::CodeOnly => {
                let is_pure_comment = line_text.trim_start().starts_with("//");
                !is_pure_comment && !is_in_string_literal(line_text)
            }
            LineFilter::AllCapsComment => comment_text(line_text).is_some_and(|text| {
                let mut letters = text.chars().filter(|c| c.is_alphabetic()).peekable();
                letters.peek().is_some() && letters.all(|c| c.is_uppercase())
            }),
        };

        if is_violation {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn source_files() -> impl Iterator<Item = PathBuf> {
    SOURCE_DIRS.into_iter().flat_map(|dir| {
        WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
            .map(|e| e.into_path())
    })
}

fn scan(rule: &Rule) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(rule.pattern)?;
    let mut searcher = Searcher::new();

    for path in source_files() {
        let mut collector = ViolationCollector::new(&path, rule.filter);
        searcher.search_path(&matcher, &path, &mut collector)?;
        if let Some(error_message) = collector.check_and_get_error_message(rule) {
            return Err(error_message.into());
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in SOURCE_DIRS {
        println!("cargo:rerun-if-changed={dir}");
    }

    for rule in &RULES {
        if let Err(e) = scan(rule) {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
