use std::path::Path;

use parley_config::{Severity, ValidationResult, validate};

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Print diagnostics for the given (or discovered) config file. Returns
/// `false` when any error was found.
pub fn check(path: Option<&Path>, verbose: bool) -> bool {
    let result = validate(path);

    if let Some(ref path) = result.config_path {
        eprintln!("Checking {}\n", path.display());
    } else {
        eprintln!("No config file found; checking defaults.\n");
    }

    for line in render(&result, verbose) {
        eprintln!("{line}");
    }
    !result.has_errors()
}

fn render(result: &ValidationResult, verbose: bool) -> Vec<String> {
    let mut lines: Vec<String> = result
        .diagnostics
        .iter()
        .filter(|d| verbose || d.severity != Severity::Info)
        .map(|d| {
            let color = match d.severity {
                Severity::Error => RED,
                Severity::Warning => YELLOW,
                Severity::Info => CYAN,
            };
            if d.path.is_empty() {
                format!("  {BOLD}{color}{}{RESET} {}", d.severity, d.message)
            } else {
                format!("  {BOLD}{color}{}{RESET} {}: {}", d.severity, d.path, d.message)
            }
        })
        .collect();

    if !lines.is_empty() {
        lines.push(String::new());
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);
    if errors == 0 && warnings == 0 {
        lines.push("No issues found.".into());
    } else {
        lines.push(format!("{errors} error(s), {warnings} warning(s)"));
    }
    lines
}
