//! Tiered fix instructions.
//!
//! The orchestrator appends these to the original task prompt on retry. Each
//! tier gets more concrete: broad names what is missing, specific hands over
//! signatures and patterns, exact points at the failing lines.

use super::FixTier;
use std::collections::BTreeSet;

/// Lines of the failing output quoted at the exact tier.
const MAX_QUOTED_LINES: usize = 12;

/// Build fix instructions for a failed attempt.
pub(super) fn build(
    task: &str,
    output: &str,
    issues: &[String],
    tier: FixTier,
    required: &BTreeSet<String>,
) -> String {
    if issues.is_empty() {
        return String::new();
    }
    match tier {
        FixTier::Broad => broad(issues, required),
        FixTier::Specific => specific(task, issues, required),
        FixTier::Exact => exact(output, issues),
    }
}

fn issue_list(issues: &[String]) -> String {
    issues
        .iter()
        .map(|issue| format!("- {issue}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn broad(issues: &[String], required: &BTreeSet<String>) -> String {
    let mut text = format!(
        "The previous output did not meet the acceptance bar. Problems found:\n{}\n\n\
         Rework the answer as a complete, working implementation.",
        issue_list(issues)
    );
    if !required.is_empty() {
        let names: Vec<&str> = required.iter().map(String::as_str).collect();
        text.push_str(&format!(
            " Make sure it defines and uses: {}.",
            names.join(", ")
        ));
    }
    text
}

fn specific(task: &str, issues: &[String], required: &BTreeSet<String>) -> String {
    let mut text = format!(
        "The previous output still fails validation. Problems found:\n{}\n\n\
         Apply these corrections:\n",
        issue_list(issues)
    );
    for name in required {
        text.push_str(&format!(
            "- Provide a full definition with this exact name: {name}(...) \
             with a real body, not a stub.\n"
        ));
    }
    for issue in issues {
        if issue.contains("placeholder") {
            text.push_str("- Replace every TODO, ellipsis, and `pass` body with working logic.\n");
        }
        if issue.contains("error handling") {
            text.push_str(
                "- Wrap fallible operations and return or raise a typed error instead of \
                 ignoring failures.\n",
            );
        }
        if issue.contains("edge case") || issue.contains("edge-case") {
            text.push_str("- Handle empty, null, and boundary inputs explicitly.\n");
        }
        if issue.contains("docstrings") {
            text.push_str("- Add a short doc comment to every public definition.\n");
        }
    }
    text.push_str(&format!(
        "\nThe implementation must directly satisfy the task: {task}"
    ));
    text
}

fn exact(output: &str, issues: &[String]) -> String {
    let mut text = format!(
        "The previous output is quoted below with line numbers. It still fails \
         validation for these reasons:\n{}\n\nFailing output:\n",
        issue_list(issues)
    );
    for (number, line) in output.lines().take(MAX_QUOTED_LINES).enumerate() {
        text.push_str(&format!("{:>4} | {line}\n", number + 1));
    }
    if output.lines().count() > MAX_QUOTED_LINES {
        text.push_str("     | ...\n");
    }
    text.push_str(
        "\nCorrect the quoted lines in place: replace placeholder lines with working \
         logic, complete every truncated construct, and keep everything that already \
         works unchanged.",
    );
    text
}
