//! Human review of merge candidates: colored diffs and the prompts around them.

use crate::jsonc;
use crate::similarity::Similarity;
use colored::Colorize;
use regex::Regex;
use serde_json::{Map, Value};
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
    /// Reject for now and remember the parameter for manual follow-up.
    FollowUp,
    /// Stop reviewing, keep everything accepted so far.
    SaveAndQuit,
}

impl Decision {
    pub fn from_answer(answer: &str) -> Self {
        match answer.trim() {
            "wq" => Decision::SaveAndQuit,
            "n" | "N" => Decision::Reject,
            "f" | "F" => Decision::FollowUp,
            _ => Decision::Accept,
        }
    }
}

/// One parameter pair offered for merging.
#[derive(Debug)]
pub struct Candidate<'a> {
    pub base_label: &'a str,
    pub base_path: &'a Path,
    pub base_key: &'a str,
    pub base: &'a Value,
    pub test_label: &'a str,
    pub test_path: &'a Path,
    pub test_key: &'a str,
    pub test: &'a Value,
    pub similarity: Similarity,
}

pub trait Reviewer {
    fn review_match(&mut self, candidate: &Candidate<'_>) -> io::Result<Decision>;

    /// Name for a new manufacturer template entry holding `base`.
    /// `None` stops the review like [`Decision::SaveAndQuit`].
    fn import_name(
        &mut self,
        base: &Value,
        template: &Map<String, Value>,
    ) -> io::Result<Option<String>>;

    fn use_master_entry(&mut self, name: &str) -> io::Result<bool>;
}

pub fn is_valid_import_name(name: &str) -> bool {
    static NAME_RE: OnceLock<Regex> = OnceLock::new();
    NAME_RE
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("import name pattern"))
        .is_match(name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffKind {
    Same,
    Added,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLine<'a> {
    pub kind: DiffKind,
    pub text: &'a str,
}

/// Line diff from the longest common subsequence of the two texts.
pub fn line_diff<'a>(old: &'a str, new: &'a str) -> Vec<DiffLine<'a>> {
    let a: Vec<&str> = old.lines().collect();
    let b: Vec<&str> = new.lines().collect();

    // lcs[i][j] = LCS length of a[i..] and b[j..]
    let mut lcs = vec![vec![0u32; b.len() + 1]; a.len() + 1];
    for i in (0..a.len()).rev() {
        for j in (0..b.len()).rev() {
            lcs[i][j] = if a[i] == b[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut out = Vec::with_capacity(a.len().max(b.len()));
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i] == b[j] {
            out.push(DiffLine { kind: DiffKind::Same, text: a[i] });
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            out.push(DiffLine { kind: DiffKind::Removed, text: a[i] });
            i += 1;
        } else {
            out.push(DiffLine { kind: DiffKind::Added, text: b[j] });
            j += 1;
        }
    }
    out.extend(a[i..].iter().map(|&text| DiffLine { kind: DiffKind::Removed, text }));
    out.extend(b[j..].iter().map(|&text| DiffLine { kind: DiffKind::Added, text }));
    out
}

/// Print the candidate and the base parameter as a colored diff.
pub fn compare_params_on_console<W: Write>(
    out: &mut W,
    candidate: &Candidate<'_>,
    clear: bool,
) -> io::Result<()> {
    if clear {
        write!(out, "\x1B[2J\x1B[1;1H")?;
    }

    writeln!(
        out,
        "{} {} #{}  {}  {} {} #{}  [{}]",
        candidate.test_label.cyan(),
        candidate.test_path.display().to_string().dimmed(),
        candidate.test_key,
        "<->".dimmed(),
        candidate.base_label.cyan(),
        candidate.base_path.display().to_string().dimmed(),
        candidate.base_key,
        candidate.similarity.to_string().yellow()
    )?;
    writeln!(out)?;

    let old = jsonc::to_string(candidate.test);
    let new = jsonc::to_string(candidate.base);
    for line in line_diff(&old, &new) {
        match line.kind {
            DiffKind::Added => writeln!(out, "{}", line.text.green())?,
            DiffKind::Removed => writeln!(out, "{}", line.text.red())?,
            DiffKind::Same => writeln!(out, "{}", line.text.dimmed())?,
        }
    }
    writeln!(out)
}

/// Interactive reviewer reading answers line by line.
pub struct ConsoleReviewer<R, W> {
    input: R,
    output: W,
    clear: bool,
}

impl<R: BufRead, W: Write> ConsoleReviewer<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output, clear: true }
    }

    pub fn without_clear(mut self) -> Self {
        self.clear = false;
        self
    }

    /// `None` at end of input.
    fn ask(&mut self, query: &str) -> io::Result<Option<String>> {
        write!(self.output, "{}", query)?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }
}

impl<R: BufRead, W: Write> Reviewer for ConsoleReviewer<R, W> {
    fn review_match(&mut self, candidate: &Candidate<'_>) -> io::Result<Decision> {
        compare_params_on_console(&mut self.output, candidate, self.clear)?;

        let decision = match self.ask("Equivalent Parameter (Y/n/f/wq)? ")? {
            Some(answer) => Decision::from_answer(&answer),
            None => Decision::SaveAndQuit,
        };
        match decision {
            Decision::Accept => writeln!(self.output, "{}", "Adding!".green())?,
            Decision::SaveAndQuit => writeln!(self.output, "{}", "Quitting!".yellow())?,
            Decision::FollowUp => writeln!(self.output, "{}", "Marked for follow-up".yellow())?,
            Decision::Reject => {}
        }
        Ok(decision)
    }

    fn import_name(
        &mut self,
        _base: &Value,
        template: &Map<String, Value>,
    ) -> io::Result<Option<String>> {
        loop {
            let Some(name) = self.ask("Import statement name? ")? else {
                writeln!(self.output, "{}", "Quitting!".yellow())?;
                return Ok(None);
            };

            if !is_valid_import_name(&name) {
                writeln!(
                    self.output,
                    "{}",
                    "Use letters, digits, '_' or '-' only.".yellow()
                )?;
                continue;
            }
            if template.contains_key(&name) {
                writeln!(
                    self.output,
                    "{}",
                    format!("'{}' already exists in the template and will be replaced.", name).yellow()
                )?;
            }
            return Ok(Some(name));
        }
    }

    fn use_master_entry(&mut self, name: &str) -> io::Result<bool> {
        let answer = self.ask(&format!("Use master template entry '{}' (Y/n)? ", name))?;
        Ok(!matches!(answer.as_deref(), None | Some("n") | Some("N")))
    }
}

/// Accepts every candidate; import names are derived from the parameter label.
#[derive(Debug, Default)]
pub struct AutoReviewer;

impl Reviewer for AutoReviewer {
    fn review_match(&mut self, _candidate: &Candidate<'_>) -> io::Result<Decision> {
        Ok(Decision::Accept)
    }

    fn import_name(
        &mut self,
        base: &Value,
        template: &Map<String, Value>,
    ) -> io::Result<Option<String>> {
        let label = base.get("label").and_then(Value::as_str).unwrap_or("");
        let stem = slugify(label);

        let mut name = stem.clone();
        let mut n = 2;
        while template.contains_key(&name) {
            name = format!("{}_{}", stem, n);
            n += 1;
        }
        Ok(Some(name))
    }

    fn use_master_entry(&mut self, _name: &str) -> io::Result<bool> {
        Ok(true)
    }
}

/// `"LED Indicator (Night)"` -> `"led_indicator_night"`.
pub fn slugify(label: &str) -> String {
    let mut slug = String::with_capacity(label.len());
    for c in label.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let slug = slug.trim_matches('_');
    if slug.is_empty() {
        "param".to_string()
    } else {
        slug.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::io::Cursor;

    fn candidate<'a>(base: &'a Value, test: &'a Value) -> Candidate<'a> {
        Candidate {
            base_label: "ZW4001",
            base_path: Path::new("zw4001.json"),
            base_key: "3",
            base,
            test_label: "ZW3005",
            test_path: Path::new("zw3005.json"),
            test_key: "3",
            test,
            similarity: Similarity::Range,
        }
    }

    #[test]
    fn test_decision_from_answer() {
        assert_eq!(Decision::from_answer(""), Decision::Accept);
        assert_eq!(Decision::from_answer("Y"), Decision::Accept);
        assert_eq!(Decision::from_answer("whatever"), Decision::Accept);
        assert_eq!(Decision::from_answer("n"), Decision::Reject);
        assert_eq!(Decision::from_answer("N"), Decision::Reject);
        assert_eq!(Decision::from_answer("f"), Decision::FollowUp);
        assert_eq!(Decision::from_answer(" wq "), Decision::SaveAndQuit);
    }

    #[test]
    fn test_line_diff() {
        let diff = line_diff("a\nb\nc", "a\nx\nc\nd");
        let kinds: Vec<(DiffKind, &str)> = diff.iter().map(|l| (l.kind, l.text)).collect();
        assert_eq!(
            kinds,
            vec![
                (DiffKind::Same, "a"),
                (DiffKind::Removed, "b"),
                (DiffKind::Added, "x"),
                (DiffKind::Same, "c"),
                (DiffKind::Added, "d"),
            ]
        );
    }

    #[test]
    fn test_line_diff_identical() {
        let diff = line_diff("a\nb", "a\nb");
        assert!(diff.iter().all(|l| l.kind == DiffKind::Same));
        assert_eq!(diff.len(), 2);
    }

    #[test]
    fn test_console_review_shows_diff_and_reads_answer() {
        let base = json!({ "label": "LED indicator", "minValue": 0 });
        let test = json!({ "label": "LED light", "minValue": 0 });

        let mut output = Vec::new();
        let mut reviewer = ConsoleReviewer::new(Cursor::new("n\nf\n"), &mut output).without_clear();
        assert_eq!(reviewer.review_match(&candidate(&base, &test)).unwrap(), Decision::Reject);
        assert_eq!(reviewer.review_match(&candidate(&base, &test)).unwrap(), Decision::FollowUp);
        assert_eq!(reviewer.review_match(&candidate(&base, &test)).unwrap(), Decision::SaveAndQuit);
        drop(reviewer);

        let printed = String::from_utf8(output).unwrap();
        assert!(printed.contains("LED light"));
        assert!(printed.contains("LED indicator"));
        assert!(printed.contains("Equivalent Parameter (Y/n/f/wq)? "));
        assert!(!printed.contains("\x1B[2J"));
    }

    #[test]
    fn test_console_import_name_retries_invalid() {
        let mut output = Vec::new();
        let mut reviewer = ConsoleReviewer::new(Cursor::new("\nbad name\nled_mode\n"), &mut output);
        let name = reviewer.import_name(&json!({}), &Map::new()).unwrap();
        assert_eq!(name.as_deref(), Some("led_mode"));

        let mut eof = ConsoleReviewer::new(Cursor::new(""), Vec::new());
        assert_eq!(eof.import_name(&json!({}), &Map::new()).unwrap(), None);
    }

    #[test]
    fn test_console_import_name_warns_on_existing_entry() {
        let mut template = Map::new();
        template.insert("led".into(), json!({ "label": "LED" }));

        let mut output = Vec::new();
        let mut reviewer = ConsoleReviewer::new(Cursor::new("led\n"), &mut output);
        let name = reviewer.import_name(&json!({}), &template).unwrap();
        assert_eq!(name.as_deref(), Some("led"));

        let printed = String::from_utf8(output).unwrap();
        assert!(printed.contains("'led' already exists in the template and will be replaced."));
    }

    #[test]
    fn test_console_use_master_entry() {
        let mut reviewer = ConsoleReviewer::new(Cursor::new("\nn\n"), Vec::new());
        assert!(reviewer.use_master_entry("base_enable_disable").unwrap());
        assert!(!reviewer.use_master_entry("base_enable_disable").unwrap());
        assert!(!reviewer.use_master_entry("base_enable_disable").unwrap());
    }

    #[test]
    fn test_auto_reviewer_names_are_unique() {
        let mut template = Map::new();
        template.insert("led_indicator".into(), json!({}));
        template.insert("led_indicator_2".into(), json!({}));

        let mut reviewer = AutoReviewer;
        let name = reviewer
            .import_name(&json!({ "label": "LED Indicator" }), &template)
            .unwrap();
        assert_eq!(name.as_deref(), Some("led_indicator_3"));
        assert_eq!(reviewer.import_name(&json!({}), &Map::new()).unwrap().as_deref(), Some("param"));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("LED Indicator (Night)"), "led_indicator_night");
        assert_eq!(slugify("  Auto-off  "), "auto_off");
        assert_eq!(slugify("!!!"), "param");
    }
}
