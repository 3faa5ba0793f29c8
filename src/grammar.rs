// vault-tasks/src/grammar.rs

use regex::Regex;
use std::sync::LazyLock;

use crate::task::Priority;

static CHECKBOX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)- \[([ xX])\] (.+)$").expect("checkbox regex"));
static COMPLETED_NOTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<!--completed:(\d+)-->").expect("completion regex"));
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#(\w+)").expect("tag regex"));

/// A line split into the three parts of the checkbox grammar:
/// optional indentation, `- [`, status glyph, `] `, free text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckboxLine {
    pub indent: String,
    pub status: char,
    pub rest: String,
}

impl CheckboxLine {
    pub fn is_completed(&self) -> bool { matches!(self.status, 'x' | 'X') }
}

/// Metadata carried inline in the free-text part of a checkbox line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fields {
    pub text: String,
    pub category: Option<String>,
    pub priority: Priority,
    pub completed_date: Option<i64>,
}

pub fn match_checkbox_line(line: &str) -> Option<CheckboxLine> {
    let caps = CHECKBOX.captures(line)?;
    let status = caps.get(2)?.as_str().chars().next()?;
    Some(CheckboxLine {
        indent: caps[1].to_string(),
        status,
        rest: caps[3].to_string(),
    })
}

pub fn serialize(line: &CheckboxLine) -> String {
    format!("{}- [{}] {}", line.indent, line.status, line.rest)
}

/// Pulls category, priority and completion timestamp out of the free text.
///
/// Priority is read from the raw text, annotation included, so any `!`
/// (the one in `<!--` too) counts.
pub fn extract_fields(rest: &str) -> Fields {
    let completed_date = COMPLETED_NOTE
        .captures(rest)
        .and_then(|c| c[1].parse::<i64>().ok());
    let without_note = COMPLETED_NOTE.replace_all(rest, "");
    let category = TAG.captures(&without_note).map(|c| c[1].to_string());
    let priority = Priority::detect(rest);

    let untagged = TAG.replace_all(&without_note, "");
    let text = untagged
        .split_whitespace()
        .filter(|tok| !tok.chars().all(|c| c == '!'))
        .collect::<Vec<_>>()
        .join(" ");

    Fields { text, category, priority, completed_date }
}

/// Rebuilds `line` with the glyph set for `completed`.
///
/// Existing completion annotations are always removed first; a fresh one is
/// appended only when completing with a timestamp. A trailing `\r` from a
/// CRLF document is kept.
pub fn with_status(line: &CheckboxLine, completed: bool, completed_date: Option<i64>) -> CheckboxLine {
    let (body, cr) = match line.rest.strip_suffix('\r') {
        Some(b) => (b, "\r"),
        None => (line.rest.as_str(), ""),
    };
    let mut rest = COMPLETED_NOTE.replace_all(body, "").trim_end().to_string();
    if completed {
        if let Some(ts) = completed_date {
            rest.push_str(&format!(" <!--completed:{}-->", ts));
        }
    }
    rest.push_str(cr);
    CheckboxLine {
        indent: line.indent.clone(),
        status: if completed { 'x' } else { ' ' },
        rest,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_only_the_dash_checkbox_shape() {
        let l = match_checkbox_line("  - [X] done thing").unwrap();
        assert_eq!(l.indent, "  ");
        assert_eq!(l.status, 'X');
        assert_eq!(l.rest, "done thing");
        assert!(l.is_completed());

        for not_task in [
            "* [ ] star bullet",
            "- [ ]no space",
            "- [ ] ",
            "- [-] cancelled",
            "-  [ ] two spaces",
            "1. [ ] numbered",
            "# Tasks",
            "",
        ] {
            assert!(match_checkbox_line(not_task).is_none(), "{not_task:?}");
        }
    }

    #[test]
    fn serialize_reproduces_the_line() {
        for line in [
            "- [ ] Buy milk",
            "\t- [x] Walk dog <!--completed:1700000000000-->",
            "    - [X] weird   spacing  #tag !! ",
            "- [ ] crlf\r",
        ] {
            let parsed = match_checkbox_line(line).unwrap();
            assert_eq!(serialize(&parsed), line);
        }
    }

    #[test]
    fn extracts_category_and_priority() {
        let l = match_checkbox_line("- [ ] Pay rent #bills !!").unwrap();
        let f = extract_fields(&l.rest);
        assert_eq!(f.text, "Pay rent");
        assert_eq!(f.category.as_deref(), Some("bills"));
        assert_eq!(f.priority, Priority::High);
        assert_eq!(f.completed_date, None);
    }

    #[test]
    fn first_tag_is_the_category_and_all_tags_leave_the_text() {
        let f = extract_fields("review #work draft #later");
        assert_eq!(f.category.as_deref(), Some("work"));
        assert_eq!(f.text, "review draft");
        assert_eq!(f.priority, Priority::Low);
    }

    #[test]
    fn annotation_is_read_and_its_bang_counts_as_priority() {
        let l = match_checkbox_line("- [x] Walk dog <!--completed:1700000000000-->").unwrap();
        let f = extract_fields(&l.rest);
        assert_eq!(f.completed_date, Some(1_700_000_000_000));
        assert_eq!(f.text, "Walk dog");
        assert_eq!(f.priority, Priority::Medium);

        let f = extract_fields("urgent !! <!--completed:5-->");
        assert_eq!(f.priority, Priority::High);
        assert_eq!(f.text, "urgent");
    }

    #[test]
    fn bang_inside_a_word_still_counts() {
        let f = extract_fields("Yahoo! signup");
        assert_eq!(f.priority, Priority::Medium);
        assert_eq!(f.text, "Yahoo! signup");
    }

    #[test]
    fn with_status_adds_and_removes_annotation() {
        let open = match_checkbox_line("- [ ] Buy milk").unwrap();
        let done = with_status(&open, true, Some(42));
        assert_eq!(serialize(&done), "- [x] Buy milk <!--completed:42-->");

        let reopened = with_status(&done, false, None);
        assert_eq!(serialize(&reopened), "- [ ] Buy milk");

        let done_undated = with_status(&open, true, None);
        assert_eq!(serialize(&done_undated), "- [x] Buy milk");
    }

    #[test]
    fn with_status_replaces_a_stale_annotation() {
        let l = match_checkbox_line("  - [X] Old <!--completed:1--> #x").unwrap();
        let again = with_status(&l, true, Some(2));
        assert_eq!(serialize(&again), "  - [x] Old  #x <!--completed:2-->");
    }

    #[test]
    fn with_status_keeps_carriage_return() {
        let l = match_checkbox_line("- [ ] crlf\r").unwrap();
        let done = with_status(&l, true, Some(7));
        assert_eq!(serialize(&done), "- [x] crlf <!--completed:7-->\r");
    }
}
