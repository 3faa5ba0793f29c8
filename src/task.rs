// vault-tasks/src/task.rs

use serde::{Deserialize, Serialize};
use std::fmt;

/// Path of a document relative to the vault root, always `/`-separated.
/// `.` and empty segments are dropped and `..` never climbs above the root.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(path: impl Into<String>) -> Self {
        let raw: String = path.into();
        let mut segs: Vec<&str> = Vec::new();
        for seg in raw.split(['/', '\\']) {
            match seg {
                "" | "." => {}
                ".." => { segs.pop(); }
                s => segs.push(s),
            }
        }
        Self(segs.join("/"))
    }
    pub fn as_str(&self) -> &str { &self.0 }

    /// Extension without the dot, if any.
    pub fn extension(&self) -> Option<&str> {
        let name = self.0.rsplit('/').next()?;
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() { None } else { Some(ext) }
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self { Self::new(s) }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self { Self::new(s) }
}

impl From<DocumentId> for String {
    fn from(id: DocumentId) -> Self { id.0 }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    #[default]
    Low,
}

impl Priority {
    /// `!!` wins over `!`; any `!` anywhere counts, even inside a word.
    pub fn detect(text: &str) -> Self {
        if text.contains("!!") { Self::High }
        else if text.contains('!') { Self::Medium }
        else { Self::Low }
    }

    pub fn marker(&self) -> &'static str {
        match self {
            Self::High => "!!",
            Self::Medium => "!",
            Self::Low => "",
        }
    }
}

/// One checkbox line, as observed at the last parse.
///
/// A `Task` is a disposable projection of its document: `id` and
/// `line_index` are only valid until the next write to the same document,
/// after which the document must be parsed again.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Task {
    pub id: String,
    pub text: String,
    pub completed: bool,
    pub line_index: usize,
    pub document_id: DocumentId,
    pub category: Option<String>,
    pub priority: Priority,
    /// Milliseconds since the Unix epoch.
    pub completed_date: Option<i64>,
    /// True when `completed_date` was assigned at parse time rather than read from the line.
    pub completed_date_inferred: bool,
    #[serde(skip)]
    pub raw_line: String,
}

impl Task {
    pub fn make_id(document_id: &DocumentId, line_index: usize) -> String {
        format!("{}:{}", document_id, line_index)
    }

    /// Age of the completion at `now`, if the task is completed and dated.
    pub fn completed_age_ms(&self, now: i64) -> Option<i64> {
        if !self.completed { return None; }
        self.completed_date.map(|d| now - d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_id_normalizes_separators() {
        let id = DocumentId::new("\\notes\\Daily\\2024-01-01.md");
        assert_eq!(id.as_str(), "notes/Daily/2024-01-01.md");
        assert_eq!(id.extension(), Some("md"));
        assert_eq!(DocumentId::new(".hidden").extension(), None);
        assert_eq!(DocumentId::new("README").extension(), None);
    }

    #[test]
    fn document_id_stays_inside_the_root() {
        assert_eq!(DocumentId::new("../x.md").as_str(), "x.md");
        assert_eq!(DocumentId::new("a/../../b/./c.md").as_str(), "b/c.md");
        assert_eq!(DocumentId::new("notes//day.md").as_str(), "notes/day.md");
        assert_eq!(DocumentId::new("..\\..\\etc\\passwd.md").as_str(), "etc/passwd.md");

        let parsed: DocumentId = serde_json::from_str("\"../up.md\"").unwrap();
        assert_eq!(parsed.as_str(), "up.md");
        assert_eq!(serde_json::to_string(&parsed).unwrap(), "\"up.md\"");
    }

    #[test]
    fn priority_is_a_substring_heuristic() {
        assert_eq!(Priority::detect("ship it!!"), Priority::High);
        assert_eq!(Priority::detect("wow!nice"), Priority::Medium);
        assert_eq!(Priority::detect("quiet"), Priority::Low);
        assert_eq!(Priority::detect("a! b!"), Priority::Medium);
    }

    #[test]
    fn ids_combine_document_and_line() {
        assert_eq!(Task::make_id(&"Tasks.md".into(), 3), "Tasks.md:3");
    }
}
