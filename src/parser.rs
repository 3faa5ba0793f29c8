// vault-tasks/src/parser.rs

use tracing::debug;

use crate::{
    grammar::{extract_fields, match_checkbox_line},
    task::{DocumentId, Task},
};

#[derive(Clone, Copy, Debug)]
pub struct ParseOptions {
    /// Stamp completed lines that carry no annotation with `now_ms`.
    pub infer_missing_completion: bool,
    pub now_ms: i64,
}

impl ParseOptions {
    pub fn at(now_ms: i64) -> Self { Self { infer_missing_completion: true, now_ms } }
    pub fn observed() -> Self { Self { infer_missing_completion: false, now_ms: 0 } }
}

/// Text of one document plus the recency signal used for corpus ordering.
#[derive(Clone, Debug)]
pub struct SourceDocument {
    pub id: DocumentId,
    pub text: String,
    pub modified_ms: i64,
}

/// Result of a corpus pass: tasks from every readable document, and the
/// documents that contributed nothing because they could not be read.
#[derive(Clone, Debug, Default)]
pub struct ParseReport {
    pub tasks: Vec<Task>,
    pub unreadable: Vec<(DocumentId, String)>,
}

impl ParseReport {
    pub fn is_partial(&self) -> bool { !self.unreadable.is_empty() }
}

pub fn parse_document(document_id: &DocumentId, full_text: &str, opts: ParseOptions) -> Vec<Task> {
    let mut out = Vec::new();
    for (line_index, line) in full_text.split('\n').enumerate() {
        let Some(cb) = match_checkbox_line(line) else { continue };
        let fields = extract_fields(&cb.rest);
        let completed = cb.is_completed();

        let (completed_date, completed_date_inferred) = match (completed, fields.completed_date) {
            (false, _) => (None, false),
            (true, Some(ts)) => (Some(ts), false),
            (true, None) if opts.infer_missing_completion => (Some(opts.now_ms), true),
            (true, None) => (None, false),
        };

        out.push(Task {
            id: Task::make_id(document_id, line_index),
            text: fields.text,
            completed,
            line_index,
            document_id: document_id.clone(),
            category: fields.category,
            priority: fields.priority,
            completed_date,
            completed_date_inferred,
            raw_line: line.to_string(),
        });
    }
    debug!(document = %document_id, tasks = out.len(), "parsed document");
    out
}

/// Parses every document and orders the result most-recently-modified first.
/// Tasks of one document keep their line order.
pub fn parse_corpus(documents: &[SourceDocument], opts: ParseOptions) -> Vec<Task> {
    let mut keyed: Vec<(i64, Task)> = Vec::new();
    for doc in documents {
        for t in parse_document(&doc.id, &doc.text, opts) {
            keyed.push((doc.modified_ms, t));
        }
    }
    keyed.sort_by(|a, b| b.0.cmp(&a.0));
    keyed.into_iter().map(|(_, t)| t).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::serialize;
    use crate::task::Priority;

    const SAMPLE: &str = "# Tasks\n\n- [ ] Buy milk\n- [x] Walk dog <!--completed:1700000000000-->\n";

    #[test]
    fn parses_the_sample_document() {
        let id = DocumentId::new("Tasks.md");
        let tasks = parse_document(&id, SAMPLE, ParseOptions::at(5));
        assert_eq!(tasks.len(), 2);

        assert_eq!(tasks[0].text, "Buy milk");
        assert!(!tasks[0].completed);
        assert_eq!(tasks[0].line_index, 2);
        assert_eq!(tasks[0].id, "Tasks.md:2");
        assert_eq!(tasks[0].completed_date, None);

        assert_eq!(tasks[1].text, "Walk dog");
        assert!(tasks[1].completed);
        assert_eq!(tasks[1].completed_date, Some(1_700_000_000_000));
        assert!(!tasks[1].completed_date_inferred);
        assert_eq!(tasks[0].priority, Priority::Low);
        assert_eq!(tasks[1].priority, Priority::Medium);
    }

    #[test]
    fn unannotated_completion_follows_the_inference_option() {
        let id = DocumentId::new("a.md");
        let text = "- [X] shipped";
        let inferred = parse_document(&id, text, ParseOptions::at(99));
        assert_eq!(inferred[0].completed_date, Some(99));
        assert!(inferred[0].completed_date_inferred);

        let observed = parse_document(&id, text, ParseOptions::observed());
        assert_eq!(observed[0].completed_date, None);
        assert!(!observed[0].completed_date_inferred);
    }

    #[test]
    fn annotation_on_an_open_task_is_ignored() {
        let tasks = parse_document(&"a.md".into(), "- [ ] x <!--completed:5-->", ParseOptions::at(1));
        assert_eq!(tasks[0].completed_date, None);
        assert_eq!(tasks[0].text, "x");
    }

    #[test]
    fn reserializing_every_line_restores_the_document() {
        let text = "intro\n  - [ ] a #cat !\n* [ ] not a task\n\t- [X] b <!--completed:3-->\r\ntrailing";
        let tasks = parse_document(&"d.md".into(), text, ParseOptions::observed());
        let mut lines: Vec<String> = text.split('\n').map(str::to_string).collect();
        for t in &tasks {
            let cb = match_checkbox_line(&t.raw_line).unwrap();
            lines[t.line_index] = serialize(&cb);
        }
        assert_eq!(lines.join("\n"), text);
        assert!(tasks.windows(2).all(|w| w[0].line_index < w[1].line_index));
    }

    #[test]
    fn corpus_orders_by_recency_and_keeps_line_order() {
        let docs = vec![
            SourceDocument { id: "old.md".into(), text: "- [ ] o1\n- [ ] o2".into(), modified_ms: 10 },
            SourceDocument { id: "new.md".into(), text: "- [ ] n1\nx\n- [ ] n2".into(), modified_ms: 30 },
            SourceDocument { id: "mid.md".into(), text: "nothing here".into(), modified_ms: 20 },
        ];
        let tasks = parse_corpus(&docs, ParseOptions::observed());
        let texts: Vec<_> = tasks.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, ["n1", "n2", "o1", "o2"]);
    }
}
