// vault-tasks/src/store.rs

use serde::Serialize;

use crate::{
    error::{Result, TaskError},
    grammar::{match_checkbox_line, serialize, with_status, CheckboxLine},
    task::{DocumentId, Task},
};

/// Header written when a task is added to a document that does not exist yet.
pub const NEW_DOCUMENT_HEADER: &str = "# Tasks\n\n";

/// Snapshot of the tasks of the current scope. Replaced wholesale on every parse.
#[derive(Clone, Debug, Default)]
pub struct TaskStore {
    tasks: Vec<Task>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    pub percent: u8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Toggled {
    pub new_full_text: String,
    pub new_completed: bool,
    pub new_completed_date: Option<i64>,
}

impl TaskStore {
    pub fn new(tasks: Vec<Task>) -> Self { Self { tasks } }
    pub fn tasks(&self) -> &[Task] { &self.tasks }
    pub fn len(&self) -> usize { self.tasks.len() }
    pub fn is_empty(&self) -> bool { self.tasks.is_empty() }

    pub fn get(&self, id: &str) -> Option<&Task> { self.tasks.iter().find(|t| t.id == id) }

    pub fn by_document<'a>(&'a self, doc: &'a DocumentId) -> impl Iterator<Item = &'a Task> + 'a {
        self.tasks.iter().filter(move |t| &t.document_id == doc)
    }

    pub fn filter<F>(&self, pred: F) -> Vec<&Task>
    where
        F: Fn(&Task) -> bool,
    {
        self.tasks.iter().filter(|t| pred(t)).collect()
    }

    pub fn open(&self) -> Vec<&Task> { self.filter(|t| !t.completed) }
    pub fn completed(&self) -> Vec<&Task> { self.filter(|t| t.completed) }

    /// Open tasks only, capped to the first `max` of them in snapshot order.
    /// The snapshot itself is never truncated.
    pub fn visible(&self, max: usize) -> Vec<&Task> {
        self.tasks.iter().filter(|t| !t.completed).take(max).collect()
    }

    pub fn progress(&self) -> Progress {
        let total = self.tasks.len();
        let completed = self.tasks.iter().filter(|t| t.completed).count();
        let percent = if total == 0 { 0 } else { ((completed as f64 / total as f64) * 100.0).round() as u8 };
        Progress { completed, total, percent }
    }
}

/// Re-reads the task's line from `full_text` and checks it is still the line the task came from.
fn live_line(full_text: &str, task: &Task) -> Result<(Vec<String>, CheckboxLine)> {
    let lines: Vec<String> = full_text.split('\n').map(str::to_string).collect();
    let stale = || TaskError::StaleReference { id: task.document_id.clone(), line: task.line_index };
    let current = lines.get(task.line_index).ok_or_else(stale)?;
    if *current != task.raw_line { return Err(stale()); }
    let parsed = match_checkbox_line(current).ok_or_else(stale)?;
    Ok((lines, parsed))
}

/// Flips the task's checkbox. Only that one line differs in the returned text.
pub fn toggle(full_text: &str, task: &Task, now_ms: i64) -> Result<Toggled> {
    let (mut lines, current) = live_line(full_text, task)?;
    let new_completed = !current.is_completed();
    let new_completed_date = new_completed.then_some(now_ms);
    let updated = with_status(&current, new_completed, new_completed_date);
    lines[task.line_index] = serialize(&updated);
    Ok(Toggled { new_full_text: lines.join("\n"), new_completed, new_completed_date })
}

/// Appends `- [ ] raw_text` to the document, or to a fresh one when `full_text` is `None`.
/// Blank input yields `None`.
pub fn add(full_text: Option<&str>, raw_text: &str) -> Option<String> {
    let text = raw_text.trim().replace(['\r', '\n'], " ");
    if text.is_empty() { return None; }
    let current = full_text.unwrap_or(NEW_DOCUMENT_HEADER);
    let body = current.trim_end();
    let mut out = String::with_capacity(current.len() + text.len() + 8);
    if !body.is_empty() {
        out.push_str(body);
        out.push('\n');
    }
    out.push_str("- [ ] ");
    out.push_str(&text);
    if current.ends_with('\n') { out.push('\n'); }
    Some(out)
}

/// Removes the task's line; every later line index in the document shifts down by one.
pub fn delete(full_text: &str, task: &Task) -> Result<String> {
    let (mut lines, _) = live_line(full_text, task)?;
    lines.remove(task.line_index);
    Ok(lines.join("\n"))
}
