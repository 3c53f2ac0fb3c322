//! The task collection and the only code allowed to change it.
//!
//! Every mutation builds the next collection off to the side, writes it through
//! the [`PersistenceAdapter`], and only then swaps it in. A rejected write
//! therefore leaves memory exactly as it was before the call. Listeners
//! registered with [`TaskStore::subscribe`] hear about a change after it is
//! durable.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::activity::{ActivityEntry, ActivityRecorder, DEFAULT_MAX_ENTRIES, RawEntry};
use crate::error::{StoreError, StoreResult};
use crate::filter::{self, StatusFilter, TaskQuery};
use crate::persistence::{BlobStore, PersistenceAdapter};
use crate::task::{Status, Task, TaskMeta, TaskPatch, normalize_title};

pub const DEFAULT_TASKS_KEY: &str = "tasks";
pub const DEFAULT_ACTIVITY_KEY: &str = "activityLog";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    pub tasks_key: String,
    pub activity_key: String,
    pub max_activity: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            tasks_key: DEFAULT_TASKS_KEY.to_string(),
            activity_key: DEFAULT_ACTIVITY_KEY.to_string(),
            max_activity: DEFAULT_MAX_ENTRIES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Updated,
    Toggled,
    Removed,
    ClearedCompleted,
    Reordered,
    Imported,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub total: usize,
    pub done: usize,
    pub pending: usize,
}

/// Import/export document: `{ "tasks": [...], "activityLog": [...] }`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub tasks: Vec<Task>,
    pub activity_log: Vec<ActivityEntry>,
}

/// Lenient shape used for stored blobs and import documents. Records written
/// by the browser dashboard carry only `name` and `done`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTask {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, alias = "name")]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    due_date: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    done: Option<bool>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

type Listener = Box<dyn FnMut(&ChangeEvent)>;

pub struct TaskStore<B> {
    adapter: PersistenceAdapter<B>,
    tasks_key: String,
    tasks: Vec<Task>,
    activity: ActivityRecorder<B>,
    listeners: Vec<Listener>,
}

impl<B: BlobStore + Clone> TaskStore<B> {
    /// Loads the persisted collection. Unreadable or invalid data never fails
    /// startup: the store comes up empty and the activity log says why.
    #[tracing::instrument(skip(adapter, options), fields(tasks_key = %options.tasks_key))]
    pub fn open(adapter: PersistenceAdapter<B>, options: StoreOptions) -> Self {
        let activity = ActivityRecorder::open(
            adapter.clone(),
            &options.activity_key,
            options.max_activity,
        );

        let mut store = Self {
            adapter,
            tasks_key: options.tasks_key,
            tasks: Vec::new(),
            activity,
            listeners: Vec::new(),
        };

        let loaded = store
            .adapter
            .load::<Vec<Value>>(&store.tasks_key)
            .and_then(|raw| match raw {
                Some(values) => normalize_records(parse_records(values)?, Utc::now()),
                None => Ok(Vec::new()),
            });

        match loaded {
            Ok(tasks) => {
                info!(count = tasks.len(), "loaded tasks");
                store.tasks = tasks;
            }
            Err(err) => {
                warn!(error = %err, "stored tasks unreadable; starting empty");
                let message = format!("Stored tasks could not be loaded ({err}); starting empty");
                if let Err(err) = store.activity.warn(message) {
                    warn!(error = %err, "failed to record load warning");
                }
            }
        }

        store
    }
}

impl<B: BlobStore> TaskStore<B> {
    pub fn subscribe(&mut self, listener: impl FnMut(&ChangeEvent) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    #[tracing::instrument(skip(self, meta))]
    pub fn add(&mut self, title: &str, meta: TaskMeta) -> StoreResult<Task> {
        let title = normalize_title(title)?;
        let mut task = Task::new_pending(title, meta, Utc::now());
        while self.position(task.id).is_some() {
            task.id = Uuid::new_v4();
        }

        let mut next = self.tasks.clone();
        next.push(task.clone());
        self.commit(
            next,
            ChangeEvent {
                kind: ChangeKind::Added,
                ids: vec![task.id],
            },
            Some(format!("Task \"{}\" added", task.title)),
        )?;

        debug!(id = %task.id, count = self.tasks.len(), "task added");
        Ok(task)
    }

    #[tracing::instrument(skip(self, patch))]
    pub fn update(&mut self, id: Uuid, patch: &TaskPatch) -> StoreResult<Task> {
        let idx = self.index_of(id)?;
        let updated = self.tasks[idx].patched(patch, Utc::now())?;

        let mut next = self.tasks.clone();
        next[idx] = updated.clone();
        self.commit(
            next,
            ChangeEvent {
                kind: ChangeKind::Updated,
                ids: vec![id],
            },
            Some(format!("Task \"{}\" updated", updated.title)),
        )?;
        Ok(updated)
    }

    #[tracing::instrument(skip(self))]
    pub fn toggle_status(&mut self, id: Uuid) -> StoreResult<Task> {
        let idx = self.index_of(id)?;
        let mut toggled = self.tasks[idx].clone();
        toggled.status = toggled.status.toggled();
        toggled.updated_at = Some(Utc::now());

        let state = match toggled.status {
            Status::Done => "completed",
            Status::Pending => "pending",
        };
        let message = format!("Task \"{}\" marked as {state}", toggled.title);

        let mut next = self.tasks.clone();
        next[idx] = toggled.clone();
        self.commit(
            next,
            ChangeEvent {
                kind: ChangeKind::Toggled,
                ids: vec![id],
            },
            Some(message),
        )?;
        Ok(toggled)
    }

    #[tracing::instrument(skip(self))]
    pub fn remove(&mut self, id: Uuid) -> StoreResult<()> {
        let idx = self.index_of(id)?;
        let mut next = self.tasks.clone();
        let removed = next.remove(idx);
        self.commit(
            next,
            ChangeEvent {
                kind: ChangeKind::Removed,
                ids: vec![id],
            },
            Some(format!("Task \"{}\" deleted", removed.title)),
        )
    }

    /// Drops every done task in a single write. Nothing is written when no
    /// task is done.
    #[tracing::instrument(skip(self))]
    pub fn clear_completed(&mut self) -> StoreResult<usize> {
        let (removed, kept): (Vec<Task>, Vec<Task>) =
            self.tasks.iter().cloned().partition(Task::is_done);
        if removed.is_empty() {
            debug!("no completed tasks to clear");
            return Ok(0);
        }

        let count = removed.len();
        self.commit(
            kept,
            ChangeEvent {
                kind: ChangeKind::ClearedCompleted,
                ids: removed.iter().map(|task| task.id).collect(),
            },
            Some(format!("Cleared {count} completed task(s)")),
        )?;
        info!(count, "cleared completed tasks");
        Ok(count)
    }

    /// Moves `id` to just before `before`, or to the end when `before` is
    /// `None` or names no task. The collection is written even when the
    /// position does not change.
    #[tracing::instrument(skip(self))]
    pub fn reorder(&mut self, id: Uuid, before: Option<Uuid>) -> StoreResult<()> {
        let from = self.index_of(id)?;
        let mut next = self.tasks.clone();
        let moving = next.remove(from);

        let to = match before {
            Some(anchor) if anchor == id => from,
            Some(anchor) => next
                .iter()
                .position(|task| task.id == anchor)
                .unwrap_or(next.len()),
            None => next.len(),
        };
        next.insert(to, moving);

        let moved = next
            .iter()
            .zip(self.tasks.iter())
            .any(|(a, b)| a.id != b.id);
        debug!(from, to, moved, "reordering task");

        self.commit(
            next,
            ChangeEvent {
                kind: ChangeKind::Reordered,
                ids: vec![id],
            },
            moved.then(|| "Tasks reordered".to_string()),
        )
    }

    /// Replaces the whole collection. Nothing is applied unless every record
    /// is valid.
    #[tracing::instrument(skip(self, tasks), fields(count = tasks.len()))]
    pub fn import_snapshot(&mut self, tasks: Vec<Task>) -> StoreResult<()> {
        let tasks = validate_tasks(tasks)?;
        let count = tasks.len();
        let ids = tasks.iter().map(|task| task.id).collect();
        self.commit(
            tasks,
            ChangeEvent {
                kind: ChangeKind::Imported,
                ids,
            },
            Some(format!("Imported {count} task(s)")),
        )
    }

    /// Parses and applies an import document. Accepts the full
    /// `{ tasks, activityLog }` shape or a bare task array. When the document
    /// carries an activity log it replaces the current one.
    #[tracing::instrument(skip(self, text), fields(bytes = text.len()))]
    pub fn import_document(&mut self, text: &str) -> StoreResult<usize> {
        let document: Value = serde_json::from_str(text).map_err(|err| {
            StoreError::validation(format!("import document is malformed: {err}"))
        })?;

        let (records, raw_log) = match document {
            Value::Array(records) => (records, None),
            Value::Object(mut fields) => {
                let records = match fields.remove("tasks") {
                    Some(Value::Array(records)) => records,
                    _ => {
                        return Err(StoreError::validation(
                            "import document has no \"tasks\" array",
                        ));
                    }
                };
                let raw_log = match fields.remove("activityLog") {
                    None | Some(Value::Null) => None,
                    Some(log) => Some(serde_json::from_value::<Vec<RawEntry>>(log).map_err(
                        |err| StoreError::validation(format!("activityLog is malformed: {err}")),
                    )?),
                };
                (records, raw_log)
            }
            _ => {
                return Err(StoreError::validation(
                    "import document must be a task array or an object with \"tasks\"",
                ));
            }
        };

        let now = Utc::now();
        let tasks = normalize_records(parse_records(records)?, now)?;
        let count = tasks.len();
        let event = ChangeEvent {
            kind: ChangeKind::Imported,
            ids: tasks.iter().map(|task| task.id).collect(),
        };
        let log = raw_log.map(|raw| raw.into_iter().map(|entry| entry.into_entry(now)).collect());

        self.commit_with_log(tasks, event, Some(format!("Imported {count} task(s)")), log)?;
        Ok(count)
    }

    pub fn list(&self, status: StatusFilter, query: &TaskQuery) -> Vec<Task> {
        self.tasks
            .iter()
            .filter(|task| filter::matches(task, status, query))
            .cloned()
            .collect()
    }

    pub fn export_snapshot(&self) -> Vec<Task> {
        self.tasks.clone()
    }

    pub fn export_document(&self) -> Snapshot {
        Snapshot {
            tasks: self.export_snapshot(),
            activity_log: self.activity.list().to_vec(),
        }
    }

    pub fn get(&self, id: Uuid) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn stats(&self) -> Stats {
        let done = self.tasks.iter().filter(|task| task.is_done()).count();
        Stats {
            total: self.tasks.len(),
            done,
            pending: self.tasks.len() - done,
        }
    }

    pub fn activity(&self) -> &[ActivityEntry] {
        self.activity.list()
    }

    fn position(&self, id: Uuid) -> Option<usize> {
        self.tasks.iter().position(|task| task.id == id)
    }

    fn index_of(&self, id: Uuid) -> StoreResult<usize> {
        self.position(id).ok_or(StoreError::NotFound { id })
    }

    fn commit(
        &mut self,
        next: Vec<Task>,
        event: ChangeEvent,
        message: Option<String>,
    ) -> StoreResult<()> {
        self.commit_with_log(next, event, message, None)
    }

    /// Writes `next`, swaps it in, then updates the activity log. Activity
    /// failures are logged and never undo the committed task write.
    fn commit_with_log(
        &mut self,
        next: Vec<Task>,
        event: ChangeEvent,
        message: Option<String>,
        log: Option<Vec<ActivityEntry>>,
    ) -> StoreResult<()> {
        self.adapter.save(&self.tasks_key, &next)?;
        self.tasks = next;

        if let Some(entries) = log
            && let Err(err) = self.activity.replace(entries)
        {
            warn!(error = %err, "failed to replace activity log from import");
        }
        if let Some(message) = message
            && let Err(err) = self.activity.record(message)
        {
            warn!(error = %err, "task change committed but activity entry was not saved");
        }

        self.emit(&event);
        Ok(())
    }

    fn emit(&mut self, event: &ChangeEvent) {
        debug!(kind = ?event.kind, ids = event.ids.len(), "emitting change");
        for listener in &mut self.listeners {
            listener(event);
        }
    }
}

fn describe_record(position: usize, id: Option<&str>) -> String {
    match id {
        Some(id) => format!("record {} (id {id})", position + 1),
        None => format!("record {}", position + 1),
    }
}

/// Deserializes each record on its own so a type error names the record.
fn parse_records(values: Vec<Value>) -> StoreResult<Vec<RawTask>> {
    values
        .into_iter()
        .enumerate()
        .map(|(position, value)| {
            let id = value.get("id").and_then(Value::as_str).map(str::to_string);
            serde_json::from_value::<RawTask>(value).map_err(|err| {
                let label = describe_record(position, id.as_deref());
                StoreError::validation(format!("{label}: {err}"))
            })
        })
        .collect()
}

fn require_title(raw: &str, label: &str) -> StoreResult<String> {
    normalize_title(raw)
        .map_err(|_| StoreError::validation(format!("{label}: title cannot be empty")))
}

fn validate_tasks(tasks: Vec<Task>) -> StoreResult<Vec<Task>> {
    let mut seen = HashSet::with_capacity(tasks.len());
    let mut out = Vec::with_capacity(tasks.len());

    for (position, mut task) in tasks.into_iter().enumerate() {
        let label = describe_record(position, Some(&task.id.to_string()));
        task.title = require_title(&task.title, &label)?;
        if !seen.insert(task.id) {
            return Err(StoreError::validation(format!("{label}: duplicate id")));
        }
        out.push(task);
    }

    Ok(out)
}

fn normalize_records(raw: Vec<RawTask>, now: DateTime<Utc>) -> StoreResult<Vec<Task>> {
    let mut seen = HashSet::with_capacity(raw.len());
    let mut out = Vec::with_capacity(raw.len());

    for (position, record) in raw.into_iter().enumerate() {
        let label = describe_record(position, record.id.as_deref());
        let title = require_title(record.title.as_deref().unwrap_or_default(), &label)?;

        let status = match (record.status.as_deref(), record.done) {
            (Some(raw), _) => Status::parse(raw).ok_or_else(|| {
                StoreError::validation(format!("{label}: unknown status {raw:?}"))
            })?,
            (None, Some(true)) => Status::Done,
            (None, _) => Status::Pending,
        };

        let id = match record.id.as_deref() {
            Some(raw) => {
                let id = Uuid::parse_str(raw.trim()).map_err(|err| {
                    StoreError::validation(format!("{label}: invalid id: {err}"))
                })?;
                if seen.contains(&id) {
                    return Err(StoreError::validation(format!("{label}: duplicate id")));
                }
                id
            }
            None => {
                let mut id = Uuid::new_v4();
                while seen.contains(&id) {
                    id = Uuid::new_v4();
                }
                id
            }
        };
        seen.insert(id);

        let mut task = Task::new_pending(
            title,
            TaskMeta {
                description: record.description,
                due_date: record.due_date,
                priority: record.priority,
            },
            record.created_at.unwrap_or(now),
        );
        task.id = id;
        task.status = status;
        task.updated_at = record.updated_at;
        out.push(task);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::persistence::MemoryBlobStore;

    fn open_memory() -> (MemoryBlobStore, TaskStore<MemoryBlobStore>) {
        let backend = MemoryBlobStore::new();
        let store = TaskStore::open(
            PersistenceAdapter::new(backend.clone()),
            StoreOptions::default(),
        );
        (backend, store)
    }

    fn titles(store: &TaskStore<MemoryBlobStore>) -> Vec<String> {
        store.tasks().iter().map(|t| t.title.clone()).collect()
    }

    fn reloaded(backend: &MemoryBlobStore) -> Vec<Task> {
        TaskStore::open(
            PersistenceAdapter::new(backend.clone()),
            StoreOptions::default(),
        )
        .export_snapshot()
    }

    #[test]
    fn blank_titles_are_rejected_without_side_effects() {
        let (backend, mut store) = open_memory();
        for title in ["", "   ", "\t\n"] {
            let err = store.add(title, TaskMeta::default()).unwrap_err();
            assert!(err.is_validation());
        }
        assert!(store.is_empty());
        assert_eq!(backend.write_count(), 0);
    }

    #[test]
    fn every_mutation_round_trips_through_storage() {
        let (backend, mut store) = open_memory();
        let a = store.add("A", TaskMeta::default()).unwrap();
        assert_eq!(reloaded(&backend), store.export_snapshot());

        let b = store.add("B", TaskMeta::default()).unwrap();
        store
            .update(
                a.id,
                &TaskPatch {
                    priority: Some(Some("high".to_string())),
                    ..TaskPatch::default()
                },
            )
            .unwrap();
        assert_eq!(reloaded(&backend), store.export_snapshot());

        store.toggle_status(b.id).unwrap();
        assert_eq!(reloaded(&backend), store.export_snapshot());

        store.reorder(b.id, Some(a.id)).unwrap();
        assert_eq!(reloaded(&backend), store.export_snapshot());

        store.remove(a.id).unwrap();
        assert_eq!(reloaded(&backend), store.export_snapshot());
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let (_, mut store) = open_memory();
        store.add("A", TaskMeta::default()).unwrap();
        let ghost = Uuid::new_v4();

        assert!(store.toggle_status(ghost).unwrap_err().is_not_found());
        assert!(store.remove(ghost).unwrap_err().is_not_found());
        assert!(store.reorder(ghost, None).unwrap_err().is_not_found());
        assert!(
            store
                .update(ghost, &TaskPatch::default())
                .unwrap_err()
                .is_not_found()
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn toggling_twice_restores_status() {
        let (_, mut store) = open_memory();
        let task = store.add("A", TaskMeta::default()).unwrap();
        assert_eq!(store.toggle_status(task.id).unwrap().status, Status::Done);
        assert_eq!(store.toggle_status(task.id).unwrap().status, Status::Pending);
        assert_eq!(store.get(task.id).map(|t| t.status), Some(Status::Pending));
    }

    #[test]
    fn reorder_moves_before_anchor_and_repeats_stably() {
        let (_, mut store) = open_memory();
        let a = store.add("A", TaskMeta::default()).unwrap();
        store.add("B", TaskMeta::default()).unwrap();
        let c = store.add("C", TaskMeta::default()).unwrap();

        store.reorder(c.id, Some(a.id)).unwrap();
        assert_eq!(titles(&store), vec!["C", "A", "B"]);
        store.reorder(c.id, Some(a.id)).unwrap();
        assert_eq!(titles(&store), vec!["C", "A", "B"]);
    }

    #[test]
    fn reorder_to_end_for_missing_or_unknown_anchor() {
        let (_, mut store) = open_memory();
        let a = store.add("A", TaskMeta::default()).unwrap();
        let b = store.add("B", TaskMeta::default()).unwrap();
        store.add("C", TaskMeta::default()).unwrap();

        store.reorder(a.id, None).unwrap();
        assert_eq!(titles(&store), vec!["B", "C", "A"]);
        store.reorder(b.id, Some(Uuid::new_v4())).unwrap();
        assert_eq!(titles(&store), vec!["C", "A", "B"]);
        store.reorder(a.id, Some(a.id)).unwrap();
        assert_eq!(titles(&store), vec!["C", "A", "B"]);
    }

    #[test]
    fn unchanged_reorder_still_writes() {
        let (backend, mut store) = open_memory();
        store.add("A", TaskMeta::default()).unwrap();
        let b = store.add("B", TaskMeta::default()).unwrap();
        let writes = backend.write_count();

        store.reorder(b.id, None).unwrap();
        assert_eq!(titles(&store), vec!["A", "B"]);
        assert!(backend.write_count() > writes);
    }

    #[test]
    fn clear_completed_writes_tasks_once() {
        let (backend, mut store) = open_memory();
        for title in ["A", "B", "C", "D"] {
            let task = store.add(title, TaskMeta::default()).unwrap();
            if title != "C" {
                store.toggle_status(task.id).unwrap();
            }
        }

        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        store.subscribe(move |event| sink.borrow_mut().push(event.clone()));

        let before = backend.write_count();
        assert_eq!(store.clear_completed().unwrap(), 3);
        // one write for the tasks blob, one for the activity entry
        assert_eq!(backend.write_count() - before, 2);
        assert_eq!(titles(&store), vec!["C"]);

        let events = events.borrow();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChangeKind::ClearedCompleted);
        assert_eq!(events[0].ids.len(), 3);

        drop(events);
        assert_eq!(store.clear_completed().unwrap(), 0);
    }

    #[test]
    fn failed_write_rolls_back_and_skips_notification() {
        let (backend, mut store) = open_memory();
        let a = store.add("A", TaskMeta::default()).unwrap();
        let before = store.export_snapshot();

        let fired = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&fired);
        store.subscribe(move |_| *counter.borrow_mut() += 1);

        backend.set_fail_writes(true);
        assert!(matches!(
            store.add("B", TaskMeta::default()),
            Err(StoreError::Persistence { .. })
        ));
        assert!(store.toggle_status(a.id).is_err());
        assert!(store.remove(a.id).is_err());

        assert_eq!(store.export_snapshot(), before);
        assert_eq!(*fired.borrow(), 0);

        backend.set_fail_writes(false);
        assert_eq!(reloaded(&backend), before);
    }

    #[test]
    fn every_mutation_rolls_back_when_the_write_fails() {
        let (backend, mut store) = open_memory();
        let a = store.add("A", TaskMeta::default()).unwrap();
        let b = store.add("B", TaskMeta::default()).unwrap();
        let c = store.add("C", TaskMeta::default()).unwrap();
        store.toggle_status(b.id).unwrap();
        let before = store.export_snapshot();
        let activity_before = store.activity().to_vec();

        let fired = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&fired);
        store.subscribe(move |_| *counter.borrow_mut() += 1);

        backend.set_fail_writes(true);
        let patch = TaskPatch {
            title: Some("renamed".to_string()),
            ..TaskPatch::default()
        };
        let results = [
            store.update(a.id, &patch).map(|_| ()),
            store.reorder(c.id, Some(a.id)),
            store.clear_completed().map(|_| ()),
            store
                .import_snapshot(vec![Task::new_pending(
                    "X".to_string(),
                    TaskMeta::default(),
                    Utc::now(),
                )]),
            store.import_document(r#"[{"title": "Y"}]"#).map(|_| ()),
        ];
        for result in results {
            assert!(matches!(result, Err(StoreError::Persistence { .. })));
        }

        assert_eq!(store.export_snapshot(), before);
        assert_eq!(store.activity(), activity_before.as_slice());
        assert_eq!(*fired.borrow(), 0);

        backend.set_fail_writes(false);
        assert_eq!(reloaded(&backend), before);
    }

    #[test]
    fn quota_exhaustion_leaves_the_store_untouched() {
        let backend = MemoryBlobStore::with_quota(1024);
        let mut store = TaskStore::open(
            PersistenceAdapter::new(backend.clone()),
            StoreOptions::default(),
        );
        store.add("A", TaskMeta::default()).unwrap();
        let before = store.export_snapshot();

        let fired = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&fired);
        store.subscribe(move |_| *counter.borrow_mut() += 1);

        let err = store.add(&"x".repeat(2048), TaskMeta::default()).unwrap_err();
        assert!(matches!(err, StoreError::Persistence { ref key, .. } if key == DEFAULT_TASKS_KEY));
        assert_eq!(store.export_snapshot(), before);
        assert_eq!(*fired.borrow(), 0);
        assert_eq!(reloaded(&backend), before);
    }

    #[test]
    fn rejected_activity_write_keeps_the_committed_change() {
        let (backend, mut store) = open_memory();
        store.add("A", TaskMeta::default()).unwrap();
        let activity_before = store.activity().to_vec();

        let fired = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&fired);
        store.subscribe(move |_| *counter.borrow_mut() += 1);

        backend.reject_key(Some(DEFAULT_ACTIVITY_KEY));
        let b = store.add("B", TaskMeta::default()).unwrap();

        assert_eq!(titles(&store), vec!["A", "B"]);
        assert_eq!(reloaded(&backend), store.export_snapshot());
        assert_eq!(store.activity(), activity_before.as_slice());
        assert_eq!(*fired.borrow(), 1);

        store.toggle_status(b.id).unwrap();
        assert_eq!(*fired.borrow(), 2);
    }

    #[test]
    fn import_type_errors_name_the_record() {
        let (_, mut store) = open_memory();
        store.add("Existing", TaskMeta::default()).unwrap();
        let before = store.export_snapshot();

        let bad_date = r#"{"tasks":[{"title":"a"},{"title":"b","createdAt":"yesterday"}]}"#;
        let err = store.import_document(bad_date).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("record 2"));

        let id = Uuid::new_v4();
        let bad_priority = format!(r#"[{{"title":"a"}},{{"id":"{id}","title":"b","priority":2}}]"#);
        let err = store.import_document(&bad_priority).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("record 2"));
        assert!(message.contains(&id.to_string()));

        let no_tasks = store.import_document(r#"{"activityLog":[]}"#).unwrap_err();
        assert!(no_tasks.is_validation());
        let malformed = store.import_document("{\"tasks\": [").unwrap_err();
        assert!(malformed.to_string().contains("line 1"));

        assert_eq!(store.export_snapshot(), before);
    }

    #[test]
    fn events_fire_after_the_write_is_visible() {
        let (backend, mut store) = open_memory();
        let observed = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&observed);
        let probe = backend.clone();
        store.subscribe(move |event| {
            let stored = probe.get(DEFAULT_TASKS_KEY).unwrap().unwrap_or_default();
            let durable = event.ids.iter().all(|id| stored.contains(&id.to_string()));
            sink.borrow_mut().push((event.kind, durable));
        });

        let task = store.add("A", TaskMeta::default()).unwrap();
        store.toggle_status(task.id).unwrap();

        assert_eq!(
            *observed.borrow(),
            vec![(ChangeKind::Added, true), (ChangeKind::Toggled, true)]
        );
    }

    #[test]
    fn export_is_independent_of_the_store() {
        let (_, mut store) = open_memory();
        store.add("A", TaskMeta::default()).unwrap();

        let mut copy = store.export_snapshot();
        copy[0].title = "changed".to_string();
        copy.clear();

        assert_eq!(titles(&store), vec!["A"]);
    }

    #[test]
    fn import_with_one_bad_record_changes_nothing() {
        let (_, mut store) = open_memory();
        store.add("Existing", TaskMeta::default()).unwrap();
        let before = store.export_snapshot();

        let now = Utc::now();
        let mut incoming: Vec<Task> = ["one", "two", "three"]
            .into_iter()
            .map(|t| Task::new_pending(t.to_string(), TaskMeta::default(), now))
            .collect();
        incoming[1].title = "  ".to_string();
        let bad_id = incoming[1].id;

        let err = store.import_snapshot(incoming).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("record 2"));
        assert!(message.contains(&bad_id.to_string()));
        assert_eq!(store.export_snapshot(), before);
    }

    #[test]
    fn import_rejects_duplicate_ids() {
        let (_, mut store) = open_memory();
        let task = Task::new_pending("one".to_string(), TaskMeta::default(), Utc::now());
        let err = store
            .import_snapshot(vec![task.clone(), task])
            .unwrap_err();
        assert!(err.to_string().contains("duplicate id"));
        assert!(store.is_empty());
    }

    #[test]
    fn stats_count_done_and_pending() {
        let (_, mut store) = open_memory();
        let a = store.add("A", TaskMeta::default()).unwrap();
        store.add("B", TaskMeta::default()).unwrap();
        store.toggle_status(a.id).unwrap();

        assert_eq!(
            store.stats(),
            Stats {
                total: 2,
                done: 1,
                pending: 1
            }
        );
    }

    #[test]
    fn activity_records_transitions_newest_first() {
        let (_, mut store) = open_memory();
        let task = store.add("Buy milk", TaskMeta::default()).unwrap();
        store.toggle_status(task.id).unwrap();
        store.remove(task.id).unwrap();

        let messages: Vec<&str> = store.activity().iter().map(|e| e.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "Task \"Buy milk\" deleted",
                "Task \"Buy milk\" marked as completed",
                "Task \"Buy milk\" added",
            ]
        );
    }
}
