use std::cell::RefCell;
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use std::rc::Rc;

use anyhow::{Context, anyhow, bail};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cli::{Command, build_patch};
use crate::filter::TaskQuery;
use crate::persistence::BlobStore;
use crate::render::Renderer;
use crate::store::{ChangeEvent, TaskStore};

/// Collects change notifications so the terminal view can redraw from the
/// store once a command has finished.
#[derive(Debug, Clone, Default)]
pub struct ChangeLog {
    events: Rc<RefCell<Vec<ChangeEvent>>>,
}

impl ChangeLog {
    pub fn attach<B: BlobStore>(store: &mut TaskStore<B>) -> Self {
        let log = Self::default();
        let sink = Rc::clone(&log.events);
        store.subscribe(move |event| {
            debug!(kind = ?event.kind, "change observed");
            sink.borrow_mut().push(event.clone());
        });
        log
    }

    pub fn drain(&self) -> Vec<ChangeEvent> {
        self.events.borrow_mut().drain(..).collect()
    }
}

pub fn dispatch<B: BlobStore>(
    store: &mut TaskStore<B>,
    changes: &ChangeLog,
    renderer: &Renderer,
    command: Command,
) -> anyhow::Result<()> {
    let mut out = io::stdout().lock();
    dispatch_to(store, changes, renderer, command, &mut out)
}

#[instrument(skip_all)]
pub fn dispatch_to<B: BlobStore, W: Write>(
    store: &mut TaskStore<B>,
    changes: &ChangeLog,
    renderer: &Renderer,
    command: Command,
    out: &mut W,
) -> anyhow::Result<()> {
    match command {
        Command::Add { title, meta } => {
            info!("command add");
            let title = title.join(" ");
            store
                .add(&title, meta.into_meta())
                .context("failed to add task")?;
        }
        Command::Edit {
            id,
            title,
            meta,
            clear_description,
            clear_due,
            clear_priority,
        } => {
            info!("command edit");
            let id = resolve_id(store, &id)?;
            let patch = build_patch(title, meta, clear_description, clear_due, clear_priority);
            if patch.is_empty() {
                bail!("edit needs at least one field to change");
            }
            let task = store
                .update(id, &patch)
                .with_context(|| format!("failed to edit task {id}"))?;
            renderer.task_detail(out, &task)?;
        }
        Command::Toggle { id } => {
            info!("command toggle");
            let id = resolve_id(store, &id)?;
            store
                .toggle_status(id)
                .with_context(|| format!("failed to toggle task {id}"))?;
        }
        Command::Delete { id } => {
            info!("command delete");
            let id = resolve_id(store, &id)?;
            store
                .remove(id)
                .with_context(|| format!("failed to delete task {id}"))?;
        }
        Command::ClearCompleted => {
            info!("command clear-completed");
            let removed = store
                .clear_completed()
                .context("failed to clear completed tasks")?;
            if removed == 0 {
                writeln!(out, "No completed tasks.")?;
            }
        }
        Command::Move { id, before } => {
            info!("command move");
            let id = resolve_id(store, &id)?;
            let anchor = before.as_deref().and_then(|raw| resolve_anchor(store, raw));
            store
                .reorder(id, anchor)
                .with_context(|| format!("failed to move task {id}"))?;
        }
        Command::List { status, search } => {
            info!("command list");
            let tasks = store.list(status, &TaskQuery::new(&search));
            renderer.task_table(out, &tasks)?;
        }
        Command::Stats => {
            info!("command stats");
            renderer.stats(out, store.stats())?;
        }
        Command::Log { limit } => {
            info!("command log");
            let entries = store.activity();
            let shown = limit.unwrap_or(entries.len()).min(entries.len());
            renderer.activity(out, &entries[..shown])?;
        }
        Command::Export { output } => {
            info!("command export");
            let text = serde_json::to_string_pretty(&store.export_document())
                .context("failed to serialize export document")?;
            match output {
                Some(path) => {
                    fs::write(&path, format!("{text}\n"))
                        .with_context(|| format!("failed writing {}", path.display()))?;
                    writeln!(
                        out,
                        "Exported {} task(s) to {}.",
                        store.len(),
                        path.display()
                    )?;
                }
                None => writeln!(out, "{text}")?,
            }
        }
        Command::Import { path } => {
            info!("command import");
            let text = read_import_source(&path)?;
            if text.trim().is_empty() {
                bail!("import: empty input");
            }
            store
                .import_document(&text)
                .with_context(|| format!("failed to import {}", path.display()))?;
        }
    }

    let events = changes.drain();
    if !events.is_empty() {
        renderer.changes(out, &events, store.stats())?;
    }
    Ok(())
}

/// Accepts a full id or any unique prefix of its hex form.
pub fn resolve_id<B: BlobStore>(store: &TaskStore<B>, raw: &str) -> anyhow::Result<Uuid> {
    let needle = raw.trim().to_ascii_lowercase();
    if needle.is_empty() {
        bail!("task id cannot be empty");
    }
    if let Ok(id) = Uuid::parse_str(&needle) {
        return Ok(id);
    }

    let compact = needle.replace('-', "");
    let mut matches = store
        .tasks()
        .iter()
        .map(|task| task.id)
        .filter(|id| id.simple().to_string().starts_with(&compact));

    let first = matches
        .next()
        .ok_or_else(|| anyhow!("no task matches id {raw:?}"))?;
    if matches.next().is_some() {
        bail!("id prefix {raw:?} is ambiguous");
    }
    Ok(first)
}

fn resolve_anchor<B: BlobStore>(store: &TaskStore<B>, raw: &str) -> Option<Uuid> {
    match resolve_id(store, raw) {
        Ok(id) => Some(id),
        Err(err) => {
            warn!(error = %err, "anchor not found; moving to end");
            None
        }
    }
}

fn read_import_source(path: &Path) -> anyhow::Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .context("failed reading stdin")?;
        return Ok(text);
    }
    fs::read_to_string(path).with_context(|| format!("failed reading {}", path.display()))
}
