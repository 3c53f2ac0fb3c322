use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::Local;
use unicode_width::UnicodeWidthStr;

use crate::activity::{ActivityEntry, ActivityLevel};
use crate::config::Config;
use crate::store::{ChangeEvent, ChangeKind, Stats};
use crate::task::{Status, Task};

const SHORT_ID_LEN: usize = 8;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => io::stdout().is_terminal(),
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip(self, out, tasks))]
    pub fn task_table<W: Write>(&self, out: &mut W, tasks: &[Task]) -> anyhow::Result<()> {
        if tasks.is_empty() {
            writeln!(out, "No tasks.")?;
            return Ok(());
        }

        let headers = ["#", "ID", "Status", "Title", "Due", "Priority"]
            .map(String::from)
            .to_vec();

        let mut rows = Vec::with_capacity(tasks.len());
        for (position, task) in tasks.iter().enumerate() {
            let status = match task.status {
                Status::Done => self.paint("done", "32"),
                Status::Pending => self.paint("pending", "31"),
            };
            let title = if task.is_done() {
                self.paint(&task.title, "9")
            } else {
                task.title.clone()
            };

            rows.push(vec![
                (position + 1).to_string(),
                self.paint(&short_id(task), "33"),
                status,
                title,
                task.due_date.clone().unwrap_or_default(),
                task.priority.clone().unwrap_or_default(),
            ]);
        }

        write_table(out, headers, rows)
    }

    pub fn task_detail<W: Write>(&self, out: &mut W, task: &Task) -> anyhow::Result<()> {
        writeln!(out, "id          {}", task.id)?;
        writeln!(out, "title       {}", task.title)?;
        writeln!(out, "status      {}", task.status.label())?;
        if let Some(description) = &task.description {
            writeln!(out, "description {description}")?;
        }
        if let Some(due) = &task.due_date {
            writeln!(out, "due         {due}")?;
        }
        if let Some(priority) = &task.priority {
            writeln!(out, "priority    {priority}")?;
        }
        writeln!(
            out,
            "created     {}",
            task.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
        )?;
        if task.updated_at.is_some() {
            writeln!(
                out,
                "modified    {}",
                task.last_modified()
                    .with_timezone(&Local)
                    .format("%Y-%m-%d %H:%M")
            )?;
        }
        Ok(())
    }

    pub fn stats<W: Write>(&self, out: &mut W, stats: Stats) -> anyhow::Result<()> {
        let pct = if stats.total == 0 {
            0
        } else {
            stats.done * 100 / stats.total
        };
        writeln!(out, "Total    {}", stats.total)?;
        writeln!(out, "Done     {}", self.paint(&stats.done.to_string(), "32"))?;
        writeln!(out, "Pending  {}", self.paint(&stats.pending.to_string(), "31"))?;
        writeln!(out, "Progress {} {pct}%", progress_bar(stats, 20))?;
        Ok(())
    }

    pub fn activity<W: Write>(
        &self,
        out: &mut W,
        entries: &[ActivityEntry],
    ) -> anyhow::Result<()> {
        if entries.is_empty() {
            writeln!(out, "No activity yet.")?;
            return Ok(());
        }
        for entry in entries {
            let line = entry.display_line();
            match entry.level {
                ActivityLevel::Info => writeln!(out, "{line}")?,
                ActivityLevel::Warning => writeln!(out, "{}", self.paint(&line, "33"))?,
            }
        }
        Ok(())
    }

    /// One confirmation line per committed change, followed by fresh counts.
    pub fn changes<W: Write>(
        &self,
        out: &mut W,
        events: &[ChangeEvent],
        stats: Stats,
    ) -> anyhow::Result<()> {
        for event in events {
            let count = event.ids.len();
            let line = match event.kind {
                ChangeKind::Added => format!("Created task {}.", short_ids(event)),
                ChangeKind::Updated => format!("Modified task {}.", short_ids(event)),
                ChangeKind::Toggled => format!("Toggled task {}.", short_ids(event)),
                ChangeKind::Removed => format!("Deleted task {}.", short_ids(event)),
                ChangeKind::ClearedCompleted => format!("Cleared {count} completed task(s)."),
                ChangeKind::Reordered => format!("Moved task {}.", short_ids(event)),
                ChangeKind::Imported => format!("Imported {count} task(s)."),
            };
            writeln!(out, "{line}")?;
        }
        writeln!(
            out,
            "{} task(s): {} done, {} pending",
            stats.total, stats.done, stats.pending
        )?;
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

pub fn short_id(task: &Task) -> String {
    task.id.simple().to_string()[..SHORT_ID_LEN].to_string()
}

fn short_ids(event: &ChangeEvent) -> String {
    event
        .ids
        .iter()
        .map(|id| id.simple().to_string()[..SHORT_ID_LEN].to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn progress_bar(stats: Stats, width: usize) -> String {
    let filled = if stats.total == 0 {
        0
    } else {
        stats.done * width / stats.total
    };
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}

fn write_table<W: Write>(
    writer: &mut W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for idx in 0..column_count {
        write!(writer, "{:-<width$} ", "", width = widths[idx])?;
    }
    writeln!(writer)?;

    for row in rows {
        for idx in 0..column_count {
            let cell = &row[idx];
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
