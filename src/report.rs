//! Human-readable and JSON output for the CLI

use crate::error::{internal_error, AppResult};
use crate::models::{ChangeItem, ChangeLog, LogEntry, LogItemEntry, Severity};
use crate::source::CommitRef;
use serde::Serialize;
use std::fmt::Write;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn to_json<T: Serialize + ?Sized>(value: &T) -> AppResult<String> {
    serde_json::to_string_pretty(value).map_err(|e| internal_error(format!("JSON output: {}", e)))
}

pub fn branches(names: &[String]) -> String {
    names.iter().map(|n| format!("{}\n", n)).collect()
}

pub fn commits(history: &[CommitRef]) -> String {
    let mut out = String::new();
    for commit in history {
        let short = commit.id.get(..8).unwrap_or(&commit.id);
        let _ = writeln!(
            out,
            "{}  {}  {:<20}  {}",
            short,
            commit.time.format(TIME_FORMAT),
            commit.author,
            commit.summary()
        );
    }
    out
}

fn severity_label(severity: Severity) -> &'static str {
    match severity {
        Severity::None => "ok",
        Severity::Info => "info",
        Severity::Warning => "warning",
        Severity::Critical => "critical",
    }
}

fn item_status(item: &ChangeItem) -> String {
    if !item.apply.executed {
        return match &item.apply.error {
            Some(reason) => format!("skipped: {}", reason),
            None => "pending".to_string(),
        };
    }
    let outcome = item.apply.is_success();
    match (outcome.success, outcome.partial) {
        (true, _) => "applied".to_string(),
        (false, true) => "partially applied".to_string(),
        (false, false) => "failed".to_string(),
    }
}

/// Tree of bundles, items, validation steps and scopes
pub fn change_log(log: &ChangeLog, type_name: &dyn Fn(i64) -> String) -> String {
    let mut out = String::new();
    if log.is_empty() {
        out.push_str("No changes\n");
        return out;
    }

    for bundle in &log.bundles {
        let short = bundle.reference.hash.get(..8).unwrap_or(&bundle.reference.hash);
        let _ = writeln!(
            out,
            "{} {} ({} items{})",
            short,
            bundle.reference.message.lines().next().unwrap_or_default(),
            bundle.items.len(),
            if bundle.validated { ", validated" } else { "" }
        );

        for item in &bundle.items {
            let _ = writeln!(
                out,
                "  {} {} [{}] {}",
                type_name(item.object_type),
                item.spec.object.name,
                item.metadata.name,
                item_status(item)
            );

            for step in item.validation.steps.values() {
                let _ = write!(out, "    ~ {} {}", step.validator, severity_label(step.severity));
                if let Some(error) = &step.error {
                    let _ = write!(out, ": {}", error);
                }
                out.push('\n');
            }

            for scope in &item.apply.scopes {
                let effect = &scope.effect;
                let state = match (effect.executed, effect.success) {
                    (false, _) => "not run",
                    (true, true) => "ok",
                    (true, false) if effect.partial => "partial",
                    (true, false) => "failed",
                };
                let _ = writeln!(out, "    > {} ({})", scope.name, state);
                for statement in &scope.statements {
                    let _ = writeln!(out, "      {}", statement);
                }
                if let Some(error) = &effect.error {
                    let _ = writeln!(out, "      ! {}", error);
                }
            }
        }
    }
    out
}

/// Tracking entries, each followed by its item details
pub fn history(entries: &[(LogEntry, Vec<LogItemEntry>)]) -> String {
    let mut out = String::new();
    if entries.is_empty() {
        out.push_str("Tracking log is empty\n");
        return out;
    }

    for (entry, details) in entries {
        let _ = writeln!(
            out,
            "{}  {}  {}  {}/{} ok, {} failed{}{}  {}",
            entry.tracking_id.get(..8).unwrap_or(&entry.tracking_id),
            entry.end.format(TIME_FORMAT),
            entry.applied_by,
            entry.success,
            entry.total,
            entry.failed,
            if entry.completed { "" } else { ", incomplete" },
            if entry.fast_forward { ", fast-forward" } else { "" },
            entry.message
        );
        for detail in details {
            let state = match (detail.executed, detail.success, detail.partial) {
                (false, _, _) => "skipped",
                (true, true, _) => "ok",
                (true, false, true) => "partial",
                (true, false, false) => "failed",
            };
            let _ = writeln!(
                out,
                "  {} {} {} ({}) {}",
                detail.object_type, detail.object_name, detail.file, state, detail.message
            );
        }
    }
    out
}
