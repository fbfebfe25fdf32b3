//! Plain-text rendering of datasets, summaries and rows.

use std::fmt::Write;

use chemvis_core::models::{Dataset, DatasetRecord, DatasetSummary};
use chemvis_core::SessionInfo;

use crate::format::{bar, format_cell, format_measure, format_timestamp, truncate_string};

/// Widest a table column is allowed to get
const MAX_COLUMN_WIDTH: usize = 24;

/// Width of the type distribution bars at 100%
const BAR_WIDTH: usize = 30;

pub fn session_status(session: Option<&SessionInfo>, authenticated: bool) -> String {
    match session {
        Some(session) if authenticated => {
            let user = session
                .user_id()
                .map(|u| u.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            format!(
                "Logged in as user {} (session expires in {} min)",
                user,
                session.minutes_until_expiry()
            )
        }
        Some(_) => "Session expired - it will be renewed on the next request if possible".to_string(),
        None => "Not logged in".to_string(),
    }
}

pub fn dataset_list(datasets: &[Dataset]) -> String {
    if datasets.is_empty() {
        return "No datasets uploaded yet.\n".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(out, "{:>5}  {:<32}  {:<19}  {:>6}", "ID", "NAME", "UPLOADED", "ROWS");
    for dataset in datasets {
        let rows = dataset
            .summary
            .as_ref()
            .map(|s| s.total_count.to_string())
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{:>5}  {:<32}  {:<19}  {:>6}",
            dataset.id,
            truncate_string(&dataset.name, 32),
            format_timestamp(&dataset.uploaded_at),
            rows
        );
    }
    out
}

pub fn summary(dataset: &Dataset) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} (#{})", dataset.name, dataset.id);
    let _ = writeln!(out, "Uploaded {}", format_timestamp(&dataset.uploaded_at));

    let Some(summary) = dataset.summary.as_ref() else {
        let _ = writeln!(out, "No summary available.");
        return out;
    };
    write_summary(&mut out, summary);
    out
}

fn write_summary(out: &mut String, summary: &DatasetSummary) {
    let _ = writeln!(out, "\nTotal equipment count: {}", summary.total_count);
    let _ = writeln!(out, "Averages:");
    let _ = writeln!(out, "  Flowrate     {:>10}", format_measure(summary.averages.flowrate));
    let _ = writeln!(out, "  Pressure     {:>10}", format_measure(summary.averages.pressure));
    let _ = writeln!(out, "  Temperature  {:>10}", format_measure(summary.averages.temperature));

    let shares = summary.type_shares();
    if shares.is_empty() {
        return;
    }
    let _ = writeln!(out, "\nEquipment type distribution:");
    let label_width = shares.iter().map(|s| s.name.chars().count()).max().unwrap_or(0);
    for share in shares {
        let _ = writeln!(
            out,
            "  {:<width$}  {:>3}  {:>5.1}%  {}",
            share.name,
            share.count,
            share.percent,
            bar(share.percent, BAR_WIDTH),
            width = label_width
        );
    }
}

/// Render rows as a table, columns in the CSV's order (the first row's keys)
pub fn records(rows: &[DatasetRecord]) -> String {
    let Some(first) = rows.first() else {
        return "Dataset has no rows.\n".to_string();
    };
    let columns: Vec<&String> = first.keys().collect();

    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|c| truncate_string(&row.get(*c).map(format_cell).unwrap_or_default(), MAX_COLUMN_WIDTH))
                .collect()
        })
        .collect();

    let widths: Vec<usize> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| {
            cells
                .iter()
                .map(|r| r[i].chars().count())
                .chain(std::iter::once(c.chars().count().min(MAX_COLUMN_WIDTH)))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut out = String::new();
    let header: Vec<String> = columns
        .iter()
        .zip(&widths)
        .map(|(c, w)| format!("{:<w$}", truncate_string(c, MAX_COLUMN_WIDTH), w = *w))
        .collect();
    let _ = writeln!(out, "{}", header.join("  ").trim_end());
    for row in &cells {
        let line: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(cell, w)| format!("{:<w$}", cell, w = *w))
            .collect();
        let _ = writeln!(out, "{}", line.join("  ").trim_end());
    }
    out
}
