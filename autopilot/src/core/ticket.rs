//! Manual tickets: work items pasted as free text instead of fetched from a tracker.

use anyhow::{Result, bail};

use crate::core::text::head_chars;
use crate::core::types::{WorkItem, WorkItemSource};

const MAX_TITLE_CHARS: usize = 200;

/// Parse pasted ticket text into a [`WorkItem`].
///
/// The title comes from the first `Title:`/`Subject:` line or markdown `# ` heading;
/// otherwise the first non-empty line. A `Labels:` line is split on commas.
/// Everything else becomes the body.
pub fn parse_manual_ticket(text: &str, number: u64) -> Result<WorkItem> {
    if text.trim().is_empty() {
        bail!("ticket text is empty");
    }
    let lines: Vec<&str> = text.lines().collect();

    let mut title_idx = None;
    let mut title = String::new();
    for (idx, line) in lines.iter().enumerate() {
        if let Some(rest) = strip_title_marker(line.trim()) {
            title_idx = Some(idx);
            title = rest.trim().to_string();
            break;
        }
    }
    if title_idx.is_none() {
        let Some((idx, line)) = lines.iter().enumerate().find(|(_, l)| !l.trim().is_empty())
        else {
            bail!("ticket text is empty");
        };
        title_idx = Some(idx);
        title = line.trim().to_string();
    }

    let mut labels = Vec::new();
    let mut body_lines = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        if Some(idx) == title_idx {
            continue;
        }
        if let Some(rest) = strip_prefix_ci(line.trim(), "labels:") {
            labels.extend(
                rest.split(',')
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string),
            );
            continue;
        }
        body_lines.push(*line);
    }

    let (title, _) = head_chars(&title, MAX_TITLE_CHARS);
    if title.is_empty() {
        bail!("ticket has no title");
    }
    Ok(WorkItem {
        number,
        title: title.to_string(),
        body: body_lines.join("\n").trim().to_string(),
        labels,
        source: WorkItemSource::Manual,
    })
}

/// Derive a short numeric ticket id from a millisecond timestamp.
pub fn ticket_number(timestamp_millis: i64) -> u64 {
    timestamp_millis.unsigned_abs() % 100_000
}

fn strip_title_marker(line: &str) -> Option<&str> {
    strip_prefix_ci(line, "title:")
        .or_else(|| strip_prefix_ci(line, "subject:"))
        .or_else(|| line.strip_prefix("# "))
}

fn strip_prefix_ci<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &line[prefix.len()..])
}
