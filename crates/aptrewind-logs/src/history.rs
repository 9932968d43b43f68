use aptrewind_core::{EventKind, PackageEvent, PackageKey, ParseWarning};
use chrono::NaiveDateTime;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parses the apt history.log transaction grammar. One logical entry spans
/// several lines: a block delimited by `Start-Date:`/`End-Date:` with action
/// lines like `Install: foo:amd64 (1.0), bar:amd64 (2.0, automatic)`.
/// Events carry the block's start timestamp. Blocks missing their `End-Date`
/// record an aborted transaction; their actions are not replayed (dpkg.log
/// holds whatever actually happened) and the block surfaces as a warning.
pub fn parse_apt_history(
    text: &str,
    source: &str,
) -> (Vec<(usize, PackageEvent)>, Vec<ParseWarning>) {
    let mut events = Vec::new();
    let mut warnings = Vec::new();
    let mut block = Block::default();

    for (index, line) in text.lines().enumerate() {
        let line_number = index + 1;
        let trimmed = line.trim();

        if trimmed.is_empty() {
            block.flush(source, &mut events, &mut warnings);
            continue;
        }

        let Some((field, value)) = trimmed.split_once(':') else {
            warnings.push(ParseWarning {
                source: source.to_string(),
                line_number,
                line: trimmed.to_string(),
                reason: "expected 'Field: value'".to_string(),
            });
            continue;
        };
        let value = value.trim();

        match field {
            "Start-Date" => {
                block.flush(source, &mut events, &mut warnings);
                match parse_block_timestamp(value) {
                    Some(timestamp) => block.start = Some((line_number, timestamp)),
                    None => warnings.push(ParseWarning {
                        source: source.to_string(),
                        line_number,
                        line: trimmed.to_string(),
                        reason: format!("unparseable Start-Date '{value}'"),
                    }),
                }
            }
            "End-Date" => {
                block.ended = true;
                block.flush(source, &mut events, &mut warnings);
            }
            "Install" | "Reinstall" | "Upgrade" | "Downgrade" | "Remove" | "Purge" => {
                block.actions.push(ActionLine {
                    line_number,
                    kind: match field {
                        "Install" | "Reinstall" => EventKind::Install,
                        "Upgrade" => EventKind::Upgrade,
                        "Downgrade" => EventKind::Downgrade,
                        "Remove" => EventKind::Remove,
                        _ => EventKind::Purge,
                    },
                    value: value.to_string(),
                });
            }
            // Commandline, Requested-By, Error and friends are block
            // metadata, not package transitions.
            _ => {}
        }
    }

    block.flush(source, &mut events, &mut warnings);
    (events, warnings)
}

#[derive(Debug, Default)]
struct Block {
    start: Option<(usize, NaiveDateTime)>,
    ended: bool,
    actions: Vec<ActionLine>,
}

#[derive(Debug)]
struct ActionLine {
    line_number: usize,
    kind: EventKind,
    value: String,
}

impl Block {
    fn flush(
        &mut self,
        source: &str,
        events: &mut Vec<(usize, PackageEvent)>,
        warnings: &mut Vec<ParseWarning>,
    ) {
        let block = std::mem::take(self);
        let Some((start_line, timestamp)) = block.start else {
            return;
        };

        if !block.ended {
            warnings.push(ParseWarning {
                source: source.to_string(),
                line_number: start_line,
                line: format!("Start-Date: {}", timestamp.format(TIMESTAMP_FORMAT)),
                reason: "transaction block has no End-Date (aborted?); skipped".to_string(),
            });
            return;
        }

        for action in block.actions {
            parse_action_line(&action, timestamp, source, events, warnings);
        }
    }
}

fn parse_action_line(
    action: &ActionLine,
    timestamp: NaiveDateTime,
    source: &str,
    events: &mut Vec<(usize, PackageEvent)>,
    warnings: &mut Vec<ParseWarning>,
) {
    for entry in split_entries(&action.value) {
        match parse_entry(&entry, action.kind, timestamp) {
            Some(event) => events.push((action.line_number, event)),
            None => warnings.push(ParseWarning {
                source: source.to_string(),
                line_number: action.line_number,
                line: entry,
                reason: "expected 'pkg:arch (versions)'".to_string(),
            }),
        }
    }
}

/// Splits `foo:amd64 (1.0), bar:amd64 (1.0, 2.0)` on the commas between
/// entries, not the ones inside parentheses.
fn split_entries(value: &str) -> Vec<String> {
    let mut entries = Vec::new();
    let mut depth = 0_u32;
    let mut current = String::new();

    for ch in value.chars() {
        match ch {
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            ',' if depth == 0 => {
                if !current.trim().is_empty() {
                    entries.push(current.trim().to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        entries.push(current.trim().to_string());
    }

    entries
}

fn parse_entry(entry: &str, kind: EventKind, timestamp: NaiveDateTime) -> Option<PackageEvent> {
    let (package, versions) = entry.split_once('(')?;
    let key = PackageKey::parse(package.trim())?;
    let versions = versions.strip_suffix(')')?;

    let parts: Vec<&str> = versions
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty() && *part != "automatic")
        .collect();

    let (version_before, version_after) = match (kind, parts.as_slice()) {
        (EventKind::Install, [version]) => (None, Some((*version).to_string())),
        (EventKind::Upgrade | EventKind::Downgrade, [from, to]) => {
            (Some((*from).to_string()), Some((*to).to_string()))
        }
        (EventKind::Remove | EventKind::Purge, [version]) => {
            (Some((*version).to_string()), None)
        }
        _ => return None,
    };

    Some(PackageEvent {
        timestamp,
        key,
        kind,
        version_before,
        version_after,
        raw_status: entry.to_string(),
    })
}

/// apt writes `Start-Date: 2024-01-15  10:23:40` with a doubled space;
/// normalize whitespace before parsing.
fn parse_block_timestamp(value: &str) -> Option<NaiveDateTime> {
    let normalized = value.split_whitespace().collect::<Vec<_>>().join(" ");
    NaiveDateTime::parse_from_str(&normalized, TIMESTAMP_FORMAT).ok()
}
