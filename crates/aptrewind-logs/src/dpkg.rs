use aptrewind_core::{EventKind, PackageEvent, PackageKey, ParseWarning};
use chrono::NaiveDateTime;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// Lines dpkg writes for its own bookkeeping; they carry no package state
// transition we replay, so they are skipped without a warning.
const SILENT_ACTIONS: [&str; 3] = ["startup", "trigproc", "conffile"];
const SILENT_STATES: [&str; 2] = ["config-files", "not-installed"];

/// Parses the native dpkg.log status-change grammar: one event per line,
/// `DATE TIME action pkg:arch before after` for package operations and
/// `DATE TIME status STATE pkg:arch version` for configure bookkeeping.
/// Returns `(line number, event)` pairs in file order plus warnings for
/// lines matching no production.
pub fn parse_dpkg_log(
    text: &str,
    source: &str,
) -> (Vec<(usize, PackageEvent)>, Vec<ParseWarning>) {
    let mut events = Vec::new();
    let mut warnings = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let line_number = index + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match parse_line(trimmed) {
            LineOutcome::Event(event) => events.push((line_number, event)),
            LineOutcome::Skip => {}
            LineOutcome::Malformed(reason) => warnings.push(ParseWarning {
                source: source.to_string(),
                line_number,
                line: trimmed.to_string(),
                reason,
            }),
        }
    }

    (events, warnings)
}

enum LineOutcome {
    Event(PackageEvent),
    Skip,
    Malformed(String),
}

fn parse_line(line: &str) -> LineOutcome {
    let mut fields = line.splitn(4, ' ');
    let (Some(date), Some(time), Some(action), rest) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return LineOutcome::Malformed("expected 'DATE TIME action ...'".to_string());
    };

    let Ok(timestamp) = NaiveDateTime::parse_from_str(&format!("{date} {time}"), TIMESTAMP_FORMAT)
    else {
        return LineOutcome::Malformed(format!("unparseable timestamp '{date} {time}'"));
    };

    if SILENT_ACTIONS.contains(&action) {
        return LineOutcome::Skip;
    }

    let rest = rest.unwrap_or("");
    match action {
        "install" | "upgrade" | "remove" | "purge" => {
            parse_operation(timestamp, action, rest, line)
        }
        "status" => parse_status(timestamp, rest, line),
        _ => LineOutcome::Malformed(format!("unrecognized action '{action}'")),
    }
}

fn parse_operation(
    timestamp: NaiveDateTime,
    action: &str,
    rest: &str,
    raw: &str,
) -> LineOutcome {
    let mut fields = rest.split_whitespace();
    let (Some(package), Some(before), Some(after)) =
        (fields.next(), fields.next(), fields.next())
    else {
        return LineOutcome::Malformed(format!(
            "'{action}' line needs 'pkg:arch before after'"
        ));
    };

    let Some(key) = PackageKey::parse(package) else {
        return LineOutcome::Malformed(format!("'{package}' is not a pkg:arch token"));
    };

    let kind = match action {
        "install" => EventKind::Install,
        "upgrade" => EventKind::Upgrade,
        "remove" => EventKind::Remove,
        _ => EventKind::Purge,
    };

    LineOutcome::Event(PackageEvent {
        timestamp,
        key,
        kind,
        version_before: version_field(before),
        version_after: version_field(after),
        raw_status: raw.to_string(),
    })
}

fn parse_status(timestamp: NaiveDateTime, rest: &str, raw: &str) -> LineOutcome {
    let mut fields = rest.split_whitespace();
    let (Some(state), Some(package)) = (fields.next(), fields.next()) else {
        return LineOutcome::Malformed("'status' line needs 'STATE pkg:arch version'".to_string());
    };
    let version = fields.next();

    if SILENT_STATES.contains(&state) {
        return LineOutcome::Skip;
    }

    let Some(key) = PackageKey::parse(package) else {
        return LineOutcome::Malformed(format!("'{package}' is not a pkg:arch token"));
    };

    let kind = match state {
        "installed" => EventKind::ConfigureFull,
        "half-configured" | "half-installed" | "unpacked" => EventKind::ConfigureHalf,
        "triggers-pending" | "triggers-awaited" => EventKind::TriggersPending,
        _ => EventKind::Unknown,
    };

    LineOutcome::Event(PackageEvent {
        timestamp,
        key,
        kind,
        version_before: None,
        version_after: version.and_then(version_field),
        raw_status: raw.to_string(),
    })
}

fn version_field(token: &str) -> Option<String> {
    if token == "<none>" {
        None
    } else {
        Some(token.to_string())
    }
}
