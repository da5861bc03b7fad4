use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;

use chrono::NaiveDateTime;
use logwarden_common::{Event, LogwardenError, LogwardenResult};
use tracing::{info, warn};

/// Timestamp layout inside the brackets of a common/combined log line.
pub const TIMESTAMP_FORMAT: &str = "%d/%b/%Y:%H:%M:%S";

/// Events of one log, grouped per key in log order.
#[derive(Debug, Default)]
pub struct ParsedLog {
    pub events: BTreeMap<String, Vec<Event>>,
    pub skipped_lines: usize,
}

impl ParsedLog {
    pub fn total_events(&self) -> usize {
        self.events.values().map(Vec::len).sum()
    }
}

/// Parse one access-log line into an event.
///
/// Expected layout (common/combined log format):
///
/// ```text
/// 10.0.0.1 - - [10/Oct/2023:13:55:36 +0000] "GET /login HTTP/1.1" 200 512
/// ```
///
/// The key is the client address, the tag is the request path. The zone
/// offset is ignored; timestamps are compared as local log time.
pub fn parse_line(line: &str, line_num: usize) -> LogwardenResult<Event> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let parse_err = |message: String| LogwardenError::Parse {
        line: line_num,
        message,
    };

    if fields.len() < 7 {
        return Err(parse_err(format!(
            "expected at least 7 fields, found {}",
            fields.len()
        )));
    }

    let raw_ts = fields[3]
        .strip_prefix('[')
        .ok_or_else(|| parse_err(format!("timestamp must start with '[': {}", fields[3])))?;
    let timestamp = NaiveDateTime::parse_from_str(raw_ts, TIMESTAMP_FORMAT)
        .map_err(|e| parse_err(format!("bad timestamp '{raw_ts}': {e}")))?;

    Ok(Event::new(fields[0], timestamp, fields[6]))
}

/// Read every line of `reader`, skipping (and logging) lines that fail to
/// parse. Only I/O errors abort the read.
///
/// Lines are read as bytes; invalid UTF-8 (raw bytes in a path or user
/// agent) is replaced with U+FFFD rather than failing the read.
pub fn parse_reader<R: BufRead>(mut reader: R) -> LogwardenResult<ParsedLog> {
    let mut parsed = ParsedLog::default();
    let mut buf = Vec::new();
    let mut line_num = 0;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        line_num += 1;

        let line = String::from_utf8_lossy(&buf);
        if line.trim().is_empty() {
            continue;
        }

        match parse_line(&line, line_num) {
            Ok(event) => parsed
                .events
                .entry(event.key.clone())
                .or_default()
                .push(event),
            Err(e) => {
                warn!(error = %e, "skipping unparseable line");
                parsed.skipped_lines += 1;
            }
        }
    }

    Ok(parsed)
}

/// Parse the log file at `path`.
pub fn parse_file(path: &Path) -> LogwardenResult<ParsedLog> {
    let file = std::fs::File::open(path).map_err(|e| {
        LogwardenError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open {}: {}", path.display(), e),
        ))
    })?;
    let parsed = parse_reader(std::io::BufReader::new(file))?;
    info!(
        path = %path.display(),
        keys = parsed.events.len(),
        events = parsed.total_events(),
        skipped = parsed.skipped_lines,
        "parsed access log"
    );
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::Cursor;

    #[test]
    fn parses_combined_log_line() {
        let line = r#"83.149.9.216 - - [17/May/2015:10:05:03 +0000] "GET /login HTTP/1.1" 200 203023 "-" "Mozilla/5.0""#;
        let event = parse_line(line, 1).unwrap();
        assert_eq!(event.key, "83.149.9.216");
        assert_eq!(event.tag, "/login");
        assert_eq!(
            event.timestamp,
            NaiveDate::from_ymd_opt(2015, 5, 17)
                .unwrap()
                .and_hms_opt(10, 5, 3)
                .unwrap()
        );
    }

    #[test]
    fn rejects_short_line() {
        let err = parse_line("10.0.0.1 - -", 4).unwrap_err();
        assert!(matches!(err, LogwardenError::Parse { line: 4, .. }));
    }

    #[test]
    fn rejects_bad_timestamp() {
        let line = r#"10.0.0.1 - - [99/Foo/2015:10:05:03 +0000] "GET / HTTP/1.1" 200 1"#;
        assert!(parse_line(line, 1).is_err());

        let line = r#"10.0.0.1 - - 17/May/2015:10:05:03 +0000] "GET / HTTP/1.1" 200 1"#;
        assert!(parse_line(line, 1).is_err());
    }

    #[test]
    fn groups_by_key_in_log_order() {
        let log = "\
10.0.0.1 - - [17/May/2015:10:05:03 +0000] \"GET /a HTTP/1.1\" 200 1
10.0.0.2 - - [17/May/2015:10:05:04 +0000] \"GET /b HTTP/1.1\" 200 1
garbage line
10.0.0.1 - - [17/May/2015:10:05:05 +0000] \"POST /login HTTP/1.1\" 302 1

10.0.0.1 - - [bad] \"GET /c HTTP/1.1\" 200 1
";
        let parsed = parse_reader(Cursor::new(log)).unwrap();
        assert_eq!(parsed.skipped_lines, 2);
        assert_eq!(parsed.events.len(), 2);
        assert_eq!(parsed.total_events(), 3);

        let tags: Vec<_> = parsed.events["10.0.0.1"].iter().map(|e| e.tag.as_str()).collect();
        assert_eq!(tags, ["/a", "/login"]);
    }

    #[test]
    fn invalid_utf8_does_not_abort_parse() {
        let mut log = Vec::new();
        log.extend_from_slice(b"10.0.0.1 - - [17/May/2015:10:05:03 +0000] \"GET /a HTTP/1.1\" 200 1\n");
        log.extend_from_slice(b"10.0.0.1 - - [17/May/2015:10:05:04 +0000] \"GET /\xff\xfe HTTP/1.1\" 200 1\n");
        log.extend_from_slice(b"\xff\xff\n");
        log.extend_from_slice(b"10.0.0.2 - - [17/May/2015:10:05:05 +0000] \"GET /b HTTP/1.1\" 200 1\n");

        let parsed = parse_reader(Cursor::new(log)).unwrap();
        assert_eq!(parsed.total_events(), 3);
        assert_eq!(parsed.skipped_lines, 1);
        assert_eq!(parsed.events["10.0.0.1"][1].tag, "/\u{FFFD}\u{FFFD}");
        assert_eq!(parsed.events["10.0.0.2"][0].tag, "/b");
    }

    #[test]
    fn last_line_without_newline_is_parsed() {
        let log = "10.0.0.1 - - [17/May/2015:10:05:03 +0000] \"GET /a HTTP/1.1\" 200 1";
        let parsed = parse_reader(Cursor::new(log)).unwrap();
        assert_eq!(parsed.total_events(), 1);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(parse_file(Path::new("/nonexistent/access.log")).is_err());
    }
}
