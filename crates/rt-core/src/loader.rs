//! CSV loader for roll table files

use crate::arith::DiceArith;
use crate::diagnostic::{Diagnostic, DiagnosticSink};
use crate::directive::{build_namespace, is_comment_line, is_directive_line};
use crate::error::{Error, Result};
use crate::expression::{Origin, Value, REPLACE_CLOSE, REPLACE_OPEN};
use crate::table::{is_magic_field, RollRange, Row, Table, INDEX_FIELD, LINE_FIELD};
use std::path::Path;

/// Load the table file at `path`.
pub fn load_table<P: AsRef<Path>>(path: P, sink: &dyn DiagnosticSink) -> Result<Table> {
    let path = path.as_ref();
    let read_error = |source| Error::FileRead {
        path: path.to_path_buf(),
        source,
    };
    let path = path.canonicalize().map_err(read_error)?;
    let content = std::fs::read_to_string(&path).map_err(|source| Error::FileRead {
        path: path.clone(),
        source,
    })?;
    parse_table_str(&content, &path, sink)
}

/// Parse table file content. `path` is used for diagnostics and as the
/// base directory for includes.
pub fn parse_table_str(content: &str, path: &Path, sink: &dyn DiagnosticSink) -> Result<Table> {
    let mut directives = Vec::new();
    let mut data = String::with_capacity(content.len());
    // data line number (0-based) -> source line number (1-based)
    let mut line_map = Vec::new();

    // lines inside an open quoted field belong to that field, whatever they hold
    let mut in_quotes = false;
    for (i, line) in content.lines().enumerate() {
        let line_no = i + 1;
        if !in_quotes {
            if is_directive_line(line) {
                directives.push((line_no, line));
                continue;
            }
            if is_comment_line(line) || line.trim().is_empty() {
                continue;
            }
        }
        if line.matches('"').count() % 2 == 1 {
            in_quotes = !in_quotes;
        }
        data.push_str(line);
        data.push('\n');
        line_map.push(line_no);
    }

    let namespace = build_namespace(&directives, path, sink);
    let source_line = |data_line: u64| {
        (data_line as usize)
            .checked_sub(1)
            .and_then(|i| line_map.get(i))
            .copied()
            .unwrap_or(0)
    };

    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(data.as_bytes());

    let headers: Vec<String> = csv_reader
        .headers()
        .map_err(|e| Error::Csv {
            path: path.to_path_buf(),
            source: e,
        })?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    if headers.is_empty() || headers.iter().all(String::is_empty) {
        return Err(Error::CsvParse {
            path: path.to_path_buf(),
            message: "no columns found in CSV".to_string(),
        });
    }
    let header_line = line_map.first().copied().unwrap_or(0);

    // First header cell `${...}` marks a roll-range column
    let range_header = headers[0]
        .strip_prefix(REPLACE_OPEN)
        .and_then(|rest| rest.strip_suffix(REPLACE_CLOSE));
    let mut roll_range = match range_header {
        None => None,
        Some(body) => match DiceArith::parse(body) {
            Ok(expr) => Some(RollRange::new(expr)),
            Err(e) => {
                sink.emit(
                    Diagnostic::warning(format!(
                        "invalid roll range column '{}', {e}; rolling uniformly...",
                        headers[0]
                    ))
                    .at(path, header_line),
                );
                None
            }
        },
    };
    let has_range_column = range_header.is_some();

    // (column index, field name) of every kept column
    let mut columns: Vec<(usize, String)> = Vec::new();
    for (i, name) in headers.iter().enumerate() {
        if i == 0 && has_range_column {
            continue;
        }
        let reason = if is_magic_field(name) {
            Some("is reserved")
        } else if columns.iter().any(|(_, n)| n == name) {
            Some("is a duplicate")
        } else {
            None
        };
        match reason {
            Some(reason) => sink.emit(
                Diagnostic::warning(format!("field '{name}' {reason}; dropping column {}...", i + 1))
                    .at(path, header_line),
            ),
            None => columns.push((i, name.clone())),
        }
    }

    let mut rows = Vec::new();
    for result in csv_reader.records() {
        let record = result.map_err(|e| Error::Csv {
            path: path.to_path_buf(),
            source: e,
        })?;
        let line = record.position().map_or(0, |p| source_line(p.line()));
        let index = rows.len();

        if record.len() > headers.len() {
            sink.emit(
                Diagnostic::warning(format!(
                    "row has {} cells but only {} columns; truncating...",
                    record.len(),
                    headers.len()
                ))
                .at(path, line),
            );
        }

        if has_range_column {
            if let Some(range) = roll_range.as_mut() {
                let cell = record.get(0).unwrap_or("");
                if !register_range(range, cell, index, path, line, sink) {
                    roll_range = None;
                }
            }
        }

        let origin = Origin::new(path, line);
        let mut cells: Vec<(String, Value)> = columns
            .iter()
            .map(|(i, name)| {
                let raw = record.get(*i).unwrap_or("");
                (name.clone(), Value::parse(raw, &namespace, &origin, sink))
            })
            .collect();
        cells.push((INDEX_FIELD.to_string(), Value::Text(index.to_string())));
        cells.push((LINE_FIELD.to_string(), Value::Text(line.to_string())));
        rows.push(Row::new(cells));
    }

    let mut field_names: Vec<String> = columns.into_iter().map(|(_, name)| name).collect();
    field_names.push(INDEX_FIELD.to_string());
    field_names.push(LINE_FIELD.to_string());

    Ok(Table::new(
        path.to_path_buf(),
        field_names,
        rows,
        roll_range,
        namespace,
    ))
}

/// Register the range in `cell` for row `index`. Returns false if the cell
/// does not hold a valid range, which disables weighted rolling.
fn register_range(
    range: &mut RollRange,
    cell: &str,
    index: usize,
    path: &Path,
    line: usize,
    sink: &dyn DiagnosticSink,
) -> bool {
    let Some((lo, hi)) = parse_range(cell) else {
        sink.emit(
            Diagnostic::warning(format!(
                "invalid roll range '{}'; rolling uniformly for the whole table...",
                cell.trim()
            ))
            .at(path, line),
        );
        return false;
    };

    // runs of rolls already owned by earlier rows
    let mut taken: Vec<(i64, i64)> = Vec::new();
    for roll in lo..=hi {
        if range.insert(roll, index) {
            continue;
        }
        match taken.last_mut() {
            Some((_, end)) if *end + 1 == roll => *end = roll,
            _ => taken.push((roll, roll)),
        }
    }
    if !taken.is_empty() {
        let list = taken
            .iter()
            .map(|&(start, end)| {
                if start == end {
                    start.to_string()
                } else {
                    format!("{start}-{end}")
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        sink.emit(
            Diagnostic::warning(format!(
                "roll range '{}' overlaps earlier rows at {list}; keeping the earlier rows...",
                cell.trim()
            ))
            .at(path, line),
        );
    }
    true
}

/// Parse `N` or `N-M` (inclusive), ignoring whitespace.
pub fn parse_range(text: &str) -> Option<(i64, i64)> {
    let text: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if let Ok(n) = text.parse::<i64>() {
        return Some((n, n));
    }

    let skip = usize::from(text.starts_with('-'));
    let dash = text[skip..].find('-')? + skip;
    let lo = text[..dash].parse::<i64>().ok()?;
    let hi = text[dash + 1..].parse::<i64>().ok()?;
    (lo <= hi).then_some((lo, hi))
}
