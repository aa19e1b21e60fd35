//! Output formats for rolled rows

use rt_core::Row;
use std::cmp::Ordering;

const HISTOGRAM_WIDTH: usize = 100;
const PIP: char = '*';
const PIPLET: char = '.';

fn cell<'a>(row: &'a Row<String>, field: &str) -> &'a str {
    row.get(field).map(String::as_str).unwrap_or("")
}

/// One value per line for a single field, otherwise right-aligned
/// `name: value` lines with a blank line between rolls.
pub fn default_output(rows: &[Row<String>], fields: &[String]) -> String {
    let width = fields.iter().map(|f| f.chars().count()).max().unwrap_or(0);
    let mut lines = Vec::new();
    for row in rows {
        if fields.len() == 1 {
            lines.push(cell(row, &fields[0]).to_string());
            continue;
        }
        for field in fields {
            lines.push(format!("{field:>width$}: {}", cell(row, field)));
        }
        lines.push(String::new());
    }
    lines.join("\n")
}

/// Fixed-width columns, or a Markdown table when `markdown` is set.
pub fn columnated_output(rows: &[Row<String>], fields: &[String], markdown: bool) -> String {
    let mut table = vec![fields.to_vec()];
    table.extend(
        rows.iter()
            .map(|row| fields.iter().map(|f| cell(row, f).to_string()).collect()),
    );
    columnate(&table, markdown)
}

/// Lay out `table` (header row first) in aligned columns.
pub fn columnate(table: &[Vec<String>], markdown: bool) -> String {
    let columns = table.iter().map(Vec::len).max().unwrap_or(0);
    let mut widths = vec![0; columns];
    for row in table {
        for (i, value) in row.iter().enumerate() {
            widths[i] = widths[i].max(value.chars().count());
        }
    }
    if markdown {
        for width in &mut widths {
            *width = (*width).max(3);
        }
    }

    let render = |row: &[String]| {
        let cells: Vec<String> = (0..columns)
            .map(|i| {
                let value = row.get(i).map(String::as_str).unwrap_or("");
                format!("{value:<width$}", width = widths[i])
            })
            .collect();
        if markdown {
            format!("| {} |", cells.join(" | "))
        } else {
            cells.join("  ").trim_end().to_string()
        }
    };

    let mut lines = Vec::with_capacity(table.len() + 1);
    for (i, row) in table.iter().enumerate() {
        lines.push(render(row));
        if i == 0 {
            let rules: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
            lines.push(if markdown {
                format!("| {} |", rules.join(" | "))
            } else {
                rules.join("  ")
            });
        }
    }
    lines.join("\n")
}

/// A histogram of the values of each field.
pub fn histogram_output(rows: &[Row<String>], fields: &[String]) -> String {
    let mut lines = Vec::new();
    for field in fields {
        let mut counts: Vec<(String, usize)> = Vec::new();
        for row in rows {
            let value = cell(row, field);
            match counts.iter_mut().find(|(key, _)| key == value) {
                Some((_, count)) => *count += 1,
                None => counts.push((value.to_string(), 1)),
            }
        }

        let numeric = counts.iter().all(|(key, _)| key.trim().parse::<f64>().is_ok());
        if numeric {
            counts.sort_by(|(a, _), (b, _)| {
                let a = a.trim().parse::<f64>().unwrap_or(f64::NAN);
                let b = b.trim().parse::<f64>().unwrap_or(f64::NAN);
                a.partial_cmp(&b).unwrap_or(Ordering::Equal)
            });
        } else {
            counts.sort_by(|(_, a), (_, b)| b.cmp(a));
        }

        lines.push(format!("Field: {field}"));
        lines.push(histogram_str(&counts, HISTOGRAM_WIDTH));
        if fields.len() > 1 {
            lines.push(String::new());
        }
    }
    lines.join("\n")
}

/// Text histogram of `(key, count)` pairs in the given order, with a
/// `* = N` legend. Counts too small for one pip get a single `.`.
pub fn histogram_str(counts: &[(String, usize)], max_width: usize) -> String {
    let left_width = counts.iter().map(|(key, _)| key.chars().count()).max().unwrap_or(0) + 2;
    let right_width = max_width.saturating_sub(left_width).max(1);
    let max_count = counts.iter().map(|(_, count)| *count).max().unwrap_or(0);
    let pip_value = (max_count / right_width).max(1);

    let mut lines = vec![format!("{PIP} = {pip_value}")];
    for (key, count) in counts {
        let pips = (*count as f64 / pip_value as f64).round() as usize;
        let bar = if pips > 0 {
            PIP.to_string().repeat(pips)
        } else if *count > 0 {
            PIPLET.to_string()
        } else {
            String::new()
        };
        lines.push(format!("{key:>left_width$}: {bar}"));
    }
    lines.join("\n")
}

/// Rolled rows as a pretty JSON array, limited to `fields`.
pub fn json_output(rows: &[Row<String>], fields: &[String]) -> serde_json::Result<String> {
    let objects: Vec<serde_json::Map<String, serde_json::Value>> = rows
        .iter()
        .map(|row| {
            fields
                .iter()
                .map(|f| (f.clone(), serde_json::Value::String(cell(row, f).to_string())))
                .collect()
        })
        .collect();
    serde_json::to_string_pretty(&objects)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> Row<String> {
        Row::new(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_default_single_field() {
        let rows = vec![row(&[("name", "Alice")]), row(&[("name", "Bob")])];
        assert_eq!(default_output(&rows, &fields(&["name"])), "Alice\nBob");
    }

    #[test]
    fn test_default_multiple_fields() {
        let rows = vec![row(&[("name", "Alice"), ("hp", "7")])];
        assert_eq!(default_output(&rows, &fields(&["name", "hp"])), "name: Alice\n  hp: 7\n");
    }

    #[test]
    fn test_columnate_plain() {
        let rows = vec![row(&[("name", "Alice"), ("hp", "7")])];
        let out = columnated_output(&rows, &fields(&["name", "hp"]), false);
        assert_eq!(out, "name   hp\n-----  --\nAlice  7");
    }

    #[test]
    fn test_columnate_markdown() {
        let rows = vec![row(&[("name", "Alice"), ("hp", "7")])];
        let out = columnated_output(&rows, &fields(&["name", "hp"]), true);
        assert_eq!(out, "| name  | hp  |\n| ----- | --- |\n| Alice | 7   |");
    }

    #[test]
    fn test_histogram_numeric_sorted_by_key() {
        let rows: Vec<_> = ["10", "2", "2", "3"].iter().map(|v| row(&[("roll", *v)])).collect();
        let out = histogram_output(&rows, &fields(&["roll"]));
        assert_eq!(out, "Field: roll\n* = 1\n   2: **\n   3: *\n  10: *");
    }

    #[test]
    fn test_histogram_text_sorted_by_count() {
        let rows: Vec<_> = ["Orc", "Troll", "Troll"].iter().map(|v| row(&[("name", *v)])).collect();
        let out = histogram_output(&rows, &fields(&["name"]));
        assert_eq!(out, "Field: name\n* = 1\n  Troll: **\n    Orc: *");
    }

    #[test]
    fn test_histogram_piplet() {
        let counts = vec![("a".to_string(), 1000), ("b".to_string(), 1)];
        let out = histogram_str(&counts, 20);
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines[0], "* = 58");
        assert_eq!(lines[2], "  b: .");
    }

    #[test]
    fn test_json_output_selects_fields() {
        let rows = vec![row(&[("name", "Alice"), ("hp", "7")])];
        let out = json_output(&rows, &fields(&["hp"])).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed, serde_json::json!([{ "hp": "7" }]));
    }
}
