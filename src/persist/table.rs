//! Three-header-row comma-separated tables.
//!
//! Layout:
//!
//! ```text
//! # meta name 1,meta name 2,...
//! # meta value 1,meta value 2,...
//! # column 1,column 2,...
//! value,value,...
//! ```
//!
//! Loading matches columns by name against the third header row. A column
//! the reader expects but the file lacks is filled with zeros of the right
//! type, so files written by older schemas stay loadable.
use crate::error::{DetectionError, Result};
use crate::image::io::ensure_parent_dir;
use log::{error, warn};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    Int,
    Float,
    Text,
    Bool,
}

/// One typed table value.
#[derive(Clone, Debug, PartialEq)]
pub enum Cell {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

impl Cell {
    pub fn zero(ty: ColumnType) -> Self {
        match ty {
            ColumnType::Int => Cell::Int(0),
            ColumnType::Float => Cell::Float(0.0),
            ColumnType::Text => Cell::Text(String::new()),
            ColumnType::Bool => Cell::Bool(false),
        }
    }

    pub fn parse(ty: ColumnType, raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let bad = |what: &str| DetectionError::Parse(format!("expected {what}, found {raw:?}"));
        Ok(match ty {
            ColumnType::Int => match raw.parse::<i64>() {
                Ok(v) => Cell::Int(v),
                Err(_) => {
                    let v = raw.parse::<f64>().map_err(|_| bad("an integer"))?;
                    if !v.is_finite() {
                        return Err(bad("an integer"));
                    }
                    Cell::Int(v as i64)
                }
            },
            ColumnType::Float => Cell::Float(raw.parse::<f64>().map_err(|_| bad("a number"))?),
            ColumnType::Text => Cell::Text(raw.to_string()),
            ColumnType::Bool => Cell::Bool(match raw {
                "True" | "true" | "1" => true,
                "False" | "false" | "0" | "" => false,
                _ => return Err(bad("a boolean")),
            }),
        })
    }

    /// Text form; floats use the shortest representation that parses back
    /// to the same value.
    pub fn render(&self) -> String {
        match self {
            Cell::Int(v) => v.to_string(),
            Cell::Float(v) => v.to_string(),
            Cell::Text(s) => s.replace([',', '\n', '\r'], ";"),
            Cell::Bool(true) => "True".into(),
            Cell::Bool(false) => "False".into(),
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            Cell::Int(v) => *v as f64,
            Cell::Float(v) => *v,
            Cell::Bool(b) => f64::from(u8::from(*b)),
            Cell::Text(s) => s.trim().parse().unwrap_or(0.0),
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            Cell::Int(v) => *v,
            other => other.as_f64() as i64,
        }
    }

    pub fn as_bool(&self) -> bool {
        match self {
            Cell::Bool(b) => *b,
            other => other.as_f64() != 0.0,
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            Cell::Text(s) => s.clone(),
            other => other.render(),
        }
    }
}

/// A row type with a fixed, ordered column schema.
pub trait TableRow: Sized {
    /// Column names and types, in file order.
    fn columns() -> &'static [(&'static str, ColumnType)];

    /// Values in [`TableRow::columns`] order.
    fn cells(&self) -> Vec<Cell>;

    /// Rebuild a row from values in [`TableRow::columns`] order.
    fn from_cells(cells: &[Cell]) -> Self;
}

/// First two header rows.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TableMeta {
    pub names: Vec<String>,
    pub values: Vec<String>,
}

impl TableMeta {
    pub fn new(pairs: &[(&str, String)]) -> Self {
        Self {
            names: pairs.iter().map(|(n, _)| n.to_string()).collect(),
            values: pairs.iter().map(|(_, v)| v.clone()).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        let i = self.names.iter().position(|n| n == name)?;
        self.values.get(i).map(String::as_str)
    }
}

/// Render `rows` with `meta` in the three-header-row layout.
pub fn render_table<R: TableRow>(meta: &TableMeta, rows: &[R]) -> String {
    let header = |items: &mut dyn Iterator<Item = String>| -> String {
        items
            .map(|s| s.replace([',', '\n', '\r'], ";"))
            .collect::<Vec<_>>()
            .join(",")
    };
    let mut out = String::new();
    let _ = writeln!(out, "# {}", header(&mut meta.names.iter().cloned()));
    let _ = writeln!(out, "# {}", header(&mut meta.values.iter().cloned()));
    let _ = writeln!(
        out,
        "# {}",
        header(&mut R::columns().iter().map(|(n, _)| n.to_string()))
    );
    for row in rows {
        let line: Vec<String> = row.cells().iter().map(Cell::render).collect();
        let _ = writeln!(out, "{}", line.join(","));
    }
    out
}

/// Write a table to `path`. Failures are logged and returned; the caller's
/// data is untouched so the save can be retried elsewhere.
pub fn write_table<R: TableRow>(path: &Path, meta: &TableMeta, rows: &[R]) -> Result<()> {
    let text = render_table(meta, rows);
    let written = ensure_parent_dir(path)
        .map_err(std::io::Error::other)
        .and_then(|_| fs::write(path, text));
    written.map_err(|source| {
        error!("write_table: failed to save {}: {source}", path.display());
        DetectionError::PersistenceDenied {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Parse a table, matching columns by name and zero-filling missing ones.
pub fn parse_table<R: TableRow>(text: &str) -> Result<(TableMeta, Vec<R>)> {
    let mut lines = text.lines();
    let mut head: [Vec<String>; 3] = Default::default();
    for slot in head.iter_mut() {
        let line = lines
            .next()
            .ok_or_else(|| DetectionError::Parse("table has fewer than three header rows".into()))?;
        let body = line
            .strip_prefix("# ")
            .or_else(|| line.strip_prefix('#'))
            .ok_or_else(|| DetectionError::Parse(format!("expected a '# ' header row, found {line:?}")))?;
        *slot = if body.is_empty() {
            Vec::new()
        } else {
            body.split(',').map(|s| s.trim().to_string()).collect()
        };
    }
    let [meta_names, meta_values, data_names] = head;

    let schema = R::columns();
    let positions: Vec<Option<usize>> = schema
        .iter()
        .map(|(name, _)| data_names.iter().position(|n| n == name))
        .collect();
    for ((name, _), pos) in schema.iter().zip(&positions) {
        if pos.is_none() {
            warn!("parse_table: column {name:?} missing, filling with zeros");
        }
    }

    let mut rows = Vec::new();
    for (lineno, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let raw: Vec<&str> = line.split(',').collect();
        let cells = schema
            .iter()
            .zip(&positions)
            .map(|(&(name, ty), pos)| match pos {
                Some(i) => {
                    let value = raw.get(*i).ok_or_else(|| {
                        DetectionError::Parse(format!("row {} lacks column {name:?}", lineno + 1))
                    })?;
                    Cell::parse(ty, value)
                }
                None => Ok(Cell::zero(ty)),
            })
            .collect::<Result<Vec<_>>>()?;
        rows.push(R::from_cells(&cells));
    }
    Ok((
        TableMeta {
            names: meta_names,
            values: meta_values,
        },
        rows,
    ))
}

/// Read a table from `path`.
pub fn read_table<R: TableRow>(path: &Path) -> Result<(TableMeta, Vec<R>)> {
    let text = fs::read_to_string(path).map_err(|source| DetectionError::PersistenceDenied {
        path: path.to_path_buf(),
        source,
    })?;
    parse_table(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Pair {
        id: i64,
        value: f64,
        ok: bool,
    }

    impl TableRow for Pair {
        fn columns() -> &'static [(&'static str, ColumnType)] {
            &[
                ("ID", ColumnType::Int),
                ("Value", ColumnType::Float),
                ("OK", ColumnType::Bool),
            ]
        }

        fn cells(&self) -> Vec<Cell> {
            vec![Cell::Int(self.id), Cell::Float(self.value), Cell::Bool(self.ok)]
        }

        fn from_cells(cells: &[Cell]) -> Self {
            Self {
                id: cells[0].as_i64(),
                value: cells[1].as_f64(),
                ok: cells[2].as_bool(),
            }
        }
    }

    #[test]
    fn layout_has_three_header_rows() {
        let meta = TableMeta::new(&[("Hist ID", "3".into())]);
        let text = render_table(
            &meta,
            &[Pair {
                id: 1,
                value: 0.1,
                ok: true,
            }],
        );
        assert_eq!(text, "# Hist ID\n# 3\n# ID,Value,OK\n1,0.1,True\n");
    }

    #[test]
    fn missing_columns_are_zero_filled_and_order_is_by_name() {
        let text = "# \n# \n# OK,ID\nTrue,4\nFalse,5\n";
        let (meta, rows) = parse_table::<Pair>(text).expect("valid table");
        assert!(meta.names.is_empty());
        assert_eq!(
            rows,
            vec![
                Pair {
                    id: 4,
                    value: 0.0,
                    ok: true
                },
                Pair {
                    id: 5,
                    value: 0.0,
                    ok: false
                }
            ]
        );
    }

    #[test]
    fn malformed_values_are_parse_errors() {
        let text = "# \n# \n# ID,Value,OK\n1,abc,True\n";
        assert!(matches!(
            parse_table::<Pair>(text),
            Err(DetectionError::Parse(_))
        ));
        assert!(parse_table::<Pair>("1,2,3\n").is_err());
    }

    #[test]
    fn unwritable_path_is_persistence_denied() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").expect("write blocker");
        let err = write_table::<Pair>(&blocker.join("sub").join("t.csv"), &TableMeta::default(), &[])
            .unwrap_err();
        assert!(matches!(err, DetectionError::PersistenceDenied { .. }));
    }
}
