use chrono::{NaiveDateTime, Timelike};
use std::borrow::Cow;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;

use crate::constants::{LAST_REVIEW_COLUMN, PRICE_COLUMN};
use crate::error::{CleaningError, Result};

/// One value of the table. Empty CSV fields load as `Null`.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Date(NaiveDateTime),
    Null,
}

impl Cell {
    pub fn from_field(field: &str) -> Self {
        if field.is_empty() {
            Cell::Null
        } else {
            Cell::Text(field.to_string())
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Dates at midnight render as `YYYY-MM-DD`, others with a time part.
    /// Sub-second precision is kept when present.
    pub fn render(&self) -> Cow<'_, str> {
        match self {
            Cell::Text(s) => Cow::Borrowed(s.as_str()),
            Cell::Date(dt) => {
                let time = dt.time();
                let fmt = if time.nanosecond() != 0 {
                    "%Y-%m-%d %H:%M:%S%.f"
                } else if time.num_seconds_from_midnight() != 0 {
                    "%Y-%m-%d %H:%M:%S"
                } else {
                    "%Y-%m-%d"
                };
                Cow::Owned(dt.format(fmt).to_string())
            }
            Cell::Null => Cow::Borrowed(""),
        }
    }
}

/// In-memory table: ordered column names and rows of cells aligned with them.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    columns: Vec<String>,
    index: HashMap<String, usize>,
    rows: Vec<Vec<Cell>>,
}

impl Dataset {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Result<Self> {
        if let Some(bad) = rows.iter().position(|r| r.len() != columns.len()) {
            return Err(CleaningError::Parse(format!(
                "row {} has {} fields, header has {}",
                bad + 1,
                rows[bad].len(),
                columns.len()
            )));
        }
        let mut index = HashMap::with_capacity(columns.len());
        for (i, c) in columns.iter().enumerate() {
            // first occurrence wins for duplicated headers
            index.entry(c.clone()).or_insert(i);
        }
        Ok(Self { columns, index, rows })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    /// Reads comma-separated text with a header row. The `price` and
    /// `last_review` columns must be present. Short rows are padded with
    /// nulls; a row longer than the header is a parse error.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers = reader.headers()?.clone();
        if headers.is_empty() || (headers.len() == 1 && headers[0].trim().is_empty()) {
            return Err(CleaningError::Parse("no columns to parse from file".to_string()));
        }
        let columns: Vec<String> = headers
            .iter()
            .enumerate()
            .map(|(i, h)| {
                // Strip a UTF-8 BOM from the first header
                if i == 0 {
                    h.trim_start_matches('\u{feff}').to_string()
                } else {
                    h.to_string()
                }
            })
            .collect();

        for required in [PRICE_COLUMN, LAST_REVIEW_COLUMN] {
            if !columns.iter().any(|c| c == required) {
                return Err(CleaningError::Parse(format!("missing required column '{}'", required)));
            }
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            if record.len() > columns.len() {
                let line = record.position().map_or(0, |p| p.line());
                return Err(CleaningError::Parse(format!(
                    "line {}: expected {} fields, saw {}",
                    line,
                    columns.len(),
                    record.len()
                )));
            }
            let mut row: Vec<Cell> = record.iter().map(Cell::from_field).collect();
            row.resize(columns.len(), Cell::Null);
            rows.push(row);
        }

        Self::new(columns, rows)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Cell> {
        let col = self.column_index(column)?;
        self.rows.get(row).map(|r| &r[col])
    }

    /// Values of one column, top to bottom.
    pub fn column(&self, name: &str) -> Option<impl Iterator<Item = &Cell> + '_> {
        let col = self.column_index(name)?;
        Some(self.rows.iter().map(move |r| &r[col]))
    }

    /// Keeps the rows whose mask entry is `true`.
    pub fn retain_rows(&mut self, mask: &[bool]) {
        debug_assert_eq!(mask.len(), self.rows.len());
        let mut keep = mask.iter();
        self.rows.retain(|_| *keep.next().unwrap_or(&false));
    }

    /// Applies `f` to every cell of `column`.
    pub fn map_column<F>(&mut self, column: &str, mut f: F) -> Result<()>
    where
        F: FnMut(&Cell) -> Cell,
    {
        let col = self
            .column_index(column)
            .ok_or_else(|| CleaningError::Parse(format!("missing required column '{}'", column)))?;
        for row in &mut self.rows {
            row[col] = f(&row[col]);
        }
        Ok(())
    }

    /// Writes a header row plus one line per row; no index column.
    pub fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(&self.columns)?;
        for row in &self.rows {
            wtr.write_record(row.iter().map(|c| c.render().into_owned()))?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        self.write_to(std::io::BufWriter::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const SAMPLE: &str = "id,name,price,last_review\n\
                          1,Cozy room,50,2019-05-21\n\
                          2,\"Loft, Brooklyn\",150,\n";

    #[test]
    fn loads_header_and_rows() {
        let ds = Dataset::from_reader(SAMPLE.as_bytes()).unwrap();
        assert_eq!(ds.columns(), &["id", "name", "price", "last_review"]);
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.get(1, "name"), Some(&Cell::Text("Loft, Brooklyn".to_string())));
        assert_eq!(ds.get(1, "last_review"), Some(&Cell::Null));
        assert_eq!(ds.get(0, "missing"), None);
    }

    #[test]
    fn missing_required_column_is_a_parse_error() {
        let err = Dataset::from_reader("id,price\n1,10\n".as_bytes()).unwrap_err();
        assert!(matches!(err, CleaningError::Parse(ref m) if m.contains("last_review")));
    }

    #[test]
    fn empty_input_is_a_parse_error() {
        assert!(matches!(Dataset::from_reader("".as_bytes()), Err(CleaningError::Parse(_))));
    }

    #[test]
    fn short_rows_are_padded_with_nulls() {
        let input = "id,price,last_review\n1,10,2019-01-01\n2,20\n";
        let ds = Dataset::from_reader(input.as_bytes()).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.get(1, "price"), Some(&Cell::Text("20".to_string())));
        assert_eq!(ds.get(1, "last_review"), Some(&Cell::Null));
    }

    #[test]
    fn long_rows_are_a_parse_error() {
        let input = "id,price,last_review\n1,10,2019-01-01\n2,20,2019-01-02,extra\n";
        let err = Dataset::from_reader(input.as_bytes()).unwrap_err();
        assert!(matches!(err, CleaningError::Parse(ref m) if m.contains("line 3")), "{:?}", err);
    }

    #[test]
    fn header_only_input_is_an_empty_dataset() {
        let ds = Dataset::from_reader("price,last_review\n".as_bytes()).unwrap();
        assert!(ds.is_empty());
        assert_eq!(ds.columns().len(), 2);
    }

    #[test]
    fn bom_is_stripped_from_first_header() {
        let ds = Dataset::from_reader("\u{feff}price,last_review\n1,\n".as_bytes()).unwrap();
        assert_eq!(ds.columns()[0], "price");
    }

    #[test]
    fn writes_without_index_and_quotes_when_needed() {
        let mut ds = Dataset::from_reader(SAMPLE.as_bytes()).unwrap();
        ds.map_column("last_review", |c| match c {
            Cell::Text(_) => {
                let day = NaiveDate::from_ymd_opt(2019, 5, 21).unwrap();
                Cell::Date(day.and_hms_opt(0, 0, 0).unwrap())
            }
            other => other.clone(),
        })
        .unwrap();

        let mut out = Vec::new();
        ds.write_to(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "id,name,price,last_review\n1,Cozy room,50,2019-05-21\n2,\"Loft, Brooklyn\",150,\n"
        );
    }

    #[test]
    fn date_with_time_renders_time() {
        let dt = NaiveDate::from_ymd_opt(2020, 1, 2).unwrap().and_hms_opt(13, 45, 0).unwrap();
        assert_eq!(Cell::Date(dt).render(), "2020-01-02 13:45:00");
    }

    #[test]
    fn fractional_seconds_survive_rendering() {
        let day = NaiveDate::from_ymd_opt(2019, 5, 21).unwrap();
        let dt = day.and_hms_milli_opt(18, 30, 0, 250).unwrap();
        assert_eq!(Cell::Date(dt).render(), "2019-05-21 18:30:00.250");

        let micros = day.and_hms_micro_opt(0, 0, 0, 1).unwrap();
        assert_eq!(Cell::Date(micros).render(), "2019-05-21 00:00:00.000001");
    }

    #[test]
    fn retain_rows_applies_mask() {
        let mut ds = Dataset::from_reader("price,last_review\n1,\n2,\n3,\n".as_bytes()).unwrap();
        ds.retain_rows(&[true, false, true]);
        let prices: Vec<_> = ds.column("price").unwrap().map(|c| c.render().into_owned()).collect();
        assert_eq!(prices, vec!["1", "3"]);
    }

    #[test]
    fn header_only_output_for_empty_dataset() {
        let ds = Dataset::new(vec!["price".into(), "last_review".into()], vec![]).unwrap();
        let mut out = Vec::new();
        ds.write_to(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "price,last_review\n");
    }
}
