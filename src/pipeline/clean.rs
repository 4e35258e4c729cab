use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::constants::{LAST_REVIEW_COLUMN, PRICE_COLUMN};
use crate::error::{CleaningError, Result};
use super::dataset::{Cell, Dataset};

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%Y%m%d",
    "%d %B %Y",
    "%B %d, %Y",
    "%b %d, %Y",
];

/// Row counts produced by [`clean`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CleanStats {
    pub rows_read: usize,
    pub rows_kept: usize,
    pub dates_unparseable: usize,
}

impl CleanStats {
    pub fn rows_dropped(&self) -> usize {
        self.rows_read - self.rows_kept
    }
}

/// Parses a price field. Missing or non-numeric values yield `None`.
pub fn parse_price(cell: &Cell) -> Option<f64> {
    cell.as_text()?.trim().parse::<f64>().ok()
}

/// Inclusive on both ends. NaN never matches, and inverted bounds match nothing.
pub fn price_in_range(price: f64, min_price: f64, max_price: f64) -> bool {
    min_price <= price && price <= max_price
}

pub fn price_mask(dataset: &Dataset, min_price: f64, max_price: f64) -> Result<Vec<bool>> {
    let prices = dataset.column(PRICE_COLUMN).ok_or_else(|| {
        CleaningError::Parse(format!("missing required column '{}'", PRICE_COLUMN))
    })?;
    Ok(prices
        .map(|cell| parse_price(cell).map_or(false, |p| price_in_range(p, min_price, max_price)))
        .collect())
}

/// Parses a date-like string without any timezone conversion: offsets are
/// dropped and the wall-clock time is kept.
pub fn parse_review_date(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// Converts `last_review` to dates in place. Unparseable text becomes null.
/// Returns how many non-null values failed to parse.
pub fn normalize_review_dates(dataset: &mut Dataset) -> Result<usize> {
    let mut failures = 0usize;
    dataset.map_column(LAST_REVIEW_COLUMN, |cell| match cell {
        Cell::Text(s) => match parse_review_date(s) {
            Some(dt) => Cell::Date(dt),
            None => {
                failures += 1;
                Cell::Null
            }
        },
        other => other.clone(),
    })?;
    Ok(failures)
}

/// Drops rows with `price` outside `[min_price, max_price]`, then normalizes
/// `last_review`.
pub fn clean(dataset: &mut Dataset, min_price: f64, max_price: f64) -> Result<CleanStats> {
    let rows_read = dataset.len();
    let mask = price_mask(dataset, min_price, max_price)?;
    dataset.retain_rows(&mask);
    let dates_unparseable = normalize_review_dates(dataset)?;
    Ok(CleanStats {
        rows_read,
        rows_kept: dataset.len(),
        dates_unparseable,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    fn dataset(rows: &[(&str, &str)]) -> Dataset {
        let mut csv = String::from("id,price,last_review\n");
        for (i, (price, date)) in rows.iter().enumerate() {
            csv.push_str(&format!("{},{},{}\n", i, price, date));
        }
        Dataset::from_reader(csv.as_bytes()).unwrap()
    }

    fn prices(ds: &Dataset) -> Vec<String> {
        ds.column("price").unwrap().map(|c| c.render().into_owned()).collect()
    }

    #[test]
    fn keeps_rows_inside_inclusive_range() {
        let mut ds = dataset(&[
            ("10", "2019-01-01"),
            ("50", "2019-01-02"),
            ("100", "2019-01-03"),
            ("150", "2019-01-04"),
            ("500", "2019-01-05"),
        ]);
        let stats = clean(&mut ds, 50.0, 150.0).unwrap();
        assert_eq!(prices(&ds), vec!["50", "100", "150"]);
        assert_eq!(stats.rows_read, 5);
        assert_eq!(stats.rows_kept, 3);
        assert_eq!(stats.rows_dropped(), 2);
    }

    #[test]
    fn boundaries_are_kept() {
        assert!(price_in_range(10.0, 10.0, 350.0));
        assert!(price_in_range(350.0, 10.0, 350.0));
        assert!(!price_in_range(9.999, 10.0, 350.0));
        assert!(!price_in_range(350.001, 10.0, 350.0));
        assert!(price_in_range(42.0, 42.0, 42.0));
    }

    #[test]
    fn inverted_bounds_keep_nothing() {
        let mut ds = dataset(&[("10", ""), ("500", ""), ("1000", ""), ("0", "")]);
        let stats = clean(&mut ds, 1000.0, 0.0).unwrap();
        assert!(ds.is_empty());
        assert_eq!(stats.rows_kept, 0);
    }

    #[test]
    fn non_numeric_and_missing_prices_are_dropped() {
        let mut ds = dataset(&[
            ("abc", ""),
            ("", ""),
            ("NaN", ""),
            ("$75", ""),
            ("75.5", ""),
            (" 80 ", ""),
        ]);
        clean(&mut ds, 0.0, 1000.0).unwrap();
        assert_eq!(prices(&ds), vec!["75.5", " 80 "]);
    }

    #[test]
    fn every_retained_row_is_in_range() {
        let raw: Vec<String> = (0..200).map(|i| format!("{}", (i * 37) % 400)).collect();
        let rows: Vec<(&str, &str)> = raw.iter().map(|p| (p.as_str(), "")).collect();
        let mut ds = dataset(&rows);
        let stats = clean(&mut ds, 57.0, 243.0).unwrap();

        for cell in ds.column("price").unwrap() {
            let p = parse_price(cell).unwrap();
            assert!((57.0..=243.0).contains(&p));
        }
        let expected = raw
            .iter()
            .filter(|p| (57.0..=243.0).contains(&p.parse::<f64>().unwrap()))
            .count();
        assert_eq!(stats.rows_kept, expected);
    }

    #[test]
    fn valid_dates_keep_their_calendar_day() {
        for raw in [
            "2019-05-21",
            "2019/05/21",
            "05/21/2019",
            "2019-05-21 18:30:00",
            "2019-05-21T23:59:59+05:00",
        ] {
            let dt = parse_review_date(raw).unwrap_or_else(|| panic!("failed to parse {}", raw));
            assert_eq!((dt.year(), dt.month(), dt.day()), (2019, 5, 21), "{}", raw);
        }
    }

    #[test]
    fn review_times_keep_fractional_seconds() {
        let mut ds = dataset(&[("10", "2019-05-21 18:30:00.250"), ("20", "2019-05-22 07:00:00")]);
        clean(&mut ds, 0.0, 100.0).unwrap();
        let rendered: Vec<String> =
            ds.column("last_review").unwrap().map(|c| c.render().into_owned()).collect();
        assert_eq!(rendered, vec!["2019-05-21 18:30:00.250", "2019-05-22 07:00:00"]);
    }

    #[test]
    fn offsets_are_not_converted() {
        let dt = parse_review_date("2019-05-21T23:59:59+05:00").unwrap();
        assert_eq!(dt.hour(), 23);
    }

    #[test]
    fn unparseable_dates_become_null() {
        let mut ds = dataset(&[
            ("10", "2019-05-21"),
            ("20", "not a date"),
            ("30", ""),
            ("40", "2019-02-30"),
        ]);
        let stats = clean(&mut ds, 0.0, 100.0).unwrap();
        assert_eq!(stats.dates_unparseable, 2);

        let dates: Vec<Cell> = ds.column("last_review").unwrap().cloned().collect();
        assert!(matches!(dates[0], Cell::Date(_)));
        assert_eq!(dates[1], Cell::Null);
        assert_eq!(dates[2], Cell::Null);
        assert_eq!(dates[3], Cell::Null);
    }

    #[test]
    fn dates_of_dropped_rows_are_not_counted() {
        let mut ds = dataset(&[("10", "garbage"), ("2000", "garbage")]);
        let stats = clean(&mut ds, 0.0, 100.0).unwrap();
        assert_eq!(stats.dates_unparseable, 1);
    }
}
