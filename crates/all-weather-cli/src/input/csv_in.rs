use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use all_weather_core::allocation::FinalTickerWeight;
use all_weather_core::ingestion::{PriceObservation, PriceSeries};
use all_weather_core::returns::{ReturnObservation, ReturnPanel};

type CsvResult<T> = Result<T, Box<dyn std::error::Error>>;

/// `<TICKER>.csv`: a date column followed by `adjusted_close`.
pub fn read_prices(path: &Path, ticker: &str) -> CsvResult<PriceSeries> {
    let file = open(path)?;
    parse_prices(file, ticker).map_err(|e| format!("{}: {}", path.display(), e).into())
}

/// Date-indexed return table: a date column, then one column per ticker.
pub fn read_return_panel(path: &Path) -> CsvResult<ReturnPanel> {
    let file = open(path)?;
    parse_return_panel(file).map_err(|e| format!("{}: {}", path.display(), e).into())
}

/// `final-ticker-weights.csv`: `ticker,weight` rows.
pub fn read_final_weights(path: &Path) -> CsvResult<Vec<FinalTickerWeight>> {
    let file = open(path)?;
    parse_final_weights(file).map_err(|e| format!("{}: {}", path.display(), e).into())
}

/// Single-column dated series, e.g. `benchmark-simple-returns.csv`.
pub fn read_return_series(path: &Path) -> CsvResult<Vec<ReturnObservation>> {
    let file = open(path)?;
    parse_return_series(file).map_err(|e| format!("{}: {}", path.display(), e).into())
}

pub fn parse_prices<R: Read>(reader: R, ticker: &str) -> CsvResult<PriceSeries> {
    let mut rdr = csv::Reader::from_reader(reader);
    let headers = rdr.headers()?.clone();
    let price_col = headers
        .iter()
        .position(|h| h.trim() == "adjusted_close")
        .ok_or("missing 'adjusted_close' column")?;

    let mut observations = Vec::new();
    for record in rdr.records() {
        let record = record?;
        observations.push(PriceObservation {
            date: parse_date(record.get(0).unwrap_or_default())?,
            adjusted_close: parse_decimal(record.get(price_col).unwrap_or_default())?,
        });
    }
    Ok(PriceSeries::new(ticker, observations)?)
}

pub fn parse_return_panel<R: Read>(reader: R) -> CsvResult<ReturnPanel> {
    let mut rdr = csv::Reader::from_reader(reader);
    let headers = rdr.headers()?.clone();
    let tickers: Vec<String> = headers.iter().skip(1).map(|h| h.trim().to_string()).collect();
    if tickers.is_empty() {
        return Err("expected a date column followed by at least one ticker column".into());
    }

    let mut dates = Vec::new();
    let mut columns: Vec<Vec<Decimal>> = vec![Vec::new(); tickers.len()];
    for record in rdr.records() {
        let record = record?;
        dates.push(parse_date(record.get(0).unwrap_or_default())?);
        for (k, column) in columns.iter_mut().enumerate() {
            column.push(parse_decimal(record.get(k + 1).unwrap_or_default())?);
        }
    }
    Ok(ReturnPanel::new(dates, tickers, columns)?)
}

pub fn parse_final_weights<R: Read>(reader: R) -> CsvResult<Vec<FinalTickerWeight>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let headers = rdr.headers()?.clone();
    let ticker_col = column(&headers, "ticker")?;
    let weight_col = column(&headers, "weight")?;

    let mut weights = Vec::new();
    for record in rdr.records() {
        let record = record?;
        weights.push(FinalTickerWeight {
            ticker: record.get(ticker_col).unwrap_or_default().trim().to_string(),
            weight: parse_decimal(record.get(weight_col).unwrap_or_default())?,
        });
    }
    Ok(weights)
}

pub fn parse_return_series<R: Read>(reader: R) -> CsvResult<Vec<ReturnObservation>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut series = Vec::new();
    for record in rdr.records() {
        let record = record?;
        series.push(ReturnObservation {
            date: parse_date(record.get(0).unwrap_or_default())?,
            value: parse_decimal(record.get(1).unwrap_or_default())?,
        });
    }
    Ok(series)
}

fn open(path: &Path) -> CsvResult<File> {
    let resolved = crate::input::file::resolve_path(path)?;
    File::open(&resolved).map_err(|e| format!("Failed to read '{}': {}", resolved.display(), e).into())
}

fn column(headers: &csv::StringRecord, name: &str) -> CsvResult<usize> {
    headers
        .iter()
        .position(|h| h.trim() == name)
        .ok_or_else(|| format!("missing '{}' column", name).into())
}

/// Accepts `YYYY-MM-DD`, optionally followed by a time component.
fn parse_date(raw: &str) -> CsvResult<NaiveDate> {
    let raw = raw.trim();
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .map_err(|e| format!("invalid date '{}': {}", raw, e).into())
}

fn parse_decimal(raw: &str) -> CsvResult<Decimal> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("missing value".into());
    }
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .map_err(|e| format!("invalid number '{}': {}", raw, e).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_prices() {
        let data = "date,adjusted_close\n2020-01-03,101.5\n2020-01-02 00:00:00,100\n";
        let series = parse_prices(data.as_bytes(), "SPY").unwrap();
        assert_eq!(series.ticker(), "SPY");
        assert_eq!(series.observations().len(), 2);
        // Sorted on load
        assert_eq!(series.observations()[0].adjusted_close, dec!(100));
    }

    #[test]
    fn test_parse_prices_duplicate_date() {
        let data = "date,adjusted_close\n2020-01-02,100\n2020-01-02,101\n";
        let err = parse_prices(data.as_bytes(), "SPY").unwrap_err();
        assert!(err.to_string().contains("Dirty data"));
    }

    #[test]
    fn test_parse_return_panel() {
        let data = "date,GLD,VTI\n2020-01-02,0.01,-0.002\n2020-01-03,1e-3,0.004\n";
        let panel = parse_return_panel(data.as_bytes()).unwrap();
        assert_eq!(panel.tickers(), &["GLD".to_string(), "VTI".to_string()]);
        assert_eq!(panel.column("GLD").unwrap()[1], dec!(0.001));
    }

    #[test]
    fn test_parse_final_weights() {
        let data = "ticker,weight\nGLD,0.25\nVTI,0.75\n";
        let weights = parse_final_weights(data.as_bytes()).unwrap();
        assert_eq!(weights.len(), 2);
        assert_eq!(weights[1].weight, dec!(0.75));
        assert!(parse_final_weights("name,w\nGLD,1\n".as_bytes()).is_err());
    }

    #[test]
    fn test_missing_value_rejected() {
        let data = "date,GLD\n2020-01-02,\n";
        assert!(parse_return_panel(data.as_bytes()).is_err());
    }
}
