use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::info;

use all_weather_core::returns::{ReturnObservation, ReturnPanel};

type WriteResult = Result<(), Box<dyn std::error::Error>>;

/// Write serialisable rows as a CSV table with a header row.
pub fn write_records<T: Serialize>(path: &Path, rows: &[T]) -> WriteResult {
    let mut wtr = csv::Writer::from_path(prepare(path)?)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    info!(path = %path.display(), rows = rows.len(), "wrote table");
    Ok(())
}

/// Write a return panel as `date,<ticker>...` rows.
pub fn write_panel(path: &Path, panel: &ReturnPanel) -> WriteResult {
    let mut wtr = csv::Writer::from_path(prepare(path)?)?;
    let mut header = vec!["date".to_string()];
    header.extend(panel.tickers().iter().cloned());
    wtr.write_record(&header)?;

    let columns = panel.select(panel.tickers())?;
    for (i, date) in panel.dates().iter().enumerate() {
        let mut row = Vec::with_capacity(columns.len() + 1);
        row.push(date.to_string());
        row.extend(columns.iter().map(|c| c[i].to_string()));
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    info!(path = %path.display(), rows = panel.len(), "wrote return panel");
    Ok(())
}

/// Write a dated series as `date,<name>` rows.
pub fn write_series(path: &Path, name: &str, series: &[ReturnObservation]) -> WriteResult {
    let mut wtr = csv::Writer::from_path(prepare(path)?)?;
    wtr.write_record(["date", name])?;
    for obs in series {
        wtr.write_record([obs.date.to_string(), obs.value.to_string()])?;
    }
    wtr.flush()?;
    info!(path = %path.display(), rows = series.len(), "wrote series");
    Ok(())
}

/// Create the parent directory if needed.
fn prepare(path: &Path) -> Result<&Path, Box<dyn std::error::Error>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create '{}': {}", parent.display(), e))?;
        }
    }
    Ok(path)
}
