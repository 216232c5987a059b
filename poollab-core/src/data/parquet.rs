//! Parquet price directory with Hive-style partitioning.
//!
//! Layout: `{dir}/symbol={SYMBOL}/*.parquet`, each file holding a `date`
//! (Date) column and a `close` (f64) column. Files are merged, sorted and
//! deduplicated on load. Writes are atomic (write `.tmp`, rename).

use chrono::NaiveDate;
use polars::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

use super::provider::{normalize_series, trim_to_period, DataError, PricePoint, PriceSource};
use crate::period::Period;

pub struct ParquetPriceSource {
    dir: PathBuf,
}

impl ParquetPriceSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn symbol_dir(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("symbol={symbol}"))
    }

    /// Write a full series for `symbol` as `prices.parquet`.
    pub fn write(&self, symbol: &str, points: &[PricePoint]) -> Result<PathBuf, DataError> {
        let sym_dir = self.symbol_dir(&symbol.to_ascii_uppercase());
        fs::create_dir_all(&sym_dir)
            .map_err(|e| DataError::ParquetError(format!("create dir {}: {e}", sym_dir.display())))?;

        let mut df = points_to_dataframe(points)?;
        let path = sym_dir.join("prices.parquet");
        let tmp_path = path.with_extension("parquet.tmp");
        let file = fs::File::create(&tmp_path)
            .map_err(|e| DataError::ParquetError(format!("create file: {e}")))?;
        ParquetWriter::new(file)
            .finish(&mut df)
            .map_err(|e| DataError::ParquetError(format!("write parquet: {e}")))?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            DataError::ParquetError(format!("atomic rename failed: {e}"))
        })?;
        Ok(path)
    }

    fn load(&self, symbol: &str) -> Result<Vec<PricePoint>, DataError> {
        let sym_dir = self.symbol_dir(symbol);
        if !sym_dir.exists() {
            return Err(DataError::InstrumentNotFound {
                instrument: symbol.to_string(),
            });
        }

        let entries = fs::read_dir(&sym_dir)
            .map_err(|e| DataError::ParquetError(format!("read dir {}: {e}", sym_dir.display())))?;
        let mut points = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| DataError::ParquetError(format!("dir entry: {e}")))?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
                continue;
            }
            points.extend(read_parquet(&path)?);
        }
        Ok(normalize_series(points))
    }
}

impl PriceSource for ParquetPriceSource {
    fn name(&self) -> &str {
        "parquet"
    }

    fn get_price_series(
        &self,
        instrument: &str,
        period: &Period,
    ) -> Result<Vec<PricePoint>, DataError> {
        let points = self.load(&instrument.to_ascii_uppercase())?;
        Ok(trim_to_period(points, period))
    }
}

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or(NaiveDate::MIN)
}

fn points_to_dataframe(points: &[PricePoint]) -> Result<DataFrame, DataError> {
    let dates: Vec<i32> = points
        .iter()
        .map(|p| (p.date - epoch()).num_days() as i32)
        .collect();
    let closes: Vec<f64> = points.iter().map(|p| p.price).collect();

    DataFrame::new(vec![
        Column::new("date".into(), dates)
            .cast(&DataType::Date)
            .map_err(|e| DataError::ParquetError(format!("date cast: {e}")))?,
        Column::new("close".into(), closes),
    ])
    .map_err(|e| DataError::ParquetError(format!("dataframe creation: {e}")))
}

fn read_parquet(path: &Path) -> Result<Vec<PricePoint>, DataError> {
    let file = fs::File::open(path).map_err(|e| DataError::ParquetError(format!("open: {e}")))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| DataError::ParquetError(format!("read {}: {e}", path.display())))?;

    let map_err = |e: PolarsError| DataError::ParquetError(format!("{}: {e}", path.display()));
    let dates = df.column("date").map_err(map_err)?;
    let closes = df.column("close").map_err(map_err)?;
    let date_ca = dates.date().map_err(map_err)?;
    let close_ca = closes.f64().map_err(map_err)?;

    let epoch = epoch();
    let mut points = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let (Some(days), Some(close)) = (date_ca.get(i), close_ca.get(i)) else {
            continue;
        };
        points.push(PricePoint::new(
            epoch + chrono::Duration::days(i64::from(days)),
            close,
        ));
    }
    Ok(points)
}
