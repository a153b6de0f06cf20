//! Parquet-backed position snapshots and price history

use super::memory::within_lookback;
use super::{PositionStore, PriceSnapshot, PriceSource};
use crate::model::PricePoint;
use crate::risk::{LoanPosition, LoanStatus};
use arrow::array::{
    Array, ArrayRef, Float64Array, StringArray, TimestampMicrosecondArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

fn timestamp_field(name: &str) -> Field {
    Field::new(
        name,
        DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
        false,
    )
}

/// Loan position schema. Decimals are stored as strings.
pub fn position_schema() -> Schema {
    Schema::new(vec![
        Field::new("offer_id", DataType::Utf8, false),
        Field::new("marketplace", DataType::Utf8, false),
        Field::new("collection", DataType::Utf8, false),
        Field::new("collection_address", DataType::Utf8, false),
        Field::new("loan_amount", DataType::Utf8, false),
        Field::new("apr", DataType::Utf8, false),
        Field::new("duration_days", DataType::UInt32, false),
        timestamp_field("start_date"),
        timestamp_field("end_date"),
        Field::new("collateral_floor_price", DataType::Utf8, false),
        Field::new("current_floor_price", DataType::Utf8, true),
        Field::new("status", DataType::Utf8, false),
        Field::new("liquidation_risk", DataType::Float64, false),
    ])
}

/// Price observation schema
pub fn price_schema() -> Schema {
    Schema::new(vec![
        timestamp_field("timestamp"),
        Field::new("collection", DataType::Utf8, false),
        Field::new("floor_price", DataType::Utf8, false),
        Field::new("top_bid", DataType::Utf8, true),
    ])
}

/// One price observation for a collection
#[derive(Debug, Clone, PartialEq)]
pub struct PriceRecord {
    pub timestamp: DateTime<Utc>,
    /// Collection slug
    pub collection: String,
    pub floor_price: Decimal,
    pub top_bid: Option<Decimal>,
}

impl PriceRecord {
    /// Snapshot of this observation, taking the floor as the bid when none was seen
    pub fn snapshot(&self) -> PriceSnapshot {
        PriceSnapshot::new(self.floor_price, self.top_bid.unwrap_or(self.floor_price))
    }
}

fn writer_props() -> WriterProperties {
    WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build()
}

fn write_batch(path: &Path, batch: RecordBatch) -> anyhow::Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)?;
        }
    }

    // Write then rename so readers never see a partial file
    let tmp = path.with_extension("parquet.tmp");
    let file = File::create(&tmp)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(writer_props()))?;
    writer.write(&batch)?;
    writer.close()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_batches(path: &Path) -> anyhow::Result<Vec<RecordBatch>> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch?);
    }
    Ok(batches)
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> anyhow::Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| anyhow::anyhow!("Invalid {} column", name))
}

fn timestamp(micros: i64) -> anyhow::Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| anyhow::anyhow!("Invalid timestamp"))
}

fn optional_decimal(array: &StringArray, i: usize) -> anyhow::Result<Option<Decimal>> {
    if array.is_null(i) {
        Ok(None)
    } else {
        Ok(Some(Decimal::from_str(array.value(i))?))
    }
}

/// Write a full position snapshot
pub fn write_positions(path: &Path, positions: &[LoanPosition]) -> anyhow::Result<()> {
    let strings = |f: fn(&LoanPosition) -> String| -> ArrayRef {
        Arc::new(StringArray::from(
            positions.iter().map(f).collect::<Vec<_>>(),
        ))
    };
    let timestamps = |f: fn(&LoanPosition) -> DateTime<Utc>| -> ArrayRef {
        Arc::new(
            TimestampMicrosecondArray::from(
                positions
                    .iter()
                    .map(|p| f(p).timestamp_micros())
                    .collect::<Vec<_>>(),
            )
            .with_timezone("UTC"),
        )
    };

    let batch = RecordBatch::try_new(
        Arc::new(position_schema()),
        vec![
            strings(|p| p.offer_id.clone()),
            strings(|p| p.marketplace.to_string()),
            strings(|p| p.collection.clone()),
            strings(|p| p.collection_address.clone()),
            strings(|p| p.loan_amount.to_string()),
            strings(|p| p.apr.to_string()),
            Arc::new(UInt32Array::from(
                positions.iter().map(|p| p.duration_days).collect::<Vec<_>>(),
            )),
            timestamps(|p| p.start_date),
            timestamps(|p| p.end_date),
            strings(|p| p.collateral_floor_price.to_string()),
            Arc::new(StringArray::from(
                positions
                    .iter()
                    .map(|p| p.current_floor_price.map(|f| f.to_string()))
                    .collect::<Vec<_>>(),
            )),
            strings(|p| p.status.to_string()),
            Arc::new(Float64Array::from(
                positions.iter().map(|p| p.liquidation_risk).collect::<Vec<_>>(),
            )),
        ],
    )?;

    write_batch(path, batch)?;
    tracing::debug!(path = ?path, count = positions.len(), "Wrote positions to Parquet");
    Ok(())
}

/// Read a position snapshot
pub fn read_positions(path: &Path) -> anyhow::Result<Vec<LoanPosition>> {
    let mut positions = Vec::new();

    for batch in read_batches(path)? {
        let offer_ids = column::<StringArray>(&batch, "offer_id")?;
        let marketplaces = column::<StringArray>(&batch, "marketplace")?;
        let collections = column::<StringArray>(&batch, "collection")?;
        let addresses = column::<StringArray>(&batch, "collection_address")?;
        let amounts = column::<StringArray>(&batch, "loan_amount")?;
        let aprs = column::<StringArray>(&batch, "apr")?;
        let durations = column::<UInt32Array>(&batch, "duration_days")?;
        let starts = column::<TimestampMicrosecondArray>(&batch, "start_date")?;
        let ends = column::<TimestampMicrosecondArray>(&batch, "end_date")?;
        let floors = column::<StringArray>(&batch, "collateral_floor_price")?;
        let current = column::<StringArray>(&batch, "current_floor_price")?;
        let statuses = column::<StringArray>(&batch, "status")?;
        let risks = column::<Float64Array>(&batch, "liquidation_risk")?;

        for i in 0..batch.num_rows() {
            positions.push(LoanPosition {
                offer_id: offer_ids.value(i).to_string(),
                marketplace: marketplaces.value(i).parse()?,
                collection: collections.value(i).to_string(),
                collection_address: addresses.value(i).to_string(),
                loan_amount: Decimal::from_str(amounts.value(i))?,
                apr: Decimal::from_str(aprs.value(i))?,
                duration_days: durations.value(i),
                start_date: timestamp(starts.value(i))?,
                end_date: timestamp(ends.value(i))?,
                collateral_floor_price: Decimal::from_str(floors.value(i))?,
                current_floor_price: optional_decimal(current, i)?,
                status: statuses.value(i).parse()?,
                liquidation_risk: risks.value(i),
            });
        }
    }

    Ok(positions)
}

/// Write price observations
pub fn write_price_records(path: &Path, records: &[PriceRecord]) -> anyhow::Result<()> {
    let batch = RecordBatch::try_new(
        Arc::new(price_schema()),
        vec![
            Arc::new(
                TimestampMicrosecondArray::from(
                    records
                        .iter()
                        .map(|r| r.timestamp.timestamp_micros())
                        .collect::<Vec<_>>(),
                )
                .with_timezone("UTC"),
            ) as ArrayRef,
            Arc::new(StringArray::from(
                records.iter().map(|r| r.collection.as_str()).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                records
                    .iter()
                    .map(|r| r.floor_price.to_string())
                    .collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                records
                    .iter()
                    .map(|r| r.top_bid.map(|b| b.to_string()))
                    .collect::<Vec<_>>(),
            )),
        ],
    )?;

    write_batch(path, batch)?;
    tracing::debug!(path = ?path, count = records.len(), "Wrote price records to Parquet");
    Ok(())
}

/// Read price observations
pub fn read_price_records(path: &Path) -> anyhow::Result<Vec<PriceRecord>> {
    let mut records = Vec::new();

    for batch in read_batches(path)? {
        let timestamps = column::<TimestampMicrosecondArray>(&batch, "timestamp")?;
        let collections = column::<StringArray>(&batch, "collection")?;
        let floors = column::<StringArray>(&batch, "floor_price")?;
        let bids = column::<StringArray>(&batch, "top_bid")?;

        for i in 0..batch.num_rows() {
            records.push(PriceRecord {
                timestamp: timestamp(timestamps.value(i))?,
                collection: collections.value(i).to_string(),
                floor_price: Decimal::from_str(floors.value(i))?,
                top_bid: optional_decimal(bids, i)?,
            });
        }
    }

    Ok(records)
}

/// Position store persisted as a single Parquet snapshot.
///
/// The snapshot is rewritten on every change.
pub struct ParquetPositionStore {
    path: PathBuf,
    positions: Mutex<HashMap<String, LoanPosition>>,
}

impl ParquetPositionStore {
    /// Open a store, loading the existing snapshot if there is one
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let positions = if path.exists() {
            read_positions(&path)?
                .into_iter()
                .map(|p| (p.offer_id.clone(), p))
                .collect()
        } else {
            HashMap::new()
        };

        tracing::info!(path = ?path, positions = positions.len(), "Opened position store");
        Ok(Self {
            path,
            positions: Mutex::new(positions),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, positions: &HashMap<String, LoanPosition>) -> anyhow::Result<()> {
        let mut snapshot: Vec<_> = positions.values().cloned().collect();
        snapshot.sort_by(|a, b| {
            a.start_date
                .cmp(&b.start_date)
                .then_with(|| a.offer_id.cmp(&b.offer_id))
        });
        write_positions(&self.path, &snapshot)
    }
}

#[async_trait]
impl PositionStore for ParquetPositionStore {
    async fn upsert(&self, position: &LoanPosition) -> anyhow::Result<()> {
        let mut positions = self.positions.lock().await;
        positions.insert(position.offer_id.clone(), position.clone());
        self.flush(&positions)
    }

    async fn update_status(&self, offer_id: &str, status: LoanStatus) -> anyhow::Result<()> {
        let mut positions = self.positions.lock().await;
        let position = positions
            .get_mut(offer_id)
            .ok_or_else(|| anyhow::anyhow!("No stored position {}", offer_id))?;
        position.status = status;
        self.flush(&positions)
    }

    async fn load_active(&self) -> anyhow::Result<Vec<LoanPosition>> {
        let positions = self.positions.lock().await;
        Ok(positions.values().filter(|p| p.is_active()).cloned().collect())
    }
}

/// Price source loaded from a Parquet file of observations
pub struct ParquetPriceSource {
    records: HashMap<String, Vec<PriceRecord>>,
}

impl ParquetPriceSource {
    /// Load every observation in the file
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let records = read_price_records(path.as_ref())?;
        tracing::info!(path = ?path.as_ref(), count = records.len(), "Loaded price history");
        Ok(Self::from_records(records))
    }

    pub fn from_records(records: Vec<PriceRecord>) -> Self {
        let mut by_collection: HashMap<String, Vec<PriceRecord>> = HashMap::new();
        for record in records {
            by_collection
                .entry(record.collection.clone())
                .or_default()
                .push(record);
        }
        for records in by_collection.values_mut() {
            records.sort_by_key(|r| r.timestamp);
        }
        Self {
            records: by_collection,
        }
    }

    /// Collections with at least one observation
    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    fn records(&self, slug: &str) -> anyhow::Result<&[PriceRecord]> {
        self.records
            .get(slug)
            .map(Vec::as_slice)
            .ok_or_else(|| anyhow::anyhow!("No price history for {}", slug))
    }
}

#[async_trait]
impl PriceSource for ParquetPriceSource {
    async fn latest(&self, slug: &str) -> anyhow::Result<PriceSnapshot> {
        self.records(slug)?
            .last()
            .map(PriceRecord::snapshot)
            .ok_or_else(|| anyhow::anyhow!("No price history for {}", slug))
    }

    async fn history(&self, slug: &str, lookback_days: u32) -> anyhow::Result<Vec<PricePoint>> {
        // Mid of the last observation each day
        let mut daily = BTreeMap::new();
        for record in self.records(slug)? {
            daily.insert(record.timestamp.date_naive(), record.snapshot().mid);
        }
        let history: Vec<_> = daily
            .into_iter()
            .map(|(date, price)| PricePoint::new(date, price))
            .collect();
        Ok(within_lookback(&history, lookback_days))
    }
}
