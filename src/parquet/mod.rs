//! Handles serialising the pipeline's tables to and from the _parquet_ file format.

pub mod dataset;
pub mod measurements;
pub mod table;

use std::{fs::File, path::Path, sync::Arc};

use arrow::{
    array::{Array, ArrayRef, Date32Array, Float64Array, StringArray},
    compute::cast,
    datatypes::{DataType, SchemaRef},
    record_batch::RecordBatch,
};
use chrono::NaiveDate;
use parquet::{
    arrow::arrow_reader::ParquetRecordBatchReaderBuilder,
    basic::{Compression, ZstdLevel},
    file::properties::WriterProperties,
};

use crate::error::{Error, Result};

pub use dataset::save_dataset;
pub use measurements::{load_measurements, save_measurements};
pub use table::{load_table, save_table};

fn writer_properties() -> WriterProperties {
    WriterProperties::builder()
        .set_compression(Compression::ZSTD(ZstdLevel::default()))
        .set_dictionary_enabled(true)
        .build()
}

/// The file's schema, known even when it holds no rows, and its batches.
fn read_file(file_path: &Path) -> Result<(SchemaRef, Vec<RecordBatch>)> {
    let file = File::open(file_path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = builder.schema().clone();
    let batches = builder
        .build()?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok((schema, batches))
}

fn read_batches(file_path: &Path) -> Result<Vec<RecordBatch>> {
    Ok(read_file(file_path)?.1)
}

fn days_since_epoch(date: NaiveDate) -> i32 {
    (date - NaiveDate::default()).num_days() as i32
}

fn column_error(column: &str, file_path: &Path) -> Error {
    Error::Column {
        column: column.to_string(),
        path: file_path.to_path_buf(),
    }
}

/// A column of `batch` cast to `data_type`.
fn cast_column(
    batch: &RecordBatch,
    column: &str,
    data_type: &DataType,
    file_path: &Path,
) -> Result<ArrayRef> {
    let array = batch
        .column_by_name(column)
        .ok_or_else(|| column_error(column, file_path))?;
    cast(array, data_type).map_err(|_| column_error(column, file_path))
}

fn strings(batch: &RecordBatch, column: &str, file_path: &Path) -> Result<Vec<Option<String>>> {
    let array = cast_column(batch, column, &DataType::Utf8, file_path)?;
    let array = array
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| column_error(column, file_path))?;
    Ok(array.iter().map(|v| v.map(str::to_string)).collect())
}

fn numbers(batch: &RecordBatch, column: &str, file_path: &Path) -> Result<Vec<Option<f64>>> {
    let array = cast_column(batch, column, &DataType::Float64, file_path)?;
    let array = array
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| column_error(column, file_path))?;
    Ok(array.iter().collect())
}

fn dates(batch: &RecordBatch, column: &str, file_path: &Path) -> Result<Vec<Option<NaiveDate>>> {
    let array = cast_column(batch, column, &DataType::Date32, file_path)?;
    let array = array
        .as_any()
        .downcast_ref::<Date32Array>()
        .ok_or_else(|| column_error(column, file_path))?;
    Ok((0..array.len())
        .map(|i| {
            if array.is_null(i) {
                None
            } else {
                array.value_as_date(i)
            }
        })
        .collect())
}

fn arc<A: Array + 'static>(array: A) -> ArrayRef {
    Arc::new(array)
}
