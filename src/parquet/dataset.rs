//! Save a merged survey dataset to a parquet file.

use std::{fs::File, path::Path, sync::Arc};

use arrow::{
    array::{ArrayRef, Date32Array, Float64Array, StringArray, TimestampSecondArray},
    datatypes::{DataType, Field, Schema, TimeUnit},
    record_batch::RecordBatch,
};
use parquet::arrow::ArrowWriter;

use super::{arc, days_since_epoch, writer_properties};
use crate::{
    error::Result,
    spss::{self, Column, Dataset, Variable},
};

fn to_arrow(variable: &Variable, column: &Column) -> (DataType, ArrayRef) {
    match column {
        Column::Text(values) => (
            DataType::Utf8,
            arc(StringArray::from_iter_values(values.iter())),
        ),
        Column::Numeric(values) if variable.print.is_date() => (
            DataType::Date32,
            arc(Date32Array::from(
                values
                    .iter()
                    .map(|v| v.and_then(spss::to_date).map(days_since_epoch))
                    .collect::<Vec<_>>(),
            )),
        ),
        Column::Numeric(values) if variable.print.is_datetime() => (
            DataType::Timestamp(TimeUnit::Second, None),
            arc(TimestampSecondArray::from(
                values
                    .iter()
                    .map(|v| {
                        v.and_then(spss::to_datetime)
                            .map(|dt| dt.and_utc().timestamp())
                    })
                    .collect::<Vec<_>>(),
            )),
        ),
        Column::Numeric(values) => (DataType::Float64, arc(Float64Array::from(values.clone()))),
    }
}

/// One column per variable: text as `Utf8`, SPSS dates as `Date32`,
/// datetimes as second timestamps and everything else as `Float64`.
pub fn save_dataset(dataset: &Dataset, file_path: &Path) -> Result<()> {
    let (fields, columns): (Vec<Field>, Vec<ArrayRef>) = dataset
        .variables
        .iter()
        .zip(&dataset.columns)
        .map(|(variable, column)| {
            let (data_type, array) = to_arrow(variable, column);
            (Field::new(&variable.name, data_type, true), array)
        })
        .unzip();
    let schema = Arc::new(Schema::new(fields));

    let batch = RecordBatch::try_new(schema.clone(), columns)?;
    let file = File::create(file_path)?;
    let mut writer = ArrowWriter::try_new(file, schema, Some(writer_properties()))?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

// -- Tests -------------------------------------------------------------------
