//! Save and load the collated EEA station measurements.

use std::{fs::File, path::Path, sync::Arc};

use arrow::{
    array::{ArrayRef, Float64Array, StringArray},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use parquet::arrow::ArrowWriter;

use super::{arc, column_error, numbers, read_batches, strings, writer_properties};
use crate::{
    cli::create_progress_bar,
    eea::{api::parse_timestamp, StationMeasurement},
    error::Result,
};

const CHUNK_SIZE: usize = 100_000;

fn schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("region", DataType::Utf8, false),
        Field::new("AirQualityStation", DataType::Utf8, false),
        Field::new("AirPollutant", DataType::Utf8, false),
        Field::new("DatetimeBegin", DataType::Utf8, false),
        Field::new("DatetimeEnd", DataType::Utf8, false),
        Field::new("Concentration", DataType::Float64, true),
    ]))
}

/// Timestamps are kept as RFC 3339 text so the original UTC offsets survive.
pub fn save_measurements(measurements: &[StationMeasurement], file_path: &Path) -> Result<()> {
    let schema = schema();
    let file = File::create(file_path)?;
    let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(writer_properties()))?;
    let pb = create_progress_bar(measurements.len() as u64, "Writing parquet file".to_string());

    for chunk in measurements.chunks(CHUNK_SIZE) {
        let columns: Vec<ArrayRef> = vec![
            arc(StringArray::from_iter_values(chunk.iter().map(|m| m.region.as_str()))),
            arc(StringArray::from_iter_values(chunk.iter().map(|m| m.station.as_str()))),
            arc(StringArray::from_iter_values(chunk.iter().map(|m| m.pollutant.as_str()))),
            arc(StringArray::from_iter_values(chunk.iter().map(|m| m.begin.to_rfc3339()))),
            arc(StringArray::from_iter_values(chunk.iter().map(|m| m.end.to_rfc3339()))),
            arc(Float64Array::from(
                chunk.iter().map(|m| m.concentration).collect::<Vec<_>>(),
            )),
        ];
        writer.write(&RecordBatch::try_new(schema.clone(), columns)?)?;
        pb.inc(chunk.len() as u64);
    }

    pb.finish_with_message("Finished writing Parquet file");
    writer.close()?;
    Ok(())
}

pub fn load_measurements(file_path: &Path) -> Result<Vec<StationMeasurement>> {
    let mut measurements = Vec::new();
    for batch in read_batches(file_path)? {
        let regions = strings(&batch, "region", file_path)?;
        let stations = strings(&batch, "AirQualityStation", file_path)?;
        let pollutants = strings(&batch, "AirPollutant", file_path)?;
        let begins = strings(&batch, "DatetimeBegin", file_path)?;
        let ends = strings(&batch, "DatetimeEnd", file_path)?;
        let concentrations = numbers(&batch, "Concentration", file_path)?;

        for row in 0..batch.num_rows() {
            let text = |column: &[Option<String>], name: &str| {
                column[row].clone().ok_or_else(|| column_error(name, file_path))
            };
            measurements.push(StationMeasurement {
                region: text(&regions, "region")?,
                station: text(&stations, "AirQualityStation")?,
                pollutant: text(&pollutants, "AirPollutant")?,
                begin: parse_timestamp("DatetimeBegin", &text(&begins, "DatetimeBegin")?)?,
                end: parse_timestamp("DatetimeEnd", &text(&ends, "DatetimeEnd")?)?,
                concentration: concentrations[row],
            });
        }
    }
    Ok(measurements)
}

// -- Tests -------------------------------------------------------------------
