//! Save and load the region/date tables of the preparers.

use std::{fs::File, path::Path, sync::Arc};

use arrow::{
    array::{ArrayRef, Date32Array, Float64Array, StringArray},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use log::debug;
use parquet::arrow::ArrowWriter;

use super::{
    arc, column_error, dates, days_since_epoch, numbers, read_file, strings, writer_properties,
};
use crate::{
    error::Result,
    table::{AggregatedRecord, AggregatedTable, Variable},
};

/// Writes `date`, `region` and one nullable `Float64` column per variable.
pub fn save_table(table: &AggregatedTable, file_path: &Path) -> Result<()> {
    let mut fields = vec![
        Field::new("date", DataType::Date32, false),
        Field::new("region", DataType::Utf8, false),
    ];
    fields.extend(
        table
            .variables
            .iter()
            .map(|v| Field::new(&v.name, DataType::Float64, true)),
    );
    let schema = Arc::new(Schema::new(fields));

    let mut columns: Vec<ArrayRef> = vec![
        arc(Date32Array::from(
            table
                .records
                .iter()
                .map(|r| days_since_epoch(r.date))
                .collect::<Vec<_>>(),
        )),
        arc(StringArray::from(
            table
                .records
                .iter()
                .map(|r| r.region.as_str())
                .collect::<Vec<_>>(),
        )),
    ];
    for i in 0..table.variables.len() {
        columns.push(arc(Float64Array::from(
            table.records.iter().map(|r| r.values[i]).collect::<Vec<_>>(),
        )));
    }

    let batch = RecordBatch::try_new(schema.clone(), columns)?;
    let file = File::create(file_path)?;
    let mut writer = ArrowWriter::try_new(file, schema, Some(writer_properties()))?;
    writer.write(&batch)?;
    writer.close()?;

    debug!("Wrote {} rows to {}", table.records.len(), file_path.display());
    Ok(())
}

/// Reads a table written by [`save_table`]. Every column besides `date` and
/// `region` is a value column; integer columns are read as floats.
pub fn load_table(file_path: &Path) -> Result<AggregatedTable> {
    let (schema, batches) = read_file(file_path)?;
    let mut table = AggregatedTable::new(
        schema
            .fields()
            .iter()
            .map(|f| f.name().as_str())
            .filter(|name| *name != "date" && *name != "region")
            .map(Variable::named)
            .collect(),
    );

    for batch in &batches {
        let date_column = dates(batch, "date", file_path)?;
        let region_column = strings(batch, "region", file_path)?;
        let values = table
            .variables
            .iter()
            .map(|v| numbers(batch, &v.name, file_path))
            .collect::<Result<Vec<_>>>()?;

        for (row, (date, region)) in date_column.into_iter().zip(region_column).enumerate() {
            let (Some(date), Some(region)) = (date, region) else {
                return Err(column_error("date/region", file_path));
            };
            table.records.push(AggregatedRecord {
                region,
                date,
                values: values.iter().map(|column| column[row]).collect(),
            });
        }
    }

    Ok(table)
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    #[test]
    fn should_save_and_load_table() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("eea-regions.parquet");
        let mut table =
            AggregatedTable::new(vec![Variable::named("aqiwd"), Variable::named("ndyprw")]);
        table.records = vec![
            AggregatedRecord {
                region: "AT13".to_string(),
                date: NaiveDate::from_ymd_opt(2016, 1, 1).unwrap(),
                values: vec![Some(2.0), None],
            },
            AggregatedRecord {
                region: "UKI".to_string(),
                date: NaiveDate::from_ymd_opt(1969, 12, 31).unwrap(),
                values: vec![None, Some(7.0)],
            },
        ];

        save_table(&table, &path).unwrap();
        let loaded = load_table(&path).unwrap();

        assert_eq!(loaded, table);
    }

    #[test]
    fn should_report_missing_date_column() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.parquet");
        let schema = Arc::new(Schema::new(vec![Field::new("region", DataType::Utf8, false)]));
        let batch =
            RecordBatch::try_new(schema.clone(), vec![arc(StringArray::from(vec!["AT13"]))])
                .unwrap();
        let mut writer = ArrowWriter::try_new(File::create(&path).unwrap(), schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let result = load_table(&path);

        assert!(matches!(
            result,
            Err(crate::error::Error::Column { column, .. }) if column == "date"
        ));
    }

    #[test]
    fn should_keep_the_variables_of_an_empty_table() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("era5-regions.parquet");
        let table =
            AggregatedTable::new(vec![Variable::named("tmpdca"), Variable::named("aqiwdo3")]);

        save_table(&table, &path).unwrap();
        let loaded = load_table(&path).unwrap();

        assert!(loaded.records.is_empty());
        assert_eq!(loaded.variables, table.variables);
    }
}
