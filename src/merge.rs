//! Joins survey respondents with the prepared environmental tables.

use std::{collections::BTreeMap, path::Path};

use chrono::NaiveDate;

use crate::{
    error::{Error, Result},
    spss::{self, Column, Dataset, Format},
    table::AggregatedTable,
};

pub const INTERVIEW_DATE: &str = "interview_date";

/// Interview date of every respondent.
///
/// Taken from `inwds`, else `questcmp`, else the `inwyys`/`inwmms`/`inwdds`
/// components. Respondents without any usable source get `None`.
pub fn interview_dates(survey: &Dataset) -> Vec<Option<NaiveDate>> {
    let inwds = survey.numeric("inwds");
    let questcmp = survey.numeric("questcmp");
    let (year, month, day) = (
        survey.numeric("inwyys"),
        survey.numeric("inwmms"),
        survey.numeric("inwdds"),
    );

    let at = |col: Option<&[Option<f64>]>, i: usize| col.and_then(|c| c.get(i).copied().flatten());

    (0..survey.n_cases())
        .map(|i| {
            at(inwds, i)
                .and_then(spss::to_date)
                .or_else(|| at(questcmp, i).and_then(spss::to_date))
                .or_else(|| {
                    let (y, m, d) = (at(year, i)?, at(month, i)?, at(day, i)?);
                    NaiveDate::from_ymd_opt(y as i32, m as u32, d as u32)
                })
        })
        .collect()
}

/// Respondents of one region and how many found no environmental match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Gap {
    pub respondents: usize,
    pub without_eea: usize,
    pub without_era5: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub respondents: usize,
    pub without_date: usize,
    pub by_region: BTreeMap<String, Gap>,
}

impl MergeReport {
    pub fn regions_with_gaps(&self) -> impl Iterator<Item = (&String, &Gap)> {
        self.by_region
            .iter()
            .filter(|(_, gap)| gap.without_eea > 0 || gap.without_era5 > 0)
    }
}

/// Appends the values of `table` matching each key as new columns.
///
/// Returns which keys found a record.
fn attach(
    dataset: &mut Dataset,
    keys: &[(String, Option<NaiveDate>)],
    table: &AggregatedTable,
) -> Vec<bool> {
    let index = table.index();
    let rows: Vec<Option<usize>> = keys
        .iter()
        .map(|(region, date)| date.and_then(|d| index.get(&(region.as_str(), d)).copied()))
        .collect();

    for (j, variable) in table.variables.iter().enumerate() {
        if dataset.position(&variable.name).is_some() {
            continue;
        }
        let values = rows
            .iter()
            .map(|row| row.and_then(|r| table.records[r].values[j]))
            .collect();
        dataset.push(variable.to_spss(), Column::Numeric(values));
    }

    rows.iter().map(Option::is_some).collect()
}

/// Left join of the survey with the EEA and ERA5 tables on region and interview date.
///
/// Every respondent appears exactly once, in the original order. All survey
/// variables are kept, followed by `interview_date` and the environmental values.
pub fn merge(
    survey_path: &Path,
    survey: &Dataset,
    eea: &AggregatedTable,
    era5: &AggregatedTable,
) -> Result<(Dataset, MergeReport)> {
    let regions = survey.text("region").ok_or_else(|| Error::Column {
        column: "region".to_string(),
        path: survey_path.to_path_buf(),
    })?;
    let dates = interview_dates(survey);
    let keys: Vec<(String, Option<NaiveDate>)> = regions
        .iter()
        .map(|r| r.trim().to_string())
        .zip(dates.iter().copied())
        .collect();

    let mut merged = survey.clone();
    if merged.position(INTERVIEW_DATE).is_none() {
        merged.push(
            spss::Variable::numeric(INTERVIEW_DATE, Some("Interview date"), Format::date()),
            Column::Numeric(dates.iter().map(|d| d.map(spss::from_date)).collect()),
        );
    }
    let with_eea = attach(&mut merged, &keys, eea);
    let with_era5 = attach(&mut merged, &keys, era5);

    let mut report = MergeReport {
        respondents: keys.len(),
        without_date: dates.iter().filter(|d| d.is_none()).count(),
        ..MergeReport::default()
    };
    for (i, (region, _)) in keys.iter().enumerate() {
        let gap = report.by_region.entry(region.clone()).or_default();
        gap.respondents += 1;
        gap.without_eea += usize::from(!with_eea[i]);
        gap.without_era5 += usize::from(!with_era5[i]);
    }

    Ok((merged, report))
}

/// `merged-EOSC-<stem>` for a survey file `<stem>.sav`.
pub fn output_stem(survey_path: &Path) -> String {
    let stem = survey_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("merged-EOSC-{stem}")
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::TempDir;

    use crate::{
        parquet,
        spss::{read_sav, write_sav, WriteOptions},
        table::{AggregatedRecord, Variable},
    };

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn survey() -> Dataset {
        let mut survey = Dataset::default();
        survey.push(
            spss::Variable::numeric(
                "idno",
                Some("Respondent's identification number"),
                Format::numeric(8, 0),
            ),
            Column::Numeric(vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)]),
        );
        survey.push(
            spss::Variable::string("region", Some("Region"), 8),
            Column::Text(vec![
                "AT13".to_string(),
                "AT13 ".to_string(),
                "UKI".to_string(),
                "AT13".to_string(),
            ]),
        );
        survey.push(
            spss::Variable::numeric("inwds", None, Format::date()),
            Column::Numeric(vec![
                Some(spss::from_date(date(2016, 9, 23)) + 3600.0),
                None,
                None,
                None,
            ]),
        );
        survey.push(
            spss::Variable::numeric("inwyys", None, Format::numeric(4, 0)),
            Column::Numeric(vec![None, Some(2016.0), Some(2016.0), Some(9999.0)]),
        );
        survey.push(
            spss::Variable::numeric("inwmms", None, Format::numeric(2, 0)),
            Column::Numeric(vec![None, Some(9.0), Some(10.0), Some(99.0)]),
        );
        survey.push(
            spss::Variable::numeric("inwdds", None, Format::numeric(2, 0)),
            Column::Numeric(vec![None, Some(24.0), Some(1.0), Some(99.0)]),
        );
        survey
    }

    fn table(name: &str, rows: &[(&str, NaiveDate, f64)]) -> AggregatedTable {
        let mut table = AggregatedTable::new(vec![Variable::named(name)]);
        table.records = rows
            .iter()
            .map(|(region, date, value)| AggregatedRecord {
                region: region.to_string(),
                date: *date,
                values: vec![Some(*value)],
            })
            .collect();
        table
    }

    #[test]
    fn should_derive_interview_dates() {
        let dates = interview_dates(&survey());
        assert_eq!(
            dates,
            vec![Some(date(2016, 9, 23)), Some(date(2016, 9, 24)), Some(date(2016, 10, 1)), None]
        );
    }

    #[test]
    fn should_keep_every_respondent_once() {
        let eea = table(
            "aqiwd",
            &[("AT13", date(2016, 9, 23), 2.0), ("AT13", date(2016, 9, 24), 3.0)],
        );
        let era5 = table(
            "tmpdca",
            &[("AT13", date(2016, 9, 23), 14.5), ("UKI", date(2016, 10, 1), 11.0)],
        );

        let (merged, report) = merge(Path::new("ESS8.sav"), &survey(), &eea, &era5).unwrap();

        assert_eq!(merged.n_cases(), 4);
        assert_eq!(
            merged.numeric("idno"),
            Some(&[Some(1.0), Some(2.0), Some(3.0), Some(4.0)][..])
        );
        assert_eq!(merged.numeric("aqiwd"), Some(&[Some(2.0), Some(3.0), None, None][..]));
        assert_eq!(merged.numeric("tmpdca"), Some(&[Some(14.5), None, Some(11.0), None][..]));
        assert_eq!(
            merged.numeric(INTERVIEW_DATE).map(|c| c[0]),
            Some(Some(spss::from_date(date(2016, 9, 23))))
        );
        assert_eq!(merged.variables.last().map(|v| v.name.as_str()), Some("tmpdca"));

        assert_eq!(report.respondents, 4);
        assert_eq!(report.without_date, 1);
        assert_eq!(
            report.by_region["AT13"],
            Gap {
                respondents: 3,
                without_eea: 1,
                without_era5: 2
            }
        );
        assert_eq!(report.regions_with_gaps().count(), 2);
    }

    #[test]
    fn should_merge_tables_read_back_from_parquet() {
        let dir = TempDir::new().unwrap();
        let eea_path = dir.path().join("eea-regions.parquet");
        let era5_path = dir.path().join("era5-regions.parquet");
        let sav_path = dir.path().join("merged-EOSC-ESS8.sav");

        let eea = table("aqiwd", &[("AT13", date(2016, 9, 24), 3.0)]);
        let era5 =
            AggregatedTable::new(vec![Variable::named("tmpdca"), Variable::named("pacctcm")]);
        parquet::save_table(&eea, &eea_path).unwrap();
        parquet::save_table(&era5, &era5_path).unwrap();
        let eea = parquet::load_table(&eea_path).unwrap();
        let era5 = parquet::load_table(&era5_path).unwrap();

        let (merged, report) = merge(Path::new("ESS8.sav"), &survey(), &eea, &era5).unwrap();
        write_sav(&sav_path, &merged, WriteOptions::default()).unwrap();
        let written = read_sav(&sav_path).unwrap();

        let names: Vec<_> = written.variables.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(
            names[names.len() - 4..],
            [INTERVIEW_DATE, "aqiwd", "tmpdca", "pacctcm"]
        );
        assert_eq!(written.numeric("aqiwd"), Some(&[None, Some(3.0), None, None][..]));
        assert_eq!(written.numeric("tmpdca"), Some(&[None, None, None, None][..]));
        assert_eq!(written.text("region").map(|r| r[1].as_str()), Some("AT13"));
        assert_eq!(report.by_region["UKI"].without_era5, 1);
    }

    #[test]
    fn should_require_region_column() {
        let mut survey = Dataset::default();
        survey.push(
            spss::Variable::numeric("idno", None, Format::numeric(8, 0)),
            Column::Numeric(vec![Some(1.0)]),
        );
        let empty = AggregatedTable::default();

        let result = merge(Path::new("ESS8.sav"), &survey, &empty, &empty);

        assert!(matches!(result, Err(Error::Column { column, .. }) if column == "region"));
    }

    #[test]
    fn should_name_outputs_after_survey_file() {
        assert_eq!(output_stem(Path::new("data/ESS9e03_1.sav")), "merged-EOSC-ESS9e03_1");
    }
}
