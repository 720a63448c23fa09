//! Region/date keyed tables produced by the preparers and consumed by the merge.

use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, NaiveDate};

use crate::{
    catalog::{self, ValueKind, DATE_LABEL, LEVEL_VALUE_LABELS, REGION_LABEL},
    spss::{self, Column, Dataset, Format},
};

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub label: String,
    pub kind: ValueKind,
}

impl Variable {
    /// Builds a variable from the catalogue, or an unlabelled measure for unknown names.
    pub fn named(name: &str) -> Self {
        match catalog::lookup(name) {
            Some((name, label, kind)) => Variable {
                name: name.to_string(),
                label: label.to_string(),
                kind: *kind,
            },
            None => Variable {
                name: name.to_string(),
                label: name.to_string(),
                kind: ValueKind::Measure,
            },
        }
    }

    /// The SPSS variable with this variable's label, display format and value labels.
    pub fn to_spss(&self) -> spss::Variable {
        let format = match self.kind {
            ValueKind::Measure => Format::numeric(8, 2),
            ValueKind::Level => Format::numeric(2, 0),
            ValueKind::Count => Format::numeric(4, 0),
        };
        let mut variable = spss::Variable::numeric(&self.name, Some(&self.label), format);
        if self.kind == ValueKind::Level {
            variable.value_labels = LEVEL_VALUE_LABELS
                .iter()
                .map(|(value, label)| (*value, label.to_string()))
                .collect();
        }
        variable
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedRecord {
    pub region: String,
    pub date: NaiveDate,
    pub values: Vec<Option<f64>>,
}

/// One row per (region, date), one value column per variable.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AggregatedTable {
    pub variables: Vec<Variable>,
    pub records: Vec<AggregatedRecord>,
}

impl AggregatedTable {
    pub fn new(variables: Vec<Variable>) -> Self {
        AggregatedTable {
            variables,
            records: Vec::new(),
        }
    }

    pub fn from_catalog(specs: &[catalog::VariableSpec]) -> Self {
        Self::new(specs.iter().map(|(name, _, _)| Variable::named(name)).collect())
    }

    /// Keeps the records whose year lies in `[from, to]`.
    pub fn retain_years(&mut self, from: i32, to: i32) {
        self.records
            .retain(|r| (from..=to).contains(&r.date.year()));
    }

    /// Sorts records by region then date, which makes the output order stable.
    pub fn sort(&mut self) {
        self.records
            .sort_by(|a, b| (&a.region, a.date).cmp(&(&b.region, b.date)));
    }

    /// Maps each join key to its record index.
    pub fn index(&self) -> HashMap<(&str, NaiveDate), usize> {
        self.records
            .iter()
            .enumerate()
            .map(|(i, r)| ((r.region.as_str(), r.date), i))
            .collect()
    }

    pub fn region_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            *counts.entry(record.region.as_str()).or_insert(0) += 1;
        }
        counts
    }

    /// Lays the table out as an SPSS dataset: `date`, `region`, then the values.
    pub fn to_dataset(&self, file_label: &str) -> Dataset {
        let width = self
            .records
            .iter()
            .map(|r| r.region.len())
            .max()
            .unwrap_or(1);

        let mut dataset = Dataset {
            file_label: file_label.to_string(),
            ..Dataset::default()
        };
        dataset.push(
            spss::Variable::numeric("date", Some(DATE_LABEL), Format::date()),
            Column::Numeric(
                self.records
                    .iter()
                    .map(|r| Some(spss::from_date(r.date)))
                    .collect(),
            ),
        );
        dataset.push(
            spss::Variable::string("region", Some(REGION_LABEL), width),
            Column::Text(self.records.iter().map(|r| r.region.clone()).collect()),
        );
        for (i, variable) in self.variables.iter().enumerate() {
            dataset.push(
                variable.to_spss(),
                Column::Numeric(self.records.iter().map(|r| r.values[i]).collect()),
            );
        }
        dataset
    }
}

// -- Tests -------------------------------------------------------------------
