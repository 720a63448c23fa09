//! Names, labels and display formats of the derived environmental variables.

/// How a variable is displayed in SPSS output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Continuous measurement, `F8.2`.
    Measure,
    /// Air quality index level 0..=5 with value labels, `F2.0`.
    Level,
    /// Day count, `F4.0`.
    Count,
}

pub type VariableSpec = (&'static str, &'static str, ValueKind);

use ValueKind::{Count, Level, Measure};

pub const DATE_LABEL: &str = "Date";
pub const REGION_LABEL: &str = "Region";

#[rustfmt::skip]
pub const ERA5_VARIABLES: &[VariableSpec] = &[
    ("tmpdca", "Temperature in degrees Celcius, date average", Measure),
    ("tmpdcmx", "Temperature in degrees Celcius, date maximum", Measure),
    ("tmpdcmn", "Temperature in degrees Celcius, date minmum", Measure),
    ("tmpdcaw", "Temperature in degrees Celcius, week average before the date", Measure),
    ("tmpdcam", "Temperature in degrees Celcius, month average before the date", Measure),
    ("tmpdca3m", "Temperature in degrees Celcius, three months average before the date", Measure),
    ("tmpdcay", "Temperature in degrees Celcius, year average before the date", Measure),
    ("tmpdcacm", "Temperature in degrees Celcius, calendar month average", Measure),
    ("tmpdcamb", "Temperature average in degrees Celcius, calendar month, baseline 1991 - 2020", Measure),
    ("tmp95pacmb", "Temperature average of 95 percentil in degrees Celcius, calendar month, baseline 1991 - 2020", Measure),
    ("tmpanod", "Temperature anomaly date", Measure),
    ("tmpanocm", "Temperature anomaly calendar month", Measure),
    ("paccta", "Total precipitation average, date", Measure),
    ("pacctaw", "Total precipitation average, week", Measure),
    ("pacctam", "Total precipitation average, month", Measure),
    ("paccta3m", "Total precipitation average, three months", Measure),
    ("pacctay", "Total precipitation average, year", Measure),
    ("pacctcm", "Total precipitation, calendar month", Measure),
    ("pacctmb", "Total precipitation, calendar month, baseline 1991 - 2020", Measure),
    ("paccdcm", "Total precipitation - calendar month, deviation from normal", Measure),
    ("iwg10mx", "Instantaneous 10 metre wind gust maximum, date", Measure),
    ("iwg10mxam", "Instantaneous 10 metre wind gust average, month", Measure),
    ("iwg10mxaw", "Instantaneous 10 metre wind gust average, week", Measure),
    ("iwg10mxa3m", "Instantaneous 10 metre wind gust average maximum for the region, three months", Measure),
    ("iwg10mxay", "Instantaneous 10 metre wind gust average maximum for the region, year", Measure),
    ("iwg10mxamb", "Instantaneous 10 metre wind gust average maximum, calendar month, baseline 1991 - 2020", Measure),
];

#[rustfmt::skip]
pub const EEA_VARIABLES: &[VariableSpec] = &[
    ("aqiwdpm10", "Worst air quality index level PM10, date", Level),
    ("aqiwdpm2_5", "Worst air quality index level PM2.5, date", Level),
    ("aqiwdso2", "Worst air quality index level SO2, date", Level),
    ("aqiwdno2", "Worst air quality index level NO2, date", Level),
    ("aqiwdo3", "Worst air quality index level O3, date", Level),
    ("aqiwd", "Worst air quality index level across pollutants, date", Level),
    ("aqiw2dpm10", "Worst air quality index level PM10, last two days", Level),
    ("aqiw2dpm2_5", "Worst air quality index level PM2.5,  last two days", Level),
    ("aqiw2dso2", "Worst air quality index level SO2, last two days", Level),
    ("aqiw2dno2", "Worst air quality index level NO2, last two days", Level),
    ("aqiw2do3", "Worst air quality index level O3, last two days", Level),
    ("aqiw2d", "Worst air quality index level across pollutants, last two days", Level),
    ("ndyprwpm10", "Number of days with 'poor' air quality level or worse on PM10, week before the date", Count),
    ("ndyprwpm2_5", "Number of days with 'poor' air quality level or worse on PM2.5, week before the date", Count),
    ("ndyprwso2", "Number of days with 'poor' air quality level or worse on SO2, week before the date", Count),
    ("ndyprwno2", "Number of days with 'poor' air quality level or worse on NO2, week before the date", Count),
    ("ndyprwo3", "Number of days with 'poor' air quality level or worse on O3, week before the date", Count),
    ("ndyprw", "Number of days with  'Poor' air quality level or worse on one or more pollutant indicators, week before the date", Count),
    ("ndyprmpm10", "Number of days with 'poor' air quality level or worse on PM10, month before the date", Count),
    ("ndyprmpm2_5", "Number of days with 'poor' air quality level or worse PM2.5, month before the date", Count),
    ("ndyprmso2", "Number of days with 'poor' air quality level or worse SO2, month before the date", Count),
    ("ndyprmno2", "Number of days with 'poor' air quality level or worse NO2, month before the date", Count),
    ("ndyprmo3", "Number of days with 'poor' air quality level or worse O3, month before the date", Count),
    ("ndyprm", "Number of days with days with 'poor' level or worse on one or more pollutant indicators, month before the date", Count),
    ("ndyprypm10", "Number of days with 'poor' air quality level or worse on PM10, year before the date", Count),
    ("ndyprypm2_5", "Number of days with 'poor' air quality level or worse on PM2.5, year before the date", Count),
    ("ndypryso2", "Number of days with 'poor' air quality level or worse on SO2, year before the date", Count),
    ("ndypryno2", "Number of days with 'poor' air quality level or worse on NO2, year before the date", Count),
    ("ndypryo3", "Number of days with 'poor' air quality level or worse on O3, year before the date", Count),
    ("ndypry", "Number of days with days with 'poor' level or worse on one or more pollutant indicators, year before the date", Count),
];

pub const LEVEL_VALUE_LABELS: &[(f64, &str)] = &[
    (0.0, "Good"),
    (1.0, "Fair"),
    (2.0, "Moderate"),
    (3.0, "Poor"),
    (4.0, "Very Poor"),
    (5.0, "Extremely poor"),
];

/// Looks a variable up in both catalogues.
pub fn lookup(name: &str) -> Option<&'static VariableSpec> {
    ERA5_VARIABLES
        .iter()
        .chain(EEA_VARIABLES.iter())
        .find(|(n, _, _)| *n == name)
}

// -- Tests -------------------------------------------------------------------
