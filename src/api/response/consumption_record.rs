use chrono::NaiveDateTime;
use serde::Deserialize;

use crate::model::{ConsumptionRecord, ConsumptionSeries};

/// Bucket timestamps as reported in `peakDemandTimes`.
pub const PEAK_DEMAND_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Parallel-array consumption payload. `/Day` and `/Month` report the
/// readings as `meteredValues`, `/Year` as `values`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumptionRecords {
    #[serde(default)]
    pub peak_demand_times: Vec<String>,
    #[serde(default)]
    pub metered_values: Option<Vec<Option<f64>>>,
    #[serde(default)]
    pub values: Option<Vec<Option<f64>>>,
}

impl ConsumptionRecords {
    /// Zips the parallel arrays into a series, truncating to the shorter one.
    pub fn into_series(self) -> Result<ConsumptionSeries, chrono::ParseError> {
        let ConsumptionRecords {
            peak_demand_times,
            metered_values,
            values,
        } = self;
        let values = metered_values.or(values).unwrap_or_default();

        peak_demand_times
            .iter()
            .zip(values)
            .map(|(time, value)| {
                NaiveDateTime::parse_from_str(time, PEAK_DEMAND_TIME_FORMAT)
                    .map(|timestamp| ConsumptionRecord { timestamp, value })
            })
            .collect()
    }
}
