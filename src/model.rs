use chrono::NaiveDateTime;

pub type Kwh = f64;

/// Timestamp format used by the provider's portal and by `CumulativeConsumption`.
pub const TIMESTAMP_FORMAT: &str = "%d.%m.%Y %H:%M";

/// A single consumption bucket. `value` is `None` for periods the provider
/// reports without data.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumptionRecord {
    pub timestamp: NaiveDateTime,
    pub value: Option<Kwh>,
}

/// Ordered buckets of one granularity: hour-of-day, day-of-month or
/// month-of-year.
pub type ConsumptionSeries = Vec<ConsumptionRecord>;

/// Cumulative consumption since some past timestamp. The smart meter only
/// transmits once a day, so the figure is valid up to the start of the day
/// named by `timestamp`.
#[derive(Debug, Clone, PartialEq)]
pub struct CumulativeConsumption {
    pub timestamp: NaiveDateTime,
    pub consumption: Kwh,
}

impl CumulativeConsumption {
    pub fn timestamp_string(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}
