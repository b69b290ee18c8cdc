use chrono::{Datelike, Local, NaiveDateTime, NaiveTime};

use crate::api::error::Error;
use crate::api::Smartmeter;
use crate::model::{ConsumptionRecord, CumulativeConsumption, Kwh};

impl Smartmeter {
    /// Cumulative consumption from `since` (exclusive) up to the start of the
    /// current day, plus the caller-supplied running `offset`.
    ///
    /// The provider only exposes fixed day/month/year rollups, so the delta
    /// is stitched from three granularities: the hours left in the input day,
    /// the days left in its month, the months left in its year, and every
    /// later year in full. Null buckets never count.
    pub async fn get_consumption_since(
        &mut self,
        since: NaiveDateTime,
        offset: Kwh,
    ) -> Result<CumulativeConsumption, Error> {
        self.consumption_since(since, offset, Local::now().naive_local())
            .await
    }

    pub(crate) async fn consumption_since(
        &mut self,
        since: NaiveDateTime,
        offset: Kwh,
        now: NaiveDateTime,
    ) -> Result<CumulativeConsumption, Error> {
        /* Data settles once a day: nothing beyond a same-day timestamp yet */
        if since.date() == now.date() {
            log::info!("input date is from today, returning the offset unchanged");
            return Ok(CumulativeConsumption {
                timestamp: since,
                consumption: offset,
            });
        }

        let mut total = offset;

        /* Hours of the input day strictly after the input time */
        let day_series = self.get_consumption_per_day(since.date()).await?;
        total += sum_after(&day_series, since);

        /* Days of the input month after the input day; the 1-based day
         * number doubles as the 0-based index of "tomorrow" */
        let month_series = self
            .get_consumption_for_month(since.year(), since.month())
            .await?;
        total += sum_values(month_series.iter().skip(since.day() as usize));

        /* Months of the input year after the input month; within the current
         * year only up to the last settled month */
        let start = since.month() as usize;
        let end = if since.year() == now.year() {
            (now.month() as usize).saturating_sub(1)
        } else {
            12
        };
        let year_series = self.get_consumption_for_year(since.year()).await?;
        total += sum_values(year_series.iter().skip(start).take(end.saturating_sub(start)));

        /* Every later year in full, the current one included */
        if since.year() != now.year() {
            for year in (since.year() + 1)..=now.year() {
                let series = self.get_consumption_for_year(year).await?;
                total += sum_values(series.iter());
            }
        }

        Ok(CumulativeConsumption {
            timestamp: now.date().and_time(NaiveTime::MIN),
            consumption: total,
        })
    }
}

fn sum_after(series: &[ConsumptionRecord], cutoff: NaiveDateTime) -> Kwh {
    sum_values(series.iter().filter(|record| record.timestamp > cutoff))
}

fn sum_values<'a, I>(records: I) -> Kwh
where
    I: Iterator<Item = &'a ConsumptionRecord>,
{
    records.filter_map(|record| record.value).sum()
}
