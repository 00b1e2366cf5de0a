use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::models::{BucketedSeries, CaseRecord, Granularity, PeriodCount, SeriesKey};

/// Buckets case records into a gap-free count series per (entity, disease).
///
/// Each pair's grid runs from the period of its earliest record to the period
/// of its latest record; periods without records hold zero.
pub fn aggregate(records: &[CaseRecord], granularity: Granularity) -> BucketedSeries {
    let mut sums: BTreeMap<SeriesKey, BTreeMap<NaiveDate, u64>> = BTreeMap::new();

    for record in records {
        let period = granularity.period_start(record.report_date);
        let entry = sums
            .entry(SeriesKey::new(record.entity.as_str(), record.disease.as_str()))
            .or_default()
            .entry(period)
            .or_insert(0);
        *entry += u64::from(record.count);
    }

    let series = sums
        .into_iter()
        .filter_map(|(key, buckets)| {
            let first = *buckets.keys().next()?;
            let last = *buckets.keys().next_back()?;
            Some((key, fill_grid(&buckets, first, last, granularity)))
        })
        .collect::<BTreeMap<_, _>>();

    tracing::debug!(
        records = records.len(),
        series = series.len(),
        %granularity,
        "aggregated case records"
    );

    BucketedSeries::from_parts(granularity, series)
}

fn fill_grid(
    buckets: &BTreeMap<NaiveDate, u64>,
    first: NaiveDate,
    last: NaiveDate,
    granularity: Granularity,
) -> Vec<PeriodCount> {
    let periods = (last - first).num_days() / granularity.days() + 1;
    (0..periods)
        .map(|step| {
            let period_start = granularity.advance(first, step);
            PeriodCount {
                period_start,
                count: buckets.get(&period_start).copied().unwrap_or(0),
            }
        })
        .collect()
}

/// Total cases across every series in each period, for trend summaries.
pub fn total_by_period(series: &BucketedSeries) -> BTreeMap<NaiveDate, u64> {
    let mut totals = BTreeMap::new();
    for (_, values) in series.iter() {
        for value in values {
            *totals.entry(value.period_start).or_insert(0) += value.count;
        }
    }
    totals
}
