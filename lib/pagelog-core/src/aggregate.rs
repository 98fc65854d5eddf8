use std::collections::{btree_map::Entry, BTreeMap};

use chrono::{DateTime, Utc};

use crate::{AggregateRecord, StructuredRecord};

/// Identifies the log record a structured row was flattened from.
type OriginKey<'a> = (&'a str, &'a str, DateTime<Utc>);

#[derive(Default)]
struct PageTotals {
    tti: u128,
    ttar: u128,
    count: u64,
}

/// Aggregates structured rows into per-page means.
///
/// Rows are first collapsed back to their originating log records, keyed by `(session_id, page_url,
/// event_timestamp)`, so a record with N actions contributes once to each mean rather than N times. Pages are grouped
/// by exact string match, with no normalization of case, trailing slashes, or query strings.
///
/// The result does not depend on input order: means are computed from integer sums, origins that disagree on their
/// metrics resolve to the smallest `(tti, ttar)` pair, and output is sorted by page URL. Empty input yields an empty
/// result.
pub fn aggregate(records: &[StructuredRecord]) -> Vec<AggregateRecord> {
    let mut origins: BTreeMap<OriginKey<'_>, (u64, u64)> = BTreeMap::new();
    for record in records {
        let key = (record.session_id.as_str(), record.page_url.as_str(), record.event_timestamp);
        let metrics = (record.tti, record.ttar);
        match origins.entry(key) {
            Entry::Vacant(entry) => {
                entry.insert(metrics);
            }
            Entry::Occupied(mut entry) => {
                if metrics < *entry.get() {
                    entry.insert(metrics);
                }
            }
        }
    }

    let mut pages: BTreeMap<&str, PageTotals> = BTreeMap::new();
    for ((_, page_url, _), (tti, ttar)) in origins {
        let totals = pages.entry(page_url).or_default();
        totals.tti += u128::from(tti);
        totals.ttar += u128::from(ttar);
        totals.count += 1;
    }

    pages
        .into_iter()
        .map(|(page_url, totals)| AggregateRecord {
            page_url: page_url.to_string(),
            avg_tti: totals.tti as f64 / totals.count as f64,
            avg_ttar: totals.ttar as f64 / totals.count as f64,
            count: totals.count,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use proptest::prelude::*;

    use super::*;
    use crate::{test_util::*, validate, SourceType, TransformConfiguration};

    #[test]
    fn empty_input() {
        assert!(aggregate(&[]).is_empty());
    }

    #[test]
    fn worked_example() {
        let raw = serde_json::json!([
            {
                "session_id": "a", "page_url": "/p5", "tti": 1000, "ttar": 500,
                "timestamp": "2024-04-20T01:00:00Z",
                "user_actions": [{ "action": "click", "target": "buy", "time": 100 }],
            },
            {
                "session_id": "b", "page_url": "/p5", "tti": 2000, "ttar": 700,
                "timestamp": "2024-04-20T01:00:00Z",
                "user_actions": [],
            },
        ]);

        let rows = raw
            .as_array()
            .unwrap()
            .iter()
            .flat_map(|value| structured(&validate(value).unwrap()))
            .collect::<Vec<_>>();
        assert_eq!(rows.len(), 2);
        assert!(!rows[0].is_sentinel());
        assert!(rows[1].is_sentinel());

        similar_asserts::assert_eq!(
            aggregate(&rows),
            vec![AggregateRecord {
                page_url: "/p5".to_string(),
                avg_tti: 1500.0,
                avg_ttar: 600.0,
                count: 2,
            }]
        );
    }

    #[test]
    fn actions_do_not_inflate_the_mean() {
        let mut rows = structured(&log_record("a", "/p", Some(100), Some(10), &[("c", "x", 1), ("c", "y", 2), ("c", "z", 3)]));
        rows.extend(structured(&log_record("b", "/p", Some(300), Some(30), &[])));

        let aggregates = aggregate(&rows);
        assert_eq!(aggregates.len(), 1);
        assert_eq!(aggregates[0].count, 2);
        assert_eq!(aggregates[0].avg_tti, 200.0);
        assert_eq!(aggregates[0].avg_ttar, 20.0);
    }

    #[test]
    fn page_urls_are_not_normalized() {
        let mut rows = structured(&log_record("a", "/p5", Some(1), Some(1), &[]));
        rows.extend(structured(&log_record("a", "/p5/", Some(3), Some(3), &[])));
        rows.extend(structured(&log_record("a", "/P5", Some(5), Some(5), &[])));

        let urls = aggregate(&rows).into_iter().map(|agg| agg.page_url).collect::<Vec<_>>();
        assert_eq!(urls, vec!["/P5", "/p5", "/p5/"]);
    }

    #[test]
    fn defaulted_metrics_are_not_redefaulted() {
        // Rows already carry defaulted values; aggregation must average them as-is.
        let config = TransformConfiguration {
            default_tti: 50,
            ..Default::default()
        };
        let rows = to_rows(&config, &[log_record("a", "/p", None, Some(4), &[]), log_record("b", "/p", Some(150), Some(8), &[])]);

        let aggregates = aggregate(&rows);
        assert_eq!(aggregates[0].avg_tti, 100.0);
        assert_eq!(aggregates[0].avg_ttar, 6.0);
    }

    #[test]
    fn idempotent() {
        let mut rows = structured(&log_record("a", "/x", Some(7), Some(1), &[("c", "t", 1)]));
        rows.extend(structured(&log_record("b", "/y", Some(9), Some(2), &[])));

        similar_asserts::assert_eq!(aggregate(&rows), aggregate(&rows));
    }

    fn to_rows(config: &TransformConfiguration, records: &[crate::LogRecord]) -> Vec<StructuredRecord> {
        records
            .iter()
            .flat_map(|record| crate::to_structured(record, SourceType::Batch, config, ingest_time()))
            .collect()
    }

    fn arb_rows() -> impl Strategy<Value = Vec<StructuredRecord>> {
        let record = (
            "[a-c]",
            prop_oneof![Just("/a"), Just("/b"), Just("/b/"), Just("/c?q=1")],
            0u64..10_000,
            0u64..10_000,
            0i64..3,
            0usize..4,
        );

        proptest::collection::vec(record, 0..24).prop_map(|records| {
            records
                .into_iter()
                .flat_map(|(session, url, tti, ttar, minute, actions)| {
                    let actions = (0..actions).map(|i| ("click", "el", i as u64)).collect::<Vec<_>>();
                    let mut record = log_record(&session, url, Some(tti), Some(ttar), &actions);
                    record.timestamp = event_time() + Duration::minutes(minute);
                    structured(&record)
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn property_test_aggregate_order_independent(
            (rows, shuffled) in arb_rows().prop_flat_map(|rows| {
                let shuffled = Just(rows.clone()).prop_shuffle();
                (Just(rows), shuffled)
            })
        ) {
            prop_assert_eq!(aggregate(&rows), aggregate(&shuffled));
        }

        #[test]
        fn property_test_aggregate_counts_positive(rows in arb_rows()) {
            let aggregates = aggregate(&rows);
            prop_assert!(aggregates.iter().all(|agg| agg.count >= 1));
            prop_assert_eq!(rows.is_empty(), aggregates.is_empty());
        }
    }
}
