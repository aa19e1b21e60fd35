//! Property-based tests for weighted roll ranges and resolution.

use std::path::Path;

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rt_core::{dice_range, parse_table_str, roll_dice, CollectingSink, NullSink, Table};

// Row widths for a contiguous range table
fn widths() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(1i64..6, 1..8)
}

/// Build a weighted table whose rows cover `start..` contiguously with the
/// given widths. Row `i` holds item `item{i}`.
fn contiguous_table(start: i64, widths: &[i64]) -> (Table, Vec<(i64, i64)>) {
    let mut content = String::from("${1d6},item\n");
    let mut spans = Vec::new();
    let mut lo = start;
    for (i, width) in widths.iter().enumerate() {
        let hi = lo + width - 1;
        content.push_str(&format!("{lo}-{hi},item{i}\n"));
        spans.push((lo, hi));
        lo = hi + 1;
    }
    let table = parse_table_str(&content, Path::new("/tables/weighted.csv"), &NullSink).unwrap();
    (table, spans)
}

proptest! {
    #[test]
    fn dice_total_within_bounds(count in -3i64..20, sides in -3i64..30, seed in any::<u64>()) {
        let mut rng = StdRng::seed_from_u64(seed);
        let total = roll_dice(count, sides, &mut rng);
        prop_assert!(dice_range(count, sides).contains(&total));
        if count <= 0 || sides <= 0 {
            prop_assert_eq!(total, 0);
        }
    }

    #[test]
    fn contiguous_ranges_cover_every_roll(start in -20i64..20, widths in widths()) {
        let (table, spans) = contiguous_table(start, &widths);
        let sink = CollectingSink::new();

        for (index, &(lo, hi)) in spans.iter().enumerate() {
            for roll in lo..=hi {
                let row = table.row_for_roll(roll, &sink).unwrap();
                let item = row.get("item").unwrap().raw();
                prop_assert_eq!(item, format!("item{index}"));
            }
        }
        prop_assert!(sink.is_empty());
    }

    #[test]
    fn out_of_range_rolls_clamp(start in -20i64..20, widths in widths(), past in 1i64..1000) {
        let (table, spans) = contiguous_table(start, &widths);
        let sink = CollectingSink::new();
        let last = spans.len() - 1;

        let low = table.row_for_roll(spans[0].0 - past, &sink).unwrap();
        let high = table.row_for_roll(spans[last].1 + past, &sink).unwrap();
        prop_assert_eq!(low.get("item").unwrap().raw(), "item0".to_string());
        prop_assert_eq!(high.get("item").unwrap().raw(), format!("item{last}"));
        prop_assert_eq!(sink.len(), 2);
    }

    #[test]
    fn plain_text_fields_stay_verbatim(text in "[A-Za-z0-9 .!?]{0,40}") {
        let content = format!("text,other\n\"{text}\",x\n");
        let table = parse_table_str(&content, Path::new("/tables/plain.csv"), &NullSink).unwrap();
        let value = table.rows()[0].get("text").unwrap();
        prop_assert!(value.as_text().is_some());
        prop_assert_eq!(value.raw(), text);
    }
}
