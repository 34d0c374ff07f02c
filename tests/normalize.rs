use std::str::FromStr;

use booktrade_ingest::{
    fields::DEFAULT_CURRENCY_TOKENS,
    normalize::{
        SERIAL_EPOCH_OFFSET_DAYS, normalize_currency, normalize_date_text, normalize_percentage,
        normalize_quantity, serial_to_date,
    },
};
use chrono::{Duration, NaiveDate};
use proptest::prelude::*;
use rust_decimal::Decimal;

fn group_thousands(whole: u64) -> String {
    let digits = whole.to_string();
    let mut out = String::new();
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[test]
fn documented_examples_hold() {
    let tokens = DEFAULT_CURRENCY_TOKENS;
    assert_eq!(normalize_currency("£1,234.50", tokens).to_string(), "1234.50");
    assert_eq!(normalize_currency("GBP 12", tokens).to_string(), "12.00");
    assert_eq!(normalize_currency("", tokens), Decimal::ZERO);
    assert_eq!(normalize_percentage("17.5%"), Decimal::from_str("17.5").unwrap());
    assert_eq!(normalize_percentage(""), Decimal::ZERO);
    assert_eq!(
        serial_to_date(45000.0),
        NaiveDate::from_ymd_opt(2023, 3, 15)
    );
    assert_eq!(
        normalize_date_text("01/02/2025"),
        NaiveDate::from_ymd_opt(2025, 2, 1)
    );
}

proptest! {
    #[test]
    fn formatted_amounts_parse_back_exactly(
        whole in 0u64..10_000_000,
        pence in 0u32..100,
        prefix in prop_oneof![Just("£"), Just("$"), Just("€"), Just("GBP "), Just("usd "), Just("")],
        grouped in any::<bool>(),
    ) {
        let body = if grouped { group_thousands(whole) } else { whole.to_string() };
        let text = format!("{prefix}{body}.{pence:02}");
        let parsed = normalize_currency(&text, DEFAULT_CURRENCY_TOKENS);
        prop_assert_eq!(parsed.to_string(), format!("{whole}.{pence:02}"));
        prop_assert_eq!(parsed.scale(), 2);
    }

    #[test]
    fn currency_is_never_negative(text in ".{0,24}") {
        let parsed = normalize_currency(&text, DEFAULT_CURRENCY_TOKENS);
        prop_assert!(parsed >= Decimal::ZERO);
        prop_assert_eq!(parsed.scale(), 2);
    }

    #[test]
    fn quantities_round_trip_and_drop_fractions(value in -1_000_000i64..1_000_000, fraction in 0u32..100) {
        prop_assert_eq!(normalize_quantity(&value.to_string()), value);
        prop_assert_eq!(normalize_quantity(&format!("{value}.{fraction:02}")), value);
    }

    #[test]
    fn serials_advance_one_day_at_a_time(serial in 1u32..100_000) {
        let base = serial_to_date(f64::from(serial)).expect("in range");
        let next = serial_to_date(f64::from(serial) + 1.0).expect("in range");
        prop_assert_eq!(next - base, Duration::days(1));
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
        let expected = epoch + Duration::days(i64::from(serial) - SERIAL_EPOCH_OFFSET_DAYS as i64);
        prop_assert_eq!(base, expected);
    }

    #[test]
    fn day_first_text_matches_iso_text(days in 0i64..60_000) {
        let date = NaiveDate::from_ymd_opt(1950, 1, 1).unwrap() + Duration::days(days);
        let day_first = date.format("%d/%m/%Y").to_string();
        let iso = date.format("%Y-%m-%d").to_string();
        prop_assert_eq!(normalize_date_text(&day_first), Some(date));
        prop_assert_eq!(normalize_date_text(&iso), Some(date));
    }
}
