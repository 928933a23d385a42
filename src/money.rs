//! Money conversion between the wire format (integer cents) and the
//! database format (NUMERIC via `rust_decimal`).

use rust_decimal::prelude::*;
use rust_decimal::Decimal;

pub fn cents_to_decimal(cents: i64) -> Decimal {
    Decimal::from(cents) / Decimal::from(100)
}

pub fn decimal_to_cents(value: Decimal) -> i64 {
    (value * Decimal::from(100)).round().to_i64().unwrap_or(0)
}

pub fn opt_cents_to_decimal(cents: Option<i64>) -> Option<Decimal> {
    cents.map(cents_to_decimal)
}

pub fn opt_decimal_to_cents(value: Option<Decimal>) -> Option<i64> {
    value.map(decimal_to_cents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_exactly() {
        for cents in [0_i64, 1, 99, 100, 12_345_678, -2_500] {
            assert_eq!(decimal_to_cents(cents_to_decimal(cents)), cents);
        }
    }

    #[test]
    fn fractional_cents_round_to_nearest() {
        let d = Decimal::from_str("10.006").unwrap();
        assert_eq!(decimal_to_cents(d), 1001);
        let d = Decimal::from_str("10.004").unwrap();
        assert_eq!(decimal_to_cents(d), 1000);
    }
}
