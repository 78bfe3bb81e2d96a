//! Rate and usage calculation: converts metered utility deltas into
//! monetary amounts using the rate in effect at the period start.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{AppError, Result};
use crate::models::{MeterReading, UtilityRate};

/// The (month, year) immediately preceding the given period; January wraps
/// to December of the previous year.
pub fn previous_period(month: i32, year: i32) -> (i32, i32) {
    if month == 1 {
        (12, year - 1)
    } else {
        (month - 1, year)
    }
}

/// First instant of the billing period, used to select the applicable
/// rate.
pub fn period_start(month: i32, year: i32) -> Result<DateTime<Utc>> {
    let date = NaiveDate::from_ymd_opt(year, month as u32, 1).ok_or_else(|| {
        AppError::Validation(format!("invalid billing period {month}/{year}"))
    })?;
    Ok(Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN)))
}

/// Usage is the delta between two cumulative readings. A negative delta
/// indicates a meter reset or a data-entry error; it is reported, never
/// clamped.
pub fn usage_delta(meter: &'static str, previous: Decimal, current: Decimal) -> Result<Decimal> {
    let delta = current - previous;
    if delta < Decimal::ZERO {
        return Err(AppError::NegativeUsage {
            meter,
            previous,
            current,
        });
    }
    Ok(delta)
}

/// usage x unit rate, rounded half-up at the currency's minor-unit
/// precision.
pub fn line_amount(usage: Decimal, unit_rate: Decimal, decimal_places: u32) -> Decimal {
    (usage * unit_rate).round_dp_with_strategy(decimal_places, RoundingStrategy::MidpointAwayFromZero)
}

/// The monetary outcome of one billing period for one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillComputation {
    pub electricity_usage: Decimal,
    pub water_usage: Decimal,
    pub electricity_amount: Decimal,
    pub water_amount: Decimal,
    pub total_amount: Decimal,
}

/// Computes the bill lines from two consecutive readings and the
/// applicable rate.
pub fn compute(
    previous: &MeterReading,
    current: &MeterReading,
    rate: &UtilityRate,
    decimal_places: u32,
) -> Result<BillComputation> {
    let electricity_usage = usage_delta("electricity", previous.electricity, current.electricity)?;
    let water_usage = usage_delta("water", previous.water, current.water)?;

    let electricity_amount = line_amount(electricity_usage, rate.electricity_rate, decimal_places);
    let water_amount = line_amount(water_usage, rate.water_rate, decimal_places);

    Ok(BillComputation {
        electricity_usage,
        water_usage,
        electricity_amount,
        water_amount,
        total_amount: electricity_amount + water_amount,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn reading(room: Uuid, month: i32, year: i32, e: Decimal, w: Decimal) -> MeterReading {
        MeterReading::new(room, month, year, e, w)
    }

    #[test]
    fn january_wraps_to_previous_december() {
        assert_eq!(previous_period(1, 2025), (12, 2024));
        assert_eq!(previous_period(3, 2025), (2, 2025));
    }

    #[test]
    fn negative_delta_is_an_error_not_a_clamp() {
        let err = usage_delta("electricity", dec!(200), dec!(180)).unwrap_err();
        assert!(matches!(err, AppError::NegativeUsage { .. }));
    }

    #[test]
    fn worked_example_march_2025() {
        let room = Uuid::new_v4();
        let prev = reading(room, 2, 2025, dec!(100), dec!(50));
        let cur = reading(room, 3, 2025, dec!(180), dec!(70));
        let rate = UtilityRate::new(dec!(3500), dec!(15000), Utc::now());

        let bill = compute(&prev, &cur, &rate, 0).unwrap();
        assert_eq!(bill.electricity_usage, dec!(80));
        assert_eq!(bill.water_usage, dec!(20));
        assert_eq!(bill.electricity_amount, dec!(280000));
        assert_eq!(bill.water_amount, dec!(300000));
        assert_eq!(bill.total_amount, dec!(580000));
    }

    #[test]
    fn rounding_is_half_up_at_minor_units() {
        assert_eq!(line_amount(dec!(1.5), dec!(1), 0), dec!(2));
        assert_eq!(line_amount(dec!(0.125), dec!(1), 2), dec!(0.13));
        assert_eq!(line_amount(dec!(2.4), dec!(1), 0), dec!(2));
    }
}
