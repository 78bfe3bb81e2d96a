use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::billing;
use crate::error::{AppError, Result};
use crate::models::{BillStatus, MeterReading, Principal, UtilityBill, UtilityRate};
use crate::notify::Notifier;
use crate::store::DormStore;

pub struct BillingService {
    store: Arc<dyn DormStore>,
    notifier: Arc<dyn Notifier>,
    currency_decimals: u32,
}

impl BillingService {
    pub fn new(
        store: Arc<dyn DormStore>,
        notifier: Arc<dyn Notifier>,
        currency_decimals: u32,
    ) -> Self {
        Self {
            store,
            notifier,
            currency_decimals,
        }
    }

    pub async fn set_rate(
        &self,
        principal: &Principal,
        electricity_rate: Decimal,
        water_rate: Decimal,
        effective_from: DateTime<Utc>,
    ) -> Result<UtilityRate> {
        principal.require_admin()?;
        if electricity_rate < Decimal::ZERO || water_rate < Decimal::ZERO {
            return Err(AppError::Validation("rates must be non-negative".into()));
        }

        let rate = self
            .store
            .insert_rate(UtilityRate::new(electricity_rate, water_rate, effective_from))
            .await?;
        tracing::info!(
            rate_id = %rate.id,
            electricity = %rate.electricity_rate,
            water = %rate.water_rate,
            effective_from = %rate.effective_from,
            "utility rate set"
        );
        Ok(rate)
    }

    pub async fn record_reading(
        &self,
        principal: &Principal,
        room_id: Uuid,
        month: i32,
        year: i32,
        electricity: Decimal,
        water: Decimal,
    ) -> Result<MeterReading> {
        principal.require_admin()?;
        validate_period(month, year)?;
        if electricity < Decimal::ZERO || water < Decimal::ZERO {
            return Err(AppError::Validation(
                "cumulative readings cannot be negative".into(),
            ));
        }

        let reading = self
            .store
            .record_reading(MeterReading::new(room_id, month, year, electricity, water))
            .await?;
        tracing::info!(
            room_id = %room_id,
            period = format!("{month}/{year}"),
            "meter reading recorded"
        );
        Ok(reading)
    }

    /// Computes and issues the bill for a room and period from the period's
    /// reading, the previous period's reading and the rate in effect at the
    /// period start. Emits a bill-created notification after persisting.
    pub async fn compute_bill(
        &self,
        principal: &Principal,
        room_id: Uuid,
        month: i32,
        year: i32,
        due_date: NaiveDate,
    ) -> Result<UtilityBill> {
        principal.require_admin()?;
        validate_period(month, year)?;

        let current = self
            .store
            .reading(room_id, month, year)
            .await?
            .ok_or(AppError::MissingReading {
                month: month as u32,
                year,
            })?;
        let (prev_month, prev_year) = billing::previous_period(month, year);
        let previous = self
            .store
            .reading(room_id, prev_month, prev_year)
            .await?
            .ok_or(AppError::MissingReading {
                month: prev_month as u32,
                year: prev_year,
            })?;

        let start = billing::period_start(month, year)?;
        let rate = self
            .store
            .rate_effective_at(start)
            .await?
            .ok_or(AppError::NoActiveRate(start))?;

        let computed = billing::compute(&previous, &current, &rate, self.currency_decimals)?;

        let bill = self
            .store
            .create_bill(UtilityBill {
                id: Uuid::new_v4(),
                room_id,
                month,
                year,
                electricity_usage: computed.electricity_usage,
                water_usage: computed.water_usage,
                electricity_amount: computed.electricity_amount,
                water_amount: computed.water_amount,
                total_amount: computed.total_amount,
                rate_id: rate.id,
                status: BillStatus::Pending,
                due_date,
                created_at: Utc::now(),
                paid_at: None,
            })
            .await?;

        counter!("bills_total", "action" => "issued").increment(1);
        self.notifier.bill_created(&bill).await;
        Ok(bill)
    }

    pub async fn mark_overdue(&self, principal: &Principal, as_of: NaiveDate) -> Result<u64> {
        principal.require_admin()?;
        let flipped = self.store.mark_bills_overdue(as_of).await?;
        if flipped > 0 {
            counter!("bills_total", "action" => "overdue").increment(flipped);
            tracing::info!(count = flipped, %as_of, "bills marked overdue");
        }
        Ok(flipped)
    }

    pub async fn cancel_bill(&self, principal: &Principal, id: Uuid) -> Result<UtilityBill> {
        principal.require_admin()?;
        let bill = self.store.cancel_bill(id).await?;
        counter!("bills_total", "action" => "cancelled").increment(1);
        tracing::info!(bill_id = %id, "bill cancelled");
        Ok(bill)
    }
}

fn validate_period(month: i32, year: i32) -> Result<()> {
    if !(1..=12).contains(&month) || !(2000..=2100).contains(&year) {
        return Err(AppError::Validation(format!(
            "invalid billing period {month}/{year}"
        )));
    }
    Ok(())
}
