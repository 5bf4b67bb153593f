//! Rental pricing: line totals from daily rates and contract totals.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set,
};
use tracing::debug;

use crate::entities::{
    contract,
    contract_item::{self, Entity as ContractItemEntity},
};
use crate::errors::ServiceError;

/// Whole rental days between start and end, never less than one.
pub fn rental_days(start: NaiveDate, end: NaiveDate) -> i64 {
    (end - start).num_days().max(1)
}

/// `unit_price × quantity × days`, rounded to cents.
pub fn line_total(unit_price: Decimal, quantity: i32, days: i64) -> Decimal {
    (unit_price * Decimal::from(quantity) * Decimal::from(days)).round_dp(2)
}

/// Monthly billing amount of a quantity delta at a daily rate.
pub fn monthly_amount(unit_price: Decimal, quantity: i32, billing_days_per_month: u32) -> Decimal {
    line_total(unit_price, quantity, i64::from(billing_days_per_month))
}

/// Recomputes every line total of the contract from its current rental
/// period and writes the contract totals back.
pub async fn recalculate_totals<C: ConnectionTrait>(
    conn: &C,
    contract: contract::Model,
) -> Result<contract::Model, ServiceError> {
    let days = rental_days(contract.start_date, contract.end_date);
    let items = ContractItemEntity::find()
        .filter(contract_item::Column::ContractId.eq(contract.id))
        .all(conn)
        .await?;

    let mut items_total = Decimal::ZERO;
    for item in items {
        let total = line_total(item.unit_price, item.quantity, days);
        items_total += total;
        if total != item.line_total {
            let mut active: contract_item::ActiveModel = item.into();
            active.line_total = Set(total);
            active.updated_at = Set(Utc::now());
            active.update(conn).await?;
        }
    }

    let total_value = (items_total + contract.adjustment_total).round_dp(2);
    debug!(
        contract_id = %contract.id,
        rental_days = days,
        items_total = %items_total,
        total_value = %total_value,
        "Recalculated contract totals"
    );

    let mut active: contract::ActiveModel = contract.into();
    active.items_total = Set(items_total);
    active.total_value = Set(total_value);
    active.updated_at = Set(Utc::now());
    Ok(active.update(conn).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn rental_days_counts_whole_days() {
        assert_eq!(rental_days(date(2025, 1, 1), date(2025, 1, 31)), 30);
        assert_eq!(rental_days(date(2025, 2, 1), date(2025, 3, 1)), 28);
    }

    #[test]
    fn rental_days_has_a_floor_of_one() {
        assert_eq!(rental_days(date(2025, 1, 1), date(2025, 1, 1)), 1);
        assert_eq!(rental_days(date(2025, 1, 5), date(2025, 1, 1)), 1);
    }

    #[test]
    fn line_total_rounds_to_cents() {
        assert_eq!(line_total(dec!(2.50), 4, 30), dec!(300.00));
        assert_eq!(line_total(dec!(0.333), 1, 1), dec!(0.33));
        assert_eq!(line_total(dec!(1.005), 1, 1), dec!(1.00));
    }

    #[test]
    fn monthly_amount_uses_billing_month() {
        assert_eq!(monthly_amount(dec!(1.50), 10, 30), dec!(450.00));
        assert_eq!(monthly_amount(dec!(1.50), -10, 30), dec!(-450.00));
    }
}
