use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::actor::DepartmentId;

/// Department x fiscal-year spending envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    pub department_id: DepartmentId,
    pub fiscal_year: i32,
    pub total_amount: Decimal,
    pub spent_amount: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Budget {
    pub fn new(department_id: DepartmentId, fiscal_year: i32, total_amount: Decimal) -> Self {
        Self {
            department_id,
            fiscal_year,
            total_amount,
            spent_amount: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }

    pub fn remaining(&self) -> Decimal {
        self.total_amount - self.spent_amount
    }

    pub fn has_enough_for(&self, amount: Decimal) -> bool {
        self.remaining() >= amount
    }

    pub fn percentage_spent(&self) -> Decimal {
        if self.total_amount <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (self.spent_amount / self.total_amount * Decimal::ONE_HUNDRED).round_dp(2)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::Budget;
    use crate::domain::actor::DepartmentId;

    #[test]
    fn remaining_and_percentage_track_spend() {
        let mut budget = Budget::new(DepartmentId("dept-ops".to_string()), 2026, Decimal::new(800, 0));
        budget.spent_amount = Decimal::new(200, 0);

        assert_eq!(budget.remaining(), Decimal::new(600, 0));
        assert!(budget.has_enough_for(Decimal::new(600, 0)));
        assert!(!budget.has_enough_for(Decimal::new(60_001, 2)));
        assert_eq!(budget.percentage_spent(), Decimal::new(25, 0));
    }

    #[test]
    fn empty_envelope_reports_zero_percent() {
        let budget = Budget::new(DepartmentId("dept-ops".to_string()), 2026, Decimal::ZERO);
        assert_eq!(budget.percentage_spent(), Decimal::ZERO);
        assert!(budget.has_enough_for(Decimal::ZERO));
    }
}
