use chrono::NaiveDate;
use core_types::{CanonicalTable, LoanRecord, PaymentRecord};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// A performing loan: 1000 disbursed at 12%, 20 fee, 800 receivable, 900 of 1000 collected.
pub(crate) fn loan(loan_id: &str, customer_id: &str, days_past_due: u32) -> LoanRecord {
    LoanRecord {
        loan_id: loan_id.to_string(),
        customer_id: customer_id.to_string(),
        segment: "retail".to_string(),
        status: None,
        disbursement_date: NaiveDate::from_ymd_opt(2026, 1, 15),
        disbursement_amount: Some(dec!(1000)),
        interest_rate: Some(dec!(12)),
        origination_fee: Some(dec!(20)),
        total_receivable: Some(dec!(800)),
        days_past_due: Some(days_past_due),
        total_eligible: Some(dec!(1000)),
        cash_available: Some(dec!(900)),
        updated_at: None,
    }
}

pub(crate) fn payment(
    payment_id: &str,
    due_date: &str,
    paid_date: Option<&str>,
    scheduled: Decimal,
    paid: Decimal,
) -> PaymentRecord {
    let date = |s: &str| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok();
    PaymentRecord {
        payment_id: payment_id.to_string(),
        loan_id: "L1".to_string(),
        due_date: date(due_date),
        paid_date: paid_date.and_then(date),
        scheduled_amount: Some(scheduled),
        paid_amount: Some(paid),
    }
}

pub(crate) fn snapshot(loans: Vec<LoanRecord>, payments: Vec<PaymentRecord>) -> CanonicalTable {
    CanonicalTable {
        as_of: NaiveDate::from_ymd_opt(2026, 9, 30).unwrap_or_default(),
        loans,
        payments,
        content_hash: "test".to_string(),
    }
}
