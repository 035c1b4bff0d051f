use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::actor::UserId;
use crate::domain::request::RequestId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PriceQuoteId(pub String);

impl std::fmt::Display for PriceQuoteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Vendor bid content supplied by the accountant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteDraft {
    pub vendor_name: String,
    #[serde(default)]
    pub vendor_contact: Option<String>,
    #[serde(default)]
    pub vendor_email: Option<String>,
    #[serde(default)]
    pub vendor_phone: Option<String>,
    pub quote_amount: Decimal,
    #[serde(default)]
    pub quote_details: Option<String>,
    pub validity_date: NaiveDate,
    #[serde(default)]
    pub payment_terms: Option<String>,
    #[serde(default)]
    pub delivery_time: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl QuoteDraft {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.vendor_name.trim().is_empty() {
            return Err(DomainError::Validation("vendor_name must not be empty".to_string()));
        }
        if self.quote_amount <= Decimal::ZERO {
            return Err(DomainError::Validation("quote_amount must be positive".to_string()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub id: PriceQuoteId,
    pub request_id: RequestId,
    pub vendor_name: String,
    pub vendor_contact: Option<String>,
    pub vendor_email: Option<String>,
    pub vendor_phone: Option<String>,
    pub quote_amount: Decimal,
    pub quote_details: Option<String>,
    pub document_path: Option<String>,
    pub validity_date: NaiveDate,
    pub payment_terms: Option<String>,
    pub delivery_time: Option<String>,
    pub notes: Option<String>,
    pub is_selected: bool,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PriceQuote {
    pub fn from_draft(
        id: PriceQuoteId,
        request_id: RequestId,
        created_by: UserId,
        draft: QuoteDraft,
        document_path: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            request_id,
            vendor_name: draft.vendor_name,
            vendor_contact: draft.vendor_contact,
            vendor_email: draft.vendor_email,
            vendor_phone: draft.vendor_phone,
            quote_amount: draft.quote_amount,
            quote_details: draft.quote_details,
            document_path,
            validity_date: draft.validity_date,
            payment_terms: draft.payment_terms,
            delivery_time: draft.delivery_time,
            notes: draft.notes,
            is_selected: false,
            created_by,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apply_draft(&mut self, draft: QuoteDraft, now: DateTime<Utc>) {
        self.vendor_name = draft.vendor_name;
        self.vendor_contact = draft.vendor_contact;
        self.vendor_email = draft.vendor_email;
        self.vendor_phone = draft.vendor_phone;
        self.quote_amount = draft.quote_amount;
        self.quote_details = draft.quote_details;
        self.validity_date = draft.validity_date;
        self.payment_terms = draft.payment_terms;
        self.delivery_time = draft.delivery_time;
        self.notes = draft.notes;
        self.updated_at = now;
    }

    /// A quote stays valid through the whole of its validity date.
    pub fn is_valid_on(&self, today: NaiveDate) -> bool {
        self.validity_date >= today
    }
}
