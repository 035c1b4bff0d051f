use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::price_quote::{PriceQuote, PriceQuoteId};
use crate::domain::request::RequestId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteStatistics {
    pub total_quotes: usize,
    pub lowest_quote: Option<Decimal>,
    pub highest_quote: Option<Decimal>,
    pub average_quote: Option<Decimal>,
    pub selected_quote: Option<PriceQuote>,
}

/// Rules over the quotes attached to a single request.
#[derive(Clone, Copy, Debug, Default)]
pub struct QuoteRegistry;

impl QuoteRegistry {
    pub fn locate<'a>(
        quotes: &'a [PriceQuote],
        request_id: &RequestId,
        quote_id: &PriceQuoteId,
    ) -> Result<&'a PriceQuote, DomainError> {
        let quote = quotes
            .iter()
            .find(|quote| &quote.id == quote_id)
            .ok_or_else(|| DomainError::QuoteNotFound(quote_id.clone()))?;
        if &quote.request_id != request_id {
            return Err(DomainError::QuoteNotOwned {
                quote_id: quote_id.clone(),
                request_id: request_id.clone(),
            });
        }
        Ok(quote)
    }

    /// Finds the quote and checks it is still valid on `today`.
    pub fn selectable<'a>(
        quotes: &'a [PriceQuote],
        request_id: &RequestId,
        quote_id: &PriceQuoteId,
        today: NaiveDate,
    ) -> Result<&'a PriceQuote, DomainError> {
        let quote = Self::locate(quotes, request_id, quote_id)?;
        if !quote.is_valid_on(today) {
            return Err(DomainError::QuoteExpired {
                quote_id: quote.id.clone(),
                validity_date: quote.validity_date,
            });
        }
        Ok(quote)
    }

    pub fn selected(quotes: &[PriceQuote]) -> Option<&PriceQuote> {
        quotes.iter().find(|quote| quote.is_selected)
    }

    /// Selected quotes are immutable.
    pub fn is_mutable(quote: &PriceQuote) -> bool {
        !quote.is_selected
    }

    /// Marks `quote_id` selected and every sibling unselected in one pass.
    pub fn apply_selection(quotes: &mut [PriceQuote], quote_id: &PriceQuoteId) {
        for quote in quotes.iter_mut() {
            quote.is_selected = &quote.id == quote_id;
        }
    }

    pub fn sorted_by_amount(mut quotes: Vec<PriceQuote>) -> Vec<PriceQuote> {
        quotes.sort_by(|left, right| {
            left.quote_amount
                .cmp(&right.quote_amount)
                .then_with(|| left.created_at.cmp(&right.created_at))
        });
        quotes
    }

    /// Summarises the quotes of one request. Fails instead of wrapping when
    /// the amounts do not fit a single `Decimal` sum.
    pub fn statistics(quotes: &[PriceQuote]) -> Result<QuoteStatistics, DomainError> {
        let amounts = quotes.iter().map(|quote| quote.quote_amount);
        let total = amounts.clone().try_fold(Decimal::ZERO, |sum, amount| {
            sum.checked_add(amount).ok_or_else(|| {
                DomainError::InvariantViolation(format!(
                    "sum of {} quote amounts exceeds the representable range",
                    quotes.len()
                ))
            })
        })?;
        let average_quote = (!quotes.is_empty())
            .then(|| (total / Decimal::from(quotes.len() as u64)).round_dp(2));

        Ok(QuoteStatistics {
            total_quotes: quotes.len(),
            lowest_quote: amounts.clone().min(),
            highest_quote: amounts.max(),
            average_quote,
            selected_quote: Self::selected(quotes).cloned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    use super::QuoteRegistry;
    use crate::domain::actor::UserId;
    use crate::domain::price_quote::{PriceQuote, PriceQuoteId, QuoteDraft};
    use crate::domain::request::RequestId;
    use crate::errors::DomainError;

    fn quote(id: &str, request: &str, amount: i64) -> PriceQuote {
        PriceQuote::from_draft(
            PriceQuoteId(id.to_string()),
            RequestId(request.to_string()),
            UserId("u-acct".to_string()),
            QuoteDraft {
                vendor_name: format!("vendor-{id}"),
                vendor_contact: None,
                vendor_email: None,
                vendor_phone: None,
                quote_amount: Decimal::new(amount, 0),
                quote_details: None,
                validity_date: NaiveDate::from_ymd_opt(2026, 12, 31).expect("date"),
                payment_terms: None,
                delivery_time: None,
                notes: None,
            },
            None,
            Utc::now(),
        )
    }

    #[test]
    fn locate_distinguishes_missing_and_foreign_quotes() {
        let quotes = vec![quote("PQ-1", "REQ-1", 100), quote("PQ-2", "REQ-2", 120)];
        let request = RequestId("REQ-1".to_string());

        QuoteRegistry::locate(&quotes, &request, &PriceQuoteId("PQ-1".to_string()))
            .expect("owned quote");
        assert!(matches!(
            QuoteRegistry::locate(&quotes, &request, &PriceQuoteId("PQ-2".to_string())),
            Err(DomainError::QuoteNotOwned { .. })
        ));
        assert!(matches!(
            QuoteRegistry::locate(&quotes, &request, &PriceQuoteId("PQ-9".to_string())),
            Err(DomainError::QuoteNotFound(_))
        ));
    }

    #[test]
    fn expired_quote_is_not_selectable() {
        let quotes = vec![quote("PQ-1", "REQ-1", 100)];
        let error = QuoteRegistry::selectable(
            &quotes,
            &RequestId("REQ-1".to_string()),
            &PriceQuoteId("PQ-1".to_string()),
            NaiveDate::from_ymd_opt(2027, 1, 1).expect("date"),
        )
        .expect_err("expired");

        assert!(matches!(error, DomainError::QuoteExpired { .. }));
    }

    #[test]
    fn apply_selection_leaves_exactly_one_selected() {
        let mut quotes =
            vec![quote("PQ-1", "REQ-1", 100), quote("PQ-2", "REQ-1", 120), quote("PQ-3", "REQ-1", 90)];
        QuoteRegistry::apply_selection(&mut quotes, &PriceQuoteId("PQ-1".to_string()));
        QuoteRegistry::apply_selection(&mut quotes, &PriceQuoteId("PQ-3".to_string()));

        let selected: Vec<_> = quotes.iter().filter(|quote| quote.is_selected).collect();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id.0, "PQ-3");
        assert!(!QuoteRegistry::is_mutable(selected[0]));
    }

    #[test]
    fn statistics_summarise_amounts_and_selection() {
        let mut quotes =
            vec![quote("PQ-1", "REQ-1", 100), quote("PQ-2", "REQ-1", 120), quote("PQ-3", "REQ-1", 95)];
        quotes[1].is_selected = true;

        let stats = QuoteRegistry::statistics(&quotes).expect("statistics");
        assert_eq!(stats.total_quotes, 3);
        assert_eq!(stats.lowest_quote, Some(Decimal::new(95, 0)));
        assert_eq!(stats.highest_quote, Some(Decimal::new(120, 0)));
        assert_eq!(stats.average_quote, Some(Decimal::new(10_500, 2)));
        assert_eq!(stats.selected_quote.map(|quote| quote.id.0), Some("PQ-2".to_string()));

        let sorted = QuoteRegistry::sorted_by_amount(quotes);
        assert_eq!(sorted[0].id.0, "PQ-3");
    }

    #[test]
    fn statistics_of_no_quotes_are_empty() {
        let stats = QuoteRegistry::statistics(&[]).expect("statistics");
        assert_eq!(stats.total_quotes, 0);
        assert_eq!(stats.average_quote, None);
        assert_eq!(stats.lowest_quote, None);
    }

    #[test]
    fn statistics_report_overflowing_totals_instead_of_panicking() {
        let mut quotes = vec![quote("PQ-1", "REQ-1", 1), quote("PQ-2", "REQ-1", 1)];
        for quote in &mut quotes {
            quote.quote_amount = Decimal::MAX;
        }

        let error = QuoteRegistry::statistics(&quotes).expect_err("sum overflows");
        assert!(matches!(error, DomainError::InvariantViolation(_)));

        let stats = QuoteRegistry::statistics(&quotes[..1]).expect("single quote fits");
        assert_eq!(stats.average_quote, Some(Decimal::MAX));
    }
}
