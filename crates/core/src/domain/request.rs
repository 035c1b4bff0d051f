use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::actor::{DepartmentId, UserId};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestType {
    Purchase,
    Project,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "PURCHASE",
            Self::Project => "PROJECT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PURCHASE" => Some(Self::Purchase),
            "PROJECT" => Some(Self::Project),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestState {
    Draft,
    Submitted,
    DmApproved,
    QuotesRequested,
    QuoteSelected,
    AwaitingFinalApproval,
    AcctApproved,
    FinalApproved,
    FundsTransferred,
    Rejected,
    Returned,
}

impl RequestState {
    pub const ALL: [RequestState; 11] = [
        RequestState::Draft,
        RequestState::Submitted,
        RequestState::DmApproved,
        RequestState::QuotesRequested,
        RequestState::QuoteSelected,
        RequestState::AwaitingFinalApproval,
        RequestState::AcctApproved,
        RequestState::FinalApproved,
        RequestState::FundsTransferred,
        RequestState::Rejected,
        RequestState::Returned,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Submitted => "SUBMITTED",
            Self::DmApproved => "DM_APPROVED",
            Self::QuotesRequested => "QUOTES_REQUESTED",
            Self::QuoteSelected => "QUOTE_SELECTED",
            Self::AwaitingFinalApproval => "AWAITING_FINAL_APPROVAL",
            Self::AcctApproved => "ACCT_APPROVED",
            Self::FinalApproved => "FINAL_APPROVED",
            Self::FundsTransferred => "FUNDS_TRANSFERRED",
            Self::Rejected => "REJECTED",
            Self::Returned => "RETURNED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.as_str().eq_ignore_ascii_case(value.trim()))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::FundsTransferred | Self::Rejected)
    }

    /// DRAFT and RETURNED are the only states in which the requester owns the content.
    pub fn is_editable(&self) -> bool {
        matches!(self, Self::Draft | Self::Returned)
    }

    pub fn can_be_rejected(&self) -> bool {
        !matches!(self, Self::Rejected | Self::Returned | Self::FundsTransferred)
    }

    pub fn can_be_returned(&self) -> bool {
        !matches!(self, Self::Draft | Self::Rejected | Self::Returned | Self::FundsTransferred)
    }
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestItem {
    pub name: String,
    pub description: Option<String>,
    pub quantity: u32,
    pub unit_price: Decimal,
}

impl RequestItem {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectDetail {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub milestones: Vec<String>,
    pub risk_assessment: Option<String>,
}

/// Requester-supplied content of a request, used by create, update and resubmit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDraft {
    pub department_id: DepartmentId,
    pub request_type: RequestType,
    pub title: String,
    pub description: String,
    pub total_cost: Decimal,
    #[serde(default)]
    pub items: Vec<RequestItem>,
    #[serde(default)]
    pub project_detail: Option<ProjectDetail>,
}

impl RequestDraft {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.title.trim().is_empty() {
            return Err(DomainError::Validation("title must not be empty".to_string()));
        }
        if self.department_id.0.trim().is_empty() {
            return Err(DomainError::Validation("department_id must not be empty".to_string()));
        }
        if self.total_cost.is_sign_negative() {
            return Err(DomainError::Validation("total_cost must not be negative".to_string()));
        }

        match self.request_type {
            RequestType::Purchase => {
                if self.project_detail.is_some() {
                    return Err(DomainError::Validation(
                        "purchase requests cannot carry project details".to_string(),
                    ));
                }
                for item in &self.items {
                    if item.name.trim().is_empty() {
                        return Err(DomainError::Validation(
                            "request item name must not be empty".to_string(),
                        ));
                    }
                    if item.quantity == 0 {
                        return Err(DomainError::Validation(format!(
                            "request item `{}` must have a positive quantity",
                            item.name
                        )));
                    }
                    if item.unit_price.is_sign_negative() {
                        return Err(DomainError::Validation(format!(
                            "request item `{}` must not have a negative unit price",
                            item.name
                        )));
                    }
                }
            }
            RequestType::Project => {
                if !self.items.is_empty() {
                    return Err(DomainError::Validation(
                        "project requests cannot carry purchase items".to_string(),
                    ));
                }
                if let Some(detail) = &self.project_detail {
                    if let (Some(start), Some(end)) = (detail.start_date, detail.end_date) {
                        if end < start {
                            return Err(DomainError::Validation(
                                "project end_date must not precede start_date".to_string(),
                            ));
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub requester_id: UserId,
    pub department_id: DepartmentId,
    pub request_type: RequestType,
    pub title: String,
    pub description: String,
    /// Estimate until a quote is selected; authoritative from QUOTE_SELECTED on.
    pub total_cost: Decimal,
    pub state: RequestState,
    pub items: Vec<RequestItem>,
    pub project_detail: Option<ProjectDetail>,
    pub transaction_reference: Option<String>,
    pub version: u32,
    pub submitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Request {
    pub fn from_draft(
        id: RequestId,
        requester_id: UserId,
        draft: RequestDraft,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            requester_id,
            department_id: draft.department_id,
            request_type: draft.request_type,
            title: draft.title,
            description: draft.description,
            total_cost: draft.total_cost,
            state: RequestState::Draft,
            items: draft.items,
            project_detail: draft.project_detail,
            transaction_reference: None,
            version: 1,
            submitted_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replaces requester-owned content; child records are swapped wholesale.
    pub fn apply_draft(&mut self, draft: RequestDraft) {
        self.department_id = draft.department_id;
        self.request_type = draft.request_type;
        self.title = draft.title;
        self.description = draft.description;
        self.total_cost = draft.total_cost;
        self.items = draft.items;
        self.project_detail = draft.project_detail;
    }

    pub fn link(&self, base_path: &str) -> String {
        format!("{}/{}", base_path.trim_end_matches('/'), self.id.0)
    }
}
