use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

use procura_core::budget::BudgetCommit;
use procura_core::domain::actor::{DepartmentId, UserId};
use procura_core::domain::budget::Budget;
use procura_core::domain::history::{ApprovalHistoryEntry, HistoryEntryId, HistoryStatus};
use procura_core::domain::price_quote::{PriceQuote, PriceQuoteId};
use procura_core::domain::request::{
    ProjectDetail, Request, RequestId, RequestItem, RequestState, RequestType,
};
use procura_core::lifecycle::{QuoteChange, RequestSnapshot, TransitionOutcome};
use procura_core::ports::{LifecycleStore, RequestFilter, TransitionFn};
use procura_core::ApplicationError;

use super::budget::budget_from_row;
use super::{
    format_date, parse_date, parse_decimal, parse_optional_date, parse_optional_timestamp,
    parse_timestamp, parse_u32, RepositoryError,
};
use crate::DbPool;

/// SQLite-backed lifecycle store. Every transition runs inside one
/// `BEGIN IMMEDIATE` transaction, which takes the database write lock before
/// the snapshot is read.
#[derive(Clone)]
pub struct SqlLifecycleStore {
    pool: DbPool,
}

impl SqlLifecycleStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn run_transition(
        conn: &mut SqliteConnection,
        request_id: &RequestId,
        fiscal_year: i32,
        apply: &TransitionFn<'_>,
    ) -> Result<TransitionOutcome, ApplicationError> {
        let snapshot = load_snapshot(conn, request_id, fiscal_year)
            .await?
            .ok_or_else(|| ApplicationError::NotFound(format!("request {request_id}")))?;

        let outcome = apply(&snapshot)?;

        update_request(conn, &outcome.request, snapshot.request.version).await?;
        if outcome.request.items != snapshot.request.items {
            replace_items(conn, &outcome.request).await?;
        }
        if outcome.request.project_detail != snapshot.request.project_detail {
            replace_project_detail(conn, &outcome.request).await?;
        }
        for change in &outcome.quote_changes {
            apply_quote_change(conn, request_id, change, &outcome).await?;
        }
        if let Some(commit) = &outcome.budget_commit {
            commit_budget(conn, commit).await?;
        }
        insert_history(conn, &outcome.history).await?;

        Ok(outcome)
    }
}

#[async_trait]
impl LifecycleStore for SqlLifecycleStore {
    async fn insert_new(&self, outcome: &TransitionOutcome) -> Result<(), ApplicationError> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;
        insert_request(&mut tx, &outcome.request).await?;
        replace_items(&mut tx, &outcome.request).await?;
        replace_project_detail(&mut tx, &outcome.request).await?;
        insert_history(&mut tx, &outcome.history).await?;
        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(())
    }

    async fn execute(
        &self,
        request_id: &RequestId,
        fiscal_year: i32,
        apply: &TransitionFn<'_>,
    ) -> Result<TransitionOutcome, ApplicationError> {
        let mut tx =
            self.pool.begin_with("BEGIN IMMEDIATE").await.map_err(RepositoryError::from)?;
        let outcome = Self::run_transition(&mut tx, request_id, fiscal_year, apply).await?;
        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(outcome)
    }

    async fn load(&self, request_id: &RequestId) -> Result<Option<Request>, ApplicationError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        Ok(fetch_request(&mut conn, request_id).await?)
    }

    async fn list(&self, filter: &RequestFilter) -> Result<Vec<Request>, ApplicationError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        let rows = sqlx::query(
            "SELECT
                id,
                requester_id,
                department_id,
                request_type,
                title,
                description,
                total_cost,
                state,
                transaction_reference,
                version,
                submitted_at,
                completed_at,
                created_at,
                updated_at
             FROM purchase_request
             WHERE (?1 IS NULL OR requester_id = ?1)
               AND (?2 IS NULL OR department_id = ?2)
               AND (?3 IS NULL OR state = ?3)
               AND (?4 IS NULL OR request_type = ?4)
             ORDER BY created_at DESC, id ASC",
        )
        .bind(filter.requester_id.as_ref().map(|id| id.0.as_str()))
        .bind(filter.department_id.as_ref().map(|id| id.0.as_str()))
        .bind(filter.state.map(|state| state.as_str()))
        .bind(filter.request_type.map(|kind| kind.as_str()))
        .fetch_all(&mut *conn)
        .await
        .map_err(RepositoryError::from)?;

        let mut requests = Vec::with_capacity(rows.len());
        for row in rows {
            requests.push(hydrate_request(&mut conn, row).await?);
        }
        Ok(requests)
    }

    async fn history(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<ApprovalHistoryEntry>, ApplicationError> {
        let rows = sqlx::query(
            "SELECT
                id,
                request_id,
                sequence,
                approver_id,
                status,
                from_state,
                to_state,
                comments,
                recorded_at
             FROM approval_history
             WHERE request_id = ?
             ORDER BY sequence ASC",
        )
        .bind(&request_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.into_iter().map(history_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    async fn quotes(&self, request_id: &RequestId) -> Result<Vec<PriceQuote>, ApplicationError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        Ok(fetch_quotes(&mut conn, request_id).await?)
    }

    async fn find_quote(
        &self,
        quote_id: &PriceQuoteId,
    ) -> Result<Option<PriceQuote>, ApplicationError> {
        let row = sqlx::query(
            "SELECT
                id,
                request_id,
                vendor_name,
                vendor_contact,
                vendor_email,
                vendor_phone,
                quote_amount,
                quote_details,
                document_path,
                validity_date,
                payment_terms,
                delivery_time,
                notes,
                is_selected,
                created_by,
                created_at,
                updated_at
             FROM price_quote
             WHERE id = ?",
        )
        .bind(&quote_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.map(quote_from_row).transpose()?)
    }
}

async fn load_snapshot(
    conn: &mut SqliteConnection,
    request_id: &RequestId,
    fiscal_year: i32,
) -> Result<Option<RequestSnapshot>, RepositoryError> {
    let Some(request) = fetch_request(conn, request_id).await? else {
        return Ok(None);
    };
    let quotes = fetch_quotes(conn, request_id).await?;
    let budget = fetch_budget(conn, &request.department_id, fiscal_year).await?;
    let requester_manager = fetch_manager(conn, &request.requester_id).await?;
    let history_len = fetch_history_len(conn, request_id).await?;

    Ok(Some(RequestSnapshot {
        request,
        quotes,
        budget,
        fiscal_year,
        requester_manager,
        history_len,
    }))
}

async fn fetch_request(
    conn: &mut SqliteConnection,
    request_id: &RequestId,
) -> Result<Option<Request>, RepositoryError> {
    let row = sqlx::query(
        "SELECT
            id,
            requester_id,
            department_id,
            request_type,
            title,
            description,
            total_cost,
            state,
            transaction_reference,
            version,
            submitted_at,
            completed_at,
            created_at,
            updated_at
         FROM purchase_request
         WHERE id = ?",
    )
    .bind(&request_id.0)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => Ok(Some(hydrate_request(conn, row).await?)),
        None => Ok(None),
    }
}

async fn hydrate_request(
    conn: &mut SqliteConnection,
    row: SqliteRow,
) -> Result<Request, RepositoryError> {
    let request_id = RequestId(row.try_get("id")?);
    let items = fetch_items(conn, &request_id).await?;
    let project_detail = fetch_project_detail(conn, &request_id).await?;
    request_from_row(row, items, project_detail)
}

async fn fetch_items(
    conn: &mut SqliteConnection,
    request_id: &RequestId,
) -> Result<Vec<RequestItem>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT name, description, quantity, unit_price
         FROM request_item
         WHERE request_id = ?
         ORDER BY position ASC",
    )
    .bind(&request_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter()
        .map(|row| -> Result<RequestItem, RepositoryError> {
            Ok(RequestItem {
                name: row.try_get("name")?,
                description: row.try_get("description")?,
                quantity: parse_u32("quantity", row.try_get("quantity")?)?,
                unit_price: parse_decimal("unit_price", row.try_get("unit_price")?)?,
            })
        })
        .collect()
}

async fn fetch_project_detail(
    conn: &mut SqliteConnection,
    request_id: &RequestId,
) -> Result<Option<ProjectDetail>, RepositoryError> {
    let row = sqlx::query(
        "SELECT start_date, end_date, milestones_json, risk_assessment
         FROM project_detail
         WHERE request_id = ?",
    )
    .bind(&request_id.0)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(|row| -> Result<ProjectDetail, RepositoryError> {
        let milestones_json: String = row.try_get("milestones_json")?;
        let milestones = serde_json::from_str(&milestones_json).map_err(|error| {
            RepositoryError::Decode(format!("invalid milestones_json: {error}"))
        })?;
        Ok(ProjectDetail {
            start_date: parse_optional_date("start_date", row.try_get("start_date")?)?,
            end_date: parse_optional_date("end_date", row.try_get("end_date")?)?,
            milestones,
            risk_assessment: row.try_get("risk_assessment")?,
        })
    })
    .transpose()
}

async fn fetch_quotes(
    conn: &mut SqliteConnection,
    request_id: &RequestId,
) -> Result<Vec<PriceQuote>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT
            id,
            request_id,
            vendor_name,
            vendor_contact,
            vendor_email,
            vendor_phone,
            quote_amount,
            quote_details,
            document_path,
            validity_date,
            payment_terms,
            delivery_time,
            notes,
            is_selected,
            created_by,
            created_at,
            updated_at
         FROM price_quote
         WHERE request_id = ?
         ORDER BY created_at ASC, id ASC",
    )
    .bind(&request_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(quote_from_row).collect()
}

async fn fetch_budget(
    conn: &mut SqliteConnection,
    department_id: &DepartmentId,
    fiscal_year: i32,
) -> Result<Option<Budget>, RepositoryError> {
    let row = sqlx::query(
        "SELECT department_id, fiscal_year, total_amount, spent_amount, updated_at
         FROM budget
         WHERE department_id = ? AND fiscal_year = ?",
    )
    .bind(&department_id.0)
    .bind(fiscal_year)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(budget_from_row).transpose()
}

async fn fetch_manager(
    conn: &mut SqliteConnection,
    user_id: &UserId,
) -> Result<Option<UserId>, RepositoryError> {
    let manager = sqlx::query("SELECT reports_to FROM app_user WHERE id = ?")
        .bind(&user_id.0)
        .fetch_optional(&mut *conn)
        .await?
        .map(|row| row.try_get::<Option<String>, _>("reports_to"))
        .transpose()?
        .flatten();

    Ok(manager.map(UserId))
}

async fn fetch_history_len(
    conn: &mut SqliteConnection,
    request_id: &RequestId,
) -> Result<u32, RepositoryError> {
    let length = sqlx::query(
        "SELECT COALESCE(MAX(sequence), 0) AS length FROM approval_history WHERE request_id = ?",
    )
    .bind(&request_id.0)
    .fetch_one(&mut *conn)
    .await?
    .try_get::<i64, _>("length")?;

    parse_u32("sequence", length)
}

async fn insert_request(
    conn: &mut SqliteConnection,
    request: &Request,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO purchase_request (
            id,
            requester_id,
            department_id,
            request_type,
            title,
            description,
            total_cost,
            state,
            transaction_reference,
            version,
            submitted_at,
            completed_at,
            created_at,
            updated_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&request.id.0)
    .bind(&request.requester_id.0)
    .bind(&request.department_id.0)
    .bind(request.request_type.as_str())
    .bind(&request.title)
    .bind(&request.description)
    .bind(request.total_cost.to_string())
    .bind(request.state.as_str())
    .bind(&request.transaction_reference)
    .bind(i64::from(request.version))
    .bind(request.submitted_at.map(|timestamp| timestamp.to_rfc3339()))
    .bind(request.completed_at.map(|timestamp| timestamp.to_rfc3339()))
    .bind(request.created_at.to_rfc3339())
    .bind(request.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Writes the request row, refusing the write when another transition has
/// bumped the version since the snapshot was taken.
async fn update_request(
    conn: &mut SqliteConnection,
    request: &Request,
    expected_version: u32,
) -> Result<(), RepositoryError> {
    let result = sqlx::query(
        "UPDATE purchase_request SET
            department_id = ?,
            request_type = ?,
            title = ?,
            description = ?,
            total_cost = ?,
            state = ?,
            transaction_reference = ?,
            version = ?,
            submitted_at = ?,
            completed_at = ?,
            updated_at = ?
         WHERE id = ? AND version = ?",
    )
    .bind(&request.department_id.0)
    .bind(request.request_type.as_str())
    .bind(&request.title)
    .bind(&request.description)
    .bind(request.total_cost.to_string())
    .bind(request.state.as_str())
    .bind(&request.transaction_reference)
    .bind(i64::from(request.version))
    .bind(request.submitted_at.map(|timestamp| timestamp.to_rfc3339()))
    .bind(request.completed_at.map(|timestamp| timestamp.to_rfc3339()))
    .bind(request.updated_at.to_rfc3339())
    .bind(&request.id.0)
    .bind(i64::from(expected_version))
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::Conflict(format!(
            "request {} is no longer at version {expected_version}",
            request.id
        )));
    }
    Ok(())
}

async fn replace_items(
    conn: &mut SqliteConnection,
    request: &Request,
) -> Result<(), RepositoryError> {
    sqlx::query("DELETE FROM request_item WHERE request_id = ?")
        .bind(&request.id.0)
        .execute(&mut *conn)
        .await?;

    for (position, item) in request.items.iter().enumerate() {
        sqlx::query(
            "INSERT INTO request_item (request_id, position, name, description, quantity, unit_price)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&request.id.0)
        .bind(position as i64)
        .bind(&item.name)
        .bind(&item.description)
        .bind(i64::from(item.quantity))
        .bind(item.unit_price.to_string())
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn replace_project_detail(
    conn: &mut SqliteConnection,
    request: &Request,
) -> Result<(), RepositoryError> {
    let Some(detail) = &request.project_detail else {
        sqlx::query("DELETE FROM project_detail WHERE request_id = ?")
            .bind(&request.id.0)
            .execute(&mut *conn)
            .await?;
        return Ok(());
    };

    let milestones_json = serde_json::to_string(&detail.milestones)
        .map_err(|error| RepositoryError::Decode(format!("milestones: {error}")))?;
    sqlx::query(
        "INSERT INTO project_detail (request_id, start_date, end_date, milestones_json, risk_assessment)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(request_id) DO UPDATE SET
            start_date = excluded.start_date,
            end_date = excluded.end_date,
            milestones_json = excluded.milestones_json,
            risk_assessment = excluded.risk_assessment",
    )
    .bind(&request.id.0)
    .bind(detail.start_date.map(format_date))
    .bind(detail.end_date.map(format_date))
    .bind(milestones_json)
    .bind(&detail.risk_assessment)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn apply_quote_change(
    conn: &mut SqliteConnection,
    request_id: &RequestId,
    change: &QuoteChange,
    outcome: &TransitionOutcome,
) -> Result<(), RepositoryError> {
    match change {
        QuoteChange::Insert(quote) => insert_quote(conn, quote).await,
        QuoteChange::Update(quote) => {
            let result = sqlx::query(
                "UPDATE price_quote SET
                    vendor_name = ?,
                    vendor_contact = ?,
                    vendor_email = ?,
                    vendor_phone = ?,
                    quote_amount = ?,
                    quote_details = ?,
                    document_path = ?,
                    validity_date = ?,
                    payment_terms = ?,
                    delivery_time = ?,
                    notes = ?,
                    updated_at = ?
                 WHERE id = ? AND request_id = ?",
            )
            .bind(&quote.vendor_name)
            .bind(&quote.vendor_contact)
            .bind(&quote.vendor_email)
            .bind(&quote.vendor_phone)
            .bind(quote.quote_amount.to_string())
            .bind(&quote.quote_details)
            .bind(&quote.document_path)
            .bind(format_date(quote.validity_date))
            .bind(&quote.payment_terms)
            .bind(&quote.delivery_time)
            .bind(&quote.notes)
            .bind(quote.updated_at.to_rfc3339())
            .bind(&quote.id.0)
            .bind(&request_id.0)
            .execute(&mut *conn)
            .await?;
            expect_one_row(result.rows_affected(), &quote.id)
        }
        QuoteChange::Delete(quote_id) => {
            let result = sqlx::query("DELETE FROM price_quote WHERE id = ? AND request_id = ?")
                .bind(&quote_id.0)
                .bind(&request_id.0)
                .execute(&mut *conn)
                .await?;
            expect_one_row(result.rows_affected(), quote_id)
        }
        QuoteChange::Select(quote_id) => {
            let updated_at = outcome.applied_at.to_rfc3339();
            sqlx::query(
                "UPDATE price_quote SET is_selected = 0, updated_at = ?
                 WHERE request_id = ? AND is_selected = 1",
            )
            .bind(&updated_at)
            .bind(&request_id.0)
            .execute(&mut *conn)
            .await?;

            let result = sqlx::query(
                "UPDATE price_quote SET is_selected = 1, updated_at = ?
                 WHERE id = ? AND request_id = ?",
            )
            .bind(&updated_at)
            .bind(&quote_id.0)
            .bind(&request_id.0)
            .execute(&mut *conn)
            .await?;
            expect_one_row(result.rows_affected(), quote_id)
        }
    }
}

fn expect_one_row(rows_affected: u64, quote_id: &PriceQuoteId) -> Result<(), RepositoryError> {
    if rows_affected == 0 {
        return Err(RepositoryError::Conflict(format!("quote {quote_id} changed concurrently")));
    }
    Ok(())
}

async fn insert_quote(conn: &mut SqliteConnection, quote: &PriceQuote) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO price_quote (
            id,
            request_id,
            vendor_name,
            vendor_contact,
            vendor_email,
            vendor_phone,
            quote_amount,
            quote_details,
            document_path,
            validity_date,
            payment_terms,
            delivery_time,
            notes,
            is_selected,
            created_by,
            created_at,
            updated_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&quote.id.0)
    .bind(&quote.request_id.0)
    .bind(&quote.vendor_name)
    .bind(&quote.vendor_contact)
    .bind(&quote.vendor_email)
    .bind(&quote.vendor_phone)
    .bind(quote.quote_amount.to_string())
    .bind(&quote.quote_details)
    .bind(&quote.document_path)
    .bind(format_date(quote.validity_date))
    .bind(&quote.payment_terms)
    .bind(&quote.delivery_time)
    .bind(&quote.notes)
    .bind(quote.is_selected)
    .bind(&quote.created_by.0)
    .bind(quote.created_at.to_rfc3339())
    .bind(quote.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Applies committed spend only if the row still holds the spend the guard
/// checked against.
pub(crate) async fn commit_budget(
    conn: &mut SqliteConnection,
    commit: &BudgetCommit,
) -> Result<(), RepositoryError> {
    let result = sqlx::query(
        "UPDATE budget SET spent_amount = ?, updated_at = ?
         WHERE department_id = ? AND fiscal_year = ? AND spent_amount = ?",
    )
    .bind(commit.new_spent.to_string())
    .bind(commit.committed_at.to_rfc3339())
    .bind(&commit.department_id.0)
    .bind(commit.fiscal_year)
    .bind(commit.previous_spent.to_string())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::Conflict(format!(
            "budget {}/{} changed since it was checked",
            commit.department_id, commit.fiscal_year
        )));
    }
    Ok(())
}

async fn insert_history(
    conn: &mut SqliteConnection,
    entry: &ApprovalHistoryEntry,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO approval_history (
            id,
            request_id,
            sequence,
            approver_id,
            status,
            from_state,
            to_state,
            comments,
            recorded_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&entry.id.0)
    .bind(&entry.request_id.0)
    .bind(i64::from(entry.sequence))
    .bind(&entry.approver_id.0)
    .bind(entry.status.as_str())
    .bind(entry.from_state.map(|state| state.as_str()))
    .bind(entry.to_state.as_str())
    .bind(&entry.comments)
    .bind(entry.recorded_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn request_from_row(
    row: SqliteRow,
    items: Vec<RequestItem>,
    project_detail: Option<ProjectDetail>,
) -> Result<Request, RepositoryError> {
    let type_raw = row.try_get::<String, _>("request_type")?;
    let request_type = RequestType::parse(&type_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown request_type `{type_raw}`")))?;
    let state_raw = row.try_get::<String, _>("state")?;
    let state = RequestState::parse(&state_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown request state `{state_raw}`")))?;

    Ok(Request {
        id: RequestId(row.try_get("id")?),
        requester_id: UserId(row.try_get("requester_id")?),
        department_id: DepartmentId(row.try_get("department_id")?),
        request_type,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        total_cost: parse_decimal("total_cost", row.try_get("total_cost")?)?,
        state,
        items,
        project_detail,
        transaction_reference: row.try_get("transaction_reference")?,
        version: parse_u32("version", row.try_get("version")?)?,
        submitted_at: parse_optional_timestamp("submitted_at", row.try_get("submitted_at")?)?,
        completed_at: parse_optional_timestamp("completed_at", row.try_get("completed_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn quote_from_row(row: SqliteRow) -> Result<PriceQuote, RepositoryError> {
    Ok(PriceQuote {
        id: PriceQuoteId(row.try_get("id")?),
        request_id: RequestId(row.try_get("request_id")?),
        vendor_name: row.try_get("vendor_name")?,
        vendor_contact: row.try_get("vendor_contact")?,
        vendor_email: row.try_get("vendor_email")?,
        vendor_phone: row.try_get("vendor_phone")?,
        quote_amount: parse_decimal("quote_amount", row.try_get("quote_amount")?)?,
        quote_details: row.try_get("quote_details")?,
        document_path: row.try_get("document_path")?,
        validity_date: parse_date("validity_date", row.try_get("validity_date")?)?,
        payment_terms: row.try_get("payment_terms")?,
        delivery_time: row.try_get("delivery_time")?,
        notes: row.try_get("notes")?,
        is_selected: row.try_get::<i64, _>("is_selected")? != 0,
        created_by: UserId(row.try_get("created_by")?),
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn history_from_row(row: SqliteRow) -> Result<ApprovalHistoryEntry, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = HistoryStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown history status `{status_raw}`")))?;
    let from_state = row
        .try_get::<Option<String>, _>("from_state")?
        .map(|raw| {
            RequestState::parse(&raw)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown from_state `{raw}`")))
        })
        .transpose()?;
    let to_state_raw = row.try_get::<String, _>("to_state")?;
    let to_state = RequestState::parse(&to_state_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown to_state `{to_state_raw}`")))?;

    Ok(ApprovalHistoryEntry {
        id: HistoryEntryId(row.try_get("id")?),
        request_id: RequestId(row.try_get("request_id")?),
        sequence: parse_u32("sequence", row.try_get("sequence")?)?,
        approver_id: UserId(row.try_get("approver_id")?),
        status,
        from_state,
        to_state,
        comments: row.try_get("comments")?,
        recorded_at: parse_timestamp("recorded_at", row.try_get("recorded_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use std::future::{poll_fn, Future};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::task::Poll;
    use std::time::Duration;

    use chrono::{DateTime, NaiveDate, Utc};
    use rust_decimal::Decimal;

    use procura_core::domain::actor::{Actor, DepartmentId, Role, UserId};
    use procura_core::domain::price_quote::{PriceQuoteId, QuoteDraft};
    use procura_core::domain::request::{
        ProjectDetail, RequestDraft, RequestId, RequestItem, RequestState, RequestType,
    };
    use procura_core::lifecycle::{LifecycleEngine, Operation, RequestSnapshot};
    use procura_core::ports::{LifecycleStore, RequestFilter};
    use procura_core::{ApplicationError, DomainError};

    use super::{commit_budget, SqlLifecycleStore};
    use crate::migrations;
    use crate::repositories::RepositoryError;
    use crate::{connect_with_settings, DbPool};

    #[tokio::test]
    async fn insert_new_round_trips_items_and_history() {
        let pool = setup_pool().await;
        let store = SqlLifecycleStore::new(pool.clone());
        let engine = LifecycleEngine::default();

        let outcome = engine
            .create(request_id(), &requester(), purchase_draft(), parse_ts("2026-02-23T12:00:00Z"))
            .expect("create");
        store.insert_new(&outcome).await.expect("insert");

        let loaded = store.load(&request_id()).await.expect("load").expect("request exists");
        assert_eq!(loaded, outcome.request);
        assert_eq!(loaded.items.len(), 2);

        let history = store.history(&request_id()).await.expect("history");
        assert_eq!(history, vec![outcome.history]);

        pool.close().await;
    }

    #[tokio::test]
    async fn project_detail_survives_updates() {
        let pool = setup_pool().await;
        let store = SqlLifecycleStore::new(pool.clone());
        let engine = LifecycleEngine::default();
        let actor = requester();
        let now = parse_ts("2026-02-23T12:00:00Z");

        let outcome = engine.create(request_id(), &actor, purchase_draft(), now).expect("create");
        store.insert_new(&outcome).await.expect("insert");

        let project = RequestDraft {
            request_type: RequestType::Project,
            items: Vec::new(),
            project_detail: Some(ProjectDetail {
                start_date: NaiveDate::from_ymd_opt(2026, 3, 1),
                end_date: NaiveDate::from_ymd_opt(2026, 9, 30),
                milestones: vec!["design".to_string(), "rollout".to_string()],
                risk_assessment: Some("vendor lock-in".to_string()),
            }),
            ..purchase_draft()
        };
        let operation = Operation::Update { draft: project.clone() };
        let updated = store
            .execute(&request_id(), 2026, &|snapshot: &RequestSnapshot| {
                engine.execute(snapshot, &actor, &operation, now)
            })
            .await
            .expect("update");

        let loaded = store.load(&request_id()).await.expect("load").expect("request exists");
        assert_eq!(loaded, updated.request);
        assert!(loaded.items.is_empty());
        assert_eq!(loaded.project_detail, project.project_detail);
        assert_eq!(loaded.version, 2);

        pool.close().await;
    }

    #[tokio::test]
    async fn failed_transition_writes_nothing() {
        let pool = setup_pool().await;
        let store = SqlLifecycleStore::new(pool.clone());
        let engine = LifecycleEngine::default();
        let now = parse_ts("2026-02-23T12:00:00Z");

        let outcome = engine.create(request_id(), &requester(), purchase_draft(), now).expect("create");
        store.insert_new(&outcome).await.expect("insert");

        let accountant = Actor::new("u-acct", [Role::Accountant]);
        let operation = Operation::ProcessByAccountant { comments: None };
        let error = store
            .execute(&request_id(), 2026, &|snapshot: &RequestSnapshot| {
                engine.execute(snapshot, &accountant, &operation, now)
            })
            .await
            .expect_err("draft cannot be processed");
        assert!(matches!(
            error,
            ApplicationError::Domain(DomainError::InvalidRequestState { .. })
        ));

        let loaded = store.load(&request_id()).await.expect("load").expect("request exists");
        assert_eq!(loaded.state, RequestState::Draft);
        assert_eq!(store.history(&request_id()).await.expect("history").len(), 1);

        // The connection is usable again after the rollback.
        let submit = Operation::Submit { comments: None };
        let actor = requester();
        store
            .execute(&request_id(), 2026, &|snapshot: &RequestSnapshot| {
                engine.execute(snapshot, &actor, &submit, now)
            })
            .await
            .expect("submit after rollback");

        pool.close().await;
    }

    #[tokio::test]
    async fn cancelled_transition_releases_the_write_lock() {
        let pool = setup_pool().await;
        let store = SqlLifecycleStore::new(pool.clone());
        let engine = LifecycleEngine::default();
        let actor = requester();
        let now = parse_ts("2026-02-23T12:00:00Z");

        let outcome = engine.create(request_id(), &actor, purchase_draft(), now).expect("create");
        store.insert_new(&outcome).await.expect("insert");

        let submit = Operation::Submit { comments: None };
        let applied = AtomicBool::new(false);
        let tracked = |snapshot: &RequestSnapshot| {
            applied.store(true, Ordering::SeqCst);
            engine.execute(snapshot, &actor, &submit, now)
        };

        // Drive the transition until it holds the lock, then abandon it mid-write.
        let id = request_id();
        let mut in_flight = store.execute(&id, 2026, &tracked);
        while !applied.load(Ordering::SeqCst) {
            let step = poll_fn(|cx| Poll::Ready(in_flight.as_mut().poll(cx))).await;
            assert!(step.is_pending(), "transition finished before it could be dropped");
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        drop(in_flight);

        let submitted = store
            .execute(&request_id(), 2026, &|snapshot: &RequestSnapshot| {
                engine.execute(snapshot, &actor, &submit, now)
            })
            .await
            .expect("pool connection is reusable after cancellation");
        assert_eq!(submitted.request.state, RequestState::Submitted);
        assert_eq!(submitted.request.version, 2);
        assert_eq!(store.history(&request_id()).await.expect("history").len(), 2);

        pool.close().await;
    }

    #[tokio::test]
    async fn missing_request_is_not_found() {
        let pool = setup_pool().await;
        let store = SqlLifecycleStore::new(pool.clone());
        let engine = LifecycleEngine::default();
        let actor = requester();
        let operation = Operation::Submit { comments: None };

        let error = store
            .execute(&RequestId("REQ-missing".to_string()), 2026, &|snapshot: &RequestSnapshot| {
                engine.execute(snapshot, &actor, &operation, Utc::now())
            })
            .await
            .expect_err("missing request");
        assert!(matches!(error, ApplicationError::NotFound(_)));

        pool.close().await;
    }

    #[tokio::test]
    async fn quote_selection_and_snapshot_budget_are_persisted() {
        let pool = setup_pool().await;
        let store = SqlLifecycleStore::new(pool.clone());
        let engine = LifecycleEngine::default();
        let now = parse_ts("2026-02-23T12:00:00Z");
        let requester = requester();
        let manager = Actor::new("u-dm", [Role::DirectManager]);
        let accountant = Actor::new("u-acct", [Role::Accountant]);

        let outcome = engine.create(request_id(), &requester, purchase_draft(), now).expect("create");
        store.insert_new(&outcome).await.expect("insert");

        let steps = vec![
            (requester.clone(), Operation::Submit { comments: None }),
            (manager.clone(), Operation::ApproveByDirectManager { comments: None }),
            (accountant.clone(), Operation::ProcessByAccountant { comments: None }),
            (
                accountant.clone(),
                Operation::AddQuote {
                    quote_id: PriceQuoteId("PQ-1".to_string()),
                    draft: quote_draft("Northwind", 550),
                    document_path: None,
                },
            ),
            (
                accountant.clone(),
                Operation::AddQuote {
                    quote_id: PriceQuoteId("PQ-2".to_string()),
                    draft: quote_draft("Contoso", 500),
                    document_path: Some("storage/quotes/contoso.pdf".to_string()),
                },
            ),
            (
                requester.clone(),
                Operation::SelectQuote { quote_id: PriceQuoteId("PQ-1".to_string()), comments: None },
            ),
        ];
        for (actor, operation) in &steps {
            store
                .execute(&request_id(), 2026, &|snapshot: &RequestSnapshot| {
                    assert_eq!(snapshot.requester_manager, Some(UserId("u-dm".to_string())));
                    assert!(snapshot.budget.is_some());
                    engine.execute(snapshot, actor, operation, now)
                })
                .await
                .expect("step applies");
        }

        let quotes = store.quotes(&request_id()).await.expect("quotes");
        assert_eq!(quotes.len(), 2);
        let selected: Vec<_> = quotes.iter().filter(|quote| quote.is_selected).collect();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, PriceQuoteId("PQ-1".to_string()));

        let found = store
            .find_quote(&PriceQuoteId("PQ-2".to_string()))
            .await
            .expect("find quote")
            .expect("quote exists");
        assert_eq!(found.document_path.as_deref(), Some("storage/quotes/contoso.pdf"));

        let history = store.history(&request_id()).await.expect("history");
        let sequences: Vec<u32> = history.iter().map(|entry| entry.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5, 6, 7]);

        let listed = store
            .list(&RequestFilter {
                state: Some(RequestState::QuoteSelected),
                ..RequestFilter::default()
            })
            .await
            .expect("list");
        assert_eq!(listed.len(), 1);
        assert!(store
            .list(&RequestFilter {
                requester_id: Some(UserId("u-other".to_string())),
                ..RequestFilter::default()
            })
            .await
            .expect("list")
            .is_empty());

        pool.close().await;
    }

    #[tokio::test]
    async fn budget_commit_refuses_stale_spend() {
        let pool = setup_pool().await;
        let mut conn = pool.acquire().await.expect("acquire");

        let commit = procura_core::budget::BudgetCommit {
            department_id: DepartmentId("dept-ops".to_string()),
            fiscal_year: 2026,
            amount: Decimal::new(100, 0),
            previous_spent: Decimal::new(50, 0),
            new_spent: Decimal::new(150, 0),
            committed_at: Utc::now(),
        };
        let error = commit_budget(&mut conn, &commit).await.expect_err("spend is 0, not 50");
        assert!(matches!(error, RepositoryError::Conflict(_)));

        let commit = procura_core::budget::BudgetCommit {
            previous_spent: Decimal::ZERO,
            new_spent: Decimal::new(100, 0),
            ..commit
        };
        commit_budget(&mut conn, &commit).await.expect("fresh spend commits");

        drop(conn);
        pool.close().await;
    }

    fn request_id() -> RequestId {
        RequestId("REQ-1".to_string())
    }

    fn requester() -> Actor {
        Actor::new("u-req", [Role::User])
    }

    fn purchase_draft() -> RequestDraft {
        RequestDraft {
            department_id: DepartmentId("dept-ops".to_string()),
            request_type: RequestType::Purchase,
            title: "Laptops".to_string(),
            description: "Two laptops for new hires".to_string(),
            total_cost: Decimal::new(600, 0),
            items: vec![
                RequestItem {
                    name: "Laptop".to_string(),
                    description: Some("14 inch".to_string()),
                    quantity: 2,
                    unit_price: Decimal::new(25_000, 2),
                },
                RequestItem {
                    name: "Dock".to_string(),
                    description: None,
                    quantity: 2,
                    unit_price: Decimal::new(5_000, 2),
                },
            ],
            project_detail: None,
        }
    }

    fn quote_draft(vendor: &str, amount: i64) -> QuoteDraft {
        QuoteDraft {
            vendor_name: vendor.to_string(),
            vendor_contact: None,
            vendor_email: None,
            vendor_phone: None,
            quote_amount: Decimal::new(amount, 0),
            quote_details: None,
            validity_date: NaiveDate::from_ymd_opt(2026, 12, 31).expect("date"),
            payment_terms: Some("Net 30".to_string()),
            delivery_time: None,
            notes: None,
        }
    }

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");

        let timestamp = "2026-01-01T00:00:00Z";
        sqlx::query("INSERT INTO department (id, name, created_at) VALUES ('dept-ops', 'Operations', ?)")
            .bind(timestamp)
            .execute(&pool)
            .await
            .expect("insert department");
        for (id, reports_to) in [("u-dm", None), ("u-req", Some("u-dm"))] {
            sqlx::query(
                "INSERT INTO app_user (id, display_name, department_id, reports_to, created_at)
                 VALUES (?, ?, 'dept-ops', ?, ?)",
            )
            .bind(id)
            .bind(id)
            .bind(reports_to)
            .bind(timestamp)
            .execute(&pool)
            .await
            .expect("insert user");
        }
        sqlx::query(
            "INSERT INTO budget (department_id, fiscal_year, total_amount, spent_amount, updated_at)
             VALUES ('dept-ops', 2026, '1000', '0', ?)",
        )
        .bind(timestamp)
        .execute(&pool)
        .await
        .expect("insert budget");
        pool
    }

    fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid timestamp").with_timezone(&Utc)
    }
}
