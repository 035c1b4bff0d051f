//! JSON routes over the request lifecycle.
//!
//! The caller is identified by the upstream identity layer through the
//! `x-actor-id` and `x-actor-roles` headers. `x-correlation-id` is echoed in
//! error bodies and generated when absent.
//!
//! - `POST /requests`, `GET /requests`, `GET|PUT /requests/{id}`
//! - `POST /requests/{id}/submit|resubmit|reject|return|process|transfer`
//! - `POST /requests/{id}/approvals/direct-manager|second|accountant|final`
//! - `GET|POST /requests/{id}/quotes`, `GET /requests/{id}/quotes/statistics`
//! - `PUT|DELETE /requests/{id}/quotes/{quote_id}`
//! - `POST /requests/{id}/quotes/{quote_id}/select`
//! - `GET /requests/{id}/quotes/{quote_id}/document`
//! - `GET /requests/{id}/history`
//! - `GET /notifications`, `POST /notifications/{id}/read`, `POST /notifications/read-all`

use axum::{
    extract::{DefaultBodyLimit, FromRequestParts, Path, Query, State},
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use procura_core::{
    Actor, ApplicationError, ApprovalHistoryEntry, DepartmentId, InterfaceError, Notification,
    PriceQuote, PriceQuoteId, QuoteDocument, QuoteDraft, QuoteStatistics, Request, RequestDraft,
    RequestFilter, RequestId, RequestService, RequestState, RequestType, Role, UserId,
};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLES_HEADER: &str = "x-actor-roles";
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Room for the JSON around a quote document.
const BODY_ENVELOPE_BYTES: u64 = 64 * 1024;

#[derive(Clone)]
pub struct ApiState {
    service: RequestService,
}

/// Largest request body accepted for a given attachment limit. Documents
/// travel as JSON number arrays, so one byte costs up to four characters.
pub fn body_limit(max_attachment_bytes: u64) -> usize {
    let limit = max_attachment_bytes.saturating_mul(4).saturating_add(BODY_ENVELOPE_BYTES);
    usize::try_from(limit).unwrap_or(usize::MAX)
}

pub fn router(service: RequestService) -> Router {
    let limit = body_limit(service.max_attachment_bytes());
    Router::new()
        .route("/requests", post(create_request).get(list_requests))
        .route("/requests/{id}", get(get_request).put(update_request))
        .route("/requests/{id}/submit", post(submit))
        .route("/requests/{id}/resubmit", post(resubmit))
        .route("/requests/{id}/reject", post(reject))
        .route("/requests/{id}/return", post(return_for_revision))
        .route("/requests/{id}/process", post(process))
        .route("/requests/{id}/transfer", post(transfer))
        .route("/requests/{id}/approvals/direct-manager", post(approve_direct_manager))
        .route("/requests/{id}/approvals/second", post(approve_second))
        .route("/requests/{id}/approvals/accountant", post(approve_accountant))
        .route("/requests/{id}/approvals/final", post(approve_final))
        .route("/requests/{id}/quotes", get(list_quotes).post(add_quote))
        .route("/requests/{id}/quotes/statistics", get(quote_statistics))
        .route("/requests/{id}/quotes/{quote_id}", put(update_quote).delete(delete_quote))
        .route("/requests/{id}/quotes/{quote_id}/select", post(select_quote))
        .route("/requests/{id}/quotes/{quote_id}/document", get(quote_document))
        .route("/requests/{id}/history", get(history))
        .route("/notifications", get(notifications))
        .route("/notifications/read-all", post(mark_all_read))
        .route("/notifications/{id}/read", post(mark_read))
        .layer(DefaultBodyLimit::max(limit))
        .with_state(ApiState { service })
}

// ---------------------------------------------------------------------------
// Caller and errors
// ---------------------------------------------------------------------------

/// The authenticated caller plus the correlation id of this HTTP request.
#[derive(Clone, Debug)]
pub struct Caller {
    pub actor: Actor,
    pub correlation_id: String,
}

impl Caller {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, ApiError> {
        let correlation_id = header(headers, CORRELATION_ID_HEADER)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let bad_request = |message: String| {
            ApiError(InterfaceError::BadRequest { message, correlation_id: correlation_id.clone() })
        };

        let actor_id = header(headers, ACTOR_ID_HEADER)
            .ok_or_else(|| bad_request(format!("missing `{ACTOR_ID_HEADER}` header")))?;
        let roles = header(headers, ACTOR_ROLES_HEADER)
            .ok_or_else(|| bad_request(format!("missing `{ACTOR_ROLES_HEADER}` header")))?
            .split(',')
            .filter(|role| !role.trim().is_empty())
            .map(|role| Role::parse(role).ok_or_else(|| bad_request(format!("unknown role `{role}`"))))
            .collect::<Result<Vec<_>, _>>()?;
        if roles.is_empty() {
            return Err(bad_request(format!("`{ACTOR_ROLES_HEADER}` must name at least one role")));
        }

        Ok(Self { actor: Actor::new(actor_id, roles), correlation_id })
    }

    fn fail(&self, error: ApplicationError) -> ApiError {
        ApiError(error.into_interface(self.correlation_id.clone()))
    }

    fn bad_request(&self, message: impl Into<String>) -> ApiError {
        ApiError(InterfaceError::BadRequest {
            message: message.into(),
            correlation_id: self.correlation_id.clone(),
        })
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Caller::from_headers(&parts.headers)
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok()).map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Debug)]
pub struct ApiError(pub InterfaceError);

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub detail: String,
    pub correlation_id: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(
                event_name = "api.request.failed",
                correlation_id = %self.0.correlation_id(),
                status = status.as_u16(),
                error = %self.0,
                "request failed on the server side"
            );
        }

        let body = ErrorBody {
            error: self.0.user_message().to_string(),
            detail: self.0.message().to_string(),
            correlation_id: self.0.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct CommentsBody {
    #[serde(default)]
    pub comments: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReasonBody {
    pub comments: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResubmitBody {
    #[serde(default)]
    pub draft: Option<RequestDraft>,
    #[serde(default)]
    pub comments: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TransferBody {
    #[serde(default)]
    pub transaction_reference: Option<String>,
    #[serde(default)]
    pub comments: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DocumentBody {
    pub file_name: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Deserialize)]
pub struct QuoteBody {
    pub quote: QuoteDraft,
    #[serde(default)]
    pub document: Option<DocumentBody>,
}

impl QuoteBody {
    fn into_parts(self) -> (QuoteDraft, Option<QuoteDocument>) {
        let document = self
            .document
            .map(|document| QuoteDocument { file_name: document.file_name, bytes: document.content });
        (self.quote, document)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub requester_id: Option<String>,
    pub department_id: Option<String>,
    pub state: Option<String>,
    pub request_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InboxQuery {
    #[serde(default)]
    pub unread_only: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InboxResponse {
    pub unread: u64,
    pub notifications: Vec<Notification>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MarkedResponse {
    pub updated: u64,
}

// ---------------------------------------------------------------------------
// Request handlers
// ---------------------------------------------------------------------------

async fn create_request(
    State(state): State<ApiState>,
    caller: Caller,
    Json(draft): Json<RequestDraft>,
) -> ApiResult<(StatusCode, Json<Request>)> {
    let request = state.service.create(&caller.actor, draft).await.map_err(|e| caller.fail(e))?;
    Ok((StatusCode::CREATED, Json(request)))
}

async fn list_requests(
    State(state): State<ApiState>,
    caller: Caller,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Request>>> {
    let state_filter = match query.state.as_deref() {
        Some(value) => Some(
            RequestState::parse(value)
                .ok_or_else(|| caller.bad_request(format!("unknown request state `{value}`")))?,
        ),
        None => None,
    };
    let type_filter = match query.request_type.as_deref() {
        Some(value) => Some(
            RequestType::parse(value)
                .ok_or_else(|| caller.bad_request(format!("unknown request type `{value}`")))?,
        ),
        None => None,
    };
    let filter = RequestFilter {
        requester_id: query.requester_id.map(UserId),
        department_id: query.department_id.map(DepartmentId),
        state: state_filter,
        request_type: type_filter,
    };

    let requests = state.service.list(&filter).await.map_err(|e| caller.fail(e))?;
    Ok(Json(requests))
}

async fn get_request(
    State(state): State<ApiState>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<Json<Request>> {
    let request = state.service.get(&RequestId(id)).await.map_err(|e| caller.fail(e))?;
    Ok(Json(request))
}

async fn update_request(
    State(state): State<ApiState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(draft): Json<RequestDraft>,
) -> ApiResult<Json<Request>> {
    let request = state
        .service
        .update(&caller.actor, &RequestId(id), draft)
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(Json(request))
}

async fn submit(
    State(state): State<ApiState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(body): Json<CommentsBody>,
) -> ApiResult<Json<Request>> {
    let request = state
        .service
        .submit(&caller.actor, &RequestId(id), body.comments)
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(Json(request))
}

async fn resubmit(
    State(state): State<ApiState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(body): Json<ResubmitBody>,
) -> ApiResult<Json<Request>> {
    let request = state
        .service
        .resubmit(&caller.actor, &RequestId(id), body.draft, body.comments)
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(Json(request))
}

async fn reject(
    State(state): State<ApiState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(body): Json<ReasonBody>,
) -> ApiResult<Json<Request>> {
    let request = state
        .service
        .reject(&caller.actor, &RequestId(id), body.comments)
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(Json(request))
}

async fn return_for_revision(
    State(state): State<ApiState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(body): Json<ReasonBody>,
) -> ApiResult<Json<Request>> {
    let request = state
        .service
        .return_for_revision(&caller.actor, &RequestId(id), body.comments)
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(Json(request))
}

async fn process(
    State(state): State<ApiState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(body): Json<CommentsBody>,
) -> ApiResult<Json<Request>> {
    let request = state
        .service
        .process_by_accountant(&caller.actor, &RequestId(id), body.comments)
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(Json(request))
}

async fn transfer(
    State(state): State<ApiState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(body): Json<TransferBody>,
) -> ApiResult<Json<Request>> {
    let request = state
        .service
        .transfer_funds(&caller.actor, &RequestId(id), body.transaction_reference, body.comments)
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(Json(request))
}

async fn approve_direct_manager(
    State(state): State<ApiState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(body): Json<CommentsBody>,
) -> ApiResult<Json<Request>> {
    let request = state
        .service
        .approve_by_direct_manager(&caller.actor, &RequestId(id), body.comments)
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(Json(request))
}

async fn approve_second(
    State(state): State<ApiState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(body): Json<CommentsBody>,
) -> ApiResult<Json<Request>> {
    let request = state
        .service
        .second_approval_by_direct_manager(&caller.actor, &RequestId(id), body.comments)
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(Json(request))
}

async fn approve_accountant(
    State(state): State<ApiState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(body): Json<CommentsBody>,
) -> ApiResult<Json<Request>> {
    let request = state
        .service
        .approve_by_accountant(&caller.actor, &RequestId(id), body.comments)
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(Json(request))
}

async fn approve_final(
    State(state): State<ApiState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(body): Json<CommentsBody>,
) -> ApiResult<Json<Request>> {
    let request = state
        .service
        .approve_by_final_manager(&caller.actor, &RequestId(id), body.comments)
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(Json(request))
}

async fn history(
    State(state): State<ApiState>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<ApprovalHistoryEntry>>> {
    let entries = state.service.history(&RequestId(id)).await.map_err(|e| caller.fail(e))?;
    Ok(Json(entries))
}

// ---------------------------------------------------------------------------
// Quote handlers
// ---------------------------------------------------------------------------

async fn list_quotes(
    State(state): State<ApiState>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<PriceQuote>>> {
    let quotes = state.service.quotes(&RequestId(id)).await.map_err(|e| caller.fail(e))?;
    Ok(Json(quotes))
}

async fn quote_statistics(
    State(state): State<ApiState>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<Json<QuoteStatistics>> {
    let statistics =
        state.service.quote_statistics(&RequestId(id)).await.map_err(|e| caller.fail(e))?;
    Ok(Json(statistics))
}

async fn add_quote(
    State(state): State<ApiState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(body): Json<QuoteBody>,
) -> ApiResult<(StatusCode, Json<PriceQuote>)> {
    let (draft, document) = body.into_parts();
    let quote = state
        .service
        .add_quote(&caller.actor, &RequestId(id), draft, document)
        .await
        .map_err(|e| caller.fail(e))?;
    Ok((StatusCode::CREATED, Json(quote)))
}

async fn update_quote(
    State(state): State<ApiState>,
    caller: Caller,
    Path((id, quote_id)): Path<(String, String)>,
    Json(body): Json<QuoteBody>,
) -> ApiResult<Json<PriceQuote>> {
    let (draft, document) = body.into_parts();
    let quote = state
        .service
        .update_quote(&caller.actor, &RequestId(id), &PriceQuoteId(quote_id), draft, document)
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(Json(quote))
}

async fn delete_quote(
    State(state): State<ApiState>,
    caller: Caller,
    Path((id, quote_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    state
        .service
        .delete_quote(&caller.actor, &RequestId(id), &PriceQuoteId(quote_id))
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn select_quote(
    State(state): State<ApiState>,
    caller: Caller,
    Path((id, quote_id)): Path<(String, String)>,
    Json(body): Json<CommentsBody>,
) -> ApiResult<Json<Request>> {
    let request = state
        .service
        .select_quote(&caller.actor, &RequestId(id), &PriceQuoteId(quote_id), body.comments)
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(Json(request))
}

async fn quote_document(
    State(state): State<ApiState>,
    caller: Caller,
    Path((id, quote_id)): Path<(String, String)>,
) -> ApiResult<Vec<u8>> {
    state
        .service
        .quote_document(&RequestId(id), &PriceQuoteId(quote_id))
        .await
        .map_err(|e| caller.fail(e))
}

// ---------------------------------------------------------------------------
// Notification handlers
// ---------------------------------------------------------------------------

async fn notifications(
    State(state): State<ApiState>,
    caller: Caller,
    Query(query): Query<InboxQuery>,
) -> ApiResult<Json<InboxResponse>> {
    let user_id = &caller.actor.id;
    let notifications = state
        .service
        .notifications(user_id, query.unread_only)
        .await
        .map_err(|e| caller.fail(e))?;
    let unread =
        state.service.unread_notification_count(user_id).await.map_err(|e| caller.fail(e))?;
    Ok(Json(InboxResponse { unread, notifications }))
}

async fn mark_read(
    State(state): State<ApiState>,
    caller: Caller,
    Path(notification_id): Path<i64>,
) -> ApiResult<Json<MarkedResponse>> {
    let found = state
        .service
        .mark_notification_read(&caller.actor.id, notification_id)
        .await
        .map_err(|e| caller.fail(e))?;
    if !found {
        return Err(caller.fail(ApplicationError::NotFound(format!(
            "notification {notification_id}"
        ))));
    }
    Ok(Json(MarkedResponse { updated: 1 }))
}

async fn mark_all_read(
    State(state): State<ApiState>,
    caller: Caller,
) -> ApiResult<Json<MarkedResponse>> {
    let updated = state
        .service
        .mark_all_notifications_read(&caller.actor.id)
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(Json(MarkedResponse { updated }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request as HttpRequest, StatusCode},
        Router,
    };
    use chrono::{DateTime, Utc};
    use procura_core::memory::{InMemoryAttachmentStore, RecordingNotifier, StaticDirectory};
    use procura_core::{
        BudgetLedger, DepartmentId, PriceQuote, Request, RequestService, RequestState, Role,
    };
    use procura_db::InMemoryLifecycleStore;
    use serde::de::DeserializeOwned;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::{body_limit, router, ErrorBody, InboxResponse};

    fn app() -> Router {
        router(service(Arc::new(InMemoryLifecycleStore::default())))
    }

    fn service(store: Arc<InMemoryLifecycleStore>) -> RequestService {
        let now = DateTime::parse_from_rfc3339("2026-05-04T09:00:00Z")
            .expect("valid timestamp")
            .with_timezone(&Utc);
        let directory = StaticDirectory::default()
            .with_manager("u-req", "u-dm")
            .with_role("u-acct", Role::Accountant);
        RequestService::new(
            store,
            Arc::new(directory),
            Arc::new(RecordingNotifier::default()),
            Arc::new(InMemoryAttachmentStore::default()),
        )
        .with_clock(Arc::new(move || now))
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        actor: Option<(&str, &str)>,
        body: Option<Value>,
    ) -> (StatusCode, Vec<u8>) {
        let mut builder = HttpRequest::builder().method(method).uri(uri);
        if let Some((id, roles)) = actor {
            builder = builder.header("x-actor-id", id).header("x-actor-roles", roles);
        }
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response =
            app.clone().oneshot(builder.body(body).expect("build request")).await.expect("call");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("read body");
        (status, bytes.to_vec())
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> T {
        serde_json::from_slice(bytes).expect("decode response body")
    }

    fn draft() -> Value {
        json!({
            "department_id": "dept-ops",
            "request_type": "PURCHASE",
            "title": "Label printer",
            "description": "Replacement for the dock printer",
            "total_cost": "320.00"
        })
    }

    async fn created(app: &Router) -> Request {
        let (status, body) =
            call(app, Method::POST, "/requests", Some(("u-req", "USER")), Some(draft())).await;
        assert_eq!(status, StatusCode::CREATED);
        decode(&body)
    }

    #[tokio::test]
    async fn missing_actor_headers_are_a_bad_request() {
        let app = app();
        let (status, body) = call(&app, Method::POST, "/requests", None, Some(draft())).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: ErrorBody = decode(&body);
        assert!(error.detail.contains("x-actor-id"));
        assert!(!error.correlation_id.is_empty());
    }

    #[tokio::test]
    async fn unknown_role_is_a_bad_request() {
        let app = app();
        let (status, _) =
            call(&app, Method::GET, "/requests", Some(("u-req", "USER,PRESIDENT")), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn submit_and_approve_over_http() {
        let app = app();
        let request = created(&app).await;
        let base = format!("/requests/{}", request.id.0);

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("{base}/submit"),
            Some(("u-req", "USER")),
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(decode::<Request>(&body).state, RequestState::Submitted);

        let approve = format!("{base}/approvals/direct-manager");
        let (status, body) = call(
            &app,
            Method::POST,
            &approve,
            Some(("u-dm", "DIRECT_MANAGER")),
            Some(json!({ "comments": "ok" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(decode::<Request>(&body).state, RequestState::DmApproved);

        let (status, body) =
            call(&app, Method::POST, &approve, Some(("u-dm", "DIRECT_MANAGER")), Some(json!({})))
                .await;
        assert_eq!(status, StatusCode::CONFLICT);
        let error: ErrorBody = decode(&body);
        assert!(error.detail.contains("DM_APPROVED"), "{}", error.detail);

        let (status, body) =
            call(&app, Method::GET, &format!("{base}/history"), Some(("u-req", "USER")), None)
                .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(decode::<Vec<Value>>(&body).len(), 3);
    }

    #[tokio::test]
    async fn unknown_request_is_not_found() {
        let app = app();
        let (status, _) =
            call(&app, Method::GET, "/requests/REQ-missing", Some(("u-req", "USER")), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn return_without_reason_is_a_bad_request() {
        let app = app();
        let request = created(&app).await;
        let base = format!("/requests/{}", request.id.0);
        call(&app, Method::POST, &format!("{base}/submit"), Some(("u-req", "USER")), Some(json!({})))
            .await;

        let (status, _) = call(
            &app,
            Method::POST,
            &format!("{base}/return"),
            Some(("u-dm", "DIRECT_MANAGER")),
            Some(json!({ "comments": " " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_filters_by_state_and_rejects_unknown_states() {
        let app = app();
        let request = created(&app).await;

        let (status, body) =
            call(&app, Method::GET, "/requests?state=DRAFT", Some(("u-req", "USER")), None).await;
        assert_eq!(status, StatusCode::OK);
        let listed: Vec<Request> = decode(&body);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, request.id);

        let (status, _) =
            call(&app, Method::GET, "/requests?state=ARCHIVED", Some(("u-req", "USER")), None)
                .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn inbox_lists_and_marks_notifications() {
        let app = app();
        let request = created(&app).await;
        call(
            &app,
            Method::POST,
            &format!("/requests/{}/submit", request.id.0),
            Some(("u-req", "USER")),
            Some(json!({})),
        )
        .await;

        let manager = Some(("u-dm", "DIRECT_MANAGER"));
        let (status, body) =
            call(&app, Method::GET, "/notifications?unread_only=true", manager, None).await;
        assert_eq!(status, StatusCode::OK);
        let inbox: InboxResponse = decode(&body);
        assert_eq!(inbox.unread, 1);
        assert_eq!(inbox.notifications[0].message, "New request needs your approval");

        let read = format!("/notifications/{}/read", inbox.notifications[0].id);
        let (status, _) = call(&app, Method::POST, &read, manager, None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) =
            call(&app, Method::POST, &read, Some(("u-req", "USER")), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = call(&app, Method::GET, "/notifications", manager, None).await;
        let inbox: InboxResponse = decode(&body);
        assert_eq!(inbox.unread, 0);
        assert!(inbox.notifications[0].is_read);
    }

    #[test]
    fn body_limit_covers_number_array_documents() {
        assert_eq!(body_limit(1_000), 4_000 + 64 * 1024);
        assert_eq!(body_limit(u64::MAX), usize::MAX);
    }

    #[tokio::test]
    async fn quote_documents_up_to_the_attachment_limit_are_accepted() {
        let store = Arc::new(InMemoryLifecycleStore::default());
        store
            .allocate(&DepartmentId("dept-ops".to_string()), 2026, "10000".parse().expect("decimal"))
            .await
            .expect("allocate budget");
        let app = router(service(store).with_max_attachment_bytes(1024 * 1024));

        let request = created(&app).await;
        let base = format!("/requests/{}", request.id.0);
        for (uri, actor) in [
            (format!("{base}/submit"), ("u-req", "USER")),
            (format!("{base}/approvals/direct-manager"), ("u-dm", "DIRECT_MANAGER")),
            (format!("{base}/process"), ("u-acct", "ACCOUNTANT")),
        ] {
            let (status, body) = call(&app, Method::POST, &uri, Some(actor), Some(json!({}))).await;
            assert_eq!(status, StatusCode::OK, "{uri}: {}", String::from_utf8_lossy(&body));
        }

        // Roughly 3.5 MiB of JSON, above axum's default body limit.
        let content = vec![200u8; 900 * 1024];
        let quote = json!({
            "quote": {
                "vendor_name": "Northwind",
                "quote_amount": "300.00",
                "validity_date": "2026-06-30"
            },
            "document": { "file_name": "quote.pdf", "content": content }
        });
        let (status, body) = call(
            &app,
            Method::POST,
            &format!("{base}/quotes"),
            Some(("u-acct", "ACCOUNTANT")),
            Some(quote),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{}", String::from_utf8_lossy(&body));
        assert!(decode::<PriceQuote>(&body).document_path.is_some());
    }
}
