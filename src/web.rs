// 🌐 Web front end - REST API with Axum plus a single-page UI
//
// Every JSON response uses the `{success, data, error}` envelope. Library
// errors map to HTTP statuses in `ApiError::into_response`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::BudgetError;
use crate::models::{Account, Budget, NewBudget, NewTransaction, OfxKey, OfxTransaction, Transaction, TxnReconcile};
use crate::reconcile::{self, Matcher, ReconcileRequest};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
}

impl AppState {
    pub fn new(conn: Connection) -> Self {
        AppState {
            db: Arc::new(Mutex::new(conn)),
        }
    }

    /// A handler that panicked while holding the lock leaves it poisoned;
    /// the connection itself is still usable, so take it back.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("recovering database lock after a panicked request");
            poisoned.into_inner()
        })
    }
}

/// API Response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    Budget(BudgetError),
}

impl From<BudgetError> for ApiError {
    fn from(err: BudgetError) -> Self {
        ApiError::Budget(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Budget(err @ BudgetError::NotFound { .. }) => {
                tracing::info!("Resource not found: {}", err);
                (StatusCode::NOT_FOUND, err.to_string())
            }
            ApiError::Budget(
                err @ (BudgetError::Validation(_)
                | BudgetError::UnknownStrategy { .. }
                | BudgetError::InvalidStrategyArgs(_)),
            ) => {
                tracing::warn!("Bad request: {}", err);
                (StatusCode::BAD_REQUEST, err.to_string())
            }
            ApiError::Budget(err @ BudgetError::Integrity(_)) => {
                tracing::warn!("Conflict: {}", err);
                (StatusCode::CONFLICT, err.to_string())
            }
            ApiError::Budget(err) => {
                tracing::error!("Request failed: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        (status, Json(ApiResponse::<()>::err(message))).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::ok(data)))
}

// ============================================================================
// API Handlers
// ============================================================================

/// Account plus its latest statement balance
#[derive(Debug, Serialize, Deserialize)]
pub struct AccountSummary {
    #[serde(flatten)]
    pub account: Account,
    pub balance: Option<Decimal>,
}

fn summarize(conn: &Connection, account: Account) -> Result<AccountSummary, ApiError> {
    let balance = account.balance(conn)?;
    Ok(AccountSummary { account, balance })
}

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/accounts
async fn list_accounts(State(state): State<AppState>) -> ApiResult<Vec<AccountSummary>> {
    let conn = state.conn();
    let summaries = Account::all(&conn)?
        .into_iter()
        .map(|a| summarize(&conn, a))
        .collect::<Result<Vec<_>, _>>()?;
    ok(summaries)
}

/// GET /api/accounts/:id
async fn get_account(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<AccountSummary> {
    let conn = state.conn();
    let account = Account::get(&conn, id)?;
    ok(summarize(&conn, account)?)
}

#[derive(Debug, Deserialize)]
struct PayoffQuery {
    payment: Option<Decimal>,
}

/// GET /api/accounts/:id/payoff?payment=N
async fn account_payoff(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<PayoffQuery>,
) -> ApiResult<crate::models::account::PayoffReport> {
    let conn = state.conn();
    let account = Account::get(&conn, id)?;
    ok(account.payoff(&conn, Utc::now().date_naive(), query.payment)?)
}

/// GET /api/budgets
async fn list_budgets(State(state): State<AppState>) -> ApiResult<Vec<Budget>> {
    let conn = state.conn();
    ok(Budget::all(&conn)?)
}

/// POST /api/budgets
async fn create_budget(
    State(state): State<AppState>,
    Json(new): Json<NewBudget>,
) -> Result<impl IntoResponse, ApiError> {
    let conn = state.conn();
    let budget = Budget::create(&conn, &new)?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(budget))))
}

#[derive(Debug, Deserialize)]
struct TransactionQuery {
    account_id: Option<i64>,
}

/// GET /api/transactions?account_id=N
async fn list_transactions(
    State(state): State<AppState>,
    Query(query): Query<TransactionQuery>,
) -> ApiResult<Vec<Transaction>> {
    let conn = state.conn();
    match query.account_id {
        Some(id) => ok(Transaction::for_account(&conn, id)?),
        None => ok(Transaction::all(&conn)?),
    }
}

/// POST /api/transactions
async fn create_transaction(
    State(state): State<AppState>,
    Json(new): Json<NewTransaction>,
) -> Result<impl IntoResponse, ApiError> {
    let conn = state.conn();
    let txn = Transaction::create(&conn, &new)?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(txn))))
}

/// GET /api/reconcile/unreconciled
async fn unreconciled(State(state): State<AppState>) -> ApiResult<reconcile::Unreconciled> {
    let conn = state.conn();
    ok(reconcile::unreconciled(&conn)?)
}

#[derive(Debug, Deserialize)]
struct MatchQuery {
    days: Option<i64>,
}

impl MatchQuery {
    fn matcher(&self) -> Matcher {
        self.days.map(Matcher::with_tolerance).unwrap_or_default()
    }
}

/// GET /api/reconcile/suggestions?days=N
async fn suggestions(
    State(state): State<AppState>,
    Query(query): Query<MatchQuery>,
) -> ApiResult<Vec<reconcile::Suggestion>> {
    let conn = state.conn();
    ok(reconcile::suggest_matches(&conn, &query.matcher())?)
}

/// POST /api/reconcile
async fn create_reconcile(
    State(state): State<AppState>,
    Json(request): Json<ReconcileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let conn = state.conn();
    let rec = reconcile::reconcile(&conn, &request)?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(rec))))
}

/// POST /api/reconcile/auto?days=N
async fn auto_reconcile(
    State(state): State<AppState>,
    Query(query): Query<MatchQuery>,
) -> ApiResult<Vec<TxnReconcile>> {
    let mut conn = state.conn();
    ok(reconcile::auto_reconcile(&mut conn, &query.matcher())?)
}

/// GET /api/txn_reconciles
async fn list_txn_reconciles(State(state): State<AppState>) -> ApiResult<Vec<TxnReconcile>> {
    let conn = state.conn();
    ok(TxnReconcile::all(&conn)?)
}

/// GET /api/ofx/:account_id/:fitid - FITID is URL-encoded; `Path` decodes it
async fn get_ofx(
    State(state): State<AppState>,
    Path((account_id, fitid)): Path<(i64, String)>,
) -> ApiResult<OfxTransaction> {
    let conn = state.conn();
    ok(OfxTransaction::require(&conn, &OfxKey::new(account_id, fitid))?)
}

/// GET / - Serve index.html
async fn serve_index() -> impl IntoResponse {
    Html(include_str!("../web/index.html"))
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/accounts", get(list_accounts))
        .route("/accounts/:id", get(get_account))
        .route("/accounts/:id/payoff", get(account_payoff))
        .route("/budgets", get(list_budgets).post(create_budget))
        .route("/transactions", get(list_transactions).post(create_transaction))
        .route("/reconcile", post(create_reconcile))
        .route("/reconcile/unreconciled", get(unreconciled))
        .route("/reconcile/suggestions", get(suggestions))
        .route("/reconcile/auto", post(auto_reconcile))
        .route("/txn_reconciles", get(list_txn_reconciles))
        .route("/ofx/:account_id/:fitid", get(get_ofx))
        .with_state(state);

    Router::new()
        .route("/", get(serve_index))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::*;
    use crate::models::AcctType;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app(conn: Connection) -> Router {
        router(AppState::new(conn))
    }

    async fn send(app: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(app(migrated_db()), Method::GET, "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["data"], json!("OK"));
    }

    #[tokio::test]
    async fn test_index_is_html() {
        let response = app(migrated_db())
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("<html"));
    }

    #[tokio::test]
    async fn test_accounts_and_not_found() {
        let conn = migrated_db();
        let acct = account(&conn, "Checking", AcctType::Bank);
        let app = app(conn);

        let (status, body) = send(app.clone(), Method::GET, "/api/accounts", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["name"], json!("Checking"));
        assert_eq!(body["data"][0]["balance"], Value::Null);

        let uri = format!("/api/accounts/{}", acct.id);
        let (status, body) = send(app.clone(), Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["id"], json!(acct.id));

        let (status, body) = send(app, Method::GET, "/api/accounts/999", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], json!(false));
    }

    #[tokio::test]
    async fn test_payoff_without_settings_is_bad_request() {
        let conn = migrated_db();
        let visa = account(&conn, "Visa", AcctType::Credit);
        let uri = format!("/api/accounts/{}/payoff?payment=100", visa.id);

        let (status, _) = send(app(conn), Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_budget_and_duplicate_conflict() {
        let app = app(migrated_db());
        let budget = json!({"name": "Groceries", "balance": "250.00"});

        let (status, body) = send(app.clone(), Method::POST, "/api/budgets", Some(budget.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["is_periodic"], json!(true));

        let (status, _) = send(app.clone(), Method::POST, "/api/budgets", Some(budget)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, body) = send(app, Method::GET, "/api/budgets", None).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_flow() {
        let conn = migrated_db();
        let acct = account(&conn, "Checking", AcctType::Bank);
        let stmt = statement(&conn, acct.id);
        ofx_trans(&conn, &stmt, "ID 1/2", Decimal::new(-1500, 2), date(2017, 7, 3));
        let app = app(conn);

        let (status, body) = send(
            app.clone(),
            Method::POST,
            "/api/transactions",
            Some(json!({
                "date": "2017-07-03",
                "actual_amount": "15.00",
                "description": "Lunch",
                "account_id": acct.id,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let txn_id = body["data"]["id"].as_i64().unwrap();

        let (_, body) = send(app.clone(), Method::GET, "/api/reconcile/suggestions", None).await;
        assert_eq!(body["data"][0]["txn_id"], json!(txn_id));
        assert_eq!(body["data"][0]["strategy"], json!("ExactDate"));

        let request = json!({"txn_id": txn_id, "ofx": {"account_id": acct.id, "fitid": "ID 1/2"}});
        let (status, _) = send(app.clone(), Method::POST, "/api/reconcile", Some(request.clone())).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(app.clone(), Method::POST, "/api/reconcile", Some(request)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("Integrity"));

        let (_, body) = send(app.clone(), Method::GET, "/api/txn_reconciles", None).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        let (_, body) = send(app.clone(), Method::GET, "/api/reconcile/unreconciled", None).await;
        assert!(body["data"]["transactions"].as_array().unwrap().is_empty());

        let uri = format!("/api/ofx/{}/ID%201%2F2", acct.id);
        let (status, body) = send(app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["fitid"], json!("ID 1/2"));
    }

    #[tokio::test]
    async fn test_reconcile_without_note_is_bad_request() {
        let conn = migrated_db();
        let acct = account(&conn, "Cash", AcctType::Cash);
        let txn = transaction(&conn, acct.id, Decimal::from(5), date(2017, 7, 3));

        let (status, body) = send(
            app(conn),
            Method::POST,
            "/api/reconcile",
            Some(json!({"txn_id": txn.id})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], json!(false));
    }

    #[tokio::test]
    async fn test_fitid_is_decoded_exactly_once() {
        let conn = migrated_db();
        let acct = account(&conn, "Checking", AcctType::Bank);
        let stmt = statement(&conn, acct.id);
        ofx_trans(&conn, &stmt, "A%20B", Decimal::new(-100, 2), date(2017, 7, 3));

        let uri = format!("/api/ofx/{}/A%2520B", acct.id);
        let (status, body) = send(app(conn), Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["fitid"], json!("A%20B"));
    }

    #[tokio::test]
    async fn test_stored_oversized_period_is_bad_request() {
        let conn = migrated_db();
        let visa = account(&conn, "Visa", AcctType::Credit);
        conn.execute(
            "UPDATE accounts SET apr = '0.1999', interest_class_name = 'AdbCompoundedDaily',
                min_payment_class_name = 'MinPaymentAmEx',
                billing_period_class_name = 'BillingPeriodNumDays',
                billing_period_class_args = '{\"end_date\": \"2017-08-15\", \"num_days\": 1000000000}'
             WHERE id = ?1",
            [visa.id],
        )
        .unwrap();
        let app = app(conn);

        let uri = format!("/api/accounts/{}/payoff", visa.id);
        let (status, _) = send(app.clone(), Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(app, Method::GET, "/api/accounts", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_poisoned_lock_is_recovered() {
        let state = AppState::new(migrated_db());
        let held = state.clone();
        let _ = std::thread::spawn(move || {
            let _guard = held.db.lock().unwrap();
            panic!("handler panicked");
        })
        .join();
        assert!(state.db.is_poisoned());

        let (status, body) = send(router(state), Method::GET, "/api/accounts", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
    }
}
