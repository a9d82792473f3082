use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use d1v_core::pagination::{bound_select_sql, PageQuery};
use d1v_core::source::{
    table_names, Account, Database, RemoteDirectory, ResultSet, Scalar, SourceError, TableSource,
    LIST_TABLES_SQL,
};
use d1v_core::storage::Token;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

pub const DEFAULT_API_BASE: &str = "https://api.cloudflare.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    result: Option<T>,
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    message: String,
}

#[derive(Debug, Serialize)]
struct RawQuery<'a> {
    sql: &'a str,
    params: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RawStatement {
    results: RawResults,
}

#[derive(Debug, Default, Deserialize)]
struct RawResults {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    rows: Vec<Vec<Value>>,
}

/// REST client for the hosted D1 API, addressed either directly or through the relay.
#[derive(Debug, Clone)]
pub struct D1Client {
    http: Client,
    api_base: String,
}

impl D1Client {
    pub fn new(api_base: impl Into<String>) -> Result<Self, SourceError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|error| SourceError::new(format!("failed to build HTTP client: {error}")))?;
        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    #[must_use]
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub async fn accounts(&self, token: &Token) -> Result<Vec<Account>, SourceError> {
        let request = self.http.get(self.endpoint("accounts"));
        send(authorized(request, token)).await
    }

    pub async fn databases(
        &self,
        token: &Token,
        account_id: &str,
    ) -> Result<Vec<Database>, SourceError> {
        let request = self
            .http
            .get(self.endpoint(&format!("accounts/{account_id}/d1/database")));
        send(authorized(request, token)).await
    }

    /// Runs one statement through the raw endpoint and returns its first result set.
    pub async fn raw(
        &self,
        token: &Token,
        account_id: &str,
        database_id: &str,
        sql: &str,
        params: Vec<Value>,
    ) -> Result<ResultSet, SourceError> {
        let request = self.http.post(self.endpoint(&format!(
            "accounts/{account_id}/d1/database/{database_id}/raw"
        )));
        let request = authorized(request, token).json(&RawQuery { sql, params });
        let statements: Vec<RawStatement> = send(request).await?;

        let results = statements
            .into_iter()
            .next()
            .map(|statement| statement.results)
            .unwrap_or_default();
        Ok(ResultSet {
            columns: results.columns,
            rows: results
                .rows
                .into_iter()
                .map(|row| row.into_iter().map(json_to_scalar).collect())
                .collect(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/client/v4/{path}", self.api_base)
    }
}

#[async_trait]
impl RemoteDirectory for D1Client {
    async fn list_accounts(&self, token: &Token) -> Result<Vec<Account>, SourceError> {
        self.accounts(token).await
    }

    async fn list_databases(
        &self,
        token: &Token,
        account_id: &str,
    ) -> Result<Vec<Database>, SourceError> {
        self.databases(token, account_id).await
    }

    fn table_source(
        &self,
        token: &Token,
        account_id: &str,
        database_id: &str,
    ) -> Arc<dyn TableSource> {
        Arc::new(RemoteTableSource {
            client: self.clone(),
            token: token.clone(),
            account_id: account_id.to_string(),
            database_id: database_id.to_string(),
        })
    }
}

/// One hosted database bound to the credentials used to reach it.
#[derive(Debug, Clone)]
pub struct RemoteTableSource {
    client: D1Client,
    token: Token,
    account_id: String,
    database_id: String,
}

impl RemoteTableSource {
    async fn run(&self, sql: &str, params: Vec<Value>) -> Result<ResultSet, SourceError> {
        self.client
            .raw(&self.token, &self.account_id, &self.database_id, sql, params)
            .await
    }
}

#[async_trait]
impl TableSource for RemoteTableSource {
    async fn list_tables(&self) -> Result<Vec<String>, SourceError> {
        let result = self.run(LIST_TABLES_SQL, Vec::new()).await?;
        Ok(table_names(&result))
    }

    async fn select_page(&self, query: &PageQuery) -> Result<ResultSet, SourceError> {
        let params = vec![
            Value::from(query.limit_rows()),
            Value::from(query.offset()),
        ];
        self.run(&bound_select_sql(&query.table), params).await
    }
}

async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, SourceError> {
    let response = request.send().await.map_err(|error| {
        warn!(error = %error, "d1 request failed");
        SourceError::new(format!("request failed: {error}"))
    })?;
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|error| SourceError::new(format!("failed to read response: {error}")))?;
    debug!(status = status.as_u16(), bytes = body.len(), "d1 response");

    match serde_json::from_slice::<Envelope<T>>(&body) {
        Ok(envelope) if status.is_success() && envelope.success => envelope
            .result
            .ok_or_else(|| SourceError::new("response did not include a result")),
        Ok(envelope) => Err(envelope
            .errors
            .into_iter()
            .next()
            .map_or_else(|| status_error(status), |first| SourceError::new(first.message))),
        Err(error) if status.is_success() => Err(SourceError::new(format!(
            "unexpected response body: {error}"
        ))),
        Err(_) => Err(status_error(status)),
    }
}

fn authorized(request: RequestBuilder, token: &Token) -> RequestBuilder {
    request
        .bearer_auth(token.expose())
        .header(reqwest::header::CONTENT_TYPE, "application/json")
}

fn status_error(status: StatusCode) -> SourceError {
    SourceError::new(format!("request failed with status {status}"))
}

fn json_to_scalar(value: Value) -> Scalar {
    match value {
        Value::Null => Scalar::Null,
        Value::Bool(flag) => Scalar::Integer(i64::from(flag)),
        Value::Number(number) => number
            .as_i64()
            .map(Scalar::Integer)
            .or_else(|| number.as_f64().map(Scalar::Real))
            .unwrap_or_else(|| Scalar::Text(number.to_string())),
        Value::String(text) => Scalar::Text(text),
        Value::Array(items) => match byte_array(&items) {
            Some(bytes) => Scalar::Blob(bytes),
            None => Scalar::Text(Value::Array(items).to_string()),
        },
        other @ Value::Object(_) => Scalar::Text(other.to_string()),
    }
}

fn byte_array(items: &[Value]) -> Option<Vec<u8>> {
    items
        .iter()
        .map(|item| item.as_u64().and_then(|byte| u8::try_from(byte).ok()))
        .collect()
}
