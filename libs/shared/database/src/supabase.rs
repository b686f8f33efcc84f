use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client, Method, StatusCode,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use shared_config::AppConfig;

/// SQLSTATEs PostgREST reports for constraint failures.
const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

#[derive(Debug, Error)]
pub enum SupabaseError {
    #[error("Unique constraint violated: {0}")]
    Conflict(String),

    #[error("Referenced row missing: {0}")]
    ForeignKey(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid header value: {0}")]
    Header(String),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Error body PostgREST returns on a failed request.
#[derive(Debug, Deserialize)]
struct PostgrestError {
    code: Option<String>,
    message: Option<String>,
}

fn classify_failure(status: StatusCode, body: &str) -> SupabaseError {
    let parsed: Option<PostgrestError> = serde_json::from_str(body).ok();
    let code = parsed.as_ref().and_then(|e| e.code.clone());
    let message = parsed
        .and_then(|e| e.message)
        .unwrap_or_else(|| body.to_string());

    match code.as_deref() {
        Some(UNIQUE_VIOLATION) => return SupabaseError::Conflict(message),
        Some(FOREIGN_KEY_VIOLATION) => return SupabaseError::ForeignKey(message),
        _ => {}
    }

    match status.as_u16() {
        401 | 403 => SupabaseError::Auth(message),
        404 => SupabaseError::NotFound(message),
        other => SupabaseError::Api { status: other, message },
    }
}

pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            anon_key: config.supabase_anon_key.clone(),
        }
    }

    fn get_headers(&self, auth_token: Option<&str>) -> Result<HeaderMap, SupabaseError> {
        let mut headers = HeaderMap::new();

        headers.insert(
            "apikey",
            HeaderValue::from_str(&self.anon_key).map_err(|e| SupabaseError::Header(e.to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = auth_token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|e| SupabaseError::Header(e.to_string()))?,
            );
        }

        Ok(headers)
    }

    pub async fn request<T>(
        &self,
        method: Method,
        path: &str,
        auth_token: Option<&str>,
        body: Option<Value>,
    ) -> Result<T, SupabaseError>
    where
        T: DeserializeOwned,
    {
        self.request_with_headers(method, path, auth_token, body, None).await
    }

    /// Same as `request`, with extra headers such as `Prefer: return=representation`.
    pub async fn request_with_headers<T>(
        &self,
        method: Method,
        path: &str,
        auth_token: Option<&str>,
        body: Option<Value>,
        extra_headers: Option<HeaderMap>,
    ) -> Result<T, SupabaseError>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);

        let mut headers = self.get_headers(auth_token)?;
        if let Some(extra) = extra_headers {
            headers.extend(extra);
        }

        let mut req = self.client.request(method, &url).headers(headers);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await?;
            error!("API error ({}): {}", status, error_text);
            return Err(classify_failure(status, &error_text));
        }

        let data = response.json::<T>().await?;
        Ok(data)
    }

}

/// `Prefer: return=representation`, so writes answer with the stored rows.
pub fn return_representation() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("Prefer", HeaderValue::from_static("return=representation"));
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use shared_config::{LedgerBackend, SlotSettings};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(url: &str) -> AppConfig {
        AppConfig {
            supabase_url: url.to_string(),
            supabase_anon_key: "anon".to_string(),
            supabase_jwt_secret: "secret".to_string(),
            ledger_backend: LedgerBackend::Supabase,
            slots: SlotSettings::default(),
            port: 3000,
        }
    }

    #[test]
    fn unique_violation_is_a_conflict() {
        let body = r#"{"code":"23505","message":"duplicate key value"}"#;
        assert_matches!(
            classify_failure(StatusCode::CONFLICT, body),
            SupabaseError::Conflict(msg) if msg == "duplicate key value"
        );
        assert_matches!(
            classify_failure(StatusCode::BAD_REQUEST, body),
            SupabaseError::Conflict(_)
        );
        assert_matches!(
            classify_failure(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
            SupabaseError::Api { status: 500, .. }
        );
    }

    #[test]
    fn only_unique_violations_are_conflicts() {
        let missing_doctor = r#"{"code":"23503","message":"insert or update on table \"appointments\" violates foreign key constraint"}"#;
        assert_matches!(
            classify_failure(StatusCode::CONFLICT, missing_doctor),
            SupabaseError::ForeignKey(_)
        );
        assert_matches!(
            classify_failure(StatusCode::CONFLICT, "conflict"),
            SupabaseError::Api { status: 409, .. }
        );
    }

    #[tokio::test]
    async fn sends_apikey_and_decodes_rows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/hospitals"))
            .and(header("apikey", "anon"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 1 }])))
            .mount(&server)
            .await;

        let client = SupabaseClient::new(&config_for(&server.uri()));
        let rows: Vec<Value> = client
            .request(Method::GET, "/rest/v1/hospitals", None, None)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn maps_http_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/appointments"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "code": "23505",
                "message": "duplicate key value violates unique constraint"
            })))
            .mount(&server)
            .await;

        let client = SupabaseClient::new(&config_for(&server.uri()));
        let result: Result<Vec<Value>, _> = client
            .request_with_headers(
                Method::POST,
                "/rest/v1/appointments",
                None,
                Some(json!({})),
                Some(return_representation()),
            )
            .await;
        assert_matches!(result, Err(SupabaseError::Conflict(_)));
    }
}
