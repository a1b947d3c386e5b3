//! HTTP client for the external maintenance API.

use std::time::{Duration, Instant};

use reqwest::Client;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::{FetchError, RawRecord};

const USER_AGENT: &str = concat!("plantsync/", env!("CARGO_PKG_VERSION"));

/// Resolve user agent from config value.
/// - None => default plantsync user agent
/// - other => custom user agent string
pub fn resolve_user_agent(config: Option<&str>) -> String {
    match config {
        None => USER_AGENT.to_string(),
        Some(custom) if custom.trim().is_empty() => USER_AGENT.to_string(),
        Some(custom) => custom.to_string(),
    }
}

/// JSON-over-HTTP client bound to the API base URL.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    base_url: Url,
    api_token: Option<String>,
}

impl HttpClient {
    /// Create a new HTTP client.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        Self::with_options(base_url, timeout, None, None)
    }

    /// Create a new HTTP client with an optional bearer token and user agent.
    pub fn with_options(
        base_url: &str,
        timeout: Duration,
        api_token: Option<String>,
        user_agent_config: Option<&str>,
    ) -> Result<Self, FetchError> {
        // A trailing slash makes Url::join append paths instead of replacing
        // the last segment.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&normalized)
            .map_err(|e| FetchError::Endpoint(format!("{}: {}", base_url, e)))?;

        let client = Client::builder()
            .user_agent(resolve_user_agent(user_agent_config))
            .timeout(timeout)
            .gzip(true)
            .build()
            .map_err(|e| FetchError::Unavailable(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            api_token: api_token.filter(|t| !t.trim().is_empty()),
        })
    }

    /// Build the URL for an endpoint path with query parameters.
    pub fn endpoint_url(&self, path: &str, query: &[(&str, String)]) -> Result<Url, FetchError> {
        let mut url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| FetchError::Endpoint(format!("{}: {}", path, e)))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// GET an endpoint and decode the response body as JSON.
    pub async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, FetchError> {
        let url = self.endpoint_url(path, query)?;
        let url_string = url.to_string();

        let mut request = self.client.get(url).header("Accept", "application/json");
        if let Some(ref token) = self.api_token {
            request = request.bearer_auth(token);
        }

        let start = Instant::now();
        let response = request.send().await.map_err(|source| FetchError::Http {
            url: url_string.clone(),
            source,
        })?;

        let status = response.status();
        debug!(
            url = %url_string,
            status = status.as_u16(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "API response"
        );

        if !status.is_success() {
            return Err(FetchError::Status {
                url: url_string,
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|source| FetchError::Http {
            url: url_string.clone(),
            source,
        })?;

        serde_json::from_str(&body).map_err(|e| FetchError::Payload {
            url: url_string,
            reason: e.to_string(),
        })
    }

    /// GET an endpoint and extract its list of flat records.
    pub async fn get_records(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<RawRecord>, FetchError> {
        let url = self.endpoint_url(path, query)?.to_string();
        let payload = self.get_json(path, query).await?;
        extract_records(payload).map_err(|reason| FetchError::Payload { url, reason })
    }
}

/// Pull the record list out of a response body.
///
/// Accepted shapes: a bare array, an object wrapping the array under `data`,
/// `results` or `items`, and OData's `{"d": {"results": [...]}}`.
pub fn extract_records(payload: Value) -> Result<Vec<RawRecord>, String> {
    let list = match payload {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            if let Some(Value::Object(mut d)) = map.remove("d") {
                match d.remove("results") {
                    Some(Value::Array(items)) => items,
                    _ => return Err("OData envelope without a results array".to_string()),
                }
            } else {
                let key = ["data", "results", "items"]
                    .into_iter()
                    .find(|k| matches!(map.get(*k), Some(Value::Array(_))));
                match key.and_then(|k| map.remove(k)) {
                    Some(Value::Array(items)) => items,
                    _ => return Err("response object has no record array".to_string()),
                }
            }
        }
        Value::Null => Vec::new(),
        other => return Err(format!("expected a record list, got {}", type_name(&other))),
    };

    list.into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Object(record) => Ok(record),
            other => Err(format!("record {} is {}, not an object", i, type_name(&other))),
        })
        .collect()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_user_agent() {
        assert!(resolve_user_agent(None).starts_with("plantsync/"));
        assert!(resolve_user_agent(Some(" ")).starts_with("plantsync/"));
        assert_eq!(resolve_user_agent(Some("Ops/1.0")), "Ops/1.0");
    }

    #[test]
    fn test_endpoint_url() {
        let client = HttpClient::new("https://api.example.com/pm/v2", Duration::from_secs(5)).unwrap();
        let url = client
            .endpoint_url(
                "/work-orders",
                &[("plant", "A01".to_string()), ("from", "2024-01-01".to_string())],
            )
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/pm/v2/work-orders?plant=A01&from=2024-01-01"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            HttpClient::new("not a url", Duration::from_secs(5)),
            Err(FetchError::Endpoint(_))
        ));
    }

    #[test]
    fn test_extract_records_shapes() {
        let bare = json!([{"EQUNR": "1"}, {"EQUNR": "2"}]);
        assert_eq!(extract_records(bare).unwrap().len(), 2);

        let wrapped = json!({"data": [{"EQUNR": "1"}], "total": 1});
        assert_eq!(extract_records(wrapped).unwrap().len(), 1);

        let odata = json!({"d": {"results": [{"AUFNR": "4000001"}]}});
        assert_eq!(extract_records(odata).unwrap().len(), 1);

        assert!(extract_records(Value::Null).unwrap().is_empty());
    }

    #[test]
    fn test_extract_records_malformed() {
        assert!(extract_records(json!({"message": "oops"})).is_err());
        assert!(extract_records(json!([{"ok": 1}, "bad"])).is_err());
        assert!(extract_records(json!("text")).is_err());
        assert!(extract_records(json!({"d": {"count": 3}})).is_err());
    }
}
