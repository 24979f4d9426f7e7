//! 航班搜索工具
//!
//! POST {base_url}/flights/search，请求体即校验后的参数；机场代码须为 3 位字母 IATA 码。

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::ToolError;
use crate::tools::{schema_of, HttpBackend, Tool};

/// 航班搜索参数
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FlightSearchArgs {
    /// 出发机场 IATA 代码，如 SFO
    pub origin: String,
    /// 到达机场 IATA 代码，如 CDG
    pub destination: String,
    /// 出发日期（YYYY-MM-DD）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub departure_date: Option<NaiveDate>,
    /// 乘客数，默认 1
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passengers: Option<u32>,
}

impl FlightSearchArgs {
    fn check(&self) -> Result<(), ToolError> {
        for (field, code) in [("origin", &self.origin), ("destination", &self.destination)] {
            if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(ToolError::InvalidArguments(format!(
                    "{field} must be a 3-letter IATA code, got `{code}`"
                )));
            }
        }
        if self.origin.eq_ignore_ascii_case(&self.destination) {
            return Err(ToolError::InvalidArguments(
                "origin and destination must differ".to_string(),
            ));
        }
        if self.passengers == Some(0) {
            return Err(ToolError::InvalidArguments(
                "passengers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct FlightSearchTool {
    backend: HttpBackend,
}

impl FlightSearchTool {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, ToolError> {
        Ok(Self {
            backend: HttpBackend::new(base_url, api_key, timeout)?,
        })
    }
}

#[async_trait]
impl Tool for FlightSearchTool {
    fn id(&self) -> &str {
        "search"
    }

    fn display_name(&self) -> &str {
        "Flight search"
    }

    fn description(&self) -> &str {
        "Search flights between two airports. Args: {\"origin\": \"SFO\", \"destination\": \"CDG\", \"departure_date\": \"2026-11-02\"}"
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<FlightSearchArgs>()
    }

    async fn invoke(&self, args: Value) -> Result<Value, ToolError> {
        let mut args: FlightSearchArgs =
            serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        args.check()?;
        args.origin.make_ascii_uppercase();
        args.destination.make_ascii_uppercase();
        self.backend.post_json("flights/search", &args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tool(server: &MockServer) -> FlightSearchTool {
        FlightSearchTool::new(&server.uri(), None, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_search_posts_normalized_arguments() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/flights/search"))
            .and(body_json(json!({"origin": "SFO", "destination": "CDG"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"flights": [{"id": "AF83"}]})))
            .expect(1)
            .mount(&server)
            .await;

        let out = tool(&server)
            .invoke(json!({"origin": "sfo", "destination": "CDG"}))
            .await
            .unwrap();
        assert_eq!(out["flights"][0]["id"], "AF83");
    }

    #[tokio::test]
    async fn test_server_errors_are_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let err = tool(&server)
            .invoke(json!({"origin": "SFO", "destination": "CDG"}))
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "{err}");
    }

    #[tokio::test]
    async fn test_client_errors_are_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_string("no such route"))
            .mount(&server)
            .await;
        let err = tool(&server)
            .invoke(json!({"origin": "SFO", "destination": "CDG"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Rejected(ref m) if m.contains("no such route")));
    }

    #[tokio::test]
    async fn test_bad_airport_code_never_reaches_backend() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let err = tool(&server)
            .invoke(json!({"origin": "San Francisco", "destination": "CDG"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
