//! 日历查询工具
//!
//! GET {base_url}/calendar/events?start=..&end=..[&calendar_id=..]，区间最长 92 天。

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::ToolError;
use crate::tools::{schema_of, HttpBackend, Tool};

/// 单次查询允许的最大天数
const MAX_RANGE_DAYS: i64 = 92;

/// 日历查询参数
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CalendarQueryArgs {
    /// 起始日期（含）
    pub start_date: NaiveDate,
    /// 结束日期（含）
    pub end_date: NaiveDate,
    /// 日历 id，缺省为用户主日历
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calendar_id: Option<String>,
}

#[derive(Serialize)]
struct CalendarQuery<'a> {
    start: String,
    end: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    calendar_id: Option<&'a str>,
}

pub struct CalendarQueryTool {
    backend: HttpBackend,
}

impl CalendarQueryTool {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, ToolError> {
        Ok(Self {
            backend: HttpBackend::new(base_url, api_key, timeout)?,
        })
    }
}

#[async_trait]
impl Tool for CalendarQueryTool {
    fn id(&self) -> &str {
        "calendar"
    }

    fn display_name(&self) -> &str {
        "Calendar query"
    }

    fn description(&self) -> &str {
        "List calendar events in a date range. Args: {\"start_date\": \"2026-11-01\", \"end_date\": \"2026-11-07\"}"
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<CalendarQueryArgs>()
    }

    async fn invoke(&self, args: Value) -> Result<Value, ToolError> {
        let args: CalendarQueryArgs =
            serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        let days = (args.end_date - args.start_date).num_days();
        if days < 0 {
            return Err(ToolError::InvalidArguments(
                "end_date is before start_date".to_string(),
            ));
        }
        if days > MAX_RANGE_DAYS {
            return Err(ToolError::InvalidArguments(format!(
                "date range too large ({days} days, max {MAX_RANGE_DAYS})"
            )));
        }
        let query = CalendarQuery {
            start: args.start_date.format("%Y-%m-%d").to_string(),
            end: args.end_date.format("%Y-%m-%d").to_string(),
            calendar_id: args.calendar_id.as_deref(),
        };
        self.backend.get_json("calendar/events", &query).await
    }
}
