//! Wire types for the Cost Management Query API

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::DateRange;

/// Query request body: daily usage over a custom time period.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    #[serde(rename = "type")]
    query_type: &'static str,
    timeframe: &'static str,
    time_period: TimePeriod,
    dataset: Dataset,
}

#[derive(Debug, Clone, Serialize)]
struct TimePeriod {
    from: String,
    to: String,
}

#[derive(Debug, Clone, Serialize)]
struct Dataset {
    granularity: &'static str,
}

impl QueryRequest {
    /// Daily-granularity usage query bounded by the given range.
    pub fn daily_usage(range: &DateRange) -> Self {
        Self {
            query_type: "Usage",
            timeframe: "Custom",
            time_period: TimePeriod {
                from: format!("{}T00:00:00+00:00", range.start),
                to: format!("{}T23:59:59+00:00", range.end),
            },
            dataset: Dataset {
                granularity: "Daily",
            },
        }
    }
}

/// Top-level query response.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryResponse {
    pub properties: QueryProperties,
}

/// Response payload: a column manifest, positional rows, and an optional
/// link to the next page.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryProperties {
    #[serde(default)]
    pub columns: Vec<QueryColumn>,
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
    #[serde(default)]
    pub next_link: Option<String>,
}

/// One column declared by the response manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryColumn {
    pub name: String,
    #[serde(rename = "type", default)]
    pub column_type: String,
}
