//! Chart specifications produced by the chart-designing stage

use crate::database::QueryResult;
use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Bar,
    Line,
    Pie,
    Scatter,
    Area,
}

/// A chart over two columns of a query result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartSpec {
    pub chart_type: ChartType,

    /// Column for the x axis (or pie labels)
    pub x: String,

    /// Column for the y axis (or pie values)
    pub y: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl ChartSpec {
    /// Parse a chart spec out of model output
    ///
    /// Text around the outermost JSON object is ignored.
    pub fn parse(text: &str) -> AppResult<Self> {
        let start = text.find('{');
        let end = text.rfind('}');
        let json = match (start, end) {
            (Some(s), Some(e)) if s < e => &text[s..=e],
            _ => {
                return Err(AppError::MalformedOutput(
                    "expected a JSON chart specification".to_string(),
                ))
            }
        };

        serde_json::from_str(json)
            .map_err(|e| AppError::MalformedOutput(format!("invalid chart specification: {}", e)))
    }

    /// Check that both axes name columns of `result`
    pub fn check_columns(&self, result: &QueryResult) -> AppResult<()> {
        for column in [&self.x, &self.y] {
            if !result.has_column(column) {
                return Err(AppError::MalformedOutput(format!(
                    "chart column '{}' is not in the query result (columns: {})",
                    column,
                    result.column_names().join(", ")
                )));
            }
        }
        Ok(())
    }
}
