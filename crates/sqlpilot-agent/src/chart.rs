use futures::future::BoxFuture;
use serde_json::{json, Value};

use sqlpilot_core::error::{AdapterError, AdapterResult};
use sqlpilot_core::state::{GraphType, QueryResult, StatementResult};
use sqlpilot_core::traits::ChartRenderer;

/// Rows plotted at most.
pub const MAX_CHART_ROWS: usize = 20;

/// Builds Plotly figure JSON (`{"data": [...], "layout": {...}}`) from the
/// first statement that returned rows.
///
/// The x axis (or pie labels) is the first column; the y axis (or pie values)
/// is the first other column holding numbers.
#[derive(Debug, Clone, Default)]
pub struct PlotlyChartRenderer;

impl PlotlyChartRenderer {
    pub fn new() -> Self {
        Self
    }

    pub fn figure(
        &self,
        question: &str,
        result: &QueryResult,
        graph_type: GraphType,
    ) -> AdapterResult<Value> {
        let stmt = result
            .primary()
            .ok_or_else(|| AdapterError::failed("no rows to chart"))?;
        let y_col = numeric_column(stmt)
            .ok_or_else(|| AdapterError::failed("result has no numeric column to plot"))?;

        let rows: Vec<&Vec<Value>> = stmt.rows.iter().take(MAX_CHART_ROWS).collect();
        let xs: Vec<Value> = rows
            .iter()
            .map(|r| r.first().cloned().unwrap_or(Value::Null))
            .collect();
        let ys: Vec<Value> = rows
            .iter()
            .map(|r| r.get(y_col).and_then(as_number).unwrap_or(Value::Null))
            .collect();
        let x_name = stmt.columns.first().cloned().unwrap_or_default();
        let y_name = stmt.columns.get(y_col).cloned().unwrap_or_default();

        let trace = match graph_type {
            GraphType::Bar => json!({ "type": "bar", "x": xs, "y": ys, "name": y_name }),
            GraphType::Line => {
                json!({ "type": "scatter", "mode": "lines+markers", "x": xs, "y": ys, "name": y_name })
            }
            GraphType::Scatter => {
                json!({ "type": "scatter", "mode": "markers", "x": xs, "y": ys, "name": y_name })
            }
            GraphType::Pie => json!({ "type": "pie", "labels": xs, "values": ys }),
            GraphType::None => return Err(AdapterError::failed("no graph type chosen")),
        };

        let mut layout = json!({ "title": { "text": question } });
        if graph_type != GraphType::Pie {
            layout["xaxis"] = json!({ "title": { "text": x_name } });
            layout["yaxis"] = json!({ "title": { "text": y_name } });
        }

        Ok(json!({ "data": [trace], "layout": layout }))
    }
}

/// Index of the first column after the first whose values are all numeric
/// (NULLs aside). A single numeric column is used against itself.
fn numeric_column(stmt: &StatementResult) -> Option<usize> {
    let is_numeric = |col: usize| {
        let mut seen = false;
        for row in &stmt.rows {
            match row.get(col) {
                Some(Value::Null) | None => {}
                Some(v) if as_number(v).is_some() => seen = true,
                Some(_) => return false,
            }
        }
        seen
    };
    (1..stmt.columns.len())
        .find(|&c| is_numeric(c))
        .or_else(|| (stmt.columns.len() == 1 && is_numeric(0)).then_some(0))
}

/// Numbers, and strings that parse as numbers (SQLite returns DECIMAL as text).
fn as_number(v: &Value) -> Option<Value> {
    match v {
        Value::Number(_) => Some(v.clone()),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        _ => None,
    }
}

impl ChartRenderer for PlotlyChartRenderer {
    fn render(
        &self,
        question: &str,
        result: &QueryResult,
        graph_type: GraphType,
    ) -> BoxFuture<'_, AdapterResult<Value>> {
        let figure = self.figure(question, result, graph_type);
        Box::pin(async move { figure })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(columns: &[&str], rows: Vec<Vec<Value>>) -> QueryResult {
        QueryResult::new(vec![StatementResult {
            statement: "SELECT ...".into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            total_rows: rows.len(),
            rows,
        }])
    }

    #[test]
    fn test_bar_uses_first_numeric_column() {
        let r = result(
            &["category", "label", "revenue"],
            vec![
                vec![json!("toys"), json!("a"), json!(10.5)],
                vec![json!("books"), json!("b"), json!("7")],
            ],
        );
        let fig = PlotlyChartRenderer::new()
            .figure("Revenue by category", &r, GraphType::Bar)
            .unwrap();
        assert_eq!(fig["data"][0]["type"], "bar");
        assert_eq!(fig["data"][0]["x"], json!(["toys", "books"]));
        assert_eq!(fig["data"][0]["y"], json!([10.5, 7.0]));
        assert_eq!(fig["layout"]["title"]["text"], "Revenue by category");
        assert_eq!(fig["layout"]["yaxis"]["title"]["text"], "revenue");
    }

    #[test]
    fn test_pie_labels_values_and_row_limit() {
        let rows = (0..30).map(|i| vec![json!(format!("s{i}")), json!(i)]).collect();
        let fig = PlotlyChartRenderer::new()
            .figure("Share", &result(&["state", "n"], rows), GraphType::Pie)
            .unwrap();
        assert_eq!(fig["data"][0]["labels"].as_array().unwrap().len(), MAX_CHART_ROWS);
        assert!(fig["layout"].get("xaxis").is_none());
    }

    #[test]
    fn test_line_mode() {
        let r = result(&["month", "orders"], vec![vec![json!("2018-01"), json!(7269)]]);
        let fig = PlotlyChartRenderer::new().figure("q", &r, GraphType::Line).unwrap();
        assert_eq!(fig["data"][0]["mode"], "lines+markers");
    }

    #[test]
    fn test_failures() {
        let renderer = PlotlyChartRenderer::new();
        let text_only = result(&["a", "b"], vec![vec![json!("x"), json!("y")]]);
        assert!(renderer.figure("q", &text_only, GraphType::Bar).is_err());
        assert!(renderer
            .figure("q", &QueryResult::default(), GraphType::Bar)
            .is_err());
        let ok = result(&["a", "n"], vec![vec![json!("x"), json!(1)]]);
        assert!(renderer.figure("q", &ok, GraphType::None).is_err());
    }
}
