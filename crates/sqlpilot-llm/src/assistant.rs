//! [`QueryAssistant`] implemented with prompts against an [`LlmClient`].

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use sqlpilot_core::config::ModelConfig;
use sqlpilot_core::error::{AdapterError, AdapterResult};
use sqlpilot_core::state::{GraphType, QueryResult};
use sqlpilot_core::traits::{LlmClient, QueryAssistant};
use sqlpilot_core::types::{ChatMessage, ScopeVerdict, VizChoice};

use crate::streaming::collect_text;

/// Rows of each statement shown to the model when explaining or charting.
const PROMPT_TABLE_ROWS: usize = 30;

const SCOPE_PROMPT: &str = r#"You are the guardrail of a text-to-SQL assistant for an e-commerce SQLite database.
The database describes an online marketplace: customers, orders, order items, payments,
reviews, products, sellers and geolocation.

Decide whether the user's message can be answered using ONLY this database.
In scope: questions about orders, payments, customers, products, sellers, reviews and shipping,
including aggregations such as revenue, average review score or top categories.
Out of scope: anything needing external or real-time data, general chit-chat, personal advice,
programming questions unrelated to this database.
A greeting or pleasantry with no question is a greeting.

Reply ONLY with JSON, no extra text:
{"in_scope": true or false, "is_greeting": true or false, "reason": "<short explanation>"}"#;

const GENERATE_PROMPT: &str = r#"You are the SQL generation agent of a text-to-SQL assistant.
Write one or more SQLite statements that answer the user's question.

Rules:
- Use ONLY tables and columns that exist in the schema below.
- There is no precomputed order total; compute revenue from order_items
  (price + freight_value), joined with orders for date filters.
- Separate multiple statements with ';'.
- Return ONLY SQL, no explanation and no markdown."#;

const CORRECT_PROMPT: &str = r#"You are the SQL error-correction agent of a text-to-SQL assistant.
You receive a SQL query that failed and the error SQLite returned.

Rules:
- Keep the original intent unchanged and fix only what is necessary
  (table or column names, joins, aliases, GROUP BY issues, syntax).
- Do not invent tables or columns that are not in the schema below.
- Return ONLY the corrected SQL, no explanation.

If the query is fundamentally impossible with this schema, return exactly:
-- IMPOSSIBLE"#;

const EXPLAIN_PROMPT: &str = "You are a helpful data analyst. Explain database query results \
in clear natural language, answering the user's question directly and pointing out notable insights. \
Do not invent numbers that are not in the results.";

const VIZ_PROMPT: &str = r#"You decide whether a chart helps answer a data question.
Prefer no chart for single values or very small results.
Allowed chart types: bar, line, pie, scatter.

Reply ONLY with JSON, no extra text:
{"needs_graph": true or false, "graph_type": "bar" | "line" | "pie" | "scatter" | "none"}"#;

/// Talks to a language model to classify, write, repair and explain SQL.
pub struct LlmAssistant {
    client: Arc<dyn LlmClient>,
    config: ModelConfig,
}

impl LlmAssistant {
    pub fn new(client: Arc<dyn LlmClient>, config: ModelConfig) -> Self {
        Self { client, config }
    }

    async fn ask(&self, task: &'static str, messages: Vec<ChatMessage>) -> AdapterResult<String> {
        let stream = self.client.chat_stream(&self.config, messages).await?;
        let text = collect_text(stream).await?;
        debug!(task, chars = text.len(), "LLM reply received");
        Ok(text)
    }
}

/// Remove a surrounding Markdown code fence, if any.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    // drop the info string (```sql, ```json)
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim().to_string()
}

/// Parse the JSON object spanning the first `{` to the last `}` of `text`.
pub fn extract_json<T: DeserializeOwned>(text: &str) -> AdapterResult<T> {
    let cleaned = strip_code_fences(text);
    let (Some(start), Some(end)) = (cleaned.find('{'), cleaned.rfind('}')) else {
        return Err(AdapterError::malformed(format!("no JSON object in reply: {cleaned}")));
    };
    if end < start {
        return Err(AdapterError::malformed(format!("no JSON object in reply: {cleaned}")));
    }
    serde_json::from_str(&cleaned[start..=end])
        .map_err(|e| AdapterError::malformed(format!("{e}: {cleaned}")))
}

fn non_empty_sql(reply: String) -> AdapterResult<String> {
    let sql = strip_code_fences(&reply);
    if sql.is_empty() {
        Err(AdapterError::malformed("model returned no SQL"))
    } else {
        Ok(sql)
    }
}

#[derive(Deserialize)]
struct RawVizChoice {
    needs_graph: bool,
    #[serde(default)]
    graph_type: String,
}

impl QueryAssistant for LlmAssistant {
    fn classify(&self, question: &str) -> BoxFuture<'_, AdapterResult<ScopeVerdict>> {
        let question = question.to_string();
        Box::pin(async move {
            let reply = self
                .ask(
                    "classify",
                    vec![ChatMessage::system(SCOPE_PROMPT), ChatMessage::user(question)],
                )
                .await?;
            extract_json(&reply)
        })
    }

    fn generate_sql(&self, question: &str, schema: &str) -> BoxFuture<'_, AdapterResult<String>> {
        let question = question.to_string();
        let system = format!("{GENERATE_PROMPT}\n\nSchema:\n{schema}");
        Box::pin(async move {
            let reply = self
                .ask(
                    "generate_sql",
                    vec![ChatMessage::system(system), ChatMessage::user(question)],
                )
                .await?;
            non_empty_sql(reply)
        })
    }

    fn correct_sql(
        &self,
        prior_query: &str,
        error: &str,
        schema: &str,
    ) -> BoxFuture<'_, AdapterResult<String>> {
        let system = format!("{CORRECT_PROMPT}\n\nSchema:\n{schema}");
        let user = format!("Failed SQL:\n{prior_query}\n\nSQLite error:\n{error}");
        Box::pin(async move {
            let reply = self
                .ask(
                    "correct_sql",
                    vec![ChatMessage::system(system), ChatMessage::user(user)],
                )
                .await?;
            non_empty_sql(reply)
        })
    }

    fn explain(&self, question: &str, result: &QueryResult) -> BoxFuture<'_, AdapterResult<String>> {
        let user = format!(
            "Question: {question}\n\nQuery results:\n{}",
            result.render(PROMPT_TABLE_ROWS)
        );
        Box::pin(async move {
            let reply = self
                .ask(
                    "explain",
                    vec![ChatMessage::system(EXPLAIN_PROMPT), ChatMessage::user(user)],
                )
                .await?;
            Ok(reply.trim().to_string())
        })
    }

    fn decide_viz(
        &self,
        question: &str,
        result: &QueryResult,
    ) -> BoxFuture<'_, AdapterResult<VizChoice>> {
        let user = format!(
            "Question: {question}\nRows returned: {}\n\nSample:\n{}",
            result.row_count(),
            result.render(10)
        );
        Box::pin(async move {
            let reply = self
                .ask(
                    "decide_viz",
                    vec![ChatMessage::system(VIZ_PROMPT), ChatMessage::user(user)],
                )
                .await?;
            let raw: RawVizChoice = extract_json(&reply)?;
            let graph_type: GraphType = raw.graph_type.parse().map_err(AdapterError::malformed)?;
            Ok(VizChoice {
                needs_graph: raw.needs_graph,
                graph_type,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlpilot_core::error::SqlPilotError;
    use sqlpilot_core::state::StatementResult;
    use sqlpilot_test_utils::ScriptedLlm;

    fn assistant(llm: ScriptedLlm) -> LlmAssistant {
        let config: ModelConfig = toml::from_str("model_id = \"test-model\"").unwrap();
        LlmAssistant::new(Arc::new(llm), config)
    }

    fn one_row() -> QueryResult {
        QueryResult::new(vec![StatementResult {
            statement: "SELECT COUNT(*) AS n FROM orders".into(),
            columns: vec!["n".into()],
            rows: vec![vec![serde_json::json!(99441)]],
            total_rows: 1,
        }])
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```sql\nSELECT 1;\n```"), "SELECT 1;");
        assert_eq!(strip_code_fences("  SELECT 2  "), "SELECT 2");
        assert_eq!(strip_code_fences("```\n{\"a\":1}```"), "{\"a\":1}");
    }

    #[test]
    fn test_extract_json_with_prose() {
        let v: ScopeVerdict =
            extract_json("Sure! {\"in_scope\": false, \"reason\": \"weather\"} hope it helps")
                .unwrap();
        assert!(!v.in_scope);
        assert_eq!(v.reason, "weather");
    }

    #[test]
    fn test_extract_json_malformed() {
        let err = extract_json::<ScopeVerdict>("I think yes").unwrap_err();
        assert!(err.is_malformed());
        let err = extract_json::<ScopeVerdict>("{\"in_scope\": \"maybe\"}").unwrap_err();
        assert!(err.is_malformed());
    }

    #[tokio::test]
    async fn test_classify_parses_fenced_json() {
        let a = assistant(
            ScriptedLlm::new().reply("```json\n{\"in_scope\": true, \"is_greeting\": true}\n```"),
        );
        let v = a.classify("hi there").await.unwrap();
        assert!(v.in_scope);
        assert!(v.is_greeting);
    }

    #[tokio::test]
    async fn test_generate_sql_strips_fences() {
        let a = assistant(ScriptedLlm::new().reply("```sql\nSELECT COUNT(*) FROM orders;\n```"));
        let sql = a.generate_sql("How many orders?", "orders(order_id)").await.unwrap();
        assert_eq!(sql, "SELECT COUNT(*) FROM orders;");
    }

    #[tokio::test]
    async fn test_generate_sql_failure_maps_to_failed() {
        let a = assistant(
            ScriptedLlm::new().fail_with(SqlPilotError::LlmRequest("HTTP 500".into())),
        );
        let err = a.generate_sql("q", "schema").await.unwrap_err();
        assert!(!err.is_malformed());
    }

    #[tokio::test]
    async fn test_correct_sql_passes_through_impossible() {
        let a = assistant(ScriptedLlm::new().reply("-- IMPOSSIBLE"));
        let sql = a
            .correct_sql("SELECT x FROM nowhere", "no such table: nowhere", "schema")
            .await
            .unwrap();
        assert!(sql.starts_with("-- IMPOSSIBLE"));
    }

    #[tokio::test]
    async fn test_decide_viz() {
        let a = assistant(
            ScriptedLlm::new()
                .reply("{\"needs_graph\": true, \"graph_type\": \"Bar\"}")
                .reply("{\"needs_graph\": true, \"graph_type\": \"histogram\"}"),
        );
        let choice = a.decide_viz("Top sellers", &one_row()).await.unwrap();
        assert_eq!(choice.graph_type, GraphType::Bar);

        let err = a.decide_viz("Top sellers", &one_row()).await.unwrap_err();
        assert!(err.is_malformed());
    }

    #[tokio::test]
    async fn test_explain_trims() {
        let a = assistant(ScriptedLlm::new().reply("  There are 99,441 orders.\n"));
        let text = a.explain("How many orders?", &one_row()).await.unwrap();
        assert_eq!(text, "There are 99,441 orders.");
    }
}
