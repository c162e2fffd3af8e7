use anyhow::Result;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Write};
use std::sync::Arc;
use tracing::{info, warn};

use crate::use_cases::{AdminUseCase, DashboardUseCase};

const PARSE_ERROR: i32 = -32700;
const METHOD_NOT_FOUND: i32 = -32601;
const INVALID_PARAMS: i32 = -32602;
const INTERNAL_ERROR: i32 = -32603;

#[derive(Debug, serde::Deserialize)]
struct JsonRpcRequest {
    method: String,
    params: Option<Value>,
    id: Option<Value>,
}

impl JsonRpcRequest {
    /// Requests without an id, and anything under `notifications/`, get no reply.
    fn is_notification(&self) -> bool {
        self.id.is_none() || self.method.starts_with("notifications/")
    }
}

#[derive(Debug, serde::Serialize)]
struct JsonRpcResponse {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
    id: Option<Value>,
}

impl JsonRpcResponse {
    fn ok(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            result: Some(result),
            error: None,
            id,
        }
    }

    fn error(id: Option<Value>, code: i32, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data,
            }),
            id,
        }
    }
}

#[derive(Debug, serde::Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

#[derive(Debug, serde::Serialize)]
struct Tool {
    name: String,
    description: String,
    #[serde(rename = "inputSchema")]
    input_schema: Value,
}

fn write_response<W: Write>(writer: &mut W, response: &JsonRpcResponse) -> Result<()> {
    writeln!(writer, "{}", serde_json::to_string(response)?)?;
    writer.flush()?;
    Ok(())
}

pub struct MCPHandler {
    admin_use_case: Arc<AdminUseCase>,
    dashboard_use_case: Arc<DashboardUseCase>,
}

impl MCPHandler {
    pub fn new(admin_use_case: Arc<AdminUseCase>, dashboard_use_case: Arc<DashboardUseCase>) -> Self {
        Self {
            admin_use_case,
            dashboard_use_case,
        }
    }

    pub async fn serve<R, W>(self, reader: R, mut writer: W) -> Result<()>
    where
        R: BufRead,
        W: Write,
    {
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let request = match serde_json::from_str::<JsonRpcRequest>(&line) {
                Ok(request) => request,
                Err(e) => {
                    warn!("Unparseable request ({}): {}", e, line);
                    let response =
                        JsonRpcResponse::error(None, PARSE_ERROR, "Parse error", Some(json!(e.to_string())));
                    write_response(&mut writer, &response)?;
                    continue;
                }
            };

            if request.is_notification() {
                if request.method == "notifications/initialized" {
                    info!("🎟️ Client initialized");
                }
                continue;
            }

            let response = self.handle_request(request).await;
            write_response(&mut writer, &response)?;
        }

        Ok(())
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        // Ids are echoed back; a request that somehow lacks one is answered as id 1.
        let id = Some(request.id.unwrap_or(json!(1)));
        match request.method.as_str() {
            "initialize" => {
                info!("🎟️ Initializing lotto admin MCP server");
                JsonRpcResponse::ok(
                    id,
                    json!({
                        "protocolVersion": "2024-11-05",
                        "capabilities": {
                            "tools": {}
                        },
                        "serverInfo": {
                            "name": "lotto-mcp-server",
                            "version": "0.1.0"
                        }
                    }),
                )
            }
            "tools/list" => JsonRpcResponse::ok(id, json!({ "tools": self.get_tools() })),
            "tools/call" => self.handle_call_tool(request.params, id).await,
            other => JsonRpcResponse::error(id, METHOD_NOT_FOUND, format!("Method not found: {}", other), None),
        }
    }

    async fn handle_call_tool(&self, params: Option<Value>, id: Option<Value>) -> JsonRpcResponse {
        let Some(params) = params else {
            return JsonRpcResponse::error(id, INVALID_PARAMS, "Missing params", None);
        };
        let Some(tool_name) = params.get("name").and_then(|n| n.as_str()) else {
            return JsonRpcResponse::error(id, INVALID_PARAMS, "Missing tool name", None);
        };

        let arguments: HashMap<String, Value> = params
            .get("arguments")
            .cloned()
            .and_then(|args| serde_json::from_value(args).ok())
            .unwrap_or_default();

        match self.execute_tool(tool_name, &arguments).await {
            Ok(content) => JsonRpcResponse::ok(
                id,
                json!({
                    "content": [
                        {
                            "type": "text",
                            "text": content
                        }
                    ]
                }),
            ),
            Err(e) => {
                warn!("tool {} failed: {}", tool_name, e);
                JsonRpcResponse::error(id, INTERNAL_ERROR, format!("Tool execution error: {}", e), None)
            }
        }
    }

    async fn execute_tool(&self, tool_name: &str, arguments: &HashMap<String, Value>) -> Result<String> {
        match tool_name {
            "list_lotto_types" => self.admin_use_case.list_lotto_types(arguments).await,
            "add_lotto_type" => self.admin_use_case.add_lotto_type(arguments).await,
            "list_countries" => self.admin_use_case.list_countries(arguments).await,
            "list_games" => self.admin_use_case.list_games(arguments).await,
            "add_game" => self.admin_use_case.add_game(arguments).await,
            "update_game" => self.admin_use_case.update_game(arguments).await,
            "delete_game" => self.admin_use_case.delete_game(arguments).await,
            "list_draws" => self.admin_use_case.list_draws(arguments).await,
            "add_draw" => self.admin_use_case.add_draw(arguments).await,
            "list_users" => self.admin_use_case.list_users(arguments).await,
            "update_user" => self.admin_use_case.update_user(arguments).await,
            "delete_user" => self.admin_use_case.delete_user(arguments).await,
            "dashboard" => self.dashboard_use_case.dashboard(arguments).await,
            "check_pattern" => self.dashboard_use_case.check_pattern(arguments).await,
            _ => Err(anyhow::anyhow!("Unknown tool: {}", tool_name)),
        }
    }

    fn get_tools(&self) -> Vec<Tool> {
        vec![
            Tool {
                name: "list_lotto_types".to_string(),
                description: "List lottery types ordered by name".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {}
                }),
            },
            Tool {
                name: "add_lotto_type".to_string(),
                description: "Add a lottery type".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "name": {
                            "type": "string",
                            "description": "Display name of the lottery type"
                        },
                        "description": {
                            "type": "string",
                            "description": "Optional description"
                        }
                    },
                    "required": ["name"]
                }),
            },
            Tool {
                name: "list_countries".to_string(),
                description: "List countries ordered by name".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {}
                }),
            },
            Tool {
                name: "list_games".to_string(),
                description: "Load the games page: games with their country and type, plus the reference lists".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {}
                }),
            },
            Tool {
                name: "add_game".to_string(),
                description: "Add a lotto game and reload the games page".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "name": { "type": "string", "description": "Game name" },
                        "country_id": { "type": "string", "description": "Country id" },
                        "lotto_type_id": { "type": "string", "description": "Lottery type id" },
                        "numbers_drawn": { "type": "integer", "description": "Optional count of numbers per draw" }
                    },
                    "required": ["name", "country_id", "lotto_type_id"]
                }),
            },
            Tool {
                name: "update_game".to_string(),
                description: "Update fields of a lotto game".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "id": { "type": "string", "description": "Game id" },
                        "name": { "type": "string" },
                        "country_id": { "type": "string" },
                        "lotto_type_id": { "type": "string" },
                        "numbers_drawn": { "type": "integer" }
                    },
                    "required": ["id"]
                }),
            },
            Tool {
                name: "delete_game".to_string(),
                description: "Delete a lotto game unless draws still reference it".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "id": { "type": "string", "description": "Game id" }
                    },
                    "required": ["id"]
                }),
            },
            Tool {
                name: "list_draws".to_string(),
                description: "List draws, newest first, optionally for one game".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "game_id": { "type": "string", "description": "Optional game id filter" }
                    }
                }),
            },
            Tool {
                name: "add_draw".to_string(),
                description: "Record a draw for a game".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "game_id": { "type": "string", "description": "Game id" },
                        "draw_date": { "type": "string", "description": "Date in YYYY-MM-DD format" },
                        "numbers": {
                            "type": "array",
                            "description": "Drawn numbers in draw order",
                            "items": { "type": "integer" }
                        }
                    },
                    "required": ["game_id", "draw_date", "numbers"]
                }),
            },
            Tool {
                name: "list_users".to_string(),
                description: "List user profiles, newest first".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {}
                }),
            },
            Tool {
                name: "update_user".to_string(),
                description: "Change a user's email or admin flag".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "id": { "type": "string", "description": "User id" },
                        "email": { "type": "string" },
                        "is_admin": { "type": "boolean" }
                    },
                    "required": ["id"]
                }),
            },
            Tool {
                name: "delete_user".to_string(),
                description: "Delete a user profile".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "id": { "type": "string", "description": "User id" }
                    },
                    "required": ["id"]
                }),
            },
            Tool {
                name: "dashboard".to_string(),
                description: "Render the dashboard for the current session".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {}
                }),
            },
            Tool {
                name: "check_pattern".to_string(),
                description: "Lay out success and machine number inputs and report invalid slots".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "success": {
                            "type": "array",
                            "description": "Success number slots as typed",
                            "items": { "type": "string" }
                        },
                        "machine": {
                            "type": "array",
                            "description": "Machine number slots as typed",
                            "items": { "type": "string" }
                        }
                    },
                    "required": ["success", "machine"]
                }),
            },
        ]
    }
}

pub fn stdio() -> (BufReader<io::Stdin>, io::Stdout) {
    (BufReader::new(io::stdin()), io::stdout())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lotto_tracker::{AuthState, LocalStore, RecordingNotifier};
    use std::io::Cursor;

    fn handler() -> MCPHandler {
        let local = Arc::new(LocalStore::open_in_memory().unwrap());
        MCPHandler::new(
            Arc::new(AdminUseCase::new(local, Arc::new(RecordingNotifier::new()))),
            Arc::new(DashboardUseCase::new(AuthState::Absent)),
        )
    }

    async fn exchange(input: &str) -> Vec<Value> {
        let mut output = Vec::new();
        handler().serve(Cursor::new(input.to_string()), &mut output).await.unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_lists_tools() {
        let responses = exchange("{\"jsonrpc\":\"2.0\",\"method\":\"tools/list\",\"id\":1}\n").await;
        let tools = responses[0]["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 14);
        assert!(tools.iter().any(|t| t["name"] == "delete_game"));
    }

    #[tokio::test]
    async fn test_notifications_get_no_response() {
        let input = "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n\n";
        assert!(exchange(input).await.is_empty());
    }

    #[tokio::test]
    async fn test_parse_error_and_unknown_tool() {
        let input = concat!(
            "not json\n",
            "{\"jsonrpc\":\"2.0\",\"method\":\"tools/call\",\"params\":{\"name\":\"nope\"},\"id\":2}\n"
        );
        let responses = exchange(input).await;
        assert_eq!(responses[0]["error"]["code"], -32700);
        assert_eq!(responses[1]["error"]["code"], -32603);
        assert_eq!(responses[1]["id"], 2);
    }

    #[tokio::test]
    async fn test_initialize_and_unknown_method() {
        let input = concat!(
            "{\"jsonrpc\":\"2.0\",\"method\":\"initialize\",\"id\":7}\n",
            "{\"jsonrpc\":\"2.0\",\"method\":\"resources/list\",\"id\":8}\n",
            "{\"jsonrpc\":\"2.0\",\"method\":\"tools/call\",\"id\":9}\n"
        );
        let responses = exchange(input).await;
        assert_eq!(responses[0]["id"], 7);
        assert_eq!(responses[0]["result"]["serverInfo"]["name"], "lotto-mcp-server");
        assert!(responses[0].get("error").is_none());
        assert_eq!(responses[1]["error"]["code"], -32601);
        assert_eq!(responses[2]["error"]["message"], "Missing params");
    }

    #[tokio::test]
    async fn test_call_tool_wraps_text_content() {
        let input = "{\"jsonrpc\":\"2.0\",\"method\":\"tools/call\",\"params\":{\"name\":\"list_lotto_types\"},\"id\":3}\n";
        let responses = exchange(input).await;
        let text = responses[0]["result"]["content"][0]["text"].as_str().unwrap();
        let payload: Value = serde_json::from_str(text).unwrap();
        assert_eq!(payload["success"], true);
        assert_eq!(payload["lotto_types"]["loading"], false);
    }
}
