//! Checks that the schemas a server publishes agree with what it enforces.
//!
//! Clients validate arguments against the `inputSchema` from `tools/list`
//! before calling. If that schema and the server's own validation disagree,
//! valid calls get rejected or invalid ones slip through, so every case here
//! compiles the *listed* schema independently and compares verdicts.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use mcp_host::protocol::ToolDefinition;
use mcp_host::{McpServer, PromptBuilder, RequestContext, TestClient, ToolBuilder, ToolError};

// =============================================================================
// Helpers
// =============================================================================

fn compile(schema: &Value) -> jsonschema::Validator {
    jsonschema::validator_for(schema)
        .unwrap_or_else(|e| panic!("listed schema does not compile: {e}\n{schema:#}"))
}

fn find<'a>(tools: &'a [ToolDefinition], name: &str) -> &'a ToolDefinition {
    tools
        .iter()
        .find(|t| t.name == name)
        .unwrap_or_else(|| panic!("tool {name} not listed"))
}

/// The server must accept exactly the arguments the listed schema accepts.
async fn assert_verdicts_agree(client: &mut TestClient, tool: &str, cases: &[Value]) {
    let tools = client.list_tools().await;
    let validator = compile(&find(&tools, tool).input_schema);

    for args in cases {
        let client_says_valid = validator.is_valid(args);
        let result = client.call_tool(tool, args.clone()).await;
        let server_rejected = result.is_error && result.all_text().starts_with("Invalid arguments");
        assert_eq!(
            client_says_valid, !server_rejected,
            "{tool} with {args}: listed schema says valid={client_says_valid}, server said {:?}",
            result.all_text()
        );
    }
}

// =============================================================================
// Fixtures
// =============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
struct SearchInput {
    /// Text to look for
    query: String,
    /// Maximum number of hits
    #[serde(default)]
    limit: Option<u32>,
    #[serde(default)]
    mode: SearchMode,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
enum SearchMode {
    #[default]
    Exact,
    Fuzzy,
}

#[derive(Debug, Serialize, JsonSchema)]
struct SearchOutput {
    hits: Vec<String>,
    truncated: bool,
}

async fn server() -> McpServer {
    let search = ToolBuilder::new("search")
        .description("Search the index")
        .public()
        .output_type::<SearchOutput>()
        .handler(|input: SearchInput| async move {
            let limit = input.limit.unwrap_or(10) as usize;
            let hits: Vec<String> = (0..3).map(|i| format!("{}-{}", input.query, i)).collect();
            Ok::<_, ToolError>(SearchOutput {
                truncated: hits.len() > limit,
                hits: hits.into_iter().take(limit).collect(),
            })
        })
        .build()
        .unwrap();

    let tag = ToolBuilder::new("tag")
        .public()
        .parameters(json!({
            "type": "object",
            "properties": {
                "id": { "type": "integer", "minimum": 1 },
                "labels": {
                    "type": "array",
                    "items": { "type": "string", "pattern": "^[a-z]+$" },
                    "minItems": 1
                }
            },
            "required": ["id", "labels"],
            "additionalProperties": false
        }))
        .raw_handler(|_ctx: RequestContext, args: Value| async move {
            Ok::<_, ToolError>(format!("tagged {}", args["id"]))
        })
        .build()
        .unwrap();

    #[derive(Debug, Deserialize, JsonSchema)]
    struct ReviewArgs {
        /// File to review
        path: String,
        /// What to focus on
        focus: Option<String>,
    }

    let review = PromptBuilder::new("review")
        .public()
        .handler(|_ctx: RequestContext, args: ReviewArgs| async move {
            Ok::<_, ToolError>(format!(
                "Review {} focusing on {}",
                args.path,
                args.focus.as_deref().unwrap_or("correctness")
            ))
        })
        .unwrap();

    McpServer::builder("schemas")
        .tool(search)
        .tool(tag)
        .prompt(review)
        .build()
        .await
        .unwrap()
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_listed_schemas_compile() {
    let mut client = TestClient::new(server().await);
    for tool in client.list_tools().await {
        assert_eq!(tool.input_schema["type"], "object", "{}", tool.name);
        compile(&tool.input_schema);
        if let Some(output) = &tool.output_schema {
            compile(output);
        }
    }
}

#[tokio::test]
async fn test_derived_schema_matches_enforcement() {
    let mut client = TestClient::new(server().await);
    assert_verdicts_agree(
        &mut client,
        "search",
        &[
            json!({"query": "rust"}),
            json!({"query": "rust", "limit": 1, "mode": "fuzzy"}),
            json!({}),
            json!({"query": 42}),
            json!({"query": "rust", "limit": -1}),
            json!({"query": "rust", "mode": "regex"}),
        ],
    )
    .await;
}

#[tokio::test]
async fn test_declared_schema_is_published_verbatim_and_enforced() {
    let mut client = TestClient::new(server().await);
    let tools = client.list_tools().await;
    let tag = find(&tools, "tag");
    assert_eq!(tag.input_schema["required"], json!(["id", "labels"]));
    assert_eq!(tag.input_schema["additionalProperties"], json!(false));

    assert_verdicts_agree(
        &mut client,
        "tag",
        &[
            json!({"id": 1, "labels": ["bug"]}),
            json!({"id": 0, "labels": ["bug"]}),
            json!({"id": 1, "labels": []}),
            json!({"id": 1, "labels": ["Bug"]}),
            json!({"id": 1, "labels": ["bug"], "extra": true}),
        ],
    )
    .await;
}

#[tokio::test]
async fn test_structured_content_satisfies_output_schema() {
    let mut client = TestClient::new(server().await);
    let tools = client.list_tools().await;
    let output = compile(find(&tools, "search").output_schema.as_ref().unwrap());

    let result = client
        .call_tool("search", json!({"query": "q", "limit": 2}))
        .await;
    assert!(!result.is_error);
    let structured = result.structured_content.clone().expect("structured content");
    assert!(output.is_valid(&structured), "{structured}");
    assert_eq!(structured["truncated"], true);
    assert_eq!(structured["hits"], json!(["q-0", "q-1"]));

    // The text rendering is the same value
    let text: Value = serde_json::from_str(result.first_text().unwrap()).unwrap();
    assert_eq!(text, structured);
}

#[tokio::test]
async fn test_prompt_arguments_follow_input_type() {
    let mut client = TestClient::new(server().await);
    let prompts = client.list_prompts().await;
    let review = prompts.iter().find(|p| p.name == "review").unwrap();

    let mut args: Vec<(&str, bool, Option<&str>)> = review
        .arguments
        .iter()
        .map(|a| (a.name.as_str(), a.required, a.description.as_deref()))
        .collect();
    args.sort();
    assert_eq!(
        args,
        vec![
            ("focus", false, Some("What to focus on")),
            ("path", true, Some("File to review")),
        ]
    );
}

#[tokio::test]
async fn test_wire_field_names() {
    let mut client = TestClient::new(server().await);

    let listed = client.send_request("tools/list", None).await;
    let search = listed["tools"]
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["name"] == "search")
        .unwrap();
    assert!(search.get("inputSchema").is_some());
    assert!(search.get("outputSchema").is_some());

    let called = client
        .send_request(
            "tools/call",
            Some(json!({"name": "tag", "arguments": {"id": "x"}})),
        )
        .await;
    assert_eq!(called["isError"], true);
    assert!(called["structuredContent"]["issues"].is_array());
    assert_eq!(called["content"][0]["type"], "text");
}
