//! Typed MCP operations on the live session.

use crate::error::{McpError, McpResult};
use crate::protocol::{
    methods, CallToolResult, ClientRequest, CompleteResult, Completion, CompletionReference,
    GetPromptResult, JsonRpcNotification, ListPromptsResult, ListResourceTemplatesResult,
    ListResourcesResult, ListToolsResult, LoggingLevel, PromptArguments, ReadResourceResult,
};
use crate::schema::{EmptyResult, JsonSchema, Typed};
use crate::session::SessionManager;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

fn cursor_params(cursor: Option<&str>) -> Option<Value> {
    cursor.map(|cursor| json!({ "cursor": cursor }))
}

impl SessionManager {
    pub async fn ping(&self) -> McpResult<()> {
        self.call(ClientRequest::new(methods::PING, None), &EmptyResult)
            .await
    }

    /// List tools and remember their output schemas for [`call_tool`](Self::call_tool).
    pub async fn list_tools(&self, cursor: Option<&str>) -> McpResult<ListToolsResult> {
        let result: ListToolsResult = self
            .call(
                ClientRequest::new(methods::TOOLS_LIST, cursor_params(cursor)),
                &Typed::<ListToolsResult>::new(),
            )
            .await?;

        let mut schemas = self.shared().tool_schemas.lock().await;
        for tool in &result.tools {
            let Some(schema) = &tool.output_schema else {
                schemas.remove(&tool.name);
                continue;
            };
            match JsonSchema::compile(schema) {
                Ok(compiled) => {
                    schemas.insert(tool.name.clone(), Arc::new(compiled));
                }
                Err(e) => {
                    warn!(tool = %tool.name, error = %e, "Ignoring invalid output schema");
                    schemas.remove(&tool.name);
                }
            }
        }
        Ok(result)
    }

    /// Call a tool with a fresh progress token.
    ///
    /// Structured content is checked against the output schema from the last
    /// [`list_tools`](Self::list_tools).
    pub async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<CallToolResult> {
        let progress_token = self.shared().dispatcher.next_progress_token();
        let params = json!({
            "name": name,
            "arguments": arguments,
            "_meta": { "progressToken": progress_token },
        });
        debug!(tool = %name, progress_token, "Calling tool");

        let result: CallToolResult = self
            .call(
                ClientRequest::new(methods::TOOLS_CALL, Some(params)),
                &Typed::<CallToolResult>::new(),
            )
            .await?;

        let schema = self.shared().tool_schemas.lock().await.get(name).cloned();
        if let Some(schema) = schema {
            match &result.structured_content {
                Some(content) => schema.validate(content).map_err(|e| {
                    McpError::SchemaMismatch(format!(
                        "structured content of tool '{}' does not match its output schema: {}",
                        name, e
                    ))
                })?,
                None if !result.is_error => {
                    return Err(McpError::SchemaMismatch(format!(
                        "tool '{}' declares an output schema but returned no structured content",
                        name
                    )))
                }
                None => {}
            }
        }
        Ok(result)
    }

    pub async fn list_resources(&self, cursor: Option<&str>) -> McpResult<ListResourcesResult> {
        self.call(
            ClientRequest::new(methods::RESOURCES_LIST, cursor_params(cursor)),
            &Typed::<ListResourcesResult>::new(),
        )
        .await
    }

    pub async fn list_resource_templates(
        &self,
        cursor: Option<&str>,
    ) -> McpResult<ListResourceTemplatesResult> {
        self.call(
            ClientRequest::new(methods::RESOURCES_TEMPLATES_LIST, cursor_params(cursor)),
            &Typed::<ListResourceTemplatesResult>::new(),
        )
        .await
    }

    pub async fn read_resource(&self, uri: &str) -> McpResult<ReadResourceResult> {
        self.call(
            ClientRequest::new(methods::RESOURCES_READ, Some(json!({ "uri": uri }))),
            &Typed::<ReadResourceResult>::new(),
        )
        .await
    }

    pub async fn subscribe_resource(&self, uri: &str) -> McpResult<()> {
        self.call(
            ClientRequest::new(methods::RESOURCES_SUBSCRIBE, Some(json!({ "uri": uri }))),
            &EmptyResult,
        )
        .await?;
        self.shared()
            .subscriptions
            .lock()
            .await
            .insert(uri.to_string());
        Ok(())
    }

    pub async fn unsubscribe_resource(&self, uri: &str) -> McpResult<()> {
        self.call(
            ClientRequest::new(methods::RESOURCES_UNSUBSCRIBE, Some(json!({ "uri": uri }))),
            &EmptyResult,
        )
        .await?;
        self.shared().subscriptions.lock().await.remove(uri);
        Ok(())
    }

    /// Resource URIs subscribed during this session, sorted.
    pub async fn subscriptions(&self) -> Vec<String> {
        let mut uris: Vec<String> = self
            .shared()
            .subscriptions
            .lock()
            .await
            .iter()
            .cloned()
            .collect();
        uris.sort();
        uris
    }

    pub async fn list_prompts(&self, cursor: Option<&str>) -> McpResult<ListPromptsResult> {
        self.call(
            ClientRequest::new(methods::PROMPTS_LIST, cursor_params(cursor)),
            &Typed::<ListPromptsResult>::new(),
        )
        .await
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: PromptArguments,
    ) -> McpResult<GetPromptResult> {
        self.call(
            ClientRequest::new(
                methods::PROMPTS_GET,
                Some(json!({ "name": name, "arguments": arguments })),
            ),
            &Typed::<GetPromptResult>::new(),
        )
        .await
    }

    pub async fn set_logging_level(&self, level: LoggingLevel) -> McpResult<()> {
        self.call(
            ClientRequest::new(
                methods::LOGGING_SET_LEVEL,
                Some(json!({ "level": level.as_str() })),
            ),
            &EmptyResult,
        )
        .await
    }

    /// Argument completion. Without server support the result is empty and
    /// nothing is sent.
    pub async fn complete(
        &self,
        reference: CompletionReference,
        argument_name: &str,
        argument_value: &str,
        context: Option<Map<String, Value>>,
    ) -> McpResult<Completion> {
        if !self.supports_completion().await {
            debug!("Server does not support completions");
            return Ok(Completion::default());
        }

        let mut params = json!({
            "ref": reference,
            "argument": { "name": argument_name, "value": argument_value },
        });
        if let Some(arguments) = context {
            params["context"] = json!({ "arguments": arguments });
        }

        let result: CompleteResult = self
            .call(
                ClientRequest::new(methods::COMPLETION_COMPLETE, Some(params)),
                &Typed::<CompleteResult>::new(),
            )
            .await?;
        Ok(result.completion)
    }

    /// Tell the server the roots changed.
    pub async fn send_roots_list_changed(&self) -> McpResult<()> {
        self.notify(JsonRpcNotification::new(
            methods::NOTIFICATION_ROOTS_LIST_CHANGED,
            None,
        ))
        .await
    }
}
