//! Chat-streaming providers.
//!
//! The agent loop talks to a [`ChatProvider`]: one streaming chat call per
//! model turn, yielding [`ChatDelta`]s. [`OpenAiProvider`] implements it for
//! any OpenAI-compatible endpoint.

use crate::config::ProviderConfig;
use crate::error::AgentError;
use crate::types::{Message, Role, ToolSchema};

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionTool, ChatCompletionToolArgs, ChatCompletionToolType,
    CreateChatCompletionRequestArgs, CreateChatCompletionStreamResponse, FunctionCall,
    FunctionObjectArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::debug;

/// Incremental model output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatDelta {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallDelta>,
}

impl ChatDelta {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_call(delta: ToolCallDelta) -> Self {
        Self {
            content: None,
            tool_calls: vec![delta],
        }
    }
}

/// One fragment of a streamed tool call. `id` and `name` usually arrive on
/// the first fragment only; `arguments` is a slice of a JSON string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallDelta {
    pub index: u32,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

pub type ChatStream = BoxStream<'static, Result<ChatDelta, AgentError>>;

/// A streaming chat-completion backend with function calling.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Open a streaming completion. Pass an empty `tools` slice for a
    /// plain text turn.
    async fn stream_chat(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<ChatStream, AgentError>;
}

/// OpenAI-compatible chat provider backed by `async-openai`.
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    model: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("model", &self.model)
            .field("client", &"<async_openai::Client>")
            .finish()
    }
}

impl OpenAiProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        debug!(api_base = %config.api_base, model = %config.model, "Creating OpenAI-compatible provider");
        let openai_config = OpenAIConfig::new()
            .with_api_base(&config.api_base)
            .with_api_key(
                config
                    .api_key
                    .clone()
                    .unwrap_or_else(|| "not-needed".to_string()),
            );

        Self {
            client: Client::with_config(openai_config),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    fn build_tools(schemas: &[ToolSchema]) -> Result<Vec<ChatCompletionTool>, AgentError> {
        schemas
            .iter()
            .map(|s| {
                let func = FunctionObjectArgs::default()
                    .name(&s.name)
                    .description(&s.description)
                    .parameters(s.parameters.clone())
                    .build()
                    .map_err(|e| AgentError::Provider(format!("function '{}': {}", s.name, e)))?;
                ChatCompletionToolArgs::default()
                    .r#type(ChatCompletionToolType::Function)
                    .function(func)
                    .build()
                    .map_err(|e| AgentError::Provider(format!("tool '{}': {}", s.name, e)))
            })
            .collect()
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn stream_chat(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<ChatStream, AgentError> {
        debug!(
            model = %self.model,
            message_count = messages.len(),
            tool_count = tools.len(),
            "Starting streaming completion request"
        );

        let mut request_builder = CreateChatCompletionRequestArgs::default();
        request_builder
            .model(&self.model)
            .messages(build_openai_messages(messages)?)
            .stream(true);
        if let Some(max_tokens) = self.max_tokens {
            request_builder.max_completion_tokens(max_tokens);
        }
        if let Some(temperature) = self.temperature {
            request_builder.temperature(temperature);
        }
        if !tools.is_empty() {
            request_builder.tools(Self::build_tools(tools)?);
        }

        let request = request_builder
            .build()
            .map_err(|e| AgentError::Provider(e.to_string()))?;

        let stream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(|e| AgentError::Provider(e.to_string()))?;

        Ok(stream
            .map(|item| match item {
                Ok(response) => Ok(delta_from_response(response)),
                Err(e) => Err(AgentError::Provider(e.to_string())),
            })
            .boxed())
    }
}

fn delta_from_response(response: CreateChatCompletionStreamResponse) -> ChatDelta {
    let mut delta = ChatDelta::default();
    for choice in response.choices {
        if let Some(content) = choice.delta.content {
            delta.content.get_or_insert_with(String::new).push_str(&content);
        }
        for chunk in choice.delta.tool_calls.unwrap_or_default() {
            let (name, arguments) = match chunk.function {
                Some(f) => (f.name, f.arguments),
                None => (None, None),
            };
            delta.tool_calls.push(ToolCallDelta {
                index: chunk.index,
                id: chunk.id,
                name,
                arguments,
            });
        }
    }
    delta
}

/// Convert our Message types to async-openai request messages.
pub fn build_openai_messages(
    messages: &[Message],
) -> Result<Vec<ChatCompletionRequestMessage>, AgentError> {
    let mut result = Vec::with_capacity(messages.len());

    for msg in messages {
        match msg.role {
            Role::System => {
                let m = ChatCompletionRequestSystemMessageArgs::default()
                    .content(msg.content.as_str())
                    .build()
                    .map_err(|e| AgentError::Provider(e.to_string()))?;
                result.push(ChatCompletionRequestMessage::System(m));
            }
            Role::User => {
                let m = ChatCompletionRequestUserMessageArgs::default()
                    .content(msg.content.as_str())
                    .build()
                    .map_err(|e| AgentError::Provider(e.to_string()))?;
                result.push(ChatCompletionRequestMessage::User(m));
            }
            Role::Assistant => {
                let mut builder = ChatCompletionRequestAssistantMessageArgs::default();
                if !msg.content.is_empty() || msg.tool_calls.is_empty() {
                    builder.content(msg.content.as_str());
                }
                if !msg.tool_calls.is_empty() {
                    let tc_openai: Vec<ChatCompletionMessageToolCall> = msg
                        .tool_calls
                        .iter()
                        .map(|tc| ChatCompletionMessageToolCall {
                            id: tc.id.clone(),
                            r#type: ChatCompletionToolType::Function,
                            function: FunctionCall {
                                name: tc.name.clone(),
                                arguments: tc.arguments.clone(),
                            },
                        })
                        .collect();
                    builder.tool_calls(tc_openai);
                }
                let m = builder
                    .build()
                    .map_err(|e| AgentError::Provider(e.to_string()))?;
                result.push(ChatCompletionRequestMessage::Assistant(m));
            }
            Role::Tool => {
                let m = ChatCompletionRequestToolMessageArgs::default()
                    .tool_call_id(msg.tool_call_id.as_deref().unwrap_or(""))
                    .content(msg.content.as_str())
                    .build()
                    .map_err(|e| AgentError::Provider(e.to_string()))?;
                result.push(ChatCompletionRequestMessage::Tool(m));
            }
        }
    }

    Ok(result)
}
