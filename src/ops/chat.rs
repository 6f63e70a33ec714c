// mdsaad Ops — Chat
// Validate the prompt, resolve an explicit model name to the provider that
// serves it, assemble the message list (system prompt, recent history
// pairs, current prompt), route proxy-first, and append the exchange to
// the history buffer on success.

use crate::atoms::constants::HISTORY_CONTEXT_PAIRS;
use crate::atoms::error::{CallError, FabricResult};
use crate::atoms::types::{
    CallPayload, Capability, ChatMessage, ChatPayload, HistoryEntry, NormalizedReply,
    OperationKind, Reply,
};
use crate::engine::transport::CancelToken;
use crate::engine::Core;
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextMode {
    None,
    #[default]
    Recent,
    All,
}

impl std::str::FromStr for ContextMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(ContextMode::None),
            "recent" => Ok(ContextMode::Recent),
            "all" => Ok(ContextMode::All),
            other => Err(format!("unknown context mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub prompt: String,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f64>,
    pub stream: bool,
    pub system: Option<String>,
    pub context: ContextMode,
}

pub async fn run(core: &Core, request: ChatRequest, cancel: &CancelToken) -> FabricResult<Reply> {
    if request.prompt.trim().is_empty() {
        return Err(CallError::InvalidInput("prompt is empty".into()).into());
    }

    // An explicit model picks its provider through the alias reverse-index
    // unless the caller already pinned one.
    let mut preferred = request.provider.clone();
    let mut model = request.model.clone();
    if let (Some(name), None) = (&request.model, &request.provider) {
        if let Some((provider_id, wire_model)) = core.registry.provider_for_model(name) {
            debug!("[chat] model '{}' resolves to {} ({})", name, provider_id, wire_model);
            preferred = Some(provider_id);
            model = Some(wire_model);
        }
    }

    let messages = build_messages(core, &request);
    let payload = CallPayload::Chat(ChatPayload {
        messages,
        model,
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        top_p: request.top_p,
        stream: request.stream,
    });

    let options = crate::engine::dispatcher::CallOptions {
        preferred_provider: preferred,
        cancel: cancel.clone(),
        ..Default::default()
    };

    let reply = super::proxy_then_direct(core, Capability::Chat, payload, &options).await?;

    if let NormalizedReply::Chat { content, model, .. } = &reply.body {
        core.history.append(HistoryEntry {
            timestamp: core.clock.wall_now(),
            operation_kind: OperationKind::Chat,
            prompt_or_query: request.prompt.clone(),
            reply_or_result: content.clone(),
            provider_id: reply.provider_id.clone(),
            model_id: Some(model.clone()).filter(|m| !m.is_empty()),
            truncated_summary: String::new(),
        });
    }

    Ok(reply)
}

/// System prompt, then prior exchanges as user/assistant pairs, then the
/// current prompt.
fn build_messages(core: &Core, request: &ChatRequest) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    if let Some(system) = request.system.as_deref().filter(|s| !s.trim().is_empty()) {
        messages.push(ChatMessage::system(system));
    }

    let context: Vec<HistoryEntry> = match request.context {
        ContextMode::None => Vec::new(),
        ContextMode::Recent => core.history.recent(HISTORY_CONTEXT_PAIRS),
        ContextMode::All => core.history.all(),
    };
    for entry in context {
        if entry.operation_kind != OperationKind::Chat {
            continue;
        }
        messages.push(ChatMessage::user(entry.prompt_or_query));
        messages.push(ChatMessage::assistant(entry.reply_or_result));
    }

    messages.push(ChatMessage::user(request.prompt.clone()));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::UserConfig;
    use crate::engine::core::CoreSettings;
    use crate::engine::registry::builtin_providers;
    use crate::engine::transport::{HttpRequest, HttpResponse, HttpTransport, TransportError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    struct StaticTransport {
        body: String,
    }

    #[async_trait]
    impl HttpTransport for StaticTransport {
        async fn execute(
            &self,
            request: HttpRequest,
            _cancel: &CancelToken,
        ) -> Result<HttpResponse, TransportError> {
            if request.url.contains("openrouter.ai") {
                Ok(HttpResponse { status: 200, headers: Vec::new(), body: self.body.clone() })
            } else {
                Err(TransportError::Network("unreachable in tests".into()))
            }
        }
    }

    fn core(body: String) -> Core {
        let providers = builtin_providers()
            .into_iter()
            .map(|mut p| {
                if p.id == "openrouter" {
                    p.credential = Some("key".into());
                }
                p
            })
            .collect();
        Core::new(
            CoreSettings {
                providers,
                proxy_urls: Vec::new(),
                proxy_enabled: false,
                cache_dir: None,
                user_config: UserConfig::default(),
            },
            Arc::new(StaticTransport { body }),
        )
    }

    fn ok_body(content: &str) -> String {
        json!({
            "model": "meta-llama/llama-3.3-70b-instruct",
            "choices": [{"message": {"content": content}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4},
        })
        .to_string()
    }

    #[tokio::test]
    async fn successful_chat_lands_in_history() {
        let core = core(ok_body("hi"));
        let request = ChatRequest { prompt: "hello".into(), ..Default::default() };
        let reply = run(&core, request, &CancelToken::new()).await.unwrap();
        assert_eq!(reply.provider_id, "openrouter");
        assert_eq!(core.history.len(), 1);
        let entry = &core.history.all()[0];
        assert_eq!(entry.prompt_or_query, "hello");
        assert_eq!(entry.reply_or_result, "hi");
        assert_eq!(entry.operation_kind, OperationKind::Chat);
    }

    #[tokio::test]
    async fn empty_prompt_fails_fast_without_history() {
        let core = core(ok_body("unused"));
        let request = ChatRequest { prompt: "   ".into(), ..Default::default() };
        let err = run(&core, request, &CancelToken::new()).await.unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(core.history.is_empty());
    }

    #[tokio::test]
    async fn recent_context_becomes_alternating_pairs() {
        let core = core(ok_body("third reply"));
        for n in 0..2 {
            let request =
                ChatRequest { prompt: format!("prompt {}", n), ..Default::default() };
            run(&core, request, &CancelToken::new()).await.unwrap();
        }

        let request = ChatRequest {
            prompt: "current".into(),
            system: Some("be terse".into()),
            context: ContextMode::Recent,
            ..Default::default()
        };
        let messages = build_messages(&core, &request);
        // system + 2 pairs + current prompt
        assert_eq!(messages.len(), 6);
        assert_eq!(messages[0].role, crate::atoms::types::Role::System);
        assert_eq!(messages[1].content, "prompt 0");
        assert_eq!(messages[2].role, crate::atoms::types::Role::Assistant);
        assert_eq!(messages[5].content, "current");

        let request = ChatRequest {
            prompt: "current".into(),
            context: ContextMode::None,
            ..Default::default()
        };
        assert_eq!(build_messages(&core, &request).len(), 1);
    }

    #[tokio::test]
    async fn model_name_routes_to_its_provider() {
        let core = core(ok_body("routed"));
        let request = ChatRequest {
            prompt: "hello".into(),
            model: Some("llama".into()),
            ..Default::default()
        };
        let reply = run(&core, request, &CancelToken::new()).await.unwrap();
        assert_eq!(reply.provider_id, "openrouter");
    }
}
