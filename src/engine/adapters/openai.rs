// mdsaad Engine — OpenAI-compatible chat adapter
// Serves OpenRouter, Groq, and DeepSeek; they all speak the
// /chat/completions dialect. Streaming responses arrive as SSE lines and
// are parsed into the chunk sequence the normalized reply carries.

use crate::atoms::error::{FabricError, FabricResult};
use crate::atoms::types::{ChatPayload, NormalizedReply, Provider, Role, TokenUsage};
use crate::engine::transport::{HttpRequest, Method};
use serde_json::{json, Value};

use super::{parse_json_body, require_prompt};

pub fn format_request(provider: &Provider, chat: &ChatPayload) -> FabricResult<HttpRequest> {
    let prompt = chat
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or("");
    require_prompt(prompt)?;

    let model = resolve_model(provider, chat)?;

    let messages: Vec<Value> = chat
        .messages
        .iter()
        .map(|m| {
            json!({
                "role": match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                "content": m.content,
            })
        })
        .collect();

    let mut body = json!({
        "model": model,
        "messages": messages,
        "stream": chat.stream,
    });
    if let Some(temperature) = chat.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(max_tokens) = chat.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if let Some(top_p) = chat.top_p {
        body["top_p"] = json!(top_p);
    }
    if chat.stream {
        body["stream_options"] = json!({"include_usage": true});
    }

    Ok(HttpRequest {
        method: Method::Post,
        url: format!("{}/chat/completions", provider.base_url.trim_end_matches('/')),
        headers: Vec::new(),
        body: Some(body),
        timeout_ms: provider.timeout_ms,
    })
}

fn resolve_model(provider: &Provider, chat: &ChatPayload) -> FabricResult<String> {
    match &chat.model {
        Some(name) => Ok(provider.resolve_model(name).to_string()),
        None => provider
            .default_model()
            .map(String::from)
            .ok_or_else(|| {
                FabricError::Config(format!("provider '{}' has no default model", provider.id))
            }),
    }
}

pub fn parse_response(
    provider: &Provider,
    chat: &ChatPayload,
    body: &str,
) -> FabricResult<NormalizedReply> {
    if chat.stream && body.trim_start().starts_with("data:") {
        return parse_sse_body(provider, body);
    }

    let value = parse_json_body(provider, body)?;
    let choice = value["choices"]
        .get(0)
        .ok_or_else(|| FabricError::provider(&provider.id, "response has no choices"))?;
    let content = choice["message"]["content"]
        .as_str()
        .or_else(|| choice["text"].as_str())
        .ok_or_else(|| FabricError::provider(&provider.id, "choice carries no content"))?
        .to_string();

    let model = value["model"].as_str().unwrap_or_default().to_string();
    let finish_reason = choice["finish_reason"].as_str().map(String::from);
    let usage = parse_usage(&value["usage"]);

    Ok(NormalizedReply::Chat {
        chunks: vec![content.clone()],
        content,
        model,
        usage,
        finish_reason,
    })
}

fn parse_usage(usage: &Value) -> TokenUsage {
    let prompt = usage["prompt_tokens"].as_u64().unwrap_or(0);
    let completion = usage["completion_tokens"].as_u64().unwrap_or(0);
    TokenUsage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: usage["total_tokens"].as_u64().unwrap_or(prompt + completion),
    }
}

// ── SSE stream parsing ─────────────────────────────────────────────────────

/// One parsed `data:` line of an SSE chat stream.
struct SseChunk {
    delta: Option<String>,
    finish_reason: Option<String>,
    model: Option<String>,
    usage: Option<TokenUsage>,
}

fn parse_sse_chunk(data: &str) -> Option<SseChunk> {
    if data == "[DONE]" {
        return None;
    }
    let v: Value = serde_json::from_str(data).ok()?;
    let choice = v["choices"].get(0);
    let delta = choice
        .and_then(|c| c["delta"]["content"].as_str())
        .map(String::from);
    let finish_reason = choice
        .and_then(|c| c["finish_reason"].as_str())
        .map(String::from);
    let model = v["model"].as_str().map(String::from);
    let usage = v.get("usage").filter(|u| !u.is_null()).map(parse_usage);
    Some(SseChunk { delta, finish_reason, model, usage })
}

fn parse_sse_body(provider: &Provider, body: &str) -> FabricResult<NormalizedReply> {
    let mut chunks: Vec<String> = Vec::new();
    let mut finish_reason = None;
    let mut model = String::new();
    let mut usage = TokenUsage::default();

    for line in body.lines() {
        let line = line.trim();
        let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:"))
        else {
            continue;
        };
        let Some(chunk) = parse_sse_chunk(data.trim()) else { continue };
        if let Some(delta) = chunk.delta {
            if !delta.is_empty() {
                chunks.push(scrubbed(&delta));
            }
        }
        if chunk.finish_reason.is_some() {
            finish_reason = chunk.finish_reason;
        }
        if let Some(m) = chunk.model {
            model = m;
        }
        if let Some(u) = chunk.usage {
            usage = u;
        }
    }

    if chunks.is_empty() {
        return Err(FabricError::provider(&provider.id, "stream carried no content"));
    }

    Ok(NormalizedReply::Chat {
        content: chunks.concat(),
        model,
        usage,
        finish_reason,
        chunks,
    })
}

fn scrubbed(s: &str) -> String {
    match crate::engine::sanitize::sanitize_json(Value::String(s.to_string())) {
        Value::String(clean) => clean,
        _ => s.to_string(),
    }
}
