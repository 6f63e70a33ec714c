// mdsaad Engine — Google generative chat adapter
// Gemini's dialect: role set is {user, model}, system prompts ride the
// systemInstruction field, and the API key goes in the URL. No SSE here;
// the reply is a single-element chunk sequence.

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

    let model = match &chat.model {
        Some(name) => provider.resolve_model(name).to_string(),
        None => provider
            .default_model()
            .map(String::from)
            .ok_or_else(|| {
                FabricError::Config(format!("provider '{}' has no default model", provider.id))
            })?,
    };

    let mut system_instruction: Option<Value> = None;
    let mut contents: Vec<Value> = Vec::new();
    for message in &chat.messages {
        match message.role {
            Role::System => {
                system_instruction = Some(json!({"parts": [{"text": message.content}]}));
            }
            Role::User => {
                contents.push(json!({"role": "user", "parts": [{"text": message.content}]}));
            }
            Role::Assistant => {
                contents.push(json!({"role": "model", "parts": [{"text": message.content}]}));
            }
        }
    }

    let mut generation_config = json!({});
    if let Some(temperature) = chat.temperature {
        generation_config["temperature"] = json!(temperature);
    }
    if let Some(max_tokens) = chat.max_tokens {
        generation_config["maxOutputTokens"] = json!(max_tokens);
    }
    if let Some(top_p) = chat.top_p {
        generation_config["topP"] = json!(top_p);
    }

    let mut body = json!({"contents": contents});
    if let Some(system) = system_instruction {
        body["systemInstruction"] = system;
    }
    if generation_config.as_object().is_some_and(|o| !o.is_empty()) {
        body["generationConfig"] = generation_config;
    }

    let key = provider.credential.as_deref().unwrap_or_default();
    Ok(HttpRequest {
        method: Method::Post,
        url: format!(
            "{}/models/{}:generateContent?key={}",
            provider.base_url.trim_end_matches('/'),
            model,
            urlencoding::encode(key),
        ),
        headers: Vec::new(),
        body: Some(body),
        timeout_ms: provider.timeout_ms,
    })
}

pub fn parse_response(provider: &Provider, body: &str) -> FabricResult<NormalizedReply> {
    let value = parse_json_body(provider, body)?;
    let candidate = value["candidates"]
        .get(0)
        .ok_or_else(|| FabricError::provider(&provider.id, "response has no candidates"))?;
    let content = candidate["content"]["parts"]
        .get(0)
        .and_then(|part| part["text"].as_str())
        .ok_or_else(|| FabricError::provider(&provider.id, "candidate carries no text"))?
        .to_string();

    let finish_reason = candidate["finishReason"].as_str().map(String::from);
    let model = value["modelVersion"].as_str().unwrap_or_default().to_string();

    let meta = &value["usageMetadata"];
    let prompt = meta["promptTokenCount"].as_u64().unwrap_or(0);
    let completion = meta["candidatesTokenCount"].as_u64().unwrap_or(0);
    let usage = TokenUsage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: meta["totalTokenCount"].as_u64().unwrap_or(prompt + completion),
    };

    Ok(NormalizedReply::Chat {
        chunks: vec![content.clone()],
        content,
        model,
        usage,
        finish_reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::{AdapterId, ChatMessage, CircuitConfig, RateLimitConfig};
    use std::collections::{BTreeMap, BTreeSet};

    fn provider() -> Provider {
        let mut aliases = BTreeMap::new();
        aliases.insert("gemini".to_string(), "gemini-2.0-flash".to_string());
        Provider {
            id: "gemini".into(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".into(),
            credential: Some("g-key".into()),
            priority: 4,
            enabled: true,
            rate_limit: RateLimitConfig::default(),
            circuit: CircuitConfig::default(),
            supports: BTreeSet::new(),
            adapter_id: AdapterId::GoogleChat,
            model_aliases: aliases,
            default_alias: Some("gemini".into()),
            key_in_url: true,
            requires_credential: true,
            timeout_ms: 60_000,
        }
    }

    #[test]
    fn request_maps_roles_and_puts_key_in_url() {
        let chat = ChatPayload {
            messages: vec![
                ChatMessage::system("be brief"),
                ChatMessage::user("first"),
                ChatMessage::assistant("reply"),
                ChatMessage::user("second"),
            ],
            model: None,
            temperature: Some(0.5),
            max_tokens: Some(256),
            top_p: Some(0.9),
            stream: false,
        };
        let req = format_request(&provider(), &chat).unwrap();
        assert!(req
            .url
            .starts_with("https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent?key=g-key"));

        let body = req.body.unwrap();
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[2]["parts"][0]["text"], "second");
        assert_eq!(body["generationConfig"]["temperature"], 0.5);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 256);
        assert_eq!(body["generationConfig"]["topP"], 0.9);
    }

    #[test]
    fn whitespace_prompt_is_rejected() {
        let chat = ChatPayload {
            messages: vec![ChatMessage::user("  ")],
            model: None,
            temperature: None,
            max_tokens: None,
            top_p: None,
            stream: false,
        };
        assert!(format_request(&provider(), &chat).is_err());
    }

    #[test]
    fn parses_candidate_reply() {
        let body = serde_json::json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "bonjour"}]},
                "finishReason": "STOP",
            }],
            "usageMetadata": {
                "promptTokenCount": 7,
                "candidatesTokenCount": 2,
                "totalTokenCount": 9,
            },
            "modelVersion": "gemini-2.0-flash",
        })
        .to_string();
        let reply = parse_response(&provider(), &body).unwrap();
        match reply {
            NormalizedReply::Chat { content, model, usage, finish_reason, chunks } => {
                assert_eq!(content, "bonjour");
                assert_eq!(model, "gemini-2.0-flash");
                assert_eq!(usage.prompt_tokens, 7);
                assert_eq!(usage.total_tokens, 9);
                assert_eq!(finish_reason.as_deref(), Some("STOP"));
                assert_eq!(chunks.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn empty_candidates_is_a_provider_error() {
        let body = serde_json::json!({"candidates": []}).to_string();
        assert!(parse_response(&provider(), &body).is_err());
    }
}
