//! Model providers for the ladder's local and cloud rungs.
//!
//! Providers only move text; [`parse_intent_labels`] turns a model reply into
//! an [`Intent`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::Intent;

pub const LABEL_SYSTEM_PROMPT: &str = "You label landing-page briefs. Reply with JSON only.";

#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn generate(&self, model: &str, prompt: String, system: Option<String>) -> Result<String>;
}

pub struct OllamaProvider {
    client: ollama_rs::Ollama,
}

impl OllamaProvider {
    pub fn new(client: ollama_rs::Ollama) -> Self {
        Self { client }
    }

    /// Builds a client from a URL such as `http://localhost:11434`.
    pub fn from_url(url: &str) -> Result<Self> {
        let parsed = reqwest::Url::parse(url).with_context(|| format!("Invalid OLLAMA_URL {}", url))?;
        let host = format!(
            "{}://{}",
            parsed.scheme(),
            parsed.host_str().context("OLLAMA_URL has no host")?
        );
        let port = parsed.port_or_known_default().unwrap_or(11434);
        Ok(Self::new(ollama_rs::Ollama::new(host, port)))
    }
}

#[async_trait]
impl LLMProvider for OllamaProvider {
    async fn generate(&self, model: &str, prompt: String, system: Option<String>) -> Result<String> {
        use ollama_rs::generation::chat::{request::ChatMessageRequest, ChatMessage};

        let mut messages = Vec::new();
        if let Some(sys) = system {
            messages.push(ChatMessage::system(sys));
        }
        messages.push(ChatMessage::user(prompt));

        let res = self
            .client
            .send_chat_messages(ChatMessageRequest::new(model.to_string(), messages))
            .await?;

        Ok(res.message.content)
    }
}

/// Any `/chat/completions` endpoint speaking the OpenAI wire format.
pub struct OpenAICompatibleProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAICompatibleProvider {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url,
            api_key,
        }
    }
}

#[async_trait]
impl LLMProvider for OpenAICompatibleProvider {
    async fn generate(&self, model: &str, prompt: String, system: Option<String>) -> Result<String> {
        let mut messages = Vec::new();
        if let Some(sys) = system {
            messages.push(json!({ "role": "system", "content": sys }));
        }
        messages.push(json!({ "role": "user", "content": prompt }));

        // Labelling wants stable output, not creativity.
        let body = json!({
            "model": model,
            "messages": messages,
            "temperature": 0.0,
            "response_format": { "type": "json_object" },
        });

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .json(&body);

        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let res = request.send().await?.error_for_status()?;
        let json: Value = res.json().await?;

        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .context("Failed to parse content from chat completion response")?;

        Ok(content.to_string())
    }
}

/// Labelling instructions sent to either model rung.
pub fn label_prompt(brief: &str) -> String {
    format!(
        r#"Return ONLY JSON with keys:
{{"audience":"","goal":"","industry":"","vibe":"","color_scheme":"","sections":["hero-basic","cta-simple"]}}

Rules:
- sections must be from: hero-basic, cta-simple, features-3col, pricing-simple, faq-accordion.
- goal one of: waitlist, demo, purchase, contact.
- vibe one of: minimal, bold, playful, serious.
- color_scheme: "dark" or "light".

PROMPT: {}"#,
        brief.trim()
    )
}

/// Pulls the outermost `{...}` object out of a model reply and reads intent
/// labels from it. Missing sections default to hero + CTA.
pub fn parse_intent_labels(reply: &str) -> Option<Intent> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end <= start {
        return None;
    }
    let parsed: Value = serde_json::from_str(&reply[start..=end]).ok()?;
    let obj = parsed.as_object()?;

    let field = |k: &str| -> String {
        obj.get(k)
            .and_then(Value::as_str)
            .map(|s| s.trim().to_lowercase())
            .unwrap_or_default()
    };

    let mut sections: Vec<String> = obj
        .get("sections")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).map(String::from).collect())
        .unwrap_or_default();
    if sections.is_empty() {
        sections = vec!["hero-basic".to_string(), "cta-simple".to_string()];
    }

    Some(Intent {
        audience: field("audience"),
        goal: field("goal"),
        industry: field("industry"),
        vibe: field("vibe"),
        color_scheme: field("color_scheme"),
        density: field("density"),
        complexity: field("complexity"),
        sections,
    })
}
