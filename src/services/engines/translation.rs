// Translation provider adapters
//
// Two providers behind one trait: Google Translate v2 and an OpenAI chat
// model prompted as a translator. Segments arrive pre-bounded by the text
// segmenter, but each adapter still enforces its own payload ceiling.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::config::Config;
use crate::core::errors::{EngineError, EngineResult};
use crate::services::engines::{
    transport_error, EngineDescriptor, Lang, GOOGLE_TRANSLATE_DESCRIPTOR,
    OPENAI_TRANSLATE_DESCRIPTOR,
};

/// Machine translation capability.
#[async_trait]
pub trait TranslationEngine: Send + Sync {
    fn descriptor(&self) -> &EngineDescriptor;

    async fn translate(&self, segment: &str, source: Lang, target: Lang) -> EngineResult<String>;
}

fn guard(descriptor: &EngineDescriptor, segment: &str, source: Lang, target: Lang) -> EngineResult<()> {
    descriptor.ensure_supported(source)?;
    descriptor.ensure_supported(target)?;
    descriptor.ensure_payload(segment.chars().count())?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Google Translate v2

const TRANSLATE_ENDPOINT: &str = "https://translation.googleapis.com/language/translate/v2";

pub struct GoogleTranslate {
    client: reqwest::Client,
    api_key: String,
    timeout_secs: u64,
}

#[derive(Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'static str,
}

#[derive(Deserialize)]
struct TranslateResponse {
    data: TranslateData,
}

#[derive(Deserialize)]
struct TranslateData {
    translations: Vec<Translation>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Translation {
    translated_text: String,
}

impl GoogleTranslate {
    pub fn new(config: &Config) -> EngineResult<Self> {
        let api_key = config
            .engine
            .google_api_key
            .clone()
            .ok_or_else(|| EngineError::Auth {
                engine: "google",
                detail: "GOOGLE_API_KEY is not configured".to_string(),
            })?;

        let client = reqwest::Client::builder()
            .timeout(config.engine_timeout())
            .build()
            .map_err(|e| transport_error("google", config.engine.timeout_secs, e))?;

        Ok(Self {
            client,
            api_key,
            timeout_secs: config.engine.timeout_secs,
        })
    }
}

#[async_trait]
impl TranslationEngine for GoogleTranslate {
    fn descriptor(&self) -> &EngineDescriptor {
        &GOOGLE_TRANSLATE_DESCRIPTOR
    }

    async fn translate(&self, segment: &str, source: Lang, target: Lang) -> EngineResult<String> {
        guard(self.descriptor(), segment, source, target)?;

        let body = TranslateRequest {
            q: segment,
            source: source.code(),
            target: target.code(),
            format: "text",
        };

        let response = self
            .client
            .post(TRANSLATE_ENDPOINT)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("google", self.timeout_secs, e))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(EngineError::Auth {
                engine: "google",
                detail: format!("HTTP {status}"),
            });
        }
        if !status.is_success() {
            return Err(EngineError::Provider {
                engine: "google",
                detail: format!("HTTP {status}"),
            });
        }

        let parsed: TranslateResponse = response
            .json()
            .await
            .map_err(|e| transport_error("google", self.timeout_secs, e))?;

        parsed
            .data
            .translations
            .into_iter()
            .next()
            .map(|t| t.translated_text)
            .ok_or_else(|| EngineError::Provider {
                engine: "google",
                detail: "empty translation response".to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// OpenAI chat completion

const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAiTranslate {
    client: reqwest::Client,
    api_key: String,
    model: String,
    timeout_secs: u64,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: std::borrow::Cow<'a, str>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl OpenAiTranslate {
    pub fn new(config: &Config) -> EngineResult<Self> {
        let api_key = config
            .engine
            .openai_api_key
            .clone()
            .ok_or_else(|| EngineError::Auth {
                engine: "openai",
                detail: "OPENAI_API_KEY is not configured".to_string(),
            })?;

        let client = reqwest::Client::builder()
            .timeout(config.engine_timeout())
            .build()
            .map_err(|e| transport_error("openai", config.engine.timeout_secs, e))?;

        Ok(Self {
            client,
            api_key,
            model: config.engine.openai_model.clone(),
            timeout_secs: config.engine.timeout_secs,
        })
    }

    fn prompt(segment: &str, source: Lang, target: Lang) -> String {
        format!(
            "Translate the following text from {source} to {target}.\n\
             Maintain the original formatting, line breaks, and structure.\n\
             Only provide the translation, no explanations.\n\n\
             Text to translate:\n{segment}"
        )
    }
}

#[async_trait]
impl TranslationEngine for OpenAiTranslate {
    fn descriptor(&self) -> &EngineDescriptor {
        &OPENAI_TRANSLATE_DESCRIPTOR
    }

    async fn translate(&self, segment: &str, source: Lang, target: Lang) -> EngineResult<String> {
        guard(self.descriptor(), segment, source, target)?;

        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "You are a professional translator. Provide accurate translations \
                              while preserving formatting."
                        .into(),
                },
                ChatMessage {
                    role: "user",
                    content: Self::prompt(segment, source, target).into(),
                },
            ],
            max_tokens: 2000,
            temperature: 0.3,
        };

        let response = self
            .client
            .post(OPENAI_ENDPOINT)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("openai", self.timeout_secs, e))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(EngineError::Auth {
                engine: "openai",
                detail: format!("HTTP {status}"),
            });
        }
        if !status.is_success() {
            return Err(EngineError::Provider {
                engine: "openai",
                detail: format!("HTTP {status}"),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| transport_error("openai", self.timeout_secs, e))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| EngineError::Provider {
                engine: "openai",
                detail: "empty completion".to_string(),
            })?;

        debug!(model = %self.model, "openai translation completed");
        Ok(content.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_google_translate_response() {
        let body = r#"{"data":{"translations":[{"translatedText":"In the field of dharma"}]}}"#;
        let parsed: TranslateResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            parsed.data.translations[0].translated_text,
            "In the field of dharma"
        );
    }

    #[test]
    fn test_parse_openai_response() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"Hello"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("Hello"));
    }

    #[test]
    fn test_prompt_names_both_languages() {
        let prompt = OpenAiTranslate::prompt("नमः", Lang::Sa, Lang::En);
        assert!(prompt.contains("from sa to en"));
        assert!(prompt.contains("नमः"));
    }

    #[test]
    fn test_guard_rejects_oversized_segment() {
        let long = "x".repeat(5_001);
        let err = guard(&GOOGLE_TRANSLATE_DESCRIPTOR, &long, Lang::Sa, Lang::En).unwrap_err();
        assert_eq!(err.reason_code(), "payload_too_large");
    }
}
