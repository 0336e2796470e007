// Engine adapter layer: one interface over interchangeable OCR and
// translation providers.
//
// Providers form a closed set of tagged variants, each carrying an immutable
// capability descriptor. Adapters are resolved once per page job through the
// factory, never re-resolved per call, and every provider failure surfaces
// as an `EngineError` with a reason code.

pub mod lang;
pub mod ocr;
pub mod translation;

pub use lang::Lang;
pub use ocr::OcrEngine;
pub use translation::TranslationEngine;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::config::Config;
use crate::core::errors::{EngineError, EngineResult};

/// Capability descriptor for one provider. Constructed once at startup,
/// immutable afterwards.
#[derive(Debug, Clone, Copy)]
pub struct EngineDescriptor {
    pub name: &'static str,
    /// Canonical languages the provider accepts.
    pub supported: &'static [Lang],
    /// Whether the provider accepts a secondary language alongside the
    /// primary one (each provider has its own combination syntax).
    pub bilingual: bool,
    /// Maximum payload per call: bytes for image providers, characters for
    /// text providers.
    pub max_payload: usize,
}

impl EngineDescriptor {
    pub fn ensure_supported(&self, lang: Lang) -> EngineResult<()> {
        if self.supported.contains(&lang) {
            Ok(())
        } else {
            Err(EngineError::UnsupportedLanguage {
                engine: self.name,
                lang: lang.code().to_string(),
            })
        }
    }

    pub fn ensure_bilingual(&self, secondary: Option<Lang>) -> EngineResult<()> {
        match secondary {
            Some(lang) if !self.bilingual => Err(EngineError::Provider {
                engine: self.name,
                detail: format!(
                    "secondary language '{lang}' requested but the engine is not bilingual"
                ),
            }),
            Some(lang) => self.ensure_supported(lang),
            None => Ok(()),
        }
    }

    pub fn ensure_payload(&self, size: usize) -> EngineResult<()> {
        if size <= self.max_payload {
            Ok(())
        } else {
            Err(EngineError::PayloadTooLarge {
                engine: self.name,
                size,
                limit: self.max_payload,
            })
        }
    }
}

const LOCAL_OCR_LANGS: [Lang; 4] = [Lang::Sa, Lang::En, Lang::Hi, Lang::Mr];

pub static GOOGLE_OCR_DESCRIPTOR: EngineDescriptor = EngineDescriptor {
    name: "google",
    supported: &Lang::ALL,
    bilingual: true,
    max_payload: 20_000_000,
};

pub static TESSERACT_DESCRIPTOR: EngineDescriptor = EngineDescriptor {
    name: "tesseract",
    supported: &Lang::ALL,
    bilingual: true,
    max_payload: 32_000_000,
};

pub static LOCAL_OCR_DESCRIPTOR: EngineDescriptor = EngineDescriptor {
    name: "local",
    supported: &LOCAL_OCR_LANGS,
    bilingual: false,
    max_payload: 16_000_000,
};

pub static GOOGLE_TRANSLATE_DESCRIPTOR: EngineDescriptor = EngineDescriptor {
    name: "google",
    supported: &Lang::ALL,
    bilingual: true,
    max_payload: 5_000,
};

pub static OPENAI_TRANSLATE_DESCRIPTOR: EngineDescriptor = EngineDescriptor {
    name: "openai",
    supported: &Lang::ALL,
    bilingual: true,
    max_payload: 8_000,
};

/// Recognition providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrEngineKind {
    Google,
    Tesseract,
    Local,
}

impl OcrEngineKind {
    pub fn as_str(&self) -> &'static str {
        self.descriptor().name
    }

    pub fn descriptor(&self) -> &'static EngineDescriptor {
        match self {
            OcrEngineKind::Google => &GOOGLE_OCR_DESCRIPTOR,
            OcrEngineKind::Tesseract => &TESSERACT_DESCRIPTOR,
            OcrEngineKind::Local => &LOCAL_OCR_DESCRIPTOR,
        }
    }
}

impl std::str::FromStr for OcrEngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google" => Ok(OcrEngineKind::Google),
            "tesseract" => Ok(OcrEngineKind::Tesseract),
            "local" => Ok(OcrEngineKind::Local),
            other => Err(format!("unknown OCR engine '{other}'")),
        }
    }
}

/// Translation providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranslationEngineKind {
    Google,
    OpenAi,
}

impl TranslationEngineKind {
    pub fn as_str(&self) -> &'static str {
        self.descriptor().name
    }

    pub fn descriptor(&self) -> &'static EngineDescriptor {
        match self {
            TranslationEngineKind::Google => &GOOGLE_TRANSLATE_DESCRIPTOR,
            TranslationEngineKind::OpenAi => &OPENAI_TRANSLATE_DESCRIPTOR,
        }
    }
}

impl std::str::FromStr for TranslationEngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google" => Ok(TranslationEngineKind::Google),
            "openai" => Ok(TranslationEngineKind::OpenAi),
            other => Err(format!("unknown translation engine '{other}'")),
        }
    }
}

/// Resolves engine kinds into live adapters. Page jobs resolve their adapter
/// once at job start through this seam; tests plug in stub engines.
pub trait EngineFactory: Send + Sync {
    fn ocr(&self, kind: OcrEngineKind) -> EngineResult<Arc<dyn OcrEngine>>;
    fn translation(&self, kind: TranslationEngineKind)
        -> EngineResult<Arc<dyn TranslationEngine>>;
}

/// Production factory backed by the configured provider credentials.
pub struct ProviderFactory {
    config: Arc<Config>,
}

impl ProviderFactory {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}

impl EngineFactory for ProviderFactory {
    fn ocr(&self, kind: OcrEngineKind) -> EngineResult<Arc<dyn OcrEngine>> {
        match kind {
            OcrEngineKind::Google => Ok(Arc::new(ocr::GoogleVisionOcr::new(&self.config)?)),
            OcrEngineKind::Tesseract => Ok(Arc::new(ocr::TesseractOcr::new(&self.config))),
            OcrEngineKind::Local => Ok(Arc::new(ocr::LocalOcr::new(&self.config))),
        }
    }

    fn translation(
        &self,
        kind: TranslationEngineKind,
    ) -> EngineResult<Arc<dyn TranslationEngine>> {
        match kind {
            TranslationEngineKind::Google => {
                Ok(Arc::new(translation::GoogleTranslate::new(&self.config)?))
            }
            TranslationEngineKind::OpenAi => {
                Ok(Arc::new(translation::OpenAiTranslate::new(&self.config)?))
            }
        }
    }
}

/// Map a reqwest failure onto the engine error taxonomy.
pub(crate) fn transport_error(
    engine: &'static str,
    timeout_secs: u64,
    err: reqwest::Error,
) -> EngineError {
    if err.is_timeout() {
        EngineError::Timeout {
            engine,
            seconds: timeout_secs,
        }
    } else {
        EngineError::Transport {
            engine,
            source: err,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_rejects_unsupported_language() {
        let err = LOCAL_OCR_DESCRIPTOR.ensure_supported(Lang::Ta).unwrap_err();
        assert_eq!(err.reason_code(), "unsupported_language");
        assert!(LOCAL_OCR_DESCRIPTOR.ensure_supported(Lang::Sa).is_ok());
    }

    #[test]
    fn test_descriptor_rejects_oversized_payload() {
        let err = GOOGLE_TRANSLATE_DESCRIPTOR.ensure_payload(5_001).unwrap_err();
        assert_eq!(err.reason_code(), "payload_too_large");
        assert!(GOOGLE_TRANSLATE_DESCRIPTOR.ensure_payload(5_000).is_ok());
    }

    #[test]
    fn test_non_bilingual_engine_rejects_secondary() {
        assert!(LOCAL_OCR_DESCRIPTOR
            .ensure_bilingual(Some(Lang::En))
            .is_err());
        assert!(LOCAL_OCR_DESCRIPTOR.ensure_bilingual(None).is_ok());
        assert!(TESSERACT_DESCRIPTOR.ensure_bilingual(Some(Lang::En)).is_ok());
    }

    #[test]
    fn test_engine_kind_parsing() {
        assert_eq!("google".parse::<OcrEngineKind>().unwrap(), OcrEngineKind::Google);
        assert_eq!("local".parse::<OcrEngineKind>().unwrap(), OcrEngineKind::Local);
        assert!("surya".parse::<OcrEngineKind>().is_err());
        assert_eq!(
            "openai".parse::<TranslationEngineKind>().unwrap(),
            TranslationEngineKind::OpenAi
        );
    }
}
