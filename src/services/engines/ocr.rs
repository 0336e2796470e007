// OCR provider adapters
//
// Three providers sit behind one trait: the Google Cloud Vision REST API,
// a Tesseract subprocess, and an in-process ONNX line-recognition model.
// The adapter layer owns the shared guards (language vocabulary, payload
// ceiling, downscale-to-max-dimension) so no provider is ever handed an
// input it cannot take.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use ndarray::Array4;
use once_cell::sync::OnceCell;
use ort::{session::Session, value::Value};
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::core::config::Config;
use crate::core::errors::{EngineError, EngineResult};
use crate::services::engines::{
    transport_error, EngineDescriptor, Lang, GOOGLE_OCR_DESCRIPTOR, LOCAL_OCR_DESCRIPTOR,
    TESSERACT_DESCRIPTOR,
};
use crate::utils::image_ops;

/// Text recognition capability.
///
/// Adapters execute inside long-lived pooled workers shared across many
/// jobs; `release()` lets an adapter drop heavyweight state (loaded models)
/// after each invocation.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    fn descriptor(&self) -> &EngineDescriptor;

    /// Recognize text in the given image. `secondary` is only accepted by
    /// bilingual providers, each using its own combination syntax.
    async fn recognize(
        &self,
        image: &[u8],
        lang: Lang,
        secondary: Option<Lang>,
    ) -> EngineResult<String>;

    /// Release any heavyweight state held between invocations.
    async fn release(&self) {}
}

/// Normalize recognized text: unify danda punctuation and straighten curly
/// quotes, the way downstream proofing expects it.
pub fn post_process(text: &str) -> String {
    text.replace("||", "॥")
        .replace('|', "।")
        .replace("।।", "॥")
        .replace('\u{2018}', "'")
        .replace('\u{2019}', "'")
        .replace('\u{201C}', "\"")
        .replace('\u{201D}', "\"")
}

/// Decode, bound, and re-encode an image payload for a provider call.
async fn prepare_payload(
    image: &[u8],
    max_dim: u32,
    descriptor: &EngineDescriptor,
) -> EngineResult<Vec<u8>> {
    let img = image_ops::load_image_from_memory_async(image).await?;
    let (img, downscaled) = image_ops::downscale_to_fit(img, max_dim);
    if downscaled {
        debug!(
            engine = descriptor.name,
            max_dim, "downscaled oversized page image before inference"
        );
    }
    let png = image_ops::encode_png_async(img).await?;
    descriptor.ensure_payload(png.len())?;
    Ok(png)
}

// ---------------------------------------------------------------------------
// Google Cloud Vision

const VISION_ENDPOINT: &str = "https://vision.googleapis.com/v1/images:annotate";

/// Google Cloud Vision document text detection.
#[derive(Debug)]
pub struct GoogleVisionOcr {
    client: reqwest::Client,
    api_key: String,
    timeout_secs: u64,
    max_dim: u32,
}

#[derive(Serialize)]
struct AnnotateRequest<'a> {
    requests: Vec<AnnotateItem<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateItem<'a> {
    image: VisionImage,
    features: Vec<VisionFeature>,
    image_context: VisionContext<'a>,
}

#[derive(Serialize)]
struct VisionImage {
    content: String,
}

#[derive(Serialize)]
struct VisionFeature {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VisionContext<'a> {
    language_hints: Vec<&'a str>,
}

#[derive(Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<AnnotateResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateResult {
    full_text_annotation: Option<FullTextAnnotation>,
    error: Option<VisionStatus>,
}

#[derive(Deserialize)]
struct FullTextAnnotation {
    text: String,
}

#[derive(Deserialize)]
struct VisionStatus {
    message: String,
}

impl GoogleVisionOcr {
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
            max_dim: config.engine.max_image_dim,
        })
    }
}

#[async_trait]
impl OcrEngine for GoogleVisionOcr {
    fn descriptor(&self) -> &EngineDescriptor {
        &GOOGLE_OCR_DESCRIPTOR
    }

    async fn recognize(
        &self,
        image: &[u8],
        lang: Lang,
        secondary: Option<Lang>,
    ) -> EngineResult<String> {
        let descriptor = self.descriptor();
        descriptor.ensure_supported(lang)?;
        descriptor.ensure_bilingual(secondary)?;

        let png = prepare_payload(image, self.max_dim, descriptor).await?;

        // Google's combination syntax is a list of hint codes.
        let mut language_hints = vec![lang.code()];
        if let Some(sec) = secondary {
            language_hints.push(sec.code());
        }

        let body = AnnotateRequest {
            requests: vec![AnnotateItem {
                image: VisionImage {
                    content: general_purpose::STANDARD.encode(&png),
                },
                features: vec![VisionFeature {
                    kind: "DOCUMENT_TEXT_DETECTION",
                }],
                image_context: VisionContext { language_hints },
            }],
        };

        let response = self
            .client
            .post(VISION_ENDPOINT)
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

        let parsed: AnnotateResponse = response
            .json()
            .await
            .map_err(|e| transport_error("google", self.timeout_secs, e))?;

        let result = parsed
            .responses
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::Provider {
                engine: "google",
                detail: "empty annotate response".to_string(),
            })?;

        if let Some(err) = result.error {
            return Err(EngineError::Provider {
                engine: "google",
                detail: err.message,
            });
        }

        let text = result
            .full_text_annotation
            .map(|f| f.text)
            .unwrap_or_default();
        Ok(post_process(&text))
    }
}

// ---------------------------------------------------------------------------
// Tesseract

/// Tesseract OCR via the system binary, fed over stdin.
pub struct TesseractOcr {
    bin: String,
    timeout_secs: u64,
    max_dim: u32,
}

/// Build the `-l` argument. Tesseract's combination syntax joins traineddata
/// names with `+`, e.g. `san+eng`.
fn tesseract_lang_arg(lang: Lang, secondary: Option<Lang>) -> String {
    match secondary {
        Some(sec) => format!("{}+{}", lang.tesseract_code(), sec.tesseract_code()),
        None => lang.tesseract_code().to_string(),
    }
}

impl TesseractOcr {
    pub fn new(config: &Config) -> Self {
        Self {
            bin: config.engine.tesseract_bin.clone(),
            timeout_secs: config.engine.timeout_secs,
            max_dim: config.engine.max_image_dim,
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    fn descriptor(&self) -> &EngineDescriptor {
        &TESSERACT_DESCRIPTOR
    }

    async fn recognize(
        &self,
        image: &[u8],
        lang: Lang,
        secondary: Option<Lang>,
    ) -> EngineResult<String> {
        let descriptor = self.descriptor();
        descriptor.ensure_supported(lang)?;
        descriptor.ensure_bilingual(secondary)?;

        let png = prepare_payload(image, self.max_dim, descriptor).await?;
        let lang_arg = tesseract_lang_arg(lang, secondary);

        let mut child = Command::new(&self.bin)
            .args(["stdin", "stdout", "-l", lang_arg.as_str()])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Provider {
                engine: "tesseract",
                detail: format!("failed to spawn '{}': {e}", self.bin),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&png)
                .await
                .map_err(|e| EngineError::Provider {
                    engine: "tesseract",
                    detail: format!("failed to write image to stdin: {e}"),
                })?;
        }

        let output = tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| EngineError::Timeout {
            engine: "tesseract",
            seconds: self.timeout_secs,
        })?
        .map_err(|e| EngineError::Provider {
            engine: "tesseract",
            detail: e.to_string(),
        })?;

        if !output.status.success() {
            return Err(EngineError::Provider {
                engine: "tesseract",
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        Ok(post_process(&text))
    }
}

// ---------------------------------------------------------------------------
// Local ONNX line recognition

/// Model input height; lines are scaled to this and width follows aspect.
const LINE_HEIGHT: u32 = 48;
const MIN_LINE_WIDTH: u32 = 16;

/// In-process line recognition over an ONNX model.
///
/// The session is loaded lazily and dropped on `release()`: the model holds
/// hundreds of MB, and workers in the pool call `release()` after every job
/// so resident memory stays bounded.
pub struct LocalOcr {
    model_path: PathBuf,
    vocab_path: PathBuf,
    max_dim: u32,
    intra_threads: usize,
    session: Mutex<Option<Session>>,
    vocab: OnceCell<Vec<String>>,
}

fn ort_error(e: ort::Error) -> EngineError {
    EngineError::Provider {
        engine: "local",
        detail: e.to_string(),
    }
}

/// Greedy CTC decode: argmax per timestep, collapse repeats, drop blanks.
/// Class 0 is the blank; class `i` maps to `vocab[i - 1]`.
fn ctc_decode(logits: &[f32], seq_len: usize, vocab_size: usize, vocab: &[String]) -> String {
    let mut out = String::new();
    let mut prev = 0usize;

    for t in 0..seq_len {
        let row = &logits[t * vocab_size..(t + 1) * vocab_size];
        let mut best = 0usize;
        let mut best_val = f32::NEG_INFINITY;
        for (i, &v) in row.iter().enumerate() {
            if v > best_val {
                best_val = v;
                best = i;
            }
        }

        if best != 0 && best != prev {
            if let Some(ch) = vocab.get(best - 1) {
                out.push_str(ch);
            }
        }
        prev = best;
    }

    out
}

impl LocalOcr {
    pub fn new(config: &Config) -> Self {
        Self {
            model_path: PathBuf::from(&config.engine.local_model_path),
            vocab_path: PathBuf::from(&config.engine.local_vocab_path),
            max_dim: config.engine.max_image_dim,
            intra_threads: num_cpus::get().min(4),
            session: Mutex::new(None),
            vocab: OnceCell::new(),
        }
    }

    /// Vocabulary: one entry per line, class index = line number + 1; the
    /// literal `<space>` marks the space character. Loaded once and kept;
    /// unlike the session it is small.
    fn load_vocab(&self) -> EngineResult<&[String]> {
        self.vocab
            .get_or_try_init(|| {
                let content =
                    std::fs::read_to_string(&self.vocab_path).map_err(|e| EngineError::Provider {
                        engine: "local",
                        detail: format!(
                            "failed to read vocabulary {}: {e}",
                            self.vocab_path.display()
                        ),
                    })?;
                Ok(content
                    .lines()
                    .map(|l| if l == "<space>" { " ".to_string() } else { l.to_string() })
                    .collect())
            })
            .map(|v| v.as_slice())
    }

    fn preprocess(img: &image::DynamicImage) -> (Array4<f32>, usize) {
        let gray = img.to_luma8();
        let (w, h) = gray.dimensions();

        let scale = LINE_HEIGHT as f32 / h as f32;
        let new_w = ((w as f32 * scale) as u32).max(MIN_LINE_WIDTH);
        let resized = image::imageops::resize(
            &gray,
            new_w,
            LINE_HEIGHT,
            image::imageops::FilterType::Lanczos3,
        );

        let mut tensor = Array4::<f32>::zeros((1, 1, LINE_HEIGHT as usize, new_w as usize));
        for y in 0..LINE_HEIGHT as usize {
            for x in 0..new_w as usize {
                tensor[[0, 0, y, x]] = resized.get_pixel(x as u32, y as u32)[0] as f32 / 255.0;
            }
        }

        (tensor, new_w as usize)
    }
}

#[async_trait]
impl OcrEngine for LocalOcr {
    fn descriptor(&self) -> &EngineDescriptor {
        &LOCAL_OCR_DESCRIPTOR
    }

    async fn recognize(
        &self,
        image: &[u8],
        lang: Lang,
        secondary: Option<Lang>,
    ) -> EngineResult<String> {
        let descriptor = self.descriptor();
        descriptor.ensure_supported(lang)?;
        descriptor.ensure_bilingual(secondary)?;
        descriptor.ensure_payload(image.len())?;

        let img = image_ops::load_image_from_memory_async(image).await?;
        let (img, _) = image_ops::downscale_to_fit(img, self.max_dim);
        let (tensor, width) = Self::preprocess(&img);
        let vocab = self.load_vocab()?;

        let shape = [1usize, 1, LINE_HEIGHT as usize, width];
        let (data, _offset) = tensor.into_raw_vec_and_offset();
        let value = Value::from_array((shape, data)).map_err(ort_error)?;

        let mut guard = self.session.lock();
        if guard.is_none() {
            info!(
                "loading local OCR model from {}",
                self.model_path.display()
            );
            let session = Session::builder()
                .and_then(|b| b.with_intra_threads(self.intra_threads))
                .and_then(|b| b.commit_from_file(&self.model_path))
                .map_err(ort_error)?;
            *guard = Some(session);
        }
        let Some(session) = guard.as_mut() else {
            return Err(EngineError::Provider {
                engine: "local",
                detail: "model session unavailable".to_string(),
            });
        };

        let (dims, logits) = {
            let outputs = session
                .run(ort::inputs!["image" => value])
                .map_err(ort_error)?;
            let first_key = outputs.keys().next().ok_or_else(|| EngineError::Provider {
                engine: "local",
                detail: "model produced no outputs".to_string(),
            })?;
            let (shape, data) = outputs[first_key]
                .try_extract_tensor::<f32>()
                .map_err(ort_error)?;
            let dims: Vec<usize> = shape.iter().map(|&x| x as usize).collect();
            (dims, data.to_vec())
        };

        let (seq_len, vocab_size) = match dims.as_slice() {
            [1, t, v] => (*t, *v),
            [t, v] => (*t, *v),
            other => {
                return Err(EngineError::Provider {
                    engine: "local",
                    detail: format!("unexpected logits shape {other:?}"),
                })
            }
        };

        let text = ctc_decode(&logits, seq_len, vocab_size, vocab);
        Ok(post_process(&text))
    }

    async fn release(&self) {
        if self.session.lock().take().is_some() {
            debug!("released local OCR model session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{BatchConfig, EngineConfig, ServerConfig, WorkerConfig};

    fn test_config() -> Config {
        Config {
            server: ServerConfig {
                port: 0,
                host: "127.0.0.1".to_string(),
                log_level: tracing::Level::INFO,
            },
            worker: WorkerConfig {
                count: 2,
                max_jobs: 50,
                max_rss_mb: 200,
                queue_lease_secs: 300,
            },
            engine: EngineConfig {
                google_api_key: None,
                openai_api_key: None,
                openai_model: "gpt-4o-mini".to_string(),
                tesseract_bin: "tesseract".to_string(),
                local_model_path: "does-not-exist.onnx".to_string(),
                local_vocab_path: "does-not-exist.txt".to_string(),
                timeout_secs: 5,
                max_image_dim: 2048,
            },
            batch: BatchConfig {
                segment_max_len: 1000,
                registry_ttl_secs: 86_400,
                bot_author: "scriptorium-bot".to_string(),
            },
        }
    }

    #[test]
    fn test_post_process_normalizes_danda_and_quotes() {
        assert_eq!(post_process("नमः||"), "नमः॥");
        assert_eq!(post_process("नमः|"), "नमः।");
        assert_eq!(post_process("\u{2018}a\u{2019} \u{201C}b\u{201D}"), "'a' \"b\"");
    }

    #[test]
    fn test_tesseract_combination_syntax() {
        assert_eq!(tesseract_lang_arg(Lang::Sa, None), "san");
        assert_eq!(tesseract_lang_arg(Lang::Sa, Some(Lang::En)), "san+eng");
        assert_eq!(tesseract_lang_arg(Lang::Ta, Some(Lang::Hi)), "tam+hin");
    }

    #[test]
    fn test_ctc_decode_collapses_repeats_and_blanks() {
        let vocab: Vec<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        // Timesteps (vocab_size = 3, class 0 blank): a a blank a b
        let logits = [
            0.1, 0.8, 0.1, // a
            0.1, 0.9, 0.0, // a (repeat, collapsed)
            0.9, 0.05, 0.05, // blank
            0.1, 0.8, 0.1, // a (new emission after blank)
            0.0, 0.1, 0.9, // b
        ];
        assert_eq!(ctc_decode(&logits, 5, 3, &vocab), "aab");
    }

    #[tokio::test]
    async fn test_local_engine_rejects_unsupported_language_before_loading() {
        // Tamil is outside the local model's script coverage; the guard must
        // fire before any file access (the configured paths do not exist).
        let engine = LocalOcr::new(&test_config());
        let err = engine.recognize(b"", Lang::Ta, None).await.unwrap_err();
        assert_eq!(err.reason_code(), "unsupported_language");
    }

    #[tokio::test]
    async fn test_missing_google_key_is_an_auth_error() {
        let err = GoogleVisionOcr::new(&test_config()).unwrap_err();
        assert_eq!(err.reason_code(), "auth");
    }
}
