// Per-region translation: context LLM first, machine translation as fallback

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::context_llm::{ContextProvider, OllamaContextClient};
use super::http::RetryPolicy;
use super::machine::{HttpMachineTranslator, MachineTranslator};
use super::response_parser::parse_context_response;
use crate::core::config::TranslationConfig;
use crate::core::errors::{ConfigError, ModelLoadError, TranslationError};
use crate::core::types::{LanguagePair, TranslationResult, TranslationSource};

/// How a region's translation was obtained
#[derive(Debug)]
pub enum TranslationOutcome {
    /// The best configured path succeeded
    Completed(TranslationResult),
    /// The context path failed and the machine translator stepped in
    Degraded {
        result: TranslationResult,
        reason: String,
    },
    /// The machine translator failed too; the region has no translation
    Failed(TranslationError),
}

impl TranslationOutcome {
    pub fn result(&self) -> Option<&TranslationResult> {
        match self {
            TranslationOutcome::Completed(result) | TranslationOutcome::Degraded { result, .. } => {
                Some(result)
            }
            TranslationOutcome::Failed(_) => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TranslationOutcome::Failed(_))
    }
}

/// Owns the translation collaborators. Holds no per-request state.
#[derive(Clone)]
pub struct TranslationOrchestrator {
    context: Option<Arc<dyn ContextProvider>>,
    machine: Arc<dyn MachineTranslator>,
}

impl TranslationOrchestrator {
    pub fn new(machine: Arc<dyn MachineTranslator>, context: Option<Arc<dyn ContextProvider>>) -> Self {
        Self { context, machine }
    }

    /// Build the HTTP collaborators. The context path is enabled only when a
    /// model is configured.
    pub fn from_config(config: &TranslationConfig) -> Result<Self, ModelLoadError> {
        let timeout = Duration::from_secs(config.timeout_seconds);
        let retry = RetryPolicy::new(config.max_retries);

        let machine = HttpMachineTranslator::new(
            &config.mt_endpoint,
            config.mt_api_key.clone(),
            timeout,
            retry,
        )?;

        let context = match config.ollama_model.as_deref() {
            Some(model) => {
                let client = OllamaContextClient::new(&config.ollama_url, model, timeout, retry)?;
                Some(Arc::new(client) as Arc<dyn ContextProvider>)
            }
            None => {
                debug!("OLLAMA_MODEL not set, context translation disabled");
                None
            }
        };

        Ok(Self::new(Arc::new(machine), context))
    }

    pub fn has_context_provider(&self) -> bool {
        self.context.is_some()
    }

    /// Translate one region's text for a pair code such as `"ja-en"`.
    ///
    /// An unsupported code is rejected before any collaborator is called.
    /// Collaborator failures never surface as `Err`; they are reported through
    /// the outcome.
    pub fn translate_region(&self, text: &str, language_pair: &str) -> Result<TranslationOutcome, ConfigError> {
        let pair: LanguagePair = language_pair.parse()?;
        Ok(self.translate(text, pair))
    }

    pub fn translate(&self, text: &str, pair: LanguagePair) -> TranslationOutcome {
        let degraded_reason = match &self.context {
            Some(context) => match self.translate_with_context(context.as_ref(), text, pair) {
                Ok(result) => return TranslationOutcome::Completed(result),
                Err(reason) => {
                    warn!("Context translation failed, falling back to MT: {}", reason);
                    Some(reason)
                }
            },
            None => None,
        };

        match self.machine.translate(text, pair) {
            Ok(translated_text) => {
                let result = TranslationResult {
                    translated_text,
                    context: None,
                    source: TranslationSource::FallbackMt,
                };
                match degraded_reason {
                    Some(reason) => TranslationOutcome::Degraded { result, reason },
                    None => TranslationOutcome::Completed(result),
                }
            }
            Err(e) => {
                warn!("Machine translation failed ({}): {}", pair, e);
                TranslationOutcome::Failed(e)
            }
        }
    }

    fn translate_with_context(
        &self,
        context: &dyn ContextProvider,
        text: &str,
        pair: LanguagePair,
    ) -> Result<TranslationResult, String> {
        let raw = context
            .request_context(text, pair.source_language())
            .map_err(|e| format!("context request failed: {}", e))?;

        let parsed = parse_context_response(&raw).map_err(|e| {
            warn!("Unparsable context response: {:?}", raw);
            format!("context response unusable: {}", e)
        })?;

        Ok(TranslationResult {
            translated_text: parsed.translation,
            context: Some(parsed.context).filter(|c| !c.is_empty()),
            source: TranslationSource::Llm,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::CONTEXT_NOT_AVAILABLE;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeContext {
        reply: Result<String, u16>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl FakeContext {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn failing(status: u16) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(status),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    impl ContextProvider for FakeContext {
        fn request_context(&self, text: &str, source_language: &str) -> Result<String, TranslationError> {
            self.calls
                .lock()
                .push((text.to_string(), source_language.to_string()));
            match &self.reply {
                Ok(reply) => Ok(reply.clone()),
                Err(status) => Err(TranslationError::Api {
                    status: *status,
                    body: "model not found".into(),
                }),
            }
        }
    }

    #[derive(Default)]
    struct FakeMachine {
        fail: bool,
        calls: AtomicUsize,
    }

    impl MachineTranslator for FakeMachine {
        fn translate(&self, text: &str, pair: LanguagePair) -> Result<String, TranslationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TranslationError::InvalidResponse("MT down".into()));
            }
            Ok(format!("[{}] {}", pair.source_code(), text))
        }
    }

    #[test]
    fn test_context_path_success() {
        let context = FakeContext::replying("- \"Translation\": Let's go!\n- \"Context\": Rallying cry.");
        let machine = Arc::new(FakeMachine::default());
        let orchestrator = TranslationOrchestrator::new(machine.clone(), Some(context.clone()));

        let outcome = orchestrator.translate_region("行こう", "ja-en").unwrap();
        match outcome {
            TranslationOutcome::Completed(result) => {
                assert_eq!(result.translated_text, "Let's go!");
                assert_eq!(result.context.as_deref(), Some("Rallying cry."));
                assert_eq!(result.source, TranslationSource::Llm);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(machine.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            context.calls.lock()[0],
            ("行こう".to_string(), "Japanese".to_string())
        );
    }

    #[test]
    fn test_context_error_degrades_to_mt() {
        let machine = Arc::new(FakeMachine::default());
        let orchestrator = TranslationOrchestrator::new(machine.clone(), Some(FakeContext::failing(404)));

        let outcome = orchestrator.translate_region("你好", "zh-en").unwrap();
        match outcome {
            TranslationOutcome::Degraded { result, reason } => {
                assert_eq!(result.translated_text, "[zh] 你好");
                assert_eq!(result.source, TranslationSource::FallbackMt);
                assert_eq!(result.context_or_default(), CONTEXT_NOT_AVAILABLE);
                assert!(reason.contains("404"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(machine.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unparsable_context_degrades_to_mt() {
        let machine = Arc::new(FakeMachine::default());
        let orchestrator =
            TranslationOrchestrator::new(machine.clone(), Some(FakeContext::replying("I cannot help with that.")));

        let outcome = orchestrator.translate_region("안녕", "ko-en").unwrap();
        assert!(matches!(outcome, TranslationOutcome::Degraded { .. }));
        assert_eq!(outcome.result().unwrap().source, TranslationSource::FallbackMt);
    }

    #[test]
    fn test_no_context_provider_uses_mt_directly() {
        let machine = Arc::new(FakeMachine::default());
        let orchestrator = TranslationOrchestrator::new(machine.clone(), None);
        assert!(!orchestrator.has_context_provider());

        let outcome = orchestrator.translate_region("你好", "zh-en").unwrap();
        match outcome {
            TranslationOutcome::Completed(result) => {
                assert_eq!(result.source, TranslationSource::FallbackMt);
                assert!(result.context.is_none());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_both_paths_failing_is_failed_outcome() {
        let machine = Arc::new(FakeMachine {
            fail: true,
            ..Default::default()
        });
        let orchestrator = TranslationOrchestrator::new(machine, Some(FakeContext::failing(500)));

        let outcome = orchestrator.translate_region("你好", "zh-en").unwrap();
        assert!(outcome.is_failed());
        assert!(outcome.result().is_none());
    }

    #[test]
    fn test_unsupported_pair_fails_before_any_call() {
        let context = FakeContext::replying("Translation: x Context: y");
        let machine = Arc::new(FakeMachine::default());
        let orchestrator = TranslationOrchestrator::new(machine.clone(), Some(context.clone()));

        for code in ["fi-en", "", "en-zh"] {
            let err = orchestrator.translate_region("text", code).unwrap_err();
            assert_eq!(err, ConfigError::UnsupportedLanguagePair(code.to_string()));
        }
        assert!(context.calls.lock().is_empty());
        assert_eq!(machine.calls.load(Ordering::SeqCst), 0);
    }
}
