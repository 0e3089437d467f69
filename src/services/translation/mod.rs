pub mod context_llm;
pub mod http;
pub mod machine;
pub mod orchestrator;
pub mod response_parser;

pub use context_llm::{ContextProvider, OllamaContextClient};
pub use http::RetryPolicy;
pub use machine::{HttpMachineTranslator, MachineTranslator};
pub use orchestrator::{TranslationOrchestrator, TranslationOutcome};
pub use response_parser::{parse_context_response, ContextTranslation};
