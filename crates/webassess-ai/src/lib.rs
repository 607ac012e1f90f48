pub mod analyzer;
pub mod inference;
pub mod models;
pub mod ndjson;
pub mod ollama_client;
pub mod prompts;
pub mod runtime;

pub use analyzer::{bisect, FnPromptStrategy, PromptStrategy, RecursiveAnalyzer, RESULT_SEPARATOR};
pub use inference::{InferenceClient, PullStream};
pub use models::{plan_resolution, LogPullObserver, ModelResolver, PullObserver, ResolutionStep};
pub use ndjson::{decode_ndjson, NdjsonError};
pub use ollama_client::{parse_model_listing, OllamaClient, OllamaClientConfig};
pub use prompts::HtmlAnalysisPrompts;
pub use runtime::{
    find_executable, Backoff, Clock, OllamaLauncher, RuntimeHandle, RuntimeLauncher,
    RuntimeOrigin, RuntimeProcess, RuntimeState, RuntimeSupervisor, TokioClock,
};
