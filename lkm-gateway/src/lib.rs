//! Processing side of the LinkedIn knowledge base: the Gemini provider,
//! content processing, the batch queue, and the HTTP API.

pub mod batch;
pub mod categorizer;
pub mod errors;
pub mod logging;
pub mod metrics;
pub mod monitoring;
pub mod pipeline;
pub mod processor;
pub mod providers;
pub mod retry;
pub mod server;
pub mod state;

pub use batch::{BatchProcessor, ProcessingTask, TaskExecutor, TaskPriority, TaskStatus};
pub use errors::{ProcessingError, ProcessingResult};
pub use metrics::{MetricsCollector, MetricsSnapshot};
pub use monitoring::{AlertManager, HealthMonitor, SystemHealth};
pub use pipeline::{KnowledgePipeline, PipelineOutcome, PipelineStats, PostFetcher};
pub use processor::ContentProcessor;
pub use providers::{GeminiClient, Provider, ProviderError};
pub use retry::{ErrorHandler, ErrorKind};
pub use state::AppState;
