mod providers;
mod retry;

pub use providers::{
    build_provider, AnthropicProvider, Generation, Message, OpenAIProvider, Provider, Role,
};
pub use retry::{with_retry, RetryConfig, RetryDecision, Retryable};
