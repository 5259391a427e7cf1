//! 上游 Provider 模块

pub mod openai_gateway;
pub mod traits;

pub use openai_gateway::OpenAiGatewayProvider;
pub use traits::{ChatProvider, ProviderError, StreamResponse};
