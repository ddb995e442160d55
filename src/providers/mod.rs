pub mod gemini;
pub mod llm;
pub mod ollama;
pub mod scripted;

pub use gemini::GeminiProvider;
pub use llm::{drain, AnthropicProvider, InvocationClient, Message, OpenAIProvider, TextChunks};
pub use ollama::OllamaProvider;
pub use scripted::ScriptedClient;
