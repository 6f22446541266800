pub mod fallback;
pub mod prompts;
pub mod types;
pub mod utils;
pub mod validation;

#[cfg(feature = "gemini")]
pub mod gemini;
#[cfg(feature = "openai")]
pub mod openai;

pub use fallback::*;
pub use types::*;
pub use validation::parse_response;

#[cfg(feature = "gemini")]
pub use gemini::GeminiProvider;
#[cfg(feature = "openai")]
pub use openai::OpenAiProvider;
