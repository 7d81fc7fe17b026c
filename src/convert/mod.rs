//! Field translation between the Anthropic Messages API and `OpenAI` chat
//! completions, outside the streaming path.
pub mod request;
pub mod response;
pub mod schema;

pub use request::{translate_request, TranslateOptions};
pub use response::translate_response;
