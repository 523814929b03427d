pub mod claude;
pub mod error;
pub mod openai;
pub mod traits;
pub mod util;

pub use claude::Claude;
pub use error::AiError;
pub use openai::OpenAi;
pub use traits::{GenerationRequest, Message, MessageRole, TextGenerator};
pub use util::{preview, truncate_to_char_boundary};
