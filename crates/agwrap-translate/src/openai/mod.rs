pub mod request;
pub mod response;
pub mod stream;

pub use request::to_upstream;
pub use response::to_openai_non_stream;
pub use stream::OpenAiStreamState;
