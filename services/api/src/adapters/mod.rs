pub mod commentary_llm;
pub mod db;

pub use commentary_llm::OpenAiCommentaryAdapter;
pub use db::PgSombraStore;
