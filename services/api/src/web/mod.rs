pub mod rest;
pub mod state;

// Re-export the handlers to make them easily accessible
// to the binary that will build the web server router.
pub use rest::{
    eligibility_handler, history_handler, initialize_progress_handler, next_question_handler,
    record_response_handler,
};
