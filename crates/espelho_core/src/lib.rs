pub mod catalog;
pub mod domain;
pub mod engine;
pub mod ports;

pub use catalog::SombraCatalog;
pub use domain::{
    Eligibility, Phase, ProgressAdvance, SombraProgress, SombraResponse, GENERAL_TEACHINGS,
};
pub use engine::SombraEngine;
pub use ports::{CommentaryService, PortError, PortResult, SombraStore};
