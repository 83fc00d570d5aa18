pub mod error;
pub mod query;
pub mod routes;

use crate::levels::LevelEngine;

pub use error::ApiError;
pub use routes::create_router;

#[derive(Clone)]
pub struct AppState {
    pub engine: LevelEngine,
}

impl AppState {
    pub fn new(engine: LevelEngine) -> Self {
        Self { engine }
    }
}
