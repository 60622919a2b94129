pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

pub use routes::build;
pub use state::AppState;
