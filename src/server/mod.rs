mod app;
mod middleware;
mod state;

pub use app::create_app;
pub use middleware::admission_middleware;
pub use state::AppState;
