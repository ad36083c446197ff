mod api;
mod hub;
mod state;
mod ws;

pub use api::router;
pub use hub::{FanoutHub, HubConfig, Topic};
pub use state::AppState;
