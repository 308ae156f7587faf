mod dispatcher;
mod display;
pub mod errors;
pub mod events;
pub mod model;
mod registry;
pub mod service;

pub use errors::AlarmError;
pub use events::{AlarmEvent, EventSink};
pub use service::AlarmService;
