pub mod api;
mod consumption;
pub mod model;
pub mod session;

pub use api::error::Error;
pub use api::Smartmeter;
