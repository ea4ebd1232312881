pub mod auth;
pub mod control;
pub mod error;
pub mod handler;
pub mod listener;
pub mod manager;

pub use control::ControlApi;
pub use error::Error;
pub use handler::ConnectionHandler;
pub use listener::ServerListener;
pub use manager::ServerManager;

pub type Result<T> = std::result::Result<T, Error>;
