//! tokenauth process logic: configuration and the async controller that sits
//! between a transport and the database services.

pub mod config;
pub mod controller;

pub use controller::AuthController;
