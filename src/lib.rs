//! Chat with the page you are looking at.
//!
//! The extension side reads the page, lets the user pick an element and
//! sends both to the relay; the relay builds the prompt and calls the
//! completion API.

pub mod browser;
pub mod config;
pub mod context;
pub mod error;
pub mod extract;
pub mod messaging;
pub mod page;
pub mod picker;
pub mod relay;
pub mod session;
pub mod store;
pub mod types;
