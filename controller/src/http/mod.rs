//! HTTP control surface for the controller.
//!
//! Defines routes, response mapping and the middleware stack.

pub mod api;
pub mod server;
