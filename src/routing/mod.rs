//! Request routing for the HTTP surface.
pub mod dispatch;
