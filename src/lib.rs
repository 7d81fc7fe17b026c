pub(crate) mod api;
pub mod compress;
pub mod config;
pub mod convert;
pub mod error;
pub mod interceptor;
pub mod observability;
pub mod protocol;
pub mod routing;
pub mod state;
pub mod stream;
pub mod transport;

mod util;
