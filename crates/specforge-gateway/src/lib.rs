//! Specforge Gateway - newline-delimited JSON over TCP.
//!
//! Clients send `{id, method, params}` lines and get exactly one
//! `{id, result}` or `{id, error}` line back per request. Jobs submitted
//! or watched on a connection stream `{event}` lines to it as they move.
//!
//! # Example
//!
//! ```ignore
//! use specforge_gateway::{Gateway, Handlers, Previewer};
//!
//! let handlers = Handlers::new(queue, Previewer::new(executor, catalog, cache, source));
//! let gateway = Gateway::bind(&config.gateway, handlers).await?;
//! gateway.serve(shutdown).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod error;
pub mod methods;
pub mod preview;
pub mod protocol;
pub mod server;
pub mod session;

pub use error::{ErrorBody, GatewayError, Result};
pub use methods::{Handlers, Method, Router, ANONYMOUS_USER};
pub use preview::{CreatedDevice, Preview, Previewer};
pub use protocol::{EventFrame, Request, Response};
pub use server::{Dispatcher, Gateway};
pub use session::Session;
