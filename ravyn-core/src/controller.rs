//! Class-style controllers.
//!
//! A controller groups handlers that share a base path, state and a level of
//! options. It is flattened into one gateway per handler when registered; the
//! controller's options become each gateway's options, between the mount and
//! the handler levels.
//!
//! ```
//! use ravyn_core::{Controller, ControllerHandler, Kwargs, LevelOptions, WithOptions, get};
//! use std::sync::Arc;
//!
//! struct Users {
//!     greeting: String,
//! }
//!
//! impl Controller for Users {
//!     fn path(&self) -> &str {
//!         "/users"
//!     }
//!
//!     fn options(&self) -> LevelOptions {
//!         LevelOptions::new().tag("users")
//!     }
//!
//!     fn handlers(self: Arc<Self>) -> Vec<ControllerHandler> {
//!         let this = self.clone();
//!         vec![get("/", move |_kw: Kwargs| {
//!             let greeting = this.greeting.clone();
//!             async move { Ok(greeting) }
//!         })
//!         .into()]
//!     }
//! }
//!
//! let routes = Users { greeting: "hi".into() }.into_routes();
//! assert_eq!(routes.len(), 1);
//! ```

use crate::handler::{HttpHandler, WebSocketHandler};
use crate::logging::trace;
use crate::options::LevelOptions;
use crate::routing::{Gateway, Route, WebSocketGateway};
use std::sync::Arc;

/// A handler declared by a controller.
#[derive(Clone, Debug)]
pub enum ControllerHandler {
    Http(HttpHandler),
    WebSocket(WebSocketHandler),
}

impl From<HttpHandler> for ControllerHandler {
    fn from(handler: HttpHandler) -> Self {
        ControllerHandler::Http(handler)
    }
}

impl From<WebSocketHandler> for ControllerHandler {
    fn from(handler: WebSocketHandler) -> Self {
        ControllerHandler::WebSocket(handler)
    }
}

/// Trait for controllers.
pub trait Controller: Send + Sync + 'static {
    /// Base path of every handler.
    fn path(&self) -> &str;

    /// Options shared by every handler.
    fn options(&self) -> LevelOptions {
        LevelOptions::new()
    }

    /// The handlers, bound to this instance.
    fn handlers(self: Arc<Self>) -> Vec<ControllerHandler>;

    /// Flatten into gateways.
    fn into_routes(self) -> Vec<Route>
    where
        Self: Sized,
    {
        flatten(Arc::new(self))
    }
}

/// Flatten a shared controller into gateways.
pub fn flatten<C: Controller>(controller: Arc<C>) -> Vec<Route> {
    let path = controller.path().to_string();
    let options = controller.options();
    let handlers = controller.handlers();
    trace!(path = %path, handlers = handlers.len(), "Flattening controller");

    handlers
        .into_iter()
        .map(|handler| match handler {
            ControllerHandler::Http(handler) => {
                let mut gateway = Gateway::with_path(path.clone(), handler);
                gateway.options = options.clone();
                Route::Gateway(gateway)
            }
            ControllerHandler::WebSocket(handler) => {
                let mut gateway = WebSocketGateway::with_path(path.clone(), handler);
                gateway.options = options.clone();
                Route::WebSocketGateway(gateway)
            }
        })
        .collect()
}
