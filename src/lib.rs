// Ravyn - an ASGI-style HTTP and WebSocket framework for Rust
//
// Hierarchical routing, signature-directed parameter extraction, dependency
// injection and a layered request pipeline. The framework itself lives in
// `ravyn-core`; settings loading lives in `ravyn-config`.

// Re-export core functionality
pub use ravyn_core::*;

// Re-export optional crates
#[cfg(feature = "config")]
pub use ravyn_config;

#[cfg(feature = "config")]
pub use ravyn_config::SettingsLoader;

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        App,
        ChildApp,
        Controller,
        ControllerHandler,
        Error,
        ExceptionHandler,
        Gateway,
        Include,
        Kwargs,
        Middleware,
        Next,
        Param,
        Permission,
        Provider,
        Reply,
        Request,
        Response,
        Router,
        Settings,
        Signature,
        TypeHint,
        WebSocketGateway,
        // WebSocket types
        WebSocketMessage,
        WithOptions,
        async_trait,
        delete,
        get,
        patch,
        post,
        put,
        websocket,
    };
}
