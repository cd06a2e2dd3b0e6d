// Core library for the Ravyn framework
// Routing, dependency injection and the request pipeline over an ASGI-style interface

pub mod application;
pub mod asgi;
pub mod controller;
pub mod dependencies;
pub mod encoders;
pub mod error;
pub mod exception;
pub mod extension;
pub mod extract;
pub mod form;
pub mod handler;
pub mod interceptor;
pub mod lifespan;
pub mod logging;
pub mod middleware;
pub mod options;
pub mod params;
pub mod path;
pub mod permission;
mod pipeline;
pub mod response;
pub mod routing;
mod server;
pub mod settings;
pub mod signature;
pub mod state;
pub mod testing;
pub mod websocket;

// Re-export commonly used types
pub use application::{App, AppBuilder};
pub use asgi::{AsgiApp, Frame, Headers, Message, Receive, Request, Scope, ScopeKind, Sender};
pub use controller::{Controller, ControllerHandler};
pub use dependencies::{DependencyGraph, DependencyScope, Provider};
pub use encoders::{Encoder, EncoderRegistry, ModelEncoder, PrimitiveEncoder, SerdeEncoder, register_encoder};
pub use error::{Error, ErrorDetail, ErrorKind, ValidationErrors};
pub use exception::{ExceptionFilter, ExceptionHandler, FnFilter};
pub use extension::{Extension, ExtensionRegistry};
pub use extract::{Argument, Kwargs};
pub use form::{FormData, MultipartLimits, UploadFile};
pub use handler::{
    HttpHandler, WebSocketHandler, delete, get, head, options, patch, post, put, route, websocket,
};
pub use interceptor::{Flow, FnInterceptor, HeaderToStateInterceptor, Interceptor, LoggingInterceptor};
pub use lifespan::{Lifespan, LifespanHook};
pub use logging::{LogConfig, LogFormat, LogLevel, LogOutput, LoggingSettings};
pub use middleware::{
    LoggerMiddleware, Middleware, MiddlewareChain, Next, RequestIdMiddleware, SettingsMiddleware,
};
pub use options::{EffectiveOptions, LevelOptions, RequestHook, WithOptions};
pub use params::{Constraints, Field, ModelInstance, ModelSchema, Param, ParamKind, SerdeObject, TypeHint};
pub use permission::{
    AllowAny, ApiKeyPermission, BasePermission, DenyAll, FnPermission, HandlerInfo,
    HeaderPermission, Permission, TransportPermission,
};
pub use response::{
    BackgroundTask, BackgroundTasks, Body, Cookie, Reply, Response, ResponseClass, SameSite,
};
pub use routing::{ChildApp, Gateway, HostRoute, Include, Route, RouteInfo, Router, WebSocketGateway};
pub use settings::Settings;
pub use signature::{ParamSpec, Signature, Source};
pub use state::State;
pub use testing::{Multipart, TestClient, TestResponse, WebSocketSession};
pub use websocket::{WebSocket, WebSocketMessage};

// Re-export async_trait for implementing the framework traits
pub use async_trait::async_trait;
