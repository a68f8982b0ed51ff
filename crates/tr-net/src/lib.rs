//! Networking for the navigation engine: locations, fetch messages, the
//! blocking HTTP/1.1 client, pluggable backends and the correlating
//! transport.

pub mod backend;
pub mod client;
pub mod http;
pub mod location;
mod tls;
pub mod transport;

pub use backend::Completion;
pub use backend::FetchBackend;
pub use backend::HttpBackend;
pub use backend::Scripted;
pub use backend::ScriptedBackend;
pub use client::ClientConfig;
pub use client::HttpClient;
pub use http::FetchMethod;
pub use http::FetchPurpose;
pub use http::FetchRequest;
pub use http::FetchResponse;
pub use http::FormEncoding;
pub use http::Header;
pub use http::HttpStatusCode;
pub use http::STREAM_CONTENT_TYPE;
pub use location::Location;
pub use transport::Dispatch;
pub use transport::FetchInterceptor;
pub use transport::Interception;
pub use transport::NoInterception;
pub use transport::RecentRequests;
pub use transport::Transport;
