//! Secret-blocking gateway for MCP over server-sent events.
//!
//! The gateway sits between an MCP client and a remote tool server. It
//! relays the server's long-lived event stream to the client and the
//! client's discrete JSON-RPC requests to the server, and it refuses to
//! forward any `tools/call` whose arguments a [`ContentPolicy`] objects to.
//!
//! # Architecture
//!
//! ```text
//!            GET /sse?targetUrl=...                 GET <target>
//! Client  ------------------------->  sse-proxy  ----------------->  Server
//!         <--- events (rewritten) ---            <---- events -----
//!
//!            POST /message?sessionId=...            POST <endpoint>
//!         ------------------------->  [policy] ----------------->
//!         <--- blocked: error event on the stream
//! ```
//!
//! The server announces each stream's session id in its first `endpoint`
//! event. The relay registers the session under that id in the
//! [`SessionRegistry`] before the event is delivered, and rewrites the
//! advertised URL to point back at the gateway. The interceptor finds the
//! session by id, and blocked requests are answered on the session's stream
//! through its [`StreamWriter`], the only path that writes to it.

pub mod error;
pub mod interceptor;
pub mod listener;
pub mod policy;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod session;
pub mod sse;
pub mod target;
pub mod upstream;

pub use error::GatewayError;
pub use listener::{router, Proxy, ProxyConfig, ProxyState};
pub use policy::{AllowAll, ContentPolicy, Finding};
pub use protocol::{ArgValue, ErrorEnvelope, RequestId, ToolCallRequest, BLOCKED_ERROR_CODE};
pub use registry::{SessionLease, SessionRegistry};
pub use session::{Session, StreamWriter, WriteOutcome};
pub use target::LoopbackRewrite;
