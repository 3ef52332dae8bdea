//! Server-side Streamable HTTP transport for the Model Context Protocol.
//!
//! Moves JSON-RPC 2.0 messages between an MCP server and its clients over
//! HTTP: a `POST` for each client-originated message, optionally streamed
//! back as Server-Sent Events, and a long-lived `GET` for server-originated
//! messages the client didn't ask for. Sessions, resumability via
//! `Last-Event-ID`, and a stateless single-request mode are all supported;
//! interpreting `method`/`params` and producing responses is the job of
//! whatever dispatcher is wired up via [`transport::http::Dispatch`] or
//! [`transport::context::MessageContext::reply`] — this crate only moves
//! bytes and correlates them.
//!
//! See [`transport`] for the component modules and [`model`] for the
//! minimal JSON-RPC message shapes this crate understands.

pub mod model;
pub mod transport;

pub use model::{
    JsonRpcError, JsonRpcErrorObject, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, JsonRpcVersion2_0, RequestId,
};
