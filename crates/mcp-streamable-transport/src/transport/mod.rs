//! The transport's component modules, wired together per spec.md's C1-C8
//! decomposition.

pub mod context;
pub mod event_store;
pub mod http;
pub mod post;
pub mod session;
pub mod sse;
pub mod stream_server;

pub use context::{ExecutionContext, MessageContext, Principal};
pub use event_store::{
    EventStoreError, EventStreamReader, EventStreamStore, EventStreamWriter, RetentionPolicy,
    STANDALONE_STREAM_ID, StreamMode,
};
pub use http::{Config, ProtocolVersionPolicy};
pub use post::{PostTransport, PostTransportError};
pub use session::{
    GetOutcome, InboxItem, PostOutcome, SessionError, SessionId, SessionManager, SessionTransport,
    generate_session_id,
};
pub use sse::{FullPolicy, SseEventType, SseItem, SseWriter};
pub use stream_server::{StreamServerError, StreamServerTransport};
