//! Prelude module for convenient imports

pub use crate::codec::{DEFAULT_MAX_FRAME_SIZE, FrameCodec, FrameHeader};
pub use crate::config::{ConnectionConfig, ConnectionConfigBuilder, ServerConfig};
pub use crate::connection::{Connection, ConnectionBuilder, StatsSnapshot};
pub use crate::error::{ErrorCategory, RpcError, RpcResult};
pub use crate::message::{Message, MessageDecoder, MessageTag};
pub use crate::objects::{MethodTable, SharedMap, ValueCell};
pub use crate::proxy::Proxy;
pub use crate::security::{AllowAll, AllowList, DenyList, INTERNAL_MARKER, SecurityPolicy};
pub use crate::server::{Server, ServerState};
pub use crate::transport::{DEFAULT_PORT, Transport, TransportType};
pub use crate::value::{Block, Handle, ObjectRef, RemoteObject, Value, expect_args};
pub use crate::wire::{
    BincodeSerializer, CallId, ErrorValue, JsonSerializer, MAX_NESTING, ObjectId, Serializer,
    SerializerKind, WireValue,
};
