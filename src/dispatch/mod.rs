//! JSON-RPC protocol surface.

pub mod dispatcher;
pub mod json_rpc;

pub use dispatcher::Dispatcher;
pub use json_rpc::{
    map_engine_error, validate_request, JsonRpcError, JsonRpcId, JsonRpcRequest, JsonRpcResponse,
};
