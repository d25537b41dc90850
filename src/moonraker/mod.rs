//! Moonraker client layer: REST helper, JSON-RPC websocket, request
//! correlation and the connection supervisor.

pub mod api;
pub mod correlator;
pub mod gcodes;
pub mod rest;
pub mod rpc;
pub mod supervisor;
pub mod websocket;

pub use correlator::{CorrelatorError, RequestCorrelator, RpcCallback};
pub use rest::{KlippyRest, RestError};
pub use rpc::{Frame, RpcMethod, RpcReply};
pub use supervisor::{ConnectionState, Supervisor};
pub use websocket::{ClientError, ConnectionNotice, KlippyWebsocket, TransportEvent};
