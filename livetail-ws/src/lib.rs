// livetail-ws - websocket stream transport for livetail
//
// This crate provides a StreamTransport implementation over the
// gateway's websocket log endpoint.

mod transport;

pub use transport::{WsTransport, resolve_endpoint};
