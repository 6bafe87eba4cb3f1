//! Dual transport (§4.4): a full-duplex socket and an HTTP POST + SSE
//! fallback sharing one ingress/egress contract via [`crate::node::ClientNode`].

pub mod sse;
pub mod ws;
