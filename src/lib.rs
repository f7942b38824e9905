//! topicd: an in-process topic broker served over HTTP.
//!
//! `POST /publish` fans a message out to every open `GET /subscribe?topic=`
//! stream on that topic, one line per message.

pub mod api;
pub mod broker;
pub mod config;
pub mod shutdown;
