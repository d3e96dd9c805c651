//! Directory Service (C8): ring membership, the file-map/access/cache/
//! session support structures, and the client- and SN-facing listeners.

pub mod access;
pub mod cache;
pub mod commands;
pub mod dsclient;
pub mod filemap;
pub mod ring;
pub mod server;
pub mod session;
pub mod users;
