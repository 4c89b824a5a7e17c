//! The socketmap table-lookup protocol: netstring framed requests of the form
//! `<table> <key>`, answered with `OK <value>`, `NOTFOUND` or `TEMP`.

mod frame;
mod lookup;

pub use frame::{encode, read_frame, write_frame, FramingError, MAX_PAYLOAD};
pub use lookup::{lookup, Reply, ALIAS_TABLE};
