//! Attribute Protocol types used by the GATT client ([Vol 3] Part F).

pub use {consts::*, handle::*};

mod consts;
mod handle;
