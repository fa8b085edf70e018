//! Generic Access Profile assigned numbers ([Vol 3] Part C).

pub use gattcache_const::{
    Characteristic, Declaration, Descriptor, Service, ServiceClass, Uuid, Uuid16, UuidPacker,
    UuidType,
};
