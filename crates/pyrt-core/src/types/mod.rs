//! Type & MRO (component D).

pub mod mro;
pub mod ty;

pub use mro::{c3_linearize, resolve_metaclass};
pub use ty::{NativeTypeData, Type, TypeFlags, TypeTable};
