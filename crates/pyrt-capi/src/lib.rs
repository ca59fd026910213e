//! The C-extension embedding surface for `pyrt-core`: the `#[repr(C)]` slot
//! and module-definition shapes a compiled extension links against
//! (`spec`), the multi-phase module-initialization protocol
//! (`module_init`), the adapter from a raw `extern "C"` function pointer to
//! [`pyrt_core::trampoline::NativeCallable`] (`native_method`), and the flat
//! exception-code table an extension raises through (`exceptions`).
//!
//! This is the one place in the workspace where raw pointers and `unsafe`
//! are the idiomatic shape, not an exception to it: every other crate here
//! treats cross-object references as ids resolved through an owning table.
//! Here the boundary is a real (if simplified) C ABI — an extension
//! supplies raw function pointers, and this crate calls them safely from
//! the managed side.

pub mod exceptions;
pub mod module_init;
pub mod native_method;
pub mod spec;

pub use crate::exceptions::{code_from_exc_type, exc_type_from_code};
pub use crate::module_init::{handle_as_ptr, initialize_module, ptr_as_handle};
pub use crate::native_method::{ExtensionMethod, RawEntry};
