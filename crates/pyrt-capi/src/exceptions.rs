//! Exception-type codes an extension function can pass across the C ABI
//! boundary when raising (it has no managed `ExcType` value to hand back,
//! only an integer it looked up from a header-style constant table).
//!
//! The old bindings direction (embedding this runtime inside a host
//! language) walked a live exception object's class hierarchy to find the
//! closest matching host type. Here the direction is reversed: extensions
//! are hosted inside this runtime, so there is no live foreign hierarchy to
//! introspect, only a fixed table of codes this crate itself defines and an
//! extension links against as constants.

use std::os::raw::c_int;

use pyrt_core::error::ExcType;

pub const PY_EXC_BASE_EXCEPTION: c_int = 0;
pub const PY_EXC_EXCEPTION: c_int = 1;
pub const PY_EXC_STOP_ITERATION: c_int = 2;
pub const PY_EXC_SYSTEM_EXIT: c_int = 3;
pub const PY_EXC_KEYBOARD_INTERRUPT: c_int = 4;
pub const PY_EXC_ARITHMETIC_ERROR: c_int = 5;
pub const PY_EXC_ZERO_DIVISION_ERROR: c_int = 6;
pub const PY_EXC_OVERFLOW_ERROR: c_int = 7;
pub const PY_EXC_LOOKUP_ERROR: c_int = 8;
pub const PY_EXC_INDEX_ERROR: c_int = 9;
pub const PY_EXC_KEY_ERROR: c_int = 10;
pub const PY_EXC_IMPORT_ERROR: c_int = 11;
pub const PY_EXC_RUNTIME_ERROR: c_int = 12;
pub const PY_EXC_NOT_IMPLEMENTED_ERROR: c_int = 13;
pub const PY_EXC_RECURSION_ERROR: c_int = 14;
pub const PY_EXC_ASSERTION_ERROR: c_int = 15;
pub const PY_EXC_ATTRIBUTE_ERROR: c_int = 16;
pub const PY_EXC_NAME_ERROR: c_int = 17;
pub const PY_EXC_TYPE_ERROR: c_int = 18;
pub const PY_EXC_VALUE_ERROR: c_int = 19;
pub const PY_EXC_MEMORY_ERROR: c_int = 20;
pub const PY_EXC_TIMEOUT_ERROR: c_int = 21;
pub const PY_EXC_SYNTAX_ERROR: c_int = 22;
pub const PY_EXC_SYSTEM_ERROR: c_int = 23;

/// Maps a code an extension passed in (e.g. to `PyErr_SetString`-equivalent
/// glue) to the managed [`ExcType`] it names. Unknown codes fall back to
/// `SystemError` — an extension linking against an out-of-date code table
/// should not be able to raise an exception type this runtime can't
/// represent.
#[must_use]
pub fn exc_type_from_code(code: c_int) -> ExcType {
    match code {
        PY_EXC_BASE_EXCEPTION => ExcType::BaseException,
        PY_EXC_EXCEPTION => ExcType::Exception,
        PY_EXC_STOP_ITERATION => ExcType::StopIteration,
        PY_EXC_SYSTEM_EXIT => ExcType::SystemExit,
        PY_EXC_KEYBOARD_INTERRUPT => ExcType::KeyboardInterrupt,
        PY_EXC_ARITHMETIC_ERROR => ExcType::ArithmeticError,
        PY_EXC_ZERO_DIVISION_ERROR => ExcType::ZeroDivisionError,
        PY_EXC_OVERFLOW_ERROR => ExcType::OverflowError,
        PY_EXC_LOOKUP_ERROR => ExcType::LookupError,
        PY_EXC_INDEX_ERROR => ExcType::IndexError,
        PY_EXC_KEY_ERROR => ExcType::KeyError,
        PY_EXC_IMPORT_ERROR => ExcType::ImportError,
        PY_EXC_RUNTIME_ERROR => ExcType::RuntimeError,
        PY_EXC_NOT_IMPLEMENTED_ERROR => ExcType::NotImplementedError,
        PY_EXC_RECURSION_ERROR => ExcType::RecursionError,
        PY_EXC_ASSERTION_ERROR => ExcType::AssertionError,
        PY_EXC_ATTRIBUTE_ERROR => ExcType::AttributeError,
        PY_EXC_NAME_ERROR => ExcType::NameError,
        PY_EXC_TYPE_ERROR => ExcType::TypeError,
        PY_EXC_VALUE_ERROR => ExcType::ValueError,
        PY_EXC_MEMORY_ERROR => ExcType::MemoryError,
        PY_EXC_TIMEOUT_ERROR => ExcType::TimeoutError,
        PY_EXC_SYNTAX_ERROR => ExcType::SyntaxError,
        PY_EXC_SYSTEM_ERROR => ExcType::SystemError,
        _ => ExcType::SystemError,
    }
}

/// The inverse mapping, used when reporting a managed exception back to
/// native code that only understands integer codes (e.g. populating an
/// out-parameter in a future `PyErr_Occurred`-equivalent).
#[must_use]
pub fn code_from_exc_type(exc_type: ExcType) -> c_int {
    match exc_type {
        ExcType::BaseException => PY_EXC_BASE_EXCEPTION,
        ExcType::Exception => PY_EXC_EXCEPTION,
        ExcType::StopIteration => PY_EXC_STOP_ITERATION,
        ExcType::SystemExit => PY_EXC_SYSTEM_EXIT,
        ExcType::KeyboardInterrupt => PY_EXC_KEYBOARD_INTERRUPT,
        ExcType::ArithmeticError => PY_EXC_ARITHMETIC_ERROR,
        ExcType::ZeroDivisionError => PY_EXC_ZERO_DIVISION_ERROR,
        ExcType::OverflowError => PY_EXC_OVERFLOW_ERROR,
        ExcType::LookupError => PY_EXC_LOOKUP_ERROR,
        ExcType::IndexError => PY_EXC_INDEX_ERROR,
        ExcType::KeyError => PY_EXC_KEY_ERROR,
        ExcType::ImportError => PY_EXC_IMPORT_ERROR,
        ExcType::RuntimeError => PY_EXC_RUNTIME_ERROR,
        ExcType::NotImplementedError => PY_EXC_NOT_IMPLEMENTED_ERROR,
        ExcType::RecursionError => PY_EXC_RECURSION_ERROR,
        ExcType::AssertionError => PY_EXC_ASSERTION_ERROR,
        ExcType::AttributeError => PY_EXC_ATTRIBUTE_ERROR,
        ExcType::NameError => PY_EXC_NAME_ERROR,
        ExcType::TypeError => PY_EXC_TYPE_ERROR,
        ExcType::ValueError => PY_EXC_VALUE_ERROR,
        ExcType::MemoryError => PY_EXC_MEMORY_ERROR,
        ExcType::TimeoutError => PY_EXC_TIMEOUT_ERROR,
        ExcType::SyntaxError => PY_EXC_SYNTAX_ERROR,
        ExcType::SystemError => PY_EXC_SYSTEM_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trips_through_exc_type() {
        for &code in &[
            PY_EXC_VALUE_ERROR,
            PY_EXC_TYPE_ERROR,
            PY_EXC_KEY_ERROR,
            PY_EXC_SYSTEM_ERROR,
        ] {
            let exc_type = exc_type_from_code(code);
            assert_eq!(code_from_exc_type(exc_type), code);
        }
    }

    #[test]
    fn unknown_code_falls_back_to_system_error() {
        assert_eq!(exc_type_from_code(999), ExcType::SystemError);
    }
}
