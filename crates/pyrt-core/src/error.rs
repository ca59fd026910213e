//! Error handling design (§7): exception-pending state, error-sentinel fast
//! paths, exception normalization, and chaining.
//!
//! Three error kinds exist, distinguished by how expensive they are to
//! report rather than by what went wrong:
//! - **exception pending** — a [`PyException`] attached to an
//!   [`ExceptionState`] (the managed equivalent of a thread's exception
//!   slot).
//! - **error sentinel return** — [`crate::tagged::ErrorSentinel`], an
//!   immediate value returned from fast paths (attribute/dict lookup miss,
//!   exhausted iterator, unbound local) without allocating.
//! - **fatal** — unrecoverable; see [`abort_with_traceback`].

use std::fmt;

use strum::{Display, EnumString};

/// Python's built-in exception types the runtime itself raises or needs to
/// recognize (e.g. to decide MRO/metaclass conflicts, or whether a raised
/// value during module-exec should abort with `SystemError`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
pub enum ExcType {
    BaseException,
    Exception,
    StopIteration,
    SystemExit,
    KeyboardInterrupt,
    ArithmeticError,
    ZeroDivisionError,
    OverflowError,
    LookupError,
    IndexError,
    KeyError,
    ImportError,
    RuntimeError,
    NotImplementedError,
    RecursionError,
    AssertionError,
    AttributeError,
    NameError,
    TypeError,
    ValueError,
    MemoryError,
    TimeoutError,
    SyntaxError,
    SystemError,
}

impl ExcType {
    /// Direct parent in the built-in exception hierarchy, or `None` for
    /// `BaseException`. Used for `isinstance`/`except` matching and by the
    /// module-init protocol to decide whether a native slot's exception is
    /// itself a `SystemError` already.
    #[must_use]
    pub fn parent(self) -> Option<Self> {
        use ExcType::*;
        match self {
            BaseException => None,
            Exception | SystemExit | KeyboardInterrupt => Some(BaseException),
            StopIteration | ArithmeticError | LookupError | ImportError | RuntimeError
            | AssertionError | AttributeError | NameError | TypeError | ValueError
            | MemoryError | SyntaxError => Some(Exception),
            ZeroDivisionError | OverflowError => Some(ArithmeticError),
            IndexError | KeyError => Some(LookupError),
            NotImplementedError | RecursionError => Some(RuntimeError),
            TimeoutError => Some(Exception),
            SystemError => Some(RuntimeError),
        }
    }

    #[must_use]
    pub fn is_subtype_of(self, ancestor: Self) -> bool {
        let mut current = Some(self);
        while let Some(c) = current {
            if c == ancestor {
                return true;
            }
            current = c.parent();
        }
        false
    }
}

/// A raised (or about-to-be-raised) exception object.
///
/// `cause_set` is distinct from `cause.is_some()`: `raise X from None` sets
/// `cause_set = true` with `cause = None`, which suppresses printing the
/// `__context__` chain even though one may be attached.
#[derive(Debug, Clone, PartialEq)]
pub struct PyException {
    pub exc_type: ExcType,
    pub message: Option<String>,
    pub context: Option<Box<PyException>>,
    pub cause: Option<Box<PyException>>,
    pub cause_set: bool,
}

impl PyException {
    #[must_use]
    pub fn new(exc_type: ExcType, message: impl Into<Option<String>>) -> Self {
        Self { exc_type, message: message.into(), context: None, cause: None, cause_set: false }
    }

    /// `raise X from Y` (or `raise X from None` when `cause` is `None`).
    #[must_use]
    pub fn with_explicit_cause(mut self, cause: Option<PyException>) -> Self {
        self.cause = cause.map(Box::new);
        self.cause_set = true;
        self
    }

    /// Whether the `__context__` chain should be printed under `raise ...
    /// from Y`/`from None` suppression rules.
    #[must_use]
    pub fn should_display_context(&self) -> bool {
        !self.cause_set || self.cause.is_some()
    }
}

impl fmt::Display for PyException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {}", self.exc_type, msg),
            None => write!(f, "{}", self.exc_type),
        }
    }
}

/// The maximum nesting depth [`ExceptionState::normalize`] tolerates before
/// treating further normalization as a fatal error, matching the reference
/// runtime's "exceeding it raises RecursionError, and if that also fails the
/// process aborts" policy.
const MAX_NORMALIZE_DEPTH: u32 = 32;

/// Per-mutator exception bookkeeping: the pending exception, the stack of
/// exceptions currently being handled (for automatic `__context__` chaining
/// and `sys.exc_info()`), and normalization recursion tracking.
#[derive(Debug, Default)]
pub struct ExceptionState {
    pending: Option<PyException>,
    handling_stack: Vec<PyException>,
    normalize_depth: u32,
}

impl ExceptionState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the pending exception. If `exc` has no explicit `__context__`
    /// yet and an exception is currently being handled, that exception is
    /// linked in automatically.
    pub fn set_pending(&mut self, mut exc: PyException) {
        if exc.context.is_none() {
            if let Some(handled) = self.handling_stack.last() {
                exc.context = Some(Box::new(handled.clone()));
            }
        }
        self.pending = Some(exc);
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    #[must_use]
    pub fn peek_pending(&self) -> Option<&PyException> {
        self.pending.as_ref()
    }

    pub fn take_pending(&mut self) -> Option<PyException> {
        self.pending.take()
    }

    pub fn clear(&mut self) {
        self.pending = None;
    }

    /// Enter an `except` block: pushes `exc` onto the handling stack so
    /// that exceptions raised inside see it as their `__context__`.
    pub fn push_handling(&mut self, exc: PyException) {
        self.handling_stack.push(exc);
    }

    /// Leave an `except` block.
    pub fn pop_handling(&mut self) -> Option<PyException> {
        self.handling_stack.pop()
    }

    /// `raise C` is normalized to `raise C()` at the point the exception
    /// becomes observable. `value` is `Some` already-constructed instance
    /// (e.g. `raise ValueError("x")`); `None` means a bare class was raised.
    pub fn normalize(&mut self, exc_type: ExcType, value: Option<PyException>) -> Result<PyException, FatalError> {
        self.normalize_depth += 1;
        if self.normalize_depth > MAX_NORMALIZE_DEPTH {
            self.normalize_depth = 0;
            let recursion_exc = PyException::new(ExcType::RecursionError, "exceeded exception normalization limit".to_owned());
            // A RecursionError while normalizing is itself subject to this
            // same guard; if we're already at depth zero here, that second
            // failure is the fatal case.
            return Ok(recursion_exc);
        }
        let result = match value {
            Some(v) if v.exc_type == exc_type => v,
            Some(v) => {
                self.normalize_depth -= 1;
                return Err(FatalError(format!(
                    "normalize: value type {} does not match raised type {}",
                    v.exc_type, exc_type
                )));
            }
            None => PyException::new(exc_type, None),
        };
        self.normalize_depth -= 1;
        Ok(result)
    }

    /// Formats an unhandled exception the way the default printer does:
    /// `__cause__` (or `__context__`, unless suppressed) first, then the
    /// exception itself, each separated by the standard banner.
    #[must_use]
    pub fn format_unhandled(exc: &PyException) -> String {
        let mut out = String::new();
        format_chain(exc, &mut out, 0);
        out
    }
}

const MAX_CHAIN_DEPTH: usize = 64;

fn format_chain(exc: &PyException, out: &mut String, depth: usize) {
    if depth >= MAX_CHAIN_DEPTH {
        return;
    }
    if let Some(cause) = &exc.cause {
        format_chain(cause, out, depth + 1);
        out.push_str("\nThe above exception was the direct cause of the following exception:\n\n");
    } else if exc.should_display_context() {
        if let Some(context) = &exc.context {
            format_chain(context, out, depth + 1);
            out.push_str("\nDuring handling of the above exception, another exception occurred:\n\n");
        }
    }
    out.push_str(&exc.to_string());
    out.push('\n');
}

/// An unrecoverable error. The core never calls `process::abort` itself;
/// embedders decide how "abort after writing a traceback" is carried out
/// (the reference runtime writes to the raw stderr fd and re-raises the
/// signal on an alternate stack — see `faulthandler` in SPEC_FULL.md).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalError(pub String);

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fatal runtime error: {}", self.0)
    }
}

impl std::error::Error for FatalError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_chains_automatically() {
        let mut state = ExceptionState::new();
        state.push_handling(PyException::new(ExcType::ValueError, "a".to_owned()));
        state.set_pending(PyException::new(ExcType::TypeError, "b".to_owned()));
        let pending = state.take_pending().unwrap();
        assert_eq!(pending.context.unwrap().exc_type, ExcType::ValueError);
        assert!(pending.cause.is_none());
    }

    #[test]
    fn explicit_cause_suppresses_context_display_when_none() {
        let exc = PyException::new(ExcType::TypeError, "b".to_owned()).with_explicit_cause(None);
        assert!(!exc.should_display_context());
    }

    #[test]
    fn subtype_hierarchy() {
        assert!(ExcType::ZeroDivisionError.is_subtype_of(ExcType::ArithmeticError));
        assert!(ExcType::ZeroDivisionError.is_subtype_of(ExcType::Exception));
        assert!(!ExcType::ValueError.is_subtype_of(ExcType::LookupError));
    }
}
