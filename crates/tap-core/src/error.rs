use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

/// Failures surfaced by flushes, commits and unmounts.
///
/// Protocol violations (hook order, dispatch during render, double unmount,
/// keyed-list misuse) are not represented here; they panic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TapError {
    /// A flush ran more than [`MAX_FLUSH_DEPTH`](crate::MAX_FLUSH_DEPTH) tasks.
    MaxUpdateDepthExceeded,
    /// User code (an effect, a cleanup or a scheduled render) panicked.
    Panicked { message: String },
    /// Several failures collected during one phase.
    Aggregate(Vec<TapError>),
}

impl TapError {
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        match payload.downcast::<TapError>() {
            Ok(error) => *error,
            Err(payload) => {
                let message = if let Some(message) = payload.downcast_ref::<&'static str>() {
                    (*message).to_string()
                } else if let Some(message) = payload.downcast_ref::<String>() {
                    message.clone()
                } else {
                    "non-string panic payload".to_string()
                };
                TapError::Panicked { message }
            }
        }
    }
}

impl fmt::Display for TapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TapError::MaxUpdateDepthExceeded => write!(
                f,
                "Maximum update depth exceeded. This can happen when a resource \
                 repeatedly calls setState inside tap_effect."
            ),
            TapError::Panicked { message } => write!(f, "{message}"),
            TapError::Aggregate(errors) => {
                write!(f, "{} errors occurred during flush", errors.len())
            }
        }
    }
}

impl std::error::Error for TapError {}

/// Collects failures of one phase so that no failure suppresses its siblings.
#[derive(Default)]
pub(crate) struct ErrorSink {
    errors: Vec<TapError>,
}

impl ErrorSink {
    pub(crate) fn push(&mut self, error: TapError) {
        self.errors.push(error);
    }

    /// Runs `f`, recording a panic instead of unwinding past the caller.
    pub(crate) fn guard(&mut self, f: impl FnOnce()) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
            self.push(TapError::from_panic(payload));
        }
    }

    pub(crate) fn record<T>(&mut self, result: Result<T, TapError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                self.push(error);
                None
            }
        }
    }

    pub(crate) fn finish(self) -> Result<(), TapError> {
        let mut errors = self.errors;
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => {
                for error in &errors {
                    log::error!("{error}");
                }
                Err(TapError::Aggregate(errors))
            }
        }
    }
}

/// Re-raises `error` from inside an effect so the committing phase collects it
/// unchanged.
pub(crate) fn raise(error: TapError) -> ! {
    panic::panic_any(error)
}
