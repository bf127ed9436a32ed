#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PromiseError {
    #[error("TypeError: {message}")]
    TypeError { message: String },
}

impl PromiseError {
    /// Name of the error class, as a script would report it.
    pub fn kind(&self) -> &'static str {
        match self {
            PromiseError::TypeError { .. } => "TypeError",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            PromiseError::TypeError { message } => message,
        }
    }
}

// Builds a TypeError from anything displayable. A macro keeps call sites
// short inside closures that already juggle several captures.
#[macro_export]
macro_rules! raise_type_error {
    ($msg:expr) => {
        $crate::PromiseError::TypeError { message: $msg.to_string() }
    };
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_raise_type_error() {
        let err = crate::raise_type_error!(format!("expected {}", "array"));
        assert_eq!(err.kind(), "TypeError");
        assert_eq!(err.message(), "expected array");
        assert_eq!(err.to_string(), "TypeError: expected array");
    }
}
