use thiserror::Error;

pub type Result<T> = std::result::Result<T, CompileError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("Malformed project document: {0}")]
    Xml(String),

    /// Unexpected tree shape: mismatched close tag, unknown block shape,
    /// missing required child.
    #[error("Structure error: {0}")]
    Structure(String),

    #[error("Unsupported block '{selector}'.")]
    UnsupportedOperation { selector: String },

    #[error("No custom block matches '{requested}'. Known blocks: [{}].", .known.join(", "))]
    UnresolvedCustomBlock {
        requested: String,
        known: Vec<String>,
    },

    #[error("Argument shape error: {0}")]
    ArgumentShape(String),

    #[error("Unknown entry '{requested}'. Available entries: [{}].", .available.join(", "))]
    UnknownEntry {
        requested: String,
        available: Vec<String>,
    },
}

impl CompileError {
    pub fn structure(message: impl Into<String>) -> Self {
        CompileError::Structure(message.into())
    }

    pub fn argument_shape(message: impl Into<String>) -> Self {
        CompileError::ArgumentShape(message.into())
    }
}
