#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("empty line")]
    Empty,

    #[error("malformed line")]
    Malformed(#[source] serde_json::Error),

    #[error("line is not a JSON object")]
    NotAnObject,

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("field '{0}' has the wrong type")]
    FieldType(&'static str),

    #[error("unknown frame type '{0}'")]
    UnknownType(String),

    #[error("failed to encode frame")]
    Encode(#[source] serde_json::Error),
}
