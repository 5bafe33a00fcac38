use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Unknown flag value: {0}")]
    UnknownFlag(u32),

    #[error("Body of {got} bytes not allowed for flag {flag:?} (expected {expected})")]
    BodyRule {
        flag: crate::flag::Flag,
        got: usize,
        expected: &'static str,
    },

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Invalid field: {0}")]
    InvalidField(String),
}
