use thiserror::Error;

#[derive(Debug, Error)]
pub enum HeatloopError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Capture failure: {0}")]
    Capture(String),

    #[error("Geometry failure: {0}")]
    Geometry(String),

    #[error("Render timeout: job seq={seq} unresolved after {waited_ms}ms")]
    RenderTimeout { seq: u64, waited_ms: u64 },

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Action parse failure: {0}")]
    ActionParse(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Render wait cancelled")]
    Cancelled,
}

impl HeatloopError {
    /// Whether the session survives this error. Recoverable errors abandon (or
    /// degrade) the current turn only.
    pub fn is_turn_recoverable(&self) -> bool {
        !matches!(
            self,
            HeatloopError::ProtocolViolation(_)
                | HeatloopError::Config(_)
                | HeatloopError::TomlDe(_)
                | HeatloopError::TomlSer(_)
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for HeatloopError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        HeatloopError::Transport(e.to_string())
    }
}

impl serde::Serialize for HeatloopError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type HeatloopResult<T> = Result<T, HeatloopError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_violations_are_not_recoverable() {
        assert!(!HeatloopError::ProtocolViolation("double publish".into()).is_turn_recoverable());
        assert!(HeatloopError::RenderTimeout { seq: 3, waited_ms: 10 }.is_turn_recoverable());
        assert!(HeatloopError::Capture("no monitor".into()).is_turn_recoverable());
        assert!(HeatloopError::Cancelled.is_turn_recoverable());
    }

    #[test]
    fn serializes_as_display_string() {
        let e = HeatloopError::RenderTimeout { seq: 7, waited_ms: 250 };
        let json = serde_json::to_string(&e).unwrap();
        assert_eq!(json, "\"Render timeout: job seq=7 unresolved after 250ms\"");
    }
}
