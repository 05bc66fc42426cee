use thiserror::Error;

impl From<serde_json::Error> for AnchorError {
    fn from(err: serde_json::Error) -> Self {
        Self::EncodingError(format!("JSON serialization error: {}", err))
    }
}

impl From<reqwest::Error> for AnchorError {
    fn from(err: reqwest::Error) -> Self {
        Self::NetworkError(format!("Ledger endpoint unreachable: {}", err))
    }
}

impl From<::config::ConfigError> for AnchorError {
    fn from(err: ::config::ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

impl From<secp256k1::Error> for AnchorError {
    fn from(err: secp256k1::Error) -> Self {
        Self::CryptoError(format!("secp256k1 error: {}", err))
    }
}

#[derive(Error, Debug)]
pub enum AnchorError {
    #[error("Encoding error: {0}")]
    EncodingError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFundsError(String),

    #[error("Contract reverted: {0}")]
    ContractRevertError(String),

    #[error("Log entry {0} not found")]
    NotFoundError(u64),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    #[error("Malformed ledger response: {0}")]
    ProtocolError(String),
}

pub type Result<T> = std::result::Result<T, AnchorError>;

impl AnchorError {
    pub fn insufficient_funds(required: u128, available: u128) -> Self {
        Self::InsufficientFundsError(format!(
            "transaction needs {} wei, account holds {} wei",
            required, available
        ))
    }

    /// Classify an error message reported by a ledger node.
    ///
    /// Nodes do not agree on error codes, so classification goes by the
    /// message text the major clients use.
    pub fn from_node_message(code: i64, message: &str, revert_data: Option<&[u8]>) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("insufficient funds") {
            return Self::InsufficientFundsError(message.to_string());
        }
        if code == 3 || lower.contains("revert") {
            let reason = revert_data
                .and_then(crate::ledger::abi::decode_revert_reason)
                .unwrap_or_else(|| message.to_string());
            return Self::ContractRevertError(reason);
        }
        Self::NetworkError(format!("node error {}: {}", code, message))
    }

    /// Whether the error was raised by on-chain validation.
    pub fn is_revert(&self) -> bool {
        matches!(self, Self::ContractRevertError(_))
    }
}
