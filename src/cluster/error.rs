use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A single fan-out target failed outside of an aggregate call (a
    /// direct `get_version` or `list_lookup`, or the leader lookup a
    /// write operation needs before it can proceed).
    #[error("request to {address} failed: {message}")]
    Request { address: String, message: String },
    /// Every target in a fan-out call failed; `.0` holds `(address,
    /// message)` for each.
    #[error("every fan-out target failed ({} errors)", .0.len())]
    TotalFailure(Vec<(String, String)>),
}

pub type Result<T> = std::result::Result<T, Error>;
