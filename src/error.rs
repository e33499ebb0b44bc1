//! Crate-wide error type.
//!
//! Three kinds of failure are distinguished, matching how a caller is
//! expected to react to each: [`ShareChainError::PeerMisbehaving`] is the
//! transport's signal to penalize whoever sent the offending bytes;
//! [`ShareChainError::Invariant`] means our own bookkeeping or a cached
//! share disagrees with itself and the operation in progress is abandoned;
//! everything else is ordinary I/O that the store layer logs and skips.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShareChainError {
    /// The remote peer sent something that violates the wire protocol or a
    /// share's own validation rules. The transport should disconnect/punish
    /// the originating peer.
    #[error("peer misbehaving: {0}")]
    PeerMisbehaving(String),

    /// An internal invariant does not hold: a cached share, a supposedly
    /// final amount split, or a stored link disagrees with what is
    /// recomputed from chain state. Not the fault of the immediate caller.
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// Reading or writing the persisted share log failed for a reason that
    /// is not a corrupt record (disk full, permission denied, ...).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A packed byte string did not decode to a well-formed value of the
    /// expected shape (short buffer, bad var-int, trailing bytes).
    #[error("decode error: {0}")]
    Decode(String),
}

impl ShareChainError {
    pub fn peer_misbehaving(reason: impl Into<String>) -> Self {
        ShareChainError::PeerMisbehaving(reason.into())
    }

    pub fn invariant(reason: impl Into<String>) -> Self {
        ShareChainError::Invariant(reason.into())
    }

    pub fn decode(reason: impl Into<String>) -> Self {
        ShareChainError::Decode(reason.into())
    }

    /// True for errors that should cause the transport to penalize the peer
    /// that supplied the offending data.
    pub fn is_peer_fault(&self) -> bool {
        matches!(self, ShareChainError::PeerMisbehaving(_))
    }
}

pub type Result<T> = std::result::Result<T, ShareChainError>;
