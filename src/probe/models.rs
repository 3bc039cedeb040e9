use std::fmt::Display;

use serde::{Serialize, Serializer};

/// Request-mangling variants a probe client can be configured with.
///
/// The discriminants are the integer codes exchanged with callers and must
/// keep their exact meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum EvasionStrategy {
    /// Traffic is sent as-is.
    #[default]
    Unmodified = 0,
    /// Elevated record count.
    ElevatedCount = 1,
    /// Reserved bits truncated.
    TruncatedReserved = 2,
    /// Multi-byte encoding.
    MultiByte = 3,
    /// Multi-byte encoding combined with an elevated record count.
    MultiByteElevatedCount = 4,
    /// Compressed encoding.
    Compressed = 5,
}

impl EvasionStrategy {
    /// Every strategy, in code order.
    pub const ALL: [Self; 6] = [
        Self::Unmodified,
        Self::ElevatedCount,
        Self::TruncatedReserved,
        Self::MultiByte,
        Self::MultiByteElevatedCount,
        Self::Compressed,
    ];

    /// Converts an integer code received from a caller into a strategy.
    ///
    /// # Arguments
    ///
    /// * `code`: The integer code, expected in `0..=5`.
    ///
    /// # Returns
    ///
    /// The matching strategy, or `Unmodified` when the code is out of range.
    pub fn from_code(code: i64) -> Self {
        usize::try_from(code)
            .ok()
            .and_then(|index| Self::ALL.get(index).copied())
            .unwrap_or_default()
    }

    /// Returns the integer code of this strategy.
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

impl Display for EvasionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unmodified => "UNMODIFIED",
            Self::ElevatedCount => "ELEVATED_COUNT",
            Self::TruncatedReserved => "TRUNCATED_RESERVED",
            Self::MultiByte => "MULTI_BYTE",
            Self::MultiByteElevatedCount => "MULTI_BYTE_ELEVATED_COUNT",
            Self::Compressed => "COMPRESSED",
        };
        write!(f, "{}({})", name, self.code())
    }
}

impl Serialize for EvasionStrategy {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(self.code())
    }
}

/// One (url, strategy) pair to be probed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    /// Candidate proxy/front url.
    pub url: String,
    /// Strategy the client is configured with.
    pub strategy: EvasionStrategy,
}

impl ProbeRequest {
    pub fn new<S: Into<String>>(url: S, strategy: EvasionStrategy) -> Self {
        Self {
            url: url.into(),
            strategy,
        }
    }
}

impl Display for ProbeRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} / {}", self.url, self.strategy)
    }
}

/// Terminal result of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The target endpoint answered with a 2xx status.
    Valid(ProbeRequest),
    /// Non-2xx status or transport failure.
    Invalid {
        request: ProbeRequest,
        reason: String,
    },
}

impl ProbeOutcome {
    /// Returns the request this outcome resolves.
    pub fn request(&self) -> &ProbeRequest {
        match self {
            Self::Valid(request) => request,
            Self::Invalid { request, .. } => request,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }
}
