use ulid::Ulid;

/// Why an offer token could not be redeemed. `Display` is shown to the
/// patient, so it never carries internal detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfferError {
    InvalidToken,
    NoLongerAvailable,
    Expired,
    /// The cancelled appointment the offer was cloned from is gone.
    OriginalMissing(Ulid),
    Store(StoreError),
}

impl OfferError {
    pub fn label(&self) -> &'static str {
        match self {
            OfferError::InvalidToken => "invalid_token",
            OfferError::NoLongerAvailable => "no_longer_available",
            OfferError::Expired => "expired",
            OfferError::OriginalMissing(_) => "original_missing",
            OfferError::Store(_) => "store",
        }
    }
}

impl std::fmt::Display for OfferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OfferError::InvalidToken => write!(f, "invalid offer token"),
            OfferError::NoLongerAvailable => write!(f, "offer no longer available"),
            OfferError::Expired => write!(f, "offer expired"),
            OfferError::OriginalMissing(_) | OfferError::Store(_) => {
                write!(f, "offer could not be confirmed")
            }
        }
    }
}

impl std::error::Error for OfferError {}

impl From<StoreError> for OfferError {
    fn from(e: StoreError) -> Self {
        OfferError::Store(e)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitlistError {
    NotFound(Ulid),
    NotWaiting(Ulid),
    LimitExceeded(&'static str),
}

impl std::fmt::Display for WaitlistError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitlistError::NotFound(id) => write!(f, "waitlist entry not found: {id}"),
            WaitlistError::NotWaiting(id) => write!(f, "waitlist entry {id} is no longer waiting"),
            WaitlistError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

impl std::error::Error for WaitlistError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    AlreadyExists(Ulid),
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::AlreadyExists(id) => write!(f, "appointment already exists: {id}"),
            StoreError::Unavailable(e) => write!(f, "appointment store unavailable: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}
