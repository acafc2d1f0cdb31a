use ulid::Ulid;

use crate::model::BookingSummary;

/// Which uniqueness dimension a conflicting booking collided on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Same PC, date and slot.
    Resource,
    /// Same person, date and slot.
    Person,
    /// Same booking id.
    Id,
}

impl ConflictKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictKind::Resource => "resource",
            ConflictKind::Person => "person",
            ConflictKind::Id => "id",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictDetail {
    pub kind: ConflictKind,
    /// The confirmed booking that already holds the cell.
    pub existing: BookingSummary,
}

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    DuplicateCode(String),
    ResourceInactive(Ulid),
    Conflict(Box<ConflictDetail>),
    ConfirmationRequired,
    Validation(String),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub fn conflict(kind: ConflictKind, existing: BookingSummary) -> Self {
        EngineError::Conflict(Box::new(ConflictDetail { kind, existing }))
    }

    pub fn conflict_kind(&self) -> Option<ConflictKind> {
        match self {
            EngineError::Conflict(detail) => Some(detail.kind),
            _ => None,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::DuplicateCode(code) => write!(f, "pc code already in use: {code}"),
            EngineError::ResourceInactive(id) => write!(f, "pc {id} is not active"),
            EngineError::Conflict(detail) => {
                let b = &detail.existing;
                let pc = b.pc_code.as_deref().unwrap_or("<deleted pc>");
                match detail.kind {
                    ConflictKind::Resource => write!(
                        f,
                        "{pc} is already booked on {} {} by {}",
                        b.date, b.slot, b.person_name
                    ),
                    ConflictKind::Person => write!(
                        f,
                        "{} already has {pc} booked on {} {}",
                        b.person_name, b.date, b.slot
                    ),
                    ConflictKind::Id => write!(f, "booking id already in use: {}", b.id),
                }
            }
            EngineError::ConfirmationRequired => {
                write!(f, "confirmation required: pass confirm = true to clear bookings")
            }
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
