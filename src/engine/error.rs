use ulid::Ulid;

use crate::model::RequestStatus;

/// What kind of record a lookup failed to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Agency,
    Site,
    Bed,
    Case,
    Request,
    Occupancy,
}

impl Entity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Entity::Agency => "agency",
            Entity::Site => "site",
            Entity::Bed => "bed",
            Entity::Case => "case",
            Entity::Request => "request",
            Entity::Occupancy => "occupancy",
        }
    }
}

/// State moved since the caller last looked. Callers re-read and show the
/// operator the current picture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    /// The request is no longer `PENDING`.
    RequestResolved { id: Ulid, status: RequestStatus },
    /// Stored status differs from the caller's expected `from` status.
    StatusMismatch {
        id: Ulid,
        expected: RequestStatus,
        actual: RequestStatus,
    },
    BedOccupied { bed_id: Ulid },
    CaseAlreadyHoused { case_id: Ulid, occupancy_id: Ulid },
    OccupancyReleased { id: Ulid },
}

impl Conflict {
    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Conflict::RequestResolved { .. } => "request_resolved",
            Conflict::StatusMismatch { .. } => "status_mismatch",
            Conflict::BedOccupied { .. } => "bed_occupied",
            Conflict::CaseAlreadyHoused { .. } => "case_housed",
            Conflict::OccupancyReleased { .. } => "occupancy_released",
        }
    }
}

impl std::fmt::Display for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Conflict::RequestResolved { id, status } => {
                write!(f, "request already resolved: {id} is {status}")
            }
            Conflict::StatusMismatch {
                id,
                expected,
                actual,
            } => write!(f, "request {id} is {actual}, expected {expected}"),
            Conflict::BedOccupied { bed_id } => write!(f, "bed already occupied: {bed_id}"),
            Conflict::CaseAlreadyHoused {
                case_id,
                occupancy_id,
            } => write!(
                f,
                "case already has an active bed: {case_id} (occupancy {occupancy_id})"
            ),
            Conflict::OccupancyReleased { id } => write!(f, "occupancy already released: {id}"),
        }
    }
}

/// Caller-facing error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    NotFound,
    Conflict,
    Internal,
}

#[derive(Debug)]
pub enum EngineError {
    Validation(String),
    NotFound(Entity, Ulid),
    AlreadyExists(Entity, Ulid),
    Conflict(Conflict),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::Validation(_) | EngineError::LimitExceeded(_) => ErrorClass::Validation,
            EngineError::NotFound(..) => ErrorClass::NotFound,
            EngineError::AlreadyExists(..) | EngineError::Conflict(_) => ErrorClass::Conflict,
            EngineError::WalError(_) => ErrorClass::Internal,
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }
}

impl From<Conflict> for EngineError {
    fn from(c: Conflict) -> Self {
        EngineError::Conflict(c)
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "validation failed: {msg}"),
            EngineError::NotFound(entity, id) => write!(f, "{} not found: {id}", entity.as_str()),
            EngineError::AlreadyExists(entity, id) => {
                write!(f, "{} already exists: {id}", entity.as_str())
            }
            EngineError::Conflict(c) => write!(f, "conflict: {c}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
