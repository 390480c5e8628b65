use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — wall-clock time for audit stamps.
pub type Ms = i64;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Lifecycle of a bed check-in request.
///
/// `PENDING` is the only non-terminal state; every other state is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatus {
    Pending,
    Allocated,
    Denied,
    Deleted,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::Allocated => "ALLOCATED",
            RequestStatus::Denied => "DENIED",
            RequestStatus::Deleted => "DELETED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(RequestStatus::Pending),
            "ALLOCATED" => Ok(RequestStatus::Allocated),
            "DENIED" => Ok(RequestStatus::Denied),
            "DELETED" => Ok(RequestStatus::Deleted),
            other => Err(format!("unknown request status: {other}")),
        }
    }
}

/// The user on whose behalf a mutation runs. Recorded, never authenticated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    pub display_name: String,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
        }
    }

    /// Actor whose display name is the login name itself.
    pub fn from_login(user: &str) -> Self {
        Self::new(user, user)
    }
}

// ── Directory ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agency {
    pub id: Ulid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: Ulid,
    pub agency_id: Ulid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bed {
    pub id: Ulid,
    pub site_id: Ulid,
    pub agency_id: Ulid,
    pub name: String,
    pub room: Option<String>,
    pub bed_type: Option<String>,
    /// Case currently assigned; `None` means the bed is available.
    pub occupant: Option<Ulid>,
    /// Occupancy that set `occupant`.
    pub occupancy_id: Option<Ulid>,
}

impl Bed {
    pub fn is_available(&self) -> bool {
        self.occupant.is_none()
    }
}

/// A case as seen by the engine: its display name plus the network-wide
/// occupancy index entry. `active_occupancy` is the only place that decides
/// whether a case is housed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseState {
    pub id: Ulid,
    pub name: String,
    pub active_occupancy: Option<Ulid>,
}

impl CaseState {
    pub fn new(id: Ulid, name: String) -> Self {
        Self {
            id,
            name,
            active_occupancy: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseSummary {
    pub id: Ulid,
    pub name: String,
}

// ── Requests & occupancies ───────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BedCheckInRequest {
    pub id: Ulid,
    pub case_id: Ulid,
    pub agency_id: Ulid,
    pub site_id: Ulid,
    pub date_of_arrival: NaiveDate,
    pub notes: Option<String>,
    pub created_by: Actor,
    pub created_at: Ms,
    pub status: RequestStatus,
    pub denial_reason: Option<String>,
    /// Set when the request reaches `ALLOCATED`.
    pub occupancy_id: Option<Ulid>,
    /// Who resolved the request, and when.
    pub resolved_by: Option<Actor>,
    pub resolved_at: Option<Ms>,
}

/// Caller-supplied fields for a new request. Required references are optional
/// here so that their absence is reported as a validation error rather than
/// being unrepresentable at the boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewRequest {
    pub id: Option<Ulid>,
    pub case_id: Option<Ulid>,
    pub agency_id: Option<Ulid>,
    pub site_id: Option<Ulid>,
    pub date_of_arrival: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occupancy {
    pub id: Ulid,
    pub case_id: Ulid,
    pub bed_id: Ulid,
    pub site_id: Ulid,
    pub agency_id: Ulid,
    /// `None` for walk-ins.
    pub request_id: Option<Ulid>,
    pub check_in_date: NaiveDate,
    pub notes: Option<String>,
    pub created_by: Actor,
    pub created_at: Ms,
    pub released_at: Option<Ms>,
    pub released_by: Option<Actor>,
}

impl Occupancy {
    pub fn is_active(&self) -> bool {
        self.released_at.is_none()
    }
}

/// A guarded status change. The target status is implied by the variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Allocated { occupancy_id: Ulid },
    Denied { reason: String },
    Deleted,
}

impl Transition {
    pub fn target(&self) -> RequestStatus {
        match self {
            Transition::Allocated { .. } => RequestStatus::Allocated,
            Transition::Denied { .. } => RequestStatus::Denied,
            Transition::Deleted => RequestStatus::Deleted,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// Advisory answer to "is this case already housed somewhere?".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictReport {
    pub has_allocated_bed: bool,
    pub current_bed_assignment: Option<Occupancy>,
    pub is_cross_agency: bool,
}

impl ConflictReport {
    pub fn none() -> Self {
        Self {
            has_allocated_bed: false,
            current_bed_assignment: None,
            is_cross_agency: false,
        }
    }
}

/// A request with its read-time derived fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestView {
    pub request: BedCheckInRequest,
    pub case_name: Option<String>,
    pub agency_name: Option<String>,
    pub site_name: Option<String>,
    pub conflict: ConflictReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestScope {
    Site(Ulid),
    Agency(Ulid),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFilter {
    pub scope: RequestScope,
    pub status: Option<RequestStatus>,
    /// Zero-based.
    pub page: usize,
    pub page_size: Option<usize>,
}

impl RequestFilter {
    pub fn site(site_id: Ulid) -> Self {
        Self {
            scope: RequestScope::Site(site_id),
            status: None,
            page: 0,
            page_size: None,
        }
    }

    pub fn agency(agency_id: Ulid) -> Self {
        Self {
            scope: RequestScope::Agency(agency_id),
            status: None,
            page: 0,
            page_size: None,
        }
    }

    pub fn with_status(mut self, status: RequestStatus) -> Self {
        self.status = Some(status);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

/// The event types — flat, no nesting. This is the WAL record format.
///
/// Each variant is one atomic unit of work: replaying it either applies all of
/// its effects or (when truncated on disk) none of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    AgencyRegistered {
        id: Ulid,
        name: String,
    },
    SiteRegistered {
        id: Ulid,
        agency_id: Ulid,
        name: String,
    },
    BedRegistered {
        id: Ulid,
        site_id: Ulid,
        agency_id: Ulid,
        name: String,
        room: Option<String>,
        bed_type: Option<String>,
    },
    CaseRegistered {
        id: Ulid,
        name: String,
    },
    RequestCreated {
        request: BedCheckInRequest,
    },
    RequestDenied {
        id: Ulid,
        reason: String,
        actor: Actor,
        at: Ms,
    },
    RequestDeleted {
        id: Ulid,
        actor: Actor,
        at: Ms,
    },
    /// Occupancy creation, bed pointer update and (when `request_id` is set)
    /// the request's move to `ALLOCATED`.
    BedAllocated {
        occupancy: Occupancy,
    },
    OccupancyReleased {
        id: Ulid,
        actor: Actor,
        at: Ms,
    },
}
