use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::RwLock;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::DomainEvent;

use super::{Conflict, Engine, EngineError, Entity};

/// Parse an ISO `YYYY-MM-DD` calendar date.
pub(super) fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, EngineError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| EngineError::validation(format!("{field} must be YYYY-MM-DD: {e}")))
}

pub(super) fn validate_notes(notes: Option<String>) -> Result<Option<String>, EngineError> {
    match notes {
        Some(n) if n.len() > MAX_NOTES_LEN => Err(EngineError::LimitExceeded("notes too long")),
        Some(n) if n.trim().is_empty() => Ok(None),
        other => Ok(other),
    }
}

pub(super) fn validate_actor(actor: &Actor) -> Result<(), EngineError> {
    if actor.user_id.trim().is_empty() {
        return Err(EngineError::validation("acting user is required"));
    }
    if actor.user_id.len() > MAX_ACTOR_LEN || actor.display_name.len() > MAX_ACTOR_LEN {
        return Err(EngineError::LimitExceeded("actor too long"));
    }
    Ok(())
}

/// The compare-and-swap guard every status change goes through.
pub(super) fn check_transition(
    request: &BedCheckInRequest,
    expected: RequestStatus,
    change: &Transition,
) -> Result<(), EngineError> {
    if request.status.is_terminal() {
        return Err(Conflict::RequestResolved {
            id: request.id,
            status: request.status,
        }
        .into());
    }
    if request.status != expected {
        return Err(Conflict::StatusMismatch {
            id: request.id,
            expected,
            actual: request.status,
        }
        .into());
    }
    if let Transition::Denied { reason } = change {
        validate_reason(reason)?;
    }
    Ok(())
}

pub(super) fn validate_reason(reason: &str) -> Result<(), EngineError> {
    if reason.trim().is_empty() {
        return Err(EngineError::validation("denial reason is required"));
    }
    if reason.len() > MAX_REASON_LEN {
        return Err(EngineError::LimitExceeded("denial reason too long"));
    }
    Ok(())
}

impl Engine {
    pub async fn create_request(
        &self,
        draft: NewRequest,
        actor: Actor,
    ) -> Result<BedCheckInRequest, EngineError> {
        validate_actor(&actor)?;
        let mut missing = Vec::new();
        if draft.case_id.is_none() {
            missing.push("case_id");
        }
        if draft.agency_id.is_none() {
            missing.push("agency_id");
        }
        if draft.site_id.is_none() {
            missing.push("site_id");
        }
        if draft.date_of_arrival.as_deref().is_none_or(|d| d.trim().is_empty()) {
            missing.push("date_of_arrival");
        }
        let (Some(case_id), Some(agency_id), Some(site_id), Some(raw_date)) = (
            draft.case_id,
            draft.agency_id,
            draft.site_id,
            draft.date_of_arrival.filter(|_| missing.is_empty()),
        ) else {
            return Err(EngineError::validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        };
        let date_of_arrival = parse_date("date_of_arrival", &raw_date)?;
        let notes = validate_notes(draft.notes)?;

        if !self.cases.contains_key(&case_id) {
            return Err(EngineError::NotFound(Entity::Case, case_id));
        }
        if !self.agencies.contains_key(&agency_id) {
            return Err(EngineError::NotFound(Entity::Agency, agency_id));
        }
        if !self.sites.contains_key(&site_id) {
            return Err(EngineError::NotFound(Entity::Site, site_id));
        }

        let _gate = self.commit_gate.read().await;
        let _registry = self.registry.lock().await;
        if self.requests.len() >= MAX_REQUESTS_PER_NETWORK {
            return Err(EngineError::LimitExceeded("too many requests in network"));
        }
        let id = draft.id.unwrap_or_else(Ulid::new);
        if self.requests.contains_key(&id) {
            return Err(EngineError::AlreadyExists(Entity::Request, id));
        }

        let request = BedCheckInRequest {
            id,
            case_id,
            agency_id,
            site_id,
            date_of_arrival,
            notes,
            created_by: actor,
            created_at: now_ms(),
            status: RequestStatus::Pending,
            denial_reason: None,
            occupancy_id: None,
            resolved_by: None,
            resolved_at: None,
        };
        self.wal_append(&Event::RequestCreated { request: request.clone() })
            .await?;
        self.requests
            .insert(id, Arc::new(RwLock::new(request.clone())));
        info!(%id, %case_id, %site_id, "bed request created");
        Ok(request)
    }

    pub async fn get_request(&self, id: Ulid) -> Result<BedCheckInRequest, EngineError> {
        let req = self.require_request(&id)?;
        let guard = req.read().await;
        Ok(guard.clone())
    }

    /// The request plus its derived fields, computed now rather than stored.
    pub async fn describe_request(&self, id: Ulid) -> Result<RequestView, EngineError> {
        let request = self.get_request(id).await?;
        self.view_of(request).await
    }

    async fn view_of(&self, request: BedCheckInRequest) -> Result<RequestView, EngineError> {
        let conflict = self
            .detect_conflict(request.case_id, request.agency_id)
            .await?;
        let case_name = self.get_case_summary(&request.case_id).await.ok().map(|c| c.name);
        Ok(RequestView {
            case_name,
            agency_name: self.agency_name(&request.agency_id),
            site_name: self.site_name(&request.site_id),
            conflict,
            request,
        })
    }

    /// Requests for one site or agency, newest first. `DELETED` requests only
    /// show up when the filter asks for them.
    pub async fn list_requests(
        &self,
        filter: &RequestFilter,
    ) -> Result<Page<RequestView>, EngineError> {
        let page_size = filter.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page_size == 0 {
            return Err(EngineError::validation("page_size must be positive"));
        }
        if page_size > MAX_PAGE_SIZE {
            return Err(EngineError::LimitExceeded("page_size too large"));
        }

        let handles: Vec<_> = self.requests.iter().map(|e| e.value().clone()).collect();
        let mut matching = Vec::new();
        for handle in handles {
            let req = handle.read().await;
            let in_scope = match filter.scope {
                RequestScope::Site(id) => req.site_id == id,
                RequestScope::Agency(id) => req.agency_id == id,
            };
            let status_ok = match filter.status {
                Some(status) => req.status == status,
                None => req.status != RequestStatus::Deleted,
            };
            if in_scope && status_ok {
                matching.push(req.clone());
            }
        }
        matching.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));

        let total = matching.len();
        let mut items = Vec::new();
        for request in matching
            .into_iter()
            .skip(filter.page.saturating_mul(page_size))
            .take(page_size)
        {
            items.push(self.view_of(request).await?);
        }
        Ok(Page {
            items,
            total,
            page: filter.page,
            page_size,
        })
    }

    /// Guarded status change: fails with a conflict unless the stored status
    /// equals `expected`. `ALLOCATED` is only reachable through `allocate`,
    /// which creates the occupancy in the same commit.
    pub async fn transition(
        &self,
        id: Ulid,
        expected: RequestStatus,
        change: Transition,
        actor: Actor,
    ) -> Result<BedCheckInRequest, EngineError> {
        super::allocation::observe_conflict(self.transition_inner(id, expected, change, actor).await)
    }

    async fn transition_inner(
        &self,
        id: Ulid,
        expected: RequestStatus,
        change: Transition,
        actor: Actor,
    ) -> Result<BedCheckInRequest, EngineError> {
        if matches!(change, Transition::Allocated { .. }) {
            return Err(EngineError::validation(
                "ALLOCATED is reached only by allocating a bed",
            ));
        }
        validate_actor(&actor)?;
        let _gate = self.commit_gate.read().await;
        let handle = self.require_request(&id)?;
        let mut req = handle.write().await;
        check_transition(&req, expected, &change)?;

        let at = now_ms();
        let event = match &change {
            Transition::Denied { reason } => Event::RequestDenied {
                id,
                reason: reason.clone(),
                actor: actor.clone(),
                at,
            },
            Transition::Deleted => Event::RequestDeleted {
                id,
                actor: actor.clone(),
                at,
            },
            Transition::Allocated { .. } => unreachable!("rejected above"),
        };
        self.wal_append(&event).await?;
        super::apply_resolution(&mut req, &change, &actor, at);

        let notice = match change {
            Transition::Denied { reason } => DomainEvent::RequestDenied {
                request_id: id,
                case_id: req.case_id,
                agency_id: req.agency_id,
                reason,
            },
            _ => DomainEvent::RequestDeleted {
                request_id: id,
                case_id: req.case_id,
                agency_id: req.agency_id,
            },
        };
        let resolved = req.clone();
        drop(req);
        self.notify.send(notice);
        info!(%id, status = %resolved.status, "bed request resolved");
        Ok(resolved)
    }
}
