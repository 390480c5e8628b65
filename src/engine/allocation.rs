use chrono::NaiveDate;
use tracing::{debug, info};
use ulid::Ulid;

use crate::model::*;
use crate::notify::DomainEvent;
use crate::observability::{ALLOCATIONS_TOTAL, CONFLICTS_TOTAL, RELEASES_TOTAL};

use super::store::{check_transition, parse_date, validate_actor, validate_notes};
use super::{
    apply_allocation, apply_release, Conflict, Engine, EngineError, Entity, SharedBed,
};

/// Count and log conflicts on their way out of the engine.
pub(super) fn observe_conflict<T>(result: Result<T, EngineError>) -> Result<T, EngineError> {
    if let Err(EngineError::Conflict(c)) = &result {
        debug!("rejected: {c}");
        metrics::counter!(CONFLICTS_TOTAL, "kind" => c.label()).increment(1);
    }
    result
}

fn parse_optional_date(raw: Option<&str>) -> Result<Option<NaiveDate>, EngineError> {
    match raw {
        Some(s) if !s.trim().is_empty() => parse_date("check_in_date", s).map(Some),
        _ => Ok(None),
    }
}

/// Bed and case exclusivity, checked against locked state at commit time.
fn check_exclusive(case: &CaseState, bed: &Bed) -> Result<(), EngineError> {
    if !bed.is_available() {
        return Err(Conflict::BedOccupied { bed_id: bed.id }.into());
    }
    if let Some(occupancy_id) = case.active_occupancy {
        return Err(Conflict::CaseAlreadyHoused {
            case_id: case.id,
            occupancy_id,
        }
        .into());
    }
    Ok(())
}

impl Engine {
    /// Turn a pending request into an occupancy of `bed_id`.
    ///
    /// Request status, bed pointer and case index change in one WAL record
    /// while the case, request and bed are all write-locked. Retrying after a
    /// success with the same bed returns the occupancy already created.
    pub async fn allocate(
        &self,
        request_id: Ulid,
        bed_id: Option<Ulid>,
        check_in_date: Option<&str>,
        notes: Option<String>,
        actor: Actor,
    ) -> Result<Occupancy, EngineError> {
        observe_conflict(
            self.allocate_inner(request_id, bed_id, check_in_date, notes, actor)
                .await,
        )
    }

    async fn allocate_inner(
        &self,
        request_id: Ulid,
        bed_id: Option<Ulid>,
        check_in_date: Option<&str>,
        notes: Option<String>,
        actor: Actor,
    ) -> Result<Occupancy, EngineError> {
        validate_actor(&actor)?;
        let check_in_date = parse_optional_date(check_in_date)?;
        let notes = validate_notes(notes)?;

        let handle = self.require_request(&request_id)?;
        let case_id = handle.read().await.case_id;

        let _gate = self.commit_gate.read().await;
        let case = self.require_case(&case_id)?;
        let mut case = case.write().await;
        let mut req = handle.write().await;

        if req.status == RequestStatus::Allocated
            && let Some(existing) = req.occupancy_id.and_then(|id| self.get_occupancy(&id))
        {
            if bed_id == Some(existing.bed_id) {
                debug!(%request_id, occupancy_id = %existing.id, "allocate replayed");
                return Ok(existing);
            }
            return Err(Conflict::RequestResolved {
                id: request_id,
                status: req.status,
            }
            .into());
        }

        let occupancy_id = Ulid::new();
        check_transition(
            &req,
            RequestStatus::Pending,
            &Transition::Allocated { occupancy_id },
        )?;
        let bed_id = bed_id.ok_or_else(|| EngineError::validation("bed selection is required"))?;
        let bed: SharedBed = self.require_bed(&bed_id)?;
        let mut bed = bed.write().await;
        if bed.site_id != req.site_id {
            return Err(EngineError::validation(format!(
                "bed {bed_id} is not at the requested site {}",
                req.site_id
            )));
        }
        check_exclusive(&case, &bed)?;

        let occupancy = Occupancy {
            id: occupancy_id,
            case_id,
            bed_id,
            site_id: bed.site_id,
            agency_id: bed.agency_id,
            request_id: Some(request_id),
            check_in_date: check_in_date.unwrap_or(req.date_of_arrival),
            notes,
            created_by: actor,
            created_at: now_ms(),
            released_at: None,
            released_by: None,
        };
        self.wal_append(&Event::BedAllocated {
            occupancy: occupancy.clone(),
        })
        .await?;
        apply_allocation(&mut case, Some(&mut req), &mut bed, &occupancy);
        self.occupancies.insert(occupancy.id, occupancy.clone());
        let requesting_agency = req.agency_id;
        drop(bed);
        drop(req);
        drop(case);

        self.notify.send(DomainEvent::RequestAllocated {
            request_id,
            occupancy_id,
            case_id,
            bed_id,
            agency_id: requesting_agency,
        });
        metrics::counter!(ALLOCATIONS_TOTAL, "kind" => "request").increment(1);
        info!(%request_id, %occupancy_id, %bed_id, %case_id, "bed allocated");
        Ok(occupancy)
    }

    /// Check a case straight into a bed without a prior request.
    pub async fn check_in_walk_in(
        &self,
        case_id: Ulid,
        bed_id: Ulid,
        check_in_date: &str,
        notes: Option<String>,
        actor: Actor,
    ) -> Result<Occupancy, EngineError> {
        observe_conflict(
            self.walk_in_inner(case_id, bed_id, check_in_date, notes, actor)
                .await,
        )
    }

    async fn walk_in_inner(
        &self,
        case_id: Ulid,
        bed_id: Ulid,
        check_in_date: &str,
        notes: Option<String>,
        actor: Actor,
    ) -> Result<Occupancy, EngineError> {
        validate_actor(&actor)?;
        let check_in_date = parse_optional_date(Some(check_in_date))?
            .ok_or_else(|| EngineError::validation("check_in_date is required"))?;
        let notes = validate_notes(notes)?;

        let _gate = self.commit_gate.read().await;
        let case = self.require_case(&case_id)?;
        let mut case = case.write().await;
        let bed = self.require_bed(&bed_id)?;
        let mut bed = bed.write().await;
        check_exclusive(&case, &bed)?;

        let occupancy = Occupancy {
            id: Ulid::new(),
            case_id,
            bed_id,
            site_id: bed.site_id,
            agency_id: bed.agency_id,
            request_id: None,
            check_in_date,
            notes,
            created_by: actor,
            created_at: now_ms(),
            released_at: None,
            released_by: None,
        };
        self.wal_append(&Event::BedAllocated {
            occupancy: occupancy.clone(),
        })
        .await?;
        apply_allocation(&mut case, None, &mut bed, &occupancy);
        self.occupancies.insert(occupancy.id, occupancy.clone());

        metrics::counter!(ALLOCATIONS_TOTAL, "kind" => "walk_in").increment(1);
        info!(occupancy_id = %occupancy.id, %bed_id, %case_id, "walk-in checked in");
        Ok(occupancy)
    }

    /// Check-out: frees the bed and clears the case from the occupancy index.
    pub async fn release_occupancy(
        &self,
        occupancy_id: Ulid,
        actor: Actor,
    ) -> Result<Occupancy, EngineError> {
        observe_conflict(self.release_inner(occupancy_id, actor).await)
    }

    async fn release_inner(&self, occupancy_id: Ulid, actor: Actor) -> Result<Occupancy, EngineError> {
        validate_actor(&actor)?;
        let _gate = self.commit_gate.read().await;
        let found = self
            .get_occupancy(&occupancy_id)
            .ok_or(EngineError::NotFound(Entity::Occupancy, occupancy_id))?;
        let case = self.require_case(&found.case_id)?;
        let mut case = case.write().await;
        let bed = self.require_bed(&found.bed_id)?;
        let mut bed = bed.write().await;

        // Re-read under the case lock; a concurrent release may have won.
        let mut occupancy = self
            .get_occupancy(&occupancy_id)
            .ok_or(EngineError::NotFound(Entity::Occupancy, occupancy_id))?;
        if !occupancy.is_active() {
            return Err(Conflict::OccupancyReleased { id: occupancy_id }.into());
        }

        let at = now_ms();
        self.wal_append(&Event::OccupancyReleased {
            id: occupancy_id,
            actor: actor.clone(),
            at,
        })
        .await?;
        apply_release(&mut case, &mut bed, &mut occupancy, &actor, at);
        self.occupancies.insert(occupancy_id, occupancy.clone());
        drop(bed);
        drop(case);

        self.notify.send(DomainEvent::OccupancyReleased {
            occupancy_id,
            case_id: occupancy.case_id,
            bed_id: occupancy.bed_id,
            agency_id: occupancy.agency_id,
        });
        metrics::counter!(RELEASES_TOTAL).increment(1);
        info!(%occupancy_id, bed_id = %occupancy.bed_id, "occupancy released");
        Ok(occupancy)
    }
}
