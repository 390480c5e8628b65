use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

/// Build the advisory report from a case's active occupancy, if any.
pub(super) fn report_for(active: Option<Occupancy>, requesting_agency_id: Ulid) -> ConflictReport {
    match active {
        Some(occupancy) => ConflictReport {
            has_allocated_bed: true,
            is_cross_agency: occupancy.agency_id != requesting_agency_id,
            current_bed_assignment: Some(occupancy),
        },
        None => ConflictReport::none(),
    }
}

impl Engine {
    /// Is this case already housed somewhere in the network, and if so, by a
    /// different agency than the one asking? Read-only and never cached: the
    /// answer can change between display and commit, which is why `allocate`
    /// re-checks the case index under its own locks.
    pub async fn detect_conflict(
        &self,
        case_id: Ulid,
        requesting_agency_id: Ulid,
    ) -> Result<ConflictReport, EngineError> {
        let case = self.require_case(&case_id)?;
        let active = case.read().await.active_occupancy;
        let occupancy = active.and_then(|id| self.get_occupancy(&id));
        Ok(report_for(occupancy, requesting_agency_id))
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn occupancy_at(agency_id: Ulid) -> Occupancy {
        Occupancy {
            id: Ulid::new(),
            case_id: Ulid::new(),
            bed_id: Ulid::new(),
            site_id: Ulid::new(),
            agency_id,
            request_id: None,
            check_in_date: NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
            notes: None,
            created_by: Actor::from_login("intake"),
            created_at: 0,
            released_at: None,
            released_by: None,
        }
    }

    #[test]
    fn no_occupancy_no_conflict() {
        assert_eq!(report_for(None, Ulid::new()), ConflictReport::none());
    }

    #[test]
    fn same_agency_is_not_cross_agency() {
        let agency = Ulid::new();
        let report = report_for(Some(occupancy_at(agency)), agency);
        assert!(report.has_allocated_bed);
        assert!(!report.is_cross_agency);
        assert!(report.current_bed_assignment.is_some());
    }

    #[test]
    fn other_agency_is_cross_agency() {
        let report = report_for(Some(occupancy_at(Ulid::new())), Ulid::new());
        assert!(report.has_allocated_bed);
        assert!(report.is_cross_agency);
    }
}
