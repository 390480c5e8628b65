use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError, Entity};

pub(super) fn validate_name(field: &str, name: &str) -> Result<String, EngineError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(EngineError::validation(format!("{field} is required")));
    }
    if trimmed.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(trimmed.to_string())
}

fn validate_optional_name(field: &str, value: Option<String>) -> Result<Option<String>, EngineError> {
    match value {
        Some(v) if !v.trim().is_empty() => validate_name(field, &v).map(Some),
        _ => Ok(None),
    }
}

/// Inventory sync from the external agency, site, bed and case directories.
impl Engine {
    pub async fn register_agency(&self, id: Ulid, name: String) -> Result<(), EngineError> {
        let name = validate_name("agency name", &name)?;
        let _gate = self.commit_gate.read().await;
        let _registry = self.registry.lock().await;
        if self.agencies.contains_key(&id) {
            return Err(EngineError::AlreadyExists(Entity::Agency, id));
        }
        self.wal_append(&Event::AgencyRegistered { id, name: name.clone() })
            .await?;
        self.agencies.insert(id, Agency { id, name });
        Ok(())
    }

    pub async fn register_site(
        &self,
        id: Ulid,
        agency_id: Ulid,
        name: String,
    ) -> Result<(), EngineError> {
        let name = validate_name("site name", &name)?;
        let _gate = self.commit_gate.read().await;
        let _registry = self.registry.lock().await;
        if self.sites.contains_key(&id) {
            return Err(EngineError::AlreadyExists(Entity::Site, id));
        }
        if !self.agencies.contains_key(&agency_id) {
            return Err(EngineError::NotFound(Entity::Agency, agency_id));
        }
        let event = Event::SiteRegistered { id, agency_id, name: name.clone() };
        self.wal_append(&event).await?;
        self.sites.insert(id, Site { id, agency_id, name });
        Ok(())
    }

    /// Register a bed at a site. The bed inherits the site's agency.
    pub async fn register_bed(
        &self,
        id: Ulid,
        site_id: Ulid,
        name: String,
        room: Option<String>,
        bed_type: Option<String>,
    ) -> Result<(), EngineError> {
        let name = validate_name("bed name", &name)?;
        let room = validate_optional_name("room", room)?;
        let bed_type = validate_optional_name("bed type", bed_type)?;
        let _gate = self.commit_gate.read().await;
        let _registry = self.registry.lock().await;
        if self.beds.len() >= MAX_BEDS_PER_NETWORK {
            return Err(EngineError::LimitExceeded("too many beds in network"));
        }
        if self.beds.contains_key(&id) {
            return Err(EngineError::AlreadyExists(Entity::Bed, id));
        }
        let agency_id = self
            .sites
            .get(&site_id)
            .map(|s| s.agency_id)
            .ok_or(EngineError::NotFound(Entity::Site, site_id))?;

        let event = Event::BedRegistered {
            id,
            site_id,
            agency_id,
            name: name.clone(),
            room: room.clone(),
            bed_type: bed_type.clone(),
        };
        self.wal_append(&event).await?;
        let bed = Bed {
            id,
            site_id,
            agency_id,
            name,
            room,
            bed_type,
            occupant: None,
            occupancy_id: None,
        };
        self.beds.insert(id, Arc::new(RwLock::new(bed)));
        debug!(%id, %site_id, "bed registered");
        Ok(())
    }

    pub async fn register_case(&self, id: Ulid, name: String) -> Result<(), EngineError> {
        let name = validate_name("case name", &name)?;
        let _gate = self.commit_gate.read().await;
        let _registry = self.registry.lock().await;
        if self.cases.contains_key(&id) {
            return Err(EngineError::AlreadyExists(Entity::Case, id));
        }
        self.wal_append(&Event::CaseRegistered { id, name: name.clone() })
            .await?;
        self.cases
            .insert(id, Arc::new(RwLock::new(CaseState::new(id, name))));
        Ok(())
    }

    pub fn agency_name(&self, id: &Ulid) -> Option<String> {
        self.agencies.get(id).map(|a| a.name.clone())
    }

    pub fn site_name(&self, id: &Ulid) -> Option<String> {
        self.sites.get(id).map(|s| s.name.clone())
    }

    pub async fn get_case_summary(&self, id: &Ulid) -> Result<CaseSummary, EngineError> {
        let case = self.require_case(id)?;
        let guard = case.read().await;
        Ok(CaseSummary {
            id: guard.id,
            name: guard.name.clone(),
        })
    }

    pub async fn bed_snapshot(&self, id: &Ulid) -> Result<Bed, EngineError> {
        let bed = self.require_bed(id)?;
        let guard = bed.read().await;
        Ok(guard.clone())
    }

    /// Beds at a site that can take a check-in right now, by room then name.
    pub async fn list_available_beds(&self, site_id: Ulid) -> Result<Vec<Bed>, EngineError> {
        if !self.sites.contains_key(&site_id) {
            return Err(EngineError::NotFound(Entity::Site, site_id));
        }
        let beds: Vec<_> = self.beds.iter().map(|e| e.value().clone()).collect();
        let mut available = Vec::new();
        for bed in beds {
            let guard = bed.read().await;
            if guard.site_id == site_id && guard.is_available() {
                available.push(guard.clone());
            }
        }
        available.sort_by(|a, b| (&a.room, &a.name, a.id).cmp(&(&b.room, &b.name, b.id)));
        Ok(available)
    }
}
