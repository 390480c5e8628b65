use ulid::Ulid;

use crate::model::*;

use super::store::validate_reason;
use super::{Engine, EngineError};

impl Engine {
    /// Refuse a pending request. A reason is always required for the audit
    /// trail, and is checked before the request's state is looked at.
    pub async fn deny(
        &self,
        request_id: Ulid,
        reason: &str,
        actor: Actor,
    ) -> Result<BedCheckInRequest, EngineError> {
        validate_reason(reason)?;
        self.transition(
            request_id,
            RequestStatus::Pending,
            Transition::Denied {
                reason: reason.trim().to_string(),
            },
            actor,
        )
        .await
    }

    /// Withdraw a request that was made in error. The record is kept as a
    /// `DELETED` tombstone so the transition stays auditable.
    pub async fn remove(
        &self,
        request_id: Ulid,
        actor: Actor,
    ) -> Result<BedCheckInRequest, EngineError> {
        self.transition(request_id, RequestStatus::Pending, Transition::Deleted, actor)
            .await
    }
}
