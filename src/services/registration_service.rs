use std::sync::Arc;

use metrics::counter;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{Principal, Registration, RegistrationStatus, Semester};
use crate::store::{DormStore, NewRegistration};

pub struct RegistrationService {
    store: Arc<dyn DormStore>,
}

impl RegistrationService {
    pub fn new(store: Arc<dyn DormStore>) -> Self {
        Self { store }
    }

    /// Registers a student for a room (and optionally a specific bed). The
    /// slot is reserved here; a capacity conflict means nothing was
    /// persisted and the caller may retry with another slot.
    pub async fn register(
        &self,
        principal: &Principal,
        student_id: Uuid,
        room_id: Uuid,
        bed_id: Option<Uuid>,
        semester: Semester,
        note: Option<String>,
    ) -> Result<Registration> {
        if !principal.can_act_for(student_id) {
            return Err(AppError::Forbidden(
                "cannot register on behalf of another student".into(),
            ));
        }

        let registration = self
            .store
            .create_registration(NewRegistration {
                student_id,
                room_id,
                bed_id,
                semester,
                note,
            })
            .await?;

        counter!("registrations_total", "action" => "created").increment(1);
        tracing::info!(
            registration_id = %registration.id,
            student_id = %student_id,
            room_id = %room_id,
            semester = %semester,
            "registration created"
        );
        Ok(registration)
    }

    pub async fn confirm(&self, principal: &Principal, id: Uuid) -> Result<Registration> {
        principal.require_admin()?;
        let registration = self.store.confirm_registration(id).await?;
        counter!("registrations_total", "action" => "confirmed").increment(1);
        tracing::info!(registration_id = %id, "registration confirmed");
        Ok(registration)
    }

    pub async fn reject(
        &self,
        principal: &Principal,
        id: Uuid,
        note: Option<String>,
    ) -> Result<Registration> {
        principal.require_admin()?;
        let registration = self
            .store
            .close_registration(id, RegistrationStatus::Rejected, note)
            .await?;
        counter!("registrations_total", "action" => "rejected").increment(1);
        tracing::info!(registration_id = %id, "registration rejected");
        Ok(registration)
    }

    pub async fn cancel(&self, principal: &Principal, id: Uuid) -> Result<Registration> {
        let registration = self
            .store
            .registration(id)
            .await?
            .ok_or_else(|| AppError::NotFound("registration".into()))?;
        if !principal.can_act_for(registration.student_id) {
            return Err(AppError::Forbidden(
                "only the owner or an administrator can cancel".into(),
            ));
        }

        let registration = self
            .store
            .close_registration(id, RegistrationStatus::Cancelled, None)
            .await?;
        counter!("registrations_total", "action" => "cancelled").increment(1);
        tracing::info!(registration_id = %id, "registration cancelled");
        Ok(registration)
    }

    /// Extends a paid registration into the next semester on the same
    /// room/bed. The student's own current allocation is not a conflict;
    /// the extension shares that slot. Everything else goes through the
    /// normal reserve, so a slot claimed by someone else in the meantime
    /// fails the extension and nothing is persisted.
    pub async fn extend(&self, principal: &Principal, id: Uuid) -> Result<Registration> {
        let current = self
            .store
            .registration(id)
            .await?
            .ok_or_else(|| AppError::NotFound("registration".into()))?;
        if !principal.can_act_for(current.student_id) {
            return Err(AppError::Forbidden(
                "only the owner or an administrator can extend".into(),
            ));
        }
        if current.status != RegistrationStatus::Paid {
            return Err(AppError::Validation(format!(
                "only a paid registration can be extended, found {:?}",
                current.status
            )));
        }

        let next = self
            .store
            .create_registration(NewRegistration {
                student_id: current.student_id,
                room_id: current.room_id,
                bed_id: current.bed_id,
                semester: current.semester.next(),
                note: Some(format!("extension of {}", current.id)),
            })
            .await?;

        counter!("registrations_total", "action" => "extended").increment(1);
        tracing::info!(
            registration_id = %next.id,
            extends = %current.id,
            semester = %next.semester,
            "registration extended"
        );
        Ok(next)
    }
}
