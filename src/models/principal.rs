use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Student,
}

/// The authenticated caller, passed explicitly into every core operation.
/// Session issuance and validation happen outside this crate; the core
/// never reads ambient state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub role: Role,
    pub student_id: Option<Uuid>,
}

impl Principal {
    pub fn admin() -> Self {
        Self {
            role: Role::Admin,
            student_id: None,
        }
    }

    pub fn student(student_id: Uuid) -> Self {
        Self {
            role: Role::Student,
            student_id: Some(student_id),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_admin(&self) -> Result<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden("administrator role required".into()))
        }
    }

    /// The student this principal acts as; admins cannot use student-only
    /// operations without a student identity.
    pub fn acting_student(&self) -> Result<Uuid> {
        self.student_id
            .ok_or_else(|| AppError::Forbidden("a student identity is required".into()))
    }

    /// Whether this principal may act on resources owned by `student_id`.
    pub fn can_act_for(&self, student_id: Uuid) -> bool {
        self.is_admin() || self.student_id == Some(student_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn students_cannot_pass_admin_checks() {
        let p = Principal::student(Uuid::new_v4());
        assert!(p.require_admin().is_err());
        assert!(Principal::admin().require_admin().is_ok());
    }

    #[test]
    fn ownership_checks() {
        let id = Uuid::new_v4();
        assert!(Principal::student(id).can_act_for(id));
        assert!(!Principal::student(id).can_act_for(Uuid::new_v4()));
        assert!(Principal::admin().can_act_for(id));
    }
}
