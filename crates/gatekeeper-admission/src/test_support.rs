use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{MembershipPlatform, PlatformError};

/// Platform double with scripted approval failures and admin lists.
#[derive(Default)]
pub(crate) struct ScriptedPlatform {
    failing_subjects: Mutex<HashSet<i64>>,
    admins: Mutex<HashMap<i64, HashSet<i64>>>,
    admin_lookup_fails: Mutex<bool>,
    approvals: Mutex<Vec<(i64, i64)>>,
    admin_checks: Mutex<Vec<(i64, i64)>>,
}

impl ScriptedPlatform {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_subject(&self, subject_id: i64) {
        self.failing_subjects
            .lock()
            .expect("failing subjects lock")
            .insert(subject_id);
    }

    pub(crate) fn clear_failures(&self) {
        self.failing_subjects
            .lock()
            .expect("failing subjects lock")
            .clear();
    }

    pub(crate) fn grant_admin(&self, destination_id: i64, principal_id: i64) {
        self.admins
            .lock()
            .expect("admins lock")
            .entry(destination_id)
            .or_default()
            .insert(principal_id);
    }

    pub(crate) fn fail_admin_lookups(&self) {
        *self.admin_lookup_fails.lock().expect("admin lookup lock") = true;
    }

    pub(crate) fn approvals(&self) -> Vec<(i64, i64)> {
        self.approvals.lock().expect("approvals lock").clone()
    }

    pub(crate) fn admin_checks(&self) -> Vec<(i64, i64)> {
        self.admin_checks.lock().expect("admin checks lock").clone()
    }
}

#[async_trait]
impl MembershipPlatform for ScriptedPlatform {
    async fn approve_join_request(
        &self,
        destination_id: i64,
        subject_id: i64,
    ) -> Result<(), PlatformError> {
        self.approvals
            .lock()
            .expect("approvals lock")
            .push((destination_id, subject_id));
        if self
            .failing_subjects
            .lock()
            .expect("failing subjects lock")
            .contains(&subject_id)
        {
            return Err(PlatformError::Rejected {
                operation: "approveChatJoinRequest",
                description: "Bad Request: HIDE_REQUESTER_MISSING".to_string(),
            });
        }
        Ok(())
    }

    async fn is_admin(
        &self,
        destination_id: i64,
        principal_id: i64,
    ) -> Result<bool, PlatformError> {
        self.admin_checks
            .lock()
            .expect("admin checks lock")
            .push((destination_id, principal_id));
        if *self.admin_lookup_fails.lock().expect("admin lookup lock") {
            return Err(PlatformError::Transport {
                operation: "getChatMember",
                message: "connection reset".to_string(),
            });
        }
        Ok(self
            .admins
            .lock()
            .expect("admins lock")
            .get(&destination_id)
            .is_some_and(|admins| admins.contains(&principal_id)))
    }
}
