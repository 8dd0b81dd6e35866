//! Group membership: who may read and write in which study-group room.
//!
//! The chat subsystem only ever reads membership. The join/leave mutation
//! surface on [`GroupDirectory`] stands in for the external collaborator
//! that owns it; membership can change through it at any time, including
//! while a connection is already admitted to a room.

use std::collections::HashSet;

use dashmap::DashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GroupError {
    #[error("group not found")]
    NotFound,
    #[error("group is full")]
    Full,
    #[error("already a member")]
    AlreadyMember,
}

/// Read surface queried by the gateway before every room operation.
pub trait MembershipAuthority: Send + Sync {
    fn is_member(&self, group_id: &str, user_id: &str) -> bool;
}

struct GroupEntry {
    members: HashSet<String>,
    max_capacity: Option<usize>,
}

/// In-memory group registry backing the membership authority.
#[derive(Default)]
pub struct GroupDirectory {
    groups: DashMap<String, GroupEntry>,
}

impl GroupDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, group_id: impl Into<String>, max_capacity: Option<usize>) {
        self.groups.insert(
            group_id.into(),
            GroupEntry {
                members: HashSet::new(),
                max_capacity,
            },
        );
    }

    pub fn add_member(&self, group_id: &str, user_id: &str) -> Result<(), GroupError> {
        let mut group = self.groups.get_mut(group_id).ok_or(GroupError::NotFound)?;
        if let Some(cap) = group.max_capacity {
            if group.members.len() >= cap {
                return Err(GroupError::Full);
            }
        }
        if !group.members.insert(user_id.to_string()) {
            return Err(GroupError::AlreadyMember);
        }
        Ok(())
    }

    pub fn remove_member(&self, group_id: &str, user_id: &str) -> Result<(), GroupError> {
        let mut group = self.groups.get_mut(group_id).ok_or(GroupError::NotFound)?;
        group.members.remove(user_id);
        Ok(())
    }
}

impl MembershipAuthority for GroupDirectory {
    fn is_member(&self, group_id: &str, user_id: &str) -> bool {
        self.groups
            .get(group_id)
            .map(|g| g.members.contains(user_id))
            .unwrap_or(false)
    }

}
