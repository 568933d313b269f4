//! # Membership Ledger
//!
//! Per-instance roster operations. Every function takes the caller's open
//! transaction and reads fresh state through it; nothing is cached between
//! calls.
//!
//! Owners carry no progress status and are excluded from the contributor
//! set, so they can neither complete a stage nor hold one open.

use crate::store::{LedgerRead, LedgerWrite};
use crate::{FootprintError, InstanceId, Member, ProgressStatus, ProjectInstance, Role, UserId};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Contributor completion count for one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StageProgress {
    pub completed: usize,
    pub total: usize,
}

impl StageProgress {
    /// True when there is at least one contributor and all are done.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.total > 0 && self.completed == self.total
    }
}

/// Roster operations over a transaction handle.
#[derive(Debug, Clone, Copy, Default)]
pub struct MembershipLedger;

impl MembershipLedger {
    /// Mark `user` as done with the current stage of `instance`.
    ///
    /// Owners and non-members are rejected. Returns the stored member row.
    pub fn record_completion<T: LedgerWrite + ?Sized>(
        txn: &mut T,
        instance: InstanceId,
        user: UserId,
    ) -> Result<Member, FootprintError> {
        let mut member = txn
            .member(instance, user)?
            .ok_or(FootprintError::NotAMember { instance, user })?;
        if !member.role.is_contributor() {
            return Err(FootprintError::OwnerCannotComplete { instance, user });
        }
        if member.advance_to(ProgressStatus::StageComplete) {
            txn.put_member(&member)?;
        }
        Ok(member)
    }

    /// Non-owner members of `instance`.
    pub fn contributors<T: LedgerRead + ?Sized>(
        txn: &T,
        instance: InstanceId,
    ) -> Result<Vec<Member>, FootprintError> {
        Ok(txn
            .members(instance)?
            .into_iter()
            .filter(|member| member.role.is_contributor())
            .collect())
    }

    pub fn progress<T: LedgerRead + ?Sized>(
        txn: &T,
        instance: InstanceId,
    ) -> Result<StageProgress, FootprintError> {
        let contributors = Self::contributors(txn, instance)?;
        Ok(StageProgress {
            completed: contributors
                .iter()
                .filter(|member| member.is_stage_complete())
                .count(),
            total: contributors.len(),
        })
    }

    /// True iff there is at least one contributor and every contributor is
    /// `StageComplete`.
    pub fn all_contributors_complete<T: LedgerRead + ?Sized>(
        txn: &T,
        instance: InstanceId,
    ) -> Result<bool, FootprintError> {
        Ok(Self::progress(txn, instance)?.is_complete())
    }

    /// Carry every member of `from` onto `to` with the same role.
    ///
    /// The completing user (if any) starts `InProgress`, other contributors
    /// `NotStarted`, owners with no status. Rows that already exist on `to`
    /// take the role from `from` and keep the higher of their current and
    /// incoming status. Returns the
    /// number of members carried.
    pub fn migrate<T: LedgerWrite + ?Sized>(
        txn: &mut T,
        from: InstanceId,
        to: InstanceId,
        completing: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Result<usize, FootprintError> {
        let members = txn.members(from)?;
        for old in &members {
            let incoming = if Some(old.user_id) == completing {
                ProgressStatus::InProgress
            } else {
                ProgressStatus::NotStarted
            };
            let mut row = match txn.member(to, old.user_id)? {
                Some(mut existing) => {
                    existing.role = old.role;
                    existing
                }
                None => Member::new(to, old.user_id, old.role, now),
            };
            row.advance_to(incoming);
            txn.put_member(&row)?;
        }
        Ok(members.len())
    }

    /// Add `user` to an open instance on `inviter`'s authority.
    ///
    /// Owners and leaders may invite; only owners may add another owner.
    pub fn add_member<T: LedgerWrite + ?Sized>(
        txn: &mut T,
        instance: &ProjectInstance,
        inviter: UserId,
        user: UserId,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<Member, FootprintError> {
        instance.ensure_active()?;
        let id = instance.instance_id;
        let authority = txn.member(id, inviter)?.ok_or(FootprintError::NotAMember {
            instance: id,
            user: inviter,
        })?;
        if !authority.role.can_invite() {
            return Err(FootprintError::NotPermitted {
                instance: id,
                user: inviter,
                action: "add members",
            });
        }
        if role == Role::Owner && authority.role != Role::Owner {
            return Err(FootprintError::NotPermitted {
                instance: id,
                user: inviter,
                action: "add owners",
            });
        }
        if txn.member(id, user)?.is_some() {
            return Err(FootprintError::AlreadyMember { instance: id, user });
        }
        let member = Member::new(id, user, role, now);
        txn.put_member(&member)?;
        Ok(member)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Store};

    fn seed(store: &MemoryStore, instance: u64, members: &[(u64, Role)]) {
        let now = Utc::now();
        store
            .write(|txn| {
                for (user, role) in members {
                    txn.put_member(&Member::new(InstanceId(instance), UserId(*user), *role, now))?;
                }
                Ok(())
            })
            .expect("seed members");
    }

    #[test]
    fn empty_contributor_set_is_not_complete() {
        let store = MemoryStore::new();
        seed(&store, 1, &[(1, Role::Owner)]);
        let done = store
            .read(|txn| MembershipLedger::all_contributors_complete(txn, InstanceId(1)))
            .expect("read");
        assert!(!done);
    }

    #[test]
    fn owner_completion_rejected_without_write() {
        let store = MemoryStore::new();
        seed(&store, 1, &[(1, Role::Owner), (2, Role::Member)]);
        let result = store.write(|txn| {
            MembershipLedger::record_completion(txn, InstanceId(1), UserId(1))
        });
        assert!(matches!(
            result,
            Err(FootprintError::OwnerCannotComplete { .. })
        ));
        let owner = store
            .read(|txn| txn.member(InstanceId(1), UserId(1)))
            .expect("read")
            .expect("owner row");
        assert_eq!(owner.progress_status, None);
    }

    #[test]
    fn non_member_completion_rejected() {
        let store = MemoryStore::new();
        seed(&store, 1, &[(2, Role::Member)]);
        let result = store.write(|txn| {
            MembershipLedger::record_completion(txn, InstanceId(1), UserId(7))
        });
        assert!(matches!(result, Err(FootprintError::NotAMember { .. })));
    }

    #[test]
    fn progress_counts_only_contributors() {
        let store = MemoryStore::new();
        seed(
            &store,
            1,
            &[(1, Role::Owner), (2, Role::Leader), (3, Role::Member)],
        );
        store
            .write(|txn| MembershipLedger::record_completion(txn, InstanceId(1), UserId(2)))
            .expect("complete");
        let progress = store
            .read(|txn| MembershipLedger::progress(txn, InstanceId(1)))
            .expect("read");
        assert_eq!(
            progress,
            StageProgress {
                completed: 1,
                total: 2
            }
        );
        assert!(!progress.is_complete());
    }

    #[test]
    fn migrate_sets_statuses_and_keeps_roles() {
        let store = MemoryStore::new();
        seed(
            &store,
            1,
            &[(1, Role::Owner), (2, Role::Member), (3, Role::Member)],
        );
        let moved = store
            .write(|txn| {
                MembershipLedger::migrate(txn, InstanceId(1), InstanceId(2), Some(UserId(3)), Utc::now())
            })
            .expect("migrate");
        assert_eq!(moved, 3);

        let members = store.read(|txn| txn.members(InstanceId(2))).expect("read");
        let status = |user: u64| {
            members
                .iter()
                .find(|m| m.user_id == UserId(user))
                .map(|m| (m.role, m.progress_status))
        };
        assert_eq!(status(1), Some((Role::Owner, None)));
        assert_eq!(
            status(2),
            Some((Role::Member, Some(ProgressStatus::NotStarted)))
        );
        assert_eq!(
            status(3),
            Some((Role::Member, Some(ProgressStatus::InProgress)))
        );
    }

    #[test]
    fn migrate_carries_role_onto_existing_rows() {
        let store = MemoryStore::new();
        seed(&store, 1, &[(2, Role::Member), (3, Role::Leader)]);
        store
            .write(|txn| {
                txn.put_member(&Member::new(InstanceId(2), UserId(2), Role::Leader, Utc::now()))?;
                txn.put_member(&Member::new(InstanceId(2), UserId(3), Role::Owner, Utc::now()))
            })
            .expect("seed target");

        store
            .write(|txn| {
                MembershipLedger::migrate(txn, InstanceId(1), InstanceId(2), None, Utc::now())
            })
            .expect("migrate");
        let row = |user: u64| {
            store
                .read(|txn| txn.member(InstanceId(2), UserId(user)))
                .expect("read")
                .expect("row")
        };
        assert_eq!(row(2).role, Role::Member);
        assert_eq!(row(2).progress_status, Some(ProgressStatus::NotStarted));
        assert_eq!(row(3).role, Role::Leader);
        assert_eq!(row(3).progress_status, Some(ProgressStatus::NotStarted));
    }

    #[test]
    fn migrate_never_regresses_existing_rows() {
        let store = MemoryStore::new();
        seed(&store, 1, &[(2, Role::Member)]);
        store
            .write(|txn| {
                let mut row = Member::new(InstanceId(2), UserId(2), Role::Member, Utc::now());
                row.advance_to(ProgressStatus::StageComplete);
                txn.put_member(&row)
            })
            .expect("seed target");

        store
            .write(|txn| {
                MembershipLedger::migrate(txn, InstanceId(1), InstanceId(2), None, Utc::now())
            })
            .expect("migrate");
        let row = store
            .read(|txn| txn.member(InstanceId(2), UserId(2)))
            .expect("read")
            .expect("row");
        assert_eq!(row.progress_status, Some(ProgressStatus::StageComplete));
    }
}
