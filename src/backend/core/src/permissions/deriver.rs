//! The permission deriver: a pure function of identity, profile and event.

use serde::Deserialize;

use super::{can, is, special, PermissionSet};
use crate::events::{ApplicationStatus, EventSnapshot, EventStatus, EventType, ParticipantStatus};
use crate::identity::{Identity, MemberId, Profile};

/// Well-known role ids. An unset role is never held by anyone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RoleConfig {
    #[serde(default)]
    pub super_admin: Option<String>,

    #[serde(default)]
    pub su_admin: Option<String>,

    #[serde(default)]
    pub statutory_admin: Option<String>,

    #[serde(default)]
    pub non_statutory_admin: Option<String>,
}

/// Derives [`PermissionSet`]s. Holds only the role configuration, so one
/// instance is shared by all requests.
#[derive(Debug, Clone, Default)]
pub struct PermissionDeriver {
    super_admin: Option<MemberId>,
    su_admin: Option<MemberId>,
    statutory_admin: Option<MemberId>,
    non_statutory_admin: Option<MemberId>,
}

/// Admin-tier facts, the inputs to `can.approve` and `can.view_participants`.
#[derive(Debug, Clone, Copy, Default)]
struct AdminFacts {
    superadmin: bool,
    su_admin: bool,
    statutory_admin: bool,
    non_statutory_admin: bool,
}

impl AdminFacts {
    /// Whether the caller administers events of this type.
    fn administers(&self, event_type: &EventType) -> bool {
        match event_type {
            EventType::NonStatutory => self.non_statutory_admin,
            EventType::Su => self.su_admin,
            EventType::Statutory => self.statutory_admin,
            EventType::Local | EventType::Other(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct EventFacts {
    organizer: bool,
    participant: bool,
    accepted_participant: bool,
    own_antenna: bool,
    boardmember: bool,
}

impl PermissionDeriver {
    pub fn new(roles: &RoleConfig) -> Self {
        let id = |role: &Option<String>| {
            role.as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(MemberId::from)
        };

        Self {
            super_admin: id(&roles.super_admin),
            su_admin: id(&roles.su_admin),
            statutory_admin: id(&roles.statutory_admin),
            non_statutory_admin: id(&roles.non_statutory_admin),
        }
    }

    /// Derive a fresh permission set.
    pub fn derive(
        &self,
        identity: &Identity,
        profile: Option<&Profile>,
        event: Option<&EventSnapshot>,
    ) -> PermissionSet {
        self.derive_onto(PermissionSet::new(), identity, profile, event)
    }

    /// Derive on top of a previously computed set.
    ///
    /// Flags this deriver knows about are recomputed. `is.superadmin` always
    /// comes from the identity and, when present, the profile. The other
    /// admin-tier flags can only be recomputed with a profile and otherwise
    /// keep their prior value. Unknown flags and labels are carried over
    /// untouched.
    pub fn derive_onto(
        &self,
        prior: PermissionSet,
        identity: &Identity,
        profile: Option<&Profile>,
        event: Option<&EventSnapshot>,
    ) -> PermissionSet {
        let mut set = prior;

        let admin = self.admin_facts(&set, identity, profile);
        set.set_is(is::SUPERADMIN, admin.superadmin);
        set.set_is(is::SU_ADMIN, admin.su_admin);
        set.set_is(is::STATUTORY_ADMIN, admin.statutory_admin);
        set.set_is(is::NON_STATUTORY_ADMIN, admin.non_statutory_admin);

        let facts = event
            .map(|e| Self::event_facts(identity, profile, e))
            .unwrap_or_default();
        set.set_is(is::ORGANIZER, facts.organizer);
        set.set_is(is::PARTICIPANT, facts.participant);
        set.set_is(is::ACCEPTED_PARTICIPANT, facts.accepted_participant);
        set.set_is(is::OWN_ANTENNA, facts.own_antenna);
        set.set_is(is::BOARDMEMBER, facts.boardmember);

        match event {
            Some(event) => Self::capabilities(&mut set, &admin, &facts, event),
            None => {
                for flag in can::ALL {
                    set.set_can(flag, false);
                }
            }
        }

        set.special
            .retain(|label| label != special::ORGANIZER && label != special::BOARD_MEMBER);
        if facts.organizer {
            set.special.push(special::ORGANIZER.to_string());
        }
        if facts.boardmember {
            set.special.push(special::BOARD_MEMBER.to_string());
        }

        set
    }

    fn admin_facts(&self, prior: &PermissionSet, identity: &Identity, profile: Option<&Profile>) -> AdminFacts {
        let holds = |role: &Option<MemberId>, flag: &str| match profile {
            Some(profile) => role.as_ref().map(|r| profile.has_role(r)).unwrap_or(false),
            None => prior.is(flag),
        };

        let super_role = match (profile, &self.super_admin) {
            (Some(profile), Some(role)) => profile.has_role(role),
            _ => false,
        };

        AdminFacts {
            superadmin: identity.is_superadmin || super_role,
            su_admin: holds(&self.su_admin, is::SU_ADMIN),
            statutory_admin: holds(&self.statutory_admin, is::STATUTORY_ADMIN),
            non_statutory_admin: holds(&self.non_statutory_admin, is::NON_STATUTORY_ADMIN),
        }
    }

    fn event_facts(identity: &Identity, profile: Option<&Profile>, event: &EventSnapshot) -> EventFacts {
        let organizer = event.is_organizer(&identity.id);

        let application = event.application_of(&identity.id);
        let participant = application.is_some();
        let accepted_participant = application
            .map(|a| a.application_status == ParticipantStatus::Accepted)
            .unwrap_or(false);

        let own_antenna = identity
            .antenna_id
            .as_ref()
            .map(|antenna| event.is_organizing_local(antenna))
            .unwrap_or(false);

        let boardmember = own_antenna && profile.map(Profile::is_board_member).unwrap_or(false);

        EventFacts {
            organizer,
            participant,
            accepted_participant,
            own_antenna,
            boardmember,
        }
    }

    fn capabilities(set: &mut PermissionSet, admin: &AdminFacts, facts: &EventFacts, event: &EventSnapshot) {
        let applications_closed = event.application_status == ApplicationStatus::Closed;
        let applications_open = event.application_status == ApplicationStatus::Open;
        let draft = event.status == EventStatus::Draft;
        let approved = event.status == EventStatus::Approved;

        let edit_details = (facts.organizer && applications_closed && draft) || admin.superadmin;
        let edit_application_status = (facts.organizer && approved) || admin.superadmin;
        let approve = admin.superadmin
            || admin.administers(&event.event_type)
            || (facts.boardmember && event.event_type == EventType::Local);
        let view_participants = facts.organizer
            || facts.accepted_participant
            || facts.boardmember
            || admin.superadmin
            || admin.administers(&event.event_type);

        set.set_can(can::EDIT_ORGANIZERS, facts.organizer);
        set.set_can(can::EDIT_DETAILS, edit_details);
        set.set_can(can::EDIT_APPLICATION_STATUS, edit_application_status);
        set.set_can(can::APPROVE, approve);
        set.set_can(can::EDIT, edit_details || edit_application_status || approve);
        set.set_can(can::APPLY, !facts.organizer && applications_open);
        set.set_can(can::APPROVE_PARTICIPANTS, facts.organizer && applications_closed);
        set.set_can(can::VIEW_PARTICIPANTS, view_participants);
        set.set_can(can::DELETE, draft && edit_details);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{BoardPosition, RoleRef};

    fn roles() -> RoleConfig {
        RoleConfig {
            super_admin: Some("1".to_string()),
            su_admin: Some("2".to_string()),
            statutory_admin: Some("3".to_string()),
            non_statutory_admin: Some("4".to_string()),
        }
    }

    fn profile_with_roles(ids: &[&str]) -> Profile {
        Profile {
            roles: ids.iter().map(|id| RoleRef::new(*id)).collect(),
            ..Profile::default()
        }
    }

    #[test]
    fn test_superadmin_from_identity_or_role() {
        let deriver = PermissionDeriver::new(&roles());

        let set = deriver.derive(&Identity::new("9").superadmin(), None, None);
        assert!(set.is(is::SUPERADMIN));

        let set = deriver.derive(&Identity::new("9"), Some(&profile_with_roles(&["1"])), None);
        assert!(set.is(is::SUPERADMIN));

        let set = deriver.derive(&Identity::new("9"), Some(&profile_with_roles(&["5"])), None);
        assert!(!set.is(is::SUPERADMIN));
    }

    #[test]
    fn test_unconfigured_role_is_never_held() {
        let deriver = PermissionDeriver::new(&RoleConfig::default());
        let set = deriver.derive(&Identity::new("9"), Some(&profile_with_roles(&["1", "2", "3", "4"])), None);

        for flag in [is::SUPERADMIN, is::SU_ADMIN, is::STATUTORY_ADMIN, is::NON_STATUTORY_ADMIN] {
            assert_eq!(set.is.get(flag), Some(&false), "{flag}");
        }
    }

    #[test]
    fn test_boardmember_needs_own_antenna_and_position() {
        let deriver = PermissionDeriver::new(&roles());
        let identity = Identity::new("9").with_antenna("70");
        let profile = Profile {
            board_positions: vec![BoardPosition::new("70")],
            ..Profile::default()
        };
        let event = EventSnapshot::draft("local-party", EventType::Local).with_organizing_local("70");

        let set = deriver.derive(&identity, Some(&profile), Some(&event));
        assert!(set.is(is::OWN_ANTENNA));
        assert!(set.is(is::BOARDMEMBER));
        assert!(set.can(can::APPROVE));
        assert!(set.can(can::VIEW_PARTICIPANTS));
        assert_eq!(set.special, vec![special::BOARD_MEMBER.to_string()]);

        let other = EventSnapshot::draft("elsewhere", EventType::Local).with_organizing_local("71");
        let set = deriver.derive(&identity, Some(&profile), Some(&other));
        assert!(!set.is(is::BOARDMEMBER));

        let set = deriver.derive(&identity, None, Some(&event));
        assert!(set.is(is::OWN_ANTENNA));
        assert!(!set.is(is::BOARDMEMBER));
    }

    #[test]
    fn test_rejected_participant_is_not_accepted() {
        let deriver = PermissionDeriver::new(&roles());
        let event = EventSnapshot::draft("e", EventType::Local)
            .with_application("9", ParticipantStatus::Rejected);

        let set = deriver.derive(&Identity::new("9"), None, Some(&event));
        assert!(set.is(is::PARTICIPANT));
        assert!(!set.is(is::ACCEPTED_PARTICIPANT));
        assert!(!set.can(can::VIEW_PARTICIPANTS));
    }

    #[test]
    fn test_derive_onto_keeps_unknown_and_role_flags_without_profile() {
        let deriver = PermissionDeriver::new(&roles());
        let mut prior = PermissionSet::new();
        prior.set_is(is::STATUTORY_ADMIN, true);
        prior.set_is("custom", true);
        prior.special.push("Treasurer".to_string());

        let event = EventSnapshot::draft("agora", EventType::Statutory);
        let set = deriver.derive_onto(prior, &Identity::new("9"), None, Some(&event));

        assert!(set.is(is::STATUTORY_ADMIN));
        assert!(set.is("custom"));
        assert!(set.can(can::APPROVE));
        assert_eq!(set.special, vec!["Treasurer".to_string()]);
    }

    #[test]
    fn test_prior_superadmin_is_not_carried_over() {
        let deriver = PermissionDeriver::new(&roles());
        let mut prior = PermissionSet::new();
        prior.set_is(is::SUPERADMIN, true);

        let event = EventSnapshot::draft("agora", EventType::Statutory)
            .with_application_status(ApplicationStatus::Open);
        let set = deriver.derive_onto(prior, &Identity::new("9"), None, Some(&event));

        assert!(!set.is(is::SUPERADMIN));
        assert!(!set.can(can::EDIT_DETAILS));
        assert!(!set.can(can::DELETE));
        assert!(!set.can(can::APPROVE));

        let set = deriver.derive_onto(set, &Identity::new("9").superadmin(), None, Some(&event));
        assert!(set.is(is::SUPERADMIN));
        assert!(set.can(can::APPROVE));
    }

    #[test]
    fn test_profile_recomputes_prior_role_flags() {
        let deriver = PermissionDeriver::new(&roles());
        let mut prior = PermissionSet::new();
        prior.set_is(is::SU_ADMIN, true);

        let set = deriver.derive_onto(prior, &Identity::new("9"), Some(&profile_with_roles(&[])), None);
        assert!(!set.is(is::SU_ADMIN));
    }

    #[test]
    fn test_event_flags_recomputed_against_new_event() {
        let deriver = PermissionDeriver::new(&roles());
        let identity = Identity::new("9");
        let first = EventSnapshot::draft("a", EventType::Local).with_organizer("9");
        let second = EventSnapshot::draft("b", EventType::Local);

        let set = deriver.derive(&identity, None, Some(&first));
        assert!(set.is(is::ORGANIZER));
        assert_eq!(set.special, vec![special::ORGANIZER.to_string()]);

        let set = deriver.derive_onto(set, &identity, None, Some(&second));
        assert!(!set.is(is::ORGANIZER));
        assert!(set.special.is_empty());
    }
}
