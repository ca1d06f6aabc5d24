//! Permission model and derivation.
//!
//! A [`PermissionSet`] holds two flag maps: `is` (facts about the caller in
//! the current context) and `can` (capabilities derived from those facts),
//! plus a list of human-readable special-role labels. Sets are produced by
//! [`PermissionDeriver`] and never persisted.

pub mod deriver;
pub mod set;

pub use deriver::{PermissionDeriver, RoleConfig};
pub use set::{truthy, PermissionSet};

/// Names of the `is.*` flags.
pub mod is {
    pub const SUPERADMIN: &str = "superadmin";
    pub const SU_ADMIN: &str = "su_admin";
    pub const STATUTORY_ADMIN: &str = "statutory_admin";
    pub const NON_STATUTORY_ADMIN: &str = "non_statutory_admin";
    pub const BOARDMEMBER: &str = "boardmember";
    pub const ORGANIZER: &str = "organizer";
    pub const PARTICIPANT: &str = "participant";
    pub const ACCEPTED_PARTICIPANT: &str = "accepted_participant";
    pub const OWN_ANTENNA: &str = "own_antenna";

    pub const ALL: [&str; 9] = [
        SUPERADMIN,
        SU_ADMIN,
        STATUTORY_ADMIN,
        NON_STATUTORY_ADMIN,
        BOARDMEMBER,
        ORGANIZER,
        PARTICIPANT,
        ACCEPTED_PARTICIPANT,
        OWN_ANTENNA,
    ];

    /// Flags that only make sense relative to an event.
    pub const EVENT_SCOPED: [&str; 5] =
        [BOARDMEMBER, ORGANIZER, PARTICIPANT, ACCEPTED_PARTICIPANT, OWN_ANTENNA];
}

/// Names of the `can.*` flags. All of them are event scoped.
pub mod can {
    pub const EDIT_ORGANIZERS: &str = "edit_organizers";
    pub const EDIT_DETAILS: &str = "edit_details";
    pub const EDIT_APPLICATION_STATUS: &str = "edit_application_status";
    pub const APPROVE: &str = "approve";
    pub const EDIT: &str = "edit";
    pub const APPLY: &str = "apply";
    pub const APPROVE_PARTICIPANTS: &str = "approve_participants";
    pub const VIEW_PARTICIPANTS: &str = "view_participants";
    pub const DELETE: &str = "delete";

    pub const ALL: [&str; 9] = [
        EDIT_ORGANIZERS,
        EDIT_DETAILS,
        EDIT_APPLICATION_STATUS,
        APPROVE,
        EDIT,
        APPLY,
        APPROVE_PARTICIPANTS,
        VIEW_PARTICIPANTS,
        DELETE,
    ];
}

/// Special-role labels.
pub mod special {
    pub const ORGANIZER: &str = "Organizer";
    pub const BOARD_MEMBER: &str = "Organizing Board Member";
}
