//! Well-known doctypes, directory ids and selectors.

/// Files and directories.
pub const FILES: &str = "io.cozy.files";
/// Sharing documents.
pub const SHARINGS: &str = "io.cozy.sharings";
/// Shared references, one per tracked document.
pub const SHARED: &str = "io.cozy.shared";
/// Sequence cursors of the replicator and uploader.
pub const SHARINGS_CURSORS: &str = "io.cozy.sharings.cursors";
/// Background trigger documents.
pub const TRIGGERS: &str = "io.cozy.triggers";
/// Contacts.
pub const CONTACTS: &str = "io.cozy.contacts";
/// Contact groups.
pub const GROUPS: &str = "io.cozy.contacts.groups";
/// Permission documents (never shareable).
pub const PERMISSIONS: &str = "io.cozy.permissions";
/// OAuth clients (never shareable).
pub const OAUTH_CLIENTS: &str = "io.cozy.oauth.clients";

/// Doctypes that rules may never target.
pub const FORBIDDEN_DOCTYPES: &[&str] = &[
    SHARINGS,
    SHARED,
    SHARINGS_CURSORS,
    TRIGGERS,
    PERMISSIONS,
    OAUTH_CLIENTS,
];

pub const ROOT_DIR_ID: &str = "io.cozy.files.root-dir";
pub const TRASH_DIR_ID: &str = "io.cozy.files.trash-dir";
pub const SHARED_WITH_ME_DIR_ID: &str = "io.cozy.files.shared-with-me-dir";
pub const NO_LONGER_SHARED_DIR_ID: &str = "io.cozy.files.no-longer-shared-dir";

pub const ROOT_DIR_PATH: &str = "/";
pub const TRASH_DIR_NAME: &str = ".cozy_trash";
pub const SHARED_WITH_ME_DIR_NAME: &str = "Shared with me";
pub const NO_LONGER_SHARED_DIR_NAME: &str = "No longer shared";

/// `type` value of a directory in a file document.
pub const DIR_TYPE: &str = "directory";
/// `type` value of a regular file in a file document.
pub const FILE_TYPE: &str = "file";

/// Selector of the rules that match documents through their references.
pub const SELECTOR_REFERENCED_BY: &str = "referenced_by";

/// Returns true for the directories every instance synthesizes locally.
pub fn is_special_dir(id: &str) -> bool {
    matches!(
        id,
        ROOT_DIR_ID | TRASH_DIR_ID | SHARED_WITH_ME_DIR_ID | NO_LONGER_SHARED_DIR_ID
    )
}
