use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::device::actions::ActionKind;
use crate::xml;

macro_rules! hashset {
    ($($item:expr),* $(,)?) => {{
        let mut set = HashSet::new();
        $(set.insert($item);)*
        set
    }};
}

/// A named permission a device advertises. `acl_entry` is the tag that ACL
/// entries carry in their `<access>` element, e.g. `<mfgr:trusted/>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    pub ui_name: String,
    pub acl_entry: String,
    pub full_description_url: String,
    pub short_description: String,
}

impl Permission {
    pub fn new(
        ui_name: impl Into<String>,
        acl_entry: impl Into<String>,
        full_description_url: impl Into<String>,
        short_description: impl Into<String>,
    ) -> Self {
        Permission {
            ui_name: ui_name.into(),
            acl_entry: acl_entry.into(),
            full_description_url: full_description_url.into(),
            short_description: short_description.into(),
        }
    }

    pub fn to_xml(&self) -> String {
        format!(
            "<Permission>{}<ACLEntry>{}</ACLEntry>{}{}</Permission>",
            xml::text_element("UIName", &self.ui_name),
            self.acl_entry,
            xml::text_element("FullDescription", &self.full_description_url),
            xml::text_element("ShortDescription", &self.short_description),
        )
    }
}

/// A named bundle of permissions. `definition` holds the ACL tags it grants.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub ui_name: String,
    pub definition: String,
    pub full_description_url: String,
    pub short_description: String,
}

impl Profile {
    pub fn new(
        ui_name: impl Into<String>,
        definition: impl Into<String>,
        full_description_url: impl Into<String>,
        short_description: impl Into<String>,
    ) -> Self {
        Profile {
            ui_name: ui_name.into(),
            definition: definition.into(),
            full_description_url: full_description_url.into(),
            short_description: short_description.into(),
        }
    }

    pub fn to_xml(&self) -> String {
        format!(
            "<Profile>{}<Definition>{}</Definition>{}{}</Profile>",
            xml::text_element("UIName", &self.ui_name),
            self.definition,
            xml::text_element("FullDescription", &self.full_description_url),
            xml::text_element("ShortDescription", &self.short_description),
        )
    }
}

/// Permission catalog with the permission → action table used by ACL checks.
#[derive(Clone, Debug, Default)]
pub struct PermissionCatalog {
    permissions: Vec<Permission>,
    permission_actions: HashMap<String, HashSet<String>>,
    profiles: Vec<Profile>,
}

impl PermissionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog of the device security service itself.
    pub fn device_security() -> Self {
        let mut catalog = Self::new();

        let trusted_actions = hashset![
            ActionKind::GetAclSizes.name().to_string(),
            ActionKind::ReadAcl.name().to_string(),
            ActionKind::GetDefinedPermissions.name().to_string(),
            ActionKind::GetDefinedProfiles.name().to_string(),
        ];
        catalog.add_permission_entry(
            Permission::new(
                "DeviceSecurity.Trusted",
                "<mfgr:trusted/>",
                "",
                "Allows reading of the ACL, permissions and profiles",
            ),
            trusted_actions.clone(),
        );

        let mut editor_actions = trusted_actions;
        editor_actions.extend([
            ActionKind::WriteAcl.name().to_string(),
            ActionKind::AddAclEntry.name().to_string(),
            ActionKind::DeleteAclEntry.name().to_string(),
            ActionKind::ReplaceAclEntry.name().to_string(),
        ]);
        catalog.add_permission_entry(
            Permission::new(
                "DeviceSecurity.AclEditor",
                "<mfgr:aclEditor/>",
                "",
                "Allows editing of the ACL",
            ),
            editor_actions,
        );

        catalog
    }

    /// Register a permission and the actions it unlocks. Registering a known
    /// permission again extends its action set.
    pub fn add_permission_entry<I>(&mut self, permission: Permission, actions: I)
    where
        I: IntoIterator<Item = String>,
    {
        if !self.permissions.iter().any(|p| p.acl_entry == permission.acl_entry) {
            self.permissions.push(permission.clone());
        }
        self.permission_actions
            .entry(permission.acl_entry)
            .or_insert_with(HashSet::new)
            .extend(actions);
    }

    pub fn add_profile(&mut self, profile: Profile) {
        if !self.profiles.iter().any(|p| p.ui_name == profile.ui_name) {
            self.profiles.push(profile);
        }
    }

    /// Does the ACL tag `acl_entry` cover `action_name`?
    pub fn is_associated_action(&self, acl_entry: &str, action_name: &str) -> bool {
        self.permission_actions
            .get(acl_entry)
            .map_or(false, |actions| actions.contains(action_name))
    }

    pub fn permissions(&self) -> &[Permission] {
        &self.permissions
    }

    pub fn profiles(&self) -> &[Profile] {
        &self.profiles
    }

    /// `<DefinedPermissions xmlns:mfgr="{namespace}:Permissions">...</DefinedPermissions>`
    pub fn defined_permissions_xml(&self, namespace: &str) -> String {
        let mut out = format!(
            "<DefinedPermissions xmlns:mfgr=\"{}:Permissions\">",
            xml::escape(namespace)
        );
        for permission in &self.permissions {
            out.push_str(&permission.to_xml());
        }
        out.push_str("</DefinedPermissions>");
        out
    }

    /// `<Profiles xmlns:mfgr="{namespace}:Profiles">...</Profiles>`
    pub fn defined_profiles_xml(&self, namespace: &str) -> String {
        let mut out = format!("<Profiles xmlns:mfgr=\"{}:Profiles\">", xml::escape(namespace));
        for profile in &self.profiles {
            out.push_str(&profile.to_xml());
        }
        out.push_str("</Profiles>");
        out
    }
}
