use crate::authorization::AuthorizationCertificate;
use crate::errors::{SecurityError, SecurityResult};
use crate::identity::Identity;
use crate::xml::{self, XmlEvent};

/// Who an ACL entry applies to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Subject {
    Any,
    Identity(Identity),
}

impl Subject {
    pub fn matches(&self, identity: &Identity) -> bool {
        match self {
            Subject::Any => true,
            Subject::Identity(subject) => subject == identity,
        }
    }

    fn to_xml(&self) -> String {
        match self {
            Subject::Any => "<subject><any/></subject>".to_string(),
            Subject::Identity(identity) => format!("<subject>{}</subject>", identity.to_xml()),
        }
    }
}

/// One ACL row: a subject, a single permission tag such as `<mfgr:trusted/>`,
/// and an optional validity window.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AclEntry {
    pub subject: Subject,
    pub may_not_delegate: bool,
    pub permission: String,
    pub not_before: Option<String>,
    pub not_after: Option<String>,
}

impl AclEntry {
    pub fn new(subject: Subject, permission: impl Into<String>) -> Self {
        AclEntry {
            subject,
            may_not_delegate: false,
            permission: permission.into(),
            not_before: None,
            not_after: None,
        }
    }

    pub fn with_validity(mut self, not_before: Option<String>, not_after: Option<String>) -> Self {
        self.not_before = not_before;
        self.not_after = not_after;
        self
    }

    pub fn without_delegation(mut self) -> Self {
        self.may_not_delegate = true;
        self
    }

    /// Window check by plain string comparison against `now`.
    pub fn is_valid_at(&self, now: &str) -> bool {
        self.not_before.as_deref().map_or(true, |nb| now >= nb)
            && self.not_after.as_deref().map_or(true, |na| now <= na)
    }

    pub fn to_xml(&self) -> String {
        let mut out = String::from("<entry>");
        out.push_str(&self.subject.to_xml());
        if self.may_not_delegate {
            out.push_str("<may-not-delegate/>");
        }
        out.push_str("<access>");
        out.push_str(&self.permission);
        out.push_str("</access>");
        if self.not_before.is_some() || self.not_after.is_some() {
            out.push_str("<valid>");
            if let Some(not_before) = &self.not_before {
                out.push_str(&xml::text_element("not-before", not_before));
            }
            if let Some(not_after) = &self.not_after {
                out.push_str(&xml::text_element("not-after", not_after));
            }
            out.push_str("</valid>");
        }
        out.push_str("</entry>");
        out
    }

    /// Certificate delegating this entry's permission from `issuer` to the
    /// entry's subject. `Any`-subject entries cannot be delegated.
    pub fn to_certificate(
        &self,
        issuer: &Identity,
        device: &Identity,
        not_before: &str,
        not_after: &str,
    ) -> SecurityResult<AuthorizationCertificate> {
        let Subject::Identity(subject) = &self.subject else {
            return Err(SecurityError::MalformedInput(
                "entries for any subject cannot be turned into certificates".to_string(),
            ));
        };
        if self.may_not_delegate {
            return Err(SecurityError::AuthorizationDenied("delegation".to_string()));
        }
        Ok(AuthorizationCertificate::new(
            issuer.clone(),
            subject.clone(),
            device.clone(),
            vec![self.permission.clone()],
            not_before,
            not_after,
        ))
    }

    /// Parse a single `<entry>` fragment.
    pub fn parse(fragment: &str) -> SecurityResult<AclEntry> {
        let mut entries = parse_entries(fragment)?;
        if entries.len() != 1 {
            return Err(SecurityError::MalformedAclEntry(format!(
                "expected one entry, found {}",
                entries.len()
            )));
        }
        Ok(entries.remove(0))
    }
}

#[derive(Default)]
struct EntryBuilder {
    any_subject: bool,
    hash_algorithm: Option<String>,
    hash_value: Option<String>,
    may_not_delegate: bool,
    permission: Option<String>,
    not_before: Option<String>,
    not_after: Option<String>,
}

impl EntryBuilder {
    fn build(self) -> SecurityResult<AclEntry> {
        let subject = match (self.any_subject, self.hash_algorithm, self.hash_value) {
            (true, None, None) => Subject::Any,
            (false, Some(algorithm), Some(value)) => {
                Subject::Identity(Identity::from_encoded(&algorithm, &value)?)
            }
            _ => {
                return Err(SecurityError::MalformedAclEntry(
                    "subject must be <any/> or a single hash".to_string(),
                ))
            }
        };
        let permission = self
            .permission
            .ok_or_else(|| SecurityError::MalformedAclEntry("missing access tag".to_string()))?;
        Ok(AclEntry {
            subject,
            may_not_delegate: self.may_not_delegate,
            permission,
            not_before: self.not_before,
            not_after: self.not_after,
        })
    }
}

/// Parse every `<entry>` in an `<acl>` document (or a bare entry).
pub fn parse_entries(document: &str) -> SecurityResult<Vec<AclEntry>> {
    let mut entries = Vec::new();
    let mut current: Option<EntryBuilder> = None;

    let result = xml::walk(document, |event| {
        match event {
            XmlEvent::Open { path, .. } => {
                if xml::path_ends_with(path, &["entry"]) {
                    current = Some(EntryBuilder::default());
                } else if let Some(builder) = current.as_mut() {
                    if xml::path_ends_with(path, &["entry", "subject", "any"]) {
                        builder.any_subject = true;
                    } else if xml::path_ends_with(path, &["entry", "may-not-delegate"]) {
                        builder.may_not_delegate = true;
                    } else if path.len() >= 2 && xml::path_ends_with(&path[..path.len() - 1], &["entry", "access"]) {
                        if builder.permission.is_some() {
                            return Err(SecurityError::MalformedAclEntry(
                                "access holds more than one tag".to_string(),
                            ));
                        }
                        builder.permission = Some(format!("<{}/>", path[path.len() - 1]));
                    }
                }
            }
            XmlEvent::Text { path, text } => {
                if let Some(builder) = current.as_mut() {
                    if xml::path_ends_with(path, &["subject", "hash", "algorithm"]) {
                        builder.hash_algorithm = Some(text);
                    } else if xml::path_ends_with(path, &["subject", "hash", "value"]) {
                        builder.hash_value = Some(text);
                    } else if xml::path_ends_with(path, &["valid", "not-before"]) {
                        builder.not_before = Some(text);
                    } else if xml::path_ends_with(path, &["valid", "not-after"]) {
                        builder.not_after = Some(text);
                    }
                }
            }
            XmlEvent::Close { path, .. } => {
                if xml::path_ends_with(path, &["entry"]) {
                    if let Some(builder) = current.take() {
                        entries.push(builder.build()?);
                    }
                }
            }
        }
        Ok(())
    });

    match result {
        Ok(()) => Ok(entries),
        Err(SecurityError::MalformedAclEntry(reason)) => Err(SecurityError::MalformedAclEntry(reason)),
        Err(other) => Err(SecurityError::MalformedAclEntry(other.to_string())),
    }
}

/// `<acl>entry*</acl>`
pub fn entries_to_xml(entries: &[AclEntry]) -> String {
    let mut out = String::from("<acl>");
    for entry in entries {
        out.push_str(&entry.to_xml());
    }
    out.push_str("</acl>");
    out
}
