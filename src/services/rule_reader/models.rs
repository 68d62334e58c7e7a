//! Value types exchanged with the rule reader service
//!
//! These mirror the data transfer objects of the authorization backend:
//! a [`RuleFilter`] describes the dimensions of an access-control lookup,
//! an [`AccessInfo`] is the resulting decision and an [`AuthUser`] is the
//! outcome of a successful credential check.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Value of a single filter dimension
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FilterValue {
    /// Matches rules regardless of the dimension value
    #[default]
    Any,
    /// Matches only rules where the dimension is not set
    Default,
    /// Matches by name
    Name(String),
    /// Matches by numeric identifier
    Id(i64),
}

impl FilterValue {
    pub fn is_special(&self) -> bool {
        matches!(self, FilterValue::Any | FilterValue::Default)
    }
}

impl From<&str> for FilterValue {
    fn from(name: &str) -> Self {
        FilterValue::Name(name.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(name: String) -> Self {
        FilterValue::Name(name)
    }
}

impl From<i64> for FilterValue {
    fn from(id: i64) -> Self {
        FilterValue::Id(id)
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Any => write!(f, "*"),
            FilterValue::Default => write!(f, "<default>"),
            FilterValue::Name(name) => write!(f, "{}", name),
            FilterValue::Id(id) => write!(f, "#{}", id),
        }
    }
}

/// Dimensions of an access-control lookup
///
/// Two filters are equal when every dimension matches, which makes the
/// filter usable as a cache key. The rule reader service receives owned
/// copies and is free to normalise them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RuleFilter {
    pub user: FilterValue,
    pub role: FilterValue,
    pub instance: FilterValue,
    pub source_address: FilterValue,
    pub date: FilterValue,
    pub service: FilterValue,
    pub request: FilterValue,
    pub subfield: FilterValue,
    pub workspace: FilterValue,
    pub layer: FilterValue,
}

impl RuleFilter {
    /// Create a filter with every dimension set to `value`
    pub fn new(value: FilterValue) -> Self {
        Self {
            user: value.clone(),
            role: value.clone(),
            instance: value.clone(),
            source_address: value.clone(),
            date: value.clone(),
            service: value.clone(),
            request: value.clone(),
            subfield: value.clone(),
            workspace: value.clone(),
            layer: value,
        }
    }

    /// Filter matching any value on every dimension
    pub fn any() -> Self {
        Self::new(FilterValue::Any)
    }

    /// Filter matching only unset dimensions
    pub fn defaults() -> Self {
        Self::new(FilterValue::Default)
    }

    pub fn with_user(mut self, user: impl Into<FilterValue>) -> Self {
        self.user = user.into();
        self
    }

    pub fn with_role(mut self, role: impl Into<FilterValue>) -> Self {
        self.role = role.into();
        self
    }

    pub fn with_instance(mut self, instance: impl Into<FilterValue>) -> Self {
        self.instance = instance.into();
        self
    }

    pub fn with_source_address(mut self, address: impl Into<FilterValue>) -> Self {
        self.source_address = address.into();
        self
    }

    pub fn with_date(mut self, date: impl Into<FilterValue>) -> Self {
        self.date = date.into();
        self
    }

    pub fn with_service(mut self, service: impl Into<FilterValue>) -> Self {
        self.service = service.into();
        self
    }

    pub fn with_request(mut self, request: impl Into<FilterValue>) -> Self {
        self.request = request.into();
        self
    }

    pub fn with_subfield(mut self, subfield: impl Into<FilterValue>) -> Self {
        self.subfield = subfield.into();
        self
    }

    pub fn with_workspace(mut self, workspace: impl Into<FilterValue>) -> Self {
        self.workspace = workspace.into();
        self
    }

    pub fn with_layer(mut self, layer: impl Into<FilterValue>) -> Self {
        self.layer = layer.into();
        self
    }
}

impl fmt::Display for RuleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "user={} role={} instance={} ip={} date={} service={} request={} subfield={} workspace={} layer={}",
            self.user,
            self.role,
            self.instance,
            self.source_address,
            self.date,
            self.service,
            self.request,
            self.subfield,
            self.workspace,
            self.layer
        )
    }
}

/// Outcome of a rule match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GrantType {
    Allow,
    Deny,
    Limit,
}

/// How the catalog exposes resources the user cannot access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CatalogMode {
    Hide,
    Challenge,
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeAccess {
    None,
    ReadOnly,
    ReadWrite,
}

/// Per-attribute access restriction of a layer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerAttribute {
    pub name: String,
    pub data_type: Option<String>,
    pub access: AttributeAccess,
}

/// Authorization decision returned by the rule reader service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessInfo {
    pub grant: GrantType,
    pub admin_rights: bool,
    pub catalog_mode: Option<CatalogMode>,
    pub cql_filter_read: Option<String>,
    pub cql_filter_write: Option<String>,
    pub area_wkt: Option<String>,
    pub clip_area_wkt: Option<String>,
    pub default_style: Option<String>,
    pub allowed_styles: BTreeSet<String>,
    pub attributes: Vec<LayerAttribute>,
}

impl AccessInfo {
    fn with_grant(grant: GrantType) -> Self {
        Self {
            grant,
            admin_rights: false,
            catalog_mode: None,
            cql_filter_read: None,
            cql_filter_write: None,
            area_wkt: None,
            clip_area_wkt: None,
            default_style: None,
            allowed_styles: BTreeSet::new(),
            attributes: Vec::new(),
        }
    }

    pub fn allow_all() -> Self {
        Self::with_grant(GrantType::Allow)
    }

    pub fn deny_all() -> Self {
        Self::with_grant(GrantType::Deny)
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self.grant, GrantType::Allow | GrantType::Limit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserRole {
    Admin,
    User,
    Guest,
}

/// A user successfully authenticated by the rule reader service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthUser {
    pub name: String,
    pub role: UserRole,
}

impl AuthUser {
    pub fn new(name: impl Into<String>, role: UserRole) -> Self {
        Self {
            name: name.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

/// Key of the authentication cache
///
/// Equality and hashing cover both fields. The password lives only as long
/// as the cache entry keyed by it and is redacted from `Debug` output.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct UserCredentials {
    pub username: String,
    pub password: String,
}

impl UserCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for UserCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserCredentials")
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .finish()
    }
}
