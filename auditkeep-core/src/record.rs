/*!
The audit event record and its storage-boundary encodings.
*/

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{LifecycleError, Result};

/// Kind of action an audit event describes
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    View,
    Search,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
            AuditAction::View => "VIEW",
            AuditAction::Search => "SEARCH",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CREATE" => Ok(AuditAction::Create),
            "UPDATE" => Ok(AuditAction::Update),
            "DELETE" => Ok(AuditAction::Delete),
            "VIEW" => Ok(AuditAction::View),
            "SEARCH" => Ok(AuditAction::Search),
            other => Err(LifecycleError::storage(format!(
                "unknown audit action: {other}"
            ))),
        }
    }
}

/// Severity level of an audit event
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditSeverity {
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl AuditSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditSeverity::Info => "INFO",
            AuditSeverity::Warning => "WARNING",
            AuditSeverity::Error => "ERROR",
            AuditSeverity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for AuditSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditSeverity {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "INFO" => Ok(AuditSeverity::Info),
            "WARNING" => Ok(AuditSeverity::Warning),
            "ERROR" => Ok(AuditSeverity::Error),
            "CRITICAL" => Ok(AuditSeverity::Critical),
            other => Err(LifecycleError::storage(format!(
                "unknown audit severity: {other}"
            ))),
        }
    }
}

/// Opaque structured payload attached to a record (before/after state, custom metadata).
///
/// No schema is enforced here. At the storage boundary the payload is plain
/// JSON text; in archive files it is embedded as a nested JSON value.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(transparent)]
pub struct StatePayload(serde_json::Value);

impl StatePayload {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    /// Serialize to the text form stored in SQLite columns
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    /// Parse the text form stored in SQLite columns
    pub fn from_text(text: &str) -> Result<Self> {
        Ok(Self(serde_json::from_str(text)?))
    }
}

impl From<serde_json::Value> for StatePayload {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// A single audit event.
///
/// Records are immutable after construction. The timestamp is assigned once,
/// truncated to microseconds so it survives the text encoding used by the
/// SQLite stores unchanged, and is the only ordering and retention key.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AuditRecord {
    id: Uuid,
    user_id: Uuid,
    action: AuditAction,
    resource_type: String,
    resource_id: String,
    ip_address: Option<String>,
    user_agent: Option<String>,
    before_state: Option<StatePayload>,
    after_state: Option<StatePayload>,
    custom_metadata: Option<StatePayload>,
    severity: AuditSeverity,
    tenant_id: Option<Uuid>,
    timestamp: DateTime<Utc>,
    session_id: Option<String>,
}

impl AuditRecord {
    /// Create a new record stamped with the current time
    ///
    /// # Example
    /// ```rust
    /// use auditkeep_core::{AuditAction, AuditRecord, AuditSeverity};
    /// use uuid::Uuid;
    ///
    /// let record = AuditRecord::new(Uuid::new_v4(), AuditAction::Update, "item", "42")
    ///     .with_severity(AuditSeverity::Warning);
    /// assert_eq!(record.resource_id(), "42");
    /// ```
    pub fn new<S1, S2>(user_id: Uuid, action: AuditAction, resource_type: S1, resource_id: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self {
            id: Uuid::new_v4(),
            user_id,
            action,
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            ip_address: None,
            user_agent: None,
            before_state: None,
            after_state: None,
            custom_metadata: None,
            severity: AuditSeverity::default(),
            tenant_id: None,
            timestamp: Utc::now().trunc_subsecs(6),
            session_id: None,
        }
    }

    /// Use an existing identity (records ingested from another store, restores)
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Use a creation time other than "now"
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp.trunc_subsecs(6);
        self
    }

    pub fn with_client<S1, S2>(mut self, ip_address: Option<S1>, user_agent: Option<S2>) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        self.ip_address = ip_address.map(Into::into);
        self.user_agent = user_agent.map(Into::into);
        self
    }

    pub fn with_states(
        mut self,
        before_state: Option<StatePayload>,
        after_state: Option<StatePayload>,
    ) -> Self {
        self.before_state = before_state;
        self.after_state = after_state;
        self
    }

    pub fn with_custom_metadata(mut self, metadata: StatePayload) -> Self {
        self.custom_metadata = Some(metadata);
        self
    }

    pub fn with_severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_tenant(mut self, tenant_id: Uuid) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn with_session<S: Into<String>>(mut self, session_id: S) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn action(&self) -> AuditAction {
        self.action
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn ip_address(&self) -> Option<&str> {
        self.ip_address.as_deref()
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    pub fn before_state(&self) -> Option<&StatePayload> {
        self.before_state.as_ref()
    }

    pub fn after_state(&self) -> Option<&StatePayload> {
        self.after_state.as_ref()
    }

    pub fn custom_metadata(&self) -> Option<&StatePayload> {
        self.custom_metadata.as_ref()
    }

    pub fn severity(&self) -> AuditSeverity {
        self.severity
    }

    pub fn tenant_id(&self) -> Option<Uuid> {
        self.tenant_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }
}

/// Fixed-width RFC 3339 text used for timestamp columns.
///
/// Always microsecond precision with a `Z` suffix, so lexical order of the
/// column equals chronological order.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a timestamp column.
///
/// Accepts RFC 3339 with any offset, and offset-less ISO 8601 which is taken
/// as UTC.
pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Ok(parsed.with_timezone(&Utc).trunc_subsecs(6));
    }

    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc().trunc_subsecs(6))
        .map_err(|e| LifecycleError::storage(format!("invalid timestamp {text:?}: {e}")))
}
