//! The `audit_logs` table layout shared by the live SQLite store and backup snapshots.

use rusqlite::types::ValueRef;
use rusqlite::{params_from_iter, Connection, Row};
use uuid::Uuid;

use crate::record::{format_timestamp, parse_timestamp};
use crate::{AuditAction, AuditRecord, AuditSeverity, Result, StatePayload};

pub(crate) const TABLE_NAME: &str = "audit_logs";

pub(crate) const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS audit_logs (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    action TEXT NOT NULL,
    resource_type TEXT NOT NULL,
    resource_id TEXT NOT NULL,
    ip_address TEXT,
    user_agent TEXT,
    before_state TEXT,
    after_state TEXT,
    custom_metadata TEXT,
    severity TEXT NOT NULL,
    tenant_id TEXT,
    timestamp TEXT NOT NULL,
    session_id TEXT
)";

pub(crate) const COLUMNS: &str = "id, user_id, action, resource_type, resource_id, ip_address, \
     user_agent, before_state, after_state, custom_metadata, severity, tenant_id, timestamp, \
     session_id";

const COLUMN_COUNT: usize = 14;

pub(crate) fn insert_sql(or_ignore: bool) -> String {
    let verb = if or_ignore { "INSERT OR IGNORE" } else { "INSERT" };
    format!(
        "{verb} INTO {TABLE_NAME} ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
    )
}

pub(crate) fn select_sql(filter_clause: &str) -> String {
    format!("SELECT {COLUMNS} FROM {TABLE_NAME}{filter_clause}")
}

/// Insert one record with the given statement text; returns rows changed.
pub(crate) fn insert_record(conn: &Connection, sql: &str, record: &AuditRecord) -> Result<usize> {
    let values = encode(record)?;
    let mut stmt = conn.prepare_cached(sql)?;
    Ok(stmt.execute(params_from_iter(values.iter()))?)
}

fn encode(record: &AuditRecord) -> Result<[Option<String>; COLUMN_COUNT]> {
    let payload = |p: Option<&StatePayload>| p.map(StatePayload::to_text).transpose();

    Ok([
        Some(record.id().to_string()),
        Some(record.user_id().to_string()),
        Some(record.action().as_str().to_string()),
        Some(record.resource_type().to_string()),
        Some(record.resource_id().to_string()),
        record.ip_address().map(str::to_string),
        record.user_agent().map(str::to_string),
        payload(record.before_state())?,
        payload(record.after_state())?,
        payload(record.custom_metadata())?,
        Some(record.severity().as_str().to_string()),
        record.tenant_id().map(|id| id.to_string()),
        Some(format_timestamp(&record.timestamp())),
        record.session_id().map(str::to_string),
    ])
}

/// Decode a row selected with [`COLUMNS`].
///
/// Returns a human-readable reason instead of an error type so callers can
/// decide whether a bad row is fatal (live store) or skippable (restore).
pub(crate) fn decode_row(row: &Row<'_>) -> std::result::Result<AuditRecord, String> {
    let required = |idx: usize, name: &str| -> std::result::Result<String, String> {
        text_column(row, idx, name)?.ok_or_else(|| format!("column {name} is NULL"))
    };
    let uuid = |text: &str, name: &str| {
        Uuid::parse_str(text).map_err(|e| format!("column {name} is not a UUID: {e}"))
    };
    let payload = |idx: usize, name: &str| -> std::result::Result<Option<StatePayload>, String> {
        match text_column(row, idx, name)? {
            Some(text) if !text.is_empty() => StatePayload::from_text(&text)
                .map(Some)
                .map_err(|e| format!("column {name}: {e}")),
            _ => Ok(None),
        }
    };

    let id = uuid(&required(0, "id")?, "id")?;
    let user_id = uuid(&required(1, "user_id")?, "user_id")?;
    let action = required(2, "action")?
        .parse::<AuditAction>()
        .map_err(|e| e.to_string())?;
    let resource_type = required(3, "resource_type")?;
    let resource_id = required(4, "resource_id")?;
    let ip_address = text_column(row, 5, "ip_address")?;
    let user_agent = text_column(row, 6, "user_agent")?;
    let before_state = payload(7, "before_state")?;
    let after_state = payload(8, "after_state")?;
    let custom_metadata = payload(9, "custom_metadata")?;
    let severity = required(10, "severity")?
        .parse::<AuditSeverity>()
        .map_err(|e| e.to_string())?;
    let tenant_id = text_column(row, 11, "tenant_id")?
        .map(|text| uuid(&text, "tenant_id"))
        .transpose()?;
    let timestamp =
        parse_timestamp(&required(12, "timestamp")?).map_err(|e| e.to_string())?;
    let session_id = text_column(row, 13, "session_id")?;

    let mut record = AuditRecord::new(user_id, action, resource_type, resource_id)
        .with_id(id)
        .with_timestamp(timestamp)
        .with_client(ip_address, user_agent)
        .with_states(before_state, after_state)
        .with_severity(severity);
    if let Some(metadata) = custom_metadata {
        record = record.with_custom_metadata(metadata);
    }
    if let Some(tenant) = tenant_id {
        record = record.with_tenant(tenant);
    }
    if let Some(session) = session_id {
        record = record.with_session(session);
    }
    Ok(record)
}

fn text_column(
    row: &Row<'_>,
    idx: usize,
    name: &str,
) -> std::result::Result<Option<String>, String> {
    let value = row
        .get_ref(idx)
        .map_err(|e| format!("column {name}: {e}"))?;
    match value {
        ValueRef::Null => Ok(None),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes)
            .map(|s| Some(s.to_string()))
            .map_err(|e| format!("column {name} is not UTF-8: {e}")),
        other => Err(format!(
            "column {name} has type {}, expected TEXT",
            other.data_type()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(CREATE_TABLE, []).unwrap();
        conn
    }

    fn decode_all(conn: &Connection) -> Vec<std::result::Result<AuditRecord, String>> {
        let mut stmt = conn.prepare(&select_sql(" ORDER BY rowid")).unwrap();
        let rows = stmt.query_map([], |row| Ok(decode_row(row))).unwrap();
        rows.map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_encode_decode_full_record() {
        let conn = table();
        let record = AuditRecord::new(Uuid::new_v4(), AuditAction::Delete, "tenant", "t-9")
            .with_client(Some("10.0.0.1"), Some("curl/8"))
            .with_states(Some(json!({"active": true}).into()), None)
            .with_custom_metadata(json!({"reason": "gdpr"}).into())
            .with_tenant(Uuid::new_v4())
            .with_session("abc");

        assert_eq!(insert_record(&conn, &insert_sql(false), &record).unwrap(), 1);

        let decoded = decode_all(&conn);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].as_ref().unwrap(), &record);
    }

    #[test]
    fn test_decode_reports_reason_for_bad_rows() {
        let conn = table();
        conn.execute(
            "INSERT INTO audit_logs VALUES ('not-a-uuid', ?1, 'VIEW', 'item', '1', NULL, NULL, NULL, NULL, NULL, 'INFO', NULL, '2024-01-01T00:00:00Z', NULL)",
            [Uuid::new_v4().to_string()],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO audit_logs VALUES (?1, ?2, 'VIEW', 'item', '2', NULL, NULL, '{oops', NULL, NULL, 'INFO', NULL, '2024-01-01T00:00:00Z', NULL)",
            [Uuid::new_v4().to_string(), Uuid::new_v4().to_string()],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO audit_logs VALUES (?1, ?2, 'VIEW', 'item', '3', NULL, NULL, NULL, NULL, NULL, 'INFO', NULL, 1700000000, NULL)",
            [Uuid::new_v4().to_string(), Uuid::new_v4().to_string()],
        )
        .unwrap();

        let decoded = decode_all(&conn);
        assert!(decoded[0].as_ref().unwrap_err().contains("id"));
        assert!(decoded[1].as_ref().unwrap_err().contains("before_state"));
        assert!(decoded[2].as_ref().unwrap_err().contains("timestamp"));
    }
}
