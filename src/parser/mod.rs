// Parser module - decodes raw producer records into typed events
//
// Decoding is a pure function `RawRecord -> Option<SysEvent>`. Returning
// `None` is the only failure mode: malformed envelopes, unrecognized codes,
// and records missing their target field are all dropped here so the
// recorder only ever sees well-formed events. Callers count the drops.

pub mod models;

use crate::events::{EventSource, SysEvent, SysEventCode};
use chrono::{DateTime, NaiveDateTime, Utc};
use models::RawRecord;

/// Timestamp format used by the operational event log ("2024-01-15 09:30:00.123")
const OPLOG_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Decode a raw record into a typed event
///
/// Drops the record when:
/// - neither the event name nor the event id resolves to a known code,
/// - the code requires a target field and it is missing or empty,
/// - the code is `Unknown`.
pub fn decode_record(record: RawRecord) -> Option<SysEvent> {
    let code = resolve_code(&record)?;
    if code == SysEventCode::Unknown {
        return None;
    }

    // Target validation happens at decode time so downstream classification
    // never sees a target-less actor event.
    if let Some(field) = code.target_field() {
        record.field_str(field)?;
    }

    let source = match record.source.as_deref() {
        Some("kernel") => EventSource::Kernel,
        // The operational log is the default provider; records without an
        // explicit source came from it.
        Some("sysmon") | None => EventSource::Sysmon,
        Some(_) => return None,
    };

    let timestamp = record
        .field_str("UtcTime")
        .or(record.utc_time.as_deref())
        .and_then(parse_timestamp)
        .unwrap_or_else(Utc::now);

    Some(SysEvent {
        code,
        timestamp,
        source,
        metadata: record.data,
    })
}

/// Resolve the event code from the symbolic name first, then the numeric id
fn resolve_code(record: &RawRecord) -> Option<SysEventCode> {
    if let Some(name) = record.event_name.as_deref() {
        return Some(code_from_name(name));
    }
    record.event_id.map(|id| code_from_id(id, record))
}

/// Symbolic names used by the kernel tracing producer
fn code_from_name(name: &str) -> SysEventCode {
    match name {
        "ProcessCreation" | "ProcessStart" => SysEventCode::ProcessCreation,
        "ProcessTerminated" | "ProcessStop" => SysEventCode::ProcessTerminated,
        "ThreadStart" => SysEventCode::ThreadStart,
        "ProcessAccess" => SysEventCode::ProcessAccess,
        "CreateRemoteThread" => SysEventCode::CreateRemoteThread,
        "ProcessTampering" => SysEventCode::ProcessTampering,
        "FileCreate" => SysEventCode::FileCreate,
        "FileModified" => SysEventCode::FileModified,
        "FileDelete" | "FileDeleteDetected" => SysEventCode::FileDelete,
        "CreateStreamHash" => SysEventCode::CreateStreamHash,
        "RawAccessRead" | "RawAccessReadDetected" => SysEventCode::RawAccessReadDetected,
        "ImageLoad" => SysEventCode::ImageLoad,
        "DriverLoad" => SysEventCode::DriverLoad,
        "NetworkConnection" | "NetworkConnect" => SysEventCode::NetworkConnection,
        "DnsQuery" => SysEventCode::DnsQuery,
        "RegistryAdd" => SysEventCode::RegistryAdd,
        "RegistryDelete" => SysEventCode::RegistryDelete,
        "RegistrySet" | "RegistryValueSet" => SysEventCode::RegistrySet,
        "RegistryRename" => SysEventCode::RegistryRename,
        "RegistryQuery" | "RegistryQueryValue" => SysEventCode::RegistryQuery,
        _ => SysEventCode::Unknown,
    }
}

/// Numeric ids used by the operational event log
///
/// Id 12 covers both key creation and deletion; the payload's `EventType`
/// field disambiguates.
fn code_from_id(id: i64, record: &RawRecord) -> SysEventCode {
    match id {
        1 => SysEventCode::ProcessCreation,
        2 => SysEventCode::FileModified,
        3 => SysEventCode::NetworkConnection,
        5 => SysEventCode::ProcessTerminated,
        6 => SysEventCode::DriverLoad,
        7 => SysEventCode::ImageLoad,
        8 => SysEventCode::CreateRemoteThread,
        9 => SysEventCode::RawAccessReadDetected,
        10 => SysEventCode::ProcessAccess,
        11 => SysEventCode::FileCreate,
        12 => match record.field_str("EventType") {
            Some("DeleteKey") | Some("DeleteValue") => SysEventCode::RegistryDelete,
            Some("CreateKey") | Some("CreateValue") => SysEventCode::RegistryAdd,
            _ => SysEventCode::Unknown,
        },
        13 => SysEventCode::RegistrySet,
        14 => SysEventCode::RegistryRename,
        15 => SysEventCode::CreateStreamHash,
        22 => SysEventCode::DnsQuery,
        23 | 26 => SysEventCode::FileDelete,
        25 => SysEventCode::ProcessTampering,
        _ => SysEventCode::Unknown,
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, OPLOG_TIME_FORMAT) {
        return Some(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
