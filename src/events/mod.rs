// Event model - the closed set of system activity events the recorder consumes
//
// Producers (kernel tracing, the security-product event provider) deliver raw
// records; the parser turns them into `SysEvent`s carrying one of the codes
// below. Using enums for the code/kind taxonomy allows exhaustive matching
// and keeps the mapping tables (code -> actor kind, code -> target field)
// in one place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a raw record originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    /// Kernel tracing subsystem (process/thread lifecycle)
    Kernel,
    /// Security-product event provider (Sysmon-style operational log)
    Sysmon,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::Kernel => "kernel",
            EventSource::Sysmon => "sysmon",
        }
    }
}

/// Event codes understood by the recorder (closed set)
///
/// Anything a producer delivers that does not map to one of these decodes to
/// `Unknown` and is dropped before reaching the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SysEventCode {
    // Process lifecycle and cross-process activity
    ProcessCreation,
    ProcessTerminated,
    ThreadStart,
    ProcessAccess,
    CreateRemoteThread,
    ProcessTampering,
    // File activity
    FileCreate,
    FileModified,
    FileDelete,
    CreateStreamHash,
    RawAccessReadDetected,
    // Module activity
    ImageLoad,
    DriverLoad,
    // Network activity
    NetworkConnection,
    DnsQuery,
    // Registry activity
    RegistryAdd,
    RegistryDelete,
    RegistrySet,
    RegistryRename,
    RegistryQuery,
    /// Unrecognized record; never enters the recorder
    Unknown,
}

impl SysEventCode {
    /// Actor kind this code groups under (fixed table)
    ///
    /// Process lifecycle codes are `NotActor`: they drive the process span
    /// itself rather than a per-artifact sub-span.
    pub fn actor_kind(&self) -> ActorKind {
        match self {
            SysEventCode::ProcessCreation
            | SysEventCode::ProcessTerminated
            | SysEventCode::ThreadStart => ActorKind::NotActor,
            SysEventCode::ProcessAccess | SysEventCode::CreateRemoteThread => {
                ActorKind::RemoteThread
            }
            SysEventCode::ProcessTampering => ActorKind::Tampering,
            SysEventCode::FileCreate => ActorKind::Create,
            SysEventCode::FileModified => ActorKind::Modify,
            SysEventCode::FileDelete => ActorKind::Delete,
            SysEventCode::CreateStreamHash => ActorKind::CreateStreamHash,
            SysEventCode::RawAccessReadDetected => ActorKind::RawAccessRead,
            SysEventCode::ImageLoad | SysEventCode::DriverLoad => ActorKind::Load,
            SysEventCode::NetworkConnection | SysEventCode::DnsQuery => ActorKind::Connect,
            SysEventCode::RegistryAdd => ActorKind::RegAdd,
            SysEventCode::RegistryDelete => ActorKind::RegDelete,
            SysEventCode::RegistrySet => ActorKind::RegSet,
            SysEventCode::RegistryRename => ActorKind::RegRename,
            SysEventCode::RegistryQuery => ActorKind::RegQuery,
            SysEventCode::Unknown => ActorKind::NotActor,
        }
    }

    /// Artifact kind the target string names (fixed table)
    pub fn artifact_kind(&self) -> Option<ArtifactKind> {
        match self {
            SysEventCode::ProcessCreation
            | SysEventCode::ProcessTerminated
            | SysEventCode::ThreadStart
            | SysEventCode::ProcessAccess
            | SysEventCode::CreateRemoteThread
            | SysEventCode::ProcessTampering => Some(ArtifactKind::Process),
            SysEventCode::FileCreate
            | SysEventCode::FileModified
            | SysEventCode::FileDelete
            | SysEventCode::CreateStreamHash
            | SysEventCode::RawAccessReadDetected => Some(ArtifactKind::File),
            SysEventCode::ImageLoad | SysEventCode::DriverLoad => Some(ArtifactKind::Module),
            SysEventCode::NetworkConnection | SysEventCode::DnsQuery => {
                Some(ArtifactKind::Network)
            }
            SysEventCode::RegistryAdd
            | SysEventCode::RegistryDelete
            | SysEventCode::RegistrySet
            | SysEventCode::RegistryRename
            | SysEventCode::RegistryQuery => Some(ArtifactKind::Registry),
            SysEventCode::Unknown => None,
        }
    }

    /// Payload field that names the event's target (fixed table)
    ///
    /// Records missing this field (or carrying an empty value) are dropped
    /// by the parser. `ThreadStart` has no target: it only ever attaches to
    /// the originating process span.
    pub fn target_field(&self) -> Option<&'static str> {
        match self {
            SysEventCode::ProcessCreation
            | SysEventCode::ProcessTerminated
            | SysEventCode::ProcessTampering => Some("Image"),
            SysEventCode::ProcessAccess | SysEventCode::CreateRemoteThread => {
                Some("TargetImage")
            }
            SysEventCode::ImageLoad | SysEventCode::DriverLoad => Some("ImageLoaded"),
            SysEventCode::NetworkConnection => Some("DestinationIp"),
            SysEventCode::DnsQuery => Some("QueryName"),
            SysEventCode::RegistryAdd
            | SysEventCode::RegistryDelete
            | SysEventCode::RegistrySet
            | SysEventCode::RegistryQuery => Some("TargetObject"),
            SysEventCode::RegistryRename => Some("NewName"),
            SysEventCode::FileCreate
            | SysEventCode::FileModified
            | SysEventCode::FileDelete
            | SysEventCode::CreateStreamHash => Some("TargetFilename"),
            SysEventCode::RawAccessReadDetected => Some("Device"),
            SysEventCode::ThreadStart | SysEventCode::Unknown => None,
        }
    }

    /// True for registry activity (subject to the registry-interest ruleset)
    pub fn is_registry(&self) -> bool {
        matches!(
            self,
            SysEventCode::RegistryAdd
                | SysEventCode::RegistryDelete
                | SysEventCode::RegistrySet
                | SysEventCode::RegistryRename
                | SysEventCode::RegistryQuery
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SysEventCode::ProcessCreation => "ProcessCreation",
            SysEventCode::ProcessTerminated => "ProcessTerminated",
            SysEventCode::ThreadStart => "ThreadStart",
            SysEventCode::ProcessAccess => "ProcessAccess",
            SysEventCode::CreateRemoteThread => "CreateRemoteThread",
            SysEventCode::ProcessTampering => "ProcessTampering",
            SysEventCode::FileCreate => "FileCreate",
            SysEventCode::FileModified => "FileModified",
            SysEventCode::FileDelete => "FileDelete",
            SysEventCode::CreateStreamHash => "CreateStreamHash",
            SysEventCode::RawAccessReadDetected => "RawAccessReadDetected",
            SysEventCode::ImageLoad => "ImageLoad",
            SysEventCode::DriverLoad => "DriverLoad",
            SysEventCode::NetworkConnection => "NetworkConnection",
            SysEventCode::DnsQuery => "DnsQuery",
            SysEventCode::RegistryAdd => "RegistryAdd",
            SysEventCode::RegistryDelete => "RegistryDelete",
            SysEventCode::RegistrySet => "RegistrySet",
            SysEventCode::RegistryRename => "RegistryRename",
            SysEventCode::RegistryQuery => "RegistryQuery",
            SysEventCode::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for SysEventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Taxonomy of interactions between a process and an artifact
///
/// `NotActor` marks events that never instantiate a per-artifact sub-span.
/// `Accept` and `Access` are part of the closed taxonomy even though no
/// current event code maps to them; inbound-connection and handle-access
/// producers group under them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActorKind {
    Create,
    Delete,
    Modify,
    CreateStreamHash,
    Connect,
    Accept,
    Load,
    RemoteThread,
    Tampering,
    Access,
    RegAdd,
    RegDelete,
    RegSet,
    RegRename,
    RegQuery,
    RawAccessRead,
    NotActor,
}

impl ActorKind {
    /// Direction is a pure function of the kind
    pub fn direction(&self) -> Direction {
        match self {
            ActorKind::RemoteThread
            | ActorKind::Accept
            | ActorKind::Load
            | ActorKind::RawAccessRead
            | ActorKind::RegQuery => Direction::ReadRecv,
            _ => Direction::WriteSend,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActorKind::Create => "CREATE",
            ActorKind::Delete => "DELETE",
            ActorKind::Modify => "MODIFY",
            ActorKind::CreateStreamHash => "CREATE_STREAM_HASH",
            ActorKind::Connect => "CONNECT",
            ActorKind::Accept => "ACCEPT",
            ActorKind::Load => "LOAD",
            ActorKind::RemoteThread => "REMOTE_THREAD",
            ActorKind::Tampering => "TAMPERING",
            ActorKind::Access => "ACCESS",
            ActorKind::RegAdd => "REG_ADD",
            ActorKind::RegDelete => "REG_DELETE",
            ActorKind::RegSet => "REG_SET",
            ActorKind::RegRename => "REG_RENAME",
            ActorKind::RegQuery => "REG_QUERY",
            ActorKind::RawAccessRead => "RAW_ACCESS_READ_DETECTED",
            ActorKind::NotActor => "NOT_ACTOR",
        }
    }
}

impl fmt::Display for ActorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the process consumed the artifact or altered/emitted to it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// The process consumed or observed the artifact
    ReadRecv,
    /// The process altered or emitted to the artifact
    WriteSend,
}

impl Direction {
    /// Span attribute value (`act.type`)
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::ReadRecv => "read/recv",
            Direction::WriteSend => "write/send",
        }
    }
}

/// Kind of resource an actor touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArtifactKind {
    Process,
    File,
    Registry,
    Network,
    Module,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Process => "Process",
            ArtifactKind::File => "File",
            ArtifactKind::Registry => "Registry",
            ArtifactKind::Network => "Network",
            ArtifactKind::Module => "Module",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, typed resource that a process touches
///
/// Two artifacts with the same identity string are the same artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub name: String,
}

impl Artifact {
    /// Returns `None` for an empty name; artifacts are never anonymous.
    pub fn new(kind: ArtifactKind, name: impl Into<String>) -> Option<Self> {
        let name = name.into();
        if name.is_empty() {
            return None;
        }
        Some(Self { kind, name })
    }

    /// Identity string: `"{name}@{kind}"`
    pub fn identity(&self) -> String {
        format!("{}@{}", self.name, self.kind)
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.kind)
    }
}

/// A decoded system activity event
///
/// `metadata` keeps the full decoded payload so the recorder can emit it as
/// the body of the log record attached to the hosting span.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SysEvent {
    pub code: SysEventCode,
    pub timestamp: DateTime<Utc>,
    pub source: EventSource,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl SysEvent {
    /// String payload field, `None` when missing, non-string, or empty
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.metadata
            .get(name)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    /// Integer payload field; accepts numbers and numeric strings since the
    /// operational log serializes everything as text
    pub fn field_i64(&self, name: &str) -> Option<i64> {
        match self.metadata.get(name) {
            Some(serde_json::Value::Number(n)) => n.as_i64(),
            Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// The target string for this event per the per-code field table
    pub fn target(&self) -> Option<&str> {
        self.code.target_field().and_then(|f| self.field_str(f))
    }

    /// Originating pid (`ProcessId`, falling back to `SourceProcessId` for
    /// cross-process events)
    pub fn pid(&self) -> Option<i64> {
        self.field_i64("ProcessId")
            .or_else(|| self.field_i64("SourceProcessId"))
    }

    pub fn ppid(&self) -> Option<i64> {
        self.field_i64("ParentProcessId")
    }

    /// Target pid of a cross-process event (`ProcessAccess`/`CreateRemoteThread`)
    pub fn target_pid(&self) -> Option<i64> {
        self.field_i64("TargetProcessId")
    }

    pub fn image(&self) -> Option<&str> {
        self.field_str("Image")
    }

    pub fn user(&self) -> Option<&str> {
        self.field_str("User")
    }

    /// Render the payload as a single-line JSON body for log emission
    pub fn to_log_body(&self) -> String {
        serde_json::Value::Object(self.metadata.clone()).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_is_pure_function_of_kind() {
        assert_eq!(ActorKind::RemoteThread.direction(), Direction::ReadRecv);
        assert_eq!(ActorKind::Accept.direction(), Direction::ReadRecv);
        assert_eq!(ActorKind::Load.direction(), Direction::ReadRecv);
        assert_eq!(ActorKind::RawAccessRead.direction(), Direction::ReadRecv);
        assert_eq!(ActorKind::RegQuery.direction(), Direction::ReadRecv);

        assert_eq!(ActorKind::Create.direction(), Direction::WriteSend);
        assert_eq!(ActorKind::Modify.direction(), Direction::WriteSend);
        assert_eq!(ActorKind::Connect.direction(), Direction::WriteSend);
        assert_eq!(ActorKind::RegSet.direction(), Direction::WriteSend);
        assert_eq!(ActorKind::Tampering.direction(), Direction::WriteSend);
    }

    #[test]
    fn process_lifecycle_codes_are_not_actors() {
        assert_eq!(SysEventCode::ProcessCreation.actor_kind(), ActorKind::NotActor);
        assert_eq!(
            SysEventCode::ProcessTerminated.actor_kind(),
            ActorKind::NotActor
        );
        assert_eq!(SysEventCode::ThreadStart.actor_kind(), ActorKind::NotActor);
    }

    #[test]
    fn cross_process_codes_group_under_remote_thread() {
        assert_eq!(
            SysEventCode::ProcessAccess.actor_kind(),
            ActorKind::RemoteThread
        );
        assert_eq!(
            SysEventCode::CreateRemoteThread.actor_kind(),
            ActorKind::RemoteThread
        );
        assert_eq!(
            SysEventCode::ProcessAccess.artifact_kind(),
            Some(ArtifactKind::Process)
        );
    }

    #[test]
    fn artifact_identity_includes_kind() {
        let a = Artifact::new(ArtifactKind::File, "C:/x.txt").unwrap();
        assert_eq!(a.identity(), "C:/x.txt@File");
        // Same name, different kind: different artifact
        let b = Artifact::new(ArtifactKind::Registry, "C:/x.txt").unwrap();
        assert_ne!(a.identity(), b.identity());
    }

    #[test]
    fn artifact_rejects_empty_name() {
        assert!(Artifact::new(ArtifactKind::File, "").is_none());
    }

    #[test]
    fn target_extraction_uses_per_code_field() {
        let mut metadata = serde_json::Map::new();
        metadata.insert("TargetObject".into(), "HKLM\\Software\\Run".into());
        metadata.insert("NewName".into(), "HKLM\\Software\\Renamed".into());

        let mut ev = SysEvent {
            code: SysEventCode::RegistrySet,
            timestamp: Utc::now(),
            source: EventSource::Sysmon,
            metadata,
        };
        assert_eq!(ev.target(), Some("HKLM\\Software\\Run"));

        ev.code = SysEventCode::RegistryRename;
        assert_eq!(ev.target(), Some("HKLM\\Software\\Renamed"));

        ev.code = SysEventCode::ThreadStart;
        assert_eq!(ev.target(), None);
    }

    #[test]
    fn numeric_fields_parse_from_strings() {
        let mut metadata = serde_json::Map::new();
        metadata.insert("ProcessId".into(), "4212".into());
        metadata.insert("ParentProcessId".into(), serde_json::json!(600));
        let ev = SysEvent {
            code: SysEventCode::ProcessCreation,
            timestamp: Utc::now(),
            source: EventSource::Kernel,
            metadata,
        };
        assert_eq!(ev.pid(), Some(4212));
        assert_eq!(ev.ppid(), Some(600));
    }
}
