//! Trace context identities
//!
//! A process context is identified by `"{artifact_id}@LAUNCH"`, an actor
//! context by `"{artifact_id}@{kind}"`. The identity strings double as span
//! names and as the `parent.context` attribute stamped on child spans at
//! stop time.

use crate::events::{ActorKind, Artifact};
use std::fmt;

/// Identity of a live process span
#[derive(Debug, Clone)]
pub struct ProcessContext {
    /// The process image as an artifact
    pub artifact: Artifact,
    /// Parent process artifact, when the parent was tracked at create time
    pub parent: Option<Artifact>,
}

impl ProcessContext {
    pub fn new(artifact: Artifact, parent: Option<Artifact>) -> Self {
        Self { artifact, parent }
    }

    /// `"{artifact_id}@LAUNCH"`
    pub fn identity(&self) -> String {
        format!("{}@LAUNCH", self.artifact.identity())
    }

    /// Identity of the parent process context, when one was resolved
    pub fn parent_identity(&self) -> Option<String> {
        self.parent
            .as_ref()
            .map(|p| format!("{}@LAUNCH", p.identity()))
    }
}

impl fmt::Display for ProcessContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identity())
    }
}

/// Identity of a per-artifact, per-direction interaction span
#[derive(Debug, Clone)]
pub struct ActorContext {
    /// The artifact being acted on
    pub artifact: Artifact,
    pub kind: ActorKind,
    /// Owning process artifact
    pub parent_process: Artifact,
}

impl ActorContext {
    pub fn new(artifact: Artifact, kind: ActorKind, parent_process: Artifact) -> Self {
        Self {
            artifact,
            kind,
            parent_process,
        }
    }

    /// `"{artifact_id}@{kind}"`
    pub fn identity(&self) -> String {
        format!("{}@{}", self.artifact.identity(), self.kind)
    }

    /// Identity of the owning process context
    pub fn parent_identity(&self) -> String {
        format!("{}@LAUNCH", self.parent_process.identity())
    }
}

impl fmt::Display for ActorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ArtifactKind, Direction};

    fn proc_artifact(name: &str) -> Artifact {
        Artifact::new(ArtifactKind::Process, name).unwrap()
    }

    #[test]
    fn process_identity_ends_with_launch() {
        let ctx = ProcessContext::new(proc_artifact("C:\\a.exe"), None);
        assert_eq!(ctx.identity(), "C:\\a.exe@Process@LAUNCH");
        assert_eq!(ctx.parent_identity(), None);
    }

    #[test]
    fn parent_identity_resolves_when_parent_known() {
        let ctx = ProcessContext::new(
            proc_artifact("C:\\child.exe"),
            Some(proc_artifact("C:\\parent.exe")),
        );
        assert_eq!(
            ctx.parent_identity().as_deref(),
            Some("C:\\parent.exe@Process@LAUNCH")
        );
    }

    #[test]
    fn actor_identity_carries_kind() {
        let ctx = ActorContext::new(
            Artifact::new(ArtifactKind::File, "C:\\x.txt").unwrap(),
            ActorKind::Create,
            proc_artifact("C:\\a.exe"),
        );
        assert_eq!(ctx.identity(), "C:\\x.txt@File@CREATE");
        assert_eq!(ctx.parent_identity(), "C:\\a.exe@Process@LAUNCH");
        assert_eq!(ctx.kind.direction(), Direction::WriteSend);
    }
}
