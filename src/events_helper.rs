use kube::runtime::events::{Event, EventType, Recorder};
use kube::{Resource, ResourceExt};

/// Milestones of the swap and routing loops surfaced as Kubernetes Events
/// on the object that drove them (the Certificate for swap events, the
/// solver Pod for routing events).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperatorEvent {
    TemporaryCertificateCreated,
    TemporaryCertificateDeleted,
    GatewaySwapped,
    GatewayRestored,
    ChallengeRouteCreated,
    ChallengeRouteUpdated,
    ChallengeRouteDeleted,
}

impl OperatorEvent {
    pub fn reason(self) -> &'static str {
        match self {
            Self::TemporaryCertificateCreated => "TemporaryCertificateCreated",
            Self::TemporaryCertificateDeleted => "TemporaryCertificateDeleted",
            Self::GatewaySwapped => "GatewaySwapped",
            Self::GatewayRestored => "GatewayRestored",
            Self::ChallengeRouteCreated => "ChallengeRouteCreated",
            Self::ChallengeRouteUpdated => "ChallengeRouteUpdated",
            Self::ChallengeRouteDeleted => "ChallengeRouteDeleted",
        }
    }

    pub fn action(self) -> &'static str {
        match self {
            Self::TemporaryCertificateCreated | Self::ChallengeRouteCreated => "Created",
            Self::GatewaySwapped | Self::GatewayRestored | Self::ChallengeRouteUpdated => "Updated",
            Self::TemporaryCertificateDeleted | Self::ChallengeRouteDeleted => "Deleted",
        }
    }
}

/// Publish a Normal event for an operator milestone. Publish failures are
/// swallowed: events are best-effort diagnostics, never control flow.
pub async fn emit_event<R: Resource<DynamicType = ()> + ResourceExt>(
    recorder: &Recorder,
    obj: &R,
    event: OperatorEvent,
    note: impl Into<Option<String>>,
) {
    let _ = recorder
        .publish(
            &Event {
                type_: EventType::Normal,
                reason: event.reason().into(),
                note: note.into(),
                action: event.action().into(),
                secondary: None,
            },
            &obj.object_ref(&()),
        )
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_are_stable_identifiers() {
        // Reasons end up in `kubectl get events`; they must stay PascalCase
        // and unique per milestone
        let all = [
            OperatorEvent::TemporaryCertificateCreated,
            OperatorEvent::TemporaryCertificateDeleted,
            OperatorEvent::GatewaySwapped,
            OperatorEvent::GatewayRestored,
            OperatorEvent::ChallengeRouteCreated,
            OperatorEvent::ChallengeRouteUpdated,
            OperatorEvent::ChallengeRouteDeleted,
        ];
        let reasons: std::collections::BTreeSet<&str> =
            all.iter().map(|e| e.reason()).collect();
        assert_eq!(reasons.len(), all.len());
        assert!(reasons.iter().all(|r| !r.contains(' ')));
    }

    #[test]
    fn actions_match_the_lifecycle_verb() {
        assert_eq!(OperatorEvent::TemporaryCertificateCreated.action(), "Created");
        assert_eq!(OperatorEvent::GatewaySwapped.action(), "Updated");
        assert_eq!(OperatorEvent::GatewayRestored.action(), "Updated");
        assert_eq!(OperatorEvent::ChallengeRouteDeleted.action(), "Deleted");
    }
}
