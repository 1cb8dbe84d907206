//! Receiving PMode resolution by weighted scoring

use super::rules::PModeRule;
use super::ReceivingPMode;
use crate::protocol::UserMessage;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("No receiving PModes are configured")]
    NoConfiguration,

    #[error("No receiving PMode matches message {message_id}")]
    NoMatch { message_id: String },

    #[error("Receiving PModes {pmode_ids:?} tie with {points} points for message {message_id}")]
    Ambiguous {
        message_id: String,
        points: u32,
        pmode_ids: Vec<String>,
    },

    #[error("Sending PMode '{0}' is not configured")]
    UnknownSendingPMode(String),

    #[error("Message carries no unit to resolve a PMode for")]
    NothingToResolve,
}

/// A candidate PMode with its accumulated score
#[derive(Debug, Clone)]
pub struct PModeParticipant<'a> {
    pub pmode: &'a ReceivingPMode,
    pub points: u32,
}

/// Score every candidate against `message`
pub fn score_candidates<'a>(
    message: &UserMessage,
    candidates: &'a [ReceivingPMode],
) -> Vec<PModeParticipant<'a>> {
    candidates
        .iter()
        .map(|pmode| PModeParticipant {
            pmode,
            points: PModeRule::ALL
                .iter()
                .map(|rule| rule.points(pmode, message))
                .sum(),
        })
        .collect()
}

/// Select the single receiving PMode with the strictly highest score
pub fn resolve_receiving_pmode(
    message: &UserMessage,
    candidates: &[ReceivingPMode],
) -> Result<ReceivingPMode, ResolutionError> {
    if candidates.is_empty() {
        return Err(ResolutionError::NoConfiguration);
    }

    let participants = score_candidates(message, candidates);
    let best = participants.iter().map(|p| p.points).max().unwrap_or(0);
    if best == 0 {
        return Err(ResolutionError::NoMatch {
            message_id: message.message_id().to_string(),
        });
    }

    let winners: Vec<&PModeParticipant<'_>> =
        participants.iter().filter(|p| p.points == best).collect();
    match winners.as_slice() {
        [winner] => {
            debug!(
                message_id = message.message_id(),
                pmode_id = %winner.pmode.id,
                points = best,
                candidates = candidates.len(),
                "Receiving PMode resolved"
            );
            Ok(winner.pmode.clone())
        }
        tied => {
            let pmode_ids: Vec<String> = tied.iter().map(|p| p.pmode.id.clone()).collect();
            warn!(
                message_id = message.message_id(),
                points = best,
                pmode_ids = ?pmode_ids,
                "Ambiguous receiving PMode resolution"
            );
            Err(ResolutionError::Ambiguous {
                message_id: message.message_id().to_string(),
                points: best,
                pmode_ids,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmode::{PModePartyInfo, PModeService};
    use crate::protocol::{
        CollaborationInfo, MessageInfo, Party, PartyId, PartyInfo, Service,
    };
    use proptest::prelude::*;

    fn message(action: Option<&str>) -> UserMessage {
        UserMessage {
            message_info: MessageInfo::generate(),
            party_info: PartyInfo {
                from: Some(Party::new(PartyId::new("party-a"), "Sender")),
                to: Some(Party::new(PartyId::new("party-b"), "Receiver")),
            },
            collaboration_info: CollaborationInfo {
                agreement_reference: None,
                service: Some(Service {
                    value: "orders".to_string(),
                    service_type: None,
                }),
                action: action.map(str::to_string),
                conversation_id: None,
            },
            message_properties: Default::default(),
            payload_info: vec![],
        }
    }

    fn party_pmode(id: &str) -> ReceivingPMode {
        let mut pmode = ReceivingPMode::new(id);
        pmode.party_info = Some(PModePartyInfo {
            from: Some(Party::new(PartyId::new("party-a"), "Sender")),
            to: Some(Party::new(PartyId::new("party-b"), "Receiver")),
        });
        pmode
    }

    fn with_service_action(mut pmode: ReceivingPMode, action: &str) -> ReceivingPMode {
        pmode.service = Some(PModeService {
            value: "orders".to_string(),
            service_type: None,
        });
        pmode.action = Some(action.to_string());
        pmode
    }

    #[test]
    fn test_party_and_action_beat_party_only() {
        let p1 = with_service_action(party_pmode("p1"), "Submit");
        let p2 = party_pmode("p2");
        let candidates = vec![p2, p1];

        let scores = score_candidates(&message(Some("Submit")), &candidates);
        assert_eq!(scores[0].points, 16);
        assert_eq!(scores[1].points, 24);

        let resolved = resolve_receiving_pmode(&message(Some("Submit")), &candidates).unwrap();
        assert_eq!(resolved.id, "p1");
    }

    #[test]
    fn test_no_configuration() {
        assert_eq!(
            resolve_receiving_pmode(&message(None), &[]),
            Err(ResolutionError::NoConfiguration)
        );
    }

    #[test]
    fn test_zero_score_is_no_match() {
        let mut pmode = party_pmode("p");
        pmode.party_info.as_mut().unwrap().from =
            Some(Party::new(PartyId::new("stranger"), "Sender"));
        let err = resolve_receiving_pmode(&message(None), &[pmode]).unwrap_err();
        assert!(matches!(err, ResolutionError::NoMatch { .. }));
    }

    #[test]
    fn test_undefined_party_info_scores_lowest_match() {
        let catch_all = ReceivingPMode::new("catch-all");
        let resolved = resolve_receiving_pmode(&message(None), &[catch_all]).unwrap();
        assert_eq!(resolved.id, "catch-all");
    }

    #[test]
    fn test_tie_is_ambiguous() {
        let err =
            resolve_receiving_pmode(&message(None), &[party_pmode("a"), party_pmode("b")]).unwrap_err();
        match err {
            ResolutionError::Ambiguous { points, pmode_ids, .. } => {
                assert_eq!(points, 16);
                assert_eq!(pmode_ids, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    fn test_pmode_hint_dominates() {
        let mut message = message(Some("Submit"));
        message.collaboration_info.agreement_reference = Some(crate::protocol::AgreementReference {
            value: "agreement".to_string(),
            agreement_type: None,
            pmode_id: Some("hinted".to_string()),
        });
        let candidates = vec![
            with_service_action(party_pmode("specific"), "Submit"),
            ReceivingPMode::new("hinted"),
        ];
        assert_eq!(resolve_receiving_pmode(&message, &candidates).unwrap().id, "hinted");
    }

    proptest! {
        #[test]
        fn total_is_sum_of_rule_contributions(
            define_party in any::<bool>(),
            define_service in any::<bool>(),
            hint_matches in any::<bool>(),
            action in prop::option::of("Submit|Cancel"),
        ) {
            let mut pmode = if define_party { party_pmode("pm") } else { ReceivingPMode::new("pm") };
            if define_service {
                pmode = with_service_action(pmode, "Submit");
            }
            let mut message = message(action.as_deref());
            if hint_matches {
                message.collaboration_info.agreement_reference = Some(crate::protocol::AgreementReference {
                    value: "a".to_string(),
                    agreement_type: None,
                    pmode_id: Some("pm".to_string()),
                });
            }

            let candidates = [pmode];
            let total = score_candidates(&message, &candidates)[0].points;
            let mut reversed: Vec<u32> = PModeRule::ALL.iter().rev().map(|r| r.points(&candidates[0], &message)).collect();
            reversed.reverse();
            prop_assert_eq!(total, reversed.iter().sum::<u32>());
            for (rule, points) in PModeRule::ALL.iter().zip(reversed) {
                prop_assert!(points == 0 || points == rule.weight());
            }
        }
    }
}
