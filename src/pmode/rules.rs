//! Receiving PMode scoring rules
//!
//! Each rule is a pure function of (PMode, UserMessage) that yields either its
//! fixed weight or zero. Missing message fields never error; they simply do
//! not score.

use super::{PModePartyInfo, ReceivingPMode};
use crate::protocol::{Party, UserMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PModeRule {
    Id,
    PartyInfo,
    UndefinedPartyInfo,
    AgreementRef,
    ServiceAction,
}

impl PModeRule {
    pub const ALL: [PModeRule; 5] = [
        PModeRule::Id,
        PModeRule::PartyInfo,
        PModeRule::UndefinedPartyInfo,
        PModeRule::AgreementRef,
        PModeRule::ServiceAction,
    ];

    pub fn weight(&self) -> u32 {
        match self {
            PModeRule::Id => 32,
            PModeRule::PartyInfo => 16,
            PModeRule::UndefinedPartyInfo => 1,
            PModeRule::AgreementRef => 4,
            PModeRule::ServiceAction => 8,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PModeRule::Id => "id",
            PModeRule::PartyInfo => "party_info",
            PModeRule::UndefinedPartyInfo => "undefined_party_info",
            PModeRule::AgreementRef => "agreement_ref",
            PModeRule::ServiceAction => "service_action",
        }
    }

    /// Points this rule awards to `pmode` for `message`
    pub fn points(&self, pmode: &ReceivingPMode, message: &UserMessage) -> u32 {
        let matched = match self {
            PModeRule::Id => message.pmode_hint() == Some(pmode.id.as_str()),
            PModeRule::PartyInfo => pmode
                .party_info
                .as_ref()
                .is_some_and(|expected| party_info_matches(expected, message)),
            PModeRule::UndefinedPartyInfo => pmode.has_undefined_party_info(),
            PModeRule::AgreementRef => agreement_matches(pmode, message),
            PModeRule::ServiceAction => service_action_matches(pmode, message),
        };
        if matched {
            self.weight()
        } else {
            0
        }
    }
}

fn party_info_matches(expected: &PModePartyInfo, message: &UserMessage) -> bool {
    if expected.is_empty() {
        return false;
    }
    let side_matches = |expected: &Option<Party>, actual: &Option<Party>| match (expected, actual) {
        (None, _) => true,
        (Some(expected), Some(actual)) => party_equals(expected, actual),
        (Some(_), None) => false,
    };
    side_matches(&expected.from, &message.party_info.from)
        && side_matches(&expected.to, &message.party_info.to)
}

/// Same role and the same set of (id, type) pairs
fn party_equals(expected: &Party, actual: &Party) -> bool {
    if expected.role != actual.role || expected.party_ids.len() != actual.party_ids.len() {
        return false;
    }
    expected
        .party_ids
        .iter()
        .all(|party_id| actual.party_ids.contains(party_id))
}

fn agreement_matches(pmode: &ReceivingPMode, message: &UserMessage) -> bool {
    let (Some(expected), Some(actual)) = (
        pmode.agreement.as_ref(),
        message.collaboration_info.agreement_reference.as_ref(),
    ) else {
        return false;
    };
    expected.value == actual.value
        && expected
            .agreement_type
            .as_ref()
            .map_or(true, |t| actual.agreement_type.as_ref() == Some(t))
        && expected
            .pmode_id
            .as_ref()
            .map_or(true, |id| actual.pmode_id.as_ref() == Some(id))
}

fn service_action_matches(pmode: &ReceivingPMode, message: &UserMessage) -> bool {
    let collaboration = &message.collaboration_info;
    let (Some(expected_service), Some(expected_action), Some(service), Some(action)) = (
        pmode.service.as_ref(),
        pmode.action.as_ref(),
        collaboration.service.as_ref(),
        collaboration.action.as_ref(),
    ) else {
        return false;
    };
    expected_service.value == service.value
        && expected_service
            .service_type
            .as_ref()
            .map_or(true, |t| service.service_type.as_ref() == Some(t))
        && expected_action == action
}
