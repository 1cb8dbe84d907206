//! Canned messages and certificate material
//!
//! The certificates form a small PKI: `root` issues the `party-a.example`
//! (sender) and `party-b.example` (receiver) certificates; `rogue-root`
//! issues the `rogue` certificate, which no default trust store accepts.

use crate::protocol::{
    AgreementReference, As4Message, Attachment, CollaborationInfo, MessageInfo, PartInfo, Party,
    PartyId, PartyInfo, Service, UserMessage,
};
use crate::security::{
    Certificate, InMemoryCertificateRepository, SecurityError, SigningCredential, TrustStore,
};
use std::collections::BTreeMap;

pub const ROOT_CERT: &[u8] = include_bytes!("../../tests/fixtures/certs/root.der");
pub const ROGUE_ROOT_CERT: &[u8] = include_bytes!("../../tests/fixtures/certs/rogue-root.der");
pub const SENDER_CERT: &[u8] = include_bytes!("../../tests/fixtures/certs/sender.der");
pub const SENDER_KEY: &[u8] = include_bytes!("../../tests/fixtures/certs/sender.key.der");
pub const RECEIVER_CERT: &[u8] = include_bytes!("../../tests/fixtures/certs/receiver.der");
pub const RECEIVER_KEY: &[u8] = include_bytes!("../../tests/fixtures/certs/receiver.key.der");
pub const ROGUE_CERT: &[u8] = include_bytes!("../../tests/fixtures/certs/rogue.der");
pub const ROGUE_KEY: &[u8] = include_bytes!("../../tests/fixtures/certs/rogue.key.der");

pub const SENDER_PARTY: &str = "party-a";
pub const RECEIVER_PARTY: &str = "party-b";
pub const SENDER_ROLE: &str = "http://docs.oasis-open.org/ebxml-msg/ebms/v3.0/ns/core/200704/initiator";
pub const RECEIVER_ROLE: &str = "http://docs.oasis-open.org/ebxml-msg/ebms/v3.0/ns/core/200704/responder";

pub fn sender_credential() -> Result<SigningCredential, SecurityError> {
    SigningCredential::from_der(SENDER_CERT, SENDER_KEY)
}

pub fn receiver_credential() -> Result<SigningCredential, SecurityError> {
    SigningCredential::from_der(RECEIVER_CERT, RECEIVER_KEY)
}

pub fn rogue_credential() -> Result<SigningCredential, SecurityError> {
    SigningCredential::from_der(ROGUE_CERT, ROGUE_KEY)
}

/// Trust store anchored at the fixture root
pub fn fixture_trust_store() -> TrustStore {
    TrustStore::new(vec![ROOT_CERT.to_vec()], Vec::new())
}

/// Repository as seen by the sending MSH: own key pair plus the receiver certificate
pub fn sender_repository() -> Result<InMemoryCertificateRepository, SecurityError> {
    Ok(InMemoryCertificateRepository::new(fixture_trust_store())
        .with_credential(sender_credential()?)
        .with_certificate(Certificate::from_der(RECEIVER_CERT)?))
}

/// Repository as seen by the receiving MSH: own key pair plus the sender certificate
pub fn receiver_repository() -> Result<InMemoryCertificateRepository, SecurityError> {
    Ok(InMemoryCertificateRepository::new(fixture_trust_store())
        .with_credential(receiver_credential()?)
        .with_certificate(Certificate::from_der(SENDER_CERT)?))
}

/// UserMessage from `party-a` to `party-b` for the `invoice`/`submit` service
pub fn sample_user_message(message_id: &str) -> UserMessage {
    UserMessage {
        message_info: MessageInfo {
            message_id: message_id.to_string(),
            ..MessageInfo::generate()
        },
        party_info: PartyInfo {
            from: Some(Party::new(PartyId::new(SENDER_PARTY), SENDER_ROLE)),
            to: Some(Party::new(PartyId::new(RECEIVER_PARTY), RECEIVER_ROLE)),
        },
        collaboration_info: CollaborationInfo {
            agreement_reference: Some(AgreementReference {
                value: "urn:agreement:invoicing".to_string(),
                agreement_type: None,
                pmode_id: None,
            }),
            service: Some(Service {
                value: "invoice".to_string(),
                service_type: None,
            }),
            action: Some("submit".to_string()),
            conversation_id: Some("conversation-1".to_string()),
        },
        message_properties: BTreeMap::new(),
        payload_info: Vec::new(),
    }
}

/// Message wrapping [`sample_user_message`] with `attachments` listed in its payload info
pub fn sample_message(message_id: &str, attachments: Vec<Attachment>) -> As4Message {
    let mut user_message = sample_user_message(message_id);
    user_message.payload_info = attachments
        .iter()
        .map(|attachment| PartInfo {
            href: attachment.cid_uri(),
            properties: BTreeMap::new(),
        })
        .collect();
    As4Message::from_user_message(user_message, attachments)
}

/// Deterministic attachment of `len` bytes
pub fn sample_attachment(content_id: &str, len: usize) -> Attachment {
    let content: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    Attachment::new(content_id, "application/xml", content)
}
