//! ebMS3 message units
//!
//! This module defines the message units an AS4 envelope carries (UserMessage,
//! Receipt and Error signals) together with their rendering into the ebMS
//! `Messaging` header element tree.

use super::xml::XmlElement;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Party identifier with optional type URI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartyId {
    pub id: String,
    #[serde(rename = "type", default)]
    pub party_type: Option<String>,
}

impl PartyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            party_type: None,
        }
    }

    pub fn typed(id: impl Into<String>, party_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            party_type: Some(party_type.into()),
        }
    }
}

/// Sending or receiving party: one or more ids plus a role
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Party {
    pub party_ids: Vec<PartyId>,
    pub role: String,
}

impl Party {
    pub fn new(party_id: PartyId, role: impl Into<String>) -> Self {
        Self {
            party_ids: vec![party_id],
            role: role.into(),
        }
    }

    fn to_element(&self, name: &str) -> XmlElement {
        let mut element = XmlElement::new(name);
        for party_id in &self.party_ids {
            let mut id = XmlElement::with_text("eb:PartyId", party_id.id.clone());
            if let Some(party_type) = &party_id.party_type {
                id = id.attr("type", party_type.clone());
            }
            element = element.child(id);
        }
        element.child(XmlElement::with_text("eb:Role", self.role.clone()))
    }
}

/// From/To parties of a UserMessage; either side may be absent on malformed input
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartyInfo {
    pub from: Option<Party>,
    pub to: Option<Party>,
}

/// Agreement under which the message is exchanged
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgreementReference {
    pub value: String,
    #[serde(rename = "type", default)]
    pub agreement_type: Option<String>,
    /// ebMS `pmode` attribute: the sender's hint of the governing PMode id
    #[serde(default)]
    pub pmode_id: Option<String>,
}

/// Business service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Service {
    pub value: String,
    #[serde(rename = "type", default)]
    pub service_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollaborationInfo {
    pub agreement_reference: Option<AgreementReference>,
    pub service: Option<Service>,
    pub action: Option<String>,
    pub conversation_id: Option<String>,
}

/// Identification block shared by all message units
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageInfo {
    pub message_id: String,
    pub ref_to_message_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl MessageInfo {
    /// Fresh message info with a generated message id
    pub fn generate() -> Self {
        Self {
            message_id: format!("{}@as4msh", Uuid::new_v4()),
            ref_to_message_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Fresh message info referring to another message
    pub fn referring_to(ref_to_message_id: impl Into<String>) -> Self {
        Self {
            ref_to_message_id: Some(ref_to_message_id.into()),
            ..Self::generate()
        }
    }

    fn to_element(&self) -> XmlElement {
        XmlElement::new("eb:MessageInfo")
            .child(XmlElement::with_text(
                "eb:Timestamp",
                self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            ))
            .child(XmlElement::with_text("eb:MessageId", self.message_id.clone()))
            .child_opt(
                self.ref_to_message_id
                    .as_ref()
                    .map(|id| XmlElement::with_text("eb:RefToMessageId", id.clone())),
            )
    }
}

/// Reference from the PayloadInfo block to a payload part
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartInfo {
    pub href: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// Business document message unit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserMessage {
    pub message_info: MessageInfo,
    #[serde(default)]
    pub party_info: PartyInfo,
    #[serde(default)]
    pub collaboration_info: CollaborationInfo,
    #[serde(default)]
    pub message_properties: BTreeMap<String, String>,
    #[serde(default)]
    pub payload_info: Vec<PartInfo>,
}

impl UserMessage {
    pub fn message_id(&self) -> &str {
        &self.message_info.message_id
    }

    /// PMode id hint carried in the agreement reference
    pub fn pmode_hint(&self) -> Option<&str> {
        self.collaboration_info
            .agreement_reference
            .as_ref()
            .and_then(|agreement| agreement.pmode_id.as_deref())
    }

    pub fn to_element(&self) -> XmlElement {
        let party_info = XmlElement::new("eb:PartyInfo")
            .child_opt(self.party_info.from.as_ref().map(|p| p.to_element("eb:From")))
            .child_opt(self.party_info.to.as_ref().map(|p| p.to_element("eb:To")));

        let collaboration = &self.collaboration_info;
        let collaboration_info = XmlElement::new("eb:CollaborationInfo")
            .child_opt(collaboration.agreement_reference.as_ref().map(|agreement| {
                let mut element = XmlElement::with_text("eb:AgreementRef", agreement.value.clone());
                if let Some(agreement_type) = &agreement.agreement_type {
                    element = element.attr("type", agreement_type.clone());
                }
                if let Some(pmode_id) = &agreement.pmode_id {
                    element = element.attr("pmode", pmode_id.clone());
                }
                element
            }))
            .child_opt(collaboration.service.as_ref().map(|service| {
                let mut element = XmlElement::with_text("eb:Service", service.value.clone());
                if let Some(service_type) = &service.service_type {
                    element = element.attr("type", service_type.clone());
                }
                element
            }))
            .child_opt(
                collaboration
                    .action
                    .as_ref()
                    .map(|action| XmlElement::with_text("eb:Action", action.clone())),
            )
            .child_opt(
                collaboration
                    .conversation_id
                    .as_ref()
                    .map(|id| XmlElement::with_text("eb:ConversationId", id.clone())),
            );

        let message_properties = (!self.message_properties.is_empty()).then(|| {
            self.message_properties
                .iter()
                .fold(XmlElement::new("eb:MessageProperties"), |acc, (name, value)| {
                    acc.child(XmlElement::with_text("eb:Property", value.clone()).attr("name", name.clone()))
                })
        });

        let payload_info = (!self.payload_info.is_empty()).then(|| {
            self.payload_info.iter().fold(XmlElement::new("eb:PayloadInfo"), |acc, part| {
                let properties = part.properties.iter().fold(
                    XmlElement::new("eb:PartProperties"),
                    |props, (name, value)| {
                        props.child(XmlElement::with_text("eb:Property", value.clone()).attr("name", name.clone()))
                    },
                );
                acc.child(XmlElement::new("eb:PartInfo").attr("href", part.href.clone()).child(properties))
            })
        });

        XmlElement::new("eb:UserMessage")
            .child(self.message_info.to_element())
            .child(party_info)
            .child(collaboration_info)
            .child_opt(message_properties)
            .child_opt(payload_info)
    }
}

/// Digest of one signed part, echoed back in a non-repudiation receipt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessagePartReference {
    pub uri: String,
    pub digest_method: String,
    pub digest_value: String,
}

/// Receipt body: NRR digests, or a copy of the received UserMessage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReceiptContent {
    NonRepudiation(Vec<MessagePartReference>),
    UserMessage(Box<UserMessage>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Receipt {
    pub message_info: MessageInfo,
    pub content: ReceiptContent,
}

impl Receipt {
    fn to_element(&self) -> XmlElement {
        let content = match &self.content {
            ReceiptContent::NonRepudiation(references) => references.iter().fold(
                XmlElement::new("ebbp:NonRepudiationInformation"),
                |acc, reference| {
                    acc.child(
                        XmlElement::new("ebbp:MessagePartNRInformation").child(
                            XmlElement::new("ds:Reference")
                                .attr("URI", reference.uri.clone())
                                .child(
                                    XmlElement::new("ds:DigestMethod")
                                        .attr("Algorithm", reference.digest_method.clone()),
                                )
                                .child(XmlElement::with_text(
                                    "ds:DigestValue",
                                    reference.digest_value.clone(),
                                )),
                        ),
                    )
                },
            ),
            ReceiptContent::UserMessage(user_message) => user_message.to_element(),
        };
        XmlElement::new("eb:SignalMessage")
            .child(self.message_info.to_element())
            .child(XmlElement::new("eb:Receipt").child(content))
    }
}

/// ebMS error codes used by this MSH
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    /// EBMS:0004
    Other,
    /// EBMS:0010
    ProcessingModeMismatch,
    /// EBMS:0101
    FailedAuthentication,
    /// EBMS:0102
    FailedDecryption,
    /// EBMS:0103
    PolicyNoncompliance,
    /// EBMS:0202
    DeliveryFailure,
    /// EBMS:0301
    MissingReceipt,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Other => "EBMS:0004",
            ErrorCode::ProcessingModeMismatch => "EBMS:0010",
            ErrorCode::FailedAuthentication => "EBMS:0101",
            ErrorCode::FailedDecryption => "EBMS:0102",
            ErrorCode::PolicyNoncompliance => "EBMS:0103",
            ErrorCode::DeliveryFailure => "EBMS:0202",
            ErrorCode::MissingReceipt => "EBMS:0301",
        }
    }

    pub fn short_description(&self) -> &'static str {
        match self {
            ErrorCode::Other => "Other",
            ErrorCode::ProcessingModeMismatch => "ProcessingModeMismatch",
            ErrorCode::FailedAuthentication => "FailedAuthentication",
            ErrorCode::FailedDecryption => "FailedDecryption",
            ErrorCode::PolicyNoncompliance => "PolicyNoncompliance",
            ErrorCode::DeliveryFailure => "DeliveryFailure",
            ErrorCode::MissingReceipt => "MissingReceipt",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Severity {
    Failure,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub severity: Severity,
    pub ref_to_message_in_error: Option<String>,
    pub detail: String,
}

/// Error signal reporting faults on a referenced message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorSignal {
    pub message_info: MessageInfo,
    pub errors: Vec<ErrorDetail>,
}

impl ErrorSignal {
    fn to_element(&self) -> XmlElement {
        self.errors.iter().fold(
            XmlElement::new("eb:SignalMessage").child(self.message_info.to_element()),
            |acc, error| {
                let mut element = XmlElement::new("eb:Error")
                    .attr("errorCode", error.code.as_str())
                    .attr("shortDescription", error.code.short_description())
                    .attr(
                        "severity",
                        match error.severity {
                            Severity::Failure => "failure",
                            Severity::Warning => "warning",
                        },
                    )
                    .child(XmlElement::with_text("eb:ErrorDetail", error.detail.clone()));
                if let Some(reference) = &error.ref_to_message_in_error {
                    element = element.attr("refToMessageInError", reference.clone());
                }
                acc.child(element)
            },
        )
    }
}

/// One message unit inside the ebMS Messaging header
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageUnit {
    User(UserMessage),
    Receipt(Receipt),
    Error(ErrorSignal),
}

impl MessageUnit {
    pub fn message_info(&self) -> &MessageInfo {
        match self {
            MessageUnit::User(user) => &user.message_info,
            MessageUnit::Receipt(receipt) => &receipt.message_info,
            MessageUnit::Error(error) => &error.message_info,
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_info().message_id
    }

    pub fn is_signal(&self) -> bool {
        !matches!(self, MessageUnit::User(_))
    }

    pub fn to_element(&self) -> XmlElement {
        match self {
            MessageUnit::User(user) => user.to_element(),
            MessageUnit::Receipt(receipt) => receipt.to_element(),
            MessageUnit::Error(error) => error.to_element(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user_message() -> UserMessage {
        UserMessage {
            message_info: MessageInfo::generate(),
            party_info: PartyInfo {
                from: Some(Party::new(PartyId::new("org:party-a"), "Sender")),
                to: Some(Party::new(PartyId::typed("org:party-b", "urn:oasis:names:tc:ebcore:partyid-type:unregistered"), "Receiver")),
            },
            collaboration_info: CollaborationInfo {
                agreement_reference: Some(AgreementReference {
                    value: "agreement-1".to_string(),
                    agreement_type: None,
                    pmode_id: Some("pmode-1".to_string()),
                }),
                service: Some(Service {
                    value: "urn:service:orders".to_string(),
                    service_type: None,
                }),
                action: Some("Submit".to_string()),
                conversation_id: Some("conv-1".to_string()),
            },
            message_properties: BTreeMap::new(),
            payload_info: vec![PartInfo {
                href: "cid:payload-1".to_string(),
                properties: BTreeMap::new(),
            }],
        }
    }

    #[test]
    fn test_generated_message_ids_are_unique() {
        let first = MessageInfo::generate();
        let second = MessageInfo::generate();
        assert_ne!(first.message_id, second.message_id);
        assert!(first.message_id.ends_with("@as4msh"));
    }

    #[test]
    fn test_pmode_hint() {
        let message = sample_user_message();
        assert_eq!(message.pmode_hint(), Some("pmode-1"));

        let mut without_agreement = message;
        without_agreement.collaboration_info.agreement_reference = None;
        assert_eq!(without_agreement.pmode_hint(), None);
    }

    #[test]
    fn test_user_message_element_reflects_collaboration_info() {
        let message = sample_user_message();
        let canonical = String::from_utf8(message.to_element().canonicalize()).unwrap();

        assert!(canonical.starts_with("<eb:UserMessage>"));
        assert!(canonical.contains(r#"<eb:AgreementRef pmode="pmode-1">agreement-1</eb:AgreementRef>"#));
        assert!(canonical.contains("<eb:Action>Submit</eb:Action>"));
        assert!(canonical.contains(r#"<eb:PartInfo href="cid:payload-1">"#));
    }

    #[test]
    fn test_user_message_element_changes_with_action() {
        let message = sample_user_message();
        let mut tampered = message.clone();
        tampered.collaboration_info.action = Some("Cancel".to_string());

        assert_ne!(message.to_element().canonicalize(), tampered.to_element().canonicalize());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ErrorCode::ProcessingModeMismatch.as_str(), "EBMS:0010");
        assert_eq!(ErrorCode::FailedAuthentication.as_str(), "EBMS:0101");
        assert_eq!(ErrorCode::MissingReceipt.short_description(), "MissingReceipt");
    }

    #[test]
    fn test_signal_detection() {
        let receipt = MessageUnit::Receipt(Receipt {
            message_info: MessageInfo::referring_to("abc"),
            content: ReceiptContent::NonRepudiation(vec![]),
        });
        assert!(receipt.is_signal());
        assert!(!MessageUnit::User(sample_user_message()).is_signal());
        assert_eq!(receipt.message_info().ref_to_message_id.as_deref(), Some("abc"));
    }
}
