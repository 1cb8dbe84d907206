//! AS4 message package: SOAP envelope, WS-Security header and attachments

use super::attachment::Attachment;
use super::messages::{MessageUnit, Receipt, UserMessage};
use super::xml::XmlElement;
use std::fmt;
use uuid::Uuid;

// ========== WS-Security header model ==========

/// X.509 token carried inline in the security header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinarySecurityToken {
    pub id: String,
    /// DER-encoded certificate
    pub certificate: Vec<u8>,
}

/// How a signature or encrypted key points at its certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityTokenReference {
    /// Same-document reference to a `BinarySecurityToken` (`#id`)
    Direct { uri: String },
    /// Base64 subject key identifier
    KeyIdentifier { subject_key_identifier: String },
    /// Issuer distinguished name plus hex serial number
    IssuerSerial { issuer: String, serial: String },
}

impl SecurityTokenReference {
    fn to_element(&self) -> XmlElement {
        let reference = XmlElement::new("wsse:SecurityTokenReference");
        let inner = match self {
            SecurityTokenReference::Direct { uri } => {
                XmlElement::new("wsse:Reference").attr("URI", uri.clone())
            }
            SecurityTokenReference::KeyIdentifier {
                subject_key_identifier,
            } => XmlElement::with_text("wsse:KeyIdentifier", subject_key_identifier.clone())
                .attr("ValueType", "X509SubjectKeyIdentifier"),
            SecurityTokenReference::IssuerSerial { issuer, serial } => {
                XmlElement::new("ds:X509Data").child(
                    XmlElement::new("ds:X509IssuerSerial")
                        .child(XmlElement::with_text("ds:X509IssuerName", issuer.clone()))
                        .child(XmlElement::with_text("ds:X509SerialNumber", serial.clone())),
                )
            }
        };
        XmlElement::new("ds:KeyInfo").child(reference.child(inner))
    }
}

/// One `ds:Reference` inside SignedInfo
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureReference {
    pub uri: String,
    pub transforms: Vec<String>,
    pub digest_method: String,
    /// Base64 digest
    pub digest_value: String,
}

impl SignatureReference {
    fn to_element(&self) -> XmlElement {
        let transforms = self
            .transforms
            .iter()
            .fold(XmlElement::new("ds:Transforms"), |acc, transform| {
                acc.child(XmlElement::new("ds:Transform").attr("Algorithm", transform.clone()))
            });
        XmlElement::new("ds:Reference")
            .attr("URI", self.uri.clone())
            .child(transforms)
            .child(XmlElement::new("ds:DigestMethod").attr("Algorithm", self.digest_method.clone()))
            .child(XmlElement::with_text("ds:DigestValue", self.digest_value.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedInfo {
    pub canonicalization_method: String,
    pub signature_method: String,
    pub references: Vec<SignatureReference>,
}

impl SignedInfo {
    /// Element whose canonical form is what the signature value covers
    pub fn to_element(&self) -> XmlElement {
        self.references.iter().fold(
            XmlElement::new("ds:SignedInfo")
                .child(
                    XmlElement::new("ds:CanonicalizationMethod")
                        .attr("Algorithm", self.canonicalization_method.clone()),
                )
                .child(
                    XmlElement::new("ds:SignatureMethod")
                        .attr("Algorithm", self.signature_method.clone()),
                ),
            |acc, reference| acc.child(reference.to_element()),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub id: String,
    pub signed_info: SignedInfo,
    /// Base64 signature value
    pub signature_value: String,
    pub key_info: SecurityTokenReference,
}

impl Signature {
    fn to_element(&self) -> XmlElement {
        XmlElement::new("ds:Signature")
            .attr("Id", self.id.clone())
            .child(self.signed_info.to_element())
            .child(XmlElement::with_text("ds:SignatureValue", self.signature_value.clone()))
            .child(self.key_info.to_element())
    }
}

/// Content key wrapped for one recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedKey {
    pub id: String,
    pub encryption_method: String,
    /// OAEP digest method; absent means SHA-1
    pub digest_method: Option<String>,
    /// OAEP mask generation function; absent means MGF1 with SHA-1
    pub mgf: Option<String>,
    /// Base64 wrapped key
    pub cipher_value: String,
    pub key_info: SecurityTokenReference,
    /// Ids of the EncryptedData entries this key protects
    pub data_references: Vec<String>,
}

impl EncryptedKey {
    fn to_element(&self) -> XmlElement {
        let mut method = XmlElement::new("xenc:EncryptionMethod")
            .attr("Algorithm", self.encryption_method.clone());
        if let Some(digest) = &self.digest_method {
            method = method.child(XmlElement::new("ds:DigestMethod").attr("Algorithm", digest.clone()));
        }
        if let Some(mgf) = &self.mgf {
            method = method.child(XmlElement::new("xenc11:MGF").attr("Algorithm", mgf.clone()));
        }
        let references = self
            .data_references
            .iter()
            .fold(XmlElement::new("xenc:ReferenceList"), |acc, id| {
                acc.child(XmlElement::new("xenc:DataReference").attr("URI", format!("#{id}")))
            });
        XmlElement::new("xenc:EncryptedKey")
            .attr("Id", self.id.clone())
            .child(method)
            .child(self.key_info.to_element())
            .child(
                XmlElement::new("xenc:CipherData")
                    .child(XmlElement::with_text("xenc:CipherValue", self.cipher_value.clone())),
            )
            .child(references)
    }
}

/// Placeholder for one encrypted attachment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedData {
    pub id: String,
    pub encryption_method: String,
    /// `cid:` URI of the encrypted attachment
    pub cipher_reference: String,
    /// Content type of the attachment before encryption
    pub mime_type: String,
}

impl EncryptedData {
    fn to_element(&self) -> XmlElement {
        XmlElement::new("xenc:EncryptedData")
            .attr("Id", self.id.clone())
            .attr("MimeType", self.mime_type.clone())
            .attr("Type", "http://docs.oasis-open.org/wss/oasis-wss-SwAProfile-1.1#Attachment-Content-Only")
            .child(XmlElement::new("xenc:EncryptionMethod").attr("Algorithm", self.encryption_method.clone()))
            .child(
                XmlElement::new("xenc:CipherData").child(
                    XmlElement::new("xenc:CipherReference").attr("URI", self.cipher_reference.clone()),
                ),
            )
    }
}

/// `wsse:Security` header contents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityHeader {
    pub tokens: Vec<BinarySecurityToken>,
    pub signature: Option<Signature>,
    pub encrypted_keys: Vec<EncryptedKey>,
    pub encrypted_data: Vec<EncryptedData>,
}

impl SecurityHeader {
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
            && self.signature.is_none()
            && self.encrypted_keys.is_empty()
            && self.encrypted_data.is_empty()
    }

    pub fn token(&self, id: &str) -> Option<&BinarySecurityToken> {
        self.tokens.iter().find(|token| token.id == id)
    }

    pub fn to_element(&self) -> XmlElement {
        let mut element = XmlElement::new("wsse:Security");
        for token in &self.tokens {
            element = element.child(
                XmlElement::with_text(
                    "wsse:BinarySecurityToken",
                    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &token.certificate),
                )
                .attr("wsu:Id", token.id.clone())
                .attr("ValueType", "X509v3"),
            );
        }
        for key in &self.encrypted_keys {
            element = element.child(key.to_element());
        }
        for data in &self.encrypted_data {
            element = element.child(data.to_element());
        }
        element.child_opt(self.signature.as_ref().map(Signature::to_element))
    }
}

// ========== Message package ==========

/// Error raised when a same-document reference cannot be resolved to one element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    NotFound(String),
    Duplicate { id: String, count: usize },
}

impl fmt::Display for ReferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceError::NotFound(id) => write!(f, "no element carries id '{id}'"),
            ReferenceError::Duplicate { id, count } => {
                write!(f, "id '{id}' is carried by {count} elements")
            }
        }
    }
}

impl std::error::Error for ReferenceError {}

/// The single element of `envelope` whose id attribute equals `id`
pub fn find_unique_id<'a>(envelope: &'a XmlElement, id: &str) -> Result<&'a XmlElement, ReferenceError> {
    let mut found = Vec::new();
    envelope.find_all_by_id(id, &mut found);
    match found.as_slice() {
        [] => Err(ReferenceError::NotFound(id.to_string())),
        [element] => Ok(*element),
        _ => Err(ReferenceError::Duplicate {
            id: id.to_string(),
            count: found.len(),
        }),
    }
}

/// An AS4 message: ebMS header units, SOAP body, attachments and security header
#[derive(Debug, Clone)]
pub struct As4Message {
    /// `wsu:Id` of the ebMS Messaging header
    pub messaging_id: String,
    /// `wsu:Id` of the SOAP Body
    pub body_id: String,
    pub message_units: Vec<MessageUnit>,
    pub body: Vec<XmlElement>,
    pub attachments: Vec<Attachment>,
    pub security_header: SecurityHeader,
}

impl Default for As4Message {
    fn default() -> Self {
        Self::new()
    }
}

impl As4Message {
    pub fn new() -> Self {
        Self {
            messaging_id: format!("_messaging-{}", Uuid::new_v4()),
            body_id: format!("_body-{}", Uuid::new_v4()),
            message_units: Vec::new(),
            body: Vec::new(),
            attachments: Vec::new(),
            security_header: SecurityHeader::default(),
        }
    }

    /// Message carrying one UserMessage and its payload attachments
    pub fn from_user_message(user_message: UserMessage, attachments: Vec<Attachment>) -> Self {
        Self {
            message_units: vec![MessageUnit::User(user_message)],
            attachments,
            ..Self::new()
        }
    }

    pub fn with_unit(mut self, unit: MessageUnit) -> Self {
        self.message_units.push(unit);
        self
    }

    /// Id of the first message unit
    pub fn primary_message_id(&self) -> Option<&str> {
        self.message_units.first().map(MessageUnit::message_id)
    }

    pub fn primary_user_message(&self) -> Option<&UserMessage> {
        self.user_messages().next()
    }

    pub fn user_messages(&self) -> impl Iterator<Item = &UserMessage> {
        self.message_units.iter().filter_map(|unit| match unit {
            MessageUnit::User(user) => Some(user),
            _ => None,
        })
    }

    pub fn receipts(&self) -> impl Iterator<Item = &Receipt> {
        self.message_units.iter().filter_map(|unit| match unit {
            MessageUnit::Receipt(receipt) => Some(receipt),
            _ => None,
        })
    }

    pub fn is_user_message(&self) -> bool {
        matches!(self.message_units.first(), Some(MessageUnit::User(_)))
    }

    pub fn is_signal_message(&self) -> bool {
        !self.message_units.is_empty() && self.message_units.iter().all(MessageUnit::is_signal)
    }

    pub fn is_signed(&self) -> bool {
        self.security_header.signature.is_some()
    }

    pub fn is_encrypted(&self) -> bool {
        !self.security_header.encrypted_data.is_empty()
    }

    pub fn attachment(&self, uri: &str) -> Option<&Attachment> {
        self.attachments.iter().find(|a| a.matches_uri(uri))
    }

    pub fn attachment_mut(&mut self, uri: &str) -> Option<&mut Attachment> {
        self.attachments.iter_mut().find(|a| a.matches_uri(uri))
    }

    pub fn messaging_element(&self) -> XmlElement {
        self.message_units.iter().fold(
            XmlElement::new("eb:Messaging").attr("wsu:Id", self.messaging_id.clone()),
            |acc, unit| acc.child(unit.to_element()),
        )
    }

    pub fn body_element(&self) -> XmlElement {
        self.body.iter().fold(
            XmlElement::new("soap:Body").attr("wsu:Id", self.body_id.clone()),
            |acc, child| acc.child(child.clone()),
        )
    }

    /// Full SOAP envelope tree
    pub fn envelope_element(&self) -> XmlElement {
        let header = XmlElement::new("soap:Header")
            .child_opt((!self.security_header.is_empty()).then(|| self.security_header.to_element()))
            .child(self.messaging_element());
        XmlElement::new("soap:Envelope")
            .child(header)
            .child(self.body_element())
    }

    /// Resolve a same-document `#id` reference to exactly one element of the envelope
    ///
    /// Builds the envelope tree; resolve several ids against one
    /// [`Self::envelope_element`] with [`find_unique_id`] instead.
    pub fn resolve_unique_id(&self, id: &str) -> Result<XmlElement, ReferenceError> {
        find_unique_id(&self.envelope_element(), id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::{MessageInfo, ReceiptContent};

    fn user_message() -> UserMessage {
        UserMessage {
            message_info: MessageInfo::generate(),
            party_info: Default::default(),
            collaboration_info: Default::default(),
            message_properties: Default::default(),
            payload_info: Vec::new(),
        }
    }

    #[test]
    fn test_resolve_messaging_and_body() {
        let message = As4Message::from_user_message(user_message(), vec![]);
        let messaging = message.resolve_unique_id(&message.messaging_id).unwrap();
        assert_eq!(messaging.name, "eb:Messaging");
        let body = message.resolve_unique_id(&message.body_id).unwrap();
        assert_eq!(body.name, "soap:Body");
    }

    #[test]
    fn test_resolve_rejects_duplicate_ids() {
        let mut message = As4Message::from_user_message(user_message(), vec![]);
        message
            .body
            .push(XmlElement::new("Invoice").attr("ID", message.messaging_id.clone()));

        let err = message.resolve_unique_id(&message.messaging_id).unwrap_err();
        assert!(matches!(err, ReferenceError::Duplicate { count: 2, .. }));
    }

    #[test]
    fn test_resolve_missing_id() {
        let message = As4Message::new();
        assert_eq!(
            message.resolve_unique_id("nope"),
            Err(ReferenceError::NotFound("nope".to_string()))
        );
    }

    #[test]
    fn test_message_kind_detection() {
        let user = As4Message::from_user_message(user_message(), vec![]);
        assert!(user.is_user_message());
        assert!(!user.is_signal_message());

        let signal = As4Message::new().with_unit(MessageUnit::Receipt(Receipt {
            message_info: MessageInfo::referring_to("m-1"),
            content: ReceiptContent::NonRepudiation(vec![]),
        }));
        assert!(signal.is_signal_message());
        assert!(!signal.is_user_message());
        assert!(!As4Message::new().is_signal_message());
    }

    #[test]
    fn test_security_header_rendered_only_when_present() {
        let mut message = As4Message::new();
        let bare = String::from_utf8(message.envelope_element().canonicalize()).unwrap();
        assert!(!bare.contains("wsse:Security"));

        message.security_header.tokens.push(BinarySecurityToken {
            id: "token-1".to_string(),
            certificate: vec![1, 2, 3],
        });
        let secured = String::from_utf8(message.envelope_element().canonicalize()).unwrap();
        assert!(secured.contains(r#"wsu:Id="token-1""#));
    }
}
