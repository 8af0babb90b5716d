use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{VaultError, VaultResult};
use crate::proto;

/// Server-assigned identifier of a stored resource
pub type RecordId = i64;

/// Authenticated principal id, as resolved by the auth layer
pub type UserId = i64;

/// Kind of a stored secret
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    LoginPassword,
    File,
    BankCard,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [
        ResourceKind::LoginPassword,
        ResourceKind::File,
        ResourceKind::BankCard,
    ];

    /// Short CLI name: `lp`, `fl`, `bc`
    pub fn short_name(self) -> &'static str {
        match self {
            ResourceKind::LoginPassword => "lp",
            ResourceKind::File => "fl",
            ResourceKind::BankCard => "bc",
        }
    }

    pub fn to_proto(self) -> i32 {
        let kind = match self {
            ResourceKind::LoginPassword => proto::ResourceKind::LoginPassword,
            ResourceKind::File => proto::ResourceKind::File,
            ResourceKind::BankCard => proto::ResourceKind::BankCard,
        };
        kind as i32
    }

    /// `None` for UNSPECIFIED or an unknown value.
    pub fn from_proto(value: i32) -> Option<Self> {
        match proto::ResourceKind::try_from(value).ok()? {
            proto::ResourceKind::Unspecified => None,
            proto::ResourceKind::LoginPassword => Some(ResourceKind::LoginPassword),
            proto::ResourceKind::File => Some(ResourceKind::File),
            proto::ResourceKind::BankCard => Some(ResourceKind::BankCard),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl FromStr for ResourceKind {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lp" | "login-password" => Ok(ResourceKind::LoginPassword),
            "fl" | "file" => Ok(ResourceKind::File),
            "bc" | "bank-card" => Ok(ResourceKind::BankCard),
            other => Err(VaultError::InvalidArgument(format!(
                "unknown resource kind '{other}' (expected lp, fl or bc)"
            ))),
        }
    }
}

/// A stored resource as the server sees it. `data` is opaque: ciphertext for
/// small secrets, the plaintext [`FileDescriptor`] for files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub id: RecordId,
    pub owner_id: UserId,
    pub kind: ResourceKind,
    pub meta: Vec<u8>,
    pub data: Vec<u8>,
}

impl ResourceRecord {
    pub fn description(&self) -> ResourceDescription {
        ResourceDescription {
            id: self.id,
            kind: self.kind,
            meta: self.meta.clone(),
        }
    }
}

/// Listing entry: everything except the payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescription {
    pub id: RecordId,
    pub kind: ResourceKind,
    pub meta: Vec<u8>,
}

impl fmt::Display for ResourceDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}]: {} - {}",
            self.id,
            self.kind,
            String::from_utf8_lossy(&self.meta)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginPassword {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub login: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankCard {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub number: String,
    #[serde(rename = "expireAt", default)]
    pub expire_at: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub surname: String,
}

/// Descriptor sent in the first frame of a file transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub name: String,
    /// Extension including the leading dot, empty when the file has none
    pub extension: String,
    pub size: u64,
}

impl FileDescriptor {
    pub fn for_path(path: &Path, size: u64) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        Self {
            name,
            extension,
            size,
        }
    }

    pub fn encode(&self) -> VaultResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| VaultError::InvalidArgument(format!("encoding file descriptor: {e}")))
    }

    pub fn decode(bytes: &[u8]) -> VaultResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| VaultError::InvalidArgument(format!("malformed file descriptor: {e}")))
    }
}

/// Decrypted payload of a resource, tagged by kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    LoginPassword(LoginPassword),
    BankCard(BankCard),
    File(FileDescriptor),
}

impl Payload {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Payload::LoginPassword(_) => ResourceKind::LoginPassword,
            Payload::BankCard(_) => ResourceKind::BankCard,
            Payload::File(_) => ResourceKind::File,
        }
    }

    /// JSON encoding; this is the plaintext handed to the codec.
    pub fn encode(&self) -> VaultResult<Vec<u8>> {
        let encoded = match self {
            Payload::LoginPassword(lp) => serde_json::to_vec(lp),
            Payload::BankCard(card) => serde_json::to_vec(card),
            Payload::File(file) => serde_json::to_vec(file),
        };
        encoded.map_err(|e| VaultError::InvalidArgument(format!("encoding {} payload: {e}", self.kind())))
    }

    pub fn decode(kind: ResourceKind, bytes: &[u8]) -> VaultResult<Self> {
        let malformed =
            |e: serde_json::Error| VaultError::InvalidArgument(format!("malformed {kind} payload: {e}"));
        Ok(match kind {
            ResourceKind::LoginPassword => {
                Payload::LoginPassword(serde_json::from_slice(bytes).map_err(malformed)?)
            }
            ResourceKind::BankCard => Payload::BankCard(serde_json::from_slice(bytes).map_err(malformed)?),
            ResourceKind::File => Payload::File(serde_json::from_slice(bytes).map_err(malformed)?),
        })
    }

    /// Human-readable listing used by the CLI
    pub fn render(&self, description: &str) -> String {
        match self {
            Payload::LoginPassword(lp) => format!(
                "login: {}\npassword: {}\ndescription: {description}",
                lp.login, lp.password
            ),
            Payload::BankCard(card) => format!(
                "number: {}\nexpireAt: {}\nname: {}\nsurname: {}\ndescription: {description}",
                card.number, card.expire_at, card.name, card.surname
            ),
            Payload::File(file) => format!(
                "name: {}\next: {}\nsize: {} bytes\ndescription: {description}",
                file.name, file.extension, file.size
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_proto_mapping() {
        for kind in ResourceKind::ALL {
            assert_eq!(ResourceKind::from_proto(kind.to_proto()), Some(kind));
        }
        assert_eq!(ResourceKind::from_proto(0), None);
        assert_eq!(ResourceKind::from_proto(42), None);
        assert_eq!(ResourceKind::LoginPassword.to_proto(), 1);
        assert_eq!(ResourceKind::File.to_proto(), 2);
        assert_eq!(ResourceKind::BankCard.to_proto(), 3);
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("lp".parse::<ResourceKind>().unwrap(), ResourceKind::LoginPassword);
        assert_eq!("bank-card".parse::<ResourceKind>().unwrap(), ResourceKind::BankCard);
        assert!("xx".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn test_login_password_render() {
        let payload = Payload::LoginPassword(LoginPassword {
            login: "sesurity".into(),
            password: "qwerty".into(),
        });
        assert_eq!(
            payload.render("descr"),
            "login: sesurity\npassword: qwerty\ndescription: descr"
        );
    }

    #[test]
    fn test_bank_card_render_empty() {
        let payload = Payload::BankCard(BankCard {
            number: String::new(),
            expire_at: String::new(),
            name: String::new(),
            surname: String::new(),
        });
        assert_eq!(
            payload.render(""),
            "number: \nexpireAt: \nname: \nsurname: \ndescription: "
        );
    }

    #[test]
    fn test_bank_card_json_field_names() {
        let card = BankCard {
            number: "4111111111111111".into(),
            expire_at: "12/34".into(),
            name: "Ada".into(),
            surname: "Lovelace".into(),
        };
        let json = String::from_utf8(Payload::BankCard(card.clone()).encode().unwrap()).unwrap();
        assert!(json.contains("\"expireAt\":\"12/34\""), "got {json}");

        let decoded = Payload::decode(ResourceKind::BankCard, json.as_bytes()).unwrap();
        assert_eq!(decoded, Payload::BankCard(card));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = Payload::decode(ResourceKind::LoginPassword, b"\x00\x01not json").unwrap_err();
        assert!(matches!(err, VaultError::InvalidArgument(_)));
    }

    #[test]
    fn test_file_descriptor_for_path() {
        let fd = FileDescriptor::for_path(Path::new("/tmp/report.final.pdf"), 10);
        assert_eq!(fd.name, "report.final.pdf");
        assert_eq!(fd.extension, ".pdf");
        assert_eq!(fd.size, 10);

        let fd = FileDescriptor::for_path(Path::new("Makefile"), 0);
        assert_eq!(fd.extension, "");
    }

    #[test]
    fn test_description_display() {
        let d = ResourceDescription {
            id: 7,
            kind: ResourceKind::BankCard,
            meta: b"work card".to_vec(),
        };
        assert_eq!(d.to_string(), "[7]: bc - work card");
    }
}
