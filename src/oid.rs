//! Registry of the object identifiers understood by the crate.

use const_oid::ObjectIdentifier;

use super::{Error, key::Engine};

/// Identifies a container holding a password-protected secret key.
pub const CONTAINER: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.643.2.52.1.127.1.1");
/// Recovery method: content keys derived from a password with PBKDF2.
pub const PBKDF2_BASIC_KEY: ObjectIdentifier =
	ObjectIdentifier::new_unwrap("1.2.643.2.52.1.127.2.1");
pub const SYMMETRIC_KEY_CONTENT: ObjectIdentifier =
	ObjectIdentifier::new_unwrap("1.2.643.2.52.1.127.3.1");
pub const SECRET_KEY_CONTENT: ObjectIdentifier =
	ObjectIdentifier::new_unwrap("1.2.643.2.52.1.127.3.2");

pub const AES256: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.1.41");
pub const HMAC_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.2.9");
pub const HMAC_SHA512: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.2.11");
pub const ECDSA_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");
pub const ECDSA_SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.3");
pub const EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");

pub const CURVE_P256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");
pub const CURVE_P384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.34");

pub const COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");
pub const COUNTRY: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.6");
pub const LOCALITY: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.7");
pub const STATE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.8");
pub const ORGANIZATION: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.10");
pub const ORGANIZATIONAL_UNIT: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.11");
pub const EMAIL_ADDRESS: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.1");

pub const SUBJECT_KEY_IDENTIFIER: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.14");

/// What an identifier in a key structure is used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
	Algorithm,
	Curve,
	ContentType,
	RecoveryMethod,
	Attribute,
}

#[derive(Clone, Copy, Debug)]
pub struct Entry {
	pub name: &'static str,
	pub id: ObjectIdentifier,
	pub engine: Engine,
	pub mode: Mode,
}

#[rustfmt::skip]
const REGISTRY: &[Entry] = &[
	Entry { name: "keyvault-container", id: CONTAINER, engine: Engine::Identifier, mode: Mode::ContentType },
	Entry { name: "pbkdf2-basic-key", id: PBKDF2_BASIC_KEY, engine: Engine::Identifier, mode: Mode::RecoveryMethod },
	Entry { name: "symmetric-key-content", id: SYMMETRIC_KEY_CONTENT, engine: Engine::Identifier, mode: Mode::ContentType },
	Entry { name: "secret-key-content", id: SECRET_KEY_CONTENT, engine: Engine::Identifier, mode: Mode::ContentType },
	Entry { name: "aes256", id: AES256, engine: Engine::BlockCipher, mode: Mode::Algorithm },
	Entry { name: "hmac-sha256", id: HMAC_SHA256, engine: Engine::HmacFunction, mode: Mode::Algorithm },
	Entry { name: "hmac-sha512", id: HMAC_SHA512, engine: Engine::HmacFunction, mode: Mode::Algorithm },
	Entry { name: "ecdsa-p256-sha256", id: ECDSA_SHA256, engine: Engine::SignFunction, mode: Mode::Algorithm },
	Entry { name: "ecdsa-p384-sha384", id: ECDSA_SHA384, engine: Engine::SignFunction, mode: Mode::Algorithm },
	Entry { name: "id-ecPublicKey", id: EC_PUBLIC_KEY, engine: Engine::VerifyFunction, mode: Mode::Algorithm },
	Entry { name: "secp256r1", id: CURVE_P256, engine: Engine::Identifier, mode: Mode::Curve },
	Entry { name: "secp384r1", id: CURVE_P384, engine: Engine::Identifier, mode: Mode::Curve },
	Entry { name: "cn", id: COMMON_NAME, engine: Engine::Identifier, mode: Mode::Attribute },
	Entry { name: "c", id: COUNTRY, engine: Engine::Identifier, mode: Mode::Attribute },
	Entry { name: "l", id: LOCALITY, engine: Engine::Identifier, mode: Mode::Attribute },
	Entry { name: "st", id: STATE, engine: Engine::Identifier, mode: Mode::Attribute },
	Entry { name: "o", id: ORGANIZATION, engine: Engine::Identifier, mode: Mode::Attribute },
	Entry { name: "ou", id: ORGANIZATIONAL_UNIT, engine: Engine::Identifier, mode: Mode::Attribute },
	Entry { name: "email", id: EMAIL_ADDRESS, engine: Engine::Identifier, mode: Mode::Attribute },
];

pub fn find_by_id(id: &ObjectIdentifier) -> Option<&'static Entry> {
	REGISTRY.iter().find(|e| &e.id == id)
}

pub fn find_by_name(name: &str) -> Option<&'static Entry> {
	REGISTRY.iter().find(|e| e.name.eq_ignore_ascii_case(name))
}

/// Look up an identifier read from `field`, insisting that it is used in the expected `mode`.
pub(crate) fn expect_mode(
	id: &ObjectIdentifier,
	mode: Mode,
	field: &str,
) -> Result<&'static Entry, Error> {
	match find_by_id(id) {
		Some(entry) if entry.mode == mode => Ok(entry),
		_ => {
			tracing::debug!(%id, ?mode, field, "Unexpected object identifier");
			Err(Error::unsupported_identifier(field, id.to_string()))
		}
	}
}

/// Short human-readable name for an identifier, falling back to dotted notation.
pub fn display_name(id: &ObjectIdentifier) -> String {
	find_by_id(id)
		.map(|e| e.name.to_string())
		.unwrap_or_else(|| id.to_string())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn lookups_agree() {
		let by_name = find_by_name("AES256").unwrap();
		assert_eq!(AES256, by_name.id);
		assert_eq!(Engine::BlockCipher, find_by_id(&AES256).unwrap().engine);
		assert_eq!("secp384r1", display_name(&CURVE_P384));
		assert_eq!("1.2.3.4", display_name(&ObjectIdentifier::new_unwrap("1.2.3.4")));
	}

	#[test]
	fn mode_is_enforced() {
		assert!(expect_mode(&CURVE_P256, Mode::Curve, "curve").is_ok());

		let result = expect_mode(&AES256, Mode::Curve, "curve");
		assert!(matches!(
			result,
			Err(Error::UnsupportedIdentifier { ref field, .. }) if field == "curve"
		));
	}
}
