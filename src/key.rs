use chrono::{DateTime, SubsecRound as _, TimeDelta, Utc};
use const_oid::ObjectIdentifier;

use super::{
	Error, KeyNumber,
	oid::{self, Mode},
	signature::SignKey,
	symmetric::SymmetricKey,
};

/// The kind of cryptographic work a key, or an identifier, is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Engine {
	BlockCipher,
	HmacFunction,
	SignFunction,
	VerifyFunction,
	Identifier,
}

impl std::fmt::Display for Engine {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			Engine::BlockCipher => "block cipher",
			Engine::HmacFunction => "hmac function",
			Engine::SignFunction => "sign function",
			Engine::VerifyFunction => "verify function",
			Engine::Identifier => "identifier",
		})
	}
}

/// Algorithms of the secret keys that can live in a container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Algorithm {
	Aes256,
	HmacSha256,
	HmacSha512,
	EcdsaP256Sha256,
	EcdsaP384Sha384,
}

impl Algorithm {
	pub fn oid(&self) -> ObjectIdentifier {
		match self {
			Algorithm::Aes256 => oid::AES256,
			Algorithm::HmacSha256 => oid::HMAC_SHA256,
			Algorithm::HmacSha512 => oid::HMAC_SHA512,
			Algorithm::EcdsaP256Sha256 => oid::ECDSA_SHA256,
			Algorithm::EcdsaP384Sha384 => oid::ECDSA_SHA384,
		}
	}

	pub(crate) fn from_oid(id: &ObjectIdentifier, field: &str) -> Result<Self, Error> {
		oid::expect_mode(id, Mode::Algorithm, field)?;

		[
			Algorithm::Aes256,
			Algorithm::HmacSha256,
			Algorithm::HmacSha512,
			Algorithm::EcdsaP256Sha256,
			Algorithm::EcdsaP384Sha384,
		]
		.into_iter()
		.find(|a| &a.oid() == id)
		.ok_or_else(|| Error::unsupported_identifier(field, id.to_string()))
	}

	pub fn engine(&self) -> Engine {
		match self {
			Algorithm::Aes256 => Engine::BlockCipher,
			Algorithm::HmacSha256 | Algorithm::HmacSha512 => Engine::HmacFunction,
			Algorithm::EcdsaP256Sha256 | Algorithm::EcdsaP384Sha384 => Engine::SignFunction,
		}
	}

	/// Length of the raw secret value, in octets.
	pub fn key_size(&self) -> usize {
		match self {
			Algorithm::Aes256 | Algorithm::HmacSha256 => 32,
			Algorithm::HmacSha512 => 64,
			Algorithm::EcdsaP256Sha256 => 32,
			Algorithm::EcdsaP384Sha384 => 48,
		}
	}
}

impl std::fmt::Display for Algorithm {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&oid::display_name(&self.oid()))
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ResourceKind {
	/// Counts the blocks a cipher key may still process.
	BlockCounter = 1,
	/// Counts the operations a key may still be used for.
	KeyUsingCounter = 2,
}

impl ResourceKind {
	pub(crate) fn from_u32(field: &str, value: u32) -> Result<Self, Error> {
		match value {
			1 => Ok(ResourceKind::BlockCounter),
			2 => Ok(ResourceKind::KeyUsingCounter),
			n => Err(Error::format(field, format!("unknown resource type {n}"))),
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Validity {
	pub not_before: DateTime<Utc>,
	pub not_after: DateTime<Utc>,
}

impl Validity {
	/// Valid from now (to the second) for `days` days.
	pub fn days_from_now(days: i64) -> Result<Self, Error> {
		let now = Utc::now().trunc_subsecs(0);
		let not_after = TimeDelta::try_days(days)
			.and_then(|d| now.checked_add_signed(d))
			.ok_or_else(|| Error::invalid_option(format!("validity of {days} days is out of range")))?;

		Ok(Self {
			not_before: now,
			not_after,
		})
	}

	pub fn contains(&self, at: &DateTime<Utc>) -> bool {
		&self.not_before <= at && at <= &self.not_after
	}
}

/// How much use a key has left in it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resource {
	pub kind: ResourceKind,
	pub remaining: u32,
	pub validity: Validity,
}

pub const DEFAULT_VALIDITY_DAYS: i64 = 365;

impl Resource {
	/// A full resource for a new key of `engine`, valid for a year.
	pub fn for_engine(engine: Engine) -> Result<Self, Error> {
		let kind = match engine {
			Engine::BlockCipher => ResourceKind::BlockCounter,
			_ => ResourceKind::KeyUsingCounter,
		};

		Ok(Self {
			kind,
			remaining: u32::MAX,
			validity: Validity::days_from_now(DEFAULT_VALIDITY_DAYS)?,
		})
	}
}

/// Any secret key that can be stored in a container.
#[derive(Clone, Debug, PartialEq)]
pub enum Key {
	Symmetric(SymmetricKey),
	Sign(SignKey),
}

impl Key {
	pub fn algorithm(&self) -> Algorithm {
		match self {
			Key::Symmetric(k) => k.algorithm(),
			Key::Sign(k) => k.algorithm(),
		}
	}

	pub fn engine(&self) -> Engine {
		self.algorithm().engine()
	}

	pub fn number(&self) -> &KeyNumber {
		match self {
			Key::Symmetric(k) => k.number(),
			Key::Sign(k) => k.number(),
		}
	}

	pub fn label(&self) -> Option<&str> {
		match self {
			Key::Symmetric(k) => k.label(),
			Key::Sign(k) => k.label(),
		}
	}

	pub fn resource(&self) -> &Resource {
		match self {
			Key::Symmetric(k) => k.resource(),
			Key::Sign(k) => k.resource(),
		}
	}

	pub fn as_symmetric(&self) -> Option<&SymmetricKey> {
		match self {
			Key::Symmetric(k) => Some(k),
			Key::Sign(_) => None,
		}
	}

	pub fn as_sign(&self) -> Option<&SignKey> {
		match self {
			Key::Sign(k) => Some(k),
			Key::Symmetric(_) => None,
		}
	}

	pub fn into_symmetric(self) -> Option<SymmetricKey> {
		match self {
			Key::Symmetric(k) => Some(k),
			Key::Sign(_) => None,
		}
	}

	pub fn into_sign(self) -> Option<SignKey> {
		match self {
			Key::Sign(k) => Some(k),
			Key::Symmetric(_) => None,
		}
	}
}

impl From<SymmetricKey> for Key {
	fn from(k: SymmetricKey) -> Self {
		Key::Symmetric(k)
	}
}

impl From<SignKey> for Key {
	fn from(k: SignKey) -> Self {
		Key::Sign(k)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn algorithms_map_to_engines() {
		assert_eq!(
			Algorithm::EcdsaP384Sha384,
			Algorithm::from_oid(&oid::ECDSA_SHA384, "algorithm").unwrap()
		);
		assert_eq!(Engine::HmacFunction, Algorithm::HmacSha512.engine());
		assert_eq!(64, Algorithm::HmacSha512.key_size());
		assert_eq!("aes256", Algorithm::Aes256.to_string());

		assert!(matches!(
			Algorithm::from_oid(&oid::CURVE_P256, "algorithm"),
			Err(Error::UnsupportedIdentifier { .. })
		));
		// An algorithm, but not one a secret key can have
		assert!(Algorithm::from_oid(&oid::EC_PUBLIC_KEY, "algorithm").is_err());
	}

	#[test]
	fn resources_suit_the_engine() {
		let r = Resource::for_engine(Engine::BlockCipher).unwrap();
		assert_eq!(ResourceKind::BlockCounter, r.kind);
		assert!(r.validity.contains(&Utc::now()));

		assert_eq!(
			ResourceKind::KeyUsingCounter,
			Resource::for_engine(Engine::SignFunction).unwrap().kind
		);
		assert!(ResourceKind::from_u32("type", 3).is_err());
	}

	#[test]
	fn validity_out_of_range_is_an_error() {
		let v = Validity::days_from_now(30).unwrap();
		assert_eq!(TimeDelta::days(30), v.not_after - v.not_before);

		for days in [i64::MAX, i64::MIN, 1 << 30, 1 << 40] {
			assert!(matches!(
				Validity::days_from_now(days),
				Err(Error::InvalidOption(_))
			));
		}
	}
}
