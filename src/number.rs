use hkdf::Hkdf;
use rand::RngCore as _;
use sha2::Sha256;

use super::Error;

pub const NUMBER_LEN: usize = 32;

type Num = [u8; NUMBER_LEN];

/// The unique number that names a key, in containers, requests and file names alike.
#[allow(clippy::derived_hash_with_manual_eq)] // k1 == k2 => hash(k1) == hash(k2) will hold
#[derive(Clone, Copy, Debug, Hash, Ord, PartialOrd)]
#[repr(transparent)]
pub struct KeyNumber(Num);

impl KeyNumber {
	/// A fresh random number, for newly created secret keys.
	#[tracing::instrument(level = "trace")]
	pub fn random() -> Self {
		let mut n = Num::default();
		rand::thread_rng().fill_bytes(&mut n);
		Self(n)
	}

	/// The number of a verify key, which depends only on its encoded public point.
	#[tracing::instrument(level = "trace", skip(point))]
	pub fn derive(point: &[u8]) -> Result<Self, Error> {
		let hk = Hkdf::<Sha256>::new(None, point);
		let mut n = Num::default();

		hk.expand(b"verify key number", &mut n)
			.map_err(|e| Error::key_creation(format!("verify key number: {e}")))?;

		Ok(Self(n))
	}

	pub(crate) fn from_slice(field: &str, bytes: &[u8]) -> Result<Self, Error> {
		let n: Num = bytes.try_into().map_err(|_| {
			Error::format(
				field,
				format!("key number of {} octets, expected {NUMBER_LEN}", bytes.len()),
			)
		})?;
		Ok(Self(n))
	}

	pub fn as_bytes(&self) -> &Num {
		&self.0
	}
}

impl From<Num> for KeyNumber {
	fn from(n: Num) -> Self {
		Self(n)
	}
}

impl PartialEq for KeyNumber {
	fn eq(&self, other: &Self) -> bool {
		constant_time_eq::constant_time_eq_n(&self.0, &other.0)
	}
}

impl Eq for KeyNumber {}

impl std::fmt::Display for KeyNumber {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		for b in &self.0 {
			f.write_fmt(format_args!("{b:02x}"))?;
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn displays_as_lowercase_hex() {
		let mut n = [0u8; 32];
		n[0] = 0xab;
		n[31] = 0x01;
		let s = KeyNumber::from(n).to_string();

		assert_eq!(64, s.len());
		assert!(s.starts_with("ab00"));
		assert!(s.ends_with("0001"));
	}

	#[test]
	fn derived_numbers_are_stable() {
		let a = KeyNumber::derive(b"some point").unwrap();
		let b = KeyNumber::derive(b"some point").unwrap();
		let c = KeyNumber::derive(b"another point").unwrap();

		assert_eq!(a, b);
		assert_ne!(a, c);
		assert_ne!(KeyNumber::random(), KeyNumber::random());
	}

	#[test]
	fn wrong_length_is_a_format_error() {
		assert!(KeyNumber::from_slice("number", &[0u8; 32]).is_ok());
		assert!(matches!(
			KeyNumber::from_slice("number", &[0u8; 16]),
			Err(Error::Format { .. })
		));
	}
}
