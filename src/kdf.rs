//! Deriving the keys that protect a container's content from a password.

use aes::Aes256;
use cmac::{Cmac, Mac as _};
use rand::RngCore as _;
use sha2::Sha512;
use zeroize::Zeroizing;

use super::{Error, config::MAX_ITERATION_COUNT};

pub const SALT_LEN: usize = 32;
pub const DERIVED_LEN: usize = 64;

/// The encryption and integrity keys of one container.
///
/// Both are kept as bytes.  Cipher and MAC contexts are built for a single use and wiped when
/// they are dropped.
pub(crate) struct ContentKeys {
	pub(crate) encryption: Zeroizing<[u8; 32]>,
	integrity: Zeroizing<[u8; 32]>,
}

impl ContentKeys {
	/// A fresh CMAC context under the integrity key.
	pub(crate) fn mac(&self) -> Result<Cmac<Aes256>, Error> {
		<Cmac<Aes256>>::new_from_slice(&self.integrity[..])
			.map_err(|e| Error::key_creation(format!("integrity key: {e}")))
	}
}

pub(crate) fn new_salt() -> [u8; SALT_LEN] {
	let mut salt = [0u8; SALT_LEN];
	rand::thread_rng().fill_bytes(&mut salt);
	salt
}

/// Run PBKDF2-HMAC-SHA512 over `password` and `salt`.
///
/// The iteration count is clamped to `1..=65535`, since on import it comes straight out of the
/// container.
#[tracing::instrument(level = "debug", skip(password, salt))]
pub(crate) fn derive_material(
	password: &[u8],
	salt: &[u8],
	iterations: u32,
) -> Zeroizing<[u8; DERIVED_LEN]> {
	let rounds = iterations.clamp(1, MAX_ITERATION_COUNT);
	if rounds != iterations {
		tracing::debug!(rounds, "Iteration count clamped");
	}

	let mut material = Zeroizing::new([0u8; DERIVED_LEN]);
	pbkdf2::pbkdf2_hmac::<Sha512>(password, salt, rounds, &mut material[..]);

	material
}

/// Derive both content keys; the intermediate material is wiped before returning.
#[tracing::instrument(level = "debug", skip(password, salt))]
pub(crate) fn derive(password: &[u8], salt: &[u8], iterations: u32) -> Result<ContentKeys, Error> {
	if password.is_empty() {
		return Err(Error::null_argument("password"));
	}

	let material = derive_material(password, salt, iterations);

	let mut encryption = Zeroizing::new([0u8; 32]);
	encryption.copy_from_slice(&material[..32]);

	let mut integrity = Zeroizing::new([0u8; 32]);
	integrity.copy_from_slice(&material[32..]);

	Ok(ContentKeys {
		encryption,
		integrity,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn derivation_is_deterministic() {
		let salt = [7u8; SALT_LEN];

		let a = derive_material(b"test", &salt, 1000);
		let b = derive_material(b"test", &salt, 1000);
		let c = derive_material(b"test", &[8u8; SALT_LEN], 1000);
		let d = derive_material(b"tesu", &salt, 1000);

		assert_eq!(a, b);
		assert_ne!(a, c);
		assert_ne!(a, d);
	}

	#[test]
	fn extreme_iteration_counts_are_bounded() {
		let salt = [1u8; SALT_LEN];

		assert_eq!(
			derive_material(b"pw", &salt, 0),
			derive_material(b"pw", &salt, 1)
		);
		assert_eq!(
			derive_material(b"pw", &salt, u32::MAX),
			derive_material(b"pw", &salt, MAX_ITERATION_COUNT)
		);
	}

	#[test]
	fn content_keys_are_usable() {
		let keys = derive(b"test", &new_salt(), 10).unwrap();
		let mut mac = keys.mac().unwrap();
		mac.update(&keys.encryption[..]);
		let first = mac.finalize().into_bytes();
		assert_eq!(16, first.len());

		// each context starts from the key, not from where the last one left off
		let mut mac = keys.mac().unwrap();
		mac.update(&keys.encryption[..]);
		assert_eq!(first, mac.finalize().into_bytes());

		assert!(matches!(
			derive(b"", &new_salt(), 10),
			Err(Error::NullArgument(_))
		));
	}
}
