//! Authenticate-then-encrypt wrapping of a secret key value.
//!
//! A wrapped key is `IV || masked key || mask || tag`.  The CMAC tag covers the IV and the masked
//! key, and everything after the IV is then encrypted in counter mode under the same IV.  Reading
//! one back therefore means decrypting first and trusting nothing until the tag checks out.

use aes::Aes256;
use cmac::Mac as _;
use constant_time_eq::constant_time_eq;
use ctr::cipher::{KeyIvInit as _, StreamCipher as _};
use rand::RngCore as _;
use zeroize::Zeroizing;

use super::{Error, kdf::ContentKeys, masked::MaskedSecret};

pub const IV_LEN: usize = 8;
pub const MAC_LEN: usize = 16;

/// How the counter block is stepped.
///
/// Standard containers step the IV half of the counter block as a little-endian integer;
/// OpenSSL-compatible ones treat the whole block as one big-endian counter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u32)]
pub enum Compat {
	#[default]
	Standard = 0,
	OpensslCompatible = 1,
}

impl Compat {
	pub(crate) fn from_u32(field: &str, value: u32) -> Result<Self, Error> {
		match value {
			0 => Ok(Compat::Standard),
			1 => Ok(Compat::OpensslCompatible),
			n => Err(Error::format(field, format!("unknown compatibility flag {n}"))),
		}
	}
}

impl From<bool> for Compat {
	fn from(openssl_compatible: bool) -> Self {
		if openssl_compatible {
			Compat::OpensslCompatible
		} else {
			Compat::Standard
		}
	}
}

/// Length of a wrapped key of `key_size` octets.
pub const fn payload_len(key_size: usize) -> usize {
	IV_LEN + 2 * key_size + MAC_LEN
}

fn apply_keystream(
	keys: &ContentKeys,
	iv: &[u8],
	compat: Compat,
	data: &mut [u8],
) -> Result<(), Error> {
	let mut block = [0u8; 16];
	block[..IV_LEN].copy_from_slice(iv);

	match compat {
		Compat::Standard => ctr::Ctr64LE::<Aes256>::new_from_slices(&keys.encryption[..], &block)
			.map_err(|e| Error::key_creation(format!("content cipher: {e}")))?
			.apply_keystream(data),
		Compat::OpensslCompatible => {
			ctr::Ctr128BE::<Aes256>::new_from_slices(&keys.encryption[..], &block)
				.map_err(|e| Error::key_creation(format!("content cipher: {e}")))?
				.apply_keystream(data)
		}
	}

	Ok(())
}

fn tag(keys: &ContentKeys, iv: &[u8], value: &[u8]) -> Result<[u8; MAC_LEN], Error> {
	let mut mac = keys.mac()?;
	mac.update(iv);
	mac.update(value);
	Ok(mac.finalize().into_bytes().into())
}

/// Wrap `secret` under `keys`.  The secret is remasked along the way.
#[tracing::instrument(level = "debug", skip(secret, keys))]
pub(crate) fn wrap(
	secret: &mut MaskedSecret,
	keys: &ContentKeys,
	compat: Compat,
) -> Result<Vec<u8>, Error> {
	let value_len = 2 * secret.len();
	let mut payload = Zeroizing::new(vec![0u8; payload_len(secret.len())]);

	let (iv, rest) = payload.split_at_mut(IV_LEN);
	rand::thread_rng().fill_bytes(iv);

	let (value, mac) = rest.split_at_mut(value_len);
	secret.export(value)?;
	mac.copy_from_slice(&tag(keys, iv, value)?);

	apply_keystream(keys, iv, compat, rest)?;

	Ok(payload.to_vec())
}

/// Recover a key of `key_size` octets, refusing to touch the value unless the tag matches.
#[tracing::instrument(level = "debug", skip(payload, keys), fields(len = payload.len()))]
pub(crate) fn unwrap(
	payload: &[u8],
	key_size: usize,
	keys: &ContentKeys,
	compat: Compat,
) -> Result<MaskedSecret, Error> {
	if payload.len() != payload_len(key_size) {
		return Err(Error::format(
			"encrypted content",
			format!(
				"payload of {} octets, expected {}",
				payload.len(),
				payload_len(key_size)
			),
		));
	}

	let mut plain = Zeroizing::new(payload.to_vec());
	let (iv, rest) = plain.split_at_mut(IV_LEN);
	apply_keystream(keys, iv, compat, rest)?;

	let (value, mac) = rest.split_at(2 * key_size);
	if !constant_time_eq(&tag(keys, iv, value)?, mac) {
		tracing::debug!("Content tag mismatch");
		return Err(Error::integrity("encrypted content"));
	}

	MaskedSecret::from_export(value)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::kdf;
	use secrecy::ExposeSecret as _;

	fn keys(password: &[u8]) -> ContentKeys {
		kdf::derive(password, &[3u8; kdf::SALT_LEN], 10).unwrap()
	}

	#[test]
	fn wrap_then_unwrap() {
		crate::test_support::init();

		let value = [0x5au8; 32];
		let mut secret = MaskedSecret::new(&value).unwrap();
		let keys = keys(b"test");

		for compat in [Compat::Standard, Compat::OpensslCompatible] {
			let payload = wrap(&mut secret, &keys, compat).unwrap();
			assert_eq!(payload_len(32), payload.len());
			assert!(!payload.windows(32).any(|w| w == value));

			let recovered = unwrap(&payload, 32, &keys, compat).unwrap();
			assert_eq!(&value[..], recovered.reveal().expose_secret());
		}
	}

	#[test]
	fn wrong_keys_fail_integrity() {
		crate::test_support::init();

		let mut secret = MaskedSecret::new(&[1u8; 32]).unwrap();
		let payload = wrap(&mut secret, &keys(b"test"), Compat::Standard).unwrap();

		assert!(matches!(
			unwrap(&payload, 32, &keys(b"wrong"), Compat::Standard),
			Err(Error::Integrity(_))
		));
	}

	#[test]
	fn every_bit_is_covered() {
		crate::test_support::init();

		let keys = keys(b"test");
		let mut secret = MaskedSecret::new(&[9u8; 32]).unwrap();
		let payload = wrap(&mut secret, &keys, Compat::Standard).unwrap();

		for i in 0..payload.len() {
			let mut tampered = payload.clone();
			tampered[i] ^= 0x01;
			assert!(
				matches!(
					unwrap(&tampered, 32, &keys, Compat::Standard),
					Err(Error::Integrity(_))
				),
				"flipping a bit of octet {i} went unnoticed"
			);
		}
	}

	#[test]
	fn compat_mismatch_is_noticed() {
		let keys = keys(b"test");
		let mut secret = MaskedSecret::new(&[2u8; 32]).unwrap();
		let payload = wrap(&mut secret, &keys, Compat::Standard).unwrap();

		assert!(unwrap(&payload, 32, &keys, Compat::OpensslCompatible).is_err());
	}

	#[test]
	fn wrong_length_is_a_format_error() {
		let keys = keys(b"test");
		let mut secret = MaskedSecret::new(&[2u8; 32]).unwrap();
		let payload = wrap(&mut secret, &keys, Compat::Standard).unwrap();

		assert!(matches!(
			unwrap(&payload[1..], 32, &keys, Compat::Standard),
			Err(Error::Format { .. })
		));
		assert!(matches!(
			unwrap(&payload, 48, &keys, Compat::Standard),
			Err(Error::Format { .. })
		));
	}
}
