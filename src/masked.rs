//! Secret values that are never kept in memory in the clear.
//!
//! A [`MaskedSecret`] stores `value ^ mask` next to `mask`, and swaps in a fresh mask whenever it
//! is exported.  The only way to get at the value itself is [`MaskedSecret::reveal`], which hands
//! back a [`SecretSlice`] that is wiped when dropped.

use constant_time_eq::constant_time_eq;
use rand::RngCore as _;
use secrecy::SecretSlice;
use sha2::{Digest as _, Sha256};
use zeroize::Zeroizing;

use super::Error;

#[derive(Clone)]
pub struct MaskedSecret {
	// masked value, followed by the mask
	buf: Zeroizing<Vec<u8>>,
	checksum: [u8; 32],
}

impl std::fmt::Debug for MaskedSecret {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MaskedSecret")
			.field("len", &self.len())
			.finish_non_exhaustive()
	}
}

fn checksum(value: &[u8]) -> [u8; 32] {
	Sha256::digest(value).into()
}

impl MaskedSecret {
	pub fn new(value: &[u8]) -> Result<Self, Error> {
		if value.is_empty() {
			return Err(Error::null_argument("secret value"));
		}

		let mut buf = Zeroizing::new(vec![0u8; value.len() * 2]);
		let (masked, mask) = buf.split_at_mut(value.len());
		rand::thread_rng().fill_bytes(mask);
		for ((m, v), k) in masked.iter_mut().zip(value).zip(mask.iter()) {
			*m = v ^ k;
		}

		Ok(Self {
			buf,
			checksum: checksum(value),
		})
	}

	/// Rebuild a secret from its exported form (`masked || mask`) under a fresh mask.
	pub(crate) fn from_export(exported: &[u8]) -> Result<Self, Error> {
		if exported.is_empty() || exported.len() % 2 != 0 {
			return Err(Error::format(
				"masked key",
				format!("{} octets is not a masked value", exported.len()),
			));
		}

		let (masked, mask) = exported.split_at(exported.len() / 2);
		let value: Zeroizing<Vec<u8>> =
			Zeroizing::new(masked.iter().zip(mask).map(|(m, k)| m ^ k).collect());

		Self::new(&value)
	}

	/// Length of the secret value (not of the masked representation).
	pub fn len(&self) -> usize {
		self.buf.len() / 2
	}

	pub fn is_empty(&self) -> bool {
		self.buf.is_empty()
	}

	/// Replace the mask with a fresh random one.
	pub fn remask(&mut self) {
		let len = self.len();
		let mut fresh = Zeroizing::new(vec![0u8; len]);
		rand::thread_rng().fill_bytes(&mut fresh);

		let (masked, mask) = self.buf.split_at_mut(len);
		for ((m, k), f) in masked.iter_mut().zip(mask.iter_mut()).zip(fresh.iter()) {
			*m ^= *k ^ f;
			*k = *f;
		}
	}

	/// Write `masked || mask` under a mask that is used for nothing else.
	///
	/// The secret is remasked both before and after the copy, so the mask in `out` never matches
	/// the one kept in memory.
	pub(crate) fn export(&mut self, out: &mut [u8]) -> Result<(), Error> {
		if out.len() != self.buf.len() {
			return Err(Error::buffer_too_small(self.buf.len(), out.len()));
		}

		self.remask();
		out.copy_from_slice(&self.buf);
		self.remask();

		Ok(())
	}

	pub fn reveal(&self) -> SecretSlice<u8> {
		let (masked, mask) = self.buf.split_at(self.len());
		let value: Vec<u8> = masked.iter().zip(mask).map(|(m, k)| m ^ k).collect();
		value.into()
	}

	/// Whether the value still matches the checksum taken when it was stored.
	pub fn is_intact(&self) -> bool {
		use secrecy::ExposeSecret as _;

		constant_time_eq(&checksum(self.reveal().expose_secret()), &self.checksum)
	}
}

impl PartialEq for MaskedSecret {
	fn eq(&self, other: &Self) -> bool {
		use secrecy::ExposeSecret as _;

		constant_time_eq(self.reveal().expose_secret(), other.reveal().expose_secret())
	}
}

impl Eq for MaskedSecret {}
