use aes::{
	Aes256,
	cipher::{BlockEncrypt as _, KeyInit as _},
};
use secrecy::{ExposeSecret as _, SecretSlice};

use super::{
	Error, KeyNumber,
	key::{Algorithm, Engine, Resource},
	masked::MaskedSecret,
};

/// A secret key for a block cipher or a MAC.
#[derive(Clone)]
pub struct SymmetricKey {
	algorithm: Algorithm,
	number: KeyNumber,
	label: Option<String>,
	resource: Resource,
	secret: MaskedSecret,
	// the AES schedule itself is rebuilt from the masked value for every block
	schedulable: bool,
}

impl std::fmt::Debug for SymmetricKey {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SymmetricKey")
			.field("algorithm", &self.algorithm)
			.field("number", &self.number.to_string())
			.field("label", &self.label)
			.field("resource", &self.resource)
			.finish_non_exhaustive()
	}
}

impl PartialEq for SymmetricKey {
	fn eq(&self, other: &Self) -> bool {
		self.algorithm == other.algorithm
			&& self.number == other.number
			&& self.label == other.label
			&& self.resource == other.resource
			&& self.secret == other.secret
	}
}

fn check_algorithm(algorithm: Algorithm) -> Result<(), Error> {
	match algorithm.engine() {
		Engine::BlockCipher | Engine::HmacFunction => Ok(()),
		e => Err(Error::unsupported_engine(e)),
	}
}

impl SymmetricKey {
	/// Create a key from a known value, which must be exactly as long as `algorithm` wants.
	#[tracing::instrument(level = "debug", skip(value))]
	pub fn new(algorithm: Algorithm, value: &[u8]) -> Result<Self, Error> {
		check_algorithm(algorithm)?;
		if value.len() != algorithm.key_size() {
			return Err(Error::key_creation(format!(
				"{algorithm} keys are {} octets, not {}",
				algorithm.key_size(),
				value.len()
			)));
		}

		let secret = MaskedSecret::new(value)?;
		Ok(Self::from_parts(
			algorithm,
			KeyNumber::random(),
			None,
			Resource::for_engine(algorithm.engine())?,
			secret,
		))
	}

	#[tracing::instrument(level = "debug")]
	pub fn generate(algorithm: Algorithm) -> Result<Self, Error> {
		use rand::RngCore as _;

		check_algorithm(algorithm)?;
		let mut value = zeroize::Zeroizing::new(vec![0u8; algorithm.key_size()]);
		rand::thread_rng().fill_bytes(&mut value);

		Self::new(algorithm, &value)
	}

	/// Assemble a key whose value has already been recovered and checked.
	pub(crate) fn from_parts(
		algorithm: Algorithm,
		number: KeyNumber,
		label: Option<String>,
		resource: Resource,
		secret: MaskedSecret,
	) -> Self {
		Self {
			schedulable: matches!(algorithm.engine(), Engine::BlockCipher),
			algorithm,
			number,
			label,
			resource,
			secret,
		}
	}

	pub fn with_label(mut self, label: impl Into<String>) -> Self {
		self.label = Some(label.into());
		self
	}

	pub fn with_resource(mut self, resource: Resource) -> Self {
		self.resource = resource;
		self
	}

	pub fn algorithm(&self) -> Algorithm {
		self.algorithm
	}

	pub fn number(&self) -> &KeyNumber {
		&self.number
	}

	pub fn label(&self) -> Option<&str> {
		self.label.as_deref()
	}

	pub fn resource(&self) -> &Resource {
		&self.resource
	}

	pub fn expose_secret(&self) -> SecretSlice<u8> {
		self.secret.reveal()
	}

	pub(crate) fn secret_mut(&mut self) -> &mut MaskedSecret {
		&mut self.secret
	}

	/// Whether the key is ready for block operations.
	pub fn is_scheduled(&self) -> bool {
		self.schedulable
	}

	/// Encrypt one block in place, counting it against the key's resource.
	pub fn encrypt_block(&mut self, block: &mut [u8; 16]) -> Result<(), Error> {
		if !self.schedulable {
			return Err(Error::unsupported_engine(self.algorithm.engine()));
		}
		if self.resource.remaining == 0 {
			return Err(Error::resource_exhausted(self.number.to_string()));
		}

		{
			let secret = self.secret.reveal();
			let cipher = Aes256::new_from_slice(secret.expose_secret())
				.map_err(|e| Error::key_creation(e.to_string()))?;
			cipher.encrypt_block(block.into());
		}
		self.secret.remask();
		self.resource.remaining -= 1;

		Ok(())
	}
}
