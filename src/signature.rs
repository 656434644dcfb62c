//! ECDSA sign keys, and the verify keys that go with them.

use const_oid::ObjectIdentifier;
use der::{
	Decode as _, Encode as _,
	asn1::{AnyRef, BitStringRef, OctetStringRef},
};
use p256::ecdsa::signature::{RandomizedSigner as _, Verifier as _};
use rand::{CryptoRng, RngCore};
use secrecy::{ExposeSecret as _, SecretSlice};
use sha2::{Digest as _, Sha256, Sha384};
use spki::{AlgorithmIdentifierRef, SubjectPublicKeyInfoRef};

use super::{
	Error, KeyNumber,
	asn1::{Level, NodeRef, Tree, malformed},
	key::{Algorithm, Engine, Resource},
	masked::MaskedSecret,
	name::Name,
	oid::{self, Mode},
};

/// Largest signature, in octets, that requests and certificates make room for.
pub const MAX_SIGNATURE_LEN: usize = 128;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Curve {
	P256,
	P384,
}

impl Curve {
	pub fn oid(&self) -> ObjectIdentifier {
		match self {
			Curve::P256 => oid::CURVE_P256,
			Curve::P384 => oid::CURVE_P384,
		}
	}

	pub(crate) fn from_oid(id: &ObjectIdentifier, field: &str) -> Result<Self, Error> {
		oid::expect_mode(id, Mode::Curve, field)?;

		if id == &oid::CURVE_P256 {
			Ok(Curve::P256)
		} else if id == &oid::CURVE_P384 {
			Ok(Curve::P384)
		} else {
			Err(Error::unsupported_identifier(field, id.to_string()))
		}
	}

	/// The signature algorithm for keys on this curve.
	pub fn algorithm(&self) -> Algorithm {
		match self {
			Curve::P256 => Algorithm::EcdsaP256Sha256,
			Curve::P384 => Algorithm::EcdsaP384Sha384,
		}
	}

	pub(crate) fn from_algorithm(algorithm: Algorithm) -> Result<Self, Error> {
		match algorithm {
			Algorithm::EcdsaP256Sha256 => Ok(Curve::P256),
			Algorithm::EcdsaP384Sha384 => Ok(Curve::P384),
			a => Err(Error::unsupported_engine(a.engine())),
		}
	}

	/// Octets in one coordinate, and in a secret scalar.
	pub fn field_size(&self) -> usize {
		match self {
			Curve::P256 => 32,
			Curve::P384 => 48,
		}
	}

	/// Octets in a signature (`r || s`).
	pub fn tag_size(&self) -> usize {
		2 * self.field_size()
	}

	/// The curve's native hash of `data`.
	pub(crate) fn hash(&self, data: &[&[u8]]) -> Vec<u8> {
		match self {
			Curve::P256 => {
				let mut h = Sha256::new();
				data.iter().for_each(|d| h.update(d));
				h.finalize().to_vec()
			}
			Curve::P384 => {
				let mut h = Sha384::new();
				data.iter().for_each(|d| h.update(d));
				h.finalize().to_vec()
			}
		}
	}
}

impl std::fmt::Display for Curve {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&oid::display_name(&self.oid()))
	}
}

/// The private half of a signature key pair.
#[derive(Clone)]
pub struct SignKey {
	curve: Curve,
	number: KeyNumber,
	label: Option<String>,
	resource: Resource,
	secret: MaskedSecret,
	verify_key_number: Option<KeyNumber>,
}

impl std::fmt::Debug for SignKey {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SignKey")
			.field("curve", &self.curve)
			.field("number", &self.number.to_string())
			.field("label", &self.label)
			.field("resource", &self.resource)
			.field(
				"verify_key_number",
				&self.verify_key_number.map(|n| n.to_string()),
			)
			.finish_non_exhaustive()
	}
}

impl PartialEq for SignKey {
	fn eq(&self, other: &Self) -> bool {
		self.curve == other.curve
			&& self.number == other.number
			&& self.label == other.label
			&& self.resource == other.resource
			&& self.verify_key_number == other.verify_key_number
			&& self.secret == other.secret
	}
}

fn check_scalar(curve: Curve, scalar: &[u8]) -> Result<(), Error> {
	if scalar.len() != curve.field_size() {
		return Err(Error::key_creation(format!(
			"{curve} secret scalars are {} octets, not {}",
			curve.field_size(),
			scalar.len()
		)));
	}

	let valid = match curve {
		Curve::P256 => p256::ecdsa::SigningKey::from_slice(scalar).is_ok(),
		Curve::P384 => p384::ecdsa::SigningKey::from_slice(scalar).is_ok(),
	};

	if valid {
		Ok(())
	} else {
		Err(Error::key_creation(format!("not a {curve} secret scalar")))
	}
}

impl SignKey {
	#[tracing::instrument(level = "debug")]
	pub fn generate(curve: Curve) -> Result<Self, Error> {
		let mut rng = rand::rngs::OsRng;
		let scalar = match curve {
			Curve::P256 => p256::ecdsa::SigningKey::random(&mut rng).to_bytes().to_vec(),
			Curve::P384 => p384::ecdsa::SigningKey::random(&mut rng).to_bytes().to_vec(),
		};
		let scalar = zeroize::Zeroizing::new(scalar);

		Self::from_scalar(curve, &scalar)
	}

	/// A sign key with a known secret scalar, which must be valid for `curve`.
	#[tracing::instrument(level = "debug", skip(scalar))]
	pub fn from_scalar(curve: Curve, scalar: &[u8]) -> Result<Self, Error> {
		check_scalar(curve, scalar)?;

		Ok(Self {
			curve,
			number: KeyNumber::random(),
			label: None,
			resource: Resource::for_engine(Engine::SignFunction)?,
			secret: MaskedSecret::new(scalar)?,
			verify_key_number: None,
		})
	}

	/// Assemble a sign key whose scalar has been recovered from a container.
	pub(crate) fn from_parts(
		curve: Curve,
		number: KeyNumber,
		label: Option<String>,
		resource: Resource,
		secret: MaskedSecret,
		verify_key_number: Option<KeyNumber>,
	) -> Result<Self, Error> {
		check_scalar(curve, secret.reveal().expose_secret())?;

		Ok(Self {
			curve,
			number,
			label,
			resource,
			secret,
			verify_key_number,
		})
	}

	pub fn with_label(mut self, label: impl Into<String>) -> Self {
		self.label = Some(label.into());
		self
	}

	pub fn with_resource(mut self, resource: Resource) -> Self {
		self.resource = resource;
		self
	}

	pub fn curve(&self) -> Curve {
		self.curve
	}

	pub fn algorithm(&self) -> Algorithm {
		self.curve.algorithm()
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

	/// Number of the verify key this key has been paired with, if any.
	pub fn verify_key_number(&self) -> Option<&KeyNumber> {
		self.verify_key_number.as_ref()
	}

	pub fn expose_secret(&self) -> SecretSlice<u8> {
		self.secret.reveal()
	}

	pub(crate) fn secret_mut(&mut self) -> &mut MaskedSecret {
		&mut self.secret
	}

	/// Work out the matching verify key, and remember its number so the two are known to pair.
	#[tracing::instrument(level = "debug", skip(self), fields(number = %self.number))]
	pub fn verify_key(&mut self, name: Name) -> Result<VerifyKey, Error> {
		let secret = self.secret.reveal();
		let point = match self.curve {
			Curve::P256 => p256::ecdsa::SigningKey::from_slice(secret.expose_secret())
				.map_err(|e| Error::key_creation(e.to_string()))?
				.verifying_key()
				.to_encoded_point(false)
				.as_bytes()[1..]
				.to_vec(),
			Curve::P384 => p384::ecdsa::SigningKey::from_slice(secret.expose_secret())
				.map_err(|e| Error::key_creation(e.to_string()))?
				.verifying_key()
				.to_encoded_point(false)
				.as_bytes()[1..]
				.to_vec(),
		};
		self.secret.remask();

		let vk = VerifyKey::from_point(self.curve, &point, name)?;
		tracing::debug!(verify_key = %vk.number, "Paired verify key");
		self.verify_key_number = Some(vk.number);

		Ok(vk)
	}

	/// Sign `message` with the curve's native hash, producing `r || s`.
	#[tracing::instrument(level = "debug", skip(self, message, rng), fields(number = %self.number))]
	pub fn sign(
		&self,
		message: &[u8],
		rng: &mut (impl RngCore + CryptoRng),
	) -> Result<Vec<u8>, Error> {
		let secret = self.secret.reveal();

		let signature = match self.curve {
			Curve::P256 => {
				let sk = p256::ecdsa::SigningKey::from_slice(secret.expose_secret())
					.map_err(|e| Error::key_creation(e.to_string()))?;
				let sig: p256::ecdsa::Signature = sk
					.try_sign_with_rng(rng, message)
					.map_err(|e| Error::key_creation(format!("signing failed: {e}")))?;
				sig.to_bytes().to_vec()
			}
			Curve::P384 => {
				let sk = p384::ecdsa::SigningKey::from_slice(secret.expose_secret())
					.map_err(|e| Error::key_creation(e.to_string()))?;
				let sig: p384::ecdsa::Signature = sk
					.try_sign_with_rng(rng, message)
					.map_err(|e| Error::key_creation(format!("signing failed: {e}")))?;
				sig.to_bytes().to_vec()
			}
		};

		if signature.len() > MAX_SIGNATURE_LEN {
			return Err(Error::algorithm_too_large(signature.len()));
		}

		Ok(signature)
	}
}

/// Check an `r || s` signature over `message` against the point `x || y` on `curve`.
fn verify_point(curve: Curve, point: &[u8], message: &[u8], signature: &[u8]) -> Result<(), Error> {
	let sec1 = sec1_point(point);

	let valid = match curve {
		Curve::P256 => {
			let vk = p256::ecdsa::VerifyingKey::from_sec1_bytes(&sec1)
				.map_err(|_| Error::curve_point(curve.to_string()))?;
			p256::ecdsa::Signature::from_slice(signature)
				.is_ok_and(|sig| vk.verify(message, &sig).is_ok())
		}
		Curve::P384 => {
			let vk = p384::ecdsa::VerifyingKey::from_sec1_bytes(&sec1)
				.map_err(|_| Error::curve_point(curve.to_string()))?;
			p384::ecdsa::Signature::from_slice(signature)
				.is_ok_and(|sig| vk.verify(message, &sig).is_ok())
		}
	};

	if valid {
		Ok(())
	} else {
		tracing::debug!("Signature did not verify");
		Err(Error::SignatureInvalid)
	}
}

// uncompressed SEC1: 0x04 || x || y
fn sec1_point(point: &[u8]) -> Vec<u8> {
	let mut sec1 = Vec::with_capacity(point.len() + 1);
	sec1.push(0x04);
	sec1.extend_from_slice(point);
	sec1
}

/// A public key read from a request or certificate.
///
/// The point is known to be on its curve, but nothing has vouched for it yet, so it has no key
/// number.  It becomes a [`VerifyKey`] either by checking a signature itself
/// ([`CandidateKey::verify`]) or, once some other key has checked the signature over it,
/// through [`CandidateKey::into_key`].
#[derive(Debug)]
pub(crate) struct CandidateKey {
	curve: Curve,
	point: Vec<u8>,
	name: Name,
}

impl CandidateKey {
	pub(crate) fn from_point(curve: Curve, point: &[u8], name: Name) -> Result<Self, Error> {
		if point.len() != 2 * curve.field_size() {
			return Err(Error::curve_point(format!(
				"{curve} (point of {} octets)",
				point.len()
			)));
		}

		let sec1 = sec1_point(point);
		let on_curve = match curve {
			Curve::P256 => p256::ecdsa::VerifyingKey::from_sec1_bytes(&sec1).is_ok(),
			Curve::P384 => p384::ecdsa::VerifyingKey::from_sec1_bytes(&sec1).is_ok(),
		};
		if !on_curve {
			return Err(Error::curve_point(curve.to_string()));
		}

		Ok(Self {
			curve,
			point: point.to_vec(),
			name,
		})
	}

	pub(crate) fn curve(&self) -> Curve {
		self.curve
	}

	pub(crate) fn algorithm(&self) -> Algorithm {
		self.curve.algorithm()
	}

	pub(crate) fn name(&self) -> &Name {
		&self.name
	}

	/// Check a signature made with this key, and only then hand the key out.
	#[tracing::instrument(level = "debug", skip_all, fields(curve = %self.curve))]
	pub(crate) fn verify(self, message: &[u8], signature: &[u8]) -> Result<VerifyKey, Error> {
		verify_point(self.curve, &self.point, message, signature)?;
		self.into_key()
	}

	pub(crate) fn into_key(self) -> Result<VerifyKey, Error> {
		Ok(VerifyKey {
			number: KeyNumber::derive(&sec1_point(&self.point))?,
			curve: self.curve,
			point: self.point,
			name: self.name,
		})
	}

	/// Read `SubjectPublicKeyInfo`, giving the key the supplied `name`.
	pub(crate) fn decode_public_key_info(node: &NodeRef<'_>, name: Name) -> Result<Self, Error> {
		let der = node.encode()?;
		let info = SubjectPublicKeyInfoRef::from_der(&der).map_err(malformed(node.path()))?;

		let alg_path = format!("{}.algorithm", node.path());
		if info.algorithm.oid != oid::EC_PUBLIC_KEY {
			return Err(Error::unsupported_identifier(
				alg_path,
				info.algorithm.oid.to_string(),
			));
		}

		let params = info
			.algorithm
			.parameters
			.ok_or_else(|| Error::format(&alg_path, "missing parameters"))?
			.to_der()
			.map_err(malformed(&alg_path))?;
		let params = Tree::from_der(&params)?;
		let mut top = params.cursor(&alg_path);
		let mut params = top.next("parameters")?.sequence()?;
		params.expect_count(2)?;
		let curve_node = params.next("curve")?;
		let curve = Curve::from_oid(&curve_node.oid()?, curve_node.path())?;
		let alg_node = params.next("signature algorithm")?;
		let algorithm = Algorithm::from_oid(&alg_node.oid()?, alg_node.path())?;
		if algorithm != curve.algorithm() {
			return Err(Error::unsupported_identifier(
				alg_node.path(),
				algorithm.oid().to_string(),
			));
		}

		let key_path = format!("{}.public key", node.path());
		let key_bits = info
			.subject_public_key
			.as_bytes()
			.ok_or_else(|| Error::format(&key_path, "bit string has unused bits"))?;
		let point = OctetStringRef::from_der(key_bits).map_err(malformed(&key_path))?;

		Self::from_point(curve, point.as_bytes(), name)
	}
}

/// The public half of a signature key pair, along with the name it belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifyKey {
	curve: Curve,
	number: KeyNumber,
	// x || y
	point: Vec<u8>,
	name: Name,
}

impl VerifyKey {
	/// Build a verify key from its affine coordinates, checking that they are on `curve`.
	#[tracing::instrument(level = "debug", skip(point))]
	pub fn from_point(curve: Curve, point: &[u8], name: Name) -> Result<Self, Error> {
		CandidateKey::from_point(curve, point, name)?.into_key()
	}

	pub fn curve(&self) -> Curve {
		self.curve
	}

	pub fn algorithm(&self) -> Algorithm {
		self.curve.algorithm()
	}

	pub fn number(&self) -> &KeyNumber {
		&self.number
	}

	pub fn name(&self) -> &Name {
		&self.name
	}

	/// The affine coordinates, `x || y`.
	pub fn point(&self) -> &[u8] {
		&self.point
	}

	#[tracing::instrument(level = "debug", skip(self, message, signature), fields(number = %self.number))]
	pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), Error> {
		verify_point(self.curve, &self.point, message, signature)
	}

	/// Append `SubjectPublicKeyInfo` for this key.
	pub(crate) fn encode_public_key_info(&self, tree: &mut Tree, level: Level) -> Result<(), Error> {
		let mut params = Tree::new();
		let seq = params.add_sequence(Level::Top)?;
		params.add_oid(seq, &self.curve.oid())?;
		params.add_oid(seq, &self.algorithm().oid())?;
		let params = params.to_der()?;

		let field = "public key info";
		let point = OctetStringRef::new(&self.point)
			.and_then(|p| p.to_der())
			.map_err(malformed(field))?;
		let info = SubjectPublicKeyInfoRef {
			algorithm: AlgorithmIdentifierRef {
				oid: oid::EC_PUBLIC_KEY,
				parameters: Some(AnyRef::from_der(&params).map_err(malformed(field))?),
			},
			subject_public_key: BitStringRef::from_bytes(&point).map_err(malformed(field))?,
		};

		tree.add_encoded(level, &info.to_der().map_err(malformed(field))?)
	}
}
