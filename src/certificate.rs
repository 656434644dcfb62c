//! Certificates binding a verify key to a name, signed by an issuer.
//!
//! Certificates are issued in the usual X.509 v3 shape, with the serial number worked out from
//! the subject and issuer key numbers rather than picked at random.  Importing one checks the
//! issuer name against the issuer key supplied (or, without one, insists on a self-signed
//! certificate) and always verifies the signature before handing the subject key back.

use chrono::{DateTime, Utc};
use const_oid::ObjectIdentifier;
use rand::{CryptoRng, RngCore};
use std::path::Path;

use super::{
	Error,
	armor::{self, Content, Format},
	asn1::{self, Level, NodeRef, Tag, TagNumber, Tree},
	key::{Algorithm, Validity},
	name::Name,
	oid,
	request::{check_pair, encode_algorithm, sign_tree},
	signature::{CandidateKey, SignKey, VerifyKey},
};

pub const SERIAL_LEN: usize = 32;

/// Serial number of a certificate for `subject` issued with `issuer`.
///
/// This is the first 32 octets of the issuer's native hash over the subject key number followed
/// by the issuer key number, so anyone holding both numbers can reproduce it.
#[tracing::instrument(level = "trace", skip_all)]
pub fn serial_number(subject: &VerifyKey, issuer: &SignKey) -> [u8; SERIAL_LEN] {
	let digest = issuer
		.curve()
		.hash(&[&subject.number().as_bytes()[..], &issuer.number().as_bytes()[..]]);

	let mut serial = [0u8; SERIAL_LEN];
	serial.copy_from_slice(&digest[..SERIAL_LEN]);
	serial
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Extension {
	pub id: ObjectIdentifier,
	pub critical: bool,
	pub value: Vec<u8>,
}

/// A certificate whose signature has been verified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Certificate {
	version: u32,
	serial: Vec<u8>,
	issuer: Name,
	validity: Validity,
	subject_key: VerifyKey,
	extensions: Vec<Extension>,
}

impl Certificate {
	pub fn version(&self) -> u32 {
		self.version
	}

	/// The serial number as stated in the certificate, minimal big-endian.
	pub fn serial(&self) -> &[u8] {
		&self.serial
	}

	pub fn issuer(&self) -> &Name {
		&self.issuer
	}

	pub fn subject(&self) -> &Name {
		self.subject_key.name()
	}

	pub fn validity(&self) -> &Validity {
		&self.validity
	}

	pub fn subject_key(&self) -> &VerifyKey {
		&self.subject_key
	}

	pub fn into_subject_key(self) -> VerifyKey {
		self.subject_key
	}

	pub fn extensions(&self) -> &[Extension] {
		&self.extensions
	}

	/// Contents of the subject key identifier extension, if the certificate has one.
	pub fn subject_key_identifier(&self) -> Option<&[u8]> {
		let ext = self
			.extensions
			.iter()
			.find(|e| e.id == oid::SUBJECT_KEY_IDENTIFIER)?;

		let tree = Tree::from_der(&ext.value).ok()?;
		let mut c = tree.cursor("subject key identifier");
		let value = c.next("value").ok()?.octet_string().ok()?;

		// the identifier is a suffix of the extension value, so it can be borrowed from there
		Some(&ext.value[ext.value.len() - value.len()..])
	}

	pub fn is_valid_at(&self, at: &DateTime<Utc>) -> bool {
		self.validity.contains(at)
	}

	/// Whether the stated serial is the one `issuer` would have given this certificate.
	pub fn serial_matches(&self, issuer: &SignKey) -> bool {
		let expected = serial_number(&self.subject_key, issuer);
		let start = expected.iter().position(|b| *b != 0).unwrap_or(SERIAL_LEN - 1);

		constant_time_eq::constant_time_eq(&expected[start..], &self.serial)
	}
}

/// Build the DER tree of a certificate for `subject`, issued and signed by `issuer_sk`.
///
/// `issuer_vk` supplies the issuer name, and must be the verify key paired with `issuer_sk`.  A
/// self-signed certificate is issued by passing the same pair as subject and issuer.
#[tracing::instrument(level = "debug", skip_all, fields(subject = %subject.number(), issuer = %issuer_vk.number()))]
pub fn issue_certificate(
	subject: &VerifyKey,
	issuer_sk: &SignKey,
	issuer_vk: &VerifyKey,
	validity: &Validity,
	rng: &mut (impl RngCore + CryptoRng),
) -> Result<Tree, Error> {
	check_pair(issuer_vk, issuer_sk)?;

	let mut tbs = Tree::new();
	let version = tbs.add_constructed(Level::Top, asn1::context(TagNumber::N0))?;
	tbs.add_uint32(version, 2)?;
	tbs.add_unsigned(Level::Top, &serial_number(subject, issuer_sk))?;
	encode_algorithm(&mut tbs, Level::Top, issuer_sk.algorithm())?;
	issuer_vk.name().encode(&mut tbs, Level::Top)?;

	let times = tbs.add_sequence(Level::Top)?;
	tbs.add_time(times, &validity.not_before)?;
	tbs.add_time(times, &validity.not_after)?;

	subject.name().encode(&mut tbs, Level::Top)?;
	subject.encode_public_key_info(&mut tbs, Level::Top)?;

	let mut ski = Tree::new();
	ski.add_octet_string(Level::Top, subject.number().as_bytes())?;
	let extensions = tbs.add_constructed(Level::Top, asn1::context(TagNumber::N3))?;
	let list = tbs.add_sequence(extensions)?;
	let ext = tbs.add_sequence(list)?;
	tbs.add_oid(ext, &oid::SUBJECT_KEY_IDENTIFIER)?;
	tbs.add_octet_string(ext, &ski.to_der()?)?;

	sign_tree(tbs, issuer_sk, rng)
}

pub fn export_certificate(
	subject: &VerifyKey,
	issuer_sk: &SignKey,
	issuer_vk: &VerifyKey,
	validity: &Validity,
	format: Format,
	rng: &mut (impl RngCore + CryptoRng),
) -> Result<Vec<u8>, Error> {
	let tree = issue_certificate(subject, issuer_sk, issuer_vk, validity, rng)?;
	armor::encode(&tree.to_der()?, format, Content::Certificate)
}

fn parse_extensions(node: &NodeRef<'_>) -> Result<Vec<Extension>, Error> {
	let mut wrapper = node.children(asn1::context(TagNumber::N3))?;
	wrapper.expect_count(1)?;
	let mut list = wrapper.next("extensions")?.sequence()?;

	let mut extensions = Vec::with_capacity(list.count());
	while list.has_more() {
		let mut ext = list.next("extension")?.sequence()?;
		let id = ext.next("id")?.oid()?;
		let critical = match ext.peek("critical") {
			Some(n) if n.tag() == Tag::Boolean => {
				ext.next("critical")?;
				n.boolean()?
			}
			_ => false,
		};
		let value = ext.next("value")?.octet_string()?.to_vec();

		tracing::trace!(%id, critical, "Read extension");
		extensions.push(Extension {
			id,
			critical,
			value,
		});
	}

	Ok(extensions)
}

/// Read a certificate and verify its signature.
///
/// With an `issuer` key, the certificate's issuer name must be that key's name and the signature
/// must verify under it.  Without one, the certificate must be self-signed.
#[tracing::instrument(level = "debug", skip(bytes, issuer), fields(len = bytes.len()))]
pub fn import_certificate(bytes: &[u8], issuer: Option<&VerifyKey>) -> Result<Certificate, Error> {
	if bytes.is_empty() {
		return Err(Error::null_argument("certificate"));
	}

	let der = armor::decode(bytes, Content::Certificate)?;
	let tree = Tree::from_der(&der)?;
	let mut top = tree.cursor("certificate");
	top.expect_count(1)?;

	let mut root = top.next("root")?.sequence()?;
	root.expect_count(3)?;
	let tbs_node = root.next("tbs")?;
	let mut tbs = tbs_node.sequence()?;

	let version = match tbs.peek("version") {
		Some(node) if node.tag() == asn1::context(TagNumber::N0) => {
			tbs.next("version")?;
			let mut wrapper = node.children(asn1::context(TagNumber::N0))?;
			wrapper.expect_count(1)?;
			let v = wrapper.next("value")?;
			match v.uint32()? {
				n @ 0..=2 => n,
				n => return Err(Error::format(v.path(), format!("unknown version {n}"))),
			}
		}
		_ => 0,
	};

	let serial = tbs.next("serial number")?.unsigned()?.to_vec();

	let mut alg = tbs.next("signature")?.sequence()?;
	let alg_node = alg.first("id")?;
	let algorithm = Algorithm::from_oid(&alg_node.oid()?, alg_node.path())?;

	let issuer_name = Name::decode(&tbs.next("issuer")?)?;

	let mut times = tbs.next("validity")?.sequence()?;
	times.expect_count(2)?;
	let validity = Validity {
		not_before: times.next("not before")?.time()?,
		not_after: times.next("not after")?.time()?,
	};

	let subject_name = Name::decode(&tbs.next("subject")?)?;
	let candidate = CandidateKey::decode_public_key_info(&tbs.next("public key")?, subject_name)?;

	let mut extensions = Vec::new();
	while let Some(n) = tbs.peek("extensions") {
		tbs.next("extensions")?;
		if n.tag() == asn1::context(TagNumber::N3) {
			extensions = parse_extensions(&n)?;
		} else {
			tracing::debug!(tag = %n.tag(), "Skipping unrecognised field");
		}
	}

	let mut outer_alg = root.next("algorithm")?.sequence()?;
	let outer_node = outer_alg.first("id")?;
	if outer_node.oid()? != algorithm.oid() {
		return Err(Error::format(
			outer_node.path(),
			"does not match the signature algorithm in the certificate body",
		));
	}
	let signature = root.next("signature")?.bit_string()?;

	let message = tbs_node.encode()?;
	let subject_key = match issuer {
		Some(key) => {
			if key.name() != &issuer_name {
				tracing::debug!(expected = %key.name(), found = %issuer_name, "Issuer name mismatch");
				return Err(Error::NameMismatch);
			}
			if key.algorithm() != algorithm {
				return Err(Error::SignatureInvalid);
			}
			key.verify(&message, signature)?;
			candidate.into_key()?
		}
		None => {
			if &issuer_name != candidate.name() {
				return Err(Error::unknown_issuer(issuer_name.to_string()));
			}
			if candidate.algorithm() != algorithm {
				return Err(Error::SignatureInvalid);
			}
			candidate.verify(&message, signature)?
		}
	};

	tracing::debug!(subject = %subject_key.name(), issuer = %issuer_name, "Accepted certificate");
	Ok(Certificate {
		version,
		serial,
		issuer: issuer_name,
		validity,
		subject_key,
		extensions,
	})
}

/// Write a certificate to `path`.
#[tracing::instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub fn export_certificate_to_file(
	path: &Path,
	subject: &VerifyKey,
	issuer_sk: &SignKey,
	issuer_vk: &VerifyKey,
	validity: &Validity,
	format: Format,
	rng: &mut (impl RngCore + CryptoRng),
) -> Result<(), Error> {
	let tree = issue_certificate(subject, issuer_sk, issuer_vk, validity, rng)
		.map_err(|e| e.for_file(path))?;
	armor::write_file(path, &tree, format, Content::Certificate)
}

pub fn import_certificate_from_file(
	path: &Path,
	issuer: Option<&VerifyKey>,
) -> Result<Certificate, Error> {
	let bytes = armor::read_file(path, Content::Certificate)?;
	import_certificate(&bytes, issuer).map_err(|e| e.for_file(path))
}
