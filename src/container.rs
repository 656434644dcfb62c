//! Password-protected containers holding a single secret key.
//!
//! A container is a DER sequence of three elements:
//!
//! ```text
//! Container ::= SEQUENCE {
//!     id        OBJECT IDENTIFIER,     -- always the container identifier
//!     recovery  BasicKeyMetaData,      -- how to get the content keys back from a password
//!     content   SEQUENCE {
//!         type    OBJECT IDENTIFIER,   -- symmetric key content, or secret key content
//!         record  KeyRecord
//!     }
//! }
//! ```
//!
//! The key value itself sits inside the record, wrapped as described in [`crate::wrap`].  On
//! import the whole structure is checked before a password is asked for, so a malformed or
//! unsupported container never costs a key derivation.

use std::path::{Path, PathBuf};

use super::{
	Error, KeyNumber,
	armor::{self, Content, Format},
	asn1::{Cursor, Level, NodeRef, Tree},
	config::{self, MAX_ITERATION_COUNT, Options},
	kdf::{self, SALT_LEN},
	key::{Algorithm, Engine, Key, Resource, ResourceKind, Validity},
	masked::MaskedSecret,
	number::NUMBER_LEN,
	oid::{self, Mode},
	password,
	signature::{Curve, SignKey},
	symmetric::SymmetricKey,
	wrap::{self, Compat},
};

/// Room allowed for generated file names.
pub const FILE_NAME_CAPACITY: usize = 256;

/// Where the key value of a record is kept.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
enum Storage {
	Absent = 0,
	Present = 1,
	External = 2,
}

/// Everything a container says about its key, short of the key value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyInfo {
	pub algorithm: Algorithm,
	pub number: KeyNumber,
	pub label: Option<String>,
	pub resource: Resource,
	pub curve: Option<Curve>,
	pub verify_key_number: Option<KeyNumber>,
	pub iteration_count: u32,
	pub compat: Compat,
}

impl KeyInfo {
	pub fn engine(&self) -> Engine {
		self.algorithm.engine()
	}
}

/// A container that has passed every structural check.
struct Parsed {
	info: KeyInfo,
	salt: Vec<u8>,
	payload: Vec<u8>,
}

fn content_type(engine: Engine) -> Result<const_oid::ObjectIdentifier, Error> {
	match engine {
		Engine::BlockCipher | Engine::HmacFunction => Ok(oid::SYMMETRIC_KEY_CONTENT),
		Engine::SignFunction => Ok(oid::SECRET_KEY_CONTENT),
		e => Err(Error::unsupported_engine(e)),
	}
}

fn encode_metadata(tree: &mut Tree, level: Level, salt: &[u8], count: u32) -> Result<(), Error> {
	let meta = tree.add_sequence(level)?;
	tree.add_oid(meta, &oid::PBKDF2_BASIC_KEY)?;
	let params = tree.add_sequence(meta)?;
	tree.add_oid(params, &oid::AES256)?;
	let kdf = tree.add_sequence(params)?;
	tree.add_oid(kdf, &oid::HMAC_SHA512)?;
	tree.add_octet_string(kdf, salt)?;
	tree.add_uint32(kdf, count)?;

	Ok(())
}

fn encode_resource(tree: &mut Tree, level: Level, resource: &Resource) -> Result<(), Error> {
	let params = tree.add_sequence(level)?;
	tree.add_uint32(params, resource.kind as u32)?;
	tree.add_uint32(params, resource.remaining)?;
	let validity = tree.add_sequence(params)?;
	tree.add_time(validity, &resource.validity.not_before)?;
	tree.add_time(validity, &resource.validity.not_after)?;

	Ok(())
}

fn encode_content(tree: &mut Tree, level: Level, compat: Compat, payload: &[u8]) -> Result<(), Error> {
	let content = tree.add_sequence(level)?;
	tree.add_uint32(content, Storage::Present as u32)?;
	tree.add_uint32(content, compat as u32)?;
	tree.add_octet_string(content, payload)?;

	Ok(())
}

fn encode_record_header(
	tree: &mut Tree,
	level: Level,
	algorithm: Algorithm,
	number: &KeyNumber,
	label: Option<&str>,
	resource: &Resource,
) -> Result<(), Error> {
	tree.add_oid(level, &algorithm.oid())?;
	tree.add_octet_string(level, number.as_bytes())?;
	tree.add_utf8_string(level, label)?;
	encode_resource(tree, level, resource)
}

/// Build the DER tree of a container for `key`, protected by a password from `options`.
#[tracing::instrument(level = "debug", skip(key, options), fields(number = %key.number()))]
pub fn build_container(key: &mut Key, options: &Options) -> Result<Tree, Error> {
	let content_type = content_type(key.engine())?;

	let iterations = options.pbkdf2_iteration_count.clamp(1, MAX_ITERATION_COUNT);
	let salt = kdf::new_salt();
	let keys = {
		let password = password::read_password(options)?;
		kdf::derive(password.as_bytes(), &salt, iterations)?
	};
	let compat = Compat::from(options.openssl_compatible);

	let mut tree = Tree::new();
	let root = tree.add_sequence(Level::Top)?;
	tree.add_oid(root, &oid::CONTAINER)?;
	encode_metadata(&mut tree, root, &salt, iterations)?;

	let content = tree.add_sequence(root)?;
	tree.add_oid(content, &content_type)?;
	let record = tree.add_sequence(content)?;

	match key {
		Key::Symmetric(k) => {
			encode_record_header(
				&mut tree,
				record,
				k.algorithm(),
				k.number(),
				k.label(),
				k.resource(),
			)?;
			let payload = wrap::wrap(k.secret_mut(), &keys, compat)?;
			encode_content(&mut tree, record, compat, &payload)?;
		}
		Key::Sign(k) => {
			encode_record_header(
				&mut tree,
				record,
				k.algorithm(),
				k.number(),
				k.label(),
				k.resource(),
			)?;
			tree.add_oid(record, &k.curve().oid())?;
			match k.verify_key_number() {
				Some(n) => tree.add_octet_string(record, n.as_bytes())?,
				None => tree.add_null(record)?,
			};
			let payload = wrap::wrap(k.secret_mut(), &keys, compat)?;
			encode_content(&mut tree, record, compat, &payload)?;
		}
	}

	tracing::debug!(%content_type, iterations, "Built container");
	Ok(tree)
}

/// Export `key` in a container, with the process-wide options.
pub fn export_container(key: &mut Key, format: Format) -> Result<Vec<u8>, Error> {
	export_container_with(key, format, &Options::current())
}

pub fn export_container_with(
	key: &mut Key,
	format: Format,
	options: &Options,
) -> Result<Vec<u8>, Error> {
	let tree = build_container(key, options)?;
	armor::encode(&tree.to_der()?, format, Content::Container)
}

fn parse_metadata(node: &NodeRef<'_>) -> Result<(Vec<u8>, u32), Error> {
	let mut meta = node.sequence()?;
	meta.expect_count(2)?;

	let method = meta.next("method")?;
	oid::expect_mode(&method.oid()?, Mode::RecoveryMethod, method.path())?;

	let mut params = meta.next("parameters")?.sequence()?;
	params.expect_count(2)?;
	let cipher = params.next("cipher")?;
	let cipher_id = cipher.oid()?;
	if cipher_id != oid::AES256 {
		return Err(Error::unsupported_identifier(cipher.path(), cipher_id.to_string()));
	}

	let mut kdf = params.next("kdf")?.sequence()?;
	kdf.expect_count(3)?;
	let hash = kdf.next("hash")?;
	let hash_id = hash.oid()?;
	if hash_id != oid::HMAC_SHA512 {
		return Err(Error::unsupported_identifier(hash.path(), hash_id.to_string()));
	}

	let salt = kdf.next("salt")?;
	let salt_bytes = salt.octet_string()?;
	if salt_bytes.len() != SALT_LEN {
		return Err(Error::format(
			salt.path(),
			format!("salt of {} octets, expected {SALT_LEN}", salt_bytes.len()),
		));
	}

	let count = kdf.next("iteration count")?;
	let iterations = count.uint32()?;
	if iterations == 0 || iterations > MAX_ITERATION_COUNT {
		return Err(Error::format(
			count.path(),
			format!("iteration count {iterations} is out of range"),
		));
	}

	Ok((salt_bytes.to_vec(), iterations))
}

fn parse_resource(node: &NodeRef<'_>) -> Result<Resource, Error> {
	let mut params = node.sequence()?;
	params.expect_count(3)?;

	let kind = params.next("type")?;
	let kind = ResourceKind::from_u32(kind.path(), kind.uint32()?)?;
	let remaining = params.next("remaining")?.uint32()?;

	let mut validity = params.next("validity")?.sequence()?;
	validity.expect_count(2)?;
	let not_before = validity.next("not before")?.time()?;
	let not_after = validity.next("not after")?.time()?;

	Ok(Resource {
		kind,
		remaining,
		validity: Validity {
			not_before,
			not_after,
		},
	})
}

fn parse_encrypted_content(node: &NodeRef<'_>, key_size: usize) -> Result<(Compat, Vec<u8>), Error> {
	let mut content = node.sequence()?;
	content.expect_count(3)?;

	let storage = content.next("storage")?;
	match storage.uint32()? {
		n if n == Storage::Present as u32 => (),
		n if n == Storage::Absent as u32 || n == Storage::External as u32 => {
			return Err(Error::format(
				storage.path(),
				"key value is not stored in this container",
			));
		}
		n => return Err(Error::format(storage.path(), format!("unknown storage flag {n}"))),
	}

	let compat = content.next("compat")?;
	let compat = Compat::from_u32(compat.path(), compat.uint32()?)?;

	let payload = content.next("payload")?;
	let bytes = payload.octet_string()?;
	if bytes.len() != wrap::payload_len(key_size) {
		return Err(Error::format(
			payload.path(),
			format!(
				"payload of {} octets, expected {}",
				bytes.len(),
				wrap::payload_len(key_size)
			),
		));
	}

	Ok((compat, bytes.to_vec()))
}

fn parse_record(content_type: &NodeRef<'_>, record: &mut Cursor<'_>) -> Result<(KeyInfo, Vec<u8>), Error> {
	let type_id = content_type.oid()?;
	oid::expect_mode(&type_id, Mode::ContentType, content_type.path())?;

	let asymmetric = if type_id == oid::SYMMETRIC_KEY_CONTENT {
		record.expect_count(5)?;
		false
	} else if type_id == oid::SECRET_KEY_CONTENT {
		record.expect_count(7)?;
		true
	} else {
		return Err(Error::unsupported_identifier(
			content_type.path(),
			type_id.to_string(),
		));
	};

	let alg_node = record.next("algorithm")?;
	let algorithm = Algorithm::from_oid(&alg_node.oid()?, alg_node.path())?;
	let expected = if asymmetric {
		algorithm.engine() == Engine::SignFunction
	} else {
		matches!(algorithm.engine(), Engine::BlockCipher | Engine::HmacFunction)
	};
	if !expected {
		return Err(Error::format(
			alg_node.path(),
			format!("{algorithm} keys do not belong in {}", oid::display_name(&type_id)),
		));
	}

	let number = record.next("number")?;
	let number = KeyNumber::from_slice(number.path(), number.octet_string()?)?;
	let label = record.next("label")?.utf8_or_null()?;
	let resource = parse_resource(&record.next("parameters")?)?;

	let (curve, verify_key_number) = if asymmetric {
		let curve_node = record.next("curve")?;
		let curve = Curve::from_oid(&curve_node.oid()?, curve_node.path())?;
		if Curve::from_algorithm(algorithm)? != curve {
			return Err(Error::format(
				curve_node.path(),
				format!("{curve} does not suit {algorithm}"),
			));
		}

		let vkn = record.next("verify key number")?;
		let vkn = if vkn.is_null() {
			None
		} else {
			Some(KeyNumber::from_slice(vkn.path(), vkn.octet_string()?)?)
		};

		(Some(curve), vkn)
	} else {
		(None, None)
	};

	let (compat, payload) =
		parse_encrypted_content(&record.next("encrypted content")?, algorithm.key_size())?;

	Ok((
		KeyInfo {
			algorithm,
			number,
			label,
			resource,
			curve,
			verify_key_number,
			// filled in by the caller
			iteration_count: 0,
			compat,
		},
		payload,
	))
}

#[tracing::instrument(level = "debug", skip(bytes), fields(len = bytes.len()))]
fn parse(bytes: &[u8]) -> Result<Parsed, Error> {
	if bytes.is_empty() {
		return Err(Error::null_argument("container"));
	}

	let der = armor::decode(bytes, Content::Container)?;
	let tree = Tree::from_der(&der)?;
	let mut top = tree.cursor("container");
	top.expect_count(1)?;

	let mut root = top.next("root")?.sequence()?;
	root.expect_count(3)?;

	let id = root.next("identifier")?;
	let id_value = id.oid()?;
	if id_value != oid::CONTAINER {
		return Err(Error::format(
			id.path(),
			format!("{} does not identify a key container", oid::display_name(&id_value)),
		));
	}

	let (salt, iteration_count) = parse_metadata(&root.next("metadata")?)?;

	let mut content = root.next("content")?.sequence()?;
	content.expect_count(2)?;
	let content_type = content.next("type")?;
	let mut record = content.next("record")?.sequence()?;
	let (mut info, payload) = parse_record(&content_type, &mut record)?;
	info.iteration_count = iteration_count;

	tracing::debug!(number = %info.number, algorithm = %info.algorithm, "Parsed container");
	Ok(Parsed {
		info,
		salt,
		payload,
	})
}

/// Derive the content keys and recover the key value of a checked container.
#[tracing::instrument(level = "debug", skip_all, fields(number = %parsed.info.number))]
fn materialize(parsed: Parsed, options: &Options) -> Result<Key, Error> {
	let Parsed {
		info,
		salt,
		payload,
	} = parsed;

	let keys = {
		let password = password::read_password(options)?;
		kdf::derive(password.as_bytes(), &salt, info.iteration_count)?
	};
	let secret: MaskedSecret = wrap::unwrap(
		&payload,
		info.algorithm.key_size(),
		&keys,
		Compat::from(options.openssl_compatible),
	)?;

	match info.engine() {
		Engine::BlockCipher | Engine::HmacFunction => Ok(Key::Symmetric(SymmetricKey::from_parts(
			info.algorithm,
			info.number,
			info.label,
			info.resource,
			secret,
		))),
		Engine::SignFunction => {
			let curve = info
				.curve
				.ok_or_else(|| Error::format("container/root/content/record/curve", "missing"))?;
			Ok(Key::Sign(SignKey::from_parts(
				curve,
				info.number,
				info.label,
				info.resource,
				secret,
				info.verify_key_number,
			)?))
		}
		e => Err(Error::unsupported_engine(e)),
	}
}

/// Read a container's metadata without asking for a password or touching the key value.
pub fn inspect_container(bytes: &[u8]) -> Result<KeyInfo, Error> {
	parse(bytes).map(|p| p.info)
}

/// Import the key in a container, using the process-wide options.
///
/// The process-wide OpenSSL-compatibility flag is switched to the one recorded in the container
/// for the duration of the import.
pub fn import_container(bytes: &[u8]) -> Result<Key, Error> {
	let parsed = parse(bytes)?;

	let _guard =
		config::override_openssl_compatibility(parsed.info.compat == Compat::OpensslCompatible);
	materialize(parsed, &Options::current())
}

/// Import the key in a container, creating whatever kind of key the container holds.
pub fn import_container_with(bytes: &[u8], options: &Options) -> Result<Key, Error> {
	let parsed = parse(bytes)?;
	let options = options
		.clone()
		.with_openssl_compatible(parsed.info.compat == Compat::OpensslCompatible);

	materialize(parsed, &options)
}

/// Import the key in a container, which must be a key for `expected`.
pub fn import_container_as(bytes: &[u8], expected: Engine, options: &Options) -> Result<Key, Error> {
	let parsed = parse(bytes)?;
	let found = parsed.info.engine();
	if found != expected {
		tracing::debug!(%expected, %found, "Container holds the wrong kind of key");
		return Err(Error::engine_mismatch(expected, found));
	}

	let options = options
		.clone()
		.with_openssl_compatible(parsed.info.compat == Compat::OpensslCompatible);
	materialize(parsed, &options)
}

/// The canonical file name for a container: the key number in hex, and an extension.
///
/// `capacity` is the room the caller has for the name, which must be enough for the hex number
/// and five more octets.
pub fn container_file_name(
	number: &KeyNumber,
	format: Format,
	capacity: usize,
) -> Result<String, Error> {
	let required = 2 * NUMBER_LEN + 5;
	if capacity < required {
		return Err(Error::buffer_too_small(required, capacity));
	}

	Ok(format!("{number}.{}", format.container_extension()))
}

/// Write `key` to a container file.
///
/// If `target` is a directory the file goes inside it under its canonical name; otherwise
/// `target` is the file name.  The path written is returned.
#[tracing::instrument(level = "debug", skip(key, options), fields(target = %target.display()))]
pub fn export_container_to_file(
	key: &mut Key,
	target: &Path,
	format: Format,
	options: &Options,
) -> Result<PathBuf, Error> {
	let path = if target.is_dir() {
		target.join(container_file_name(key.number(), format, FILE_NAME_CAPACITY)?)
	} else {
		target.to_path_buf()
	};

	let tree = build_container(key, options).map_err(|e| e.for_file(&path))?;
	armor::write_file(&path, &tree, format, Content::Container)?;

	tracing::debug!(path = %path.display(), "Wrote container");
	Ok(path)
}

#[tracing::instrument(level = "debug", skip(options), fields(path = %path.display()))]
pub fn import_container_from_file(path: &Path, options: &Options) -> Result<Key, Error> {
	let bytes = armor::read_file(path, Content::Container)?;
	import_container_with(&bytes, options).map_err(|e| e.for_file(path))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{name::Name, test_support::init};
	use secrecy::ExposeSecret as _;
	use std::sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	};

	fn with_password(pw: &'static str) -> Options {
		Options::default()
			.with_iteration_count(1000)
			.unwrap()
			.with_password_reader(move |buf| {
				buf[..pw.len()].copy_from_slice(pw.as_bytes());
				Ok(pw.len())
			})
	}

	/// Options whose password callback counts how often it is asked.
	fn counting(pw: &'static str) -> (Options, Arc<AtomicUsize>) {
		let calls = Arc::new(AtomicUsize::new(0));
		let c = calls.clone();
		let options = Options::default().with_password_reader(move |buf| {
			c.fetch_add(1, Ordering::SeqCst);
			buf[..pw.len()].copy_from_slice(pw.as_bytes());
			Ok(pw.len())
		});
		(options, calls)
	}

	fn aes_key() -> Key {
		let value: Vec<u8> = (0x20u8..0x40).collect();
		SymmetricKey::new(Algorithm::Aes256, &value).unwrap().into()
	}

	/// Rebuild `der` with identifier `id`, followed by the original root elements listed in
	/// `keep` (0 is the metadata, 1 the content).
	fn rebuild(der: &[u8], id: &const_oid::ObjectIdentifier, keep: &[usize]) -> Vec<u8> {
		let tree = Tree::from_der(der).unwrap();
		let mut top = tree.cursor("t");
		let mut root = top.next("root").unwrap().sequence().unwrap();
		root.next("id").unwrap();
		let parts = [root.next("metadata").unwrap(), root.next("content").unwrap()];

		let mut out = Tree::new();
		let seq = out.add_sequence(Level::Top).unwrap();
		out.add_oid(seq, id).unwrap();
		for k in keep {
			parts[*k].copy_into(&mut out, seq).unwrap();
		}
		out.to_der().unwrap()
	}

	#[test]
	fn known_aes_key_round_trip() {
		init();

		let mut key = aes_key();
		let der = export_container_with(&mut key, Format::Der, &with_password("test")).unwrap();

		let back = import_container_with(&der, &with_password("test")).unwrap();
		let back = back.into_symmetric().unwrap();
		let expected: Vec<u8> = (0x20u8..0x40).collect();
		assert_eq!(&expected[..], back.expose_secret().expose_secret());
		assert_eq!(key.number(), back.number());
		assert!(back.is_scheduled());

		assert!(matches!(
			import_container_with(&der, &with_password("wrong")),
			Err(Error::Integrity(_))
		));
	}

	#[test]
	fn structure_only_varies_in_salt_and_iv() {
		init();

		let mut key = aes_key();
		let a = export_container_with(&mut key, Format::Der, &with_password("test")).unwrap();
		let b = export_container_with(&mut key, Format::Der, &with_password("test")).unwrap();

		assert_eq!(a.len(), b.len());
		let differing = a.iter().zip(&b).filter(|(x, y)| x != y).count();
		// salt, IV and everything encrypted under them
		assert!(differing <= SALT_LEN + wrap::payload_len(32));

		let info = inspect_container(&a).unwrap();
		assert_eq!(1000, info.iteration_count);
		assert_eq!(Compat::Standard, info.compat);
	}

	#[test]
	fn every_key_kind_round_trips() {
		init();

		let options = with_password("correct horse");
		let mut sign = SignKey::generate(Curve::P384).unwrap().with_label("signer");
		let signer = Name::new().with("cn", "signer").unwrap();
		sign.verify_key(signer).unwrap();

		let keys: Vec<Key> = vec![
			SymmetricKey::generate(Algorithm::HmacSha256).unwrap().into(),
			SymmetricKey::generate(Algorithm::HmacSha512)
				.unwrap()
				.with_label("mac key")
				.into(),
			sign.into(),
			SignKey::generate(Curve::P256).unwrap().into(),
		];

		for mut key in keys {
			let pem = export_container_with(&mut key, Format::Pem, &options).unwrap();
			assert!(pem.starts_with(b"-----BEGIN KEYVAULT SECRET KEY-----"));

			let back = import_container_with(&pem, &options).unwrap();
			assert_eq!(key, back);
		}
	}

	#[test]
	fn tampering_is_detected() {
		init();

		let mut key = aes_key();
		let der = export_container_with(&mut key, Format::Der, &with_password("test")).unwrap();
		let payload_start = der.len() - wrap::payload_len(32);

		for i in (payload_start..der.len()).step_by(3) {
			let mut tampered = der.clone();
			tampered[i] ^= 0x80;
			assert!(
				matches!(
					import_container_with(&tampered, &with_password("test")),
					Err(Error::Integrity(_))
				),
				"tampering with octet {i} went unnoticed"
			);
		}
	}

	#[test]
	fn structure_is_checked_before_the_password() {
		init();

		let mut key = aes_key();
		let der = export_container_with(&mut key, Format::Der, &with_password("test")).unwrap();
		let (options, calls) = counting("test");

		let wrong_id = rebuild(&der, &oid::AES256, &[0, 1]);
		let result = import_container_with(&wrong_id, &options);
		assert!(matches!(result, Err(Error::Format { ref field, .. }) if field == "container/root/identifier"));

		let short = rebuild(&der, &oid::CONTAINER, &[0]);
		assert!(matches!(
			import_container_with(&short, &options),
			Err(Error::Format { .. })
		));

		let swapped = rebuild(&der, &oid::CONTAINER, &[1, 0]);
		assert!(import_container_with(&swapped, &options).is_err());

		assert!(matches!(
			import_container_with(&der[..der.len() - 1], &options),
			Err(Error::Format { .. })
		));
		assert!(matches!(
			import_container_with(&[], &options),
			Err(Error::NullArgument(_))
		));

		assert_eq!(0, calls.load(Ordering::SeqCst));

		let rebuilt = rebuild(&der, &oid::CONTAINER, &[0, 1]);
		assert_eq!(der, rebuilt);
		import_container_with(&rebuilt, &options).unwrap();
		assert_eq!(1, calls.load(Ordering::SeqCst));
	}

	#[test]
	fn iteration_counts_are_bounded_on_import() {
		init();

		let mut key = aes_key();
		let der = export_container_with(&mut key, Format::Der, &with_password("test")).unwrap();
		let tree = Tree::from_der(&der).unwrap();
		let mut top = tree.cursor("t");
		let mut root = top.next("root").unwrap().sequence().unwrap();
		root.next("id").unwrap();
		root.next("metadata").unwrap();
		let content = root.next("content").unwrap();

		for count in [0, 65536, u32::MAX] {
			let mut out = Tree::new();
			let seq = out.add_sequence(Level::Top).unwrap();
			out.add_oid(seq, &oid::CONTAINER).unwrap();
			encode_metadata(&mut out, seq, &[0u8; SALT_LEN], count).unwrap();
			content.copy_into(&mut out, seq).unwrap();

			let result = inspect_container(&out.to_der().unwrap());
			assert!(
				matches!(result, Err(Error::Format { ref field, .. }) if field.ends_with("iteration count")),
				"count {count} was accepted"
			);
		}
	}

	#[test]
	fn fill_mode_checks_the_engine() {
		init();

		let mut key = aes_key();
		let der = export_container_with(&mut key, Format::Der, &with_password("test")).unwrap();
		let (options, calls) = counting("test");

		let result = import_container_as(&der, Engine::SignFunction, &options);
		assert!(matches!(
			result,
			Err(Error::EngineMismatch {
				expected: Engine::SignFunction,
				found: Engine::BlockCipher
			})
		));
		assert_eq!(0, calls.load(Ordering::SeqCst));

		let back = import_container_as(&der, Engine::BlockCipher, &options).unwrap();
		assert_eq!(key, back);
	}

	#[test]
	fn inspection_needs_no_password() {
		init();

		let mut key: Key = SymmetricKey::generate(Algorithm::HmacSha512)
			.unwrap()
			.with_label("inspect me")
			.into();
		let der = export_container_with(&mut key, Format::Der, &with_password("test")).unwrap();

		let info = inspect_container(&der).unwrap();
		assert_eq!(Algorithm::HmacSha512, info.algorithm);
		assert_eq!(key.number(), &info.number);
		assert_eq!(Some("inspect me"), info.label.as_deref());
		assert_eq!(key.resource(), &info.resource);
		assert_eq!(None, info.curve);
	}

	#[test]
	fn compatibility_flag_travels_with_the_container() {
		init();
		let _lock = crate::test_support::lock_globals();

		let mut key = aes_key();
		let options = with_password("test").with_openssl_compatible(true);
		let der = export_container_with(&mut key, Format::Der, &options).unwrap();
		assert_eq!(
			Compat::OpensslCompatible,
			inspect_container(&der).unwrap().compat
		);

		// The reader's own flag does not matter; the container's does
		let back = import_container_with(&der, &with_password("test")).unwrap();
		assert_eq!(key, back);

		config::set_password_reader(|buf| {
			buf[..4].copy_from_slice(b"test");
			Ok(4)
		});
		let before = Options::current().openssl_compatible;
		let back = import_container(&der).unwrap();
		assert_eq!(key, back);
		assert_eq!(before, Options::current().openssl_compatible);

		config::set_password_reader(|buf| {
			buf[..5].copy_from_slice(b"wrong");
			Ok(5)
		});
		assert!(matches!(import_container(&der), Err(Error::Integrity(_))));
		assert_eq!(before, Options::current().openssl_compatible);
		config::clear_password_reader();
	}

	#[test]
	fn file_names_need_room() {
		let number = KeyNumber::from([0xabu8; 32]);

		assert!(matches!(
			container_file_name(&number, Format::Der, 68),
			Err(Error::BufferTooSmall {
				required: 69,
				available: 68
			})
		));

		let name = container_file_name(&number, Format::Pem, 69).unwrap();
		assert_eq!(format!("{}.pem", "ab".repeat(32)), name);
	}

	#[test]
	fn files_round_trip() {
		init();

		let dir = tempfile::tempdir().unwrap();
		let options = with_password("test");

		let mut key = aes_key();
		let path = export_container_to_file(&mut key, dir.path(), Format::Der, &options).unwrap();
		assert_eq!(
			format!("{}.key", key.number()),
			path.file_name().unwrap().to_string_lossy()
		);
		assert_eq!(key, import_container_from_file(&path, &options).unwrap());

		let named = dir.path().join("explicit.pem");
		let path = export_container_to_file(&mut key, &named, Format::Pem, &options).unwrap();
		assert_eq!(named, path);
		assert_eq!(key, import_container_from_file(&path, &options).unwrap());

		let junk = dir.path().join("junk.key");
		std::fs::write(&junk, b"\x30\x03\x02\x01\x05").unwrap();
		let err = import_container_from_file(&junk, &options).unwrap_err();
		assert!(matches!(err, Error::InFile { .. }));
		assert!(matches!(err.root_cause(), Error::Format { .. }));
		assert!(err.to_string().contains("junk.key"));
	}
}
