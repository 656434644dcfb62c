//! Self-signed requests asking for a verify key to be certified.
//!
//! ```text
//! Request ::= SEQUENCE {
//!     tbs SEQUENCE {
//!         version     INTEGER (0),
//!         subject     Name,
//!         publicKey   SubjectPublicKeyInfo,
//!         attributes  [0] { }
//!     },
//!     algorithm SEQUENCE { OBJECT IDENTIFIER },
//!     signature BIT STRING
//! }
//! ```

use rand::{CryptoRng, RngCore};
use std::path::{Path, PathBuf};

use super::{
	Error,
	armor::{self, Content, Format},
	asn1::{self, Level, Tag, TagNumber, Tree},
	key::Algorithm,
	name::Name,
	signature::{CandidateKey, MAX_SIGNATURE_LEN, SignKey, VerifyKey},
};

/// Append `SEQUENCE { algorithm }` for a signature algorithm.
pub(crate) fn encode_algorithm(tree: &mut Tree, level: Level, algorithm: Algorithm) -> Result<(), Error> {
	let seq = tree.add_sequence(level)?;
	tree.add_oid(seq, &algorithm.oid())?;
	Ok(())
}

/// Check that `sk` is the key that `vk` was derived from, as recorded by [`SignKey::verify_key`].
pub(crate) fn check_pair(vk: &VerifyKey, sk: &SignKey) -> Result<(), Error> {
	if sk.curve() != vk.curve() {
		return Err(Error::key_mismatch(format!(
			"sign key is on {}, verify key on {}",
			sk.curve(),
			vk.curve()
		)));
	}
	match sk.verify_key_number() {
		Some(n) if n == vk.number() => Ok(()),
		Some(_) => Err(Error::key_mismatch(format!(
			"sign key {} is paired with another verify key",
			sk.number()
		))),
		None => Err(Error::key_mismatch(format!(
			"sign key {} has no verify key",
			sk.number()
		))),
	}
}

/// Sign the elements of `tbs` with `sk`, giving `{ SEQUENCE { tbs }, algorithm, signature }`.
pub(crate) fn sign_tree(
	tbs: Tree,
	sk: &SignKey,
	rng: &mut (impl RngCore + CryptoRng),
) -> Result<Tree, Error> {
	if sk.curve().tag_size() > MAX_SIGNATURE_LEN {
		return Err(Error::algorithm_too_large(sk.curve().tag_size()));
	}

	let mut tree = Tree::new();
	let root = tree.add_sequence(Level::Top)?;
	let tbs = tree.add_subtree(root, Tag::Sequence, tbs)?;
	let signature = sk.sign(&tree.encode_level(tbs)?, rng)?;

	encode_algorithm(&mut tree, root, sk.algorithm())?;
	tree.add_bit_string(root, &signature)?;

	Ok(tree)
}

/// Build the DER tree of a request for `vk`, signed by its sign key.
#[tracing::instrument(level = "debug", skip(vk, sk, rng), fields(number = %vk.number()))]
pub fn build_request(
	vk: &VerifyKey,
	sk: &SignKey,
	rng: &mut (impl RngCore + CryptoRng),
) -> Result<Tree, Error> {
	check_pair(vk, sk)?;

	let mut tbs = Tree::new();
	tbs.add_uint32(Level::Top, 0)?;
	vk.name().encode(&mut tbs, Level::Top)?;
	vk.encode_public_key_info(&mut tbs, Level::Top)?;
	tbs.add_constructed(Level::Top, asn1::context(TagNumber::N0))?;

	sign_tree(tbs, sk, rng)
}

pub fn export_request(
	vk: &VerifyKey,
	sk: &SignKey,
	format: Format,
	rng: &mut (impl RngCore + CryptoRng),
) -> Result<Vec<u8>, Error> {
	let tree = build_request(vk, sk, rng)?;
	armor::encode(&tree.to_der()?, format, Content::Request)
}

/// Read a request, returning the verify key in it once its signature has checked out.
#[tracing::instrument(level = "debug", skip(bytes), fields(len = bytes.len()))]
pub fn import_request(bytes: &[u8]) -> Result<VerifyKey, Error> {
	if bytes.is_empty() {
		return Err(Error::null_argument("request"));
	}

	let der = armor::decode(bytes, Content::Request)?;
	let tree = Tree::from_der(&der)?;
	let mut top = tree.cursor("request");
	top.expect_count(1)?;

	let mut root = top.next("root")?.sequence()?;
	root.expect_count(3)?;
	let tbs_node = root.next("tbs")?;
	let mut tbs = tbs_node.sequence()?;
	if !(3..=4).contains(&tbs.count()) {
		return Err(Error::format(
			tbs.path(),
			format!("expected 3 or 4 elements, found {}", tbs.count()),
		));
	}

	let version = tbs.next("version")?;
	if version.uint32()? != 0 {
		return Err(Error::format(version.path(), "unsupported request version"));
	}
	let subject = Name::decode(&tbs.next("subject")?)?;
	let candidate = CandidateKey::decode_public_key_info(&tbs.next("public key")?, subject)?;

	let mut alg = root.next("algorithm")?.sequence()?;
	let alg_node = alg.first("id")?;
	let algorithm = Algorithm::from_oid(&alg_node.oid()?, alg_node.path())?;
	if algorithm != candidate.algorithm() {
		return Err(Error::format(
			alg_node.path(),
			format!("{algorithm} cannot be checked with a {} key", candidate.curve()),
		));
	}
	let signature = root.next("signature")?.bit_string()?;

	let vk = candidate.verify(&tbs_node.encode()?, signature)?;

	tracing::debug!(number = %vk.number(), subject = %vk.name(), "Accepted request");
	Ok(vk)
}

/// The canonical file name of a request: the verify key number in hex, then `.csr`.
pub fn request_file_name(vk: &VerifyKey) -> String {
	format!("{}.csr", vk.number())
}

/// Write a request for `vk` into `dir` under its canonical name, returning the path written.
#[tracing::instrument(level = "debug", skip(vk, sk, rng), fields(dir = %dir.display()))]
pub fn export_request_to_file(
	vk: &VerifyKey,
	sk: &SignKey,
	dir: &Path,
	format: Format,
	rng: &mut (impl RngCore + CryptoRng),
) -> Result<PathBuf, Error> {
	let path = dir.join(request_file_name(vk));
	let tree = build_request(vk, sk, rng).map_err(|e| e.for_file(&path))?;
	armor::write_file(&path, &tree, format, Content::Request)?;

	Ok(path)
}

pub fn import_request_from_file(path: &Path) -> Result<VerifyKey, Error> {
	let bytes = armor::read_file(path, Content::Request)?;
	import_request(&bytes).map_err(|e| e.for_file(path))
}
