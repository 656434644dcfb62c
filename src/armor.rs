//! Binary (DER) and text (PEM) forms of everything this crate writes out.

use der::pem::{self, LineEnding};
use std::path::Path;

use super::{Error, asn1::Tree};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Format {
	#[default]
	Der,
	Pem,
}

impl Format {
	/// File name extension for a key container in this format.
	pub fn container_extension(&self) -> &'static str {
		match self {
			Format::Der => "key",
			Format::Pem => "pem",
		}
	}
}

/// What a file holds, which decides the PEM label.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Content {
	Container,
	Request,
	Certificate,
}

impl Content {
	pub fn label(&self) -> &'static str {
		match self {
			Content::Container => "KEYVAULT SECRET KEY",
			Content::Request => "CERTIFICATE REQUEST",
			Content::Certificate => "CERTIFICATE",
		}
	}
}

pub fn encode(der: &[u8], format: Format, content: Content) -> Result<Vec<u8>, Error> {
	match format {
		Format::Der => Ok(der.to_vec()),
		Format::Pem => pem::encode_string(content.label(), LineEnding::LF, der)
			.map(String::into_bytes)
			.map_err(|e| Error::format("pem", e.to_string())),
	}
}

/// Get DER back out of either form; anything starting with a PEM header is treated as text.
///
/// A PEM document must carry the label that goes with `content`.
#[tracing::instrument(level = "trace", skip(bytes), fields(len = bytes.len()))]
pub fn decode(bytes: &[u8], content: Content) -> Result<Vec<u8>, Error> {
	let text = bytes.trim_ascii();
	if !text.starts_with(b"-----BEGIN ") {
		return Ok(bytes.to_vec());
	}

	let (label, der) = pem::decode_vec(text).map_err(|e| Error::format("pem", e.to_string()))?;
	if label != content.label() {
		return Err(Error::format(
			"pem",
			format!("expected {}, found {label}", content.label()),
		));
	}

	Ok(der)
}

#[tracing::instrument(level = "debug", skip(tree), fields(path = %path.display()))]
pub fn write_file(path: &Path, tree: &Tree, format: Format, content: Content) -> Result<(), Error> {
	let bytes = encode(&tree.to_der()?, format, content).map_err(|e| e.for_file(path))?;
	std::fs::write(path, bytes).map_err(|e| Error::io(path.display().to_string(), e))
}

#[tracing::instrument(level = "debug", fields(path = %path.display()))]
pub fn read_file(path: &Path, content: Content) -> Result<Vec<u8>, Error> {
	let bytes = std::fs::read(path).map_err(|e| Error::io(path.display().to_string(), e))?;
	decode(&bytes, content).map_err(|e| e.for_file(path))
}
