//! Password-protected key containers, certificate requests and certificates, all in ASN.1 DER.
//!
//! A *key container* holds exactly one secret key: an AES-256 block cipher key, an HMAC key, or an
//! ECDSA sign key on P-256 or P-384.  The key value is wrapped under keys derived from a password
//! with PBKDF2, encrypted with AES-256 in counter mode and authenticated with AES-CMAC, so that the
//! container can be written to disk (as DER, or PEM if you prefer text) and read back later by
//! anyone who knows the password.
//!
//! ```rust,no_run
//! use keyvault_asn1::{Algorithm, Format, Key, SymmetricKey, export_container, import_container};
//!
//! # fn main() -> Result<(), keyvault_asn1::Error> {
//! let mut key = Key::from(SymmetricKey::generate(Algorithm::Aes256)?.with_label("backups"));
//! let bytes = export_container(&mut key, Format::Pem)?;
//!
//! // ... some time later ...
//! let key = import_container(&bytes)?;
//! assert_eq!(Some("backups"), key.label());
//! # Ok(())
//! # }
//! ```
//!
//! While a key is held in memory its value is kept *masked*: XORed with a random mask that is
//! replaced every time the value is used, and checked against a digest of the original value, so
//! a stray copy of the key's memory is of little use on its own.  See [`MaskedSecret`].
//!
//! # Requests and Certificates
//!
//! A [`SignKey`] can produce a [`VerifyKey`] bearing a distinguished [`Name`].  That verify key
//! can be sent off in a self-signed certificate request ([`export_request`]) and, once someone
//! holding an issuing key has checked the request ([`import_request`]), certified
//! ([`issue_certificate`]).  Importing a certificate ([`import_certificate`]) always verifies its
//! signature, either against the issuer's verify key or, for a self-signed certificate, against
//! the key in the certificate itself.
//!
//! # Configuration
//!
//! Iteration counts, the OpenSSL compatibility flag and how passwords are read are all carried
//! in an [`Options`].  The functions without an `Options` argument use the process-wide defaults,
//! which can be changed with the setters in [`config`].
mod armor;
pub mod asn1;
mod certificate;
pub mod config;
mod container;
mod error;
mod kdf;
mod key;
mod masked;
mod name;
mod number;
pub mod oid;
mod password;
mod request;
mod signature;
mod symmetric;
mod wrap;

#[cfg(test)]
mod test_support;

pub use armor::{Content, Format};
pub use certificate::{
	Certificate, Extension, SERIAL_LEN, export_certificate, export_certificate_to_file,
	import_certificate, import_certificate_from_file, issue_certificate, serial_number,
};
pub use config::{CompatibilityGuard, Options, PasswordReader};
pub use container::{
	FILE_NAME_CAPACITY, KeyInfo, build_container, container_file_name, export_container,
	export_container_to_file, export_container_with, import_container, import_container_as,
	import_container_from_file, import_container_with, inspect_container,
};
pub use error::Error;
pub use key::{Algorithm, DEFAULT_VALIDITY_DAYS, Engine, Key, Resource, ResourceKind, Validity};
pub use masked::MaskedSecret;
pub use name::Name;
pub use number::{KeyNumber, NUMBER_LEN};
pub use password::MAX_PASSWORD_LEN;
pub use request::{
	build_request, export_request, export_request_to_file, import_request,
	import_request_from_file, request_file_name,
};
pub use signature::{Curve, MAX_SIGNATURE_LEN, SignKey, VerifyKey};
pub use symmetric::SymmetricKey;
pub use wrap::Compat;
