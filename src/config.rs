//! Options that steer key derivation, wrapping and password acquisition.
//!
//! Every operation that needs options has a `*_with` form taking an explicit [`Options`].  The
//! plain forms snapshot the process-wide defaults with [`Options::current`], which can be changed
//! with the setters in this module.

use parking_lot::RwLock;
use std::{
	fmt::Debug,
	path::{Path, PathBuf},
	sync::{Arc, LazyLock},
};

use super::Error;

pub const DEFAULT_ITERATION_COUNT: u32 = 2000;
pub const MIN_ITERATION_COUNT: u32 = 1000;
pub const MAX_ITERATION_COUNT: u32 = 65535;
pub const DEFAULT_CA_PATH: &str = "/usr/share/ca-certificates/keyvault";

/// Fills the supplied buffer with a password, returning the number of octets written.
pub type PasswordReader = Arc<dyn Fn(&mut [u8]) -> Result<usize, Error> + Send + Sync>;

#[derive(Clone)]
pub struct Options {
	pub pbkdf2_iteration_count: u32,
	pub openssl_compatible: bool,
	pub ca_path: PathBuf,
	pub password_reader: Option<PasswordReader>,
}

impl Default for Options {
	fn default() -> Self {
		Self {
			pbkdf2_iteration_count: DEFAULT_ITERATION_COUNT,
			openssl_compatible: false,
			ca_path: PathBuf::from(DEFAULT_CA_PATH),
			password_reader: None,
		}
	}
}

impl Debug for Options {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Options")
			.field("pbkdf2_iteration_count", &self.pbkdf2_iteration_count)
			.field("openssl_compatible", &self.openssl_compatible)
			.field("ca_path", &self.ca_path)
			.field(
				"password_reader",
				&self.password_reader.as_ref().map(|_| "<callback>"),
			)
			.finish()
	}
}

static GLOBAL: LazyLock<RwLock<Options>> = LazyLock::new(|| RwLock::new(Options::default()));

fn check_iteration_count(count: u32) -> Result<u32, Error> {
	if (MIN_ITERATION_COUNT..=MAX_ITERATION_COUNT).contains(&count) {
		Ok(count)
	} else {
		Err(Error::invalid_option(format!(
			"iteration count {count} is outside {MIN_ITERATION_COUNT}..={MAX_ITERATION_COUNT}"
		)))
	}
}

impl Options {
	/// A snapshot of the process-wide options.
	pub fn current() -> Self {
		GLOBAL.read().clone()
	}

	pub fn with_iteration_count(mut self, count: u32) -> Result<Self, Error> {
		self.pbkdf2_iteration_count = check_iteration_count(count)?;
		Ok(self)
	}

	pub fn with_openssl_compatible(mut self, flag: bool) -> Self {
		self.openssl_compatible = flag;
		self
	}

	pub fn with_ca_path(mut self, path: impl AsRef<Path>) -> Self {
		self.ca_path = path.as_ref().to_path_buf();
		self
	}

	/// Use `reader` instead of the terminal whenever a password is needed.
	pub fn with_password_reader(
		mut self,
		reader: impl Fn(&mut [u8]) -> Result<usize, Error> + Send + Sync + 'static,
	) -> Self {
		self.password_reader = Some(Arc::new(reader));
		self
	}
}

#[tracing::instrument(level = "debug")]
pub fn set_pbkdf2_iteration_count(count: u32) -> Result<(), Error> {
	GLOBAL.write().pbkdf2_iteration_count = check_iteration_count(count)?;
	Ok(())
}

#[tracing::instrument(level = "debug")]
pub fn set_openssl_compatibility(flag: bool) {
	GLOBAL.write().openssl_compatible = flag;
}

#[tracing::instrument(level = "debug", skip(path), fields(path = %path.as_ref().display()))]
pub fn set_ca_path(path: impl AsRef<Path>) {
	GLOBAL.write().ca_path = path.as_ref().to_path_buf();
}

/// Register the process-wide password callback.  The last registration wins.
#[tracing::instrument(level = "debug", skip(reader))]
pub fn set_password_reader(
	reader: impl Fn(&mut [u8]) -> Result<usize, Error> + Send + Sync + 'static,
) {
	GLOBAL.write().password_reader = Some(Arc::new(reader));
}

/// Go back to prompting on the terminal for passwords.
#[tracing::instrument(level = "debug")]
pub fn clear_password_reader() {
	GLOBAL.write().password_reader = None;
}

/// Restores the process-wide OpenSSL-compatibility flag when dropped.
#[derive(Debug)]
#[must_use = "the previous flag is restored as soon as the guard is dropped"]
pub struct CompatibilityGuard {
	previous: bool,
}

impl Drop for CompatibilityGuard {
	fn drop(&mut self) {
		tracing::trace!(previous = self.previous, "Restoring OpenSSL compatibility flag");
		GLOBAL.write().openssl_compatible = self.previous;
	}
}

/// Set the process-wide OpenSSL-compatibility flag until the returned guard goes away.
#[tracing::instrument(level = "trace")]
pub fn override_openssl_compatibility(flag: bool) -> CompatibilityGuard {
	let mut global = GLOBAL.write();
	let previous = global.openssl_compatible;
	global.openssl_compatible = flag;

	CompatibilityGuard { previous }
}
