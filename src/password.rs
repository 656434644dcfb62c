use zeroize::Zeroizing;

use super::{Error, config::Options};

pub const MAX_PASSWORD_LEN: usize = 256;

/// A password read for a single derivation, wiped when dropped.
pub(crate) struct Password {
	buf: Zeroizing<[u8; MAX_PASSWORD_LEN]>,
	len: usize,
}

impl Password {
	pub(crate) fn as_bytes(&self) -> &[u8] {
		&self.buf[..self.len]
	}
}

/// Get a password, from the registered callback if there is one and from the terminal if not.
#[tracing::instrument(level = "debug", skip(options))]
pub(crate) fn read_password(options: &Options) -> Result<Password, Error> {
	let mut buf = Zeroizing::new([0u8; MAX_PASSWORD_LEN]);

	let len = match &options.password_reader {
		Some(reader) => {
			tracing::trace!("Reading password from callback");
			let len = reader(&mut buf[..])?;
			if len > MAX_PASSWORD_LEN {
				return Err(Error::password(format!(
					"callback reported {len} octets in a {MAX_PASSWORD_LEN} octet buffer"
				)));
			}
			len
		}
		None => {
			tracing::trace!("Reading password from terminal");
			let typed = Zeroizing::new(
				rpassword::prompt_password("password: ").map_err(|e| Error::password(e.to_string()))?,
			);
			let bytes = typed.as_bytes();
			if bytes.len() > MAX_PASSWORD_LEN {
				return Err(Error::password(format!(
					"passwords are limited to {MAX_PASSWORD_LEN} octets"
				)));
			}
			buf[..bytes.len()].copy_from_slice(bytes);
			bytes.len()
		}
	};

	if len == 0 {
		return Err(Error::null_argument("password"));
	}

	Ok(Password { buf, len })
}
