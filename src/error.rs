use super::key::Engine;

#[derive(Debug, thiserror::Error, thiserror_ext::Construct)]
#[non_exhaustive]
pub enum Error {
	#[error("missing or empty {0}")]
	NullArgument(String),

	#[error("malformed {field}: {reason}")]
	Format { field: String, reason: String },

	#[error("unsupported identifier {oid} in {field}")]
	UnsupportedIdentifier { field: String, oid: String },

	#[error("integrity check failed on {0}")]
	Integrity(String),

	#[error("digital signature is not valid")]
	SignatureInvalid,

	#[error("issuer name does not match the name of the supplied issuer key")]
	NameMismatch,

	#[error("public key is not a point on curve {0}")]
	CurvePoint(String),

	#[error("expected a {expected} key, but the container holds a {found} key")]
	EngineMismatch { expected: Engine, found: Engine },

	#[error("buffer of {available} octets is too small ({required} required)")]
	BufferTooSmall { required: usize, available: usize },

	#[error("key {0} has no uses left")]
	ResourceExhausted(String),

	#[error("failed to create key: {0}")]
	KeyCreation(String),

	#[error("keys of engine {0} cannot be stored in a container")]
	UnsupportedEngine(Engine),

	#[error("keys do not form a pair: {0}")]
	KeyMismatch(String),

	#[error("signature of {0} octets does not fit the signature buffer")]
	AlgorithmTooLarge(usize),

	#[error("no issuer key available for certificate issued by {0}")]
	UnknownIssuer(String),

	#[error("failed to read password: {0}")]
	Password(String),

	#[error("invalid option: {0}")]
	InvalidOption(String),

	#[error("i/o failure on {path}: {cause}")]
	Io { path: String, cause: std::io::Error },

	#[error("{path}: {source}")]
	InFile { path: String, source: Box<Error> },
}

impl Error {
	/// Attach the name of the file being processed to an error.
	pub(crate) fn for_file(self, path: &std::path::Path) -> Self {
		Error::InFile {
			path: path.display().to_string(),
			source: Box::new(self),
		}
	}

	/// The innermost error, looking through any filename context.
	pub fn root_cause(&self) -> &Error {
		match self {
			Error::InFile { source, .. } => source.root_cause(),
			e => e,
		}
	}
}
