//! Distinguished names, as used for the subject and issuer of requests and certificates.

use const_oid::ObjectIdentifier;

use super::{
	Error,
	asn1::{Level, NodeRef, Tag, Tree},
	oid::{self, Mode},
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Name {
	attributes: Vec<(ObjectIdentifier, String)>,
}

impl Name {
	pub fn new() -> Self {
		Self::default()
	}

	/// Append an attribute, given by its short name (`cn`, `o`, `email`, ...).
	pub fn with(mut self, attribute: &str, value: impl Into<String>) -> Result<Self, Error> {
		let entry = oid::find_by_name(attribute)
			.filter(|e| e.mode == Mode::Attribute)
			.ok_or_else(|| Error::invalid_option(format!("unknown name attribute {attribute}")))?;

		self.attributes.push((entry.id, value.into()));
		Ok(self)
	}

	pub fn common_name(&self) -> Option<&str> {
		self.get(&oid::COMMON_NAME)
	}

	pub fn get(&self, attribute: &ObjectIdentifier) -> Option<&str> {
		self.attributes
			.iter()
			.find(|(id, _)| id == attribute)
			.map(|(_, v)| v.as_str())
	}

	pub fn is_empty(&self) -> bool {
		self.attributes.is_empty()
	}

	pub(crate) fn encode(&self, tree: &mut Tree, level: Level) -> Result<(), Error> {
		let seq = tree.add_sequence(level)?;

		for (id, value) in &self.attributes {
			let set = tree.add_constructed(seq, Tag::Set)?;
			let pair = tree.add_sequence(set)?;
			tree.add_oid(pair, id)?;
			tree.add_utf8_string(pair, Some(value))?;
		}

		Ok(())
	}

	pub(crate) fn decode(node: &NodeRef<'_>) -> Result<Self, Error> {
		let mut rdns = node.sequence()?;
		let mut attributes = Vec::with_capacity(rdns.count());

		while rdns.has_more() {
			let mut set = rdns.next("rdn")?.children(Tag::Set)?;
			while set.has_more() {
				let mut pair = set.next("attribute")?.sequence()?;
				pair.expect_count(2)?;

				let id = pair.next("type")?.oid()?;
				let (_, value) = pair.next("value")?.directory_string()?;
				attributes.push((id, value));
			}
		}

		Ok(Self { attributes })
	}
}

impl std::fmt::Display for Name {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		for (i, (id, value)) in self.attributes.iter().enumerate() {
			if i > 0 {
				f.write_str(", ")?;
			}
			let label = oid::find_by_id(id)
				.map(|e| e.name.to_uppercase())
				.unwrap_or_else(|| id.to_string());
			f.write_fmt(format_args!("{label}={value}"))?;
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample() -> Name {
		Name::new()
			.with("cn", "Example Root")
			.unwrap()
			.with("o", "Example Org")
			.unwrap()
			.with("c", "AU")
			.unwrap()
	}

	#[test]
	fn survives_der() {
		let name = sample();
		let mut tree = Tree::new();
		name.encode(&mut tree, Level::Top).unwrap();

		let decoded = Tree::from_der(&tree.to_der().unwrap()).unwrap();
		let mut c = decoded.cursor("name");
		let back = Name::decode(&c.next("subject").unwrap()).unwrap();

		assert_eq!(name, back);
		assert_eq!(Some("Example Root"), back.common_name());
		assert_eq!("CN=Example Root, O=Example Org, C=AU", back.to_string());
	}

	#[test]
	fn printable_strings_are_accepted() {
		// SEQ { SET { SEQ { OID 2.5.4.6, PrintableString "NZ" } } }
		let der = [
			0x30, 0x0d, 0x31, 0x0b, 0x30, 0x09, 0x06, 0x03, 0x55, 0x04, 0x06, 0x13, 0x02, b'N',
			b'Z',
		];
		let tree = Tree::from_der(&der).unwrap();
		let mut c = tree.cursor("name");
		let name = Name::decode(&c.next("subject").unwrap()).unwrap();

		assert_eq!(Some("NZ"), name.get(&oid::COUNTRY));
	}

	#[test]
	fn unknown_attributes_are_refused() {
		assert!(Name::new().with("favourite-colour", "blue").is_err());
		assert!(Name::new().with("aes256", "nope").is_err());
	}
}
