//! An owned tag/length/value tree over the `der` codec.
//!
//! Nodes live in an arena inside [`Tree`] and refer to their children by index, so walking a
//! decoded structure never involves pointer juggling.  Reading is done through a [`Cursor`],
//! which steps over the children of one constructed node and turns every surprise (missing
//! element, wrong tag, bad content) into an [`Error::Format`] naming the field that was being
//! read.  Headers and primitive values are encoded and decoded by `der`, which enforces the
//! DER rules (definite, minimal lengths; canonical integers, booleans and times).

use chrono::{DateTime, Datelike as _, Utc};
use const_oid::ObjectIdentifier;
use der::{
	Decode as _, DecodeValue, Encode as _, EncodeValue, FixedTag, Header, Reader as _,
	SliceReader,
	asn1::{
		BitStringRef, GeneralizedTime, Ia5StringRef, Null, OctetStringRef, PrintableStringRef,
		UintRef, UtcTime, Utf8StringRef,
	},
};
use std::time::Duration;

pub use der::{Tag, TagNumber};

use super::Error;

const MAX_DEPTH: usize = 32;

/// A constructed, context-specific tag such as `[0]`.
pub const fn context(number: TagNumber) -> Tag {
	Tag::ContextSpecific {
		constructed: true,
		number,
	}
}

/// Turn a `der` failure into a format error on `field`.
pub(crate) fn malformed(field: &str) -> impl FnOnce(der::Error) -> Error + '_ {
	move |e| Error::format(field, e.to_string())
}

pub type NodeId = usize;

/// Where a new element is attached: at the top of the tree, or inside a constructed node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
	Top,
	Under(NodeId),
}

#[derive(Clone, Debug)]
enum Body {
	Primitive(Vec<u8>),
	Constructed(Vec<NodeId>),
}

#[derive(Clone, Debug)]
struct Node {
	tag: Tag,
	body: Body,
}

#[derive(Clone, Debug, Default)]
pub struct Tree {
	nodes: Vec<Node>,
	top: Vec<NodeId>,
}

impl Tree {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn is_empty(&self) -> bool {
		self.top.is_empty()
	}

	fn push(&mut self, level: Level, node: Node) -> Result<NodeId, Error> {
		let id = self.nodes.len();

		match level {
			Level::Top => self.top.push(id),
			Level::Under(parent) => match self.nodes.get_mut(parent).map(|n| &mut n.body) {
				Some(Body::Constructed(children)) => children.push(id),
				_ => {
					return Err(Error::format(
						"tree",
						format!("node {parent} cannot hold children"),
					));
				}
			},
		}
		self.nodes.push(node);

		Ok(id)
	}

	fn add_primitive(&mut self, level: Level, tag: Tag, value: Vec<u8>) -> Result<NodeId, Error> {
		self.push(
			level,
			Node {
				tag,
				body: Body::Primitive(value),
			},
		)
	}

	/// Add any primitive value that `der` knows how to encode.
	pub fn add_value<T>(&mut self, level: Level, value: &T) -> Result<NodeId, Error>
	where
		T: EncodeValue + FixedTag + ?Sized,
	{
		let mut content = Vec::new();
		value
			.encode_value(&mut content)
			.map_err(malformed("tree"))?;

		self.add_primitive(level, T::TAG, content)
	}

	pub fn add_constructed(&mut self, level: Level, tag: Tag) -> Result<Level, Error> {
		self.push(
			level,
			Node {
				tag,
				body: Body::Constructed(Vec::new()),
			},
		)
		.map(Level::Under)
	}

	pub fn add_sequence(&mut self, level: Level) -> Result<Level, Error> {
		self.add_constructed(level, Tag::Sequence)
	}

	/// Move every top-level element of `subtree` inside a new constructed node tagged `tag`.
	pub fn add_subtree(&mut self, level: Level, tag: Tag, subtree: Tree) -> Result<Level, Error> {
		let new_level = self.add_constructed(level, tag)?;
		let offset = self.nodes.len();

		let Tree { nodes, top } = subtree;
		for mut node in nodes {
			if let Body::Constructed(children) = &mut node.body {
				children.iter_mut().for_each(|c| *c += offset);
			}
			self.nodes.push(node);
		}
		if let Level::Under(parent) = new_level {
			if let Body::Constructed(children) = &mut self.nodes[parent].body {
				children.extend(top.into_iter().map(|t| t + offset));
			}
		}

		Ok(new_level)
	}

	/// Decode `der` and attach its elements at `level`.
	pub fn add_encoded(&mut self, level: Level, der: &[u8]) -> Result<(), Error> {
		self.decode_level(der, level, 0)
	}

	pub fn add_oid(&mut self, level: Level, oid: &ObjectIdentifier) -> Result<NodeId, Error> {
		self.add_value(level, oid)
	}

	pub fn add_octet_string(&mut self, level: Level, value: &[u8]) -> Result<NodeId, Error> {
		let value = OctetStringRef::new(value).map_err(malformed("octet string"))?;
		self.add_value(level, &value)
	}

	pub fn add_uint32(&mut self, level: Level, value: u32) -> Result<NodeId, Error> {
		self.add_value(level, &value)
	}

	/// Add a non-negative INTEGER given as big-endian magnitude octets.
	pub fn add_unsigned(&mut self, level: Level, magnitude: &[u8]) -> Result<NodeId, Error> {
		let value = UintRef::new(magnitude).map_err(malformed("integer"))?;
		self.add_value(level, &value)
	}

	/// Add a UTF8String, or NULL when there is no string to add.
	pub fn add_utf8_string(&mut self, level: Level, value: Option<&str>) -> Result<NodeId, Error> {
		match value {
			Some(s) => {
				let s = Utf8StringRef::new(s).map_err(malformed("string"))?;
				self.add_value(level, &s)
			}
			None => self.add_null(level),
		}
	}

	pub fn add_null(&mut self, level: Level) -> Result<NodeId, Error> {
		self.add_value(level, &Null)
	}

	pub fn add_bit_string(&mut self, level: Level, value: &[u8]) -> Result<NodeId, Error> {
		let value = BitStringRef::from_bytes(value).map_err(malformed("bit string"))?;
		self.add_value(level, &value)
	}

	/// Add a time, as UTCTime before 2050 and GeneralizedTime from then on.
	pub fn add_time(&mut self, level: Level, time: &DateTime<Utc>) -> Result<NodeId, Error> {
		let since_epoch = u64::try_from(time.timestamp())
			.map(Duration::from_secs)
			.map_err(|_| Error::format("time", format!("{time} is before 1970")))?;

		if time.year() < 2050 {
			let t = UtcTime::from_unix_duration(since_epoch).map_err(malformed("time"))?;
			self.add_value(level, &t)
		} else {
			let t = GeneralizedTime::from_unix_duration(since_epoch).map_err(malformed("time"))?;
			self.add_value(level, &t)
		}
	}

	fn encode_into(&self, id: NodeId, out: &mut Vec<u8>) -> Result<(), Error> {
		let node = &self.nodes[id];

		let content = match &node.body {
			Body::Primitive(value) => value.clone(),
			Body::Constructed(children) => {
				let mut content = Vec::new();
				for child in children {
					self.encode_into(*child, &mut content)?;
				}
				content
			}
		};

		Header::new(node.tag, content.len())
			.and_then(|h| h.encode_to_vec(out))
			.map_err(malformed("tree"))?;
		out.extend_from_slice(&content);

		Ok(())
	}

	/// DER encoding of every top-level element, one after another.
	pub fn to_der(&self) -> Result<Vec<u8>, Error> {
		let mut out = Vec::new();
		for id in &self.top {
			self.encode_into(*id, &mut out)?;
		}
		Ok(out)
	}

	/// DER encoding of the element at `level`, or of the whole tree for [`Level::Top`].
	pub fn encode_level(&self, level: Level) -> Result<Vec<u8>, Error> {
		match level {
			Level::Top => self.to_der(),
			Level::Under(id) if id < self.nodes.len() => {
				let mut out = Vec::new();
				self.encode_into(id, &mut out)?;
				Ok(out)
			}
			Level::Under(id) => Err(Error::format("tree", format!("no node {id}"))),
		}
	}

	#[tracing::instrument(level = "trace", skip(bytes), fields(len = bytes.len()))]
	pub fn from_der(bytes: &[u8]) -> Result<Self, Error> {
		let mut tree = Tree::new();
		tree.decode_level(bytes, Level::Top, 0)?;

		if tree.is_empty() {
			return Err(Error::format("tree", "no elements"));
		}

		Ok(tree)
	}

	fn decode_level(&mut self, bytes: &[u8], level: Level, depth: usize) -> Result<(), Error> {
		if depth > MAX_DEPTH {
			return Err(Error::format("tree", "nesting too deep"));
		}

		let mut reader = SliceReader::new(bytes).map_err(malformed("tree"))?;
		while !reader.is_finished() {
			let header = Header::decode(&mut reader).map_err(malformed("tree"))?;
			let content = reader
				.read_slice(header.length)
				.map_err(malformed("tree"))?;

			if header.tag.is_constructed() {
				let inner = self.add_constructed(level, header.tag)?;
				self.decode_level(content, inner, depth + 1)?;
			} else {
				self.add_primitive(level, header.tag, content.to_vec())?;
			}
		}

		Ok(())
	}

	/// A cursor over the top-level elements of the tree.
	pub fn cursor(&self, path: &str) -> Cursor<'_> {
		Cursor {
			tree: self,
			items: &self.top,
			pos: 0,
			path: path.to_string(),
		}
	}
}

/// Steps through the children of one constructed node (or the top level of a tree).
#[derive(Clone, Debug)]
pub struct Cursor<'a> {
	tree: &'a Tree,
	items: &'a [NodeId],
	pos: usize,
	path: String,
}

impl<'a> Cursor<'a> {
	pub fn count(&self) -> usize {
		self.items.len()
	}

	pub fn path(&self) -> &str {
		&self.path
	}

	/// Fail unless this level holds exactly `n` elements.
	pub fn expect_count(&self, n: usize) -> Result<(), Error> {
		if self.items.len() != n {
			return Err(Error::format(
				&self.path,
				format!("expected {n} elements, found {}", self.items.len()),
			));
		}
		Ok(())
	}

	fn node_at(&self, pos: usize, field: &str) -> Result<NodeRef<'a>, Error> {
		let path = format!("{}/{field}", self.path);
		match self.items.get(pos) {
			Some(id) => Ok(NodeRef {
				tree: self.tree,
				id: *id,
				path,
			}),
			None => Err(Error::format(path, "element is missing")),
		}
	}

	/// The element after the one most recently returned (the first one, on a fresh cursor).
	pub fn next(&mut self, field: &str) -> Result<NodeRef<'a>, Error> {
		let node = self.node_at(self.pos, field)?;
		self.pos += 1;
		Ok(node)
	}

	pub fn first(&mut self, field: &str) -> Result<NodeRef<'a>, Error> {
		self.pos = 0;
		self.next(field)
	}

	pub fn last(&mut self, field: &str) -> Result<NodeRef<'a>, Error> {
		self.pos = self.items.len().saturating_sub(1);
		self.next(field)
	}

	/// The element that the next call to [`Cursor::next`] would return, without consuming it.
	pub fn peek(&self, field: &str) -> Option<NodeRef<'a>> {
		self.node_at(self.pos, field).ok()
	}

	pub fn has_more(&self) -> bool {
		self.pos < self.items.len()
	}
}

/// A single node in a [`Tree`], along with the field path that led to it.
#[derive(Clone, Debug)]
pub struct NodeRef<'a> {
	tree: &'a Tree,
	id: NodeId,
	path: String,
}

impl<'a> NodeRef<'a> {
	pub fn tag(&self) -> Tag {
		self.tree.nodes[self.id].tag
	}

	pub fn path(&self) -> &str {
		&self.path
	}

	fn error(&self, reason: impl Into<String>) -> Error {
		tracing::debug!(path = %self.path, tag = %self.tag(), "Rejecting element");
		Error::format(&self.path, reason)
	}

	fn primitive(&self, tag: Tag) -> Result<&'a [u8], Error> {
		let node = &self.tree.nodes[self.id];
		match &node.body {
			Body::Primitive(value) if node.tag == tag => Ok(value),
			_ => Err(self.error(format!("expected {tag}, found {}", node.tag))),
		}
	}

	/// Decode this node as a primitive value of type `T`.
	pub fn value<T>(&self) -> Result<T, Error>
	where
		T: DecodeValue<'a> + FixedTag,
	{
		let content = self.primitive(T::TAG)?;

		Header::new(T::TAG, content.len())
			.and_then(|header| {
				let mut reader = SliceReader::new(content)?;
				let value = T::decode_value(&mut reader, header)?;
				reader.finish(value)
			})
			.map_err(|e| self.error(e.to_string()))
	}

	/// Children of this node, which must be constructed and carry `tag`.
	pub fn children(&self, tag: Tag) -> Result<Cursor<'a>, Error> {
		let node = &self.tree.nodes[self.id];
		match &node.body {
			Body::Constructed(children) if node.tag == tag => Ok(Cursor {
				tree: self.tree,
				items: children,
				pos: 0,
				path: self.path.clone(),
			}),
			_ => Err(self.error(format!("expected {tag}, found {}", node.tag))),
		}
	}

	pub fn sequence(&self) -> Result<Cursor<'a>, Error> {
		self.children(Tag::Sequence)
	}

	pub fn is_null(&self) -> bool {
		self.tag() == Tag::Null
	}

	pub fn oid(&self) -> Result<ObjectIdentifier, Error> {
		self.value()
	}

	pub fn boolean(&self) -> Result<bool, Error> {
		self.value()
	}

	pub fn octet_string(&self) -> Result<&'a [u8], Error> {
		self.value::<OctetStringRef<'a>>().map(|s| s.as_bytes())
	}

	/// A non-negative INTEGER, returned as minimal big-endian magnitude octets.
	pub fn unsigned(&self) -> Result<&'a [u8], Error> {
		self.value::<UintRef<'a>>().map(|n| n.as_bytes())
	}

	pub fn uint32(&self) -> Result<u32, Error> {
		self.value()
	}

	/// Value of a BIT STRING; only whole-octet strings are accepted.
	pub fn bit_string(&self) -> Result<&'a [u8], Error> {
		self.value::<BitStringRef<'a>>()?
			.as_bytes()
			.ok_or_else(|| self.error("bit string with unused bits"))
	}

	/// A UTF8String, or `None` for NULL.
	pub fn utf8_or_null(&self) -> Result<Option<String>, Error> {
		if self.is_null() {
			return Ok(None);
		}
		self.value::<Utf8StringRef<'a>>()
			.map(|s| Some(s.as_str().to_string()))
	}

	/// Any of the string types that may appear in a distinguished name.
	pub fn directory_string(&self) -> Result<(Tag, String), Error> {
		let tag = self.tag();
		let s = match tag {
			Tag::Utf8String => self.value::<Utf8StringRef<'a>>()?.as_str(),
			Tag::PrintableString => self.value::<PrintableStringRef<'a>>()?.as_str(),
			Tag::Ia5String => self.value::<Ia5StringRef<'a>>()?.as_str(),
			_ => return Err(self.error(format!("expected a string, found {tag}"))),
		};
		Ok((tag, s.to_string()))
	}

	pub fn time(&self) -> Result<DateTime<Utc>, Error> {
		let since_epoch = match self.tag() {
			Tag::UtcTime => self.value::<UtcTime>()?.to_unix_duration(),
			_ => self.value::<GeneralizedTime>()?.to_unix_duration(),
		};

		i64::try_from(since_epoch.as_secs())
			.ok()
			.and_then(|secs| DateTime::from_timestamp(secs, 0))
			.ok_or_else(|| self.error("time out of range"))
	}

	/// DER encoding of this node alone.
	pub fn encode(&self) -> Result<Vec<u8>, Error> {
		self.tree.encode_level(Level::Under(self.id))
	}

	/// Copy this node, and everything under it, into another tree.
	pub fn copy_into(&self, target: &mut Tree, level: Level) -> Result<(), Error> {
		let node = &self.tree.nodes[self.id];
		match &node.body {
			Body::Primitive(value) => {
				target.add_primitive(level, node.tag, value.clone())?;
			}
			Body::Constructed(children) => {
				let inner = target.add_constructed(level, node.tag)?;
				for child in children {
					let child = NodeRef {
						tree: self.tree,
						id: *child,
						path: self.path.clone(),
					};
					child.copy_into(target, inner)?;
				}
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone as _;

	#[test]
	fn encodes_known_structure() {
		let mut tree = Tree::new();
		let seq = tree.add_sequence(Level::Top).unwrap();
		tree.add_uint32(seq, 0).unwrap();
		tree.add_uint32(seq, 128).unwrap();
		tree.add_octet_string(seq, b"ab").unwrap();
		tree.add_utf8_string(seq, None).unwrap();

		assert_eq!(
			vec![
				0x30, 0x0d, 0x02, 0x01, 0x00, 0x02, 0x02, 0x00, 0x80, 0x04, 0x02, b'a', b'b', 0x05,
				0x00
			],
			tree.to_der().unwrap()
		);
	}

	#[test]
	fn long_lengths_survive_decoding() {
		let mut tree = Tree::new();
		let seq = tree.add_sequence(Level::Top).unwrap();
		tree.add_octet_string(seq, &[7u8; 300]).unwrap();
		tree.add_oid(seq, &crate::oid::AES256).unwrap();

		// 4 + 300 for the octet string, 2 + 9 for the identifier
		let der = tree.to_der().unwrap();
		assert_eq!(&der[0..4], &[0x30, 0x82, 0x01, 0x3b]);

		let decoded = Tree::from_der(&der).unwrap();
		let mut top = decoded.cursor("test");
		top.expect_count(1).unwrap();
		let mut seq = top.next("seq").unwrap().sequence().unwrap();
		assert_eq!(&[7u8; 300][..], seq.next("data").unwrap().octet_string().unwrap());
		assert_eq!(crate::oid::AES256, seq.next("oid").unwrap().oid().unwrap());
		assert!(!seq.has_more());
	}

	#[test]
	fn subtrees_are_grafted() {
		let mut inner = Tree::new();
		let s = inner.add_sequence(Level::Top).unwrap();
		inner.add_uint32(s, 5).unwrap();
		inner.add_null(Level::Top).unwrap();

		let mut outer = Tree::new();
		let seq = outer.add_sequence(Level::Top).unwrap();
		outer.add_uint32(seq, 1).unwrap();
		outer
			.add_subtree(seq, context(TagNumber::N0), inner)
			.unwrap();

		let decoded = Tree::from_der(&outer.to_der().unwrap()).unwrap();
		let mut c = decoded.cursor("x");
		let mut seq = c.next("seq").unwrap().sequence().unwrap();
		assert_eq!(1, seq.next("one").unwrap().uint32().unwrap());
		let mut ctx = seq
			.next("ctx")
			.unwrap()
			.children(context(TagNumber::N0))
			.unwrap();
		ctx.expect_count(2).unwrap();
		let mut s = ctx.next("s").unwrap().sequence().unwrap();
		assert_eq!(5, s.next("five").unwrap().uint32().unwrap());
		assert!(ctx.next("null").unwrap().is_null());
	}

	#[test]
	fn encoded_elements_can_be_added() {
		let mut tree = Tree::new();
		let seq = tree.add_sequence(Level::Top).unwrap();
		tree.add_encoded(seq, &[0x02, 0x01, 0x07, 0x05, 0x00]).unwrap();

		assert_eq!(
			vec![0x30, 0x05, 0x02, 0x01, 0x07, 0x05, 0x00],
			tree.to_der().unwrap()
		);
		assert!(tree.add_encoded(seq, &[0x02, 0x05, 0x01]).is_err());
	}

	#[test]
	fn integers_are_strict() {
		let decode = |bytes: &[u8]| {
			let tree = Tree::from_der(bytes).unwrap();
			let mut c = tree.cursor("int");
			c.next("value").unwrap().uint32()
		};

		assert_eq!(65535, decode(&[0x02, 0x03, 0x00, 0xff, 0xff]).unwrap());
		assert!(decode(&[0x02, 0x01, 0xff]).is_err());
		assert!(decode(&[0x02, 0x02, 0x00, 0x01]).is_err());
		assert!(decode(&[0x02, 0x05, 0x01, 0x00, 0x00, 0x00, 0x00]).is_err());
		assert!(decode(&[0x02, 0x00]).is_err());
	}

	#[test]
	fn unsigned_magnitudes_are_minimal() {
		let mut tree = Tree::new();
		tree.add_unsigned(Level::Top, &[0x00, 0x00, 0x80, 0x01])
			.unwrap();
		assert_eq!(vec![0x02, 0x03, 0x00, 0x80, 0x01], tree.to_der().unwrap());

		let mut c = tree.cursor("n");
		assert_eq!(&[0x80, 0x01][..], c.next("value").unwrap().unsigned().unwrap());
	}

	#[test]
	fn malformed_input_is_rejected() {
		assert!(Tree::from_der(&[]).is_err());
		assert!(Tree::from_der(&[0x30, 0x05, 0x02, 0x01]).is_err());
		assert!(Tree::from_der(&[0x30, 0x80, 0x00, 0x00]).is_err());
		assert!(Tree::from_der(&[0x04, 0x81, 0x05, 1, 2, 3, 4, 5]).is_err());

		let nest = |depth: usize| {
			let mut nested = vec![0x05, 0x00];
			for _ in 0..depth {
				let mut outer = vec![0x30, nested.len() as u8];
				outer.extend_from_slice(&nested);
				nested = outer;
			}
			nested
		};
		assert!(Tree::from_der(&nest(20)).is_ok());
		assert!(Tree::from_der(&nest(40)).is_err());
	}

	#[test]
	fn booleans_and_bit_strings_are_strict() {
		let tree = Tree::from_der(&[0x01, 0x01, 0x01, 0x03, 0x02, 0x01, 0x80]).unwrap();
		let mut c = tree.cursor("x");
		assert!(c.next("flag").unwrap().boolean().is_err());
		assert!(c.next("bits").unwrap().bit_string().is_err());
	}

	#[test]
	fn errors_name_the_field() {
		let mut tree = Tree::new();
		let seq = tree.add_sequence(Level::Top).unwrap();
		tree.add_uint32(seq, 1).unwrap();

		let mut c = tree.cursor("container");
		let mut seq = c.next("root").unwrap().sequence().unwrap();
		let result = seq.next("salt").unwrap().octet_string();
		assert!(matches!(result, Err(Error::Format { ref field, .. }) if field == "container/root/salt"));

		let result = seq.next("count");
		assert!(matches!(result, Err(Error::Format { ref field, .. }) if field == "container/root/count"));
	}

	#[test]
	fn times_pick_the_right_encoding() {
		let near = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
		let far = Utc.with_ymd_and_hms(2077, 1, 2, 3, 4, 5).unwrap();

		let mut tree = Tree::new();
		let seq = tree.add_sequence(Level::Top).unwrap();
		tree.add_time(seq, &near).unwrap();
		tree.add_time(seq, &far).unwrap();

		let decoded = Tree::from_der(&tree.to_der().unwrap()).unwrap();
		let mut c = decoded.cursor("t");
		let mut seq = c.next("seq").unwrap().sequence().unwrap();
		let first = seq.next("near").unwrap();
		assert_eq!(Tag::UtcTime, first.tag());
		assert_eq!(near, first.time().unwrap());
		let second = seq.next("far").unwrap();
		assert_eq!(Tag::GeneralizedTime, second.tag());
		assert_eq!(far, second.time().unwrap());

		let early = Utc.with_ymd_and_hms(1960, 1, 1, 0, 0, 0).unwrap();
		let mut tree = Tree::new();
		assert!(tree.add_time(Level::Top, &early).is_err());
	}
}
