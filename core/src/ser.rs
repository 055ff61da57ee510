// Copyright 2021 The Equipool Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Serialization and deserialization layer specialized for binary encoding.
//! The coin family this pool serves is Bitcoin-derived, so integers are
//! little-endian and length prefixes use the compact-size varint.
//!
//! To use it simply implement `Writeable` or `Readable` and then use the
//! `serialize` or `deserialize` functions on them as appropriate.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use failure::Fail;
use std::io;
use std::io::{Read, Write};

/// Possible errors deriving from serializing or deserializing.
#[derive(Debug, Fail)]
pub enum Error {
	/// Wraps an io error produced when reading or writing
	#[fail(display = "IO error: {}", _0)]
	IOErr(io::Error),
	/// Expected a given value that wasn't found
	#[fail(display = "unexpected data, expected {:?} got {:?}", expected, received)]
	UnexpectedData {
		/// what we wanted
		expected: Vec<u8>,
		/// what we got
		received: Vec<u8>,
	},
	/// Data wasn't in a consumable format
	#[fail(display = "corrupted data")]
	CorruptedData,
	/// When asked to read too much data
	#[fail(display = "too large read: {}", _0)]
	TooLargeReadErr(String),
}

impl From<io::Error> for Error {
	fn from(e: io::Error) -> Error {
		Error::IOErr(e)
	}
}

/// Implementations defined how different numbers and binary structures are
/// written to an underlying stream or container (depending on implementation).
pub trait Writer {
	/// Writes a u8 as bytes
	fn write_u8(&mut self, n: u8) -> Result<(), Error>;
	/// Writes a u16 as little-endian bytes
	fn write_u16(&mut self, n: u16) -> Result<(), Error>;
	/// Writes a u32 as little-endian bytes
	fn write_u32(&mut self, n: u32) -> Result<(), Error>;
	/// Writes a u64 as little-endian bytes
	fn write_u64(&mut self, n: u64) -> Result<(), Error>;
	/// Writes an i32 as little-endian bytes
	fn write_i32(&mut self, n: i32) -> Result<(), Error>;
	/// Writes a i64 as little-endian bytes
	fn write_i64(&mut self, n: i64) -> Result<(), Error>;
	/// Writes a compact-size varint.
	fn write_varint(&mut self, n: u64) -> Result<(), Error>;
	/// Writes a variable length byte sequence, compact-size length first.
	fn write_vec(&mut self, vec: &[u8]) -> Result<(), Error>;
	/// Writes a fixed number of bytes. The reader is expected to know the
	/// actual length on read.
	fn write_fixed_bytes(&mut self, bytes: &[u8]) -> Result<(), Error>;
}

/// Implementations defined how different numbers and binary structures are
/// read from an underlying stream or container (depending on implementation).
pub trait Reader {
	/// Read a u8 from the underlying Read
	fn read_u8(&mut self) -> Result<u8, Error>;
	/// Read a little-endian u16
	fn read_u16(&mut self) -> Result<u16, Error>;
	/// Read a little-endian u32
	fn read_u32(&mut self) -> Result<u32, Error>;
	/// Read a little-endian u64
	fn read_u64(&mut self) -> Result<u64, Error>;
	/// Read a little-endian i32
	fn read_i32(&mut self) -> Result<i32, Error>;
	/// Read a little-endian i64
	fn read_i64(&mut self) -> Result<i64, Error>;
	/// Read a compact-size varint
	fn read_varint(&mut self) -> Result<u64, Error>;
	/// Read a compact-size length prefix then that many bytes
	fn read_vec(&mut self) -> Result<Vec<u8>, Error>;
	/// Read a fixed number of bytes from the underlying reader.
	fn read_fixed_bytes(&mut self, length: usize) -> Result<Vec<u8>, Error>;
	/// Consumes a byte from the reader, producing an error if it doesn't have
	/// the expected value
	fn expect_u8(&mut self, val: u8) -> Result<u8, Error>;
}

/// Trait that every type that can be serialized as binary must implement.
/// Writes directly to a Writer, a utility type thinly wrapping an
/// underlying Write implementation.
pub trait Writeable {
	/// Write the data held by this Writeable to the provided writer
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), Error>;
}

/// Trait that every type that can be deserialized from binary must implement.
/// Reads directly to a Reader, a utility type thinly wrapping an
/// underlying Read implementation.
pub trait Readable
where
	Self: Sized,
{
	/// Reads the data necessary to this Readable from the provided reader
	fn read<R: Reader>(reader: &mut R) -> Result<Self, Error>;
}

/// Deserializes a Readable from any std::io::Read implementation.
pub fn deserialize<T: Readable, R: Read>(source: &mut R) -> Result<T, Error> {
	let mut reader = BinReader { source };
	T::read(&mut reader)
}

/// Serializes a Writeable into any std::io::Write implementation.
pub fn serialize<T: Writeable, W: Write>(sink: &mut W, thing: &T) -> Result<(), Error> {
	let mut writer = BinWriter { sink };
	thing.write(&mut writer)
}

/// Utility function to serialize a writeable directly in memory using a
/// Vec<u8>.
pub fn ser_vec<T: Writeable>(thing: &T) -> Result<Vec<u8>, Error> {
	let mut vec = Vec::new();
	serialize(&mut vec, thing)?;
	Ok(vec)
}

/// Utility wrapper for an underlying byte Reader. Defines higher level
/// methods to read numbers, byte vectors, hashes, etc.
pub struct BinReader<'a, R: Read> {
	source: &'a mut R,
}

impl<'a, R: Read> BinReader<'a, R> {
	/// Constructor for a new BinReader for the provided source
	pub fn new(source: &'a mut R) -> BinReader<'a, R> {
		BinReader { source }
	}
}

impl<'a, R: Read> Reader for BinReader<'a, R> {
	fn read_u8(&mut self) -> Result<u8, Error> {
		self.source.read_u8().map_err(Error::IOErr)
	}
	fn read_u16(&mut self) -> Result<u16, Error> {
		self.source.read_u16::<LittleEndian>().map_err(Error::IOErr)
	}
	fn read_u32(&mut self) -> Result<u32, Error> {
		self.source.read_u32::<LittleEndian>().map_err(Error::IOErr)
	}
	fn read_u64(&mut self) -> Result<u64, Error> {
		self.source.read_u64::<LittleEndian>().map_err(Error::IOErr)
	}
	fn read_i32(&mut self) -> Result<i32, Error> {
		self.source.read_i32::<LittleEndian>().map_err(Error::IOErr)
	}
	fn read_i64(&mut self) -> Result<i64, Error> {
		self.source.read_i64::<LittleEndian>().map_err(Error::IOErr)
	}
	fn read_varint(&mut self) -> Result<u64, Error> {
		let tag = self.read_u8()?;
		match tag {
			0xfd => Ok(self.read_u16()? as u64),
			0xfe => Ok(self.read_u32()? as u64),
			0xff => self.read_u64(),
			n => Ok(n as u64),
		}
	}
	fn read_vec(&mut self) -> Result<Vec<u8>, Error> {
		let len = self.read_varint()?;
		self.read_fixed_bytes(len as usize)
	}
	fn read_fixed_bytes(&mut self, length: usize) -> Result<Vec<u8>, Error> {
		// not reading more than 100k in a single read
		if length > 100_000 {
			return Err(Error::TooLargeReadErr(format!(
				"fixed bytes length too large: {}",
				length
			)));
		}
		let mut buf = vec![0; length];
		self.source
			.read_exact(&mut buf)
			.map(move |_| buf)
			.map_err(Error::IOErr)
	}
	fn expect_u8(&mut self, val: u8) -> Result<u8, Error> {
		let b = self.read_u8()?;
		if b == val {
			Ok(b)
		} else {
			Err(Error::UnexpectedData {
				expected: vec![val],
				received: vec![b],
			})
		}
	}
}

/// Utility wrapper for an underlying byte Writer. Defines higher level
/// methods to write numbers, byte vectors, hashes, etc.
pub struct BinWriter<'a, W: Write> {
	sink: &'a mut W,
}

impl<'a, W: Write> BinWriter<'a, W> {
	/// Wraps a standard Write in a new BinWriter
	pub fn new(sink: &'a mut W) -> BinWriter<'a, W> {
		BinWriter { sink }
	}
}

impl<'a, W: Write> Writer for BinWriter<'a, W> {
	fn write_u8(&mut self, n: u8) -> Result<(), Error> {
		self.sink.write_u8(n).map_err(Error::IOErr)
	}
	fn write_u16(&mut self, n: u16) -> Result<(), Error> {
		self.sink.write_u16::<LittleEndian>(n).map_err(Error::IOErr)
	}
	fn write_u32(&mut self, n: u32) -> Result<(), Error> {
		self.sink.write_u32::<LittleEndian>(n).map_err(Error::IOErr)
	}
	fn write_u64(&mut self, n: u64) -> Result<(), Error> {
		self.sink.write_u64::<LittleEndian>(n).map_err(Error::IOErr)
	}
	fn write_i32(&mut self, n: i32) -> Result<(), Error> {
		self.sink.write_i32::<LittleEndian>(n).map_err(Error::IOErr)
	}
	fn write_i64(&mut self, n: i64) -> Result<(), Error> {
		self.sink.write_i64::<LittleEndian>(n).map_err(Error::IOErr)
	}
	fn write_varint(&mut self, n: u64) -> Result<(), Error> {
		match n {
			0..=0xfc => self.write_u8(n as u8),
			0xfd..=0xffff => {
				self.write_u8(0xfd)?;
				self.write_u16(n as u16)
			}
			0x1_0000..=0xffff_ffff => {
				self.write_u8(0xfe)?;
				self.write_u32(n as u32)
			}
			_ => {
				self.write_u8(0xff)?;
				self.write_u64(n)
			}
		}
	}
	fn write_vec(&mut self, vec: &[u8]) -> Result<(), Error> {
		self.write_varint(vec.len() as u64)?;
		self.sink.write_all(vec).map_err(Error::IOErr)
	}
	fn write_fixed_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
		self.sink.write_all(bytes).map_err(Error::IOErr)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn varint_bytes(n: u64) -> Vec<u8> {
		let mut vec = Vec::new();
		{
			let mut w = BinWriter::new(&mut vec);
			w.write_varint(n).unwrap();
		}
		vec
	}

	#[test]
	fn varint_encoding_tiers() {
		assert_eq!(varint_bytes(0), vec![0x00]);
		assert_eq!(varint_bytes(0x7f), vec![0x7f]);
		assert_eq!(varint_bytes(0xfc), vec![0xfc]);
		assert_eq!(varint_bytes(0xfd), vec![0xfd, 0xfd, 0x00]);
		assert_eq!(varint_bytes(0x0540), vec![0xfd, 0x40, 0x05]);
		assert_eq!(varint_bytes(0x1_0000), vec![0xfe, 0x00, 0x00, 0x01, 0x00]);
	}

	#[test]
	fn varint_roundtrip() {
		for n in &[0u64, 1, 0xfc, 0xfd, 0xffff, 0x1_0000, u64::max_value()] {
			let bytes = varint_bytes(*n);
			let mut cursor = std::io::Cursor::new(bytes);
			let mut r = BinReader::new(&mut cursor);
			assert_eq!(r.read_varint().unwrap(), *n);
		}
	}

	#[test]
	fn little_endian_integers() {
		let mut vec = Vec::new();
		{
			let mut w = BinWriter::new(&mut vec);
			w.write_u32(0x01020304).unwrap();
		}
		assert_eq!(vec, vec![0x04, 0x03, 0x02, 0x01]);
	}
}
