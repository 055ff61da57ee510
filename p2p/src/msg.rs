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

//! Message types that transit over the network and related serialization
//! code. The wire format is the Bitcoin-family one: a 24-byte header of
//! magic, NUL-padded command, payload length and a 4-byte double-SHA-256
//! checksum, then the payload.

use std::io::{Read, Write};

use crate::core::core::hash::{dsha256, Hash};
use crate::core::ser::{self, BinReader, BinWriter, Readable, Reader, Writeable, Writer};

use crate::types::Error;

/// Services flag advertised in our version message.
pub const NODE_NETWORK: u64 = 1;

/// Upper bound on payload sizes we are willing to read. The peer feed only
/// ever carries small messages; anything bigger is a framing error.
pub const MAX_PAYLOAD: u32 = 4 * 1024 * 1024;

/// Inventory item type for a transaction.
pub const INV_TX: u32 = 1;
/// Inventory item type for a block.
pub const INV_BLOCK: u32 = 2;

/// Header of any protocol message, used to identify incoming messages.
pub struct MsgHeader {
	/// Network magic.
	pub magic: [u8; 4],
	/// ASCII command, NUL padding stripped.
	pub command: String,
	/// Payload length.
	pub length: u32,
	/// First four bytes of dsha256(payload).
	pub checksum: [u8; 4],
}

fn checksum_of(payload: &[u8]) -> [u8; 4] {
	let mut sum = [0u8; 4];
	sum.copy_from_slice(&dsha256(payload).0[0..4]);
	sum
}

/// Serializes a command and payload into a full wire message.
pub fn encode_message(magic: [u8; 4], command: &str, payload: &[u8]) -> Vec<u8> {
	let mut command_bytes = [0u8; 12];
	let len = command.len().min(12);
	command_bytes[..len].copy_from_slice(&command.as_bytes()[..len]);

	let mut out = Vec::with_capacity(24 + payload.len());
	out.extend_from_slice(&magic);
	out.extend_from_slice(&command_bytes);
	out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
	out.extend_from_slice(&checksum_of(payload));
	out.extend_from_slice(payload);
	out
}

/// Writes a full message to the stream.
pub fn write_message<W: Write>(
	stream: &mut W,
	magic: [u8; 4],
	command: &str,
	payload: &[u8],
) -> Result<(), Error> {
	let message = encode_message(magic, command, payload);
	stream.write_all(&message)?;
	stream.flush()?;
	Ok(())
}

/// Reads the next message off the stream. Scans forward a byte at a time
/// until the magic lines up, so a desynchronized stream self-heals. A
/// checksum mismatch surfaces as an error; the caller logs it and simply
/// reads again.
pub fn read_message<R: Read>(stream: &mut R, magic: [u8; 4]) -> Result<(MsgHeader, Vec<u8>), Error> {
	// align on magic
	let mut window = [0u8; 4];
	stream.read_exact(&mut window)?;
	while window != magic {
		window.rotate_left(1);
		let mut next = [0u8; 1];
		stream.read_exact(&mut next)?;
		window[3] = next[0];
	}

	let mut rest = [0u8; 20];
	stream.read_exact(&mut rest)?;

	let command: String = rest[0..12]
		.iter()
		.take_while(|&&b| b != 0)
		.map(|&b| b as char)
		.collect();
	let length = u32::from_le_bytes([rest[12], rest[13], rest[14], rest[15]]);
	let mut checksum = [0u8; 4];
	checksum.copy_from_slice(&rest[16..20]);

	if length > MAX_PAYLOAD {
		return Err(Error::Oversized(length));
	}

	let mut payload = vec![0u8; length as usize];
	stream.read_exact(&mut payload)?;

	if checksum_of(&payload) != checksum {
		return Err(Error::BadChecksum(command));
	}

	Ok((
		MsgHeader {
			magic,
			command,
			length,
			checksum,
		},
		payload,
	))
}

/// A network address as embedded in version messages. We never advertise a
/// routable address, so this is always the zero address with our services
/// flag.
pub struct NetAddr {
	/// Services bitfield.
	pub services: u64,
}

impl Writeable for NetAddr {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u64(self.services)?;
		// 16 bytes of IPv6-mapped zero address, then a zero port.
		// Ports are big-endian on this wire but zero either way.
		writer.write_fixed_bytes(&[0u8; 18])
	}
}

/// First message of the handshake, advertises who we are and what we can
/// do (nothing much: we only listen for inventory).
pub struct Version {
	/// Protocol version to speak.
	pub version: u32,
	/// Our services flags.
	pub services: u64,
	/// Current unix time.
	pub timestamp: i64,
	/// Receiver address (zero).
	pub addr_recv: NetAddr,
	/// Sender address (zero).
	pub addr_from: NetAddr,
	/// Random nonce to detect self-connections.
	pub nonce: u64,
	/// Our user agent string.
	pub user_agent: String,
	/// Height we believe the chain is at.
	pub start_height: i32,
	/// Whether the peer should relay transactions to us.
	pub relay: bool,
}

impl Writeable for Version {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u32(self.version)?;
		writer.write_u64(self.services)?;
		writer.write_i64(self.timestamp)?;
		self.addr_recv.write(writer)?;
		self.addr_from.write(writer)?;
		writer.write_u64(self.nonce)?;
		writer.write_vec(self.user_agent.as_bytes())?;
		writer.write_i32(self.start_height)?;
		writer.write_u8(self.relay as u8)
	}
}

/// One entry of an `inv` message.
pub struct InvItem {
	/// Item type, `INV_TX` or `INV_BLOCK`.
	pub inv_type: u32,
	/// Announced hash, internal byte order.
	pub hash: Hash,
}

/// The `inv` message: the peer announcing objects it has.
pub struct Inv {
	/// Announced items.
	pub items: Vec<InvItem>,
}

impl Readable for Inv {
	fn read<R: Reader>(reader: &mut R) -> Result<Inv, ser::Error> {
		let count = reader.read_varint()?;
		if count > 50_000 {
			return Err(ser::Error::CorruptedData);
		}
		let mut items = Vec::with_capacity(count as usize);
		for _ in 0..count {
			let inv_type = reader.read_u32()?;
			let hash = Hash::from_vec(&reader.read_fixed_bytes(32)?);
			items.push(InvItem { inv_type, hash });
		}
		Ok(Inv { items })
	}
}

/// Parses an `inv` payload.
pub fn decode_inv(payload: &[u8]) -> Result<Inv, Error> {
	let mut cursor = std::io::Cursor::new(payload);
	let mut reader = BinReader::new(&mut cursor);
	Ok(Inv::read(&mut reader)?)
}

/// Serializes a version message payload.
pub fn encode_version(version: &Version) -> Result<Vec<u8>, Error> {
	let mut payload = Vec::new();
	{
		let mut writer = BinWriter::new(&mut payload);
		version.write(&mut writer)?;
	}
	Ok(payload)
}

#[cfg(test)]
mod test {
	use super::*;

	fn magic() -> [u8; 4] {
		[0xf9, 0xee, 0xe4, 0x8d]
	}

	#[test]
	fn message_roundtrip() {
		let message = encode_message(magic(), "ping", &[1, 2, 3, 4, 5, 6, 7, 8]);
		let mut cursor = std::io::Cursor::new(message);
		let (header, payload) = read_message(&mut cursor, magic()).unwrap();
		assert_eq!(header.command, "ping");
		assert_eq!(header.length, 8);
		assert_eq!(payload, vec![1, 2, 3, 4, 5, 6, 7, 8]);
	}

	#[test]
	fn resynchronizes_on_garbage_prefix() {
		let mut stream = vec![0xde, 0xad, 0xf9];
		stream.extend_from_slice(&encode_message(magic(), "verack", &[]));
		let mut cursor = std::io::Cursor::new(stream);
		let (header, payload) = read_message(&mut cursor, magic()).unwrap();
		assert_eq!(header.command, "verack");
		assert!(payload.is_empty());
	}

	#[test]
	fn bad_checksum_is_surfaced() {
		let mut message = encode_message(magic(), "inv", &[0]);
		let last = message.len() - 1;
		message[last] ^= 0xff;
		let mut cursor = std::io::Cursor::new(message);
		match read_message(&mut cursor, magic()) {
			Err(Error::BadChecksum(command)) => assert_eq!(command, "inv"),
			other => panic!("expected BadChecksum, got {:?}", other.map(|_| ())),
		}
	}

	#[test]
	fn inv_payload_parses_items() {
		let mut payload = vec![2u8];
		payload.extend_from_slice(&INV_TX.to_le_bytes());
		payload.extend_from_slice(&[0x11; 32]);
		payload.extend_from_slice(&INV_BLOCK.to_le_bytes());
		payload.extend_from_slice(&[0x22; 32]);
		let inv = decode_inv(&payload).unwrap();
		assert_eq!(inv.items.len(), 2);
		assert_eq!(inv.items[0].inv_type, INV_TX);
		assert_eq!(inv.items[1].inv_type, INV_BLOCK);
		assert_eq!(inv.items[1].hash.0, [0x22; 32]);
	}

	#[test]
	fn version_payload_layout() {
		let payload = encode_version(&Version {
			version: 170002,
			services: NODE_NETWORK,
			timestamp: 1_600_000_000,
			addr_recv: NetAddr { services: NODE_NETWORK },
			addr_from: NetAddr { services: NODE_NETWORK },
			nonce: 7,
			user_agent: "/equipool/".to_string(),
			start_height: 42,
			relay: true,
		})
		.unwrap();
		// version + services + timestamp + 2 addrs + nonce
		// + varstr + height + relay
		assert_eq!(payload.len(), 4 + 8 + 8 + 26 * 2 + 8 + 1 + 10 + 4 + 1);
		assert_eq!(&payload[0..4], &170002u32.to_le_bytes());
		assert_eq!(payload[payload.len() - 1], 1);
	}
}
