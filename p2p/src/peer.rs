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

//! The outbound peer connection. Performs the minimal version/verack
//! handshake, answers pings, and forwards `inv` announcements to the
//! adapter. Runs on its own thread with blocking reads.

use chrono::Utc;
use rand::Rng;
use std::io;
use std::net::TcpStream;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::util::StopState;

use crate::msg::{self, Version, NetAddr, INV_BLOCK, INV_TX, NODE_NETWORK};
use crate::types::{Error, P2PConfig, PeerAdapter};

/// User agent advertised in our version message.
pub const USER_AGENT: &str = "/equipool:0.6.0/";

const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_BACKOFF: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// A single outbound peer of the coin's gossip network.
pub struct Peer {
	config: P2PConfig,
	magic: [u8; 4],
	protocol_version: u32,
	start_height: i32,
	adapter: Arc<dyn PeerAdapter>,
	stop_state: Arc<StopState>,
}

impl Peer {
	/// Creates a peer client; `start` actually connects.
	pub fn new(
		config: P2PConfig,
		magic: [u8; 4],
		protocol_version: u32,
		start_height: i32,
		adapter: Arc<dyn PeerAdapter>,
		stop_state: Arc<StopState>,
	) -> Peer {
		Peer {
			config,
			magic,
			protocol_version,
			start_height,
			adapter,
			stop_state,
		}
	}

	/// Spawns the peer thread: connect, handshake, then read inventory
	/// until stopped.
	pub fn start(self) -> io::Result<JoinHandle<()>> {
		thread::Builder::new()
			.name("p2p-peer".to_string())
			.spawn(move || self.run())
	}

	fn run(&self) {
		let mut attempts = 0;
		loop {
			if self.stop_state.is_stopped() {
				break;
			}
			match self.connect_once() {
				Ok(()) => {
					// connection ran and ended (socket closed); reconnect
					attempts = 0;
				}
				Err(Error::ConnectionRefused(e)) => {
					let err = Error::ConnectionRefused(e);
					error!("p2p connection refused, giving up: {}", err);
					self.adapter.connection_failed(&err);
					break;
				}
				Err(e) => {
					if self.stop_state.is_stopped() {
						break;
					}
					attempts += 1;
					if attempts >= CONNECT_ATTEMPTS {
						error!("p2p connection failed after {} attempts: {}", attempts, e);
						self.adapter.connection_failed(&e);
						break;
					}
					warn!(
						"p2p connection error (attempt {}/{}): {}",
						attempts, CONNECT_ATTEMPTS, e
					);
					thread::sleep(CONNECT_BACKOFF);
				}
			}
		}
	}

	fn connect_once(&self) -> Result<(), Error> {
		let addr = format!("{}:{}", self.config.host, self.config.port);
		info!("connecting to p2p peer {}", addr);
		let mut stream = TcpStream::connect(&addr).map_err(|e| {
			if e.kind() == io::ErrorKind::ConnectionRefused {
				Error::ConnectionRefused(format!("{}", e))
			} else {
				Error::Connection(e)
			}
		})?;
		stream.set_read_timeout(Some(READ_TIMEOUT))?;

		self.send_version(&mut stream)?;

		loop {
			if self.stop_state.is_stopped() {
				return Ok(());
			}
			match msg::read_message(&mut stream, self.magic) {
				Ok((header, payload)) => self.dispatch(&mut stream, &header.command, &payload)?,
				Err(Error::BadChecksum(command)) => {
					// resynchronize on the next magic
					error!("bad checksum on p2p message {}, resyncing", command);
				}
				Err(Error::Connection(ref e))
					if e.kind() == io::ErrorKind::WouldBlock
						|| e.kind() == io::ErrorKind::TimedOut =>
				{
					// idle; loop back around for the stop check
				}
				Err(e) => return Err(e),
			}
		}
	}

	fn send_version(&self, stream: &mut TcpStream) -> Result<(), Error> {
		let version = Version {
			version: self.protocol_version,
			services: NODE_NETWORK,
			timestamp: Utc::now().timestamp(),
			addr_recv: NetAddr {
				services: NODE_NETWORK,
			},
			addr_from: NetAddr {
				services: NODE_NETWORK,
			},
			nonce: rand::thread_rng().gen(),
			user_agent: USER_AGENT.to_string(),
			start_height: self.start_height,
			relay: !self.config.disable_transactions,
		};
		let payload = msg::encode_version(&version)?;
		msg::write_message(stream, self.magic, "version", &payload)
	}

	fn dispatch(
		&self,
		stream: &mut TcpStream,
		command: &str,
		payload: &[u8],
	) -> Result<(), Error> {
		match command {
			"version" => msg::write_message(stream, self.magic, "verack", &[]),
			"verack" => {
				info!("p2p handshake complete");
				Ok(())
			}
			"ping" => msg::write_message(stream, self.magic, "pong", payload),
			"inv" => {
				let inv = msg::decode_inv(payload)?;
				for item in inv.items {
					match item.inv_type {
						INV_BLOCK => self.adapter.block_found(item.hash),
						INV_TX => {
							if !self.config.disable_transactions {
								self.adapter.transaction_received(item.hash);
							}
						}
						other => trace!("ignoring inv type {}", other),
					}
				}
				Ok(())
			}
			other => {
				trace!("ignoring p2p message {}", other);
				Ok(())
			}
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::core::core::hash::Hash;
	use std::net::TcpListener;
	use std::sync::Mutex;

	struct Collector {
		blocks: Mutex<Vec<Hash>>,
		failed: Mutex<bool>,
	}

	impl PeerAdapter for Collector {
		fn block_found(&self, hash: Hash) {
			self.blocks.lock().unwrap().push(hash);
		}
		fn transaction_received(&self, _: Hash) {}
		fn connection_failed(&self, _: &Error) {
			*self.failed.lock().unwrap() = true;
		}
	}

	#[test]
	fn handshake_then_inv_reaches_adapter() {
		let magic = [0xf9, 0xee, 0xe4, 0x8d];
		let listener = TcpListener::bind("127.0.0.1:0").unwrap();
		let port = listener.local_addr().unwrap().port();

		let adapter = Arc::new(Collector {
			blocks: Mutex::new(vec![]),
			failed: Mutex::new(false),
		});
		let stop_state = Arc::new(StopState::new());

		let peer = Peer::new(
			P2PConfig {
				enabled: true,
				host: "127.0.0.1".to_string(),
				port,
				disable_transactions: true,
			},
			magic,
			170002,
			0,
			adapter.clone(),
			stop_state.clone(),
		);
		let handle = peer.start().unwrap();

		let (mut socket, _) = listener.accept().unwrap();
		// consume their version message
		let (header, _) = msg::read_message(&mut socket, magic).unwrap();
		assert_eq!(header.command, "version");
		msg::write_message(&mut socket, magic, "verack", &[]).unwrap();

		// announce one block
		let mut payload = vec![1u8];
		payload.extend_from_slice(&INV_BLOCK.to_le_bytes());
		payload.extend_from_slice(&[0x77; 32]);
		msg::write_message(&mut socket, magic, "inv", &payload).unwrap();

		// wait for the event then shut the peer down
		for _ in 0..100 {
			if !adapter.blocks.lock().unwrap().is_empty() {
				break;
			}
			thread::sleep(Duration::from_millis(10));
		}
		stop_state.stop();
		drop(socket);
		handle.join().unwrap();

		let blocks = adapter.blocks.lock().unwrap();
		assert_eq!(blocks.len(), 1);
		assert_eq!(blocks[0].0, [0x77; 32]);
		assert!(!*adapter.failed.lock().unwrap());
	}

	#[test]
	fn refused_connection_reports_failure() {
		// port 1 is essentially never listening
		let adapter = Arc::new(Collector {
			blocks: Mutex::new(vec![]),
			failed: Mutex::new(false),
		});
		let peer = Peer::new(
			P2PConfig {
				enabled: true,
				host: "127.0.0.1".to_string(),
				port: 1,
				disable_transactions: true,
			},
			[0; 4],
			170002,
			0,
			adapter.clone(),
			Arc::new(StopState::new()),
		);
		peer.start().unwrap().join().unwrap();
		assert!(*adapter.failed.lock().unwrap());
	}
}
