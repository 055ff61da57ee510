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

//! The daemon RPC client. Issues the same JSON-RPC 1.0 call to every
//! configured daemon in parallel, optionally streaming per-daemon results
//! as they land, plus a batch variant that only talks to the primary
//! daemon.

use failure::Fail;
use futures::stream::{FuturesUnordered, StreamExt};
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::{Body, Method, Request, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::runtime::Runtime;

/// Default per-call timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection details of one coin daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaemonConfig {
	/// Daemon host name or address.
	pub host: String,
	/// RPC port.
	pub port: u16,
	/// RPC username.
	pub user: String,
	/// RPC password.
	pub password: String,
}

/// Errors a single daemon call can produce.
#[derive(Debug, Fail, Clone, PartialEq)]
pub enum Error {
	/// Connection refused, the daemon is not there.
	#[fail(display = "daemon {} offline: {}", _0, _1)]
	Offline(String, String),
	/// Any other socket or timeout problem.
	#[fail(display = "request error: {}", _0)]
	RequestError(String),
	/// The daemon rejected our credentials.
	#[fail(display = "daemon {} rejected rpc credentials", _0)]
	Unauthorized(String),
	/// The response body was not parseable, even after the NaN salvage.
	#[fail(display = "parse error: {}", _0)]
	ParseError(String),
	/// The daemon answered with a JSON-RPC level error object.
	#[fail(display = "rpc error {}: {}", code, message)]
	Rpc {
		/// JSON-RPC error code.
		code: i64,
		/// JSON-RPC error message.
		message: String,
	},
	/// Client-side misconfiguration.
	#[fail(display = "rpc configuration: {}", _0)]
	Configuration(String),
}

impl Error {
	/// JSON-RPC error code when this is an `Error::Rpc`.
	pub fn rpc_code(&self) -> Option<i64> {
		match *self {
			Error::Rpc { code, .. } => Some(code),
			_ => None,
		}
	}
}

/// One daemon's answer within a fan-out call.
#[derive(Debug, Clone)]
pub struct DaemonResponse {
	/// Index of the daemon in the configured list.
	pub daemon_id: usize,
	/// Its result or the error it produced.
	pub result: Result<Value, Error>,
}

/// Client over the full set of configured daemons. The first daemon in the
/// list is the primary, used for batch calls and block submission.
pub struct DaemonClient {
	daemons: Vec<DaemonConfig>,
	timeout: Duration,
}

impl DaemonClient {
	/// Creates a client. At least one daemon must be configured.
	pub fn new(daemons: Vec<DaemonConfig>) -> Result<DaemonClient, Error> {
		if daemons.is_empty() {
			return Err(Error::Configuration("no daemons configured".to_string()));
		}
		Ok(DaemonClient {
			daemons,
			timeout: DEFAULT_TIMEOUT,
		})
	}

	/// Overrides the default 60s per-call timeout.
	pub fn with_timeout(mut self, timeout: Duration) -> DaemonClient {
		self.timeout = timeout;
		self
	}

	/// Number of configured daemons.
	pub fn daemon_count(&self) -> usize {
		self.daemons.len()
	}

	/// Issues the call to every daemon in parallel, resolving once all have
	/// answered (or failed).
	pub fn call(&self, method: &str, params: Value) -> Vec<DaemonResponse> {
		self.call_with_timeout(method, params, self.timeout)
	}

	/// As `call` with a timeout for this call only.
	pub fn call_with_timeout(
		&self,
		method: &str,
		params: Value,
		timeout: Duration,
	) -> Vec<DaemonResponse> {
		let rt = Runtime::new().expect("tokio runtime");
		rt.block_on(async {
			let calls = self.daemons.iter().enumerate().map(|(daemon_id, daemon)| {
				let single = single_call(daemon, method, params.clone(), timeout);
				async move {
					DaemonResponse {
						daemon_id,
						result: single.await,
					}
				}
			});
			futures::future::join_all(calls).await
		})
	}

	/// As `call`, but invokes `on_result` per daemon as its response lands
	/// rather than waiting for the full set. Deduplication of the streamed
	/// responses is the consumer's business.
	pub fn call_stream<F>(&self, method: &str, params: Value, mut on_result: F)
	where
		F: FnMut(DaemonResponse),
	{
		let rt = Runtime::new().expect("tokio runtime");
		rt.block_on(async {
			let mut unordered: FuturesUnordered<_> = self
				.daemons
				.iter()
				.enumerate()
				.map(|(daemon_id, daemon)| {
					let single = single_call(daemon, method, params.clone(), self.timeout);
					async move {
						DaemonResponse {
							daemon_id,
							result: single.await,
						}
					}
				})
				.collect();
			while let Some(response) = unordered.next().await {
				on_result(response);
			}
		})
	}

	/// Issues the call to the primary daemon only.
	pub fn call_primary(&self, method: &str, params: Value) -> Result<Value, Error> {
		let rt = Runtime::new().expect("tokio runtime");
		rt.block_on(single_call(&self.daemons[0], method, params, self.timeout))
	}

	/// Sends a JSON array of calls to the primary daemon, returning the
	/// per-call results in request order.
	pub fn batch(&self, calls: &[(&str, Value)]) -> Result<Vec<Result<Value, Error>>, Error> {
		let daemon = &self.daemons[0];
		let body: Vec<Value> = calls
			.iter()
			.enumerate()
			.map(|(id, (method, params))| {
				json!({ "id": id, "method": method, "params": params })
			})
			.collect();

		let rt = Runtime::new().expect("tokio runtime");
		let raw = rt.block_on(raw_call(daemon, Value::Array(body), self.timeout))?;
		let entries = match raw {
			Value::Array(entries) => entries,
			other => {
				return Err(Error::ParseError(format!(
					"batch response was not an array: {}",
					other
				)));
			}
		};
		if entries.len() != calls.len() {
			return Err(Error::ParseError(format!(
				"batch response length {} != {}",
				entries.len(),
				calls.len()
			)));
		}
		Ok(entries.into_iter().map(unwrap_rpc_envelope).collect())
	}

	/// The initial online check: `getinfo` against every daemon. Ok when
	/// every daemon responded without error, otherwise the first failure.
	pub fn check_online(&self) -> Result<Vec<Value>, Error> {
		let responses = self.call("getinfo", json!([]));
		let mut infos = Vec::with_capacity(responses.len());
		for response in responses {
			match response.result {
				Ok(info) => infos.push(info),
				Err(e) => {
					warn!("daemon {} failed online check: {}", response.daemon_id, e);
					return Err(e);
				}
			}
		}
		Ok(infos)
	}
}

async fn single_call(
	daemon: &DaemonConfig,
	method: &str,
	params: Value,
	timeout: Duration,
) -> Result<Value, Error> {
	let body = json!({ "id": "equipool", "method": method, "params": params });
	let raw = raw_call(daemon, body, timeout).await?;
	unwrap_rpc_envelope(raw)
}

async fn raw_call(daemon: &DaemonConfig, body: Value, timeout: Duration) -> Result<Value, Error> {
	let daemon_name = format!("{}:{}", daemon.host, daemon.port);
	let auth = base64::encode(format!("{}:{}", daemon.user, daemon.password));

	let request = Request::builder()
		.method(Method::POST)
		.uri(format!("http://{}/", daemon_name))
		.header(AUTHORIZATION, format!("Basic {}", auth))
		.header(CONTENT_TYPE, "application/json")
		.body(Body::from(body.to_string()))
		.map_err(|e| Error::RequestError(format!("{}", e)))?;

	let client = hyper::Client::new();
	let response = match tokio::time::timeout(timeout, client.request(request)).await {
		Err(_) => {
			return Err(Error::RequestError(format!(
				"request to {} timed out",
				daemon_name
			)));
		}
		Ok(Err(e)) => {
			return Err(if e.is_connect() {
				Error::Offline(daemon_name, format!("{}", e))
			} else {
				Error::RequestError(format!("{}", e))
			});
		}
		Ok(Ok(response)) => response,
	};

	if response.status() == StatusCode::UNAUTHORIZED {
		return Err(Error::Unauthorized(daemon_name));
	}

	let bytes = hyper::body::to_bytes(response.into_body())
		.await
		.map_err(|e| Error::RequestError(format!("{}", e)))?;
	let text = String::from_utf8_lossy(&bytes).into_owned();
	parse_json_salvaging(&text)
}

/// Parses a response body, retrying once with non-standard `nan` number
/// tokens replaced by zero. Some daemons emit `-nan` for difficulty fields
/// while still indexing.
pub fn parse_json_salvaging(text: &str) -> Result<Value, Error> {
	match serde_json::from_str(text) {
		Ok(value) => Ok(value),
		Err(first_err) => {
			let salvaged = text.replace(":-nan,", ":0,").replace(":nan,", ":0,");
			serde_json::from_str(&salvaged)
				.map_err(|_| Error::ParseError(format!("{}: {:.200}", first_err, text)))
		}
	}
}

fn unwrap_rpc_envelope(raw: Value) -> Result<Value, Error> {
	let error = raw.get("error").cloned().unwrap_or(Value::Null);
	if !error.is_null() {
		let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
		let message = error
			.get("message")
			.and_then(Value::as_str)
			.unwrap_or("")
			.to_string();
		// some daemons answer errors as a bare string
		let message = if message.is_empty() && error.is_string() {
			error.as_str().unwrap_or("").to_string()
		} else {
			message
		};
		return Err(Error::Rpc { code, message });
	}
	Ok(raw.get("result").cloned().unwrap_or(Value::Null))
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn salvages_nan_tokens() {
		let body = r#"{"result":{"difficulty":-nan,"blocks":10},"error":null,"id":1}"#;
		let salvaged = parse_json_salvaging(body).unwrap();
		assert_eq!(salvaged["result"]["difficulty"], json!(0));
		assert_eq!(salvaged["result"]["blocks"], json!(10));
	}

	#[test]
	fn unparseable_body_is_parse_error() {
		match parse_json_salvaging("<html>502</html>") {
			Err(Error::ParseError(_)) => {}
			other => panic!("expected ParseError, got {:?}", other),
		}
	}

	#[test]
	fn envelope_error_becomes_rpc_error() {
		let raw = json!({"result": null, "error": {"code": -9, "message": "is downloading blocks"}});
		match unwrap_rpc_envelope(raw) {
			Err(Error::Rpc { code, message }) => {
				assert_eq!(code, -9);
				assert_eq!(message, "is downloading blocks");
			}
			other => panic!("expected rpc error, got {:?}", other),
		}
	}

	#[test]
	fn envelope_result_passes_through() {
		let raw = json!({"result": {"height": 3}, "error": null});
		assert_eq!(unwrap_rpc_envelope(raw).unwrap(), json!({"height": 3}));
	}

	#[test]
	fn empty_daemon_list_is_rejected() {
		assert!(DaemonClient::new(vec![]).is_err());
	}
}
