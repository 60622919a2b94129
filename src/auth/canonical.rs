//! Deterministic canonical encoding of a signed order or cancellation,
//! and the SEP-0053-style signed-message envelope wrapped around it.
//!
//! The canonical form must be reproducible by a client in any language
//! without sharing this crate's in-memory field ordering, so it is built by
//! hand as a sorted-key JSON object rather than derived from `Serialize` —
//! struct field order and serde attribute choices must never be able to
//! change the bytes that get signed.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::models::order::{CancelOrderRequest, CreateOrderRequest};

/// Fixed prefix identifying this crate's signed-message domain. Mirrors the
/// ecosystem's SEP-0053 envelope shape (domain tag, then a type tag, then a
/// length-prefixed payload) so a signature over an order can never be
/// replayed as a signature over an unrelated ledger transaction.
const DOMAIN_TAG: &[u8] = b"dark-pool-core/signed-message/v1";

const TYPE_TAG_ORDER: u8 = 0x01;
const TYPE_TAG_CANCEL: u8 = 0x02;

fn varint_encode(mut n: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (n & 0x7f) as u8;
        n >>= 7;
        if n == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn envelope(type_tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(DOMAIN_TAG.len() + 1 + 5 + payload.len());
    buf.extend_from_slice(DOMAIN_TAG);
    buf.push(type_tag);
    varint_encode(payload.len() as u64, &mut buf);
    buf.extend_from_slice(payload);
    buf
}

fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Builds the sorted, null-stripped canonical object for an order
/// submission: `asset_pair.{base,quote}, order_id, order_type, price,
/// quantity, side, time_in_force, timestamp, user_address` — in that
/// lexicographic key order. `price` is omitted entirely when absent
/// (Market orders), never serialised as `null`.
fn canonical_order_value(req: &CreateOrderRequest) -> Value {
    let mut pair = Map::new();
    pair.insert("base".to_string(), Value::String(req.pair.base.clone()));
    pair.insert("quote".to_string(), Value::String(req.pair.quote.clone()));

    let mut obj = Map::new();
    obj.insert("asset_pair".to_string(), Value::Object(pair));
    obj.insert("order_id".to_string(), Value::String(req.order_id.clone()));
    obj.insert(
        "order_type".to_string(),
        serde_json::to_value(req.order_type).expect("order_type serialises"),
    );
    if let Some(price) = req.price {
        obj.insert("price".to_string(), Value::String(price.to_string()));
    }
    obj.insert(
        "quantity".to_string(),
        Value::String(req.quantity.to_string()),
    );
    obj.insert(
        "side".to_string(),
        serde_json::to_value(req.side).expect("side serialises"),
    );
    obj.insert(
        "time_in_force".to_string(),
        serde_json::to_value(req.time_in_force).expect("time_in_force serialises"),
    );
    obj.insert("timestamp".to_string(), Value::from(req.timestamp));
    obj.insert(
        "user_address".to_string(),
        Value::String(req.account.clone()),
    );
    Value::Object(obj)
}

fn canonical_cancel_value(req: &CancelOrderRequest) -> Value {
    let mut obj = Map::new();
    obj.insert("order_id".to_string(), Value::String(req.order_id.clone()));
    obj.insert("timestamp".to_string(), Value::from(req.timestamp));
    obj.insert(
        "user_address".to_string(),
        Value::String(req.account.clone()),
    );
    Value::Object(obj)
}

/// Digest of the signed envelope wrapping an order submission's canonical
/// form. This is what the client's Ed25519 signature must cover.
pub fn order_digest(req: &CreateOrderRequest) -> [u8; 32] {
    let payload =
        serde_json::to_vec(&canonical_order_value(req)).expect("canonical order always encodes");
    sha256(&envelope(TYPE_TAG_ORDER, &payload))
}

/// Digest of the signed envelope wrapping a cancellation request.
pub fn cancel_digest(req: &CancelOrderRequest) -> [u8; 32] {
    let payload = serde_json::to_vec(&canonical_cancel_value(req))
        .expect("canonical cancel always encodes");
    sha256(&envelope(TYPE_TAG_CANCEL, &payload))
}
