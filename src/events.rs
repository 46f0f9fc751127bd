//! ABI-driven log decoding into canonically serialized event records.

use std::collections::HashMap;
use std::fmt;

use alloy::dyn_abi::{DynSolValue, EventExt};
use alloy::json_abi::{Event as AbiEvent, JsonAbi, Param};
use alloy_primitives::{Address, B256, hex};
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

use crate::chain::RawLog;
use crate::error::{DecodeError, DecodeResult};
use crate::repository::Event;

/// Integers up to this width are kept as numbers; wider ones become decimal strings.
const SAFE_INTEGER_BITS: usize = 53;

/// Canonical form of a decoded event argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventValue {
    Bool(bool),
    /// Integer that fits in 53 bits.
    Int(i64),
    /// Wide or arbitrary-precision integer as a decimal string.
    BigInt(String),
    /// Text, lowercase addresses and `0x`-prefixed byte strings.
    String(String),
    List(Vec<EventValue>),
    Map(EventArgs),
}

impl EventValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            EventValue::BigInt(s) | EventValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Ordered mapping of argument name to canonical value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventArgs(Vec<(String, EventValue)>);

impl EventArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: EventValue) {
        let name = name.into();
        match self.0.iter_mut().find(|(key, _)| *key == name) {
            Some(entry) => entry.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&EventValue> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(key, _)| key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &EventValue)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for EventValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            EventValue::Bool(b) => serializer.serialize_bool(*b),
            EventValue::Int(i) => serializer.serialize_i64(*i),
            EventValue::BigInt(s) | EventValue::String(s) => serializer.serialize_str(s),
            EventValue::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            EventValue::Map(args) => args.serialize(serializer),
        }
    }
}

impl Serialize for EventArgs {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

struct EventValueVisitor;

impl<'de> Visitor<'de> for EventValueVisitor {
    type Value = EventValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a canonical event argument")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
        Ok(EventValue::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(EventValue::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(i64::try_from(v)
            .map(EventValue::Int)
            .unwrap_or_else(|_| EventValue::BigInt(v.to_string())))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        Ok(EventValue::String(v.to_string()))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(EventValue::String(v.to_owned()))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(EventValue::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<Self::Value, A::Error> {
        EventArgsVisitor.visit_map(map).map(EventValue::Map)
    }
}

impl<'de> Deserialize<'de> for EventValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(EventValueVisitor)
    }
}

struct EventArgsVisitor;

impl<'de> Visitor<'de> for EventArgsVisitor {
    type Value = EventArgs;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of event arguments")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut args = EventArgs::new();
        while let Some((key, value)) = map.next_entry::<String, EventValue>()? {
            args.insert(key, value);
        }
        Ok(args)
    }
}

impl<'de> Deserialize<'de> for EventArgs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(EventArgsVisitor)
    }
}

/// Lowercase `0x`-prefixed hex form used for every stored address.
pub fn canonical_address(address: &Address) -> String {
    address.to_string().to_lowercase()
}

/// Parse a user-supplied address, accepting any hex casing.
pub fn parse_address(address: &str) -> DecodeResult<Address> {
    Address::from_str(address.trim().to_lowercase().as_str())
        .map_err(|_| DecodeError::InvalidAddress(address.to_string()))
}

pub fn canonical_hash(hash: &B256) -> String {
    format!("{hash:?}")
}

/// Event-signature lookup built from a contract ABI.
#[derive(Debug, Clone, Default)]
pub struct EventDecoder {
    events: HashMap<B256, Vec<AbiEvent>>,
}

impl EventDecoder {
    pub fn from_abi(abi: &JsonAbi) -> Self {
        let mut events: HashMap<B256, Vec<AbiEvent>> = HashMap::new();
        for event in abi.events().filter(|event| !event.anonymous) {
            events.entry(event.selector()).or_default().push(event.clone());
        }
        Self { events }
    }

    pub fn len(&self) -> usize {
        self.events.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn decode(&self, log: &RawLog, timestamp: u64) -> DecodeResult<Option<Event>> {
        let Some(selector) = log.topics.first() else {
            return Ok(None);
        };
        let Some(candidates) = self.events.get(selector) else {
            return Ok(None);
        };

        // Same selector, different indexed layout (ERC20 vs ERC721 Transfer).
        let mut last_error = None;
        for event in candidates {
            match decode_args(event, log) {
                Ok(args) => {
                    return Ok(Some(Event {
                        contract_address: canonical_address(&log.address),
                        event_name: event.name.clone(),
                        block_number: log.block_number.unwrap_or_default(),
                        transaction_hash: log
                            .transaction_hash
                            .map(|hash| canonical_hash(&hash))
                            .unwrap_or_default(),
                        log_index: log.log_index.unwrap_or_default(),
                        args,
                        timestamp,
                    }));
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| DecodeError::Malformed {
            event: canonical_hash(selector),
            message: "no candidate event".to_string(),
        }))
    }
}

fn decode_args(event: &AbiEvent, log: &RawLog) -> DecodeResult<EventArgs> {
    let decoded = event
        .decode_log_parts(log.topics.iter().copied(), &log.data)
        .map_err(|e| DecodeError::Malformed {
            event: event.name.clone(),
            message: e.to_string(),
        })?;

    let mut indexed = decoded.indexed.into_iter();
    let mut body = decoded.body.into_iter();
    let mut args = EventArgs::new();

    for (index, param) in event.inputs.iter().enumerate() {
        let value = if param.indexed {
            indexed.next()
        } else {
            body.next()
        };
        let value = value.ok_or_else(|| DecodeError::Malformed {
            event: event.name.clone(),
            message: format!("missing value for parameter {index}"),
        })?;
        args.insert(
            param_name(&param.name, index),
            canonical_value(&value, &param.components),
        );
    }

    Ok(args)
}

fn param_name(name: &str, index: usize) -> String {
    if name.is_empty() {
        format!("arg{index}")
    } else {
        name.to_string()
    }
}

/// Convert a decoded ABI value into its canonical form, recursing through
/// arrays and tuples. Tuples whose components are all named become maps.
pub fn canonical_value(value: &DynSolValue, components: &[Param]) -> EventValue {
    match value {
        DynSolValue::Bool(b) => EventValue::Bool(*b),
        DynSolValue::Int(i, bits) => match i64::try_from(*i) {
            Ok(small) if *bits <= SAFE_INTEGER_BITS => EventValue::Int(small),
            _ => EventValue::BigInt(i.to_string()),
        },
        DynSolValue::Uint(u, bits) => match u64::try_from(*u) {
            Ok(small) if *bits <= SAFE_INTEGER_BITS => EventValue::Int(small as i64),
            _ => EventValue::BigInt(u.to_string()),
        },
        DynSolValue::Address(address) => EventValue::String(canonical_address(address)),
        DynSolValue::FixedBytes(word, size) => {
            EventValue::String(hex::encode_prefixed(&word[..(*size).min(32)]))
        }
        DynSolValue::Bytes(bytes) => EventValue::String(hex::encode_prefixed(bytes)),
        DynSolValue::Function(function) => EventValue::String(hex::encode_prefixed(function.as_slice())),
        DynSolValue::String(s) => EventValue::String(s.clone()),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) => EventValue::List(
            items
                .iter()
                .map(|item| canonical_value(item, components))
                .collect(),
        ),
        DynSolValue::Tuple(items) => {
            let named = !components.is_empty()
                && components.len() == items.len()
                && components.iter().all(|c| !c.name.is_empty());
            if named {
                let mut map = EventArgs::new();
                for (item, component) in items.iter().zip(components) {
                    map.insert(
                        component.name.clone(),
                        canonical_value(item, &component.components),
                    );
                }
                EventValue::Map(map)
            } else {
                EventValue::List(
                    items
                        .iter()
                        .enumerate()
                        .map(|(i, item)| {
                            let nested = components.get(i).map_or(&[][..], |c| &c.components[..]);
                            canonical_value(item, nested)
                        })
                        .collect(),
                )
            }
        }
        #[allow(unreachable_patterns)]
        other => EventValue::String(format!("{other:?}")),
    }
}
