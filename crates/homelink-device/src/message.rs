use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::error::{DeviceError, Result};
use crate::value::{Value, ValueError};

/// Default per-call timeout when a message type does not set its own.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(1000);

type EncodeFn = Arc<dyn Fn(&Value) -> std::result::Result<Bytes, ValueError> + Send + Sync>;
type DecodeFn = Arc<dyn Fn(&[u8]) -> std::result::Result<Value, ValueError> + Send + Sync>;

pub(crate) struct EventSpec {
    pub(crate) name: String,
    pub(crate) decode: DecodeFn,
}

/// Immutable wire descriptor for one message type.
///
/// The head and tail byte patterns frame the encoded value on the wire and
/// route unsolicited event frames; direct calls correlate purely by id.
#[derive(Clone)]
pub struct MessageType {
    name: String,
    head: Bytes,
    tail: Bytes,
    timeout: Duration,
    encode: EncodeFn,
    decode: DecodeFn,
    event: Option<Arc<EventSpec>>,
    quiet: bool,
}

impl MessageType {
    /// New descriptor with empty head/tail and the default timeout.
    pub fn new<E, D>(name: impl Into<String>, encode: E, decode: D) -> Self
    where
        E: Fn(&Value) -> std::result::Result<Bytes, ValueError> + Send + Sync + 'static,
        D: Fn(&[u8]) -> std::result::Result<Value, ValueError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            head: Bytes::new(),
            tail: Bytes::new(),
            timeout: DEFAULT_CALL_TIMEOUT,
            encode: Arc::new(encode),
            decode: Arc::new(decode),
            event: None,
            quiet: false,
        }
    }

    /// Fixed bytes preceding the encoded value.
    pub fn head(mut self, head: impl Into<Bytes>) -> Self {
        self.head = head.into();
        self
    }

    /// Fixed bytes following the encoded value.
    pub fn tail(mut self, tail: impl Into<Bytes>) -> Self {
        self.tail = tail.into();
        self
    }

    /// Per-call timeout for this type.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Re-emit unsolicited frames matching this type's head/tail under the
    /// given event name, decoded with `decode`.
    pub fn event<D>(mut self, name: impl Into<String>, decode: D) -> Self
    where
        D: Fn(&[u8]) -> std::result::Result<Value, ValueError> + Send + Sync + 'static,
    {
        self.event = Some(Arc::new(EventSpec {
            name: name.into(),
            decode: Arc::new(decode),
        }));
        self
    }

    /// Resolve decode failures with `Value::Null` instead of rejecting.
    ///
    /// Used where a malformed reading is better treated as missing than as
    /// fatal. Flagged for product review; grep this method to find every
    /// quiet type.
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn head_bytes(&self) -> &Bytes {
        &self.head
    }

    pub(crate) fn tail_bytes(&self) -> &Bytes {
        &self.tail
    }

    pub(crate) fn call_timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn is_quiet(&self) -> bool {
        self.quiet
    }

    pub(crate) fn event_spec(&self) -> Option<&Arc<EventSpec>> {
        self.event.as_ref()
    }

    pub(crate) fn encode_value(&self, value: &Value) -> std::result::Result<Bytes, ValueError> {
        (self.encode)(value)
    }

    pub(crate) fn decode_payload(&self, payload: &[u8]) -> std::result::Result<Value, ValueError> {
        (self.decode)(payload)
    }
}

impl fmt::Debug for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageType")
            .field("name", &self.name)
            .field("head", &self.head)
            .field("tail", &self.tail)
            .field("timeout", &self.timeout)
            .field("event", &self.event.as_ref().map(|e| e.name.clone()))
            .field("quiet", &self.quiet)
            .finish()
    }
}

/// Name-keyed registry of message types for one device or service.
#[derive(Default, Clone)]
pub struct MessageSet {
    types: Vec<Arc<MessageType>>,
    by_name: HashMap<String, usize>,
}

impl MessageSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a message type.
    ///
    /// Duplicate names are rejected, as are duplicate head/tail patterns
    /// among event-bearing types — those would make event routing
    /// ambiguous.
    pub fn register(&mut self, ty: MessageType) -> Result<()> {
        if self.by_name.contains_key(ty.name()) {
            return Err(DeviceError::DuplicateMessage(ty.name().to_string()));
        }
        if ty.event_spec().is_some() {
            let clash = self.types.iter().any(|existing| {
                existing.event_spec().is_some()
                    && existing.head_bytes() == ty.head_bytes()
                    && existing.tail_bytes() == ty.tail_bytes()
            });
            if clash {
                return Err(DeviceError::DuplicateEventPattern(ty.name().to_string()));
            }
        }
        self.by_name.insert(ty.name().to_string(), self.types.len());
        self.types.push(Arc::new(ty));
        Ok(())
    }

    /// Look up a type by name.
    pub fn get(&self, name: &str) -> Option<&Arc<MessageType>> {
        self.by_name.get(name).map(|idx| &self.types[*idx])
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<MessageType>> {
        self.types.iter()
    }
}

impl fmt::Debug for MessageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageSet")
            .field("types", &self.types.iter().map(|t| t.name()).collect::<Vec<_>>())
            .finish()
    }
}

/// Encode/decode pair passing raw bytes through unchanged.
///
/// Handy for diagnostics and for message types whose payload is already a
/// device-native byte string.
pub fn raw_codec(name: impl Into<String>) -> MessageType {
    MessageType::new(
        name,
        |value| value.as_bytes().cloned(),
        |payload| Ok(Value::Bytes(Bytes::copy_from_slice(payload))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u8_type(name: &str) -> MessageType {
        MessageType::new(
            name,
            |value| {
                let n = value.as_int()?;
                Ok(Bytes::copy_from_slice(&[n as u8]))
            },
            |payload| match payload {
                [n] => Ok(Value::Int(*n as i64)),
                _ => Err(ValueError::Truncated {
                    expected: 1,
                    found: payload.len(),
                }),
            },
        )
    }

    #[test]
    fn roundtrip_law_for_u8_codec() {
        let ty = u8_type("level");
        for n in 0..=u8::MAX as i64 {
            let encoded = ty.encode_value(&Value::Int(n)).unwrap();
            assert_eq!(encoded.len(), 1);
            assert_eq!(ty.decode_payload(&encoded).unwrap(), Value::Int(n));
        }
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut set = MessageSet::new();
        set.register(u8_type("level")).unwrap();
        let err = set.register(u8_type("level")).unwrap_err();
        assert!(matches!(err, DeviceError::DuplicateMessage(name) if name == "level"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn duplicate_event_patterns_rejected() {
        let mut set = MessageSet::new();
        set.register(
            u8_type("level")
                .head(&[0x02, 0x00][..])
                .event("level_changed", |p| Ok(Value::Int(p[0] as i64))),
        )
        .unwrap();

        let err = set
            .register(
                u8_type("level2")
                    .head(&[0x02, 0x00][..])
                    .event("other", |p| Ok(Value::Int(p[0] as i64))),
            )
            .unwrap_err();
        assert!(matches!(err, DeviceError::DuplicateEventPattern(_)));

        // Same pattern without an event decoder is fine.
        set.register(u8_type("level3").head(&[0x02, 0x00][..])).unwrap();
    }

    #[test]
    fn lookup_by_name() {
        let mut set = MessageSet::new();
        set.register(u8_type("level").timeout(Duration::from_millis(250))).unwrap();

        let ty = set.get("level").unwrap();
        assert_eq!(ty.call_timeout(), Duration::from_millis(250));
        assert!(set.get("unknown").is_none());
    }

    #[test]
    fn raw_codec_passes_bytes_through() {
        let ty = raw_codec("raw");
        let body = Bytes::from_static(&[0x01, 0x02]);
        let encoded = ty.encode_value(&Value::Bytes(body.clone())).unwrap();
        assert_eq!(encoded, body);
        assert_eq!(
            ty.decode_payload(&encoded).unwrap(),
            Value::Bytes(body)
        );

        let err = ty.encode_value(&Value::Int(1)).unwrap_err();
        assert!(matches!(err, ValueError::TypeMismatch { .. }));
    }
}
