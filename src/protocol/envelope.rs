//! Envelope: `{method, id, params}` → `{id, result | error}`.
//!
//! Байтовые поля ParamBag в JSON — base64 (STANDARD). `value: ""` (пустое значение)
//! и отсутствующее `value` различаются: второе — None.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorKind, ProtoError, ProtoResult, CODE_TIMEOUT};

fn is_zero(v: &u64) -> bool {
    *v == 0
}

mod b64 {
    use super::*;
    use serde::{de::Error as _, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(v))
    }

    /// null и отсутствие поля — пустые байты.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        match Option::<String>::deserialize(d)? {
            None => Ok(Vec::new()),
            Some(s) => STANDARD.decode(s.as_bytes()).map_err(D::Error::custom),
        }
    }
}

mod b64_opt {
    use super::*;
    use serde::{de::Error as _, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(bytes) => s.serialize_some(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        match Option::<String>::deserialize(d)? {
            None => Ok(None),
            Some(s) => STANDARD
                .decode(s.as_bytes())
                .map(Some)
                .map_err(D::Error::custom),
        }
    }
}

/// Typed parameter bag shared by requests and results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamBag {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub snapid: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub wbid: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub itid: u64,
    #[serde(default, with = "b64", skip_serializing_if = "Vec::is_empty")]
    pub tableid: Vec<u8>,
    #[serde(default, with = "b64", skip_serializing_if = "Vec::is_empty")]
    pub key: Vec<u8>,
    #[serde(default, with = "b64_opt", skip_serializing_if = "Option::is_none")]
    pub value: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<bool>,
}

impl ParamBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapid(mut self, h: u64) -> Self {
        self.snapid = h;
        self
    }

    pub fn wbid(mut self, h: u64) -> Self {
        self.wbid = h;
        self
    }

    pub fn itid(mut self, h: u64) -> Self {
        self.itid = h;
        self
    }

    pub fn tableid(mut self, t: &[u8]) -> Self {
        self.tableid = t.to_vec();
        self
    }

    pub fn key(mut self, k: &[u8]) -> Self {
        self.key = k.to_vec();
        self
    }

    pub fn value(mut self, v: &[u8]) -> Self {
        self.value = Some(v.to_vec());
        self
    }

    pub fn result(mut self, r: bool) -> Self {
        self.result = Some(r);
        self
    }

    /// Отсутствующий `result` читается как false.
    pub fn result_flag(&self) -> bool {
        self.result.unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub params: ParamBag,
}

impl Request {
    pub fn new(method: impl Into<String>, id: impl Into<String>, params: ParamBag) -> Self {
        Self {
            method: method.into(),
            id: id.into(),
            params,
        }
    }

    pub fn to_json(&self) -> Vec<u8> {
        // Сериализация структуры без map-ключей не-строк не падает.
        serde_json::to_vec(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: i32,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ParamBag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn ok(id: impl Into<String>, result: ParamBag) -> Self {
        Self {
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, e: &ProtoError) -> Self {
        Self {
            id: id.into(),
            result: None,
            error: Some(ErrorBody {
                code: e.kind.code(),
                kind: e.kind,
                message: e.message.clone(),
            }),
        }
    }

    /// Server-side deadline expired: kind EngineFailure, code -32800.
    pub fn timeout(id: impl Into<String>, after_ms: u64) -> Self {
        Self {
            id: id.into(),
            result: None,
            error: Some(ErrorBody {
                code: CODE_TIMEOUT,
                kind: ErrorKind::EngineFailure,
                message: format!("time out: no result within {} ms", after_ms),
            }),
        }
    }

    pub fn from_result(id: impl Into<String>, r: ProtoResult<ParamBag>) -> Self {
        match r {
            Ok(bag) => Self::ok(id, bag),
            Err(e) => Self::err(id, &e),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn into_result(self) -> ProtoResult<ParamBag> {
        match (self.error, self.result) {
            (Some(e), _) => Err(ProtoError::new(e.kind, e.message)),
            (None, Some(bag)) => Ok(bag),
            (None, None) => Ok(ParamBag::default()),
        }
    }

    pub fn to_json(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// Разобрать входящий кадр. Ошибка — уже готовый ответ клиенту:
/// - не JSON / не объект → ParseError, id = "";
/// - нет `method` → InvalidRequest (id, если удалось прочитать);
/// - битые params (например, не base64) → InvalidArgument с id запроса.
pub fn parse_request(frame: &[u8]) -> Result<Request, Response> {
    let v: Value = serde_json::from_slice(frame).map_err(|e| {
        Response::err(
            "",
            &ProtoError::new(ErrorKind::ParseError, format!("parse error: {}", e)),
        )
    })?;
    let obj = v.as_object().ok_or_else(|| {
        Response::err(
            "",
            &ProtoError::new(ErrorKind::ParseError, "parse error: envelope is not an object"),
        )
    })?;

    let id = match obj.get("id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };

    let method = match obj.get("method") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        _ => {
            return Err(Response::err(
                id,
                &ProtoError::new(ErrorKind::InvalidRequest, "invalid request: missing method"),
            ))
        }
    };

    let params = match obj.get("params") {
        None | Some(Value::Null) => ParamBag::default(),
        Some(p) => serde_json::from_value::<ParamBag>(p.clone()).map_err(|e| {
            Response::err(
                id.clone(),
                &ProtoError::invalid_argument(format!("bad params: {}", e)),
            )
        })?,
    };

    Ok(Request { method, id, params })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_and_empty_value_differ() {
        let absent: ParamBag = serde_json::from_str(r#"{"result":false}"#).unwrap();
        assert_eq!(absent.value, None);
        let empty: ParamBag = serde_json::from_str(r#"{"value":"","result":true}"#).unwrap();
        assert_eq!(empty.value, Some(Vec::new()));

        let s = serde_json::to_string(&ParamBag::new().result(false)).unwrap();
        assert_eq!(s, r#"{"result":false}"#);
        let s = serde_json::to_string(&ParamBag::new().value(b"").result(true)).unwrap();
        assert_eq!(s, r#"{"value":"","result":true}"#);
    }

    #[test]
    fn bytes_are_base64() {
        let bag = ParamBag::new().tableid(&[0x40]).key(b"k1");
        let s = serde_json::to_string(&bag).unwrap();
        assert_eq!(s, r#"{"tableid":"QA==","key":"azE="}"#);
    }

    #[test]
    fn parse_request_error_shapes() {
        let r = parse_request(b"{not json").unwrap_err();
        assert_eq!(r.id, "");
        assert_eq!(r.error.as_ref().unwrap().kind, ErrorKind::ParseError);
        assert_eq!(r.error.as_ref().unwrap().code, -32700);

        let r = parse_request(br#"{"id":"7","params":{}}"#).unwrap_err();
        assert_eq!(r.id, "7");
        assert_eq!(r.error.as_ref().unwrap().code, -32600);

        let r = parse_request(br#"{"method":"_db.put","id":"8","params":{"key":"%%"}}"#)
            .unwrap_err();
        assert_eq!(r.id, "8");
        assert_eq!(r.error.unwrap().kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn timeout_response_is_engine_failure() {
        let r = Response::timeout("x", 5);
        let e = r.clone().into_result().unwrap_err();
        assert_eq!(e.kind, ErrorKind::EngineFailure);
        assert_eq!(r.error.unwrap().code, CODE_TIMEOUT);
    }
}
