//! protocol — словарь сообщений удалённого доступа к стору.
//!
//! Подмодули:
//! - method.rs   — закрытый enum методов и их wire-имена;
//! - envelope.rs — Request / Response / ParamBag (JSON, base64 для байтов);
//! - frame.rs    — `[len u32][json]` для TCP;
//! - messages.rs — билдеры запросов и парсеры результатов.

pub mod envelope;
pub mod frame;
pub mod messages;
pub mod method;

pub use envelope::{parse_request, ErrorBody, ParamBag, Request, Response};
pub use frame::{read_frame, write_frame, Frame};
pub use method::Method;
