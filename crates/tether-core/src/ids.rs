//! Id generation.
//!
//! All generated ids are UUID v7 (time-ordered) via [`uuid::Uuid::now_v7`],
//! prefixed so a log line says what kind of id it is.

use uuid::Uuid;

/// Prefix of server-assigned channel ids.
pub const CHANNEL_PREFIX: &str = "conn_";
/// Prefix of client-generated request ids.
pub const MESSAGE_PREFIX: &str = "msg_";

/// New channel id, e.g. `conn_01890a5d-ac96-774b-bcce-b302099a8057`.
pub fn channel_id() -> String {
    format!("{CHANNEL_PREFIX}{}", Uuid::now_v7())
}

/// New request id.
pub fn message_id() -> String {
    format!("{MESSAGE_PREFIX}{}", Uuid::now_v7())
}
