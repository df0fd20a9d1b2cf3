//! Postback payload grammar: `module ":" action ("$" data)?`.
//!
//! The module name is split off at the first `:`, the action at the first
//! `$` after it. Whatever follows is opaque data for the module's own
//! decoder.

use crate::error::{ProtocolError, ProtocolResult};

/// Separator between module name and action.
pub const MODULE_SEP: char = ':';
/// Separator between action and data.
pub const DATA_SEP: char = '$';
/// LINE rejects postback data longer than this.
pub const MAX_POSTBACK_LEN: usize = 300;

/// A decoded postback payload borrowing from the raw string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Postback<'a> {
    pub module: &'a str,
    pub action: &'a str,
    /// Empty when the payload carried no data section.
    pub data: &'a str,
}

impl<'a> Postback<'a> {
    /// Decode a raw payload. Returns `None` for anything that does not fit
    /// the grammar; callers drop those silently. The payload is taken
    /// verbatim so that `data` survives `encode` unchanged.
    pub fn decode(raw: &'a str) -> Option<Self> {
        let (module, rest) = raw.split_once(MODULE_SEP)?;
        let (action, data) = match rest.split_once(DATA_SEP) {
            Some((action, data)) => (action, data),
            None => (rest, ""),
        };
        if module.is_empty() || action.is_empty() {
            return None;
        }
        Some(Self {
            module,
            action,
            data,
        })
    }

    /// Data section, or `None` when it is empty.
    pub fn data(&self) -> Option<&'a str> {
        Some(self.data.trim()).filter(|d| !d.is_empty())
    }
}

/// Encode a payload. Module and action may not contain either separator;
/// data may contain anything except that the whole payload must fit the
/// platform limit.
pub fn encode(module: &str, action: &str, data: &str) -> ProtocolResult<String> {
    check_field("module", module)?;
    check_field("action", action)?;

    let payload = if data.is_empty() {
        format!("{module}{MODULE_SEP}{action}")
    } else {
        format!("{module}{MODULE_SEP}{action}{DATA_SEP}{data}")
    };

    if payload.len() > MAX_POSTBACK_LEN {
        return Err(ProtocolError::PayloadTooLong {
            len: payload.len(),
            max: MAX_POSTBACK_LEN,
        });
    }
    Ok(payload)
}

fn check_field(field: &'static str, value: &str) -> ProtocolResult<()> {
    if value.is_empty() {
        return Err(ProtocolError::EmptyField(field));
    }
    for reserved in [MODULE_SEP, DATA_SEP] {
        if value.contains(reserved) {
            return Err(ProtocolError::ReservedCharacter { field, reserved });
        }
    }
    Ok(())
}
