// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present NORI Contributors

//! RINA application names and the control-message codec.
//!
//! An application name is a 4-tuple of optional components, each at most
//! 255 bytes on the wire: a one-byte length followed by the bytes (a null
//! component is length zero). A control message is a fixed little-endian
//! prefix followed by a per-type number of serialised names; the
//! `{copylen, names}` pair for every message type lives in [`MsgLayout`].
//! Deserialisation must consume the buffer exactly, otherwise the message
//! is malformed.

use crate::error::SerdesError;
use byteorder::{ByteOrder, LittleEndian};
use std::fmt;

/// Longest wire representation of a single name component.
pub const NAME_COMPONENT_MAX: usize = 255;

/// A four-component RINA application name: application process name,
/// process instance, entity name, entity instance.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RinaName {
    pub apn: Option<String>,
    pub api: Option<String>,
    pub aen: Option<String>,
    pub aei: Option<String>,
}

impl RinaName {
    /// Builds a name, normalising empty components to null (the wire
    /// format cannot tell them apart).
    pub fn new(apn: &str, api: &str, aen: &str, aei: &str) -> Self {
        let norm = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Self {
            apn: norm(apn),
            api: norm(api),
            aen: norm(aen),
            aei: norm(aei),
        }
    }

    /// Size of this name on the wire: four length bytes plus the capped
    /// component lengths.
    pub fn serlen(&self) -> usize {
        4 + component_prlen(&self.apn)
            + component_prlen(&self.api)
            + component_prlen(&self.aen)
            + component_prlen(&self.aei)
    }

    fn serialize(&self, out: &mut Vec<u8>) {
        serialize_component(out, &self.apn);
        serialize_component(out, &self.api);
        serialize_component(out, &self.aen);
        serialize_component(out, &self.aei);
    }

    fn deserialize(r: &mut Reader<'_>) -> Result<Self, SerdesError> {
        Ok(Self {
            apn: deserialize_component(r)?,
            api: deserialize_component(r)?,
            aen: deserialize_component(r)?,
            aei: deserialize_component(r)?,
        })
    }
}

impl fmt::Display for RinaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let part = |c: &Option<String>| c.clone().unwrap_or_default();
        write!(
            f,
            "{}/{}/{}/{}",
            part(&self.apn),
            part(&self.api),
            part(&self.aen),
            part(&self.aei)
        )
    }
}

/// Serialised length of one component, not counting the length byte.
/// Components longer than 255 bytes are truncated on the wire.
fn component_prlen(c: &Option<String>) -> usize {
    c.as_ref().map_or(0, |s| s.len().min(NAME_COMPONENT_MAX))
}

fn serialize_component(out: &mut Vec<u8>, c: &Option<String>) {
    let len = component_prlen(c);
    out.push(len as u8);
    if let Some(s) = c {
        out.extend_from_slice(&s.as_bytes()[..len]);
    }
}

fn deserialize_component(r: &mut Reader<'_>) -> Result<Option<String>, SerdesError> {
    let len = r.u8()? as usize;
    if len == 0 {
        return Ok(None);
    }
    let bytes = r.take(len)?;
    let s = std::str::from_utf8(bytes).map_err(|_| SerdesError::BadString)?;
    Ok(Some(s.to_string()))
}

/// Control-message types exchanged between the data-transfer engine and
/// the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MsgType {
    IpcpCreate = 1,
    IpcpCreateResp = 2,
    IpcpDestroy = 3,
    IpcpDestroyResp = 4,
    IpcpFetch = 5,
    IpcpFetchResp = 6,
    AssignToDif = 7,
    AssignToDifResp = 8,
    AppRegister = 9,
    AppRegisterResp = 10,
}

impl MsgType {
    fn from_u16(raw: u16) -> Result<Self, SerdesError> {
        Ok(match raw {
            1 => Self::IpcpCreate,
            2 => Self::IpcpCreateResp,
            3 => Self::IpcpDestroy,
            4 => Self::IpcpDestroyResp,
            5 => Self::IpcpFetch,
            6 => Self::IpcpFetchResp,
            7 => Self::AssignToDif,
            8 => Self::AssignToDifResp,
            9 => Self::AppRegister,
            10 => Self::AppRegisterResp,
            other => return Err(SerdesError::UnknownMsgType(other)),
        })
    }
}

/// Fixed layout of one message type: length of the scalar prefix and the
/// number of names following it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgLayout {
    pub copylen: usize,
    pub names: usize,
}

/// Every message starts with `msg_type: u16` and `event_id: u32`.
const BASE_LEN: usize = 6;

impl MsgType {
    /// The `{copylen, names}` row for this message type.
    pub const fn layout(self) -> MsgLayout {
        match self {
            Self::IpcpCreate => MsgLayout {
                copylen: BASE_LEN + 1,
                names: 1,
            },
            Self::IpcpCreateResp => MsgLayout {
                copylen: BASE_LEN + 3,
                names: 0,
            },
            Self::IpcpDestroy => MsgLayout {
                copylen: BASE_LEN + 2,
                names: 0,
            },
            Self::IpcpDestroyResp | Self::AssignToDifResp | Self::AppRegisterResp => MsgLayout {
                copylen: BASE_LEN + 1,
                names: 0,
            },
            Self::IpcpFetch => MsgLayout {
                copylen: BASE_LEN,
                names: 0,
            },
            Self::IpcpFetchResp => MsgLayout {
                copylen: BASE_LEN + 12,
                names: 2,
            },
            Self::AssignToDif => MsgLayout {
                copylen: BASE_LEN + 2,
                names: 1,
            },
            Self::AppRegister => MsgLayout {
                copylen: BASE_LEN + 3,
                names: 1,
            },
        }
    }
}

/// A control message between the engine and the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CtrlMsg {
    IpcpCreate {
        event_id: u32,
        dif_type: u8,
        name: RinaName,
    },
    IpcpCreateResp {
        event_id: u32,
        result: u8,
        ipcp_id: u16,
    },
    IpcpDestroy {
        event_id: u32,
        ipcp_id: u16,
    },
    IpcpDestroyResp {
        event_id: u32,
        result: u8,
    },
    IpcpFetch {
        event_id: u32,
    },
    IpcpFetchResp {
        event_id: u32,
        result: u8,
        ipcp_id: u16,
        dif_type: u8,
        addr: u64,
        ipcp_name: RinaName,
        dif_name: RinaName,
    },
    AssignToDif {
        event_id: u32,
        ipcp_id: u16,
        dif_name: RinaName,
    },
    AssignToDifResp {
        event_id: u32,
        result: u8,
    },
    AppRegister {
        event_id: u32,
        ipcp_id: u16,
        reg: bool,
        app_name: RinaName,
    },
    AppRegisterResp {
        event_id: u32,
        result: u8,
    },
}

impl CtrlMsg {
    /// This message's type tag.
    pub fn msg_type(&self) -> MsgType {
        match self {
            Self::IpcpCreate { .. } => MsgType::IpcpCreate,
            Self::IpcpCreateResp { .. } => MsgType::IpcpCreateResp,
            Self::IpcpDestroy { .. } => MsgType::IpcpDestroy,
            Self::IpcpDestroyResp { .. } => MsgType::IpcpDestroyResp,
            Self::IpcpFetch { .. } => MsgType::IpcpFetch,
            Self::IpcpFetchResp { .. } => MsgType::IpcpFetchResp,
            Self::AssignToDif { .. } => MsgType::AssignToDif,
            Self::AssignToDifResp { .. } => MsgType::AssignToDifResp,
            Self::AppRegister { .. } => MsgType::AppRegister,
            Self::AppRegisterResp { .. } => MsgType::AppRegisterResp,
        }
    }

    /// Size of this message on the wire.
    pub fn serlen(&self) -> usize {
        let layout = self.msg_type().layout();
        let names: usize = match self {
            Self::IpcpCreate { name, .. } => name.serlen(),
            Self::IpcpFetchResp {
                ipcp_name,
                dif_name,
                ..
            } => ipcp_name.serlen() + dif_name.serlen(),
            Self::AssignToDif { dif_name, .. } => dif_name.serlen(),
            Self::AppRegister { app_name, .. } => app_name.serlen(),
            _ => 0,
        };
        layout.copylen + names
    }

    /// Serialises the message: fixed prefix, then the names.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.serlen());
        let mut tag = [0u8; 2];
        LittleEndian::write_u16(&mut tag, self.msg_type() as u16);
        out.extend_from_slice(&tag);

        match self {
            Self::IpcpCreate {
                event_id,
                dif_type,
                name,
            } => {
                put_u32(&mut out, *event_id);
                out.push(*dif_type);
                name.serialize(&mut out);
            }
            Self::IpcpCreateResp {
                event_id,
                result,
                ipcp_id,
            } => {
                put_u32(&mut out, *event_id);
                out.push(*result);
                put_u16(&mut out, *ipcp_id);
            }
            Self::IpcpDestroy { event_id, ipcp_id } => {
                put_u32(&mut out, *event_id);
                put_u16(&mut out, *ipcp_id);
            }
            Self::IpcpDestroyResp { event_id, result }
            | Self::AssignToDifResp { event_id, result }
            | Self::AppRegisterResp { event_id, result } => {
                put_u32(&mut out, *event_id);
                out.push(*result);
            }
            Self::IpcpFetch { event_id } => {
                put_u32(&mut out, *event_id);
            }
            Self::IpcpFetchResp {
                event_id,
                result,
                ipcp_id,
                dif_type,
                addr,
                ipcp_name,
                dif_name,
            } => {
                put_u32(&mut out, *event_id);
                out.push(*result);
                put_u16(&mut out, *ipcp_id);
                out.push(*dif_type);
                put_u64(&mut out, *addr);
                ipcp_name.serialize(&mut out);
                dif_name.serialize(&mut out);
            }
            Self::AssignToDif {
                event_id,
                ipcp_id,
                dif_name,
            } => {
                put_u32(&mut out, *event_id);
                put_u16(&mut out, *ipcp_id);
                dif_name.serialize(&mut out);
            }
            Self::AppRegister {
                event_id,
                ipcp_id,
                reg,
                app_name,
            } => {
                put_u32(&mut out, *event_id);
                put_u16(&mut out, *ipcp_id);
                out.push(u8::from(*reg));
                app_name.serialize(&mut out);
            }
        }
        out
    }

    /// Deserialises a message, consuming `serbuf` exactly: leftover or
    /// missing bytes make the message malformed.
    pub fn deserialize(serbuf: &[u8]) -> Result<Self, SerdesError> {
        let mut r = Reader::new(serbuf);
        let msg_type = MsgType::from_u16(r.u16()?)?;

        let msg = match msg_type {
            MsgType::IpcpCreate => Self::IpcpCreate {
                event_id: r.u32()?,
                dif_type: r.u8()?,
                name: RinaName::deserialize(&mut r)?,
            },
            MsgType::IpcpCreateResp => Self::IpcpCreateResp {
                event_id: r.u32()?,
                result: r.u8()?,
                ipcp_id: r.u16()?,
            },
            MsgType::IpcpDestroy => Self::IpcpDestroy {
                event_id: r.u32()?,
                ipcp_id: r.u16()?,
            },
            MsgType::IpcpDestroyResp => Self::IpcpDestroyResp {
                event_id: r.u32()?,
                result: r.u8()?,
            },
            MsgType::IpcpFetch => Self::IpcpFetch {
                event_id: r.u32()?,
            },
            MsgType::IpcpFetchResp => Self::IpcpFetchResp {
                event_id: r.u32()?,
                result: r.u8()?,
                ipcp_id: r.u16()?,
                dif_type: r.u8()?,
                addr: r.u64()?,
                ipcp_name: RinaName::deserialize(&mut r)?,
                dif_name: RinaName::deserialize(&mut r)?,
            },
            MsgType::AssignToDif => Self::AssignToDif {
                event_id: r.u32()?,
                ipcp_id: r.u16()?,
                dif_name: RinaName::deserialize(&mut r)?,
            },
            MsgType::AssignToDifResp => Self::AssignToDifResp {
                event_id: r.u32()?,
                result: r.u8()?,
            },
            MsgType::AppRegister => Self::AppRegister {
                event_id: r.u32()?,
                ipcp_id: r.u16()?,
                reg: r.u8()? != 0,
                app_name: RinaName::deserialize(&mut r)?,
            },
            MsgType::AppRegisterResp => Self::AppRegisterResp {
                event_id: r.u32()?,
                result: r.u8()?,
            },
        };

        let extra = r.remaining();
        if extra != 0 {
            return Err(SerdesError::TrailingBytes { extra });
        }
        Ok(msg)
    }
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    let mut b = [0u8; 2];
    LittleEndian::write_u16(&mut b, v);
    out.extend_from_slice(&b);
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    let mut b = [0u8; 4];
    LittleEndian::write_u32(&mut b, v);
    out.extend_from_slice(&b);
}

fn put_u64(out: &mut Vec<u8>, v: u64) {
    let mut b = [0u8; 8];
    LittleEndian::write_u64(&mut b, v);
    out.extend_from_slice(&b);
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], SerdesError> {
        if self.remaining() < len {
            return Err(SerdesError::Truncated {
                need: len,
                have: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, SerdesError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, SerdesError> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    fn u32(&mut self) -> Result<u32, SerdesError> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    fn u64(&mut self) -> Result<u64, SerdesError> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_roundtrip_full() {
        let name = RinaName::new("rinaperf-data", "client", "1", "7");
        let msg = CtrlMsg::AssignToDif {
            event_id: 3,
            ipcp_id: 1,
            dif_name: name.clone(),
        };
        let wire = msg.serialize();
        assert_eq!(wire.len(), msg.serlen());
        let back = CtrlMsg::deserialize(&wire).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_name_roundtrip_null_components() {
        for name in [
            RinaName::new("app", "", "", ""),
            RinaName::new("", "", "", ""),
            RinaName::new("a", "", "e", ""),
        ] {
            let msg = CtrlMsg::IpcpCreate {
                event_id: 0,
                dif_type: 1,
                name: name.clone(),
            };
            let back = CtrlMsg::deserialize(&msg.serialize()).unwrap();
            assert_eq!(
                back,
                msg,
                "name {name} must survive the wire"
            );
        }
    }

    #[test]
    fn test_name_display_format() {
        let name = RinaName::new("apn", "api", "", "aei");
        assert_eq!(name.to_string(), "apn/api//aei");
    }

    #[test]
    fn test_component_cap_255() {
        let long = "x".repeat(400);
        let name = RinaName::new(&long, "", "", "");
        assert_eq!(name.serlen(), 4 + 255);
        let msg = CtrlMsg::IpcpCreate {
            event_id: 0,
            dif_type: 0,
            name,
        };
        let back = CtrlMsg::deserialize(&msg.serialize()).unwrap();
        match back {
            CtrlMsg::IpcpCreate { name, .. } => {
                assert_eq!(name.apn.unwrap().len(), 255);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_two_name_message() {
        let msg = CtrlMsg::IpcpFetchResp {
            event_id: 9,
            result: 0,
            ipcp_id: 4,
            dif_type: 2,
            addr: 7001,
            ipcp_name: RinaName::new("normal.ipcp", "8", "", ""),
            dif_name: RinaName::new("n.DIF", "", "", ""),
        };
        let wire = msg.serialize();
        assert_eq!(wire.len(), msg.serlen());
        assert_eq!(CtrlMsg::deserialize(&wire).unwrap(), msg);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let msg = CtrlMsg::IpcpFetch { event_id: 1 };
        let mut wire = msg.serialize();
        wire.push(0);
        assert_eq!(
            CtrlMsg::deserialize(&wire),
            Err(SerdesError::TrailingBytes { extra: 1 })
        );
    }

    #[test]
    fn test_truncated_rejected() {
        let msg = CtrlMsg::AssignToDif {
            event_id: 3,
            ipcp_id: 1,
            dif_name: RinaName::new("slice", "", "", ""),
        };
        let wire = msg.serialize();
        for cut in [1, 4, 8, wire.len() - 1] {
            assert!(
                matches!(
                    CtrlMsg::deserialize(&wire[..cut]),
                    Err(SerdesError::Truncated { .. })
                ),
                "cut at {cut} must fail"
            );
        }
    }

    #[test]
    fn test_unknown_type_rejected() {
        let wire = [0xFFu8, 0x7F, 0, 0, 0, 0];
        assert_eq!(
            CtrlMsg::deserialize(&wire),
            Err(SerdesError::UnknownMsgType(0x7FFF))
        );
    }

    #[test]
    fn test_bad_utf8_rejected() {
        let msg = CtrlMsg::IpcpCreate {
            event_id: 0,
            dif_type: 0,
            name: RinaName::new("ab", "", "", ""),
        };
        let mut wire = msg.serialize();
        // Corrupt the first name byte.
        let idx = wire.len() - 5;
        wire[idx] = 0xFF;
        assert_eq!(CtrlMsg::deserialize(&wire), Err(SerdesError::BadString));
    }

    #[test]
    fn test_layout_table_matches_serialized_prefix() {
        // The scalar prefix of every message must match the tabulated
        // copylen: a message with all-null names serialises to exactly
        // copylen + 4 bytes per name (the four length bytes).
        let null = RinaName::default();
        let cases: Vec<CtrlMsg> = vec![
            CtrlMsg::IpcpCreate {
                event_id: 0,
                dif_type: 0,
                name: null.clone(),
            },
            CtrlMsg::IpcpCreateResp {
                event_id: 0,
                result: 0,
                ipcp_id: 0,
            },
            CtrlMsg::IpcpDestroy {
                event_id: 0,
                ipcp_id: 0,
            },
            CtrlMsg::IpcpDestroyResp {
                event_id: 0,
                result: 0,
            },
            CtrlMsg::IpcpFetch { event_id: 0 },
            CtrlMsg::IpcpFetchResp {
                event_id: 0,
                result: 0,
                ipcp_id: 0,
                dif_type: 0,
                addr: 0,
                ipcp_name: null.clone(),
                dif_name: null.clone(),
            },
            CtrlMsg::AssignToDif {
                event_id: 0,
                ipcp_id: 0,
                dif_name: null.clone(),
            },
            CtrlMsg::AssignToDifResp {
                event_id: 0,
                result: 0,
            },
            CtrlMsg::AppRegister {
                event_id: 0,
                ipcp_id: 0,
                reg: true,
                app_name: null.clone(),
            },
            CtrlMsg::AppRegisterResp {
                event_id: 0,
                result: 0,
            },
        ];
        for msg in cases {
            let layout = msg.msg_type().layout();
            assert_eq!(
                msg.serialize().len(),
                layout.copylen + 4 * layout.names,
                "layout mismatch for {:?}",
                msg.msg_type()
            );
        }
    }
}
