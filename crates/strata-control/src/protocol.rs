//! Line-delimited JSON message contract.
//!
//! Each request and response is one JSON object tagged by `"type"`. Decoder
//! queries never fail at the message level: malformed code disassembles to
//! `"invalid"` and has length `0`.

use serde::{Deserialize, Serialize};
use strata_cpu_core::StateSnapshot;
use strata_x86::SegReg;

use crate::{BlockReport, ControlError, EmulatorControl};

/// Disassembly text reported for bytes that do not decode.
pub const INVALID: &str = "invalid";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    ExecuteBlock,
    ExecuteBlockAt {
        eip: u32,
    },
    GetState,
    SetState {
        state: StateSnapshot,
    },
    SetPhysicalMemory {
        addr: u32,
        bytes: Vec<u8>,
    },
    GetPhysicalPage {
        page: u32,
    },
    GetLinearPage {
        page: u32,
    },
    /// `seg` indexes ES, CS, SS, DS, FS, GS in snapshot order.
    ReadSegmented {
        seg: u8,
        offset: u32,
        len: usize,
    },
    Disassemble {
        bytes: Vec<u8>,
        #[serde(default = "default_count")]
        count: usize,
        #[serde(default)]
        is_32bit: bool,
    },
    InstructionLength {
        bytes: Vec<u8>,
        #[serde(default)]
        is_32bit: bool,
    },
}

fn default_count() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Block(BlockReport),
    State { state: StateSnapshot },
    Ok,
    Page { bytes: Vec<u8> },
    Memory { bytes: Vec<u8> },
    Disassembly { text: String },
    Length { len: usize },
    Error { message: String },
}

/// Run one request against `control`.
pub fn handle<C: EmulatorControl + ?Sized>(control: &mut C, request: Request) -> Response {
    let result = match request {
        Request::ExecuteBlock => control.execute_block().map(Response::Block),
        Request::ExecuteBlockAt { eip } => control.execute_block_at(eip).map(Response::Block),
        Request::GetState => Ok(Response::State {
            state: control.get_state(),
        }),
        Request::SetState { state } => {
            control.set_state(&state);
            Ok(Response::Ok)
        }
        Request::SetPhysicalMemory { addr, bytes } => control
            .set_physical_memory(addr, &bytes)
            .map(|()| Response::Ok),
        Request::GetPhysicalPage { page } => control
            .get_physical_page(page)
            .map(|bytes| Response::Page { bytes }),
        Request::GetLinearPage { page } => control
            .get_linear_page(page)
            .map(|bytes| Response::Page { bytes }),
        Request::ReadSegmented { seg, offset, len } => SegReg::from_index(seg)
            .ok_or(ControlError::NoSuchSegment(seg))
            .and_then(|seg| control.read_segmented(seg, offset, len))
            .map(|bytes| Response::Memory { bytes }),
        Request::Disassemble {
            bytes,
            count,
            is_32bit,
        } => Ok(Response::Disassembly {
            text: control
                .disassemble(&bytes, count, is_32bit)
                .unwrap_or_else(|_| INVALID.to_string()),
        }),
        Request::InstructionLength { bytes, is_32bit } => Ok(Response::Length {
            len: control.instruction_length(&bytes, is_32bit).unwrap_or(0),
        }),
    };
    result.unwrap_or_else(|err| Response::Error {
        message: format!("{err:#}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_use_snake_case_tags() {
        let req: Request =
            serde_json::from_str(r#"{"type":"execute_block_at","eip":256}"#).unwrap();
        assert_eq!(req, Request::ExecuteBlockAt { eip: 256 });

        let req: Request = serde_json::from_str(r#"{"type":"disassemble","bytes":[144]}"#).unwrap();
        assert_eq!(
            req,
            Request::Disassemble {
                bytes: vec![0x90],
                count: 1,
                is_32bit: false
            }
        );
    }

    #[test]
    fn snapshot_travels_as_word_array() {
        let json = serde_json::to_string(&Response::State {
            state: StateSnapshot([7; 42]),
        })
        .unwrap();
        assert!(json.starts_with(r#"{"type":"state","state":[7,7,"#));
    }

    #[test]
    fn short_snapshot_is_rejected() {
        let err = serde_json::from_str::<Request>(r#"{"type":"set_state","state":[1,2,3]}"#);
        assert!(err.is_err());
    }
}
