use std::io::Cursor;

use strata_control::protocol::{Request, Response, INVALID};
use strata_control::server::serve;
use strata_control::{ControlConfig, ControlError, EmulatorControl, ExitKind, LocalControl};
use strata_cpu_core::state::CpuMode;
use strata_x86::SegReg;

fn control(mode: CpuMode) -> LocalControl {
    LocalControl::new(&ControlConfig {
        memory_size: 1 << 20,
        start_mode: mode,
        ..ControlConfig::default()
    })
}

#[test]
fn executes_blocks_and_reports_exits() {
    let mut ctl = control(CpuMode::Real);
    // mov ax, 2; jmp +0; inc ax; hlt
    ctl.set_physical_memory(0x100, &[0xB8, 0x02, 0x00, 0xEB, 0x00, 0x40, 0xF4])
        .unwrap();

    let first = ctl.execute_block_at(0x100).unwrap();
    assert_eq!(first.exit, ExitKind::Jump);
    assert_eq!(first.instructions, 2);
    assert_eq!((first.cs, first.eip), (0, 0x105));

    let second = ctl.execute_block().unwrap();
    assert_eq!(second.exit, ExitKind::Halt);
    assert_eq!(second.eip, 0x107);
    assert_eq!(ctl.get_state().words()[0], 3);

    // A halted processor stays put until redirected.
    let idle = ctl.execute_block().unwrap();
    assert_eq!(idle.exit, ExitKind::Halt);
    assert_eq!(idle.instructions, 0);
}

#[test]
fn faults_carry_vector_and_error_code() {
    let mut ctl = control(CpuMode::Protected);
    // mov ax, 0x2b; mov ds, ax (GDT is empty)
    ctl.set_physical_memory(0x1000, &[0x66, 0xB8, 0x2B, 0x00, 0x8E, 0xD8])
        .unwrap();
    let report = ctl.execute_block_at(0x1000).unwrap();
    assert_eq!(report.exit, ExitKind::Fault);
    assert_eq!(report.vector, Some(13));
    assert_eq!(report.error_code, Some(0x28));
    assert_eq!(report.eip, 0x1004);
}

#[test]
fn state_round_trips_through_set_state() {
    let mut ctl = control(CpuMode::Protected);
    let mut words = *ctl.get_state().words();
    words[0] = 0xDEAD_BEEF;
    words[8] = 0x4000;
    ctl.set_state_words(&words).unwrap();

    let state = ctl.get_state();
    assert_eq!(state.words(), &words);
    ctl.set_state(&state);
    assert_eq!(ctl.get_state(), state);

    assert!(matches!(
        ctl.set_state_words(&words[..41]),
        Err(ControlError::Snapshot(_))
    ));
}

#[test]
fn memory_writes_invalidate_cached_code() {
    let mut ctl = control(CpuMode::Real);
    ctl.set_physical_memory(0x100, &[0xB0, 0x01, 0xF4]).unwrap();
    ctl.execute_block_at(0x100).unwrap();
    assert_eq!(ctl.get_state().words()[0] & 0xFF, 1);
    assert_eq!(ctl.vcpu().cache().len(), 1);

    ctl.set_physical_memory(0x101, &[0x07]).unwrap();
    assert!(ctl.vcpu().cache().is_empty());
    ctl.execute_block_at(0x100).unwrap();
    assert_eq!(ctl.get_state().words()[0] & 0xFF, 7);

    let page = ctl.get_physical_page(0).unwrap();
    assert_eq!(page.len(), 4096);
    assert_eq!(&page[0x100..0x103], &[0xB0, 0x07, 0xF4]);
}

#[test]
fn out_of_range_memory_is_an_error() {
    let mut ctl = control(CpuMode::Real);
    assert!(matches!(
        ctl.set_physical_memory(0xFFFFF, &[1, 2]),
        Err(ControlError::OutOfRange { addr: 0xFFFFF, len: 2 })
    ));
    assert!(matches!(
        ctl.get_physical_page(0x100),
        Err(ControlError::NoSuchPage(0x100))
    ));
}

#[test]
fn linear_and_segmented_reads() {
    let mut ctl = control(CpuMode::Real);
    ctl.set_physical_memory(0x12345, &[0xAA, 0xBB]).unwrap();
    let page = ctl.get_linear_page(0x12).unwrap();
    assert_eq!(&page[0x345..0x347], &[0xAA, 0xBB]);

    // DS = 0x1234 (selector word 13, base word 19)
    let mut words = *ctl.get_state().words();
    words[13] = 0x1234;
    words[19] = 0x12340;
    ctl.set_state_words(&words).unwrap();
    assert_eq!(ctl.read_segmented(SegReg::Ds, 5, 2).unwrap(), vec![0xAA, 0xBB]);
    assert_eq!(ctl.read_segmented(SegReg::Es, 0x12345, 1).unwrap(), vec![0xAA]);
    assert!(matches!(
        ctl.read_segmented(SegReg::Ds, 0xF_0000, 4),
        Err(ControlError::OutOfRange { addr: 0x10_2340, len: 4 })
    ));

    let responses = run_session(
        &mut ctl,
        &[
            r#"{"type":"read_segmented","seg":3,"offset":5,"len":2}"#,
            r#"{"type":"read_segmented","seg":9,"offset":0,"len":1}"#,
        ],
    );
    assert_eq!(
        responses[0],
        Response::Memory {
            bytes: vec![0xAA, 0xBB]
        }
    );
    assert!(matches!(responses[1], Response::Error { .. }));
}

#[test]
fn decoder_queries() {
    let ctl = control(CpuMode::Real);
    assert_eq!(ctl.instruction_length(&[0x66, 0x05, 1, 2, 3, 4], false).unwrap(), 6);
    assert_eq!(
        ctl.disassemble(&[0x01, 0xD8], 1, true).unwrap(),
        "00000000: add eax, ebx"
    );
    assert!(ctl.disassemble(&[0x0F, 0xFF], 1, false).is_err());
}

fn run_session(ctl: &mut LocalControl, requests: &[&str]) -> Vec<Response> {
    let input = requests.join("\n");
    let mut out = Vec::new();
    let stats = serve(ctl, Cursor::new(input), &mut out).unwrap();
    assert_eq!(stats.requests as usize, requests.len());
    String::from_utf8(out)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn json_session_over_stream() {
    let mut ctl = control(CpuMode::Real);
    let responses = run_session(
        &mut ctl,
        &[
            r#"{"type":"set_physical_memory","addr":256,"bytes":[64,244]}"#,
            r#"{"type":"execute_block_at","eip":256}"#,
            r#"{"type":"disassemble","bytes":[15,255]}"#,
            r#"{"type":"instruction_length","bytes":[184]}"#,
            r#"{"type":"get_physical_page","page":4096}"#,
            "not json",
        ],
    );
    assert_eq!(responses[0], Response::Ok);
    match &responses[1] {
        Response::Block(report) => {
            assert_eq!(report.exit, ExitKind::Halt);
            assert_eq!(report.instructions, 2);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(
        responses[2],
        Response::Disassembly {
            text: INVALID.to_string()
        }
    );
    assert_eq!(responses[3], Response::Length { len: 0 });
    assert!(matches!(responses[4], Response::Error { .. }));
    assert!(matches!(responses[5], Response::Error { .. }));
}

#[test]
fn state_request_round_trip() {
    let mut ctl = control(CpuMode::Real);
    let state = ctl.get_state();
    let set = serde_json::to_string(&Request::SetState { state }).unwrap();
    let responses = run_session(&mut ctl, &[&set, r#"{"type":"get_state"}"#]);
    assert_eq!(responses[0], Response::Ok);
    assert_eq!(responses[1], Response::State { state });
}
