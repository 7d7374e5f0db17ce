//! JS-facing decoder coverage: envelopes, event records and destruction.

#![cfg(target_arch = "wasm32")]
#![allow(clippy::pedantic, clippy::nursery)]

use std::cell::Cell;
use std::rc::Rc;

use js_sys::{BigInt, Object, Reflect, Uint8Array};
use serde::Serialize;
use tracebridge_core::{ElementType, InstrType, TraceElement};
use tracebridge_wasm::{JsTraceEngine, ProcessReply, WasmDecoder};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_test::wasm_bindgen_test;

/// AArch64 vector base, well above `Number.MAX_SAFE_INTEGER`.
const KERNEL_VBAR: u64 = 0xFFFF_0000_0000_0400;

fn to_js<T: Serialize>(value: &T) -> JsValue {
    let serializer =
        serde_wasm_bindgen::Serializer::new().serialize_large_number_types_as_bigints(true);
    value.serialize(&serializer).expect("serialize for js")
}

fn set(target: &Object, name: &str, value: &JsValue) {
    Reflect::set(target, &JsValue::from_str(name), value).expect("set property");
}

fn get(target: &JsValue, name: &str) -> JsValue {
    Reflect::get(target, &JsValue::from_str(name)).expect("get property")
}

/// Engine object answering every data call with `data_reply` and every flush
/// with an empty reply. Images based at 0 are refused.
fn stub_engine(data_reply: &ProcessReply, data_calls: &Rc<Cell<u32>>) -> JsTraceEngine {
    let engine = Object::new();
    set(
        &engine,
        "createTree",
        &Closure::<dyn Fn(bool, bool) -> u32>::new(|_, _| 0).into_js_value(),
    );
    set(
        &engine,
        "createDecoder",
        &Closure::<dyn Fn(JsValue) -> u32>::new(|_| 0).into_js_value(),
    );
    set(
        &engine,
        "addImage",
        &Closure::<dyn Fn(String, u64, u64, u64) -> u32>::new(|_, start, _, _| {
            if start == 0 {
                6
            } else {
                0
            }
        })
        .into_js_value(),
    );

    let on_data = to_js(data_reply);
    let on_flush = to_js(&ProcessReply::default());
    let calls = Rc::clone(data_calls);
    set(
        &engine,
        "processData",
        &Closure::<dyn Fn(bool, u64, Uint8Array) -> JsValue>::new(
            move |flush: bool, _index: u64, _data: Uint8Array| {
                if flush {
                    return on_flush.clone();
                }
                calls.set(calls.get() + 1);
                on_data.clone()
            },
        )
        .into_js_value(),
    );

    engine.unchecked_into::<JsTraceEngine>()
}

fn decoder(data_reply: &ProcessReply, data_calls: &Rc<Cell<u32>>) -> WasmDecoder {
    WasmDecoder::new(0, 0x10, 4, stub_engine(data_reply, data_calls))
        .map_err(JsValue::from)
        .expect("create decoder")
}

fn next(decoder: &mut WasmDecoder) -> JsValue {
    decoder
        .next_event()
        .map_err(JsValue::from)
        .expect("convert event")
}

fn envelope(result: Result<JsValue, JsError>) -> JsValue {
    result.map_err(JsValue::from).expect("build envelope")
}

fn kernel_trace() -> ProcessReply {
    ProcessReply {
        status: 0,
        consumed: 16,
        elements: vec![
            TraceElement {
                elem_type: ElementType::InstrRange,
                st_addr: KERNEL_VBAR,
                en_addr: KERNEL_VBAR + 0x40,
                last_instr_type: InstrType::Br,
                ..TraceElement::default()
            },
            TraceElement::new(ElementType::Timestamp),
            TraceElement {
                elem_type: ElementType::Exception,
                st_addr: 0x40_1000,
                exception_number: 11,
                ..TraceElement::default()
            },
        ],
    }
}

#[wasm_bindgen_test]
fn high_addresses_survive_as_bigint_and_queue_drains_fully() {
    let calls = Rc::new(Cell::new(0));
    let mut decoder = decoder(&kernel_trace(), &calls);

    let fed = envelope(decoder.feed(&[0; 16], 0));
    assert_eq!(get(&fed, "ok").as_bool(), Some(true));
    assert_eq!(get(&fed, "value").as_f64(), Some(16.0));

    let call = next(&mut decoder);
    assert_eq!(get(&call, "kind").as_f64(), Some(1.0));
    assert_eq!(get(&call, "from_addr"), JsValue::from(BigInt::from(KERNEL_VBAR)));
    assert_eq!(
        get(&call, "to_addr"),
        JsValue::from(BigInt::from(KERNEL_VBAR + 0x40))
    );
    assert_eq!(get(&call, "cpu").as_f64(), Some(-1.0));

    let exception = next(&mut decoder);
    assert_eq!(get(&exception, "kind").as_f64(), Some(5.0));
    assert_eq!(get(&exception, "exception_number").as_f64(), Some(11.0));

    assert!(next(&mut decoder).is_undefined());

    let flushed = envelope(decoder.flush());
    assert_eq!(get(&flushed, "ok").as_bool(), Some(true));
    assert!(next(&mut decoder).is_undefined());
    assert_eq!(calls.get(), 1);
}

#[wasm_bindgen_test]
fn fatal_status_is_reported_in_envelope_and_latches() {
    let calls = Rc::new(Cell::new(0));
    let reply = ProcessReply {
        status: 9,
        ..kernel_trace()
    };
    let mut decoder = decoder(&reply, &calls);

    let fed = envelope(decoder.feed(&[0; 16], 0));
    assert_eq!(get(&fed, "ok").as_bool(), Some(false));
    assert_eq!(
        get(&fed, "error").as_string().as_deref(),
        Some("decode error at index 0: bad packet sequence")
    );
    assert!(decoder.has_error());
    assert_eq!(
        decoder.error_message().as_deref(),
        Some("decode error at index 0: bad packet sequence")
    );

    let again = envelope(decoder.feed(&[0; 16], 16));
    assert_eq!(get(&again, "ok").as_bool(), Some(false));
    assert_eq!(calls.get(), 1);

    // Events decoded before the failure are still delivered.
    assert_eq!(get(&next(&mut decoder), "kind").as_f64(), Some(1.0));
    assert_eq!(get(&next(&mut decoder), "kind").as_f64(), Some(5.0));
    assert!(next(&mut decoder).is_undefined());
}

#[wasm_bindgen_test]
fn image_rejection_is_an_error_envelope() {
    let calls = Rc::new(Cell::new(0));
    let mut decoder = decoder(&ProcessReply::default(), &calls);

    let rejected = envelope(decoder.add_image("/lib/libc.so.6", 0, 0, 0x1000));
    assert_eq!(get(&rejected, "ok").as_bool(), Some(false));
    assert!(!decoder.has_error());

    let accepted = envelope(decoder.add_image("/usr/bin/app", 0x40_0000, 0, 0x1_0000));
    assert_eq!(get(&accepted, "ok").as_bool(), Some(true));
}

#[wasm_bindgen_test]
fn destroy_twice_then_calls_report_destroyed() {
    let calls = Rc::new(Cell::new(0));
    let mut decoder = decoder(&kernel_trace(), &calls);
    envelope(decoder.feed(&[0; 16], 0));

    assert!(decoder.destroy());
    assert!(!decoder.destroy());

    let fed = envelope(decoder.feed(&[0; 16], 16));
    assert_eq!(get(&fed, "ok").as_bool(), Some(false));
    assert_eq!(
        get(&fed, "error").as_string().as_deref(),
        Some("session destroyed")
    );
    assert!(next(&mut decoder).is_undefined());
    assert!(!decoder.has_error());
    assert_eq!(calls.get(), 1);
}
