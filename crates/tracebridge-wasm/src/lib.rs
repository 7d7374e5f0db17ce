use serde::{Deserialize, Serialize};
use std::path::Path;
use tracebridge_core::{
    AddressRange, DataOp, DecodeError, DecoderConfig, ElementSink, EngineStatus, FlatEvent,
    MemorySpace, ProcessOutcome, RegisterPayload, SessionConfig, SessionHandle, SourceFormat,
    TraceElement, TraceEngine,
};
use wasm_bindgen::prelude::*;

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = console)]
    fn log(s: &str);
}

macro_rules! console_log {
    ($($t:tt)*) => (log(&format!($($t)*)))
}

#[wasm_bindgen]
extern "C" {
    /// Host-side decode engine.
    ///
    /// Status returns use the stable engine status codes (0 = ok).
    pub type JsTraceEngine;

    #[wasm_bindgen(method, js_name = createTree)]
    fn create_tree(this: &JsTraceEngine, frame_formatted: bool, mem_aligned: bool) -> u32;

    #[wasm_bindgen(method, js_name = createDecoder)]
    fn create_decoder(this: &JsTraceEngine, config: JsValue) -> u32;

    #[wasm_bindgen(method, js_name = addImage)]
    fn add_image(
        this: &JsTraceEngine,
        path: &str,
        start: u64,
        end: u64,
        file_offset: u64,
    ) -> u32;

    #[wasm_bindgen(method, js_name = processData)]
    fn process_data(
        this: &JsTraceEngine,
        flush: bool,
        index: u64,
        data: &js_sys::Uint8Array,
    ) -> JsValue;
}

/// JS-facing decoder description passed to `createDecoder`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DecoderPayload {
    pub decoder: String,
    pub trace_id: u8,
    pub arch: String,
    pub profile: String,
    pub registers: Vec<u32>,
}

impl From<&DecoderConfig> for DecoderPayload {
    fn from(config: &DecoderConfig) -> Self {
        let registers = match config.arch.registers {
            RegisterPayload::EtmV3(regs) => vec![regs.reg_idr],
            RegisterPayload::EtmV4(regs) => vec![
                regs.reg_idr0,
                regs.reg_idr1,
                regs.reg_idr2,
                regs.reg_idr8,
                regs.reg_configr,
            ],
        };
        Self {
            decoder: config.arch.decoder.name().to_owned(),
            trace_id: config.trace_id,
            arch: format!("{:?}", config.arch.arch),
            profile: format!("{:?}", config.arch.profile),
            registers,
        }
    }
}

/// Reply expected from `processData`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessReply {
    pub status: u32,
    pub consumed: usize,
    pub elements: Vec<TraceElement>,
}

impl ProcessReply {
    /// Delivers the reported elements, stopping when the sink refuses one.
    fn replay(self, index: u64, trace_id: u8, sink: &mut dyn ElementSink) -> ProcessOutcome {
        for element in &self.elements {
            if sink.on_element(index, trace_id, element).is_fatal() {
                return ProcessOutcome {
                    status: EngineStatus::DataDecodeFatal,
                    consumed: 0,
                };
            }
        }
        ProcessOutcome {
            status: status_from_host(self.status),
            consumed: self.consumed,
        }
    }
}

fn status_from_host(code: u32) -> EngineStatus {
    EngineStatus::from_u32(code).unwrap_or(EngineStatus::Fail)
}

/// [`TraceEngine`] backed by a JS object.
struct JsEngine {
    inner: JsTraceEngine,
    trace_id: u8,
}

impl TraceEngine for JsEngine {
    fn create_decoder(&mut self, config: &DecoderConfig) -> Result<(), EngineStatus> {
        let payload = serde_wasm_bindgen::to_value(&DecoderPayload::from(config))
            .map_err(|_| EngineStatus::InvalidParam)?;
        self.trace_id = config.trace_id;
        status_from_host(self.inner.create_decoder(payload)).into_result()
    }

    fn add_memory_image(
        &mut self,
        range: AddressRange,
        _space: MemorySpace,
        path: &Path,
        file_offset: u64,
    ) -> Result<(), EngineStatus> {
        let path = path.to_str().ok_or(EngineStatus::FileError)?;
        let status = self
            .inner
            .add_image(path, range.start, range.end, file_offset);
        status_from_host(status).into_result()
    }

    fn process(
        &mut self,
        op: DataOp,
        index: u64,
        data: &[u8],
        sink: &mut dyn ElementSink,
    ) -> ProcessOutcome {
        let bytes = js_sys::Uint8Array::from(data);
        let raw = self.inner.process_data(op == DataOp::Flush, index, &bytes);
        match serde_wasm_bindgen::from_value::<ProcessReply>(raw) {
            Ok(reply) => reply.replay(index, self.trace_id, sink),
            Err(err) => {
                console_log!("processData returned an unreadable reply: {err}");
                ProcessOutcome {
                    status: EngineStatus::Fail,
                    consumed: 0,
                }
            }
        }
    }
}

/// `{ ok, value?, error? }` envelope returned to JS.
#[derive(Serialize)]
struct Reply<T> {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Converts `value` for JS, with 64-bit integers as `BigInt`.
///
/// Addresses above 2^53 are common (AArch64 kernel space) and would not
/// survive as JS numbers.
fn to_js<T: Serialize + ?Sized>(value: &T) -> Result<JsValue, JsError> {
    let serializer =
        serde_wasm_bindgen::Serializer::new().serialize_large_number_types_as_bigints(true);
    value
        .serialize(&serializer)
        .map_err(|err| JsError::new(&err.to_string()))
}

fn reply<T: Serialize>(result: Result<T, DecodeError>) -> Result<JsValue, JsError> {
    let envelope = match result {
        Ok(value) => Reply {
            ok: true,
            value: Some(value),
            error: None,
        },
        Err(err) => {
            web_sys::console::warn_1(&JsValue::from_str(&err.to_string()));
            Reply {
                ok: false,
                value: None,
                error: Some(err.to_string()),
            }
        }
    };
    to_js(&envelope)
}

#[wasm_bindgen]
pub struct WasmDecoder {
    handle: SessionHandle<JsEngine>,
    /// Popped event whose conversion failed; handed out before the queue.
    unsent: Option<FlatEvent>,
}

#[wasm_bindgen]
impl WasmDecoder {
    /// Creates a decode session over `engine`.
    ///
    /// A rejected decoder configuration still yields a decoder; check
    /// `has_error` afterwards.
    ///
    /// # Errors
    ///
    /// Fails when the event queue cannot be allocated or the host refuses to
    /// create a decode tree.
    #[wasm_bindgen(constructor)]
    pub fn new(
        protocol: i32,
        trace_id: u8,
        arch: i32,
        engine: JsTraceEngine,
    ) -> Result<Self, JsError> {
        console_error_panic_hook::set_once();

        let mut engine = Some(engine);
        let factory = move |format: SourceFormat| -> Result<JsEngine, EngineStatus> {
            let inner = engine.take().ok_or(EngineStatus::BadHandle)?;
            let (frame_formatted, mem_aligned) = match format {
                SourceFormat::FrameFormatted { mem_aligned } => (true, mem_aligned),
                SourceFormat::Single => (false, false),
            };
            status_from_host(inner.create_tree(frame_formatted, mem_aligned)).into_result()?;
            Ok(JsEngine { inner, trace_id })
        };

        let handle = SessionHandle::create(factory, SessionConfig::new(protocol, trace_id, arch))
            .map_err(|err| JsError::new(&err.to_string()))?;
        console_log!("decoder created for trace id {trace_id:#04x}, arch selector {arch}");
        Ok(Self {
            handle,
            unsent: None,
        })
    }

    /// Registers a memory image. Returns `{ ok, error? }`.
    ///
    /// # Errors
    ///
    /// Throws only when the result envelope cannot be built.
    pub fn add_image(
        &mut self,
        path: &str,
        load_address: u64,
        file_offset: u64,
        size: u64,
    ) -> Result<JsValue, JsError> {
        reply(self.handle.add_image(path, load_address, file_offset, size))
    }

    /// Feeds trace bytes. Returns `{ ok, value: consumed }` or `{ ok: false, error }`.
    ///
    /// `consumed` is a plain number: it never exceeds the length of `data`.
    ///
    /// # Errors
    ///
    /// Throws only when the result envelope cannot be built.
    pub fn feed(&mut self, data: &[u8], index: u64) -> Result<JsValue, JsError> {
        let consumed = self
            .handle
            .feed(data, index)
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX));
        reply(consumed)
    }

    /// Flushes buffered elements. Returns `{ ok, error? }`.
    ///
    /// # Errors
    ///
    /// Throws only when the result envelope cannot be built.
    pub fn flush(&mut self) -> Result<JsValue, JsError> {
        reply(self.handle.flush())
    }

    /// Pops the next event as a flat record, or `undefined` once the queue is
    /// empty. 64-bit fields arrive as `BigInt`.
    ///
    /// # Errors
    ///
    /// Throws when the record cannot be converted. The event is kept and
    /// returned again by the next call.
    pub fn next_event(&mut self) -> Result<JsValue, JsError> {
        let Some(event) = self
            .unsent
            .take()
            .or_else(|| self.handle.next_event().map(FlatEvent::from))
        else {
            return Ok(JsValue::UNDEFINED);
        };
        to_js(&event).inspect_err(|_| self.unsent = Some(event))
    }

    #[must_use]
    pub fn has_error(&self) -> bool {
        self.handle.has_error()
    }

    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.handle.error_message().map(str::to_owned)
    }

    /// Releases the session; safe to call more than once.
    pub fn destroy(&mut self) -> bool {
        self.unsent = None;
        self.handle.destroy()
    }
}

#[cfg(test)]
mod tests {
    use super::{DecoderPayload, ProcessReply};
    use tracebridge_core::{
        ArchVersion, DatapathResponse, ElementSink, ElementType, EngineStatus, SessionConfig,
        TraceElement,
    };

    #[derive(Default)]
    struct Recorder {
        seen: Vec<ElementType>,
        refuse_after: Option<usize>,
    }

    impl ElementSink for Recorder {
        fn on_element(
            &mut self,
            _index: u64,
            _trace_id: u8,
            element: &TraceElement,
        ) -> DatapathResponse {
            if self.refuse_after == Some(self.seen.len()) {
                return DatapathResponse::FatalSysError;
            }
            self.seen.push(element.elem_type);
            DatapathResponse::Continue
        }
    }

    #[test]
    fn etmv4_payload_lists_minimal_registers() {
        let config = SessionConfig::new(0, 0x10, 4).decoder_config();
        let payload = DecoderPayload::from(&config);
        assert_eq!(payload.decoder, "ETMV4I");
        assert_eq!(payload.arch, "V8");
        assert_eq!(
            payload.registers,
            vec![0x2800_0EA1, 0x4100_F403, 0x0000_0488, 0, 0x0000_00C1]
        );

        let json = serde_json::to_value(&payload).expect("serialize payload");
        assert_eq!(json["traceId"], 0x10);
        assert_eq!(json["profile"], "CortexA");
    }

    #[test]
    fn etmv3_payload_has_single_register() {
        let config = SessionConfig {
            arch: ArchVersion::EtmV3,
            ..SessionConfig::default()
        }
        .decoder_config();
        let payload = DecoderPayload::from(&config);
        assert_eq!(payload.decoder, "ETMV3");
        assert_eq!(payload.arch, "V7");
        assert_eq!(payload.registers, vec![0]);
    }

    #[test]
    fn host_reply_is_replayed_in_order() {
        let reply: ProcessReply = serde_json::from_str(
            r#"{
                "status": 8,
                "consumed": 32,
                "elements": [
                    { "elem_type": "TraceOn", "st_addr": 4096 },
                    { "elem_type": "InstrRange", "st_addr": 4096, "en_addr": 4112,
                      "last_instr_type": "Br" }
                ]
            }"#,
        )
        .expect("parse reply");

        let mut sink = Recorder::default();
        let outcome = reply.replay(0, 0x10, &mut sink);
        assert_eq!(outcome.status, EngineStatus::UnsupportedDecodePacket);
        assert_eq!(outcome.consumed, 32);
        assert_eq!(sink.seen, vec![ElementType::TraceOn, ElementType::InstrRange]);
    }

    #[test]
    fn refused_element_stops_replay() {
        let reply = ProcessReply {
            status: 0,
            consumed: 16,
            elements: vec![
                TraceElement::new(ElementType::TraceOn),
                TraceElement::new(ElementType::TraceOff),
                TraceElement::new(ElementType::TraceOn),
            ],
        };
        let mut sink = Recorder {
            refuse_after: Some(1),
            ..Recorder::default()
        };

        let outcome = reply.replay(0, 0x10, &mut sink);
        assert_eq!(outcome.status, EngineStatus::DataDecodeFatal);
        assert_eq!(outcome.consumed, 0);
        assert_eq!(sink.seen, vec![ElementType::TraceOn]);
    }

    #[test]
    fn unknown_host_status_is_a_failure() {
        let reply = ProcessReply {
            status: 999,
            ..ProcessReply::default()
        };
        let outcome = reply.replay(0, 0, &mut Recorder::default());
        assert_eq!(outcome.status, EngineStatus::Fail);
    }
}
