//! Throughput harness for the element-to-event path.
//!
//! Drives decode sessions with a synthetic engine that emits a fixed burst of
//! elements per fed buffer, then drains the queue, the same way a host would
//! between feeds.
//!
//! ## Usage
//!
//! ```sh
//! cargo run -p tracebridge-core --example queue_burst
//! ```
//!
//! ## Metrics
//!
//! - Elements classified per second
//! - Events delivered per second
//! - Peak pending events (how far the queue grew between drains)

#![allow(clippy::pedantic)]

use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use log as _;
use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;
use tracebridge_core::{
    AddressRange, DataOp, DecodeSession, DecoderConfig, ElementSink, ElementType, EngineStatus,
    InstrType, MemorySpace, ProcessOutcome, SessionConfig, SourceFormat, TraceElement,
    TraceEngine,
};

const NUM_THREADS: usize = 4;
const BUFFER_BYTES: usize = 4096;

/// Emits `burst` elements per data call, one in four unmodelled.
struct SyntheticEngine {
    burst: usize,
    next_addr: u64,
}

impl TraceEngine for SyntheticEngine {
    fn create_decoder(&mut self, _config: &DecoderConfig) -> Result<(), EngineStatus> {
        Ok(())
    }

    fn add_memory_image(
        &mut self,
        _range: AddressRange,
        _space: MemorySpace,
        _path: &Path,
        _file_offset: u64,
    ) -> Result<(), EngineStatus> {
        Ok(())
    }

    fn process(
        &mut self,
        op: DataOp,
        index: u64,
        data: &[u8],
        sink: &mut dyn ElementSink,
    ) -> ProcessOutcome {
        if op == DataOp::Flush {
            return ProcessOutcome::ok(0);
        }

        for n in 0..self.burst {
            let element = if n % 4 == 3 {
                TraceElement::new(ElementType::Timestamp)
            } else {
                TraceElement {
                    elem_type: ElementType::InstrRange,
                    st_addr: self.next_addr,
                    en_addr: self.next_addr + 0x20,
                    last_instr_type: if n % 2 == 0 {
                        InstrType::Br
                    } else {
                        InstrType::BrIndirect
                    },
                    ..TraceElement::default()
                }
            };
            self.next_addr = self.next_addr.wrapping_add(0x20);
            if sink.on_element(index, 0x10, &element).is_fatal() {
                return ProcessOutcome {
                    status: EngineStatus::DataDecodeFatal,
                    consumed: 0,
                };
            }
        }
        ProcessOutcome::ok(data.len())
    }
}

#[derive(Debug, Clone, Copy)]
struct BurstResult {
    burst: usize,
    elements_per_second: f64,
    events_per_second: f64,
    peak_pending: usize,
}

fn benchmark_burst(burst: usize, duration: Duration) -> BurstResult {
    let (tx, rx) = mpsc::channel();

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|_| {
            let tx = tx.clone();
            thread::spawn(move || {
                let mut engine = Some(SyntheticEngine {
                    burst,
                    next_addr: 0x40_0000,
                });
                let Ok(mut session) = DecodeSession::create(
                    move |_format: SourceFormat| engine.take().ok_or(EngineStatus::Fail),
                    SessionConfig::default(),
                ) else {
                    return;
                };

                let buffer = [0_u8; BUFFER_BYTES];
                let mut index = 0_u64;
                let mut elements = 0_u64;
                let mut events = 0_u64;
                let mut peak = 0_usize;
                let start = Instant::now();

                while start.elapsed() < duration {
                    if session.feed(&buffer, index).is_err() {
                        break;
                    }
                    index += BUFFER_BYTES as u64;
                    elements += burst as u64;
                    peak = peak.max(session.pending_events());
                    events += session.drain().count() as u64;
                }

                tx.send((elements, events, peak)).ok();
            })
        })
        .collect();

    for h in handles {
        h.join().ok();
    }

    drop(tx);

    let mut total_elements = 0_u64;
    let mut total_events = 0_u64;
    let mut peak_pending = 0_usize;
    for (elements, events, peak) in rx {
        total_elements += elements;
        total_events += events;
        peak_pending = peak_pending.max(peak);
    }

    let elapsed_secs = duration.as_secs_f64();
    BurstResult {
        burst,
        elements_per_second: total_elements as f64 / elapsed_secs,
        events_per_second: total_events as f64 / elapsed_secs,
        peak_pending,
    }
}

fn format_number(n: f64) -> String {
    if n >= 1_000_000.0 {
        format!("{:.2}M", n / 1_000_000.0)
    } else if n >= 1_000.0 {
        format!("{:.2}K", n / 1_000.0)
    } else {
        format!("{:.2}", n)
    }
}

fn main() {
    let duration = Duration::from_secs(2);
    let results: Vec<_> = [16, 256, 4096]
        .into_iter()
        .map(|burst| benchmark_burst(burst, duration))
        .collect();

    println!("threads: {NUM_THREADS}, buffer: {BUFFER_BYTES} bytes");
    println!(
        "{:>8} │ {:>14} │ {:>14} │ {:>12}",
        "burst", "elements/sec", "events/sec", "peak pending"
    );
    for result in &results {
        println!(
            "{:>8} │ {:>14} │ {:>14} │ {:>12}",
            result.burst,
            format_number(result.elements_per_second),
            format_number(result.events_per_second),
            result.peak_pending
        );
    }
}
