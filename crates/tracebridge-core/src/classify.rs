//! Translation of engine elements into flat events.

use crate::engine::{DatapathResponse, ElementSink, ElementType, InstrType, TraceElement};
use crate::error::{DecodeError, ErrorLatch};
use crate::event::{Event, EventKind, UNKNOWN_CPU};
use crate::queue::EventQueue;

/// Maps one element to at most one event.
///
/// Instruction ranges are split by the engine's classification of their
/// terminating branch: indirect branches become [`EventKind::Return`], direct
/// branches become [`EventKind::Call`]. Elements with no counterpart in the
/// event model yield `None`.
#[must_use]
pub fn classify(element: &TraceElement) -> Option<Event> {
    let from = element.st_addr;
    let to = element.en_addr;

    let kind = match element.elem_type {
        ElementType::InstrRange => match element.last_instr_type {
            InstrType::BrIndirect => EventKind::Return { from, to },
            InstrType::Br => EventKind::Call { from, to },
            _ => EventKind::InstructionRange { from, to },
        },
        ElementType::TraceOn => EventKind::TraceOn { from },
        ElementType::TraceOff => EventKind::TraceOff { from },
        ElementType::Exception => EventKind::Exception {
            from,
            number: element.exception_number,
        },
        ElementType::ExceptionReturn => EventKind::ExceptionReturn { from },
        _ => return None,
    };

    let cpu = if kind.is_range() {
        element_cpu(element)
    } else {
        UNKNOWN_CPU
    };
    Some(Event::new(kind, element.timestamp, cpu))
}

fn element_cpu(element: &TraceElement) -> i32 {
    if element.context.ctxt_id_valid {
        i32::try_from(element.context.ctxt_id).unwrap_or(UNKNOWN_CPU)
    } else {
        UNKNOWN_CPU
    }
}

/// Sink installed on the engine for the duration of one feed or flush call.
#[derive(Debug)]
pub struct Classifier<'a> {
    queue: &'a mut EventQueue,
    latch: &'a mut ErrorLatch,
}

impl<'a> Classifier<'a> {
    /// Borrows the session queue and latch for one engine call.
    pub fn new(queue: &'a mut EventQueue, latch: &'a mut ErrorLatch) -> Self {
        Self { queue, latch }
    }
}

impl ElementSink for Classifier<'_> {
    fn on_element(
        &mut self,
        index: u64,
        _trace_id: u8,
        element: &TraceElement,
    ) -> DatapathResponse {
        if self.latch.is_set() {
            return DatapathResponse::FatalSysError;
        }

        let Some(event) = classify(element) else {
            log::trace!("dropping {:?} element at index {index}", element.elem_type);
            return DatapathResponse::Continue;
        };

        match self.queue.push(event) {
            Ok(()) => DatapathResponse::Continue,
            Err(err) => {
                self.latch.latch(DecodeError::QueueExhausted(err));
                DatapathResponse::FatalSysError
            }
        }
    }
}
