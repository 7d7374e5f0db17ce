#![no_main]

use std::collections::VecDeque;

use libfuzzer_sys::fuzz_target;
use tracebridge_core::{
    classify, Classifier, ElementSink, ElementType, ErrorLatch, EventQueue, InstrType,
    TraceElement,
};

const ELEMENT_TYPES: [ElementType; 8] = [
    ElementType::InstrRange,
    ElementType::TraceOn,
    ElementType::TraceOff,
    ElementType::Exception,
    ElementType::ExceptionReturn,
    ElementType::Timestamp,
    ElementType::NoSync,
    ElementType::PeContext,
];

const INSTR_TYPES: [InstrType; 3] = [InstrType::Other, InstrType::Br, InstrType::BrIndirect];

fn element(chunk: &[u8]) -> TraceElement {
    let mut addr = [0_u8; 8];
    addr[..chunk.len().min(8)].copy_from_slice(&chunk[..chunk.len().min(8)]);
    let st_addr = u64::from_le_bytes(addr);
    let selector = chunk.first().copied().unwrap_or(0);

    let mut element =
        TraceElement::new(ELEMENT_TYPES[usize::from(selector) % ELEMENT_TYPES.len()]);
    element.st_addr = st_addr;
    element.en_addr = st_addr.wrapping_add(u64::from(selector));
    element.last_instr_type = INSTR_TYPES[usize::from(selector >> 4) % INSTR_TYPES.len()];
    element.exception_number = u32::from(selector);
    element
}

fuzz_target!(|data: &[u8]| {
    let Some((&limit_shift, ops)) = data.split_first() else {
        return;
    };
    let limit = 1_usize << (limit_shift % 12).max(1);

    let Ok(mut queue) = EventQueue::with_limit(2, limit) else {
        return;
    };
    let mut latch = ErrorLatch::new();
    let mut model = VecDeque::new();

    for chunk in ops.chunks(9) {
        if chunk[0] & 0x80 == 0 {
            let element = element(&chunk[1..]);
            let expected = classify(&element);
            let pushed_before = queue.len();
            let response = Classifier::new(&mut queue, &mut latch).on_element(0, 0, &element);
            if response.is_fatal() {
                assert!(latch.is_set());
                assert!(queue.len() <= pushed_before);
                break;
            }
            if let Some(event) = expected {
                model.push_back(event);
            }
        } else {
            assert_eq!(queue.pop(), model.pop_front());
        }
        assert_eq!(queue.len(), model.len());
        assert!(queue.capacity() <= limit);
    }

    assert!(queue.drain().eq(model.drain(..)));
});
