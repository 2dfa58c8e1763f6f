use std::collections::VecDeque;
use std::thread;

use gpucmd_ipc::message::{decode_message, encode_message, Message, Request, Size};
use gpucmd_ipc::ring::{FrameRing, PopError, PushError};
use gpucmd_ipc::transport::duplex_with_capacity;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Push(Vec<u8>),
    Pop,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        proptest::collection::vec(any::<u8>(), 0..40).prop_map(Op::Push),
        Just(Op::Pop),
    ]
}

proptest! {
    // Tiny capacity to force wraparound and full-ring behaviour.
    #[test]
    fn ring_matches_queue_model(ops in proptest::collection::vec(op(), 1..400)) {
        let ring = FrameRing::new(64);
        let mut model: VecDeque<Vec<u8>> = VecDeque::new();
        for op in ops {
            match op {
                Op::Push(frame) => match ring.try_push(&frame) {
                    Ok(()) => model.push_back(frame),
                    Err(PushError::Full) => {}
                    Err(PushError::TooLarge) => prop_assert!(frame.len() > ring.max_payload_len()),
                },
                Op::Pop => match ring.try_pop() {
                    Ok(frame) => prop_assert_eq!(Some(frame), model.pop_front()),
                    Err(PopError::Empty) => prop_assert!(model.is_empty()),
                    Err(PopError::Corrupt) => prop_assert!(false, "corrupt ring"),
                },
            }
        }
    }
}

#[test]
fn messages_cross_threads_in_order() {
    let (mut client, mut service) = duplex_with_capacity(256);
    let sender = thread::spawn(move || {
        for put in 0..500 {
            let msg = Message::Post {
                route_id: 1,
                body: Request::AsyncFlush { put_offset: put },
            };
            client.send(&encode_message(&msg)).unwrap();
        }
        client
            .send(&encode_message(&Message::Post {
                route_id: 1,
                body: Request::ResizeOffscreenFrameBuffer {
                    size: Size::new(4, 4),
                },
            }))
            .unwrap();
    });

    let mut expected_put = 0;
    loop {
        let frame = match service.recv() {
            Ok(frame) => frame,
            Err(_) => break,
        };
        match decode_message(&frame).unwrap() {
            Message::Post {
                body: Request::AsyncFlush { put_offset },
                ..
            } => {
                assert_eq!(put_offset, expected_put);
                expected_put += 1;
            }
            Message::Post {
                body: Request::ResizeOffscreenFrameBuffer { size },
                ..
            } => assert_eq!(size, Size::new(4, 4)),
            other => panic!("unexpected {other:?}"),
        }
    }
    sender.join().unwrap();
    assert_eq!(expected_put, 500);
}
