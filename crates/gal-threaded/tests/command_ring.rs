use gal_threaded::ring::{command_ring, RingConsumer, RingProducer};
use std::collections::VecDeque;

struct Rng(u64);

impl Rng {
    fn new(seed: u64) -> Self {
        Self(seed)
    }

    fn next_u32(&mut self) -> u32 {
        let mut x = self.0;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.0 = x;
        ((x.wrapping_mul(0x2545F4914F6CDD1D)) >> 32) as u32
    }

    fn gen_range(&mut self, max_exclusive: u32) -> u32 {
        if max_exclusive == 0 {
            return 0;
        }
        self.next_u32() % max_exclusive
    }

    fn fill_bytes(&mut self, buf: &mut [u8]) {
        for b in buf {
            *b = (self.next_u32() & 0xFF) as u8;
        }
    }
}

fn try_push(producer: &mut RingProducer, msg: &[u8]) -> bool {
    match producer.try_allocate() {
        Some(mut slot) => {
            slot.bytes_mut().copy_from_slice(msg);
            slot.publish();
            true
        }
        None => false,
    }
}

fn try_pop(consumer: &mut RingConsumer) -> Option<Vec<u8>> {
    let msg = consumer.front()?.1.to_vec();
    consumer.advance();
    Some(msg)
}

#[test]
fn command_ring_single_thread_fuzz() {
    // Tiny capacity to force wraparound and full-ring behaviour.
    const SLOT: usize = 17;
    let (mut producer, mut consumer) = command_ring(8, SLOT);
    let mut model: VecDeque<Vec<u8>> = VecDeque::new();

    let mut rng = Rng::new(0x1234_5678_9ABC_DEF0);
    for _ in 0..50_000 {
        match rng.gen_range(3) {
            0 => {
                let mut msg = vec![0u8; SLOT];
                rng.fill_bytes(&mut msg);
                if try_push(&mut producer, &msg) {
                    model.push_back(msg);
                } else {
                    assert_eq!(model.len(), producer.capacity() - 1);
                }
            }
            1 => match try_pop(&mut consumer) {
                Some(v) => {
                    let expected = model.pop_front().expect("model has data");
                    assert_eq!(v, expected);
                }
                None => assert!(model.is_empty()),
            },
            _ => {
                let mut msg = vec![0u8; SLOT];
                rng.fill_bytes(&mut msg);
                if try_push(&mut producer, &msg) {
                    model.push_back(msg);
                }
                if let Some(v) = try_pop(&mut consumer) {
                    let expected = model.pop_front().expect("model has data");
                    assert_eq!(v, expected);
                }
            }
        }
        assert_eq!(consumer.pending(), model.len());
    }

    while let Some(v) = try_pop(&mut consumer) {
        let expected = model.pop_front().expect("model has data");
        assert_eq!(v, expected);
    }
    assert!(model.is_empty());
}

#[test]
fn command_ring_spsc_concurrent() {
    let (mut producer, mut consumer) = command_ring(64, 9);

    const N: u32 = 100_000;

    let t_prod = std::thread::spawn(move || {
        let mut wakeups = 0u32;
        for i in 0..N {
            let mut slot = producer.allocate();
            let bytes = slot.bytes_mut();
            bytes[..4].copy_from_slice(&i.to_le_bytes());
            bytes[8] = (i % 21) as u8;
            if slot.publish() {
                wakeups += 1;
            }
        }
        assert!(wakeups >= 1);
        producer
    });

    let t_cons = std::thread::spawn(move || {
        for i in 0..N {
            let got = loop {
                if let Some((_, bytes)) = consumer.front() {
                    let value = u32::from_le_bytes(bytes[..4].try_into().unwrap());
                    assert_eq!(bytes[8], (value % 21) as u8);
                    break value;
                }
                std::hint::spin_loop();
            };
            assert_eq!(got, i);
            consumer.advance();
        }
        consumer
    });

    let producer = t_prod.join().unwrap();
    let consumer = t_cons.join().unwrap();
    assert!(consumer.is_empty());
    assert_eq!(producer.pending(), 0);
}

#[test]
fn command_ring_slot_indices_wrap_with_the_mask() {
    let (mut producer, mut consumer) = command_ring(4, 1);
    let mut seen = Vec::new();
    for _ in 0..10 {
        let slot = producer.allocate();
        seen.push(slot.index());
        slot.publish();
        assert_eq!(consumer.front().map(|(index, _)| index), seen.last().copied());
        consumer.advance();
    }
    assert_eq!(seen, vec![0, 1, 2, 3, 0, 1, 2, 3, 0, 1]);
}
