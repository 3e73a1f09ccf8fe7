//! Performance benchmarks for the protocol hot paths

use rudp::heap::ReorderBuffer;
use rudp::io::DatagramSocket;
use rudp::scheduler::TimerQueue;
use rudp::{
    Address, ConnectionMultiplexer, Handler, HandlerFactory, Packet, RudpConfig,
    RudpConnectionFactory,
};
use std::cell::RefCell;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Benchmarks packet encoding and decoding of full-size segments
#[test]
fn benchmark_packet_codec() {
    let packet = Packet::new(
        12345,
        Address::new("10.0.0.2", 9001),
        Address::new("10.0.0.1", 9000),
    )
    .with_ack(54321)
    .with_more_fragments(3)
    .with_payload(vec![0xab; 1000]);

    let iterations = 1_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let datagram = packet.encode();
        let decoded = Packet::decode(&datagram).unwrap();
        assert_eq!(decoded.sequence_number(), 12345);
    }

    let duration = start.elapsed();
    println!(
        "Packet codec: {} roundtrips in {:?} ({:.2} μs/roundtrip)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should handle 1000 full-size roundtrips in under 1 second
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks the reorder buffer with fully reversed arrival order
#[test]
fn benchmark_reorder_buffer() {
    let dest = Address::new("10.0.0.2", 9001);
    let source = Address::new("10.0.0.1", 9000);
    let packets: Vec<Packet> = (0..10_000u32)
        .rev()
        .map(|seq| Packet::new(seq, dest.clone(), source.clone()).with_payload(vec![1; 16]))
        .collect();

    let start = Instant::now();

    let mut buffer = ReorderBuffer::new();
    for packet in packets {
        buffer.push(packet);
    }
    let mut expected = 0;
    while let Some(message) = buffer.pop_min_and_all_fragments() {
        assert_eq!(message[0].sequence_number(), expected);
        expected += 1;
    }

    let duration = start.elapsed();
    println!("Reorder buffer: {} packets in {:?}", expected, duration);

    assert_eq!(expected, 10_000);
    // Should complete in under 500ms
    assert!(duration.as_millis() < 500);
}

/// Benchmarks a bulk transfer between two in-memory nodes
#[test]
fn benchmark_in_memory_transfer() {
    let sender_addr: SocketAddr = "10.0.0.1:9000".parse().unwrap();
    let receiver_addr: SocketAddr = "10.0.0.2:9001".parse().unwrap();

    let (mut sender, _) = memory_node(sender_addr);
    let (mut receiver, delivered) = memory_node(receiver_addr);

    let messages = 200;
    let message_size = 2_500;
    let peer = Address::from(receiver_addr);

    let start = Instant::now();

    sender.connect(peer.clone()).unwrap();
    for i in 0..messages {
        let message = vec![(i % 256) as u8; message_size];
        sender.send_message(&peer, &message).unwrap();
    }

    let mut steps = 0;
    while delivered.borrow().len() < messages && steps < 100_000 {
        shuttle(&mut sender, &mut receiver);
        let next = [sender.next_deadline(), receiver.next_deadline()]
            .into_iter()
            .flatten()
            .min();
        match next {
            Some(now) => {
                sender.fire_expired(now);
                receiver.fire_expired(now);
            }
            None => break,
        }
        steps += 1;
    }
    shuttle(&mut sender, &mut receiver);

    let duration = start.elapsed();
    let delivered = delivered.borrow();
    println!(
        "In-memory transfer: {} messages of {} bytes in {:?} ({} logical ms, {} steps)",
        delivered.len(),
        message_size,
        duration,
        sender.scheduler().now().as_millis(),
        steps
    );

    assert_eq!(delivered.len(), messages);
    for (i, message) in delivered.iter().enumerate() {
        assert_eq!(message.len(), message_size);
        assert!(message.iter().all(|&b| b == (i % 256) as u8));
    }
    // Nothing was lost, so no retransmission timeout should have been needed
    assert!(sender.scheduler().now() < Duration::from_secs(5));
    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

type MemoryNode = ConnectionMultiplexer<MemorySocket, TimerQueue>;
type Delivered = Rc<RefCell<Vec<Vec<u8>>>>;

/// Lossless socket that keeps outgoing datagrams until they are shuttled
struct MemorySocket {
    local_addr: SocketAddr,
    outbox: Vec<Vec<u8>>,
}

impl DatagramSocket for MemorySocket {
    fn send_to(&mut self, datagram: &[u8], _addr: SocketAddr) -> io::Result<()> {
        self.outbox.push(datagram.to_vec());
        Ok(())
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local_addr)
    }

    fn close(&mut self) {}
}

struct CollectingHandler {
    delivered: Delivered,
}

impl Handler for CollectingHandler {
    fn receive_message(&mut self, message: Vec<u8>) {
        self.delivered.borrow_mut().push(message);
    }

    fn handle_shutdown(&mut self) {}
}

struct CollectingHandlerFactory {
    delivered: Delivered,
}

impl HandlerFactory for CollectingHandlerFactory {
    fn make_new_handler(
        &mut self,
        _own: &Address,
        _source: &Address,
        _relay: &Address,
    ) -> Box<dyn Handler> {
        Box::new(CollectingHandler {
            delivered: Rc::clone(&self.delivered),
        })
    }
}

fn memory_node(local_addr: SocketAddr) -> (MemoryNode, Delivered) {
    let delivered = Delivered::default();
    let handlers = CollectingHandlerFactory {
        delivered: Rc::clone(&delivered),
    };
    let factory = RudpConnectionFactory::new(handlers, RudpConfig::default());
    let socket = MemorySocket {
        local_addr,
        outbox: Vec::new(),
    };
    let factory = Box::new(factory);
    let node =
        ConnectionMultiplexer::new(socket, TimerQueue::new(), factory, local_addr.ip(), false)
            .unwrap();
    (node, delivered)
}

/// Delivers queued datagrams in both directions until both outboxes are empty
fn shuttle(a: &mut MemoryNode, b: &mut MemoryNode) {
    let a_addr = a.socket().local_addr;
    let b_addr = b.socket().local_addr;
    loop {
        let from_a = std::mem::take(&mut a.socket_mut().outbox);
        let from_b = std::mem::take(&mut b.socket_mut().outbox);
        if from_a.is_empty() && from_b.is_empty() {
            break;
        }
        for datagram in from_a {
            b.on_datagram(&datagram, a_addr);
        }
        for datagram in from_b {
            a.on_datagram(&datagram, b_addr);
        }
    }
}
