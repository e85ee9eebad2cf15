//! Bounded log history.

use std::collections::VecDeque;

use fleetwatch_types::LogRecord;
use parking_lot::Mutex;

#[derive(Debug)]
struct Ring {
    records: VecDeque<LogRecord>,
    next_seq: u64,
    evicted: u64,
}

/// Fixed-capacity FIFO of log records. When full, appending evicts the oldest.
///
/// Appends are serialized by a short critical section, so the buffer order
/// is the arrival order and `len() <= capacity` holds at every instant.
#[derive(Debug)]
pub struct LogBuffer {
    ring: Mutex<Ring>,
    capacity: usize,
}

impl LogBuffer {
    /// Create an empty buffer. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: Mutex::new(Ring {
                records: VecDeque::with_capacity(capacity),
                next_seq: 1,
                evicted: 0,
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a record, stamping it with the next sequence number.
    /// Returns the assigned sequence number.
    pub fn append(&self, mut record: LogRecord) -> u64 {
        let mut ring = self.ring.lock();
        let seq = ring.next_seq;
        ring.next_seq += 1;
        record.seq = seq;

        if ring.records.len() == self.capacity {
            ring.records.pop_front();
            ring.evicted += 1;
        }
        ring.records.push_back(record);
        seq
    }

    /// Drop every record. Sequence numbers keep increasing afterwards.
    pub fn clear(&self) {
        self.ring.lock().records.clear();
    }

    /// Copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<LogRecord> {
        self.ring.lock().records.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ring.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.lock().records.is_empty()
    }

    /// Number of records evicted to stay within capacity.
    pub fn evicted(&self) -> u64 {
        self.ring.lock().evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use fleetwatch_types::LogLevel;
    use std::sync::Arc;

    fn record(message: &str) -> LogRecord {
        LogRecord::new("A1", DateTime::<Utc>::default(), LogLevel::Info, message)
    }

    #[test]
    fn append_assigns_increasing_seq() {
        let buffer = LogBuffer::new(10);
        assert_eq!(buffer.append(record("a")), 1);
        assert_eq!(buffer.append(record("b")), 2);

        let logs = buffer.snapshot();
        assert_eq!(logs[0].seq, 1);
        assert_eq!(logs[1].message, "b");
    }

    #[test]
    fn evicts_oldest_at_capacity() {
        let buffer = LogBuffer::new(3);
        for i in 0..5 {
            buffer.append(record(&format!("m{}", i)));
        }

        let messages: Vec<String> = buffer.snapshot().into_iter().map(|r| r.message).collect();
        assert_eq!(messages, vec!["m2", "m3", "m4"]);
        assert_eq!(buffer.evicted(), 2);
    }

    #[test]
    fn clear_empties_but_keeps_sequence() {
        let buffer = LogBuffer::new(3);
        buffer.append(record("a"));
        buffer.append(record("b"));
        buffer.clear();
        assert!(buffer.is_empty());

        assert_eq!(buffer.append(record("c")), 3);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn snapshot_is_detached_from_later_appends() {
        let buffer = LogBuffer::new(3);
        buffer.append(record("a"));
        let before = buffer.snapshot();
        buffer.append(record("b"));
        assert_eq!(before.len(), 1);
    }

    #[test]
    fn zero_capacity_holds_one() {
        let buffer = LogBuffer::new(0);
        buffer.append(record("a"));
        buffer.append(record("b"));
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.snapshot()[0].message, "b");
    }

    #[test]
    fn concurrent_appends_keep_the_most_recent() {
        use std::thread;

        let capacity = 100;
        let buffer = Arc::new(LogBuffer::new(capacity));
        let mut handles = vec![];
        for t in 0..8 {
            let buffer = buffer.clone();
            handles.push(thread::spawn(move || {
                for i in 0..250 {
                    buffer.append(record(&format!("t{}-{}", t, i)));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let logs = buffer.snapshot();
        let total = 8 * 250;
        assert_eq!(logs.len(), capacity);
        // Survivors are exactly the last `capacity` arrivals, in order
        let seqs: Vec<u64> = logs.iter().map(|r| r.seq).collect();
        let expected: Vec<u64> = ((total - capacity as u64 + 1)..=total).collect();
        assert_eq!(seqs, expected);
        assert_eq!(buffer.evicted(), total - capacity as u64);
    }
}
