// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Lock-free single-producer single-consumer ring of samples. Samples are
/// stored as f32 bits so neither side needs unsafe access.
pub struct RingBuffer {
    buffer: Box<[AtomicU32]>,
    /// Always a power of two.
    capacity: usize,
    read_pos: AtomicUsize,
    write_pos: AtomicUsize,
}

impl RingBuffer {
    /// Creates a ring holding at least `capacity - 1` samples.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        Self {
            buffer: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
            capacity,
            read_pos: AtomicUsize::new(0),
            write_pos: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples ready to read.
    #[inline]
    pub fn available(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        write.wrapping_sub(read) & (self.capacity - 1)
    }

    /// Samples that can be written without overtaking the reader.
    #[inline]
    pub fn space(&self) -> usize {
        self.capacity - self.available() - 1
    }

    /// Writes as many samples as fit. Returns the number written.
    pub fn write(&self, samples: &[f32]) -> usize {
        let count = self.space().min(samples.len());
        let write = self.write_pos.load(Ordering::Acquire);
        let mask = self.capacity - 1;
        for (offset, sample) in samples[..count].iter().enumerate() {
            self.buffer[(write + offset) & mask].store(sample.to_bits(), Ordering::Relaxed);
        }
        self.write_pos.store((write + count) & mask, Ordering::Release);
        count
    }

    /// Reads as many samples as are available. Returns the number read.
    pub fn read(&self, output: &mut [f32]) -> usize {
        let count = self.available().min(output.len());
        let read = self.read_pos.load(Ordering::Acquire);
        let mask = self.capacity - 1;
        for (offset, sample) in output[..count].iter_mut().enumerate() {
            *sample = f32::from_bits(self.buffer[(read + offset) & mask].load(Ordering::Relaxed));
        }
        self.read_pos.store((read + count) & mask, Ordering::Release);
        count
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_capacity_rounds_up() {
        let ring = RingBuffer::new(1000);
        assert_eq!(ring.capacity(), 1024);
        assert_eq!(ring.space(), 1023);
        assert_eq!(ring.available(), 0);
    }

    #[test]
    fn test_wraps_around() {
        let ring = RingBuffer::new(8);
        assert_eq!(ring.write(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]), 6);
        let mut out = [0.0; 4];
        assert_eq!(ring.read(&mut out), 4);
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0]);

        // Only 5 slots free: one is always kept empty.
        assert_eq!(ring.write(&[7.0, 8.0, 9.0, 10.0, 11.0, 12.0]), 5);
        let mut out = [0.0; 10];
        assert_eq!(ring.read(&mut out), 7);
        assert_eq!(&out[..7], &[5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0]);
        assert_eq!(ring.read(&mut out), 0);
    }

    #[test]
    fn test_producer_consumer_threads() {
        let ring = Arc::new(RingBuffer::new(64));
        let producer = {
            let ring = ring.clone();
            thread::spawn(move || {
                let mut next = 0.0f32;
                while next < 10000.0 {
                    if ring.write(&[next]) == 1 {
                        next += 1.0;
                    } else {
                        thread::yield_now();
                    }
                }
            })
        };

        let mut expected = 0.0f32;
        let mut out = [0.0; 16];
        while expected < 10000.0 {
            let read = ring.read(&mut out);
            for sample in &out[..read] {
                assert_eq!(*sample, expected);
                expected += 1.0;
            }
            if read == 0 {
                thread::yield_now();
            }
        }
        producer.join().unwrap();
    }
}
