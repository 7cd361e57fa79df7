//! The in-memory row of point cells a [`crate::BlockStore`] record is made
//! of, and the little-endian integer codecs shared by the block store and
//! the index log.

use parking_lot::Mutex;

use crate::point::Point;

/// One record: a fixed-length row of point cells, each independently
/// lockable so concurrent `track` calls at different positions of the same
/// record never contend with each other.
#[derive(Debug)]
pub(crate) struct RecordCells {
    cells: Box<[Mutex<Point>]>,
}

impl RecordCells {
    pub(crate) fn zeroed(record_size: usize) -> Self {
        Self { cells: (0..record_size).map(|_| Mutex::new(Point::ZERO)).collect() }
    }

    pub(crate) fn load(points: Vec<Point>) -> Self {
        Self { cells: points.into_iter().map(Mutex::new).collect() }
    }

    pub(crate) fn accumulate(&self, position: usize, total: f64, count: f64) {
        self.cells[position].lock().accumulate(total, count);
    }

    pub(crate) fn read(&self, position: usize) -> Point {
        *self.cells[position].lock()
    }

    pub(crate) fn snapshot(&self) -> Vec<Point> {
        self.cells.iter().map(|cell| *cell.lock()).collect()
    }
}

pub(crate) fn put_i64_le(buf: &mut Vec<u8>, value: i64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub(crate) fn put_u16_le(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Returns `None` rather than panicking when `bytes` is short -- callers
/// turn that into a [`crate::StrataError::Corrupt`], not a panic.
pub(crate) fn get_i64_le(bytes: &[u8]) -> Option<i64> {
    bytes.try_into().ok().map(i64::from_le_bytes)
}

pub(crate) fn get_u16_le(bytes: &[u8]) -> Option<u16> {
    bytes.try_into().ok().map(u16::from_le_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulate_then_read_round_trips() {
        let cells = RecordCells::zeroed(3);
        cells.accumulate(1, 2.0, 1.0);
        cells.accumulate(1, 3.0, 1.0);
        assert_eq!(cells.read(0), Point::ZERO);
        assert_eq!(cells.read(1), Point::new(5.0, 2.0));
    }

    #[test]
    fn codec_round_trips() {
        let mut buf = Vec::new();
        put_i64_le(&mut buf, -42);
        put_u16_le(&mut buf, 7);
        assert_eq!(get_i64_le(&buf[0..8]), Some(-42));
        assert_eq!(get_u16_le(&buf[8..10]), Some(7));
    }

    #[test]
    fn codec_rejects_short_slices() {
        assert_eq!(get_i64_le(&[1, 2, 3]), None);
        assert_eq!(get_u16_le(&[1]), None);
    }
}
