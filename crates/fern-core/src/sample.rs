//! Measurement records
//!
//! A [`Sample`] is the unit a node measures, queues, and delivers to the
//! gateway. The wire layout is fixed at 27 bytes so every hop can validate
//! payload sizes exactly: 7-byte [`WallTime`] followed by five LE f32
//! sensor fields.

use crate::{MeshError, MeshResult, WallTime, WALL_TIME_SIZE};

/// Encoded size of a [`Sample`] on the wire.
pub const SAMPLE_SIZE: usize = WALL_TIME_SIZE + 5 * 4;

/// One measurement, immutable once queued.
#[derive(Clone, Copy, PartialEq, Debug, Default)]
pub struct Sample {
    /// Wall-clock time of the measurement.
    pub time: WallTime,
    pub battery_voltage: f32,
    pub battery_percent: f32,
    pub temperature: f32,
    pub pressure: f32,
    pub humidity: f32,
}

impl Sample {
    pub fn encode(&self, buf: &mut [u8]) -> MeshResult<()> {
        if buf.len() < SAMPLE_SIZE {
            return Err(MeshError::BufferTooShort {
                expected: SAMPLE_SIZE,
                actual: buf.len(),
            });
        }
        self.time.encode(&mut buf[0..WALL_TIME_SIZE])?;
        let mut offset = WALL_TIME_SIZE;
        for field in [
            self.battery_voltage,
            self.battery_percent,
            self.temperature,
            self.pressure,
            self.humidity,
        ] {
            buf[offset..offset + 4].copy_from_slice(&field.to_le_bytes());
            offset += 4;
        }
        Ok(())
    }

    pub fn decode(buf: &[u8]) -> MeshResult<Self> {
        if buf.len() < SAMPLE_SIZE {
            return Err(MeshError::BufferTooShort {
                expected: SAMPLE_SIZE,
                actual: buf.len(),
            });
        }
        let time = WallTime::decode(&buf[0..WALL_TIME_SIZE])?;
        let mut fields = [0f32; 5];
        let mut offset = WALL_TIME_SIZE;
        for field in fields.iter_mut() {
            *field = f32::from_le_bytes(
                buf[offset..offset + 4]
                    .try_into()
                    .expect("fixed-width slice"),
            );
            offset += 4;
        }
        Ok(Sample {
            time,
            battery_voltage: fields[0],
            battery_percent: fields[1],
            temperature: fields[2],
            pressure: fields[3],
            humidity: fields[4],
        })
    }

    pub fn to_bytes(&self) -> [u8; SAMPLE_SIZE] {
        let mut buf = [0u8; SAMPLE_SIZE];
        self.encode(&mut buf).expect("fixed-size buffer");
        buf
    }
}
