//! Decoding of notification payloads into channel samples.

use crate::error::PayloadSizeError;

/// One reading instant: a value per channel, in channel order.
pub type Sample = Vec<f32>;

/// Splits fixed-size payloads into the sub-samples packed per notification.
///
/// The armband packs more than one logical sample into each radio packet to
/// keep the notification rate down, so a 16 byte payload carries two
/// consecutive 8 channel samples. Readings are signed bytes.
pub struct Decoder {
    channel_count: usize,
    samples_per_notification: usize,
}

impl Decoder {
    pub fn new(channel_count: usize, samples_per_notification: usize) -> Decoder {
        Self {
            channel_count,
            samples_per_notification,
        }
    }

    pub fn expected_len(&self) -> usize {
        self.channel_count * self.samples_per_notification
    }

    /// Decode a payload into its sub-samples, oldest first. A payload of any
    /// other size is rejected whole; partial packets are never emitted.
    pub fn decode(&self, payload: &[u8]) -> Result<Vec<Sample>, PayloadSizeError> {
        if payload.len() != self.expected_len() {
            return Err(PayloadSizeError {
                expected: self.expected_len(),
                actual: payload.len(),
            });
        }
        Ok(payload
            .chunks(self.channel_count)
            .map(|chunk| chunk.iter().map(|&b| b as i8 as f32).collect())
            .collect())
    }
}

#[test]
fn test_decoding() {
    let decoder = Decoder::new(8, 2);
    let payload: Vec<u8> = (0u8..16).collect();

    let samples = decoder.decode(&payload).unwrap();
    assert_eq!(samples.len(), 2);
    assert_eq!(samples[0], vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
    assert_eq!(
        samples[1],
        vec![8.0, 9.0, 10.0, 11.0, 12.0, 13.0, 14.0, 15.0]
    );
}

#[test]
fn test_signed_readings() {
    let decoder = Decoder::new(2, 1);
    let samples = decoder.decode(&[0xff, 0x80]).unwrap();
    assert_eq!(samples, vec![vec![-1.0, -128.0]]);
}

#[test]
fn test_wrong_size_rejected() {
    let decoder = Decoder::new(8, 2);
    let err = decoder.decode(&[0u8; 15]).unwrap_err();
    assert_eq!(
        err,
        PayloadSizeError {
            expected: 16,
            actual: 15
        }
    );
}
