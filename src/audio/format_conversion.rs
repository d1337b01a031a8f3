// Format conversion for cpal output buffers
//
// The render graph produces interleaved stereo f32. Devices want f32, i16 or u16 with
// any channel count: stereo goes to the first two channels, the rest get silence, and a
// mono device gets the average of both sides. Never allocates.

use cpal::{FromSample, Sample};

/// Write interleaved stereo `stereo` into the device buffer `output` of width `channels`.
/// Frames missing from `stereo` are written as silence.
#[inline]
pub fn interleave_stereo<T>(stereo: &[f32], output: &mut [T], channels: usize)
where
    T: Sample + FromSample<f32>,
{
    let channels = channels.max(1);
    let silence = T::from_sample(0.0f32);
    let mut source = stereo.chunks_exact(2);

    for frame in output.chunks_mut(channels) {
        let (left, right) = match source.next() {
            Some(pair) => (pair[0], pair[1]),
            None => (0.0, 0.0),
        };

        match frame {
            [mono] => *mono = T::from_sample((left + right) * 0.5),
            [l, r, rest @ ..] => {
                *l = T::from_sample(left);
                *r = T::from_sample(right);
                rest.fill(silence);
            }
            [] => {}
        }
    }
}
