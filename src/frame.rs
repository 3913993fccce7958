use crate::Sample;
use num::Zero;

/// One buffer per channel, all with the same capacity, moved to or from the hardware in a
/// single call. Channel `i` of a frame always corresponds to file `i` of the session.
///
/// Buffers are allocated once and reused for every iteration; callers work on slices.
pub struct Frame {
    buffs: Vec<Vec<Sample>>,
    samps_per_buff: usize,
}

impl Frame {
    pub fn new(num_channels: usize, samps_per_buff: usize) -> Self {
        Frame {
            buffs: vec![vec![Sample::zero(); samps_per_buff]; num_channels],
            samps_per_buff,
        }
    }

    pub fn num_channels(&self) -> usize {
        self.buffs.len()
    }

    /// Capacity of every channel buffer, in samples
    pub fn samps_per_buff(&self) -> usize {
        self.samps_per_buff
    }

    pub fn channel(&self, ch: usize) -> &[Sample] {
        &self.buffs[ch]
    }

    pub fn channel_mut(&mut self, ch: usize) -> &mut [Sample] {
        &mut self.buffs[ch]
    }

    pub fn channels(&self) -> impl Iterator<Item = &[Sample]> {
        self.buffs.iter().map(|b| b.as_slice())
    }

    pub fn channels_mut(&mut self) -> impl Iterator<Item = &mut [Sample]> {
        self.buffs.iter_mut().map(|b| b.as_mut_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_share_capacity() {
        let mut frame = Frame::new(3, 16);
        assert_eq!(frame.num_channels(), 3);
        assert!(frame.channels().all(|c| c.len() == 16));

        frame.channel_mut(2)[15] = Sample::new(1., -1.);
        assert_eq!(frame.channel(2)[15], Sample::new(1., -1.));
        assert_eq!(frame.channel(1)[15], Sample::zero());
    }
}
