//! Synthetic amplifier producing batch datagrams.
//!
//! Used by the `amp_sim` binary and by tests. The waveform generator mixes the
//! classic EEG bands with mains pickup and a little noise per channel; the
//! batch source stamps a rolling counter on every record and can reproduce the
//! two transport defects the ingest side has to cope with: duplicated
//! neighbouring datagrams and dropped batches.

use std::f32::consts::PI;

use log::{debug, trace};
use protocol::{AmplifierBatch, BatchLayout, ProtocolError};
use rand::Rng;

/// Band weights `[delta, theta, alpha, beta, gamma]` by electrode site.
const SITE_WEIGHTS: [[f32; 5]; 4] = [
    [3.0, 1.5, 0.8, 0.4, 0.1], // frontal
    [2.0, 1.2, 1.5, 0.6, 0.1], // central
    [1.5, 1.0, 2.5, 0.7, 0.1], // parietal
    [1.2, 0.8, 3.0, 0.5, 0.1], // occipital
];

/// Band centre frequencies in Hz.
const BAND_FREQS: [f32; 5] = [2.5, 6.0, 10.0, 20.0, 40.0];

/// Peak code of the summed waveform, well inside the signed 16-bit range.
const AMPLITUDE: f32 = 2500.0;

#[derive(Debug, Clone)]
pub struct EegGenerator {
    sample_rate: u32,
    weights: Vec<[f32; 5]>,
    /// Per channel: five band phases, then 50 Hz and 60 Hz mains
    phases: Vec<[f32; 7]>,
    mains: Vec<f32>,
}

impl EegGenerator {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        let mut rng = rand::thread_rng();
        debug!(
            "Initializing EEG generator: {} channels at {} Hz",
            channels, sample_rate
        );

        let weights = (0..channels)
            .map(|ch| SITE_WEIGHTS[ch % SITE_WEIGHTS.len()])
            .collect();
        let phases = (0..channels)
            .map(|_| {
                let mut p = [0.0f32; 7];
                for phase in p.iter_mut() {
                    *phase = rng.gen::<f32>() * 2.0 * PI;
                }
                p
            })
            .collect();
        // Different channels pick up different amounts of mains
        let mains = (0..channels).map(|_| rng.gen_range(0.2..0.7)).collect();

        Self {
            sample_rate: sample_rate.max(1),
            weights,
            phases,
            mains,
        }
    }

    pub fn channels(&self) -> usize {
        self.weights.len()
    }

    /// Advances one channel by one sample period and returns its ADC code.
    pub fn next_code(&mut self, channel: usize) -> i16 {
        let mut rng = rand::thread_rng();
        let rate = self.sample_rate as f32;
        let freqs = [
            BAND_FREQS[0],
            BAND_FREQS[1],
            BAND_FREQS[2],
            BAND_FREQS[3],
            BAND_FREQS[4],
            50.0,
            60.0,
        ];

        let phases = &mut self.phases[channel];
        for (phase, freq) in phases.iter_mut().zip(freqs) {
            *phase += 2.0 * PI * freq / rate;
            if *phase > 2.0 * PI {
                *phase -= 2.0 * PI;
            }
        }

        let weights = &self.weights[channel];
        let bands: f32 = (0..5).map(|i| phases[i].sin() * weights[i]).sum();
        let mains = self.mains[channel] * (phases[5].sin() * 0.7 + phases[6].sin() * 0.3);
        let noise = (rng.gen::<f32>() - 0.5) * 0.2;

        let signal = (bands + mains + noise) / 8.0;
        (signal * AMPLITUDE).clamp(i16::MIN as f32, i16::MAX as f32) as i16
    }

    /// One batch worth of sample-major interleaved codes.
    pub fn next_codes(&mut self, samples: usize) -> Vec<i16> {
        let channels = self.channels();
        let mut codes = Vec::with_capacity(samples * channels);
        for _ in 0..samples {
            for ch in 0..channels {
                codes.push(self.next_code(ch));
            }
        }
        codes
    }
}

/// Emits framed batches with a rolling counter and optional defects.
#[derive(Debug, Clone)]
pub struct BatchSource {
    generator: EegGenerator,
    layout: BatchLayout,
    counter: u8,
    produced: u64,
    duplicate_every: Option<u64>,
    drop_every: Option<u64>,
}

impl BatchSource {
    pub fn new(layout: BatchLayout, sample_rate: u32) -> Self {
        Self {
            generator: EegGenerator::new(sample_rate, layout.channels),
            layout,
            counter: 0,
            produced: 0,
            duplicate_every: None,
            drop_every: None,
        }
    }

    /// Sends every `n`th batch twice, like the amplifier's radio module does.
    pub fn duplicate_every(mut self, n: u64) -> Self {
        self.duplicate_every = (n > 0).then_some(n);
        self
    }

    /// Withholds every `n`th batch; its counter value is still consumed.
    pub fn drop_every(mut self, n: u64) -> Self {
        self.drop_every = (n > 0).then_some(n);
        self
    }

    pub fn layout(&self) -> BatchLayout {
        self.layout
    }

    /// Counter the next batch will carry.
    pub fn counter(&self) -> u8 {
        self.counter
    }

    /// Datagrams for the next batch period: none when the batch is dropped,
    /// two identical ones when it is duplicated.
    pub fn next_datagrams(&mut self) -> Result<Vec<Vec<u8>>, ProtocolError> {
        let codes = self.generator.next_codes(self.layout.samples);
        let frame = AmplifierBatch::encode(self.counter, &codes, self.layout)?;
        let counter = self.counter;
        self.counter = self.counter.wrapping_add(1);
        self.produced += 1;

        if matches!(self.drop_every, Some(n) if self.produced % n == 0) {
            trace!("Dropping batch {}", counter);
            return Ok(Vec::new());
        }
        if matches!(self.duplicate_every, Some(n) if self.produced % n == 0) {
            trace!("Duplicating batch {}", counter);
            return Ok(vec![frame.clone(), frame]);
        }
        Ok(vec![frame])
    }
}
