//! IQ capture readers: 2-channel WAV or raw interleaved i16.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use color_eyre::eyre::{eyre, Result};
use num_complex::Complex64;

pub enum IqReader {
    Wav {
        reader: hound::WavReader<BufReader<File>>,
        sample_rate: u32,
    },
    Raw {
        reader: BufReader<File>,
        sample_rate: u32,
    },
}

impl IqReader {
    /// Open a capture. `raw` carries the sample rate for headerless
    /// interleaved i16 files; WAV otherwise, which must be two-channel.
    pub fn open(path: &Path, raw: Option<u32>) -> Result<Self> {
        if let Some(rate) = raw {
            return Ok(IqReader::Raw {
                reader: BufReader::new(File::open(path)?),
                sample_rate: rate,
            });
        }
        let reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        if spec.channels != 2 {
            return Err(eyre!(
                "need a 2-channel IQ WAV, got {} channel(s)",
                spec.channels
            ));
        }
        Ok(IqReader::Wav {
            sample_rate: spec.sample_rate,
            reader,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        match self {
            IqReader::Wav { sample_rate, .. } | IqReader::Raw { sample_rate, .. } => *sample_rate,
        }
    }

    /// Append up to `max` complex samples; returns the count read.
    pub fn read_block(&mut self, out: &mut Vec<Complex64>, max: usize) -> Result<usize> {
        let start = out.len();
        match self {
            IqReader::Wav { reader, .. } => {
                let spec = reader.spec();
                match spec.sample_format {
                    hound::SampleFormat::Float => {
                        let mut samples = reader.samples::<f32>();
                        while out.len() - start < max {
                            let i = match samples.next() {
                                Some(v) => v?,
                                None => break,
                            };
                            let q = match samples.next() {
                                Some(v) => v?,
                                None => break,
                            };
                            out.push(Complex64::new(f64::from(i), f64::from(q)));
                        }
                    }
                    hound::SampleFormat::Int => {
                        let scale = 1.0 / f64::from(1i32 << (spec.bits_per_sample - 1));
                        let mut samples = reader.samples::<i32>();
                        while out.len() - start < max {
                            let i = match samples.next() {
                                Some(v) => v?,
                                None => break,
                            };
                            let q = match samples.next() {
                                Some(v) => v?,
                                None => break,
                            };
                            out.push(Complex64::new(
                                f64::from(i) * scale,
                                f64::from(q) * scale,
                            ));
                        }
                    }
                }
            }
            IqReader::Raw { reader, .. } => {
                let mut buf = [0u8; 4];
                while out.len() - start < max {
                    match reader.read_exact(&mut buf) {
                        Ok(()) => {
                            let i = i16::from_le_bytes([buf[0], buf[1]]);
                            let q = i16::from_le_bytes([buf[2], buf[3]]);
                            out.push(Complex64::new(
                                f64::from(i) / 32768.0,
                                f64::from(q) / 32768.0,
                            ));
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
        Ok(out.len() - start)
    }
}
