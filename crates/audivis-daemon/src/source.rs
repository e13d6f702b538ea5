//! Raw PCM input: standard input or a file, optionally looped.

use std::fs::File;
use std::io::{self, Read, Seek};
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use crate::config::StreamConfig;

enum Input {
    Stdin(io::Stdin),
    File { file: File, path: PathBuf, looped: bool },
}

/// Producer of raw s16le 48 kHz mono bytes.
pub struct PcmSource {
    input: Input,
}

impl PcmSource {
    /// Open the source named in `config`.
    ///
    /// # Errors
    /// Fails when a file source cannot be opened.
    pub fn open(config: &StreamConfig) -> Result<Self> {
        if config.is_stdin() {
            return Ok(Self { input: Input::Stdin(io::stdin()) });
        }
        let path = PathBuf::from(&config.source);
        let file = File::open(&path).with_context(|| format!("Failed to open PCM source: {path:?}"))?;
        Ok(Self { input: Input::File { file, path, looped: config.loop_source } })
    }

    /// Human-readable name for logs.
    #[must_use]
    pub fn describe(&self) -> String {
        match &self.input {
            Input::Stdin(_) => "stdin".to_string(),
            Input::File { path, .. } => path.display().to_string(),
        }
    }
}

impl Read for PcmSource {
    /// Returns 0 only when the source is exhausted. A looped file is
    /// rewound at its end; an empty looped file still reads as exhausted.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.input {
            Input::Stdin(stdin) => stdin.lock().read(buf),
            Input::File { file, path, looped } => {
                let n = file.read(buf)?;
                if n > 0 || !*looped || buf.is_empty() {
                    return Ok(n);
                }
                debug!(path = %path.display(), "Rewinding PCM source");
                file.rewind()?;
                file.read(buf)
            }
        }
    }
}
