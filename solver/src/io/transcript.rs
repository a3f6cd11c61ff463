//! JSONL transcript of every agent call in a run.
//!
//! Tracing covers developer diagnostics; the transcript is the product
//! artifact for inspecting what each role was asked and answered.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::warn;

use crate::io::agent::{LanguageAgent, Role};

#[derive(Debug, Serialize)]
struct TranscriptEntry<'a> {
    seq: u64,
    role: &'static str,
    elapsed_ms: u64,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Shared, append-only transcript file.
pub struct Transcript {
    writer: Mutex<BufWriter<File>>,
    seq: AtomicU64,
}

impl Transcript {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create transcript dir {}", parent.display()))?;
        }
        let file = File::create(path)
            .with_context(|| format!("create transcript {}", path.display()))?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            seq: AtomicU64::new(1),
        })
    }

    fn record(&self, entry: &TranscriptEntry<'_>) -> Result<()> {
        let mut line = serde_json::to_string(entry).context("serialize transcript entry")?;
        line.push('\n');
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow!("transcript lock poisoned"))?;
        writer
            .write_all(line.as_bytes())
            .context("write transcript entry")?;
        writer.flush().context("flush transcript")
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }
}

/// Agent decorator that records each call in a [`Transcript`].
pub struct Transcribed<'t, A> {
    inner: A,
    role: Role,
    transcript: &'t Transcript,
}

impl<'t, A: LanguageAgent> Transcribed<'t, A> {
    pub fn new(inner: A, role: Role, transcript: &'t Transcript) -> Self {
        Self {
            inner,
            role,
            transcript,
        }
    }
}

impl<A: LanguageAgent> LanguageAgent for Transcribed<'_, A> {
    fn invoke(&self, prompt: &str) -> Result<String> {
        let seq = self.transcript.next_seq();
        let start = Instant::now();
        let result = self.inner.invoke(prompt);
        let entry = TranscriptEntry {
            seq,
            role: self.role.as_str(),
            elapsed_ms: start.elapsed().as_millis() as u64,
            prompt,
            response: result.as_ref().ok().map(String::as_str),
            error: result.as_ref().err().map(|err| format!("{err:#}")),
        };
        // A broken transcript must not fail the run.
        if let Err(err) = self.transcript.record(&entry) {
            warn!(err = %err, "failed to record transcript entry");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedAgent;

    #[test]
    fn records_one_line_per_call() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("logs/transcript.jsonl");
        let transcript = Transcript::create(&path).expect("create");
        let agent = Transcribed::new(
            ScriptedAgent::new(["first"]),
            Role::Critic,
            &transcript,
        );

        assert_eq!(agent.invoke("p1").expect("first"), "first");
        assert!(agent.invoke("p2").is_err());

        let contents = fs::read_to_string(&path).expect("read");
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["seq"], 1);
        assert_eq!(lines[0]["role"], "critic");
        assert_eq!(lines[0]["response"], "first");
        assert_eq!(lines[1]["prompt"], "p2");
        assert!(lines[1]["error"].as_str().expect("error").contains("exhausted"));
    }
}
