//! S/MIME envelope removal through `openssl smime`.
//!
//! Only the content is extracted: `-noverify -nosigs` skips both certificate
//! chain and signature checks, so nothing here says anything about trust.

use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::debug;

use crate::error::{MailError, Result};
use crate::model::part::HASH_HEADER;
use crate::model::MailPart;
use crate::section::{Materializer, Section};
use crate::walk::session::CancelToken;

/// Default limit for one `openssl smime` run.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const BASE64_LINE: usize = 76;

/// `true` for the opaque S/MIME media types.
pub fn is_smime(content_type: &str) -> bool {
    matches!(
        content_type,
        "application/pkcs7-mime" | "application/x-pkcs7-mime"
    )
}

/// Runs `openssl smime -verify -noverify -nosigs` over an entity.
#[derive(Debug, Clone)]
pub struct SmimeUnwrapper {
    openssl: PathBuf,
    timeout: Duration,
}

impl Default for SmimeUnwrapper {
    fn default() -> Self {
        Self::new("openssl")
    }
}

impl SmimeUnwrapper {
    pub fn new(openssl: impl Into<PathBuf>) -> Self {
        Self {
            openssl: openssl.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &Path {
        &self.openssl
    }

    /// Unwrap `part` if it is S/MIME; other parts get their own body back.
    pub fn unwrap_part(
        &self,
        part: &MailPart,
        materializer: &Materializer,
        cancel: &CancelToken,
    ) -> Result<Section> {
        if !is_smime(part.content_type()) {
            return Ok(Section::from_vec(part.body().as_bytes().to_vec()));
        }
        self.run_with(|out| write_entity(part, out), materializer, cancel)
    }

    /// Pipe `entity` through openssl and materialize what it prints.
    pub fn run(
        &self,
        entity: &[u8],
        materializer: &Materializer,
        cancel: &CancelToken,
    ) -> Result<Section> {
        self.run_with(|out| out.write_all(entity), materializer, cancel)
    }

    /// Like [`run`](Self::run), with stdin produced by `feed` on its own thread.
    fn run_with<F>(
        &self,
        feed: F,
        materializer: &Materializer,
        cancel: &CancelToken,
    ) -> Result<Section>
    where
        F: FnOnce(&mut dyn Write) -> io::Result<()> + Send,
    {
        let program = self.openssl.display().to_string();
        let mut child = Command::new(&self.openssl)
            .args(["smime", "-verify", "-noverify", "-nosigs"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| MailError::SmimeSpawn {
                program: program.clone(),
                source,
            })?;
        debug!(program = %program, "Running openssl smime");

        let (Some(mut stdin), Some(stdout), Some(mut stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            kill(&mut child);
            return Err(MailError::SmimeSpawn {
                program,
                source: io::Error::other("child pipes unavailable"),
            });
        };

        let started = Instant::now();
        thread::scope(|scope| {
            let writer = scope.spawn(move || {
                let mut out = BufWriter::new(&mut stdin);
                feed(&mut out)?;
                out.flush()
            });
            let output = scope.spawn(move || materializer.materialize(stdout));
            let errors = scope.spawn(move || {
                let mut buf = Vec::new();
                stderr.read_to_end(&mut buf).map(|_| buf)
            });

            let status = loop {
                if let Some(status) = child
                    .try_wait()
                    .map_err(|e| MailError::io(&self.openssl, e))?
                {
                    break status;
                }
                if cancel.is_cancelled() {
                    kill(&mut child);
                    return Err(MailError::Cancelled);
                }
                if started.elapsed() >= self.timeout {
                    kill(&mut child);
                    return Err(MailError::SmimeTimeout(self.timeout));
                }
                thread::sleep(POLL_INTERVAL);
            };

            let stderr_text = match errors.join() {
                Ok(Ok(buf)) => String::from_utf8_lossy(&buf).trim().to_string(),
                _ => String::new(),
            };
            if !status.success() {
                return Err(MailError::Smime {
                    status: status.to_string(),
                    stderr: stderr_text,
                });
            }
            match writer.join() {
                Ok(Err(e)) if e.kind() != io::ErrorKind::BrokenPipe => {
                    return Err(MailError::io(&self.openssl, e));
                }
                _ => {}
            }
            output.join().unwrap_or_else(|_| {
                Err(MailError::Materialize {
                    context: "openssl output",
                    source: io::Error::other("reader thread panicked"),
                })
            })
        })
    }
}

fn kill(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Write `part` as a MIME entity with a base64 body.
///
/// Parts hold transfer-decoded bodies, so the encoding header is rewritten.
pub fn write_entity<W: Write + ?Sized>(part: &MailPart, out: &mut W) -> io::Result<()> {
    for (name, values) in part.header().iter() {
        if name.eq_ignore_ascii_case(HASH_HEADER)
            || name.eq_ignore_ascii_case("Content-Transfer-Encoding")
        {
            continue;
        }
        for value in values {
            write!(out, "{name}: {value}\r\n")?;
        }
    }
    out.write_all(b"Content-Transfer-Encoding: base64\r\n\r\n")?;
    let mut line = String::with_capacity(BASE64_LINE + 2);
    for chunk in part.body().as_bytes().chunks(BASE64_LINE / 4 * 3) {
        line.clear();
        STANDARD.encode_string(chunk, &mut line);
        line.push_str("\r\n");
        out.write_all(line.as_bytes())?;
    }
    Ok(())
}
