//! Request body sources
//!
//! Bodies are described, not loaded: files and stdin are read by the engine
//! through its [`crate::loader::ResourceLoader`] when the request executes.

use std::fmt;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::Stream;

/// Stream of upload chunks.
pub type UploadStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Which `-d`-family flag produced a data part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    /// `-d` / `--data` / `--data-ascii`: `@file` is read with newlines stripped
    Ascii,
    /// `--data-raw`: never reads files
    Raw,
    /// `--data-binary`: `@file` is read verbatim
    Binary,
    /// `--data-urlencode`
    UrlEncode,
    /// `--json`: `@file` is read verbatim, parts are concatenated
    Json,
}

/// One data argument as written on the command line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataPart {
    pub kind: DataKind,
    pub value: String,
}

impl DataPart {
    pub fn new(kind: DataKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    /// File path referenced by this part, if any (`-` means stdin).
    pub fn file(&self) -> Option<&str> {
        match self.kind {
            DataKind::Raw => None,
            DataKind::Ascii | DataKind::Binary | DataKind::Json => self.value.strip_prefix('@'),
            DataKind::UrlEncode => match self.value.find(['=', '@']) {
                Some(idx) if self.value.as_bytes()[idx] == b'@' => Some(&self.value[idx + 1..]),
                _ => None,
            },
        }
    }

    /// Size known without touching the filesystem.
    pub fn inline_len(&self) -> usize {
        if self.file().is_some() {
            0
        } else {
            self.value.len()
        }
    }
}

/// Whether a `-F` field came from `--form` or `--form-string`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormKind {
    Form,
    FormString,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FormValue {
    Text(String),
    /// `name=@path[;type=mime]` uploads a file part
    File {
        path: PathBuf,
        content_type: Option<String>,
    },
    /// `name=<path` sends the file's contents as a text part
    Contents(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FormField {
    pub name: String,
    pub value: FormValue,
    pub kind: FormKind,
}

impl FormField {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: FormValue::Text(value.into()),
            kind: FormKind::FormString,
        }
    }

    /// Parse a `-F` argument.
    pub fn parse_form(arg: &str) -> Option<Self> {
        let (name, value) = arg.split_once('=')?;
        let value = if let Some(spec) = value.strip_prefix('@') {
            let (path, content_type) = match spec.split_once(";type=") {
                Some((path, mime)) => (path, Some(mime.to_string())),
                None => (spec, None),
            };
            FormValue::File {
                path: PathBuf::from(path),
                content_type,
            }
        } else if let Some(path) = value.strip_prefix('<') {
            FormValue::Contents(PathBuf::from(path))
        } else {
            FormValue::Text(value.to_string())
        };
        Some(Self {
            name: name.to_string(),
            value,
            kind: FormKind::Form,
        })
    }

    /// Parse a `--form-string` argument; the value is always text.
    pub fn parse_form_string(arg: &str) -> Option<Self> {
        let (name, value) = arg.split_once('=')?;
        Some(Self::text(name, value))
    }

    /// The argument that reproduces this field.
    pub fn to_arg(&self) -> String {
        match &self.value {
            FormValue::Text(text) => format!("{}={}", self.name, text),
            FormValue::File {
                path,
                content_type: Some(mime),
            } => format!("{}=@{};type={}", self.name, path.display(), mime),
            FormValue::File { path, .. } => format!("{}=@{}", self.name, path.display()),
            FormValue::Contents(path) => format!("{}=<{}", self.name, path.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UploadSource {
    File(PathBuf),
    Stdin,
}

/// A body stream that can be taken exactly once.
///
/// Clones share the same stream. A request carrying one is not replayable,
/// so the engine disables retries for it.
#[derive(Clone)]
pub struct StreamingBody {
    inner: Arc<Mutex<Option<UploadStream>>>,
}

impl StreamingBody {
    pub fn new(stream: impl Stream<Item = std::io::Result<Bytes>> + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(Box::pin(stream)))),
        }
    }

    /// Take the stream; `None` once it has been taken.
    pub fn take(&self) -> Option<UploadStream> {
        self.inner.lock().ok().and_then(|mut slot| slot.take())
    }
}

impl fmt::Debug for StreamingBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingBody").finish_non_exhaustive()
    }
}

impl PartialEq for StreamingBody {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// `-d`-family parts in command-line order
    Data(Vec<DataPart>),
    /// `-T`
    Upload(UploadSource),
    /// In-memory bytes set through the builder
    Bytes(Bytes),
    /// Caller-provided stream, sent once
    Stream(StreamingBody),
}

impl RequestBody {
    /// Data parts are buffered before sending, even `@-`, so only `-T -`
    /// and caller streams are one-shot.
    pub fn is_replayable(&self) -> bool {
        match self {
            RequestBody::Upload(UploadSource::Stdin) | RequestBody::Stream(_) => false,
            RequestBody::Data(_) | RequestBody::Upload(UploadSource::File(_)) | RequestBody::Bytes(_) => {
                true
            }
        }
    }

    /// Bytes known before execution (inline data and in-memory bytes).
    pub fn inline_len(&self) -> usize {
        match self {
            RequestBody::Data(parts) => {
                let separators = parts.len().saturating_sub(1);
                parts.iter().map(DataPart::inline_len).sum::<usize>() + separators
            }
            RequestBody::Bytes(bytes) => bytes.len(),
            RequestBody::Upload(_) | RequestBody::Stream(_) => 0,
        }
    }
}
