//! HTTP response bodies and headers.
//!
//! A response is constructed by the extension surface, optionally
//! decorated with headers, then queued on a connection. Bodies are
//! either byte buffers, deep-copied at construction so the caller's
//! buffer can be reused immediately, or open files streamed by offset.

use std::fs::File;
use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

/// Failure to construct a response.
#[derive(Debug, Error)]
pub enum ResponseError {
    /// The backing file could not be opened or measured.
    #[error("failed to open \"{path}\"")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Backing storage for a response body.
///
/// Cloning is cheap: buffers share the underlying allocation and files
/// share the open descriptor. File bodies are read with positioned
/// reads, so shared descriptors never race on a cursor.
#[derive(Debug, Clone)]
pub enum ResponseBody {
    Buffer(Bytes),
    File { file: Arc<File>, len: u64 },
}

impl ResponseBody {
    pub fn len(&self) -> u64 {
        match self {
            ResponseBody::Buffer(bytes) => bytes.len() as u64,
            ResponseBody::File { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A response under construction: body plus ordered headers.
#[derive(Debug, Clone)]
pub struct ResponseData {
    body: ResponseBody,
    headers: Vec<(String, String)>,
}

impl ResponseData {
    /// Response over a text buffer. The content is copied.
    pub fn from_string(content: &str) -> Self {
        Self::from_buffer(content.as_bytes())
    }

    /// Response over a binary buffer. The content is copied, so the
    /// caller may free or reuse its buffer immediately.
    pub fn from_buffer(content: &[u8]) -> Self {
        Self {
            body: ResponseBody::Buffer(Bytes::copy_from_slice(content)),
            headers: Vec::new(),
        }
    }

    /// Response backed by an open file. The length is measured by
    /// seeking to the end; the descriptor stays open until the response
    /// is destroyed.
    pub fn from_file(path: &Path) -> Result<Self, ResponseError> {
        let open = |p: &Path| -> io::Result<(File, u64)> {
            let mut file = File::open(p)?;
            let len = file.seek(SeekFrom::End(0))?;
            Ok((file, len))
        };

        let (file, len) = open(path).map_err(|source| ResponseError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Self {
            body: ResponseBody::File {
                file: Arc::new(file),
                len,
            },
            headers: Vec::new(),
        })
    }

    /// Append a header. Insertion order is preserved and duplicate
    /// names are permitted; both copies are sent.
    pub fn add_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    /// Snapshot this response for transmission with the given status.
    /// Later mutation of the original does not affect the snapshot.
    pub fn to_outbound(&self, status: u16) -> OutboundResponse {
        OutboundResponse {
            status,
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }
}

/// A response frozen for transmission on one connection.
#[derive(Debug, Clone)]
pub struct OutboundResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: ResponseBody,
}
