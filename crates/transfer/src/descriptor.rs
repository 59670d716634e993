//! Package descriptor: the `References` section of an OVF document.
//!
//! Parsed with the raw event reader rather than serde so that namespace
//! prefixes (`ovf:href` vs `href`) do not matter.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::TransferError;

/// One file declared by the package manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorFile {
    /// Logical filename. For chunked files this is the base name the
    /// on-disk chunk names derive from.
    pub href: String,
    pub id: String,
    /// Total size of the logical file in bytes.
    pub size: u64,
    /// 0 means the file is transferred whole; otherwise the file was
    /// pre-split externally into `ceil(size / chunk_size)` parts.
    pub chunk_size: u64,
}

impl DescriptorFile {
    pub fn is_chunked(&self) -> bool {
        self.chunk_size != 0
    }

    /// Number of on-disk parts this file occupies.
    pub fn chunk_count(&self) -> u64 {
        if self.chunk_size == 0 {
            1
        } else {
            self.size.div_ceil(self.chunk_size)
        }
    }

    /// On-disk chunk filenames: `<href>.<9-digit zero-padded index>`.
    pub fn chunk_names(&self) -> Vec<String> {
        (0..self.chunk_count())
            .map(|i| format!("{}.{:09}", self.href, i))
            .collect()
    }

    /// Expected on-disk size of every chunk. The last chunk carries the
    /// remainder, or a full chunk when the size divides evenly.
    pub fn chunk_sizes(&self) -> Vec<u64> {
        if self.chunk_size == 0 {
            return vec![self.size];
        }
        let count = self.chunk_count();
        (0..count)
            .map(|i| {
                if i + 1 < count {
                    self.chunk_size
                } else {
                    let rem = self.size % self.chunk_size;
                    if rem == 0 { self.chunk_size } else { rem }
                }
            })
            .collect()
    }
}

/// Ordered list of the files a package declares.
#[derive(Debug, Clone, Default)]
pub struct PackageDescriptor {
    files: Vec<DescriptorFile>,
}

impl PackageDescriptor {
    pub fn new(files: Vec<DescriptorFile>) -> Self {
        Self { files }
    }

    /// Parses the `References/File` entries out of an OVF document.
    pub fn parse(xml: &str) -> Result<Self, TransferError> {
        let mut reader = Reader::from_str(xml);
        let mut in_references = false;
        let mut files = Vec::new();

        loop {
            match reader
                .read_event()
                .map_err(|e| TransferError::Descriptor(e.to_string()))?
            {
                Event::Start(e) => {
                    if e.local_name().as_ref() == b"References" {
                        in_references = true;
                    } else if in_references && e.local_name().as_ref() == b"File" {
                        files.push(file_from_attributes(&e)?);
                    }
                }
                Event::Empty(e) => {
                    if in_references && e.local_name().as_ref() == b"File" {
                        files.push(file_from_attributes(&e)?);
                    }
                }
                Event::End(e) => {
                    if e.local_name().as_ref() == b"References" {
                        in_references = false;
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if files.is_empty() {
            return Err(TransferError::Descriptor(
                "no File entries under References".into(),
            ));
        }
        Ok(Self { files })
    }

    pub fn files(&self) -> &[DescriptorFile] {
        &self.files
    }

    /// Sum of all declared file sizes.
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

fn file_from_attributes(e: &BytesStart<'_>) -> Result<DescriptorFile, TransferError> {
    let mut href = None;
    let mut id = String::new();
    let mut size = None;
    let mut chunk_size = 0u64;

    for attr in e.attributes() {
        let attr = attr.map_err(|err| TransferError::Descriptor(err.to_string()))?;
        let value = attr
            .unescape_value()
            .map_err(|err| TransferError::Descriptor(err.to_string()))?;
        match attr.key.local_name().as_ref() {
            b"href" => href = Some(value.into_owned()),
            b"id" => id = value.into_owned(),
            b"size" => {
                size = Some(value.parse::<u64>().map_err(|_| {
                    TransferError::Descriptor(format!("invalid size attribute: {value}"))
                })?);
            }
            b"chunkSize" => {
                chunk_size = value.parse::<u64>().map_err(|_| {
                    TransferError::Descriptor(format!("invalid chunkSize attribute: {value}"))
                })?;
            }
            _ => {}
        }
    }

    Ok(DescriptorFile {
        href: href.ok_or_else(|| TransferError::Descriptor("File missing href".into()))?,
        id,
        size: size.ok_or_else(|| TransferError::Descriptor("File missing size".into()))?,
        chunk_size,
    })
}
