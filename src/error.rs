//! Error Type Definition Module
//!
//! This module defines the error types that may be encountered while opening
//! and validating an EPUB archive. Every failure of the opening pipeline is
//! reported as an [EpubError]; failures of the XML decoding layer are described
//! by [DecodeError] and carried as the `source` of the matching [EpubError] variant.
//!
//! Every [EpubError] variant carries the logical name of the archive (`epub`),
//! and where it applies the path of the entry inside the archive, so that a
//! diagnostic can be acted upon without re-opening the file.

use thiserror::Error;

/// Types of errors that can occur while opening an EPUB
///
/// The variants are grouped by the stage of the opening pipeline that produces them:
/// archive access, mimetype check, container parsing, package parsing and
/// referential validation. Absence of optional data (an ISBN, a cover) is not an
/// error and is reported as `None` by the query methods of
/// [EpubDocument](crate::epub::EpubDocument).
#[derive(Debug, Error)]
pub enum EpubError {
    /// IO error
    ///
    /// The archive cannot be opened or read at the filesystem / stream layer.
    #[error("IO error in \"{epub}\": {source}")]
    IOError {
        epub: String,
        path: Option<String>,
        source: std::io::Error,
    },

    /// Not an archive error
    ///
    /// The byte source could be read, but it is not a valid ZIP container.
    #[error("Not an archive: \"{epub}\" is not a valid zip container ({source}).")]
    NotAnArchive {
        epub: String,
        source: zip::result::ZipError,
    },

    /// ZIP archive related errors
    ///
    /// The zip layer failed while opening a named entry for reading,
    /// for example because of an unsupported compression method.
    #[error("Archive error in \"{epub}\" at \"{path}\": {source}")]
    ArchiveError {
        epub: String,
        path: String,
        source: zip::result::ZipError,
    },

    /// Archive closed error
    ///
    /// An entry was requested after the archive has been closed.
    #[error("Archive closed: \"{epub}\" has already been closed.")]
    ArchiveClosed { epub: String },

    /// Entry not found error
    ///
    /// A requested entry name does not exist in the archive.
    #[error("Entry not found: \"{epub}\" has no entry named \"{path}\".")]
    EntryNotFound { epub: String, path: String },

    /// Entry too large error
    ///
    /// The decompressed size of an entry exceeds the configured read limit.
    #[error("Entry too large: \"{path}\" in \"{epub}\" exceeds the {limit} bytes read limit.")]
    EntryTooLarge {
        epub: String,
        path: String,
        limit: u64,
    },

    /// Missing mimetype error
    ///
    /// The archive does not contain the fixed `mimetype` entry.
    #[error("Missing mimetype: \"{epub}\" has no \"mimetype\" entry.")]
    MissingMimetype { epub: String },

    /// Invalid mimetype error
    ///
    /// The `mimetype` entry exists, but its content is not exactly
    /// `application/epub+zip`. The actual content is kept for diagnostics.
    #[error("Invalid mimetype: \"{epub}\" declares mimetype \"{actual}\".")]
    InvalidMimetype { epub: String, actual: String },

    /// Missing container error
    ///
    /// The archive does not contain `META-INF/container.xml`.
    #[error("Missing container: \"{epub}\" has no \"META-INF/container.xml\" entry.")]
    MissingContainer { epub: String },

    /// Malformed container error
    ///
    /// `META-INF/container.xml` exists but could not be decoded.
    #[error("Malformed container in \"{epub}\": {source}")]
    MalformedContainer { epub: String, source: DecodeError },

    /// No rootfile error
    ///
    /// The decoded container does not declare any `rootfile`.
    #[error("No rootfile: the container of \"{epub}\" declares no rootfile.")]
    NoRootfile { epub: String },

    /// Bad rootfile error
    ///
    /// The container references a package document that does not exist in the archive.
    #[error("Bad rootfile: the container of \"{epub}\" references missing \"{path}\".")]
    BadRootfile { epub: String, path: String },

    /// Malformed package error
    ///
    /// The package document at `path` exists but could not be decoded.
    #[error("Malformed package \"{path}\" in \"{epub}\": {source}")]
    MalformedPackage {
        epub: String,
        path: String,
        source: DecodeError,
    },

    /// Duplicate manifest id error
    ///
    /// Two manifest items of the package document at `path` share the same id.
    #[error("Duplicate item id: \"{path}\" in \"{epub}\" declares item \"{id}\" more than once.")]
    DuplicateItemId {
        epub: String,
        path: String,
        id: String,
    },

    /// Bad manifest error
    ///
    /// A manifest item of the package document at `path` references an href
    /// that does not name an entry of the archive.
    #[error("Bad manifest: \"{path}\" in \"{epub}\" references missing resource \"{href}\".")]
    BadManifest {
        epub: String,
        path: String,
        href: String,
    },

    /// Bad itemref error
    ///
    /// A spine itemref of the package document at `path` references an id
    /// that does not exist in the manifest.
    #[error("Bad itemref: \"{path}\" in \"{epub}\" references missing manifest item \"{idref}\".")]
    BadItemref {
        epub: String,
        path: String,
        idref: String,
    },

    /// No itemref error
    ///
    /// The spine of the package document at `path` contains no itemref.
    #[error("No itemref: the spine of \"{path}\" in \"{epub}\" is empty.")]
    NoItemref { epub: String, path: String },
}

impl EpubError {
    /// Returns the logical name of the archive the error belongs to
    pub fn epub(&self) -> &str {
        match self {
            Self::IOError { epub, .. }
            | Self::NotAnArchive { epub, .. }
            | Self::ArchiveError { epub, .. }
            | Self::ArchiveClosed { epub }
            | Self::EntryNotFound { epub, .. }
            | Self::EntryTooLarge { epub, .. }
            | Self::MissingMimetype { epub }
            | Self::InvalidMimetype { epub, .. }
            | Self::MissingContainer { epub }
            | Self::MalformedContainer { epub, .. }
            | Self::NoRootfile { epub }
            | Self::BadRootfile { epub, .. }
            | Self::MalformedPackage { epub, .. }
            | Self::DuplicateItemId { epub, .. }
            | Self::BadManifest { epub, .. }
            | Self::BadItemref { epub, .. }
            | Self::NoItemref { epub, .. } => epub,
        }
    }

    /// Returns the path of the inner entry involved in the error, if any
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::IOError { path, .. } => path.as_deref(),
            Self::ArchiveError { path, .. }
            | Self::EntryNotFound { path, .. }
            | Self::EntryTooLarge { path, .. }
            | Self::BadRootfile { path, .. }
            | Self::MalformedPackage { path, .. }
            | Self::DuplicateItemId { path, .. }
            | Self::BadManifest { path, .. }
            | Self::BadItemref { path, .. }
            | Self::NoItemref { path, .. } => Some(path),
            Self::MissingMimetype { .. } | Self::InvalidMimetype { .. } => Some("mimetype"),
            Self::MissingContainer { .. }
            | Self::MalformedContainer { .. }
            | Self::NoRootfile { .. } => Some("META-INF/container.xml"),
            Self::NotAnArchive { .. } | Self::ArchiveClosed { .. } => None,
        }
    }
}

#[cfg(test)]
impl PartialEq for EpubError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::InvalidMimetype {
                    epub: l_epub,
                    actual: l_actual,
                },
                Self::InvalidMimetype {
                    epub: r_epub,
                    actual: r_actual,
                },
            ) => l_epub == r_epub && l_actual == r_actual,
            (
                Self::MalformedContainer {
                    epub: l_epub,
                    source: l_source,
                },
                Self::MalformedContainer {
                    epub: r_epub,
                    source: r_source,
                },
            ) => l_epub == r_epub && l_source == r_source,
            (
                Self::MalformedPackage {
                    epub: l_epub,
                    path: l_path,
                    source: l_source,
                },
                Self::MalformedPackage {
                    epub: r_epub,
                    path: r_path,
                    source: r_source,
                },
            ) => l_epub == r_epub && l_path == r_path && l_source == r_source,
            (
                Self::DuplicateItemId {
                    epub: l_epub,
                    path: l_path,
                    id: l_id,
                },
                Self::DuplicateItemId {
                    epub: r_epub,
                    path: r_path,
                    id: r_id,
                },
            ) => l_epub == r_epub && l_path == r_path && l_id == r_id,
            (
                Self::BadManifest {
                    epub: l_epub,
                    path: l_path,
                    href: l_href,
                },
                Self::BadManifest {
                    epub: r_epub,
                    path: r_path,
                    href: r_href,
                },
            ) => l_epub == r_epub && l_path == r_path && l_href == r_href,
            (
                Self::BadItemref {
                    epub: l_epub,
                    path: l_path,
                    idref: l_idref,
                },
                Self::BadItemref {
                    epub: r_epub,
                    path: r_path,
                    idref: r_idref,
                },
            ) => l_epub == r_epub && l_path == r_path && l_idref == r_idref,
            (
                Self::EntryTooLarge {
                    epub: l_epub,
                    path: l_path,
                    limit: l_limit,
                },
                Self::EntryTooLarge {
                    epub: r_epub,
                    path: r_path,
                    limit: r_limit,
                },
            ) => l_epub == r_epub && l_path == r_path && l_limit == r_limit,

            // The remaining variants either carry only names and paths, or wrap
            // foreign errors without `PartialEq`; compare what they expose.
            _ => {
                core::mem::discriminant(self) == core::mem::discriminant(other)
                    && self.epub() == other.epub()
                    && self.path() == other.path()
            }
        }
    }
}

/// Types of errors that can occur while decoding an XML document of the archive
///
/// These errors are never returned on their own; they are wrapped by
/// [EpubError::MalformedContainer] or [EpubError::MalformedPackage].
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Data Decoding Error - Null data
    ///
    /// This error occurs when trying to decode an empty stream.
    #[error("The data is empty.")]
    EmptyData,

    /// QuickXml error
    ///
    /// The document is not well-formed XML.
    #[error("Not well-formed XML: {source}")]
    Xml { source: quick_xml::Error },

    /// UTF-8 decoding error
    #[error("Invalid UTF-8 data: {source}")]
    Utf8 { source: std::string::FromUtf8Error },

    /// UTF-16 decoding error
    #[error("Invalid UTF-16 data: {source}")]
    Utf16 { source: std::string::FromUtf16Error },

    /// Unexpected root element error
    ///
    /// The document element does not have the expected local name.
    #[error("Expected a \"{expected}\" root element, found \"{found}\".")]
    UnexpectedRoot { expected: String, found: String },

    /// Trailing element error
    ///
    /// The document has more than one top-level element.
    #[error("Unexpected element \"{found}\" after the \"{root}\" root element.")]
    TrailingElement { root: String, found: String },

    /// Missing required attribute error
    ///
    /// An element lacks an attribute without which it cannot be interpreted.
    #[error("The \"{attribute}\" attribute is required on the \"{tag}\" element.")]
    MissingAttribute { tag: String, attribute: String },
}

impl From<quick_xml::Error> for DecodeError {
    fn from(value: quick_xml::Error) -> Self {
        DecodeError::Xml { source: value }
    }
}

impl From<std::string::FromUtf8Error> for DecodeError {
    fn from(value: std::string::FromUtf8Error) -> Self {
        DecodeError::Utf8 { source: value }
    }
}

impl From<std::string::FromUtf16Error> for DecodeError {
    fn from(value: std::string::FromUtf16Error) -> Self {
        DecodeError::Utf16 { source: value }
    }
}

#[cfg(test)]
impl PartialEq for DecodeError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::UnexpectedRoot {
                    expected: l_expected,
                    found: l_found,
                },
                Self::UnexpectedRoot {
                    expected: r_expected,
                    found: r_found,
                },
            ) => l_expected == r_expected && l_found == r_found,
            (
                Self::MissingAttribute {
                    tag: l_tag,
                    attribute: l_attribute,
                },
                Self::MissingAttribute {
                    tag: r_tag,
                    attribute: r_attribute,
                },
            ) => l_tag == r_tag && l_attribute == r_attribute,
            (
                Self::TrailingElement {
                    root: l_root,
                    found: l_found,
                },
                Self::TrailingElement {
                    root: r_root,
                    found: r_found,
                },
            ) => l_root == r_root && l_found == r_found,
            (Self::Utf8 { source: l_source }, Self::Utf8 { source: r_source }) => {
                l_source == r_source
            }

            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}
