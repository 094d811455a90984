//! EPUB verification library
//!
//! Opens an EPUB archive, checks that it is structurally an EPUB and exposes
//! the parsed publication for queries.
//!
//! Opening runs a fixed pipeline where every stage either produces an immutable
//! value or rejects the file with an [EpubError] naming what is wrong:
//!
//! 1. the ZIP archive is indexed by entry name ([archive]);
//! 2. the `mimetype` entry must be exactly `application/epub+zip`;
//! 3. `META-INF/container.xml` must declare at least one rootfile;
//! 4. every rootfile's package document is decoded into metadata, manifest,
//!    spine and guide ([parser]);
//! 5. every local manifest href must name an archive entry and every spine
//!    itemref a manifest item ([validate]).
//!
//! Only a file that passes every stage becomes an [EpubDocument].
//!
//! ## Quick Start
//!
//! ```rust, ignore
//! # use epub_verify::EpubDocument;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let doc = EpubDocument::open("path/to/epub/file.epub")?;
//!
//! println!("Title: {:?}", doc.title());
//! println!("ISBN: {:?}", doc.isbn());
//! println!("Cover: {:?}", doc.cover());
//!
//! for item in doc.spine_items() {
//!     println!("{} ({})", item.href, item.media_type);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Diagnostics
//!
//! Progress, rejections and non-fatal inconsistencies are reported as
//! [ParseEvent](observer::ParseEvent)s. By default they go to the `log` facade;
//! use [OpenOptions::observer] to receive them directly.

pub(crate) mod utils;

pub mod archive;
pub mod epub;
pub mod error;
pub mod observer;
pub mod parser;
pub mod types;
pub mod validate;

pub use epub::{EpubDocument, OpenOptions};
pub use error::{DecodeError, EpubError};
pub use utils::DecodeBytes;
