use std::{
    fmt,
    fs::File,
    io::{BufReader, Read, Seek},
    path::Path,
};

use crate::{
    archive::ArchiveIndex,
    error::EpubError,
    observer::{LogObserver, ParseEvent, ParseObserver, Stage},
    parser::{check_mimetype, parse_container, parse_package},
    types::{Container, ManifestItem, MetadataItem, Package, Rootfile},
    validate::validate_rootfile,
};

/// Options for opening an EPUB
///
/// ```rust, ignore
/// # use epub_verify::{OpenOptions, observer::NoopObserver};
/// let doc = OpenOptions::new()
///     .observer(NoopObserver)
///     .max_entry_size(16 * 1024 * 1024)
///     .open("path/to/book.epub")?;
/// ```
pub struct OpenOptions {
    observer: Box<dyn ParseObserver>,
    max_entry_size: Option<u64>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            observer: Box::new(LogObserver),
            max_entry_size: None,
        }
    }
}

impl OpenOptions {
    /// Creates options that log through the `log` facade and read entries of any size
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the receiver of the events reported while opening
    pub fn observer(mut self, observer: impl ParseObserver + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    /// Sets the upper bound on the decompressed size of a single entry
    ///
    /// Reading an entry beyond this size fails with [EpubError::EntryTooLarge],
    /// which protects against archives declaring or inflating to huge entries.
    pub fn max_entry_size(mut self, bytes: u64) -> Self {
        self.max_entry_size = Some(bytes);
        self
    }

    /// Opens and validates the EPUB at `path`
    pub fn open<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> Result<EpubDocument<BufReader<File>>, EpubError> {
        self.build(ArchiveIndex::open(path))
    }

    /// Opens and validates an EPUB from any seekable byte source
    ///
    /// # Parameters
    /// - `reader`: The byte source, usually a file or an in-memory cursor
    /// - `name`: The logical name of the EPUB, reported in errors and events
    pub fn read<R: Read + Seek>(
        &self,
        reader: R,
        name: impl Into<String>,
    ) -> Result<EpubDocument<R>, EpubError> {
        self.build(ArchiveIndex::from_reader(reader, name))
    }

    /// Runs the opening pipeline
    ///
    /// The stages run in a fixed order and the first failure is returned. The
    /// archive is owned by this function until the document is built, so every
    /// early return releases it.
    fn build<R: Read + Seek>(
        &self,
        archive: Result<ArchiveIndex<R>, EpubError>,
    ) -> Result<EpubDocument<R>, EpubError> {
        let observer = self.observer.as_ref();
        let reject = move |stage: Stage| {
            move |error: &EpubError| {
                observer.on_event(&ParseEvent::Rejected {
                    epub: error.epub(),
                    stage,
                    error,
                })
            }
        };

        let mut archive = archive.inspect_err(reject(Stage::Archive))?;
        archive.set_max_entry_size(self.max_entry_size);
        observer.on_event(&ParseEvent::ArchiveIndexed {
            epub: archive.name(),
            entries: archive.len(),
        });

        check_mimetype(&mut archive).inspect_err(reject(Stage::Mimetype))?;
        let container = parse_container(&mut archive).inspect_err(reject(Stage::Container))?;

        let mut rootfiles = Vec::with_capacity(container.rootfiles.len());
        for descriptor in &container.rootfiles {
            let rootfile = parse_package(&mut archive, descriptor, observer)
                .inspect_err(reject(Stage::Package))?;
            validate_rootfile(&archive, &rootfile, observer)
                .inspect_err(reject(Stage::Validation))?;

            rootfiles.push(rootfile);
        }

        let doc = EpubDocument {
            archive,
            container,
            rootfiles,
        };
        observer.on_event(&ParseEvent::Opened {
            epub: doc.name(),
            rootfile: &doc.rootfile().full_path,
            media_type: &doc.rootfile().media_type,
        });

        Ok(doc)
    }
}

/// A validated EPUB publication
///
/// An `EpubDocument` only exists once every stage of the opening pipeline has
/// succeeded: the mimetype is correct, the container names at least one rootfile,
/// and every rootfile has a decodable package whose manifest hrefs and spine
/// itemrefs resolve. Queries read the parsed model and never touch the archive;
/// only [read_entry](EpubDocument::read_entry) does.
///
/// Queries that concern a single publication (`isbn`, `cover`, `title`, ...)
/// answer for the first rootfile.
pub struct EpubDocument<R: Read + Seek> {
    archive: ArchiveIndex<R>,
    container: Container,

    /// The parsed rootfiles, in container order, never empty
    rootfiles: Vec<Rootfile>,
}

impl<R: Read + Seek> fmt::Debug for EpubDocument<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EpubDocument")
            .field("name", &self.name())
            .field("closed", &self.is_closed())
            .field("container", &self.container)
            .field("rootfiles", &self.rootfiles)
            .finish()
    }
}

impl EpubDocument<BufReader<File>> {
    /// Opens and validates the EPUB at `path` with the default [OpenOptions]
    ///
    /// # Return
    /// - `Ok(EpubDocument)`: The validated document
    /// - `Err(EpubError)`: The error of the first stage that rejected the file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, EpubError> {
        OpenOptions::new().open(path)
    }
}

impl<R: Read + Seek> EpubDocument<R> {
    /// Opens and validates an EPUB from a reader with the default [OpenOptions]
    pub fn from_reader(reader: R, name: impl Into<String>) -> Result<Self, EpubError> {
        OpenOptions::new().read(reader, name)
    }

    /// Returns the logical name of the EPUB
    pub fn name(&self) -> &str {
        self.archive.name()
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn rootfiles(&self) -> &[Rootfile] {
        &self.rootfiles
    }

    /// Returns the package document of the first rootfile
    pub fn package(&self) -> &Package {
        &self.rootfile().package
    }

    fn rootfile(&self) -> &Rootfile {
        // parse_container rejects containers without rootfile
        &self.rootfiles[0]
    }

    /// Returns the first `dc:title` of the publication
    pub fn title(&self) -> Option<&str> {
        self.package().metadata.title.as_deref()
    }

    /// Returns the first `dc:language` of the publication
    pub fn language(&self) -> Option<&str> {
        self.package().metadata.language.as_deref()
    }

    /// Retrieves all metadata items with the given local name
    ///
    /// # Parameters
    /// - `key`: The local name of the metadata element, e.g. `creator` or `meta`
    ///
    /// # Return
    /// - `Some(Vec<MetadataItem>)`: The matching items, in declaration order
    /// - `None`: If no matching metadata items are found
    pub fn get_metadata(&self, key: &str) -> Option<Vec<MetadataItem>> {
        let items = self
            .package()
            .metadata
            .items
            .iter()
            .filter(|item| item.property == key)
            .cloned()
            .collect::<Vec<_>>();

        (!items.is_empty()).then_some(items)
    }

    /// Retrieves the values of all metadata items with the given local name
    pub fn get_metadata_value(&self, key: &str) -> Option<Vec<String>> {
        let values = self
            .package()
            .metadata
            .items
            .iter()
            .filter(|item| item.property == key)
            .map(|item| item.value.clone())
            .collect::<Vec<_>>();

        (!values.is_empty()).then_some(values)
    }

    /// Looks up a manifest item of the first rootfile by id
    pub fn manifest_item(&self, id: &str) -> Option<&ManifestItem> {
        self.package().manifest.get(id)
    }

    /// Returns the manifest items of the first rootfile in reading order
    pub fn spine_items(&self) -> impl Iterator<Item = &ManifestItem> {
        self.package().spine_items()
    }

    /// Retrieves the ISBN of the publication
    ///
    /// The first `dc:identifier` whose scheme is exactly `ISBN` is used. Its `id`
    /// attribute is returned when it is not empty, otherwise its text content.
    ///
    /// # Return
    /// - `Some(&str)`: The ISBN
    /// - `None`: No identifier declares the `ISBN` scheme
    pub fn isbn(&self) -> Option<&str> {
        let identifier = self
            .package()
            .metadata
            .identifiers
            .iter()
            .find(|identifier| identifier.scheme.as_deref() == Some("ISBN"))?;

        match identifier.id.as_deref() {
            Some(id) if !id.is_empty() => Some(id),
            _ => Some(identifier.value.as_str()),
        }
    }

    /// Retrieves the archive path of the cover image
    ///
    /// The manifest item carrying the `cover-image` property is preferred;
    /// otherwise the item named by `<meta name="cover" content="..."/>` is used.
    ///
    /// # Return
    /// - `Some(String)`: The archive entry name of the cover image
    /// - `None`: The publication declares no cover
    pub fn cover(&self) -> Option<String> {
        let rootfile = self.rootfile();
        let item = rootfile.package.cover_item()?;

        rootfile.resolve(&item.href)
    }

    /// Reads an archive entry to completion
    ///
    /// # Return
    /// - `Ok(Vec<u8>)`: The content of the entry
    /// - `Err(EpubError)`: `EntryNotFound`, `ArchiveClosed` after [close](EpubDocument::close),
    ///   `EntryTooLarge` or a read failure
    pub fn read_entry(&mut self, name: &str) -> Result<Vec<u8>, EpubError> {
        self.archive.read_all(name)
    }

    /// Releases the archive
    ///
    /// Calling it again is a no-op. The parsed model stays queryable.
    pub fn close(&mut self) {
        self.archive.close();
    }

    pub fn is_closed(&self) -> bool {
        self.archive.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        cell::RefCell,
        io::{Cursor, Write},
        rc::Rc,
    };

    use tempfile::NamedTempFile;

    use crate::{
        archive::tests::build_zip,
        epub::{EpubDocument, OpenOptions},
        error::EpubError,
        observer::{NoopObserver, ParseEvent},
    };

    const CONTAINER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

    fn package(metadata: &str, manifest: &str, spine: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="uid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:opf="http://www.idpf.org/2007/opf">
    <dc:title>Minimal</dc:title>
    <dc:language>en</dc:language>
    {metadata}
  </metadata>
  <manifest>
    <item id="ch1" href="ch1.xhtml" media-type="application/xhtml+xml"/>
    {manifest}
  </manifest>
  <spine>
    {spine}
  </spine>
</package>"#
        )
    }

    fn minimal_package(metadata: &str) -> String {
        package(metadata, "", r#"<itemref idref="ch1"/>"#)
    }

    /// Builds an archive with the mimetype, the container, a chapter and the given package
    fn epub(package: &str) -> Cursor<Vec<u8>> {
        build_zip(&[
            ("mimetype", b"application/epub+zip"),
            ("META-INF/container.xml", CONTAINER.as_bytes()),
            ("OEBPS/content.opf", package.as_bytes()),
            ("OEBPS/ch1.xhtml", b"<html/>"),
            ("OEBPS/images/cover.jpg", b"jpg"),
        ])
    }

    fn open(reader: Cursor<Vec<u8>>) -> Result<EpubDocument<Cursor<Vec<u8>>>, EpubError> {
        OpenOptions::new()
            .observer(NoopObserver)
            .read(reader, "book.epub")
    }

    fn write_temp(bytes: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_minimal_epub_from_path() {
        let file = write_temp(epub(&minimal_package("")).get_ref());
        let doc = EpubDocument::open(file.path()).unwrap();

        assert_eq!(doc.name(), file.path().to_string_lossy());
        assert_eq!(doc.rootfiles().len(), 1);
        assert_eq!(doc.package().spine.len(), 1);

        let first = doc.spine_items().next().unwrap();
        assert_eq!(first.href, "ch1.xhtml");
        assert_eq!(doc.manifest_item("ch1"), Some(first));
        assert_eq!(doc.title(), Some("Minimal"));
        assert_eq!(doc.language(), Some("en"));
    }

    #[test]
    fn test_missing_mimetype() {
        let reader = build_zip(&[
            ("META-INF/container.xml", CONTAINER.as_bytes()),
            ("OEBPS/content.opf", minimal_package("").as_bytes()),
            ("OEBPS/ch1.xhtml", b"<html/>"),
        ]);

        assert_eq!(
            open(reader).unwrap_err(),
            EpubError::MissingMimetype {
                epub: "book.epub".to_string(),
            }
        );
    }

    #[test]
    fn test_invalid_mimetype() {
        for content in [&b"application/zip"[..], b"application/epub+zip \n"] {
            let reader = build_zip(&[
                ("mimetype", content),
                ("META-INF/container.xml", CONTAINER.as_bytes()),
            ]);

            match open(reader) {
                Err(EpubError::InvalidMimetype { actual, .. }) => {
                    assert_eq!(actual.as_bytes(), content)
                }
                other => panic!("unexpected result: {:?}", other.err()),
            }
        }
    }

    #[test]
    fn test_missing_container() {
        let reader = build_zip(&[("mimetype", b"application/epub+zip")]);

        assert_eq!(
            open(reader).unwrap_err(),
            EpubError::MissingContainer {
                epub: "book.epub".to_string(),
            }
        );
    }

    #[test]
    fn test_no_rootfile() {
        let reader = build_zip(&[
            ("mimetype", b"application/epub+zip"),
            (
                "META-INF/container.xml",
                b"<container xmlns=\"urn:oasis:names:tc:opendocument:xmlns:container\"><rootfiles/></container>",
            ),
        ]);

        assert_eq!(
            open(reader).unwrap_err(),
            EpubError::NoRootfile {
                epub: "book.epub".to_string(),
            }
        );
    }

    #[test]
    fn test_malformed_container() {
        let reader = build_zip(&[
            ("mimetype", b"application/epub+zip"),
            (
                "META-INF/container.xml",
                b"<container><rootfiles><rootfile full-path=\"OEBPS/content.opf\"/></rootfiles></container><container/>",
            ),
        ]);

        let err = open(reader).unwrap_err();
        assert!(matches!(err, EpubError::MalformedContainer { .. }));
        assert_eq!(err.path(), Some("META-INF/container.xml"));

        let reader = build_zip(&[
            ("mimetype", b"application/epub+zip"),
            ("META-INF/container.xml", b"<container><rootfiles>"),
        ]);
        assert!(matches!(
            open(reader),
            Err(EpubError::MalformedContainer { .. })
        ));
    }

    #[test]
    fn test_bad_rootfile() {
        let reader = build_zip(&[
            ("mimetype", b"application/epub+zip"),
            ("META-INF/container.xml", CONTAINER.as_bytes()),
        ]);

        assert_eq!(
            open(reader).unwrap_err(),
            EpubError::BadRootfile {
                epub: "book.epub".to_string(),
                path: "OEBPS/content.opf".to_string(),
            }
        );
    }

    #[test]
    fn test_malformed_package() {
        let err = open(epub("<package><metadata></package>")).unwrap_err();
        assert!(matches!(err, EpubError::MalformedPackage { .. }));
        assert_eq!(err.path(), Some("OEBPS/content.opf"));
    }

    #[test]
    fn test_duplicate_item_id() {
        let package = package(
            "",
            r#"<item id="ch1" href="images/cover.jpg" media-type="image/jpeg"/>"#,
            r#"<itemref idref="ch1"/>"#,
        );

        assert_eq!(
            open(epub(&package)).unwrap_err(),
            EpubError::DuplicateItemId {
                epub: "book.epub".to_string(),
                path: "OEBPS/content.opf".to_string(),
                id: "ch1".to_string(),
            }
        );
    }

    #[test]
    fn test_bad_itemref() {
        let package = package("", "", r#"<itemref idref="ch1"/><itemref idref="nope"/>"#);

        assert_eq!(
            open(epub(&package)).unwrap_err(),
            EpubError::BadItemref {
                epub: "book.epub".to_string(),
                path: "OEBPS/content.opf".to_string(),
                idref: "nope".to_string(),
            }
        );
    }

    #[test]
    fn test_bad_manifest() {
        let package = package(
            "",
            r#"<item id="ch2" href="ch2.xhtml" media-type="application/xhtml+xml"/>"#,
            r#"<itemref idref="ch1"/>"#,
        );

        assert_eq!(
            open(epub(&package)).unwrap_err(),
            EpubError::BadManifest {
                epub: "book.epub".to_string(),
                path: "OEBPS/content.opf".to_string(),
                href: "ch2.xhtml".to_string(),
            }
        );
    }

    #[test]
    fn test_no_itemref() {
        let package = package("", "", "");

        assert_eq!(
            open(epub(&package)).unwrap_err(),
            EpubError::NoItemref {
                epub: "book.epub".to_string(),
                path: "OEBPS/content.opf".to_string(),
            }
        );
    }

    #[test]
    fn test_not_an_archive() {
        let file = write_temp(b"Just some notes, definitely not a zip archive.\n");
        let result = EpubDocument::open(file.path());

        assert!(matches!(
            result,
            Err(EpubError::NotAnArchive { .. }) | Err(EpubError::IOError { .. })
        ));
    }

    #[test]
    fn test_isbn_prefers_id() {
        let doc = open(epub(&minimal_package(
            r#"<dc:identifier id="uid" opf:scheme="UUID">urn:uuid:1</dc:identifier>
    <dc:identifier id="isbn-id" opf:scheme="ISBN">9780000000001</dc:identifier>
    <dc:identifier opf:scheme="ISBN">9780000000002</dc:identifier>"#,
        )))
        .unwrap();

        assert_eq!(doc.isbn(), Some("isbn-id"));
    }

    #[test]
    fn test_isbn_falls_back_to_text() {
        let doc = open(epub(&minimal_package(
            r#"<dc:identifier id="" opf:scheme="ISBN">9780000000001</dc:identifier>"#,
        )))
        .unwrap();
        assert_eq!(doc.isbn(), Some("9780000000001"));

        let doc = open(epub(&minimal_package(
            r#"<dc:identifier opf:scheme="ISBN"> 9780000000002 </dc:identifier>"#,
        )))
        .unwrap();
        assert_eq!(doc.isbn(), Some("9780000000002"));
    }

    #[test]
    fn test_isbn_not_found() {
        let doc = open(epub(&minimal_package(
            r#"<dc:identifier id="uid" opf:scheme="isbn">9780000000001</dc:identifier>"#,
        )))
        .unwrap();

        // the scheme comparison is case-sensitive
        assert_eq!(doc.isbn(), None);
    }

    #[test]
    fn test_cover() {
        let package = package(
            "",
            r#"<item id="cover-img" href="images/cover.jpg" media-type="image/jpeg" properties="cover-image"/>"#,
            r#"<itemref idref="ch1"/>"#,
        );
        let doc = open(epub(&package)).unwrap();
        assert_eq!(doc.cover(), Some("OEBPS/images/cover.jpg".to_string()));

        let package = package_with_meta_cover();
        let doc = open(epub(&package)).unwrap();
        assert_eq!(doc.cover(), Some("OEBPS/images/cover.jpg".to_string()));

        let doc = open(epub(&minimal_package(""))).unwrap();
        assert_eq!(doc.cover(), None);
    }

    fn package_with_meta_cover() -> String {
        package(
            r#"<meta name="cover" content="img"/>"#,
            r#"<item id="img" href="images/cover.jpg" media-type="image/jpeg"/>"#,
            r#"<itemref idref="ch1"/>"#,
        )
    }

    #[test]
    fn test_get_metadata() {
        let doc = open(epub(&minimal_package(
            r#"<dc:creator id="c1">Ann</dc:creator>
    <dc:creator>Bob</dc:creator>"#,
        )))
        .unwrap();

        assert_eq!(
            doc.get_metadata_value("creator"),
            Some(vec!["Ann".to_string(), "Bob".to_string()])
        );
        let creators = doc.get_metadata("creator").unwrap();
        assert_eq!(creators[0].attribute("id"), Some("c1"));
        assert!(doc.get_metadata("publisher").is_none());
        assert!(doc.get_metadata_value("publisher").is_none());
    }

    #[test]
    fn test_read_entry_and_close() {
        let mut doc = open(epub(&minimal_package(""))).unwrap();

        assert_eq!(doc.read_entry("OEBPS/ch1.xhtml").unwrap(), b"<html/>".to_vec());
        assert!(matches!(
            doc.read_entry("OEBPS/ch2.xhtml"),
            Err(EpubError::EntryNotFound { .. })
        ));

        doc.close();
        assert!(doc.is_closed());
        doc.close();
        assert!(doc.is_closed());
        assert!(format!("{:?}", doc).contains("closed: true"));

        assert!(matches!(
            doc.read_entry("OEBPS/ch1.xhtml"),
            Err(EpubError::ArchiveClosed { .. })
        ));
        // the parsed model outlives the archive
        assert_eq!(doc.title(), Some("Minimal"));
    }

    #[test]
    fn test_max_entry_size() {
        let result = OpenOptions::new()
            .observer(NoopObserver)
            .max_entry_size(8)
            .read(epub(&minimal_package("")), "book.epub");

        assert_eq!(
            result.err(),
            Some(EpubError::EntryTooLarge {
                epub: "book.epub".to_string(),
                path: "mimetype".to_string(),
                limit: 8,
            })
        );
    }

    #[test]
    fn test_max_entry_size_unbounded() {
        let doc = OpenOptions::new()
            .observer(NoopObserver)
            .max_entry_size(u64::MAX)
            .read(epub(&minimal_package("")), "book.epub")
            .unwrap();

        assert_eq!(doc.title(), Some("Minimal"));
    }

    #[test]
    fn test_multiple_rootfiles_are_all_validated() {
        let container = r#"<container><rootfiles>
  <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  <rootfile full-path="alt/content.opf" media-type="application/oebps-package+xml"/>
</rootfiles></container>"#;
        let package = minimal_package("");

        let reader = build_zip(&[
            ("mimetype", b"application/epub+zip"),
            ("META-INF/container.xml", container.as_bytes()),
            ("OEBPS/content.opf", package.as_bytes()),
            ("OEBPS/ch1.xhtml", b"<html/>"),
            ("alt/content.opf", package.as_bytes()),
        ]);

        // alt/ch1.xhtml is missing
        assert_eq!(
            open(reader).unwrap_err(),
            EpubError::BadManifest {
                epub: "book.epub".to_string(),
                path: "alt/content.opf".to_string(),
                href: "ch1.xhtml".to_string(),
            }
        );
    }

    #[test]
    fn test_observer_events() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        let observer = move |event: &ParseEvent<'_>| {
            let kind = match event {
                ParseEvent::ArchiveIndexed { .. } => "indexed".to_string(),
                ParseEvent::PackageParsed { .. } => "parsed".to_string(),
                ParseEvent::Warning { .. } => "warning".to_string(),
                ParseEvent::Rejected { stage, .. } => format!("rejected at {}", stage),
                ParseEvent::Opened { .. } => "opened".to_string(),
            };
            sink.borrow_mut().push(kind);
        };

        let options = OpenOptions::new().observer(observer);

        let package = minimal_package("").replace("<spine>", r#"<spine toc="ncx">"#);
        assert!(options.read(epub(&package), "book.epub").is_ok());
        assert_eq!(
            *events.borrow(),
            vec!["indexed", "parsed", "warning", "opened"]
        );

        events.borrow_mut().clear();
        let reader = build_zip(&[("mimetype", b"text/plain")]);
        assert!(options.read(reader, "book.epub").is_err());
        assert_eq!(*events.borrow(), vec!["indexed", "rejected at mimetype"]);
    }
}
