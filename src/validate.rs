//! Referential validation of parsed package documents
//!
//! Checks that what a package document references actually exists: every local
//! manifest href names an archive entry and every spine itemref names a manifest
//! item. Inconsistencies that readers tolerate are reported to the observer as
//! warnings instead of failing the open.

use std::{
    collections::HashSet,
    io::{Read, Seek},
};

use crate::{
    archive::ArchiveIndex,
    error::EpubError,
    observer::{ParseEvent, ParseObserver},
    types::{Manifest, Rootfile},
    utils::is_remote_href,
};

/// Validates the references of a rootfile against the archive
///
/// Checks run in a fixed order and the first failure is returned: manifest hrefs
/// in declaration order, then spine itemrefs in reading order, then the spine
/// emptiness.
///
/// # Parameters
/// - `archive`: The archive the rootfile was read from
/// - `rootfile`: The rootfile to validate
/// - `observer`: Receiver of the non-fatal warnings
///
/// # Return
/// - `Ok(())`: Every reference resolves
/// - `Err(EpubError)`: `BadManifest`, `BadItemref` or `NoItemref`
pub fn validate_rootfile<R: Read + Seek>(
    archive: &ArchiveIndex<R>,
    rootfile: &Rootfile,
    observer: &dyn ParseObserver,
) -> Result<(), EpubError> {
    let package = &rootfile.package;

    for item in package.manifest.values() {
        // Remote resources are not part of the archive
        if is_remote_href(&item.href) {
            continue;
        }

        let exists = rootfile
            .resolve(&item.href)
            .is_some_and(|path| archive.contains(&path));
        if !exists {
            return Err(EpubError::BadManifest {
                epub: archive.name().to_string(),
                path: rootfile.full_path.clone(),
                href: item.href.clone(),
            });
        }
    }

    if let Some(item) = package
        .spine
        .items
        .iter()
        .find(|item| !package.manifest.contains_key(&item.idref))
    {
        return Err(EpubError::BadItemref {
            epub: archive.name().to_string(),
            path: rootfile.full_path.clone(),
            idref: item.idref.clone(),
        });
    }

    if package.spine.is_empty() {
        return Err(EpubError::NoItemref {
            epub: archive.name().to_string(),
            path: rootfile.full_path.clone(),
        });
    }

    let report = |message: String| {
        observer.on_event(&ParseEvent::Warning {
            epub: archive.name(),
            path: &rootfile.full_path,
            message,
        })
    };

    if let Some(toc) = &package.spine.toc {
        if !package.manifest.contains_key(toc) {
            report(format!("spine toc \"{}\" is not a manifest item", toc));
        }
    }

    for (id, item) in &package.manifest {
        if item.fallback.is_none() {
            continue;
        }

        if let Err(message) = check_fallback_chain(&package.manifest, id) {
            report(format!("invalid fallback chain for item \"{}\": {}", id, message));
        }
    }

    Ok(())
}

/// Follows the fallback chain starting at `id`
///
/// # Return
/// - `Ok(())`: The chain ends on an item without fallback
/// - `Err(String)`: The chain is circular or names a missing item
fn check_fallback_chain(manifest: &Manifest, id: &str) -> Result<(), String> {
    let mut chain = vec![id];
    let mut visited = HashSet::from([id]);
    let mut current = id;

    while let Some(fallback) = manifest
        .get(current)
        .and_then(|item| item.fallback.as_deref())
    {
        if !manifest.contains_key(fallback) {
            return Err(format!("fallback item \"{}\" does not exist", fallback));
        }

        chain.push(fallback);
        if !visited.insert(fallback) {
            return Err(format!("circular reference {}", chain.join(" -> ")));
        }

        current = fallback;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use crate::{
        archive::{ArchiveIndex, tests::build_zip},
        error::EpubError,
        observer::{NoopObserver, ParseEvent},
        parser::decode_package,
        types::Rootfile,
        validate::validate_rootfile,
    };

    fn rootfile(package: &str) -> Rootfile {
        Rootfile {
            full_path: "OEBPS/content.opf".to_string(),
            media_type: "application/oebps-package+xml".to_string(),
            package: decode_package(package.as_bytes()).unwrap(),
        }
    }

    fn archive() -> ArchiveIndex<std::io::Cursor<Vec<u8>>> {
        let reader = build_zip(&[
            ("mimetype", b"application/epub+zip"),
            ("OEBPS/content.opf", b"<package/>"),
            ("OEBPS/text/ch1.xhtml", b"<html/>"),
            ("OEBPS/images/cover 1.jpg", b"jpg"),
            ("fonts/a.ttf", b"ttf"),
        ]);
        ArchiveIndex::from_reader(reader, "book.epub").unwrap()
    }

    #[test]
    fn test_valid_rootfile() {
        let rootfile = rootfile(
            r#"<package><manifest>
  <item id="ch1" href="text/ch1.xhtml#start" media-type="application/xhtml+xml"/>
  <item id="cover" href="images/cover%201.jpg" media-type="image/jpeg"/>
  <item id="font" href="../fonts/a.ttf" media-type="font/ttf"/>
  <item id="audio" href="https://example.org/a.mp3" media-type="audio/mpeg"/>
</manifest><spine><itemref idref="ch1"/></spine></package>"#,
        );

        assert!(validate_rootfile(&archive(), &rootfile, &NoopObserver).is_ok());
    }

    #[test]
    fn test_bad_manifest() {
        let rootfile = rootfile(
            r#"<package><manifest>
  <item id="ch1" href="text/ch1.xhtml" media-type="application/xhtml+xml"/>
  <item id="ch2" href="text/ch2.xhtml" media-type="application/xhtml+xml"/>
</manifest><spine><itemref idref="missing"/></spine></package>"#,
        );

        // manifest hrefs are checked before itemrefs
        assert_eq!(
            validate_rootfile(&archive(), &rootfile, &NoopObserver).unwrap_err(),
            EpubError::BadManifest {
                epub: "book.epub".to_string(),
                path: "OEBPS/content.opf".to_string(),
                href: "text/ch2.xhtml".to_string(),
            }
        );
    }

    #[test]
    fn test_bad_manifest_leaking_href() {
        let rootfile = rootfile(
            r#"<package><manifest>
  <item id="x" href="../../fonts/a.ttf" media-type="font/ttf"/>
</manifest><spine><itemref idref="x"/></spine></package>"#,
        );

        assert!(matches!(
            validate_rootfile(&archive(), &rootfile, &NoopObserver),
            Err(EpubError::BadManifest { href, .. }) if href == "../../fonts/a.ttf"
        ));
    }

    #[test]
    fn test_bad_itemref() {
        let rootfile = rootfile(
            r#"<package><manifest>
  <item id="ch1" href="text/ch1.xhtml" media-type="application/xhtml+xml"/>
</manifest><spine><itemref idref="ch1"/><itemref idref="ch9"/></spine></package>"#,
        );

        assert_eq!(
            validate_rootfile(&archive(), &rootfile, &NoopObserver).unwrap_err(),
            EpubError::BadItemref {
                epub: "book.epub".to_string(),
                path: "OEBPS/content.opf".to_string(),
                idref: "ch9".to_string(),
            }
        );
    }

    #[test]
    fn test_no_itemref() {
        let rootfile = rootfile(
            r#"<package><manifest>
  <item id="ch1" href="text/ch1.xhtml" media-type="application/xhtml+xml"/>
</manifest><spine/></package>"#,
        );

        assert_eq!(
            validate_rootfile(&archive(), &rootfile, &NoopObserver).unwrap_err(),
            EpubError::NoItemref {
                epub: "book.epub".to_string(),
                path: "OEBPS/content.opf".to_string(),
            }
        );
    }

    #[test]
    fn test_warnings_do_not_fail() {
        let rootfile = rootfile(
            r#"<package><manifest>
  <item id="ch1" href="text/ch1.xhtml" media-type="application/xhtml+xml" fallback="a"/>
  <item id="a" href="text/ch1.xhtml" media-type="application/xhtml+xml" fallback="b"/>
  <item id="b" href="text/ch1.xhtml" media-type="application/xhtml+xml" fallback="a"/>
  <item id="c" href="text/ch1.xhtml" media-type="application/xhtml+xml" fallback="gone"/>
</manifest><spine toc="ncx"><itemref idref="ch1"/></spine></package>"#,
        );

        let warnings = RefCell::new(Vec::new());
        let observer = |event: &ParseEvent<'_>| {
            if let ParseEvent::Warning { message, .. } = event {
                warnings.borrow_mut().push(message.clone());
            }
        };

        assert!(validate_rootfile(&archive(), &rootfile, &observer).is_ok());

        let warnings = warnings.into_inner();
        assert_eq!(warnings.len(), 5);
        assert!(warnings[0].contains("spine toc \"ncx\""));
        assert!(warnings[1].contains("circular reference ch1 -> a -> b -> a"));
        assert!(warnings[4].contains("\"gone\" does not exist"));
    }
}
