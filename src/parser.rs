//! Decoding stages of the opening pipeline
//!
//! Each stage reads one fixed or referenced entry from the [ArchiveIndex] and
//! either yields an immutable value or fails with the [EpubError] naming the
//! stage. Decoding goes through [XmlReader]; elements and attributes are matched
//! by local name and everything unknown is ignored.

use std::io::{Read, Seek};

use crate::{
    archive::ArchiveIndex,
    error::{DecodeError, EpubError},
    observer::{ParseEvent, ParseObserver},
    types::{
        Container, Contributor, Creator, Guide, GuideReference, Identifier, Manifest,
        ManifestItem, MetaEntry, Metadata, MetadataItem, Package, Rootfile, RootfileDescriptor,
        Spine, SpineItem,
    },
    utils::{NormalizeWhitespace, XmlElement, XmlReader},
};

pub const MIMETYPE_PATH: &str = "mimetype";
pub const EPUB_MIMETYPE: &str = "application/epub+zip";
pub const CONTAINER_PATH: &str = "META-INF/container.xml";
pub const OEBPS_PACKAGE_MIMETYPE: &str = "application/oebps-package+xml";

/// Checks the `mimetype` entry of the archive
///
/// The content must be exactly `application/epub+zip`: no trimming, no trailing
/// newline, no BOM.
pub fn check_mimetype<R: Read + Seek>(archive: &mut ArchiveIndex<R>) -> Result<(), EpubError> {
    if !archive.contains(MIMETYPE_PATH) {
        return Err(EpubError::MissingMimetype {
            epub: archive.name().to_string(),
        });
    }

    let content = archive.read_all(MIMETYPE_PATH)?;
    if content != EPUB_MIMETYPE.as_bytes() {
        return Err(EpubError::InvalidMimetype {
            epub: archive.name().to_string(),
            actual: String::from_utf8_lossy(&content).to_string(),
        });
    }

    Ok(())
}

/// Reads and decodes `META-INF/container.xml`
///
/// # Return
/// - `Ok(Container)`: The container with at least one rootfile descriptor
/// - `Err(EpubError)`: `MissingContainer`, `MalformedContainer` or `NoRootfile`
pub fn parse_container<R: Read + Seek>(
    archive: &mut ArchiveIndex<R>,
) -> Result<Container, EpubError> {
    if !archive.contains(CONTAINER_PATH) {
        return Err(EpubError::MissingContainer {
            epub: archive.name().to_string(),
        });
    }

    let data = archive.read_all(CONTAINER_PATH)?;
    let container = decode_container(&data).map_err(|source| EpubError::MalformedContainer {
        epub: archive.name().to_string(),
        source,
    })?;

    if container.rootfiles.is_empty() {
        return Err(EpubError::NoRootfile {
            epub: archive.name().to_string(),
        });
    }

    Ok(container)
}

/// Decodes the content of a container document
///
/// Only `container/rootfiles/rootfile` elements are considered; a missing
/// `media-type` attribute yields an empty media type.
pub fn decode_container(data: &[u8]) -> Result<Container, DecodeError> {
    let root = XmlReader::parse_bytes(data)?;
    expect_root(&root, "container")?;

    let rootfiles = root
        .find_children_by_name("rootfiles")
        .flat_map(|rootfiles| rootfiles.find_children_by_name("rootfile"))
        .map(|element| {
            let full_path = required_attr(element, "full-path")?;
            let media_type = element.get_attr("media-type").unwrap_or_default();

            Ok(RootfileDescriptor {
                full_path,
                media_type,
            })
        })
        .collect::<Result<Vec<_>, DecodeError>>()?;

    Ok(Container { rootfiles })
}

/// Reads and decodes the package document a rootfile descriptor points to
///
/// # Return
/// - `Ok(Rootfile)`: A new rootfile holding the decoded package
/// - `Err(EpubError)`: `BadRootfile` if the document is not in the archive,
///   `MalformedPackage` if it cannot be decoded, `DuplicateItemId` if two manifest
///   items share an id
pub fn parse_package<R: Read + Seek>(
    archive: &mut ArchiveIndex<R>,
    descriptor: &RootfileDescriptor,
    observer: &dyn ParseObserver,
) -> Result<Rootfile, EpubError> {
    let path = descriptor.full_path.as_str();
    if !archive.contains(path) {
        return Err(EpubError::BadRootfile {
            epub: archive.name().to_string(),
            path: path.to_string(),
        });
    }

    if descriptor.media_type != OEBPS_PACKAGE_MIMETYPE {
        observer.on_event(&ParseEvent::Warning {
            epub: archive.name(),
            path,
            message: format!(
                "rootfile declares media type \"{}\" instead of \"{}\"",
                descriptor.media_type, OEBPS_PACKAGE_MIMETYPE
            ),
        });
    }

    let data = archive.read_all(path)?;
    let package = decode_package(&data).map_err(|fault| match fault {
        PackageFault::Decode(source) => EpubError::MalformedPackage {
            epub: archive.name().to_string(),
            path: path.to_string(),
            source,
        },
        PackageFault::DuplicateItemId(id) => EpubError::DuplicateItemId {
            epub: archive.name().to_string(),
            path: path.to_string(),
            id,
        },
    })?;

    observer.on_event(&ParseEvent::PackageParsed {
        epub: archive.name(),
        path,
        manifest_items: package.manifest.len(),
        spine_items: package.spine.len(),
    });

    Ok(Rootfile {
        full_path: descriptor.full_path.clone(),
        media_type: descriptor.media_type.clone(),
        package,
    })
}

/// Reasons a package document cannot be turned into a [Package]
#[derive(Debug)]
pub enum PackageFault {
    Decode(DecodeError),
    DuplicateItemId(String),
}

impl From<DecodeError> for PackageFault {
    fn from(value: DecodeError) -> Self {
        PackageFault::Decode(value)
    }
}

/// Decodes the content of a package document
///
/// A package without `metadata`, `manifest` or `spine` decodes into empty
/// sections; the emptiness of the spine is rejected later by referential
/// validation.
pub fn decode_package(data: &[u8]) -> Result<Package, PackageFault> {
    let root = XmlReader::parse_bytes(data)?;
    expect_root(&root, "package")?;

    let metadata = root
        .first_child("metadata")
        .map(parse_metadata)
        .unwrap_or_default();
    let manifest = match root.first_child("manifest") {
        Some(element) => parse_manifest(element)?,
        None => Manifest::new(),
    };
    let spine = match root.first_child("spine") {
        Some(element) => parse_spine(element)?,
        None => Spine::default(),
    };
    let guide = root.first_child("guide").map(parse_guide);

    Ok(Package {
        version: root.get_attr("version"),
        unique_identifier: root.get_attr("unique-identifier"),
        metadata,
        manifest,
        spine,
        guide,
    })
}

/// Parse the metadata section
///
/// Singular fields keep their first occurrence; a later duplicate does not
/// overwrite it and is only visible through [items](Metadata::items).
///
/// In EPUB 3, the role and file-as of the creator and contributor are carried by
/// refining `meta` elements; they are applied when the element itself does not
/// declare them.
fn parse_metadata(metadata_element: &XmlElement) -> Metadata {
    let mut metadata = Metadata::default();
    let mut creator_id = None;
    let mut contributor_id = None;

    for element in metadata_element.children() {
        let value = element.text().normalize_whitespace();

        match element.name.as_str() {
            "title" => set_once(&mut metadata.title, &value),
            "date" => set_once(&mut metadata.date, &value),
            "publisher" => set_once(&mut metadata.publisher, &value),
            "description" => set_once(&mut metadata.description, &value),
            "subject" => set_once(&mut metadata.subject, &value),
            "language" => set_once(&mut metadata.language, &value),

            "creator" if metadata.creator.is_none() => {
                creator_id = element.get_attr("id");
                metadata.creator = Some(Creator {
                    name: value.clone(),
                    role: element.get_attr("role"),
                    file_as: element.get_attr("file-as"),
                });
            }

            "contributor" if metadata.contributor.is_none() => {
                contributor_id = element.get_attr("id");
                metadata.contributor = Some(Contributor {
                    name: value.clone(),
                    role: element.get_attr("role"),
                });
            }

            "identifier" => metadata.identifiers.push(Identifier {
                id: element.get_attr("id"),
                scheme: element.get_attr("scheme"),
                value: value.clone(),
            }),

            "meta" => metadata.meta.push(MetaEntry {
                name: element.get_attr("name"),
                content: element.get_attr("content"),
                property: element.get_attr("property"),
                refines: element.get_attr("refines"),
                text: value.clone(),
            }),

            _ => {}
        }

        let mut attributes = element
            .attributes
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect::<Vec<_>>();
        attributes.sort();

        metadata.items.push(MetadataItem {
            property: element.name.clone(),
            namespace: element.namespace.clone(),
            value,
            attributes,
        });
    }

    if let (Some(id), Some(creator)) = (creator_id, metadata.creator.as_mut()) {
        if creator.role.is_none() {
            creator.role = refinement(&metadata.meta, &id, "role");
        }
        if creator.file_as.is_none() {
            creator.file_as = refinement(&metadata.meta, &id, "file-as");
        }
    }

    if let (Some(id), Some(contributor)) = (contributor_id, metadata.contributor.as_mut()) {
        if contributor.role.is_none() {
            contributor.role = refinement(&metadata.meta, &id, "role");
        }
    }

    metadata
}

/// Parse the manifest section
fn parse_manifest(manifest_element: &XmlElement) -> Result<Manifest, PackageFault> {
    let mut manifest = Manifest::with_capacity(manifest_element.children.len());

    for element in manifest_element.find_children_by_name("item") {
        let id = required_attr(element, "id")?;
        let item = ManifestItem {
            id: id.clone(),
            href: required_attr(element, "href")?,
            media_type: required_attr(element, "media-type")?,
            properties: element.get_attr("properties"),
            fallback: element.get_attr("fallback"),
        };

        if manifest.insert(id.clone(), item).is_some() {
            return Err(PackageFault::DuplicateItemId(id));
        }
    }

    Ok(manifest)
}

/// Parse the spine section
fn parse_spine(spine_element: &XmlElement) -> Result<Spine, DecodeError> {
    let items = spine_element
        .find_children_by_name("itemref")
        .map(|element| {
            Ok(SpineItem {
                idref: required_attr(element, "idref")?,
                id: element.get_attr("id"),
                linear: element
                    .get_attr("linear")
                    .map(|linear| linear != "no")
                    .unwrap_or(true),
                properties: element.get_attr("properties"),
            })
        })
        .collect::<Result<Vec<_>, DecodeError>>()?;

    Ok(Spine {
        toc: spine_element.get_attr("toc"),
        items,
    })
}

/// Parse the guide section
fn parse_guide(guide_element: &XmlElement) -> Guide {
    let references = guide_element
        .find_children_by_name("reference")
        .map(|element| GuideReference {
            href: element.get_attr("href").unwrap_or_default(),
            title: element.get_attr("title").unwrap_or_default(),
            reference_type: element.get_attr("type").unwrap_or_default(),
        })
        .collect();

    Guide { references }
}

fn expect_root(root: &XmlElement, expected: &str) -> Result<(), DecodeError> {
    if root.name != expected {
        return Err(DecodeError::UnexpectedRoot {
            expected: expected.to_string(),
            found: root.tag_name(),
        });
    }

    Ok(())
}

fn required_attr(element: &XmlElement, attribute: &str) -> Result<String, DecodeError> {
    element
        .get_attr(attribute)
        .ok_or_else(|| DecodeError::MissingAttribute {
            tag: element.tag_name(),
            attribute: attribute.to_string(),
        })
}

#[inline]
fn set_once(slot: &mut Option<String>, value: &str) {
    if slot.is_none() {
        *slot = Some(value.to_string());
    }
}

/// Finds the value of an EPUB 3 `meta` refining the element with the given id
fn refinement(meta: &[MetaEntry], id: &str, property: &str) -> Option<String> {
    meta.iter()
        .find(|entry| {
            entry.property.as_deref() == Some(property)
                && entry
                    .refines
                    .as_deref()
                    .is_some_and(|refines| refines.strip_prefix('#').unwrap_or(refines) == id)
        })
        .map(|entry| entry.text.clone())
}
